//! In-memory tabular data with CSV input and output

use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use std::fmt;
use std::io::{Read, Write};
use std::path::Path;

use crate::{ConcertError, Result};

/// A single table cell
#[derive(Debug, Clone, PartialEq)]
pub enum Cell {
    Text(String),
    Number(f64),
    Date(NaiveDateTime),
    Null,
}

impl Cell {
    /// Infer the cell type from raw CSV text
    pub fn infer(raw: &str) -> Cell {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Cell::Null;
        }
        if let Ok(v) = trimmed.parse::<f64>() {
            return Cell::Number(v);
        }
        match parse_timestamp(trimmed) {
            Some(ts) => Cell::Date(ts),
            None => Cell::Text(trimmed.to_string()),
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Cell::Number(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_date(&self) -> Option<NaiveDateTime> {
        match self {
            Cell::Date(ts) => Some(*ts),
            _ => None,
        }
    }

    pub fn is_null(&self) -> bool {
        match self {
            Cell::Null => true,
            Cell::Number(v) => v.is_nan(),
            _ => false,
        }
    }

    /// String form used for categorical comparison and join keys
    pub fn key(&self) -> Option<String> {
        if self.is_null() {
            None
        } else {
            Some(self.to_string())
        }
    }
}

impl fmt::Display for Cell {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Cell::Text(s) => write!(f, "{}", s),
            Cell::Number(v) if v.is_nan() => Ok(()),
            Cell::Number(v) => write!(f, "{}", v),
            Cell::Date(ts) if ts.time() == NaiveTime::MIN => {
                write!(f, "{}", ts.date().format("%Y-%m-%d"))
            }
            Cell::Date(ts) => write!(f, "{}", ts.format("%Y-%m-%d %H:%M:%S")),
            Cell::Null => Ok(()),
        }
    }
}

/// Parse a date or date-time; plain dates map to midnight
pub fn parse_timestamp(raw: &str) -> Option<NaiveDateTime> {
    let raw = raw.trim();
    if let Ok(date) = NaiveDate::parse_from_str(raw, "%Y-%m-%d") {
        return Some(date.and_time(NaiveTime::MIN));
    }
    ["%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M:%S"]
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(raw, fmt).ok())
}

/// How specific columns are typed when reading a CSV
#[derive(Debug, Clone, Default)]
pub struct ColumnHints<'a> {
    /// Kept verbatim as text, never inferred as numbers
    pub text: Vec<&'a str>,
    /// Must parse as a date for every row
    pub dates: Vec<&'a str>,
}

/// Row-major table with named columns
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Table {
    columns: Vec<String>,
    rows: Vec<Vec<Cell>>,
}

impl Table {
    pub fn new(columns: Vec<String>, rows: Vec<Vec<Cell>>) -> Self {
        debug_assert!(rows.iter().all(|r| r.len() == columns.len()));
        Table { columns, rows }
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn rows(&self) -> &[Vec<Cell>] {
        &self.rows
    }

    pub fn into_rows(self) -> Vec<Vec<Cell>> {
        self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c == name)
    }

    /// Column index, or a schema error naming the table
    pub fn require_column(&self, name: &str, table_name: &str) -> Result<usize> {
        self.column_index(name).ok_or_else(|| {
            ConcertError::schema(table_name, format!("required column `{}` is missing", name))
        })
    }

    pub fn column(&self, name: &str) -> Option<impl Iterator<Item = &Cell>> {
        let idx = self.column_index(name)?;
        Some(self.rows.iter().map(move |r| &r[idx]))
    }

    pub fn cell(&self, row: usize, name: &str) -> Option<&Cell> {
        let idx = self.column_index(name)?;
        self.rows.get(row).map(|r| &r[idx])
    }

    /// Split off one column, returning the remaining table and its cells
    pub fn take_column(self, name: &str) -> Option<(Table, Vec<Cell>)> {
        let idx = self.column_index(name)?;
        let mut columns = self.columns;
        columns.remove(idx);
        let mut taken = Vec::with_capacity(self.rows.len());
        let rows = self
            .rows
            .into_iter()
            .map(|mut r| {
                taken.push(r.remove(idx));
                r
            })
            .collect();
        Some((Table { columns, rows }, taken))
    }

    /// Read a CSV file, naming the file in schema errors
    pub fn read_csv(path: &Path, hints: &ColumnHints<'_>) -> Result<Table> {
        let file = std::fs::File::open(path).map_err(|e| {
            ConcertError::schema(path.display().to_string(), format!("cannot open: {}", e))
        })?;
        Self::from_reader(file, &path.display().to_string(), hints)
    }

    pub fn from_reader<R: Read>(reader: R, name: &str, hints: &ColumnHints<'_>) -> Result<Table> {
        let mut reader = csv::ReaderBuilder::new().trim(csv::Trim::All).from_reader(reader);
        let columns: Vec<String> = reader.headers()?.iter().map(str::to_string).collect();

        let text_idx: Vec<bool> = columns.iter().map(|c| hints.text.contains(&c.as_str())).collect();
        let date_idx: Vec<bool> = columns.iter().map(|c| hints.dates.contains(&c.as_str())).collect();

        let mut rows = Vec::new();
        for (line, record) in reader.records().enumerate() {
            let record = record?;
            let mut row = Vec::with_capacity(columns.len());
            for (i, raw) in record.iter().enumerate() {
                let cell = if date_idx[i] {
                    let ts = parse_timestamp(raw).ok_or_else(|| {
                        ConcertError::schema(
                            name,
                            format!(
                                "row {}: `{}` is not a date in column `{}`",
                                line + 1,
                                raw,
                                columns[i]
                            ),
                        )
                    })?;
                    Cell::Date(ts)
                } else if text_idx[i] && !raw.is_empty() {
                    Cell::Text(raw.to_string())
                } else {
                    Cell::infer(raw)
                };
                row.push(cell);
            }
            rows.push(row);
        }

        log::debug!("Read {} rows x {} columns from {}", rows.len(), columns.len(), name);
        Ok(Table { columns, rows })
    }

    pub fn write_csv(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let file = std::fs::File::create(path)?;
        self.write_to(file)
    }

    pub fn write_to<W: Write>(&self, writer: W) -> Result<()> {
        let mut writer = csv::Writer::from_writer(writer);
        writer.write_record(&self.columns)?;
        for row in &self.rows {
            writer.write_record(row.iter().map(|c| c.to_string()))?;
        }
        writer.flush()?;
        Ok(())
    }
}
