//! One-hot encoding of categorical columns
//!
//! Indicator columns are derived from the values observed when the
//! vocabulary is fitted. A fitted [`Vocabulary`] can be frozen and reused so
//! later batches produce the identical column set.

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::BTreeSet;
use std::path::Path;

use crate::data::table::{Cell, Table};
use crate::{ConcertError, Result};

/// Sorted set of observed values for one categorical column
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Vocabulary {
    pub column: String,
    pub values: Vec<String>,
}

impl Vocabulary {
    /// Names of the indicator columns, in vocabulary order
    pub fn indicator_columns(&self) -> Vec<String> {
        self.values
            .iter()
            .map(|v| format!("{}_{}", self.column, v))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Recover the categorical value from a row of indicators.
    ///
    /// Returns `None` for an all-zero row (null or unseen value).
    pub fn decode(&self, indicators: &[f64]) -> Option<&str> {
        indicators
            .iter()
            .position(|&v| v == 1.0)
            .and_then(|i| self.values.get(i))
            .map(String::as_str)
    }
}

/// Finite numbers sort numerically, everything else lexicographically after them
fn compare_values(a: &str, b: &str) -> Ordering {
    match (finite_number(a), finite_number(b)) {
        (Some(x), Some(y)) => x.partial_cmp(&y).unwrap_or(Ordering::Equal),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => a.cmp(b),
    }
}

// "inf" and "nan" parse as f64 but are category names here
fn finite_number(value: &str) -> Option<f64> {
    value.parse::<f64>().ok().filter(|x| x.is_finite())
}

/// Result of encoding one column
#[derive(Debug, Clone)]
pub struct Encoded {
    pub table: Table,
    /// Rows whose value was null
    pub null_rows: usize,
    /// Rows whose value is not in a frozen vocabulary
    pub unseen_rows: usize,
}

/// One-hot encoder for a single named column
pub struct CategoricalEncoder;

impl CategoricalEncoder {
    /// Build a vocabulary from the non-null values of `column`
    pub fn fit(table: &Table, column: &str) -> Result<Vocabulary> {
        let cells = table
            .column(column)
            .ok_or_else(|| missing_column(column))?;
        let observed: BTreeSet<String> = cells.filter_map(Cell::key).collect();
        let mut values: Vec<String> = observed.into_iter().collect();
        values.sort_by(|a, b| compare_values(a, b));

        Ok(Vocabulary {
            column: column.to_string(),
            values,
        })
    }

    /// Replace the vocabulary's column with its indicator columns.
    ///
    /// Indicators are appended after the existing columns. Every row gets
    /// exactly one 1.0 when its value is in the vocabulary. Null cells and
    /// values outside the vocabulary encode as all zeros and are counted.
    pub fn transform(table: Table, vocab: &Vocabulary) -> Result<Encoded> {
        let (rest, cells) = table
            .take_column(&vocab.column)
            .ok_or_else(|| missing_column(&vocab.column))?;

        let mut columns = rest.columns().to_vec();
        columns.extend(vocab.indicator_columns());

        let mut null_rows = 0;
        let mut unseen_rows = 0;
        let rows = rest
            .into_rows()
            .into_iter()
            .zip(cells)
            .map(|(mut row, cell)| {
                let hit = match cell.key() {
                    None => {
                        null_rows += 1;
                        None
                    }
                    Some(key) => {
                        let pos = vocab.values.iter().position(|v| *v == key);
                        if pos.is_none() {
                            unseen_rows += 1;
                        }
                        pos
                    }
                };
                row.extend((0..vocab.len()).map(|i| {
                    Cell::Number(if Some(i) == hit { 1.0 } else { 0.0 })
                }));
                row
            })
            .collect();

        if null_rows > 0 {
            log::debug!("{} null values in `{}` encoded as all-zero", null_rows, vocab.column);
        }
        if unseen_rows > 0 {
            log::warn!(
                "{} values in `{}` are outside the frozen vocabulary, encoded as all-zero",
                unseen_rows,
                vocab.column
            );
        }

        Ok(Encoded {
            table: Table::new(columns, rows),
            null_rows,
            unseen_rows,
        })
    }

    /// Fit on the table itself, then transform it
    pub fn encode(table: Table, column: &str) -> Result<(Table, Vocabulary)> {
        let vocab = Self::fit(&table, column)?;
        let encoded = Self::transform(table, &vocab)?;
        Ok((encoded.table, vocab))
    }
}

fn missing_column(column: &str) -> ConcertError {
    ConcertError::schema(
        "feature table",
        format!("categorical column `{}` is missing", column),
    )
}

/// Vocabularies for every encoded column, in encoding order
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeatureSchema {
    pub vocabularies: Vec<Vocabulary>,
}

impl FeatureSchema {
    pub fn get(&self, column: &str) -> Option<&Vocabulary> {
        self.vocabularies.iter().find(|v| v.column == column)
    }

    pub fn indicator_columns(&self) -> Vec<String> {
        self.vocabularies
            .iter()
            .flat_map(Vocabulary::indicator_columns)
            .collect()
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_string_pretty(self)
            .map_err(|e| ConcertError::Parse(format!("Failed to serialize vocabulary: {}", e)))?;
        std::fs::write(path, json)?;
        Ok(())
    }

    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        serde_json::from_str(&content).map_err(|e| {
            ConcertError::Parse(format!("Failed to parse vocabulary {}: {}", path.display(), e))
        })
    }
}
