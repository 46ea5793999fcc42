//! Per-artist activity logs

use chrono::NaiveDateTime;
use std::collections::HashMap;

use crate::data::table::{Cell, Table};
use crate::{ActivitySource, ArtistId, ConcertError, Result};

/// One upload/snapshot in an activity log
#[derive(Debug, Clone, PartialEq)]
pub struct ActivityRecord {
    pub uploaded_at: NaiveDateTime,
    /// Metric values in the log's metric column order; nulls are NaN
    pub metrics: Vec<f64>,
}

/// Append-only activity history of one source, indexed by artist.
///
/// Records for an artist keep their file order.
#[derive(Debug, Clone)]
pub struct ActivityLog {
    source: ActivitySource,
    metric_names: Vec<String>,
    by_artist: HashMap<ArtistId, Vec<ActivityRecord>>,
    total: usize,
}

impl ActivityLog {
    pub fn new(source: ActivitySource, metric_names: Vec<String>) -> Self {
        ActivityLog {
            source,
            metric_names,
            by_artist: HashMap::new(),
            total: 0,
        }
    }

    /// Build from a loaded table, keeping only `metrics` columns
    pub fn from_table(
        source: ActivitySource,
        table: &Table,
        artist_column: &str,
        date_column: &str,
        metrics: &[String],
    ) -> Result<Self> {
        let file = source.to_string();
        let artist_idx = table.require_column(artist_column, &file)?;
        let date_idx = table.require_column(date_column, &file)?;
        let metric_idx = metrics
            .iter()
            .map(|m| table.require_column(m, &file))
            .collect::<Result<Vec<_>>>()?;

        let mut log = ActivityLog::new(source, metrics.to_vec());
        for (line, row) in table.rows().iter().enumerate() {
            let Some(artist) = row[artist_idx].key() else {
                log::debug!("{}: skipping row {} without artist", file, line + 1);
                continue;
            };
            let uploaded_at = row[date_idx].as_date().ok_or_else(|| {
                ConcertError::schema(&file, format!("row {}: missing `{}`", line + 1, date_column))
            })?;
            let values = metric_idx
                .iter()
                .zip(metrics)
                .map(|(&i, name)| match &row[i] {
                    Cell::Number(v) => Ok(*v),
                    Cell::Null => Ok(f64::NAN),
                    other => Err(ConcertError::schema(
                        &file,
                        format!("row {}: `{}` is not numeric ({})", line + 1, name, other),
                    )),
                })
                .collect::<Result<Vec<_>>>()?;

            log.push(ArtistId(artist), ActivityRecord { uploaded_at, metrics: values });
        }

        log::info!(
            "Loaded {} {} records for {} artists",
            log.len(),
            source,
            log.artist_count()
        );
        Ok(log)
    }

    pub fn push(&mut self, artist: ArtistId, record: ActivityRecord) {
        debug_assert_eq!(record.metrics.len(), self.metric_names.len());
        self.by_artist.entry(artist).or_default().push(record);
        self.total += 1;
    }

    pub fn source(&self) -> ActivitySource {
        self.source
    }

    pub fn metric_names(&self) -> &[String] {
        &self.metric_names
    }

    pub fn metric_index(&self, name: &str) -> Option<usize> {
        self.metric_names.iter().position(|m| m == name)
    }

    /// All records of one artist, empty when the artist has none
    pub fn records_for(&self, artist: &ArtistId) -> &[ActivityRecord] {
        self.by_artist.get(artist).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn len(&self) -> usize {
        self.total
    }

    pub fn is_empty(&self) -> bool {
        self.total == 0
    }

    pub fn artist_count(&self) -> usize {
        self.by_artist.len()
    }
}
