//! Post-cutoff window aggregation over activity logs
//!
//! Only records uploaded strictly after the cutoff qualify. Qualifying
//! records are ordered newest first with a stable sort, so records sharing a
//! timestamp keep their file order.

use chrono::NaiveDateTime;

use crate::data::activity::{ActivityLog, ActivityRecord};
use crate::features::sources::{AggregateKind, SourceSpec};
use crate::{ActivitySource, ArtistId, ConcertError, Result};

/// A metric spec resolved against a log's metric columns
#[derive(Debug, Clone)]
struct ResolvedMetric {
    index: usize,
    kind: AggregateKind,
    output: String,
}

/// Outcome of one aggregate slot
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum AggregateValue {
    Value(f64),
    /// A latest slot asked for a record that does not exist
    Missing { position: usize },
}

/// Aggregates for one (artist, cutoff) pair, in spec order
#[derive(Debug, Clone, PartialEq)]
pub struct AggregateResult {
    pub source: ActivitySource,
    /// Number of records strictly after the cutoff
    pub qualifying: usize,
    pub values: Vec<(String, AggregateValue)>,
}

/// A latest slot that could not be filled
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MissingSlot {
    pub source: ActivitySource,
    pub metric: String,
    pub position: usize,
    pub available: usize,
}

impl MissingSlot {
    pub fn into_error(self, row: usize, artist: ArtistId) -> ConcertError {
        ConcertError::MissingData {
            row,
            artist,
            activity: self.source,
            metric: self.metric,
            position: self.position,
            available: self.available,
        }
    }
}

impl AggregateResult {
    /// Every unfilled latest slot
    pub fn missing(&self) -> Vec<MissingSlot> {
        self.values
            .iter()
            .filter_map(|(output, value)| match value {
                AggregateValue::Missing { position } => Some(MissingSlot {
                    source: self.source,
                    metric: output.clone(),
                    position: *position,
                    available: self.qualifying,
                }),
                AggregateValue::Value(_) => None,
            })
            .collect()
    }

    /// Values with unfilled slots as NaN
    pub fn values_or_nan(&self) -> Vec<f64> {
        self.values
            .iter()
            .map(|(_, v)| match v {
                AggregateValue::Value(x) => *x,
                AggregateValue::Missing { .. } => f64::NAN,
            })
            .collect()
    }

    pub fn get(&self, output: &str) -> Option<AggregateValue> {
        self.values
            .iter()
            .find(|(name, _)| name == output)
            .map(|(_, v)| *v)
    }
}

/// Computes one source's aggregates relative to a cutoff
#[derive(Debug, Clone)]
pub struct WindowAggregator<'a> {
    log: &'a ActivityLog,
    metrics: Vec<ResolvedMetric>,
}

impl<'a> WindowAggregator<'a> {
    /// Bind a source spec to its log; every field must be a log column
    pub fn new(log: &'a ActivityLog, spec: &SourceSpec) -> Result<Self> {
        let metrics = spec
            .metrics
            .iter()
            .map(|m| {
                let index = log.metric_index(&m.field).ok_or_else(|| {
                    ConcertError::schema(
                        spec.file.as_str(),
                        format!("metric column `{}` is not loaded", m.field),
                    )
                })?;
                Ok(ResolvedMetric {
                    index,
                    kind: m.aggregate,
                    output: m.output.clone(),
                })
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(WindowAggregator { log, metrics })
    }

    pub fn source(&self) -> ActivitySource {
        self.log.source()
    }

    /// Aggregate the artist's records uploaded strictly after `cutoff`
    pub fn aggregate(&self, artist: &ArtistId, cutoff: NaiveDateTime) -> AggregateResult {
        let mut window: Vec<&ActivityRecord> = self
            .log
            .records_for(artist)
            .iter()
            .filter(|r| r.uploaded_at > cutoff)
            .collect();
        // Vec::sort_by is stable
        window.sort_by(|a, b| b.uploaded_at.cmp(&a.uploaded_at));

        let values = self
            .metrics
            .iter()
            .map(|m| {
                let value = match m.kind {
                    AggregateKind::Latest { position } => window
                        .get(position)
                        .map(|r| AggregateValue::Value(r.metrics[m.index]))
                        .unwrap_or(AggregateValue::Missing { position }),
                    AggregateKind::Sum => AggregateValue::Value(
                        window
                            .iter()
                            .map(|r| r.metrics[m.index])
                            .filter(|v| !v.is_nan())
                            .sum(),
                    ),
                };
                (m.output.clone(), value)
            })
            .collect();

        AggregateResult {
            source: self.source(),
            qualifying: window.len(),
            values,
        }
    }
}
