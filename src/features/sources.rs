//! Declarative description of each activity source
//!
//! Each source lists the metrics it contributes, how each is aggregated and
//! the output column it lands in. Adding a metric or a source is a
//! configuration change.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;

use crate::{ActivitySource, ConcertError, Result};

/// How a metric is reduced over the qualifying records
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum AggregateKind {
    /// Value of the `position`-th most recent record (0 = latest)
    Latest { position: usize },
    /// Total over all qualifying records
    Sum,
}

impl fmt::Display for AggregateKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AggregateKind::Latest { position } => write!(f, "latest@{}", position),
            AggregateKind::Sum => write!(f, "sum"),
        }
    }
}

impl FromStr for AggregateKind {
    type Err = ConcertError;

    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim();
        if s == "sum" {
            return Ok(AggregateKind::Sum);
        }
        if s == "latest" {
            return Ok(AggregateKind::Latest { position: 0 });
        }
        s.strip_prefix("latest@")
            .and_then(|p| p.parse().ok())
            .map(|position| AggregateKind::Latest { position })
            .ok_or_else(|| {
                ConcertError::Config(format!(
                    "Unknown aggregate `{}`. Use sum, latest or latest@N.",
                    s
                ))
            })
    }
}

impl TryFrom<String> for AggregateKind {
    type Error = ConcertError;

    fn try_from(s: String) -> Result<Self> {
        s.parse()
    }
}

impl From<AggregateKind> for String {
    fn from(kind: AggregateKind) -> Self {
        kind.to_string()
    }
}

/// One output column computed from a source metric
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricSpec {
    /// Column in the source file
    pub field: String,
    pub aggregate: AggregateKind,
    /// Column in the feature table
    pub output: String,
}

impl MetricSpec {
    pub fn latest(field: &str, position: usize, output: &str) -> Self {
        MetricSpec {
            field: field.to_string(),
            aggregate: AggregateKind::Latest { position },
            output: output.to_string(),
        }
    }

    pub fn sum(field: &str, output: &str) -> Self {
        MetricSpec {
            field: field.to_string(),
            aggregate: AggregateKind::Sum,
            output: output.to_string(),
        }
    }
}

/// Everything the pipeline needs to know about one activity source
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceSpec {
    pub source: ActivitySource,
    /// File name inside the data directory
    pub file: String,
    pub metrics: Vec<MetricSpec>,
}

impl SourceSpec {
    /// Video platform, music video and social media, in output order
    pub fn defaults() -> Vec<SourceSpec> {
        vec![
            SourceSpec {
                source: ActivitySource::VideoPlatform,
                file: "vlive_data.csv".to_string(),
                metrics: vec![
                    MetricSpec::latest("follower", 0, "v_follower"),
                    MetricSpec::sum("playtime", "v_playtime"),
                    MetricSpec::sum("view_count", "v_view_count"),
                    MetricSpec::sum("like_count", "v_like_count"),
                    MetricSpec::sum("comment_count", "v_comment_count"),
                ],
            },
            SourceSpec {
                source: ActivitySource::MusicVideo,
                file: "mv_data.csv".to_string(),
                metrics: vec![
                    MetricSpec::sum("view_count", "m_view_count"),
                    MetricSpec::sum("like_count", "m_like_count"),
                    MetricSpec::sum("dislike_count", "m_dislike_count"),
                    MetricSpec::sum("comment_count", "m_comment_count"),
                ],
            },
            SourceSpec {
                source: ActivitySource::SocialMedia,
                file: "twitter_data.csv".to_string(),
                metrics: vec![
                    MetricSpec::latest("follower", 0, "t_follower"),
                    MetricSpec::latest("follower", 1, "t_follower_2"),
                    MetricSpec::sum("like_count", "t_like_count"),
                    MetricSpec::sum("retweet_count", "t_retweet_count"),
                    MetricSpec::sum("comment_count", "t_comment_count"),
                ],
            },
        ]
    }

    /// Distinct source fields, in first-use order
    pub fn fields(&self) -> Vec<String> {
        let mut seen = HashSet::new();
        self.metrics
            .iter()
            .filter(|m| seen.insert(m.field.as_str()))
            .map(|m| m.field.clone())
            .collect()
    }

    pub fn output_columns(&self) -> Vec<String> {
        self.metrics.iter().map(|m| m.output.clone()).collect()
    }

    pub fn validate(&self) -> Result<()> {
        if self.metrics.is_empty() {
            return Err(ConcertError::Config(format!("{} has no metrics", self.source)));
        }
        let mut outputs = HashSet::new();
        for metric in &self.metrics {
            if metric.output.is_empty() || !outputs.insert(metric.output.as_str()) {
                return Err(ConcertError::Config(format!(
                    "{}: output column `{}` is empty or duplicated",
                    self.source, metric.output
                )));
            }
        }
        Ok(())
    }
}

/// Every output column across all sources must be distinct and must not
/// shadow one of the `reserved` input columns
pub fn validate_outputs(specs: &[SourceSpec], reserved: &[&str]) -> Result<()> {
    let mut seen: HashSet<&str> = reserved.iter().copied().collect();
    for spec in specs {
        spec.validate()?;
        for metric in &spec.metrics {
            if !seen.insert(metric.output.as_str()) {
                return Err(ConcertError::Config(format!(
                    "{}: output column `{}` clashes with another column",
                    spec.source, metric.output
                )));
            }
        }
    }
    Ok(())
}
