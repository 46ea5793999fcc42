//! Concert feature table assembly
//!
//! Encodes the categorical concert columns, inner-joins artists onto
//! concerts, encodes the artist categorical columns, then appends every
//! activity source's window aggregates, one output row per joined concert.

use chrono::NaiveDateTime;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::path::Path;

use crate::data::loader::SourceTables;
use crate::data::table::{Cell, Table};
use crate::features::encoding::{CategoricalEncoder, FeatureSchema, Vocabulary};
use crate::features::sources::SourceSpec;
use crate::features::window::{AggregateResult, MissingSlot, WindowAggregator};
use crate::{ArtistId, ColumnConfig, ConcertError, Config, Result};

const FEATURE_TABLE: &str = "feature table";

/// What to do with a row whose latest slot cannot be filled
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MissingDataPolicy {
    /// Fail the run with the first offending row
    #[default]
    Abort,
    /// Leave the row out of the feature table
    DropRow,
    /// Keep the row with NaN in the unfilled slots
    Nan,
}

/// An unfilled latest slot on one concert row
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RowFailure {
    /// Row index in the concert table
    pub row: usize,
    pub artist: ArtistId,
    pub slot: MissingSlot,
}

impl RowFailure {
    pub fn to_error(&self) -> ConcertError {
        self.slot.clone().into_error(self.row, self.artist.clone())
    }
}

/// A concert row the artist join could not match
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DroppedConcert {
    pub row: usize,
    pub artist: Option<ArtistId>,
}

/// Counts and diagnostics for one pipeline run
#[derive(Debug, Clone, Default)]
pub struct PipelineReport {
    pub concerts_in: usize,
    pub dropped_concerts: Vec<DroppedConcert>,
    pub failures: Vec<RowFailure>,
    pub rows_out: usize,
}

/// The feature table plus the vocabularies that produced its indicators
#[derive(Debug, Clone)]
pub struct PipelineOutput {
    pub table: Table,
    pub schema: FeatureSchema,
    pub report: PipelineReport,
}

impl PipelineOutput {
    /// Write the feature table, and the vocabulary if a path is given
    pub fn save(&self, table_path: &Path, vocabulary_path: Option<&Path>) -> Result<()> {
        self.table.write_csv(table_path)?;
        log::info!("Wrote {} rows to {}", self.table.len(), table_path.display());
        if let Some(path) = vocabulary_path {
            self.schema.save(path)?;
            log::info!("Wrote vocabulary to {}", path.display());
        }
        Ok(())
    }
}

/// Joins, encodes and aggregates the source tables into the feature table
#[derive(Debug, Clone)]
pub struct FeatureJoinPipeline {
    columns: ColumnConfig,
    sources: Vec<SourceSpec>,
    policy: MissingDataPolicy,
    parallel: bool,
    frozen: Option<FeatureSchema>,
}

impl FeatureJoinPipeline {
    pub fn new(columns: ColumnConfig, sources: Vec<SourceSpec>) -> Self {
        FeatureJoinPipeline {
            columns,
            sources,
            policy: MissingDataPolicy::default(),
            parallel: false,
            frozen: None,
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(config.columns.clone(), config.sources.clone())
            .with_policy(config.pipeline.missing_data)
            .with_parallel(config.pipeline.parallel)
    }

    pub fn with_policy(mut self, policy: MissingDataPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_parallel(mut self, parallel: bool) -> Self {
        self.parallel = parallel;
        self
    }

    /// Reuse previously fitted vocabularies instead of fitting on this batch
    pub fn with_vocabulary(mut self, schema: FeatureSchema) -> Self {
        self.frozen = Some(schema);
        self
    }

    pub fn run(&self, inputs: &SourceTables) -> Result<PipelineOutput> {
        let mut schema = FeatureSchema::default();
        let mut report = PipelineReport {
            concerts_in: inputs.concerts.len(),
            ..Default::default()
        };

        let mut concerts = inputs.concerts.clone();
        for column in &self.columns.concert_categorical {
            let (table, vocab) = self.encode(concerts, column)?;
            concerts = table;
            schema.vocabularies.push(vocab);
        }

        let (mut merged, origin) = self.merge(&concerts, &inputs.artists, &mut report)?;

        for column in &self.columns.artist_categorical {
            let (table, vocab) = self.encode(merged, column)?;
            merged = table;
            schema.vocabularies.push(vocab);
        }
        let merged = indicators_last(merged, &schema.indicator_columns());

        let keys = self.row_keys(&merged, &origin)?;
        let aggregators = self.aggregators(inputs)?;

        let compute = |(artist, cutoff): &(ArtistId, NaiveDateTime)| -> Vec<AggregateResult> {
            aggregators
                .iter()
                .map(|agg| agg.aggregate(artist, *cutoff))
                .collect()
        };
        let aggregates: Vec<Vec<AggregateResult>> = if self.parallel {
            keys.par_iter().map(compute).collect()
        } else {
            keys.iter().map(compute).collect()
        };

        let mut columns = merged.columns().to_vec();
        for output in self.sources.iter().flat_map(SourceSpec::output_columns) {
            if columns.contains(&output) {
                return Err(ConcertError::schema(
                    FEATURE_TABLE,
                    format!("aggregate column `{}` already exists", output),
                ));
            }
            columns.push(output);
        }

        let mut rows = Vec::with_capacity(merged.len());
        for (i, (mut row, results)) in merged.into_rows().into_iter().zip(aggregates).enumerate() {
            let artist = &keys[i].0;
            let failures: Vec<RowFailure> = results
                .iter()
                .flat_map(AggregateResult::missing)
                .map(|slot| RowFailure {
                    row: origin[i],
                    artist: artist.clone(),
                    slot,
                })
                .collect();

            if !failures.is_empty() {
                match self.policy {
                    MissingDataPolicy::Abort => {
                        let err = failures[0].to_error();
                        log::error!("{}", err);
                        return Err(err);
                    }
                    MissingDataPolicy::DropRow | MissingDataPolicy::Nan => {
                        for failure in &failures {
                            log::warn!("{}", failure.to_error());
                        }
                        report.failures.extend(failures);
                        if self.policy == MissingDataPolicy::DropRow {
                            continue;
                        }
                    }
                }
            }

            row.extend(
                results
                    .iter()
                    .flat_map(AggregateResult::values_or_nan)
                    .map(Cell::Number),
            );
            rows.push(row);
        }

        report.rows_out = rows.len();
        log::info!(
            "Built feature table: {} rows x {} columns ({} concerts in, {} dropped by join, {} missing-data failures)",
            report.rows_out,
            columns.len(),
            report.concerts_in,
            report.dropped_concerts.len(),
            report.failures.len()
        );

        Ok(PipelineOutput {
            table: Table::new(columns, rows),
            schema,
            report,
        })
    }

    fn encode(&self, table: Table, column: &str) -> Result<(Table, Vocabulary)> {
        match self.frozen.as_ref().and_then(|s| s.get(column)) {
            Some(vocab) => {
                let encoded = CategoricalEncoder::transform(table, vocab)?;
                Ok((encoded.table, vocab.clone()))
            }
            None => {
                let (table, vocab) = CategoricalEncoder::encode(table, column)?;
                log::debug!("Encoded `{}` into {} indicator columns", column, vocab.len());
                Ok((table, vocab))
            }
        }
    }

    /// Inner join on artist id, keeping concert order.
    ///
    /// Returns the joined table and, per joined row, the concert row it came
    /// from. Artist columns clashing with concert columns get an `_artist`
    /// suffix.
    fn merge(
        &self,
        concerts: &Table,
        artists: &Table,
        report: &mut PipelineReport,
    ) -> Result<(Table, Vec<usize>)> {
        let key = &self.columns.artist_id;
        let concert_key = concerts.require_column(key, FEATURE_TABLE)?;
        let artist_key = artists.require_column(key, "artist table")?;

        let mut by_artist: HashMap<String, Vec<usize>> = HashMap::new();
        for (i, row) in artists.rows().iter().enumerate() {
            if let Some(id) = row[artist_key].key() {
                by_artist.entry(id).or_default().push(i);
            }
        }

        let artist_cols: Vec<usize> = (0..artists.columns().len())
            .filter(|&i| i != artist_key)
            .collect();
        let mut columns = concerts.columns().to_vec();
        for &i in &artist_cols {
            let name = &artists.columns()[i];
            if columns.contains(name) {
                columns.push(format!("{}_artist", name));
            } else {
                columns.push(name.clone());
            }
        }

        let mut rows = Vec::new();
        let mut origin = Vec::new();
        let mut matched_artists = HashSet::new();
        for (c, concert) in concerts.rows().iter().enumerate() {
            let id = concert[concert_key].key();
            let found = id.as_ref().and_then(|id| by_artist.get(id));
            match found {
                Some(matches) => {
                    for &a in matches {
                        let mut row = concert.clone();
                        row.extend(artist_cols.iter().map(|&i| artists.rows()[a][i].clone()));
                        rows.push(row);
                        origin.push(c);
                    }
                    if matches.len() > 1 {
                        log::debug!("Concert row {} matched {} artist rows", c, matches.len());
                    }
                    if let Some(id) = id {
                        matched_artists.insert(id);
                    }
                }
                None => report.dropped_concerts.push(DroppedConcert {
                    row: c,
                    artist: id.map(ArtistId),
                }),
            }
        }

        if !report.dropped_concerts.is_empty() {
            let mut unknown: Vec<String> = report
                .dropped_concerts
                .iter()
                .map(|d| d.artist.as_ref().map_or("<null>".to_string(), |a| a.to_string()))
                .collect();
            unknown.sort();
            unknown.dedup();
            log::warn!(
                "Dropped {} concerts with no matching artist: {}",
                report.dropped_concerts.len(),
                unknown.join(", ")
            );
        }
        let unused = by_artist.len() - matched_artists.len();
        if unused > 0 {
            log::debug!("{} artists have no concerts", unused);
        }

        Ok((Table::new(columns, rows), origin))
    }

    fn row_keys(&self, merged: &Table, origin: &[usize]) -> Result<Vec<(ArtistId, NaiveDateTime)>> {
        let artist_idx = merged.require_column(&self.columns.artist_id, FEATURE_TABLE)?;
        let date_idx = merged.require_column(&self.columns.closing_date, FEATURE_TABLE)?;

        merged
            .rows()
            .iter()
            .zip(origin)
            .map(|(row, &c)| {
                let artist = row[artist_idx].key().map(ArtistId).ok_or_else(|| {
                    ConcertError::schema(FEATURE_TABLE, format!("row {}: null artist id", c))
                })?;
                let cutoff = row[date_idx].as_date().ok_or_else(|| {
                    ConcertError::schema(
                        FEATURE_TABLE,
                        format!("row {}: missing `{}`", c, self.columns.closing_date),
                    )
                })?;
                Ok((artist, cutoff))
            })
            .collect()
    }

    fn aggregators<'a>(&self, inputs: &'a SourceTables) -> Result<Vec<WindowAggregator<'a>>> {
        if inputs.activity.len() != self.sources.len() {
            return Err(ConcertError::Config(format!(
                "{} activity logs loaded for {} sources",
                inputs.activity.len(),
                self.sources.len()
            )));
        }
        inputs
            .activity
            .iter()
            .zip(&self.sources)
            .map(|(log, spec)| {
                if log.source() != spec.source {
                    return Err(ConcertError::Config(format!(
                        "activity log for {} bound to {} spec",
                        log.source(),
                        spec.source
                    )));
                }
                WindowAggregator::new(log, spec)
            })
            .collect()
    }
}

/// Move indicator columns behind every other column, keeping relative order
fn indicators_last(table: Table, indicators: &[String]) -> Table {
    let columns = table.columns();
    let order: Vec<usize> = (0..columns.len())
        .filter(|&i| !indicators.contains(&columns[i]))
        .chain(
            indicators
                .iter()
                .filter_map(|name| columns.iter().position(|c| c == name)),
        )
        .collect();

    let reordered: Vec<String> = order.iter().map(|&i| columns[i].clone()).collect();
    let rows = table
        .into_rows()
        .into_iter()
        .map(|row| order.iter().map(|&i| row[i].clone()).collect())
        .collect();
    Table::new(reordered, rows)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::activity::{ActivityLog, ActivityRecord};
    use crate::data::table::parse_timestamp;
    use crate::features::window::AggregateValue;
    use crate::ActivitySource;

    fn text(s: &str) -> Cell {
        Cell::Text(s.to_string())
    }

    fn date(s: &str) -> Cell {
        Cell::Date(parse_timestamp(s).unwrap())
    }

    fn concerts(rows: &[(&str, &str, &str, &str, f64)]) -> Table {
        Table::new(
            ["artist_id", "continent", "city", "closing_date", "target_label"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            rows.iter()
                .map(|(a, cont, city, d, y)| {
                    vec![text(a), text(cont), text(city), date(d), Cell::Number(*y)]
                })
                .collect(),
        )
    }

    fn artists(rows: &[(&str, &str, f64)]) -> Table {
        Table::new(
            ["artist_id", "gender", "debut_year"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            rows.iter()
                .map(|(a, g, y)| vec![text(a), text(g), Cell::Number(*y)])
                .collect(),
        )
    }

    fn activity_log(source: ActivitySource, fields: &[&str], records: &[(&str, &str, Vec<f64>)]) -> ActivityLog {
        let mut log = ActivityLog::new(source, fields.iter().map(|s| s.to_string()).collect());
        for (artist, d, metrics) in records {
            log.push(
                ArtistId::new(*artist),
                ActivityRecord {
                    uploaded_at: parse_timestamp(d).unwrap(),
                    metrics: metrics.clone(),
                },
            );
        }
        log
    }

    /// Artist A has plenty of activity; B has none on social media
    fn inputs() -> SourceTables {
        SourceTables {
            concerts: concerts(&[
                ("A", "Europe", "Paris", "2023-01-10", 3.0),
                ("B", "Asia", "Seoul", "2023-01-10", 1.0),
            ]),
            artists: artists(&[("A", "F", 2015.0), ("B", "M", 2018.0)]),
            activity: vec![
                activity_log(
                    ActivitySource::VideoPlatform,
                    &["follower", "playtime", "view_count", "like_count", "comment_count"],
                    &[
                        ("A", "2023-01-11", vec![1000.0, 10.0, 100.0, 5.0, 1.0]),
                        ("A", "2023-01-12", vec![1100.0, 20.0, 50.0, 5.0, 2.0]),
                        ("B", "2023-01-11", vec![300.0, 1.0, 9.0, 1.0, 0.0]),
                    ],
                ),
                activity_log(
                    ActivitySource::MusicVideo,
                    &["view_count", "like_count", "dislike_count", "comment_count"],
                    &[("A", "2023-01-15", vec![500.0, 50.0, 2.0, 7.0])],
                ),
                activity_log(
                    ActivitySource::SocialMedia,
                    &["follower", "like_count", "retweet_count", "comment_count"],
                    &[
                        ("A", "2023-01-11", vec![10.0, 1.0, 1.0, 1.0]),
                        ("A", "2023-01-13", vec![12.0, 2.0, 2.0, 2.0]),
                        ("B", "2023-01-10", vec![99.0, 9.0, 9.0, 9.0]),
                    ],
                ),
            ],
        }
    }

    fn pipeline() -> FeatureJoinPipeline {
        FeatureJoinPipeline::from_config(&Config::default())
    }

    fn value(table: &Table, row: usize, column: &str) -> f64 {
        table.cell(row, column).and_then(Cell::as_f64).unwrap()
    }

    #[test]
    fn test_abort_reports_row_artist_and_source() {
        let err = pipeline().run(&inputs()).unwrap_err();
        match err {
            ConcertError::MissingData {
                row,
                artist,
                activity,
                metric,
                ..
            } => {
                assert_eq!(row, 1);
                assert_eq!(artist, ArtistId::new("B"));
                assert_eq!(activity, ActivitySource::SocialMedia);
                assert_eq!(metric, "t_follower");
            }
            other => panic!("unexpected error: {}", other),
        }
    }

    #[test]
    fn test_nan_policy_keeps_row_with_zero_sums() {
        let out = pipeline()
            .with_policy(MissingDataPolicy::Nan)
            .run(&inputs())
            .unwrap();
        let t = &out.table;

        assert_eq!(t.len(), 2);
        assert!(value(t, 1, "t_follower").is_nan());
        assert!(value(t, 1, "t_follower_2").is_nan());
        assert_eq!(value(t, 1, "t_like_count"), 0.0);
        assert_eq!(value(t, 1, "t_retweet_count"), 0.0);
        assert_eq!(value(t, 1, "t_comment_count"), 0.0);

        let failed: Vec<&str> = out
            .report
            .failures
            .iter()
            .map(|f| f.slot.metric.as_str())
            .collect();
        assert_eq!(failed, vec!["t_follower", "t_follower_2"]);
        assert!(out.report.failures.iter().all(|f| f.row == 1));
    }

    #[test]
    fn test_repeated_artist_rows_fan_out_in_concert_order() {
        let mut sources = inputs();
        sources.artists = artists(&[("A", "F", 2015.0), ("A", "F", 2016.0), ("B", "M", 2018.0)]);

        let out = pipeline()
            .with_policy(MissingDataPolicy::Nan)
            .run(&sources)
            .unwrap();
        let t = &out.table;

        assert_eq!(t.len(), 3);
        assert_eq!(value(t, 0, "debut_year"), 2015.0);
        assert_eq!(value(t, 1, "debut_year"), 2016.0);
        assert_eq!(value(t, 0, "v_view_count"), value(t, 1, "v_view_count"));
        assert_eq!(value(t, 2, "debut_year"), 2018.0);

        // B sits at output row 2 but concert row 1
        assert!(!out.report.failures.is_empty());
        assert!(out.report.failures.iter().all(|f| f.row == 1));

        let err = pipeline().run(&sources).unwrap_err();
        assert!(matches!(err, ConcertError::MissingData { row: 1, .. }));
    }

    #[test]
    fn test_aggregate_output_clashing_with_input_column_is_schema_error() {
        let mut sources = SourceSpec::defaults();
        sources[1].metrics[0].output = "debut_year".to_string();
        let err = FeatureJoinPipeline::new(Config::default().columns, sources)
            .with_policy(MissingDataPolicy::Nan)
            .run(&inputs())
            .unwrap_err();
        assert!(matches!(err, ConcertError::Schema { .. }));
        assert!(err.to_string().contains("debut_year"));
    }

    #[test]
    fn test_window_values_for_complete_row() {
        let out = pipeline()
            .with_policy(MissingDataPolicy::DropRow)
            .run(&inputs())
            .unwrap();
        let t = &out.table;

        assert_eq!(t.len(), 1);
        assert_eq!(value(t, 0, "v_view_count"), 150.0);
        assert_eq!(value(t, 0, "v_follower"), 1100.0);
        assert_eq!(value(t, 0, "v_playtime"), 30.0);
        assert_eq!(value(t, 0, "m_like_count"), 50.0);
        assert_eq!(value(t, 0, "t_follower"), 12.0);
        assert_eq!(value(t, 0, "t_follower_2"), 10.0);
        assert_eq!(value(t, 0, "t_like_count"), 3.0);
    }

    #[test]
    fn test_column_order() {
        let out = pipeline()
            .with_policy(MissingDataPolicy::Nan)
            .run(&inputs())
            .unwrap();

        let expected: Vec<&str> = vec![
            "artist_id",
            "closing_date",
            "target_label",
            "debut_year",
            "continent_Asia",
            "continent_Europe",
            "city_Paris",
            "city_Seoul",
            "gender_F",
            "gender_M",
            "v_follower",
            "v_playtime",
            "v_view_count",
            "v_like_count",
            "v_comment_count",
            "m_view_count",
            "m_like_count",
            "m_dislike_count",
            "m_comment_count",
            "t_follower",
            "t_follower_2",
            "t_like_count",
            "t_retweet_count",
            "t_comment_count",
        ];
        assert_eq!(out.table.columns(), expected.as_slice());
    }

    #[test]
    fn test_unmatched_artist_dropped_and_counted() {
        let mut inputs = inputs();
        inputs.artists = artists(&[("A", "F", 2015.0)]);

        let out = pipeline().run(&inputs).unwrap();

        assert_eq!(out.table.len(), 1);
        assert_eq!(
            out.report.dropped_concerts,
            vec![DroppedConcert {
                row: 1,
                artist: Some(ArtistId::new("B")),
            }]
        );
        assert_eq!(out.report.concerts_in, 2);
        assert_eq!(out.report.rows_out, 1);
    }

    #[test]
    fn test_parallel_matches_sequential_bytes() {
        let render = |parallel: bool| {
            let out = pipeline()
                .with_policy(MissingDataPolicy::Nan)
                .with_parallel(parallel)
                .run(&inputs())
                .unwrap();
            let mut bytes = Vec::new();
            out.table.write_to(&mut bytes).unwrap();
            bytes
        };

        let first = render(true);
        assert_eq!(first, render(true));
        assert_eq!(first, render(false));
    }

    #[test]
    fn test_frozen_vocabulary_reused() {
        let first = pipeline()
            .with_policy(MissingDataPolicy::Nan)
            .run(&inputs())
            .unwrap();

        let mut later = inputs();
        later.concerts = concerts(&[("A", "Africa", "Lagos", "2023-01-10", 2.0)]);
        let out = pipeline()
            .with_vocabulary(first.schema.clone())
            .run(&later)
            .unwrap();

        assert_eq!(out.schema, first.schema);
        assert_eq!(value(&out.table, 0, "continent_Asia"), 0.0);
        assert_eq!(value(&out.table, 0, "continent_Europe"), 0.0);
        assert!(out.table.column_index("continent_Africa").is_none());
    }

    #[test]
    fn test_clashing_artist_column_suffixed() {
        let mut inputs = inputs();
        inputs.artists = Table::new(
            vec!["artist_id".into(), "gender".into(), "city".into()],
            vec![
                vec![text("A"), text("F"), text("Busan")],
                vec![text("B"), text("M"), text("Tokyo")],
            ],
        );
        let mut config = Config::default();
        config.columns.concert_categorical = vec!["continent".to_string()];
        let out = FeatureJoinPipeline::from_config(&config)
            .with_policy(MissingDataPolicy::Nan)
            .run(&inputs)
            .unwrap();

        assert_eq!(out.table.cell(0, "city_artist"), Some(&text("Busan")));
        assert_eq!(out.table.cell(0, "city"), Some(&text("Paris")));
    }

    #[test]
    fn test_aggregate_values_match_direct_window() {
        let inputs = inputs();
        let spec = &SourceSpec::defaults()[0];
        let agg = WindowAggregator::new(&inputs.activity[0], spec).unwrap();
        let result = agg.aggregate(
            &ArtistId::new("A"),
            parse_timestamp("2023-01-10").unwrap(),
        );
        assert_eq!(result.get("v_comment_count"), Some(AggregateValue::Value(3.0)));
    }
}
