//! Loading of the five source tables

use std::path::{Path, PathBuf};

use crate::data::activity::ActivityLog;
use crate::data::table::{ColumnHints, Table};
use crate::features::sources::SourceSpec;
use crate::{ColumnConfig, Config, Result};

/// Everything the pipeline reads, loaded once and shared read-only
#[derive(Debug, Clone)]
pub struct SourceTables {
    pub concerts: Table,
    pub artists: Table,
    /// One log per source spec, in spec order
    pub activity: Vec<ActivityLog>,
}

impl SourceTables {
    /// Load every file named in the config from its data directory
    pub fn load(config: &Config) -> Result<Self> {
        Self::load_from(Path::new(&config.data.data_dir), config)
    }

    pub fn load_from(data_dir: &Path, config: &Config) -> Result<Self> {
        let columns = &config.columns;
        let path = |file: &str| -> PathBuf { data_dir.join(file) };

        let concerts = Table::read_csv(
            &path(config.data.concert_file.as_str()),
            &ColumnHints {
                text: text_columns(columns, &columns.concert_categorical),
                dates: vec![columns.closing_date.as_str()],
            },
        )?;
        concerts.require_column(&columns.artist_id, &config.data.concert_file)?;
        concerts.require_column(&columns.closing_date, &config.data.concert_file)?;
        log::info!("Loaded {} concerts", concerts.len());

        let artists = Table::read_csv(
            &path(config.data.artist_file.as_str()),
            &ColumnHints {
                text: text_columns(columns, &columns.artist_categorical),
                dates: Vec::new(),
            },
        )?;
        artists.require_column(&columns.artist_id, &config.data.artist_file)?;
        log::info!("Loaded {} artists", artists.len());

        let activity = config
            .sources
            .iter()
            .map(|spec| load_activity(&path(spec.file.as_str()), spec, columns))
            .collect::<Result<Vec<_>>>()?;

        Ok(SourceTables {
            concerts,
            artists,
            activity,
        })
    }
}

fn text_columns<'a>(columns: &'a ColumnConfig, categorical: &'a [String]) -> Vec<&'a str> {
    std::iter::once(columns.artist_id.as_str())
        .chain(categorical.iter().map(String::as_str))
        .collect()
}

fn load_activity(path: &Path, spec: &SourceSpec, columns: &ColumnConfig) -> Result<ActivityLog> {
    let table = Table::read_csv(
        path,
        &ColumnHints {
            text: vec![columns.artist_id.as_str()],
            dates: vec![columns.upload_date.as_str()],
        },
    )?;
    ActivityLog::from_table(
        spec.source,
        &table,
        &columns.artist_id,
        &columns.upload_date,
        &spec.fields(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ConcertError;
    use std::fs;

    #[test]
    fn test_missing_file_is_schema_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = SourceTables::load_from(dir.path(), &Config::default()).unwrap_err();
        match err {
            ConcertError::Schema { file, .. } => assert!(file.ends_with("concert_list.csv")),
            other => panic!("unexpected error: {}", other),
        }
    }

    #[test]
    fn test_missing_closing_date_column_is_schema_error() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(
            dir.path().join("concert_list.csv"),
            "artist_id,continent,city,target_label\nA,Asia,Seoul,1\n",
        )
        .unwrap();
        let err = SourceTables::load_from(dir.path(), &Config::default()).unwrap_err();
        assert!(err.to_string().contains("closing_date"));
    }
}
