//! Concert outcome prediction from artist activity
//!
//! Joins concert, artist and activity datasets into one feature row per
//! concert, then trains a small regression network on the result.

pub mod data;
pub mod features;
pub mod model;
pub mod training;

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

use features::sources::SourceSpec;
use features::MissingDataPolicy;

/// Artist identifier as it appears in every source table
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ArtistId(pub String);

impl ArtistId {
    pub fn new(id: impl Into<String>) -> Self {
        ArtistId(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ArtistId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Activity stream an aggregate is computed from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActivitySource {
    VideoPlatform,
    MusicVideo,
    SocialMedia,
}

impl fmt::Display for ActivitySource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ActivitySource::VideoPlatform => write!(f, "video-platform"),
            ActivitySource::MusicVideo => write!(f, "music-video"),
            ActivitySource::SocialMedia => write!(f, "social-media"),
        }
    }
}

/// Application-wide errors
#[derive(Debug, Error)]
pub enum ConcertError {
    #[error("Schema error in {file}: {message}")]
    Schema { file: String, message: String },

    #[error(
        "Missing data at row {row} (artist {artist}, {activity}): `{metric}` needs record #{} after the cutoff, only {available} qualify",
        .position + 1
    )]
    MissingData {
        row: usize,
        artist: ArtistId,
        activity: ActivitySource,
        metric: String,
        position: usize,
        available: usize,
    },

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Training error: {0}")]
    Training(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Parse error: {0}")]
    Parse(String),
}

impl ConcertError {
    pub fn schema(file: impl Into<String>, message: impl Into<String>) -> Self {
        ConcertError::Schema {
            file: file.into(),
            message: message.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, ConcertError>;

/// Application configuration loaded from config.toml
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub data: DataConfig,
    pub columns: ColumnConfig,
    pub pipeline: PipelineConfig,
    pub sources: Vec<SourceSpec>,
    pub training: TrainingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DataConfig {
    pub data_dir: String,
    pub concert_file: String,
    pub artist_file: String,
    pub output_path: String,
    pub vocabulary_path: String,
    pub model_path: String,
}

/// Names of the columns the pipeline relies on
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ColumnConfig {
    pub artist_id: String,
    pub closing_date: String,
    pub upload_date: String,
    pub label: String,
    /// Encoded on the concert table before the artist merge
    pub concert_categorical: Vec<String>,
    /// Encoded after the artist merge
    pub artist_categorical: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    pub missing_data: MissingDataPolicy,
    pub parallel: bool,
    pub save: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrainingConfig {
    pub epochs: usize,
    pub batch_size: usize,
    pub learning_rate: f64,
    pub weight_decay: f64,
    pub dropout: f64,
    pub hidden_dim: usize,
    /// Training stops once the epoch's train loss drops below this
    pub target_loss: f64,
    pub train_ratio: f32,
    pub val_ratio: f32,
    pub seed: u64,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            data: DataConfig {
                data_dir: "data".to_string(),
                concert_file: "concert_list.csv".to_string(),
                artist_file: "artist_list.csv".to_string(),
                output_path: "preprocessed_data.csv".to_string(),
                vocabulary_path: "vocabulary.json".to_string(),
                model_path: "model/concert_regressor".to_string(),
            },
            columns: ColumnConfig {
                artist_id: "artist_id".to_string(),
                closing_date: "closing_date".to_string(),
                upload_date: "upload_date".to_string(),
                label: "target_label".to_string(),
                concert_categorical: vec!["continent".to_string(), "city".to_string()],
                artist_categorical: vec!["gender".to_string()],
            },
            pipeline: PipelineConfig {
                missing_data: MissingDataPolicy::Abort,
                parallel: true,
                save: true,
            },
            sources: SourceSpec::defaults(),
            training: TrainingConfig {
                epochs: 1000,
                batch_size: 32,
                learning_rate: 1e-3,
                weight_decay: 1e-3,
                dropout: 0.2,
                hidden_dim: 16,
                target_loss: 0.1,
                train_ratio: 0.70,
                val_ratio: 0.15,
                seed: 42,
            },
        }
    }
}

impl Config {
    pub fn load(path: &str) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            ConcertError::Config(format!("Failed to read config file {}: {}", path, e))
        })?;
        let config: Config = toml::from_str(&content)
            .map_err(|e| ConcertError::Config(format!("Failed to parse config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    pub fn save(&self, path: &str) -> Result<()> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| ConcertError::Config(format!("Failed to serialize config: {}", e)))?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Reject configurations the pipeline cannot run with
    pub fn validate(&self) -> Result<()> {
        let columns = &self.columns;
        let mut reserved = vec![
            columns.artist_id.as_str(),
            columns.closing_date.as_str(),
            columns.label.as_str(),
        ];
        reserved.extend(columns.concert_categorical.iter().map(String::as_str));
        reserved.extend(columns.artist_categorical.iter().map(String::as_str));
        features::sources::validate_outputs(&self.sources, &reserved)?;
        let training = &self.training;
        for (name, ratio) in [
            ("train_ratio", training.train_ratio),
            ("val_ratio", training.val_ratio),
        ] {
            if !(0.0..=1.0).contains(&ratio) {
                return Err(ConcertError::Config(format!(
                    "{} must be in [0, 1], got {}",
                    name, ratio
                )));
            }
        }
        let split = training.train_ratio + training.val_ratio;
        if split >= 1.0 {
            return Err(ConcertError::Config(format!(
                "train_ratio + val_ratio must be in [0, 1), got {}",
                split
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_roundtrips_through_toml() {
        let config = Config::default();
        let text = toml::to_string_pretty(&config).unwrap();
        let parsed: Config = toml::from_str(&text).unwrap();

        assert_eq!(parsed.sources.len(), 3);
        assert_eq!(parsed.columns.concert_categorical, vec!["continent", "city"]);
        assert_eq!(parsed.pipeline.missing_data, MissingDataPolicy::Abort);
        assert!(parsed.validate().is_ok());
    }

    #[test]
    fn test_out_of_range_split_ratios_rejected() {
        let mut config = Config::default();
        config.training.train_ratio = 1.2;
        config.training.val_ratio = -0.5;
        assert!(matches!(config.validate(), Err(ConcertError::Config(_))));

        config.training.train_ratio = 0.6;
        config.training.val_ratio = 0.4;
        assert!(config.validate().is_err());

        config.training.val_ratio = 0.2;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_output_column_shadowing_label_rejected() {
        let mut config = Config::default();
        config.sources[2].metrics[0].output = "target_label".to_string();
        assert!(matches!(config.validate(), Err(ConcertError::Config(_))));
    }

    #[test]
    fn test_missing_data_message_names_row_and_source() {
        let err = ConcertError::MissingData {
            row: 3,
            artist: ArtistId::new("B"),
            activity: ActivitySource::SocialMedia,
            metric: "t_follower_2".to_string(),
            position: 1,
            available: 1,
        };
        let msg = err.to_string();
        assert!(msg.contains("row 3"));
        assert!(msg.contains("artist B"));
        assert!(msg.contains("social-media"));
        assert!(msg.contains("record #2"));
    }
}
