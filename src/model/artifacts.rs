//! Everything besides the weights needed to reuse a trained model

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::data::dataset::FeatureNormalization;
use crate::model::RegressorConfig;
use crate::{ConcertError, Result};

/// Saved next to the weights as `<model_path>.json`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelArtifacts {
    pub config: RegressorConfig,
    pub normalization: FeatureNormalization,
    /// Feature columns, in the order the network expects them
    pub feature_names: Vec<String>,
}

impl ModelArtifacts {
    pub fn path_for(model_path: &str) -> PathBuf {
        PathBuf::from(format!("{}.json", model_path))
    }

    pub fn save(&self, model_path: &str) -> Result<()> {
        let json = serde_json::to_string_pretty(self)
            .map_err(|e| ConcertError::Parse(format!("Failed to serialize model artifacts: {}", e)))?;
        std::fs::write(Self::path_for(model_path), json)?;
        Ok(())
    }

    pub fn load(model_path: &str) -> Result<Self> {
        let path = Self::path_for(model_path);
        let json = std::fs::read_to_string(&path)?;
        serde_json::from_str(&json).map_err(|e| {
            ConcertError::Parse(format!("Invalid model artifacts {}: {}", path.display(), e))
        })
    }
}
