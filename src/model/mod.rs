//! Regression model consumed by training

pub mod artifacts;
pub mod regressor;

pub use artifacts::ModelArtifacts;
pub use regressor::{Regressor, RegressorConfig};
