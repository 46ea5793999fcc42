//! Model training
//!
//! Training loop and metrics tracking for the concert regressor.

pub mod metrics;
pub mod trainer;

pub use metrics::{Metrics, TrainingHistory};
pub use trainer::{evaluate_matrix, load_trained, RegressorTrainer, TrainingOutcome};
