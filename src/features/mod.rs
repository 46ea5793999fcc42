//! Feature extraction and encoding
//!
//! Turns the raw source tables into the model-ready feature table.

pub mod encoding;
pub mod pipeline;
pub mod sources;
pub mod window;

pub use encoding::{CategoricalEncoder, FeatureSchema, Vocabulary};
pub use pipeline::{FeatureJoinPipeline, MissingDataPolicy, PipelineOutput, PipelineReport};
pub use sources::{AggregateKind, MetricSpec, SourceSpec};
pub use window::{AggregateResult, AggregateValue, WindowAggregator};
