//! Data ingestion
//!
//! CSV tables, the five source datasets and the training dataset view.

pub mod activity;
pub mod dataset;
pub mod loader;
pub mod table;

pub use activity::{ActivityLog, ActivityRecord};
pub use dataset::ConcertDataset;
pub use loader::SourceTables;
pub use table::{Cell, Table};
