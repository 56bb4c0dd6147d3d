//! Squall: daily batch ETL for per-minute trading records.
//!
//! This crate handles:
//! - Reconciling which calendar dates still need extraction against a
//!   persisted watermark (meta file) in object storage
//! - Reading raw per-minute CSV objects for those dates (S3, local, memory)
//! - Aggregating them into one daily OHLC report row per instrument
//! - Writing the report and the updated watermark back to the target

pub mod config;
pub mod error;
pub mod pipeline;
pub mod sink;
pub mod source;
pub mod storage;
pub mod trace;
pub mod transform;
pub mod watermark;

// Re-export commonly used items
pub use config::{Config, OutputFormat, SourceColumns};
pub use error::PipelineError;
pub use pipeline::{Pipeline, RunSummary};
pub use storage::{StorageProvider, StorageProviderRef};
pub use trace::init_tracing;
pub use watermark::{DateWindow, Watermark, reconcile};
