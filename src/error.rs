//! Error types for the squall report pipeline.

use std::path::PathBuf;

use snafu::prelude::*;

// ============ Storage Errors ============

/// Errors that can occur during storage operations.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum StorageError {
    /// Invalid storage URL format.
    #[snafu(display("Invalid storage URL: {url}"))]
    InvalidUrl { url: String },

    /// Invalid storage option for the selected backend.
    #[snafu(display("Invalid storage option for {url}: {source}"))]
    InvalidOption {
        url: String,
        source: object_store::Error,
    },

    /// Object store operation failed.
    #[snafu(display("Storage operation failed on {key}: {source}"))]
    ObjectStore {
        key: String,
        source: object_store::Error,
    },

    /// Storage operation exceeded the configured timeout.
    #[snafu(display("Storage {operation} on {key} timed out after {timeout_secs}s"))]
    Timeout {
        operation: &'static str,
        key: String,
        timeout_secs: u64,
    },

    /// Failed to decode an object as a CSV table.
    #[snafu(display("Failed to decode {key} as CSV: {source}"))]
    CsvDecode {
        key: String,
        source: polars::error::PolarsError,
    },

    /// Failed to serialize a table for writing.
    #[snafu(display("Failed to serialize table for {key}: {source}"))]
    TableEncode {
        key: String,
        source: polars::error::PolarsError,
    },

    /// IO error during storage operations.
    #[snafu(display("IO error: {source}"))]
    Io { source: std::io::Error },
}

impl StorageError {
    /// Check if this error represents a "not found" condition (404, NoSuchKey, etc.)
    pub fn is_not_found(&self) -> bool {
        match self {
            StorageError::ObjectStore { source, .. } => {
                matches!(source, object_store::Error::NotFound { .. })
            }
            _ => false,
        }
    }
}

// ============ Config Errors ============

/// Errors that can occur during configuration loading and validation.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum ConfigError {
    /// Failed to read the config file.
    #[snafu(display("Failed to read config file {}: {source}", path.display()))]
    ReadFile {
        path: PathBuf,
        source: std::io::Error,
    },

    /// Failed to parse YAML configuration.
    #[snafu(display("Failed to parse YAML configuration: {source}"))]
    YamlParse { source: serde_yaml::Error },

    /// Source URL is empty.
    #[snafu(display("Source URL cannot be empty"))]
    EmptySourceUrl,

    /// Target URL is empty.
    #[snafu(display("Target URL cannot be empty"))]
    EmptyTargetUrl,

    /// Meta key is empty.
    #[snafu(display("Watermark meta key cannot be empty"))]
    EmptyMetaKey,
}

// ============ Watermark Errors ============

/// Errors raised by the persisted watermark (meta file).
///
/// All variants are fatal and abort the run before any extraction work,
/// so a malformed meta file never silently truncates the date range.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum WatermarkError {
    /// The meta table is missing a required column.
    #[snafu(display("Watermark table missing required column {column}"))]
    MissingColumn { column: String },

    /// A required column has a non-string dtype.
    #[snafu(display("Watermark column {column} is not a string column"))]
    WrongColumnType { column: String },

    /// A source_date value could not be parsed as a calendar date.
    #[snafu(display("Unparseable source_date in watermark: {value:?}"))]
    InvalidDate { value: String },

    /// A processed_at value could not be parsed as a timestamp.
    #[snafu(display("Unparseable processed_at in watermark: {value:?}"))]
    InvalidTimestamp { value: String },

    /// Failed to read the watermark object.
    #[snafu(display("Failed to read watermark object: {source}"))]
    WatermarkRead { source: StorageError },
}

// ============ Extract Errors ============

/// Errors raised while extracting raw source objects.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum ExtractError {
    /// Listing a date prefix failed.
    #[snafu(display("Failed to list source objects: {source}"))]
    List { source: StorageError },

    /// Every source object for the run failed to read.
    ///
    /// Individual failures are skipped with a warning, but when nothing at
    /// all could be read the run must fail rather than report an empty day.
    #[snafu(display("All {attempted} source object(s) failed to read ({failed} failure(s))"))]
    AllSourcesFailed { attempted: usize, failed: usize },

    /// Concatenating the raw tables failed.
    #[snafu(display("Failed to concatenate raw tables: {source}"))]
    Concat { source: polars::error::PolarsError },
}

// ============ Transform Errors ============

/// Errors raised by the daily aggregation transform.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum TransformError {
    /// The aggregation plan failed to execute (e.g. a configured source
    /// column is absent from the raw table).
    #[snafu(display("Daily aggregation failed: {source}"))]
    Aggregate { source: polars::error::PolarsError },
}

// ============ Load Errors ============

/// Errors raised while writing the report or watermark to the target.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum LoadError {
    /// Writing an object to the target failed.
    #[snafu(display("Failed to write {key} to target: {source}"))]
    TargetWrite { key: String, source: StorageError },
}

// ============ Pipeline Errors ============

/// Top-level pipeline failure, one variant per stage.
///
/// Each stage surfaces as its own kind so an operator can tell "meta file
/// broken" from "source unreadable" from "target unavailable".
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum PipelineError {
    /// Building a storage provider failed.
    #[snafu(display("Storage setup failed: {source}"))]
    Storage { source: StorageError },

    /// The persisted watermark is unreadable or malformed.
    #[snafu(display("Watermark error: {source}"))]
    Watermark { source: WatermarkError },

    /// Raw source extraction failed.
    #[snafu(display("Extract failed: {source}"))]
    Extract { source: ExtractError },

    /// The aggregation transform failed.
    #[snafu(display("Transform failed: {source}"))]
    Transform { source: TransformError },

    /// Writing the report or watermark failed.
    #[snafu(display("Load failed: {source}"))]
    Load { source: LoadError },
}
