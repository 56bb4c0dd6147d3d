//! Configuration for the squall report pipeline.

use std::collections::HashMap;
use std::path::Path;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use snafu::prelude::*;

use crate::error::{
    ConfigError, EmptyMetaKeySnafu, EmptySourceUrlSnafu, EmptyTargetUrlSnafu, ReadFileSnafu,
    YamlParseSnafu,
};

/// Output format for the report object.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    #[default]
    Csv,
    Parquet,
}

impl OutputFormat {
    /// File extension for report keys.
    pub fn extension(&self) -> &'static str {
        match self {
            OutputFormat::Csv => "csv",
            OutputFormat::Parquet => "parquet",
        }
    }
}

/// Column names of the raw per-minute source feed.
///
/// The feed publishes arbitrary extra columns; only the ones named here are
/// projected into the transform. Defaults match the Xetra daily files.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceColumns {
    #[serde(default = "default_col_instrument")]
    pub instrument: String,
    #[serde(default = "default_col_date")]
    pub date: String,
    #[serde(default = "default_col_time")]
    pub time: String,
    #[serde(default = "default_col_start_price")]
    pub start_price: String,
    #[serde(default = "default_col_min_price")]
    pub min_price: String,
    #[serde(default = "default_col_max_price")]
    pub max_price: String,
    #[serde(default = "default_col_traded_volume")]
    pub traded_volume: String,
}

fn default_col_instrument() -> String {
    "ISIN".to_string()
}

fn default_col_date() -> String {
    "Date".to_string()
}

fn default_col_time() -> String {
    "Time".to_string()
}

fn default_col_start_price() -> String {
    "StartPrice".to_string()
}

fn default_col_min_price() -> String {
    "MinPrice".to_string()
}

fn default_col_max_price() -> String {
    "MaxPrice".to_string()
}

fn default_col_traded_volume() -> String {
    "TradedVolume".to_string()
}

impl Default for SourceColumns {
    fn default() -> Self {
        Self {
            instrument: default_col_instrument(),
            date: default_col_date(),
            time: default_col_time(),
            start_price: default_col_start_price(),
            min_price: default_col_min_price(),
            max_price: default_col_max_price(),
            traded_volume: default_col_traded_volume(),
        }
    }
}

/// Configuration for the raw source bucket.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceConfig {
    /// Source storage URL (supports `s3://`, `file://`, `memory://`).
    pub url: String,
    /// First calendar date the source should ever be extracted for.
    pub first_extract_date: NaiveDate,
    /// strftime-style template mapping a date to its object prefix.
    #[serde(default = "default_prefix_format")]
    pub prefix_format: String,
    /// Column names of the raw feed.
    #[serde(default)]
    pub columns: SourceColumns,
    /// Maximum concurrent object reads.
    #[serde(default = "default_max_concurrent_reads")]
    pub max_concurrent_reads: usize,
    /// Storage options for the source backend (credentials, region, etc.)
    #[serde(default)]
    pub storage_options: HashMap<String, String>,
}

fn default_prefix_format() -> String {
    "%Y-%m-%d".to_string()
}

fn default_max_concurrent_reads() -> usize {
    4
}

/// Configuration for the report target bucket.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TargetConfig {
    /// Target storage URL (supports `s3://`, `file://`, `memory://`).
    pub url: String,
    /// Prefix of the report key; the run timestamp is appended.
    #[serde(default = "default_key_prefix")]
    pub key_prefix: String,
    /// strftime-style format of the run timestamp in the report key.
    #[serde(default = "default_key_date_format")]
    pub key_date_format: String,
    /// Output format of the report object.
    #[serde(default)]
    pub format: OutputFormat,
    /// Key of the watermark meta object, relative to the target URL.
    #[serde(default = "default_meta_key")]
    pub meta_key: String,
    /// Storage options for the target backend.
    #[serde(default)]
    pub storage_options: HashMap<String, String>,
}

fn default_key_prefix() -> String {
    "daily_report_".to_string()
}

fn default_key_date_format() -> String {
    "%Y%m%d_%H%M%S".to_string()
}

fn default_meta_key() -> String {
    "meta/processed_dates.csv".to_string()
}

/// Top-level pipeline configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub source: SourceConfig,
    pub target: TargetConfig,
    /// Timeout applied to every individual storage call.
    #[serde(default = "default_storage_timeout_secs")]
    pub storage_timeout_secs: u64,
}

fn default_storage_timeout_secs() -> u64 {
    30
}

impl Config {
    /// Load and validate a config from a YAML file.
    pub fn from_path(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path).context(ReadFileSnafu { path })?;
        let config: Config = serde_yaml::from_str(&contents).context(YamlParseSnafu)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        ensure!(!self.source.url.trim().is_empty(), EmptySourceUrlSnafu);
        ensure!(!self.target.url.trim().is_empty(), EmptyTargetUrlSnafu);
        ensure!(!self.target.meta_key.trim().is_empty(), EmptyMetaKeySnafu);
        Ok(())
    }
}
