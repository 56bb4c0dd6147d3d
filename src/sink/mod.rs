//! Report and watermark loading.
//!
//! Writes the aggregated report to the target location under a
//! timestamped key and persists the updated watermark as a single object
//! replace. Any write failure here is fatal to the run; the pipeline never
//! persists the watermark after a failed report write, which keeps retries
//! idempotent.

use chrono::{DateTime, Utc};
use polars::prelude::DataFrame;
use snafu::prelude::*;
use tracing::info;

use crate::config::{OutputFormat, TargetConfig};
use crate::error::{LoadError, TargetWriteSnafu};
use crate::storage::StorageProviderRef;
use crate::watermark::Watermark;

/// Writes run outputs to the target storage.
pub struct Loader {
    storage: StorageProviderRef,
    target: TargetConfig,
}

impl Loader {
    pub fn new(storage: StorageProviderRef, target: TargetConfig) -> Self {
        Self { storage, target }
    }

    /// Report key for a run timestamp.
    pub fn report_key(&self, run_ts: DateTime<Utc>) -> String {
        format!(
            "{}{}.{}",
            self.target.key_prefix,
            run_ts.format(&self.target.key_date_format),
            self.target.format.extension()
        )
    }

    /// Write the report table, returning the key it was written under.
    pub async fn write_report(
        &self,
        report: &mut DataFrame,
        run_ts: DateTime<Utc>,
    ) -> Result<String, LoadError> {
        let key = self.report_key(run_ts);
        self.storage
            .write_table(report, &key, self.target.format)
            .await
            .context(TargetWriteSnafu { key: key.clone() })?;

        info!(key = %key, rows = report.height(), "Wrote daily report");
        Ok(key)
    }

    /// Persist the watermark as one whole-object replace.
    pub async fn write_watermark(&self, watermark: &Watermark) -> Result<(), LoadError> {
        let key = self.target.meta_key.as_str();
        let mut frame = watermark
            .to_frame()
            .map_err(|source| crate::error::StorageError::TableEncode {
                key: key.to_string(),
                source,
            })
            .context(TargetWriteSnafu { key })?;

        self.storage
            .write_table(&mut frame, key, OutputFormat::Csv)
            .await
            .context(TargetWriteSnafu { key })?;

        info!(key = %key, entries = watermark.len(), "Persisted watermark");
        Ok(())
    }
}
