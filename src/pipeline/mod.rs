//! Pipeline orchestration.
//!
//! Sequences watermark reconciliation, extraction, transformation, and
//! loading for one run. The watermark read completes and the extraction
//! date list is fixed before any extraction begins, and the updated
//! watermark is persisted exactly once, after all other writes succeeded.

use std::sync::Arc;
use std::time::Duration;

use chrono::{NaiveDate, Utc};
use snafu::prelude::*;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::error::{
    ExtractSnafu, LoadSnafu, PipelineError, StorageSnafu, TransformSnafu, WatermarkSnafu,
};
use crate::sink::Loader;
use crate::source::Extractor;
use crate::storage::{StorageProvider, StorageProviderRef};
use crate::transform::daily_report;
use crate::watermark::{reconcile, Watermark};

/// Outcome of one pipeline run, for logging and tests.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunSummary {
    /// Source dates the run extracted (including any prior-day seed).
    pub extraction_dates: Vec<NaiveDate>,
    /// Raw rows read across all source objects.
    pub rows_extracted: usize,
    /// Report rows written.
    pub report_rows: usize,
    /// Key of the written report, if one was written.
    pub report_key: Option<String>,
}

impl RunSummary {
    fn nothing_to_do() -> Self {
        Self {
            extraction_dates: Vec::new(),
            rows_extracted: 0,
            report_rows: 0,
            report_key: None,
        }
    }
}

/// The daily report pipeline.
pub struct Pipeline {
    config: Config,
    target_storage: StorageProviderRef,
    extractor: Extractor,
    loader: Loader,
}

impl Pipeline {
    /// Build a pipeline and its storage providers from configuration.
    pub async fn from_config(config: Config) -> Result<Self, PipelineError> {
        let timeout = Duration::from_secs(config.storage_timeout_secs);
        let source_storage = Arc::new(
            StorageProvider::for_url_with_options(
                &config.source.url,
                &config.source.storage_options,
                timeout,
            )
            .await
            .context(StorageSnafu)?,
        );
        let target_storage = Arc::new(
            StorageProvider::for_url_with_options(
                &config.target.url,
                &config.target.storage_options,
                timeout,
            )
            .await
            .context(StorageSnafu)?,
        );
        debug!(
            source = %source_storage.url(),
            target = %target_storage.url(),
            "Built storage providers"
        );
        Ok(Self::new(config, source_storage, target_storage))
    }

    /// Build a pipeline over existing storage providers (used by tests
    /// with the in-memory backend).
    pub fn new(
        config: Config,
        source_storage: StorageProviderRef,
        target_storage: StorageProviderRef,
    ) -> Self {
        let extractor = Extractor::new(
            source_storage,
            config.source.prefix_format.clone(),
            config.source.max_concurrent_reads,
        );
        let loader = Loader::new(target_storage.clone(), config.target.clone());
        Self {
            config,
            target_storage,
            extractor,
            loader,
        }
    }

    /// Read the persisted watermark; a missing meta object is a cold start.
    async fn read_watermark(&self) -> Result<Watermark, PipelineError> {
        let meta_key = &self.config.target.meta_key;
        match self.target_storage.read_csv(meta_key).await {
            Ok(frame) => Watermark::from_frame(&frame).context(WatermarkSnafu),
            Err(error) if error.is_not_found() => {
                info!(key = %meta_key, "No watermark object yet, cold start");
                Ok(Watermark::empty())
            }
            Err(error) => Err(error)
                .context(crate::error::WatermarkReadSnafu)
                .context(WatermarkSnafu),
        }
    }

    /// Execute one run as of the given date.
    pub async fn run(&self, today: NaiveDate) -> Result<RunSummary, PipelineError> {
        let mut watermark = self.read_watermark().await?;
        let window = reconcile(self.config.source.first_extract_date, today, &watermark);

        if window.is_empty() {
            info!(%today, "All dates already processed, nothing to do");
            return Ok(RunSummary::nothing_to_do());
        }

        info!(
            reference_date = %window.reference_date,
            dates = window.extraction_dates.len(),
            "Starting extraction"
        );

        let extraction = self
            .extractor
            .extract(&window.extraction_dates)
            .await
            .context(ExtractSnafu)?;
        let rows_extracted = extraction.frame.height();

        let mut report = daily_report(
            extraction.frame,
            window.reference_date,
            &self.config.source.columns,
        )
        .context(TransformSnafu)?;
        let report_rows = report.height();

        let report_key = if report_rows > 0 {
            let key = self
                .loader
                .write_report(&mut report, Utc::now())
                .await
                .context(LoadSnafu)?;
            Some(key)
        } else {
            info!("Report is empty, skipping report write");
            None
        };

        // Dates that produced no rows (exchange holidays) are still marked
        // processed, since there is nothing to retry. Dates with unreadable
        // objects are not: the next run must extract them again.
        let processed: Vec<NaiveDate> = window
            .extraction_dates
            .iter()
            .copied()
            .filter(|date| !extraction.failed_dates.contains(date))
            .collect();
        if !extraction.failed_dates.is_empty() {
            warn!(
                dates = extraction.failed_dates.len(),
                "Leaving dates with unreadable objects unprocessed for retry"
            );
        }
        watermark.merge(&processed, Utc::now());
        self.loader
            .write_watermark(&watermark)
            .await
            .context(LoadSnafu)?;

        info!(
            rows_extracted,
            report_rows,
            dates = window.extraction_dates.len(),
            "Run complete"
        );

        Ok(RunSummary {
            extraction_dates: window.extraction_dates,
            rows_extracted,
            report_rows,
            report_key,
        })
    }
}
