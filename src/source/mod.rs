//! Raw source extraction.
//!
//! Fans out over the reconciled date list, reading every object under each
//! date's prefix and concatenating the rows into one raw table. No
//! filtering or aggregation happens here.

use std::collections::BTreeSet;

use chrono::NaiveDate;
use futures::{StreamExt, stream};
use polars::prelude::*;
use snafu::prelude::*;
use tracing::{debug, warn};

use crate::error::{AllSourcesFailedSnafu, ConcatSnafu, ExtractError, ListSnafu};
use crate::storage::StorageProviderRef;

/// Raw rows read in one pass, plus the dates that could not be fully read.
#[derive(Debug)]
pub struct Extraction {
    /// All rows read across the requested dates.
    pub frame: DataFrame,
    /// Dates with at least one unreadable object, ascending. Their rows may
    /// be incomplete, so they must not be marked processed.
    pub failed_dates: Vec<NaiveDate>,
}

/// Reads raw per-minute objects for a set of source dates.
pub struct Extractor {
    storage: StorageProviderRef,
    prefix_format: String,
    max_concurrent: usize,
}

impl Extractor {
    pub fn new(storage: StorageProviderRef, prefix_format: String, max_concurrent: usize) -> Self {
        Self {
            storage,
            prefix_format,
            max_concurrent: max_concurrent.max(1),
        }
    }

    /// Extract all raw rows for the given dates into one table.
    ///
    /// A date with no objects (an exchange holiday) contributes nothing and
    /// is not an error. An object that fails to read is skipped with a
    /// warning and its date is reported back as failed so the caller can
    /// leave it unprocessed; only when every object fails does the whole
    /// extraction fail, since "nothing readable" must not masquerade as an
    /// empty day.
    pub async fn extract(&self, dates: &[NaiveDate]) -> Result<Extraction, ExtractError> {
        let mut keys = Vec::new();
        for date in dates {
            let prefix = date.format(&self.prefix_format).to_string();
            let listed = self.storage.list(&prefix).await.context(ListSnafu)?;
            debug!(date = %date, prefix = %prefix, objects = listed.len(), "Listed source date");
            keys.extend(listed.into_iter().map(|key| (*date, key)));
        }

        if keys.is_empty() {
            debug!(dates = dates.len(), "No source objects for any requested date");
            return Ok(Extraction {
                frame: DataFrame::empty(),
                failed_dates: Vec::new(),
            });
        }

        let attempted = keys.len();
        let results: Vec<(NaiveDate, String, Result<DataFrame, crate::error::StorageError>)> =
            stream::iter(keys)
                .map(|(date, key)| {
                    let storage = self.storage.clone();
                    async move {
                        let result = storage.read_csv(&key).await;
                        (date, key, result)
                    }
                })
                .buffered(self.max_concurrent)
                .collect()
                .await;

        let mut frames = Vec::with_capacity(attempted);
        let mut failed_dates = BTreeSet::new();
        let mut failed = 0usize;
        for (date, key, result) in results {
            match result {
                Ok(df) => frames.push(df.lazy()),
                Err(error) => {
                    failed += 1;
                    failed_dates.insert(date);
                    warn!(key = %key, %error, "Skipping unreadable source object");
                }
            }
        }

        ensure!(!frames.is_empty(), AllSourcesFailedSnafu { attempted, failed });

        // Diagonal concat tolerates extra columns that vary across files;
        // the transform projects them away.
        let raw = concat_lf_diagonal(
            frames,
            UnionArgs {
                to_supertypes: true,
                ..Default::default()
            },
        )
        .context(ConcatSnafu)?
        .collect()
        .context(ConcatSnafu)?;

        debug!(rows = raw.height(), failed, "Extracted raw table");
        Ok(Extraction {
            frame: raw,
            failed_dates: failed_dates.into_iter().collect(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::OutputFormat;
    use crate::storage::StorageProvider;
    use std::sync::Arc;
    use std::time::Duration;

    fn d(s: &str) -> NaiveDate {
        s.parse().unwrap()
    }

    fn in_memory() -> StorageProviderRef {
        Arc::new(StorageProvider::in_memory(Duration::from_secs(5)))
    }

    async fn put_csv(storage: &StorageProviderRef, key: &str, mut df: DataFrame) {
        storage
            .write_table(&mut df, key, OutputFormat::Csv)
            .await
            .unwrap();
    }

    fn sample_frame(isin: &str, date: &str) -> DataFrame {
        df!(
            "ISIN" => [isin, isin],
            "Date" => [date, date],
            "Time" => ["08:00", "12:00"],
            "StartPrice" => [10.0, 11.0],
            "MinPrice" => [9.5, 10.5],
            "MaxPrice" => [10.5, 11.5],
            "TradedVolume" => [100i64, 200i64],
        )
        .unwrap()
    }

    #[tokio::test]
    async fn test_extract_concatenates_all_dates() {
        let storage = in_memory();
        put_csv(&storage, "2022-01-04/a.csv", sample_frame("AT0001", "2022-01-04")).await;
        put_csv(&storage, "2022-01-04/b.csv", sample_frame("AT0002", "2022-01-04")).await;
        put_csv(&storage, "2022-01-05/a.csv", sample_frame("AT0001", "2022-01-05")).await;

        let extractor = Extractor::new(storage, "%Y-%m-%d".to_string(), 2);
        let extraction = extractor
            .extract(&[d("2022-01-04"), d("2022-01-05")])
            .await
            .unwrap();

        assert_eq!(extraction.frame.height(), 6);
        assert!(extraction.failed_dates.is_empty());
    }

    #[tokio::test]
    async fn test_extract_missing_date_is_empty_not_error() {
        let storage = in_memory();
        let extractor = Extractor::new(storage, "%Y-%m-%d".to_string(), 2);
        let extraction = extractor.extract(&[d("2022-01-04")]).await.unwrap();
        assert_eq!(extraction.frame.height(), 0);
        assert!(extraction.failed_dates.is_empty());
    }

    #[tokio::test]
    async fn test_extract_skips_unreadable_object() {
        let storage = in_memory();
        put_csv(&storage, "2022-01-04/good.csv", sample_frame("AT0001", "2022-01-04")).await;
        // A zero-length object cannot be parsed as a CSV table.
        storage
            .put_bytes("2022-01-04/zz_corrupt.csv", bytes::Bytes::new())
            .await
            .unwrap();

        let extractor = Extractor::new(storage, "%Y-%m-%d".to_string(), 2);
        let extraction = extractor.extract(&[d("2022-01-04")]).await.unwrap();

        // The corrupt object is skipped; the readable one survives, but
        // the date is flagged as incompletely read.
        assert_eq!(extraction.frame.height(), 2);
        assert_eq!(extraction.failed_dates, vec![d("2022-01-04")]);
    }

    #[tokio::test]
    async fn test_date_with_only_unreadable_objects_is_reported() {
        let storage = in_memory();
        put_csv(&storage, "2022-01-04/trades.csv", sample_frame("AT0001", "2022-01-04")).await;
        storage
            .put_bytes("2022-01-05/trades.csv", bytes::Bytes::new())
            .await
            .unwrap();

        let extractor = Extractor::new(storage, "%Y-%m-%d".to_string(), 2);
        let extraction = extractor
            .extract(&[d("2022-01-04"), d("2022-01-05")])
            .await
            .unwrap();

        // Day 1 is fine, day 2 must come back failed so it can be retried.
        assert_eq!(extraction.frame.height(), 2);
        assert_eq!(extraction.failed_dates, vec![d("2022-01-05")]);
    }

    #[tokio::test]
    async fn test_all_sources_failed_is_fatal() {
        let storage = in_memory();
        storage
            .put_bytes("2022-01-04/a.csv", bytes::Bytes::new())
            .await
            .unwrap();
        storage
            .put_bytes("2022-01-05/b.csv", bytes::Bytes::new())
            .await
            .unwrap();

        let extractor = Extractor::new(storage, "%Y-%m-%d".to_string(), 2);
        let err = extractor
            .extract(&[d("2022-01-04"), d("2022-01-05")])
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            ExtractError::AllSourcesFailed {
                attempted: 2,
                failed: 2
            }
        ));
    }
}
