//! Object storage abstraction.
//!
//! Provides a narrow list / read-table / write-table surface over S3, the
//! local filesystem, and an in-memory backend for tests. Every call is
//! bounded by a configured timeout; a timed-out operation surfaces as a
//! [`StorageError::Timeout`], never as a silent empty result.

use std::collections::HashMap;
use std::io::Cursor;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use futures::TryStreamExt;
use object_store::aws::AmazonS3Builder;
use object_store::local::LocalFileSystem;
use object_store::memory::InMemory;
use object_store::path::Path;
use object_store::prefix::PrefixStore;
use object_store::{ObjectStore, PutPayload};
use polars::prelude::*;
use snafu::prelude::*;
use tracing::debug;

use crate::config::OutputFormat;
use crate::error::{
    CsvDecodeSnafu, InvalidOptionSnafu, InvalidUrlSnafu, IoSnafu, ObjectStoreSnafu, StorageError,
    TableEncodeSnafu, TimeoutSnafu,
};

/// A reference-counted storage provider.
pub type StorageProviderRef = Arc<StorageProvider>;

/// Storage provider that abstracts over different storage backends.
#[derive(Clone)]
pub struct StorageProvider {
    object_store: Arc<dyn ObjectStore>,
    canonical_url: String,
    op_timeout: Duration,
}

impl std::fmt::Debug for StorageProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "StorageProvider<{}>", self.canonical_url)
    }
}

impl StorageProvider {
    /// Create a storage provider for the given URL.
    ///
    /// Supported URL forms:
    /// - `s3://bucket/prefix` (options applied to the S3 builder)
    /// - `file:///path` or a plain absolute path
    /// - `memory://` (ephemeral, for tests)
    pub async fn for_url_with_options(
        url: &str,
        options: &HashMap<String, String>,
        op_timeout: Duration,
    ) -> Result<Self, StorageError> {
        if let Some(rest) = url.strip_prefix("s3://").or_else(|| url.strip_prefix("s3a://")) {
            let (bucket, prefix) = match rest.split_once('/') {
                Some((bucket, prefix)) => (bucket, Some(prefix.trim_end_matches('/'))),
                None => (rest, None),
            };
            ensure!(!bucket.is_empty(), InvalidUrlSnafu { url });

            let mut builder = AmazonS3Builder::from_env().with_bucket_name(bucket);
            for (key, value) in options {
                builder = builder.with_config(
                    key.parse().context(InvalidOptionSnafu { url })?,
                    value.clone(),
                );
            }
            let store = builder.build().context(InvalidOptionSnafu { url })?;

            let object_store: Arc<dyn ObjectStore> = match prefix {
                Some(p) if !p.is_empty() => Arc::new(PrefixStore::new(store, Path::from(p))),
                _ => Arc::new(store),
            };

            Ok(Self {
                object_store,
                canonical_url: url.to_string(),
                op_timeout,
            })
        } else if url == "memory://" {
            Ok(Self::in_memory(op_timeout))
        } else if let Some(path) = url.strip_prefix("file://").or_else(|| {
            if url.starts_with('/') {
                Some(url)
            } else {
                None
            }
        }) {
            tokio::fs::create_dir_all(path).await.context(IoSnafu)?;
            let object_store: Arc<dyn ObjectStore> =
                Arc::new(LocalFileSystem::new_with_prefix(path).context(ObjectStoreSnafu {
                    key: path.to_string(),
                })?);
            Ok(Self {
                object_store,
                canonical_url: format!("file://{path}"),
                op_timeout,
            })
        } else {
            InvalidUrlSnafu { url }.fail()
        }
    }

    /// Create an ephemeral in-memory provider.
    ///
    /// Used as the storage fake in tests; clones share the same store.
    pub fn in_memory(op_timeout: Duration) -> Self {
        Self {
            object_store: Arc::new(InMemory::new()),
            canonical_url: "memory://".to_string(),
            op_timeout,
        }
    }

    /// The canonical URL this provider was built from.
    pub fn url(&self) -> &str {
        &self.canonical_url
    }

    async fn bounded<T, F>(
        &self,
        operation: &'static str,
        key: &str,
        fut: F,
    ) -> Result<T, StorageError>
    where
        F: std::future::Future<Output = Result<T, StorageError>>,
    {
        tokio::time::timeout(self.op_timeout, fut)
            .await
            .ok()
            .context(TimeoutSnafu {
                operation,
                key,
                timeout_secs: self.op_timeout.as_secs(),
            })?
    }

    /// List all object keys under a prefix, sorted lexicographically.
    ///
    /// A non-existent prefix yields an empty list, not an error.
    pub async fn list(&self, prefix: &str) -> Result<Vec<String>, StorageError> {
        let path = Path::from(prefix);
        let listing = self.object_store.list(Some(&path));
        let mut keys: Vec<String> = self
            .bounded("list", prefix, async {
                listing
                    .map_ok(|meta| meta.location.to_string())
                    .try_collect()
                    .await
                    .context(ObjectStoreSnafu { key: prefix })
            })
            .await?;
        keys.sort();

        debug!(url = %self.canonical_url, prefix = %prefix, count = keys.len(), "Listed objects");
        Ok(keys)
    }

    /// Write raw bytes to an object, replacing it atomically.
    pub async fn put_bytes(&self, key: &str, bytes: Bytes) -> Result<(), StorageError> {
        let path = Path::from(key);
        let payload = PutPayload::from(bytes);
        self.bounded("write", key, async {
            self.object_store
                .put(&path, payload)
                .await
                .map(|_| ())
                .context(ObjectStoreSnafu { key })
        })
        .await
    }

    /// Read an object as raw bytes.
    pub async fn read_bytes(&self, key: &str) -> Result<Bytes, StorageError> {
        let path = Path::from(key);
        self.bounded("read", key, async {
            let result = self
                .object_store
                .get(&path)
                .await
                .context(ObjectStoreSnafu { key })?;
            result.bytes().await.context(ObjectStoreSnafu { key })
        })
        .await
    }

    /// Read an object as a CSV table.
    pub async fn read_csv(&self, key: &str) -> Result<DataFrame, StorageError> {
        let bytes = self.read_bytes(key).await?;
        let df = CsvReadOptions::default()
            .with_has_header(true)
            .into_reader_with_file_handle(Cursor::new(bytes.to_vec()))
            .finish()
            .context(CsvDecodeSnafu { key })?;

        debug!(url = %self.canonical_url, key = %key, rows = df.height(), "Read CSV object");
        Ok(df)
    }

    /// Write a table to an object in the given format.
    ///
    /// The object is replaced atomically as a single put; there are no
    /// incremental appends.
    pub async fn write_table(
        &self,
        df: &mut DataFrame,
        key: &str,
        format: OutputFormat,
    ) -> Result<(), StorageError> {
        let mut buf = Vec::new();
        match format {
            OutputFormat::Csv => CsvWriter::new(&mut buf)
                .include_header(true)
                .finish(df)
                .context(TableEncodeSnafu { key })?,
            OutputFormat::Parquet => {
                ParquetWriter::new(&mut buf)
                    .finish(df)
                    .map(|_| ())
                    .context(TableEncodeSnafu { key })?;
            }
        }

        let path = Path::from(key);
        let payload = PutPayload::from(Bytes::from(buf));
        self.bounded("write", key, async {
            self.object_store
                .put(&path, payload)
                .await
                .map(|_| ())
                .context(ObjectStoreSnafu { key })
        })
        .await?;

        debug!(url = %self.canonical_url, key = %key, rows = df.height(), "Wrote table object");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn timeout() -> Duration {
        Duration::from_secs(5)
    }

    #[tokio::test]
    async fn test_list_unknown_prefix_is_empty() {
        let storage = StorageProvider::in_memory(timeout());
        let keys = storage.list("2022-01-04").await.unwrap();
        assert!(keys.is_empty());
    }

    #[tokio::test]
    async fn test_csv_write_read_roundtrip() {
        let storage = StorageProvider::in_memory(timeout());
        let mut df = df!(
            "ISIN" => ["AT0001", "AT0002"],
            "StartPrice" => [10.5, 11.0],
        )
        .unwrap();

        storage
            .write_table(&mut df, "reports/report.csv", OutputFormat::Csv)
            .await
            .unwrap();
        let restored = storage.read_csv("reports/report.csv").await.unwrap();

        assert_eq!(restored.shape(), (2, 2));
        assert_eq!(restored.get_column_names()[0].as_str(), "ISIN");
    }

    #[tokio::test]
    async fn test_read_missing_object_is_not_found() {
        let storage = StorageProvider::in_memory(timeout());
        let err = storage.read_csv("missing.csv").await.unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_list_sorted() {
        let storage = StorageProvider::in_memory(timeout());
        let mut df = df!("a" => [1i64]).unwrap();
        storage
            .write_table(&mut df, "2022-01-04/b.csv", OutputFormat::Csv)
            .await
            .unwrap();
        storage
            .write_table(&mut df, "2022-01-04/a.csv", OutputFormat::Csv)
            .await
            .unwrap();

        let keys = storage.list("2022-01-04").await.unwrap();
        assert_eq!(keys, vec!["2022-01-04/a.csv", "2022-01-04/b.csv"]);
    }

    #[tokio::test]
    async fn test_local_filesystem_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let url = format!("file://{}", dir.path().display());
        let storage = StorageProvider::for_url_with_options(&url, &HashMap::new(), timeout())
            .await
            .unwrap();

        let mut df = df!("ISIN" => ["AT0001"], "StartPrice" => [10.5]).unwrap();
        storage
            .write_table(&mut df, "2022-01-04/trades.csv", OutputFormat::Csv)
            .await
            .unwrap();

        let keys = storage.list("2022-01-04").await.unwrap();
        assert_eq!(keys, vec!["2022-01-04/trades.csv"]);
        let restored = storage.read_csv("2022-01-04/trades.csv").await.unwrap();
        assert_eq!(restored.height(), 1);
    }

    #[tokio::test]
    async fn test_invalid_url_rejected() {
        let err = StorageProvider::for_url_with_options("ftp://nope", &HashMap::new(), timeout())
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::InvalidUrl { .. }));
    }
}
