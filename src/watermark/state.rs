//! Persisted watermark state.
//!
//! The watermark is a small table recording every calendar date that has
//! been successfully processed, with the timestamp of that processing. It
//! is read once at the start of a run and written back exactly once as a
//! whole-object replace at the end.

use std::collections::BTreeMap;

use chrono::{DateTime, NaiveDate, Utc};
use polars::prelude::*;
use snafu::prelude::*;
use tracing::debug;

use crate::error::{
    InvalidDateSnafu, InvalidTimestampSnafu, MissingColumnSnafu, WatermarkError,
    WrongColumnTypeSnafu,
};

/// Required column holding the processed calendar date (ISO date string).
pub const SOURCE_DATE_COL: &str = "source_date";
/// Required column holding the processing timestamp (RFC 3339 string).
pub const PROCESSED_AT_COL: &str = "processed_at";

/// Date format of `source_date` values.
pub const DATE_FORMAT: &str = "%Y-%m-%d";

/// In-memory watermark: one entry per processed source date.
///
/// Entries are keyed by date, so re-processing a date replaces its entry
/// rather than duplicating it. Coverage only ever grows across runs.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Watermark {
    entries: BTreeMap<NaiveDate, DateTime<Utc>>,
}

impl Watermark {
    /// An empty watermark (cold start).
    pub fn empty() -> Self {
        Self::default()
    }

    /// Parse a watermark from its persisted table.
    ///
    /// Fails fast on a missing column, a non-string column, or any
    /// unparseable value, before extraction work starts.
    pub fn from_frame(df: &DataFrame) -> Result<Self, WatermarkError> {
        let dates = string_column(df, SOURCE_DATE_COL)?;
        let timestamps = string_column(df, PROCESSED_AT_COL)?;

        let mut entries = BTreeMap::new();
        for (date, ts) in dates.into_iter().zip(timestamps) {
            let date = date.context(InvalidDateSnafu { value: "<null>" })?;
            let ts = ts.context(InvalidTimestampSnafu { value: "<null>" })?;

            let date = NaiveDate::parse_from_str(date, DATE_FORMAT)
                .ok()
                .context(InvalidDateSnafu { value: date })?;
            let ts = DateTime::parse_from_rfc3339(ts)
                .ok()
                .context(InvalidTimestampSnafu { value: ts })?
                .with_timezone(&Utc);

            entries.insert(date, ts);
        }

        debug!(entries = entries.len(), "Parsed watermark");
        Ok(Self { entries })
    }

    /// Render the watermark as its persisted table.
    pub fn to_frame(&self) -> PolarsResult<DataFrame> {
        let dates: Vec<String> = self
            .entries
            .keys()
            .map(|d| d.format(DATE_FORMAT).to_string())
            .collect();
        let timestamps: Vec<String> = self.entries.values().map(|ts| ts.to_rfc3339()).collect();

        df!(
            SOURCE_DATE_COL => dates,
            PROCESSED_AT_COL => timestamps,
        )
    }

    /// Merge newly processed dates, replacing existing entries.
    pub fn merge(&mut self, dates: &[NaiveDate], processed_at: DateTime<Utc>) {
        for date in dates {
            self.entries.insert(*date, processed_at);
        }
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn contains(&self, date: NaiveDate) -> bool {
        self.entries.contains_key(&date)
    }

    /// Earliest processed date, if any.
    pub fn min_date(&self) -> Option<NaiveDate> {
        self.entries.keys().next().copied()
    }

    /// Processed dates in ascending order.
    pub fn dates(&self) -> impl Iterator<Item = NaiveDate> + '_ {
        self.entries.keys().copied()
    }

    /// Processing timestamp recorded for a date.
    pub fn processed_at(&self, date: NaiveDate) -> Option<DateTime<Utc>> {
        self.entries.get(&date).copied()
    }
}

fn string_column<'a>(
    df: &'a DataFrame,
    name: &str,
) -> Result<&'a StringChunked, WatermarkError> {
    let column = df
        .column(name)
        .ok()
        .context(MissingColumnSnafu { column: name })?;
    column
        .str()
        .ok()
        .context(WrongColumnTypeSnafu { column: name })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn d(s: &str) -> NaiveDate {
        s.parse().unwrap()
    }

    #[test]
    fn test_roundtrip_through_frame() {
        let mut wm = Watermark::empty();
        let ts = Utc::now();
        wm.merge(&[d("2022-01-05"), d("2022-01-04")], ts);

        let df = wm.to_frame().unwrap();
        let restored = Watermark::from_frame(&df).unwrap();

        assert_eq!(restored.len(), 2);
        // Dates come back ascending regardless of merge order.
        let dates: Vec<_> = restored.dates().collect();
        assert_eq!(dates, vec![d("2022-01-04"), d("2022-01-05")]);
    }

    #[test]
    fn test_merge_replaces_existing_entry() {
        let mut wm = Watermark::empty();
        let first = Utc::now();
        wm.merge(&[d("2022-01-04")], first);
        let second = first + chrono::Duration::hours(1);
        wm.merge(&[d("2022-01-04"), d("2022-01-05")], second);

        assert_eq!(wm.len(), 2);
        assert_eq!(wm.processed_at(d("2022-01-04")), Some(second));
    }

    #[test]
    fn test_missing_column_rejected() {
        let df = df!("source_date" => ["2022-01-04"]).unwrap();
        let err = Watermark::from_frame(&df).unwrap_err();
        assert!(matches!(err, WatermarkError::MissingColumn { .. }));
    }

    #[test]
    fn test_unparseable_date_rejected() {
        let df = df!(
            "source_date" => ["04.01.2022"],
            "processed_at" => ["2022-01-05T09:00:00+00:00"],
        )
        .unwrap();
        let err = Watermark::from_frame(&df).unwrap_err();
        assert!(matches!(err, WatermarkError::InvalidDate { .. }));
    }

    #[test]
    fn test_unparseable_timestamp_rejected() {
        let df = df!(
            "source_date" => ["2022-01-04"],
            "processed_at" => ["yesterday"],
        )
        .unwrap();
        let err = Watermark::from_frame(&df).unwrap_err();
        assert!(matches!(err, WatermarkError::InvalidTimestamp { .. }));
    }

    #[test]
    fn test_non_string_column_rejected() {
        let df = df!(
            "source_date" => [20220104i64],
            "processed_at" => ["2022-01-05T09:00:00+00:00"],
        )
        .unwrap();
        let err = Watermark::from_frame(&df).unwrap_err();
        assert!(matches!(err, WatermarkError::WrongColumnType { .. }));
    }

    #[test]
    fn test_min_date() {
        let mut wm = Watermark::empty();
        assert_eq!(wm.min_date(), None);
        wm.merge(&[d("2022-01-06"), d("2022-01-04")], Utc::now());
        assert_eq!(wm.min_date(), Some(d("2022-01-04")));
    }
}
