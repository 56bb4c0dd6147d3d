//! Daily aggregation transform.
//!
//! Turns the raw per-minute table into one report row per instrument per
//! date: OHLC-style prices, summed volume, and the percentage change of
//! the closing price versus the previous trading date in the window.

use chrono::NaiveDate;
use polars::prelude::*;
use snafu::prelude::*;
use tracing::{debug, info};

use crate::config::SourceColumns;
use crate::error::{AggregateSnafu, TransformError};
use crate::watermark::DATE_FORMAT;

/// Report column: instrument identifier.
pub const INSTRUMENT_ID: &str = "instrument_id";
/// Report column: trading date (ISO date string).
pub const DATE: &str = "date";
/// Report column: start price of the earliest trade of the day.
pub const OPENING_PRICE: &str = "opening_price";
/// Report column: start price of the latest trade of the day.
pub const CLOSING_PRICE: &str = "closing_price";
/// Report column: lowest price of the day.
pub const MINIMUM_PRICE: &str = "minimum_price";
/// Report column: highest price of the day.
pub const MAXIMUM_PRICE: &str = "maximum_price";
/// Report column: total traded volume of the day.
pub const DAILY_TRADED_VOLUME: &str = "daily_traded_volume";
/// Report column: closing price change vs the previous close, in percent.
/// Null when no previous close exists in the window or it is zero.
pub const CHANGE_PCT_VS_PREV_CLOSING: &str = "change_pct_vs_prev_closing";

const TIME: &str = "time";
const START_PRICE: &str = "start_price";

/// Aggregate raw per-minute rows into the daily report table.
///
/// Rows dated before `reference_date` are extracted only to anchor the
/// change computation and are dropped from the output. An empty raw table
/// yields an empty report, not an error.
pub fn daily_report(
    raw: DataFrame,
    reference_date: NaiveDate,
    columns: &SourceColumns,
) -> Result<DataFrame, TransformError> {
    if raw.height() == 0 {
        info!("Raw table is empty, producing empty report");
        return Ok(empty_report());
    }

    let sort_by_time = SortMultipleOptions::default();
    let prev_close = col(CLOSING_PRICE).shift(lit(1));
    let reference = reference_date.format(DATE_FORMAT).to_string();

    let report = raw
        .lazy()
        // Project to the configured source columns; everything else the
        // feed publishes is dropped here.
        .select([
            col(columns.instrument.as_str()).alias(INSTRUMENT_ID),
            col(columns.date.as_str()).alias(DATE),
            col(columns.time.as_str()).alias(TIME),
            col(columns.start_price.as_str()).alias(START_PRICE),
            col(columns.min_price.as_str()).alias(MINIMUM_PRICE),
            col(columns.max_price.as_str()).alias(MAXIMUM_PRICE),
            col(columns.traded_volume.as_str()).alias(DAILY_TRADED_VOLUME),
        ])
        .drop_nulls(None)
        .group_by([col(INSTRUMENT_ID), col(DATE)])
        .agg([
            col(START_PRICE)
                .sort_by([col(TIME)], sort_by_time.clone())
                .first()
                .alias(OPENING_PRICE),
            col(START_PRICE)
                .sort_by([col(TIME)], sort_by_time)
                .last()
                .alias(CLOSING_PRICE),
            col(MINIMUM_PRICE).min().alias(MINIMUM_PRICE),
            col(MAXIMUM_PRICE).max().alias(MAXIMUM_PRICE),
            col(DAILY_TRADED_VOLUME).sum().alias(DAILY_TRADED_VOLUME),
        ])
        .sort([INSTRUMENT_ID, DATE], SortMultipleOptions::default())
        .with_column(
            when(prev_close.clone().neq(lit(0.0)))
                .then(
                    ((col(CLOSING_PRICE) - prev_close.clone()) / prev_close * lit(100.0))
                        .round(2),
                )
                .otherwise(lit(NULL))
                .over([col(INSTRUMENT_ID)])
                .alias(CHANGE_PCT_VS_PREV_CLOSING),
        )
        // The seed date exists only to feed the previous-close anchor.
        .filter(col(DATE).gt_eq(lit(reference)))
        .select([
            col(INSTRUMENT_ID),
            col(DATE),
            col(OPENING_PRICE),
            col(CLOSING_PRICE),
            col(MINIMUM_PRICE),
            col(MAXIMUM_PRICE),
            col(DAILY_TRADED_VOLUME),
            col(CHANGE_PCT_VS_PREV_CLOSING),
        ])
        .collect()
        .context(AggregateSnafu)?;

    debug!(rows = report.height(), "Aggregated daily report");
    Ok(report)
}

fn empty_report() -> DataFrame {
    let schema = Schema::from_iter([
        Field::new(INSTRUMENT_ID.into(), DataType::String),
        Field::new(DATE.into(), DataType::String),
        Field::new(OPENING_PRICE.into(), DataType::Float64),
        Field::new(CLOSING_PRICE.into(), DataType::Float64),
        Field::new(MINIMUM_PRICE.into(), DataType::Float64),
        Field::new(MAXIMUM_PRICE.into(), DataType::Float64),
        Field::new(DAILY_TRADED_VOLUME.into(), DataType::Int64),
        Field::new(CHANGE_PCT_VS_PREV_CLOSING.into(), DataType::Float64),
    ]);
    DataFrame::empty_with_schema(&schema)
}
