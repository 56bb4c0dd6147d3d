//! Watermark-driven date reconciliation.
//!
//! The watermark records every calendar date that has already been
//! processed. Reconciling it against the configured first extraction date
//! and "today" yields the set of dates a run still has to extract, plus an
//! optional prior-day seed so the transform can compute a change versus
//! the previous close for the earliest deliverable date.
//!
//! Running the reconciliation twice in a row (the second time against the
//! watermark updated by the first run) never re-returns a date the first
//! run already covered, which makes retries and restarts idempotent.

mod state;

pub use state::{DATE_FORMAT, PROCESSED_AT_COL, SOURCE_DATE_COL, Watermark};

use chrono::{Days, NaiveDate};
use tracing::debug;

/// The working window of one run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DateWindow {
    /// Earliest date whose report rows are deliverable. Any extracted rows
    /// before this date are scaffolding for the change computation and are
    /// dropped by the transform.
    pub reference_date: NaiveDate,
    /// Source dates to extract, ascending. Empty means nothing to do.
    pub extraction_dates: Vec<NaiveDate>,
}

impl DateWindow {
    /// Whether this window requires no work.
    pub fn is_empty(&self) -> bool {
        self.extraction_dates.is_empty()
    }
}

/// Compute the dates a run must extract.
///
/// - Empty watermark: the full inclusive range `[first_extract_date, today]`.
/// - Otherwise: the range `[max(first_extract_date, min(watermark)), today]`
///   minus the dates already covered, with the day immediately before the
///   earliest missing date prepended as a prior-close seed when that day is
///   itself covered by the watermark (only then does raw data for it
///   exist). When nothing is missing the window is empty, which is a valid
///   "nothing to do" outcome rather than an error.
pub fn reconcile(
    first_extract_date: NaiveDate,
    today: NaiveDate,
    watermark: &Watermark,
) -> DateWindow {
    if watermark.is_empty() {
        return DateWindow {
            reference_date: first_extract_date,
            extraction_dates: date_range(first_extract_date, today),
        };
    }

    // min_date is always present here; watermark is non-empty
    let min_date = watermark.min_date().unwrap_or(first_extract_date);
    let start = first_extract_date.max(min_date);

    let missing: Vec<NaiveDate> = date_range(start, today)
        .into_iter()
        .filter(|d| !watermark.contains(*d))
        .collect();

    let Some(&earliest_missing) = missing.first() else {
        debug!(%today, "Watermark covers the full range");
        return DateWindow {
            reference_date: today,
            extraction_dates: Vec::new(),
        };
    };

    let seed = earliest_missing - Days::new(1);
    let mut extraction_dates = Vec::with_capacity(missing.len() + 1);
    if watermark.contains(seed) {
        extraction_dates.push(seed);
    }
    extraction_dates.extend(missing);

    debug!(
        reference_date = %earliest_missing,
        dates = extraction_dates.len(),
        "Reconciled extraction window"
    );

    DateWindow {
        reference_date: earliest_missing,
        extraction_dates,
    }
}

/// Inclusive ascending calendar-date range; empty when `end < start`.
fn date_range(start: NaiveDate, end: NaiveDate) -> Vec<NaiveDate> {
    let mut dates = Vec::new();
    let mut current = start;
    while current <= end {
        dates.push(current);
        current = current + Days::new(1);
    }
    dates
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn d(s: &str) -> NaiveDate {
        s.parse().unwrap()
    }

    fn watermark_with(dates: &[NaiveDate]) -> Watermark {
        let mut wm = Watermark::empty();
        wm.merge(dates, Utc::now());
        wm
    }

    #[test]
    fn test_empty_watermark_returns_full_range() {
        let window = reconcile(d("2022-01-04"), d("2022-01-07"), &Watermark::empty());
        assert_eq!(window.reference_date, d("2022-01-04"));
        assert_eq!(
            window.extraction_dates,
            vec![d("2022-01-04"), d("2022-01-05"), d("2022-01-06"), d("2022-01-07")]
        );
    }

    #[test]
    fn test_fully_covered_range_is_nothing_to_do() {
        let today = d("2022-01-07");
        let wm = watermark_with(&date_range(d("2022-01-04"), today));
        let window = reconcile(d("2022-01-04"), today, &wm);
        assert!(window.is_empty());
        assert_eq!(window.reference_date, today);
    }

    #[test]
    fn test_covered_until_yesterday_reintroduces_seed() {
        // Watermark covers [first, today-1]: only today is missing, and
        // today-1 comes back as the prior-close seed.
        let today = d("2022-01-07");
        let wm = watermark_with(&date_range(d("2022-01-04"), d("2022-01-06")));
        let window = reconcile(d("2022-01-04"), today, &wm);
        assert_eq!(window.reference_date, today);
        assert_eq!(window.extraction_dates, vec![d("2022-01-06"), today]);
    }

    #[test]
    fn test_no_seed_when_prior_day_unprocessed() {
        // Only dates before the configured first date were ever processed,
        // so the earliest missing date has no processed predecessor: the
        // window starts at the missing date itself, without a seed.
        let wm = watermark_with(&[d("2022-01-02")]);
        let window = reconcile(d("2022-01-04"), d("2022-01-05"), &wm);
        assert_eq!(window.reference_date, d("2022-01-04"));
        assert_eq!(window.extraction_dates, vec![d("2022-01-04"), d("2022-01-05")]);
    }

    #[test]
    fn test_gap_in_coverage_seeded_from_day_before_gap() {
        // Processed: 04, 05, 07. Missing: 06, 08 (today). Seed = 05.
        let wm = watermark_with(&[d("2022-01-04"), d("2022-01-05"), d("2022-01-07")]);
        let window = reconcile(d("2022-01-04"), d("2022-01-08"), &wm);
        assert_eq!(window.reference_date, d("2022-01-06"));
        assert_eq!(
            window.extraction_dates,
            vec![d("2022-01-05"), d("2022-01-06"), d("2022-01-08")]
        );
    }

    #[test]
    fn test_first_extract_date_caps_range_start() {
        // Watermark reaches further back than the configured first date;
        // dates before first_extract_date are never revisited.
        let wm = watermark_with(&[d("2021-12-30"), d("2022-01-04")]);
        let window = reconcile(d("2022-01-04"), d("2022-01-05"), &wm);
        assert_eq!(window.reference_date, d("2022-01-05"));
        assert_eq!(window.extraction_dates, vec![d("2022-01-04"), d("2022-01-05")]);
    }

    #[test]
    fn test_reconcile_is_idempotent_across_runs() {
        let first = d("2022-01-04");
        let today = d("2022-01-08");
        let mut wm = watermark_with(&[d("2022-01-04"), d("2022-01-06")]);

        let window1 = reconcile(first, today, &wm);
        wm.merge(&window1.extraction_dates, Utc::now());
        let window2 = reconcile(first, today, &wm);

        // The second pass must not re-return any date that was missing in
        // the first pass (the seed is already covered, so re-listing it
        // in a later window would be a duplicate extraction).
        let newly_missing1: Vec<_> = window1
            .extraction_dates
            .iter()
            .filter(|date| **date >= window1.reference_date)
            .collect();
        for date in &window2.extraction_dates {
            assert!(!newly_missing1.contains(&date));
        }
        assert!(window2.is_empty());
    }

    #[test]
    fn test_today_before_first_extract_date() {
        let window = reconcile(d("2022-01-04"), d("2022-01-01"), &Watermark::empty());
        assert!(window.is_empty());
        assert_eq!(window.reference_date, d("2022-01-04"));
    }

    #[test]
    fn test_date_range_single_day() {
        assert_eq!(date_range(d("2022-01-04"), d("2022-01-04")), vec![d("2022-01-04")]);
    }
}
