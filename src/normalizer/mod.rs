//! Settlement window normalizer
//!
//! Turns a raw price export into the series for one daily settlement window
//! (16:00 UTC the day before to 16:00 UTC on the target date).
//!
//! Everything here is pure: no I/O, no logging. Bad rows are dropped and
//! reported in the result; only a missing timestamp column fails the call.

mod error;
mod timestamp;

pub use error::{NormalizeError, RowError};
pub use timestamp::{parse_instant, EPOCH_MILLIS_THRESHOLD};

use chrono::{NaiveDate, Timelike};
use std::collections::BTreeMap;

use crate::types::{
    CanonicalPriceRow, NormalizationResult, RawPriceRow, RowIssue, SettlementWindow, TimeRange,
};

/// Timestamp column names probed in priority order
pub const DEFAULT_TIMESTAMP_COLUMNS: [&str; 5] =
    ["Date (UTC)", "Timestamp (UTC)", "timestamp", "date", "time"];

/// Filters raw export rows into a settlement window
#[derive(Debug, Clone)]
pub struct WindowNormalizer {
    candidate_columns: Vec<String>,
}

impl Default for WindowNormalizer {
    fn default() -> Self {
        Self::new()
    }
}

impl WindowNormalizer {
    pub fn new() -> Self {
        Self::with_candidates(DEFAULT_TIMESTAMP_COLUMNS)
    }

    /// Use a custom timestamp column priority list
    pub fn with_candidates<I, S>(candidates: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            candidate_columns: candidates.into_iter().map(Into::into).collect(),
        }
    }

    pub fn candidate_columns(&self) -> &[String] {
        &self.candidate_columns
    }

    /// Normalize `rows` into the settlement window of `target_date`.
    ///
    /// Output rows keep their input order. `first_price`/`last_price` are the
    /// first and last retained rows in that order, not the time extremes.
    pub fn normalize(
        &self,
        rows: &[RawPriceRow],
        target_date: NaiveDate,
    ) -> Result<NormalizationResult, NormalizeError> {
        let window = compute_window(target_date);
        if rows.is_empty() {
            return Ok(NormalizationResult::empty(target_date, window));
        }

        let timestamp_column = resolve_timestamp_column(rows, &self.candidate_columns)?;
        let price_column = resolve_price_column(&rows[0]);

        let mut retained = Vec::new();
        let mut row_issues = Vec::new();
        let mut price_parse_failures = 0;
        let mut timestamp_parse_failures = 0;
        let mut outside_window = 0;
        let mut observed_range = None;
        let mut filtered_range = None;
        let mut hour_distribution: BTreeMap<u32, usize> = BTreeMap::new();

        for (row_index, row) in rows.iter().enumerate() {
            let price = match parse_price(row, price_column.as_deref()) {
                Ok(price) => price,
                Err(error) => {
                    price_parse_failures += 1;
                    row_issues.push(RowIssue { row_index, error });
                    continue;
                }
            };

            let raw_timestamp = row.get(&timestamp_column).unwrap_or_default();
            let instant = match parse_instant(raw_timestamp, &timestamp_column) {
                Ok(instant) => instant,
                Err(error) => {
                    timestamp_parse_failures += 1;
                    row_issues.push(RowIssue { row_index, error });
                    continue;
                }
            };

            TimeRange::extend(&mut observed_range, instant);
            *hour_distribution.entry(instant.hour()).or_default() += 1;

            if !window.contains(instant) {
                outside_window += 1;
                continue;
            }

            TimeRange::extend(&mut filtered_range, instant);
            let extra_fields = row
                .iter()
                .filter(|(column, _)| {
                    *column != timestamp_column && Some(*column) != price_column.as_deref()
                })
                .map(|(column, value)| (column.to_string(), value.to_string()))
                .collect();

            retained.push(CanonicalPriceRow {
                instant,
                price,
                raw_timestamp: raw_timestamp.to_string(),
                extra_fields,
            });
        }

        let original_row_count = rows.len();
        let filtered_row_count = retained.len();
        let first_price = retained.first().map(|row| row.price);
        let last_price = retained.last().map(|row| row.price);

        Ok(NormalizationResult {
            target_date,
            window,
            timestamp_column: Some(timestamp_column),
            price_column,
            original_row_count,
            filtered_row_count,
            coverage_ratio: coverage_ratio(filtered_row_count, original_row_count),
            first_price,
            last_price,
            price_delta_percent: price_delta_percent(filtered_row_count, first_price, last_price),
            price_parse_failures,
            timestamp_parse_failures,
            outside_window,
            observed_range,
            filtered_range,
            hour_distribution,
            row_issues,
            rows: retained,
        })
    }
}

/// Settlement window for a target calendar date
pub fn compute_window(target_date: NaiveDate) -> SettlementWindow {
    SettlementWindow::for_date(target_date)
}

/// First candidate present as a column of the first row.
///
/// Never falls back to an arbitrary column: a wrong guess would silently
/// corrupt every downstream instant.
pub fn resolve_timestamp_column<S: AsRef<str>>(
    rows: &[RawPriceRow],
    candidates: &[S],
) -> Result<String, NormalizeError> {
    let first = rows.first();
    candidates
        .iter()
        .map(|candidate| candidate.as_ref())
        .find(|candidate| first.is_some_and(|row| row.contains(candidate)))
        .map(str::to_string)
        .ok_or_else(|| NormalizeError::ColumnNotFound {
            candidates: candidates.iter().map(|c| c.as_ref().to_string()).collect(),
            available: first
                .map(|row| row.columns().map(str::to_string).collect())
                .unwrap_or_default(),
        })
}

/// First column whose name contains "price" (case-insensitive)
pub fn resolve_price_column(row: &RawPriceRow) -> Option<String> {
    row.columns()
        .find(|column| column.to_ascii_lowercase().contains("price"))
        .map(str::to_string)
}

/// Parse the price cell of a row. Empty, non-numeric and non-finite values fail.
pub fn parse_price(row: &RawPriceRow, price_column: Option<&str>) -> Result<f64, RowError> {
    let raw = price_column.and_then(|column| row.get(column));
    raw.map(str::trim)
        .and_then(|value| value.parse::<f64>().ok())
        .filter(|price| price.is_finite())
        .ok_or_else(|| RowError::PriceParse {
            raw_value: raw.map(str::to_string),
            column: price_column.map(str::to_string),
        })
}

fn coverage_ratio(filtered: usize, original: usize) -> f64 {
    if original == 0 {
        0.0
    } else {
        filtered as f64 / original as f64
    }
}

fn price_delta_percent(filtered: usize, first: Option<f64>, last: Option<f64>) -> Option<f64> {
    match (first, last) {
        (Some(first), Some(last)) if filtered >= 2 && first != 0.0 => {
            Some((last - first) / first * 100.0)
        }
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn row(ts: &str, price: &str) -> RawPriceRow {
        RawPriceRow::new().with("Date (UTC)", ts).with("Price", price)
    }

    #[test]
    fn resolve_prefers_earlier_candidates() {
        let rows = vec![RawPriceRow::new()
            .with("timestamp", "1722000000")
            .with("Date (UTC)", "2024-07-26 13:20")];

        let column = resolve_timestamp_column(&rows, &DEFAULT_TIMESTAMP_COLUMNS).unwrap();
        assert_eq!(column, "Date (UTC)");
    }

    #[test]
    fn resolve_reports_candidates_and_available_columns() {
        let rows = vec![RawPriceRow::new().with("when", "x").with("Price", "0.5")];

        let err = resolve_timestamp_column(&rows, &["Date (UTC)", "time"]).unwrap_err();
        assert_eq!(
            err,
            NormalizeError::ColumnNotFound {
                candidates: vec!["Date (UTC)".to_string(), "time".to_string()],
                available: vec!["when".to_string(), "Price".to_string()],
            }
        );
    }

    #[test]
    fn price_column_match_is_case_insensitive() {
        let row = RawPriceRow::new()
            .with("Date (UTC)", "x")
            .with("Up Share PRICE", "0.5")
            .with("price", "0.4");
        assert_eq!(resolve_price_column(&row).as_deref(), Some("Up Share PRICE"));
    }

    #[test]
    fn parse_price_rejects_blank_and_non_finite() {
        for raw in ["", "  ", "abc", "NaN", "inf"] {
            let r = row("2025-07-28 17:00", raw);
            assert!(parse_price(&r, Some("Price")).is_err(), "accepted {:?}", raw);
        }
        let r = row("2025-07-28 17:00", " 0.535 ");
        assert_eq!(parse_price(&r, Some("Price")).unwrap(), 0.535);
    }

    #[test]
    fn missing_price_column_drops_every_row() {
        let rows = vec![RawPriceRow::new().with("timestamp", "1753722000")];
        let result = WindowNormalizer::new().normalize(&rows, date(2025, 7, 29)).unwrap();

        assert_eq!(result.original_row_count, 1);
        assert_eq!(result.price_parse_failures, 1);
        assert!(result.price_column.is_none());
        assert!(result.rows.is_empty());
    }

    #[test]
    fn extra_fields_exclude_timestamp_and_price_columns() {
        let rows = vec![RawPriceRow::new()
            .with("Date (UTC)", "07-28-2025 18:00")
            .with("Timestamp (UTC)", "1753725600")
            .with("Price", "0.61")];
        let result = WindowNormalizer::new().normalize(&rows, date(2025, 7, 29)).unwrap();

        assert_eq!(result.filtered_row_count, 1);
        assert_eq!(
            result.rows[0].extra_fields,
            vec![("Timestamp (UTC)".to_string(), "1753725600".to_string())]
        );
        assert_eq!(result.rows[0].raw_timestamp, "07-28-2025 18:00");
    }

    #[test]
    fn diagnostics_split_drops_by_cause() {
        let rows = vec![
            row("2025-07-28 17:00", "0.50"),
            row("2025-07-28 18:00", "n/a"),
            row("not a date", "0.52"),
            row("2025-07-29 16:00", "0.53"),
            row("2025-07-27 09:00", "0.49"),
        ];
        let result = WindowNormalizer::new().normalize(&rows, date(2025, 7, 29)).unwrap();

        assert_eq!(result.original_row_count, 5);
        assert_eq!(result.filtered_row_count, 1);
        assert_eq!(result.price_parse_failures, 1);
        assert_eq!(result.timestamp_parse_failures, 1);
        assert_eq!(result.outside_window, 2);
        assert_eq!(result.unparseable_rows(), 2);
        assert_eq!(
            result.row_issues.iter().map(|i| i.row_index).collect::<Vec<_>>(),
            vec![1, 2]
        );
        assert_eq!(result.hour_distribution.get(&16), Some(&1));
        assert_eq!(result.hour_distribution.get(&9), Some(&1));
        assert_eq!(result.coverage_ratio, 0.2);
    }

    #[test]
    fn ranges_track_time_extremes_not_input_order() {
        let rows = vec![
            row("2025-07-29 10:00", "0.50"),
            row("2025-07-28 20:00", "0.75"),
            row("2025-07-30 01:00", "0.90"),
        ];
        let result = WindowNormalizer::new().normalize(&rows, date(2025, 7, 29)).unwrap();

        let filtered = result.filtered_range.unwrap();
        assert_eq!(filtered.first.to_rfc3339(), "2025-07-28T20:00:00+00:00");
        assert_eq!(filtered.last.to_rfc3339(), "2025-07-29T10:00:00+00:00");
        let observed = result.observed_range.unwrap();
        assert_eq!(observed.last.to_rfc3339(), "2025-07-30T01:00:00+00:00");

        // First/last price follow input order
        assert_eq!(result.first_price, Some(0.50));
        assert_eq!(result.last_price, Some(0.75));
        assert_eq!(result.price_delta_percent, Some(50.0));
    }

    #[test]
    fn custom_candidates_are_honoured() {
        let rows = vec![RawPriceRow::new()
            .with("observed_at", "2025-07-28T17:00:00Z")
            .with("price", "0.5")];
        let normalizer = WindowNormalizer::with_candidates(["observed_at"]);
        let result = normalizer.normalize(&rows, date(2025, 7, 29)).unwrap();

        assert_eq!(result.timestamp_column.as_deref(), Some("observed_at"));
        assert_eq!(result.filtered_row_count, 1);
    }
}
