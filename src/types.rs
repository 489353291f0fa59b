//! Core types used throughout the collector
//!
//! Raw export rows, normalized rows, the daily settlement window and the
//! normalization result that callers serialize.

use chrono::{DateTime, Duration, NaiveDate, NaiveTime, SecondsFormat, Utc};
use serde::ser::SerializeMap;
use serde::{Deserialize, Serialize, Serializer};
use std::collections::BTreeMap;
use std::fmt;

use crate::normalizer::RowError;

/// Hour (UTC) at which daily up-or-down markets settle
pub const SETTLEMENT_HOUR_UTC: i64 = 16;

/// Outcome direction of a daily up-or-down market
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Direction {
    Up,
    Down,
}

impl Direction {
    /// Direction of a move from `open` to `close`. Flat counts as Down.
    pub fn from_move(open: f64, close: f64) -> Self {
        if close > open {
            Direction::Up
        } else {
            Direction::Down
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::Up => write!(f, "UP"),
            Direction::Down => write!(f, "DOWN"),
        }
    }
}

/// One exported observation: column name -> raw cell value, in column order
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RawPriceRow {
    fields: Vec<(String, String)>,
}

impl RawPriceRow {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert
    pub fn with(mut self, column: impl Into<String>, value: impl Into<String>) -> Self {
        self.insert(column, value);
        self
    }

    /// Set a column, replacing the value in place if the column already exists
    pub fn insert(&mut self, column: impl Into<String>, value: impl Into<String>) {
        let column = column.into();
        let value = value.into();
        match self.fields.iter_mut().find(|(name, _)| *name == column) {
            Some(slot) => slot.1 = value,
            None => self.fields.push((column, value)),
        }
    }

    pub fn get(&self, column: &str) -> Option<&str> {
        self.fields
            .iter()
            .find(|(name, _)| name == column)
            .map(|(_, value)| value.as_str())
    }

    pub fn contains(&self, column: &str) -> bool {
        self.fields.iter().any(|(name, _)| name == column)
    }

    pub fn columns(&self) -> impl Iterator<Item = &str> {
        self.fields.iter().map(|(name, _)| name.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.fields
            .iter()
            .map(|(name, value)| (name.as_str(), value.as_str()))
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for RawPriceRow {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut row = RawPriceRow::new();
        for (column, value) in iter {
            row.insert(column, value);
        }
        row
    }
}

/// A validated row inside the settlement window
#[derive(Debug, Clone, PartialEq)]
pub struct CanonicalPriceRow {
    /// Absolute time, UTC, millisecond precision
    pub instant: DateTime<Utc>,
    pub price: f64,
    /// Timestamp cell exactly as exported
    pub raw_timestamp: String,
    /// Remaining columns, in source order
    pub extra_fields: Vec<(String, String)>,
}

/// Keys of the fixed fields in a serialized row
const RESERVED_ROW_KEYS: [&str; 2] = ["instant", "price"];

impl CanonicalPriceRow {
    pub fn instant_iso(&self) -> String {
        self.instant.to_rfc3339_opts(SecondsFormat::Millis, true)
    }

    /// JSON keys for the extra columns. A column whose name clashes with a
    /// fixed field or an earlier key is prefixed with `raw_` until unique.
    pub fn extra_keys(&self) -> Vec<String> {
        let mut taken: Vec<String> = RESERVED_ROW_KEYS.iter().map(|k| k.to_string()).collect();
        let mut keys = Vec::with_capacity(self.extra_fields.len());
        for (column, _) in &self.extra_fields {
            let mut key = column.clone();
            while taken.contains(&key) {
                key = format!("raw_{}", key);
            }
            taken.push(key.clone());
            keys.push(key);
        }
        keys
    }
}

impl Serialize for CanonicalPriceRow {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(2 + self.extra_fields.len()))?;
        map.serialize_entry("instant", &self.instant_iso())?;
        map.serialize_entry("price", &self.price)?;
        for (key, (_, value)) in self.extra_keys().iter().zip(&self.extra_fields) {
            map.serialize_entry(key, value)?;
        }
        map.end()
    }
}

/// Half-open `[start, end)` interval over which one daily market settles
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SettlementWindow {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl SettlementWindow {
    /// `(D - 1) 16:00 UTC` to `D 16:00 UTC`.
    ///
    /// At the edges of the representable range the bounds saturate: for
    /// `NaiveDate::MIN` the start is `DateTime::<Utc>::MIN_UTC`.
    pub fn for_date(target_date: NaiveDate) -> Self {
        let midnight = target_date.and_time(NaiveTime::MIN).and_utc();
        let end = midnight
            .checked_add_signed(Duration::hours(SETTLEMENT_HOUR_UTC))
            .unwrap_or(DateTime::<Utc>::MAX_UTC);
        let start = end
            .checked_sub_signed(Duration::days(1))
            .unwrap_or(DateTime::<Utc>::MIN_UTC);
        Self { start, end }
    }

    pub fn contains(&self, instant: DateTime<Utc>) -> bool {
        self.start <= instant && instant < self.end
    }
}

impl fmt::Display for SettlementWindow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} to {} UTC",
            self.start.format("%Y-%m-%d %H:%M"),
            self.end.format("%Y-%m-%d %H:%M")
        )
    }
}

/// First and last instant seen in a set of rows
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeRange {
    pub first: DateTime<Utc>,
    pub last: DateTime<Utc>,
}

impl TimeRange {
    pub(crate) fn extend(range: &mut Option<TimeRange>, instant: DateTime<Utc>) {
        match range {
            Some(r) => {
                r.first = r.first.min(instant);
                r.last = r.last.max(instant);
            }
            None => {
                *range = Some(TimeRange {
                    first: instant,
                    last: instant,
                })
            }
        }
    }
}

/// A row dropped during normalization and why
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RowIssue {
    /// Zero-based position in the input
    pub row_index: usize,
    pub error: RowError,
}

/// Filtered series for one settlement window plus diagnostics
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NormalizationResult {
    pub target_date: NaiveDate,
    pub window: SettlementWindow,
    pub timestamp_column: Option<String>,
    pub price_column: Option<String>,
    pub original_row_count: usize,
    pub filtered_row_count: usize,
    pub coverage_ratio: f64,
    pub first_price: Option<f64>,
    pub last_price: Option<f64>,
    pub price_delta_percent: Option<f64>,
    pub price_parse_failures: usize,
    pub timestamp_parse_failures: usize,
    /// Parsed rows that fell outside the window
    pub outside_window: usize,
    pub observed_range: Option<TimeRange>,
    pub filtered_range: Option<TimeRange>,
    /// UTC hour -> number of parsed rows
    pub hour_distribution: BTreeMap<u32, usize>,
    pub row_issues: Vec<RowIssue>,
    pub rows: Vec<CanonicalPriceRow>,
}

impl NormalizationResult {
    pub fn empty(target_date: NaiveDate, window: SettlementWindow) -> Self {
        Self {
            target_date,
            window,
            timestamp_column: None,
            price_column: None,
            original_row_count: 0,
            filtered_row_count: 0,
            coverage_ratio: 0.0,
            first_price: None,
            last_price: None,
            price_delta_percent: None,
            price_parse_failures: 0,
            timestamp_parse_failures: 0,
            outside_window: 0,
            observed_range: None,
            filtered_range: None,
            hour_distribution: BTreeMap::new(),
            row_issues: Vec::new(),
            rows: Vec::new(),
        }
    }

    /// Rows dropped because they could not be parsed
    pub fn unparseable_rows(&self) -> usize {
        self.price_parse_failures + self.timestamp_parse_failures
    }

    pub fn summary(&self) -> NormalizationSummary {
        NormalizationSummary {
            target_date: self.target_date,
            window: self.window,
            timestamp_column: self.timestamp_column.clone(),
            price_column: self.price_column.clone(),
            original_row_count: self.original_row_count,
            filtered_row_count: self.filtered_row_count,
            coverage_ratio: self.coverage_ratio,
            first_price: self.first_price,
            last_price: self.last_price,
            price_delta_percent: self.price_delta_percent,
            price_parse_failures: self.price_parse_failures,
            timestamp_parse_failures: self.timestamp_parse_failures,
            outside_window: self.outside_window,
            observed_range: self.observed_range,
            filtered_range: self.filtered_range,
        }
    }
}

/// Row-free view of a [`NormalizationResult`] for reports and metadata
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NormalizationSummary {
    pub target_date: NaiveDate,
    pub window: SettlementWindow,
    pub timestamp_column: Option<String>,
    pub price_column: Option<String>,
    pub original_row_count: usize,
    pub filtered_row_count: usize,
    pub coverage_ratio: f64,
    pub first_price: Option<f64>,
    pub last_price: Option<f64>,
    pub price_delta_percent: Option<f64>,
    pub price_parse_failures: usize,
    pub timestamp_parse_failures: usize,
    pub outside_window: usize,
    pub observed_range: Option<TimeRange>,
    pub filtered_range: Option<TimeRange>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn raw_row_insert_replaces_existing_column_in_place() {
        let mut row = RawPriceRow::new().with("a", "1").with("b", "2");
        row.insert("a", "3");

        assert_eq!(row.get("a"), Some("3"));
        assert_eq!(row.columns().collect::<Vec<_>>(), vec!["a", "b"]);
    }

    #[test]
    fn window_display_uses_utc_boundaries() {
        let date = NaiveDate::from_ymd_opt(2025, 7, 29).unwrap();
        let window = SettlementWindow::for_date(date);
        assert_eq!(
            window.to_string(),
            "2025-07-28 16:00 to 2025-07-29 16:00 UTC"
        );
    }

    #[test]
    fn canonical_row_serializes_instant_price_then_extras() {
        let row = CanonicalPriceRow {
            instant: DateTime::from_timestamp_millis(1_753_718_400_000).unwrap(),
            price: 0.535,
            raw_timestamp: "1753718400".to_string(),
            extra_fields: vec![("Volume".to_string(), "12".to_string())],
        };

        let json = serde_json::to_string(&row).unwrap();
        assert_eq!(
            json,
            r#"{"instant":"2025-07-28T16:00:00.000Z","price":0.535,"Volume":"12"}"#
        );
    }

    #[test]
    fn canonical_row_keeps_numeric_price_when_extra_column_clashes() {
        let row = CanonicalPriceRow {
            instant: DateTime::from_timestamp_millis(1_753_722_000_000).unwrap(),
            price: 0.61,
            raw_timestamp: "2025-07-28 17:00".to_string(),
            extra_fields: vec![
                ("price".to_string(), "n/a".to_string()),
                ("raw_price".to_string(), "x".to_string()),
                ("instant".to_string(), "later".to_string()),
            ],
        };

        let json = serde_json::to_string(&row).unwrap();
        assert_eq!(
            json,
            r#"{"instant":"2025-07-28T17:00:00.000Z","price":0.61,"raw_price":"n/a","raw_raw_price":"x","raw_instant":"later"}"#
        );
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert!(value["price"].is_number());
    }

    #[test]
    fn window_at_date_extremes_does_not_overflow() {
        let min = SettlementWindow::for_date(NaiveDate::MIN);
        assert_eq!(min.start, DateTime::<Utc>::MIN_UTC);
        assert!(min.start < min.end);

        let max = SettlementWindow::for_date(NaiveDate::MAX);
        assert_eq!(max.end - max.start, Duration::days(1));
    }

    #[test]
    fn direction_from_flat_move_is_down() {
        assert_eq!(Direction::from_move(100.0, 100.0), Direction::Down);
        assert_eq!(Direction::from_move(100.0, 100.5), Direction::Up);
    }
}
