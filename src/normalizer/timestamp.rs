//! Timestamp cell parsing
//!
//! Exports carry either epoch numbers (seconds or milliseconds, no unit flag)
//! or date-time strings with or without an offset. Offset-less strings are
//! always read as UTC, never as the local zone of the machine.

use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};

use super::RowError;

/// Epoch magnitudes above this are milliseconds, at or below are seconds.
///
/// Any millisecond epoch after 2001-09 is larger; any second epoch before
/// the year 2286 is smaller. Revisit if exports ever span far outside that.
pub const EPOCH_MILLIS_THRESHOLD: f64 = 1e10;

/// Formats carrying an explicit UTC offset
const OFFSET_FORMATS: [&str; 4] = [
    "%Y-%m-%d %H:%M:%S%.f%:z",
    "%Y-%m-%d %H:%M:%S%.f%z",
    "%Y-%m-%dT%H:%M:%S%.f%z",
    "%Y-%m-%d %H:%M:%S%.f %z",
];

/// Offset-less date-time formats, read as UTC
const NAIVE_FORMATS: [&str; 8] = [
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M",
    "%Y-%m-%d %H:%M",
    "%m-%d-%Y %H:%M:%S",
    "%m-%d-%Y %H:%M",
    "%m/%d/%Y %H:%M:%S",
    "%m/%d/%Y %H:%M",
];

/// Date-only formats, read as midnight UTC
const DATE_FORMATS: [&str; 3] = ["%Y-%m-%d", "%m-%d-%Y", "%m/%d/%Y"];

/// Parse one timestamp cell into a UTC instant with millisecond precision.
///
/// Numeric values are read as epochs only when the column name contains
/// "timestamp"; every other value goes through the date-time string formats.
pub fn parse_instant(raw_value: &str, column: &str) -> Result<DateTime<Utc>, RowError> {
    let value = raw_value.trim();

    let parsed = if column.to_ascii_lowercase().contains("timestamp") {
        match value.parse::<f64>() {
            Ok(number) if number.is_finite() => from_epoch(number),
            _ => parse_datetime(value),
        }
    } else {
        parse_datetime(value)
    };

    parsed
        .and_then(|instant| DateTime::from_timestamp_millis(instant.timestamp_millis()))
        .ok_or_else(|| RowError::TimestampParse {
            raw_value: raw_value.to_string(),
            column: column.to_string(),
        })
}

fn from_epoch(number: f64) -> Option<DateTime<Utc>> {
    let millis = if number.abs() > EPOCH_MILLIS_THRESHOLD {
        number
    } else {
        number * 1000.0
    };
    DateTime::from_timestamp_millis(millis.round() as i64)
}

fn parse_datetime(value: &str) -> Option<DateTime<Utc>> {
    if value.is_empty() {
        return None;
    }

    if let Ok(dt) = DateTime::parse_from_rfc3339(value) {
        return Some(dt.with_timezone(&Utc));
    }
    for format in OFFSET_FORMATS {
        if let Ok(dt) = DateTime::parse_from_str(value, format) {
            return Some(dt.with_timezone(&Utc));
        }
    }

    // "2025-07-28 16:00 UTC" carries its zone as a word
    let value = strip_utc_suffix(value);
    for format in NAIVE_FORMATS {
        if let Ok(naive) = NaiveDateTime::parse_from_str(value, format) {
            return Some(naive.and_utc());
        }
    }
    for format in DATE_FORMATS {
        if let Ok(date) = NaiveDate::parse_from_str(value, format) {
            return Some(date.and_time(NaiveTime::MIN).and_utc());
        }
    }

    None
}

fn strip_utc_suffix(value: &str) -> &str {
    let len = value.len();
    if len > 4 && value.is_char_boundary(len - 4) && value[len - 4..].eq_ignore_ascii_case(" utc")
    {
        value[..len - 4].trim_end()
    } else {
        value
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn iso(dt: DateTime<Utc>) -> String {
        dt.to_rfc3339_opts(chrono::SecondsFormat::Millis, true)
    }

    #[test]
    fn epoch_seconds_and_millis_land_on_same_instant() {
        let secs = parse_instant("1722000000", "timestamp").unwrap();
        let millis = parse_instant("1722000000000", "timestamp").unwrap();

        assert_eq!(secs, millis);
        assert_eq!(iso(secs), "2024-07-26T13:20:00.000Z");
    }

    #[test]
    fn threshold_boundary_is_seconds() {
        // 10^10 exactly is still seconds (year 2286)
        let at = parse_instant("10000000000", "timestamp").unwrap();
        assert_eq!(at.timestamp(), 10_000_000_000);
    }

    #[test]
    fn fractional_epoch_keeps_millis() {
        let at = parse_instant("1722000000.25", "Timestamp (UTC)").unwrap();
        assert_eq!(at.timestamp_millis(), 1_722_000_000_250);
    }

    #[test]
    fn numeric_value_outside_timestamp_column_is_not_an_epoch() {
        let err = parse_instant("1722000000", "date").unwrap_err();
        assert_eq!(
            err,
            RowError::TimestampParse {
                raw_value: "1722000000".to_string(),
                column: "date".to_string(),
            }
        );
    }

    #[test]
    fn naive_strings_are_utc() {
        for raw in [
            "2025-07-28 16:00",
            "2025-07-28 16:00:00",
            "2025-07-28T16:00:00",
            "2025-07-28T16:00:00.000",
            "07-28-2025 16:00",
            "07/28/2025 16:00:00",
            "2025-07-28 16:00 UTC",
        ] {
            let at = parse_instant(raw, "Date (UTC)").unwrap();
            assert_eq!(iso(at), "2025-07-28T16:00:00.000Z", "input {:?}", raw);
        }
    }

    #[test]
    fn explicit_offsets_are_converted() {
        let at = parse_instant("2025-07-28T12:00:00-04:00", "date").unwrap();
        assert_eq!(iso(at), "2025-07-28T16:00:00.000Z");

        let at = parse_instant("2025-07-28 18:00:00+02:00", "date").unwrap();
        assert_eq!(iso(at), "2025-07-28T16:00:00.000Z");
    }

    #[test]
    fn string_in_timestamp_column_still_parses() {
        let at = parse_instant("2025-07-28T16:00:00Z", "timestamp").unwrap();
        assert_eq!(iso(at), "2025-07-28T16:00:00.000Z");
    }

    #[test]
    fn sub_millisecond_precision_is_truncated() {
        let at = parse_instant("2025-07-28T16:00:00.123456789Z", "date").unwrap();
        assert_eq!(iso(at), "2025-07-28T16:00:00.123Z");
    }

    #[test]
    fn date_only_is_midnight_utc() {
        let at = parse_instant("2025-07-28", "date").unwrap();
        assert_eq!(iso(at), "2025-07-28T00:00:00.000Z");
    }

    #[test]
    fn garbage_and_blank_fail() {
        assert!(parse_instant("", "timestamp").is_err());
        assert!(parse_instant("yesterday", "time").is_err());
        assert!(parse_instant("NaN", "timestamp").is_err());
    }
}
