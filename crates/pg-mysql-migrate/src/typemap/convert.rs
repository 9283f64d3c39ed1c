//! Per-row value conversion, including defensive timestamp normalization.
//!
//! Values arrive from the chunk streamer either natively typed or as the
//! source's text rendering (temporal, numeric, json, and array columns are
//! cast to text in the select list). Conversion must never abort the run: a
//! malformed value becomes a sentinel or NULL, with a WARNING, and the row
//! keeps moving.

use chrono::{Datelike, NaiveDate, NaiveDateTime, NaiveTime};
use rust_decimal::Decimal;
use tracing::warn;

/// Replacement for irrecoverably corrupt timestamps. Greppable on purpose.
pub const EPOCH_TIMESTAMP: &str = "1970-01-01 00:00:00";

/// Date reduction of the epoch sentinel.
pub const EPOCH_DATE: &str = "1970-01-01";

/// Years outside this range are treated as corruption.
const YEAR_MIN: i32 = 1900;
const YEAR_MAX: i32 = 2100;

/// Truthy spellings accepted for boolean text values, case-insensitive.
const TRUTHY: [&str; 5] = ["t", "true", "1", "yes", "on"];

/// Interpret a text rendering of a boolean.
pub fn boolean_from_text(raw: &str) -> bool {
    let lower = raw.trim().to_lowercase();
    TRUTHY.contains(&lower.as_str())
}

/// Normalize a timestamp string into a DATETIME-safe form.
///
/// The rules, in order:
/// 1. A leading digit run of 5+ characters (an extra year digit, the
///    corruption pattern observed in the wild) yields the epoch sentinel.
/// 2. A trailing UTC offset is stripped.
/// 3. Strings already in `YYYY-MM-DD[ HH:MM:SS[.fff]]` shape pass; anything
///    else gets one calendar-parsing attempt, and failure yields epoch.
/// 4. A year outside [1900, 2100] yields epoch.
///
/// Idempotent: the output is always a fixed point of this function.
pub fn normalize_timestamp(raw: &str) -> String {
    let trimmed = raw.trim();

    if leading_digit_run(trimmed) >= 5 {
        return EPOCH_TIMESTAMP.to_string();
    }

    let stripped = strip_utc_offset(trimmed);

    if let Some(year) = plain_timestamp_year(stripped) {
        if !(YEAR_MIN..=YEAR_MAX).contains(&year) {
            return EPOCH_TIMESTAMP.to_string();
        }
        return stripped.to_string();
    }

    match parse_calendar(stripped) {
        Some(dt) if (YEAR_MIN..=YEAR_MAX).contains(&dt.year()) => {
            dt.format("%Y-%m-%d %H:%M:%S").to_string()
        }
        _ => EPOCH_TIMESTAMP.to_string(),
    }
}

/// Normalize a date string, reducing to `YYYY-MM-DD`.
pub fn normalize_date(raw: &str) -> String {
    let normalized = normalize_timestamp(raw);
    normalized.split(' ').next().unwrap_or(EPOCH_DATE).to_string()
}

/// Validate a time string as `HH:MM:SS[.fff]`, attempting one reformat.
///
/// Returns `None` when the value cannot be made valid; the caller writes
/// NULL in that case.
pub fn normalize_time(raw: &str) -> Option<String> {
    let trimmed = raw.trim();
    // timetz values carry an offset; drop it before validating.
    let base = match trimmed
        .char_indices()
        .find(|(i, c)| *i >= 8 && (*c == '+' || *c == '-'))
    {
        Some((i, _)) => trimmed[..i].trim_end(),
        None => trimmed,
    };
    if is_plain_time_with_fraction(base) {
        return Some(base.to_string());
    }
    for fmt in ["%H:%M:%S%.f", "%H:%M", "%H%M%S"] {
        if let Ok(t) = NaiveTime::parse_from_str(base, fmt) {
            return Some(t.format("%H:%M:%S").to_string());
        }
    }
    None
}

/// Pass JSON text through verbatim when it parses; otherwise re-encode the
/// raw text as a JSON string so the target column always receives valid JSON.
pub fn convert_json(raw: &str) -> String {
    if serde_json::from_str::<serde_json::Value>(raw).is_ok() {
        raw.to_string()
    } else {
        serde_json::Value::String(raw.to_string()).to_string()
    }
}

/// Pass a numeric text rendering through, warning when it exceeds the
/// DECIMAL(20,10) envelope the target column was created with.
pub fn convert_numeric(raw: &str, table: &str, column: &str) -> String {
    match raw.trim().parse::<Decimal>() {
        Ok(d) => {
            let digits = d.abs().trunc().to_string();
            let integer_digits = if digits == "0" { 0 } else { digits.len() };
            if integer_digits > 10 || d.scale() > 10 {
                warn!(
                    "{}.{}: value {} exceeds DECIMAL(20,10); target will truncate",
                    table, column, raw
                );
            }
        }
        Err(_) => {
            warn!(
                "{}.{}: non-numeric value {:?} in numeric column",
                table, column, raw
            );
        }
    }
    raw.trim().to_string()
}

/// Length of the run of ASCII digits at the start of the string.
fn leading_digit_run(s: &str) -> usize {
    s.bytes().take_while(|b| b.is_ascii_digit()).count()
}

/// Strip a trailing `±HH`, `±HH:MM`, or `±HH:MM:SS` UTC offset.
///
/// Only signs appearing after the date portion are considered, so the
/// date's own dashes are never mistaken for an offset.
fn strip_utc_offset(s: &str) -> &str {
    for (i, ch) in s.char_indices() {
        if i < 10 {
            continue;
        }
        if (ch == '+' || ch == '-') && is_offset_tail(&s[i + 1..]) {
            return s[..i].trim_end();
        }
    }
    s
}

fn is_offset_tail(t: &str) -> bool {
    matches!(t.len(), 2 | 5 | 8)
        && t.chars()
            .enumerate()
            .all(|(i, c)| if i == 2 || i == 5 { c == ':' } else { c.is_ascii_digit() })
}

/// If the string matches `YYYY-MM-DD[ HH:MM:SS[.fff]]`, return its year.
fn plain_timestamp_year(s: &str) -> Option<i32> {
    let bytes = s.as_bytes();
    if bytes.len() < 10 {
        return None;
    }
    let date_ok = bytes[..4].iter().all(|b| b.is_ascii_digit())
        && bytes[4] == b'-'
        && bytes[5..7].iter().all(|b| b.is_ascii_digit())
        && bytes[7] == b'-'
        && bytes[8..10].iter().all(|b| b.is_ascii_digit());
    if !date_ok {
        return None;
    }
    if bytes.len() > 10 {
        let time = &s[10..];
        if !time.starts_with(' ') || !is_plain_time_with_fraction(&time[1..]) {
            return None;
        }
    }
    s[..4].parse().ok()
}

fn is_plain_time(s: &str) -> bool {
    let bytes = s.as_bytes();
    bytes.len() == 8
        && bytes[..2].iter().all(|b| b.is_ascii_digit())
        && bytes[2] == b':'
        && bytes[3..5].iter().all(|b| b.is_ascii_digit())
        && bytes[5] == b':'
        && bytes[6..8].iter().all(|b| b.is_ascii_digit())
}

fn is_plain_time_with_fraction(s: &str) -> bool {
    match s.split_once('.') {
        Some((time, frac)) => {
            is_plain_time(time) && !frac.is_empty() && frac.bytes().all(|b| b.is_ascii_digit())
        }
        None => is_plain_time(s),
    }
}

/// One calendar-parsing attempt over the formats seen in source dumps.
fn parse_calendar(s: &str) -> Option<NaiveDateTime> {
    for fmt in [
        "%Y-%m-%dT%H:%M:%S%.f",
        "%Y-%m-%d %H:%M",
        "%Y/%m/%d %H:%M:%S",
        "%Y%m%d %H:%M:%S",
    ] {
        if let Ok(dt) = NaiveDateTime::parse_from_str(s, fmt) {
            return Some(dt);
        }
    }
    for fmt in ["%Y/%m/%d", "%Y%m%d"] {
        if let Ok(d) = NaiveDate::parse_from_str(s, fmt) {
            return d.and_hms_opt(0, 0, 0);
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_boolean_from_text() {
        for v in ["t", "true", "1", "yes", "on", "TRUE", "Yes", "ON"] {
            assert!(boolean_from_text(v), "{}", v);
        }
        for v in ["f", "false", "0", "no", "off", ""] {
            assert!(!boolean_from_text(v), "{}", v);
        }
    }

    #[test]
    fn test_valid_timestamps_pass_through() {
        assert_eq!(
            normalize_timestamp("2024-01-02 10:00:00"),
            "2024-01-02 10:00:00"
        );
        assert_eq!(normalize_timestamp("2024-01-02"), "2024-01-02");
        assert_eq!(
            normalize_timestamp("2024-01-02 10:00:00.123456"),
            "2024-01-02 10:00:00.123456"
        );
    }

    #[test]
    fn test_corruption_sentinel_for_long_digit_runs() {
        // The observed pattern: an extra year digit.
        assert_eq!(
            normalize_timestamp("202511-11-13 02:39:00"),
            EPOCH_TIMESTAMP
        );
        assert_eq!(normalize_timestamp("99999-01-01"), EPOCH_TIMESTAMP);
        assert_eq!(normalize_timestamp("123456789"), EPOCH_TIMESTAMP);
    }

    #[test]
    fn test_offset_stripping() {
        assert_eq!(
            normalize_timestamp("2024-01-02 10:00:00+00"),
            "2024-01-02 10:00:00"
        );
        assert_eq!(
            normalize_timestamp("2024-01-02 10:00:00-05:30"),
            "2024-01-02 10:00:00"
        );
        assert_eq!(
            normalize_timestamp("2024-01-02 10:00:00.5+02:00"),
            "2024-01-02 10:00:00.5"
        );
    }

    #[test]
    fn test_year_bound_sentinel() {
        assert_eq!(normalize_timestamp("1899-12-31 23:59:59"), EPOCH_TIMESTAMP);
        assert_eq!(normalize_timestamp("2101-01-01 00:00:00"), EPOCH_TIMESTAMP);
        assert_eq!(
            normalize_timestamp("1900-01-01 00:00:00"),
            "1900-01-01 00:00:00"
        );
        assert_eq!(
            normalize_timestamp("2100-12-31 23:59:59"),
            "2100-12-31 23:59:59"
        );
    }

    #[test]
    fn test_calendar_parse_fallback() {
        assert_eq!(
            normalize_timestamp("2024-01-02T10:00:00"),
            "2024-01-02 10:00:00"
        );
        assert_eq!(
            normalize_timestamp("2024/01/02 10:00:00"),
            "2024-01-02 10:00:00"
        );
        assert_eq!(normalize_timestamp("not a date"), EPOCH_TIMESTAMP);
        assert_eq!(normalize_timestamp(""), EPOCH_TIMESTAMP);
    }

    #[test]
    fn test_normalize_is_idempotent() {
        let inputs = [
            "2024-01-02 10:00:00",
            "202511-11-13 02:39:00",
            "2024-01-02 10:00:00+05:30",
            "1899-01-01",
            "garbage",
            "2024-01-02T10:00:00",
            "",
        ];
        for input in inputs {
            let once = normalize_timestamp(input);
            let twice = normalize_timestamp(&once);
            assert_eq!(once, twice, "not idempotent for {:?}", input);
        }
    }

    #[test]
    fn test_normalize_date() {
        assert_eq!(normalize_date("2024-01-02"), "2024-01-02");
        assert_eq!(normalize_date("2024-01-02 10:00:00"), "2024-01-02");
        assert_eq!(normalize_date("202511-11-13"), EPOCH_DATE);
        assert_eq!(normalize_date("bogus"), EPOCH_DATE);
    }

    #[test]
    fn test_normalize_time() {
        assert_eq!(normalize_time("10:00:00"), Some("10:00:00".to_string()));
        assert_eq!(
            normalize_time("10:00:00.123"),
            Some("10:00:00.123".to_string())
        );
        // One reformat attempt.
        assert_eq!(normalize_time("10:00"), Some("10:00:00".to_string()));
        // timetz offsets are dropped.
        assert_eq!(normalize_time("10:00:00-05"), Some("10:00:00".to_string()));
        assert_eq!(
            normalize_time("10:00:00+05:30"),
            Some("10:00:00".to_string())
        );
        // Unfixable values become NULL upstream.
        assert_eq!(normalize_time("25:99:99"), None);
        assert_eq!(normalize_time("yesterday"), None);
    }

    #[test]
    fn test_convert_json() {
        assert_eq!(convert_json("{\"a\": 1}"), "{\"a\": 1}");
        assert_eq!(convert_json("[1, 2, null, 4]"), "[1, 2, null, 4]");
        // Invalid JSON is re-encoded as a JSON string.
        assert_eq!(convert_json("not json"), "\"not json\"");
    }

    #[test]
    fn test_convert_numeric_passthrough() {
        assert_eq!(convert_numeric("1.5", "t", "c"), "1.5");
        assert_eq!(convert_numeric("-42", "t", "c"), "-42");
        // Overflow still passes through; the warning is the contract.
        assert_eq!(
            convert_numeric("123456789012345.0", "t", "c"),
            "123456789012345.0"
        );
    }

    #[test]
    fn test_strip_utc_offset_edge_cases() {
        assert_eq!(strip_utc_offset("2024-01-02 10:00:00"), "2024-01-02 10:00:00");
        assert_eq!(strip_utc_offset("2024-01-02"), "2024-01-02");
        // A negative offset is not confused with date dashes.
        assert_eq!(
            strip_utc_offset("2024-01-02 10:00:00-08"),
            "2024-01-02 10:00:00"
        );
    }
}
