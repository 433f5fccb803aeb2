//! Timestamp grammar for export message lines.
//!
//! Three formats, in order of preference:
//! 1. `YYYY-MM-DD HH:MM:SS UTC`, which is authoritative and self-contained.
//! 2. `H:MM AM`/`H:MM PM`, combined with the last seen date header.
//! 3. `HH:MM` (24-hour), combined with the last seen date header.
//!
//! Only the leading bracketed token on a line is parsed as a timestamp;
//! bracketed tokens inside message bodies are preserved verbatim by the
//! line parser.

use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};

/// Parse a date header line of the form `---- YYYY-MM-DD ----`.
pub fn parse_date_header(line: &str) -> Option<NaiveDate> {
    let trimmed = line.trim();
    if !trimmed.starts_with("----") || !trimmed.ends_with("----") {
        return None;
    }
    let inner = trimmed.trim_matches('-').trim();
    NaiveDate::parse_from_str(inner, "%Y-%m-%d").ok()
}

/// Parse the content of a leading bracketed timestamp token.
///
/// `current_date` is the date from the most recent date header; the
/// time-only forms cannot be resolved without it.
pub fn parse_timestamp(token: &str, current_date: Option<NaiveDate>) -> Option<DateTime<Utc>> {
    let token = token.trim();

    // Full datetime, e.g. "2023-06-22 15:56:54 UTC"
    if let Some(stripped) = token.strip_suffix(" UTC") {
        if let Ok(dt) = NaiveDateTime::parse_from_str(stripped, "%Y-%m-%d %H:%M:%S") {
            return Some(dt.and_utc());
        }
    }
    // Some exports omit the UTC suffix on header timestamps.
    if let Ok(dt) = NaiveDateTime::parse_from_str(token, "%Y-%m-%d %H:%M:%S") {
        return Some(dt.and_utc());
    }

    let date = current_date?;

    // 12-hour form, e.g. "8:24 AM"
    if let Ok(time) = NaiveTime::parse_from_str(token, "%I:%M %p") {
        return Some(date.and_time(time).and_utc());
    }

    // 24-hour form, e.g. "14:30"
    if let Ok(time) = NaiveTime::parse_from_str(token, "%H:%M") {
        return Some(date.and_time(time).and_utc());
    }

    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Timelike;

    #[test]
    fn full_utc_timestamp() {
        let ts = parse_timestamp("2023-06-22 15:56:54 UTC", None).unwrap();
        assert_eq!(ts.to_rfc3339(), "2023-06-22T15:56:54+00:00");
    }

    #[test]
    fn twelve_hour_needs_date_header() {
        assert!(parse_timestamp("8:24 AM", None).is_none());
        let date = NaiveDate::from_ymd_opt(2024, 1, 5).unwrap();
        let ts = parse_timestamp("8:24 AM", Some(date)).unwrap();
        assert_eq!(ts.to_rfc3339(), "2024-01-05T08:24:00+00:00");
    }

    #[test]
    fn twelve_hour_pm() {
        let date = NaiveDate::from_ymd_opt(2024, 1, 5).unwrap();
        let ts = parse_timestamp("12:05 PM", Some(date)).unwrap();
        assert_eq!(ts.hour(), 12);
        let ts = parse_timestamp("12:05 AM", Some(date)).unwrap();
        assert_eq!(ts.hour(), 0);
    }

    #[test]
    fn twenty_four_hour() {
        let date = NaiveDate::from_ymd_opt(2023, 11, 2).unwrap();
        let ts = parse_timestamp("14:30", Some(date)).unwrap();
        assert_eq!(ts.to_rfc3339(), "2023-11-02T14:30:00+00:00");
    }

    #[test]
    fn garbage_is_rejected() {
        let date = NaiveDate::from_ymd_opt(2023, 11, 2).unwrap();
        assert!(parse_timestamp("not a time", Some(date)).is_none());
        assert!(parse_timestamp("25:99", Some(date)).is_none());
    }

    #[test]
    fn date_headers() {
        assert_eq!(
            parse_date_header("---- 2023-06-22 ----"),
            NaiveDate::from_ymd_opt(2023, 6, 22)
        );
        assert!(parse_date_header("---- not a date ----").is_none());
        assert!(parse_date_header("[8:24 AM] hello").is_none());
    }
}
