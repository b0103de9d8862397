//! Original-timestamp parsing.
//!
//! Inputs without an explicit offset are read as UTC, never as local time.
//! Anything unparseable falls back to "now".

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};

const OFFSET_FORMATS: &[&str] = &["%Y-%m-%d %H:%M:%S%z", "%Y-%m-%dT%H:%M:%S%z", "%Y-%m-%d %H:%M:%S %z"];

const NAIVE_FORMATS: &[&str] = &[
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%dT%H:%M:%S",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M",
    "%Y-%m-%dT%H:%M",
];

pub fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }

    if raw.bytes().all(|b| b.is_ascii_digit()) {
        let secs = raw.parse::<i64>().ok()?;
        return DateTime::from_timestamp(secs, 0);
    }

    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.with_timezone(&Utc));
    }
    if let Ok(dt) = DateTime::parse_from_rfc2822(raw) {
        return Some(dt.with_timezone(&Utc));
    }
    for fmt in OFFSET_FORMATS {
        if let Ok(dt) = DateTime::parse_from_str(raw, fmt) {
            return Some(dt.with_timezone(&Utc));
        }
    }
    for fmt in NAIVE_FORMATS {
        if let Ok(naive) = NaiveDateTime::parse_from_str(raw, fmt) {
            return Some(naive.and_utc());
        }
    }
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|naive| naive.and_utc())
}

/// `created_at` for an event: the original timestamp when it parses, `now` otherwise.
pub fn created_at(original: Option<&str>, now: DateTime<Utc>) -> u64 {
    original
        .and_then(parse_timestamp)
        .map(|dt| dt.timestamp())
        .filter(|secs| *secs >= 0)
        .map(|secs| secs as u64)
        .unwrap_or_else(|| now.timestamp().max(0) as u64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use rstest::rstest;

    fn utc(y: i32, mo: u32, d: u32, h: u32, mi: u32, s: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, mo, d, h, mi, s).unwrap()
    }

    #[rstest]
    #[case::rfc3339_z("2021-06-01T10:00:00Z", utc(2021, 6, 1, 10, 0, 0))]
    #[case::rfc3339_offset("2021-06-01T12:00:00+02:00", utc(2021, 6, 1, 10, 0, 0))]
    #[case::naive_space("2021-06-01 10:00:00", utc(2021, 6, 1, 10, 0, 0))]
    #[case::naive_t("2021-06-01T10:00:00", utc(2021, 6, 1, 10, 0, 0))]
    #[case::naive_minutes("2021-06-01 10:00", utc(2021, 6, 1, 10, 0, 0))]
    #[case::compact_offset("2021-06-01 05:00:00-0500", utc(2021, 6, 1, 10, 0, 0))]
    #[case::date_only("2021-06-01", utc(2021, 6, 1, 0, 0, 0))]
    #[case::unix("1622541600", utc(2021, 6, 1, 10, 0, 0))]
    #[case::rfc2822("Tue, 1 Jun 2021 10:00:00 +0000", utc(2021, 6, 1, 10, 0, 0))]
    fn parses_as_utc(#[case] raw: &str, #[case] expected: DateTime<Utc>) {
        assert_eq!(parse_timestamp(raw), Some(expected));
    }

    #[rstest]
    #[case("")]
    #[case("yesterday")]
    #[case("2021-13-45")]
    fn unparseable_is_none(#[case] raw: &str) {
        assert_eq!(parse_timestamp(raw), None);
    }

    #[test]
    fn created_at_falls_back_to_now() {
        let now = utc(2024, 1, 1, 0, 0, 0);
        assert_eq!(created_at(None, now), now.timestamp() as u64);
        assert_eq!(created_at(Some("garbage"), now), now.timestamp() as u64);
        assert_eq!(
            created_at(Some("2021-06-01 10:00:00"), now),
            utc(2021, 6, 1, 10, 0, 0).timestamp() as u64
        );
    }
}
