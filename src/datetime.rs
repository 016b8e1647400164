//! Timestamp parsing and formatting shared by the API handlers.
//!
//! Clients send a mix of RFC 3339 strings, naive ISO timestamps and bare
//! dates. Everything is normalised to UTC here.

use chrono::{DateTime, Duration, NaiveDate, NaiveDateTime, SecondsFormat, TimeZone, Utc};

const NAIVE_FORMATS: &[&str] = &[
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%dT%H:%M:%S",
    "%Y-%m-%dT%H:%M",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%d %H:%M",
];

/// A parsed client timestamp. Bare dates are kept apart so a range end can
/// cover the whole day.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Instant {
    At(DateTime<Utc>),
    Day(NaiveDate),
}

impl Instant {
    /// The moment this value denotes when it opens a range.
    pub fn as_start(&self) -> DateTime<Utc> {
        match self {
            Instant::At(dt) => *dt,
            Instant::Day(date) => Utc.from_utc_datetime(&date.and_hms_opt(0, 0, 0).unwrap_or_default()),
        }
    }

    /// The moment this value denotes when it closes a range.
    pub fn as_end(&self) -> DateTime<Utc> {
        match self {
            Instant::At(dt) => *dt,
            Instant::Day(date) => {
                Utc.from_utc_datetime(&date.and_hms_opt(0, 0, 0).unwrap_or_default())
                    + Duration::days(1)
                    - Duration::microseconds(1)
            }
        }
    }
}

pub fn parse_instant(input: &str) -> Option<Instant> {
    let input = input.trim();
    if input.is_empty() {
        return None;
    }

    if let Ok(dt) = DateTime::parse_from_rfc3339(input) {
        return Some(Instant::At(dt.with_timezone(&Utc)));
    }

    // Offsets without a colon, e.g. 2024-01-01T10:00:00+0000
    if let Ok(dt) = DateTime::parse_from_str(input, "%Y-%m-%dT%H:%M:%S%.f%z") {
        return Some(Instant::At(dt.with_timezone(&Utc)));
    }

    let naive = input.strip_suffix('Z').unwrap_or(input);
    for format in NAIVE_FORMATS {
        if let Ok(dt) = NaiveDateTime::parse_from_str(naive, format) {
            return Some(Instant::At(Utc.from_utc_datetime(&dt)));
        }
    }

    NaiveDate::parse_from_str(input, "%Y-%m-%d").ok().map(Instant::Day)
}

/// Parse a point in time; a bare date means midnight UTC.
pub fn parse_datetime(input: &str) -> Option<DateTime<Utc>> {
    parse_instant(input).map(|instant| instant.as_start())
}

pub fn format_datetime(dt: &DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::AutoSi, true)
}

pub fn to_millis(dt: &DateTime<Utc>) -> i64 {
    dt.timestamp_millis()
}

pub fn from_millis(ms: i64) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(ms).unwrap_or_default()
}

/// Serde adapter emitting `format_datetime` strings.
pub mod rfc3339_utc {
    use chrono::{DateTime, Utc};
    use serde::Serializer;

    pub fn serialize<S: Serializer>(dt: &DateTime<Utc>, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&super::format_datetime(dt))
    }
}
