//! Expansion of recurring series into the occurrences visible in a window.
//!
//! Rules are RFC 5545 `RRULE` values evaluated with the `rrule` crate, using
//! the master event's start as `DTSTART` in UTC. Every occurrence keeps the
//! master's duration.

use chrono::{DateTime, Duration, Utc};
use log::warn;
use rrule::{RRuleSet, Tz};
use thiserror::Error;

use super::model::{Event, EventView};

/// Upper bound on occurrences generated per series and query.
pub const MAX_OCCURRENCES: u16 = 5000;

#[derive(Debug, Error)]
#[error("Invalid recurrence rule: {0}")]
pub struct RecurrenceError(String);

/// A closed time window `[start, end]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Window {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl Window {
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        Self { start, end }
    }

    fn overlaps(&self, start: DateTime<Utc>, end: DateTime<Utc>) -> bool {
        start < self.end && end > self.start
    }

    /// Like `overlaps`, but an event touching either edge counts.
    fn touches(&self, start: DateTime<Utc>, end: DateTime<Utc>) -> bool {
        start <= self.end && end >= self.start
    }

    fn contains(&self, start: DateTime<Utc>, end: DateTime<Utc>) -> bool {
        start >= self.start && end <= self.end
    }
}

fn normalize_rule(rule: &str) -> &str {
    let rule = rule.trim();
    match rule.get(..6) {
        Some(prefix) if prefix.eq_ignore_ascii_case("RRULE:") => &rule[6..],
        _ => rule,
    }
}

/// `DTSTART` is written in UTC, so `UNTIL` must be UTC too. A date-only
/// `UNTIL` becomes the last second of that day; a floating one gets a `Z`.
fn utc_until(rule: &str) -> String {
    rule.split(';')
        .map(|part| match part.split_once('=') {
            Some((key, value)) if key.trim().eq_ignore_ascii_case("UNTIL") => {
                let value = value.trim();
                let bytes = value.as_bytes();
                let digits = |range: std::ops::Range<usize>| bytes[range].iter().all(u8::is_ascii_digit);
                let is_date = bytes.len() == 8 && digits(0..8);
                let is_floating = bytes.len() == 15
                    && digits(0..8)
                    && bytes[8].eq_ignore_ascii_case(&b'T')
                    && digits(9..15);
                if is_date {
                    format!("{}={}T235959Z", key, value)
                } else if is_floating {
                    format!("{}={}Z", key, value)
                } else {
                    part.to_string()
                }
            }
            _ => part.to_string(),
        })
        .collect::<Vec<_>>()
        .join(";")
}

fn build_rule_set(rule: &str, dtstart: DateTime<Utc>) -> Result<RRuleSet, RecurrenceError> {
    let rule = normalize_rule(rule);
    if rule.is_empty() || rule.contains('\n') {
        return Err(RecurrenceError(rule.to_string()));
    }
    let text = format!("DTSTART:{}\nRRULE:{}", dtstart.format("%Y%m%dT%H%M%SZ"), utc_until(rule));
    text.parse::<RRuleSet>().map_err(|e| RecurrenceError(e.to_string()))
}

/// Check that `rule` is a usable RRULE for a series starting at `dtstart`.
/// Returns the rule without any `RRULE:` prefix.
pub fn validate_rule(rule: &str, dtstart: DateTime<Utc>) -> Result<String, RecurrenceError> {
    build_rule_set(rule, dtstart)?;
    Ok(normalize_rule(rule).to_string())
}

/// Start times of the series that can overlap `window`.
pub fn occurrence_starts(
    rule: &str,
    dtstart: DateTime<Utc>,
    duration: Duration,
    window: &Window,
) -> Result<Vec<DateTime<Utc>>, RecurrenceError> {
    let set = build_rule_set(rule, dtstart)?;

    // An occurrence starting up to `duration` before the window still overlaps it.
    let earliest = window.start - duration;
    let after = (earliest - Duration::seconds(1)).with_timezone(&Tz::UTC);
    let before = (window.end + Duration::seconds(1)).with_timezone(&Tz::UTC);

    let result = set.after(after).before(before).all(MAX_OCCURRENCES);
    if result.limited {
        warn!("Recurrence expansion hit the {} occurrence limit", MAX_OCCURRENCES);
    }

    Ok(result
        .dates
        .into_iter()
        .map(|dt| dt.with_timezone(&Utc))
        .filter(|start| *start >= earliest && *start <= window.end)
        .collect())
}

/// Expand `events` into everything visible in `window`, sorted by start.
pub fn expand_events(events: &[Event], window: &Window) -> Vec<EventView> {
    let mut views = Vec::new();

    for event in events {
        let Some(rule) = event.recurrence_rule.as_deref() else {
            if window.touches(event.start_time, event.end_time) {
                views.push(event.view());
            }
            continue;
        };

        let duration = event.duration();
        match occurrence_starts(rule, event.start_time, duration, window) {
            Ok(starts) => {
                for start in starts {
                    let end = start + duration;
                    if window.overlaps(start, end) || (duration == Duration::zero() && window.contains(start, end)) {
                        views.push(event.occurrence(start, end));
                    }
                }
            }
            Err(e) => {
                warn!("Event {} has an unusable recurrence rule: {}", event.id, e);
                if window.contains(event.start_time, event.end_time) {
                    views.push(event.view());
                }
            }
        }
    }

    views.sort_by(|a, b| a.start_time.cmp(&b.start_time).then(a.id.cmp(&b.id)));
    views
}
