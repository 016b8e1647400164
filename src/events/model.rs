use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::datetime::rfc3339_utc;

/// An event row as stored. For a recurring series this is the master.
#[derive(Debug, Clone, PartialEq)]
pub struct Event {
    pub id: i64,
    pub user_id: i64,
    pub title: String,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub description: Option<String>,
    pub color_tag: Option<String>,
    pub location: Option<String>,
    pub recurrence_rule: Option<String>,
    pub reminder_sent: bool,
}

/// Values for a new row.
#[derive(Debug, Clone)]
pub struct NewEvent {
    pub title: String,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub description: Option<String>,
    pub color_tag: Option<String>,
    pub location: Option<String>,
    pub recurrence_rule: Option<String>,
}

/// The JSON shape returned to clients, for both stored events and expanded
/// occurrences.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct EventView {
    pub id: i64,
    pub title: String,
    #[serde(with = "rfc3339_utc")]
    pub start_time: DateTime<Utc>,
    #[serde(with = "rfc3339_utc")]
    pub end_time: DateTime<Utc>,
    pub description: Option<String>,
    pub color_tag: Option<String>,
    pub location: Option<String>,
    pub user_id: i64,
    pub reminder_sent: bool,
    pub recurrence_rule: Option<String>,
    pub parent_event_id: Option<i64>,
    pub is_occurrence: bool,
}

impl Event {
    pub fn duration(&self) -> chrono::Duration {
        self.end_time - self.start_time
    }

    pub fn view(&self) -> EventView {
        EventView {
            id: self.id,
            title: self.title.clone(),
            start_time: self.start_time,
            end_time: self.end_time,
            description: self.description.clone(),
            color_tag: self.color_tag.clone(),
            location: self.location.clone(),
            user_id: self.user_id,
            reminder_sent: self.reminder_sent,
            recurrence_rule: self.recurrence_rule.clone(),
            parent_event_id: None,
            is_occurrence: false,
        }
    }

    /// One instance of this series at the given times.
    pub fn occurrence(&self, start: DateTime<Utc>, end: DateTime<Utc>) -> EventView {
        EventView {
            start_time: start,
            end_time: end,
            parent_event_id: Some(self.id),
            is_occurrence: true,
            ..self.view()
        }
    }
}
