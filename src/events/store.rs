//! Event queries. Every per-user query filters on `user_id` so one user's
//! rows are invisible to another.

use anyhow::Result;
use chrono::{DateTime, Utc};
use rusqlite::types::Value;
use rusqlite::{params, params_from_iter, OptionalExtension, Row};

use super::model::{Event, NewEvent};
use crate::datetime::{from_millis, to_millis};
use crate::storage::Database;

const EVENT_COLUMNS: &str = "id, user_id, title, start_ms, end_ms, description, color_tag, \
     location, recurrence_rule, reminder_sent";

/// Optional filters for keyword/date/tag search. All set filters must match.
#[derive(Debug, Default, Clone)]
pub struct SearchFilter {
    pub keyword: Option<String>,
    pub starts_after: Option<DateTime<Utc>>,
    pub ends_before: Option<DateTime<Utc>>,
    pub tags: Vec<String>,
}

/// An event whose owner should be reminded.
#[derive(Debug, Clone)]
pub struct DueReminder {
    pub event: Event,
    pub email: String,
}

fn event_from_row(row: &Row<'_>) -> rusqlite::Result<Event> {
    Ok(Event {
        id: row.get(0)?,
        user_id: row.get(1)?,
        title: row.get(2)?,
        start_time: from_millis(row.get(3)?),
        end_time: from_millis(row.get(4)?),
        description: row.get(5)?,
        color_tag: row.get(6)?,
        location: row.get(7)?,
        recurrence_rule: row.get(8)?,
        reminder_sent: row.get(9)?,
    })
}

/// Escape `%`, `_` and `\` so user input matches literally inside LIKE.
fn like_pattern(needle: &str) -> String {
    let mut escaped = String::with_capacity(needle.len() + 2);
    escaped.push('%');
    for c in needle.chars() {
        if matches!(c, '%' | '_' | '\\') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped.push('%');
    escaped
}

impl Database {
    /// Times are stored with millisecond precision; the returned event is
    /// truncated the same way.
    pub async fn insert_event(&self, user_id: i64, new: &NewEvent) -> Result<Event> {
        let start_ms = to_millis(&new.start_time);
        let end_ms = to_millis(&new.end_time);
        let conn = self.lock().await;
        conn.execute(
            "INSERT INTO events (user_id, title, start_ms, end_ms, description, color_tag, location, recurrence_rule, reminder_sent)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, 0)",
            params![
                user_id,
                new.title,
                start_ms,
                end_ms,
                new.description,
                new.color_tag,
                new.location,
                new.recurrence_rule,
            ],
        )?;

        Ok(Event {
            id: conn.last_insert_rowid(),
            user_id,
            title: new.title.clone(),
            start_time: from_millis(start_ms),
            end_time: from_millis(end_ms),
            description: new.description.clone(),
            color_tag: new.color_tag.clone(),
            location: new.location.clone(),
            recurrence_rule: new.recurrence_rule.clone(),
            reminder_sent: false,
        })
    }

    pub async fn get_event(&self, user_id: i64, event_id: i64) -> Result<Option<Event>> {
        let conn = self.lock().await;
        let sql = format!("SELECT {} FROM events WHERE id = ?1 AND user_id = ?2", EVENT_COLUMNS);
        let event = conn.query_row(&sql, params![event_id, user_id], event_from_row).optional()?;
        Ok(event)
    }

    /// Persist every mutable column of `event`.
    pub async fn update_event(&self, event: &Event) -> Result<()> {
        let conn = self.lock().await;
        conn.execute(
            "UPDATE events SET title = ?1, start_ms = ?2, end_ms = ?3, description = ?4, color_tag = ?5,
             location = ?6, recurrence_rule = ?7, reminder_sent = ?8
             WHERE id = ?9 AND user_id = ?10",
            params![
                event.title,
                to_millis(&event.start_time),
                to_millis(&event.end_time),
                event.description,
                event.color_tag,
                event.location,
                event.recurrence_rule,
                event.reminder_sent,
                event.id,
                event.user_id,
            ],
        )?;
        Ok(())
    }

    /// Returns false when no row of this user had that id.
    pub async fn delete_event(&self, user_id: i64, event_id: i64) -> Result<bool> {
        let conn = self.lock().await;
        let deleted = conn.execute(
            "DELETE FROM events WHERE id = ?1 AND user_id = ?2",
            params![event_id, user_id],
        )?;
        Ok(deleted > 0)
    }

    /// Rows that can contribute to the window `[from, to]`: one-off events
    /// overlapping it, and series masters starting no later than `to`.
    pub async fn window_candidates(
        &self,
        user_id: i64,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<Event>> {
        let conn = self.lock().await;
        let sql = format!(
            "SELECT {} FROM events
             WHERE user_id = ?1
               AND ((recurrence_rule IS NULL AND start_ms <= ?3 AND end_ms >= ?2)
                 OR (recurrence_rule IS NOT NULL AND start_ms <= ?3))
             ORDER BY start_ms ASC, id ASC",
            EVENT_COLUMNS
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(params![user_id, to_millis(&from), to_millis(&to)], event_from_row)?;
        let events = rows.collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(events)
    }

    pub async fn search_events(&self, user_id: i64, filter: &SearchFilter) -> Result<Vec<Event>> {
        let mut clauses = vec!["user_id = ?".to_string()];
        let mut values: Vec<Value> = vec![Value::Integer(user_id)];

        if let Some(keyword) = filter.keyword.as_deref().filter(|k| !k.is_empty()) {
            clauses.push("(title LIKE ? ESCAPE '\\' OR description LIKE ? ESCAPE '\\')".to_string());
            let pattern = like_pattern(keyword);
            values.push(Value::Text(pattern.clone()));
            values.push(Value::Text(pattern));
        }
        if let Some(after) = filter.starts_after {
            clauses.push("start_ms >= ?".to_string());
            values.push(Value::Integer(to_millis(&after)));
        }
        if let Some(before) = filter.ends_before {
            clauses.push("end_ms <= ?".to_string());
            values.push(Value::Integer(to_millis(&before)));
        }
        let tags: Vec<&String> = filter.tags.iter().filter(|t| !t.is_empty()).collect();
        if !tags.is_empty() {
            let any_tag = vec!["color_tag LIKE ? ESCAPE '\\'"; tags.len()].join(" OR ");
            clauses.push(format!("({})", any_tag));
            values.extend(tags.into_iter().map(|t| Value::Text(like_pattern(t))));
        }

        let sql = format!(
            "SELECT {} FROM events WHERE {} ORDER BY start_ms ASC, id ASC",
            EVENT_COLUMNS,
            clauses.join(" AND ")
        );

        let conn = self.lock().await;
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(params_from_iter(values.iter()), event_from_row)?;
        let events = rows.collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(events)
    }

    /// Events of any user starting in `[from, to]` that have not been
    /// reminded yet, with the owner's email.
    pub async fn due_reminders(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<DueReminder>> {
        let conn = self.lock().await;
        let columns = EVENT_COLUMNS
            .split(", ")
            .map(|c| format!("e.{}", c.trim()))
            .collect::<Vec<_>>()
            .join(", ");
        let sql = format!(
            "SELECT {}, u.email FROM events e JOIN users u ON u.id = e.user_id
             WHERE e.start_ms >= ?1 AND e.start_ms <= ?2 AND e.reminder_sent = 0
             ORDER BY e.start_ms ASC, e.id ASC",
            columns
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(params![to_millis(&from), to_millis(&to)], |row| {
            Ok(DueReminder { event: event_from_row(row)?, email: row.get(10)? })
        })?;
        let due = rows.collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(due)
    }

    /// Flag each `(id, start)` pair as reminded. A row whose start moved
    /// since the reminder was mailed is left alone so the new time gets
    /// its own reminder. Returns the number of rows flagged.
    pub async fn mark_reminders_sent(&self, reminded: &[(i64, DateTime<Utc>)]) -> Result<usize> {
        if reminded.is_empty() {
            return Ok(0);
        }
        let mut conn = self.lock().await;
        let tx = conn.transaction()?;
        let mut marked = 0;
        {
            let mut stmt = tx.prepare("UPDATE events SET reminder_sent = 1 WHERE id = ?1 AND start_ms = ?2")?;
            for (id, start) in reminded {
                marked += stmt.execute(params![id, to_millis(start)])?;
            }
        }
        tx.commit()?;
        Ok(marked)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn at(day: u32, hour: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, day, hour, 0, 0).unwrap()
    }

    fn new_event(title: &str, start: DateTime<Utc>, hours: i64) -> NewEvent {
        NewEvent {
            title: title.to_string(),
            start_time: start,
            end_time: start + Duration::hours(hours),
            description: None,
            color_tag: None,
            location: None,
            recurrence_rule: None,
        }
    }

    async fn db_with_user() -> Result<(Database, i64)> {
        let db = Database::in_memory()?;
        let user = db.create_user("owner@example.com", "x", Utc::now()).await?.unwrap();
        Ok((db, user.id))
    }

    #[test]
    fn test_like_pattern_escapes_wildcards() {
        assert_eq!(like_pattern("50%_off"), "%50\\%\\_off%");
        assert_eq!(like_pattern("plain"), "%plain%");
    }

    #[tokio::test]
    async fn test_insert_get_update_delete() -> Result<()> {
        let (db, user_id) = db_with_user().await?;
        let mut event = db.insert_event(user_id, &new_event("Standup", at(1, 9), 1)).await?;
        assert!(!event.reminder_sent);

        event.title = "Daily standup".to_string();
        event.reminder_sent = true;
        db.update_event(&event).await?;

        let stored = db.get_event(user_id, event.id).await?.unwrap();
        assert_eq!(stored, event);

        assert!(db.get_event(user_id + 1, event.id).await?.is_none());
        assert!(!db.delete_event(user_id + 1, event.id).await?);
        assert!(db.delete_event(user_id, event.id).await?);
        assert!(db.get_event(user_id, event.id).await?.is_none());
        Ok(())
    }

    #[tokio::test]
    async fn test_window_candidates() -> Result<()> {
        let (db, user_id) = db_with_user().await?;
        db.insert_event(user_id, &new_event("before", at(1, 9), 1)).await?;
        db.insert_event(user_id, &new_event("overlapping", at(2, 23), 2)).await?;
        db.insert_event(user_id, &new_event("after", at(9, 9), 1)).await?;
        let mut series = new_event("series", at(1, 8), 1);
        series.recurrence_rule = Some("FREQ=DAILY".to_string());
        db.insert_event(user_id, &series).await?;

        let found = db.window_candidates(user_id, at(3, 0), at(4, 0)).await?;
        let titles: Vec<&str> = found.iter().map(|e| e.title.as_str()).collect();
        assert_eq!(titles, vec!["series", "overlapping"]);
        Ok(())
    }

    #[tokio::test]
    async fn test_search_filters() -> Result<()> {
        let (db, user_id) = db_with_user().await?;
        let mut alpha = new_event("Alpha Meeting", at(2, 9), 1);
        alpha.description = Some("Discuss project Alpha".to_string());
        alpha.color_tag = Some("work,important".to_string());
        db.insert_event(user_id, &alpha).await?;

        let mut beta = new_event("Beta Workshop", at(3, 9), 2);
        beta.color_tag = Some("learning".to_string());
        db.insert_event(user_id, &beta).await?;

        let by_keyword = db
            .search_events(user_id, &SearchFilter { keyword: Some("alpha".into()), ..Default::default() })
            .await?;
        assert_eq!(by_keyword.len(), 1);

        let by_tags = db
            .search_events(
                user_id,
                &SearchFilter { tags: vec!["urgent".into(), "LEARNING".into()], ..Default::default() },
            )
            .await?;
        assert_eq!(by_tags.len(), 1);
        assert_eq!(by_tags[0].title, "Beta Workshop");

        let by_range = db
            .search_events(
                user_id,
                &SearchFilter {
                    starts_after: Some(at(2, 0)),
                    ends_before: Some(at(2, 23)),
                    ..Default::default()
                },
            )
            .await?;
        assert_eq!(by_range.len(), 1);
        assert_eq!(by_range[0].title, "Alpha Meeting");
        Ok(())
    }

    #[tokio::test]
    async fn test_due_reminders_and_marking() -> Result<()> {
        let (db, user_id) = db_with_user().await?;
        let soon = db.insert_event(user_id, &new_event("soon", at(5, 10), 1)).await?;
        db.insert_event(user_id, &new_event("later", at(6, 10), 1)).await?;

        let due = db.due_reminders(at(5, 9), at(5, 11)).await?;
        assert_eq!(due.len(), 1);
        assert_eq!(due[0].event.id, soon.id);
        assert_eq!(due[0].email, "owner@example.com");

        assert_eq!(db.mark_reminders_sent(&[(soon.id, at(5, 10))]).await?, 1);
        assert!(db.due_reminders(at(5, 9), at(5, 11)).await?.is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn test_marking_ignores_moved_start() -> Result<()> {
        let (db, user_id) = db_with_user().await?;
        let event = db.insert_event(user_id, &new_event("moved", at(5, 10), 1)).await?;

        assert_eq!(db.mark_reminders_sent(&[(event.id, at(5, 9))]).await?, 0);
        assert!(!db.get_event(user_id, event.id).await?.unwrap().reminder_sent);
        Ok(())
    }

    #[tokio::test]
    async fn test_insert_truncates_to_millis() -> Result<()> {
        let (db, user_id) = db_with_user().await?;
        let start = at(1, 9) + Duration::microseconds(123_456);
        let inserted = db.insert_event(user_id, &new_event("precise", start, 1)).await?;

        assert_eq!(inserted.start_time, at(1, 9) + Duration::milliseconds(123));
        assert_eq!(db.get_event(user_id, inserted.id).await?.unwrap(), inserted);
        Ok(())
    }
}
