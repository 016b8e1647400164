//! Prompt templates. All user-supplied text is sanitized before it is
//! embedded.

use chrono::{DateTime, NaiveDate, Utc};

use super::utils::sanitize_user_input;

pub fn parse_event(text: &str, today: NaiveDate) -> String {
    let today = today.format("%Y-%m-%d");
    format!(
        r#"Extract event details from the following text.
Text: "{text}"

Today is {today}. Resolve relative dates such as "tomorrow" or "next Monday" against today; "next" means the upcoming day of the week.
If a time has no AM/PM, infer it from context; when ambiguous prefer AM for 8-11 and PM for 1-7.

Return a JSON object with these fields:
- "title": (string) the event title
- "date": (string) "YYYY-MM-DD"; use {today} when no date is given
- "start_time": (string) "HH:MM" 24-hour, or null
- "end_time": (string) "HH:MM" 24-hour, or null
- "description": (string) extra details, or null
- "location": (string) the location, or null

Set any field you cannot extract to null.
Respond with only the JSON object, no markdown."#,
        text = sanitize_user_input(text),
        today = today,
    )
}

pub fn suggest_tags(title: &str, description: Option<&str>) -> String {
    format!(
        r#"Suggest up to 5 short, lowercase tags that categorize this calendar event.
Title: "{}"
Description: "{}"

Respond with only a JSON array of strings, for example ["work", "meeting"]."#,
        sanitize_user_input(title),
        sanitize_user_input(description.unwrap_or("")),
    )
}

pub fn find_free_time(
    query: &str,
    events_json: &str,
    start: DateTime<Utc>,
    end: DateTime<Utc>,
    now: DateTime<Utc>,
) -> String {
    format!(
        r#"You help a user find free time in their calendar.
Current time (UTC): {now}
Search window (UTC): {start} to {end}
Request: "{query}"

Existing events (JSON, UTC times):
{events}

Suggest free time slots inside the search window that do not overlap any existing event and satisfy the request.
Respond with only a JSON array of objects with "start_time" and "end_time" as ISO 8601 UTC timestamps and an optional short "reason".
Respond with [] when nothing fits."#,
        now = now.format("%Y-%m-%dT%H:%M:%SZ"),
        start = start.format("%Y-%m-%dT%H:%M:%SZ"),
        end = end.format("%Y-%m-%dT%H:%M:%SZ"),
        query = sanitize_user_input(query),
        events = events_json,
    )
}

pub fn summarize(events_json: &str, target_date: Option<NaiveDate>) -> String {
    let period = match target_date {
        Some(date) => format!("on {}", date.format("%A, %B %-d, %Y")),
        None => "in the coming days".to_string(),
    };
    format!(
        r#"Write a short, friendly plain-text summary of the user's schedule {period}.
Mention the busiest times, any back-to-back events and anything that needs preparation.

Events (JSON, UTC times):
{events}

Respond with plain text only, no markdown."#,
        period = period,
        events = events_json,
    )
}

pub fn related_information(
    location: &str,
    start: DateTime<Utc>,
    title: Option<&str>,
    description: Option<&str>,
    wants_restaurants: bool,
) -> String {
    let suggestions = if wants_restaurants {
        "a list of up to 3 nearby restaurant suggestions, each an object with \"name\" and \"description\""
    } else {
        "an empty list []"
    };
    format!(
        r#"An event takes place at "{location}" starting {start} UTC.
Title: "{title}"
Description: "{description}"

Return a JSON object with exactly these keys:
- "weather": a short expected weather summary for that place and time
- "traffic": a short note on expected traffic or travel conditions
- "suggestions": {suggestions}
- "related_content": a list of up to 3 short related tips or links as strings

Respond with only the JSON object, no markdown."#,
        location = sanitize_user_input(location),
        start = start.format("%Y-%m-%d %H:%M"),
        title = sanitize_user_input(title.unwrap_or("")),
        description = sanitize_user_input(description.unwrap_or("")),
        suggestions = suggestions,
    )
}

pub fn suggest_subtasks(title: &str, description: Option<&str>) -> String {
    let mut prompt = format!(
        "Break the following task into a short list of concrete subtasks.\nTitle: \"{}\"\n",
        sanitize_user_input(title)
    );
    if let Some(description) = description.filter(|d| !d.trim().is_empty()) {
        prompt.push_str(&format!("Description: \"{}\"\n", sanitize_user_input(description)));
    }
    prompt.push_str("\nRespond with only a JSON array of strings.");
    prompt
}
