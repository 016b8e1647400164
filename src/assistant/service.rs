use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use log::{debug, warn};
use serde::Serialize;
use serde_json::{Map, Value};
use std::sync::Arc;

use super::utils::{mentions_meal, strip_code_fences};
use super::{prompts, AssistantError, LanguageModel};

const DEFAULT_TAG: &str = "general";
const RELATED_KEYS: [&str; 4] = ["weather", "traffic", "suggestions", "related_content"];

/// Event fields extracted from free text. Every field may be missing.
#[derive(Debug, Clone, Default, Serialize, PartialEq)]
pub struct ParsedEvent {
    pub title: Option<String>,
    pub date: Option<String>,
    pub start_time: Option<String>,
    pub end_time: Option<String>,
    pub description: Option<String>,
    pub location: Option<String>,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct FreeSlot {
    pub start_time: String,
    pub end_time: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

/// Builds prompts, calls the model and validates what comes back.
pub struct Assistant {
    model: Arc<dyn LanguageModel>,
}

fn parse_json(raw: &str) -> Result<Value, AssistantError> {
    serde_json::from_str(strip_code_fences(raw)).map_err(|e| {
        debug!("Unparseable model response: {}", raw);
        AssistantError::InvalidJson { reason: e.to_string(), raw: raw.to_string() }
    })
}

fn string_field(object: &Map<String, Value>, key: &str) -> Option<String> {
    object
        .get(key)
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

fn normalize_date(value: Option<String>) -> Option<String> {
    let value = value?;
    match NaiveDate::parse_from_str(&value, "%Y-%m-%d") {
        Ok(date) => Some(date.format("%Y-%m-%d").to_string()),
        Err(_) => {
            warn!("Dropping malformed date from model: {}", value);
            None
        }
    }
}

fn normalize_time(value: Option<String>) -> Option<String> {
    let value = value?;
    let parsed = NaiveTime::parse_from_str(&value, "%H:%M")
        .or_else(|_| NaiveTime::parse_from_str(&value, "%H:%M:%S"));
    match parsed {
        Ok(time) => Some(time.format("%H:%M").to_string()),
        Err(_) => {
            warn!("Dropping malformed time from model: {}", value);
            None
        }
    }
}

impl Assistant {
    pub fn new(model: Arc<dyn LanguageModel>) -> Self {
        Self { model }
    }

    pub async fn parse_event_text(&self, text: &str, today: NaiveDate) -> Result<ParsedEvent, AssistantError> {
        let raw = self.model.generate(&prompts::parse_event(text, today)).await?;
        let value = parse_json(&raw)?;
        let Value::Object(object) = value else {
            return Err(AssistantError::UnexpectedStructure("expected a JSON object".to_string()));
        };

        Ok(ParsedEvent {
            title: string_field(&object, "title"),
            date: normalize_date(string_field(&object, "date")),
            start_time: normalize_time(string_field(&object, "start_time")),
            end_time: normalize_time(string_field(&object, "end_time")),
            description: string_field(&object, "description"),
            location: string_field(&object, "location"),
        })
    }

    /// Lowercase tags for an event. Never fails: any problem yields the
    /// default tag.
    pub async fn suggest_tags(&self, title: &str, description: Option<&str>) -> Vec<String> {
        match self.try_suggest_tags(title, description).await {
            Ok(tags) => tags,
            Err(e) => {
                warn!("Tag suggestion failed, using default: {}", e);
                vec![DEFAULT_TAG.to_string()]
            }
        }
    }

    async fn try_suggest_tags(&self, title: &str, description: Option<&str>) -> Result<Vec<String>, AssistantError> {
        let raw = self.model.generate(&prompts::suggest_tags(title, description)).await?;
        if raw.trim().is_empty() {
            return Err(AssistantError::EmptyResponse);
        }
        let Value::Array(items) = parse_json(&raw)? else {
            return Err(AssistantError::UnexpectedStructure("expected a list of tags".to_string()));
        };

        let mut tags: Vec<String> = Vec::new();
        for item in items {
            let Some(tag) = item.as_str().map(|t| t.trim().to_lowercase()) else {
                continue;
            };
            if !tag.is_empty() && !tags.contains(&tag) {
                tags.push(tag);
            }
        }
        Ok(tags)
    }

    pub async fn find_free_time_slots(
        &self,
        query: &str,
        events_json: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<Vec<FreeSlot>, AssistantError> {
        let prompt = prompts::find_free_time(query, events_json, start, end, now);
        let raw = self.model.generate(&prompt).await?;
        if raw.trim().is_empty() {
            return Ok(Vec::new());
        }
        let Value::Array(items) = parse_json(&raw)? else {
            return Err(AssistantError::UnexpectedStructure("expected a list of time slots".to_string()));
        };

        let slots = items
            .iter()
            .filter_map(|item| {
                let object = item.as_object()?;
                let slot = FreeSlot {
                    start_time: string_field(object, "start_time")?,
                    end_time: string_field(object, "end_time")?,
                    reason: string_field(object, "reason"),
                };
                Some(slot)
            })
            .collect::<Vec<_>>();
        if slots.len() < items.len() {
            warn!("Dropped {} malformed free time slots", items.len() - slots.len());
        }
        Ok(slots)
    }

    /// Plain-text summary of a JSON array of events.
    pub async fn summarize_events(
        &self,
        events_json: &str,
        target_date: Option<NaiveDate>,
    ) -> Result<String, AssistantError> {
        let trimmed = events_json.trim();
        if trimmed.is_empty() || trimmed == "null" {
            return Err(AssistantError::InvalidInput("No events provided for summary.".to_string()));
        }
        let value: Value = serde_json::from_str(trimmed)
            .map_err(|_| AssistantError::InvalidInput("Invalid JSON format for events_list_str.".to_string()))?;
        let Value::Array(events) = value else {
            return Err(AssistantError::InvalidInput("Invalid data type for events_list_str.".to_string()));
        };
        if events.is_empty() {
            return Err(AssistantError::InvalidInput("No events provided for summary.".to_string()));
        }

        let raw = self.model.generate(&prompts::summarize(trimmed, target_date)).await?;
        let summary = raw.trim();
        if summary.is_empty() {
            return Err(AssistantError::EmptyResponse);
        }
        Ok(summary.to_string())
    }

    /// Weather, traffic, suggestions and related content for an event.
    pub async fn get_related_information(
        &self,
        location: &str,
        start: DateTime<Utc>,
        title: Option<&str>,
        description: Option<&str>,
    ) -> Result<Map<String, Value>, AssistantError> {
        let wants_restaurants = mentions_meal(&[title, description]);
        let prompt = prompts::related_information(location, start, title, description, wants_restaurants);
        let raw = self.model.generate(&prompt).await?;
        if raw.trim().is_empty() {
            return Err(AssistantError::EmptyResponse);
        }
        let Value::Object(mut info) = parse_json(&raw)? else {
            return Err(AssistantError::UnexpectedStructure("expected a JSON object".to_string()));
        };

        let missing: Vec<&str> = RELATED_KEYS.iter().copied().filter(|k| !info.contains_key(*k)).collect();
        if !missing.is_empty() {
            return Err(AssistantError::UnexpectedStructure(format!(
                "Missing one or more top-level keys: {}",
                missing.join(", ")
            )));
        }
        for key in ["suggestions", "related_content"] {
            if !info.get(key).is_some_and(Value::is_array) {
                info.insert(key.to_string(), Value::Array(Vec::new()));
            }
        }
        Ok(info)
    }

    pub async fn suggest_subtasks(&self, title: &str, description: Option<&str>) -> Result<Vec<String>, AssistantError> {
        let raw = self.model.generate(&prompts::suggest_subtasks(title, description)).await?;
        if raw.trim().is_empty() {
            return Ok(Vec::new());
        }
        let Value::Array(items) = parse_json(&raw)? else {
            return Err(AssistantError::UnexpectedStructure("expected a list of subtasks".to_string()));
        };
        items
            .into_iter()
            .map(|item| match item {
                Value::String(s) => Ok(s),
                _ => Err(AssistantError::UnexpectedStructure("subtasks must be strings".to_string())),
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use chrono::TimeZone;
    use pretty_assertions::assert_eq;
    use std::sync::Mutex;

    /// Returns canned responses and records the prompts it saw.
    struct Scripted {
        reply: Result<String, String>,
        prompts: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl LanguageModel for Scripted {
        async fn generate(&self, prompt: &str) -> Result<String, AssistantError> {
            self.prompts.lock().unwrap().push(prompt.to_string());
            self.reply.clone().map_err(AssistantError::Api)
        }
    }

    fn replying(reply: &str) -> (Assistant, Arc<Scripted>) {
        let model = Arc::new(Scripted { reply: Ok(reply.to_string()), prompts: Mutex::new(Vec::new()) });
        (Assistant::new(model.clone()), model)
    }

    fn failing() -> Assistant {
        Assistant::new(Arc::new(Scripted { reply: Err("boom".to_string()), prompts: Mutex::new(Vec::new()) }))
    }

    fn today() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 6, 3).unwrap()
    }

    fn noon() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 3, 12, 0, 0).unwrap()
    }

    #[tokio::test]
    async fn test_parse_event_text_full() {
        let (assistant, _) = replying(
            "```json\n{\"title\": \"Meeting with Alex\", \"date\": \"2024-06-04\", \"start_time\": \"15:00\", \
             \"end_time\": null, \"description\": \"discuss project Alpha\", \"location\": \"main office\"}\n```",
        );
        let parsed = assistant.parse_event_text("Meeting with Alex tomorrow at 3pm", today()).await.unwrap();
        assert_eq!(
            parsed,
            ParsedEvent {
                title: Some("Meeting with Alex".into()),
                date: Some("2024-06-04".into()),
                start_time: Some("15:00".into()),
                end_time: None,
                description: Some("discuss project Alpha".into()),
                location: Some("main office".into()),
            }
        );
    }

    #[tokio::test]
    async fn test_parse_event_text_edge_cases() {
        let (assistant, _) = replying("{}");
        assert_eq!(assistant.parse_event_text("x", today()).await.unwrap(), ParsedEvent::default());

        let (assistant, _) = replying("{\"title\": \"t\", \"date\": \"next tuesday\", \"start_time\": \"25:99\"}");
        let parsed = assistant.parse_event_text("x", today()).await.unwrap();
        assert_eq!(parsed.date, None);
        assert_eq!(parsed.start_time, None);

        let (assistant, _) = replying("");
        assert!(matches!(assistant.parse_event_text("x", today()).await, Err(AssistantError::InvalidJson { .. })));

        let (assistant, _) = replying("Sure! Here is your event.");
        match assistant.parse_event_text("x", today()).await {
            Err(AssistantError::InvalidJson { raw, .. }) => assert_eq!(raw, "Sure! Here is your event."),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_suggest_tags() {
        let (assistant, _) = replying("[\"Work\", \"meeting\", \"work\", 3]");
        assert_eq!(assistant.suggest_tags("Standup", None).await, vec!["work", "meeting"]);

        let (assistant, _) = replying("[]");
        assert!(assistant.suggest_tags("Standup", None).await.is_empty());

        for reply in ["", "not json", "{\"tags\": []}"] {
            let (assistant, _) = replying(reply);
            assert_eq!(assistant.suggest_tags("Standup", None).await, vec!["general"]);
        }
        assert_eq!(failing().suggest_tags("Standup", None).await, vec!["general"]);
    }

    #[tokio::test]
    async fn test_find_free_time_slots() {
        let (assistant, model) = replying(
            "[{\"start_time\": \"2024-06-04T09:00:00Z\", \"end_time\": \"2024-06-04T10:00:00Z\", \"reason\": \"Morning is free\"}, {\"start_time\": 5}]",
        );
        let slots = assistant
            .find_free_time_slots("an hour tomorrow", "[]", noon(), noon() + chrono::Duration::days(7), noon())
            .await
            .unwrap();
        assert_eq!(
            slots,
            vec![FreeSlot {
                start_time: "2024-06-04T09:00:00Z".into(),
                end_time: "2024-06-04T10:00:00Z".into(),
                reason: Some("Morning is free".into()),
            }]
        );
        assert!(model.prompts.lock().unwrap()[0].contains("an hour tomorrow"));

        let (assistant, _) = replying("  ");
        assert!(assistant.find_free_time_slots("q", "[]", noon(), noon(), noon()).await.unwrap().is_empty());

        let (assistant, _) = replying("{\"slots\": []}");
        assert!(matches!(
            assistant.find_free_time_slots("q", "[]", noon(), noon(), noon()).await,
            Err(AssistantError::UnexpectedStructure(_))
        ));
    }

    #[tokio::test]
    async fn test_summarize_events_input_validation() {
        let (assistant, model) = replying("  A quiet day.  ");
        for (input, expected) in [
            ("", "No events provided for summary."),
            ("null", "No events provided for summary."),
            ("[]", "No events provided for summary."),
            ("[{", "Invalid JSON format for events_list_str."),
            ("{\"a\": 1}", "Invalid data type for events_list_str."),
        ] {
            match assistant.summarize_events(input, None).await {
                Err(AssistantError::InvalidInput(msg)) => assert_eq!(msg, expected),
                other => panic!("unexpected {:?} for {:?}", other, input),
            }
        }
        assert!(model.prompts.lock().unwrap().is_empty());

        let summary = assistant.summarize_events("[{\"title\": \"Gym\"}]", Some(today())).await.unwrap();
        assert_eq!(summary, "A quiet day.");
        assert!(model.prompts.lock().unwrap()[0].contains("June 3, 2024"));

        let (assistant, _) = replying("");
        let err = assistant.summarize_events("[{\"title\": \"Gym\"}]", None).await.unwrap_err();
        assert_eq!(err.to_string(), "Gemini API returned an empty response");
    }

    #[tokio::test]
    async fn test_get_related_information() {
        let (assistant, model) = replying(
            "{\"weather\": \"Sunny\", \"traffic\": \"Light\", \"suggestions\": \"none\", \"related_content\": [\"Bring water\"]}",
        );
        let info = assistant
            .get_related_information("Central Park", noon(), Some("Picnic lunch"), None)
            .await
            .unwrap();
        assert_eq!(info["weather"], "Sunny");
        assert_eq!(info["suggestions"], Value::Array(vec![]));
        assert_eq!(info["related_content"][0], "Bring water");
        assert!(model.prompts.lock().unwrap()[0].contains("restaurant"));

        let (assistant, _) = replying("{\"weather\": \"Rain\"}");
        match assistant.get_related_information("Office", noon(), Some("Review"), None).await {
            Err(AssistantError::UnexpectedStructure(msg)) => {
                assert_eq!(msg, "Missing one or more top-level keys: traffic, suggestions, related_content")
            }
            other => panic!("unexpected {:?}", other),
        }

        let (assistant, _) = replying("");
        assert!(matches!(
            assistant.get_related_information("Office", noon(), None, None).await,
            Err(AssistantError::EmptyResponse)
        ));
    }

    #[tokio::test]
    async fn test_suggest_subtasks() {
        let (assistant, model) = replying("[\"Book venue\", \"Send invites\"]");
        let subtasks = assistant.suggest_subtasks("Plan party", None).await.unwrap();
        assert_eq!(subtasks, vec!["Book venue", "Send invites"]);
        assert!(!model.prompts.lock().unwrap()[0].contains("Description:"));

        let (assistant, _) = replying("");
        assert!(assistant.suggest_subtasks("Plan party", None).await.unwrap().is_empty());

        let (assistant, _) = replying("[\"ok\", 1]");
        assert!(matches!(
            assistant.suggest_subtasks("Plan party", None).await,
            Err(AssistantError::UnexpectedStructure(_))
        ));

        let (assistant, _) = replying("nope");
        assert!(matches!(
            assistant.suggest_subtasks("Plan party", None).await,
            Err(AssistantError::InvalidJson { .. })
        ));

        assert!(matches!(failing().suggest_subtasks("x", None).await, Err(AssistantError::Api(_))));
    }
}
