use anyhow::{anyhow, Result};
use axum::{
    extract::{FromRequest, FromRequestParts, Path, Query, Request, State},
    http::{request::Parts, StatusCode},
    routing::{get, post},
    Json, Router,
};
use chrono::{DateTime, Duration, NaiveDate, Utc};
use log::{debug, info, warn};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{json, Value};
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::cors::{Any, CorsLayer};

use crate::assistant::{Assistant, FreeSlot, GeminiClient, ParsedEvent};
use crate::auth::{hash_password, validate_email, verify_password, AuthUser, TokenKeys};
use crate::config::Config;
use crate::datetime::{from_millis, parse_datetime, parse_instant, to_millis};
use crate::env_manager::Secrets;
use crate::error::ApiError;
use crate::events::{expand_events, validate_rule, Event, EventView, NewEvent, SearchFilter, Window};
use crate::reminders::{build_mailer, spawn_reminder_loop, Mailer};
use crate::storage::Database;

const NOT_FOUND_MSG: &str = "Event not found or access denied";
const DEFAULT_LOOKAHEAD_DAYS: i64 = 7;
const MAX_TEXT_CHARS: usize = 1000;

/// State shared by every handler.
pub struct AppState {
    pub config: Config,
    pub db: Database,
    pub tokens: TokenKeys,
    pub assistant: Option<Arc<Assistant>>,
    pub mailer: Arc<dyn Mailer>,
}

impl AppState {
    /// Wire up the database, token keys, assistant and mailer from config
    /// and secrets.
    pub fn from_config(config: Config, secrets: &Secrets) -> Result<Self> {
        let db = Database::open(&config.database.path)?;
        info!("Using database at {:?}", config.database.path);

        let tokens = TokenKeys::new(&secrets.jwt_secret, config.auth.token_lifetime_minutes)?;
        let assistant = match &secrets.gemini_api_key {
            Some(key) => {
                let client = GeminiClient::new(key, &config.assistant)?;
                info!("Assistant enabled with model {}", config.assistant.model);
                Some(Arc::new(Assistant::new(Arc::new(client))))
            }
            None => None,
        };
        let mailer = build_mailer(&config.mail, secrets.mail_password.as_ref())?;

        Ok(Self { config, db, tokens, assistant, mailer })
    }

    fn assistant(&self) -> Result<&Assistant, ApiError> {
        self.assistant.as_deref().ok_or(ApiError::AssistantUnavailable)
    }
}

// Extractors whose rejections render as `{"msg": ...}` like every other error.

pub struct ApiJson<T>(pub T);

impl<T, S> FromRequest<S> for ApiJson<T>
where
    T: DeserializeOwned + Send,
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        let Json(value) = Json::<T>::from_request(req, state).await?;
        Ok(Self(value))
    }
}

pub struct ApiPath<T>(pub T);

impl<T, S> FromRequestParts<S> for ApiPath<T>
where
    T: DeserializeOwned + Send,
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let Path(value) = Path::<T>::from_request_parts(parts, state).await?;
        Ok(Self(value))
    }
}

pub struct ApiQuery<T>(pub T);

impl<T, S> FromRequestParts<S> for ApiQuery<T>
where
    T: DeserializeOwned + Send,
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let Query(value) = Query::<T>::from_request_parts(parts, state).await?;
        Ok(Self(value))
    }
}

// Request bodies and query strings. Every field is optional so missing
// values produce our own 400 messages.

#[derive(Debug, Deserialize)]
pub struct CredentialsRequest {
    pub email: Option<String>,
    pub password: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct CreateEventRequest {
    pub title: Option<String>,
    pub start_time: Option<String>,
    pub end_time: Option<String>,
    pub description: Option<String>,
    pub color_tag: Option<String>,
    pub location: Option<String>,
    pub recurrence_rule: Option<String>,
}

/// Partial update. `None` keeps a field; `Some(None)` clears it.
#[derive(Debug, Default, Deserialize)]
pub struct UpdateEventRequest {
    pub title: Option<String>,
    pub start_time: Option<String>,
    pub end_time: Option<String>,
    #[serde(default, deserialize_with = "double_option")]
    pub description: Option<Option<String>>,
    #[serde(default, deserialize_with = "double_option")]
    pub color_tag: Option<Option<String>>,
    #[serde(default, deserialize_with = "double_option")]
    pub location: Option<Option<String>>,
    #[serde(default, deserialize_with = "double_option")]
    pub recurrence_rule: Option<Option<String>>,
}

fn double_option<'de, T, D>(deserializer: D) -> Result<Option<Option<T>>, D::Error>
where
    T: Deserialize<'de>,
    D: Deserializer<'de>,
{
    Deserialize::deserialize(deserializer).map(Some)
}

#[derive(Debug, Deserialize)]
pub struct RangeQuery {
    pub start_date: Option<String>,
    pub end_date: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct SearchQuery {
    pub q: Option<String>,
    pub start_date: Option<String>,
    pub end_date: Option<String>,
    pub tags: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct TextRequest {
    pub text: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct TitledRequest {
    pub title: Option<String>,
    pub description: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct FreeTimeRequest {
    pub query: Option<String>,
    pub start_date: Option<String>,
    pub end_date: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct SummaryQuery {
    pub date: Option<String>,
}

#[derive(Serialize)]
pub struct TokenResponse {
    pub access_token: String,
}

fn message(msg: &str) -> Json<Value> {
    Json(json!({ "msg": msg }))
}

/// Trimmed, non-empty text.
fn present(value: Option<String>) -> Option<String> {
    value.map(|v| v.trim().to_string()).filter(|v| !v.is_empty())
}

/// Parse an event time, truncated to the millisecond precision it is stored with.
fn parse_time_field(value: &str, field: &str) -> Result<DateTime<Utc>, ApiError> {
    parse_datetime(value)
        .map(|t| from_millis(to_millis(&t)))
        .ok_or_else(|| ApiError::bad_request(format!("Invalid {} format", field)))
}

fn normalize_rule(rule: Option<String>, start: DateTime<Utc>) -> Result<Option<String>, ApiError> {
    match present(rule) {
        Some(rule) => validate_rule(&rule, start)
            .map(Some)
            .map_err(|e| ApiError::bad_request(e.to_string())),
        None => Ok(None),
    }
}

/// Window from optional `start_date`/`end_date` strings. A missing start
/// is `now`, a missing end is `start + 7 days`.
fn window_from(
    start: Option<&str>,
    end: Option<&str>,
    now: DateTime<Utc>,
) -> Result<Window, ApiError> {
    let start = match start.filter(|s| !s.trim().is_empty()) {
        Some(s) => parse_instant(s).ok_or_else(|| ApiError::bad_request("Invalid start_date format"))?.as_start(),
        None => now,
    };
    let end = match end.filter(|s| !s.trim().is_empty()) {
        Some(s) => parse_instant(s).ok_or_else(|| ApiError::bad_request("Invalid end_date format"))?.as_end(),
        None => start + Duration::days(DEFAULT_LOOKAHEAD_DAYS),
    };
    if end < start {
        return Err(ApiError::bad_request("end_date cannot be before start_date"));
    }
    Ok(Window::new(start, end))
}

async fn events_in_window(db: &Database, user_id: i64, window: &Window) -> Result<Vec<EventView>> {
    let candidates = db.window_candidates(user_id, window.start, window.end).await?;
    Ok(expand_events(&candidates, window))
}

async fn owned_event(state: &AppState, user: AuthUser, event_id: i64) -> Result<Event, ApiError> {
    state
        .db
        .get_event(user.id, event_id)
        .await?
        .ok_or_else(|| ApiError::not_found(NOT_FOUND_MSG))
}

async fn health_check() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}

// Auth

async fn register_handler(
    State(state): State<Arc<AppState>>,
    ApiJson(request): ApiJson<CredentialsRequest>,
) -> Result<(StatusCode, Json<Value>), ApiError> {
    let (Some(email), Some(password)) = (present(request.email), request.password.filter(|p| !p.is_empty())) else {
        return Err(ApiError::bad_request("Email and password are required"));
    };
    if !validate_email(&email) {
        return Err(ApiError::bad_request("Invalid email format"));
    }

    let rounds = state.config.auth.password_hash_rounds;
    let hash = tokio::task::spawn_blocking(move || hash_password(&password, rounds))
        .await
        .map_err(|e| anyhow!("Password hashing task failed: {}", e))?;

    match state.db.create_user(&email, &hash, Utc::now()).await? {
        Some(user) => {
            info!("Registered user {}", user.id);
            Ok((StatusCode::CREATED, message("User created successfully")))
        }
        None => Err(ApiError::bad_request("Email already exists")),
    }
}

async fn login_handler(
    State(state): State<Arc<AppState>>,
    ApiJson(request): ApiJson<CredentialsRequest>,
) -> Result<Json<TokenResponse>, ApiError> {
    let rejected = || ApiError::Unauthorized("Bad email or password".to_string());
    let (Some(email), Some(password)) = (present(request.email), request.password) else {
        return Err(rejected());
    };
    let user = state.db.find_user_by_email(&email).await?.ok_or_else(rejected)?;

    let stored = user.password_hash.clone();
    let matches = tokio::task::spawn_blocking(move || verify_password(&password, &stored))
        .await
        .map_err(|e| anyhow!("Password verification task failed: {}", e))??;
    if !matches {
        debug!("Failed login for user {}", user.id);
        return Err(rejected());
    }

    let access_token = state.tokens.issue(user.id, Utc::now())?;
    Ok(Json(TokenResponse { access_token }))
}

async fn logout_handler(_user: AuthUser) -> Json<Value> {
    message("Logout successful")
}

async fn me_handler(State(state): State<Arc<AppState>>, user: AuthUser) -> Result<Json<Value>, ApiError> {
    let found = state
        .db
        .find_user(user.id)
        .await?
        .ok_or_else(|| ApiError::not_found("User not found"))?;
    Ok(Json(json!({ "logged_in_as": found.email, "user_id": found.id })))
}

// Events

async fn create_event_handler(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    ApiJson(request): ApiJson<CreateEventRequest>,
) -> Result<(StatusCode, Json<EventView>), ApiError> {
    let (Some(title), Some(start), Some(end)) =
        (present(request.title), present(request.start_time), present(request.end_time))
    else {
        return Err(ApiError::bad_request("Title, start time, and end time are required"));
    };

    let start_time = parse_time_field(&start, "start_time")?;
    let end_time = parse_time_field(&end, "end_time")?;
    if end_time < start_time {
        return Err(ApiError::bad_request("End time cannot be before start time"));
    }

    let new = NewEvent {
        title,
        start_time,
        end_time,
        description: request.description,
        color_tag: present(request.color_tag),
        location: present(request.location),
        recurrence_rule: normalize_rule(request.recurrence_rule, start_time)?,
    };
    let event = state.db.insert_event(user.id, &new).await?;
    info!("User {} created event {}", user.id, event.id);
    Ok((StatusCode::CREATED, Json(event.view())))
}

async fn list_events_handler(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    ApiQuery(query): ApiQuery<RangeQuery>,
) -> Result<Json<Vec<EventView>>, ApiError> {
    let (Some(start), Some(end)) = (present(query.start_date), present(query.end_date)) else {
        return Err(ApiError::bad_request(
            "Start and end date are required for fetching events with recurrence.",
        ));
    };
    let window = window_from(Some(&start), Some(&end), Utc::now())?;
    let views = events_in_window(&state.db, user.id, &window).await?;
    Ok(Json(views))
}

async fn get_event_handler(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    ApiPath(event_id): ApiPath<i64>,
) -> Result<Json<EventView>, ApiError> {
    let event = owned_event(&state, user, event_id).await?;
    Ok(Json(event.view()))
}

async fn update_event_handler(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    ApiPath(event_id): ApiPath<i64>,
    ApiJson(update): ApiJson<UpdateEventRequest>,
) -> Result<Json<EventView>, ApiError> {
    let mut event = owned_event(&state, user, event_id).await?;

    if let Some(title) = update.title {
        let title = title.trim().to_string();
        if title.is_empty() {
            return Err(ApiError::bad_request("Title cannot be empty"));
        }
        event.title = title;
    }
    let mut start_changed = false;
    if let Some(start) = update.start_time {
        let start_time = parse_time_field(&start, "start_time")?;
        if start_time != event.start_time {
            event.reminder_sent = false;
            start_changed = true;
        }
        event.start_time = start_time;
    }
    if let Some(end) = update.end_time {
        event.end_time = parse_time_field(&end, "end_time")?;
    }
    if event.end_time < event.start_time {
        return Err(ApiError::bad_request("End time cannot be before start time"));
    }

    if let Some(description) = update.description {
        event.description = description;
    }
    if let Some(color_tag) = update.color_tag {
        event.color_tag = present(color_tag);
    }
    if let Some(location) = update.location {
        event.location = present(location);
    }
    let rule_changed = update.recurrence_rule.is_some();
    if let Some(rule) = update.recurrence_rule {
        event.recurrence_rule = rule;
    }
    if rule_changed || start_changed {
        event.recurrence_rule = normalize_rule(event.recurrence_rule.take(), event.start_time)?;
    }

    state.db.update_event(&event).await?;
    debug!("User {} updated event {}", user.id, event.id);
    Ok(Json(event.view()))
}

async fn delete_event_handler(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    ApiPath(event_id): ApiPath<i64>,
) -> Result<Json<Value>, ApiError> {
    if !state.db.delete_event(user.id, event_id).await? {
        return Err(ApiError::not_found(NOT_FOUND_MSG));
    }
    info!("User {} deleted event {}", user.id, event_id);
    Ok(message("Event deleted successfully"))
}

async fn search_events_handler(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    ApiQuery(query): ApiQuery<SearchQuery>,
) -> Result<Json<Vec<EventView>>, ApiError> {
    let starts_after = match present(query.start_date) {
        Some(s) => Some(parse_instant(&s).ok_or_else(|| ApiError::bad_request("Invalid start_date format"))?.as_start()),
        None => None,
    };
    let ends_before = match present(query.end_date) {
        Some(s) => Some(parse_instant(&s).ok_or_else(|| ApiError::bad_request("Invalid end_date format"))?.as_end()),
        None => None,
    };
    let tags = query
        .tags
        .as_deref()
        .unwrap_or("")
        .split(',')
        .map(|t| t.trim().to_string())
        .filter(|t| !t.is_empty())
        .collect();

    let filter = SearchFilter { keyword: present(query.q), starts_after, ends_before, tags };
    let events = state.db.search_events(user.id, &filter).await?;
    Ok(Json(events.iter().map(Event::view).collect()))
}

// Assistant

async fn parse_natural_language_handler(
    State(state): State<Arc<AppState>>,
    _user: AuthUser,
    ApiJson(request): ApiJson<TextRequest>,
) -> Result<Json<ParsedEvent>, ApiError> {
    let text = present(request.text).ok_or_else(|| ApiError::bad_request("Text input is required"))?;
    if text.chars().count() > MAX_TEXT_CHARS {
        return Err(ApiError::bad_request(format!("Input too long (max {} characters)", MAX_TEXT_CHARS)));
    }
    let assistant = state.assistant()?;
    let parsed = assistant
        .parse_event_text(&text, Utc::now().date_naive())
        .await
        .map_err(|e| ApiError::from_assistant("Error parsing event with Gemini", e))?;
    Ok(Json(parsed))
}

async fn suggest_tags_handler(
    State(state): State<Arc<AppState>>,
    _user: AuthUser,
    ApiJson(request): ApiJson<TitledRequest>,
) -> Result<Json<Value>, ApiError> {
    let title = present(request.title).ok_or_else(|| ApiError::bad_request("Title is required"))?;
    let assistant = state.assistant()?;
    let tags = assistant.suggest_tags(&title, request.description.as_deref()).await;
    Ok(Json(json!({ "tags": tags })))
}

async fn find_free_time_handler(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    ApiJson(request): ApiJson<FreeTimeRequest>,
) -> Result<Json<Vec<FreeSlot>>, ApiError> {
    let query = present(request.query)
        .ok_or_else(|| ApiError::bad_request("Natural language query ('query') is required"))?;
    let now = Utc::now();
    let window = window_from(request.start_date.as_deref(), request.end_date.as_deref(), now)?;
    let assistant = state.assistant()?;

    let events = events_in_window(&state.db, user.id, &window)
        .await
        .map_err(|e| ApiError::internal("Error fetching user events", Some(e.to_string())))?;
    let events_json = serde_json::to_string(&events)
        .map_err(|e| ApiError::internal("Error fetching user events", Some(e.to_string())))?;

    let slots = assistant
        .find_free_time_slots(&query, &events_json, window.start, window.end, now)
        .await
        .map_err(|e| ApiError::from_assistant("Error finding free time slots with Gemini", e))?;
    Ok(Json(slots))
}

async fn summary_handler(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    ApiQuery(query): ApiQuery<SummaryQuery>,
) -> Result<Json<Value>, ApiError> {
    let now = Utc::now();
    let (window, target_date): (Window, Option<NaiveDate>) = match present(query.date) {
        Some(date) => {
            let day = parse_instant(&date)
                .ok_or_else(|| ApiError::bad_request("Invalid date format"))?
                .as_start()
                .date_naive();
            let start = day.and_hms_opt(0, 0, 0).map(|d| d.and_utc()).unwrap_or(now);
            (Window::new(start, start + Duration::days(1) - Duration::microseconds(1)), Some(day))
        }
        None => (Window::new(now, now + Duration::days(DEFAULT_LOOKAHEAD_DAYS)), None),
    };
    let assistant = state.assistant()?;

    let events = events_in_window(&state.db, user.id, &window).await?;
    if events.is_empty() {
        let summary = match target_date {
            Some(day) => format!("You have no events scheduled on {}.", day.format("%Y-%m-%d")),
            None => "You have no events scheduled in the next 7 days.".to_string(),
        };
        return Ok(Json(json!({ "summary": summary })));
    }

    let events_json = serde_json::to_string(&events).map_err(|e| anyhow!(e))?;
    let summary = assistant
        .summarize_events(&events_json, target_date)
        .await
        .map_err(|e| ApiError::from_assistant("Error summarizing events with Gemini", e))?;
    Ok(Json(json!({ "summary": summary })))
}

async fn related_info_handler(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    ApiPath(event_id): ApiPath<i64>,
) -> Result<Json<Value>, ApiError> {
    let event = owned_event(&state, user, event_id).await?;
    let Some(location) = event.location.as_deref().filter(|l| !l.trim().is_empty()) else {
        return Err(ApiError::bad_request("Event has no location"));
    };
    let assistant = state.assistant()?;

    let info = assistant
        .get_related_information(location, event.start_time, Some(&event.title), event.description.as_deref())
        .await
        .map_err(|e| ApiError::from_assistant("Error fetching related information with Gemini", e))?;
    Ok(Json(Value::Object(info)))
}

async fn suggest_subtasks_handler(
    State(state): State<Arc<AppState>>,
    _user: AuthUser,
    ApiJson(request): ApiJson<TitledRequest>,
) -> Result<Json<Value>, ApiError> {
    let title = present(request.title).ok_or_else(|| ApiError::bad_request("Title is required"))?;
    let assistant = state.assistant()?;
    let subtasks = assistant
        .suggest_subtasks(&title, request.description.as_deref())
        .await
        .map_err(|e| ApiError::from_assistant("Error suggesting subtasks with Gemini", e))?;
    Ok(Json(json!({ "subtasks": subtasks })))
}

pub fn build_router(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new().allow_origin(Any).allow_methods(Any).allow_headers(Any);

    Router::new()
        .route("/health", get(health_check))
        .route("/api/auth/register", post(register_handler))
        .route("/api/auth/login", post(login_handler))
        .route("/api/auth/logout", post(logout_handler))
        .route("/api/auth/me", get(me_handler))
        .route("/api/events", get(list_events_handler).post(create_event_handler))
        .route("/api/events/search", get(search_events_handler))
        .route("/api/events/parse-natural-language", post(parse_natural_language_handler))
        .route("/api/events/suggest-tags", post(suggest_tags_handler))
        .route("/api/events/find-free-time", post(find_free_time_handler))
        .route("/api/events/summary", get(summary_handler))
        .route("/api/events/suggest-subtasks", post(suggest_subtasks_handler))
        .route(
            "/api/events/{id}",
            get(get_event_handler).put(update_event_handler).delete(delete_event_handler),
        )
        .route("/api/events/{id}/related-info", get(related_info_handler))
        .layer(cors)
        .with_state(state)
}

pub async fn start_api_server(config: Config, secrets: Secrets) -> Result<()> {
    let addr = format!("{}:{}", config.server.host, config.server.port);
    let state = Arc::new(AppState::from_config(config, &secrets)?);
    if state.assistant.is_none() {
        warn!("GEMINI_API_KEY not configured; assistant endpoints will return 503");
    }

    let _reminders = spawn_reminder_loop(
        state.db.clone(),
        state.mailer.clone(),
        state.config.reminders.clone(),
        state.config.mail.default_sender.clone(),
    );

    let app = build_router(state);

    info!("API server starting on http://{}", addr);
    let listener = TcpListener::bind(&addr)
        .await
        .map_err(|e| anyhow!("Failed to bind to address {}: {}", addr, e))?;

    info!("API server successfully bound to {}. Waiting for connections...", addr);
    axum::serve(listener, app)
        .await
        .map_err(|e| anyhow!("Failed to start API server: {}", e))?;

    Ok(())
}
