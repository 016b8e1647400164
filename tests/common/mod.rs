#![allow(dead_code)]

use anyhow::Result;
use async_trait::async_trait;
use axum::body::{to_bytes, Body};
use axum::http::{header, Method, Request, StatusCode};
use axum::Router;
use secrecy::SecretString;
use serde_json::Value;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use tower::ServiceExt;

use scheduler::assistant::{Assistant, AssistantError, LanguageModel};
use scheduler::auth::TokenKeys;
use scheduler::reminders::{Mailer, OutgoingMail};
use scheduler::{build_router, AppState, Config, Database};

/// Model that replays queued replies in order and records every prompt.
#[derive(Default)]
pub struct ScriptedModel {
    replies: Mutex<VecDeque<Result<String, String>>>,
    pub prompts: Mutex<Vec<String>>,
}

impl ScriptedModel {
    pub fn reply(&self, text: &str) {
        self.replies.lock().unwrap().push_back(Ok(text.to_string()));
    }

    pub fn fail(&self, error: &str) {
        self.replies.lock().unwrap().push_back(Err(error.to_string()));
    }

    pub fn prompts(&self) -> Vec<String> {
        self.prompts.lock().unwrap().clone()
    }
}

#[async_trait]
impl LanguageModel for ScriptedModel {
    async fn generate(&self, prompt: &str) -> Result<String, AssistantError> {
        self.prompts.lock().unwrap().push(prompt.to_string());
        match self.replies.lock().unwrap().pop_front() {
            Some(Ok(text)) => Ok(text),
            Some(Err(e)) => Err(AssistantError::Api(e)),
            None => Err(AssistantError::Api("no scripted reply".to_string())),
        }
    }
}

/// Mailer that keeps everything it is asked to send. Recipients listed in
/// `reject` fail.
#[derive(Default)]
pub struct RecordingMailer {
    pub sent: Mutex<Vec<OutgoingMail>>,
    pub reject: Mutex<Vec<String>>,
}

#[async_trait]
impl Mailer for RecordingMailer {
    async fn send(&self, mail: &OutgoingMail) -> Result<()> {
        if self.reject.lock().unwrap().contains(&mail.to) {
            anyhow::bail!("mailbox unavailable: {}", mail.to);
        }
        self.sent.lock().unwrap().push(mail.clone());
        Ok(())
    }
}

pub struct TestApp {
    pub router: Router,
    pub db: Database,
    pub model: Arc<ScriptedModel>,
    pub mailer: Arc<RecordingMailer>,
}

pub fn test_config() -> Config {
    let mut config = Config::default();
    config.auth.password_hash_rounds = 1_000;
    config
}

pub fn token_keys() -> TokenKeys {
    TokenKeys::new(&SecretString::from("integration-test-secret".to_string()), 60).unwrap()
}

fn app(with_assistant: bool) -> TestApp {
    let db = Database::in_memory().unwrap();
    let model = Arc::new(ScriptedModel::default());
    let mailer = Arc::new(RecordingMailer::default());
    let assistant = with_assistant.then(|| Arc::new(Assistant::new(model.clone())));

    let state = Arc::new(AppState {
        config: test_config(),
        db: db.clone(),
        tokens: token_keys(),
        assistant,
        mailer: mailer.clone(),
    });
    TestApp { router: build_router(state), db, model, mailer }
}

pub fn test_app() -> TestApp {
    app(true)
}

pub fn test_app_without_assistant() -> TestApp {
    app(false)
}

impl TestApp {
    pub async fn request(&self, method: Method, uri: &str, token: Option<&str>, body: Option<Value>) -> (StatusCode, Value) {
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some(token) = token {
            builder = builder.header(header::AUTHORIZATION, format!("Bearer {}", token));
        }
        let request = match body {
            Some(json) => builder
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(json.to_string()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        };

        let response = self.router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let value = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap_or_else(|_| Value::String(String::from_utf8_lossy(&bytes).into_owned()))
        };
        (status, value)
    }

    pub async fn get(&self, uri: &str, token: &str) -> (StatusCode, Value) {
        self.request(Method::GET, uri, Some(token), None).await
    }

    pub async fn post(&self, uri: &str, token: &str, body: Value) -> (StatusCode, Value) {
        self.request(Method::POST, uri, Some(token), Some(body)).await
    }

    pub async fn put(&self, uri: &str, token: &str, body: Value) -> (StatusCode, Value) {
        self.request(Method::PUT, uri, Some(token), Some(body)).await
    }

    pub async fn delete(&self, uri: &str, token: &str) -> (StatusCode, Value) {
        self.request(Method::DELETE, uri, Some(token), None).await
    }

    /// Register `email` and return an access token for it.
    pub async fn login_as(&self, email: &str) -> String {
        let credentials = serde_json::json!({ "email": email, "password": "correct horse" });
        let (status, _) = self.request(Method::POST, "/api/auth/register", None, Some(credentials.clone())).await;
        assert_eq!(status, StatusCode::CREATED);
        let (status, body) = self.request(Method::POST, "/api/auth/login", None, Some(credentials)).await;
        assert_eq!(status, StatusCode::OK);
        body["access_token"].as_str().unwrap().to_string()
    }
}
