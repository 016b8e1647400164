//! Gemini `generateContent` client.

use anyhow::Context;
use async_trait::async_trait;
use log::{debug, warn};
use lru::LruCache;
use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use serde_json::{json, Value};
use std::num::NonZeroUsize;
use std::sync::Mutex;
use std::time::Duration;
use url::Url;

use super::{AssistantError, LanguageModel};
use crate::config::AssistantConfig;

const API_KEY_HEADER: &str = "x-goog-api-key";

pub struct GeminiClient {
    client: Client,
    api_key: SecretString,
    endpoint: String,
    cache: Option<Mutex<LruCache<String, String>>>,
}

impl GeminiClient {
    pub fn new(api_key: &SecretString, config: &AssistantConfig) -> anyhow::Result<Self> {
        let client = Client::builder().timeout(Duration::from_secs(config.timeout_secs.max(1))).build()?;
        let base = Url::parse(&config.base_url)
            .with_context(|| format!("Invalid assistant base_url {}", config.base_url))?;
        let endpoint = format!(
            "{}/models/{}:generateContent",
            base.as_str().trim_end_matches('/'),
            config.model
        );
        let api_key = SecretString::from(api_key.expose_secret().to_string());
        let cache = NonZeroUsize::new(config.cache_size).map(|size| Mutex::new(LruCache::new(size)));

        Ok(Self { client, api_key, endpoint, cache })
    }

    fn cached(&self, prompt: &str) -> Option<String> {
        let cache = self.cache.as_ref()?;
        let mut cache = cache.lock().ok()?;
        cache.get(prompt).cloned()
    }

    fn remember(&self, prompt: &str, text: &str) {
        if let Some(Ok(mut cache)) = self.cache.as_ref().map(|c| c.lock()) {
            cache.put(prompt.to_string(), text.to_string());
        }
    }
}

/// Concatenate the text parts of the first candidate.
fn response_text(body: &Value) -> String {
    body["candidates"][0]["content"]["parts"]
        .as_array()
        .map(|parts| parts.iter().filter_map(|p| p["text"].as_str()).collect::<String>())
        .unwrap_or_default()
}

#[async_trait]
impl LanguageModel for GeminiClient {
    async fn generate(&self, prompt: &str) -> Result<String, AssistantError> {
        if let Some(hit) = self.cached(prompt) {
            debug!("Using cached Gemini response");
            return Ok(hit);
        }

        debug!("Calling Gemini at {}", self.endpoint);
        let response = self
            .client
            .post(&self.endpoint)
            .header(API_KEY_HEADER, self.api_key.expose_secret())
            .json(&json!({
                "contents": [
                    { "parts": [ { "text": prompt } ] }
                ]
            }))
            .send()
            .await
            .map_err(|e| AssistantError::Api(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            warn!("Gemini API returned {}", status);
            return Err(AssistantError::Api(format!("{}: {}", status, body.trim())));
        }

        let body: Value = response.json().await.map_err(|e| AssistantError::Api(e.to_string()))?;
        if let Some(reason) = body["promptFeedback"]["blockReason"].as_str() {
            return Err(AssistantError::Api(format!("prompt blocked: {}", reason)));
        }

        let text = response_text(&body);
        if !text.trim().is_empty() {
            self.remember(prompt, &text);
        }
        Ok(text)
    }
}
