//! Language-model backed helpers: natural language event parsing, tagging,
//! free time suggestions, summaries, related information and subtasks.
//!
//! The model is reached through the [`LanguageModel`] trait so the HTTP
//! client can be swapped out in tests.

pub mod gemini;
pub mod prompts;
pub mod service;
pub mod utils;

use async_trait::async_trait;
use thiserror::Error;

pub use gemini::GeminiClient;
pub use service::{Assistant, FreeSlot, ParsedEvent};

#[derive(Debug, Error)]
pub enum AssistantError {
    #[error("Gemini API not configured: API key missing or invalid.")]
    NotConfigured,

    #[error("Gemini API error: {0}")]
    Api(String),

    #[error("Gemini API returned an empty response")]
    EmptyResponse,

    #[error("Invalid JSON response from Gemini: {reason}")]
    InvalidJson { reason: String, raw: String },

    #[error("Unexpected response structure from Gemini: {0}")]
    UnexpectedStructure(String),

    #[error("{0}")]
    InvalidInput(String),
}

/// A text-in, text-out model endpoint.
#[async_trait]
pub trait LanguageModel: Send + Sync {
    async fn generate(&self, prompt: &str) -> Result<String, AssistantError>;
}
