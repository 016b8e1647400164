use axum::extract::rejection::{JsonRejection, PathRejection, QueryRejection};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use log::error;
use serde::Serialize;
use thiserror::Error;

use crate::assistant::AssistantError;
use crate::auth::AuthError;

/// Errors returned by HTTP handlers. Every variant renders as
/// `{"msg": ..., "detail"?: ...}` with the matching status code.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("{0}")]
    BadRequest(String),

    #[error("{0}")]
    Unauthorized(String),

    #[error("{0}")]
    NotFound(String),

    #[error(transparent)]
    Auth(#[from] AuthError),

    #[error("Gemini API key not configured on the server.")]
    AssistantUnavailable,

    #[error("{msg}")]
    Internal { msg: String, detail: Option<String> },

    /// A request axum could not extract: bad JSON, path or query string.
    #[error("{msg}")]
    Rejected { status: StatusCode, msg: String },
}

#[derive(Serialize)]
struct ErrorBody {
    msg: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    detail: Option<String>,
}

impl ApiError {
    pub fn bad_request(msg: impl Into<String>) -> Self {
        Self::BadRequest(msg.into())
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    pub fn internal(msg: impl Into<String>, detail: Option<String>) -> Self {
        Self::Internal { msg: msg.into(), detail }
    }

    /// Map an assistant failure for an endpoint whose generic failure
    /// message is `context`.
    pub fn from_assistant(context: &str, err: AssistantError) -> Self {
        match err {
            AssistantError::NotConfigured => Self::AssistantUnavailable,
            AssistantError::InvalidInput(msg) => Self::BadRequest(msg),
            other => Self::internal(context, Some(other.to_string())),
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::Auth(e) => e.status(),
            Self::AssistantUnavailable => StatusCode::SERVICE_UNAVAILABLE,
            Self::Internal { .. } => StatusCode::INTERNAL_SERVER_ERROR,
            Self::Rejected { status, .. } => *status,
        }
    }
}

impl From<anyhow::Error> for ApiError {
    fn from(err: anyhow::Error) -> Self {
        error!("Internal error: {:#}", err);
        Self::internal("Internal server error", None)
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        Self::Rejected { status: rejection.status(), msg: rejection.body_text() }
    }
}

impl From<PathRejection> for ApiError {
    fn from(rejection: PathRejection) -> Self {
        Self::Rejected { status: rejection.status(), msg: rejection.body_text() }
    }
}

impl From<QueryRejection> for ApiError {
    fn from(rejection: QueryRejection) -> Self {
        Self::Rejected { status: rejection.status(), msg: rejection.body_text() }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let detail = match &self {
            Self::Internal { detail, .. } => detail.clone(),
            _ => None,
        };
        let body = ErrorBody { msg: self.to_string(), detail };
        (status, Json(body)).into_response()
    }
}
