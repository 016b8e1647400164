//! Accounts, password hashing and bearer tokens.

pub mod password;
pub mod token;

use axum::extract::FromRequestParts;
use axum::http::header::AUTHORIZATION;
use axum::http::request::Parts;
use axum::http::StatusCode;
use chrono::Utc;
use once_cell::sync::Lazy;
use regex::Regex;
use std::sync::Arc;
use thiserror::Error;

use crate::api_server::AppState;
use crate::error::ApiError;

pub use password::{hash_password, verify_password};
pub use token::{Claims, TokenKeys};

static EMAIL_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[A-Za-z0-9._%+\-]+@[A-Za-z0-9.\-]+\.[A-Za-z]{2,}$").unwrap()
});

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("Missing Authorization Header")]
    MissingHeader,

    #[error("Bad Authorization header. Expected 'Authorization: Bearer <JWT>'")]
    MalformedHeader,

    #[error("Invalid token")]
    InvalidToken,

    #[error("Token has expired")]
    Expired,

    #[error("Failed to sign token: {0}")]
    Signing(String),
}

impl AuthError {
    pub fn status(&self) -> StatusCode {
        match self {
            AuthError::MissingHeader | AuthError::Expired => StatusCode::UNAUTHORIZED,
            AuthError::MalformedHeader | AuthError::InvalidToken => StatusCode::UNPROCESSABLE_ENTITY,
            AuthError::Signing(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

pub fn validate_email(email: &str) -> bool {
    EMAIL_RE.is_match(email)
}

/// The authenticated caller, taken from `Authorization: Bearer <jwt>`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AuthUser {
    pub id: i64,
}

fn bearer_token(parts: &Parts) -> Result<&str, AuthError> {
    let header = parts.headers.get(AUTHORIZATION).ok_or(AuthError::MissingHeader)?;
    let value = header.to_str().map_err(|_| AuthError::MalformedHeader)?;
    let (scheme, token) = value.trim().split_once(' ').ok_or(AuthError::MalformedHeader)?;
    if !scheme.eq_ignore_ascii_case("Bearer") || token.trim().is_empty() {
        return Err(AuthError::MalformedHeader);
    }
    Ok(token.trim())
}

impl FromRequestParts<Arc<AppState>> for AuthUser {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &Arc<AppState>) -> Result<Self, Self::Rejection> {
        let token = bearer_token(parts)?;
        let claims = state.tokens.verify(token, Utc::now())?;
        Ok(AuthUser { id: claims.user_id()? })
    }
}
