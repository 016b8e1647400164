//! HS256 access tokens.

use chrono::{DateTime, Duration, Utc};
use hmac::{Hmac, Mac};
use jwt::{SignWithKey, VerifyWithKey};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use uuid::Uuid;

use super::AuthError;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Claims {
    pub sub: String,
    pub iat: i64,
    pub exp: i64,
    pub jti: String,
}

impl Claims {
    pub fn user_id(&self) -> Result<i64, AuthError> {
        self.sub.parse().map_err(|_| AuthError::InvalidToken)
    }
}

pub struct TokenKeys {
    key: Hmac<Sha256>,
    lifetime: Duration,
}

impl TokenKeys {
    pub fn new(secret: &SecretString, lifetime_minutes: i64) -> anyhow::Result<Self> {
        let key = Hmac::<Sha256>::new_from_slice(secret.expose_secret().as_bytes())
            .map_err(|e| anyhow::anyhow!("Invalid JWT secret: {}", e))?;
        Ok(Self { key, lifetime: Duration::minutes(lifetime_minutes.max(1)) })
    }

    pub fn issue(&self, user_id: i64, now: DateTime<Utc>) -> Result<String, AuthError> {
        let claims = Claims {
            sub: user_id.to_string(),
            iat: now.timestamp(),
            exp: (now + self.lifetime).timestamp(),
            jti: Uuid::new_v4().to_string(),
        };
        claims.sign_with_key(&self.key).map_err(|e| AuthError::Signing(e.to_string()))
    }

    pub fn verify(&self, token: &str, now: DateTime<Utc>) -> Result<Claims, AuthError> {
        let claims: Claims = token.verify_with_key(&self.key).map_err(|_| AuthError::InvalidToken)?;
        if claims.exp <= now.timestamp() {
            return Err(AuthError::Expired);
        }
        Ok(claims)
    }
}
