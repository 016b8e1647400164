use log::{info, warn};
use secrecy::SecretString;
use std::env;

pub const JWT_SECRET_VAR: &str = "JWT_SECRET_KEY";
pub const GEMINI_API_KEY_VAR: &str = "GEMINI_API_KEY";
pub const MAIL_PASSWORD_VAR: &str = "MAIL_PASSWORD";

// Value shipped in .env templates; treated the same as an unset key
pub const API_KEY_PLACEHOLDER: &str = "YOUR_API_KEY_HERE";

const DEV_JWT_SECRET: &str = "scheduler-dev-jwt-secret-change-me";

/// Credentials that only ever come from the environment.
pub struct Secrets {
    pub jwt_secret: SecretString,
    pub gemini_api_key: Option<SecretString>,
    pub mail_password: Option<SecretString>,
}

impl Secrets {
    pub fn from_env() -> Self {
        let jwt_secret = match get_env_var(JWT_SECRET_VAR) {
            Some(value) => SecretString::from(value),
            None => {
                warn!("{} not set; using the development secret", JWT_SECRET_VAR);
                SecretString::from(DEV_JWT_SECRET.to_string())
            }
        };

        let gemini_api_key = usable_api_key(get_env_var(GEMINI_API_KEY_VAR));
        if gemini_api_key.is_none() {
            warn!("{} not found or is a placeholder; assistant endpoints are disabled", GEMINI_API_KEY_VAR);
        }

        let mail_password = get_env_var(MAIL_PASSWORD_VAR).map(SecretString::from);

        Self { jwt_secret, gemini_api_key, mail_password }
    }
}

pub fn load_env_file() {
    match dotenvy::dotenv() {
        Ok(path) => info!("Loaded environment from {:?}", path),
        Err(e) => info!("No .env file found or error loading it: {}", e),
    }
}

pub fn get_env_var(name: &str) -> Option<String> {
    env::var(name).ok().map(|v| v.trim().to_string()).filter(|v| !v.is_empty())
}

fn usable_api_key(value: Option<String>) -> Option<SecretString> {
    value.filter(|key| key != API_KEY_PLACEHOLDER).map(SecretString::from)
}
