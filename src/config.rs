use anyhow::{Context, Result};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub auth: AuthConfig,
    #[serde(default)]
    pub mail: MailConfig,
    #[serde(default)]
    pub assistant: AssistantConfig,
    #[serde(default)]
    pub reminders: ReminderConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub path: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthConfig {
    pub token_lifetime_minutes: i64,
    pub password_hash_rounds: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MailConfig {
    pub server: String,
    pub port: u16,
    pub use_tls: bool,
    pub use_ssl: bool,
    pub username: Option<String>,
    pub default_sender: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AssistantConfig {
    pub model: String,
    pub base_url: String,
    pub timeout_secs: u64,
    pub cache_size: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReminderConfig {
    /// How far back a missed start still gets a reminder
    pub lookback_minutes: i64,
    pub lookahead_minutes: i64,
    /// Seconds between reminder passes inside `serve`; 0 disables the loop
    pub poll_interval_secs: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self { host: "127.0.0.1".to_string(), port: 5000 }
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        let path = ProjectDirs::from("com", "scheduler", "scheduler")
            .map(|dirs| dirs.data_dir().join("scheduler.db"))
            .unwrap_or_else(|| PathBuf::from("scheduler.db"));
        Self { path }
    }
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self { token_lifetime_minutes: 60, password_hash_rounds: 100_000 }
    }
}

impl Default for MailConfig {
    fn default() -> Self {
        Self {
            server: "smtp.mailtrap.io".to_string(),
            port: 2525,
            use_tls: true,
            use_ssl: false,
            username: None,
            default_sender: "reminders@scheduler.local".to_string(),
        }
    }
}

impl Default for AssistantConfig {
    fn default() -> Self {
        Self {
            model: "gemini-1.5-flash".to_string(),
            base_url: "https://generativelanguage.googleapis.com/v1beta".to_string(),
            timeout_secs: 30,
            cache_size: 100,
        }
    }
}

impl Default for ReminderConfig {
    fn default() -> Self {
        Self { lookback_minutes: 10, lookahead_minutes: 60, poll_interval_secs: 300 }
    }
}

impl Config {
    /// Load the config file (creating a default one when missing) and apply
    /// environment overrides on top.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let config_path = match path {
            Some(p) => p.to_path_buf(),
            None => get_config_path()?,
        };

        let mut config = if config_path.exists() {
            let content =
                fs::read_to_string(&config_path).context("Failed to read config file")?;
            toml::from_str(&content).context("Failed to parse config file")?
        } else {
            let default_config = Config::default();
            default_config.save(&config_path)?;
            default_config
        };

        config.apply_env_overrides();
        Ok(config)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        let content = toml::to_string_pretty(self)?;
        fs::write(path, content).context("Failed to write config file")?;

        Ok(())
    }

    pub fn apply_env_overrides(&mut self) {
        if let Some(db) = env_value("SCHEDULER_DB_PATH").or_else(|| env_value("DATABASE_URL")) {
            let db = db.strip_prefix("sqlite:///").unwrap_or(&db).to_string();
            self.database.path = PathBuf::from(db);
        }
        if let Some(host) = env_value("SCHEDULER_HOST") {
            self.server.host = host;
        }
        if let Some(port) = env_value("SCHEDULER_PORT").and_then(|p| p.parse().ok()) {
            self.server.port = port;
        }
        if let Some(server) = env_value("MAIL_SERVER") {
            self.mail.server = server;
        }
        if let Some(port) = env_value("MAIL_PORT").and_then(|p| p.parse().ok()) {
            self.mail.port = port;
        }
        if let Some(flag) = env_value("MAIL_USE_TLS") {
            self.mail.use_tls = parse_flag(&flag);
        }
        if let Some(flag) = env_value("MAIL_USE_SSL") {
            self.mail.use_ssl = parse_flag(&flag);
        }
        if let Some(username) = env_value("MAIL_USERNAME") {
            self.mail.username = Some(username);
        }
        if let Some(sender) = env_value("MAIL_DEFAULT_SENDER") {
            self.mail.default_sender = sender;
        }
        if let Some(model) = env_value("GEMINI_MODEL") {
            self.assistant.model = model;
        }
    }
}

pub fn get_config_path() -> Result<PathBuf> {
    let proj_dirs = ProjectDirs::from("com", "scheduler", "scheduler")
        .context("Failed to determine config directory")?;

    Ok(proj_dirs.config_dir().join("config.toml"))
}

fn env_value(name: &str) -> Option<String> {
    env::var(name).ok().filter(|v| !v.trim().is_empty())
}

fn parse_flag(value: &str) -> bool {
    matches!(value.trim().to_lowercase().as_str(), "true" | "on" | "1")
}
