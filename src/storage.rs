//! SQLite persistence for users and events.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use std::sync::Arc;
use tokio::sync::{Mutex, MutexGuard};

use crate::datetime::to_millis;

#[derive(Debug, Clone)]
pub struct User {
    pub id: i64,
    pub email: String,
    pub password_hash: String,
}

/// Shared handle to the database. Cloning is cheap.
#[derive(Clone)]
pub struct Database {
    conn: Arc<Mutex<Connection>>,
}

impl Database {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create database directory {:?}", parent))?;
        }
        let conn = Connection::open(path).context("Failed to open SQLite database")?;
        Self::from_connection(conn)
    }

    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().context("Failed to open in-memory database")?;
        Self::from_connection(conn)
    }

    fn from_connection(conn: Connection) -> Result<Self> {
        conn.execute_batch(
            r#"
            PRAGMA foreign_keys = ON;

            CREATE TABLE IF NOT EXISTS users (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                email TEXT NOT NULL UNIQUE,
                password_hash TEXT NOT NULL,
                created_at INTEGER NOT NULL
            );

            CREATE TABLE IF NOT EXISTS events (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                user_id INTEGER NOT NULL REFERENCES users(id) ON DELETE CASCADE,
                title TEXT NOT NULL,
                start_ms INTEGER NOT NULL,
                end_ms INTEGER NOT NULL,
                description TEXT,
                color_tag TEXT,
                location TEXT,
                recurrence_rule TEXT,
                reminder_sent INTEGER NOT NULL DEFAULT 0
            );

            CREATE INDEX IF NOT EXISTS idx_events_user_start ON events(user_id, start_ms);
            CREATE INDEX IF NOT EXISTS idx_events_reminder ON events(reminder_sent, start_ms);
            "#,
        )
        .context("Failed to initialise schema")?;

        Ok(Self { conn: Arc::new(Mutex::new(conn)) })
    }

    pub(crate) async fn lock(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().await
    }

    /// Insert a user; `Ok(None)` when the email is already registered.
    pub async fn create_user(
        &self,
        email: &str,
        password_hash: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<User>> {
        let conn = self.lock().await;
        let inserted = conn.execute(
            "INSERT OR IGNORE INTO users (email, password_hash, created_at) VALUES (?1, ?2, ?3)",
            params![email, password_hash, to_millis(&now)],
        )?;
        if inserted == 0 {
            return Ok(None);
        }
        Ok(Some(User {
            id: conn.last_insert_rowid(),
            email: email.to_string(),
            password_hash: password_hash.to_string(),
        }))
    }

    pub async fn find_user_by_email(&self, email: &str) -> Result<Option<User>> {
        let conn = self.lock().await;
        let user = conn
            .query_row(
                "SELECT id, email, password_hash FROM users WHERE email = ?1",
                params![email],
                |row| Ok(User { id: row.get(0)?, email: row.get(1)?, password_hash: row.get(2)? }),
            )
            .optional()?;
        Ok(user)
    }

    pub async fn find_user(&self, id: i64) -> Result<Option<User>> {
        let conn = self.lock().await;
        let user = conn
            .query_row(
                "SELECT id, email, password_hash FROM users WHERE id = ?1",
                params![id],
                |row| Ok(User { id: row.get(0)?, email: row.get(1)?, password_hash: row.get(2)? }),
            )
            .optional()?;
        Ok(user)
    }
}
