pub mod api_server;
pub mod assistant;
pub mod auth;
pub mod cli;
pub mod config;
pub mod datetime;
pub mod env_manager;
pub mod error;
pub mod events;
pub mod reminders;
pub mod storage;

// Re-export commonly used types
pub use api_server::{build_router, AppState};
pub use config::Config;
pub use error::ApiError;
pub use storage::Database;
