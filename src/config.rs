//! Configuration module for StatusWatch.
//!
//! Loads configuration from environment variables with sensible defaults.

use std::env;

/// Server configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// HTTP port for the API and WebSocket server (default: 4000)
    pub http_port: u16,
    /// Path to the SQLite database file (default: "statuswatch.db")
    pub db_path: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            http_port: 4000,
            db_path: "statuswatch.db".to_string(),
        }
    }
}

impl ServerConfig {
    /// Load configuration from environment variables.
    ///
    /// Environment variables:
    /// - `STATUSWATCH_HTTP_PORT`: HTTP port (default: 4000)
    /// - `STATUSWATCH_DB_PATH`: Database file path (default: "statuswatch.db")
    pub fn load() -> Self {
        Self::from_lookup(|key| env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut cfg = Self::default();

        if let Some(port) = lookup("STATUSWATCH_HTTP_PORT").and_then(|p| p.parse().ok()) {
            cfg.http_port = port;
        }

        if let Some(db_path) = lookup("STATUSWATCH_DB_PATH").filter(|p| !p.is_empty()) {
            cfg.db_path = db_path;
        }

        cfg
    }
}
