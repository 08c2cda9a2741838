//! Application configuration.
//!
//! Everything comes from the environment (with `.env` support) so the same
//! binary runs in Docker and on a laptop without flag soup. CLI flags on the
//! `weaver` binary override individual values.

use anyhow::Result;

#[derive(Debug, Clone)]
pub struct Config {
    pub database_path: String,
    pub port: u16,
    /// Ring capacity for the in-memory outbox.
    pub outbox_capacity: usize,
    /// Per-SSE-client queue depth before a slow_consumer disconnect.
    pub sse_buffer: usize,
    /// Supervisor timeout for clock tick callbacks.
    pub tick_timeout_secs: u64,
    /// Durable (SQLite) outbox instead of the in-memory ring.
    pub durable_outbox: bool,
    /// Directory scanned for adapter plugin manifests.
    pub plugins_dir: String,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        dotenv::dotenv().ok();

        let database_path =
            std::env::var("WEAVER_DATABASE_PATH").unwrap_or_else(|_| "./weaver.db".to_string());

        let port = std::env::var("PORT")
            .unwrap_or_else(|_| "8080".to_string())
            .parse()
            .unwrap_or(8080);

        let outbox_capacity = std::env::var("WEAVER_OUTBOX_CAPACITY")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(100_000);

        let sse_buffer = std::env::var("WEAVER_SSE_BUFFER")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(256);

        let tick_timeout_secs = std::env::var("WEAVER_TICK_TIMEOUT_SECS")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(30);

        let durable_outbox = std::env::var("WEAVER_DURABLE_OUTBOX")
            .map(|v| matches!(v.as_str(), "1" | "true" | "TRUE" | "on" | "ON"))
            .unwrap_or(true);

        let plugins_dir =
            std::env::var("WEAVER_PLUGINS_DIR").unwrap_or_else(|_| "./plugins".to_string());

        Ok(Self {
            database_path,
            port,
            outbox_capacity,
            sse_buffer,
            tick_timeout_secs,
            durable_outbox,
            plugins_dir,
        })
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            database_path: "./weaver.db".to_string(),
            port: 8080,
            outbox_capacity: 100_000,
            sse_buffer: 256,
            tick_timeout_secs: 30,
            durable_outbox: true,
            plugins_dir: "./plugins".to_string(),
        }
    }
}
