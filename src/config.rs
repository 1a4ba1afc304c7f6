//! Configuration loader for the webhook listener.
//!
//! This module centralizes all runtime configuration values and their
//! defaults, loading from environment variables (with optional `.env` file
//! support provided by the caller). Request handling only ever sees the
//! assembled [`Config`]; nothing downstream calls `env::var`.
use std::{env, fmt, time::Duration};

use anyhow::{anyhow, ensure, Result};
use sqlx::postgres::PgConnectOptions;

use crate::time::LegacyDeviceTime;

/// Parse an optional numeric variable with a default value.
macro_rules! parse_var {
    ($lookup:expr, $var_name:expr, $ty:ty, $default:expr) => {
        $lookup($var_name)
            .filter(|v: &String| !v.is_empty())
            .map(|v| v.parse::<$ty>())
            .transpose()
            .map_err(|e| anyhow!("Invalid {}: {}", $var_name, e))?
            .unwrap_or($default)
    };
}

/// Read a required variable; empty counts as missing.
macro_rules! require_var {
    ($lookup:expr, $var_name:expr) => {
        $lookup($var_name)
            .filter(|v: &String| !v.is_empty())
            .ok_or_else(|| anyhow!("{} must be set in .env or environment", $var_name))?
    };
}

/// Strongly typed application configuration.
///
/// All fields are immutable after loading, ensuring a consistent
/// configuration snapshot for the lifetime of the process.
#[derive(Clone)]
pub struct Config {
    // ---
    pub db_username: String,
    pub db_password: String,
    pub db_host: String,
    pub db_port: u16,
    pub db_database: String,

    /// Maximum number of database connections in the pool.
    pub db_pool_max: u32,

    /// Upper bound for acquiring a connection and for each database operation.
    pub db_timeout: Duration,

    /// Shared secret expected in `X-Downlink-Apikey`.
    pub app_key: String,

    pub webhook_host: String,
    pub webhook_port: u16,

    /// Interpretation of the legacy `device` time method.
    pub legacy_device_time: LegacyDeviceTime,
}

/// Load configuration from the process environment.
///
/// Required:
/// - `DB_USERNAME`, `DB_PASSWORD`, `DB_DATABASE`, `APP_KEY`
///
/// Optional:
/// - `DB_HOST` (default: localhost), `DB_PORT` (default: 5432)
/// - `DB_POOL_MAX` (default: 5), `DB_TIMEOUT_SECS` (default: 5), both > 0
/// - `WEBHOOK_HOST` (default: 0.0.0.0), `WEBHOOK_PORT` (default: 8090)
/// - `LEGACY_DEVICE_TIME` – `reject`, `server` or `custom` (default: reject)
///
/// Returns an error if any required variable is missing or any value is
/// invalid; the caller must not start the listener in that case.
pub fn load_from_env() -> Result<Config> {
    load_from(|name| env::var(name).ok())
}

/// Same as [`load_from_env`] with an injectable variable lookup.
pub fn load_from(lookup: impl Fn(&str) -> Option<String>) -> Result<Config> {
    // ---
    let db_username = require_var!(lookup, "DB_USERNAME");
    let db_password = require_var!(lookup, "DB_PASSWORD");
    let db_database = require_var!(lookup, "DB_DATABASE");
    let app_key = require_var!(lookup, "APP_KEY");

    let db_host = lookup("DB_HOST")
        .filter(|v| !v.is_empty())
        .unwrap_or_else(|| "localhost".to_string());
    let webhook_host = lookup("WEBHOOK_HOST")
        .filter(|v| !v.is_empty())
        .unwrap_or_else(|| "0.0.0.0".to_string());

    let db_port = parse_var!(lookup, "DB_PORT", u16, 5432);
    let webhook_port = parse_var!(lookup, "WEBHOOK_PORT", u16, 8090);
    let db_pool_max = parse_var!(lookup, "DB_POOL_MAX", u32, 5);
    let db_timeout_secs = parse_var!(lookup, "DB_TIMEOUT_SECS", u64, 5);
    ensure!(db_pool_max > 0, "Invalid DB_POOL_MAX: must be > 0");
    ensure!(db_timeout_secs > 0, "Invalid DB_TIMEOUT_SECS: must be > 0");
    let db_timeout = Duration::from_secs(db_timeout_secs);

    let legacy_device_time = match lookup("LEGACY_DEVICE_TIME").filter(|v| !v.is_empty()) {
        None => LegacyDeviceTime::default(),
        Some(raw) => LegacyDeviceTime::parse(&raw).ok_or_else(|| {
            anyhow!("Invalid LEGACY_DEVICE_TIME: '{raw}' (expected reject, server or custom)")
        })?,
    };

    Ok(Config {
        db_username,
        db_password,
        db_host,
        db_port,
        db_database,
        db_pool_max,
        db_timeout,
        app_key,
        webhook_host,
        webhook_port,
        legacy_device_time,
    })
}

impl Config {
    /// Connection options for the PostgreSQL pool.
    pub fn connect_options(&self) -> PgConnectOptions {
        PgConnectOptions::new()
            .host(&self.db_host)
            .port(self.db_port)
            .username(&self.db_username)
            .password(&self.db_password)
            .database(&self.db_database)
    }

    /// Log the loaded configuration with secrets masked.
    pub fn log_config(&self) {
        // ---
        tracing::info!("Configuration loaded:");
        tracing::info!("  DB_HOST            : {}:{}", self.db_host, self.db_port);
        tracing::info!("  DB_DATABASE        : {}", self.db_database);
        tracing::info!("  DB_USERNAME        : {}", self.db_username);
        tracing::info!("  DB_PASSWORD        : ****");
        tracing::info!("  DB_POOL_MAX        : {}", self.db_pool_max);
        tracing::info!("  DB_TIMEOUT_SECS    : {}", self.db_timeout.as_secs());
        tracing::info!("  APP_KEY            : {}", mask(&self.app_key));
        tracing::info!("  WEBHOOK            : {}:{}", self.webhook_host, self.webhook_port);
        tracing::info!("  LEGACY_DEVICE_TIME : {}", self.legacy_device_time.as_str());
    }
}

impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field("db_username", &self.db_username)
            .field("db_password", &"****")
            .field("db_host", &self.db_host)
            .field("db_port", &self.db_port)
            .field("db_database", &self.db_database)
            .field("db_pool_max", &self.db_pool_max)
            .field("db_timeout", &self.db_timeout)
            .field("app_key", &mask(&self.app_key))
            .field("webhook_host", &self.webhook_host)
            .field("webhook_port", &self.webhook_port)
            .field("legacy_device_time", &self.legacy_device_time)
            .finish()
    }
}

/// Keep at most the first four characters of a secret.
fn mask(secret: &str) -> String {
    let shown: String = secret.chars().take(4).collect();
    format!("{shown}****")
}
