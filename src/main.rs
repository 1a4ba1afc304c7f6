//! Application entry point for the `loramint-webhook` listener.
//!
//! Startup sequence:
//! - Loading configuration from environment variables or `.env`
//! - Initializing structured logging/tracing
//! - Establishing a PostgreSQL connection pool
//! - Creating the database schema if it does not exist
//! - Mounting the webhook and read-only routes
//! - Binding the Axum HTTP server and serving requests
//!
//! Missing mandatory configuration or a failed migration aborts startup
//! before the listener is bound.
use std::{env, io::IsTerminal, sync::Arc};

use anyhow::{Context, Result};
use axum::Router;
use dotenvy::dotenv;
use sqlx::postgres::PgPoolOptions;
use tracing_subscriber::filter::EnvFilter;
use tracing_subscriber::fmt::format::FmtSpan;

use loramint_webhook::{config, routes, schema, PgGateway, RecordStore};

// ---

#[tokio::main]
async fn main() -> Result<()> {
    // ---
    init_tracing();
    dotenv().ok();

    let cfg = config::load_from_env().inspect_err(|e| {
        tracing::error!("Refusing to start: {e:#}");
    })?;
    cfg.log_config();

    tracing::info!(
        "Attempting to connect to database {} at {}:{}",
        cfg.db_database,
        cfg.db_host,
        cfg.db_port
    );

    let pool = PgPoolOptions::new()
        .max_connections(cfg.db_pool_max)
        .acquire_timeout(cfg.db_timeout)
        .connect_with(cfg.connect_options())
        .await
        .with_context(|| {
            format!(
                "Failed to connect to database '{}' at {}:{}",
                cfg.db_database, cfg.db_host, cfg.db_port
            )
        })?;

    tracing::info!("Successfully connected to database");

    schema::run_migrations(&pool)
        .await
        .context("Schema migration failed, store is not ready")?;

    let store: Arc<dyn RecordStore> = Arc::new(PgGateway::new(pool, cfg.db_timeout));
    let listener = tokio::net::TcpListener::bind((cfg.webhook_host.as_str(), cfg.webhook_port))
        .await
        .with_context(|| format!("Failed to bind {}:{}", cfg.webhook_host, cfg.webhook_port))?;
    tracing::info!("Listening on {}", listener.local_addr()?);

    // Build app from routes gateway
    let app: Router = routes::router(store, cfg);

    axum::serve(listener, app).await?;

    Ok(())
}

// ---

/// Initialize the global tracing subscriber for structured logging.
///
/// - Color output controlled by TTY detection and `FORCE_COLOR`
///   (`1|true|yes` forces on, `0|false|no` forces off)
/// - Span events via `WEBHOOK_SPAN_EVENTS`: `"full"`, `"enter_exit"`, or
///   close-only by default
/// - Level from `RUST_LOG` if set, otherwise `WEBHOOK_LOG_LEVEL`
///   (default `info`)
fn init_tracing() {
    // ---
    let span_events = match env::var("WEBHOOK_SPAN_EVENTS").as_deref() {
        Ok("full") => FmtSpan::FULL,
        Ok("enter_exit") => FmtSpan::ENTER | FmtSpan::EXIT,
        _ => FmtSpan::CLOSE,
    };

    let use_color = match env::var("FORCE_COLOR").as_deref() {
        Ok("1") | Ok("true") | Ok("yes") => true,
        Ok("0") | Ok("false") | Ok("no") => false,
        _ => std::io::stdout().is_terminal(),
    };

    let env_filter = if env::var("RUST_LOG").is_ok() {
        EnvFilter::from_default_env()
    } else {
        let level = match env::var("WEBHOOK_LOG_LEVEL").ok().as_deref() {
            Some("trace") => "trace",
            Some("debug") => "debug",
            Some("warn") => "warn",
            Some("error") => "error",
            _ => "info",
        };
        EnvFilter::new(format!("{level},sqlx::query=warn"))
    };

    tracing_subscriber::fmt()
        .with_target(true)
        .with_file(true)
        .with_line_number(true)
        .with_span_events(span_events)
        .with_env_filter(env_filter)
        .with_ansi(use_color)
        .compact()
        .init();
}
