//! Webhook listener that persists LoRaWAN sensor uplinks.
//!
//! The network server posts each uplink to the listener; the decoded payload
//! is either a measurement (`Messwert`) or a device log line (`LogEintrag`).
//! Measurements land in `measured_value` plus one typed child table, log lines
//! in `LogNachricht`.
//!
//! Module layout:
//! - `config`: environment-sourced [`Config`], loaded once at startup
//! - `payload`: authentication and JSON extraction
//! - `time`: time-method resolution
//! - `models`: validated record types
//! - `store` / `schema`: PostgreSQL gateway and schema creation
//! - `ingest`: per-request orchestration
//! - `routes`: axum router

pub mod config;
pub mod error;
pub mod ingest;
pub mod models;
pub mod pagination;
pub mod payload;
pub mod routes;
pub mod schema;
pub mod store;
pub mod time;

#[cfg(test)]
mod test_db;

pub use config::Config;
pub use error::IngestError;
pub use models::{LogRecord, MeasurementRecord};
pub use store::{PgGateway, RecordStore};
