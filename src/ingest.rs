//! Per-request orchestration: authenticate, extract, resolve time, build
//! the record, persist.

use axum::http::HeaderMap;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::error::IngestError;
use crate::models::{LogRecord, MeasurementInput, MeasurementRecord};
use crate::payload::{self, ExtractedPayload, MessageType};
use crate::store::RecordStore;
use crate::time::{self, LegacyDeviceTime};
use crate::Config;

// ---

/// A successfully persisted uplink.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Stored {
    pub kind: MessageType,
    pub uuid: Uuid,
    pub device_eui: String,
}

/// A dropped uplink with whatever device context was known at the time.
#[derive(Debug)]
pub struct Rejection {
    pub device_eui: Option<String>,
    pub error: IngestError,
}

/// Run one webhook call through the pipeline and log its outcome.
///
/// `now` is the receipt time in unix seconds.
pub async fn handle(
    store: &dyn RecordStore,
    config: &Config,
    headers: &HeaderMap,
    body: &[u8],
    now: i64,
) -> Result<Stored, Rejection> {
    // ---
    let outcome = ingest(store, config, headers, body, now).await;

    match &outcome {
        Ok(stored) => info!(
            device = %stored.device_eui,
            uuid = %stored.uuid,
            "Stored {}",
            stored.kind.as_str()
        ),
        Err(rejection) => {
            let device = rejection.device_eui.as_deref().unwrap_or("-");
            let stage = rejection.error.stage();
            if let IngestError::Persistence(_) = rejection.error {
                error!(stage, device, "Webhook dropped: {}", rejection.error);
            } else {
                warn!(stage, device, "Webhook rejected: {}", rejection.error);
            }
        }
    }

    outcome
}

async fn ingest(
    store: &dyn RecordStore,
    config: &Config,
    headers: &HeaderMap,
    body: &[u8],
    now: i64,
) -> Result<Stored, Rejection> {
    // ---
    let extracted = payload::extract(headers, body, &config.app_key).map_err(|error| Rejection {
        device_eui: None,
        error,
    })?;

    let device_eui = extracted.device_eui.clone();
    let reject = |error: IngestError| Rejection {
        device_eui: Some(device_eui.clone()),
        error,
    };

    let uuid = match extracted.message_type {
        MessageType::Measurement => {
            let record =
                build_measurement(&extracted, config.legacy_device_time, now).map_err(reject)?;
            debug!("Measurement {}", record);
            store
                .store_measurement(&record)
                .await
                .map_err(|e| reject(e.into()))?
        }
        MessageType::LogEntry => {
            let record = build_log(&extracted, now).map_err(reject)?;
            debug!(device = %record.device_eui(), "Log entry: {}", record.message());
            store.store_log(&record).await.map_err(|e| reject(e.into()))?
        }
    };

    Ok(Stored {
        kind: extracted.message_type,
        uuid,
        device_eui,
    })
}

fn build_measurement(
    extracted: &ExtractedPayload,
    legacy: LegacyDeviceTime,
    now: i64,
) -> Result<MeasurementRecord, IngestError> {
    // ---
    let time_method = time::parse_method(extracted.str_field("timemethode")?, legacy)?;
    let unix_time = time::resolve(time_method, extracted.fields.get("timevalue"), now)?;

    let record = MeasurementRecord::new(MeasurementInput {
        datatype: extracted.str_field("datatype")?,
        location: extracted.str_field("location")?,
        measurand: extracted.str_field("measurand")?,
        sensor: extracted.str_field("sensor")?,
        unit: extracted.str_field("unit")?,
        value: extracted.field("value")?,
        time_method,
        unix_time,
        device_eui: &extracted.device_eui,
    })?;

    Ok(record)
}

fn build_log(extracted: &ExtractedPayload, now: i64) -> Result<LogRecord, IngestError> {
    let message = extracted.str_field("message")?;
    Ok(LogRecord::new(&extracted.device_eui, message, now)?)
}
