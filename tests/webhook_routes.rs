//! Drives the full router with an in-memory store in place of PostgreSQL.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use axum::{
    body::Body,
    http::{header, Request, StatusCode},
    Router,
};
use chrono::Utc;
use serde_json::{json, Value};
use tower::ServiceExt;
use uuid::Uuid;

use loramint_webhook::{
    config,
    models::{MeasuredValue, TimeMethod},
    pagination::Page,
    routes,
    store::{Listing, PersistenceError, StoredLogEntry, StoredMeasurement},
    Config, LogRecord, MeasurementRecord, RecordStore,
};

const APP_KEY: &str = "NNSXS.test-key";
const DEV_EUI: &str = "70B3D57ED0041A2F";

// ---

#[derive(Default)]
struct MemoryStore {
    measurements: Mutex<Vec<(Uuid, MeasurementRecord)>>,
    logs: Mutex<Vec<(Uuid, LogRecord)>>,
    unavailable: bool,
}

impl MemoryStore {
    fn check(&self) -> Result<(), PersistenceError> {
        if self.unavailable {
            return Err(PersistenceError::Timeout(Duration::from_secs(1)));
        }
        Ok(())
    }

    fn measurements(&self) -> Vec<MeasurementRecord> {
        let rows = self.measurements.lock().unwrap();
        rows.iter().map(|(_, r)| r.clone()).collect()
    }

    fn logs(&self) -> Vec<LogRecord> {
        let rows = self.logs.lock().unwrap();
        rows.iter().map(|(_, r)| r.clone()).collect()
    }
}

fn to_row(uuid: Uuid, record: &MeasurementRecord) -> StoredMeasurement {
    StoredMeasurement {
        uuid,
        device_eui: record.device_eui().to_string(),
        measurand: record.measurand().to_string(),
        unit: record.unit().to_string(),
        datatype: record.datatype().as_str().to_string(),
        sensor: record.sensor().to_string(),
        location: record.location().to_string(),
        value: Some(record.value().to_string()),
        time_method: record.time_method().as_str().to_string(),
        unix_time: record.unix_time(),
    }
}

#[async_trait]
impl RecordStore for MemoryStore {
    async fn store_measurement(&self, record: &MeasurementRecord) -> Result<Uuid, PersistenceError> {
        self.check()?;
        let uuid = Uuid::new_v4();
        self.measurements.lock().unwrap().push((uuid, record.clone()));
        Ok(uuid)
    }

    async fn store_log(&self, record: &LogRecord) -> Result<Uuid, PersistenceError> {
        self.check()?;
        let uuid = Uuid::new_v4();
        self.logs.lock().unwrap().push((uuid, record.clone()));
        Ok(uuid)
    }

    async fn list_measurements(&self, page: Page) -> Result<Listing<StoredMeasurement>, PersistenceError> {
        let all = self.all_measurements().await?;
        let total = all.len() as i64;
        let items = all
            .into_iter()
            .skip(page.offset() as usize)
            .take(page.limit() as usize)
            .collect();
        Ok(Listing { items, total })
    }

    async fn all_measurements(&self) -> Result<Vec<StoredMeasurement>, PersistenceError> {
        self.check()?;
        let rows = self.measurements.lock().unwrap();
        Ok(rows.iter().map(|(uuid, r)| to_row(*uuid, r)).collect())
    }

    async fn list_log_entries(&self, page: Page) -> Result<Listing<StoredLogEntry>, PersistenceError> {
        self.check()?;
        let rows = self.logs.lock().unwrap();
        let items = rows
            .iter()
            .skip(page.offset() as usize)
            .take(page.limit() as usize)
            .map(|(uuid, r)| StoredLogEntry {
                uuid: *uuid,
                device_eui: r.device_eui().to_string(),
                message: r.message().to_string(),
                unix_time: r.unix_time(),
            })
            .collect();
        Ok(Listing {
            items,
            total: rows.len() as i64,
        })
    }

    async fn ping(&self) -> Result<(), PersistenceError> {
        self.check()
    }
}

// ---

fn test_config(legacy_device_time: &str) -> Config {
    let legacy = legacy_device_time.to_string();
    config::load_from(move |name| match name {
        "DB_USERNAME" => Some("mint".into()),
        "DB_PASSWORD" => Some("secret".into()),
        "DB_DATABASE" => Some("loramint".into()),
        "APP_KEY" => Some(APP_KEY.into()),
        "LEGACY_DEVICE_TIME" => Some(legacy.clone()),
        _ => None,
    })
    .unwrap()
}

fn app(store: Arc<MemoryStore>) -> Router {
    routes::router(store, test_config("reject"))
}

fn uplink(decoded: Value) -> String {
    json!({
        "end_device_ids": {"device_id": "mint-01", "dev_eui": DEV_EUI},
        "uplink_message": {"f_port": 1, "decoded_payload": decoded}
    })
    .to_string()
}

fn post(body: String, key: Option<&str>) -> Request<Body> {
    let mut builder = Request::builder()
        .method("POST")
        .uri("/webhook")
        .header(header::CONTENT_LENGTH, body.len());
    if let Some(key) = key {
        builder = builder.header("X-Downlink-Apikey", key);
    }
    builder.body(Body::from(body)).unwrap()
}

async fn send(app: Router, request: Request<Body>) -> Result<(StatusCode, Value)> {
    let response = app.oneshot(request).await?;
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await?;
    let body = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
    Ok((status, body))
}

fn float_measurement(timemethode: &str) -> Value {
    json!({
        "messagetyp": "Messwert",
        "datatype": "float",
        "location": "Labor",
        "measurand": "Temperatur",
        "sensor": "BME280",
        "unit": "C",
        "value": 21.5,
        "timemethode": timemethode
    })
}

// ---

#[tokio::test]
async fn float_measurement_with_server_time_is_stored() -> Result<()> {
    // ---
    let store = Arc::new(MemoryStore::default());
    let before = Utc::now().timestamp();

    let (status, body) = send(app(store.clone()), post(uplink(float_measurement("server")), Some(APP_KEY))).await?;
    let after = Utc::now().timestamp();

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["ok"], true);
    assert!(body["id"].as_str().is_some());

    let stored = store.measurements();
    assert_eq!(stored.len(), 1);
    let record = &stored[0];
    assert_eq!(record.value(), &MeasuredValue::Float(21.5));
    assert_eq!(record.time_method(), TimeMethod::Server);
    assert_eq!(record.device_eui(), DEV_EUI);
    let t = record.unix_time().unwrap();
    assert!(before <= t && t <= after, "{before} <= {t} <= {after}");
    Ok(())
}

#[tokio::test]
async fn malformed_custom_timestamp_is_dropped() -> Result<()> {
    // ---
    let store = Arc::new(MemoryStore::default());
    let mut decoded = float_measurement("custom");
    decoded["timevalue"] = json!("not-a-number");

    let (status, body) = send(app(store.clone()), post(uplink(decoded), Some(APP_KEY))).await?;

    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(body["ok"], false);
    assert!(body["error"].as_str().unwrap().contains("malformed timestamp"));
    assert!(store.measurements().is_empty());
    Ok(())
}

#[tokio::test]
async fn custom_timestamp_is_kept() -> Result<()> {
    // ---
    let store = Arc::new(MemoryStore::default());
    let mut decoded = float_measurement("custom");
    decoded["timevalue"] = json!(1_700_000_000);

    let (status, _) = send(app(store.clone()), post(uplink(decoded), Some(APP_KEY))).await?;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(store.measurements()[0].unix_time(), Some(1_700_000_000));
    Ok(())
}

#[tokio::test]
async fn missing_api_key_is_rejected_before_parsing() -> Result<()> {
    // ---
    let store = Arc::new(MemoryStore::default());

    // garbage body: a parse attempt would answer 400, not 401
    let (status, body) = send(app(store.clone()), post("b'{garbage".to_string(), None)).await?;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["ok"], false);

    let (status, _) = send(app(store.clone()), post(uplink(float_measurement("server")), Some("wrong"))).await?;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    assert!(store.measurements().is_empty());
    Ok(())
}

#[tokio::test]
async fn log_entry_gets_server_time() -> Result<()> {
    // ---
    let store = Arc::new(MemoryStore::default());
    let before = Utc::now().timestamp();
    let decoded = json!({"messagetyp": "LogEintrag", "message": "sensor offline"});

    let (status, _) = send(app(store.clone()), post(uplink(decoded), Some(APP_KEY))).await?;
    let after = Utc::now().timestamp();

    assert_eq!(status, StatusCode::OK);
    let logs = store.logs();
    assert_eq!(logs.len(), 1);
    assert_eq!(logs[0].message(), "sensor offline");
    assert_eq!(logs[0].device_eui(), DEV_EUI);
    assert!(before <= logs[0].unix_time() && logs[0].unix_time() <= after);
    assert!(store.measurements().is_empty());
    Ok(())
}

#[tokio::test]
async fn byte_literal_wrapped_body_is_accepted() -> Result<()> {
    // ---
    let store = Arc::new(MemoryStore::default());
    let body = format!("b'{}'", uplink(json!({"messagetyp": "LogEintrag", "message": "boot"})));

    let request = Request::builder()
        .method("POST")
        .uri("/")
        .header(header::CONTENT_LENGTH, body.len())
        .header("X-Downlink-Apikey", APP_KEY)
        .body(Body::from(body))?;
    let (status, _) = send(app(store.clone()), request).await?;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(store.logs()[0].message(), "boot");
    Ok(())
}

#[tokio::test]
async fn missing_content_length_is_rejected() -> Result<()> {
    // ---
    let store = Arc::new(MemoryStore::default());
    let request = Request::builder()
        .method("POST")
        .uri("/webhook")
        .header("X-Downlink-Apikey", APP_KEY)
        .body(Body::from(uplink(float_measurement("server"))))?;

    let (status, _) = send(app(store.clone()), request).await?;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(store.measurements().is_empty());
    Ok(())
}

#[tokio::test]
async fn unknown_message_type_and_bad_fields_store_nothing() -> Result<()> {
    // ---
    let store = Arc::new(MemoryStore::default());

    let (status, body) = send(app(store.clone()), post(uplink(json!({"messagetyp": "Status"})), Some(APP_KEY))).await?;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].as_str().unwrap().contains("Status"));

    let mut decoded = float_measurement("server");
    decoded["datatype"] = json!("integer");
    decoded["value"] = json!("abc");
    let (status, _) = send(app(store.clone()), post(uplink(decoded), Some(APP_KEY))).await?;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);

    let mut decoded = float_measurement("server");
    decoded.as_object_mut().unwrap().remove("unit");
    let (status, body) = send(app(store.clone()), post(uplink(decoded), Some(APP_KEY))).await?;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].as_str().unwrap().contains("unit"));

    assert!(store.measurements().is_empty());
    assert!(store.logs().is_empty());
    Ok(())
}

#[tokio::test]
async fn legacy_device_time_follows_configuration() -> Result<()> {
    // ---
    let store = Arc::new(MemoryStore::default());
    let (status, _) = send(app(store.clone()), post(uplink(float_measurement("device")), Some(APP_KEY))).await?;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);

    let mapped = routes::router(store.clone(), test_config("server"));
    let (status, _) = send(mapped, post(uplink(float_measurement("device")), Some(APP_KEY))).await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(store.measurements()[0].time_method(), TimeMethod::Server);
    Ok(())
}

#[tokio::test]
async fn storage_failure_is_reported_without_detail() -> Result<()> {
    // ---
    let store = Arc::new(MemoryStore {
        unavailable: true,
        ..Default::default()
    });

    let (status, body) = send(app(store.clone()), post(uplink(float_measurement("server")), Some(APP_KEY))).await?;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(body, json!({"ok": false, "error": "storage unavailable"}));

    let request = Request::builder().uri("/ready").body(Body::empty())?;
    let (status, body) = send(app(store), request).await?;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(body["status"], "unavailable");
    Ok(())
}

#[tokio::test]
async fn listings_are_paginated() -> Result<()> {
    // ---
    let store = Arc::new(MemoryStore::default());
    for i in 0..3 {
        let decoded = json!({"messagetyp": "LogEintrag", "message": format!("line {i}")});
        let (status, _) = send(app(store.clone()), post(uplink(decoded), Some(APP_KEY))).await?;
        assert_eq!(status, StatusCode::OK);
    }

    let request = Request::builder().uri("/log-entries?per_page=2").body(Body::empty())?;
    let (status, body) = send(app(store.clone()), request).await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"].as_array().unwrap().len(), 2);
    assert_eq!(body["pagination"]["total"], 3);
    assert_eq!(body["pagination"]["total_pages"], 2);
    assert_eq!(body["pagination"]["has_next"], true);

    send(app(store.clone()), post(uplink(float_measurement("none")), Some(APP_KEY))).await?;
    let request = Request::builder().uri("/measurements").body(Body::empty())?;
    let (_, body) = send(app(store.clone()), request).await?;
    assert_eq!(body["data"][0]["datatype"], "float");
    assert_eq!(body["data"][0]["value"], "21.5");
    assert_eq!(body["data"][0]["unix_time"], Value::Null);
    Ok(())
}

#[tokio::test]
async fn export_returns_csv() -> Result<()> {
    // ---
    let store = Arc::new(MemoryStore::default());
    send(app(store.clone()), post(uplink(float_measurement("none")), Some(APP_KEY))).await?;

    let request = Request::builder().uri("/measurements/export").body(Body::empty())?;
    let response = app(store).oneshot(request).await?;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()[header::CONTENT_TYPE], "text/csv");

    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await?;
    let text = String::from_utf8(bytes.to_vec())?;
    let lines: Vec<&str> = text.lines().collect();
    assert_eq!(lines.len(), 2);
    assert!(lines[0].starts_with("uuid,device_eui,"));
    assert!(lines[1].contains(",Temperatur,C,float,BME280,Labor,21.5,none,"));
    Ok(())
}

#[tokio::test]
async fn health_does_not_need_the_store() -> Result<()> {
    // ---
    let store = Arc::new(MemoryStore {
        unavailable: true,
        ..Default::default()
    });
    let request = Request::builder().uri("/health").body(Body::empty())?;
    let (status, body) = send(app(store), request).await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({"status": "ok"}));
    Ok(())
}

#[tokio::test]
async fn openapi_document_lists_every_endpoint() -> Result<()> {
    // ---
    let store = Arc::new(MemoryStore::default());
    let request = Request::builder().uri("/openapi.json").body(Body::empty())?;
    let (status, body) = send(app(store), request).await?;
    assert_eq!(status, StatusCode::OK);

    for path in [
        "/webhook",
        "/measurements",
        "/measurements/export",
        "/log-entries",
        "/health",
        "/ready",
    ] {
        assert!(body["paths"][path].is_object(), "{path} missing");
    }
    assert!(body["paths"]["/webhook"]["post"]["responses"]["401"].is_object());

    for schema in ["StoredMeasurement", "StoredLogEntry", "Pagination", "ErrorBody"] {
        assert!(body["components"]["schemas"][schema].is_object(), "{schema} missing");
    }
    Ok(())
}

#[tokio::test]
async fn docs_page_is_served_without_the_store() -> Result<()> {
    // ---
    let store = Arc::new(MemoryStore {
        unavailable: true,
        ..Default::default()
    });
    let request = Request::builder().uri("/docs").body(Body::empty())?;
    let response = app(store).oneshot(request).await?;
    assert_eq!(response.status(), StatusCode::OK);

    let content_type = response.headers()[header::CONTENT_TYPE].to_str()?.to_string();
    assert!(content_type.starts_with("text/html"), "{content_type}");

    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await?;
    // the viewer page embeds the OpenAPI document
    assert!(String::from_utf8(bytes.to_vec())?.contains("LoRaMINT webhook"));
    Ok(())
}
