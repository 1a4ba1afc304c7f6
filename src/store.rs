//! Persistence gateway for measurements and device logs.
//!
//! Every write runs in its own transaction on a pooled connection: a UUID is
//! issued by the database, the parent row is inserted, then exactly one typed
//! child row chosen by the record's datatype. Either both rows commit or the
//! transaction is rolled back.

use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use sqlx::{PgPool, Postgres, Transaction};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::models::{LogRecord, MeasuredValue, MeasurementRecord};
use crate::pagination::Page;

// ---

#[derive(Debug, thiserror::Error)]
pub enum PersistenceError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("database did not answer within {0:?}")]
    Timeout(Duration),

    #[error("migration failed: {0}")]
    Migration(#[source] sqlx::Error),
}

/// A stored measurement joined with its typed value, rendered as text.
#[derive(Debug, Clone, PartialEq, Serialize, ToSchema, sqlx::FromRow)]
pub struct StoredMeasurement {
    pub uuid: Uuid,
    pub device_eui: String,
    pub measurand: String,
    pub unit: String,
    pub datatype: String,
    pub sensor: String,
    pub location: String,
    /// Typed value rendered as text; absent if the child row is missing
    pub value: Option<String>,
    pub time_method: String,
    pub unix_time: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, ToSchema, sqlx::FromRow)]
pub struct StoredLogEntry {
    pub uuid: Uuid,
    pub device_eui: String,
    pub message: String,
    pub unix_time: i64,
}

/// One page of rows plus the total row count.
#[derive(Debug, Clone, PartialEq)]
pub struct Listing<T> {
    pub items: Vec<T>,
    pub total: i64,
}

/// Storage seam used by the HTTP layer.
#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Persist a measurement (parent row plus one typed child row).
    async fn store_measurement(&self, record: &MeasurementRecord) -> Result<Uuid, PersistenceError>;

    async fn store_log(&self, record: &LogRecord) -> Result<Uuid, PersistenceError>;

    async fn list_measurements(&self, page: Page) -> Result<Listing<StoredMeasurement>, PersistenceError>;

    async fn all_measurements(&self) -> Result<Vec<StoredMeasurement>, PersistenceError>;

    async fn list_log_entries(&self, page: Page) -> Result<Listing<StoredLogEntry>, PersistenceError>;

    /// Cheap round trip used by `/ready`.
    async fn ping(&self) -> Result<(), PersistenceError>;
}

// ---

/// PostgreSQL implementation of [`RecordStore`].
#[derive(Debug, Clone)]
pub struct PgGateway {
    pool: PgPool,
    timeout: Duration,
}

impl PgGateway {
    pub fn new(pool: PgPool, timeout: Duration) -> Self {
        Self { pool, timeout }
    }

    /// Bound a database operation by the configured timeout.
    ///
    /// A timed-out transaction is dropped, which rolls it back.
    async fn bounded<T, F>(&self, operation: F) -> Result<T, PersistenceError>
    where
        F: Future<Output = Result<T, sqlx::Error>>,
    {
        tokio::time::timeout(self.timeout, operation)
            .await
            .map_err(|_| PersistenceError::Timeout(self.timeout))?
            .map_err(PersistenceError::from)
    }
}

const SELECT_MEASUREMENTS: &str = r#"
    SELECT
        m.uuid,
        m.geraete_id  AS device_eui,
        m.groesse     AS measurand,
        m.einheit     AS unit,
        m.datentyp    AS datatype,
        m.sensor,
        m.ort         AS location,
        COALESCE(f.value::TEXT, i.value::TEXT, s.value) AS value,
        m.zeitmethode AS time_method,
        m.unix_time
    FROM measured_value m
    LEFT JOIN FloatValue   f ON f.uuid = m.uuid
    LEFT JOIN IntegerValue i ON i.uuid = m.uuid
    LEFT JOIN StringValue  s ON s.uuid = m.uuid
    ORDER BY m.unix_time DESC NULLS LAST, m.uuid
    LIMIT $1 OFFSET $2
"#;

const SELECT_LOG_ENTRIES: &str = r#"
    SELECT uuid, geraete_id AS device_eui, message, unix_time
    FROM LogNachricht
    ORDER BY unix_time DESC, uuid
    LIMIT $1 OFFSET $2
"#;

#[async_trait]
impl RecordStore for PgGateway {
    async fn store_measurement(&self, record: &MeasurementRecord) -> Result<Uuid, PersistenceError> {
        // ---
        self.bounded(async {
            let mut tx = self.pool.begin().await?;
            let result = write_measurement(&mut tx, record).await;
            finish(tx, result).await
        })
        .await
    }

    async fn store_log(&self, record: &LogRecord) -> Result<Uuid, PersistenceError> {
        // ---
        self.bounded(async {
            let mut tx = self.pool.begin().await?;
            let result = write_log(&mut tx, record).await;
            finish(tx, result).await
        })
        .await
    }

    async fn list_measurements(&self, page: Page) -> Result<Listing<StoredMeasurement>, PersistenceError> {
        // ---
        self.bounded(async {
            let items = sqlx::query_as::<_, StoredMeasurement>(SELECT_MEASUREMENTS)
                .bind(Some(page.limit()))
                .bind(page.offset())
                .fetch_all(&self.pool)
                .await?;
            let total: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM measured_value")
                .fetch_one(&self.pool)
                .await?;
            Ok::<_, sqlx::Error>(Listing { items, total })
        })
        .await
    }

    async fn all_measurements(&self) -> Result<Vec<StoredMeasurement>, PersistenceError> {
        // ---
        // LIMIT NULL is LIMIT ALL in PostgreSQL
        self.bounded(
            sqlx::query_as::<_, StoredMeasurement>(SELECT_MEASUREMENTS)
                .bind(None::<i64>)
                .bind(0_i64)
                .fetch_all(&self.pool),
        )
        .await
    }

    async fn list_log_entries(&self, page: Page) -> Result<Listing<StoredLogEntry>, PersistenceError> {
        // ---
        self.bounded(async {
            let items = sqlx::query_as::<_, StoredLogEntry>(SELECT_LOG_ENTRIES)
                .bind(page.limit())
                .bind(page.offset())
                .fetch_all(&self.pool)
                .await?;
            let total: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM LogNachricht")
                .fetch_one(&self.pool)
                .await?;
            Ok::<_, sqlx::Error>(Listing { items, total })
        })
        .await
    }

    async fn ping(&self) -> Result<(), PersistenceError> {
        self.bounded(async {
            sqlx::query("SELECT 1").execute(&self.pool).await?;
            Ok::<_, sqlx::Error>(())
        })
        .await
    }
}

/// Commit on success, roll back on failure.
pub(crate) async fn finish<T>(
    tx: Transaction<'_, Postgres>,
    result: Result<T, sqlx::Error>,
) -> Result<T, sqlx::Error> {
    // ---
    match result {
        Ok(value) => {
            tx.commit().await?;
            Ok(value)
        }
        Err(e) => {
            if let Err(rollback) = tx.rollback().await {
                tracing::warn!("Rollback failed after '{}': {}", e, rollback);
            }
            Err(e)
        }
    }
}

async fn issue_uuid(tx: &mut Transaction<'_, Postgres>) -> Result<Uuid, sqlx::Error> {
    sqlx::query_scalar("SELECT gen_random_uuid()")
        .fetch_one(&mut **tx)
        .await
}

async fn write_measurement(
    tx: &mut Transaction<'_, Postgres>,
    record: &MeasurementRecord,
) -> Result<Uuid, sqlx::Error> {
    // ---
    let uuid = issue_uuid(tx).await?;

    sqlx::query(
        r#"
        INSERT INTO measured_value (
            uuid, geraete_id, groesse, einheit, datentyp,
            sensor, ort, zeitmethode, unix_time
        ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
        "#,
    )
    .bind(uuid)
    .bind(record.device_eui())
    .bind(record.measurand())
    .bind(record.unit())
    .bind(record.datatype().as_str())
    .bind(record.sensor())
    .bind(record.location())
    .bind(record.time_method().as_str())
    .bind(record.unix_time())
    .execute(&mut **tx)
    .await?;

    let child = match record.value() {
        MeasuredValue::Integer(v) => {
            sqlx::query("INSERT INTO IntegerValue (uuid, value) VALUES ($1, $2)")
                .bind(uuid)
                .bind(*v)
        }
        MeasuredValue::Float(v) => sqlx::query("INSERT INTO FloatValue (uuid, value) VALUES ($1, $2)")
            .bind(uuid)
            .bind(*v),
        MeasuredValue::Text(v) => sqlx::query("INSERT INTO StringValue (uuid, value) VALUES ($1, $2)")
            .bind(uuid)
            .bind(v.as_str()),
    };
    child.execute(&mut **tx).await?;

    Ok(uuid)
}

async fn write_log(tx: &mut Transaction<'_, Postgres>, record: &LogRecord) -> Result<Uuid, sqlx::Error> {
    // ---
    let uuid = issue_uuid(tx).await?;

    sqlx::query(
        r#"
        INSERT INTO LogNachricht (uuid, geraete_id, message, unix_time)
        VALUES ($1, $2, $3, $4)
        "#,
    )
    .bind(uuid)
    .bind(record.device_eui())
    .bind(record.message())
    .bind(record.unix_time())
    .execute(&mut **tx)
    .await?;

    Ok(uuid)
}
