//! Database schema management for the webhook listener.
//!
//! Creates the parent table `measured_value`, its three typed child tables,
//! and `LogNachricht`. Applied once on startup from `main.rs`; the service
//! does not bind its listener unless this succeeds.

use sqlx::PgPool;

use crate::store::{finish, PersistenceError};

// ---

const MIGRATIONS: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS measured_value (
        uuid        UUID        PRIMARY KEY,
        geraete_id  VARCHAR(16) NOT NULL,
        groesse     VARCHAR(40) NOT NULL,
        einheit     VARCHAR(40) NOT NULL,
        datentyp    VARCHAR(10) NOT NULL CHECK (datentyp IN ('float', 'integer', 'string')),
        sensor      VARCHAR(40) NOT NULL,
        ort         VARCHAR(40) NOT NULL,
        zeitmethode VARCHAR(10) NOT NULL CHECK (zeitmethode IN ('custom', 'server', 'none')),
        unix_time   BIGINT      CHECK (unix_time >= 0)
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS FloatValue (
        uuid  UUID PRIMARY KEY REFERENCES measured_value (uuid) ON DELETE CASCADE,
        value DOUBLE PRECISION NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS IntegerValue (
        uuid  UUID PRIMARY KEY REFERENCES measured_value (uuid) ON DELETE CASCADE,
        value BIGINT NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS StringValue (
        uuid  UUID PRIMARY KEY REFERENCES measured_value (uuid) ON DELETE CASCADE,
        value VARCHAR(20) NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS LogNachricht (
        uuid       UUID         PRIMARY KEY,
        geraete_id VARCHAR(16)  NOT NULL,
        message    VARCHAR(200) NOT NULL,
        unix_time  BIGINT       NOT NULL
    )
    "#,
    r#"
    CREATE INDEX IF NOT EXISTS idx_measured_value_geraete_id
        ON measured_value (geraete_id)
    "#,
    r#"
    CREATE INDEX IF NOT EXISTS idx_lognachricht_geraete_id
        ON LogNachricht (geraete_id)
    "#,
];

/// Create the schema if it does not exist (idempotent).
///
/// All statements run in one transaction; on any failure the batch is rolled
/// back and reported as [`PersistenceError::Migration`].
pub async fn run_migrations(pool: &PgPool) -> Result<(), PersistenceError> {
    // ---
    let mut tx = pool.begin().await.map_err(PersistenceError::Migration)?;

    let mut result = Ok(());
    for statement in MIGRATIONS {
        if let Err(e) = sqlx::query(statement).execute(&mut *tx).await {
            result = Err(e);
            break;
        }
    }

    finish(tx, result).await.map_err(PersistenceError::Migration)?;
    tracing::info!("Schema ready ({} statements applied)", MIGRATIONS.len());
    Ok(())
}
