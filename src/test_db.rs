//! Database fixtures for tests that run against `TEST_DATABASE_URL`.

use std::str::FromStr;

use sqlx::postgres::{PgConnectOptions, PgPoolOptions};
use sqlx::PgPool;
use tokio::sync::OnceCell;
use uuid::Uuid;

use crate::schema;

static MIGRATED: OnceCell<()> = OnceCell::const_new();

fn database_url() -> Option<String> {
    let url = std::env::var("TEST_DATABASE_URL").ok();
    if url.is_none() {
        eprintln!("TEST_DATABASE_URL not set, skipping database test");
    }
    url
}

/// Pool on the default schema; the schema is created once per test binary.
pub async fn migrated_pool() -> Option<PgPool> {
    // ---
    let url = database_url()?;
    let pool = PgPoolOptions::new()
        .max_connections(2)
        .connect(&url)
        .await
        .expect("connect to TEST_DATABASE_URL");

    MIGRATED
        .get_or_init(|| async {
            schema::run_migrations(&pool).await.expect("migrations");
        })
        .await;

    Some(pool)
}

/// An empty schema of its own; unqualified table names on `pool` resolve there.
pub struct ScratchSchema {
    pub name: String,
    pub pool: PgPool,
    admin: PgPool,
}

impl ScratchSchema {
    pub async fn create() -> Option<Self> {
        // ---
        let url = database_url()?;
        let admin = PgPoolOptions::new()
            .max_connections(1)
            .connect(&url)
            .await
            .expect("connect to TEST_DATABASE_URL");

        let name = format!("scratch_{}", Uuid::new_v4().simple());
        sqlx::query(&format!("CREATE SCHEMA {name}"))
            .execute(&admin)
            .await
            .expect("create scratch schema");

        let options = PgConnectOptions::from_str(&url)
            .expect("parse TEST_DATABASE_URL")
            .options([("search_path", name.as_str())]);
        let pool = PgPoolOptions::new()
            .max_connections(2)
            .connect_with(options)
            .await
            .expect("connect to scratch schema");

        Some(Self { name, pool, admin })
    }

    /// Number of base tables in the schema.
    pub async fn table_count(&self) -> i64 {
        sqlx::query_scalar(
            r#"
            SELECT COUNT(*) FROM information_schema.tables
            WHERE table_schema = $1 AND table_type = 'BASE TABLE'
            "#,
        )
        .bind(&self.name)
        .fetch_one(&self.admin)
        .await
        .expect("count tables")
    }

    pub async fn remove(self) {
        self.pool.close().await;
        sqlx::query(&format!("DROP SCHEMA {} CASCADE", self.name))
            .execute(&self.admin)
            .await
            .expect("drop scratch schema");
    }
}
