use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sqlx::postgres::{PgConnectOptions, PgPoolOptions, PgRow};
use sqlx::types::Json;
use sqlx::{ConnectOptions, PgPool, Row};
use log::LevelFilter;
use tracing::{debug, info};

use super::{flagged_or_recent, ArtifactStore, PendingBatch, StoreError};
use crate::artifact::Artifact;

/// SQLSTATE `undefined_column`
const UNDEFINED_COLUMN: &str = "42703";

/// Store section of the relay configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// PostgreSQL URL. Empty means the in-memory store is used.
    pub url: String,
    pub table: String,
    pub max_connections: u32,
    pub min_connections: u32,
    pub idle_timeout: u64,
    /// Maximum artifacts returned by one pull
    pub pending_limit: usize,
    /// Create the table on startup if it does not exist
    pub create_schema: bool,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            table: "artifacts".to_string(),
            max_connections: 10,
            min_connections: 1,
            idle_timeout: 600,
            pending_limit: 10,
            create_schema: false,
        }
    }
}

impl StoreConfig {
    pub fn is_configured(&self) -> bool {
        !self.url.is_empty()
    }

    pub async fn create_postgres_pool(&self) -> Result<PgPool, sqlx::Error> {
        let mut connect_options = self.url.parse::<PgConnectOptions>()?;
        connect_options = connect_options.log_statements(LevelFilter::Debug);
        PgPoolOptions::new()
            .max_connections(self.max_connections)
            .min_connections(self.min_connections)
            .idle_timeout(Some(Duration::from_secs(self.idle_timeout)))
            .acquire_timeout(Duration::from_secs(30))
            .connect_with(connect_options)
            .await
    }
}

/// PostgreSQL-backed artifact store.
///
/// Expects a table with `id`, `payload` (JSONB) and `created_at`, plus the
/// optional `delivered` / `delivered_at` pair. Without that pair every
/// pull degrades to "most recent N".
#[derive(Clone)]
pub struct PostgresStore {
    pool: PgPool,
    table: String,
}

impl PostgresStore {
    pub async fn connect(config: &StoreConfig) -> Result<Self, StoreError> {
        let pool = config.create_postgres_pool().await?;
        info!(table = %config.table, "connected to artifact store");
        Ok(Self::from_pool(pool, &config.table))
    }

    pub fn from_pool(pool: PgPool, table: &str) -> Self {
        Self {
            pool,
            table: table.to_string(),
        }
    }

    pub async fn ensure_schema(&self) -> Result<(), StoreError> {
        let ddl = format!(
            "CREATE TABLE IF NOT EXISTS {} (
                id TEXT PRIMARY KEY,
                payload JSONB NOT NULL,
                created_at TIMESTAMPTZ NOT NULL DEFAULT now(),
                delivered BOOLEAN NOT NULL DEFAULT false,
                delivered_at TIMESTAMPTZ
            )",
            self.table
        );
        sqlx::query(&ddl).execute(&self.pool).await?;
        debug!(table = %self.table, "artifact schema ensured");
        Ok(())
    }

    async fn fetch_flagged(&self, limit: i64) -> Result<Vec<Artifact>, StoreError> {
        let sql = format!(
            "SELECT id, payload, created_at FROM {} WHERE delivered = false ORDER BY created_at ASC LIMIT $1",
            self.table
        );
        let rows = sqlx::query(&sql)
            .bind(limit)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| classify(e, "delivered"))?;
        decode_rows(rows)
    }

    async fn fetch_recent(&self, limit: i64) -> Result<Vec<Artifact>, StoreError> {
        let sql = format!(
            "SELECT id, payload, created_at FROM {} ORDER BY created_at DESC LIMIT $1",
            self.table
        );
        let rows = sqlx::query(&sql).bind(limit).fetch_all(&self.pool).await?;
        decode_rows(rows)
    }
}

#[async_trait]
impl ArtifactStore for PostgresStore {
    async fn fetch_pending(&self, limit: usize) -> Result<PendingBatch, StoreError> {
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        flagged_or_recent(self.name(), self.fetch_flagged(limit), || {
            self.fetch_recent(limit)
        })
        .await
    }

    async fn mark_delivered(&self, ids: &[String]) -> Result<u64, StoreError> {
        if ids.is_empty() {
            return Ok(0);
        }
        let sql = format!(
            "UPDATE {} SET delivered = true, delivered_at = now() WHERE id = ANY($1) AND delivered = false",
            self.table
        );
        let result = sqlx::query(&sql)
            .bind(ids)
            .execute(&self.pool)
            .await
            .map_err(|e| classify(e, "delivered"))?;
        Ok(result.rows_affected())
    }

    async fn save(&self, artifact: &Artifact) -> Result<(), StoreError> {
        let payload = serde_json::to_value(artifact).map_err(|e| StoreError::Decode {
            id: artifact.id.clone(),
            reason: e.to_string(),
        })?;
        let sql = format!(
            "INSERT INTO {} (id, payload, created_at) VALUES ($1, $2, $3)",
            self.table
        );
        sqlx::query(&sql)
            .bind(&artifact.id)
            .bind(Json(payload))
            .bind(artifact.created_at)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    fn name(&self) -> &'static str {
        "postgres"
    }
}

fn is_missing_column(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::Database(db) => db.code().is_some_and(|code| code == UNDEFINED_COLUMN),
        _ => false,
    }
}

/// Maps SQLSTATE 42703 to [`StoreError::MissingColumn`].
fn classify(err: sqlx::Error, column: &str) -> StoreError {
    if is_missing_column(&err) {
        StoreError::MissingColumn(column.to_string())
    } else {
        StoreError::Unavailable(err)
    }
}

fn decode_rows(rows: Vec<PgRow>) -> Result<Vec<Artifact>, StoreError> {
    rows.into_iter().map(decode_row).collect()
}

fn decode_row(row: PgRow) -> Result<Artifact, StoreError> {
    let id: String = row.try_get("id")?;
    let Json(payload): Json<Value> = row.try_get("payload")?;
    let created_at: DateTime<Utc> = row.try_get("created_at")?;

    let artifact = Artifact::from_value(payload).map_err(|e| StoreError::Decode {
        id: id.clone(),
        reason: e.to_string(),
    })?;
    // Columns are authoritative over whatever the payload carried.
    Ok(artifact.with_id(id).with_created_at(created_at))
}

#[cfg(test)]
mod tests {
    use std::borrow::Cow;
    use std::fmt;

    use sqlx::error::{DatabaseError, ErrorKind};

    use super::*;

    #[derive(Debug)]
    struct FakeDbError(&'static str);

    impl fmt::Display for FakeDbError {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            write!(f, "database error {}", self.0)
        }
    }

    impl std::error::Error for FakeDbError {}

    impl DatabaseError for FakeDbError {
        fn message(&self) -> &str {
            "column does not exist"
        }

        fn code(&self) -> Option<Cow<'_, str>> {
            Some(Cow::Borrowed(self.0))
        }

        fn as_error(&self) -> &(dyn std::error::Error + Send + Sync + 'static) {
            self
        }

        fn as_error_mut(&mut self) -> &mut (dyn std::error::Error + Send + Sync + 'static) {
            self
        }

        fn into_error(self: Box<Self>) -> Box<dyn std::error::Error + Send + Sync + 'static> {
            self
        }

        fn kind(&self) -> ErrorKind {
            ErrorKind::Other
        }
    }

    fn db_error(code: &'static str) -> sqlx::Error {
        sqlx::Error::Database(Box::new(FakeDbError(code)))
    }

    #[test]
    fn test_undefined_column_is_missing_column() {
        assert!(is_missing_column(&db_error("42703")));
        assert!(matches!(
            classify(db_error("42703"), "delivered"),
            StoreError::MissingColumn(c) if c == "delivered"
        ));
    }

    #[test]
    fn test_other_sqlstates_stay_unavailable() {
        // undefined_table
        assert!(!is_missing_column(&db_error("42P01")));
        assert!(matches!(
            classify(db_error("42P01"), "delivered"),
            StoreError::Unavailable(_)
        ));
    }

    #[test]
    fn test_non_database_errors_are_not_missing_column() {
        assert!(!is_missing_column(&sqlx::Error::RowNotFound));
        assert!(!is_missing_column(&sqlx::Error::PoolTimedOut));
    }

    #[test]
    fn test_default_config_uses_memory() {
        let cfg = StoreConfig::default();
        assert!(!cfg.is_configured());
        assert_eq!(cfg.table, "artifacts");
        assert_eq!(cfg.pending_limit, 10);
    }
}
