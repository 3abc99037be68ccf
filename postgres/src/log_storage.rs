//! `PostgreSQL` durability for the embedded log.
//!
//! One table holds every topic. The primary key `(topic, record_offset)` is the
//! last line of defence against two writers sharing a database: a duplicate
//! offset fails the insert instead of forking the log.

use chrono::{DateTime, Utc};
use plinth_core::embedded_log::{LogStorage, StoredRecord};
use plinth_core::event_bus::{BusFuture, EventBusError, RecordHeader};
use sqlx::types::Json;
use sqlx::{PgPool, Row};

/// Table the embedded log writes to.
pub const LOG_TABLE: &str = "plinth_log_records";

/// [`LogStorage`] backed by a `PostgreSQL` table.
#[derive(Clone)]
pub struct PostgresLogStorage {
    pool: PgPool,
}

impl PostgresLogStorage {
    /// Connect to `database_url` and make sure the log table exists.
    ///
    /// # Errors
    ///
    /// Returns [`EventBusError::ConnectionFailed`] if the database cannot be
    /// reached, or [`EventBusError::Storage`] if the table cannot be created.
    pub async fn connect(database_url: &str) -> Result<Self, EventBusError> {
        let pool = PgPool::connect(database_url)
            .await
            .map_err(|e| EventBusError::ConnectionFailed(e.to_string()))?;
        let storage = Self::from_pool(pool);
        storage.ensure_schema().await?;
        tracing::info!(table = LOG_TABLE, "Embedded log storage ready");
        Ok(storage)
    }

    /// Wrap an existing pool. The caller is responsible for [`Self::ensure_schema`].
    #[must_use]
    pub const fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Create the log table if it does not exist.
    ///
    /// # Errors
    ///
    /// Returns [`EventBusError::Storage`] if the DDL fails.
    pub async fn ensure_schema(&self) -> Result<(), EventBusError> {
        sqlx::query(
            r"
            CREATE TABLE IF NOT EXISTS plinth_log_records (
                topic TEXT NOT NULL,
                record_offset BIGINT NOT NULL,
                record_key BYTEA,
                record_value BYTEA NOT NULL,
                headers JSONB NOT NULL DEFAULT '[]',
                appended_at TIMESTAMPTZ NOT NULL DEFAULT now(),
                PRIMARY KEY (topic, record_offset)
            )
            ",
        )
        .execute(&self.pool)
        .await
        .map_err(|e| EventBusError::Storage(format!("Failed to create log table: {e}")))?;
        Ok(())
    }

    fn row_to_record(row: &sqlx::postgres::PgRow) -> Result<StoredRecord, EventBusError> {
        let storage = |e: sqlx::Error| EventBusError::Storage(e.to_string());
        let headers: Json<Vec<RecordHeader>> = row.try_get("headers").map_err(storage)?;
        let appended_at: DateTime<Utc> = row.try_get("appended_at").map_err(storage)?;
        Ok(StoredRecord {
            topic: row.try_get("topic").map_err(storage)?,
            offset: row.try_get("record_offset").map_err(storage)?,
            key: row.try_get("record_key").map_err(storage)?,
            value: row.try_get("record_value").map_err(storage)?,
            headers: headers.0,
            appended_at,
        })
    }
}

impl LogStorage for PostgresLogStorage {
    fn append(&self, record: StoredRecord) -> BusFuture<'_, ()> {
        Box::pin(async move {
            sqlx::query(
                r"
                INSERT INTO plinth_log_records (
                    topic, record_offset, record_key, record_value, headers, appended_at
                ) VALUES ($1, $2, $3, $4, $5, $6)
                ",
            )
            .bind(&record.topic)
            .bind(record.offset)
            .bind(record.key.as_deref())
            .bind(&record.value)
            .bind(Json(&record.headers))
            .bind(record.appended_at)
            .execute(&self.pool)
            .await
            .map_err(|e| EventBusError::Storage(e.to_string()))?;
            Ok(())
        })
    }

    fn read_from(&self, topic: &str, from: i64, limit: usize) -> BusFuture<'_, Vec<StoredRecord>> {
        let topic = topic.to_string();
        Box::pin(async move {
            #[allow(clippy::cast_possible_wrap)] // Read batches are small
            let rows = sqlx::query(
                r"
                SELECT topic, record_offset, record_key, record_value, headers, appended_at
                FROM plinth_log_records
                WHERE topic = $1 AND record_offset >= $2
                ORDER BY record_offset ASC
                LIMIT $3
                ",
            )
            .bind(&topic)
            .bind(from)
            .bind(limit as i64)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| EventBusError::Storage(e.to_string()))?;

            rows.iter().map(Self::row_to_record).collect()
        })
    }

    fn next_offset(&self, topic: &str) -> BusFuture<'_, i64> {
        let topic = topic.to_string();
        Box::pin(async move {
            let next: (i64,) = sqlx::query_as(
                "SELECT COALESCE(MAX(record_offset) + 1, 0) FROM plinth_log_records WHERE topic = $1",
            )
            .bind(&topic)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| EventBusError::Storage(e.to_string()))?;
            Ok(next.0)
        })
    }

    fn close(&self) -> BusFuture<'_, ()> {
        Box::pin(async move {
            self.pool.close().await;
            tracing::debug!("Embedded log storage pool closed");
            Ok(())
        })
    }
}
