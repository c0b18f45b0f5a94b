//! SQLite-backed [`Ledger`] implementation.
//!
//! Each [`Ledger`] operation maps to a single SQL statement against the
//! `tracked_items` table created by [`migrate`](crate::migrate). Upserts are
//! one `INSERT ... ON CONFLICT DO UPDATE`, so a row is always replaced
//! atomically. Timestamps are stored as unix milliseconds.

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};

use knowledge_sync_core::error::LedgerError;
use knowledge_sync_core::ledger::Ledger;
use knowledge_sync_core::models::{ItemStatus, SourceType, StatusCount, TrackedItem};

use crate::config::Config;
use crate::{db, migrate};

const COLUMNS: &str = "source_type, source_id, version, source_modified_at, destination_doc_id, \
     last_synced_at, last_attempt_at, status, failure_count, last_error";

/// SQLite implementation of the [`Ledger`] trait.
pub struct SqliteLedger {
    pool: SqlitePool,
}

impl SqliteLedger {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Open the configured database, creating the schema if needed.
    pub async fn open(config: &Config) -> Result<Self> {
        let pool = db::connect(config).await?;
        migrate::apply(&pool).await?;
        Ok(Self::new(pool))
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

fn unavailable(e: sqlx::Error) -> LedgerError {
    LedgerError::Unavailable(e.to_string())
}

fn to_millis(ts: Option<DateTime<Utc>>) -> Option<i64> {
    ts.map(|t| t.timestamp_millis())
}

fn from_millis(ms: Option<i64>, column: &str) -> Result<Option<DateTime<Utc>>, LedgerError> {
    match ms {
        None => Ok(None),
        Some(v) => DateTime::from_timestamp_millis(v)
            .map(Some)
            .ok_or_else(|| LedgerError::Corrupt(format!("{} out of range: {}", column, v))),
    }
}

fn row_to_item(row: &SqliteRow) -> Result<TrackedItem, LedgerError> {
    let source_type: String = row.try_get("source_type").map_err(unavailable)?;
    let status: String = row.try_get("status").map_err(unavailable)?;
    let failure_count: i64 = row.try_get("failure_count").map_err(unavailable)?;
    let last_attempt_at: i64 = row.try_get("last_attempt_at").map_err(unavailable)?;

    Ok(TrackedItem {
        source_id: row.try_get("source_id").map_err(unavailable)?,
        source_type: source_type.parse().map_err(LedgerError::Corrupt)?,
        version: row.try_get("version").map_err(unavailable)?,
        source_modified_at: from_millis(
            row.try_get("source_modified_at").map_err(unavailable)?,
            "source_modified_at",
        )?,
        destination_doc_id: row.try_get("destination_doc_id").map_err(unavailable)?,
        last_synced_at: from_millis(
            row.try_get("last_synced_at").map_err(unavailable)?,
            "last_synced_at",
        )?,
        last_attempt_at: DateTime::from_timestamp_millis(last_attempt_at).ok_or_else(|| {
            LedgerError::Corrupt(format!("last_attempt_at out of range: {}", last_attempt_at))
        })?,
        status: status.parse().map_err(LedgerError::Corrupt)?,
        failure_count: u32::try_from(failure_count)
            .map_err(|_| LedgerError::Corrupt(format!("negative failure_count {}", failure_count)))?,
        last_error: row.try_get("last_error").map_err(unavailable)?,
    })
}

#[async_trait]
impl Ledger for SqliteLedger {
    async fn get(
        &self,
        source_type: SourceType,
        source_id: &str,
    ) -> Result<Option<TrackedItem>, LedgerError> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM tracked_items WHERE source_type = ? AND source_id = ?",
            COLUMNS
        ))
        .bind(source_type.as_str())
        .bind(source_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(unavailable)?;

        row.as_ref().map(row_to_item).transpose()
    }

    async fn upsert(&self, item: &TrackedItem) -> Result<(), LedgerError> {
        sqlx::query(
            r#"
            INSERT INTO tracked_items (source_type, source_id, version, source_modified_at,
                                       destination_doc_id, last_synced_at, last_attempt_at,
                                       status, failure_count, last_error)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(source_type, source_id) DO UPDATE SET
                version = excluded.version,
                source_modified_at = excluded.source_modified_at,
                destination_doc_id = excluded.destination_doc_id,
                last_synced_at = excluded.last_synced_at,
                last_attempt_at = excluded.last_attempt_at,
                status = excluded.status,
                failure_count = excluded.failure_count,
                last_error = excluded.last_error
            "#,
        )
        .bind(item.source_type.as_str())
        .bind(&item.source_id)
        .bind(&item.version)
        .bind(to_millis(item.source_modified_at))
        .bind(&item.destination_doc_id)
        .bind(to_millis(item.last_synced_at))
        .bind(item.last_attempt_at.timestamp_millis())
        .bind(item.status.as_str())
        .bind(i64::from(item.failure_count))
        .bind(&item.last_error)
        .execute(&self.pool)
        .await
        .map_err(unavailable)?;

        Ok(())
    }

    async fn list_retry_candidates(
        &self,
        source_type: SourceType,
    ) -> Result<Vec<TrackedItem>, LedgerError> {
        // NULL last_synced_at sorts first under ASC in SQLite.
        let rows = sqlx::query(&format!(
            "SELECT {} FROM tracked_items WHERE source_type = ? AND status = ? \
             ORDER BY failure_count ASC, last_synced_at ASC, source_id ASC",
            COLUMNS
        ))
        .bind(source_type.as_str())
        .bind(ItemStatus::PendingRetry.as_str())
        .fetch_all(&self.pool)
        .await
        .map_err(unavailable)?;

        rows.iter().map(row_to_item).collect()
    }

    async fn watermark(
        &self,
        source_type: SourceType,
    ) -> Result<Option<DateTime<Utc>>, LedgerError> {
        let max: Option<i64> = sqlx::query_scalar(
            "SELECT MAX(source_modified_at) FROM tracked_items WHERE source_type = ? AND status = ?",
        )
        .bind(source_type.as_str())
        .bind(ItemStatus::Synced.as_str())
        .fetch_one(&self.pool)
        .await
        .map_err(unavailable)?;

        from_millis(max, "source_modified_at")
    }

    async fn list(
        &self,
        source_type: Option<SourceType>,
        status: Option<ItemStatus>,
    ) -> Result<Vec<TrackedItem>, LedgerError> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM tracked_items \
             WHERE (?1 IS NULL OR source_type = ?1) AND (?2 IS NULL OR status = ?2) \
             ORDER BY source_type ASC, source_id ASC",
            COLUMNS
        ))
        .bind(source_type.map(|s| s.as_str()))
        .bind(status.map(|s| s.as_str()))
        .fetch_all(&self.pool)
        .await
        .map_err(unavailable)?;

        rows.iter().map(row_to_item).collect()
    }

    async fn counts(&self) -> Result<Vec<StatusCount>, LedgerError> {
        let rows = sqlx::query(
            "SELECT source_type, status, COUNT(*) AS n FROM tracked_items \
             GROUP BY source_type, status ORDER BY source_type ASC, status ASC",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(unavailable)?;

        rows.iter()
            .map(|row| {
                let source_type: String = row.try_get("source_type").map_err(unavailable)?;
                let status: String = row.try_get("status").map_err(unavailable)?;
                let n: i64 = row.try_get("n").map_err(unavailable)?;
                Ok(StatusCount {
                    source_type: source_type.parse().map_err(LedgerError::Corrupt)?,
                    status: status.parse().map_err(LedgerError::Corrupt)?,
                    count: n as u64,
                })
            })
            .collect()
    }
}
