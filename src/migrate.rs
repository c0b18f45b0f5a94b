//! Database schema migrations (idempotent).

use anyhow::Result;
use sqlx::SqlitePool;

use crate::config::Config;
use crate::db;

/// Connect to the configured database and bring its schema up to date.
pub async fn run_migrations(config: &Config) -> Result<()> {
    let pool = db::connect(config).await?;
    apply(&pool).await?;
    pool.close().await;
    Ok(())
}

/// Create the ledger table and its indexes on an open pool.
pub async fn apply(pool: &SqlitePool) -> Result<()> {
    // Timestamps are unix milliseconds; NULL means "never".
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS tracked_items (
            source_type TEXT NOT NULL,
            source_id TEXT NOT NULL,
            version TEXT,
            source_modified_at INTEGER,
            destination_doc_id TEXT,
            last_synced_at INTEGER,
            last_attempt_at INTEGER NOT NULL,
            status TEXT NOT NULL,
            failure_count INTEGER NOT NULL DEFAULT 0,
            last_error TEXT,
            PRIMARY KEY (source_type, source_id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_tracked_items_status ON tracked_items(source_type, status)",
    )
    .execute(pool)
    .await?;
    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_tracked_items_retry ON tracked_items(source_type, status, failure_count, last_synced_at)",
    )
    .execute(pool)
    .await?;

    Ok(())
}
