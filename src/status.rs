//! Ledger inspection and operator actions.
//!
//! `ksync status` prints per-source counts, the effective watermark, and
//! every item parked as `failed_permanent`; with `--source-type` or
//! `--status` it lists the matching rows instead. `ksync requeue` moves a
//! parked item back into the retry queue with a fresh failure budget.

use anyhow::{bail, Result};
use chrono::{DateTime, Utc};
use serde::Serialize;

use knowledge_sync_core::engine::current_watermark;
use knowledge_sync_core::state;
use knowledge_sync_core::{ItemStatus, Ledger, SourceType, SyncOptions, TrackedItem};

use crate::config::Config;
use crate::sqlite_ledger::SqliteLedger;

/// Snapshot of the ledger for one source type.
#[derive(Debug, Clone, Serialize)]
pub struct SourceStatus {
    pub source_type: SourceType,
    pub synced: u64,
    pub pending_retry: u64,
    pub failed_permanent: u64,
    /// Lower bound of the next run's fetch window.
    pub watermark: DateTime<Utc>,
}

/// Snapshot of the whole ledger.
#[derive(Debug, Clone, Serialize)]
pub struct LedgerStatus {
    pub sources: Vec<SourceStatus>,
    pub parked: Vec<TrackedItem>,
}

pub async fn ledger_status(ledger: &dyn Ledger, options: &SyncOptions) -> Result<LedgerStatus> {
    let counts = ledger.counts().await?;
    let mut sources = Vec::with_capacity(SourceType::ALL.len());

    for source_type in SourceType::ALL {
        let count_of = |status: ItemStatus| {
            counts
                .iter()
                .filter(|c| c.source_type == source_type && c.status == status)
                .map(|c| c.count)
                .sum::<u64>()
        };
        sources.push(SourceStatus {
            source_type,
            synced: count_of(ItemStatus::Synced),
            pending_retry: count_of(ItemStatus::PendingRetry),
            failed_permanent: count_of(ItemStatus::FailedPermanent),
            watermark: current_watermark(ledger, source_type, options).await?,
        });
    }

    let parked = ledger.list(None, Some(ItemStatus::FailedPermanent)).await?;
    Ok(LedgerStatus { sources, parked })
}

/// Reset a parked item so the next run retries it.
///
/// Only `failed_permanent` rows can be requeued; anything else is an
/// operator mistake and is reported as such.
pub async fn requeue_item(
    ledger: &dyn Ledger,
    source_type: SourceType,
    source_id: &str,
) -> Result<TrackedItem> {
    let Some(row) = ledger.get(source_type, source_id).await? else {
        bail!("No tracked {} with id '{}'", source_type, source_id);
    };
    if row.status != ItemStatus::FailedPermanent {
        bail!(
            "{} '{}' is {}, only failed_permanent items can be requeued",
            source_type,
            source_id,
            row.status
        );
    }
    let requeued = state::requeue(&row);
    ledger.upsert(&requeued).await?;
    tracing::info!(%source_type, id = source_id, "requeued");
    Ok(requeued)
}

/// `ksync status`.
pub async fn run_status(
    config: &Config,
    source_type: Option<String>,
    status: Option<String>,
) -> Result<()> {
    let source_type: Option<SourceType> = source_type
        .map(|s| s.parse())
        .transpose()
        .map_err(anyhow::Error::msg)?;
    let status: Option<ItemStatus> = status
        .map(|s| s.parse())
        .transpose()
        .map_err(anyhow::Error::msg)?;

    let ledger = SqliteLedger::open(config).await?;

    if source_type.is_some() || status.is_some() {
        let rows = ledger.list(source_type, status).await?;
        print_rows(&rows);
        ledger.pool().close().await;
        return Ok(());
    }

    let overview = ledger_status(&ledger, &config.sync_options()).await?;

    println!("Ledger: {}", config.db.path.display());
    println!();
    println!(
        "  {:<8} {:>8} {:>14} {:>17}   {}",
        "SOURCE", "SYNCED", "PENDING_RETRY", "FAILED_PERMANENT", "WATERMARK"
    );
    println!("  {}", "-".repeat(76));
    for s in &overview.sources {
        println!(
            "  {:<8} {:>8} {:>14} {:>17}   {}",
            s.source_type.as_str(),
            s.synced,
            s.pending_retry,
            s.failed_permanent,
            s.watermark.format("%Y-%m-%d %H:%M:%S")
        );
    }

    if !overview.parked.is_empty() {
        println!();
        println!("  Failed permanently (use `ksync requeue <type> <id>` after fixing):");
        for item in &overview.parked {
            println!(
                "    {}  {}",
                item.key(),
                item.last_error.as_deref().unwrap_or("-")
            );
        }
    }
    println!();

    ledger.pool().close().await;
    Ok(())
}

/// `ksync requeue <type> <id>`.
pub async fn run_requeue(config: &Config, source_type: &str, source_id: &str) -> Result<()> {
    let source_type: SourceType = source_type.parse().map_err(anyhow::Error::msg)?;
    let ledger = SqliteLedger::open(config).await?;
    let row = requeue_item(&ledger, source_type, source_id).await?;
    println!("requeued {}", row.key());
    ledger.pool().close().await;
    Ok(())
}

fn print_rows(rows: &[TrackedItem]) {
    println!(
        "{:<6} {:<24} {:<17} {:>5}  {:<19}  {}",
        "TYPE", "ID", "STATUS", "FAILS", "LAST SYNCED", "DOC ID"
    );
    for row in rows {
        let synced = row
            .last_synced_at
            .map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string())
            .unwrap_or_else(|| "never".to_string());
        println!(
            "{:<6} {:<24} {:<17} {:>5}  {:<19}  {}",
            row.source_type.as_str(),
            row.source_id,
            row.status.as_str(),
            row.failure_count,
            synced,
            row.destination_doc_id.as_deref().unwrap_or("-")
        );
    }
    println!("{} item(s)", rows.len());
}
