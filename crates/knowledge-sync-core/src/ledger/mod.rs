//! Change ledger abstraction.
//!
//! The [`Ledger`] trait is the persisted source of truth for what has been
//! delivered to the knowledge base: per-item version, destination document
//! id, and retry bookkeeping. The engine never keeps a cross-run cursor of
//! its own; the watermark is derived from ledger rows on every run.
//!
//! Backends:
//! - [`memory::InMemoryLedger`]: `RwLock<HashMap>`, for tests and embedding.
//! - `SqliteLedger` in the `knowledge-sync` crate: the production store.

pub mod memory;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::LedgerError;
use crate::models::{ItemStatus, SourceType, StatusCount, TrackedItem};

/// Persistent store of [`TrackedItem`]s keyed by `(source_type, source_id)`.
///
/// | Method | Purpose |
/// |--------|---------|
/// | [`get`](Ledger::get) | Point lookup by primary key |
/// | [`upsert`](Ledger::upsert) | Atomic create-or-overwrite of one row |
/// | [`list_retry_candidates`](Ledger::list_retry_candidates) | `PendingRetry` rows in retry order |
/// | [`watermark`](Ledger::watermark) | Newest synced upstream modification time |
/// | [`list`](Ledger::list) | Operator listing with optional filters |
/// | [`counts`](Ledger::counts) | Row counts per source type and status |
#[async_trait]
pub trait Ledger: Send + Sync {
    async fn get(
        &self,
        source_type: SourceType,
        source_id: &str,
    ) -> Result<Option<TrackedItem>, LedgerError>;

    /// Create or overwrite the row for `item`'s key.
    ///
    /// Must be atomic per row: a concurrent reader sees either the old or the
    /// new record, never a mix.
    async fn upsert(&self, item: &TrackedItem) -> Result<(), LedgerError>;

    /// `PendingRetry` rows of `source_type`, least-failed first, then oldest
    /// `last_synced_at` (never-synced rows first), then `source_id`.
    async fn list_retry_candidates(
        &self,
        source_type: SourceType,
    ) -> Result<Vec<TrackedItem>, LedgerError>;

    /// Maximum `source_modified_at` over `Synced` rows of `source_type`.
    async fn watermark(&self, source_type: SourceType)
        -> Result<Option<DateTime<Utc>>, LedgerError>;

    /// Rows matching the optional filters, ordered by source type then id.
    async fn list(
        &self,
        source_type: Option<SourceType>,
        status: Option<ItemStatus>,
    ) -> Result<Vec<TrackedItem>, LedgerError>;

    async fn counts(&self) -> Result<Vec<StatusCount>, LedgerError>;
}

/// Sort key shared by ledger backends for retry ordering.
pub(crate) fn retry_order(a: &TrackedItem, b: &TrackedItem) -> std::cmp::Ordering {
    a.failure_count
        .cmp(&b.failure_count)
        .then_with(|| a.last_synced_at.cmp(&b.last_synced_at))
        .then_with(|| a.source_id.cmp(&b.source_id))
}
