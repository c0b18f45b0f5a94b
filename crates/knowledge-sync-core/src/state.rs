//! Per-item sync state machine.
//!
//! ```text
//!   NEW ──ok──▶ SYNCED ◀──ok── PENDING_RETRY
//!    │            │                │   ▲
//!    └──err───────┴──────err───────┘───┘
//!                                  │
//!                        count >= ceiling
//!                                  ▼
//!                          FAILED_PERMANENT
//! ```
//!
//! Everything here is a pure function of the candidate, the existing ledger
//! row, and the dispatch outcome. The engine owns all I/O.

use chrono::{DateTime, Utc};

use crate::error::DispatchError;
use crate::models::{Candidate, ItemStatus, SourceType, TrackedItem};

/// What the engine should do with a candidate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Intent {
    Create,
    Update { destination_doc_id: String },
    Skip(SkipReason),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// Stored version equals the candidate's version.
    Unchanged,
    /// Row is `FailedPermanent` and waits for an operator.
    Parked,
}

/// Decide the dispatch intent for `candidate` given its ledger row.
///
/// The per-item version comparison is authoritative; the coarse watermark
/// only bounds what the connector returns.
pub fn plan(candidate: &Candidate, existing: Option<&TrackedItem>) -> Intent {
    let Some(row) = existing else {
        return Intent::Create;
    };
    if row.status == ItemStatus::FailedPermanent {
        return Intent::Skip(SkipReason::Parked);
    }
    match &row.destination_doc_id {
        None => Intent::Create,
        Some(doc_id) => {
            if row.version.as_deref() == Some(candidate.version.as_str()) {
                Intent::Skip(SkipReason::Unchanged)
            } else {
                Intent::Update {
                    destination_doc_id: doc_id.clone(),
                }
            }
        }
    }
}

/// Ledger row after a successful dispatch of `candidate`.
pub fn on_success(
    source_type: SourceType,
    candidate: &Candidate,
    destination_doc_id: String,
    now: DateTime<Utc>,
) -> TrackedItem {
    TrackedItem {
        source_id: candidate.source_id.clone(),
        source_type,
        version: Some(candidate.version.clone()),
        source_modified_at: Some(candidate.modified_at),
        destination_doc_id: Some(destination_doc_id),
        last_synced_at: Some(now),
        last_attempt_at: now,
        status: ItemStatus::Synced,
        failure_count: 0,
        last_error: None,
    }
}

/// Ledger row after a failed dispatch.
///
/// Version, modification time, and destination id carry over from the
/// existing row untouched. Permanent errors jump straight to the ceiling.
pub fn on_failure(
    source_type: SourceType,
    source_id: &str,
    existing: Option<&TrackedItem>,
    error: &DispatchError,
    failure_ceiling: u32,
    now: DateTime<Utc>,
) -> TrackedItem {
    let ceiling = failure_ceiling.max(1);
    let previous = existing.map(|r| r.failure_count).unwrap_or(0);
    let mut failure_count = previous.saturating_add(1);
    if error.is_permanent() {
        failure_count = failure_count.max(ceiling);
    }
    let status = if failure_count >= ceiling {
        ItemStatus::FailedPermanent
    } else {
        ItemStatus::PendingRetry
    };

    TrackedItem {
        source_id: source_id.to_string(),
        source_type,
        version: existing.and_then(|r| r.version.clone()),
        source_modified_at: existing.and_then(|r| r.source_modified_at),
        destination_doc_id: existing.and_then(|r| r.destination_doc_id.clone()),
        last_synced_at: existing.and_then(|r| r.last_synced_at),
        last_attempt_at: now,
        status,
        failure_count,
        last_error: Some(error.to_string()),
    }
}

/// Row to write when a candidate is skipped as unchanged.
///
/// A `PendingRetry` row whose stored version already matches upstream has
/// nothing left to deliver (its content was accepted by the destination
/// earlier), so it settles back to `Synced` instead of being re-fetched on
/// every run. `Synced` rows need no write and yield `None`.
pub fn on_unchanged(row: &TrackedItem, now: DateTime<Utc>) -> Option<TrackedItem> {
    if row.status != ItemStatus::PendingRetry || row.destination_doc_id.is_none() {
        return None;
    }
    Some(TrackedItem {
        status: ItemStatus::Synced,
        failure_count: 0,
        last_error: None,
        last_attempt_at: now,
        ..row.clone()
    })
}

/// Operator requeue: a parked row goes back to the retry queue with a clean
/// failure count.
pub fn requeue(row: &TrackedItem) -> TrackedItem {
    TrackedItem {
        status: ItemStatus::PendingRetry,
        failure_count: 0,
        ..row.clone()
    }
}
