//! Incremental sync engine.
//!
//! One [`SyncEngine::run_sync`] call processes a single source type:
//!
//! 1. **Watermark**: newest upstream modification time among `Synced` rows,
//!    or `now - lookback` when the ledger has none. Fixed before anything is
//!    dispatched, so rows written during the run cannot move it.
//! 2. **Retry pass**: every `PendingRetry` row is re-fetched from the
//!    connector and re-dispatched before anything new is looked at.
//! 3. **Fetch**: connector items modified at or after the watermark.
//! 4. **Diff + dispatch**: candidates in ascending modification order are
//!    planned against their ledger row ([`state::plan`]) and sent to the
//!    destination; the ledger row is written after every attempt.
//!
//! Dispatches may overlap up to `concurrency`, but ledger writes happen in
//! candidate order on the consuming side of the stream. A newer row is never
//! committed before an older one, so aborting the run (ledger error or
//! cancellation) leaves only later items unseen.
//!
//! Per-item dispatch failures are recorded and counted, never returned.
//! Ledger and connector failures abort the run.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use futures::stream::{self, StreamExt};
use tracing::{debug, info, warn};

use crate::destination::Destination;
use crate::error::{DispatchError, LedgerError, SourceError, SyncError};
use crate::ledger::Ledger;
use crate::models::{Candidate, ItemStatus, SourceType, SyncReport, TrackedItem};
use crate::source::SourceConnector;
use crate::state::{self, Intent, SkipReason};

/// Tunables consumed by the engine.
#[derive(Debug, Clone)]
pub struct SyncOptions {
    /// Consecutive failures after which an item is parked as `FailedPermanent`.
    pub failure_ceiling: u32,
    /// Maximum dispatches in flight during the candidate pass.
    pub concurrency: usize,
    /// Window used when the ledger has no synced rows for a source type.
    pub default_lookback: Duration,
    /// Per-source-type overrides of `default_lookback`.
    pub lookback: HashMap<SourceType, Duration>,
}

impl Default for SyncOptions {
    fn default() -> Self {
        Self {
            failure_ceiling: 5,
            concurrency: 1,
            default_lookback: Duration::days(30),
            lookback: HashMap::new(),
        }
    }
}

impl SyncOptions {
    pub fn with_lookback(mut self, source_type: SourceType, window: Duration) -> Self {
        self.lookback.insert(source_type, window);
        self
    }

    pub fn lookback_for(&self, source_type: SourceType) -> Duration {
        self.lookback
            .get(&source_type)
            .copied()
            .unwrap_or(self.default_lookback)
    }
}

/// Result of processing one item.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Outcome {
    Created,
    Updated,
    Skipped,
    Failed { source_id: String, parked: bool },
}

/// Dispatch result waiting to be committed to the ledger.
struct Attempt {
    outcome: Outcome,
    row: Option<TrackedItem>,
}

impl Attempt {
    fn skipped(row: Option<TrackedItem>) -> Self {
        Self {
            outcome: Outcome::Skipped,
            row,
        }
    }
}

impl SyncReport {
    fn record(&mut self, outcome: Outcome) {
        match outcome {
            Outcome::Created => self.created += 1,
            Outcome::Updated => self.updated += 1,
            Outcome::Skipped => self.skipped += 1,
            Outcome::Failed { source_id, parked } => {
                self.failed += 1;
                if parked {
                    self.failed_permanent.push(source_id);
                }
            }
        }
    }
}

/// Drives change detection and dispatch for one source type at a time.
///
/// Two runs for the same source type must not overlap; callers serialize
/// them (the CLI is single-shot, the server and scheduler hold a run lock).
#[derive(Clone)]
pub struct SyncEngine {
    ledger: Arc<dyn Ledger>,
    destination: Arc<dyn Destination>,
    options: SyncOptions,
}

impl SyncEngine {
    pub fn new(
        ledger: Arc<dyn Ledger>,
        destination: Arc<dyn Destination>,
        options: SyncOptions,
    ) -> Self {
        Self {
            ledger,
            destination,
            options,
        }
    }

    /// Run one incremental sync for the connector's source type.
    pub async fn run_sync(&self, connector: &dyn SourceConnector) -> Result<SyncReport, SyncError> {
        let source_type = connector.source_type();
        let started_at = Utc::now();
        let mut report = SyncReport::new(source_type, started_at);
        info!(source = connector.name(), %source_type, "sync started");

        let watermark = match self.ledger.watermark(source_type).await? {
            Some(w) => w,
            None => started_at - self.options.lookback_for(source_type),
        };
        report.watermark = watermark;

        // Retry pass.
        let retry_rows = self.ledger.list_retry_candidates(source_type).await?;
        let mut handled: HashSet<String> = HashSet::with_capacity(retry_rows.len());
        for row in retry_rows {
            handled.insert(row.source_id.clone());
            report.retried += 1;
            let fetched = connector
                .fetch_item(&row.source_id)
                .await
                .map_err(|e| source_error(connector, e))?;
            let attempt = match fetched {
                Some(candidate) => self.dispatch(source_type, &candidate, Some(row)).await,
                None => self.missing_upstream(source_type, row),
            };
            report.record(self.commit(attempt).await?);
        }

        // Candidate pass.
        let fetched = connector
            .fetch_since(watermark)
            .await
            .map_err(|e| source_error(connector, e))?;
        let candidates = order_candidates(fetched, &handled);
        debug!(
            source = connector.name(),
            %watermark,
            candidates = candidates.len(),
            "candidates fetched"
        );

        let mut attempts = stream::iter(candidates)
            .map(|candidate| self.process_candidate(source_type, candidate))
            .buffered(self.options.concurrency.max(1));
        while let Some(attempt) = attempts.next().await {
            report.record(self.commit(attempt?).await?);
        }

        report.pending_retry = self.ledger.list_retry_candidates(source_type).await?.len() as u64;
        report.finished_at = Utc::now();
        info!(
            source = connector.name(),
            created = report.created,
            updated = report.updated,
            skipped = report.skipped,
            failed = report.failed,
            pending_retry = report.pending_retry,
            "sync finished"
        );
        Ok(report)
    }

    async fn process_candidate(
        &self,
        source_type: SourceType,
        candidate: Candidate,
    ) -> Result<Attempt, LedgerError> {
        let existing = self.ledger.get(source_type, &candidate.source_id).await?;
        Ok(self.dispatch(source_type, &candidate, existing).await)
    }

    /// Plan and dispatch one candidate. Nothing is written here; the caller
    /// commits the returned row.
    async fn dispatch(
        &self,
        source_type: SourceType,
        candidate: &Candidate,
        existing: Option<TrackedItem>,
    ) -> Attempt {
        let id = candidate.source_id.as_str();
        match state::plan(candidate, existing.as_ref()) {
            Intent::Skip(SkipReason::Parked) => {
                debug!(%source_type, id, "failed permanently, waiting for requeue");
                Attempt::skipped(None)
            }
            Intent::Skip(SkipReason::Unchanged) => {
                debug!(%source_type, id, "unchanged, skipping");
                let settled = existing
                    .as_ref()
                    .and_then(|row| state::on_unchanged(row, Utc::now()));
                Attempt::skipped(settled)
            }
            Intent::Create => match self.destination.create(&candidate.document).await {
                Ok(doc_id) => {
                    debug!(%source_type, id, doc_id = doc_id.as_str(), "created");
                    Attempt {
                        outcome: Outcome::Created,
                        row: Some(state::on_success(source_type, candidate, doc_id, Utc::now())),
                    }
                }
                Err(e) => self.failure(source_type, id, existing, e),
            },
            Intent::Update { destination_doc_id } => {
                match self
                    .destination
                    .update(&destination_doc_id, &candidate.document)
                    .await
                {
                    Ok(()) => {
                        debug!(%source_type, id, doc_id = destination_doc_id.as_str(), "updated");
                        Attempt {
                            outcome: Outcome::Updated,
                            row: Some(state::on_success(
                                source_type,
                                candidate,
                                destination_doc_id,
                                Utc::now(),
                            )),
                        }
                    }
                    Err(e) => self.failure(source_type, id, existing, e),
                }
            }
        }
    }

    fn failure(
        &self,
        source_type: SourceType,
        source_id: &str,
        existing: Option<TrackedItem>,
        error: DispatchError,
    ) -> Attempt {
        let row = state::on_failure(
            source_type,
            source_id,
            existing.as_ref(),
            &error,
            self.options.failure_ceiling,
            Utc::now(),
        );
        let parked = row.status == ItemStatus::FailedPermanent;
        warn!(
            %source_type,
            id = source_id,
            failure_count = row.failure_count,
            parked,
            error = %error,
            "dispatch failed"
        );
        Attempt {
            outcome: Outcome::Failed {
                source_id: source_id.to_string(),
                parked,
            },
            row: Some(row),
        }
    }

    fn missing_upstream(&self, source_type: SourceType, row: TrackedItem) -> Attempt {
        let source_id = row.source_id.clone();
        let error = DispatchError::Permanent("item no longer present upstream".to_string());
        self.failure(source_type, &source_id, Some(row), error)
    }

    async fn commit(&self, attempt: Attempt) -> Result<Outcome, LedgerError> {
        if let Some(row) = &attempt.row {
            self.ledger.upsert(row).await?;
        }
        Ok(attempt.outcome)
    }
}

fn source_error(connector: &dyn SourceConnector, error: SourceError) -> SyncError {
    SyncError::Source {
        source_name: connector.name().to_string(),
        error,
    }
}

/// Deduplicate by id (newest modification wins), drop ids already handled by
/// the retry pass, and sort by modification time, then id.
fn order_candidates(candidates: Vec<Candidate>, handled: &HashSet<String>) -> Vec<Candidate> {
    let mut latest: HashMap<String, Candidate> = HashMap::with_capacity(candidates.len());
    for candidate in candidates {
        if handled.contains(&candidate.source_id) {
            continue;
        }
        match latest.get(&candidate.source_id) {
            Some(seen) if seen.modified_at >= candidate.modified_at => {}
            _ => {
                latest.insert(candidate.source_id.clone(), candidate);
            }
        }
    }
    let mut ordered: Vec<Candidate> = latest.into_values().collect();
    ordered.sort_by(|a, b| {
        a.modified_at
            .cmp(&b.modified_at)
            .then_with(|| a.source_id.cmp(&b.source_id))
    });
    ordered
}

/// Lower bound of the fetch window for a source type, as `run_sync` would
/// compute it right now.
pub async fn current_watermark(
    ledger: &dyn Ledger,
    source_type: SourceType,
    options: &SyncOptions,
) -> Result<DateTime<Utc>, LedgerError> {
    Ok(match ledger.watermark(source_type).await? {
        Some(w) => w,
        None => Utc::now() - options.lookback_for(source_type),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Document;
    use chrono::TimeZone;

    fn cand(id: &str, h: u32) -> Candidate {
        Candidate {
            source_id: id.to_string(),
            version: format!("v{}", h),
            modified_at: Utc.with_ymd_and_hms(2024, 1, 1, h, 0, 0).unwrap(),
            document: Document {
                name: id.to_string(),
                text: String::new(),
            },
        }
    }

    #[test]
    fn candidates_are_deduplicated_and_sorted() {
        let handled: HashSet<String> = ["R".to_string()].into_iter().collect();
        let ordered = order_candidates(
            vec![
                cand("B", 9),
                cand("A", 11),
                cand("R", 1),
                cand("A", 10),
                cand("C", 9),
            ],
            &handled,
        );
        let got: Vec<(String, String)> = ordered
            .into_iter()
            .map(|c| (c.source_id, c.version))
            .collect();
        assert_eq!(
            got,
            vec![
                ("B".to_string(), "v9".to_string()),
                ("C".to_string(), "v9".to_string()),
                ("A".to_string(), "v11".to_string()),
            ]
        );
    }

    #[test]
    fn lookback_overrides_default() {
        let opts = SyncOptions::default().with_lookback(SourceType::Page, Duration::days(3));
        assert_eq!(opts.lookback_for(SourceType::Page), Duration::days(3));
        assert_eq!(opts.lookback_for(SourceType::Issue), Duration::days(30));
    }
}
