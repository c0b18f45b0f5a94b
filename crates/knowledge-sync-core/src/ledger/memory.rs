//! In-memory [`Ledger`] implementation for tests and embedding.
//!
//! Rows live in a `HashMap` behind `std::sync::RwLock`; each upsert is a
//! single insert under the write lock, which gives per-row atomicity.

use std::collections::{BTreeMap, HashMap};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::LedgerError;
use crate::models::{ItemKey, ItemStatus, SourceType, StatusCount, TrackedItem};

use super::{retry_order, Ledger};

/// In-memory ledger.
pub struct InMemoryLedger {
    rows: RwLock<HashMap<ItemKey, TrackedItem>>,
}

impl InMemoryLedger {
    pub fn new() -> Self {
        Self {
            rows: RwLock::new(HashMap::new()),
        }
    }

    /// Number of stored rows.
    pub fn len(&self) -> usize {
        self.read().map(|rows| rows.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, HashMap<ItemKey, TrackedItem>>, LedgerError> {
        self.rows
            .read()
            .map_err(|_| LedgerError::Unavailable("in-memory ledger lock poisoned".into()))
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, HashMap<ItemKey, TrackedItem>>, LedgerError> {
        self.rows
            .write()
            .map_err(|_| LedgerError::Unavailable("in-memory ledger lock poisoned".into()))
    }
}

impl Default for InMemoryLedger {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Ledger for InMemoryLedger {
    async fn get(
        &self,
        source_type: SourceType,
        source_id: &str,
    ) -> Result<Option<TrackedItem>, LedgerError> {
        let rows = self.read()?;
        Ok(rows.get(&ItemKey::new(source_type, source_id)).cloned())
    }

    async fn upsert(&self, item: &TrackedItem) -> Result<(), LedgerError> {
        let mut rows = self.write()?;
        rows.insert(item.key(), item.clone());
        Ok(())
    }

    async fn list_retry_candidates(
        &self,
        source_type: SourceType,
    ) -> Result<Vec<TrackedItem>, LedgerError> {
        let rows = self.read()?;
        let mut out: Vec<TrackedItem> = rows
            .values()
            .filter(|r| r.source_type == source_type && r.status == ItemStatus::PendingRetry)
            .cloned()
            .collect();
        out.sort_by(retry_order);
        Ok(out)
    }

    async fn watermark(
        &self,
        source_type: SourceType,
    ) -> Result<Option<DateTime<Utc>>, LedgerError> {
        let rows = self.read()?;
        Ok(rows
            .values()
            .filter(|r| r.source_type == source_type && r.status == ItemStatus::Synced)
            .filter_map(|r| r.source_modified_at)
            .max())
    }

    async fn list(
        &self,
        source_type: Option<SourceType>,
        status: Option<ItemStatus>,
    ) -> Result<Vec<TrackedItem>, LedgerError> {
        let rows = self.read()?;
        let mut out: Vec<TrackedItem> = rows
            .values()
            .filter(|r| source_type.map_or(true, |st| r.source_type == st))
            .filter(|r| status.map_or(true, |s| r.status == s))
            .cloned()
            .collect();
        out.sort_by(|a, b| a.key().cmp(&b.key()));
        Ok(out)
    }

    async fn counts(&self) -> Result<Vec<StatusCount>, LedgerError> {
        let rows = self.read()?;
        let mut buckets: BTreeMap<(SourceType, &'static str), (ItemStatus, u64)> = BTreeMap::new();
        for row in rows.values() {
            let entry = buckets
                .entry((row.source_type, row.status.as_str()))
                .or_insert((row.status, 0));
            entry.1 += 1;
        }
        Ok(buckets
            .into_iter()
            .map(|((source_type, _), (status, count))| StatusCount {
                source_type,
                status,
                count,
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use futures::executor::block_on;

    fn ts(h: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, h, 0, 0).unwrap()
    }

    fn row(
        id: &str,
        status: ItemStatus,
        failures: u32,
        synced: Option<DateTime<Utc>>,
    ) -> TrackedItem {
        TrackedItem {
            source_id: id.to_string(),
            source_type: SourceType::Issue,
            version: synced.map(|_| "v".to_string()),
            source_modified_at: synced,
            destination_doc_id: synced.map(|_| format!("doc-{}", id)),
            last_synced_at: synced,
            last_attempt_at: ts(20),
            status,
            failure_count: failures,
            last_error: None,
        }
    }

    #[test]
    fn retry_candidates_are_ordered_by_failures_then_age() {
        let ledger = InMemoryLedger::new();
        block_on(async {
            ledger
                .upsert(&row("C", ItemStatus::PendingRetry, 2, Some(ts(1))))
                .await
                .unwrap();
            ledger
                .upsert(&row("B", ItemStatus::PendingRetry, 1, Some(ts(5))))
                .await
                .unwrap();
            ledger
                .upsert(&row("A", ItemStatus::PendingRetry, 1, Some(ts(3))))
                .await
                .unwrap();
            ledger
                .upsert(&row("N", ItemStatus::PendingRetry, 1, None))
                .await
                .unwrap();
            ledger
                .upsert(&row("S", ItemStatus::Synced, 0, Some(ts(9))))
                .await
                .unwrap();
            ledger
                .upsert(&row("P", ItemStatus::FailedPermanent, 5, None))
                .await
                .unwrap();

            let ids: Vec<String> = ledger
                .list_retry_candidates(SourceType::Issue)
                .await
                .unwrap()
                .into_iter()
                .map(|r| r.source_id)
                .collect();
            assert_eq!(ids, vec!["N", "A", "B", "C"]);
            assert!(ledger
                .list_retry_candidates(SourceType::Page)
                .await
                .unwrap()
                .is_empty());
        });
    }

    #[test]
    fn watermark_only_counts_synced_rows() {
        let ledger = InMemoryLedger::new();
        block_on(async {
            assert_eq!(ledger.watermark(SourceType::Issue).await.unwrap(), None);
            ledger
                .upsert(&row("A", ItemStatus::Synced, 0, Some(ts(3))))
                .await
                .unwrap();
            ledger
                .upsert(&row("B", ItemStatus::PendingRetry, 1, Some(ts(8))))
                .await
                .unwrap();
            assert_eq!(
                ledger.watermark(SourceType::Issue).await.unwrap(),
                Some(ts(3))
            );
        });
    }

    #[test]
    fn upsert_overwrites_by_key_and_counts_buckets() {
        let ledger = InMemoryLedger::new();
        block_on(async {
            ledger
                .upsert(&row("A", ItemStatus::PendingRetry, 1, None))
                .await
                .unwrap();
            ledger
                .upsert(&row("A", ItemStatus::Synced, 0, Some(ts(2))))
                .await
                .unwrap();
            ledger
                .upsert(&row("B", ItemStatus::Synced, 0, Some(ts(4))))
                .await
                .unwrap();
            assert_eq!(ledger.len(), 2);
            let counts = ledger.counts().await.unwrap();
            assert_eq!(
                counts,
                vec![StatusCount {
                    source_type: SourceType::Issue,
                    status: ItemStatus::Synced,
                    count: 2,
                }]
            );
            let synced = ledger
                .list(Some(SourceType::Issue), Some(ItemStatus::Synced))
                .await
                .unwrap();
            assert_eq!(synced.len(), 2);
            assert_eq!(synced[0].source_id, "A");
        });
    }
}
