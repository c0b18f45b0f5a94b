//! Core data models shared by the engine, ledger backends, and connectors.
//!
//! A [`Candidate`] is what a connector produces for one upstream item; a
//! [`TrackedItem`] is the ledger's record of what was last delivered to the
//! knowledge base for that item.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Kind of upstream system an item comes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceType {
    /// Jira issue.
    Issue,
    /// Confluence page.
    Page,
}

impl SourceType {
    pub const ALL: [SourceType; 2] = [SourceType::Issue, SourceType::Page];

    pub fn as_str(&self) -> &'static str {
        match self {
            SourceType::Issue => "issue",
            SourceType::Page => "page",
        }
    }
}

impl fmt::Display for SourceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SourceType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "issue" => Ok(SourceType::Issue),
            "page" => Ok(SourceType::Page),
            other => Err(format!(
                "unknown source type '{}'. Must be issue or page.",
                other
            )),
        }
    }
}

/// Sync state of a tracked item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemStatus {
    Synced,
    PendingRetry,
    FailedPermanent,
}

impl ItemStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ItemStatus::Synced => "synced",
            ItemStatus::PendingRetry => "pending_retry",
            ItemStatus::FailedPermanent => "failed_permanent",
        }
    }
}

impl fmt::Display for ItemStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ItemStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "synced" => Ok(ItemStatus::Synced),
            "pending_retry" => Ok(ItemStatus::PendingRetry),
            "failed_permanent" => Ok(ItemStatus::FailedPermanent),
            other => Err(format!("unknown item status '{}'", other)),
        }
    }
}

/// Rendered content pushed to the knowledge base.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Document {
    /// Document name in the destination (e.g. `"PROJ-123"`).
    pub name: String,
    /// Plain-text body.
    pub text: String,
}

/// One upstream item as reported by a connector.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Candidate {
    pub source_id: String,
    /// Opaque change marker (last-modified stamp or content version number).
    pub version: String,
    /// Upstream modification time; drives ordering and the watermark.
    pub modified_at: DateTime<Utc>,
    pub document: Document,
}

/// Ledger record for one synchronized unit.
///
/// Primary key is `(source_type, source_id)`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TrackedItem {
    pub source_id: String,
    pub source_type: SourceType,
    /// Version of the last successfully dispatched content.
    pub version: Option<String>,
    /// Upstream modification time of `version`.
    pub source_modified_at: Option<DateTime<Utc>>,
    pub destination_doc_id: Option<String>,
    pub last_synced_at: Option<DateTime<Utc>>,
    pub last_attempt_at: DateTime<Utc>,
    pub status: ItemStatus,
    pub failure_count: u32,
    pub last_error: Option<String>,
}

impl TrackedItem {
    pub fn key(&self) -> ItemKey {
        ItemKey {
            source_type: self.source_type,
            source_id: self.source_id.clone(),
        }
    }
}

/// Primary key of a [`TrackedItem`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ItemKey {
    pub source_type: SourceType,
    pub source_id: String,
}

impl ItemKey {
    pub fn new(source_type: SourceType, source_id: impl Into<String>) -> Self {
        Self {
            source_type,
            source_id: source_id.into(),
        }
    }
}

impl fmt::Display for ItemKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.source_type, self.source_id)
    }
}

/// Number of ledger rows in one (source type, status) bucket.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StatusCount {
    pub source_type: SourceType,
    pub status: ItemStatus,
    pub count: u64,
}

/// Aggregate outcome of one `run_sync` call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SyncReport {
    pub source_type: SourceType,
    pub created: u64,
    pub updated: u64,
    pub skipped: u64,
    pub failed: u64,
    /// Dispatch attempts made by the retry pass (also counted above).
    pub retried: u64,
    /// Rows of this source type still waiting for a retry after the run.
    pub pending_retry: u64,
    /// Source ids that crossed into `FailedPermanent` during this run.
    pub failed_permanent: Vec<String>,
    pub watermark: DateTime<Utc>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl SyncReport {
    pub fn new(source_type: SourceType, started_at: DateTime<Utc>) -> Self {
        Self {
            source_type,
            created: 0,
            updated: 0,
            skipped: 0,
            failed: 0,
            retried: 0,
            pending_retry: 0,
            failed_permanent: Vec::new(),
            watermark: started_at,
            started_at,
            finished_at: started_at,
        }
    }
}
