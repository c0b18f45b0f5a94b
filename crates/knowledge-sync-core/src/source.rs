//! Source connector capability.
//!
//! A connector lists upstream items of one [`SourceType`] modified at or
//! after a watermark, and can fetch a single item by id so the retry pass
//! dispatches fresh content rather than a cached copy.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::SourceError;
use crate::models::{Candidate, SourceType};

#[async_trait]
pub trait SourceConnector: Send + Sync {
    /// Instance label used in logs and reports (e.g. `"jira:PROJ"`).
    fn name(&self) -> &str;

    fn source_type(&self) -> SourceType;

    /// Items modified at or after `watermark` (inclusive).
    ///
    /// Finite per call and safe to call again; order is not significant.
    async fn fetch_since(&self, watermark: DateTime<Utc>) -> Result<Vec<Candidate>, SourceError>;

    /// Current state of one item, or `None` if it no longer exists upstream.
    async fn fetch_item(&self, source_id: &str) -> Result<Option<Candidate>, SourceError>;
}
