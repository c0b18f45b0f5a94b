//! Destination knowledge-base capability.

use async_trait::async_trait;

use crate::error::DispatchError;
use crate::models::Document;

/// Idempotent create/update of documents in the target knowledge base.
#[async_trait]
pub trait Destination: Send + Sync {
    /// Create a new document and return its destination id.
    async fn create(&self, document: &Document) -> Result<String, DispatchError>;

    /// Replace the content of an existing document.
    ///
    /// Calling this again with identical content must be harmless.
    async fn update(&self, destination_doc_id: &str, document: &Document)
        -> Result<(), DispatchError>;
}
