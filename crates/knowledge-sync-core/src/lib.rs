//! # knowledge-sync core
//!
//! Runtime-agnostic logic for incremental knowledge-base sync: tracked-item
//! models, the change ledger trait, the pure per-item state machine, and the
//! sync engine that ties connectors, ledger, and destination together.
//!
//! This crate contains no tokio, sqlx, or HTTP dependencies. Concrete
//! connectors, the SQLite ledger, and the destination client live in the
//! `knowledge-sync` crate.

pub mod destination;
pub mod engine;
pub mod error;
pub mod ledger;
pub mod models;
pub mod source;
pub mod state;

pub use destination::Destination;
pub use engine::{SyncEngine, SyncOptions};
pub use error::{DispatchError, LedgerError, SourceError, SyncError};
pub use ledger::Ledger;
pub use models::{Candidate, Document, ItemKey, ItemStatus, SourceType, SyncReport, TrackedItem};
pub use source::SourceConnector;
