//! # knowledge-sync
//!
//! Incremental sync of Jira issues and Confluence pages into a Dify
//! knowledge base.
//!
//! Each run lists upstream items modified since the last synced watermark,
//! compares their version against a local SQLite ledger, and creates or
//! updates exactly one knowledge-base document per item. Failed deliveries
//! are retried on later runs until they succeed or hit the failure ceiling.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────┐   ┌──────────────┐   ┌──────────────┐
//! │  Connectors  │──▶│  SyncEngine  │──▶│     Dify     │
//! │ Jira / Conf. │   │ (core crate) │   │   dataset    │
//! └──────────────┘   └──────┬───────┘   └──────────────┘
//!                           │
//!                    ┌──────▼───────┐
//!                    │ SQLite ledger│
//!                    └──────┬───────┘
//!            ┌──────────────┼──────────────┐
//!            ▼              ▼              ▼
//!       ┌─────────┐   ┌──────────┐   ┌───────────┐
//!       │   CLI   │   │   HTTP   │   │ Scheduler │
//!       │ (ksync) │   │ trigger  │   │  (daily)  │
//!       └─────────┘   └──────────┘   └───────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! export ATLASSIAN_API_TOKEN=... DIFY_API_KEY=...
//! ksync init                    # create the ledger database
//! ksync sync all                # issues, then pages
//! ksync status                  # counts, watermarks, parked items
//! ksync serve                   # HTTP trigger on [server].bind
//! ksync serve --schedule        # HTTP trigger plus the daily scheduler
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`connector_jira`] | Jira issue connector |
//! | [`connector_confluence`] | Confluence page connector |
//! | [`dify`] | Dify destination client |
//! | [`http`] | Shared HTTP retry and failure classification |
//! | [`render`] | Timestamp parsing and document text rendering |
//! | [`sqlite_ledger`] | SQLite change ledger |
//! | [`sync_cmd`] | Sync orchestration |
//! | [`status`] | Ledger inspection and requeue |
//! | [`server`] | HTTP trigger server |
//! | [`scheduler`] | Daily scheduled runs |
//! | [`db`] | Database connection |
//! | [`migrate`] | Schema migrations |

pub mod config;
pub mod connector_confluence;
pub mod connector_jira;
pub mod db;
pub mod dify;
pub mod http;
pub mod logging;
pub mod migrate;
pub mod render;
pub mod scheduler;
pub mod server;
pub mod sources;
pub mod sqlite_ledger;
pub mod status;
pub mod sync_cmd;
