//! Sync orchestration shared by the CLI, the HTTP server, and the scheduler.
//!
//! Builds the engine (SQLite ledger + Dify destination) and the configured
//! connectors, then runs one engine pass per source type. Source types are
//! processed one after another; a failure in one does not stop the next.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use anyhow::{bail, Result};
use chrono::{DateTime, Utc};
use serde::Serialize;

use knowledge_sync_core::{SourceConnector, SourceType, SyncEngine, SyncReport};

use crate::config::Config;
use crate::connector_confluence::ConfluenceConnector;
use crate::connector_jira::JiraConnector;
use crate::dify::DifyClient;
use crate::sqlite_ledger::SqliteLedger;

/// Which source types a run covers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncTarget {
    One(SourceType),
    All,
}

impl SyncTarget {
    pub fn source_types(&self) -> Vec<SourceType> {
        match self {
            SyncTarget::One(st) => vec![*st],
            SyncTarget::All => SourceType::ALL.to_vec(),
        }
    }
}

impl fmt::Display for SyncTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SyncTarget::One(st) => write!(f, "{}", st),
            SyncTarget::All => f.write_str("all"),
        }
    }
}

impl FromStr for SyncTarget {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "all" => Ok(SyncTarget::All),
            other => other.parse().map(SyncTarget::One).map_err(|_| {
                format!("Unknown sync target: '{}'. Available: issue, page, all", other)
            }),
        }
    }
}

/// Outcome of one source type within a run.
#[derive(Debug, Clone, Serialize)]
pub struct SourceOutcome {
    pub source: String,
    pub source_type: SourceType,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub report: Option<SyncReport>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Outcome of a whole run across source types.
#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub success: bool,
    pub sources: Vec<SourceOutcome>,
}

/// Engine wired to the configured ledger and destination.
pub async fn build_engine(config: &Config) -> Result<SyncEngine> {
    let ledger = SqliteLedger::open(config).await?;
    let destination = DifyClient::new(config.destination.clone())?;
    Ok(SyncEngine::new(
        Arc::new(ledger),
        Arc::new(destination),
        config.sync_options(),
    ))
}

/// Connectors for `target`.
///
/// Naming a single unconfigured source is an error; `all` skips the
/// unconfigured ones and fails only when none are configured.
pub fn build_connectors(
    config: &Config,
    target: SyncTarget,
) -> Result<Vec<Box<dyn SourceConnector>>> {
    let mut connectors: Vec<Box<dyn SourceConnector>> = Vec::new();

    for source_type in target.source_types() {
        match source_type {
            SourceType::Issue => match &config.sources.jira {
                Some(jira) => connectors.push(Box::new(JiraConnector::new(jira.clone())?)),
                None if target == SyncTarget::All => {
                    tracing::debug!("sources.jira not configured, skipping issues")
                }
                None => bail!("No Jira source configured. Add [sources.jira] to your config."),
            },
            SourceType::Page => match &config.sources.confluence {
                Some(confluence) => {
                    connectors.push(Box::new(ConfluenceConnector::new(confluence.clone())?))
                }
                None if target == SyncTarget::All => {
                    tracing::debug!("sources.confluence not configured, skipping pages")
                }
                None => bail!(
                    "No Confluence source configured. Add [sources.confluence] to your config."
                ),
            },
        }
    }

    if connectors.is_empty() {
        bail!("No sources configured. Add [sources.jira] or [sources.confluence] to your config.");
    }
    Ok(connectors)
}

/// Run every connector through `engine`, one source type at a time.
pub async fn run_connectors(
    engine: &SyncEngine,
    connectors: &[Box<dyn SourceConnector>],
) -> RunSummary {
    let started_at = Utc::now();
    let mut sources = Vec::with_capacity(connectors.len());

    for connector in connectors {
        let outcome = match engine.run_sync(connector.as_ref()).await {
            Ok(report) => SourceOutcome {
                source: connector.name().to_string(),
                source_type: connector.source_type(),
                report: Some(report),
                error: None,
            },
            Err(e) => {
                tracing::error!(source = connector.name(), error = %e, "sync aborted");
                SourceOutcome {
                    source: connector.name().to_string(),
                    source_type: connector.source_type(),
                    report: None,
                    error: Some(e.to_string()),
                }
            }
        };
        sources.push(outcome);
    }

    RunSummary {
        started_at,
        finished_at: Utc::now(),
        success: sources.iter().all(|s| s.error.is_none()),
        sources,
    }
}

/// Build everything from config and run `target` once.
pub async fn sync_target(config: &Config, target: SyncTarget) -> Result<RunSummary> {
    let connectors = build_connectors(config, target)?;
    let engine = build_engine(config).await?;
    Ok(run_connectors(&engine, &connectors).await)
}

/// `ksync sync <target>`: run and print a per-source report.
pub async fn run_sync(config: &Config, target: &str) -> Result<()> {
    let target: SyncTarget = target.parse().map_err(anyhow::Error::msg)?;
    let summary = sync_target(config, target).await?;
    print_summary(&summary);

    let failed: Vec<&str> = summary
        .sources
        .iter()
        .filter(|s| s.error.is_some())
        .map(|s| s.source.as_str())
        .collect();
    if !failed.is_empty() {
        bail!("sync failed for: {}", failed.join(", "));
    }
    println!("ok");
    Ok(())
}

fn print_summary(summary: &RunSummary) {
    for outcome in &summary.sources {
        println!("sync {} ({})", outcome.source_type, outcome.source);
        if let Some(error) = &outcome.error {
            println!("  error: {}", error);
            continue;
        }
        let Some(report) = &outcome.report else {
            continue;
        };
        println!("  watermark: {}", report.watermark.to_rfc3339());
        println!("  created: {}", report.created);
        println!("  updated: {}", report.updated);
        println!("  skipped: {}", report.skipped);
        println!("  failed: {}", report.failed);
        println!("  retried: {}", report.retried);
        println!("  pending retry: {}", report.pending_retry);
        if !report.failed_permanent.is_empty() {
            println!(
                "  failed permanently: {}",
                report.failed_permanent.join(", ")
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_targets() {
        assert_eq!("all".parse::<SyncTarget>().unwrap(), SyncTarget::All);
        assert_eq!(
            "issue".parse::<SyncTarget>().unwrap(),
            SyncTarget::One(SourceType::Issue)
        );
        let err = "wiki".parse::<SyncTarget>().unwrap_err();
        assert!(err.contains("issue, page, all"));
        assert_eq!(SyncTarget::One(SourceType::Page).to_string(), "page");
        assert_eq!(SyncTarget::All.to_string(), "all");
    }

    #[test]
    fn all_covers_every_source_type() {
        assert_eq!(
            SyncTarget::All.source_types(),
            vec![SourceType::Issue, SourceType::Page]
        );
    }
}
