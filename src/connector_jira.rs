//! Jira issue connector.
//!
//! Lists issues of one project through the Jira REST API v2 search endpoint
//! and renders each as a plain-text document.
//!
//! # Configuration
//!
//! ```toml
//! [sources.jira]
//! base_url = "https://acme.atlassian.net"
//! email = "bot@acme.com"
//! project_key = "PROJ"
//! lookback_days = 30
//! page_size = 50
//! ```
//!
//! The API token is read from `ATLASSIAN_API_TOKEN`.
//!
//! # Watermark handling
//!
//! JQL date literals have minute granularity and are interpreted in the Jira
//! user's time zone, so the query window is widened by a day and the exact
//! bound is applied client-side against each issue's `updated` field. Items
//! at exactly the watermark instant are kept; the engine's per-item version
//! check drops the ones that are already synced.

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use reqwest::Client;
use serde::Deserialize;

use knowledge_sync_core::error::SourceError;
use knowledge_sync_core::models::{Candidate, Document, SourceType};
use knowledge_sync_core::source::SourceConnector;

use crate::config::{secret_from_env, JiraConfig};
use crate::http::{json_body, send_with_retry, HttpFailure, RetryPolicy};
use crate::render::{parse_timestamp, render_issue};

const FIELDS: &str = "summary,description,status,updated";

#[derive(Debug, Deserialize)]
struct SearchResponse {
    #[serde(default)]
    total: u32,
    #[serde(default)]
    issues: Vec<JiraIssue>,
}

#[derive(Debug, Deserialize)]
struct JiraIssue {
    key: String,
    fields: IssueFields,
}

#[derive(Debug, Deserialize)]
struct IssueFields {
    #[serde(default)]
    summary: String,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    status: Option<IssueStatus>,
    updated: String,
}

#[derive(Debug, Deserialize)]
struct IssueStatus {
    name: String,
}

/// Jira connector for one project.
pub struct JiraConnector {
    name: String,
    config: JiraConfig,
    client: Client,
    token: String,
    policy: RetryPolicy,
}

impl JiraConnector {
    /// Build a connector using `ATLASSIAN_API_TOKEN` from the environment.
    pub fn new(config: JiraConfig) -> Result<Self> {
        let token = secret_from_env("ATLASSIAN_API_TOKEN")?;
        Self::with_token(config, token, RetryPolicy::new(2))
    }

    pub fn with_token(config: JiraConfig, token: String, policy: RetryPolicy) -> Result<Self> {
        let client = Client::builder()
            .timeout(std::time::Duration::from_secs(30))
            .build()?;
        Ok(Self {
            name: format!("jira:{}", config.project_key),
            config,
            client,
            token,
            policy,
        })
    }

    fn api(&self, path: &str) -> String {
        format!("{}/rest/api/2/{}", self.config.base_url.trim_end_matches('/'), path)
    }

    fn jql(&self, watermark: DateTime<Utc>) -> String {
        let widened = watermark - Duration::days(1);
        format!(
            "project = \"{}\" AND updated >= \"{}\" ORDER BY updated ASC",
            self.config.project_key,
            widened.format("%Y/%m/%d %H:%M")
        )
    }

    fn to_candidate(&self, issue: JiraIssue) -> Result<Candidate, SourceError> {
        let modified_at = parse_timestamp(&issue.fields.updated).ok_or_else(|| {
            SourceError::Permanent(format!(
                "issue {} has unparseable updated time '{}'",
                issue.key, issue.fields.updated
            ))
        })?;
        let status = issue
            .fields
            .status
            .as_ref()
            .map(|s| s.name.as_str())
            .unwrap_or("Unknown");
        let text = render_issue(
            &issue.fields.summary,
            issue.fields.description.as_deref(),
            status,
        );
        Ok(Candidate {
            version: issue.fields.updated.clone(),
            modified_at,
            document: Document {
                name: issue.key.clone(),
                text,
            },
            source_id: issue.key,
        })
    }
}

#[async_trait]
impl SourceConnector for JiraConnector {
    fn name(&self) -> &str {
        &self.name
    }

    fn source_type(&self) -> SourceType {
        SourceType::Issue
    }

    async fn fetch_since(&self, watermark: DateTime<Utc>) -> Result<Vec<Candidate>, SourceError> {
        let jql = self.jql(watermark);
        let page_size = self.config.page_size.to_string();
        let url = self.api("search");
        let mut start_at: u32 = 0;
        let mut out = Vec::new();

        loop {
            let start = start_at.to_string();
            let response = send_with_retry("jira search", self.policy, || {
                self.client
                    .get(&url)
                    .basic_auth(&self.config.email, Some(&self.token))
                    .query(&[
                        ("jql", jql.as_str()),
                        ("fields", FIELDS),
                        ("startAt", start.as_str()),
                        ("maxResults", page_size.as_str()),
                    ])
            })
            .await?;
            let page: SearchResponse = json_body("jira search", response).await?;

            let fetched = page.issues.len() as u32;
            for issue in page.issues {
                match self.to_candidate(issue) {
                    Ok(candidate) if candidate.modified_at >= watermark => out.push(candidate),
                    Ok(_) => {}
                    Err(e) => tracing::warn!(source = self.name.as_str(), error = %e, "skipping issue"),
                }
            }

            start_at += fetched;
            if fetched == 0 || start_at >= page.total {
                break;
            }
        }

        tracing::info!(source = self.name.as_str(), items = out.len(), "jira issues fetched");
        Ok(out)
    }

    async fn fetch_item(&self, source_id: &str) -> Result<Option<Candidate>, SourceError> {
        let url = self.api(&format!("issue/{}", source_id));
        let result = send_with_retry("jira issue", self.policy, || {
            self.client
                .get(&url)
                .basic_auth(&self.config.email, Some(&self.token))
                .query(&[("fields", FIELDS)])
        })
        .await;

        let response = match result {
            Ok(r) => r,
            Err(HttpFailure::NotFound(_)) => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let issue: JiraIssue = json_body("jira issue", response).await?;
        self.to_candidate(issue).map(Some)
    }
}
