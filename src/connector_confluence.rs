//! Confluence page connector.
//!
//! Walks all pages of one space through `GET /wiki/rest/api/content`
//! (offset pagination), keeps the ones whose latest version is at or after
//! the watermark, and renders the storage-format body as plain text.
//!
//! The change marker is the page's content version number, so an edit
//! always produces a new version even when two edits share a timestamp.
//! Documents are named by page id; titles repeat across a space and change
//! on rename.
//!
//! ```toml
//! [sources.confluence]
//! base_url = "https://acme.atlassian.net"
//! email = "bot@acme.com"
//! space_key = "TEAM"
//! max_chars = 5000
//! ```

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::Client;
use serde::Deserialize;

use knowledge_sync_core::error::SourceError;
use knowledge_sync_core::models::{Candidate, Document, SourceType};
use knowledge_sync_core::source::SourceConnector;

use crate::config::{secret_from_env, ConfluenceConfig};
use crate::http::{json_body, send_with_retry, HttpFailure, RetryPolicy};
use crate::render::{parse_timestamp, render_page};

const EXPAND: &str = "version,body.storage";

#[derive(Debug, Deserialize)]
struct ContentPage {
    #[serde(default)]
    results: Vec<ConfluencePage>,
}

#[derive(Debug, Deserialize)]
struct ConfluencePage {
    id: String,
    title: String,
    version: PageVersion,
    #[serde(default)]
    body: Option<PageBody>,
}

#[derive(Debug, Deserialize)]
struct PageVersion {
    number: u64,
    when: String,
}

#[derive(Debug, Deserialize)]
struct PageBody {
    storage: Option<StorageBody>,
}

#[derive(Debug, Deserialize)]
struct StorageBody {
    #[serde(default)]
    value: String,
}

/// Confluence connector for one space.
pub struct ConfluenceConnector {
    name: String,
    config: ConfluenceConfig,
    client: Client,
    token: String,
    policy: RetryPolicy,
}

impl ConfluenceConnector {
    /// Build a connector using `ATLASSIAN_API_TOKEN` from the environment.
    pub fn new(config: ConfluenceConfig) -> Result<Self> {
        let token = secret_from_env("ATLASSIAN_API_TOKEN")?;
        Self::with_token(config, token, RetryPolicy::new(2))
    }

    pub fn with_token(config: ConfluenceConfig, token: String, policy: RetryPolicy) -> Result<Self> {
        let client = Client::builder()
            .timeout(std::time::Duration::from_secs(30))
            .build()?;
        Ok(Self {
            name: format!("confluence:{}", config.space_key),
            config,
            client,
            token,
            policy,
        })
    }

    fn api(&self, path: &str) -> String {
        format!(
            "{}/wiki/rest/api/{}",
            self.config.base_url.trim_end_matches('/'),
            path
        )
    }

    fn to_candidate(&self, page: ConfluencePage) -> Result<Candidate, SourceError> {
        let modified_at = parse_timestamp(&page.version.when).ok_or_else(|| {
            SourceError::Permanent(format!(
                "page {} has unparseable version time '{}'",
                page.id, page.version.when
            ))
        })?;
        let html = page
            .body
            .as_ref()
            .and_then(|b| b.storage.as_ref())
            .map(|s| s.value.as_str())
            .unwrap_or("");
        let text = render_page(&page.title, html, self.config.max_chars);
        Ok(Candidate {
            version: page.version.number.to_string(),
            modified_at,
            document: Document {
                name: page.id.clone(),
                text,
            },
            source_id: page.id,
        })
    }
}

#[async_trait]
impl SourceConnector for ConfluenceConnector {
    fn name(&self) -> &str {
        &self.name
    }

    fn source_type(&self) -> SourceType {
        SourceType::Page
    }

    async fn fetch_since(&self, watermark: DateTime<Utc>) -> Result<Vec<Candidate>, SourceError> {
        let url = self.api("content");
        let limit = self.config.page_size;
        let limit_str = limit.to_string();
        let mut start: u32 = 0;
        let mut out = Vec::new();

        loop {
            let start_str = start.to_string();
            let response = send_with_retry("confluence content", self.policy, || {
                self.client
                    .get(&url)
                    .basic_auth(&self.config.email, Some(&self.token))
                    .query(&[
                        ("spaceKey", self.config.space_key.as_str()),
                        ("type", "page"),
                        ("expand", EXPAND),
                        ("start", start_str.as_str()),
                        ("limit", limit_str.as_str()),
                    ])
            })
            .await?;
            let page: ContentPage = json_body("confluence content", response).await?;

            let fetched = page.results.len() as u32;
            for result in page.results {
                match self.to_candidate(result) {
                    Ok(candidate) if candidate.modified_at >= watermark => out.push(candidate),
                    Ok(_) => {}
                    Err(e) => tracing::warn!(source = self.name.as_str(), error = %e, "skipping page"),
                }
            }

            start += fetched;
            if fetched < limit {
                break;
            }
        }

        tracing::info!(source = self.name.as_str(), items = out.len(), "confluence pages fetched");
        Ok(out)
    }

    async fn fetch_item(&self, source_id: &str) -> Result<Option<Candidate>, SourceError> {
        let url = self.api(&format!("content/{}", source_id));
        let result = send_with_retry("confluence page", self.policy, || {
            self.client
                .get(&url)
                .basic_auth(&self.config.email, Some(&self.token))
                .query(&[("expand", EXPAND)])
        })
        .await;

        let response = match result {
            Ok(r) => r,
            Err(HttpFailure::NotFound(_)) => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let page: ConfluencePage = json_body("confluence page", response).await?;
        self.to_candidate(page).map(Some)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn page_version_number_is_the_change_marker() {
        let connector = ConfluenceConnector::with_token(
            ConfluenceConfig {
                base_url: "https://acme.atlassian.net".to_string(),
                email: "bot@acme.com".to_string(),
                space_key: "TEAM".to_string(),
                lookback_days: 30,
                page_size: 50,
                max_chars: 5000,
            },
            "token".to_string(),
            RetryPolicy::new(0),
        )
        .unwrap();
        let page: ConfluencePage = serde_json::from_value(serde_json::json!({
            "id": "98304",
            "title": "On-call runbook",
            "version": { "number": 7, "when": "2024-03-05T08:15:00.000Z" },
            "body": { "storage": { "value": "<p>Page the <b>SRE</b></p>" } }
        }))
        .unwrap();
        let c = connector.to_candidate(page).unwrap();
        assert_eq!(c.source_id, "98304");
        assert_eq!(c.version, "7");
        assert_eq!(c.document.name, "98304");
        assert_eq!(c.document.text, "Title: On-call runbook\n\nContent: Page the SRE");
        assert_eq!(
            connector.api("content"),
            "https://acme.atlassian.net/wiki/rest/api/content"
        );
    }
}
