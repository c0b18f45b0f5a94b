//! Dify knowledge-base destination.
//!
//! Documents are created with `create_by_text` and replaced in place with
//! `update_by_text`, so an item keeps one Dify document id for its whole
//! life. Auth is a dataset API key sent as a bearer token (`DIFY_API_KEY`).
//!
//! Transient failures (429, 5xx, network) are retried inside the call up to
//! `destination.max_retries` times; whatever still fails is handed back to
//! the engine as a [`DispatchError`] and counted against the item.

use anyhow::Result;
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};

use knowledge_sync_core::destination::Destination;
use knowledge_sync_core::error::DispatchError;
use knowledge_sync_core::models::Document;

use crate::config::{secret_from_env, DestinationConfig};
use crate::http::{json_body, send_with_retry, RetryPolicy};

#[derive(Serialize)]
struct ProcessRule {
    mode: &'static str,
}

#[derive(Serialize)]
struct CreateRequest<'a> {
    name: &'a str,
    text: &'a str,
    indexing_technique: &'a str,
    process_rule: ProcessRule,
}

#[derive(Serialize)]
struct UpdateRequest<'a> {
    name: &'a str,
    text: &'a str,
    process_rule: ProcessRule,
}

#[derive(Deserialize)]
struct DocumentResponse {
    document: Option<DocumentRef>,
}

#[derive(Deserialize)]
struct DocumentRef {
    id: Option<String>,
}

/// HTTP client for one Dify dataset.
pub struct DifyClient {
    config: DestinationConfig,
    client: Client,
    api_key: String,
    policy: RetryPolicy,
}

impl DifyClient {
    /// Build a client using `DIFY_API_KEY` from the environment.
    pub fn new(config: DestinationConfig) -> Result<Self> {
        let api_key = secret_from_env("DIFY_API_KEY")?;
        let policy = RetryPolicy::new(config.max_retries);
        Self::with_key(config, api_key, policy)
    }

    pub fn with_key(config: DestinationConfig, api_key: String, policy: RetryPolicy) -> Result<Self> {
        let client = Client::builder()
            .timeout(std::time::Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self {
            config,
            client,
            api_key,
            policy,
        })
    }

    fn dataset_url(&self, path: &str) -> String {
        format!(
            "{}/datasets/{}/{}",
            self.config.api_url.trim_end_matches('/'),
            self.config.dataset_id,
            path
        )
    }
}

#[async_trait]
impl Destination for DifyClient {
    async fn create(&self, document: &Document) -> Result<String, DispatchError> {
        let url = self.dataset_url("document/create_by_text");
        let body = CreateRequest {
            name: &document.name,
            text: &document.text,
            indexing_technique: &self.config.indexing_technique,
            process_rule: ProcessRule { mode: "automatic" },
        };

        let response = send_with_retry("dify create", self.policy, || {
            self.client
                .post(&url)
                .bearer_auth(&self.api_key)
                .json(&body)
        })
        .await?;
        let parsed: DocumentResponse = json_body("dify create", response).await?;

        parsed
            .document
            .and_then(|d| d.id)
            .filter(|id| !id.is_empty())
            .ok_or_else(|| {
                DispatchError::Permanent(format!(
                    "dify create for '{}' returned no document id",
                    document.name
                ))
            })
    }

    async fn update(&self, destination_doc_id: &str, document: &Document) -> Result<(), DispatchError> {
        let url = self.dataset_url(&format!("documents/{}/update_by_text", destination_doc_id));
        let body = UpdateRequest {
            name: &document.name,
            text: &document.text,
            process_rule: ProcessRule { mode: "automatic" },
        };

        send_with_retry("dify update", self.policy, || {
            self.client
                .post(&url)
                .bearer_auth(&self.api_key)
                .json(&body)
        })
        .await?;
        Ok(())
    }
}
