//! Shared HTTP plumbing for connectors and the destination client.
//!
//! Failure classification:
//! - HTTP 429 and 5xx → transient (retried)
//! - other HTTP 4xx → permanent (returned immediately)
//! - network / timeout errors → transient (retried)
//!
//! Backoff doubles from `base_delay` and is capped at 2^5 × `base_delay`.

use std::time::Duration;

use reqwest::{RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;

use knowledge_sync_core::error::{DispatchError, SourceError};

/// Classified HTTP failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HttpFailure {
    Transient(String),
    Permanent(String),
    /// HTTP 404; callers that look up a single entity treat this as absence.
    NotFound(String),
}

impl From<HttpFailure> for DispatchError {
    fn from(f: HttpFailure) -> Self {
        match f {
            HttpFailure::Transient(m) => DispatchError::Transient(m),
            HttpFailure::Permanent(m) | HttpFailure::NotFound(m) => DispatchError::Permanent(m),
        }
    }
}

impl From<HttpFailure> for SourceError {
    fn from(f: HttpFailure) -> Self {
        match f {
            HttpFailure::Transient(m) => SourceError::Transient(m),
            HttpFailure::Permanent(m) | HttpFailure::NotFound(m) => SourceError::Permanent(m),
        }
    }
}

/// In-call retry settings.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_delay: Duration,
}

impl RetryPolicy {
    pub fn new(max_retries: u32) -> Self {
        Self {
            max_retries,
            base_delay: Duration::from_secs(1),
        }
    }

    fn delay(&self, attempt: u32) -> Duration {
        self.base_delay * (1u32 << (attempt - 1).min(5))
    }
}

pub fn is_transient_status(status: StatusCode) -> bool {
    status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error()
}

/// Send a request, retrying transient failures per `policy`.
///
/// `build` is called once per attempt because a `RequestBuilder` cannot be
/// reused after `send`. Returns the first successful (2xx) response.
pub async fn send_with_retry<F>(
    label: &str,
    policy: RetryPolicy,
    build: F,
) -> Result<Response, HttpFailure>
where
    F: Fn() -> RequestBuilder,
{
    let mut last_err = None;

    for attempt in 0..=policy.max_retries {
        if attempt > 0 {
            tokio::time::sleep(policy.delay(attempt)).await;
            tracing::debug!(label, attempt, "retrying request");
        }

        match build().send().await {
            Ok(response) => {
                let status = response.status();
                if status.is_success() {
                    return Ok(response);
                }

                let body_text = response.text().await.unwrap_or_default();
                let message = format!("{} returned {}: {}", label, status, truncate(&body_text, 300));
                if is_transient_status(status) {
                    last_err = Some(HttpFailure::Transient(message));
                    continue;
                }
                if status == StatusCode::NOT_FOUND {
                    return Err(HttpFailure::NotFound(message));
                }
                return Err(HttpFailure::Permanent(message));
            }
            Err(e) => {
                last_err = Some(HttpFailure::Transient(format!("{} request failed: {}", label, e)));
                continue;
            }
        }
    }

    Err(last_err
        .unwrap_or_else(|| HttpFailure::Transient(format!("{} failed after retries", label))))
}

/// Decode a JSON body; an undecodable body from a 2xx is a permanent failure.
pub async fn json_body<T: DeserializeOwned>(label: &str, response: Response) -> Result<T, HttpFailure> {
    response
        .json::<T>()
        .await
        .map_err(|e| HttpFailure::Permanent(format!("{} returned malformed JSON: {}", label, e)))
}

fn truncate(s: &str, max_chars: usize) -> String {
    match s.char_indices().nth(max_chars) {
        Some((idx, _)) => format!("{}…", &s[..idx]),
        None => s.to_string(),
    }
}
