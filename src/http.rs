//! JSON-over-HTTP with exponential backoff, shared by the embedding and
//! judge clients.
//!
//! - HTTP 429 and 5xx: retry
//! - other 4xx: fail immediately
//! - network errors (including client timeouts): retry
//! - backoff: 1s, 2s, 4s, ... capped at 32s

use std::time::Duration;

use anyhow::{anyhow, bail, Result};
use tracing::debug;

pub fn client(timeout: Duration) -> Result<reqwest::Client> {
    Ok(reqwest::Client::builder().timeout(timeout).build()?)
}

/// Send the request built by `build` until it succeeds or retries run out.
///
/// `build` is called once per attempt since a `RequestBuilder` is consumed
/// by `send`.
pub async fn post_json_with_retry<F>(
    label: &str,
    max_retries: u32,
    build: F,
) -> Result<serde_json::Value>
where
    F: Fn() -> reqwest::RequestBuilder,
{
    let mut last_err = None;

    for attempt in 0..=max_retries {
        if attempt > 0 {
            let delay = Duration::from_secs(1 << (attempt - 1).min(5));
            debug!(label, attempt, delay_secs = delay.as_secs(), "retrying request");
            tokio::time::sleep(delay).await;
        }

        match build().send().await {
            Ok(response) => {
                let status = response.status();
                if status.is_success() {
                    return Ok(response.json().await?);
                }

                let body = response.text().await.unwrap_or_default();
                if status.as_u16() == 429 || status.is_server_error() {
                    last_err = Some(anyhow!("{} API error {}: {}", label, status, body));
                    continue;
                }
                bail!("{} API error {}: {}", label, status, body);
            }
            Err(e) => {
                last_err = Some(anyhow!("{} request failed: {}", label, e));
            }
        }
    }

    Err(last_err.unwrap_or_else(|| anyhow!("{} request failed after retries", label)))
}
