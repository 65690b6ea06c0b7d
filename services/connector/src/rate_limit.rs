//! Throttling backoff for outbound API calls.
//!
//! A throttled (429) response is retried after a provider-supplied delay:
//! the `Retry-After` header when present, else a retry timestamp parsed out
//! of the error body, else a fixed default. A small buffer is added on top
//! to absorb clock skew. Retries are bounded; any other non-success status
//! fails immediately without retry.

use std::time::Duration;

use chrono::{DateTime, Utc};
use regex::Regex;
use reqwest::{header::AUTHORIZATION, Client, Response, StatusCode};

use crate::error::ConnectorError;

pub const MAX_RATE_LIMIT_RETRIES: u32 = 6;
const DEFAULT_RETRY_SECS: u64 = 60;
const RETRY_BUFFER_SECS: u64 = 3;

#[derive(Debug, Clone)]
pub struct RateLimitPolicy {
    pub max_retries: u32,
    pub default_delay_secs: u64,
    pub buffer_secs: u64,
}

impl Default for RateLimitPolicy {
    fn default() -> Self {
        Self {
            max_retries: MAX_RATE_LIMIT_RETRIES,
            default_delay_secs: DEFAULT_RETRY_SECS,
            buffer_secs: RETRY_BUFFER_SECS,
        }
    }
}

impl RateLimitPolicy {
    /// Delay to sleep before retrying a throttled request.
    pub fn delay_for(&self, retry_after: Option<&str>, body: &str) -> Duration {
        let secs = retry_after
            .and_then(|v| v.trim().parse::<u64>().ok())
            .or_else(|| parse_retry_timestamp(body))
            .unwrap_or(self.default_delay_secs);
        Duration::from_secs(secs + self.buffer_secs)
    }
}

/// Extract seconds-to-wait from an error body carrying a timestamp like
/// `"Retry after 2026-02-07T10:30:00.000Z"`. Returns `None` if no parseable
/// timestamp is present.
fn parse_retry_timestamp(body: &str) -> Option<u64> {
    let re = Regex::new(r"Retry after (\d{4}-\d{2}-\d{2}T\d{2}:\d{2}:\d{2}(?:\.\d+)?Z)").ok()?;
    let ts = re.captures(body)?.get(1)?.as_str();
    let retry_at = DateTime::parse_from_rfc3339(ts).ok()?;
    let delta = (retry_at.with_timezone(&Utc) - Utc::now()).num_seconds();
    Some(delta.max(0) as u64)
}

/// Issue a GET under the rate-limit policy: sleep and retry on 429 up to the
/// bound, fail fast with `Download` on any other non-success status.
pub async fn get_with_backoff(
    http: &Client,
    policy: &RateLimitPolicy,
    provider: &str,
    url: &str,
    query: &[(&str, String)],
    bearer: &str,
) -> Result<Response, ConnectorError> {
    for attempt in 0..policy.max_retries {
        let response = http
            .get(url)
            .query(query)
            .header(AUTHORIZATION, bearer)
            .send()
            .await?;

        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        if status == StatusCode::TOO_MANY_REQUESTS {
            if attempt >= policy.max_retries - 1 {
                break;
            }
            let retry_after = response
                .headers()
                .get("retry-after")
                .and_then(|v| v.to_str().ok())
                .map(str::to_owned);
            let body = response.text().await.unwrap_or_default();
            let delay = policy.delay_for(retry_after.as_deref(), &body);
            tracing::warn!(
                provider,
                delay_secs = delay.as_secs(),
                "rate limited, backing off"
            );
            tokio::time::sleep(delay).await;
            continue;
        }

        let body = response.text().await.unwrap_or_default();
        return Err(ConnectorError::Download {
            provider: provider.to_string(),
            url: url.to_string(),
            status: status.as_u16(),
            body,
        });
    }

    Err(ConnectorError::RateLimit {
        provider: provider.to_string(),
    })
}
