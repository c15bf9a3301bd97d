//! HTTP fetch with automatic retry and exponential backoff.
//!
//! [`fetch_with_retry`] separates permanent absence from transient failure:
//! a 404 returns `Ok(None)` immediately, while network errors and any other
//! non-2xx status are retried with a doubling backoff.

use reqwest::{Client, Response, StatusCode};
use std::time::Duration;
use tracing::{debug, warn};

/// Default number of fetch attempts (1 initial + 2 retries).
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;

/// Default backoff before the first retry in milliseconds. Doubles per retry.
pub const DEFAULT_BACKOFF_MS: u64 = 100;

/// Configuration for [`fetch_with_retry`].
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Total number of attempts (minimum 1; 0 is treated as 1).
    pub max_attempts: u32,
    /// Sleep before the first retry; each later retry sleeps twice as long.
    pub backoff: Duration,
    /// Optional per-request timeout applied to each individual attempt.
    ///
    /// When `None`, the client's own timeout applies.
    pub timeout: Option<Duration>,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            backoff: Duration::from_millis(DEFAULT_BACKOFF_MS),
            timeout: None,
        }
    }
}

impl RetryConfig {
    /// Sleep after failed attempt `attempt` (1-based): `backoff * 2^(attempt-1)`.
    pub fn delay_after(&self, attempt: u32) -> Duration {
        self.backoff
            .saturating_mul(1u32.checked_shl(attempt.saturating_sub(1)).unwrap_or(u32::MAX))
    }
}

/// Fetch a URL via HTTP GET with automatic retry and backoff.
///
/// Returns:
/// - `Ok(Some(response))` on the first 2xx response
/// - `Ok(None)` on a 404, without retrying
/// - `Err(e)` with the last error once all attempts are exhausted
///
/// # Errors
///
/// Returns the last network or non-2xx error after all retries fail.
pub async fn fetch_with_retry(
    client: &Client,
    url: &str,
    config: &RetryConfig,
) -> Result<Option<Response>, reqwest::Error> {
    let max_attempts = config.max_attempts.max(1);

    // Retry loop: attempts 1 through N-1, with backoff between each.
    // The final attempt is handled separately below to guarantee a
    // return without `unreachable!()` or other panic paths.
    for attempt in 1..max_attempts {
        match send(client, url, config).await {
            Ok(response) if response.status().is_success() => return Ok(Some(response)),

            Ok(response) if response.status() == StatusCode::NOT_FOUND => {
                debug!("HTTP fetch returned 404 for {}, not retrying", url);
                return Ok(None);
            }

            Ok(response) => {
                warn!(
                    "HTTP fetch returned {} for {} (attempt {}/{})",
                    response.status(),
                    url,
                    attempt,
                    max_attempts
                );
            }

            Err(e) => {
                warn!(
                    "HTTP fetch failed for {} (attempt {}/{}): {}",
                    url, attempt, max_attempts, e
                );
            }
        }

        let delay = config.delay_after(attempt);
        warn!("Retrying HTTP fetch in {}ms...", delay.as_millis());
        tokio::time::sleep(delay).await;
    }

    // Final attempt returns directly
    let response = send(client, url, config).await.map_err(|e| {
        warn!(
            "HTTP fetch failed for {} (attempt {}/{}): {}",
            url, max_attempts, max_attempts, e
        );
        e
    })?;

    if response.status() == StatusCode::NOT_FOUND {
        debug!("HTTP fetch returned 404 for {}", url);
        return Ok(None);
    }

    if !response.status().is_success() {
        warn!(
            "HTTP fetch returned {} for {} (attempt {}/{})",
            response.status(),
            url,
            max_attempts,
            max_attempts
        );
    }

    response.error_for_status().map(Some)
}

async fn send(client: &Client, url: &str, config: &RetryConfig) -> reqwest::Result<Response> {
    let mut request = client.get(url);
    if let Some(timeout) = config.timeout {
        request = request.timeout(timeout);
    }
    request.send().await
}
