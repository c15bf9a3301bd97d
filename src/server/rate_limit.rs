//! Per-IP rate limiting middleware.
//!
//! Fixed-window counter using DashMap, keyed on the first `X-Forwarded-For`
//! address. Disabled unless `RATE_LIMIT_RPM` is set.

use axum::{
    Json,
    extract::{Request, State},
    http::{HeaderValue, StatusCode, header},
    middleware::Next,
    response::{IntoResponse, Response},
};
use dashmap::DashMap;
use serde_json::json;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::warn;

use super::state::AppState;

/// Per-IP fixed-window rate limiter.
#[derive(Clone, Debug)]
pub struct RateLimiter {
    /// Counters per client key: (request_count, window_start)
    counters: Arc<DashMap<String, (u32, Instant)>>,
    limit: u32,
    window: Duration,
}

impl RateLimiter {
    pub fn new(requests_per_minute: u32) -> Self {
        Self::with_window(requests_per_minute, Duration::from_secs(60))
    }

    fn with_window(limit: u32, window: Duration) -> Self {
        Self {
            counters: Arc::new(DashMap::new()),
            limit,
            window,
        }
    }

    /// Count a request from `client`.
    ///
    /// Returns the time left in the current window when over the limit.
    fn check(&self, client: &str) -> Result<(), Duration> {
        let now = Instant::now();
        let mut entry = self
            .counters
            .entry(client.to_string())
            .or_insert((0, now));

        if entry.1.elapsed() >= self.window {
            *entry = (0, now);
        }

        entry.0 += 1;
        if entry.0 <= self.limit {
            Ok(())
        } else {
            Err(self.window.saturating_sub(entry.1.elapsed()))
        }
    }

    /// Drop windows that have already closed. Returns how many were removed.
    pub fn cleanup(&self) -> usize {
        let before = self.counters.len();
        self.counters
            .retain(|_, (_, window_start)| window_start.elapsed() < self.window);
        before.saturating_sub(self.counters.len())
    }

    pub fn tracked_clients(&self) -> usize {
        self.counters.len()
    }
}

/// First address of `X-Forwarded-For`, or `unknown` when not behind a proxy.
fn client_key(req: &Request) -> String {
    req.headers()
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(str::trim)
        .filter(|ip| !ip.is_empty())
        .unwrap_or("unknown")
        .to_string()
}

/// Axum middleware: reject requests exceeding the per-IP rate limit.
pub async fn rate_limit_middleware(
    State(state): State<AppState>,
    req: Request,
    next: Next,
) -> Response {
    if let Some(ref limiter) = state.rate_limiter {
        let client = client_key(&req);
        if let Err(retry_after) = limiter.check(&client) {
            warn!("Rate limit exceeded for {} on {}", client, req.uri().path());
            let mut response = (
                StatusCode::TOO_MANY_REQUESTS,
                Json(json!({ "error": "Rate limit exceeded" })),
            )
                .into_response();
            let secs = retry_after.as_secs().max(1);
            if let Ok(value) = HeaderValue::from_str(&secs.to_string()) {
                response.headers_mut().insert(header::RETRY_AFTER, value);
            }
            return response;
        }
    }

    next.run(req).await
}
