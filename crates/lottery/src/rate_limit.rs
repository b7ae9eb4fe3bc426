//! Fixed-window request limiting per client address
//!
//! Each client IP gets `max_requests` per window; the window starts with the
//! client's first request. Requests without a known peer address share one
//! bucket.

use axum::{
    extract::{ConnectInfo, Request, State},
    http::{header, HeaderName, HeaderValue, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use std::collections::HashMap;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::warn;

const RATELIMIT_LIMIT: HeaderName = HeaderName::from_static("ratelimit-limit");
const RATELIMIT_REMAINING: HeaderName = HeaderName::from_static("ratelimit-remaining");
const RATELIMIT_RESET: HeaderName = HeaderName::from_static("ratelimit-reset");

// Expired windows are swept once the table grows past this
const PRUNE_THRESHOLD: usize = 10_000;

/// Result of counting one request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    Allowed { remaining: u32, reset_after: Duration },
    Limited { retry_after: Duration },
}

#[derive(Debug, Clone, Copy)]
struct Window {
    started: Instant,
    count: u32,
}

/// Request counters keyed by client address
pub struct RateLimiter {
    max_requests: u32,
    window: Duration,
    clients: Mutex<HashMap<Option<IpAddr>, Window>>,
}

impl RateLimiter {
    pub fn new(max_requests: u32, window: Duration) -> Self {
        Self {
            max_requests,
            window,
            clients: Mutex::new(HashMap::new()),
        }
    }

    pub fn max_requests(&self) -> u32 {
        self.max_requests
    }

    /// Count a request from `client`
    pub async fn check(&self, client: Option<IpAddr>) -> Admission {
        self.check_at(client, Instant::now()).await
    }

    async fn check_at(&self, client: Option<IpAddr>, now: Instant) -> Admission {
        let mut clients = self.clients.lock().await;

        if clients.len() >= PRUNE_THRESHOLD {
            let window = self.window;
            clients.retain(|_, w| now.saturating_duration_since(w.started) < window);
        }

        let entry = clients.entry(client).or_insert(Window {
            started: now,
            count: 0,
        });
        if now.saturating_duration_since(entry.started) >= self.window {
            *entry = Window {
                started: now,
                count: 0,
            };
        }

        let reset_after = self
            .window
            .saturating_sub(now.saturating_duration_since(entry.started));

        if entry.count >= self.max_requests {
            return Admission::Limited {
                retry_after: reset_after,
            };
        }

        entry.count += 1;
        Admission::Allowed {
            remaining: self.max_requests - entry.count,
            reset_after,
        }
    }
}

/// axum middleware: answers 429 once the client's window is used up
pub async fn limit_requests(
    State(limiter): State<Arc<RateLimiter>>,
    request: Request,
    next: Next,
) -> Response {
    let client = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip());

    match limiter.check(client).await {
        Admission::Allowed {
            remaining,
            reset_after,
        } => {
            let mut response = next.run(request).await;
            let headers = response.headers_mut();
            headers.insert(RATELIMIT_LIMIT, HeaderValue::from(limiter.max_requests()));
            headers.insert(RATELIMIT_REMAINING, HeaderValue::from(remaining));
            headers.insert(RATELIMIT_RESET, HeaderValue::from(ceil_secs(reset_after)));
            response
        }
        Admission::Limited { retry_after } => {
            warn!(
                "Rate limit exceeded for {}",
                client.map_or_else(|| "unknown client".to_string(), |ip| ip.to_string())
            );
            let retry_after = ceil_secs(retry_after);
            (
                StatusCode::TOO_MANY_REQUESTS,
                [
                    (header::RETRY_AFTER, HeaderValue::from(retry_after)),
                    (RATELIMIT_LIMIT, HeaderValue::from(limiter.max_requests())),
                    (RATELIMIT_REMAINING, HeaderValue::from(0u32)),
                    (RATELIMIT_RESET, HeaderValue::from(retry_after)),
                ],
                Json(json!({ "error": "Too many requests, please try again later." })),
            )
                .into_response()
        }
    }
}

fn ceil_secs(duration: Duration) -> u64 {
    duration.as_secs() + u64::from(duration.subsec_nanos() > 0)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client(last: u8) -> Option<IpAddr> {
        Some(IpAddr::from([10, 0, 0, last]))
    }

    #[tokio::test]
    async fn test_limit_within_window() {
        let limiter = RateLimiter::new(2, Duration::from_secs(60));
        let start = Instant::now();

        assert!(matches!(
            limiter.check_at(client(1), start).await,
            Admission::Allowed { remaining: 1, .. }
        ));
        assert!(matches!(
            limiter.check_at(client(1), start + Duration::from_secs(1)).await,
            Admission::Allowed { remaining: 0, .. }
        ));
        assert_eq!(
            limiter.check_at(client(1), start + Duration::from_secs(20)).await,
            Admission::Limited {
                retry_after: Duration::from_secs(40)
            }
        );
    }

    #[tokio::test]
    async fn test_window_resets() {
        let limiter = RateLimiter::new(1, Duration::from_secs(60));
        let start = Instant::now();

        limiter.check_at(client(1), start).await;
        assert!(matches!(
            limiter.check_at(client(1), start + Duration::from_secs(59)).await,
            Admission::Limited { .. }
        ));
        assert!(matches!(
            limiter.check_at(client(1), start + Duration::from_secs(60)).await,
            Admission::Allowed { remaining: 0, .. }
        ));
    }

    #[tokio::test]
    async fn test_clients_are_counted_separately() {
        let limiter = RateLimiter::new(1, Duration::from_secs(60));
        let now = Instant::now();

        limiter.check_at(client(1), now).await;
        assert!(matches!(
            limiter.check_at(client(1), now).await,
            Admission::Limited { .. }
        ));
        assert!(matches!(
            limiter.check_at(client(2), now).await,
            Admission::Allowed { .. }
        ));
        assert!(matches!(
            limiter.check_at(None, now).await,
            Admission::Allowed { .. }
        ));
    }

    #[test]
    fn test_ceil_secs() {
        assert_eq!(ceil_secs(Duration::from_secs(3)), 3);
        assert_eq!(ceil_secs(Duration::from_millis(2_001)), 3);
        assert_eq!(ceil_secs(Duration::ZERO), 0);
    }
}
