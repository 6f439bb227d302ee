use std::{collections::HashMap, net::SocketAddr, time::Duration};

use axum::{
    Json,
    extract::{ConnectInfo, Request, State},
    http::{HeaderMap, HeaderName, HeaderValue, StatusCode, header::RETRY_AFTER},
    middleware::Next,
    response::{IntoResponse, Response},
};
use serde_json::json;
use tokio::{sync::Mutex, time::Instant};
use tracing::warn;

use crate::routes::AppState;

const RATELIMIT_POLICY: HeaderName = HeaderName::from_static("ratelimit-policy");
const RATELIMIT_LIMIT: HeaderName = HeaderName::from_static("ratelimit-limit");
const RATELIMIT_REMAINING: HeaderName = HeaderName::from_static("ratelimit-remaining");
const RATELIMIT_RESET: HeaderName = HeaderName::from_static("ratelimit-reset");

/// Fixed-window request counter keyed by client identity.
pub struct RateLimiter {
    window: Duration,
    max: u32,
    state: Mutex<LimiterState>,
}

struct LimiterState {
    clients: HashMap<String, Window>,
    last_sweep: Instant,
}

struct Window {
    started: Instant,
    hits: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Decision {
    pub allowed: bool,
    pub limit: u32,
    pub remaining: u32,
    pub reset_after: Duration,
}

impl Decision {
    /// Seconds until the window resets, rounded up.
    pub fn reset_secs(&self) -> u64 {
        let secs = self.reset_after.as_secs();
        if self.reset_after.subsec_nanos() > 0 {
            secs + 1
        } else {
            secs
        }
    }
}

impl RateLimiter {
    pub fn new(window: Duration, max: u32) -> Self {
        Self {
            window,
            max,
            state: Mutex::new(LimiterState {
                clients: HashMap::new(),
                last_sweep: Instant::now(),
            }),
        }
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    /// Counts one request from `client` and reports whether it may proceed.
    pub async fn check(&self, client: &str) -> Decision {
        let now = Instant::now();
        let mut state = self.state.lock().await;

        if now.duration_since(state.last_sweep) >= self.window {
            let window = self.window;
            state
                .clients
                .retain(|_, entry| now.duration_since(entry.started) < window);
            state.last_sweep = now;
        }

        let entry = state
            .clients
            .entry(client.to_string())
            .or_insert(Window {
                started: now,
                hits: 0,
            });
        if now.duration_since(entry.started) >= self.window {
            entry.started = now;
            entry.hits = 0;
        }
        entry.hits = entry.hits.saturating_add(1);

        Decision {
            allowed: entry.hits <= self.max,
            limit: self.max,
            remaining: self.max.saturating_sub(entry.hits),
            reset_after: (entry.started + self.window).saturating_duration_since(now),
        }
    }

    pub async fn tracked_clients(&self) -> usize {
        self.state.lock().await.clients.len()
    }
}

pub async fn rate_limit(State(state): State<AppState>, request: Request, next: Next) -> Response {
    let client = client_key(&request);
    let decision = state.limiter.check(&client).await;

    let mut response = if decision.allowed {
        next.run(request).await
    } else {
        warn!(%client, "rate limit exceeded");
        let mut response = (
            StatusCode::TOO_MANY_REQUESTS,
            Json(json!({ "error": "too many requests" })),
        )
            .into_response();
        response
            .headers_mut()
            .insert(RETRY_AFTER, HeaderValue::from(decision.reset_secs()));
        response
    };

    write_headers(response.headers_mut(), &decision, state.limiter.window());
    response
}

fn client_key(request: &Request) -> String {
    request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip().to_string())
        .unwrap_or_else(|| "unknown".to_string())
}

fn write_headers(headers: &mut HeaderMap, decision: &Decision, window: Duration) {
    let policy = format!("{};w={}", decision.limit, window.as_secs());
    if let Ok(policy) = HeaderValue::try_from(policy) {
        headers.insert(RATELIMIT_POLICY, policy);
    }
    headers.insert(RATELIMIT_LIMIT, HeaderValue::from(decision.limit));
    headers.insert(RATELIMIT_REMAINING, HeaderValue::from(decision.remaining));
    headers.insert(RATELIMIT_RESET, HeaderValue::from(decision.reset_secs()));
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn allows_up_to_max_then_blocks() {
        let limiter = RateLimiter::new(Duration::from_secs(60), 2);

        let first = limiter.check("10.0.0.1").await;
        assert!(first.allowed);
        assert_eq!(first.remaining, 1);

        let second = limiter.check("10.0.0.1").await;
        assert!(second.allowed);
        assert_eq!(second.remaining, 0);

        let third = limiter.check("10.0.0.1").await;
        assert!(!third.allowed);
        assert_eq!(third.remaining, 0);
        assert_eq!(third.reset_secs(), 60);
    }

    #[tokio::test(start_paused = true)]
    async fn clients_are_counted_separately() {
        let limiter = RateLimiter::new(Duration::from_secs(60), 1);
        assert!(limiter.check("10.0.0.1").await.allowed);
        assert!(limiter.check("10.0.0.2").await.allowed);
        assert!(!limiter.check("10.0.0.1").await.allowed);
    }

    #[tokio::test(start_paused = true)]
    async fn window_resets_after_it_elapses() {
        let limiter = RateLimiter::new(Duration::from_secs(10), 1);
        assert!(limiter.check("client").await.allowed);
        assert!(!limiter.check("client").await.allowed);

        tokio::time::advance(Duration::from_secs(4)).await;
        let blocked = limiter.check("client").await;
        assert!(!blocked.allowed);
        assert_eq!(blocked.reset_secs(), 6);

        tokio::time::advance(Duration::from_secs(6)).await;
        assert!(limiter.check("client").await.allowed);
    }

    #[tokio::test(start_paused = true)]
    async fn expired_windows_are_swept() {
        let limiter = RateLimiter::new(Duration::from_secs(1), 5);
        limiter.check("a").await;
        limiter.check("b").await;
        assert_eq!(limiter.tracked_clients().await, 2);

        tokio::time::advance(Duration::from_secs(2)).await;
        limiter.check("c").await;
        assert_eq!(limiter.tracked_clients().await, 1);
    }

    #[test]
    fn headers_follow_the_standard_names() {
        let mut headers = HeaderMap::new();
        let decision = Decision {
            allowed: true,
            limit: 100,
            remaining: 99,
            reset_after: Duration::from_millis(899_500),
        };
        write_headers(&mut headers, &decision, Duration::from_secs(900));

        assert_eq!(headers["ratelimit-policy"], "100;w=900");
        assert_eq!(headers["ratelimit-limit"], "100");
        assert_eq!(headers["ratelimit-remaining"], "99");
        assert_eq!(headers["ratelimit-reset"], "900");
    }
}
