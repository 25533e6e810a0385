//! Rate limiting middleware.
//!
//! In-memory sliding-window limiter keyed by client address. One instance
//! per protected surface; each owns its state behind a single mutex.

use crate::auth::error::AuthError;
use axum::{
    body::Body,
    extract::{ConnectInfo, State},
    http::Request,
    middleware::Next,
    response::{IntoResponse, Response},
};
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// Configuration for rate limiting.
#[derive(Debug, Clone, Copy)]
pub struct RateLimitConfig {
    /// Maximum requests per window.
    pub max_requests: usize,
    /// Window duration.
    pub window: Duration,
}

impl RateLimitConfig {
    pub fn new(max_requests: usize, window: Duration) -> Self {
        Self {
            max_requests,
            window,
        }
    }

    /// 5 requests / minute, for login and friends
    pub fn auth() -> Self {
        Self::new(5, Duration::from_secs(60))
    }

    /// 100 requests / minute, for general traffic
    pub fn api() -> Self {
        Self::new(100, Duration::from_secs(60))
    }
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self::api()
    }
}

/// Sliding-window limiter: per key, the timestamps of accepted requests
/// inside the last `window`. Timestamps are appended in order, so stale
/// entries are always at the front.
#[derive(Clone)]
pub struct RateLimiter {
    name: &'static str,
    config: RateLimitConfig,
    state: Arc<Mutex<HashMap<String, VecDeque<Instant>>>>,
}

impl RateLimiter {
    pub fn new(name: &'static str, config: RateLimitConfig) -> Self {
        Self {
            name,
            config,
            state: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn config(&self) -> RateLimitConfig {
        self.config
    }

    /// Check-and-record one request for `key` at the current instant.
    pub fn allow(&self, key: &str) -> bool {
        self.allow_at(key, Instant::now())
    }

    /// Same as [`allow`](Self::allow) with an explicit clock reading.
    ///
    /// Prune, count and append happen under one lock acquisition, so two
    /// concurrent callers can never both see `N - 1`.
    pub fn allow_at(&self, key: &str, now: Instant) -> bool {
        let mut state = self.state.lock();
        let hits = state.entry(key.to_string()).or_default();

        prune(hits, now, self.config.window);

        if hits.len() < self.config.max_requests {
            hits.push_back(now);
            true
        } else {
            false
        }
    }

    /// Time until `key` gets a free slot again (zero if it has one now)
    pub fn retry_after(&self, key: &str) -> Duration {
        self.retry_after_at(key, Instant::now())
    }

    pub fn retry_after_at(&self, key: &str, now: Instant) -> Duration {
        let state = self.state.lock();
        let Some(hits) = state.get(key) else {
            return Duration::ZERO;
        };

        let live = hits
            .iter()
            .filter(|t| now.saturating_duration_since(**t) < self.config.window)
            .count();
        if live < self.config.max_requests {
            return Duration::ZERO;
        }

        // The slot frees up when the oldest entry that keeps us at the limit expires.
        hits.iter()
            .rev()
            .nth(self.config.max_requests.saturating_sub(1))
            .map(|oldest| (*oldest + self.config.window).saturating_duration_since(now))
            .unwrap_or(Duration::ZERO)
    }

    /// Number of keys currently holding state
    pub fn tracked_keys(&self) -> usize {
        self.state.lock().len()
    }

    /// Drop stale timestamps and then every key left with none.
    pub fn cleanup(&self) {
        self.cleanup_at(Instant::now());
    }

    pub fn cleanup_at(&self, now: Instant) {
        let mut state = self.state.lock();
        let before = state.len();
        let window = self.config.window;

        state.retain(|_, hits| {
            prune(hits, now, window);
            !hits.is_empty()
        });

        let purged = before - state.len();
        if purged > 0 {
            debug!(limiter = self.name, purged, "Rate limiter cleanup");
        }
    }

    /// Periodic cleanup on its own task, independent of request handling.
    pub fn spawn_cleanup(&self, every: Duration) -> JoinHandle<()> {
        let limiter = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            ticker.tick().await; // first tick completes immediately
            loop {
                ticker.tick().await;
                limiter.cleanup();
            }
        })
    }
}

fn prune(hits: &mut VecDeque<Instant>, now: Instant, window: Duration) {
    while let Some(oldest) = hits.front() {
        if now.saturating_duration_since(*oldest) >= window {
            hits.pop_front();
        } else {
            break;
        }
    }
}

/// Rate limiting middleware function, keyed by client IP.
pub async fn rate_limit_middleware(
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    State(limiter): State<RateLimiter>,
    request: Request<Body>,
    next: Next,
) -> Response {
    let key = addr.ip().to_string();

    if limiter.allow(&key) {
        return next.run(request).await;
    }

    let retry_after = limiter.retry_after(&key);
    warn!(
        limiter = limiter.name(),
        client_ip = %key,
        retry_after_secs = retry_after.as_secs(),
        "Rate limit exceeded"
    );

    AuthError::RateLimited { retry_after }.into_response()
}
