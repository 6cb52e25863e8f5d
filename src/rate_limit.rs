//! Per-IP fixed-window rate limiting.
//!
//! Two tiers share the same limiter type: the global tier wraps every route,
//! the dashboard tier only wraps `/api/dashboard` and stops counting while
//! the dashboard cache holds a fresh entry.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::{ConnectInfo, Request, State},
    http::{HeaderMap, HeaderName, HeaderValue, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
};
use dashmap::DashMap;
use tokio::time::{Instant, interval};
use tracing::{debug, warn};

use crate::cache::{DASHBOARD_CACHE_KEY, FreshEntry};
use crate::error::AppError;
use crate::metrics::RATE_LIMITED;
use crate::state::AppState;

pub const RATELIMIT_LIMIT: HeaderName = HeaderName::from_static("ratelimit-limit");
pub const RATELIMIT_REMAINING: HeaderName = HeaderName::from_static("ratelimit-remaining");
pub const RATELIMIT_RESET: HeaderName = HeaderName::from_static("ratelimit-reset");

const GLOBAL_MESSAGE: &str = "Too many requests from this IP, please try again after a minute.";
const DASHBOARD_MESSAGE: &str =
    "Too many dashboard requests, please wait before refreshing the dashboard again.";

// Rate limit entry - tracks requests per IP/key
pub struct RateLimitEntry {
    pub count: u32,
    pub window_start: Instant,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Allowed {
        limit: u32,
        remaining: u32,
        reset: Duration,
    },
    Limited {
        limit: u32,
        retry_after: Duration,
    },
}

pub struct RateLimiter {
    name: &'static str,
    max_requests: u32,
    window: Duration,
    counters: DashMap<String, RateLimitEntry>,
}

impl RateLimiter {
    /// `max_requests = 0` turns the limiter off.
    pub fn new(name: &'static str, max_requests: u32, window: Duration) -> Self {
        Self {
            name,
            max_requests,
            window,
            counters: DashMap::new(),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    pub fn is_enabled(&self) -> bool {
        self.max_requests > 0
    }

    /// Counts one request for `key` and decides whether it is admitted.
    ///
    /// The window opens on the first request for a key and is replaced by a
    /// new one once it has fully elapsed.
    pub fn check(&self, key: &str) -> Decision {
        if !self.is_enabled() {
            return Decision::Allowed {
                limit: 0,
                remaining: 0,
                reset: Duration::ZERO,
            };
        }

        let now = Instant::now();

        let mut entry = self
            .counters
            .entry(key.to_string())
            .or_insert(RateLimitEntry {
                count: 0,
                window_start: now,
            });

        // window expired..? start a new one
        if now.duration_since(entry.window_start) >= self.window {
            entry.count = 0;
            entry.window_start = now;
        }

        let reset = self
            .window
            .saturating_sub(now.duration_since(entry.window_start));

        if entry.count < self.max_requests {
            entry.count += 1;
            return Decision::Allowed {
                limit: self.max_requests,
                remaining: self.max_requests - entry.count,
                reset,
            };
        }

        Decision::Limited {
            limit: self.max_requests,
            retry_after: reset,
        }
    }

    /// Drops counters whose window has already elapsed.
    pub fn cleanup(&self) {
        let window = self.window;
        self.counters
            .retain(|_, entry| entry.window_start.elapsed() < window);
    }

    pub fn tracked_keys(&self) -> usize {
        self.counters.len()
    }
}

// Peer IP, or a shared bucket when the connection info is missing
pub fn client_key(req: &Request) -> String {
    req.extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip().to_string())
        .unwrap_or_else(|| "unknown".to_string())
}

fn apply_headers(headers: &mut HeaderMap, limit: u32, remaining: u32, reset: Duration) {
    headers.insert(RATELIMIT_LIMIT, HeaderValue::from(limit));
    headers.insert(RATELIMIT_REMAINING, HeaderValue::from(remaining));
    headers.insert(RATELIMIT_RESET, HeaderValue::from(reset.as_secs()));
}

fn reject(limiter: &RateLimiter, key: &str, message: &'static str, limit: u32, retry_after: Duration) -> Response {
    RATE_LIMITED.with_label_values(&[limiter.name()]).inc();
    warn!(
        "Rate limit ({}) exceeded for {key}, retry in {}s",
        limiter.name(),
        retry_after.as_secs()
    );

    AppError::RateLimited {
        message,
        limit,
        retry_after,
    }
    .into_response()
}

pub async fn global_limit(
    State(state): State<Arc<AppState>>,
    req: Request,
    next: Next,
) -> Response {
    let limiter = &state.global_limiter;
    let key = client_key(&req);

    match limiter.check(&key) {
        Decision::Allowed {
            limit,
            remaining,
            reset,
        } => {
            let mut res = next.run(req).await;
            // an inner tier's 429 keeps its own headers
            if limiter.is_enabled() && res.status() != StatusCode::TOO_MANY_REQUESTS {
                apply_headers(res.headers_mut(), limit, remaining, reset);
            }
            res
        }
        Decision::Limited { limit, retry_after } => {
            reject(limiter, &key, GLOBAL_MESSAGE, limit, retry_after)
        }
    }
}

// Cache hits are not counted, only requests that would regenerate the stats
pub async fn dashboard_limit(
    State(state): State<Arc<AppState>>,
    mut req: Request,
    next: Next,
) -> Response {
    // hand the entry we judged fresh to the handler so it cannot expire in between
    if let Some(entry) = state.cache.get_fresh(DASHBOARD_CACHE_KEY) {
        debug!("Dashboard cache is warm, skipping dashboard rate limit");
        req.extensions_mut().insert(FreshEntry(entry));
        return next.run(req).await;
    }

    let limiter = &state.dashboard_limiter;
    let key = client_key(&req);

    match limiter.check(&key) {
        Decision::Allowed { .. } => next.run(req).await,
        Decision::Limited { limit, retry_after } => {
            reject(limiter, &key, DASHBOARD_MESSAGE, limit, retry_after)
        }
    }
}

// Background sweep of expired counters and OTPs
pub async fn cleanup_task(state: Arc<AppState>, period: Duration) {
    let mut interval = interval(period);

    loop {
        interval.tick().await;

        state.global_limiter.cleanup();
        state.dashboard_limiter.cleanup();
        let purged = state.auth.purge_expired_otps();

        debug!(
            "Cleanup: {} global keys, {} dashboard keys tracked, {purged} expired OTPs purged",
            state.global_limiter.tracked_keys(),
            state.dashboard_limiter.tracked_keys()
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const WINDOW: Duration = Duration::from_secs(60);

    #[tokio::test(start_paused = true)]
    async fn admits_up_to_limit_then_rejects() {
        let limiter = RateLimiter::new("test", 3, WINDOW);

        for expected_remaining in [2, 1, 0] {
            match limiter.check("1.2.3.4") {
                Decision::Allowed { remaining, limit, .. } => {
                    assert_eq!(limit, 3);
                    assert_eq!(remaining, expected_remaining);
                }
                other => panic!("expected Allowed, got {other:?}"),
            }
        }

        assert!(matches!(
            limiter.check("1.2.3.4"),
            Decision::Limited { limit: 3, .. }
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn keys_are_counted_independently() {
        let limiter = RateLimiter::new("test", 1, WINDOW);

        assert!(matches!(limiter.check("a"), Decision::Allowed { .. }));
        assert!(matches!(limiter.check("b"), Decision::Allowed { .. }));
        assert!(matches!(limiter.check("a"), Decision::Limited { .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn window_resets_after_it_elapses() {
        let limiter = RateLimiter::new("test", 1, WINDOW);
        limiter.check("a");

        tokio::time::advance(Duration::from_secs(20)).await;
        match limiter.check("a") {
            Decision::Limited { retry_after, .. } => {
                assert_eq!(retry_after, Duration::from_secs(40))
            }
            other => panic!("expected Limited, got {other:?}"),
        }

        tokio::time::advance(Duration::from_secs(40)).await;
        assert!(matches!(limiter.check("a"), Decision::Allowed { .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn disabled_limiter_admits_everything() {
        let limiter = RateLimiter::new("test", 0, WINDOW);
        for _ in 0..1000 {
            assert!(matches!(limiter.check("a"), Decision::Allowed { .. }));
        }
        assert_eq!(limiter.tracked_keys(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn cleanup_drops_expired_windows_only() {
        let limiter = RateLimiter::new("test", 5, WINDOW);
        limiter.check("old");

        tokio::time::advance(Duration::from_secs(30)).await;
        limiter.check("new");

        tokio::time::advance(Duration::from_secs(30)).await;
        limiter.cleanup();

        assert_eq!(limiter.tracked_keys(), 1);
    }
}
