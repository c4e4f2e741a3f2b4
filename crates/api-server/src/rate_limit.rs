//! Fixed-window request limiter keyed by client IP

use std::collections::HashMap;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Mutex;
use std::time::Duration;

use axum::{
    extract::{ConnectInfo, Request, State},
    http::HeaderValue,
    middleware::Next,
    response::{IntoResponse, Response},
};
use tokio::time::Instant;

use crate::config::RateLimitConfig;
use crate::error::ApiError;
use crate::state::AppState;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Decision {
    pub allowed: bool,
    pub limit: u32,
    pub remaining: u32,
}

struct Window {
    started: Instant,
    count: u32,
}

pub struct RateLimiter {
    window: Duration,
    max_requests: u32,
    clients: Mutex<HashMap<IpAddr, Window>>,
}

impl RateLimiter {
    pub fn new(config: RateLimitConfig) -> Self {
        Self {
            window: config.window,
            max_requests: config.max_requests,
            clients: Mutex::new(HashMap::new()),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.max_requests > 0
    }

    /// Count one request from `client` and decide whether it may proceed
    pub fn check(&self, client: IpAddr) -> Decision {
        let now = Instant::now();
        let mut clients = self
            .clients
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());

        if clients.len() > 10_000 {
            let window = self.window;
            clients.retain(|_, w| now.duration_since(w.started) < window);
        }

        let entry = clients.entry(client).or_insert(Window {
            started: now,
            count: 0,
        });
        if now.duration_since(entry.started) >= self.window {
            entry.started = now;
            entry.count = 0;
        }
        entry.count = entry.count.saturating_add(1);

        Decision {
            allowed: entry.count <= self.max_requests,
            limit: self.max_requests,
            remaining: self.max_requests.saturating_sub(entry.count),
        }
    }
}

/// Middleware for the `/api/v1` routes
pub async fn enforce(State(state): State<AppState>, request: Request, next: Next) -> Response {
    let limiter = state.rate_limiter();
    if !limiter.is_enabled() {
        return next.run(request).await;
    }

    let client = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip())
        .unwrap_or(IpAddr::V4(Ipv4Addr::UNSPECIFIED));

    let decision = limiter.check(client);
    let mut response = if decision.allowed {
        next.run(request).await
    } else {
        tracing::warn!(ip = %client, path = %request.uri().path(), "Rate limit exceeded");
        ApiError::RateLimited.into_response()
    };

    let headers = response.headers_mut();
    headers.insert("x-ratelimit-limit", HeaderValue::from(decision.limit));
    headers.insert("x-ratelimit-remaining", HeaderValue::from(decision.remaining));
    response
}

#[cfg(test)]
mod tests {
    use super::*;

    fn limiter(max_requests: u32) -> RateLimiter {
        RateLimiter::new(RateLimitConfig {
            window: Duration::from_secs(60),
            max_requests,
        })
    }

    #[tokio::test(start_paused = true)]
    async fn test_window_resets() {
        let limiter = limiter(2);
        let ip = IpAddr::from([10, 0, 0, 1]);

        assert_eq!(limiter.check(ip).remaining, 1);
        assert!(limiter.check(ip).allowed);
        let third = limiter.check(ip);
        assert!(!third.allowed);
        assert_eq!(third.remaining, 0);

        tokio::time::advance(Duration::from_secs(61)).await;
        assert!(limiter.check(ip).allowed);
    }

    #[test]
    fn test_clients_are_counted_separately() {
        let limiter = limiter(1);
        assert!(limiter.check(IpAddr::from([10, 0, 0, 1])).allowed);
        assert!(limiter.check(IpAddr::from([10, 0, 0, 2])).allowed);
        assert!(!limiter.check(IpAddr::from([10, 0, 0, 1])).allowed);
    }

    #[test]
    fn test_zero_disables() {
        assert!(!limiter(0).is_enabled());
        assert!(limiter(1).is_enabled());
    }
}
