//! Sliding-window per-IP rate limiting for the public persona.
//!
//! Each client IP keeps a deque of request instants; a request is admitted
//! when fewer than `max_requests` fall inside the trailing window. Entries
//! are pruned on check, and idle IPs are swept periodically.

use std::collections::{HashMap, VecDeque};
use std::net::IpAddr;
use std::time::{Duration, Instant};

use axum::body::Body;
use axum::extract::{ConnectInfo, State};
use axum::http::Request;
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use parking_lot::Mutex;

use shaman_domain::config::RateLimitConfig;
use shaman_protocol::{JsonRpcError, JsonRpcResponse};

use crate::state::AppState;

pub struct SlidingWindowLimiter {
    windows: Mutex<HashMap<IpAddr, VecDeque<Instant>>>,
    max_requests: usize,
    window: Duration,
}

impl SlidingWindowLimiter {
    pub fn new(config: &RateLimitConfig) -> Self {
        Self {
            windows: Mutex::new(HashMap::new()),
            max_requests: config.max_requests,
            window: Duration::from_millis(config.window_ms),
        }
    }

    /// Record one request for `ip` and report whether it is admitted.
    pub fn check(&self, ip: IpAddr) -> bool {
        self.check_at(ip, Instant::now())
    }

    fn check_at(&self, ip: IpAddr, now: Instant) -> bool {
        let mut windows = self.windows.lock();
        let deque = windows.entry(ip).or_default();

        while let Some(front) = deque.front() {
            if now.duration_since(*front) >= self.window {
                deque.pop_front();
            } else {
                break;
            }
        }

        if deque.len() >= self.max_requests {
            return false;
        }
        deque.push_back(now);
        true
    }

    /// Drop IPs with no requests inside the window. Called periodically to
    /// bound memory.
    pub fn prune_idle(&self) {
        let now = Instant::now();
        let mut windows = self.windows.lock();
        windows.retain(|_, deque| {
            deque
                .back()
                .map(|last| now.duration_since(*last) < self.window)
                .unwrap_or(false)
        });
    }
}

/// Axum middleware enforcing the limiter. The client IP comes from
/// `X-Forwarded-For` when present (first hop), else the socket address.
pub async fn enforce_rate_limit(
    State(state): State<AppState>,
    req: Request<Body>,
    next: Next,
) -> Response {
    let Some(limiter) = &state.rate_limiter else {
        return next.run(req).await;
    };

    let ip = client_ip(&req);
    if limiter.check(ip) {
        next.run(req).await
    } else {
        tracing::debug!(%ip, "rate limit exceeded");
        (
            axum::http::StatusCode::TOO_MANY_REQUESTS,
            axum::Json(JsonRpcResponse::err(
                None,
                JsonRpcError::new(-32029, "rate limit exceeded"),
            )),
        )
            .into_response()
    }
}

fn client_ip(req: &Request<Body>) -> IpAddr {
    req.headers()
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .and_then(|v| v.trim().parse().ok())
        .or_else(|| {
            req.extensions()
                .get::<ConnectInfo<std::net::SocketAddr>>()
                .map(|info| info.0.ip())
        })
        .unwrap_or(IpAddr::V4(std::net::Ipv4Addr::UNSPECIFIED))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn limiter(max: usize, window_ms: u64) -> SlidingWindowLimiter {
        SlidingWindowLimiter::new(&RateLimitConfig {
            max_requests: max,
            window_ms,
        })
    }

    #[test]
    fn admits_up_to_max_then_rejects() {
        let limiter = limiter(3, 60_000);
        let ip: IpAddr = "10.0.0.1".parse().unwrap();
        assert!(limiter.check(ip));
        assert!(limiter.check(ip));
        assert!(limiter.check(ip));
        assert!(!limiter.check(ip));
    }

    #[test]
    fn window_slides() {
        let limiter = limiter(2, 1_000);
        let ip: IpAddr = "10.0.0.2".parse().unwrap();
        let start = Instant::now();
        assert!(limiter.check_at(ip, start));
        assert!(limiter.check_at(ip, start + Duration::from_millis(100)));
        assert!(!limiter.check_at(ip, start + Duration::from_millis(200)));
        // The first request ages out of the window.
        assert!(limiter.check_at(ip, start + Duration::from_millis(1_150)));
    }

    #[test]
    fn ips_are_independent() {
        let limiter = limiter(1, 60_000);
        let a: IpAddr = "10.0.0.3".parse().unwrap();
        let b: IpAddr = "10.0.0.4".parse().unwrap();
        assert!(limiter.check(a));
        assert!(limiter.check(b));
        assert!(!limiter.check(a));
    }

    #[test]
    fn prune_drops_idle_ips() {
        let limiter = limiter(5, 1);
        let ip: IpAddr = "10.0.0.5".parse().unwrap();
        limiter.check(ip);
        std::thread::sleep(Duration::from_millis(5));
        limiter.prune_idle();
        assert!(limiter.windows.lock().is_empty());
    }
}
