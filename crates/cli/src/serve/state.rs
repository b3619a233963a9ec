//! Application state and rate limiting.

use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use lumen_sync::SyncEngine;
use tokio::sync::Mutex;

/// Rate limit window.
const RATE_LIMIT_WINDOW: Duration = Duration::from_secs(60);

/// Tracked IPs above which expired windows are swept on the next check.
const SWEEP_THRESHOLD: usize = 1024;

/// Per-IP request tracker: (request count, window start time).
type IpTracker = HashMap<IpAddr, (u64, Instant)>;

/// Fixed-window per-IP rate limiter.
pub(crate) struct RateLimiter {
    tracker: Mutex<IpTracker>,
    pub(crate) max_requests: u64,
}

impl RateLimiter {
    pub(crate) fn new(max_requests: u64) -> Self {
        Self {
            tracker: Mutex::new(HashMap::new()),
            max_requests,
        }
    }

    /// Returns Err(retry_after_secs) once `ip` has used up its window.
    pub(crate) async fn check(&self, ip: IpAddr) -> Result<(), u64> {
        let mut tracker = self.tracker.lock().await;
        let now = Instant::now();

        if tracker.len() >= SWEEP_THRESHOLD {
            tracker.retain(|_, (_, start)| now.duration_since(*start) < RATE_LIMIT_WINDOW);
        }

        let entry = tracker.entry(ip).or_insert((0, now));
        let elapsed = now.duration_since(entry.1);
        if elapsed >= RATE_LIMIT_WINDOW {
            *entry = (0, now);
        }

        entry.0 += 1;
        if entry.0 > self.max_requests {
            let retry_after = RATE_LIMIT_WINDOW.saturating_sub(elapsed).as_secs().max(1);
            Err(retry_after)
        } else {
            Ok(())
        }
    }
}

/// Application state shared across request handlers.
pub(crate) struct AppState {
    pub(crate) engine: Arc<SyncEngine>,
    pub(crate) rate_limiter: RateLimiter,
    /// None = no auth required.
    pub(crate) api_key: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    #[tokio::test]
    async fn limits_each_ip_separately() {
        let limiter = RateLimiter::new(2);
        let a = IpAddr::V4(Ipv4Addr::new(10, 0, 0, 1));
        let b = IpAddr::V4(Ipv4Addr::new(10, 0, 0, 2));

        assert!(limiter.check(a).await.is_ok());
        assert!(limiter.check(a).await.is_ok());
        let retry_after = limiter.check(a).await.unwrap_err();
        assert!((1..=60).contains(&retry_after));

        assert!(limiter.check(b).await.is_ok());
    }
}
