use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::Mutex;

use crate::{LimiterError, RateLimitDecision, RateLimiter, WINDOW};

/// In-memory sliding-window limiter.
///
/// Each key maps to the timestamps of its requests inside the window;
/// stale timestamps are dropped on every check. A single mutex keeps the
/// check-and-record step atomic, so concurrent callers can never admit more
/// than `limit` requests per window.
pub struct InMemoryLimiter {
    window: Duration,
    requests: Mutex<HashMap<String, Vec<DateTime<Utc>>>>,
}

impl InMemoryLimiter {
    pub fn new() -> Self {
        Self::with_window(WINDOW)
    }

    /// Shrink the window, for tests that exercise expiry.
    pub fn with_window(window: Duration) -> Self {
        Self {
            window,
            requests: Mutex::new(HashMap::new()),
        }
    }
}

impl Default for InMemoryLimiter {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl RateLimiter for InMemoryLimiter {
    async fn allow(&self, key: &str, limit: u32) -> Result<RateLimitDecision, LimiterError> {
        let now = Utc::now();
        let window = chrono::Duration::from_std(self.window).unwrap_or(chrono::Duration::MAX);
        let window_start = now - window;

        let mut requests = self.requests.lock().await;
        let timestamps = requests.entry(key.to_owned()).or_default();
        timestamps.retain(|ts| *ts > window_start);

        let count = timestamps.len() as u32;
        let allowed = count < limit;
        if allowed {
            timestamps.push(now);
        }

        let remaining = if allowed {
            limit.saturating_sub(count + 1)
        } else {
            0
        };

        Ok(RateLimitDecision {
            allowed,
            limit,
            remaining,
            reset_at: now + window,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn allows_exactly_limit_requests() {
        let limiter = InMemoryLimiter::new();

        for i in 0..5 {
            let decision = limiter.allow("k", 5).await.unwrap();
            assert!(decision.allowed, "request {i} should be allowed");
            assert_eq!(decision.remaining, 4 - i);
        }

        let decision = limiter.allow("k", 5).await.unwrap();
        assert!(!decision.allowed, "request over the limit must be denied");
        assert_eq!(decision.remaining, 0);
        assert_eq!(decision.limit, 5);
    }

    #[tokio::test]
    async fn denied_requests_do_not_consume_slots() {
        let limiter = InMemoryLimiter::with_window(Duration::from_millis(200));

        for _ in 0..2 {
            assert!(limiter.allow("k", 2).await.unwrap().allowed);
        }
        // Hammering while denied must not extend the window occupancy.
        for _ in 0..5 {
            assert!(!limiter.allow("k", 2).await.unwrap().allowed);
        }

        tokio::time::sleep(Duration::from_millis(250)).await;
        assert!(limiter.allow("k", 2).await.unwrap().allowed);
    }

    #[tokio::test]
    async fn window_expiry_frees_capacity() {
        let limiter = InMemoryLimiter::with_window(Duration::from_millis(100));

        assert!(limiter.allow("k", 1).await.unwrap().allowed);
        assert!(!limiter.allow("k", 1).await.unwrap().allowed);

        tokio::time::sleep(Duration::from_millis(150)).await;
        assert!(limiter.allow("k", 1).await.unwrap().allowed);
    }

    #[tokio::test]
    async fn keys_are_independent() {
        let limiter = InMemoryLimiter::new();

        assert!(limiter.allow("a", 1).await.unwrap().allowed);
        assert!(!limiter.allow("a", 1).await.unwrap().allowed);
        assert!(limiter.allow("b", 1).await.unwrap().allowed);
    }

    #[tokio::test]
    async fn reset_at_is_one_window_out() {
        let limiter = InMemoryLimiter::new();
        let before = Utc::now();
        let decision = limiter.allow("k", 1).await.unwrap();
        let expected = before + chrono::Duration::seconds(60);
        assert!(decision.reset_at >= expected - chrono::Duration::seconds(1));
        assert!(decision.reset_at <= expected + chrono::Duration::seconds(1));
    }

    #[tokio::test]
    async fn concurrent_callers_never_exceed_limit() {
        use std::sync::Arc;

        let limiter = Arc::new(InMemoryLimiter::new());
        let mut handles = Vec::new();
        for _ in 0..20 {
            let limiter = Arc::clone(&limiter);
            handles.push(tokio::spawn(
                async move { limiter.allow("k", 10).await.unwrap().allowed },
            ));
        }

        let mut admitted = 0;
        for handle in handles {
            if handle.await.unwrap() {
                admitted += 1;
            }
        }
        assert_eq!(admitted, 10);
    }
}
