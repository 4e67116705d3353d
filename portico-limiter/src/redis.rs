use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use deadpool_redis::redis;
use tracing::warn;

use crate::{LimiterError, RateLimitDecision, RateLimiter, WINDOW};

/// Redis-backed sliding-window limiter for multi-replica deployments.
///
/// Each key is a sorted set whose members and scores are request timestamps
/// in nanoseconds. A pipeline trims entries older than the window, reads
/// the cardinality, inserts the current request, and refreshes the key's
/// expiry. The pipeline is weaker than a Lua script: two concurrent callers
/// racing the same key can each over-admit by at most one, which the
/// gateway tolerates.
pub struct RedisLimiter {
    pool: deadpool_redis::Pool,
    window: Duration,
}

impl RedisLimiter {
    pub fn new(pool: deadpool_redis::Pool) -> Self {
        Self {
            pool,
            window: WINDOW,
        }
    }

    /// Shrink the window, for tests that exercise expiry.
    pub fn with_window(pool: deadpool_redis::Pool, window: Duration) -> Self {
        Self { pool, window }
    }
}

#[async_trait]
impl RateLimiter for RedisLimiter {
    async fn allow(&self, key: &str, limit: u32) -> Result<RateLimitDecision, LimiterError> {
        let mut conn = self.pool.get().await?;

        let now = Utc::now();
        let now_ns = now.timestamp_nanos_opt().unwrap_or(i64::MAX);
        let window_ns = self.window.as_nanos() as i64;
        let window_start_ns = now_ns - window_ns;

        // Trim, count, record, refresh expiry. The count reflects the window
        // before this request was added.
        let (_trimmed, count, _added, _expired): (i64, i64, i64, i64) = redis::pipe()
            .cmd("ZREMRANGEBYSCORE")
            .arg(key)
            .arg(0)
            .arg(window_start_ns)
            .cmd("ZCARD")
            .arg(key)
            .cmd("ZADD")
            .arg(key)
            .arg(now_ns)
            .arg(now_ns)
            .cmd("EXPIRE")
            .arg(key)
            .arg(self.window.as_secs() + 1)
            .query_async(&mut conn)
            .await?;

        let allowed = count < i64::from(limit);
        let remaining = if allowed {
            limit.saturating_sub(count as u32 + 1)
        } else {
            0
        };

        if !allowed {
            // Roll the insertion back so a denied request does not occupy a
            // slot in the window.
            let removed: Result<i64, _> = redis::cmd("ZREM")
                .arg(key)
                .arg(now_ns)
                .query_async(&mut conn)
                .await;
            if let Err(e) = removed {
                warn!(key, error = %e, "failed to roll back denied rate limit entry");
            }
        }

        Ok(RateLimitDecision {
            allowed,
            limit,
            remaining,
            reset_at: now
                + chrono::Duration::from_std(self.window).unwrap_or(chrono::Duration::MAX),
        })
    }
}
