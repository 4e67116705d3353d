//! Sliding-window rate limiting for the Portico gateway.
//!
//! Two interchangeable backends sit behind the [`RateLimiter`] trait: an
//! in-memory timestamp store for single-process deployments and tests, and
//! a Redis sorted-set implementation for fleets sharing one budget. Both
//! answer the same question: has this key seen fewer than `limit` requests
//! in the last 60 seconds?

mod keys;
mod memory;
mod redis;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

pub use keys::{ip_key, route_ip_key, route_user_key, user_key};
pub use memory::InMemoryLimiter;
pub use redis::RedisLimiter;

/// Length of the sliding window.
pub const WINDOW: std::time::Duration = std::time::Duration::from_secs(60);

/// Outcome of a rate limit check, also the source of the `X-RateLimit-*`
/// response headers.
#[derive(Debug, Clone)]
pub struct RateLimitDecision {
    pub allowed: bool,
    pub limit: u32,
    /// Requests left in the current window after this one.
    pub remaining: u32,
    /// When the window resets.
    pub reset_at: DateTime<Utc>,
}

#[derive(Debug, Error)]
pub enum LimiterError {
    #[error("redis pool: {0}")]
    Pool(#[from] deadpool_redis::PoolError),

    #[error("redis: {0}")]
    Redis(#[from] deadpool_redis::redis::RedisError),
}

/// A sliding-window rate limiter.
///
/// `allow` both checks and records: an allowed call consumes one slot in
/// the window for `key`.
#[async_trait]
pub trait RateLimiter: Send + Sync {
    async fn allow(&self, key: &str, limit: u32) -> Result<RateLimitDecision, LimiterError>;
}
