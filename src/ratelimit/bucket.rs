//! Token bucket state and refill math.

use std::time::Duration;
use tokio::time::Instant;

use crate::config::RateLimitConfig;

/// A single token bucket.
///
/// Buckets are plain data owned by the limiter's key map and mutated under
/// its lock. Tokens are stored fractionally so that refill progress from
/// rapid successive checks accumulates instead of rounding away.
#[derive(Debug)]
pub(crate) struct TokenBucket {
    /// Available tokens, in `[0, max_requests]`
    tokens: f64,
    /// When tokens were last topped up
    last_refill: Instant,
}

impl TokenBucket {
    /// Create a full bucket.
    pub(crate) fn new(config: &RateLimitConfig, now: Instant) -> Self {
        Self {
            tokens: f64::from(config.max_requests),
            last_refill: now,
        }
    }

    /// Top up tokens for the time elapsed since the last refill.
    pub(crate) fn refill(&mut self, config: &RateLimitConfig, now: Instant) {
        let elapsed = now.saturating_duration_since(self.last_refill);
        if elapsed.is_zero() {
            return;
        }

        let earned = elapsed.as_secs_f64() * Self::rate(config);
        self.tokens = (self.tokens + earned).min(f64::from(config.max_requests));
        self.last_refill = now;
    }

    /// Refill, then consume one token if available.
    ///
    /// Returns `true` if the request is admitted. A denial consumes nothing.
    pub(crate) fn try_consume(&mut self, config: &RateLimitConfig, now: Instant) -> bool {
        self.refill(config, now);

        if self.tokens >= 1.0 {
            self.tokens -= 1.0;
            true
        } else {
            false
        }
    }

    /// Whole tokens currently available, without a refill pass.
    pub(crate) fn remaining(&self) -> u32 {
        self.tokens as u32
    }

    /// Time until the bucket is fully replenished at the configured rate.
    pub(crate) fn reset_after(&self, config: &RateLimitConfig) -> Duration {
        let missing = f64::from(config.max_requests) - self.tokens;
        if missing <= 0.0 {
            return Duration::ZERO;
        }
        Duration::from_secs_f64(missing / Self::rate(config))
    }

    /// Time until at least one whole token is available.
    pub(crate) fn time_to_next(&self, config: &RateLimitConfig) -> Duration {
        if self.tokens >= 1.0 {
            return Duration::ZERO;
        }
        Duration::from_secs_f64((1.0 - self.tokens) / Self::rate(config))
    }

    /// How long the bucket has gone without a refill pass.
    pub(crate) fn idle_for(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.last_refill)
    }

    /// Tokens earned per second.
    fn rate(config: &RateLimitConfig) -> f64 {
        f64::from(config.max_requests) / config.window().as_secs_f64()
    }
}
