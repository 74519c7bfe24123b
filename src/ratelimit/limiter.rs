//! Core rate limiter implementation.

use std::collections::HashMap;
use std::time::Duration;

use parking_lot::RwLock;
use tokio::time::Instant;
use tracing::{debug, trace};

use crate::config::{ClassLimits, OperationClass, RateLimitConfig};
use crate::error::RateLimitError;

use super::bucket::TokenBucket;
use super::key::BucketKey;

/// Buckets idle longer than this are dropped by a sweep.
pub const STALE_AFTER: Duration = Duration::from_secs(600);
/// Backoff between wait attempts when a class has no retry floor.
const DEFAULT_RETRY_FLOOR: Duration = Duration::from_secs(1);
/// Default bound on admit attempts in [`RateLimiter::acquire`].
const DEFAULT_WAIT_ATTEMPTS: u32 = 10;

/// The core rate limiter that manages token buckets.
///
/// This struct is thread-safe and is shared across tasks behind an `Arc`
/// by the application's composition root. There is no global instance;
/// whatever layer issues backend calls owns its limiter explicitly.
pub struct RateLimiter {
    /// Token buckets indexed by bucket key
    buckets: RwLock<HashMap<BucketKey, TokenBucket>>,
    /// Per-class limit table, fixed for the lifetime of the limiter
    limits: ClassLimits,
    /// Maximum admit attempts in `acquire`
    wait_attempts: u32,
    /// Idle age beyond which a sweep drops a bucket
    stale_after: Duration,
}

/// Point-in-time view of a bucket's quota.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QuotaStatus {
    /// Whole tokens currently available
    pub remaining: u32,
    /// Time until the bucket is fully replenished
    pub reset_after: Duration,
    /// The class's `max_requests` ceiling
    pub limit: u32,
}

impl RateLimiter {
    /// Create a rate limiter with the built-in class limits.
    pub fn new() -> Self {
        Self::with_limits(ClassLimits::default())
    }

    /// Create a rate limiter with a custom class limit table.
    pub fn with_limits(limits: ClassLimits) -> Self {
        Self {
            buckets: RwLock::new(HashMap::new()),
            limits,
            wait_attempts: DEFAULT_WAIT_ATTEMPTS,
            stale_after: STALE_AFTER,
        }
    }

    /// Override the bound on admit attempts in [`RateLimiter::acquire`].
    pub fn with_wait_attempts(mut self, attempts: u32) -> Self {
        self.wait_attempts = attempts;
        self
    }

    /// Override the idle age at which sweeps drop a bucket.
    pub fn with_stale_after(mut self, stale_after: Duration) -> Self {
        self.stale_after = stale_after;
        self
    }

    /// The effective limit configuration for an operation class.
    pub fn limits_for(&self, class: OperationClass) -> RateLimitConfig {
        self.limits.get(class)
    }

    /// Check the rate limit for a key, consuming one token if admitted.
    ///
    /// The bucket is created on first use with a full allowance, from
    /// which this first admission immediately takes its token. Later
    /// checks refill the bucket from elapsed time before consuming.
    /// A denial consumes nothing. Never blocks.
    pub fn check(&self, key: &BucketKey) -> bool {
        let config = self.limits.get(key.class);
        let now = Instant::now();

        let mut buckets = self.buckets.write();
        let bucket = buckets.entry(key.clone()).or_insert_with(|| {
            debug!(
                key = %key,
                limit = config.max_requests,
                window_ms = config.window_ms,
                "Creating new token bucket"
            );
            TokenBucket::new(&config, now)
        });

        let admitted = bucket.try_consume(&config, now);
        if !admitted {
            debug!(key = %key, "Rate limit exceeded");
        }

        trace!(
            key = %key,
            admitted = admitted,
            remaining = bucket.remaining(),
            "Checked rate limit"
        );

        admitted
    }

    /// Wait until a token is available, up to the configured attempt bound.
    ///
    /// Between attempts this sleeps the larger of the class's retry floor
    /// (1 second when unset) and the average token spacing
    /// (`window / max_requests`). When every attempt is denied the throttle
    /// error for the key is returned. Dropping the future cancels the
    /// wait; no token is held across the sleep.
    pub async fn acquire(&self, key: &BucketKey) -> Result<(), RateLimitError> {
        let config = self.limits.get(key.class);
        let backoff = config
            .retry_floor()
            .unwrap_or(DEFAULT_RETRY_FLOOR)
            .max(config.token_interval());

        for attempt in 1..=self.wait_attempts {
            if self.check(key) {
                return Ok(());
            }

            if attempt < self.wait_attempts {
                trace!(
                    key = %key,
                    attempt = attempt,
                    backoff_ms = backoff.as_millis() as u64,
                    "Waiting for rate limit"
                );
                tokio::time::sleep(backoff).await;
            }
        }

        debug!(
            key = %key,
            attempts = self.wait_attempts,
            "Gave up waiting for rate limit"
        );
        Err(self.limit_error(key))
    }

    /// Snapshot a bucket's quota without mutating it.
    ///
    /// No refill pass is performed, so the snapshot reflects the last
    /// check. An unknown key reports a full, untouched bucket.
    pub fn status(&self, key: &BucketKey) -> QuotaStatus {
        let config = self.limits.get(key.class);
        let buckets = self.buckets.read();

        match buckets.get(key) {
            Some(bucket) => QuotaStatus {
                remaining: bucket.remaining(),
                reset_after: bucket.reset_after(&config),
                limit: config.max_requests,
            },
            None => QuotaStatus {
                remaining: config.max_requests,
                reset_after: config.window(),
                limit: config.max_requests,
            },
        }
    }

    /// Time until the next token for a key is available.
    ///
    /// Zero when a token is free right now, or when the key has no bucket.
    pub fn retry_hint(&self, key: &BucketKey) -> Duration {
        let config = self.limits.get(key.class);
        let buckets = self.buckets.read();

        buckets
            .get(key)
            .map(|bucket| bucket.time_to_next(&config))
            .unwrap_or(Duration::ZERO)
    }

    /// Build the throttle error for a denied key.
    ///
    /// The retry hint is rounded up to whole seconds and is always at
    /// least one second.
    pub(crate) fn limit_error(&self, key: &BucketKey) -> RateLimitError {
        let config = self.limits.get(key.class);
        let hint = self.retry_hint(key);
        let retry_secs = (hint.as_secs_f64().ceil() as u64).max(1);

        RateLimitError {
            class: key.class,
            retry_after: Duration::from_secs(retry_secs),
            limit: config.max_requests,
        }
    }

    /// Remove the bucket for a key, restoring its full allowance.
    ///
    /// Returns whether a bucket existed. This is primarily useful for
    /// test setup and teardown.
    pub fn reset(&self, key: &BucketKey) -> bool {
        self.buckets.write().remove(key).is_some()
    }

    /// Drop all buckets.
    pub fn clear(&self) {
        let mut buckets = self.buckets.write();
        buckets.clear();
    }

    /// Evict buckets idle longer than the stale threshold.
    ///
    /// Returns the number of buckets dropped. Bounds memory growth from
    /// keys that are no longer in use.
    pub fn sweep(&self) -> usize {
        let now = Instant::now();
        let mut buckets = self.buckets.write();
        let before = buckets.len();

        buckets.retain(|_, bucket| bucket.idle_for(now) < self.stale_after);

        let evicted = before - buckets.len();
        if evicted > 0 {
            debug!(
                evicted = evicted,
                remaining = buckets.len(),
                "Swept stale buckets"
            );
        }
        evicted
    }

    /// Get the number of live buckets.
    pub fn bucket_count(&self) -> usize {
        let buckets = self.buckets.read();
        buckets.len()
    }
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_test::assert_ok;

    fn limits(class: OperationClass, config: RateLimitConfig) -> ClassLimits {
        let mut limits = ClassLimits::new();
        limits.set(class, config).unwrap();
        limits
    }

    #[tokio::test]
    async fn test_rate_limiter_creation() {
        let limiter = RateLimiter::new();
        assert_eq!(limiter.bucket_count(), 0);
    }

    #[tokio::test]
    async fn test_check_creates_bucket() {
        let limiter = RateLimiter::new();
        let key = BucketKey::new(OperationClass::Read, "list_complaints");

        assert!(limiter.check(&key));
        assert_eq!(limiter.bucket_count(), 1);
    }

    #[tokio::test]
    async fn test_capacity_bound() {
        let limiter = RateLimiter::new();
        let key = BucketKey::new(OperationClass::Bulk, "purge");

        // The bulk class admits 10 requests per window.
        for _ in 0..10 {
            assert!(limiter.check(&key));
        }

        assert!(!limiter.check(&key));
    }

    #[tokio::test]
    async fn test_denial_consumes_nothing() {
        let limiter = RateLimiter::new();
        let key = BucketKey::new(OperationClass::Bulk, "purge");

        for _ in 0..10 {
            limiter.check(&key);
        }

        // Repeated denials leave the snapshot unchanged.
        assert!(!limiter.check(&key));
        assert!(!limiter.check(&key));
        assert_eq!(limiter.status(&key).remaining, 0);
    }

    #[tokio::test]
    async fn test_keys_are_independent() {
        let limiter = RateLimiter::new();
        let key_a = BucketKey::new(OperationClass::Bulk, "a");
        let key_b = BucketKey::new(OperationClass::Bulk, "b");

        for _ in 0..10 {
            assert!(limiter.check(&key_a));
        }
        assert!(!limiter.check(&key_a));

        // Exhausting "a" must not affect "b".
        for _ in 0..10 {
            assert!(limiter.check(&key_b));
        }
        assert!(!limiter.check(&key_b));
    }

    #[tokio::test]
    async fn test_status_for_unknown_key() {
        let limiter = RateLimiter::new();
        let key = BucketKey::new(OperationClass::Search, "untouched");

        let status = limiter.status(&key);
        assert_eq!(status.remaining, 50);
        assert_eq!(status.limit, 50);
        assert_eq!(status.reset_after, Duration::from_secs(60));
    }

    #[tokio::test]
    async fn test_status_tracks_consumption() {
        let limiter = RateLimiter::new();
        let key = BucketKey::new(OperationClass::Read, "list_complaints");

        for _ in 0..3 {
            limiter.check(&key);
        }

        let status = limiter.status(&key);
        assert_eq!(status.remaining, 97);
        assert_eq!(status.limit, 100);
    }

    #[tokio::test(start_paused = true)]
    async fn test_refill_accrues_across_rapid_checks() {
        let limiter = RateLimiter::with_limits(limits(
            OperationClass::Write,
            RateLimitConfig::new(4, Duration::from_secs(1)),
        ));
        let key = BucketKey::new(OperationClass::Write, "submit");

        for _ in 0..4 {
            assert!(limiter.check(&key));
        }
        assert_eq!(limiter.status(&key).remaining, 0);

        // 200ms at 4 tokens/sec is 0.8 of a token: still denied,
        // but the progress is not discarded.
        tokio::time::advance(Duration::from_millis(200)).await;
        assert!(!limiter.check(&key));

        tokio::time::advance(Duration::from_millis(100)).await;
        assert!(limiter.check(&key));
    }

    #[tokio::test(start_paused = true)]
    async fn test_remaining_grows_with_elapsed_time() {
        let limiter = RateLimiter::with_limits(limits(
            OperationClass::Write,
            RateLimitConfig::new(4, Duration::from_secs(1)),
        ));
        let key = BucketKey::new(OperationClass::Write, "submit");

        for _ in 0..4 {
            limiter.check(&key);
        }

        // 600ms at 4 tokens/sec earns 2.4 tokens; the check's refill pass
        // banks them and consumes one.
        tokio::time::advance(Duration::from_millis(600)).await;
        assert!(limiter.check(&key));
        assert_eq!(limiter.status(&key).remaining, 1);
    }

    #[tokio::test]
    async fn test_reset_restores_full_allowance() {
        let limiter = RateLimiter::new();
        let key = BucketKey::new(OperationClass::Read, "list_complaints");

        for _ in 0..100 {
            assert!(limiter.check(&key));
        }
        assert!(!limiter.check(&key));

        assert!(limiter.reset(&key));
        assert_eq!(limiter.status(&key).remaining, 100);
        assert!(limiter.check(&key));
    }

    #[tokio::test]
    async fn test_reset_unknown_key() {
        let limiter = RateLimiter::new();
        let key = BucketKey::new(OperationClass::Read, "never_used");

        assert!(!limiter.reset(&key));
    }

    #[tokio::test]
    async fn test_clear_drops_all_buckets() {
        let limiter = RateLimiter::new();
        limiter.check(&BucketKey::new(OperationClass::Read, "a"));
        limiter.check(&BucketKey::new(OperationClass::Write, "b"));
        assert_eq!(limiter.bucket_count(), 2);

        limiter.clear();
        assert_eq!(limiter.bucket_count(), 0);
    }

    #[tokio::test]
    async fn test_limit_error_fields() {
        let limiter = RateLimiter::new();
        let key = BucketKey::new(OperationClass::Auth, "sign_in");

        for _ in 0..20 {
            limiter.check(&key);
        }
        assert!(!limiter.check(&key));

        let err = limiter.limit_error(&key);
        assert_eq!(err.class, OperationClass::Auth);
        assert_eq!(err.limit, 20);
        assert!(err.retry_after >= Duration::from_secs(1));
    }

    #[tokio::test(start_paused = true)]
    async fn test_acquire_waits_for_refill() {
        let limiter = RateLimiter::with_limits(limits(
            OperationClass::Write,
            RateLimitConfig::new(1, Duration::from_millis(200))
                .with_retry_floor(Duration::from_millis(50)),
        ));
        let key = BucketKey::new(OperationClass::Write, "submit");

        assert!(limiter.check(&key));
        assert!(!limiter.check(&key));

        // One backoff of max(50ms, 200ms) refills the single token.
        assert_ok!(limiter.acquire(&key).await);
    }

    #[tokio::test]
    async fn test_acquire_gives_up_after_attempt_bound() {
        let limiter = RateLimiter::with_limits(limits(
            OperationClass::Write,
            RateLimitConfig::new(1, Duration::from_secs(3600)),
        ))
        .with_wait_attempts(1);
        let key = BucketKey::new(OperationClass::Write, "submit");

        assert!(limiter.check(&key));

        let err = limiter.acquire(&key).await.unwrap_err();
        assert_eq!(err.limit, 1);
        assert!(err.retry_after >= Duration::from_secs(1));
    }

    #[tokio::test(start_paused = true)]
    async fn test_sweep_evicts_idle_buckets() {
        let limiter = RateLimiter::new();
        let idle = BucketKey::new(OperationClass::Read, "idle");
        let active = BucketKey::new(OperationClass::Read, "active");

        limiter.check(&idle);
        limiter.check(&active);
        assert_eq!(limiter.bucket_count(), 2);

        tokio::time::advance(STALE_AFTER + Duration::from_secs(1)).await;
        limiter.check(&active);

        assert_eq!(limiter.sweep(), 1);
        assert_eq!(limiter.bucket_count(), 1);
        assert_eq!(limiter.status(&idle).remaining, 100);
    }

    #[tokio::test(start_paused = true)]
    async fn test_sweep_keeps_fresh_buckets() {
        let limiter = RateLimiter::new();
        limiter.check(&BucketKey::new(OperationClass::Read, "fresh"));

        tokio::time::advance(Duration::from_secs(60)).await;
        assert_eq!(limiter.sweep(), 0);
        assert_eq!(limiter.bucket_count(), 1);
    }
}
