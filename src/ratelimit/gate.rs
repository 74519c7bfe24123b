//! Gated execution of backend operations.
//!
//! A [`Gate`] wraps one backend operation behind a shared [`RateLimiter`]:
//! it consults the limiter before the call, refuses to invoke the
//! operation when the bucket is empty, and folds remote throttling
//! reported by the backend into the same error surface as local denials.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tracing::debug;

use crate::config::OperationClass;
use crate::error::RateLimitError;

use super::key::BucketKey;
use super::limiter::{QuotaStatus, RateLimiter};

/// Retry hint used when a remote throttle carries none of its own.
const REMOTE_RETRY_HINT: Duration = Duration::from_secs(60);

/// Reports whether an operation error is a remote throttle.
///
/// The data-access layer implements this for its error type so the gate
/// can recognize backend-enforced rate limiting without inspecting message
/// text. The defaults treat no error as a throttle, which is correct for
/// error types that never carry throttle responses.
pub trait ThrottleSignal {
    /// Whether the remote service rejected the call for rate limiting.
    fn is_throttle(&self) -> bool {
        false
    }

    /// Retry hint supplied by the remote service, if any.
    fn retry_after(&self) -> Option<Duration> {
        None
    }
}

/// Error surface of a gated operation.
#[derive(Error, Debug)]
pub enum GateError<E> {
    /// The call was throttled, either by the local bucket before the
    /// operation ran or by the remote service.
    #[error(transparent)]
    Throttled(#[from] RateLimitError),

    /// The operation failed for an unrelated reason; passed through
    /// unchanged.
    #[error(transparent)]
    Inner(E),
}

impl<E> GateError<E> {
    /// Whether this error is a throttle, local or remote.
    pub fn is_throttled(&self) -> bool {
        matches!(self, GateError::Throttled(_))
    }

    /// The retry hint, when throttled.
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            GateError::Throttled(err) => Some(err.retry_after),
            GateError::Inner(_) => None,
        }
    }

    /// The underlying operation error, when not throttled.
    pub fn into_inner(self) -> Option<E> {
        match self {
            GateError::Throttled(_) => None,
            GateError::Inner(err) => Some(err),
        }
    }
}

/// Gates execution of one backend operation behind a shared rate limiter.
///
/// A gate is cheap to construct and clone; build one per wrapped
/// operation, or one per resource when calls should be throttled with a
/// finer scope.
#[derive(Clone)]
pub struct Gate {
    /// The shared limiter consulted before every call
    limiter: Arc<RateLimiter>,
    /// The key this gate consumes tokens under
    key: BucketKey,
}

impl Gate {
    /// Create a gate for an operation under the given class.
    ///
    /// `scope` names the operation, or a per-resource/per-user value when
    /// the quota should be scoped more finely. Buckets are keyed by
    /// `class:scope`.
    pub fn new(limiter: Arc<RateLimiter>, class: OperationClass, scope: impl Into<String>) -> Self {
        Self {
            limiter,
            key: BucketKey::new(class, scope),
        }
    }

    /// The key this gate consumes tokens under.
    pub fn key(&self) -> &BucketKey {
        &self.key
    }

    /// Run an operation if a token is available, failing fast otherwise.
    ///
    /// On denial the operation is never invoked and
    /// [`GateError::Throttled`] is returned with a retry hint. On
    /// admission the operation runs exactly once and its token is spent
    /// whether or not it succeeds, so induced failures cannot be used to
    /// bypass the quota. An operation error reporting a remote throttle
    /// through [`ThrottleSignal`] is normalized into
    /// [`GateError::Throttled`]; any other error passes through unchanged
    /// as [`GateError::Inner`].
    pub async fn run<F, Fut, T, E>(&self, op: F) -> Result<T, GateError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: ThrottleSignal,
    {
        if !self.limiter.check(&self.key) {
            return Err(GateError::Throttled(self.limiter.limit_error(&self.key)));
        }

        self.dispatch(op).await
    }

    /// Like [`Gate::run`], but waits for a token instead of failing fast.
    ///
    /// The wait is bounded by the limiter's attempt budget; exhausting it
    /// returns [`GateError::Throttled`] without invoking the operation.
    pub async fn run_when_ready<F, Fut, T, E>(&self, op: F) -> Result<T, GateError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: ThrottleSignal,
    {
        self.limiter.acquire(&self.key).await?;
        self.dispatch(op).await
    }

    /// Invoke an admitted operation and translate its error.
    async fn dispatch<F, Fut, T, E>(&self, op: F) -> Result<T, GateError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: ThrottleSignal,
    {
        match op().await {
            Ok(value) => Ok(value),
            Err(err) if err.is_throttle() => {
                debug!(key = %self.key, "Remote service throttled the call");
                Err(GateError::Throttled(RateLimitError {
                    class: self.key.class,
                    retry_after: err.retry_after().unwrap_or(REMOTE_RETRY_HINT),
                    limit: self.limiter.limits_for(self.key.class).max_requests,
                }))
            }
            Err(err) => Err(GateError::Inner(err)),
        }
    }

    /// Current quota snapshot for this gate's bucket.
    pub fn status(&self) -> QuotaStatus {
        self.limiter.status(&self.key)
    }

    /// Restore this gate's bucket to its full allowance.
    pub fn reset(&self) {
        self.limiter.reset(&self.key);
    }
}
