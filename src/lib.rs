//! Tollgate - Client-Side Rate Limiting for Backend API Calls
//!
//! This crate implements an in-process token bucket rate limiter that
//! gates calls to a remote backend. Each operation class (read, write,
//! bulk, auth, search, upload) carries its own allowance, buckets are
//! isolated per key, and throttling surfaces as a single typed error
//! whether the denial happened locally or at the remote service.

pub mod config;
pub mod error;
pub mod ratelimit;

pub use config::{ClassLimits, OperationClass, RateLimitConfig};
pub use error::{RateLimitError, Result, TollgateError};
pub use ratelimit::{
    BucketKey, Gate, GateError, QuotaStatus, RateLimiter, Sweeper, SweeperHandle, ThrottleSignal,
};
