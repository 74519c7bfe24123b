//! Rate limiting logic and state management.

mod bucket;
mod gate;
mod key;
mod limiter;
mod sweeper;

pub use gate::{Gate, GateError, ThrottleSignal};
pub use key::BucketKey;
pub use limiter::{QuotaStatus, RateLimiter, STALE_AFTER};
pub use sweeper::{Sweeper, SweeperHandle, SWEEP_INTERVAL};
