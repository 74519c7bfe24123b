//! Operation classes and per-class rate limit configuration.
//!
//! Every backend call belongs to one of six operation classes, each with
//! its own token bucket allowance. The built-in table tunes read-heavy
//! endpoints with the largest allowance and bulk/administrative operations
//! with the smallest. Individual classes can be overridden from a YAML
//! file at limiter construction time; the table is fixed afterwards.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::path::Path;
use std::time::Duration;
use tracing::info;

use crate::error::{Result, TollgateError};

/// A named category of backend calls sharing one rate limit configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OperationClass {
    /// Fetches and list views
    Read,
    /// Single-record mutations
    Write,
    /// Batch and administrative mutations
    Bulk,
    /// Sign-in and session operations
    Auth,
    /// Query/filter endpoints
    Search,
    /// File and attachment uploads
    Upload,
}

impl OperationClass {
    /// All operation classes, in table order.
    pub const ALL: [OperationClass; 6] = [
        OperationClass::Read,
        OperationClass::Write,
        OperationClass::Bulk,
        OperationClass::Auth,
        OperationClass::Search,
        OperationClass::Upload,
    ];

    /// The lowercase name used in bucket keys and configuration files.
    pub fn as_str(&self) -> &'static str {
        match self {
            OperationClass::Read => "read",
            OperationClass::Write => "write",
            OperationClass::Bulk => "bulk",
            OperationClass::Auth => "auth",
            OperationClass::Search => "search",
            OperationClass::Upload => "upload",
        }
    }

    /// The built-in rate limit for this class.
    pub fn default_limits(&self) -> RateLimitConfig {
        let max_requests = match self {
            OperationClass::Read => 100,
            OperationClass::Write => 30,
            OperationClass::Bulk => 10,
            OperationClass::Auth => 20,
            OperationClass::Search => 50,
            OperationClass::Upload => 20,
        };
        RateLimitConfig::new(max_requests, Duration::from_secs(60))
    }
}

impl fmt::Display for OperationClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Rate limit configuration for a single operation class.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateLimitConfig {
    /// Maximum requests admitted per full window. Also the bucket capacity.
    pub max_requests: u32,
    /// Duration over which `max_requests` tokens are replenished, in milliseconds.
    pub window_ms: u64,
    /// Minimum backoff between wait attempts, in milliseconds.
    #[serde(default)]
    pub retry_floor_ms: Option<u64>,
}

impl RateLimitConfig {
    /// Create a configuration with no retry floor.
    pub fn new(max_requests: u32, window: Duration) -> Self {
        Self {
            max_requests,
            window_ms: window.as_millis() as u64,
            retry_floor_ms: None,
        }
    }

    /// Set the minimum backoff between wait attempts.
    pub fn with_retry_floor(mut self, floor: Duration) -> Self {
        self.retry_floor_ms = Some(floor.as_millis() as u64);
        self
    }

    /// The replenishment window.
    pub fn window(&self) -> Duration {
        Duration::from_millis(self.window_ms)
    }

    /// The minimum backoff between wait attempts, if configured.
    pub fn retry_floor(&self) -> Option<Duration> {
        self.retry_floor_ms.map(Duration::from_millis)
    }

    /// Average spacing between tokens at the configured refill rate.
    pub(crate) fn token_interval(&self) -> Duration {
        Duration::from_millis(self.window_ms / u64::from(self.max_requests.max(1)))
    }

    /// Check the configuration invariants.
    pub fn validate(&self) -> Result<()> {
        if self.max_requests == 0 {
            return Err(TollgateError::Config(
                "max_requests must be greater than zero".to_string(),
            ));
        }
        if self.window_ms == 0 {
            return Err(TollgateError::Config(
                "window_ms must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}

/// The per-class limit table owned by a limiter instance.
///
/// Classes without an explicit override use the built-in limits from
/// [`OperationClass::default_limits`].
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ClassLimits {
    overrides: HashMap<OperationClass, RateLimitConfig>,
}

impl ClassLimits {
    /// Create a table with no overrides.
    pub fn new() -> Self {
        Self::default()
    }

    /// Override the limits for a single class.
    pub fn set(&mut self, class: OperationClass, config: RateLimitConfig) -> Result<()> {
        config.validate().map_err(|e| {
            TollgateError::Config(format!("invalid limits for class {}: {}", class, e))
        })?;
        self.overrides.insert(class, config);
        Ok(())
    }

    /// The effective limits for a class.
    pub fn get(&self, class: OperationClass) -> RateLimitConfig {
        self.overrides
            .get(&class)
            .copied()
            .unwrap_or_else(|| class.default_limits())
    }

    /// Load class overrides from a YAML file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        info!(path = %path.display(), "Loading rate limit configuration");

        let contents = std::fs::read_to_string(path)?;
        Self::from_yaml(&contents)
    }

    /// Load class overrides from a YAML string.
    ///
    /// The document is a map of class name to limits:
    ///
    /// ```yaml
    /// write:
    ///   max_requests: 10
    ///   window_ms: 30000
    /// upload:
    ///   max_requests: 5
    ///   window_ms: 60000
    ///   retry_floor_ms: 2000
    /// ```
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let limits: ClassLimits = serde_yaml::from_str(yaml).map_err(|e| {
            TollgateError::Config(format!("Failed to parse rate limit config: {}", e))
        })?;
        limits.validate()?;
        Ok(limits)
    }

    /// Check every override against the configuration invariants.
    pub fn validate(&self) -> Result<()> {
        for (class, config) in &self.overrides {
            config.validate().map_err(|e| {
                TollgateError::Config(format!("invalid limits for class {}: {}", class, e))
            })?;
        }
        Ok(())
    }
}
