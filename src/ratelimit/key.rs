//! Bucket key generation and handling.

use std::fmt;

use crate::config::OperationClass;

/// A key that uniquely identifies a token bucket.
///
/// The key is composed of the operation class and a scope string. The
/// scope usually names the wrapped operation, but callers can substitute a
/// per-resource or per-user value to give that resource its own quota.
/// Two different keys never share tokens.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct BucketKey {
    /// The operation class this bucket belongs to
    pub class: OperationClass,
    /// Scope within the class
    pub scope: String,
}

impl BucketKey {
    /// Create a new bucket key.
    pub fn new(class: OperationClass, scope: impl Into<String>) -> Self {
        Self {
            class,
            scope: scope.into(),
        }
    }

    /// Convert the bucket key to a string representation.
    ///
    /// This is useful for logging and debugging.
    pub fn to_string_key(&self) -> String {
        format!("{}:{}", self.class, self.scope)
    }
}

impl fmt::Display for BucketKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_string_key())
    }
}
