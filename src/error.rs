//! Error types for the cache
//!
//! Provides unified error handling using thiserror.

use thiserror::Error;

// == Cache Error Enum ==
/// Unified error type for the cache.
///
/// Variants carry no payload so callers can match on them or compare them
/// with `==` instead of inspecting messages.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheError {
    /// Insert-only write against a key that already holds a live entry
    #[error("duplicate key")]
    Duplicate,

    /// Update-only write against a key without a live entry
    #[error("no such key")]
    NoSuchKey,

    /// A background sweep was requested outside of a Tokio runtime
    #[error("background sweep requires a running Tokio runtime")]
    RuntimeUnavailable,
}

// == Result Type Alias ==
/// Convenience Result type for the cache.
pub type Result<T> = std::result::Result<T, CacheError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_errors_compare_by_variant() {
        assert_eq!(CacheError::Duplicate, CacheError::Duplicate);
        assert_ne!(CacheError::Duplicate, CacheError::NoSuchKey);
    }

    #[test]
    fn test_error_messages() {
        assert_eq!(CacheError::Duplicate.to_string(), "duplicate key");
        assert_eq!(CacheError::NoSuchKey.to_string(), "no such key");
    }
}
