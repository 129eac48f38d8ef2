//! Configuration Module
//!
//! Loads cache settings from environment variables and turns them into
//! construction options.

use std::env;
use std::time::Duration;

use serde::Deserialize;

use crate::cache::{with_capacity, with_daemon, with_expiration, with_prolongation, CacheOption};

/// Cache configuration parameters.
///
/// Unset values leave the matching policy disabled. The size policy is not
/// configurable here because it needs a sizing function.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Default TTL in seconds; enables expiration sweeps
    pub default_ttl: Option<u64>,
    /// Maximum number of entries
    pub max_entries: Option<usize>,
    /// Reset an entry's deadline on every read
    pub prolongation: bool,
    /// Background sweep interval in seconds, 0 disables it
    pub cleanup_interval: Option<u64>,
}

impl CacheConfig {
    /// Creates a new CacheConfig by loading values from environment variables.
    ///
    /// # Environment Variables
    /// - `CACHE_DEFAULT_TTL` - Default TTL in seconds (default: unset)
    /// - `CACHE_MAX_ENTRIES` - Maximum cache entries (default: unset)
    /// - `CACHE_PROLONGATION` - `true` or `1` to enable (default: false)
    /// - `CACHE_CLEANUP_INTERVAL` - Sweep frequency in seconds (default: unset)
    pub fn from_env() -> Self {
        Self {
            default_ttl: parse_var("CACHE_DEFAULT_TTL"),
            max_entries: parse_var("CACHE_MAX_ENTRIES"),
            prolongation: env::var("CACHE_PROLONGATION")
                .map(|v| matches!(v.trim().to_ascii_lowercase().as_str(), "true" | "1"))
                .unwrap_or(false),
            cleanup_interval: parse_var("CACHE_CLEANUP_INTERVAL"),
        }
    }

    /// Returns the construction options this configuration describes.
    pub fn options<K, V>(&self) -> Vec<CacheOption<K, V>> {
        let mut options = Vec::new();
        if let Some(ttl) = self.default_ttl {
            options.push(with_expiration(Duration::from_secs(ttl)));
        }
        if let Some(max_entries) = self.max_entries {
            options.push(with_capacity(max_entries));
        }
        if self.prolongation {
            options.push(with_prolongation());
        }
        if let Some(interval) = self.cleanup_interval.filter(|secs| *secs > 0) {
            options.push(with_daemon(Duration::from_secs(interval)));
        }
        options
    }
}

fn parse_var<T: std::str::FromStr>(name: &str) -> Option<T> {
    env::var(name).ok().and_then(|v| v.trim().parse().ok())
}
