//! Policy Cache - An in-process key/value cache
//!
//! Provides time-to-live expiration, read-driven prolongation, and entry-count
//! and byte-size ceilings, composed from independent policies and optionally
//! swept by a background task.

pub mod cache;
pub mod config;
pub mod error;
mod tasks;

pub use cache::{Cache, CacheOption, CacheStats, Item};
pub use config::CacheConfig;
pub use error::{CacheError, Result};
