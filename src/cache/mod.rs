//! Cache Module
//!
//! In-process key/value cache with composable eviction policies: expiration,
//! prolongation on read, entry-count capacity and aggregate size, optionally
//! swept by a background task.

mod clock;
mod feature;
mod index;
mod item;
mod options;
mod stats;
mod store;


// Re-export public types
pub use feature::SizeFn;
pub use item::Item;
pub use options::{
    with_capacity, with_daemon, with_expiration, with_prolongation, with_size, CacheOption,
    DEFAULT_EXPIRATION,
};
pub use stats::CacheStats;
pub use store::Cache;
