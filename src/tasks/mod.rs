//! Background Tasks Module
//!
//! Contains background tasks that run periodically alongside a cache.
//!
//! # Tasks
//! - Sweep: forces the cache's eviction policies at a fixed interval

mod daemon;

pub(crate) use daemon::spawn_sweep_task;
