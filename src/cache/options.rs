//! Options Module
//!
//! Cache construction runs in two named steps over the same option list:
//! [`Flags::collect`] records which features were requested, then
//! [`Resolved::build`] picks the index and stacks the feature chain.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::oneshot;

use crate::cache::feature::{
    BaseFeature, CapacityFeature, CapacityProlongation, DaemonFeature, ExpirationFeature,
    ExpirationProlongation, Feature, SizeFeature, SizeFn,
};
use crate::cache::index::{select_index, select_sort_key, Index, SortKey};
use crate::cache::Item;

/// TTL applied to writes when no expiration option is given.
pub const DEFAULT_EXPIRATION: Duration = Duration::from_secs(60 * 60);

// == Cache Option ==
/// A construction directive for [`Cache::new`](crate::cache::Cache::new).
///
/// Build these with [`with_expiration`], [`with_capacity`],
/// [`with_prolongation`], [`with_size`] and [`with_daemon`].
pub enum CacheOption<K, V> {
    Expiration(Duration),
    Capacity(usize),
    Prolongation,
    Size { max_size: u64, size_of: SizeFn<K, V> },
    Daemon(Duration),
}

impl<K, V> fmt::Debug for CacheOption<K, V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CacheOption::Expiration(ttl) => f.debug_tuple("Expiration").field(ttl).finish(),
            CacheOption::Capacity(capacity) => f.debug_tuple("Capacity").field(capacity).finish(),
            CacheOption::Prolongation => f.write_str("Prolongation"),
            CacheOption::Size { max_size, .. } => f
                .debug_struct("Size")
                .field("max_size", max_size)
                .finish_non_exhaustive(),
            CacheOption::Daemon(interval) => f.debug_tuple("Daemon").field(interval).finish(),
        }
    }
}

/// Sets the default TTL and evicts entries once it has passed.
pub fn with_expiration<K, V>(ttl: Duration) -> CacheOption<K, V> {
    CacheOption::Expiration(ttl)
}

/// Caps the number of entries, evicting the oldest writes first.
pub fn with_capacity<K, V>(capacity: usize) -> CacheOption<K, V> {
    CacheOption::Capacity(capacity)
}

/// Resets an entry's deadline every time it is read.
pub fn with_prolongation<K, V>() -> CacheOption<K, V> {
    CacheOption::Prolongation
}

/// Caps the summed size of all entries.
///
/// `size_of` is called once per write; it must not touch the cache.
pub fn with_size<K, V, F>(max_size: u64, size_of: F) -> CacheOption<K, V>
where
    F: Fn(&Item<K, V>) -> u64 + Send + Sync + 'static,
{
    CacheOption::Size {
        max_size,
        size_of: Arc::new(size_of),
    }
}

/// Sweeps from a background task every `interval` instead of on each call.
///
/// A zero interval disables the background task.
pub fn with_daemon<K, V>(interval: Duration) -> CacheOption<K, V> {
    CacheOption::Daemon(interval)
}

// == Phase 1: Flags ==
/// Which features the option list asks for.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub(crate) struct Flags {
    pub(crate) expiration: bool,
    pub(crate) prolongation: bool,
    pub(crate) capacity: bool,
    pub(crate) size: bool,
    pub(crate) daemon: bool,
}

impl Flags {
    pub(crate) fn collect<K, V>(options: &[CacheOption<K, V>]) -> Self {
        let mut flags = Flags::default();
        for option in options {
            match option {
                CacheOption::Expiration(_) => flags.expiration = true,
                CacheOption::Prolongation => flags.prolongation = true,
                CacheOption::Capacity(_) => flags.capacity = true,
                CacheOption::Size { .. } => flags.size = true,
                // the last interval wins, as in `Resolved::build`
                CacheOption::Daemon(interval) => flags.daemon = !interval.is_zero(),
            }
        }
        flags
    }
}

// == Phase 2: Resolved ==
/// Background sweep still to be started once the cache state exists.
pub(crate) struct DaemonPlan {
    pub(crate) interval: Duration,
    pub(crate) stop: oneshot::Receiver<()>,
}

/// The concrete index and feature chain for a cache.
pub(crate) struct Resolved<K, V> {
    pub(crate) flags: Flags,
    pub(crate) expiration: Duration,
    pub(crate) index: Box<dyn Index<K, V>>,
    pub(crate) chain: Box<dyn Feature<K, V>>,
    pub(crate) daemon: Option<DaemonPlan>,
}

impl<K, V> Resolved<K, V>
where
    K: Eq + std::hash::Hash + Clone + Send + 'static,
    V: Send + 'static,
{
    /// Replays `options` in order, each wrapping the chain built so far.
    pub(crate) fn build(options: &[CacheOption<K, V>], flags: Flags) -> Self {
        let index = select_index::<K, V>(&flags);
        let sort_key = select_sort_key(&flags);

        // last one wins, wherever it appears relative to prolongation
        let expiration = options
            .iter()
            .rev()
            .find_map(|option| match option {
                CacheOption::Expiration(ttl) => Some(*ttl),
                _ => None,
            })
            .unwrap_or(DEFAULT_EXPIRATION);

        let mut chain: Box<dyn Feature<K, V>> = Box::new(BaseFeature);
        for option in options {
            chain = match option {
                CacheOption::Expiration(_) => Box::new(ExpirationFeature::new(chain)),
                CacheOption::Capacity(capacity) => Box::new(CapacityFeature::new(chain, *capacity)),
                CacheOption::Prolongation => {
                    let chain: Box<dyn Feature<K, V>> = if flags.expiration {
                        chain
                    } else {
                        Box::new(ExpirationFeature::new(chain))
                    };
                    match sort_key {
                        Some(SortKey::Serial) => Box::new(CapacityProlongation::new(chain)),
                        _ => Box::new(ExpirationProlongation::new(chain, expiration)),
                    }
                }
                CacheOption::Size { max_size, size_of } => {
                    Box::new(SizeFeature::new(chain, *max_size, Arc::clone(size_of)))
                }
                CacheOption::Daemon(_) => chain,
            };
        }

        let interval = options.iter().rev().find_map(|option| match option {
            CacheOption::Daemon(interval) => Some(*interval),
            _ => None,
        });

        let daemon = match interval {
            Some(interval) if flags.daemon && !interval.is_zero() => {
                let (stop_tx, stop_rx) = oneshot::channel();
                chain = Box::new(DaemonFeature::new(chain, stop_tx));
                Some(DaemonPlan {
                    interval,
                    stop: stop_rx,
                })
            }
            _ => None,
        };

        Self {
            flags,
            expiration,
            index,
            chain,
            daemon,
        }
    }
}
