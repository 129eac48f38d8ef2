//! Feature Module
//!
//! Eviction policies composed as a chain of decorators. Each policy wraps an
//! inner one, delegates every hook to it and adds its own behavior; the
//! innermost [`BaseFeature`] keeps the index in step with the item map.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::oneshot;
use tracing::debug;

use crate::cache::clock::{deadline_after, now_nanos};
use crate::cache::store::Store;
use crate::cache::Item;

/// Computes the size of an item for the size policy.
pub type SizeFn<K, V> = Arc<dyn Fn(&Item<K, V>) -> u64 + Send + Sync>;

// == Sweep Trigger ==
/// Why a sweep is running.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum SweepTrigger {
    /// Opportunistic sweep at the start of a public operation
    Access,
    /// Periodic sweep forced by the background task
    Timer,
}

// == Feature Trait ==
/// Hooks invoked by the cache while its lock is held.
///
/// Every default delegates to [`Feature::inner`], so a decorator only
/// overrides the hooks it extends.
pub(crate) trait Feature<K, V>: Send {
    fn inner(&mut self) -> Option<&mut dyn Feature<K, V>>;

    /// A live item was read.
    fn on_read(&mut self, store: &mut Store<K, V>, key: &K) {
        if let Some(inner) = self.inner() {
            inner.on_read(store, key);
        }
    }

    /// `old` left the map and/or `new` is about to enter it.
    fn on_write(
        &mut self,
        store: &mut Store<K, V>,
        old: Option<&Item<K, V>>,
        new: Option<&mut Item<K, V>>,
    ) {
        if let Some(inner) = self.inner() {
            inner.on_write(store, old, new);
        }
    }

    fn on_sweep(&mut self, store: &mut Store<K, V>, trigger: SweepTrigger) {
        if let Some(inner) = self.inner() {
            inner.on_sweep(store, trigger);
        }
    }

    fn on_flush(&mut self, store: &mut Store<K, V>) {
        if let Some(inner) = self.inner() {
            inner.on_flush(store);
        }
    }

    fn shutdown(&mut self) {
        if let Some(inner) = self.inner() {
            inner.shutdown();
        }
    }
}

// == Base ==
/// Innermost link: the only place index membership follows map membership.
#[derive(Debug, Default)]
pub(crate) struct BaseFeature;

impl<K, V> Feature<K, V> for BaseFeature {
    fn inner(&mut self) -> Option<&mut dyn Feature<K, V>> {
        None
    }

    fn on_read(&mut self, _store: &mut Store<K, V>, _key: &K) {}

    fn on_write(
        &mut self,
        store: &mut Store<K, V>,
        old: Option<&Item<K, V>>,
        new: Option<&mut Item<K, V>>,
    ) {
        if let Some(old) = old {
            store.index.retract(old);
        }
        if let Some(new) = new {
            store.index.assert(new);
        }
    }

    fn on_sweep(&mut self, _store: &mut Store<K, V>, _trigger: SweepTrigger) {}

    fn on_flush(&mut self, store: &mut Store<K, V>) {
        store.index.flush();
    }

    fn shutdown(&mut self) {}
}

// == Expiration ==
/// Evicts items whose deadline has passed.
pub(crate) struct ExpirationFeature<K, V> {
    inner: Box<dyn Feature<K, V>>,
}

impl<K, V> ExpirationFeature<K, V> {
    pub(crate) fn new(inner: Box<dyn Feature<K, V>>) -> Self {
        Self { inner }
    }
}

impl<K, V> Feature<K, V> for ExpirationFeature<K, V>
where
    K: Eq + std::hash::Hash + Send,
    V: Send,
{
    fn inner(&mut self) -> Option<&mut dyn Feature<K, V>> {
        Some(&mut *self.inner)
    }

    fn on_sweep(&mut self, store: &mut Store<K, V>, trigger: SweepTrigger) {
        self.inner.on_sweep(store, trigger);

        let now = now_nanos();
        let Store {
            entries,
            index,
            stats,
        } = store;
        let removed = index.truncate(&mut |key: &K| {
            let expired = entries.get(key).map_or(true, |item| item.expired_at(now));
            if expired {
                entries.remove(key);
            }
            expired
        });

        if removed > 0 {
            stats.record_expirations(removed);
            debug!("Expiration sweep: removed {} entries", removed);
        }
    }
}

// == Expiration Prolongation ==
/// Pushes an item's deadline forward every time it is read.
pub(crate) struct ExpirationProlongation<K, V> {
    inner: Box<dyn Feature<K, V>>,
    prolongation: Duration,
}

impl<K, V> ExpirationProlongation<K, V> {
    pub(crate) fn new(inner: Box<dyn Feature<K, V>>, prolongation: Duration) -> Self {
        Self {
            inner,
            prolongation,
        }
    }
}

impl<K, V> Feature<K, V> for ExpirationProlongation<K, V>
where
    K: Eq + std::hash::Hash + Send,
    V: Send,
{
    fn inner(&mut self) -> Option<&mut dyn Feature<K, V>> {
        Some(&mut *self.inner)
    }

    fn on_read(&mut self, store: &mut Store<K, V>, key: &K) {
        self.inner.on_read(store, key);

        let Store { entries, index, .. } = store;
        if let Some(item) = entries.get_mut(key) {
            index.retract(item);
            item.expiration = deadline_after(now_nanos(), self.prolongation);
            index.assert(item);
        }
    }
}

// == Capacity ==
/// Keeps the entry count at or below a ceiling by evicting from the index front.
pub(crate) struct CapacityFeature<K, V> {
    inner: Box<dyn Feature<K, V>>,
    capacity: usize,
}

impl<K, V> CapacityFeature<K, V> {
    pub(crate) fn new(inner: Box<dyn Feature<K, V>>, capacity: usize) -> Self {
        Self { inner, capacity }
    }
}

impl<K, V> Feature<K, V> for CapacityFeature<K, V>
where
    K: Eq + std::hash::Hash + Send,
    V: Send,
{
    fn inner(&mut self) -> Option<&mut dyn Feature<K, V>> {
        Some(&mut *self.inner)
    }

    fn on_sweep(&mut self, store: &mut Store<K, V>, trigger: SweepTrigger) {
        self.inner.on_sweep(store, trigger);

        let capacity = self.capacity;
        let Store {
            entries,
            index,
            stats,
        } = store;
        let removed = index.truncate(&mut |key: &K| {
            if entries.len() <= capacity {
                return false;
            }
            entries.remove(key);
            true
        });

        if removed > 0 {
            stats.record_evictions(removed);
            debug!("Capacity sweep: evicted {} entries", removed);
        }
    }
}

// == Capacity Prolongation ==
/// Re-indexes an item on read.
///
/// The serial index sorts by the item's fixed id, so the item lands back
/// where it was: reads do not protect an item from capacity eviction.
pub(crate) struct CapacityProlongation<K, V> {
    inner: Box<dyn Feature<K, V>>,
}

impl<K, V> CapacityProlongation<K, V> {
    pub(crate) fn new(inner: Box<dyn Feature<K, V>>) -> Self {
        Self { inner }
    }
}

impl<K, V> Feature<K, V> for CapacityProlongation<K, V>
where
    K: Eq + std::hash::Hash + Send,
    V: Send,
{
    fn inner(&mut self) -> Option<&mut dyn Feature<K, V>> {
        Some(&mut *self.inner)
    }

    fn on_read(&mut self, store: &mut Store<K, V>, key: &K) {
        self.inner.on_read(store, key);

        let Store { entries, index, .. } = store;
        if let Some(item) = entries.get(key) {
            index.retract(item);
            index.assert(item);
        }
    }
}

// == Size ==
/// Keeps the aggregate size of all entries at or below a maximum.
///
/// Each new item is sized once, on write. The running total lives in the
/// entry map so removals by any policy are accounted for.
pub(crate) struct SizeFeature<K, V> {
    inner: Box<dyn Feature<K, V>>,
    max_size: u64,
    size_of: SizeFn<K, V>,
}

impl<K, V> SizeFeature<K, V> {
    pub(crate) fn new(inner: Box<dyn Feature<K, V>>, max_size: u64, size_of: SizeFn<K, V>) -> Self {
        Self {
            inner,
            max_size,
            size_of,
        }
    }
}

impl<K, V> Feature<K, V> for SizeFeature<K, V>
where
    K: Eq + std::hash::Hash + Send,
    V: Send,
{
    fn inner(&mut self) -> Option<&mut dyn Feature<K, V>> {
        Some(&mut *self.inner)
    }

    fn on_write(
        &mut self,
        store: &mut Store<K, V>,
        old: Option<&Item<K, V>>,
        mut new: Option<&mut Item<K, V>>,
    ) {
        if let Some(item) = new.as_deref_mut() {
            item.size = (self.size_of)(&*item);
        }
        self.inner.on_write(store, old, new);
    }

    fn on_sweep(&mut self, store: &mut Store<K, V>, trigger: SweepTrigger) {
        self.inner.on_sweep(store, trigger);

        let max_size = self.max_size;
        let Store {
            entries,
            index,
            stats,
        } = store;
        let removed = index.truncate(&mut |key: &K| {
            if entries.size() <= max_size {
                return false;
            }
            entries.remove(key);
            true
        });

        if removed > 0 {
            stats.record_evictions(removed);
            debug!(
                "Size sweep: evicted {} entries, {} of {} bytes in use",
                removed,
                entries.size(),
                max_size
            );
        }
    }
}

// == Daemon ==
/// Outermost link when a background sweep is configured.
///
/// Access sweeps stop here; timer sweeps from the background task pass
/// through to the wrapped chain.
pub(crate) struct DaemonFeature<K, V> {
    inner: Box<dyn Feature<K, V>>,
    stop: Option<oneshot::Sender<()>>,
}

impl<K, V> DaemonFeature<K, V> {
    pub(crate) fn new(inner: Box<dyn Feature<K, V>>, stop: oneshot::Sender<()>) -> Self {
        Self {
            inner,
            stop: Some(stop),
        }
    }
}

impl<K, V> Feature<K, V> for DaemonFeature<K, V>
where
    K: Send,
    V: Send,
{
    fn inner(&mut self) -> Option<&mut dyn Feature<K, V>> {
        Some(&mut *self.inner)
    }

    fn on_sweep(&mut self, store: &mut Store<K, V>, trigger: SweepTrigger) {
        if trigger == SweepTrigger::Timer {
            self.inner.on_sweep(store, trigger);
        }
    }

    fn shutdown(&mut self) {
        if let Some(stop) = self.stop.take() {
            // the task may already be gone
            let _ = stop.send(());
        }
        self.inner.shutdown();
    }
}
