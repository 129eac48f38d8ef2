//! Cache Store Module
//!
//! The public [`Cache`] handle: one mutex over the item map, the ordering
//! index, the serial counter and the feature chain.

use std::collections::HashMap;
use std::hash::Hash;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use tokio::runtime::Handle;
use tracing::{debug, warn};

use crate::cache::clock::{deadline_after, now_nanos};
use crate::cache::feature::{Feature, SweepTrigger};
use crate::cache::index::Index;
use crate::cache::options::{CacheOption, Flags, Resolved};
use crate::cache::{CacheStats, Item};
use crate::error::{CacheError, Result};
use crate::tasks::spawn_sweep_task;

// == Entries ==
/// Key to item map plus the summed size of its items.
pub(crate) struct Entries<K, V> {
    map: HashMap<K, Item<K, V>>,
    size: u64,
}

impl<K, V> Entries<K, V>
where
    K: Eq + Hash,
{
    fn new() -> Self {
        Self {
            map: HashMap::new(),
            size: 0,
        }
    }

    pub(crate) fn get(&self, key: &K) -> Option<&Item<K, V>> {
        self.map.get(key)
    }

    /// Only `expiration` may be changed through the returned reference.
    pub(crate) fn get_mut(&mut self, key: &K) -> Option<&mut Item<K, V>> {
        self.map.get_mut(key)
    }

    pub(crate) fn insert(&mut self, item: Item<K, V>) -> Option<Item<K, V>>
    where
        K: Clone,
    {
        self.size = self.size.saturating_add(item.size);
        let old = self.map.insert(item.key.clone(), item);
        if let Some(old) = &old {
            self.size = self.size.saturating_sub(old.size);
        }
        old
    }

    pub(crate) fn remove(&mut self, key: &K) -> Option<Item<K, V>> {
        let item = self.map.remove(key)?;
        self.size = self.size.saturating_sub(item.size);
        Some(item)
    }

    pub(crate) fn len(&self) -> usize {
        self.map.len()
    }

    pub(crate) fn size(&self) -> u64 {
        self.size
    }

    fn clear(&mut self) {
        self.map = HashMap::new();
        self.size = 0;
    }
}

// == Store ==
/// Everything the feature chain is allowed to touch.
pub(crate) struct Store<K, V> {
    pub(crate) entries: Entries<K, V>,
    pub(crate) index: Box<dyn Index<K, V>>,
    pub(crate) stats: CacheStats,
}

impl<K, V> Store<K, V>
where
    K: Eq + Hash,
{
    pub(crate) fn new(index: Box<dyn Index<K, V>>) -> Self {
        Self {
            entries: Entries::new(),
            index,
            stats: CacheStats::new(),
        }
    }
}

// == State ==
/// The data guarded by the cache mutex.
struct State<K, V> {
    store: Store<K, V>,
    chain: Box<dyn Feature<K, V>>,
    counter: u64,
}

impl<K, V> State<K, V>
where
    K: Eq + Hash + Clone + Send + 'static,
    V: Clone + Send + 'static,
{
    /// Runs the chain's sweep, returning how many entries it removed.
    fn sweep(&mut self, trigger: SweepTrigger) -> usize {
        let before = self.store.entries.len();
        self.chain.on_sweep(&mut self.store, trigger);
        before.saturating_sub(self.store.entries.len())
    }

    /// Returns whether `key` holds a live item, evicting it if it has expired.
    fn lookup_live(&mut self, key: &K, now: i64) -> bool {
        let expired = match self.store.entries.get(key) {
            Some(item) => item.expired_at(now),
            None => return false,
        };
        if expired {
            self.expire(key);
        }
        !expired
    }

    fn expire(&mut self, key: &K) {
        if let Some(item) = self.store.entries.remove(key) {
            self.chain.on_write(&mut self.store, Some(&item), None);
            self.store.stats.record_expirations(1);
            debug!("Lazily expired entry with serial id {}", item.id);
        }
    }

    /// Writes a fresh item for `key`, retracting any current one.
    fn write(&mut self, key: K, value: V, ttl: Duration) {
        let old = self.store.entries.remove(&key);

        self.counter += 1;
        let mut item = Item::new(self.counter, key, value, deadline_after(now_nanos(), ttl));

        self.chain.on_write(&mut self.store, old.as_ref(), Some(&mut item));
        self.store.entries.insert(item);
    }
}

fn lock<K, V>(shared: &Mutex<State<K, V>>) -> MutexGuard<'_, State<K, V>> {
    shared.lock().unwrap_or_else(|poisoned| {
        warn!("Recovering cache state from a poisoned lock");
        poisoned.into_inner()
    })
}

// == Cache ==
/// Thread-safe key/value cache with pluggable eviction policies.
///
/// Cloning the handle shares the same underlying cache. Every operation
/// holds one mutex for its whole duration, including the sweep it starts
/// with, so concurrent callers observe each call as a single step.
///
/// ```
/// use std::time::Duration;
/// use policy_cache::cache::{with_capacity, with_expiration, Cache};
///
/// let cache = Cache::new(vec![
///     with_expiration(Duration::from_secs(60)),
///     with_capacity(2),
/// ]);
/// cache.set("a", 1);
/// cache.set("b", 2);
/// cache.set("c", 3);
///
/// assert!(cache.get(&"a").is_none());
/// assert_eq!(cache.get(&"c").map(|item| *item.value()), Some(3));
/// ```
///
/// A background sweep runs on the current Tokio runtime. Build such caches
/// with [`Cache::try_new`], which reports a missing runtime as an error:
///
/// ```
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() -> policy_cache::Result<()> {
/// use std::time::Duration;
/// use policy_cache::cache::{with_daemon, with_expiration, Cache};
///
/// let cache = Cache::try_new(vec![
///     with_expiration(Duration::from_secs(60)),
///     with_daemon(Duration::from_secs(1)),
/// ])?;
/// cache.set("a", 1);
/// cache.close();
/// # Ok(())
/// # }
/// ```
pub struct Cache<K, V> {
    shared: Arc<Mutex<State<K, V>>>,
    /// Default TTL for `set` and `add`
    expiration: Duration,
}

impl<K, V> Clone for Cache<K, V> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
            expiration: self.expiration,
        }
    }
}

impl<K, V> Cache<K, V>
where
    K: Eq + Hash + Clone + Send + 'static,
    V: Clone + Send + 'static,
{
    // == Constructor ==
    /// Creates a cache from an ordered list of options.
    ///
    /// # Panics
    /// If a background sweep is requested outside of a Tokio runtime, the
    /// same way `tokio::spawn` does. Use [`Cache::try_new`] to get an error instead.
    pub fn new(options: Vec<CacheOption<K, V>>) -> Self {
        match Self::try_new(options) {
            Ok(cache) => cache,
            Err(err) => panic!("{}", err),
        }
    }

    /// Creates a cache from an ordered list of options.
    ///
    /// Fails with [`CacheError::RuntimeUnavailable`] if a background sweep
    /// is requested outside of a Tokio runtime.
    pub fn try_new(options: Vec<CacheOption<K, V>>) -> Result<Self> {
        let flags = Flags::collect(&options);
        let runtime = if flags.daemon {
            Some(Handle::try_current().map_err(|_| CacheError::RuntimeUnavailable)?)
        } else {
            None
        };

        let resolved = Resolved::build(&options, flags);
        debug!(
            "Cache resolved: flags={:?}, default_ttl={:?}",
            resolved.flags, resolved.expiration
        );

        let shared = Arc::new(Mutex::new(State {
            store: Store::new(resolved.index),
            chain: resolved.chain,
            counter: 0,
        }));

        if let (Some(runtime), Some(plan)) = (runtime, resolved.daemon) {
            let state = Arc::downgrade(&shared);
            spawn_sweep_task(&runtime, plan.interval, plan.stop, move || {
                let shared = state.upgrade()?;
                let removed = lock(&shared).sweep(SweepTrigger::Timer);
                Some(removed)
            });
        }

        Ok(Self {
            shared,
            expiration: resolved.expiration,
        })
    }

    fn lock(&self) -> MutexGuard<'_, State<K, V>> {
        lock(&self.shared)
    }

    // == Set ==
    /// Stores `value` under `key` with the default TTL, replacing any entry.
    pub fn set(&self, key: K, value: V) {
        self.assign(key, value, self.expiration);
    }

    /// Stores `value` under `key` for `ttl`, replacing any entry.
    ///
    /// The entry always gets a new serial id, even when it replaces one.
    pub fn assign(&self, key: K, value: V, ttl: Duration) {
        let mut state = self.lock();
        state.sweep(SweepTrigger::Access);
        state.lookup_live(&key, now_nanos());
        state.write(key, value, ttl);
    }

    // == Add ==
    /// Stores `value` under `key` with the default TTL unless a live entry exists.
    pub fn add(&self, key: K, value: V) -> Result<()> {
        self.append(key, value, self.expiration)
    }

    /// Stores `value` under `key` for `ttl` unless a live entry exists.
    ///
    /// # Errors
    /// [`CacheError::Duplicate`] if `key` already holds a live entry; the
    /// cache is left unchanged.
    pub fn append(&self, key: K, value: V, ttl: Duration) -> Result<()> {
        let mut state = self.lock();
        state.sweep(SweepTrigger::Access);
        if state.lookup_live(&key, now_nanos()) {
            return Err(CacheError::Duplicate);
        }
        state.write(key, value, ttl);
        Ok(())
    }

    // == Replace ==
    /// Overwrites the live entry under `key`, giving it `ttl`.
    ///
    /// # Errors
    /// [`CacheError::NoSuchKey`] if `key` has no live entry; nothing is created.
    pub fn replace(&self, key: K, value: V, ttl: Duration) -> Result<()> {
        let mut state = self.lock();
        state.sweep(SweepTrigger::Access);
        if !state.lookup_live(&key, now_nanos()) {
            return Err(CacheError::NoSuchKey);
        }
        state.write(key, value, ttl);
        Ok(())
    }

    // == Get ==
    /// Returns a copy of the live entry under `key`.
    ///
    /// An entry found past its deadline is removed and reported as absent.
    /// With prolongation active the returned copy carries the new deadline.
    pub fn get(&self, key: &K) -> Option<Item<K, V>> {
        let mut state = self.lock();
        state.sweep(SweepTrigger::Access);

        if !state.lookup_live(key, now_nanos()) {
            state.store.stats.record_miss();
            return None;
        }

        let State { store, chain, .. } = &mut *state;
        chain.on_read(store, key);
        store.stats.record_hit();
        store.entries.get(key).cloned()
    }

    // == Delete ==
    /// Removes the entry under `key`, if any.
    pub fn delete(&self, key: &K) {
        let mut state = self.lock();
        state.sweep(SweepTrigger::Access);

        let State { store, chain, .. } = &mut *state;
        if let Some(item) = store.entries.remove(key) {
            chain.on_write(store, Some(&item), None);
        }
    }

    // == Item Count ==
    /// Returns the number of entries left after sweeping.
    pub fn item_count(&self) -> usize {
        let mut state = self.lock();
        state.sweep(SweepTrigger::Access);
        state.store.entries.len()
    }

    /// Alias of [`Cache::item_count`].
    pub fn len(&self) -> usize {
        self.item_count()
    }

    pub fn is_empty(&self) -> bool {
        self.item_count() == 0
    }

    // == Items ==
    /// Returns a snapshot of every entry left after sweeping.
    ///
    /// Entries past their deadline that no sweep has removed yet are included.
    pub fn items(&self) -> HashMap<K, Item<K, V>> {
        let mut state = self.lock();
        state.sweep(SweepTrigger::Access);
        state.store.entries.map.clone()
    }

    // == Flush ==
    /// Drops every entry without running per-entry hooks.
    pub fn flush(&self) {
        let mut state = self.lock();
        let State { store, chain, .. } = &mut *state;
        chain.on_flush(store);
        store.entries.clear();
    }

    // == Close ==
    /// Stops the background sweep, if one is running.
    ///
    /// Calling it again does nothing. The cache stays usable afterwards.
    pub fn close(&self) {
        self.lock().chain.shutdown();
    }

    // == Stats ==
    /// Returns current statistics without sweeping.
    pub fn stats(&self) -> CacheStats {
        let state = self.lock();
        let mut stats = state.store.stats.clone();
        stats.set_total_entries(state.store.entries.len());
        stats
    }

    /// Index slots front to back as `(rank, key)`, and every map entry with
    /// the rank the index would give it. Does not sweep.
    #[cfg(test)]
    pub(crate) fn index_snapshot(&self) -> (Vec<(i64, K)>, Vec<(i64, K)>) {
        let state = self.lock();
        let index = &state.store.index;
        let slots = index.ranked_keys();
        let entries = state
            .store
            .entries
            .map
            .values()
            .map(|item| (index.rank_of(item).unwrap_or_default(), item.key.clone()))
            .collect();
        (slots, entries)
    }
}

// == Unit Tests ==
#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::{with_capacity, with_expiration, with_prolongation, with_size};
    use std::thread::sleep;

    fn assert_index_matches_map<K, V>(cache: &Cache<K, V>)
    where
        K: Eq + Hash + Clone + Send + std::fmt::Debug + 'static,
        V: Clone + Send + 'static,
    {
        let (slots, entries) = cache.index_snapshot();
        assert_eq!(slots.len(), entries.len());
        assert!(slots.windows(2).all(|pair| pair[0].0 <= pair[1].0));

        let indexed: HashMap<K, i64> = slots.into_iter().map(|(rank, key)| (key, rank)).collect();
        let stored: HashMap<K, i64> = entries.into_iter().map(|(rank, key)| (key, rank)).collect();
        assert_eq!(indexed, stored);
    }

    #[test]
    fn test_store_set_and_get() {
        let cache = Cache::new(vec![]);

        cache.set("hello", "world".to_string());
        let item = cache.get(&"hello").unwrap();

        assert_eq!(item.value(), "world");
        assert_eq!(cache.item_count(), 1);
    }

    #[test]
    fn test_store_get_nonexistent() {
        let cache: Cache<&str, String> = Cache::new(vec![]);
        assert!(cache.get(&"nonexistent").is_none());
    }

    #[test]
    fn test_overwrite_gets_new_serial_id() {
        let cache = Cache::new(vec![with_capacity(10)]);

        cache.set("key", 1);
        let first = cache.get(&"key").unwrap().id();
        cache.set("key", 2);
        let second = cache.get(&"key").unwrap();

        assert!(second.id() > first);
        assert_eq!(*second.value(), 2);
        assert_eq!(cache.item_count(), 1);
        assert_index_matches_map(&cache);
    }

    #[test]
    fn test_not_expired_entries_stay_accessible() {
        let cache = Cache::new(vec![with_expiration(Duration::from_secs(3600))]);
        cache.set("hello1", "word1");
        cache.set("hello2", "word2");
        cache.set("hello3", "word3");
        sleep(Duration::from_millis(20));

        assert!(cache.get(&"hello1").is_some());
        assert!(cache.get(&"hello2").is_some());
        assert!(cache.get(&"hello3").is_some());
    }

    #[test]
    fn test_expired_entries_are_not_accessible() {
        let cache = Cache::new(vec![with_expiration(Duration::from_millis(10))]);
        cache.set("hello1", "word1");
        cache.set("hello2", "word2");
        cache.assign("hello3", "word3", Duration::from_secs(3600));
        sleep(Duration::from_millis(20));

        assert!(cache.get(&"hello1").is_none());
        assert!(cache.get(&"hello2").is_none());
        assert!(cache.get(&"hello3").is_some());
        assert_index_matches_map(&cache);
    }

    #[test]
    fn test_default_ttl_is_honored_lazily_without_policies() {
        let cache = Cache::new(vec![]);
        cache.assign("short", 1, Duration::from_millis(5));
        sleep(Duration::from_millis(15));

        assert_eq!(cache.item_count(), 1, "No sweep policy should be installed");
        assert!(cache.get(&"short").is_none());
        assert_eq!(cache.item_count(), 0);
    }

    #[test]
    fn test_add_rejects_live_duplicate() {
        let cache = Cache::new(vec![]);

        assert_eq!(cache.add("key", 1), Ok(()));
        assert_eq!(cache.add("key", 2), Err(CacheError::Duplicate));
        assert_eq!(cache.get(&"key").map(Item::into_value), Some(1));
    }

    #[test]
    fn test_add_over_expired_entry_succeeds() {
        let cache = Cache::new(vec![]);
        cache.assign("key", 1, Duration::from_millis(5));
        sleep(Duration::from_millis(15));

        assert_eq!(cache.add("key", 2), Ok(()));
        assert_eq!(cache.get(&"key").map(Item::into_value), Some(2));
    }

    #[test]
    fn test_replace_requires_live_entry() {
        let cache = Cache::new(vec![with_expiration(Duration::from_secs(60))]);

        assert_eq!(
            cache.replace("key", 1, Duration::from_secs(1)),
            Err(CacheError::NoSuchKey)
        );
        assert_eq!(cache.item_count(), 0);

        cache.set("key", 1);
        assert_eq!(cache.replace("key", 2, Duration::from_secs(1)), Ok(()));
        assert_eq!(cache.get(&"key").map(Item::into_value), Some(2));
        assert_index_matches_map(&cache);
    }

    #[test]
    fn test_delete_removes_entry() {
        let cache = Cache::new(vec![with_capacity(5)]);
        cache.set("a", 1);
        cache.set("b", 2);

        cache.delete(&"a");
        cache.delete(&"missing");

        assert!(cache.get(&"a").is_none());
        assert_eq!(cache.item_count(), 1);
        assert_index_matches_map(&cache);
    }

    #[test]
    fn test_capacity_removes_oldest() {
        let cache = Cache::new(vec![
            with_expiration(Duration::from_secs(3600)),
            with_capacity(2),
        ]);
        cache.set("hello1", "word1");
        sleep(Duration::from_millis(2));
        cache.set("hello2", "word2");
        sleep(Duration::from_millis(2));
        cache.set("hello3", "word3");

        assert!(cache.get(&"hello1").is_none());
        assert!(cache.get(&"hello2").is_some());
        assert!(cache.get(&"hello3").is_some());
    }

    #[test]
    fn test_max_size_removes_items() {
        let cache = Cache::new(vec![
            with_expiration(Duration::from_secs(3600)),
            with_size(10, |_: &Item<String, String>| 4),
        ]);
        for i in 0..100 {
            cache.set(i.to_string(), i.to_string());
        }

        assert_eq!(cache.item_count(), 2);
        assert!(cache.get(&"98".to_string()).is_some());
        assert!(cache.get(&"99".to_string()).is_some());
    }

    #[test]
    fn test_prolongation_keeps_entry_alive() {
        let cache = Cache::new(vec![
            with_expiration(Duration::from_millis(50)),
            with_prolongation(),
        ]);
        cache.set("hello1", "word1");

        for _ in 0..10 {
            assert!(cache.get(&"hello1").is_some());
            sleep(Duration::from_millis(20));
        }

        let item = cache.get(&"hello1").unwrap();
        let remaining = item.expiration() - now_nanos();
        assert!(remaining > Duration::from_millis(20).as_nanos() as i64);
        assert_index_matches_map(&cache);
    }

    #[test]
    fn test_items_returns_snapshot() {
        let cache = Cache::new(vec![]);
        cache.set("a", 1);
        cache.set("b", 2);

        let snapshot = cache.items();
        cache.delete(&"a");

        assert_eq!(snapshot.len(), 2);
        assert_eq!(snapshot.get("a").map(|item| *item.value()), Some(1));
        assert_eq!(cache.item_count(), 1);
    }

    #[test]
    fn test_flush_clears_map_and_index() {
        let cache = Cache::new(vec![
            with_capacity(10),
            with_size(100, |_: &Item<&str, i32>| 10),
        ]);
        cache.set("a", 1);
        cache.set("b", 2);

        cache.flush();

        assert_eq!(cache.item_count(), 0);
        assert_index_matches_map(&cache);
        assert_eq!(cache.lock().store.entries.size(), 0);
    }

    #[test]
    fn test_stats_counts_hits_misses_and_evictions() {
        let cache = Cache::new(vec![with_capacity(1)]);
        cache.set("a", 1);
        cache.set("b", 2);
        let _ = cache.get(&"b");
        let _ = cache.get(&"a");

        let stats = cache.stats();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.evictions, 1);
        assert_eq!(stats.total_entries, 1);
    }

    #[test]
    fn test_try_new_without_runtime_fails_for_daemon() {
        let result: Result<Cache<&str, i32>> =
            Cache::try_new(vec![crate::cache::with_daemon(Duration::from_millis(10))]);
        assert_eq!(result.err(), Some(CacheError::RuntimeUnavailable));
    }

    #[test]
    fn test_try_new_without_runtime_when_last_daemon_is_zero() {
        let result: Result<Cache<&str, i32>> = Cache::try_new(vec![
            crate::cache::with_daemon(Duration::from_millis(10)),
            crate::cache::with_daemon(Duration::ZERO),
        ]);
        let cache = result.expect("no daemon means no runtime is needed");
        cache.set("a", 1);
        assert_eq!(cache.get(&"a").map(|item| *item.value()), Some(1));
        cache.close();
    }

    #[test]
    fn test_close_without_daemon_is_noop() {
        let cache = Cache::new(vec![with_expiration(Duration::from_secs(60))]);
        cache.set("a", 1);
        cache.close();
        cache.close();
        assert!(cache.get(&"a").is_some());
    }
}
