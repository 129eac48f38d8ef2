//! Index Module
//!
//! Order-maintaining structures over live items, used by the eviction policies
//! to find the next victim without scanning the whole map.

use std::collections::VecDeque;

use crate::cache::options::Flags;
use crate::cache::Item;

// == Index Trait ==
/// An ordering over the live items of a cache.
///
/// Policies only ever evict from the front, so implementations keep the
/// smallest sort key first.
pub(crate) trait Index<K, V>: Send {
    /// Inserts `item` at its sorted position.
    fn assert(&mut self, item: &Item<K, V>);

    /// Removes `item`, matched by serial id. Unknown items are ignored.
    fn retract(&mut self, item: &Item<K, V>);

    /// Pops front entries while `evict` returns true for their key.
    ///
    /// Returns the number of entries removed.
    fn truncate(&mut self, evict: &mut dyn FnMut(&K) -> bool) -> usize;

    /// Drops every entry.
    fn flush(&mut self);

    fn len(&self) -> usize;

    /// Slots front to back as `(rank, key)`.
    #[cfg(test)]
    fn ranked_keys(&self) -> Vec<(i64, K)> {
        Vec::new()
    }

    /// Rank `item` would be stored under, if this index orders anything.
    #[cfg(test)]
    fn rank_of(&self, _item: &Item<K, V>) -> Option<i64> {
        None
    }
}

// == Sort Key ==
/// What an [`OrderedIndex`] sorts by.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum SortKey {
    /// Deadline, soonest first
    Expiration,
    /// Serial id, oldest write first
    Serial,
}

impl SortKey {
    fn rank<K, V>(self, item: &Item<K, V>) -> i64 {
        match self {
            SortKey::Expiration => item.expiration,
            SortKey::Serial => i64::try_from(item.id).unwrap_or(i64::MAX),
        }
    }
}

#[derive(Debug)]
struct Slot<K> {
    rank: i64,
    id: u64,
    key: K,
}

// == Ordered Index ==
/// Sorted sequence of `(rank, id, key)` slots.
///
/// Insertion and removal locate their position by binary search; equal ranks
/// keep insertion order so ties are evicted oldest first.
#[derive(Debug)]
pub(crate) struct OrderedIndex<K> {
    slots: VecDeque<Slot<K>>,
    sort_key: SortKey,
}

impl<K> OrderedIndex<K> {
    pub(crate) fn new(sort_key: SortKey) -> Self {
        Self {
            slots: VecDeque::new(),
            sort_key,
        }
    }

    #[cfg(test)]
    pub(crate) fn keys(&self) -> Vec<&K> {
        self.slots.iter().map(|slot| &slot.key).collect()
    }

    fn position_of(&self, rank: i64, id: u64) -> Option<usize> {
        let start = self.slots.partition_point(|slot| slot.rank < rank);
        self.slots
            .iter()
            .skip(start)
            .take_while(|slot| slot.rank == rank)
            .position(|slot| slot.id == id)
            .map(|offset| start + offset)
    }
}

impl<K, V> Index<K, V> for OrderedIndex<K>
where
    K: Clone + Send,
{
    fn assert(&mut self, item: &Item<K, V>) {
        let rank = self.sort_key.rank(item);
        let at = self.slots.partition_point(|slot| slot.rank <= rank);
        self.slots.insert(
            at,
            Slot {
                rank,
                id: item.id,
                key: item.key.clone(),
            },
        );
    }

    fn retract(&mut self, item: &Item<K, V>) {
        let rank = self.sort_key.rank(item);
        if let Some(at) = self.position_of(rank, item.id) {
            self.slots.remove(at);
        }
    }

    fn truncate(&mut self, evict: &mut dyn FnMut(&K) -> bool) -> usize {
        let mut removed = 0;
        while let Some(front) = self.slots.front() {
            if !evict(&front.key) {
                break;
            }
            self.slots.pop_front();
            removed += 1;
        }
        removed
    }

    fn flush(&mut self) {
        self.slots.clear();
    }

    fn len(&self) -> usize {
        self.slots.len()
    }

    #[cfg(test)]
    fn ranked_keys(&self) -> Vec<(i64, K)> {
        self.slots.iter().map(|slot| (slot.rank, slot.key.clone())).collect()
    }

    #[cfg(test)]
    fn rank_of(&self, item: &Item<K, V>) -> Option<i64> {
        Some(self.sort_key.rank(item))
    }
}

// == Noop Index ==
/// Used when no eviction policy is active.
#[derive(Debug, Default)]
pub(crate) struct NoopIndex;

impl<K, V> Index<K, V> for NoopIndex {
    fn assert(&mut self, _item: &Item<K, V>) {}

    fn retract(&mut self, _item: &Item<K, V>) {}

    fn truncate(&mut self, _evict: &mut dyn FnMut(&K) -> bool) -> usize {
        0
    }

    fn flush(&mut self) {}

    fn len(&self) -> usize {
        0
    }
}

// == Selection ==
/// Picks the index for a set of requested features.
///
/// Expiration wins over capacity and size; prolongation alone still needs
/// deadlines to extend.
pub(crate) fn select_index<K, V>(flags: &Flags) -> Box<dyn Index<K, V>>
where
    K: Clone + Send + 'static,
{
    match select_sort_key(flags) {
        Some(sort_key) => Box::new(OrderedIndex::<K>::new(sort_key)),
        None => Box::new(NoopIndex),
    }
}

pub(crate) fn select_sort_key(flags: &Flags) -> Option<SortKey> {
    if flags.expiration {
        Some(SortKey::Expiration)
    } else if flags.capacity || flags.size {
        Some(SortKey::Serial)
    } else if flags.prolongation {
        Some(SortKey::Expiration)
    } else {
        None
    }
}
