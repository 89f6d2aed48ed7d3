//! State cache, a small LRU over reconstructed historical content.

use std::{
    collections::HashMap,
    fmt, result,
    sync::atomic::{AtomicUsize, Ordering::SeqCst},
};

use crate::{
    dbs::{NodeId, Value},
    util::{self, Spinlock},
};

/// Small LRU keyed by `(node_id, t_target)`, memoizing the content
/// produced by chain replay.
pub struct StateCache {
    capacity: usize,
    inner: Spinlock<Inner>,

    n_gets: AtomicUsize,
    n_hits: AtomicUsize,
    n_evicted: AtomicUsize,
}

struct Inner {
    seqno: u64,
    map: HashMap<(NodeId, u64), Entry>,
}

struct Entry {
    content: Value,
    access: u64,
}

impl StateCache {
    /// Create a cache bound to `capacity` entries. Capacity ZERO
    /// disables caching altogether.
    pub fn new(capacity: usize) -> StateCache {
        StateCache {
            capacity,
            inner: Spinlock::new(Inner {
                seqno: 0,
                map: HashMap::with_capacity(capacity),
            }),
            n_gets: AtomicUsize::new(0),
            n_hits: AtomicUsize::new(0),
            n_evicted: AtomicUsize::new(0),
        }
    }

    /// Fetch the memoized state of `id` at `t`.
    pub fn get(&self, id: &NodeId, t: f64) -> Option<Value> {
        self.n_gets.fetch_add(1, SeqCst);

        let key = (*id, util::ts_to_bits(t));
        let mut inner = self.inner.write();
        inner.seqno += 1;
        let seqno = inner.seqno;
        match inner.map.get_mut(&key) {
            Some(entry) => {
                entry.access = seqno;
                self.n_hits.fetch_add(1, SeqCst);
                Some(entry.content.clone())
            }
            None => None,
        }
    }

    /// Memoize the state of `id` at `t`.
    pub fn set(&self, id: &NodeId, t: f64, content: Value) {
        if self.capacity == 0 {
            return;
        }

        let key = (*id, util::ts_to_bits(t));
        let mut inner = self.inner.write();
        inner.seqno += 1;
        let access = inner.seqno;

        let fresh = !inner.map.contains_key(&key);
        if fresh && inner.map.len() >= self.capacity {
            let victim = inner
                .map
                .iter()
                .min_by_key(|(key, entry)| (entry.access, **key))
                .map(|(key, _)| *key);
            if let Some(victim) = victim {
                inner.map.remove(&victim);
                self.n_evicted.fetch_add(1, SeqCst);
            }
        }
        inner.map.insert(key, Entry { content, access });
    }

    /// Drop every memoized state of `id`, called on any write to the
    /// node.
    pub fn invalidate(&self, id: &NodeId) {
        let mut inner = self.inner.write();
        inner.map.retain(|(nid, _), _| nid != id);
    }

    /// Drop everything.
    pub fn clear(&self) {
        let mut inner = self.inner.write();
        inner.map.clear();
    }

    pub fn len(&self) -> usize {
        self.inner.read().map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn to_stats(&self) -> Stats {
        let inner = self.inner.read();
        Stats {
            n_entries: inner.map.len(),
            n_gets: self.n_gets.load(SeqCst),
            n_hits: self.n_hits.load(SeqCst),
            n_evicted: self.n_evicted.load(SeqCst),
        }
    }
}

/// Statistic type, for [StateCache].
#[derive(Clone, Debug, Default)]
pub struct Stats {
    pub n_entries: usize,
    pub n_gets: usize,
    pub n_hits: usize,
    pub n_evicted: usize,
}

impl fmt::Display for Stats {
    fn fmt(&self, f: &mut fmt::Formatter) -> result::Result<(), fmt::Error> {
        write!(
            f,
            "state_cache = {{ n_entries={}, n_gets={}, n_hits={}, n_evicted={} }}",
            self.n_entries, self.n_gets, self.n_hits, self.n_evicted
        )
    }
}

#[cfg(test)]
#[path = "state_test.rs"]
mod state_test;
