//! Node cache, an LRU with temporal bias.

use std::{
    collections::HashMap,
    fmt, result,
    sync::atomic::{AtomicUsize, Ordering::SeqCst},
};

use crate::{
    dbs::{Footprint, Node, NodeId},
    util::Spinlock,
};

/// Count-bounded cache of node records.
///
/// Eviction picks the entry with the lowest composite score
/// `recency + bias / (1 + |t − focus_t|)`: stale entries go first,
/// but entries whose position is close to the focus window are
/// protected in proportion to the configured bias. With `bias` ZERO
/// this is a plain LRU.
pub struct NodeCache {
    capacity: usize,
    inner: Spinlock<Inner>,

    n_gets: AtomicUsize,
    n_hits: AtomicUsize,
    n_sets: AtomicUsize,
    n_evicted: AtomicUsize,
}

struct Inner {
    seqno: u64,
    bias: f64,
    focus_t: f64,
    n_bytes: isize,
    map: HashMap<NodeId, Entry>,
}

struct Entry {
    node: Node,
    access: u64,
    footprint: isize,
}

impl NodeCache {
    /// Create a cache bound to `capacity` entries. Capacity ZERO
    /// disables caching altogether.
    pub fn new(capacity: usize, bias: f64, focus_t: f64) -> NodeCache {
        NodeCache {
            capacity,
            inner: Spinlock::new(Inner {
                seqno: 0,
                bias,
                focus_t,
                n_bytes: 0,
                map: HashMap::with_capacity(capacity),
            }),
            n_gets: AtomicUsize::new(0),
            n_hits: AtomicUsize::new(0),
            n_sets: AtomicUsize::new(0),
            n_evicted: AtomicUsize::new(0),
        }
    }

    /// Move the temporal focus window.
    pub fn set_focus(&self, focus_t: f64) {
        let mut inner = self.inner.write();
        inner.focus_t = focus_t;
    }

    /// Fetch a cached node, refreshing its recency.
    pub fn get(&self, id: &NodeId) -> Option<Node> {
        self.n_gets.fetch_add(1, SeqCst);

        let mut inner = self.inner.write();
        inner.seqno += 1;
        let seqno = inner.seqno;
        match inner.map.get_mut(id) {
            Some(entry) => {
                entry.access = seqno;
                self.n_hits.fetch_add(1, SeqCst);
                Some(entry.node.clone())
            }
            None => None,
        }
    }

    /// Cache `node`, evicting the lowest scoring entry when full.
    pub fn set(&self, node: Node) {
        if self.capacity == 0 {
            return;
        }
        self.n_sets.fetch_add(1, SeqCst);

        let footprint = node.footprint().unwrap_or(0);

        let mut inner = self.inner.write();
        inner.seqno += 1;
        let access = inner.seqno;

        let fresh = !inner.map.contains_key(&node.id);
        if fresh && inner.map.len() >= self.capacity {
            if let Some(victim) = self.pick_victim(&inner) {
                if let Some(old) = inner.map.remove(&victim) {
                    inner.n_bytes -= old.footprint;
                }
                self.n_evicted.fetch_add(1, SeqCst);
            }
        }
        let entry = Entry {
            node,
            access,
            footprint,
        };
        if let Some(old) = inner.map.insert(entry.node.id, entry) {
            inner.n_bytes -= old.footprint;
        }
        inner.n_bytes += footprint;
    }

    /// Drop the entry for `id`, called on every write to the node.
    pub fn invalidate(&self, id: &NodeId) {
        let mut inner = self.inner.write();
        if let Some(old) = inner.map.remove(id) {
            inner.n_bytes -= old.footprint;
        }
    }

    /// Drop everything.
    pub fn clear(&self) {
        let mut inner = self.inner.write();
        inner.map.clear();
        inner.n_bytes = 0;
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
            n_bytes: inner.n_bytes,
            n_gets: self.n_gets.load(SeqCst),
            n_hits: self.n_hits.load(SeqCst),
            n_sets: self.n_sets.load(SeqCst),
            n_evicted: self.n_evicted.load(SeqCst),
        }
    }

    fn pick_victim(&self, inner: &Inner) -> Option<NodeId> {
        let seqno = inner.seqno.max(1) as f64;
        let mut victim: Option<(f64, NodeId)> = None;
        for (id, entry) in inner.map.iter() {
            let recency = entry.access as f64 / seqno;
            let closeness = 1.0 / (1.0 + (entry.node.position.t - inner.focus_t).abs());
            let score = recency + inner.bias * closeness;
            let worse = match victim {
                Some((best, best_id)) => {
                    score < best || (score == best && *id < best_id)
                }
                None => true,
            };
            if worse {
                victim = Some((score, *id));
            }
        }
        victim.map(|(_, id)| id)
    }
}

/// Statistic type, for [NodeCache].
#[derive(Clone, Debug, Default)]
pub struct Stats {
    pub n_entries: usize,
    /// Approximate memory footprint of the cached nodes.
    pub n_bytes: isize,
    pub n_gets: usize,
    pub n_hits: usize,
    pub n_sets: usize,
    pub n_evicted: usize,
}

impl fmt::Display for Stats {
    fn fmt(&self, f: &mut fmt::Formatter) -> result::Result<(), fmt::Error> {
        write!(
            f,
            concat!(
                "node_cache = {{ n_entries={}, n_bytes={}, n_gets={}, ",
                "n_hits={}, n_sets={}, n_evicted={} }}"
            ),
            self.n_entries, self.n_bytes, self.n_gets, self.n_hits, self.n_sets,
            self.n_evicted
        )
    }
}

#[cfg(test)]
#[path = "lru_test.rs"]
mod lru_test;
