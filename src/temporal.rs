//! Module implement the temporal index.
//!
//! Timestamps are bucketed by `⌊t / resolution⌋`; each bucket holds
//! the ids inserted into it, tagged with an insertion sequence for
//! deterministic ordering. The index keeps its state behind an
//! immutable snapshot: readers grab the current snapshot without
//! blocking, writers serialize behind a mutex, rebuild a copy of the
//! snapshot and swap it in. Buckets are shared between snapshots, so a
//! rebuild copies the bucket table, not the ids.

use std::{
    collections::BTreeMap,
    fmt, result,
    sync::{Arc, Mutex},
};

use crate::{dbs::NodeId, util::Spinlock, Error, Result};

/// Default seconds per temporal bucket.
pub const RESOLUTION: f64 = 1.0;

/// Temporal index, mapping time buckets to node ids.
pub struct Index {
    resolution: f64,

    mu: Mutex<u32>,
    inner: Arc<Spinlock<Arc<Inner>>>,
}

#[derive(Clone)]
struct Inner {
    seqno: u64,
    buckets: BTreeMap<i64, Arc<Vec<(u64, NodeId)>>>,
    ids: BTreeMap<NodeId, f64>,
}

impl Index {
    /// Create an empty index. `resolution`, in seconds per bucket, is
    /// fixed for the life of the index.
    pub fn new(resolution: f64) -> Result<Index> {
        if !resolution.is_finite() || resolution <= 0.0 {
            err_at!(InvalidQuery, msg: "temporal resolution {}", resolution)?;
        }
        let inner = Inner {
            seqno: 0,
            buckets: BTreeMap::new(),
            ids: BTreeMap::new(),
        };
        Ok(Index {
            resolution,
            mu: Mutex::new(0),
            inner: Arc::new(Spinlock::new(Arc::new(inner))),
        })
    }

    #[inline]
    pub fn to_resolution(&self) -> f64 {
        self.resolution
    }

    /// Bucket index for timestamp `t`.
    #[inline]
    pub fn bucket_of(&self, t: f64) -> i64 {
        (t / self.resolution).floor() as i64
    }

    /// Number of indexed ids.
    pub fn len(&self) -> usize {
        let inner = Arc::clone(&self.inner.read());
        inner.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Index `id` at time `t`. Re-inserting an id moves it.
    pub fn insert(&self, t: f64, id: NodeId) -> Result<()> {
        let _w = err_at!(Fatal, self.mu.lock())?;

        let mut inner: Inner = {
            let inner = Arc::clone(&self.inner.read());
            inner.as_ref().clone()
        };
        self.remove_from(&mut inner, &id);

        let bucket = self.bucket_of(t);
        inner.seqno += 1;
        let seqno = inner.seqno;

        let mut ids = match inner.buckets.get(&bucket) {
            Some(ids) => ids.as_ref().clone(),
            None => vec![],
        };
        ids.push((seqno, id));
        inner.buckets.insert(bucket, Arc::new(ids));
        inner.ids.insert(id, t);

        *self.inner.write() = Arc::new(inner);
        Ok(())
    }

    /// Remove `id` from the index. Return whether it was present.
    pub fn delete(&self, id: &NodeId) -> Result<bool> {
        let _w = err_at!(Fatal, self.mu.lock())?;

        let mut inner: Inner = {
            let inner = Arc::clone(&self.inner.read());
            inner.as_ref().clone()
        };
        let present = self.remove_from(&mut inner, id);
        if present {
            *self.inner.write() = Arc::new(inner);
        }
        Ok(present)
    }

    /// Move `id` from `t_old` to `t_new`.
    pub fn update(&self, t_old: f64, t_new: f64, id: NodeId) -> Result<()> {
        let _ = t_old; // the id carries its bucket in the snapshot
        self.insert(t_new, id)
    }

    /// Ids whose bucket falls within `[t_min, t_max]`, in id order.
    /// The window is bucket-granular: every id sharing a bucket with
    /// the bounds is included.
    pub fn range(&self, t_min: f64, t_max: f64) -> Result<Vec<NodeId>> {
        if t_min > t_max {
            err_at!(InvalidQuery, msg: "temporal range {} > {}", t_min, t_max)?;
        }
        let inner = Arc::clone(&self.inner.read());

        let (lo, hi) = (self.bucket_of(t_min), self.bucket_of(t_max));
        let mut ids = vec![];
        for (_, bucket) in inner.buckets.range(lo..=hi) {
            ids.extend(bucket.iter().map(|(_, id)| *id));
        }
        ids.sort_unstable();
        Ok(ids)
    }

    /// The `k` most recent ids: descending bucket order, and within a
    /// bucket descending insertion sequence.
    pub fn latest(&self, k: usize) -> Result<Vec<NodeId>> {
        let inner = Arc::clone(&self.inner.read());

        let mut out = Vec::with_capacity(k);
        'outer: for (_, bucket) in inner.buckets.iter().rev() {
            for (_, id) in bucket.iter().rev() {
                out.push(*id);
                if out.len() == k {
                    break 'outer;
                }
            }
        }
        Ok(out)
    }

    /// Timestamp currently indexed for `id`.
    pub fn get(&self, id: &NodeId) -> Option<f64> {
        let inner = Arc::clone(&self.inner.read());
        inner.ids.get(id).copied()
    }

    /// Rebuild the index from scratch.
    pub fn bulk_load(&self, items: Vec<(f64, NodeId)>) -> Result<()> {
        {
            let _w = err_at!(Fatal, self.mu.lock())?;
            let inner = Inner {
                seqno: 0,
                buckets: BTreeMap::new(),
                ids: BTreeMap::new(),
            };
            *self.inner.write() = Arc::new(inner);
        }
        for (t, id) in items.into_iter() {
            self.insert(t, id)?;
        }
        Ok(())
    }

    /// Drop every entry.
    pub fn clear(&self) -> Result<()> {
        self.bulk_load(vec![])
    }

    /// Fraction of the indexed time span covered by `[t_min, t_max]`,
    /// the planner's selectivity estimate. ONE when the index is
    /// empty.
    pub fn selectivity(&self, t_min: f64, t_max: f64) -> f64 {
        let inner = Arc::clone(&self.inner.read());

        let (first, last) = match (
            inner.buckets.keys().next(),
            inner.buckets.keys().next_back(),
        ) {
            (Some(first), Some(last)) => (*first, *last),
            _ => return 1.0,
        };
        let span = (last - first + 1) as f64;
        let lo = self.bucket_of(t_min).max(first);
        let hi = self.bucket_of(t_max).min(last);
        if hi < lo {
            0.0
        } else {
            ((hi - lo + 1) as f64 / span).min(1.0)
        }
    }

    /// Check bucket / id-table agreement and return statistics.
    pub fn validate(&self) -> Result<Stats> {
        let inner = Arc::clone(&self.inner.read());

        let mut n = 0;
        for (bucket, ids) in inner.buckets.iter() {
            if ids.is_empty() {
                err_at!(Fatal, msg: "temporal empty bucket {}", bucket)?;
            }
            for (_, id) in ids.iter() {
                let t = match inner.ids.get(id) {
                    Some(t) => *t,
                    None => err_at!(Fatal, msg: "temporal stray id {}", id)?,
                };
                if self.bucket_of(t) != *bucket {
                    err_at!(Fatal, msg: "temporal id {} in bucket {}", id, bucket)?;
                }
                n += 1;
            }
        }
        if n != inner.ids.len() {
            err_at!(Fatal, msg: "temporal count {} != {}", n, inner.ids.len())?;
        }

        Ok(self.stats_of(&inner))
    }

    pub fn to_stats(&self) -> Result<Stats> {
        let inner = Arc::clone(&self.inner.read());
        Ok(self.stats_of(&inner))
    }

    fn stats_of(&self, inner: &Inner) -> Stats {
        Stats {
            resolution: self.resolution,
            n_ids: inner.ids.len(),
            n_buckets: inner.buckets.len(),
        }
    }

    // remove `id` wherever it is indexed; empty buckets are dropped so
    // the bucket table stays dense.
    fn remove_from(&self, inner: &mut Inner, id: &NodeId) -> bool {
        let t = match inner.ids.remove(id) {
            Some(t) => t,
            None => return false,
        };
        let bucket = self.bucket_of(t);
        let ids: Vec<(u64, NodeId)> = match inner.buckets.get(&bucket) {
            Some(ids) => ids.iter().filter(|(_, i)| i != id).cloned().collect(),
            None => vec![],
        };
        if ids.is_empty() {
            inner.buckets.remove(&bucket);
        } else {
            inner.buckets.insert(bucket, Arc::new(ids));
        }
        true
    }
}

/// Statistic type, for the temporal [Index].
#[derive(Clone, Debug, Default)]
pub struct Stats {
    pub resolution: f64,
    pub n_ids: usize,
    pub n_buckets: usize,
}

impl fmt::Display for Stats {
    fn fmt(&self, f: &mut fmt::Formatter) -> result::Result<(), fmt::Error> {
        write!(
            f,
            "temporal = {{ resolution={}, n_ids={}, n_buckets={} }}",
            self.resolution, self.n_ids, self.n_buckets
        )
    }
}

#[cfg(test)]
#[path = "temporal_test.rs"]
mod temporal_test;
