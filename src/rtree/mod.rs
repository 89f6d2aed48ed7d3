//! Module implement the spatial index, an R-tree over cylindrical
//! `(t, r, θ)` space.
//!
//! Leaf slots hold `(point, node_id)` pairs, branch slots hold the
//! minimum bounding rectangle of their subtree. Overflowing nodes are
//! handled R*-style: the first overflow per level per insertion
//! re-inserts a fraction of the node's entries, subsequent overflows
//! split quadratically. Wrapping θ query rectangles are split into two
//! non-wrapping halves before probing, and k-NN runs best-first with
//! an admissible rectangle distance bound.
//!
//! Concurrency: single-writer / many-reader through a reader-writer
//! lock at the root. Bulk loads rebuild the tree under the exclusive
//! lock.

mod index;
mod node;

pub use index::{Index, Stats};

use crate::{Error, Result};

/// Default maximum slots per tree node.
pub const MAX_ENTRIES: usize = 50;

/// Default minimum fill, as percent of the maximum.
pub const MIN_FILL_PCT: usize = 40;

/// Configuration for the spatial index.
#[derive(Clone, Debug)]
pub struct Config {
    /// Maximum slots per node, splitting beyond.
    ///
    /// Default: [MAX_ENTRIES]
    pub max_entries: usize,
    /// Minimum slots per non-root node.
    ///
    /// Default: 40% of `max_entries`
    pub min_entries: usize,
}

impl Default for Config {
    fn default() -> Config {
        Config {
            max_entries: MAX_ENTRIES,
            min_entries: (MAX_ENTRIES * MIN_FILL_PCT) / 100,
        }
    }
}

impl Config {
    pub fn new() -> Config {
        Config::default()
    }

    /// Configure node fanout. `max_entries` needs head-room for a
    /// split, `min_entries` may not exceed half of it.
    pub fn set_fanout(&mut self, max_entries: usize, min_entries: usize) -> Result<&mut Self> {
        if max_entries < 4 {
            err_at!(InvalidQuery, msg: "rtree max_entries {} too small", max_entries)?;
        }
        if min_entries < 2 || min_entries > max_entries / 2 {
            err_at!(
                InvalidQuery,
                msg: "rtree min_entries {} out of range for {}", min_entries, max_entries
            )?;
        }
        self.max_entries = max_entries;
        self.min_entries = min_entries;
        Ok(self)
    }
}
