//! Chain management: append validation and chain-shape verification.

use std::sync::Arc;

use crate::{
    dbs::{DeltaRecord, NodeId},
    store::{CheckpointStore, DeltaStore, Dstore, Wop},
    Error, Result,
};

/// Guards the append rule of every delta-chain: the new record must
/// belong to the chain, link to the current head and move time
/// strictly forward.
pub struct ChainManager {
    deltas: DeltaStore,
    ckpts: CheckpointStore,
}

impl ChainManager {
    pub fn new(store: Arc<Dstore>) -> ChainManager {
        ChainManager {
            deltas: DeltaStore::new(Arc::clone(&store)),
            ckpts: CheckpointStore::new(store),
        }
    }

    /// Check `delta` against the chain's current head. Violations fail
    /// with `ChainInvariant` and leave the store untouched.
    pub fn validate_append(&self, delta: &DeltaRecord) -> Result<()> {
        if !delta.timestamp.is_finite() {
            err_at!(ChainInvariant, msg: "non-finite timestamp {}", delta.timestamp)?;
        }

        match self.deltas.head(&delta.node_id)? {
            Some(head) => {
                if delta.previous_delta_id != Some(head.delta_id) {
                    err_at!(
                        ChainInvariant,
                        msg: "delta {} does not link head {}", delta.delta_id, head.delta_id
                    )?;
                }
                if delta.timestamp <= head.timestamp {
                    err_at!(
                        ChainInvariant,
                        msg: "timestamp {} behind head {}", delta.timestamp, head.timestamp
                    )?;
                }
            }
            None => {
                if delta.previous_delta_id.is_some() {
                    err_at!(
                        ChainInvariant,
                        msg: "first delta {} carries a previous link", delta.delta_id
                    )?;
                }
            }
        }
        Ok(())
    }

    /// Validate and persist `delta` on its own.
    pub fn append(&self, delta: &DeltaRecord) -> Result<()> {
        self.validate_append(delta)?;
        self.deltas.append(delta)
    }

    /// Validate and return the write-op persisting `delta`, for
    /// composition into a larger atomic batch.
    pub fn wop_append(&self, delta: &DeltaRecord) -> Result<Wop> {
        self.validate_append(delta)?;
        self.deltas.wop_append(delta)
    }

    /// Current head of the chain of `node_id`.
    pub fn head(&self, node_id: &NodeId) -> Result<Option<DeltaRecord>> {
        self.deltas.head(node_id)
    }

    /// Chain length of `node_id`.
    pub fn len(&self, node_id: &NodeId) -> Result<usize> {
        self.deltas.count(node_id)
    }

    /// Verify the stored chain of `node_id`: strictly increasing
    /// timestamps and previous-links forming a single rooted line. A
    /// pruned prefix is legal when a checkpoint covers it. Return the
    /// chain length.
    pub fn validate_chain(&self, node_id: &NodeId) -> Result<usize> {
        let deltas = self.deltas.scan(node_id)?;

        let mut prev: Option<&DeltaRecord> = None;
        for delta in deltas.iter() {
            if delta.node_id != *node_id {
                err_at!(Fatal, msg: "stray delta {} in chain", delta.delta_id)?;
            }
            match prev {
                Some(p) => {
                    if delta.previous_delta_id != Some(p.delta_id) {
                        err_at!(
                            ChainInvariant,
                            msg: "broken link at delta {}", delta.delta_id
                        )?;
                    }
                    if delta.timestamp <= p.timestamp {
                        err_at!(
                            ChainInvariant,
                            msg: "non-increasing timestamp at delta {}", delta.delta_id
                        )?;
                    }
                }
                None => {
                    // the first stored delta is either the chain root
                    // or the survivor of a pruned prefix, in which
                    // case an older checkpoint must cover the gap.
                    if delta.previous_delta_id.is_some() {
                        let covered = self
                            .ckpts
                            .scan(node_id)?
                            .iter()
                            .any(|c| c.timestamp < delta.timestamp);
                        if !covered {
                            err_at!(
                                ChainInvariant,
                                msg: "unrooted chain at delta {}", delta.delta_id
                            )?;
                        }
                    }
                }
            }
            prev = Some(delta);
        }

        Ok(deltas.len())
    }
}

#[cfg(test)]
#[path = "chain_test.rs"]
mod chain_test;
