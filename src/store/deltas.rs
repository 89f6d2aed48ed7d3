//! Module implement [DeltaStore] and [CheckpointStore], the typed
//! stores for delta chains and their materialized checkpoints.
//!
//! Delta keys order by `(node_id, timestamp, delta_id)`, so that a
//! chain scan is a single prefix walk in time order and a
//! reconstruction window is a contiguous slice of it.

use std::{ops::Bound, sync::Arc};

use crate::{
    codec,
    dbs::{Checkpoint, DeltaId, DeltaRecord, NodeId},
    store::{keys, Dstore, Family, Wop},
    Result,
};

/// Durable mapping `(node_id, timestamp, delta_id) -> delta record`.
pub struct DeltaStore {
    store: Arc<Dstore>,
}

impl DeltaStore {
    pub fn new(store: Arc<Dstore>) -> DeltaStore {
        DeltaStore { store }
    }

    /// Persist `delta`. Chain rules are enforced by the delta
    /// subsystem before the record reaches the store.
    pub fn append(&self, delta: &DeltaRecord) -> Result<()> {
        self.store.commit(vec![self.wop_append(delta)?])?;
        Ok(())
    }

    /// All deltas of `node_id` in ascending timestamp order.
    pub fn scan(&self, node_id: &NodeId) -> Result<Vec<DeltaRecord>> {
        let pairs = self
            .store
            .range_prefix(Family::Delta, &keys::delta_prefix(node_id))?;
        let mut deltas = Vec::with_capacity(pairs.len());
        for (_key, data) in pairs.into_iter() {
            deltas.push(codec::decode(&data)?);
        }
        Ok(deltas)
    }

    /// Deltas of `node_id` whose timestamp falls `within` the bounds,
    /// ascending.
    pub fn scan_within(
        &self,
        node_id: &NodeId,
        within: (Bound<f64>, Bound<f64>),
    ) -> Result<Vec<DeltaRecord>> {
        let (lo, hi) = within;
        let deltas = self
            .scan(node_id)?
            .into_iter()
            .filter(|d| {
                let after = match lo {
                    Bound::Included(t) => d.timestamp >= t,
                    Bound::Excluded(t) => d.timestamp > t,
                    Bound::Unbounded => true,
                };
                let before = match hi {
                    Bound::Included(t) => d.timestamp <= t,
                    Bound::Excluded(t) => d.timestamp < t,
                    Bound::Unbounded => true,
                };
                after && before
            })
            .collect();
        Ok(deltas)
    }

    /// Latest delta of `node_id`, the chain head.
    pub fn head(&self, node_id: &NodeId) -> Result<Option<DeltaRecord>> {
        let pairs = self
            .store
            .range_prefix(Family::Delta, &keys::delta_prefix(node_id))?;
        match pairs.last() {
            Some((_key, data)) => Ok(Some(codec::decode(data)?)),
            None => Ok(None),
        }
    }

    /// Number of deltas in the chain of `node_id`.
    pub fn count(&self, node_id: &NodeId) -> Result<usize> {
        let pairs = self
            .store
            .range_prefix(Family::Delta, &keys::delta_prefix(node_id))?;
        Ok(pairs.len())
    }

    /// Write-op persisting `delta`.
    pub fn wop_append(&self, delta: &DeltaRecord) -> Result<Wop> {
        let format = self.store.as_config().format;
        Ok(Wop::Set {
            key: keys::delta_key(&delta.node_id, delta.timestamp, &delta.delta_id),
            value: codec::encode(format, delta.clone())?,
        })
    }

    /// Write-op removing one delta record.
    pub fn wop_delete(node_id: &NodeId, timestamp: f64, delta_id: &DeltaId) -> Wop {
        Wop::Del {
            key: keys::delta_key(node_id, timestamp, delta_id),
        }
    }

    /// Write-ops removing the full chain of `node_id`.
    pub fn wops_delete_chain(&self, node_id: &NodeId) -> Result<Vec<Wop>> {
        let pairs = self
            .store
            .range_prefix(Family::Delta, &keys::delta_prefix(node_id))?;
        Ok(pairs
            .into_iter()
            .map(|(key, _)| Wop::Del { key })
            .collect())
    }
}

/// Durable mapping `(node_id, timestamp) -> checkpoint`.
pub struct CheckpointStore {
    store: Arc<Dstore>,
}

impl CheckpointStore {
    pub fn new(store: Arc<Dstore>) -> CheckpointStore {
        CheckpointStore { store }
    }

    pub fn put(&self, ckpt: &Checkpoint) -> Result<()> {
        self.store.commit(vec![self.wop_put(ckpt)?])?;
        Ok(())
    }

    /// All checkpoints of `node_id` in ascending timestamp order.
    pub fn scan(&self, node_id: &NodeId) -> Result<Vec<Checkpoint>> {
        let pairs = self
            .store
            .range_prefix(Family::Checkpoint, &keys::checkpoint_prefix(node_id))?;
        let mut ckpts = Vec::with_capacity(pairs.len());
        for (_key, data) in pairs.into_iter() {
            ckpts.push(codec::decode(&data)?);
        }
        Ok(ckpts)
    }

    /// Latest checkpoint with `timestamp <= t`, if any.
    pub fn latest_at_or_before(
        &self,
        node_id: &NodeId,
        t: f64,
    ) -> Result<Option<Checkpoint>> {
        let ckpts = self.scan(node_id)?;
        Ok(ckpts.into_iter().rev().find(|c| c.timestamp <= t))
    }

    /// Newest checkpoint of `node_id`, if any.
    pub fn newest(&self, node_id: &NodeId) -> Result<Option<Checkpoint>> {
        let pairs = self
            .store
            .range_prefix(Family::Checkpoint, &keys::checkpoint_prefix(node_id))?;
        match pairs.last() {
            Some((_key, data)) => Ok(Some(codec::decode(data)?)),
            None => Ok(None),
        }
    }

    /// Write-op persisting `ckpt`.
    pub fn wop_put(&self, ckpt: &Checkpoint) -> Result<Wop> {
        let format = self.store.as_config().format;
        Ok(Wop::Set {
            key: keys::checkpoint_key(&ckpt.node_id, ckpt.timestamp),
            value: codec::encode(format, ckpt.clone())?,
        })
    }

    /// Write-op removing one checkpoint.
    pub fn wop_delete(node_id: &NodeId, timestamp: f64) -> Wop {
        Wop::Del {
            key: keys::checkpoint_key(node_id, timestamp),
        }
    }

    /// Write-ops removing every checkpoint of `node_id`.
    pub fn wops_delete_all(&self, node_id: &NodeId) -> Result<Vec<Wop>> {
        let pairs = self
            .store
            .range_prefix(Family::Checkpoint, &keys::checkpoint_prefix(node_id))?;
        Ok(pairs
            .into_iter()
            .map(|(key, _)| Wop::Del { key })
            .collect())
    }
}

#[cfg(test)]
#[path = "deltas_test.rs"]
mod deltas_test;
