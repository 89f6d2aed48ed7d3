//! Module implement [NodeStore], the typed store for node records.

use std::{collections::BTreeMap, sync::Arc};

use crate::{
    codec,
    dbs::{Node, NodeId},
    store::{keys, Dstore, Family, Wop},
    Error, Result,
};

/// Durable mapping `node_id -> node record`, a typed wrapper over the
/// node column family of [Dstore].
pub struct NodeStore {
    store: Arc<Dstore>,
}

impl NodeStore {
    pub fn new(store: Arc<Dstore>) -> NodeStore {
        NodeStore { store }
    }

    /// Persist `node`, replacing an existing record. In strict mode
    /// replacing fails with `DuplicateId`.
    pub fn put(&self, node: &Node) -> Result<()> {
        if self.store.as_config().strict && self.exists(&node.id)? {
            err_at!(DuplicateId, msg: "node {}", node.id)?;
        }
        self.store.commit(vec![self.wop_put(node)?])?;
        Ok(())
    }

    /// Fetch the node record for `id`.
    pub fn get(&self, id: &NodeId) -> Result<Option<Node>> {
        match self.store.get(Family::Node, &keys::node_key(id))? {
            Some(data) => Ok(Some(codec::decode(&data)?)),
            None => Ok(None),
        }
    }

    /// Remove the node record for `id`. Return whether a record was
    /// present; deleting a missing id is not an error.
    pub fn delete(&self, id: &NodeId) -> Result<bool> {
        let present = self.exists(id)?;
        if present {
            self.store.commit(vec![Self::wop_delete(id)])?;
        }
        Ok(present)
    }

    /// Persist a new snapshot of an existing node. Fail with
    /// `NotFound` when `node.id` is absent.
    pub fn update(&self, node: &Node) -> Result<()> {
        if !self.exists(&node.id)? {
            err_at!(NotFound, msg: "node {}", node.id)?;
        }
        self.store.commit(vec![self.wop_put(node)?])?;
        Ok(())
    }

    pub fn exists(&self, id: &NodeId) -> Result<bool> {
        self.store.exists(Family::Node, &keys::node_key(id))
    }

    /// Fetch several node records at once; absent ids are simply
    /// absent from the result map.
    pub fn batch_get(&self, ids: &[NodeId]) -> Result<BTreeMap<NodeId, Node>> {
        let mut nodes = BTreeMap::new();
        for id in ids.iter() {
            if let Some(node) = self.get(id)? {
                nodes.insert(*id, node);
            }
        }
        Ok(nodes)
    }

    /// Persist several node records as one atomic batch, all or
    /// nothing.
    pub fn batch_put(&self, nodes: &[Node]) -> Result<()> {
        let mut ops = Vec::with_capacity(nodes.len());
        for node in nodes.iter() {
            if self.store.as_config().strict && self.exists(&node.id)? {
                err_at!(DuplicateId, msg: "node {}", node.id)?;
            }
            ops.push(self.wop_put(node)?);
        }
        self.store.commit(ops)?;
        Ok(())
    }

    /// Number of node records in the store.
    pub fn count(&self) -> Result<usize> {
        self.store.count(Family::Node)
    }

    /// Snapshot of every node record, in id order.
    pub fn iter(&self) -> Result<Vec<Node>> {
        let pairs = self.store.range_prefix(Family::Node, &[keys::NODE_TAG])?;
        let mut nodes = Vec::with_capacity(pairs.len());
        for (_key, data) in pairs.into_iter() {
            nodes.push(codec::decode(&data)?);
        }
        Ok(nodes)
    }

    /// Snapshot of every node id, in id order.
    pub fn iter_ids(&self) -> Result<Vec<NodeId>> {
        let pairs = self.store.range_prefix(Family::Node, &[keys::NODE_TAG])?;
        let mut ids = Vec::with_capacity(pairs.len());
        for (key, _data) in pairs.into_iter() {
            ids.push(keys::decode_node_key(&key)?);
        }
        Ok(ids)
    }

    /// Write-op persisting `node`, for composition into larger atomic
    /// batches.
    pub fn wop_put(&self, node: &Node) -> Result<Wop> {
        let format = self.store.as_config().format;
        Ok(Wop::Set {
            key: keys::node_key(&node.id),
            value: codec::encode(format, node.clone())?,
        })
    }

    /// Write-op removing the record of `id`.
    pub fn wop_delete(id: &NodeId) -> Wop {
        Wop::Del {
            key: keys::node_key(id),
        }
    }
}

#[cfg(test)]
#[path = "nodes_test.rs"]
mod nodes_test;
