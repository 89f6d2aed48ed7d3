//! Historical state reconstruction: checkpoint-seeded chain replay.

use std::{ops::Bound, sync::Arc};

use crate::{
    cache::StateCache,
    dbs::{NodeId, Value},
    store::{CheckpointStore, DeltaStore, Dstore},
    Error, Result,
};

/// Rebuilds the content of a node as of an arbitrary timestamp.
///
/// Replay starts from the newest checkpoint at or before the target
/// (the origin checkpoint written at node creation in the degenerate
/// case) and applies the deltas in `(checkpoint.t, t_target]` in
/// ascending order. Results are memoized in the state cache.
pub struct Reconstructor {
    deltas: DeltaStore,
    ckpts: CheckpointStore,
    cache: Arc<StateCache>,
}

impl Reconstructor {
    pub fn new(store: Arc<Dstore>, cache: Arc<StateCache>) -> Reconstructor {
        Reconstructor {
            deltas: DeltaStore::new(Arc::clone(&store)),
            ckpts: CheckpointStore::new(store),
            cache,
        }
    }

    /// Content of `node_id` as of `t_target`. Fail with `NotFound`
    /// when the target predates every checkpoint of the node.
    pub fn state_at(&self, node_id: &NodeId, t_target: f64) -> Result<Value> {
        if let Some(content) = self.cache.get(node_id, t_target) {
            return Ok(content);
        }

        let ckpt = match self.ckpts.latest_at_or_before(node_id, t_target)? {
            Some(ckpt) => ckpt,
            None => err_at!(
                NotFound,
                msg: "node {} has no state at {}", node_id, t_target
            )?,
        };

        let mut content = ckpt.content;
        let within = (Bound::Excluded(ckpt.timestamp), Bound::Included(t_target));
        for delta in self.deltas.scan_within(node_id, within)?.into_iter() {
            delta.apply_to(&mut content)?;
        }

        self.cache.set(node_id, t_target, content.clone());
        Ok(content)
    }
}

#[cfg(test)]
#[path = "reconstruct_test.rs"]
mod reconstruct_test;
