//! Chain optimization: compaction, checkpointing and pruning.

use log::{debug, info};

use std::{ops::Bound, sync::Arc};

use crate::{
    cache::StateCache,
    dbs::{Checkpoint, DeltaOp, DeltaRecord, NodeId, Token, Value},
    delta::Reconstructor,
    store::{CheckpointStore, DeltaStore, Dstore},
    Result,
};

/// Default chain length beyond which compaction merges the oldest
/// deltas.
pub const MAX_CHAIN_LENGTH: usize = 64;

/// Default number of deltas between automatic checkpoints.
pub const CHECKPOINT_INTERVAL: usize = 16;

/// Configuration for the chain [Optimizer].
#[derive(Clone, Debug)]
pub struct Config {
    /// Chain length that triggers compaction.
    ///
    /// Default: [MAX_CHAIN_LENGTH]
    pub max_chain_length: usize,
    /// Delta count between automatic checkpoints. ZERO disables
    /// automatic checkpointing.
    ///
    /// Default: [CHECKPOINT_INTERVAL]
    pub checkpoint_interval: usize,
    /// Maximum age, in seconds, beyond which deltas already covered
    /// by a newer checkpoint become prunable. None disables pruning.
    ///
    /// Default: None
    pub retention_window: Option<f64>,
}

impl Default for Config {
    fn default() -> Config {
        Config {
            max_chain_length: MAX_CHAIN_LENGTH,
            checkpoint_interval: CHECKPOINT_INTERVAL,
            retention_window: None,
        }
    }
}

impl Config {
    pub fn new() -> Config {
        Config::default()
    }

    pub fn set_max_chain_length(&mut self, n: usize) -> &mut Self {
        self.max_chain_length = n;
        self
    }

    pub fn set_checkpoint_interval(&mut self, n: usize) -> &mut Self {
        self.checkpoint_interval = n;
        self
    }

    pub fn set_retention_window(&mut self, window: Option<f64>) -> &mut Self {
        self.retention_window = window;
        self
    }
}

/// Maintains delta-chains: merges over-long chains into normal-form
/// prefixes, materializes checkpoints and prunes deltas past the
/// retention window.
pub struct Optimizer {
    store: Arc<Dstore>,
    deltas: DeltaStore,
    ckpts: CheckpointStore,
    cache: Arc<StateCache>,
    reconstructor: Reconstructor,
    config: Config,
}

impl Optimizer {
    pub fn new(store: Arc<Dstore>, cache: Arc<StateCache>, config: Config) -> Optimizer {
        Optimizer {
            deltas: DeltaStore::new(Arc::clone(&store)),
            ckpts: CheckpointStore::new(Arc::clone(&store)),
            reconstructor: Reconstructor::new(Arc::clone(&store), Arc::clone(&cache)),
            store,
            cache,
            config,
        }
    }

    pub fn as_config(&self) -> &Config {
        &self.config
    }

    /// Compact the chain of `node_id` when it exceeds the configured
    /// length: the oldest deltas merge into a single equivalent one,
    /// bringing the chain back to the limit. Observationally a no-op
    /// for every `t` at or after the merge point. Return whether the
    /// chain changed.
    pub fn compact(&self, node_id: &NodeId) -> Result<bool> {
        let chain = self.deltas.scan(node_id)?;
        if self.config.max_chain_length == 0
            || chain.len() <= self.config.max_chain_length
        {
            return Ok(false);
        }

        let k = chain.len() - self.config.max_chain_length + 1;
        let first = &chain[0];
        let last = &chain[k - 1];

        let operations = {
            let mut ops = vec![];
            for delta in chain[..k].iter() {
                ops.extend(delta.operations.iter().cloned());
            }
            compose(ops)
        };

        // the merged delta keeps the last merged id and timestamp, so
        // the next delta's previous-link stays valid.
        let merged = DeltaRecord {
            delta_id: last.delta_id,
            node_id: *node_id,
            timestamp: last.timestamp,
            previous_delta_id: first.previous_delta_id,
            operations,
            metadata: Value::Null,
        };

        let mut wops = vec![];
        for delta in chain[..k - 1].iter() {
            wops.push(DeltaStore::wop_delete(
                &delta.node_id,
                delta.timestamp,
                &delta.delta_id,
            ));
        }
        // checkpoints inside the merged span can no longer seed a
        // correct replay.
        for ckpt in self.ckpts.scan(node_id)?.into_iter() {
            if ckpt.timestamp >= first.timestamp && ckpt.timestamp < last.timestamp {
                wops.push(CheckpointStore::wop_delete(&ckpt.node_id, ckpt.timestamp));
            }
        }
        wops.push(self.deltas.wop_append(&merged)?);

        self.store.commit(wops)?;
        self.cache.invalidate(node_id);

        info!(
            target: "helix-delta",
            "compacted chain of {}, merged {} deltas", node_id, k
        );
        Ok(true)
    }

    /// Materialize a checkpoint of `node_id` at time `t`.
    pub fn checkpoint_at(&self, node_id: &NodeId, t: f64) -> Result<()> {
        let content = self.reconstructor.state_at(node_id, t)?;
        self.ckpts.put(&Checkpoint::new(*node_id, t, content))?;
        debug!(target: "helix-delta", "checkpoint of {} at {}", node_id, t);
        Ok(())
    }

    /// Checkpoint the chain head when enough deltas accumulated since
    /// the previous checkpoint. `head_content` is the node's current
    /// content, saving a replay. Return whether a checkpoint was
    /// written.
    pub fn maybe_checkpoint(
        &self,
        node_id: &NodeId,
        head_content: &Value,
    ) -> Result<bool> {
        if self.config.checkpoint_interval == 0 {
            return Ok(false);
        }
        let head = match self.deltas.head(node_id)? {
            Some(head) => head,
            None => return Ok(false),
        };

        let since = match self.ckpts.newest(node_id)? {
            Some(ckpt) if ckpt.timestamp >= head.timestamp => return Ok(false),
            Some(ckpt) => {
                let within = (Bound::Excluded(ckpt.timestamp), Bound::Unbounded);
                self.deltas.scan_within(node_id, within)?.len()
            }
            None => self.deltas.count(node_id)?,
        };
        if since < self.config.checkpoint_interval {
            return Ok(false);
        }

        let ckpt = Checkpoint::new(*node_id, head.timestamp, head_content.clone());
        self.ckpts.put(&ckpt)?;
        debug!(
            target: "helix-delta",
            "auto checkpoint of {} at {}", node_id, head.timestamp
        );
        Ok(true)
    }

    /// Prune deltas that are both older than the retention window and
    /// older than the newest checkpoint. `state_at` keeps succeeding
    /// for every time at or after the node's origin; pruned spans
    /// resolve to their nearest surviving checkpoint. Return the
    /// number of deltas removed.
    pub fn prune(&self, node_id: &NodeId, now: f64) -> Result<usize> {
        let window = match self.config.retention_window {
            Some(window) => window,
            None => return Ok(0),
        };
        let newest = match self.ckpts.newest(node_id)? {
            Some(ckpt) => ckpt.timestamp,
            None => return Ok(0),
        };

        let cutoff = (now - window).min(newest);
        let within = (Bound::Unbounded, Bound::Excluded(cutoff));
        let victims = self.deltas.scan_within(node_id, within)?;
        if victims.is_empty() {
            return Ok(0);
        }

        let wops: Vec<_> = victims
            .iter()
            .map(|d| DeltaStore::wop_delete(&d.node_id, d.timestamp, &d.delta_id))
            .collect();
        self.store.commit(wops)?;
        self.cache.invalidate(node_id);

        info!(
            target: "helix-delta",
            "pruned {} deltas of {} before {}", victims.len(), node_id, cutoff
        );
        Ok(victims.len())
    }
}

// composition into normal form. Pairs of operations on the same path
// merge when a rule applies; interfering paths block merging across
// them.
pub(crate) fn compose(ops: Vec<DeltaOp>) -> Vec<DeltaOp> {
    let mut out: Vec<DeltaOp> = vec![];

    'next: for op in ops.into_iter() {
        for i in (0..out.len()).rev() {
            let prev = &out[i];
            if prev.as_path() == op.as_path() {
                match (prev, &op) {
                    // later value wins, earliest pre-image survives.
                    (DeltaOp::SetValue { path, old, .. }, DeltaOp::SetValue { new, .. }) => {
                        out[i] = DeltaOp::SetValue {
                            path: path.clone(),
                            new: new.clone(),
                            old: old.clone(),
                        };
                        continue 'next;
                    }
                    (
                        DeltaOp::SetValue { path, old, .. },
                        DeltaOp::DeleteValue { .. },
                    ) => {
                        match old {
                            // create-then-delete cancels out.
                            None => {
                                out.remove(i);
                            }
                            Some(old) => {
                                out[i] = DeltaOp::DeleteValue {
                                    path: path.clone(),
                                    old: old.clone(),
                                };
                            }
                        }
                        continue 'next;
                    }
                    (
                        DeltaOp::ArrayInsert { index: a, .. },
                        DeltaOp::ArrayDelete { index: b, .. },
                    ) if a == b => {
                        out.remove(i);
                        continue 'next;
                    }
                    // all other pairs are retained in order.
                    _ => break,
                }
            }
            if interferes(prev.as_path(), op.as_path()) {
                break;
            }
        }
        out.push(op);
    }

    out
}

// one path a prefix of the other: reordering across would change the
// outcome.
fn interferes(a: &[Token], b: &[Token]) -> bool {
    let n = a.len().min(b.len());
    a[..n] == b[..n]
}

#[cfg(test)]
#[path = "optimize_test.rs"]
mod optimize_test;
