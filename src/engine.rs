//! Module implement [Engine], the single entry point composing the
//! durable store, the combined index, the caches and the delta
//! subsystem.

use log::{debug, info};
use serde::Deserialize;

use std::{
    fmt, fs, path, result,
    sync::{
        atomic::{AtomicU8, Ordering::SeqCst},
        Arc, Mutex,
    },
    time::Duration,
};

use crate::{
    cache::{NodeCache, NodeCacheStats, StateCache, StateCacheStats},
    codec,
    dbs::{Checkpoint, Connection, Node, NodeId, Value, Weights},
    delta::{self, ChainManager, Optimizer, Reconstructor},
    query::{Combined, Query},
    rtree,
    store::{self, CheckpointStore, DeltaStore, Dstore, NodeStore},
    temporal, util, Error, Format, Result,
};

// engine life-cycle: Open accepts everything, Closing rejects writes
// while readers drain, Closed rejects everything but close().
const STATE_OPEN: u8 = 0;
const STATE_CLOSING: u8 = 1;
const STATE_CLOSED: u8 = 2;

/// Default bound for the node cache, in entries.
pub const CACHE_NODE_CAPACITY: usize = 1024;

/// Default bound for the reconstructed-state cache, in entries.
pub const CACHE_STATE_CAPACITY: usize = 128;

/// Configuration for [Engine]. Also deserializable from TOML, every
/// field except `storage_dir` carries a default.
#[derive(Clone, Debug, Deserialize)]
pub struct Config {
    /// Path of the durable store directory; the engine holds an
    /// exclusive file lock on it.
    pub storage_dir: String,
    /// `binary` (default) or `text`.
    #[serde(default)]
    pub serialization_format: Format,
    /// R-tree node fanout.
    #[serde(default = "default_rtree_max")]
    pub rtree_max_entries: usize,
    #[serde(default = "default_rtree_min")]
    pub rtree_min_entries: usize,
    /// Seconds per temporal bucket.
    #[serde(default = "default_resolution")]
    pub temporal_resolution: f64,
    /// LRU bound for the node cache.
    #[serde(default = "default_node_capacity")]
    pub cache_node_capacity: usize,
    /// LRU bound for the reconstructed-state cache.
    #[serde(default = "default_state_capacity")]
    pub cache_state_capacity: usize,
    /// Temporal-bias weight of the node cache, ZERO for plain LRU.
    #[serde(default)]
    pub cache_bias: f64,
    /// Center of the node cache's focus window.
    #[serde(default)]
    pub cache_focus_t: f64,
    /// Chain length that triggers compaction.
    #[serde(default = "default_max_chain_length")]
    pub max_chain_length: usize,
    /// Delta count between automatic checkpoints.
    #[serde(default = "default_checkpoint_interval")]
    pub checkpoint_interval: usize,
    /// Maximum age, in seconds, of prunable deltas.
    #[serde(default)]
    pub retention_window: Option<f64>,
    /// Distance weights `(w_t, w_r, w_θ)`.
    #[serde(default = "default_weights")]
    pub distance_weights: (f64, f64, f64),
    /// Optional default query deadline, in seconds.
    #[serde(default)]
    pub query_deadline_default: Option<f64>,
    /// Fail `add_node` over an existing id with `DuplicateId`.
    #[serde(default)]
    pub strict: bool,
    /// Fsync every commit.
    #[serde(default = "default_fsync")]
    pub fsync: bool,
}

fn default_rtree_max() -> usize {
    rtree::MAX_ENTRIES
}

fn default_rtree_min() -> usize {
    (rtree::MAX_ENTRIES * rtree::MIN_FILL_PCT) / 100
}

fn default_resolution() -> f64 {
    temporal::RESOLUTION
}

fn default_node_capacity() -> usize {
    CACHE_NODE_CAPACITY
}

fn default_state_capacity() -> usize {
    CACHE_STATE_CAPACITY
}

fn default_max_chain_length() -> usize {
    delta::MAX_CHAIN_LENGTH
}

fn default_checkpoint_interval() -> usize {
    delta::CHECKPOINT_INTERVAL
}

fn default_weights() -> (f64, f64, f64) {
    (1.0, 1.0, 1.0)
}

fn default_fsync() -> bool {
    true
}

impl Config {
    /// Create a configuration with defaults, rooted at `storage_dir`.
    pub fn new<P>(storage_dir: P) -> Config
    where
        P: AsRef<path::Path>,
    {
        Config {
            storage_dir: storage_dir.as_ref().to_string_lossy().to_string(),
            serialization_format: Format::default(),
            rtree_max_entries: default_rtree_max(),
            rtree_min_entries: default_rtree_min(),
            temporal_resolution: default_resolution(),
            cache_node_capacity: default_node_capacity(),
            cache_state_capacity: default_state_capacity(),
            cache_bias: 0.0,
            cache_focus_t: 0.0,
            max_chain_length: default_max_chain_length(),
            checkpoint_interval: default_checkpoint_interval(),
            retention_window: None,
            distance_weights: default_weights(),
            query_deadline_default: None,
            strict: false,
            fsync: true,
        }
    }

    /// Load a configuration from a TOML file.
    pub fn from_toml<P>(loc: P) -> Result<Config>
    where
        P: AsRef<path::Path>,
    {
        util::files::load_toml(loc)
    }

    pub fn set_serialization_format(&mut self, format: Format) -> &mut Self {
        self.serialization_format = format;
        self
    }

    pub fn set_rtree_fanout(&mut self, max: usize, min: usize) -> &mut Self {
        self.rtree_max_entries = max;
        self.rtree_min_entries = min;
        self
    }

    pub fn set_temporal_resolution(&mut self, resolution: f64) -> &mut Self {
        self.temporal_resolution = resolution;
        self
    }

    pub fn set_cache_capacities(&mut self, nodes: usize, states: usize) -> &mut Self {
        self.cache_node_capacity = nodes;
        self.cache_state_capacity = states;
        self
    }

    pub fn set_cache_focus(&mut self, bias: f64, focus_t: f64) -> &mut Self {
        self.cache_bias = bias;
        self.cache_focus_t = focus_t;
        self
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

    pub fn set_distance_weights(&mut self, w: (f64, f64, f64)) -> &mut Self {
        self.distance_weights = w;
        self
    }

    pub fn set_query_deadline_default(&mut self, deadline: Option<f64>) -> &mut Self {
        self.query_deadline_default = deadline;
        self
    }

    pub fn set_strict(&mut self, strict: bool) -> &mut Self {
        self.strict = strict;
        self
    }

    pub fn set_fsync(&mut self, fsync: bool) -> &mut Self {
        self.fsync = fsync;
        self
    }
}

/// Engine facade over one durable store directory.
///
/// Writes serialize behind a facade mutex; reads run in parallel
/// against immutable snapshots of the subsystems. Locks are acquired
/// in store -> indices -> caches order.
pub struct Engine {
    config: Config,

    store: Arc<Dstore>,
    nodes: NodeStore,
    deltas: DeltaStore,
    ckpts: CheckpointStore,
    chains: ChainManager,
    reconstructor: Reconstructor,
    optimizer: Optimizer,
    index: Combined,
    node_cache: NodeCache,
    state_cache: Arc<StateCache>,

    state: AtomicU8,
    wmu: Mutex<u32>,
}

impl Engine {
    /// Open the engine over `config.storage_dir`, creating the store
    /// when the directory holds none. Existing stores are verified
    /// against the configuration and both indices are rebuilt from
    /// the node column family.
    pub fn open(config: Config) -> Result<Engine> {
        let dir: &path::Path = config.storage_dir.as_ref();

        let store_config = {
            let mut val = store::Config::new(dir.as_os_str());
            val.set_format(config.serialization_format)
                .set_fsync(config.fsync)
                .set_strict(config.strict);
            val
        };

        let present = Dstore::is_present(dir.as_os_str());
        let store = if present {
            Arc::new(Dstore::load(store_config)?)
        } else {
            Arc::new(Dstore::create(store_config)?)
        };

        if present {
            verify_meta(&store, &config)?;
        } else {
            write_meta(&store, &config)?;
        }

        let state_cache = Arc::new(StateCache::new(config.cache_state_capacity));
        let node_cache = NodeCache::new(
            config.cache_node_capacity,
            config.cache_bias,
            config.cache_focus_t,
        );

        let rtree_config = {
            let mut val = rtree::Config::new();
            val.set_fanout(config.rtree_max_entries, config.rtree_min_entries)?;
            val
        };
        let index = Combined::new(
            rtree_config,
            Weights::from(config.distance_weights),
            config.temporal_resolution,
            config.query_deadline_default.map(Duration::from_secs_f64),
        )?;

        let optimize_config = {
            let mut val = delta::OptimizeConfig::new();
            val.set_max_chain_length(config.max_chain_length)
                .set_checkpoint_interval(config.checkpoint_interval)
                .set_retention_window(config.retention_window);
            val
        };

        let engine = Engine {
            nodes: NodeStore::new(Arc::clone(&store)),
            deltas: DeltaStore::new(Arc::clone(&store)),
            ckpts: CheckpointStore::new(Arc::clone(&store)),
            chains: ChainManager::new(Arc::clone(&store)),
            reconstructor: Reconstructor::new(Arc::clone(&store), Arc::clone(&state_cache)),
            optimizer: Optimizer::new(
                Arc::clone(&store),
                Arc::clone(&state_cache),
                optimize_config,
            ),
            index,
            node_cache,
            state_cache,
            store,
            config,
            state: AtomicU8::new(STATE_OPEN),
            wmu: Mutex::new(0),
        };

        // the index snapshots are rebuildable state: always derive
        // them from the node column family.
        let items: Vec<_> = engine
            .nodes
            .iter()?
            .into_iter()
            .map(|node| (node.position, node.id))
            .collect();
        let n = items.len();
        engine.index.bulk_load(items)?;

        info!(
            target: "helix",
            "opened engine under {:?} with {} nodes", engine.config.storage_dir, n
        );
        Ok(engine)
    }

    pub fn as_config(&self) -> &Config {
        &self.config
    }

    /// Add `node` to the store. Replaces an existing node of the same
    /// id, along with its whole history, unless strict mode fails the
    /// call with `DuplicateId`.
    pub fn add_node(&self, node: Node) -> Result<()> {
        self.check_write()?;
        self.add_nodes(vec![node])
    }

    /// Add several nodes as one atomic batch, all or nothing.
    pub fn add_nodes(&self, mut batch: Vec<Node>) -> Result<()> {
        self.check_write()?;
        let _w = err_at!(Fatal, self.wmu.lock())?;

        let mut wops = vec![];
        for node in batch.iter_mut() {
            node.content.normalize();
            node.validate()?;

            if self.nodes.exists(&node.id)? {
                if self.config.strict {
                    err_at!(DuplicateId, msg: "node {}", node.id)?;
                }
                // replacing: the old history goes with the old node.
                wops.extend(self.deltas.wops_delete_chain(&node.id)?);
                wops.extend(self.ckpts.wops_delete_all(&node.id)?);
            }

            wops.push(self.nodes.wop_put(node)?);
            let origin =
                Checkpoint::new(node.id, node.position.t, node.content.clone());
            wops.push(self.ckpts.wop_put(&origin)?);
        }

        self.store.commit(wops)?;
        for node in batch.iter() {
            self.index.update(node.position, node.id)?;
            self.node_cache.invalidate(&node.id);
            self.state_cache.invalidate(&node.id);
        }
        debug!(target: "helix", "added {} nodes", batch.len());
        Ok(())
    }

    /// Fetch a node. Without `at` the latest persisted snapshot comes
    /// back; with `at` the content is reconstructed as of that
    /// timestamp.
    pub fn get_node(&self, id: &NodeId, at: Option<f64>) -> Result<Node> {
        self.check_read()?;

        let node = match self.node_cache.get(id) {
            Some(node) => node,
            None => match self.nodes.get(id)? {
                Some(node) => {
                    self.node_cache.set(node.clone());
                    node
                }
                None => err_at!(NotFound, msg: "node {}", id)?,
            },
        };

        match at {
            None => Ok(node),
            Some(t) => {
                let content = self.reconstructor.state_at(id, t)?;
                let mut node = node;
                node.content = content;
                Ok(node)
            }
        }
    }

    /// Update the content of an existing node at `timestamp`
    /// (wall-clock when absent). The new snapshot, the delta and the
    /// index entries move together; identical content is a no-op.
    pub fn update_node(
        &self,
        id: &NodeId,
        mut content: Value,
        timestamp: Option<f64>,
    ) -> Result<()> {
        self.check_write()?;
        let _w = err_at!(Fatal, self.wmu.lock())?;

        let mut node = match self.nodes.get(id)? {
            Some(node) => node,
            None => err_at!(NotFound, msg: "node {}", id)?,
        };

        content.normalize();
        let timestamp = timestamp.unwrap_or_else(now_ts);
        if timestamp <= node.position.t {
            err_at!(
                ChainInvariant,
                msg: "timestamp {} behind node {} at {}", timestamp, id, node.position.t
            )?;
        }

        let head = self.chains.head(id)?;
        let prev_id = head.as_ref().map(|h| h.delta_id);
        let delta = delta::diff(&node.content, &content, *id, timestamp, prev_id)?;
        if delta.operations.is_empty() {
            return Ok(());
        }

        let old_position = node.position;
        node.content = content.clone();
        node.position.t = timestamp;

        let wops = vec![
            self.chains.wop_append(&delta)?,
            self.nodes.wop_put(&node)?,
        ];
        self.store.commit(wops)?;

        self.index.update(node.position, node.id)?;
        self.node_cache.invalidate(id);
        self.state_cache.invalidate(id);

        // inline maintenance: checkpoint and compact as configured.
        self.optimizer.maybe_checkpoint(id, &content)?;
        self.optimizer.compact(id)?;

        debug!(
            target: "helix",
            "updated node {} from t={} to t={}", id, old_position.t, timestamp
        );
        Ok(())
    }

    /// Connect node `a` to node `b`. Both ends must exist; `strength`
    /// must fall within `[0, 1]`.
    pub fn connect<K>(&self, a: &NodeId, b: &NodeId, kind: K, strength: f64) -> Result<()>
    where
        K: ToString,
    {
        self.check_write()?;
        let _w = err_at!(Fatal, self.wmu.lock())?;

        let mut node = match self.nodes.get(a)? {
            Some(node) => node,
            None => err_at!(NotFound, msg: "node {}", a)?,
        };
        if !self.nodes.exists(b)? {
            err_at!(NotFound, msg: "node {}", b)?;
        }

        node.push_connection(Connection::new(*b, kind, strength)?);
        self.store.commit(vec![self.nodes.wop_put(&node)?])?;
        self.node_cache.invalidate(a);
        Ok(())
    }

    /// Remove a node, its index entries, its delta chain and its
    /// checkpoints in one atomic batch. Return whether the node
    /// existed; deleting a missing id is not an error.
    pub fn delete_node(&self, id: &NodeId) -> Result<bool> {
        self.check_write()?;
        let _w = err_at!(Fatal, self.wmu.lock())?;

        if !self.nodes.exists(id)? {
            return Ok(false);
        }

        let mut wops = vec![NodeStore::wop_delete(id)];
        wops.extend(self.deltas.wops_delete_chain(id)?);
        wops.extend(self.ckpts.wops_delete_all(id)?);
        self.store.commit(wops)?;

        self.index.delete(id)?;
        self.node_cache.invalidate(id);
        self.state_cache.invalidate(id);

        debug!(target: "helix", "deleted node {}", id);
        Ok(true)
    }

    /// Run a combined query, returning matching ids: distance ordered
    /// for k-NN queries, id ordered otherwise.
    pub fn query(&self, q: &Query) -> Result<Vec<NodeId>> {
        self.check_read()?;
        self.index.query(q)
    }

    /// Whether `id` is present.
    pub fn exists(&self, id: &NodeId) -> Result<bool> {
        self.check_read()?;
        self.nodes.exists(id)
    }

    /// Number of live nodes.
    pub fn count(&self) -> Result<usize> {
        self.check_read()?;
        self.nodes.count()
    }

    /// Snapshot of every node, in id order.
    pub fn iter_nodes(&self) -> Result<Vec<Node>> {
        self.check_read()?;
        self.nodes.iter()
    }

    /// Compact the chain of `id`, or of every node when absent, and
    /// prune deltas past the retention window. Return the number of
    /// chains that changed.
    pub fn compact(&self, id: Option<&NodeId>) -> Result<usize> {
        self.check_write()?;
        let _w = err_at!(Fatal, self.wmu.lock())?;

        let ids = match id {
            Some(id) => vec![*id],
            None => self.nodes.iter_ids()?,
        };

        let now = now_ts();
        let mut n = 0;
        for id in ids.iter() {
            let compacted = self.optimizer.compact(id)?;
            let pruned = self.optimizer.prune(id, now)?;
            if compacted || pruned > 0 {
                n += 1;
            }
        }
        Ok(n)
    }

    /// Materialize a checkpoint of `id` at time `t`.
    pub fn checkpoint(&self, id: &NodeId, t: f64) -> Result<()> {
        self.check_write()?;
        let _w = err_at!(Fatal, self.wmu.lock())?;
        self.optimizer.checkpoint_at(id, t)
    }

    /// Move the node cache's temporal focus window.
    pub fn set_focus(&self, focus_t: f64) {
        self.node_cache.set_focus(focus_t);
    }

    /// Drop every node, chain and checkpoint, emptying indices and
    /// caches with the store.
    pub fn clear(&self) -> Result<()> {
        self.check_write()?;
        let _w = err_at!(Fatal, self.wmu.lock())?;

        self.store.clear()?;
        self.index.clear()?;
        self.node_cache.clear();
        self.state_cache.clear();
        info!(target: "helix", "cleared engine under {:?}", self.config.storage_dir);
        Ok(())
    }

    /// Verify the store-index agreement, the tree shape and every
    /// delta-chain.
    pub fn validate(&self) -> Result<Stats> {
        self.check_read()?;

        let (rtree_stats, temporal_stats) = self.index.validate()?;
        let n_nodes = self.nodes.count()?;
        if rtree_stats.n_entries != n_nodes {
            err_at!(
                Fatal,
                msg: "index holds {} of {} nodes", rtree_stats.n_entries, n_nodes
            )?;
        }
        for id in self.nodes.iter_ids()?.iter() {
            self.chains.validate_chain(id)?;
        }

        Ok(Stats {
            store: self.store.to_stats()?,
            rtree: rtree_stats,
            temporal: temporal_stats,
            node_cache: self.node_cache.to_stats(),
            state_cache: self.state_cache.to_stats(),
        })
    }

    pub fn to_stats(&self) -> Result<Stats> {
        let (rtree_stats, temporal_stats) = self.index.to_stats()?;
        Ok(Stats {
            store: self.store.to_stats()?,
            rtree: rtree_stats,
            temporal: temporal_stats,
            node_cache: self.node_cache.to_stats(),
            state_cache: self.state_cache.to_stats(),
        })
    }

    /// Flush and close the engine. Close is idempotent; every other
    /// operation on a closed engine fails with `EngineClosed`.
    pub fn close(&self) -> Result<()> {
        match self
            .state
            .compare_exchange(STATE_OPEN, STATE_CLOSING, SeqCst, SeqCst)
        {
            Ok(_) => (),
            Err(STATE_CLOSED) => return Ok(()), // idempotent
            Err(STATE_CLOSING) => return Ok(()),
            Err(state) => err_at!(Fatal, msg: "engine state {}", state)?,
        }

        // writers drained: the facade mutex is free once held.
        let _w = err_at!(Fatal, self.wmu.lock())?;
        self.store.flush()?;
        self.state.store(STATE_CLOSED, SeqCst);
        info!(target: "helix", "closed engine under {:?}", self.config.storage_dir);
        Ok(())
    }

    /// Close the engine and delete the store directory.
    pub fn purge(self) -> Result<()> {
        self.close()?;
        let dir = path::PathBuf::from(&self.config.storage_dir);
        std::mem::drop(self); // releases the directory lock
        err_at!(Storage, fs::remove_dir_all(&dir))?;
        Ok(())
    }

    fn check_write(&self) -> Result<()> {
        match self.state.load(SeqCst) {
            STATE_OPEN => Ok(()),
            _ => err_at!(EngineClosed, msg: "write on non-open engine"),
        }
    }

    fn check_read(&self) -> Result<()> {
        match self.state.load(SeqCst) {
            STATE_OPEN | STATE_CLOSING => Ok(()),
            _ => err_at!(EngineClosed, msg: "read on closed engine"),
        }
    }
}

/// Statistic type, aggregated across the engine's parts.
#[derive(Clone, Debug, Default)]
pub struct Stats {
    pub store: store::DstoreStats,
    pub rtree: rtree::Stats,
    pub temporal: temporal::Stats,
    pub node_cache: NodeCacheStats,
    pub state_cache: StateCacheStats,
}

impl fmt::Display for Stats {
    fn fmt(&self, f: &mut fmt::Formatter) -> result::Result<(), fmt::Error> {
        writeln!(f, "{}", self.store)?;
        writeln!(f, "{}", self.rtree)?;
        writeln!(f, "{}", self.temporal)?;
        writeln!(f, "{}", self.node_cache)?;
        write!(f, "{}", self.state_cache)
    }
}

fn now_ts() -> f64 {
    chrono::Utc::now().timestamp_millis() as f64 / 1000.0
}

// meta entries pin the on-disk format; reopening with a conflicting
// configuration is refused.
fn write_meta(store: &Dstore, config: &Config) -> Result<()> {
    store.put_meta(
        "format_version",
        util::into_cbor_bytes(codec::SCHEMA_VERSION as u64)?,
    )?;
    let format = match config.serialization_format {
        Format::Binary => "binary".to_string(),
        Format::Text => "text".to_string(),
    };
    store.put_meta("serialization_format", util::into_cbor_bytes(format)?)?;
    store.put_meta(
        "temporal_resolution",
        util::into_cbor_bytes(config.temporal_resolution.to_bits())?,
    )?;
    store.put_meta(
        "rtree_max_entries",
        util::into_cbor_bytes(config.rtree_max_entries as u64)?,
    )?;
    store.put_meta(
        "rtree_min_entries",
        util::into_cbor_bytes(config.rtree_min_entries as u64)?,
    )?;
    Ok(())
}

fn verify_meta(store: &Dstore, config: &Config) -> Result<()> {
    let version: u64 = get_meta(store, "format_version")?;
    if version > codec::SCHEMA_VERSION as u64 {
        err_at!(Storage, msg: "store format version {} too new", version)?;
    }

    let format: String = get_meta(store, "serialization_format")?;
    let want = match config.serialization_format {
        Format::Binary => "binary",
        Format::Text => "text",
    };
    if format != want {
        err_at!(
            Storage,
            msg: "store format {} conflicts with configured {}", format, want
        )?;
    }

    let bits: u64 = get_meta(store, "temporal_resolution")?;
    if f64::from_bits(bits) != config.temporal_resolution {
        err_at!(
            Storage,
            msg: "store resolution {} conflicts with configured {}",
            f64::from_bits(bits), config.temporal_resolution
        )?;
    }

    Ok(())
}

fn get_meta<T>(store: &Dstore, name: &str) -> Result<T>
where
    T: cbordata::FromCbor,
{
    match store.get_meta(name)? {
        Some(data) => Ok(util::from_cbor_bytes(&data)?.0),
        None => err_at!(Storage, msg: "store meta {} missing", name),
    }
}

#[cfg(test)]
#[path = "engine_test.rs"]
mod engine_test;
