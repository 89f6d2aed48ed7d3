//! Module implement [Dstore], the durable column-family store.

use cbordata::Cborize;
use fs2::FileExt;
use log::{debug, info};

use std::{
    collections::BTreeMap,
    ffi, fmt, fs, path, result,
    sync::{Mutex, RwLock},
};

use crate::{
    store::{
        journal::{matching_files, Entry, Journal, Wal},
        keys, Config, Family,
    },
    util, Error, Result,
};

const WOP_VER: u32 = 0x00100001;

/// Name of the shared tail journal-set.
const WAL_NAME: &str = "wal";
/// Name of the per-family snapshot journal-sets.
const SNAP_NAME: &str = "snap";
/// Name of the lock file under the store directory.
const LOCK_FILE: &str = "LOCK";

/// Write operation carried by journal entries. Keys embed the column
/// family tag as their first byte.
#[derive(Clone, Debug, Eq, PartialEq, Cborize)]
pub enum Wop {
    Set { key: Vec<u8>, value: Vec<u8> },
    Del { key: Vec<u8> },
    Reset { tag: u8 },
}

impl Wop {
    pub const ID: u32 = WOP_VER;

    /// Column family this op applies to.
    pub fn family(&self) -> Option<Family> {
        let tag = match self {
            Wop::Set { key, .. } => *key.first()?,
            Wop::Del { key } => *key.first()?,
            Wop::Reset { tag } => *tag,
        };
        Family::from_tag(tag)
    }
}

/// Durable store, one in-memory map per column family, rebuilt on
/// open from the per-family snapshot journals plus the shared WAL
/// tail. Every commit is one checksummed WAL batch, so writes that
/// span families are atomic under crash.
pub struct Dstore {
    config: Config,
    dir: path::PathBuf,

    maps: Vec<RwLock<BTreeMap<Vec<u8>, Vec<u8>>>>,
    wal: Mutex<WalState>,

    _lock_file: fs::File,
}

struct WalState {
    wal: Wal,
    snap_gens: [usize; 4],
    n_commits: usize,
    n_flushes: usize,
}

impl Dstore {
    /// Create a fresh store under `config.dir`, purging any existing
    /// store content.
    pub fn create(config: Config) -> Result<Dstore> {
        let dir = path::PathBuf::from(&config.dir);
        err_at!(Storage, fs::create_dir_all(&dir))?;
        let lock_file = acquire_lock(&dir)?;

        for family in Family::ALL.iter() {
            let fdir = dir.join(family.as_dir());
            fs::remove_dir_all(&fdir).ok();
        }
        let wal_dir = dir.join(WAL_NAME);
        fs::remove_dir_all(&wal_dir).ok();

        let wal = Wal::create(
            wal_dir.as_os_str(),
            WAL_NAME,
            config.journal_limit,
            config.fsync,
        )?;

        let maps = (0..Family::ALL.len())
            .map(|_| RwLock::new(BTreeMap::new()))
            .collect();

        info!(target: "helix-store", "created store under {:?}", dir);

        Ok(Dstore {
            config,
            dir,
            maps,
            wal: Mutex::new(WalState {
                wal,
                snap_gens: [0; 4],
                n_commits: 0,
                n_flushes: 0,
            }),
            _lock_file: lock_file,
        })
    }

    /// Load an existing store under `config.dir`. Snapshot journals
    /// are replayed first, then the WAL tail; corrupt tails are
    /// dropped, so the store always comes up at the last durable
    /// commit boundary.
    pub fn load(config: Config) -> Result<Dstore> {
        let dir = path::PathBuf::from(&config.dir);
        err_at!(Storage, fs::create_dir_all(&dir))?;
        let lock_file = acquire_lock(&dir)?;

        let mut maps = vec![];
        let mut snap_gens = [0; 4];
        for family in Family::ALL.iter() {
            let mut map = BTreeMap::new();
            snap_gens[family.to_index()] = load_snapshot(&dir, *family, &mut map)?;
            maps.push(RwLock::new(map));
        }

        let wal_dir = dir.join(WAL_NAME);
        let wal = Wal::load(
            wal_dir.as_os_str(),
            WAL_NAME,
            config.journal_limit,
            config.fsync,
        )?;
        let mut n = 0;
        for entry in wal.iter()? {
            let (_seqno, op) = entry?.unwrap();
            let (wop, _) = util::from_cbor_bytes::<Wop>(&op)?;
            apply_op(&mut maps, &wop)?;
            n += 1;
        }

        info!(
            target: "helix-store",
            "loaded store under {:?}, replayed {} wal ops", dir, n
        );

        Ok(Dstore {
            config,
            dir,
            maps,
            wal: Mutex::new(WalState {
                wal,
                snap_gens,
                n_commits: 0,
                n_flushes: 0,
            }),
            _lock_file: lock_file,
        })
    }

    /// Whether `dir` already holds store content.
    pub fn is_present(dir: &ffi::OsStr) -> bool {
        let dir = path::PathBuf::from(dir);
        dir.join(Family::Meta.as_dir()).is_dir() || dir.join(WAL_NAME).is_dir()
    }

    pub fn as_config(&self) -> &Config {
        &self.config
    }

    /// Apply `ops` as a single atomic batch. Readers observe either
    /// none or all of the batch.
    pub fn commit(&self, ops: Vec<Wop>) -> Result<u64> {
        let mut payloads = Vec::with_capacity(ops.len());
        for op in ops.iter() {
            payloads.push(util::into_cbor_bytes(op.clone())?);
        }

        let mut wal = err_at!(Fatal, self.wal.lock())?;
        let seqno = wal.wal.commit(payloads)?;
        wal.n_commits += 1;

        // apply to the maps while still holding the wal lock, so
        // concurrent commits apply in journal order.
        for family in Family::ALL.iter() {
            let fops: Vec<&Wop> = ops
                .iter()
                .filter(|op| op.family() == Some(*family))
                .collect();
            if fops.is_empty() {
                continue;
            }
            let mut map = err_at!(Fatal, self.maps[family.to_index()].write())?;
            for op in fops.into_iter() {
                match op {
                    Wop::Set { key, value } => {
                        map.insert(key.clone(), value.clone());
                    }
                    Wop::Del { key } => {
                        map.remove(key);
                    }
                    Wop::Reset { .. } => map.clear(),
                }
            }
        }

        Ok(seqno)
    }

    /// Get the value for `key` under `family`.
    pub fn get(&self, family: Family, key: &[u8]) -> Result<Option<Vec<u8>>> {
        let map = err_at!(Fatal, self.maps[family.to_index()].read())?;
        Ok(map.get(key).cloned())
    }

    /// Whether `key` is present under `family`.
    pub fn exists(&self, family: Family, key: &[u8]) -> Result<bool> {
        let map = err_at!(Fatal, self.maps[family.to_index()].read())?;
        Ok(map.contains_key(key))
    }

    /// Snapshot of all `(key, value)` pairs under `family` whose key
    /// starts with `prefix`, in key order.
    pub fn range_prefix(
        &self,
        family: Family,
        prefix: &[u8],
    ) -> Result<Vec<(Vec<u8>, Vec<u8>)>> {
        let map = err_at!(Fatal, self.maps[family.to_index()].read())?;
        let pairs = match keys::prefix_successor(prefix) {
            Some(hi) => map
                .range(prefix.to_vec()..hi)
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
            None => map
                .range(prefix.to_vec()..)
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
        };
        Ok(pairs)
    }

    /// Number of entries under `family`.
    pub fn count(&self, family: Family) -> Result<usize> {
        let map = err_at!(Fatal, self.maps[family.to_index()].read())?;
        Ok(map.len())
    }

    /// Atomically drop every node, delta and checkpoint record. Meta
    /// entries survive.
    pub fn clear(&self) -> Result<()> {
        let ops = vec![
            Wop::Reset {
                tag: Family::Node.to_tag(),
            },
            Wop::Reset {
                tag: Family::Delta.to_tag(),
            },
            Wop::Reset {
                tag: Family::Checkpoint.to_tag(),
            },
        ];
        self.commit(ops)?;
        Ok(())
    }

    /// Set a named meta entry.
    pub fn put_meta(&self, name: &str, value: Vec<u8>) -> Result<()> {
        let op = Wop::Set {
            key: keys::meta_key(name),
            value,
        };
        self.commit(vec![op])?;
        Ok(())
    }

    /// Get a named meta entry.
    pub fn get_meta(&self, name: &str) -> Result<Option<Vec<u8>>> {
        self.get(Family::Meta, &keys::meta_key(name))
    }

    /// Fold live entries into fresh per-family snapshot journals and
    /// truncate the WAL. A crash at any point leaves a loadable store:
    /// new snapshot generations become visible only once fully
    /// written, and WAL replay on top of them is idempotent.
    pub fn flush(&self) -> Result<()> {
        let mut wal = err_at!(Fatal, self.wal.lock())?;

        for family in Family::ALL.iter() {
            let map = err_at!(Fatal, self.maps[family.to_index()].read())?;
            let gen = wal.snap_gens[family.to_index()] + 1;
            write_snapshot(&self.dir, *family, gen, &map)?;
            wal.snap_gens[family.to_index()] = gen;
        }

        // snapshots are durable, start a fresh wal.
        let wal_dir = self.dir.join(WAL_NAME);
        let fresh = Wal::create(
            wal_dir.as_os_str(),
            WAL_NAME,
            self.config.journal_limit,
            self.config.fsync,
        )?;
        let old = std::mem::replace(&mut wal.wal, fresh);
        old.purge().ok();
        wal.n_flushes += 1;

        debug!(target: "helix-store", "flushed store under {:?}", self.dir);
        Ok(())
    }

    /// Flush and release the store. Close is idempotent at the engine
    /// boundary.
    pub fn close(self) -> Result<()> {
        self.flush()?;
        info!(target: "helix-store", "closed store under {:?}", self.dir);
        Ok(())
    }

    /// Close the store and delete its directory.
    pub fn purge(self) -> Result<()> {
        let dir = self.dir.clone();
        std::mem::drop(self);
        err_at!(Storage, fs::remove_dir_all(&dir))?;
        Ok(())
    }

    pub fn to_stats(&self) -> Result<Stats> {
        let wal = err_at!(Fatal, self.wal.lock())?;
        Ok(Stats {
            n_nodes: self.count(Family::Node)?,
            n_deltas: self.count(Family::Delta)?,
            n_checkpoints: self.count(Family::Checkpoint)?,
            n_commits: wal.n_commits,
            n_flushes: wal.n_flushes,
            wal_seqno: wal.wal.to_last_seqno(),
        })
    }
}

/// Statistic type, for [Dstore].
#[derive(Clone, Debug, Default)]
pub struct Stats {
    pub n_nodes: usize,
    pub n_deltas: usize,
    pub n_checkpoints: usize,
    pub n_commits: usize,
    pub n_flushes: usize,
    pub wal_seqno: u64,
}

impl fmt::Display for Stats {
    fn fmt(&self, f: &mut fmt::Formatter) -> result::Result<(), fmt::Error> {
        write!(
            f,
            concat!(
                "dstore = {{ n_nodes={}, n_deltas={}, n_checkpoints={}, ",
                "n_commits={}, n_flushes={}, wal_seqno={} }}"
            ),
            self.n_nodes,
            self.n_deltas,
            self.n_checkpoints,
            self.n_commits,
            self.n_flushes,
            self.wal_seqno
        )
    }
}

fn acquire_lock(dir: &path::Path) -> Result<fs::File> {
    let loc = dir.join(LOCK_FILE);
    let file = err_at!(
        Storage,
        fs::OpenOptions::new().create(true).write(true).open(&loc)
    )?;
    err_at!(
        Storage,
        file.try_lock_exclusive(),
        "store {:?} locked by another engine", dir
    )?;
    Ok(file)
}

fn apply_op(
    maps: &mut Vec<RwLock<BTreeMap<Vec<u8>, Vec<u8>>>>,
    wop: &Wop,
) -> Result<()> {
    let family = match wop.family() {
        Some(family) => family,
        None => err_at!(Serialization, msg: "op with unknown family tag")?,
    };
    let map = err_at!(Fatal, maps[family.to_index()].get_mut())?;
    match wop {
        Wop::Set { key, value } => {
            map.insert(key.clone(), value.clone());
        }
        Wop::Del { key } => {
            map.remove(key);
        }
        Wop::Reset { .. } => map.clear(),
    }
    Ok(())
}

// Write one full-state snapshot generation as a single batch. The
// leading Reset makes replay self-sufficient even when older
// generations or the old WAL survive a crash.
fn write_snapshot(
    dir: &path::Path,
    family: Family,
    gen: usize,
    map: &BTreeMap<Vec<u8>, Vec<u8>>,
) -> Result<()> {
    let fdir = dir.join(family.as_dir());
    err_at!(Storage, fs::create_dir_all(&fdir))?;

    let mut journal = Journal::start(fdir.as_os_str(), SNAP_NAME, gen);
    let mut seqno = 1;
    {
        let op = Wop::Reset {
            tag: family.to_tag(),
        };
        journal.add_entry(Entry::new(seqno, util::into_cbor_bytes(op)?))?;
    }
    for (key, value) in map.iter() {
        seqno += 1;
        let op = Wop::Set {
            key: key.clone(),
            value: value.clone(),
        };
        journal.add_entry(Entry::new(seqno, util::into_cbor_bytes(op)?))?;
    }
    journal.flush(true)?;

    // older generations are now redundant.
    for (num, location) in matching_files(fdir.as_os_str(), SNAP_NAME)? {
        if num != gen {
            fs::remove_file(&location).ok();
        }
    }
    Ok(())
}

// Replay the newest intact snapshot generation into `map`, return its
// generation number. Torn or stale generations are removed.
fn load_snapshot(
    dir: &path::Path,
    family: Family,
    map: &mut BTreeMap<Vec<u8>, Vec<u8>>,
) -> Result<usize> {
    let fdir = dir.join(family.as_dir());
    if !fdir.is_dir() {
        return Ok(0);
    }

    let mut files = matching_files(fdir.as_os_str(), SNAP_NAME)?;
    files.reverse(); // newest generation first

    let mut iter = files.into_iter();
    let (gen, journal) = loop {
        match iter.next() {
            Some((num, location)) => match Journal::load(SNAP_NAME, &location) {
                Some((journal, _)) => break (num, journal),
                None => {
                    // torn flush, drop it.
                    fs::remove_file(&location).ok();
                }
            },
            None => return Ok(0),
        }
    };

    for entry in journal.to_iter()? {
        let (_seqno, op) = entry?.unwrap();
        let (wop, _) = util::from_cbor_bytes::<Wop>(&op)?;
        match wop {
            Wop::Set { key, value } => {
                map.insert(key, value);
            }
            Wop::Del { key } => {
                map.remove(&key);
            }
            Wop::Reset { .. } => map.clear(),
        }
    }

    // generations older than the one replayed are redundant.
    for (num, location) in matching_files(fdir.as_os_str(), SNAP_NAME)? {
        if num != gen {
            fs::remove_file(&location).ok();
        }
    }

    Ok(gen)
}

#[cfg(test)]
#[path = "dstore_test.rs"]
mod dstore_test;
