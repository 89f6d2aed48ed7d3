//! Module implement append-only journal files.
//!
//! A journal-set is identified by `(dir, name)`; individual files are
//! named `{name}-journal-{num}.dat` and rotate once they exceed the
//! configured size limit. Writes are collected into checksummed CBOR
//! batches; one batch is flushed, and optionally fsync'ed, per commit,
//! which makes every commit atomic under crash: loading a journal
//! stops at the first corrupt or truncated batch and ignores the rest.

use cbordata::{Cbor, Cborize, FromCbor};
use log::debug;

use std::{
    convert::TryFrom,
    ffi, fmt, fs,
    io::{self, Read, Seek},
    path, result, thread, time, vec,
};

use crate::{
    read_file,
    util::{self, files},
    Error, Result,
};

const ENTRY_VER: u32 = 0x000e0001;
const BATCH_VER: u32 = 0x000f0001;

// bounded retry for transient I/O failures while flushing a batch.
const FLUSH_RETRIES: usize = 3;
const FLUSH_BACKOFF: time::Duration = time::Duration::from_millis(10);

/// Single op-entry in a journal. The op is pre-serialized and opaque
/// to the journal layer.
#[derive(Clone, Debug, Eq, PartialEq, Default, Cborize)]
pub struct Entry {
    pub seqno: u64,
    pub op: Vec<u8>,
}

impl Entry {
    const ID: u32 = ENTRY_VER;

    #[inline]
    pub fn new(seqno: u64, op: Vec<u8>) -> Entry {
        Entry { seqno, op }
    }

    #[inline]
    pub fn to_seqno(&self) -> u64 {
        self.seqno
    }

    #[inline]
    pub fn unwrap(self) -> (u64, Vec<u8>) {
        (self.seqno, self.op)
    }

    fn digest(&self, hash: &mut Vec<u8>) {
        hash.extend_from_slice(&self.seqno.to_be_bytes());
        hash.extend_from_slice(&self.op);
    }
}

impl fmt::Display for Entry {
    fn fmt(&self, f: &mut fmt::Formatter) -> result::Result<(), fmt::Error> {
        write!(f, "entry<seqno:{}>", self.seqno)
    }
}

// Batch of entries on disk.
#[derive(Clone, Debug, Eq, PartialEq, Cborize)]
struct Batch {
    // seqno of first entry in this batch.
    first_seqno: u64,
    // seqno of last entry in this batch.
    last_seqno: u64,
    // xxh3 digest over (seqno, op) of every entry, in order.
    checksum: u64,
    // list of entries in this batch.
    entries: Vec<Entry>,
}

impl Batch {
    const ID: u32 = BATCH_VER;

    fn new(entries: Vec<Entry>) -> Batch {
        let first_seqno = entries.first().map(Entry::to_seqno).unwrap_or(0);
        let last_seqno = entries.last().map(Entry::to_seqno).unwrap_or(0);
        let checksum = Self::compute_checksum(&entries);
        Batch {
            first_seqno,
            last_seqno,
            checksum,
            entries,
        }
    }

    fn compute_checksum(entries: &[Entry]) -> u64 {
        let mut hash = vec![];
        for entry in entries.iter() {
            entry.digest(&mut hash);
        }
        util::checksum(&hash)
    }

    fn is_intact(&self) -> bool {
        let first = self.entries.first().map(Entry::to_seqno).unwrap_or(0);
        let last = self.entries.last().map(Entry::to_seqno).unwrap_or(0);
        first == self.first_seqno
            && last == self.last_seqno
            && self.checksum == Self::compute_checksum(&self.entries)
    }

    fn from_index(index: &BatchIndex, file: &mut fs::File) -> Result<Batch> {
        let data = read_file!(
            file,
            io::SeekFrom::Start(index.fpos),
            index.length,
            "reading batch"
        )?;
        let (batch, _) = util::from_cbor_bytes::<Batch>(&data)?;
        if batch.is_intact() {
            Ok(batch)
        } else {
            err_at!(Storage, msg: "corrupt batch at fpos {}", index.fpos)
        }
    }
}

// Location of a batch within a journal file.
#[derive(Clone, Debug)]
struct BatchIndex {
    fpos: u64,
    length: usize,
    first_seqno: u64,
    last_seqno: u64,
}

// Worker collecting entries for the next batch.
struct Worker {
    entries: Vec<Entry>,     // entries for the latest, un-flushed, batch
    batches: Vec<BatchIndex>, // older batches, already on disk
}

impl Worker {
    fn new() -> Worker {
        Worker {
            entries: Vec::default(),
            batches: Vec::default(),
        }
    }

    fn add_entry(&mut self, entry: Entry) {
        self.entries.push(entry);
    }

    fn flush(&mut self, file: &mut fs::File, fsync: bool) -> Result<Option<BatchIndex>> {
        if self.entries.is_empty() {
            return Ok(None);
        }

        let fpos = err_at!(Storage, file.metadata())?.len();
        let batch = Batch::new(self.entries.drain(..).collect());
        let (first_seqno, last_seqno) = (batch.first_seqno, batch.last_seqno);
        let data = util::into_cbor_bytes(batch)?;

        // transient I/O failures are retried with bounded backoff. A
        // torn attempt is truncated away first, otherwise recovery
        // would stop at the torn batch and never see the retry.
        let mut result = Ok(0);
        for attempt in 0..FLUSH_RETRIES {
            if attempt > 0 {
                err_at!(Storage, file.set_len(fpos))?;
                thread::sleep(FLUSH_BACKOFF * attempt as u32);
            }
            result = if fsync {
                files::sync_write(file, &data)
            } else {
                write_plain(file, &data)
            };
            if result.is_ok() {
                break;
            }
        }
        result?;

        let index = BatchIndex {
            fpos,
            length: data.len(),
            first_seqno,
            last_seqno,
        };
        self.batches.push(index.clone());
        Ok(Some(index))
    }

    fn to_last_seqno(&self) -> Option<u64> {
        match self.entries.len() {
            0 => self.batches.last().map(|index| index.last_seqno),
            _ => self.entries.last().map(Entry::to_seqno),
        }
    }
}

fn write_plain(file: &mut fs::File, data: &[u8]) -> Result<usize> {
    use std::io::Write;

    let n = err_at!(Storage, file.write(data))?;
    if n != data.len() {
        err_at!(Storage, msg: "partial write to journal {} {}", n, data.len())?
    }
    Ok(n)
}

pub(crate) fn make_filename(name: &str, num: usize) -> ffi::OsString {
    let file = format!("{}-journal-{:03}.dat", name, num);
    let file: &ffi::OsStr = file.as_ref();
    file.to_os_string()
}

pub(crate) fn unwrap_filename(file: &ffi::OsStr) -> Option<(String, usize)> {
    let stem = {
        let file = path::Path::new(file);
        match file.extension()?.to_str()? {
            "dat" => Some(file.file_stem()?.to_str()?.to_string()),
            _ => None,
        }?
    };
    let mut parts: Vec<&str> = stem.split("-journal-").collect();
    let num: usize = parts.pop()?.parse().ok()?;
    let name = parts.join("-journal-");
    if name.is_empty() {
        None
    } else {
        Some((name, num))
    }
}

// A journal is in one of two states: the latest journal of a set is
// `Working`, all older journals are `Archive`, batches located but
// data left on disk.
pub struct Journal {
    name: String,
    num: usize,
    location: ffi::OsString, // dir/{name}-journal-{num}.dat
    inner: InnerJournal,
}

enum InnerJournal {
    Working {
        worker: Worker,
        file: Option<fs::File>,
    },
    Archive {
        index: Vec<BatchIndex>,
    },
}

impl fmt::Display for Journal {
    fn fmt(&self, f: &mut fmt::Formatter) -> result::Result<(), fmt::Error> {
        write!(f, "journal<{:?}>", self.location)
    }
}

impl Journal {
    /// Start a new working journal under `dir`. An existing file with
    /// the same `(name, num)` is removed.
    pub(crate) fn start(dir: &ffi::OsStr, name: &str, num: usize) -> Journal {
        let location: path::PathBuf = {
            let file: ffi::OsString = make_filename(name, num);
            [dir, &file].iter().collect()
        };

        fs::remove_file(&location).ok(); // cleanup a single journal file

        Journal {
            name: name.to_string(),
            num,
            location: location.into_os_string(),
            inner: InnerJournal::Working {
                worker: Worker::new(),
                file: None,
            },
        }
    }

    /// Load `location` as an archive journal of the set identified by
    /// `name`. Return None for files that don't belong to the set or
    /// hold no intact batch. Scanning stops at the first corrupt or
    /// truncated batch; whatever was loaded until then survives.
    pub(crate) fn load(name: &str, location: &ffi::OsStr) -> Option<(Journal, u64)> {
        let os_file = path::Path::new(location);
        let (nm, num) = unwrap_filename(os_file.file_name()?)?;
        if nm != name {
            return None;
        }

        let mut file = {
            let mut opts = fs::OpenOptions::new();
            opts.read(true).open(os_file).ok()?
        };
        let len = file.metadata().ok()?.len();

        let mut index = vec![];
        let mut fpos = 0_u64;
        while fpos < len {
            let (val, n) = match Cbor::decode(&mut file) {
                Ok((val, n)) => (val, n),
                Err(_) => break, // truncated or corrupt tail
            };
            let batch = match Batch::from_cbor(val) {
                Ok(batch) if batch.is_intact() => batch,
                _ => break,
            };
            index.push(BatchIndex {
                fpos,
                length: n,
                first_seqno: batch.first_seqno,
                last_seqno: batch.last_seqno,
            });
            fpos += u64::try_from(n).ok()?;
        }

        if fpos < len {
            debug!(
                target: "helix-journal",
                "{:?} scan stopped at {} of {} bytes", location, fpos, len
            );
        }

        if index.is_empty() {
            return None;
        }

        let last_seqno = index.last().map(|x| x.last_seqno).unwrap();
        let journal = Journal {
            name: name.to_string(),
            num,
            location: location.to_os_string(),
            inner: InnerJournal::Archive { index },
        };
        Some((journal, last_seqno))
    }

    pub(crate) fn add_entry(&mut self, entry: Entry) -> Result<()> {
        match &mut self.inner {
            InnerJournal::Working { worker, .. } => {
                worker.add_entry(entry);
                Ok(())
            }
            InnerJournal::Archive { .. } => err_at!(Fatal, msg: "add to archive"),
        }
    }

    pub(crate) fn flush(&mut self, fsync: bool) -> Result<()> {
        match &mut self.inner {
            InnerJournal::Working { worker, file } => {
                if file.is_none() {
                    *file = Some(files::create_file_a(&self.location)?);
                }
                worker.flush(file.as_mut().unwrap(), fsync)?;
                Ok(())
            }
            InnerJournal::Archive { .. } => err_at!(Fatal, msg: "flush on archive"),
        }
    }

    fn into_archive(mut self) -> Journal {
        self.inner = match self.inner {
            InnerJournal::Working { worker, .. } => InnerJournal::Archive {
                index: worker.batches,
            },
            inner @ InnerJournal::Archive { .. } => inner,
        };
        self
    }

    fn purge(self) -> Result<()> {
        match &self.inner {
            InnerJournal::Working { file: None, .. } => Ok(()),
            _ => err_at!(Storage, fs::remove_file(&self.location)),
        }
    }

    fn to_last_seqno(&self) -> Option<u64> {
        match &self.inner {
            InnerJournal::Working { worker, .. } => worker.to_last_seqno(),
            InnerJournal::Archive { index } => index.last().map(|x| x.last_seqno),
        }
    }

    fn file_size(&self) -> Result<usize> {
        let n = match &self.inner {
            InnerJournal::Working { file: None, .. } => 0,
            InnerJournal::Working { file: Some(file), .. } => {
                let m = err_at!(Storage, file.metadata())?;
                err_at!(FailConvert, usize::try_from(m.len()))?
            }
            InnerJournal::Archive { .. } => 0,
        };
        Ok(n)
    }

    pub(crate) fn to_iter(&self) -> Result<IterJournal> {
        let (index, entries) = match &self.inner {
            InnerJournal::Working { worker, .. } => {
                (worker.batches.to_vec(), worker.entries.to_vec())
            }
            InnerJournal::Archive { index } => (index.to_vec(), vec![]),
        };

        let file = match index.is_empty() {
            true => None,
            false => Some(files::open_file_r(&self.location)?),
        };

        Ok(IterJournal {
            batch: vec![].into_iter(),
            index: index.into_iter(),
            entries: entries.into_iter(),
            file,
        })
    }
}

// Iterate over a journal's entries, batch at a time.
pub(crate) struct IterJournal {
    batch: vec::IntoIter<Entry>,      // iter variable
    index: vec::IntoIter<BatchIndex>, // all on-disk batches
    entries: vec::IntoIter<Entry>,    // in-memory entries, after the batches
    file: Option<fs::File>,
}

impl Iterator for IterJournal {
    type Item = Result<Entry>;

    fn next(&mut self) -> Option<Self::Item> {
        match self.batch.next() {
            Some(entry) => Some(Ok(entry)),
            None => match self.index.next() {
                Some(index) => {
                    let file = self.file.as_mut().unwrap();
                    match Batch::from_index(&index, file) {
                        Ok(batch) => {
                            self.batch = batch.entries.into_iter();
                            self.next()
                        }
                        Err(err) => Some(Err(err)),
                    }
                }
                None => self.entries.next().map(Ok),
            },
        }
    }
}

/// Journal-set, a write-ahead-log under `(dir, name)`.
///
/// Older journals are archives; entries are appended to the working
/// journal, which rotates beyond the size limit.
pub struct Wal {
    dir: ffi::OsString,
    name: String,
    journal_limit: usize,
    fsync: bool,

    journals: Vec<Journal>, // archives, oldest first
    journal: Journal,       // working journal
    seqno: u64,             // next seqno to use
}

impl Wal {
    /// Create a fresh journal-set, purging any existing set with the
    /// same name under `dir`.
    pub fn create(
        dir: &ffi::OsStr,
        name: &str,
        journal_limit: usize,
        fsync: bool,
    ) -> Result<Wal> {
        err_at!(Storage, fs::create_dir_all(dir))?;

        for (_, location) in matching_files(dir, name)? {
            err_at!(Storage, fs::remove_file(&location))?;
        }

        let journal = Journal::start(dir, name, 0);
        Ok(Wal {
            dir: dir.to_os_string(),
            name: name.to_string(),
            journal_limit,
            fsync,

            journals: vec![],
            journal,
            seqno: 1,
        })
    }

    /// Load an existing journal-set under `(dir, name)`, creating an
    /// empty one when the directory holds none. Corrupt tails are
    /// ignored.
    pub fn load(
        dir: &ffi::OsStr,
        name: &str,
        journal_limit: usize,
        fsync: bool,
    ) -> Result<Wal> {
        err_at!(Storage, fs::create_dir_all(dir))?;

        let mut journals: Vec<(Journal, u64)> = vec![];
        for (_, location) in matching_files(dir, name)? {
            if let Some((journal, last_seqno)) = Journal::load(name, &location) {
                journals.push((journal, last_seqno));
            }
        }
        journals.sort_by_key(|(journal, _)| journal.num);

        let (num, seqno) = match journals.last() {
            Some((journal, last_seqno)) => (journal.num + 1, last_seqno + 1),
            None => (0, 1),
        };

        let journal = Journal::start(dir, name, num);
        let journals: Vec<Journal> = journals.into_iter().map(|(j, _)| j).collect();

        Ok(Wal {
            dir: dir.to_os_string(),
            name: name.to_string(),
            journal_limit,
            fsync,

            journals,
            journal,
            seqno,
        })
    }

    /// Append `ops` as a single atomic batch. Return the seqno of the
    /// last entry.
    pub fn commit(&mut self, ops: Vec<Vec<u8>>) -> Result<u64> {
        if ops.is_empty() {
            return Ok(self.seqno.saturating_sub(1));
        }

        for op in ops.into_iter() {
            let entry = Entry::new(self.seqno, op);
            self.seqno += 1;
            self.journal.add_entry(entry)?;
        }
        self.journal.flush(self.fsync)?;
        self.rotate()?;

        Ok(self.seqno - 1)
    }

    fn rotate(&mut self) -> Result<()> {
        if self.journal.file_size()? < self.journal_limit {
            return Ok(());
        }

        let num = self.journal.num + 1;
        let working = std::mem::replace(
            &mut self.journal,
            Journal::start(&self.dir, &self.name, num),
        );
        debug!(target: "helix-journal", "rotating {} to journal {}", working, num);
        self.journals.push(working.into_archive());
        Ok(())
    }

    /// Last seqno issued by this journal-set, ZERO when empty.
    pub fn to_last_seqno(&self) -> u64 {
        self.journal
            .to_last_seqno()
            .or_else(|| self.journals.last().and_then(Journal::to_last_seqno))
            .unwrap_or(0)
    }

    /// Iterate over all entries, oldest journal first.
    pub fn iter(&self) -> Result<impl Iterator<Item = Result<Entry>>> {
        let mut iters = vec![];
        for journal in self.journals.iter() {
            iters.push(journal.to_iter()?);
        }
        iters.push(self.journal.to_iter()?);
        Ok(iters.into_iter().flatten())
    }

    /// Close the journal-set, leaving its files on disk.
    pub fn close(self) -> Result<u64> {
        let seqno = self.to_last_seqno();
        Ok(seqno)
    }

    /// Close the journal-set and remove its files.
    pub fn purge(self) -> Result<()> {
        for journal in self.journals.into_iter() {
            journal.purge()?;
        }
        self.journal.purge()?;
        Ok(())
    }
}

pub(crate) fn matching_files(
    dir: &ffi::OsStr,
    name: &str,
) -> Result<Vec<(usize, ffi::OsString)>> {
    let mut files = vec![];
    for item in err_at!(Storage, fs::read_dir(dir))? {
        let file_name = err_at!(Storage, item)?.file_name();
        if let Some((nm, num)) = unwrap_filename(&file_name) {
            if nm == name {
                let location: path::PathBuf = [dir, &file_name].iter().collect();
                files.push((num, location.into_os_string()));
            }
        }
    }
    files.sort();
    Ok(files)
}

#[cfg(test)]
#[path = "journal_test.rs"]
mod journal_test;
