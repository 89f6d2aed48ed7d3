use rand::{prelude::random, rngs::SmallRng, Rng, SeedableRng};

use std::{env, fs, path};

use super::*;
use crate::store::JOURNAL_LIMIT;

fn scratch_dir(name: &str) -> ffi::OsString {
    let mut dir = env::temp_dir();
    dir.push(format!("helix-{}", name));
    fs::remove_dir_all(&dir).ok();
    dir.into_os_string()
}

#[test]
fn test_filename() {
    let file = make_filename("wal", 7);
    assert_eq!(file.to_str().unwrap(), "wal-journal-007.dat");
    assert_eq!(unwrap_filename(&file), Some(("wal".to_string(), 7)));

    let file: &ffi::OsStr = "my-wal-journal-012.dat".as_ref();
    assert_eq!(unwrap_filename(file), Some(("my-wal".to_string(), 12)));

    let file: &ffi::OsStr = "LOCK".as_ref();
    assert_eq!(unwrap_filename(file), None);
    let file: &ffi::OsStr = "wal-journal-xyz.dat".as_ref();
    assert_eq!(unwrap_filename(file), None);
}

#[test]
fn test_wal_create_load() {
    let seed: u64 = random();
    println!("test_wal_create_load {}", seed);
    let mut rng = SmallRng::seed_from_u64(seed);

    let dir = scratch_dir("journal-create-load");

    let mut ops: Vec<Vec<u8>> = vec![];
    {
        let mut wal = Wal::create(&dir, "wal", 1024, true).unwrap();
        for _ in 0..100 {
            let op: Vec<u8> = (0..(rng.gen::<usize>() % 64)).map(|_| rng.gen()).collect();
            ops.push(op.clone());
            wal.commit(vec![op]).unwrap();
        }
        assert_eq!(wal.to_last_seqno(), 100);
        // small limit forces several rotations.
        assert!(wal.journals.len() > 1, "{}", wal.journals.len());
        wal.close().unwrap();
    }

    {
        let wal = Wal::load(&dir, "wal", 1024, true).unwrap();
        assert_eq!(wal.to_last_seqno(), 100);
        let entries: Vec<Entry> = wal.iter().unwrap().map(|e| e.unwrap()).collect();
        assert_eq!(entries.len(), 100);
        for (i, entry) in entries.iter().enumerate() {
            assert_eq!(entry.to_seqno(), (i + 1) as u64);
            assert_eq!(entry.op, ops[i]);
        }
        wal.purge().unwrap();
    }

    let wal = Wal::load(&dir, "wal", 1024, true).unwrap();
    assert_eq!(wal.to_last_seqno(), 0);

    fs::remove_dir_all(&dir).ok();
}

#[test]
fn test_wal_batch_commit() {
    let dir = scratch_dir("journal-batch");

    let mut wal = Wal::create(&dir, "wal", JOURNAL_LIMIT, true).unwrap();
    let ops: Vec<Vec<u8>> = (0..10).map(|i| vec![i as u8; 8]).collect();
    let seqno = wal.commit(ops.clone()).unwrap();
    assert_eq!(seqno, 10);

    // empty commit is a no-op.
    assert_eq!(wal.commit(vec![]).unwrap(), 10);

    let entries: Vec<Entry> = wal.iter().unwrap().map(|e| e.unwrap()).collect();
    assert_eq!(entries.len(), 10);
    for (i, entry) in entries.iter().enumerate() {
        assert_eq!(entry.op, ops[i]);
    }

    wal.purge().unwrap();
    fs::remove_dir_all(&dir).ok();
}

#[test]
fn test_wal_crash_tail() {
    let seed: u64 = random();
    println!("test_wal_crash_tail {}", seed);
    let mut rng = SmallRng::seed_from_u64(seed);

    let dir = scratch_dir("journal-crash");

    {
        let mut wal = Wal::create(&dir, "wal", JOURNAL_LIMIT, true).unwrap();
        for i in 0..10_u8 {
            wal.commit(vec![vec![i; 16]]).unwrap();
        }
        wal.close().unwrap();
    }

    let location: path::PathBuf = {
        let file = make_filename("wal", 0);
        [dir.as_os_str(), file.as_os_str()].iter().collect()
    };

    // simulate a crash mid-write: truncate the file mid-batch.
    let len = fs::metadata(&location).unwrap().len();
    let cut = len - (rng.gen::<u64>() % 20) - 1;
    let data = fs::read(&location).unwrap();
    fs::write(&location, &data[..cut as usize]).unwrap();

    let wal = Wal::load(&dir, "wal", JOURNAL_LIMIT, true).unwrap();
    let entries: Vec<Entry> = wal.iter().unwrap().map(|e| e.unwrap()).collect();
    // all surviving batches are intact, the torn tail is dropped.
    assert!(entries.len() < 10);
    for (i, entry) in entries.iter().enumerate() {
        assert_eq!(entry.op, vec![i as u8; 16]);
    }

    // a bit-flip inside a batch is caught by the checksum.
    let mut data = fs::read(&location).unwrap();
    if !data.is_empty() {
        let at = data.len() / 2;
        data[at] ^= 0xff;
        fs::write(&location, &data).unwrap();

        let wal = Wal::load(&dir, "wal", JOURNAL_LIMIT, true).unwrap();
        let survivors: Vec<Entry> = wal.iter().unwrap().map(|e| e.unwrap()).collect();
        assert!(survivors.len() <= entries.len());
    }

    fs::remove_dir_all(&dir).ok();
}
