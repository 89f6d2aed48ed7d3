use rand::{prelude::random, rngs::SmallRng, Rng, SeedableRng};

use std::{sync::Arc, thread};

use super::*;

#[test]
fn test_temporal_basic() {
    let index = Index::new(1.0).unwrap();
    assert!(Index::new(0.0).is_err());
    assert!(Index::new(-1.0).is_err());

    let a = NodeId::from_u128(1);
    let b = NodeId::from_u128(2);
    let c = NodeId::from_u128(3);

    index.insert(5.2, a).unwrap();
    index.insert(5.8, b).unwrap();
    index.insert(9.0, c).unwrap();
    assert_eq!(index.len(), 3);
    index.validate().unwrap();

    // a and b share bucket 5.
    assert_eq!(index.bucket_of(5.2), 5);
    assert_eq!(index.bucket_of(5.8), 5);
    assert_eq!(index.range(5.0, 5.0).unwrap(), vec![a, b]);
    assert_eq!(index.range(0.0, 100.0).unwrap(), vec![a, b, c]);
    assert_eq!(index.range(6.0, 8.0).unwrap(), vec![]);
    assert!(index.range(3.0, 1.0).is_err());

    assert_eq!(index.get(&a), Some(5.2));
    assert!(index.delete(&a).unwrap());
    assert!(!index.delete(&a).unwrap());
    assert_eq!(index.range(5.0, 5.0).unwrap(), vec![b]);
    index.validate().unwrap();
}

#[test]
fn test_temporal_negative_time() {
    let index = Index::new(1.0).unwrap();
    let a = NodeId::from_u128(1);

    // floor semantics for negative timestamps.
    assert_eq!(index.bucket_of(-0.5), -1);
    index.insert(-0.5, a).unwrap();
    assert_eq!(index.range(-1.0, -0.1).unwrap(), vec![a]);
    assert_eq!(index.range(0.0, 1.0).unwrap(), vec![]);
}

#[test]
fn test_temporal_update() {
    let index = Index::new(1.0).unwrap();
    let a = NodeId::from_u128(1);

    index.insert(1.0, a).unwrap();
    index.update(1.0, 7.5, a).unwrap();
    assert_eq!(index.range(1.0, 1.0).unwrap(), vec![]);
    assert_eq!(index.range(7.0, 7.0).unwrap(), vec![a]);
    assert_eq!(index.len(), 1);
    index.validate().unwrap();
}

#[test]
fn test_temporal_latest() {
    let index = Index::new(1.0).unwrap();

    let ids: Vec<NodeId> = (0..6_u128).map(NodeId::from_u128).collect();
    index.insert(1.0, ids[0]).unwrap();
    index.insert(1.1, ids[1]).unwrap();
    index.insert(5.0, ids[2]).unwrap();
    index.insert(5.5, ids[3]).unwrap();
    index.insert(3.0, ids[4]).unwrap();
    index.insert(3.5, ids[5]).unwrap();

    // descending bucket, and descending insertion order inside one.
    let got = index.latest(4).unwrap();
    assert_eq!(got, vec![ids[3], ids[2], ids[5], ids[4]]);

    // k beyond the population returns everything.
    let got = index.latest(100).unwrap();
    assert_eq!(got.len(), 6);
    assert_eq!(&got[..2], &[ids[3], ids[2]]);

    assert_eq!(index.latest(0).unwrap(), vec![]);
}

#[test]
fn test_temporal_selectivity() {
    let index = Index::new(1.0).unwrap();
    assert_eq!(index.selectivity(0.0, 10.0), 1.0);

    for i in 0..10_u128 {
        index.insert(i as f64, NodeId::from_u128(i)).unwrap();
    }
    assert!((index.selectivity(0.0, 9.0) - 1.0).abs() < 1e-12);
    assert!((index.selectivity(0.0, 4.0) - 0.5).abs() < 1e-12);
    assert_eq!(index.selectivity(20.0, 30.0), 0.0);
}

#[test]
fn test_temporal_snapshot_reads() {
    let seed: u64 = random();
    println!("test_temporal_snapshot_reads {}", seed);

    let index = Arc::new(Index::new(1.0).unwrap());

    let mut handles = vec![];
    for w in 0..2_u128 {
        let index = Arc::clone(&index);
        handles.push(thread::spawn(move || {
            for i in 0..500_u128 {
                let id = NodeId::from_u128(w * 1000 + i);
                index.insert((i % 50) as f64, id).unwrap();
            }
        }));
    }
    for r in 0..2_u64 {
        let index = Arc::clone(&index);
        handles.push(thread::spawn(move || {
            let mut rng = SmallRng::seed_from_u64(seed + r);
            for _ in 0..500 {
                let lo = (rng.gen::<u8>() % 50) as f64;
                let ids = index.range(lo, lo + 5.0).unwrap();
                // snapshot reads never see duplicates.
                let mut dedup = ids.clone();
                dedup.dedup();
                assert_eq!(ids, dedup);
            }
        }));
    }
    for handle in handles.into_iter() {
        handle.join().unwrap();
    }

    assert_eq!(index.len(), 1000);
    index.validate().unwrap();
}

#[test]
fn test_temporal_bulk_load() {
    let index = Index::new(2.0).unwrap();
    let items: Vec<(f64, NodeId)> =
        (0..100_u128).map(|i| (i as f64, NodeId::from_u128(i))).collect();
    index.bulk_load(items).unwrap();
    assert_eq!(index.len(), 100);
    index.validate().unwrap();

    index.clear().unwrap();
    assert!(index.is_empty());
}
