use rand::{prelude::random, rngs::SmallRng, Rng, SeedableRng};

use super::*;

#[test]
fn test_node_key() {
    let id = NodeId::generate();
    let key = node_key(&id);
    assert_eq!(key.len(), 17);
    assert_eq!(key[0], NODE_TAG);
    assert_eq!(decode_node_key(&key).unwrap(), id);

    assert!(decode_node_key(&key[..10]).is_err());
    assert!(decode_node_key(&delta_prefix(&id)).is_err());
}

#[test]
fn test_delta_key_ordering() {
    let seed: u64 = random();
    println!("test_delta_key_ordering {}", seed);
    let mut rng = SmallRng::seed_from_u64(seed);

    let node_id = NodeId::generate();
    let mut tss: Vec<f64> = (0..100).map(|_| rng.gen::<f64>() * 1e6).collect();
    tss.sort_by(|a, b| a.total_cmp(b));

    // keys for one node sort by timestamp.
    let keys: Vec<Vec<u8>> = tss
        .iter()
        .map(|ts| delta_key(&node_id, *ts, &DeltaId::generate()))
        .collect();
    let mut sorted = keys.clone();
    sorted.sort();
    assert_eq!(keys, sorted);

    for (ts, key) in tss.iter().zip(keys.iter()) {
        let (nid, t, _) = decode_delta_key(key).unwrap();
        assert_eq!(nid, node_id);
        assert_eq!(t, *ts);
    }
}

#[test]
fn test_delta_prefix_scan() {
    let a = NodeId::from_u128(10);
    let b = NodeId::from_u128(11);

    let ka = delta_key(&a, 5.0, &DeltaId::generate());
    let kb = delta_key(&b, 1.0, &DeltaId::generate());

    let prefix = delta_prefix(&a);
    let succ = prefix_successor(&prefix).unwrap();

    assert!(ka.as_slice() >= prefix.as_slice());
    assert!(ka.as_slice() < succ.as_slice());
    assert!(kb.as_slice() >= succ.as_slice());
}

#[test]
fn test_checkpoint_key() {
    let id = NodeId::generate();
    let key = checkpoint_key(&id, 42.25);
    assert_eq!(key.len(), 25);
    let (nid, ts) = decode_checkpoint_key(&key).unwrap();
    assert_eq!(nid, id);
    assert_eq!(ts, 42.25);
}

#[test]
fn test_meta_key() {
    let key = meta_key("format_version");
    assert_eq!(key[0], META_TAG);
    assert_eq!(&key[1..], b"format_version");
}

#[test]
fn test_prefix_successor() {
    assert_eq!(prefix_successor(&[0x01, 0x02]), Some(vec![0x01, 0x03]));
    assert_eq!(prefix_successor(&[0x01, 0xff]), Some(vec![0x02]));
    assert_eq!(prefix_successor(&[0xff, 0xff]), None);
}
