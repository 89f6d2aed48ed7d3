use rand::{prelude::random, rngs::SmallRng, Rng, SeedableRng};

use super::*;
use crate::util;

#[test]
fn test_node_id() {
    let seed: u64 = random();
    println!("test_node_id {}", seed);
    let mut rng = SmallRng::seed_from_u64(seed);

    let a = NodeId::generate();
    let b = NodeId::generate();
    assert_ne!(a, b);

    for _ in 0..100 {
        let val: u128 = rng.gen();
        let id = NodeId::from_u128(val);
        assert_eq!(id.to_u128(), val);
        assert_eq!(NodeId::from_bytes(&id.to_bytes()).unwrap(), id);
    }

    assert!(NodeId::from_bytes(&[0_u8; 4]).is_err());
}

#[test]
fn test_id_ordering() {
    let seed: u64 = random();
    println!("test_id_ordering {}", seed);
    let mut rng = SmallRng::seed_from_u64(seed);

    let mut vals: Vec<u128> = (0..100).map(|_| rng.gen()).collect();
    let mut ids: Vec<NodeId> = vals.iter().map(|v| NodeId::from_u128(*v)).collect();
    vals.sort_unstable();
    ids.sort();

    // numeric order, id order and byte order all agree.
    for (val, id) in vals.iter().zip(ids.iter()) {
        assert_eq!(NodeId::from_u128(*val), *id);
    }
    let bytes: Vec<[u8; 16]> = ids.iter().map(|id| id.to_bytes()).collect();
    let mut sorted = bytes.clone();
    sorted.sort();
    assert_eq!(bytes, sorted);
}

#[test]
fn test_id_cbor() {
    let id = DeltaId::from_u128(0xdead_beef_cafe_babe_0123_4567_89ab_cdef);
    let data = util::into_cbor_bytes(id).unwrap();
    let (out, n) = util::from_cbor_bytes::<DeltaId>(&data).unwrap();
    assert_eq!(n, data.len());
    assert_eq!(out, id);
}
