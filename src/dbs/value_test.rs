use arbitrary::{Arbitrary, Unstructured};
use rand::{prelude::random, rngs::SmallRng, Rng, SeedableRng};

use super::*;
use crate::util;

#[test]
fn test_value_map_ops() {
    let mut val = Value::new_map();
    assert_eq!(val.set_field("b", Value::from(2_i64)).unwrap(), None);
    assert_eq!(val.set_field("a", Value::from(1_i64)).unwrap(), None);
    assert_eq!(
        val.set_field("a", Value::from(10_i64)).unwrap(),
        Some(Value::from(1_i64))
    );

    // properties stay sorted.
    let keys: Vec<&str> = val
        .as_props()
        .unwrap()
        .iter()
        .map(|p| p.key.as_str())
        .collect();
    assert_eq!(keys, vec!["a", "b"]);

    assert_eq!(val.get_field("a"), Some(&Value::from(10_i64)));
    assert_eq!(val.get_field("c"), None);
}

#[test]
fn test_value_path_ops() {
    let mut val = Value::new_map();
    val.set_field("arr", Value::from(vec![Value::from(10_i64), Value::from(20_i64)]))
        .unwrap();
    val.set_field("nested", Value::new_map()).unwrap();

    let path = vec![Token::field("nested"), Token::field("x")];
    assert_eq!(val.set(&path, Value::from(1_i64)).unwrap(), None);
    assert_eq!(val.get(&path), Some(&Value::from(1_i64)));

    let path = vec![Token::field("arr"), Token::index(1)];
    assert_eq!(
        val.set(&path, Value::from(21_i64)).unwrap(),
        Some(Value::from(20_i64))
    );
    assert_eq!(val.get(&path), Some(&Value::from(21_i64)));

    let path = vec![Token::field("arr")];
    val.array_insert(&path, 2, Value::from(30_i64)).unwrap();
    assert_eq!(val.array_remove(&path, 0).unwrap(), Value::from(10_i64));
    assert_eq!(
        val.get(&path).unwrap().as_items().unwrap(),
        &[Value::from(21_i64), Value::from(30_i64)]
    );

    // out of bounds and shape mismatches fail.
    assert!(val.array_insert(&path, 10, Value::Null).is_err());
    assert!(val.set(&[Token::index(0)], Value::Null).is_err());
    assert!(val
        .remove(&[Token::field("nested"), Token::field("missing")])
        .is_err());

    let removed = val.remove(&[Token::field("nested")]).unwrap();
    assert_eq!(removed.as_props().unwrap().len(), 1);
}

#[test]
fn test_value_normalize() {
    let val = Value::from_props(vec![
        Property::new("z", Value::from(1_i64)),
        Property::new("a", Value::from(2_i64)),
        Property::new("z", Value::from(3_i64)),
    ]);
    let keys: Vec<&str> = val
        .as_props()
        .unwrap()
        .iter()
        .map(|p| p.key.as_str())
        .collect();
    assert_eq!(keys, vec!["a", "z"]);
    // later duplicate wins.
    assert_eq!(val.get_field("z"), Some(&Value::from(3_i64)));
}

#[test]
fn test_value_cbor_roundtrip() {
    let seed: u64 = random();
    println!("test_value_cbor_roundtrip {}", seed);
    let mut rng = SmallRng::seed_from_u64(seed);

    for _ in 0..256 {
        let bytes: Vec<u8> = (0..64).map(|_| rng.gen::<u8>()).collect();
        let mut uns = Unstructured::new(&bytes);
        let val = Value::arbitrary(&mut uns).unwrap();

        let data = util::into_cbor_bytes(val.clone()).unwrap();
        let (out, n) = util::from_cbor_bytes::<Value>(&data).unwrap();
        assert_eq!(n, data.len());
        assert_eq!(out, val);
    }
}

#[test]
fn test_value_json_roundtrip() {
    let seed: u64 = random();
    println!("test_value_json_roundtrip {}", seed);
    let mut rng = SmallRng::seed_from_u64(seed);

    for _ in 0..256 {
        let bytes: Vec<u8> = (0..64).map(|_| rng.gen::<u8>()).collect();
        let mut uns = Unstructured::new(&bytes);
        let val = Value::arbitrary(&mut uns).unwrap();

        let data = serde_json::to_vec(&val).unwrap();
        let out: Value = serde_json::from_slice(&data).unwrap();
        assert_eq!(out, val);
    }
}
