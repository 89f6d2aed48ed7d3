use super::*;
use crate::dbs::{Coordinate, Node, NodeId, Value};

fn sample_node() -> Node {
    let mut content = Value::new_map();
    content.set_field("x", Value::from(1_i64)).unwrap();
    content.set_field("label", Value::from("origin")).unwrap();
    let pos = Coordinate::new(10.0, 1.0, 0.25).unwrap();
    Node::new(NodeId::generate(), content, pos)
}

#[test]
fn test_codec_binary_roundtrip() {
    let node = sample_node();
    let data = encode(Format::Binary, node.clone()).unwrap();
    assert_eq!(data[0], 0x01);
    assert_eq!(data[1], SCHEMA_VERSION);

    let out: Node = decode(&data).unwrap();
    assert_eq!(out, node);
}

#[test]
fn test_codec_text_roundtrip() {
    let node = sample_node();
    let data = encode(Format::Text, node.clone()).unwrap();
    assert_eq!(data[0], 0x02);

    // payload is self-describing json.
    serde_json::from_slice::<serde_json::Value>(&data[2..]).unwrap();

    let out: Node = decode(&data).unwrap();
    assert_eq!(out, node);
}

#[test]
fn test_codec_cross_format() {
    // decoding keys off the frame tag, not the configured format.
    let node = sample_node();
    let bin = encode(Format::Binary, node.clone()).unwrap();
    let txt = encode(Format::Text, node.clone()).unwrap();
    assert_eq!(decode::<Node>(&bin).unwrap(), node);
    assert_eq!(decode::<Node>(&txt).unwrap(), node);
}

#[test]
fn test_codec_errors() {
    let node = sample_node();
    let data = encode(Format::Binary, node).unwrap();

    assert!(decode::<Node>(&[]).is_err());
    assert!(decode::<Node>(&data[..1]).is_err());
    assert!(decode::<Node>(&data[..8]).is_err());

    let mut bad = data.clone();
    bad[0] = 0x7f;
    assert!(decode::<Node>(&bad).is_err());

    let mut bad = data.clone();
    bad[1] = SCHEMA_VERSION + 1;
    assert!(decode::<Node>(&bad).is_err());

    let mut bad = data.clone();
    bad[1] = 0;
    assert!(decode::<Node>(&bad).is_err());

    // trailing garbage is rejected.
    let mut bad = data;
    bad.extend_from_slice(&[0xde, 0xad]);
    assert!(decode::<Node>(&bad).is_err());

    // type mismatch between record types fails instead of panicking.
    let val = encode(Format::Binary, Value::from(1_i64)).unwrap();
    assert!(decode::<Node>(&val).is_err());
}
