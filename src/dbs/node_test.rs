use super::*;
use crate::util;

#[test]
fn test_node_new() {
    let id = NodeId::generate();
    let mut content = Value::new_map();
    content.set_field("title", Value::from("origin")).unwrap();

    let pos = Coordinate::new(10.0, 1.0, 0.5).unwrap();
    let node = Node::new(id, content.clone(), pos);

    assert_eq!(node.id, id);
    assert_eq!(node.content, content);
    assert_eq!(node.connections.len(), 0);
    assert_eq!(node.origin_reference, None);
    node.validate().unwrap();
}

#[test]
fn test_node_validate() {
    let id = NodeId::generate();
    let pos = Coordinate::new(0.0, 1.0, 0.0).unwrap();
    let mut node = Node::new(id, Value::new_map(), pos);

    node.position.r = -1.0;
    assert!(node.validate().is_err());
    node.position.r = 1.0;

    node.position.theta = TAU;
    assert!(node.validate().is_err());
    node.position.theta = 0.0;
    node.validate().unwrap();

    node.push_connection(Connection::new(NodeId::generate(), "cites", 0.7).unwrap());
    node.validate().unwrap();

    node.connections[0].strength = 1.5;
    assert!(node.validate().is_err());
}

#[test]
fn test_connection_new() {
    let target = NodeId::generate();
    assert!(Connection::new(target, "refines", 0.0).is_ok());
    assert!(Connection::new(target, "refines", 1.0).is_ok());
    assert!(Connection::new(target, "refines", -0.1).is_err());
    assert!(Connection::new(target, "refines", 1.1).is_err());
}

#[test]
fn test_node_cbor_roundtrip() {
    let id = NodeId::generate();
    let mut content = Value::new_map();
    content.set_field("x", Value::from(1_i64)).unwrap();
    content
        .set_field("arr", Value::from(vec![Value::from(10_i64), Value::Null]))
        .unwrap();

    let pos = Coordinate::new(10.0, 1.0, 0.0).unwrap();
    let mut node = Node::new(id, content, pos).set_origin_reference(id);
    node.push_connection(Connection::new(NodeId::generate(), "cites", 0.5).unwrap());

    let data = util::into_cbor_bytes(node.clone()).unwrap();
    let (out, n) = util::from_cbor_bytes::<Node>(&data).unwrap();
    assert_eq!(n, data.len());
    assert_eq!(out, node);
}
