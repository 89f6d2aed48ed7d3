use std::{env, fs, sync::Arc};

use super::*;
use crate::{
    dbs::{Coordinate, Value},
    store::Config,
    Format,
};

fn scratch_store(name: &str, strict: bool) -> Arc<Dstore> {
    let mut dir = env::temp_dir();
    dir.push(format!("helix-{}", name));
    fs::remove_dir_all(&dir).ok();
    let mut config = Config::new(dir.as_os_str());
    config.set_strict(strict);
    Arc::new(Dstore::create(config).unwrap())
}

fn sample_node(seed: u128, t: f64) -> Node {
    let mut content = Value::new_map();
    content.set_field("seed", Value::from(seed as i64)).unwrap();
    let pos = Coordinate::new(t, 1.0, 0.0).unwrap();
    Node::new(NodeId::from_u128(seed), content, pos)
}

#[test]
fn test_node_store_crud() {
    let store = scratch_store("nodes-crud", false);
    let nodes = NodeStore::new(Arc::clone(&store));

    let node = sample_node(1, 10.0);
    nodes.put(&node).unwrap();
    assert_eq!(nodes.get(&node.id).unwrap(), Some(node.clone()));
    assert!(nodes.exists(&node.id).unwrap());
    assert_eq!(nodes.count().unwrap(), 1);

    // update an existing node.
    let mut node2 = node.clone();
    node2.content.set_field("seed", Value::from(2_i64)).unwrap();
    nodes.update(&node2).unwrap();
    assert_eq!(nodes.get(&node.id).unwrap(), Some(node2));

    // update of a missing node fails.
    let missing = sample_node(99, 0.0);
    assert!(nodes.update(&missing).is_err());

    // put(n); get(n.id) == n; delete twice is not an error.
    assert!(nodes.delete(&node.id).unwrap());
    assert!(!nodes.delete(&node.id).unwrap());
    assert_eq!(nodes.get(&node.id).unwrap(), None);
}

#[test]
fn test_node_store_strict() {
    let store = scratch_store("nodes-strict", true);
    let nodes = NodeStore::new(Arc::clone(&store));

    let node = sample_node(1, 0.0);
    nodes.put(&node).unwrap();
    match nodes.put(&node) {
        Err(Error::DuplicateId(_, _)) => (),
        res => panic!("expected DuplicateId {:?}", res),
    }
}

#[test]
fn test_node_store_batches() {
    let store = scratch_store("nodes-batches", false);
    let nodes = NodeStore::new(Arc::clone(&store));

    let batch: Vec<Node> = (0..10).map(|i| sample_node(i, i as f64)).collect();
    nodes.batch_put(&batch).unwrap();
    assert_eq!(nodes.count().unwrap(), 10);

    let ids: Vec<NodeId> = batch.iter().map(|n| n.id).collect();
    let mut want_ids = ids.clone();
    want_ids.push(NodeId::from_u128(999)); // absent id
    let got = nodes.batch_get(&want_ids).unwrap();
    assert_eq!(got.len(), 10);
    assert!(!got.contains_key(&NodeId::from_u128(999)));

    // iteration comes back in id order.
    let iter_ids: Vec<NodeId> = nodes.iter().unwrap().into_iter().map(|n| n.id).collect();
    assert_eq!(iter_ids, ids);
    assert_eq!(nodes.iter_ids().unwrap(), ids);
}

#[test]
fn test_node_store_text_format() {
    let mut dir = env::temp_dir();
    dir.push("helix-nodes-text");
    fs::remove_dir_all(&dir).ok();
    let mut config = Config::new(dir.as_os_str());
    config.set_format(Format::Text);
    let store = Arc::new(Dstore::create(config).unwrap());
    let nodes = NodeStore::new(Arc::clone(&store));

    let node = sample_node(1, 5.0);
    nodes.put(&node).unwrap();
    assert_eq!(nodes.get(&node.id).unwrap(), Some(node));
}
