use rand::{prelude::random, rngs::SmallRng, Rng, SeedableRng};

use std::{env, f64::consts::PI};

use super::*;
use crate::dbs::{Coordinate, Rectangle, TAU};

fn scratch_config(name: &str) -> Config {
    let mut dir = env::temp_dir();
    dir.push(format!("helix-engine-{}", name));
    fs::remove_dir_all(&dir).ok();
    Config::new(&dir)
}

fn content_xarr(x: i64, arr: &[i64]) -> Value {
    let mut val = Value::new_map();
    val.set_field("x", Value::from(x)).unwrap();
    val.set_field(
        "arr",
        Value::from(arr.iter().map(|i| Value::from(*i)).collect::<Vec<Value>>()),
    )
    .unwrap();
    val
}

fn node_at(seed: u128, t: f64, r: f64, theta: f64) -> Node {
    let pos = Coordinate::new(t, r, theta).unwrap();
    Node::new(NodeId::from_u128(seed), Value::new_map(), pos)
}

#[test]
fn test_scenario_insert_point_query() {
    let engine = Engine::open(scratch_config("point-query")).unwrap();

    let a = node_at(1, 10.0, 1.0, 0.0);
    let id = a.id;
    engine.add_node(a).unwrap();

    let point = Coordinate::new(10.0, 1.0, 0.0).unwrap();
    let mut q = Query::new();
    q.set_spatial(Rectangle::from_point(&point));
    assert_eq!(engine.query(&q).unwrap(), vec![id]);

    assert!(engine.delete_node(&id).unwrap());
    assert_eq!(engine.query(&q).unwrap(), vec![]);

    // second delete reports "not present" without an error.
    assert!(!engine.delete_node(&id).unwrap());

    engine.purge().unwrap();
}

#[test]
fn test_scenario_range_wrap() {
    let engine = Engine::open(scratch_config("range-wrap")).unwrap();

    let b = node_at(1, 5.0, 2.0, 0.1);
    let c = node_at(2, 5.0, 2.0, TAU - 0.1);
    let far = node_at(3, 5.0, 2.0, PI);
    let (b_id, c_id) = (b.id, c.id);
    engine.add_nodes(vec![b, c, far]).unwrap();

    let mut q = Query::new();
    q.set_spatial(Rectangle::new(0.0, 10.0, 0.0, 5.0, TAU - 0.2, 0.2).unwrap());
    assert_eq!(engine.query(&q).unwrap(), vec![b_id, c_id]);

    engine.purge().unwrap();
}

#[test]
fn test_scenario_chain_replay() {
    let engine = Engine::open(scratch_config("chain-replay")).unwrap();

    let v0 = content_xarr(1, &[10, 20]);
    let v1 = content_xarr(2, &[10, 20, 30]);
    let v2 = content_xarr(2, &[10, 30]);

    let d = Node::new(
        NodeId::generate(),
        v0.clone(),
        Coordinate::new(0.0, 1.0, 0.0).unwrap(),
    );
    let id = d.id;
    engine.add_node(d).unwrap();
    engine.update_node(&id, v1.clone(), Some(1.0)).unwrap();
    engine.update_node(&id, v2.clone(), Some(2.0)).unwrap();

    assert_eq!(engine.get_node(&id, Some(1.0)).unwrap().content, v1);
    assert_eq!(engine.get_node(&id, Some(2.0)).unwrap().content, v2);
    assert_eq!(engine.get_node(&id, Some(0.5)).unwrap().content, v0);
    assert_eq!(engine.get_node(&id, None).unwrap().content, v2);

    engine.validate().unwrap();
    engine.purge().unwrap();
}

#[test]
fn test_scenario_compaction_preserves() {
    let mut config = scratch_config("compaction");
    config.set_max_chain_length(2);
    let engine = Engine::open(config).unwrap();

    let v0 = content_xarr(1, &[10, 20]);
    let v1 = content_xarr(2, &[10, 20, 30]);
    let v2 = content_xarr(2, &[10, 30]);

    let d = Node::new(
        NodeId::generate(),
        v0.clone(),
        Coordinate::new(0.0, 1.0, 0.0).unwrap(),
    );
    let id = d.id;
    engine.add_node(d).unwrap();
    engine.update_node(&id, v1.clone(), Some(1.0)).unwrap();
    engine.update_node(&id, v2.clone(), Some(2.0)).unwrap();

    engine.compact(Some(&id)).unwrap();

    assert_eq!(engine.get_node(&id, Some(0.0)).unwrap().content, v0);
    assert_eq!(engine.get_node(&id, Some(1.0)).unwrap().content, v1);
    assert_eq!(engine.get_node(&id, Some(2.0)).unwrap().content, v2);

    engine.validate().unwrap();
    engine.purge().unwrap();
}

#[test]
fn test_scenario_knn_temporal() {
    let seed: u64 = random();
    println!("test_scenario_knn_temporal {}", seed);
    let mut rng = SmallRng::seed_from_u64(seed);

    let engine = Engine::open(scratch_config("knn-temporal")).unwrap();

    let mut batch = vec![];
    for i in 0..1000_u128 {
        let t = rng.gen::<f64>() * 100.0;
        let r = rng.gen::<f64>() * 10.0;
        let theta = rng.gen::<f64>() * TAU;
        batch.push(node_at(i, t, r, theta));
    }
    engine.add_nodes(batch.clone()).unwrap();
    assert_eq!(engine.count().unwrap(), 1000);

    let probe = Coordinate::new(50.0, 5.0, PI).unwrap();
    let mut q = Query::new();
    q.set_nearest(probe, 5).set_temporal(40.0, 60.0);
    let got = engine.query(&q).unwrap();

    assert_eq!(got.len(), 5);
    for id in got.iter() {
        let node = engine.get_node(id, None).unwrap();
        assert!((40.0..=60.0).contains(&node.position.t), "{}", node.position);
    }

    // exact answer by linear scan, ascending cylindrical distance.
    let weights = Weights::default();
    let mut want: Vec<(f64, NodeId)> = batch
        .iter()
        .filter(|n| (40.0..=60.0).contains(&n.position.t))
        .map(|n| (probe.distance(&n.position, &weights), n.id))
        .collect();
    want.sort_by(|a, b| a.0.total_cmp(&b.0).then(a.1.cmp(&b.1)));
    let want: Vec<NodeId> = want.into_iter().take(5).map(|(_, id)| id).collect();
    assert_eq!(got, want);

    engine.purge().unwrap();
}

#[test]
fn test_scenario_crash_safety() {
    let seed: u64 = random();
    println!("test_scenario_crash_safety {}", seed);
    let mut rng = SmallRng::seed_from_u64(seed);

    let config = scratch_config("crash-safety");
    let dir = config.storage_dir.clone();

    {
        let engine = Engine::open(config.clone()).unwrap();
        let batch: Vec<Node> = (0..100_u128)
            .map(|i| node_at(i, (i % 10) as f64, 1.0, 0.0))
            .collect();
        engine.add_nodes(batch).unwrap();
        // no close: the batch lives in the wal tail only.
        std::mem::drop(engine);
    }

    // simulate a crash that tears the tail of the wal.
    let wal_file: path::PathBuf = [dir.as_str(), "wal", "wal-journal-000.dat"]
        .iter()
        .collect();
    let data = fs::read(&wal_file).unwrap();
    let cut = data.len() - 1 - (rng.gen::<usize>() % 64);
    fs::write(&wal_file, &data[..cut]).unwrap();

    let engine = Engine::open(config).unwrap();
    let n = engine.count().unwrap();
    // the batch is indivisible: everything or nothing survived.
    assert!(n == 0 || n == 100, "{}", n);
    // whatever survived, the rebuilt indices agree with the store.
    engine.validate().unwrap();

    engine.purge().unwrap();
}

#[test]
fn test_engine_reopen() {
    let config = scratch_config("reopen");

    let id = {
        let engine = Engine::open(config.clone()).unwrap();
        let node = node_at(7, 3.0, 1.0, 0.5);
        let id = node.id;
        engine.add_node(node).unwrap();
        engine
            .update_node(&id, content_xarr(1, &[1]), Some(4.0))
            .unwrap();
        engine.close().unwrap();
        id
    };

    let engine = Engine::open(config).unwrap();
    assert_eq!(engine.count().unwrap(), 1);
    let node = engine.get_node(&id, None).unwrap();
    assert_eq!(node.content, content_xarr(1, &[1]));
    // history survives reopen.
    assert!(engine
        .get_node(&id, Some(3.0))
        .unwrap()
        .content
        .as_props()
        .unwrap()
        .is_empty());
    engine.validate().unwrap();

    engine.purge().unwrap();
}

#[test]
fn test_engine_connect() {
    let engine = Engine::open(scratch_config("connect")).unwrap();

    let a = node_at(1, 0.0, 1.0, 0.0);
    let b = node_at(2, 1.0, 1.0, 0.0);
    let (a_id, b_id) = (a.id, b.id);
    engine.add_nodes(vec![a, b]).unwrap();

    engine.connect(&a_id, &b_id, "cites", 0.8).unwrap();
    let node = engine.get_node(&a_id, None).unwrap();
    assert_eq!(node.connections.len(), 1);
    assert_eq!(node.connections[0].target_id, b_id);

    // bad strength and missing targets are rejected.
    assert!(engine.connect(&a_id, &b_id, "cites", 1.5).is_err());
    assert!(engine
        .connect(&a_id, &NodeId::from_u128(99), "cites", 0.5)
        .is_err());

    engine.purge().unwrap();
}

#[test]
fn test_engine_strict_mode() {
    let mut config = scratch_config("strict");
    config.set_strict(true);
    let engine = Engine::open(config).unwrap();

    let node = node_at(1, 0.0, 1.0, 0.0);
    engine.add_node(node.clone()).unwrap();
    match engine.add_node(node) {
        Err(Error::DuplicateId(_, _)) => (),
        res => panic!("expected DuplicateId {:?}", res),
    }

    engine.purge().unwrap();
}

#[test]
fn test_engine_replace_node() {
    let engine = Engine::open(scratch_config("replace")).unwrap();

    let node = node_at(1, 0.0, 1.0, 0.0);
    let id = node.id;
    engine.add_node(node).unwrap();
    engine
        .update_node(&id, content_xarr(2, &[]), Some(1.0))
        .unwrap();

    // re-adding the id replaces the node and drops its history.
    let fresh = Node::new(
        id,
        content_xarr(9, &[9]),
        Coordinate::new(5.0, 2.0, 1.0).unwrap(),
    );
    engine.add_node(fresh).unwrap();

    let node = engine.get_node(&id, None).unwrap();
    assert_eq!(node.content, content_xarr(9, &[9]));
    // the old chain is gone: history before the new origin is absent.
    assert!(engine.get_node(&id, Some(1.0)).is_err());
    assert_eq!(engine.get_node(&id, Some(5.0)).unwrap().content, content_xarr(9, &[9]));

    engine.validate().unwrap();
    engine.purge().unwrap();
}

#[test]
fn test_engine_close_rejects() {
    let engine = Engine::open(scratch_config("close")).unwrap();
    engine.add_node(node_at(1, 0.0, 1.0, 0.0)).unwrap();

    engine.close().unwrap();
    engine.close().unwrap(); // idempotent

    match engine.get_node(&NodeId::from_u128(1), None) {
        Err(Error::EngineClosed(_, _)) => (),
        res => panic!("expected EngineClosed {:?}", res),
    }
    match engine.add_node(node_at(2, 0.0, 1.0, 0.0)) {
        Err(Error::EngineClosed(_, _)) => (),
        res => panic!("expected EngineClosed {:?}", res),
    }

    engine.purge().unwrap();
}

#[test]
fn test_engine_clear() {
    let engine = Engine::open(scratch_config("clear")).unwrap();

    let batch: Vec<Node> = (0..10_u128).map(|i| node_at(i, i as f64, 1.0, 0.0)).collect();
    engine.add_nodes(batch).unwrap();
    engine
        .update_node(&NodeId::from_u128(1), content_xarr(1, &[]), Some(100.0))
        .unwrap();

    engine.clear().unwrap();
    assert_eq!(engine.count().unwrap(), 0);
    assert_eq!(engine.iter_nodes().unwrap(), vec![]);
    let mut q = Query::new();
    q.set_temporal(0.0, 1000.0);
    assert_eq!(engine.query(&q).unwrap(), vec![]);
    engine.validate().unwrap();

    engine.purge().unwrap();
}

#[test]
fn test_engine_auto_maintenance() {
    let mut config = scratch_config("auto-maint");
    config.set_max_chain_length(4).set_checkpoint_interval(3);
    let engine = Engine::open(config).unwrap();

    let node = node_at(1, 0.0, 1.0, 0.0);
    let id = node.id;
    engine.add_node(node).unwrap();

    for i in 1..=20_i64 {
        engine
            .update_node(&id, content_xarr(i, &[]), Some(i as f64))
            .unwrap();
    }

    // the chain was compacted on the way, never past the limit.
    let stats = engine.to_stats().unwrap();
    assert!(stats.store.n_deltas <= 4, "{}", stats.store.n_deltas);
    // auto checkpoints accumulated besides the origin.
    assert!(stats.store.n_checkpoints > 1);

    // full history still reads back at the surviving checkpoints and
    // the head.
    assert_eq!(
        engine.get_node(&id, Some(20.0)).unwrap().content,
        content_xarr(20, &[])
    );
    engine.validate().unwrap();

    engine.purge().unwrap();
}

#[test]
fn test_engine_cache_effects() {
    let engine = Engine::open(scratch_config("cache")).unwrap();

    let node = node_at(1, 0.0, 1.0, 0.0);
    let id = node.id;
    engine.add_node(node).unwrap();

    engine.get_node(&id, None).unwrap();
    engine.get_node(&id, None).unwrap();
    let stats = engine.to_stats().unwrap();
    assert!(stats.node_cache.n_hits >= 1);

    // a write invalidates the cached entry.
    engine
        .update_node(&id, content_xarr(5, &[]), Some(1.0))
        .unwrap();
    let node = engine.get_node(&id, None).unwrap();
    assert_eq!(node.content, content_xarr(5, &[]));

    engine.purge().unwrap();
}

#[test]
fn test_config_from_toml() {
    let loc = {
        let mut loc = env::temp_dir();
        loc.push("helix-engine-config.toml");
        loc
    };
    fs::write(
        &loc,
        concat!(
            "storage_dir = '/tmp/helix-store'\n",
            "serialization_format = 'text'\n",
            "rtree_max_entries = 16\n",
            "rtree_min_entries = 6\n",
            "temporal_resolution = 2.5\n",
            "max_chain_length = 8\n",
            "distance_weights = [2.0, 1.0, 0.5]\n",
        ),
    )
    .unwrap();

    let config = Config::from_toml(&loc).unwrap();
    assert_eq!(config.storage_dir, "/tmp/helix-store");
    assert_eq!(config.serialization_format, Format::Text);
    assert_eq!(config.rtree_max_entries, 16);
    assert_eq!(config.rtree_min_entries, 6);
    assert_eq!(config.temporal_resolution, 2.5);
    assert_eq!(config.max_chain_length, 8);
    assert_eq!(config.distance_weights, (2.0, 1.0, 0.5));
    // defaults fill the rest.
    assert_eq!(config.checkpoint_interval, delta::CHECKPOINT_INTERVAL);
    assert_eq!(config.cache_node_capacity, CACHE_NODE_CAPACITY);

    fs::remove_file(&loc).ok();
}

#[test]
fn test_engine_threaded() {
    use std::{sync::Arc as StdArc, thread};

    let engine = StdArc::new(Engine::open(scratch_config("threaded")).unwrap());

    let batch: Vec<Node> = (0..100_u128)
        .map(|i| node_at(i, (i % 20) as f64, 1.0 + (i % 5) as f64, 0.0))
        .collect();
    engine.add_nodes(batch).unwrap();

    let mut handles = vec![];
    for w in 0..2_u128 {
        let engine = StdArc::clone(&engine);
        handles.push(thread::spawn(move || {
            for i in 0..50_u128 {
                let id = NodeId::from_u128((w * 50 + i) % 100);
                engine
                    .update_node(&id, content_xarr(i as i64, &[]), None)
                    .unwrap();
            }
        }));
    }
    for _ in 0..2 {
        let engine = StdArc::clone(&engine);
        handles.push(thread::spawn(move || {
            for i in 0..200_u128 {
                let id = NodeId::from_u128(i % 100);
                engine.get_node(&id, None).unwrap();
                // updates move nodes to wall-clock time, keep the
                // window wide enough to always cover them.
                let mut q = Query::new();
                q.set_temporal(0.0, 4e9);
                assert!(!engine.query(&q).unwrap().is_empty());
            }
        }));
    }
    for handle in handles.into_iter() {
        handle.join().unwrap();
    }

    engine.validate().unwrap();
    match StdArc::try_unwrap(engine) {
        Ok(engine) => engine.purge().unwrap(),
        Err(_) => unreachable!(),
    }
}
