//! Module implement the key layout of the durable store.
//!
//! Keys are big-endian byte strings `tag || subkey`, so that a plain
//! lexicographic scan walks one column family at a time, nodes by id,
//! deltas and checkpoints by `(node_id, timestamp)`.

use crate::{
    dbs::{DeltaId, NodeId},
    util, Error, Result,
};

pub const NODE_TAG: u8 = 0x01;
pub const DELTA_TAG: u8 = 0x02;
pub const CHECKPOINT_TAG: u8 = 0x03;
pub const META_TAG: u8 = 0x04;

/// Key for a node record: `0x01 || node_id`.
pub fn node_key(id: &NodeId) -> Vec<u8> {
    let mut key = Vec::with_capacity(17);
    key.push(NODE_TAG);
    key.extend_from_slice(&id.to_bytes());
    key
}

pub fn decode_node_key(key: &[u8]) -> Result<NodeId> {
    match key.split_first() {
        Some((&NODE_TAG, subkey)) => NodeId::from_bytes(subkey),
        _ => err_at!(Serialization, msg: "not a node key, {} bytes", key.len()),
    }
}

/// Key for a delta record: `0x02 || node_id || timestamp || delta_id`,
/// timestamp rendered through the order preserving bit codec.
pub fn delta_key(node_id: &NodeId, timestamp: f64, delta_id: &DeltaId) -> Vec<u8> {
    let mut key = Vec::with_capacity(41);
    key.push(DELTA_TAG);
    key.extend_from_slice(&node_id.to_bytes());
    key.extend_from_slice(&util::ts_to_bits(timestamp).to_be_bytes());
    key.extend_from_slice(&delta_id.to_bytes());
    key
}

pub fn decode_delta_key(key: &[u8]) -> Result<(NodeId, f64, DeltaId)> {
    if key.len() != 41 || key[0] != DELTA_TAG {
        err_at!(Serialization, msg: "not a delta key, {} bytes", key.len())?;
    }
    let node_id = NodeId::from_bytes(&key[1..17])?;
    let bits = {
        let mut data = [0_u8; 8];
        data.copy_from_slice(&key[17..25]);
        u64::from_be_bytes(data)
    };
    let delta_id = DeltaId::from_bytes(&key[25..41])?;
    Ok((node_id, util::bits_to_ts(bits), delta_id))
}

/// Prefix covering every delta of `node_id`.
pub fn delta_prefix(node_id: &NodeId) -> Vec<u8> {
    let mut key = Vec::with_capacity(17);
    key.push(DELTA_TAG);
    key.extend_from_slice(&node_id.to_bytes());
    key
}

/// Key for a checkpoint record: `0x03 || node_id || timestamp`.
pub fn checkpoint_key(node_id: &NodeId, timestamp: f64) -> Vec<u8> {
    let mut key = Vec::with_capacity(25);
    key.push(CHECKPOINT_TAG);
    key.extend_from_slice(&node_id.to_bytes());
    key.extend_from_slice(&util::ts_to_bits(timestamp).to_be_bytes());
    key
}

pub fn decode_checkpoint_key(key: &[u8]) -> Result<(NodeId, f64)> {
    if key.len() != 25 || key[0] != CHECKPOINT_TAG {
        err_at!(Serialization, msg: "not a checkpoint key, {} bytes", key.len())?;
    }
    let node_id = NodeId::from_bytes(&key[1..17])?;
    let bits = {
        let mut data = [0_u8; 8];
        data.copy_from_slice(&key[17..25]);
        u64::from_be_bytes(data)
    };
    Ok((node_id, util::bits_to_ts(bits)))
}

/// Prefix covering every checkpoint of `node_id`.
pub fn checkpoint_prefix(node_id: &NodeId) -> Vec<u8> {
    let mut key = Vec::with_capacity(17);
    key.push(CHECKPOINT_TAG);
    key.extend_from_slice(&node_id.to_bytes());
    key
}

/// Key for a named meta entry: `0x04 || name`.
pub fn meta_key(name: &str) -> Vec<u8> {
    let mut key = Vec::with_capacity(1 + name.len());
    key.push(META_TAG);
    key.extend_from_slice(name.as_bytes());
    key
}

/// Smallest byte-string strictly greater than every string with
/// `prefix`. None when the prefix is all `0xff`.
pub fn prefix_successor(prefix: &[u8]) -> Option<Vec<u8>> {
    let mut succ = prefix.to_vec();
    loop {
        match succ.pop() {
            Some(0xff) => (),
            Some(byte) => {
                succ.push(byte + 1);
                break Some(succ);
            }
            None => break None,
        }
    }
}

#[cfg(test)]
#[path = "keys_test.rs"]
mod keys_test;
