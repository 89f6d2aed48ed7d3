use cbordata::Cborize;
use serde::{Deserialize, Serialize};

use std::convert::TryFrom;

use crate::{
    dbs::{Coordinate, Footprint, NodeId, Value, TAU},
    Error, Result,
};

const NODE_VER: u32 = 0x00070001;
const CONNECTION_VER: u32 = 0x00080001;

/// Node type, a positioned, timestamped record of user content.
///
/// Nodes are immutable; updates go through the engine, which persists
/// a fresh snapshot and appends a delta describing the change.
#[derive(Clone, Debug, PartialEq, Cborize, Serialize, Deserialize)]
pub struct Node {
    /// Globally unique identifier.
    pub id: NodeId,
    /// Opaque content, a map-variant [Value].
    pub content: Value,
    /// Position in cylindrical `(t, r, θ)` space.
    pub position: Coordinate,
    /// Ordered, typed edges to other nodes.
    pub connections: Vec<Connection>,
    /// Id of the chain root this node evolved from, if any.
    pub origin_reference: Option<NodeId>,
    /// Opaque bag maintained by the delta subsystem.
    pub delta_information: Value,
    /// Opaque application metadata.
    pub metadata: Value,
}

impl Node {
    pub const ID: u32 = NODE_VER;

    /// Create a new node value. Content is normalized so that diffing
    /// and serialization are deterministic.
    pub fn new(id: NodeId, mut content: Value, position: Coordinate) -> Node {
        content.normalize();
        Node {
            id,
            content,
            position,
            connections: Vec::new(),
            origin_reference: None,
            delta_information: Value::Null,
            metadata: Value::Null,
        }
    }

    pub fn set_origin_reference(mut self, origin: NodeId) -> Node {
        self.origin_reference = Some(origin);
        self
    }

    pub fn set_metadata(mut self, metadata: Value) -> Node {
        self.metadata = metadata;
        self
    }

    pub fn set_delta_information(mut self, info: Value) -> Node {
        self.delta_information = info;
        self
    }

    /// Append a connection to this node's ordered connection list.
    pub fn push_connection(&mut self, conn: Connection) {
        self.connections.push(conn);
    }

    /// Check the node invariants: `r >= 0`, `θ ∈ [0, 2π)` and every
    /// connection strength within `[0, 1]`.
    pub fn validate(&self) -> Result<()> {
        let Coordinate { t, r, theta } = self.position;
        if !t.is_finite() || !r.is_finite() || !theta.is_finite() {
            err_at!(InvalidQuery, msg: "node {} non-finite position", self.id)?;
        }
        if r < 0.0 {
            err_at!(InvalidQuery, msg: "node {} negative radius {}", self.id, r)?;
        }
        if !(0.0..TAU).contains(&theta) {
            err_at!(InvalidQuery, msg: "node {} theta {} out of range", self.id, theta)?;
        }
        for conn in self.connections.iter() {
            conn.validate()?;
        }
        Ok(())
    }
}

impl Footprint for Node {
    fn footprint(&self) -> Result<isize> {
        let mut size = err_at!(
            FailConvert,
            isize::try_from(std::mem::size_of::<Node>())
        )?;
        size += self.content.footprint()?;
        size += self.delta_information.footprint()?;
        size += self.metadata.footprint()?;
        for conn in self.connections.iter() {
            size += conn.footprint()?;
        }
        Ok(size)
    }
}

/// Typed, weighted edge from one node to another.
#[derive(Clone, Debug, PartialEq, Cborize, Serialize, Deserialize)]
pub struct Connection {
    pub target_id: NodeId,
    pub kind: String,
    pub strength: f64,
    pub metadata: Value,
}

impl Connection {
    pub const ID: u32 = CONNECTION_VER;

    /// Create a connection; `strength` must fall within `[0, 1]`.
    pub fn new<K>(target_id: NodeId, kind: K, strength: f64) -> Result<Connection>
    where
        K: ToString,
    {
        let val = Connection {
            target_id,
            kind: kind.to_string(),
            strength,
            metadata: Value::Null,
        };
        val.validate()?;
        Ok(val)
    }

    pub fn validate(&self) -> Result<()> {
        if !(0.0..=1.0).contains(&self.strength) {
            err_at!(
                InvalidQuery,
                msg: "connection strength {} out of [0,1]", self.strength
            )?;
        }
        Ok(())
    }
}

impl Footprint for Connection {
    fn footprint(&self) -> Result<isize> {
        let mut size = err_at!(
            FailConvert,
            isize::try_from(std::mem::size_of::<Connection>())
        )?;
        size += err_at!(FailConvert, isize::try_from(self.kind.capacity()))?;
        size += self.metadata.footprint()?;
        Ok(size)
    }
}

#[cfg(test)]
#[path = "node_test.rs"]
mod node_test;
