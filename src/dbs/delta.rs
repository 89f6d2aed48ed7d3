//! Module define delta records, the reversible operations they carry
//! and materialized checkpoints.
//!
//! A delta describes how a node's content changed between two
//! consecutive versions. Every operation carries the pre-image needed
//! to reverse it, so a chain can be replayed in either direction.

use cbordata::Cborize;
use serde::{Deserialize, Serialize};

use crate::{
    dbs::{DeltaId, NodeId, Path, Value},
    Error, Result,
};

const DELTA_REC_VER: u32 = 0x00090001;
const DELTA_OP_VER: u32 = 0x000a0001;
const TEXT_PATCH_VER: u32 = 0x000b0001;
const PATCH_SEG_VER: u32 = 0x000c0001;
const CHECKPOINT_VER: u32 = 0x000d0001;

/// Single record in a node's delta-chain.
#[derive(Clone, Debug, PartialEq, Cborize, Serialize, Deserialize)]
pub struct DeltaRecord {
    pub delta_id: DeltaId,
    pub node_id: NodeId,
    pub timestamp: f64,
    /// Link to the previous delta, absent only for the chain root.
    pub previous_delta_id: Option<DeltaId>,
    pub operations: Vec<DeltaOp>,
    pub metadata: Value,
}

impl DeltaRecord {
    pub const ID: u32 = DELTA_REC_VER;

    pub fn new(
        delta_id: DeltaId,
        node_id: NodeId,
        timestamp: f64,
        previous_delta_id: Option<DeltaId>,
        operations: Vec<DeltaOp>,
    ) -> DeltaRecord {
        DeltaRecord {
            delta_id,
            node_id,
            timestamp,
            previous_delta_id,
            operations,
            metadata: Value::Null,
        }
    }

    /// Apply all operations, in order, to `content`.
    pub fn apply_to(&self, content: &mut Value) -> Result<()> {
        for op in self.operations.iter() {
            op.apply(content)?;
        }
        Ok(())
    }

    /// Operations that undo this delta, reversed and in reverse order.
    pub fn reversed_operations(&self) -> Vec<DeltaOp> {
        self.operations.iter().rev().map(DeltaOp::reverse).collect()
    }
}

/// Single reversible operation inside a [DeltaRecord].
#[derive(Clone, Debug, PartialEq, Cborize, Serialize, Deserialize)]
pub enum DeltaOp {
    /// Replace (or insert) the value at `path`. `old` is the replaced
    /// value, absent when the path was newly created.
    SetValue {
        path: Path,
        new: Value,
        old: Option<Value>,
    },
    /// Remove the value at `path`; `old` is the removed value.
    DeleteValue { path: Path, old: Value },
    /// Insert `value` at `index` within the array at `path`.
    ArrayInsert {
        path: Path,
        index: usize,
        value: Value,
    },
    /// Remove the element at `index` within the array at `path`;
    /// `old` is the removed element.
    ArrayDelete {
        path: Path,
        index: usize,
        old: Value,
    },
    /// Patch the text leaf at `path`.
    TextPatch { path: Path, patch: TextPatch },
}

impl DeltaOp {
    pub const ID: u32 = DELTA_OP_VER;

    /// Apply this operation to `content`.
    pub fn apply(&self, content: &mut Value) -> Result<()> {
        match self {
            DeltaOp::SetValue { path, new, .. } => {
                content.set(path, new.clone())?;
                Ok(())
            }
            DeltaOp::DeleteValue { path, .. } => {
                content.remove(path)?;
                Ok(())
            }
            DeltaOp::ArrayInsert { path, index, value } => {
                content.array_insert(path, *index, value.clone())
            }
            DeltaOp::ArrayDelete { path, index, .. } => {
                content.array_remove(path, *index)?;
                Ok(())
            }
            DeltaOp::TextPatch { path, patch } => match content.get_mut(path) {
                Some(Value::Text { value }) => {
                    *value = patch.apply(value)?;
                    Ok(())
                }
                Some(_) => err_at!(FailConvert, msg: "text patch on non-text value"),
                None => err_at!(NotFound, msg: "missing text at patch path"),
            },
        }
    }

    /// The operation that undoes this one.
    pub fn reverse(&self) -> DeltaOp {
        match self {
            DeltaOp::SetValue {
                path,
                new,
                old: Some(old),
            } => DeltaOp::SetValue {
                path: path.clone(),
                new: old.clone(),
                old: Some(new.clone()),
            },
            DeltaOp::SetValue {
                path,
                new,
                old: None,
            } => DeltaOp::DeleteValue {
                path: path.clone(),
                old: new.clone(),
            },
            DeltaOp::DeleteValue { path, old } => DeltaOp::SetValue {
                path: path.clone(),
                new: old.clone(),
                old: None,
            },
            DeltaOp::ArrayInsert { path, index, value } => DeltaOp::ArrayDelete {
                path: path.clone(),
                index: *index,
                old: value.clone(),
            },
            DeltaOp::ArrayDelete { path, index, old } => DeltaOp::ArrayInsert {
                path: path.clone(),
                index: *index,
                value: old.clone(),
            },
            DeltaOp::TextPatch { path, patch } => DeltaOp::TextPatch {
                path: path.clone(),
                patch: patch.invert(),
            },
        }
    }

    /// The path this operation addresses.
    pub fn as_path(&self) -> &Path {
        match self {
            DeltaOp::SetValue { path, .. } => path,
            DeltaOp::DeleteValue { path, .. } => path,
            DeltaOp::ArrayInsert { path, .. } => path,
            DeltaOp::ArrayDelete { path, .. } => path,
            DeltaOp::TextPatch { path, .. } => path,
        }
    }
}

/// Reversible edit script over a text leaf. Segment counts are in
/// characters, not bytes.
#[derive(Clone, Debug, PartialEq, Cborize, Serialize, Deserialize)]
pub struct TextPatch {
    pub segs: Vec<PatchSeg>,
}

/// Single segment of a [TextPatch].
#[derive(Clone, Debug, PartialEq, Cborize, Serialize, Deserialize)]
pub enum PatchSeg {
    Retain { n: usize },
    Insert { text: String },
    Delete { text: String },
}

impl PatchSeg {
    pub const ID: u32 = PATCH_SEG_VER;
}

impl TextPatch {
    pub const ID: u32 = TEXT_PATCH_VER;

    pub fn new(segs: Vec<PatchSeg>) -> TextPatch {
        TextPatch { segs }
    }

    /// Apply the patch to `old`, producing the newer text. Fails when
    /// the patch does not line up with `old`, carrying enough detail
    /// to flag a corrupt chain.
    pub fn apply(&self, old: &str) -> Result<String> {
        let chars: Vec<char> = old.chars().collect();
        let mut cursor = 0_usize;
        let mut out = String::with_capacity(old.len());

        for seg in self.segs.iter() {
            match seg {
                PatchSeg::Retain { n } => {
                    if cursor + n > chars.len() {
                        err_at!(FailConvert, msg: "patch retain past end of text")?;
                    }
                    out.extend(&chars[cursor..cursor + n]);
                    cursor += n;
                }
                PatchSeg::Delete { text } => {
                    let n = text.chars().count();
                    if cursor + n > chars.len() {
                        err_at!(FailConvert, msg: "patch delete past end of text")?;
                    }
                    let have: String = chars[cursor..cursor + n].iter().collect();
                    if &have != text {
                        err_at!(FailConvert, msg: "patch delete mismatch")?;
                    }
                    cursor += n;
                }
                PatchSeg::Insert { text } => out.push_str(text),
            }
        }

        if cursor != chars.len() {
            err_at!(FailConvert, msg: "patch does not consume full text")?;
        }
        Ok(out)
    }

    /// The patch that maps the newer text back to the older one.
    pub fn invert(&self) -> TextPatch {
        let segs = self
            .segs
            .iter()
            .map(|seg| match seg {
                PatchSeg::Retain { n } => PatchSeg::Retain { n: *n },
                PatchSeg::Insert { text } => PatchSeg::Delete { text: text.clone() },
                PatchSeg::Delete { text } => PatchSeg::Insert { text: text.clone() },
            })
            .collect();
        TextPatch { segs }
    }
}

/// Materialized node content at a specific timestamp, short-circuits
/// chain replay. Checkpoints are created by the optimizer, never by
/// users; removing one affects performance, not correctness.
#[derive(Clone, Debug, PartialEq, Cborize, Serialize, Deserialize)]
pub struct Checkpoint {
    pub node_id: NodeId,
    pub timestamp: f64,
    pub content: Value,
}

impl Checkpoint {
    pub const ID: u32 = CHECKPOINT_VER;

    pub fn new(node_id: NodeId, timestamp: f64, content: Value) -> Checkpoint {
        Checkpoint {
            node_id,
            timestamp,
            content,
        }
    }
}

#[cfg(test)]
#[path = "delta_test.rs"]
mod delta_test;
