//! Change detection: walk two content trees in parallel and produce
//! the reversible operations mapping the older tree to the newer one.

use crate::{
    dbs::{
        DeltaId, DeltaOp, DeltaRecord, NodeId, PatchSeg, Path, Property, TextPatch,
        Token, Value,
    },
    Result,
};

/// Text leaves with at least this many characters, on both sides,
/// diff into a [TextPatch]; shorter ones are replaced whole.
pub const TEXT_PATCH_THRESHOLD: usize = 32;

// beyond this many elements on either side, array diffing falls back
// to a whole-value replacement instead of an LCS edit script.
const LCS_CAP: usize = 128;

/// Produce the delta record mapping `prev` to `new` for `node_id`.
/// Identical contents yield a record with an empty operation list.
pub fn diff(
    prev: &Value,
    new: &Value,
    node_id: NodeId,
    timestamp: f64,
    previous_delta_id: Option<DeltaId>,
) -> Result<DeltaRecord> {
    let operations = diff_content(prev, new);
    Ok(DeltaRecord::new(
        DeltaId::generate(),
        node_id,
        timestamp,
        previous_delta_id,
        operations,
    ))
}

/// Operations mapping `prev` to `new`, in replay order.
pub fn diff_content(prev: &Value, new: &Value) -> Vec<DeltaOp> {
    let mut ops = vec![];
    let mut path = vec![];
    diff_value(prev, new, &mut path, &mut ops);
    ops
}

fn diff_value(prev: &Value, new: &Value, path: &mut Path, ops: &mut Vec<DeltaOp>) {
    match (prev, new) {
        (Value::Map { props: a }, Value::Map { props: b }) => {
            diff_maps(a, b, path, ops)
        }
        (Value::Array { items: a }, Value::Array { items: b }) => {
            diff_arrays(a, b, path, ops)
        }
        (Value::Text { value: a }, Value::Text { value: b }) if a != b => {
            diff_text(a, b, path, ops)
        }
        (a, b) if a == b => (),
        (a, b) => ops.push(DeltaOp::SetValue {
            path: path.clone(),
            new: b.clone(),
            old: Some(a.clone()),
        }),
    }
}

// merge-join over the sorted property lists.
fn diff_maps(a: &[Property], b: &[Property], path: &mut Path, ops: &mut Vec<DeltaOp>) {
    let (mut i, mut j) = (0, 0);
    while i < a.len() || j < b.len() {
        enum Turn {
            Del,
            Add,
            Both,
        }
        let turn = match (a.get(i), b.get(j)) {
            (Some(pa), Some(pb)) if pa.key < pb.key => Turn::Del,
            (Some(pa), Some(pb)) if pa.key > pb.key => Turn::Add,
            (Some(_), Some(_)) => Turn::Both,
            (Some(_), None) => Turn::Del,
            (None, Some(_)) => Turn::Add,
            (None, None) => unreachable!(),
        };
        match turn {
            Turn::Del => {
                path.push(Token::field(&a[i].key));
                ops.push(DeltaOp::DeleteValue {
                    path: path.clone(),
                    old: a[i].value.clone(),
                });
                path.pop();
                i += 1;
            }
            Turn::Add => {
                path.push(Token::field(&b[j].key));
                ops.push(DeltaOp::SetValue {
                    path: path.clone(),
                    new: b[j].value.clone(),
                    old: None,
                });
                path.pop();
                j += 1;
            }
            Turn::Both => {
                path.push(Token::field(&a[i].key));
                diff_value(&a[i].value, &b[j].value, path, ops);
                path.pop();
                i += 1;
                j += 1;
            }
        }
    }
}

// LCS based edit script; indexes ascend so replay is stable.
fn diff_arrays(a: &[Value], b: &[Value], path: &mut Path, ops: &mut Vec<DeltaOp>) {
    if a == b {
        return;
    }
    if a.len() > LCS_CAP || b.len() > LCS_CAP {
        ops.push(DeltaOp::SetValue {
            path: path.clone(),
            new: Value::Array { items: b.to_vec() },
            old: Some(Value::Array { items: a.to_vec() }),
        });
        return;
    }

    // lcs[i][j]: length of the LCS of a[i..] and b[j..].
    let mut lcs = vec![vec![0_usize; b.len() + 1]; a.len() + 1];
    for i in (0..a.len()).rev() {
        for j in (0..b.len()).rev() {
            lcs[i][j] = if a[i] == b[j] {
                lcs[i + 1][j + 1] + 1
            } else {
                lcs[i + 1][j].max(lcs[i][j + 1])
            };
        }
    }

    // walk the alignment, tracking the index into the array as it
    // stands mid-replay.
    let (mut i, mut j) = (0, 0);
    let mut at = 0;
    while i < a.len() || j < b.len() {
        if i < a.len() && j < b.len() && a[i] == b[j] {
            i += 1;
            j += 1;
            at += 1;
        } else if j == b.len() || (i < a.len() && lcs[i + 1][j] >= lcs[i][j + 1]) {
            ops.push(DeltaOp::ArrayDelete {
                path: path.clone(),
                index: at,
                old: a[i].clone(),
            });
            i += 1;
        } else {
            ops.push(DeltaOp::ArrayInsert {
                path: path.clone(),
                index: at,
                value: b[j].clone(),
            });
            j += 1;
            at += 1;
        }
    }
}

fn diff_text(a: &str, b: &str, path: &mut Path, ops: &mut Vec<DeltaOp>) {
    let a_chars: Vec<char> = a.chars().collect();
    let b_chars: Vec<char> = b.chars().collect();

    if a_chars.len() < TEXT_PATCH_THRESHOLD || b_chars.len() < TEXT_PATCH_THRESHOLD {
        ops.push(DeltaOp::SetValue {
            path: path.clone(),
            new: Value::from(b),
            old: Some(Value::from(a)),
        });
        return;
    }

    // trim the common prefix and suffix, replace the middle.
    let prefix = a_chars
        .iter()
        .zip(b_chars.iter())
        .take_while(|(x, y)| x == y)
        .count();
    let suffix = a_chars[prefix..]
        .iter()
        .rev()
        .zip(b_chars[prefix..].iter().rev())
        .take_while(|(x, y)| x == y)
        .count();

    let mut segs = vec![];
    if prefix > 0 {
        segs.push(PatchSeg::Retain { n: prefix });
    }
    let deleted: String = a_chars[prefix..a_chars.len() - suffix].iter().collect();
    if !deleted.is_empty() {
        segs.push(PatchSeg::Delete { text: deleted });
    }
    let inserted: String = b_chars[prefix..b_chars.len() - suffix].iter().collect();
    if !inserted.is_empty() {
        segs.push(PatchSeg::Insert { text: inserted });
    }
    if suffix > 0 {
        segs.push(PatchSeg::Retain { n: suffix });
    }

    ops.push(DeltaOp::TextPatch {
        path: path.clone(),
        patch: TextPatch::new(segs),
    });
}

#[cfg(test)]
#[path = "diff_test.rs"]
mod diff_test;
