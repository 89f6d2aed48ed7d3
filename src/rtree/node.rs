//! Tree nodes and the quadratic split machinery of the spatial index.

use crate::{
    dbs::{Coordinate, NodeId, Rectangle},
    rtree::Config,
};

// One slot of a tree node: a data entry in leaves, a child subtree in
// branches. Either way the slot is keyed by its bounding rectangle.
#[derive(Clone, Debug)]
pub(crate) struct Slot {
    pub rect: Rectangle,
    pub kind: SlotKind,
}

#[derive(Clone, Debug)]
pub(crate) enum SlotKind {
    Entry { coord: Coordinate, id: NodeId },
    Child { node: Box<RNode> },
}

impl Slot {
    pub fn new_entry(coord: Coordinate, id: NodeId) -> Slot {
        Slot {
            rect: Rectangle::from_point(&coord),
            kind: SlotKind::Entry { coord, id },
        }
    }

    pub fn new_child(node: RNode) -> Slot {
        Slot {
            rect: node.mbr(),
            kind: SlotKind::Child {
                node: Box::new(node),
            },
        }
    }

    // smallest id underneath this slot, the split tie-breaker.
    pub fn min_id(&self) -> Option<NodeId> {
        match &self.kind {
            SlotKind::Entry { id, .. } => Some(*id),
            SlotKind::Child { node } => {
                node.slots.iter().filter_map(Slot::min_id).min()
            }
        }
    }
}

#[derive(Clone, Debug)]
pub(crate) struct RNode {
    pub leaf: bool,
    pub slots: Vec<Slot>,
}

impl RNode {
    pub fn new_leaf() -> RNode {
        RNode {
            leaf: true,
            slots: vec![],
        }
    }

    pub fn new_branch() -> RNode {
        RNode {
            leaf: false,
            slots: vec![],
        }
    }

    /// Minimum bounding rectangle of this node's slots.
    pub fn mbr(&self) -> Rectangle {
        let mut iter = self.slots.iter();
        let first = match iter.next() {
            Some(slot) => slot.rect,
            None => Rectangle {
                t_min: 0.0,
                t_max: 0.0,
                r_min: 0.0,
                r_max: 0.0,
                theta_min: 0.0,
                theta_max: 0.0,
            },
        };
        iter.fold(first, |mbr, slot| mbr.merge(&slot.rect))
    }

    // child slot whose rectangle needs the least enlargement to take
    // `rect`; ties broken by smaller volume, then by fewer slots.
    pub fn choose_subtree(&self, rect: &Rectangle) -> usize {
        let mut best = 0;
        let mut best_cost = (f64::INFINITY, f64::INFINITY, usize::MAX);
        for (i, slot) in self.slots.iter().enumerate() {
            let n = match &slot.kind {
                SlotKind::Child { node } => node.slots.len(),
                SlotKind::Entry { .. } => 0,
            };
            let cost = (slot.rect.enlargement(rect), slot.rect.volume(), n);
            if cost.0 < best_cost.0
                || (cost.0 == best_cost.0 && cost.1 < best_cost.1)
                || (cost.0 == best_cost.0 && cost.1 == best_cost.1 && cost.2 < best_cost.2)
            {
                best = i;
                best_cost = cost;
            }
        }
        best
    }

    /// Quadratic split. `self` keeps one group, the other group comes
    /// back as a fresh sibling of the same kind.
    pub fn split(&mut self, config: &Config) -> RNode {
        let slots = std::mem::take(&mut self.slots);
        let (a, b) = quadratic_split(slots, config);

        self.slots = a;
        RNode {
            leaf: self.leaf,
            slots: b,
        }
    }

    // index of the slot holding exactly `(coord, id)`, leaves only.
    pub fn position_of(&self, coord: &Coordinate, id: &NodeId) -> Option<usize> {
        self.slots.iter().position(|slot| match &slot.kind {
            SlotKind::Entry { coord: c, id: i } => i == id && c == coord,
            SlotKind::Child { .. } => false,
        })
    }
}

// Guttman's quadratic split over a set of slots.
fn quadratic_split(mut slots: Vec<Slot>, config: &Config) -> (Vec<Slot>, Vec<Slot>) {
    let (seed_a, seed_b) = pick_seeds(&slots);
    // remove the higher index first so the lower stays valid.
    let slot_b = slots.remove(seed_b);
    let slot_a = slots.remove(seed_a);

    let mut rect_a = slot_a.rect;
    let mut rect_b = slot_b.rect;
    let mut group_a = vec![slot_a];
    let mut group_b = vec![slot_b];

    while let Some(next) = pick_next(&slots, &rect_a, &rect_b) {
        let slot = slots.remove(next);

        // a group short enough that it needs every remaining slot to
        // reach minimum fill takes them all.
        let remaining = slots.len() + 1;
        let need_a = config.min_entries.saturating_sub(group_a.len());
        let need_b = config.min_entries.saturating_sub(group_b.len());
        let to_a = if need_a >= remaining {
            true
        } else if need_b >= remaining {
            false
        } else {
            prefer_group_a(&slot, &rect_a, &rect_b, &group_a, &group_b)
        };

        if to_a {
            rect_a = rect_a.merge(&slot.rect);
            group_a.push(slot);
        } else {
            rect_b = rect_b.merge(&slot.rect);
            group_b.push(slot);
        }
    }

    (group_a, group_b)
}

// seed pair that wastes the most volume when merged.
fn pick_seeds(slots: &[Slot]) -> (usize, usize) {
    let mut best = (0, 1);
    let mut worst_waste = f64::NEG_INFINITY;
    for i in 0..slots.len() {
        for j in (i + 1)..slots.len() {
            let merged = slots[i].rect.merge(&slots[j].rect);
            let waste = merged.volume() - slots[i].rect.volume() - slots[j].rect.volume();
            if waste > worst_waste {
                worst_waste = waste;
                best = (i, j);
            }
        }
    }
    best
}

// slot with the strongest preference for one group.
fn pick_next(slots: &[Slot], rect_a: &Rectangle, rect_b: &Rectangle) -> Option<usize> {
    if slots.is_empty() {
        return None;
    }
    let mut best = 0;
    let mut best_pref = f64::NEG_INFINITY;
    for (i, slot) in slots.iter().enumerate() {
        let d_a = rect_a.enlargement(&slot.rect);
        let d_b = rect_b.enlargement(&slot.rect);
        let pref = (d_a - d_b).abs();
        if pref > best_pref {
            best_pref = pref;
            best = i;
        }
    }
    Some(best)
}

// group choice for `slot`: least enlargement, then smaller resulting
// area, then smaller member id.
fn prefer_group_a(
    slot: &Slot,
    rect_a: &Rectangle,
    rect_b: &Rectangle,
    group_a: &[Slot],
    group_b: &[Slot],
) -> bool {
    let d_a = rect_a.enlargement(&slot.rect);
    let d_b = rect_b.enlargement(&slot.rect);
    if d_a != d_b {
        return d_a < d_b;
    }

    let v_a = rect_a.merge(&slot.rect).volume();
    let v_b = rect_b.merge(&slot.rect).volume();
    if v_a != v_b {
        return v_a < v_b;
    }

    let id_a = group_a.iter().filter_map(Slot::min_id).min();
    let id_b = group_b.iter().filter_map(Slot::min_id).min();
    id_a <= id_b
}
