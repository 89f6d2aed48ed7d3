//! The spatial index proper: insert, delete, point, range and k-NN
//! queries over the tree structure.

use std::{
    cmp,
    collections::{BinaryHeap, HashSet},
    fmt, mem, result,
    sync::RwLock,
};

use crate::{
    dbs::{Coordinate, NodeId, Rectangle, Weights},
    rtree::{
        node::{RNode, Slot, SlotKind},
        Config,
    },
    Error, Result,
};

// share of an overflowing node re-inserted before falling back to a
// split, R*-style.
const REINSERT_PCT: usize = 30;

/// Spatial index over cylindrical space. Shared-read, exclusive-write
/// through a reader-writer lock at the root.
pub struct Index {
    config: Config,
    weights: Weights,
    inner: RwLock<Inner>,
}

struct Inner {
    root: RNode,
    height: usize, // number of levels, leaf level is ZERO
    n_entries: usize,
}

// book-keeping for one insertion/deletion pass.
struct Ctx {
    reinserted: HashSet<usize>,
    pending: Vec<(Slot, usize)>,
    no_reinsert: bool,
}

impl Index {
    pub fn new(config: Config, weights: Weights) -> Index {
        Index {
            config,
            weights,
            inner: RwLock::new(Inner {
                root: RNode::new_leaf(),
                height: 1,
                n_entries: 0,
            }),
        }
    }

    /// Number of indexed entries.
    pub fn len(&self) -> usize {
        self.inner.read().map(|inner| inner.n_entries).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Index `id` at `coord`.
    pub fn insert(&self, coord: Coordinate, id: NodeId) -> Result<()> {
        let mut inner = err_at!(Fatal, self.inner.write())?;
        do_insert(&mut inner, Slot::new_entry(coord, id), 0, &self.config, false);
        inner.n_entries += 1;
        Ok(())
    }

    /// Remove the entry `(coord, id)`. Fail with `NotFound` when the
    /// exact pair is not indexed.
    pub fn delete(&self, coord: &Coordinate, id: &NodeId) -> Result<()> {
        let mut inner = err_at!(Fatal, self.inner.write())?;

        let mut ctx = Ctx {
            reinserted: HashSet::new(),
            pending: vec![],
            no_reinsert: true,
        };
        let root_level = inner.height - 1;
        let found = delete_at(
            &mut inner.root,
            coord,
            id,
            root_level,
            &self.config,
            &mut ctx,
        );
        if !found {
            err_at!(NotFound, msg: "no entry {} at {}", id, coord)?;
        }
        inner.n_entries -= 1;

        // re-home slots orphaned by condensation.
        while let Some((slot, target)) = ctx.pending.pop() {
            do_insert(&mut inner, slot, target, &self.config, true);
        }

        // shrink the root while it has a single child.
        loop {
            if inner.root.leaf || inner.root.slots.len() != 1 {
                break;
            }
            let slot = inner.root.slots.pop().unwrap();
            match slot.kind {
                SlotKind::Child { node } => {
                    inner.root = *node;
                    inner.height -= 1;
                }
                SlotKind::Entry { .. } => unreachable!(),
            }
        }

        Ok(())
    }

    /// Move `id` from `old` to `new`.
    pub fn update(&self, old: &Coordinate, new: Coordinate, id: NodeId) -> Result<()> {
        self.delete(old, &id)?;
        self.insert(new, id)
    }

    /// Ids indexed exactly at `coord`, in id order.
    pub fn find_exact(&self, coord: &Coordinate) -> Result<Vec<NodeId>> {
        let inner = err_at!(Fatal, self.inner.read())?;
        let mut ids = vec![];
        collect_exact(&inner.root, coord, &mut ids);
        ids.sort_unstable();
        Ok(ids)
    }

    /// Ids whose position falls within `rect`, in id order. Wrapping θ
    /// intervals are handled by probing both non-wrapping halves.
    pub fn range_query(&self, rect: &Rectangle) -> Result<Vec<NodeId>> {
        let inner = err_at!(Fatal, self.inner.read())?;
        let mut ids = vec![];

        let (first, second) = rect.split_wrap();
        collect_range(&inner.root, &first, &mut ids);
        if let Some(second) = second.as_ref() {
            collect_range(&inner.root, second, &mut ids);
        }

        ids.sort_unstable();
        ids.dedup();
        Ok(ids)
    }

    /// The `k` indexed ids nearest to `probe`, ordered by ascending
    /// distance, ties by id order. With fewer than `k` entries all of
    /// them come back, sorted.
    pub fn nearest_neighbors(
        &self,
        probe: &Coordinate,
        k: usize,
    ) -> Result<Vec<(NodeId, f64)>> {
        self.nearest_neighbors_where(probe, k, |_, _| Ok(true))
    }

    /// Best-first k-NN with a candidate predicate. Rejected candidates
    /// never enter the k-best heap; the traversal still stops only
    /// when no remaining rectangle can beat the current k-th best.
    pub fn nearest_neighbors_where<F>(
        &self,
        probe: &Coordinate,
        k: usize,
        mut pred: F,
    ) -> Result<Vec<(NodeId, f64)>>
    where
        F: FnMut(&Coordinate, &NodeId) -> Result<bool>,
    {
        let inner = err_at!(Fatal, self.inner.read())?;
        if k == 0 || inner.n_entries == 0 {
            return Ok(vec![]);
        }

        let mut frontier = BinaryHeap::new();
        frontier.push(Frontier {
            dist2: 0.0,
            node: &inner.root,
        });

        // max-heap of the k best candidates seen so far.
        let mut best: BinaryHeap<(TotalF64, NodeId)> = BinaryHeap::new();

        while let Some(Frontier { dist2, node }) = frontier.pop() {
            if best.len() == k {
                let (worst, _) = best.peek().unwrap();
                if dist2 > worst.0 {
                    break; // no remaining subtree can improve the heap
                }
            }

            for slot in node.slots.iter() {
                match &slot.kind {
                    SlotKind::Entry { coord, id } => {
                        if !pred(coord, id)? {
                            continue;
                        }
                        let d2 = probe.distance2(coord, &self.weights);
                        let cand = (TotalF64(d2), *id);
                        if best.len() < k {
                            best.push(cand);
                        } else if cand < *best.peek().unwrap() {
                            best.pop();
                            best.push(cand);
                        }
                    }
                    SlotKind::Child { node } => {
                        let d2 = slot.rect.min_dist2(probe, &self.weights);
                        let admit = match best.peek() {
                            Some((worst, _)) if best.len() == k => d2 <= worst.0,
                            _ => true,
                        };
                        if admit {
                            frontier.push(Frontier { dist2: d2, node });
                        }
                    }
                }
            }
        }

        let mut out: Vec<(TotalF64, NodeId)> = best.into_vec();
        out.sort_unstable();
        Ok(out
            .into_iter()
            .map(|(d2, id)| (id, d2.0.sqrt()))
            .collect())
    }

    /// Planner's selectivity estimate for `rect`: the fraction of the
    /// indexed bounding volume it overlaps. ONE when the index is
    /// empty or degenerate.
    pub fn selectivity(&self, rect: &Rectangle) -> f64 {
        let inner = match self.inner.read() {
            Ok(inner) => inner,
            Err(_) => return 1.0,
        };
        if inner.n_entries == 0 {
            return 1.0;
        }

        let mbr = inner.root.mbr();
        let volume = mbr.volume();

        let (first, second) = rect.split_wrap();
        if volume <= 0.0 {
            let hit = first.intersects(&mbr)
                || second.as_ref().map(|s| s.intersects(&mbr)).unwrap_or(false);
            return if hit { 1.0 } else { 0.0 };
        }

        let mut overlap = 0.0;
        if let Some(inter) = first.intersection(&mbr) {
            overlap += inter.volume();
        }
        if let Some(inter) = second.as_ref().and_then(|s| s.intersection(&mbr)) {
            overlap += inter.volume();
        }
        (overlap / volume).min(1.0)
    }

    /// Rebuild the index from scratch under one exclusive lock.
    pub fn bulk_load(&self, items: Vec<(Coordinate, NodeId)>) -> Result<()> {
        let mut inner = err_at!(Fatal, self.inner.write())?;
        inner.root = RNode::new_leaf();
        inner.height = 1;
        inner.n_entries = 0;
        for (coord, id) in items.into_iter() {
            do_insert(&mut inner, Slot::new_entry(coord, id), 0, &self.config, false);
            inner.n_entries += 1;
        }
        Ok(())
    }

    /// Drop every entry.
    pub fn clear(&self) -> Result<()> {
        self.bulk_load(vec![])
    }

    /// Check the tree shape invariants and return statistics. Fails
    /// with `Fatal` on a broken invariant.
    pub fn validate(&self) -> Result<Stats> {
        let inner = err_at!(Fatal, self.inner.read())?;

        let mut stats = Stats {
            n_entries: 0,
            height: inner.height,
            n_nodes: 0,
            n_leafs: 0,
        };
        let depth = validate_node(
            &inner.root,
            true,
            inner.height - 1,
            &self.config,
            &mut stats,
        )?;
        if depth != inner.height {
            err_at!(Fatal, msg: "rtree height {} != {}", depth, inner.height)?;
        }
        if stats.n_entries != inner.n_entries {
            err_at!(Fatal, msg: "rtree count {} != {}", stats.n_entries, inner.n_entries)?;
        }
        Ok(stats)
    }

    pub fn to_stats(&self) -> Result<Stats> {
        let inner = err_at!(Fatal, self.inner.read())?;
        let mut stats = Stats {
            n_entries: inner.n_entries,
            height: inner.height,
            n_nodes: 0,
            n_leafs: 0,
        };
        count_nodes(&inner.root, &mut stats);
        Ok(stats)
    }
}

/// Statistic type, for the spatial [Index].
#[derive(Clone, Debug, Default)]
pub struct Stats {
    pub n_entries: usize,
    pub height: usize,
    pub n_nodes: usize,
    pub n_leafs: usize,
}

impl fmt::Display for Stats {
    fn fmt(&self, f: &mut fmt::Formatter) -> result::Result<(), fmt::Error> {
        write!(
            f,
            "rtree = {{ n_entries={}, height={}, n_nodes={}, n_leafs={} }}",
            self.n_entries, self.height, self.n_nodes, self.n_leafs
        )
    }
}

// f64 wrapper ordered by total_cmp, for heap keys.
#[derive(Clone, Copy, Debug, PartialEq)]
struct TotalF64(f64);

impl Eq for TotalF64 {}

impl PartialOrd for TotalF64 {
    fn partial_cmp(&self, other: &Self) -> Option<cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for TotalF64 {
    fn cmp(&self, other: &Self) -> cmp::Ordering {
        self.0.total_cmp(&other.0)
    }
}

// frontier item of the best-first traversal, min-ordered by distance.
struct Frontier<'a> {
    dist2: f64,
    node: &'a RNode,
}

impl<'a> PartialEq for Frontier<'a> {
    fn eq(&self, other: &Self) -> bool {
        self.dist2 == other.dist2
    }
}

impl<'a> Eq for Frontier<'a> {}

impl<'a> PartialOrd for Frontier<'a> {
    fn partial_cmp(&self, other: &Self) -> Option<cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl<'a> Ord for Frontier<'a> {
    fn cmp(&self, other: &Self) -> cmp::Ordering {
        // BinaryHeap is a max-heap, reverse for nearest-first.
        other.dist2.total_cmp(&self.dist2)
    }
}

// Insert `slot` so that it comes to rest in a node at `target` level,
// growing the root on overflow. Forced re-insertion is applied at most
// once per level per pass, never at the root, and can be disabled for
// deletion-driven re-homing.
fn do_insert(inner: &mut Inner, slot: Slot, target: usize, config: &Config, quiet: bool) {
    let mut ctx = Ctx {
        reinserted: HashSet::new(),
        pending: vec![(slot, target)],
        no_reinsert: quiet,
    };

    while let Some((slot, target)) = ctx.pending.pop() {
        let root_level = inner.height - 1;
        if let Some(sibling) =
            insert_at(&mut inner.root, slot, root_level, target, root_level, config, &mut ctx)
        {
            let old_root = mem::replace(&mut inner.root, RNode::new_branch());
            let old_slot = Slot::new_child(old_root);
            inner.root.slots.push(old_slot);
            inner.root.slots.push(sibling);
            inner.height += 1;
        }
    }
}

fn insert_at(
    node: &mut RNode,
    slot: Slot,
    level: usize,
    target: usize,
    root_level: usize,
    config: &Config,
    ctx: &mut Ctx,
) -> Option<Slot> {
    if level == target {
        node.slots.push(slot);
    } else {
        let i = node.choose_subtree(&slot.rect);
        let sibling = match &mut node.slots[i].kind {
            SlotKind::Child { node: child } => {
                insert_at(child, slot, level - 1, target, root_level, config, ctx)
            }
            SlotKind::Entry { .. } => unreachable!(),
        };
        node.slots[i].rect = match &node.slots[i].kind {
            SlotKind::Child { node: child } => child.mbr(),
            SlotKind::Entry { .. } => unreachable!(),
        };
        if let Some(sibling) = sibling {
            node.slots.push(sibling);
        }
    }

    if node.slots.len() <= config.max_entries {
        return None;
    }

    // overflow treatment.
    let reinsert_ok =
        !ctx.no_reinsert && level < root_level && !ctx.reinserted.contains(&level);
    if reinsert_ok {
        ctx.reinserted.insert(level);
        for slot in strip_farthest(node, config) {
            ctx.pending.push((slot, level));
        }
        None
    } else {
        Some(Slot::new_child(node.split(config)))
    }
}

// remove the slots farthest from the node's center, for re-insertion.
fn strip_farthest(node: &mut RNode, config: &Config) -> Vec<Slot> {
    let p = cmp::max(1, (config.max_entries * REINSERT_PCT) / 100);
    let mbr = node.mbr();
    let center = (
        (mbr.t_min + mbr.t_max) / 2.0,
        (mbr.r_min + mbr.r_max) / 2.0,
        (mbr.theta_min + mbr.theta_max) / 2.0,
    );

    let mut order: Vec<(TotalF64, usize)> = node
        .slots
        .iter()
        .enumerate()
        .map(|(i, slot)| {
            let rect = &slot.rect;
            let dt = (rect.t_min + rect.t_max) / 2.0 - center.0;
            let dr = (rect.r_min + rect.r_max) / 2.0 - center.1;
            let dh = (rect.theta_min + rect.theta_max) / 2.0 - center.2;
            (TotalF64(dt * dt + dr * dr + dh * dh), i)
        })
        .collect();
    order.sort_unstable();

    let mut victims: Vec<usize> = order
        .into_iter()
        .rev()
        .take(p)
        .map(|(_, i)| i)
        .collect();
    victims.sort_unstable();

    let mut out = vec![];
    for i in victims.into_iter().rev() {
        out.push(node.slots.remove(i));
    }
    out
}

fn delete_at(
    node: &mut RNode,
    coord: &Coordinate,
    id: &NodeId,
    level: usize,
    config: &Config,
    ctx: &mut Ctx,
) -> bool {
    if node.leaf {
        match node.position_of(coord, id) {
            Some(i) => {
                node.slots.remove(i);
                true
            }
            None => false,
        }
    } else {
        let candidates: Vec<usize> = node
            .slots
            .iter()
            .enumerate()
            .filter(|(_, slot)| slot.rect.contains(coord))
            .map(|(i, _)| i)
            .collect();

        for i in candidates.into_iter() {
            let (found, underflow) = match &mut node.slots[i].kind {
                SlotKind::Child { node: child } => {
                    let found = delete_at(child, coord, id, level - 1, config, ctx);
                    (found, child.slots.len() < config.min_entries)
                }
                SlotKind::Entry { .. } => unreachable!(),
            };
            if !found {
                continue;
            }

            if underflow {
                // condense: drop the child, re-home its slots.
                let slot = node.slots.remove(i);
                match slot.kind {
                    SlotKind::Child { node: child } => {
                        for slot in child.slots.into_iter() {
                            ctx.pending.push((slot, level - 1));
                        }
                    }
                    SlotKind::Entry { .. } => unreachable!(),
                }
            } else {
                node.slots[i].rect = match &node.slots[i].kind {
                    SlotKind::Child { node: child } => child.mbr(),
                    SlotKind::Entry { .. } => unreachable!(),
                };
            }
            return true;
        }
        false
    }
}

fn collect_exact(node: &RNode, coord: &Coordinate, ids: &mut Vec<NodeId>) {
    for slot in node.slots.iter() {
        match &slot.kind {
            SlotKind::Entry { coord: c, id } if c == coord => ids.push(*id),
            SlotKind::Entry { .. } => (),
            SlotKind::Child { node: child } => {
                if slot.rect.contains(coord) {
                    collect_exact(child, coord, ids);
                }
            }
        }
    }
}

fn collect_range(node: &RNode, rect: &Rectangle, ids: &mut Vec<NodeId>) {
    for slot in node.slots.iter() {
        match &slot.kind {
            SlotKind::Entry { coord, id } => {
                if rect.contains(coord) {
                    ids.push(*id);
                }
            }
            SlotKind::Child { node: child } => {
                if rect.intersects(&slot.rect) {
                    collect_range(child, rect, ids);
                }
            }
        }
    }
}

fn count_nodes(node: &RNode, stats: &mut Stats) {
    stats.n_nodes += 1;
    if node.leaf {
        stats.n_leafs += 1;
        return;
    }
    for slot in node.slots.iter() {
        if let SlotKind::Child { node: child } = &slot.kind {
            count_nodes(child, stats);
        }
    }
}

// check fanout bounds, stored rectangles and uniform leaf depth.
// return the subtree height.
fn validate_node(
    node: &RNode,
    is_root: bool,
    level: usize,
    config: &Config,
    stats: &mut Stats,
) -> Result<usize> {
    stats.n_nodes += 1;

    if !is_root && node.slots.len() < config.min_entries {
        err_at!(Fatal, msg: "rtree underfull node {} at level {}", node.slots.len(), level)?;
    }
    if node.slots.len() > config.max_entries {
        err_at!(Fatal, msg: "rtree overfull node {} at level {}", node.slots.len(), level)?;
    }

    if node.leaf {
        stats.n_leafs += 1;
        if level != 0 {
            err_at!(Fatal, msg: "rtree leaf at level {}", level)?;
        }
        stats.n_entries += node.slots.len();
        return Ok(1);
    }

    let mut height = None;
    for slot in node.slots.iter() {
        let child = match &slot.kind {
            SlotKind::Child { node: child } => child,
            SlotKind::Entry { .. } => err_at!(Fatal, msg: "entry slot in branch")?,
        };
        if slot.rect != child.mbr() {
            err_at!(Fatal, msg: "rtree stale rect at level {}", level)?;
        }
        let h = validate_node(child, false, level - 1, config, stats)?;
        match height {
            None => height = Some(h),
            Some(prev) if prev != h => {
                err_at!(Fatal, msg: "rtree ragged depth {} {}", prev, h)?
            }
            Some(_) => (),
        }
    }

    Ok(height.unwrap_or(0) + 1)
}

#[cfg(test)]
#[path = "index_test.rs"]
mod index_test;
