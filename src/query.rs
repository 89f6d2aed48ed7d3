//! Module implement the combined index and its query planner.
//!
//! [Combined] orchestrates the spatial and temporal indices behind one
//! `query` entry point. The planner estimates the selectivity of each
//! predicate, probes the more selective index first and filters the
//! candidates through the other in memory. k-NN queries run the
//! spatial best-first traversal with the temporal (and rectangle)
//! predicate rejecting candidates before they enter the k-best heap.
//!
//! Determinism: distance ties and score ties break by id lexicographic
//! order; everything that is not distance-ordered comes back id
//! ordered.

use std::{
    collections::HashMap,
    fmt, result,
    time::{Duration, Instant},
};

use crate::{
    dbs::{Coordinate, NodeId, Rectangle, Weights},
    rtree, temporal,
    util::Spinlock,
    Error, Result,
};

// candidate evaluations between deadline checks.
const DEADLINE_EVERY: usize = 64;

/// Combined query over the spatial and temporal indices.
#[derive(Clone, Debug, Default)]
pub struct Query {
    spatial: Option<Rectangle>,
    nearest: Option<(Coordinate, usize)>,
    temporal: Option<(f64, f64)>,
    limit: Option<usize>,
    offset: usize,
    deadline: Option<Duration>,
    partial_ok: bool,
}

impl Query {
    pub fn new() -> Query {
        Query::default()
    }

    /// Restrict results to `rect`.
    pub fn set_spatial(&mut self, rect: Rectangle) -> &mut Self {
        self.spatial = Some(rect);
        self
    }

    /// Ask for the `k` nearest ids to `probe`.
    pub fn set_nearest(&mut self, probe: Coordinate, k: usize) -> &mut Self {
        self.nearest = Some((probe, k));
        self
    }

    /// Restrict results to the closed time interval `[t_min, t_max]`.
    pub fn set_temporal(&mut self, t_min: f64, t_max: f64) -> &mut Self {
        self.temporal = Some((t_min, t_max));
        self
    }

    pub fn set_limit(&mut self, limit: usize) -> &mut Self {
        self.limit = Some(limit);
        self
    }

    pub fn set_offset(&mut self, offset: usize) -> &mut Self {
        self.offset = offset;
        self
    }

    /// Abort the query once `deadline` has elapsed.
    pub fn set_deadline(&mut self, deadline: Duration) -> &mut Self {
        self.deadline = Some(deadline);
        self
    }

    /// On timeout, return the partial best-effort result instead of
    /// failing.
    pub fn set_partial_ok(&mut self, partial_ok: bool) -> &mut Self {
        self.partial_ok = partial_ok;
        self
    }

    fn validate(&self) -> Result<()> {
        if self.spatial.is_none() && self.nearest.is_none() && self.temporal.is_none() {
            err_at!(InvalidQuery, msg: "query without predicates")?;
        }
        if let Some((t_min, t_max)) = self.temporal {
            if !t_min.is_finite() || !t_max.is_finite() {
                err_at!(InvalidQuery, msg: "non-finite temporal bound")?;
            }
            if t_min > t_max {
                err_at!(InvalidQuery, msg: "temporal range {} > {}", t_min, t_max)?;
            }
        }
        Ok(())
    }
}

/// Probe order chosen by the planner.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Plan {
    /// Best-first spatial traversal, predicates filter inline.
    Nearest,
    /// Only the spatial predicate is present.
    Spatial,
    /// Only the temporal predicate is present.
    Temporal,
    /// Both present, spatial is more selective.
    SpatialFirst,
    /// Both present, temporal is more selective.
    TemporalFirst,
}

impl fmt::Display for Plan {
    fn fmt(&self, f: &mut fmt::Formatter) -> result::Result<(), fmt::Error> {
        match self {
            Plan::Nearest => write!(f, "nearest"),
            Plan::Spatial => write!(f, "spatial"),
            Plan::Temporal => write!(f, "temporal"),
            Plan::SpatialFirst => write!(f, "spatial-first"),
            Plan::TemporalFirst => write!(f, "temporal-first"),
        }
    }
}

/// The combined temporal-spatial index.
pub struct Combined {
    spatial: rtree::Index,
    temporal: temporal::Index,
    positions: Spinlock<HashMap<NodeId, Coordinate>>,
    deadline_default: Option<Duration>,
}

impl Combined {
    pub fn new(
        rtree_config: rtree::Config,
        weights: Weights,
        resolution: f64,
        deadline_default: Option<Duration>,
    ) -> Result<Combined> {
        Ok(Combined {
            spatial: rtree::Index::new(rtree_config, weights),
            temporal: temporal::Index::new(resolution)?,
            positions: Spinlock::new(HashMap::new()),
            deadline_default,
        })
    }

    pub fn as_spatial(&self) -> &rtree::Index {
        &self.spatial
    }

    pub fn as_temporal(&self) -> &temporal::Index {
        &self.temporal
    }

    /// Number of indexed ids.
    pub fn len(&self) -> usize {
        self.spatial.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Index `id` at `coord` in both indices.
    pub fn insert(&self, coord: Coordinate, id: NodeId) -> Result<()> {
        self.spatial.insert(coord, id)?;
        self.temporal.insert(coord.t, id)?;
        self.positions.write().insert(id, coord);
        Ok(())
    }

    /// Drop `id` from both indices. Return whether it was indexed.
    pub fn delete(&self, id: &NodeId) -> Result<bool> {
        let coord = match self.positions.write().remove(id) {
            Some(coord) => coord,
            None => return Ok(false),
        };
        self.spatial.delete(&coord, id)?;
        self.temporal.delete(id)?;
        Ok(true)
    }

    /// Move `id` to `coord`.
    pub fn update(&self, coord: Coordinate, id: NodeId) -> Result<()> {
        let old = self.positions.write().insert(id, coord);
        match old {
            Some(old) => {
                self.spatial.update(&old, coord, id)?;
                self.temporal.update(old.t, coord.t, id)?;
            }
            None => {
                self.spatial.insert(coord, id)?;
                self.temporal.insert(coord.t, id)?;
            }
        }
        Ok(())
    }

    /// Indexed position of `id`.
    pub fn position_of(&self, id: &NodeId) -> Option<Coordinate> {
        self.positions.read().get(id).copied()
    }

    /// Rebuild both indices from scratch.
    pub fn bulk_load(&self, items: Vec<(Coordinate, NodeId)>) -> Result<()> {
        {
            let mut positions = self.positions.write();
            positions.clear();
            for (coord, id) in items.iter() {
                positions.insert(*id, *coord);
            }
        }
        self.spatial.bulk_load(items.clone())?;
        self.temporal
            .bulk_load(items.into_iter().map(|(c, id)| (c.t, id)).collect())?;
        Ok(())
    }

    pub fn clear(&self) -> Result<()> {
        self.bulk_load(vec![])
    }

    /// The probe order the planner would choose for `q`.
    pub fn plan(&self, q: &Query) -> Result<Plan> {
        q.validate()?;

        let plan = match (&q.nearest, &q.spatial, &q.temporal) {
            (Some(_), _, _) => Plan::Nearest,
            (None, Some(_), None) => Plan::Spatial,
            (None, None, Some(_)) => Plan::Temporal,
            (None, Some(rect), Some((t_min, t_max))) => {
                let s_spatial = self.spatial.selectivity(rect);
                let s_temporal = self.temporal.selectivity(*t_min, *t_max);
                if s_spatial <= s_temporal {
                    Plan::SpatialFirst
                } else {
                    Plan::TemporalFirst
                }
            }
            (None, None, None) => unreachable!(),
        };
        Ok(plan)
    }

    /// Run `q` and return the matching ids: distance ordered for k-NN
    /// queries, id ordered otherwise. `offset`/`limit` trim the final
    /// sequence.
    pub fn query(&self, q: &Query) -> Result<Vec<NodeId>> {
        let plan = self.plan(q)?;
        let deadline = q
            .deadline
            .or(self.deadline_default)
            .map(|d| Instant::now() + d);

        let mut timer = DeadlineTimer {
            deadline,
            counted: 0,
            expired: false,
        };

        let ids = match plan {
            Plan::Nearest => self.run_nearest(q, &mut timer)?,
            Plan::Spatial => {
                let rect = q.spatial.as_ref().unwrap();
                self.spatial.range_query(rect)?
            }
            Plan::Temporal => {
                let (t_min, t_max) = q.temporal.unwrap();
                self.temporal.range(t_min, t_max)?
            }
            Plan::SpatialFirst => {
                let rect = q.spatial.as_ref().unwrap();
                let (t_min, t_max) = q.temporal.unwrap();
                let candidates = self.spatial.range_query(rect)?;
                timer.boundary()?;
                self.filter_temporal(candidates, t_min, t_max, &mut timer)?
            }
            Plan::TemporalFirst => {
                let rect = q.spatial.as_ref().unwrap();
                let (t_min, t_max) = q.temporal.unwrap();
                let candidates = self.temporal.range(t_min, t_max)?;
                timer.boundary()?;
                self.filter_spatial(candidates, rect, t_min, t_max, &mut timer)?
            }
        };

        if timer.expired && !q.partial_ok {
            err_at!(QueryTimeout, msg: "query deadline exceeded")?;
        }

        let ids: Vec<NodeId> = ids.into_iter().skip(q.offset).collect();
        match q.limit {
            Some(limit) => Ok(ids.into_iter().take(limit).collect()),
            None => Ok(ids),
        }
    }

    // best-first k-NN, rejecting candidates outside the temporal
    // range or rectangle before they reach the k-best heap.
    fn run_nearest(&self, q: &Query, timer: &mut DeadlineTimer) -> Result<Vec<NodeId>> {
        let (probe, k) = q.nearest.unwrap();
        let temporal = q.temporal;
        let rect = q.spatial;
        let partial_ok = q.partial_ok;

        let pairs = self.spatial.nearest_neighbors_where(&probe, k, |coord, _id| {
            if !timer.tick() {
                // out of time: with partial results allowed, stop
                // admitting candidates and let the traversal drain.
                if !partial_ok {
                    err_at!(QueryTimeout, msg: "query deadline exceeded")?;
                }
                return Ok(false);
            }
            if let Some((t_min, t_max)) = temporal {
                if coord.t < t_min || coord.t > t_max {
                    return Ok(false);
                }
            }
            if let Some(rect) = rect.as_ref() {
                if !rect.contains(coord) {
                    return Ok(false);
                }
            }
            Ok(true)
        })?;

        Ok(pairs.into_iter().map(|(id, _)| id).collect())
    }

    fn filter_temporal(
        &self,
        candidates: Vec<NodeId>,
        t_min: f64,
        t_max: f64,
        timer: &mut DeadlineTimer,
    ) -> Result<Vec<NodeId>> {
        let mut out = vec![];
        for id in candidates.into_iter() {
            if !timer.tick() {
                break;
            }
            match self.temporal.get(&id) {
                Some(t) if t >= t_min && t <= t_max => out.push(id),
                _ => (),
            }
        }
        Ok(out)
    }

    fn filter_spatial(
        &self,
        candidates: Vec<NodeId>,
        rect: &Rectangle,
        t_min: f64,
        t_max: f64,
        timer: &mut DeadlineTimer,
    ) -> Result<Vec<NodeId>> {
        let positions = self.positions.read();
        let mut out = vec![];
        for id in candidates.into_iter() {
            if !timer.tick() {
                break;
            }
            match positions.get(&id) {
                // the temporal probe is bucket granular, re-check the
                // exact interval along with the rectangle.
                Some(coord)
                    if rect.contains(coord) && coord.t >= t_min && coord.t <= t_max =>
                {
                    out.push(id)
                }
                _ => (),
            }
        }
        Ok(out)
    }

    /// Validate both indices.
    pub fn validate(&self) -> Result<(rtree::Stats, temporal::Stats)> {
        let spatial = self.spatial.validate()?;
        let temporal = self.temporal.validate()?;
        if spatial.n_entries != temporal.n_ids {
            err_at!(
                Fatal,
                msg: "index disagreement {} != {}", spatial.n_entries, temporal.n_ids
            )?;
        }
        Ok((spatial, temporal))
    }

    pub fn to_stats(&self) -> Result<(rtree::Stats, temporal::Stats)> {
        Ok((self.spatial.to_stats()?, self.temporal.to_stats()?))
    }
}

// deadline accounting: cheap counter, clock checked every
// DEADLINE_EVERY candidate evaluations.
struct DeadlineTimer {
    deadline: Option<Instant>,
    counted: usize,
    expired: bool,
}

impl DeadlineTimer {
    // returns false once the deadline has passed.
    fn tick(&mut self) -> bool {
        if self.expired {
            return false;
        }
        let deadline = match self.deadline {
            Some(deadline) => deadline,
            None => return true,
        };
        self.counted += 1;
        if self.counted % DEADLINE_EVERY == 0 && Instant::now() > deadline {
            self.expired = true;
            return false;
        }
        true
    }

    // index-boundary check, fails immediately when the deadline has
    // passed.
    fn boundary(&mut self) -> Result<()> {
        if let Some(deadline) = self.deadline {
            if Instant::now() > deadline {
                self.expired = true;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
#[path = "query_test.rs"]
mod query_test;
