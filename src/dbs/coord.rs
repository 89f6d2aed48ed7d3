//! Module define the cylindrical geometry used by the spatial index.
//!
//! Positions are `(t, r, θ)` tuples, `t` along the time axis, `r` the
//! radial relevance (non-negative) and `θ` the angular concept in
//! radians, stored normalized to `[0, 2π)`. Distances combine weighted
//! Euclidean terms with a chordal angular term,
//!
//! ```notest
//! d² = w_t·Δt² + w_r·Δr² + w_θ·r₁·r₂·(1 − cos Δθ)
//! ```

use arbitrary::Arbitrary;
use cbordata::Cborize;
use serde::{Deserialize, Serialize};

use std::{fmt, result};

use crate::{Error, Result};

const COORD_VER: u32 = 0x00050001;
const RECT_VER: u32 = 0x00060001;

/// Full angle, 2π.
pub const TAU: f64 = std::f64::consts::PI * 2.0;

/// Position in cylindrical `(t, r, θ)` space.
#[derive(Clone, Copy, Debug, PartialEq, Cborize, Serialize, Deserialize)]
pub struct Coordinate {
    pub t: f64,
    pub r: f64,
    pub theta: f64,
}

impl Coordinate {
    pub const ID: u32 = COORD_VER;

    /// Create a coordinate, normalizing `theta` into `[0, 2π)`. Fail
    /// with `InvalidQuery` for negative `r` or non-finite components.
    pub fn new(t: f64, r: f64, theta: f64) -> Result<Coordinate> {
        if !t.is_finite() || !r.is_finite() || !theta.is_finite() {
            err_at!(InvalidQuery, msg: "non-finite coordinate ({},{},{})", t, r, theta)
        } else if r < 0.0 {
            err_at!(InvalidQuery, msg: "negative radius {}", r)
        } else {
            Ok(Coordinate {
                t,
                r,
                theta: norm_theta(theta),
            })
        }
    }

    /// Distance to `other` under the configured weights.
    pub fn distance(&self, other: &Coordinate, w: &Weights) -> f64 {
        self.distance2(other, w).sqrt()
    }

    /// Squared distance, cheaper when only ordering matters.
    pub fn distance2(&self, other: &Coordinate, w: &Weights) -> f64 {
        let dt = self.t - other.t;
        let dr = self.r - other.r;
        // 1 − cos Δθ is symmetric around π, the shorter arc is implied.
        let dtheta = self.theta - other.theta;
        w.t * dt * dt + w.r * dr * dr + w.theta * self.r * other.r * (1.0 - dtheta.cos())
    }
}

impl fmt::Display for Coordinate {
    fn fmt(&self, f: &mut fmt::Formatter) -> result::Result<(), fmt::Error> {
        write!(f, "({},{},{})", self.t, self.r, self.theta)
    }
}

impl<'a> Arbitrary<'a> for Coordinate {
    fn arbitrary(u: &mut arbitrary::Unstructured<'a>) -> arbitrary::Result<Self> {
        let t = f64::from(u.int_in_range::<i32>(-1000..=1000)?) / 4.0;
        let r = f64::from(u.int_in_range::<i32>(0..=1000)?) / 4.0;
        let theta = f64::from(u.int_in_range::<i32>(0..=6283)?) / 1000.0;
        Ok(Coordinate { t, r, theta })
    }
}

/// Distance weights `(w_t, w_r, w_θ)`, configured once per engine.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Weights {
    pub t: f64,
    pub r: f64,
    pub theta: f64,
}

impl Default for Weights {
    fn default() -> Weights {
        Weights {
            t: 1.0,
            r: 1.0,
            theta: 1.0,
        }
    }
}

impl From<(f64, f64, f64)> for Weights {
    fn from((t, r, theta): (f64, f64, f64)) -> Weights {
        Weights { t, r, theta }
    }
}

/// Minimum bounding rectangle in `(t, r, θ)` space.
///
/// The θ interval may wrap, `theta_min > theta_max` encodes the union
/// `[theta_min, 2π) ∪ [0, theta_max]`. Rectangles stored inside the
/// spatial index never wrap; wrapping query rectangles are split with
/// [Rectangle::split_wrap] before probing.
#[derive(Clone, Copy, Debug, PartialEq, Cborize, Serialize, Deserialize)]
pub struct Rectangle {
    pub t_min: f64,
    pub t_max: f64,
    pub r_min: f64,
    pub r_max: f64,
    pub theta_min: f64,
    pub theta_max: f64,
}

impl Rectangle {
    pub const ID: u32 = RECT_VER;

    /// Create a rectangle. `t` and `r` bounds must be ordered, `r_min`
    /// non-negative; θ bounds are normalized and may wrap.
    pub fn new(
        t_min: f64,
        t_max: f64,
        r_min: f64,
        r_max: f64,
        theta_min: f64,
        theta_max: f64,
    ) -> Result<Rectangle> {
        let vals = [t_min, t_max, r_min, r_max, theta_min, theta_max];
        if vals.iter().any(|v| !v.is_finite()) {
            err_at!(InvalidRectangle, msg: "non-finite bound")
        } else if t_min > t_max {
            err_at!(InvalidRectangle, msg: "t bounds {} > {}", t_min, t_max)
        } else if r_min > r_max {
            err_at!(InvalidRectangle, msg: "r bounds {} > {}", r_min, r_max)
        } else if r_min < 0.0 {
            err_at!(InvalidRectangle, msg: "negative radius {}", r_min)
        } else {
            Ok(Rectangle {
                t_min,
                t_max,
                r_min,
                r_max,
                theta_min: norm_theta(theta_min),
                theta_max: norm_theta_max(theta_max),
            })
        }
    }

    /// Degenerate rectangle covering a single point.
    pub fn from_point(c: &Coordinate) -> Rectangle {
        Rectangle {
            t_min: c.t,
            t_max: c.t,
            r_min: c.r,
            r_max: c.r,
            theta_min: c.theta,
            theta_max: c.theta,
        }
    }

    /// Whether the θ interval wraps across 2π.
    #[inline]
    pub fn is_wrapping(&self) -> bool {
        self.theta_min > self.theta_max
    }

    /// Split a wrapping rectangle into its two non-wrapping halves.
    /// Non-wrapping rectangles are returned unchanged.
    pub fn split_wrap(&self) -> (Rectangle, Option<Rectangle>) {
        if self.is_wrapping() {
            let mut low = *self;
            low.theta_min = 0.0;
            let mut high = *self;
            high.theta_max = TAU;
            (low, Some(high))
        } else {
            (*self, None)
        }
    }

    /// Contains-point, wrap aware on the θ axis.
    pub fn contains(&self, c: &Coordinate) -> bool {
        let linear = self.t_min <= c.t
            && c.t <= self.t_max
            && self.r_min <= c.r
            && c.r <= self.r_max;
        let angular = if self.is_wrapping() {
            c.theta >= self.theta_min || c.theta <= self.theta_max
        } else {
            self.theta_min <= c.theta && c.theta <= self.theta_max
        };
        linear && angular
    }

    /// Intersects-rectangle for non-wrapping rectangles. Wrapping
    /// inputs must be split first.
    pub fn intersects(&self, other: &Rectangle) -> bool {
        self.t_min <= other.t_max
            && other.t_min <= self.t_max
            && self.r_min <= other.r_max
            && other.r_min <= self.r_max
            && self.theta_min <= other.theta_max
            && other.theta_min <= self.theta_max
    }

    /// Axis-aligned volume of the rectangle.
    pub fn volume(&self) -> f64 {
        (self.t_max - self.t_min)
            * (self.r_max - self.r_min)
            * (self.theta_max - self.theta_min)
    }

    /// Sum of the three extents, the R*-tree margin measure.
    pub fn margin(&self) -> f64 {
        (self.t_max - self.t_min)
            + (self.r_max - self.r_min)
            + (self.theta_max - self.theta_min)
    }

    /// Smallest rectangle containing both `self` and `other`.
    pub fn merge(&self, other: &Rectangle) -> Rectangle {
        Rectangle {
            t_min: self.t_min.min(other.t_min),
            t_max: self.t_max.max(other.t_max),
            r_min: self.r_min.min(other.r_min),
            r_max: self.r_max.max(other.r_max),
            theta_min: self.theta_min.min(other.theta_min),
            theta_max: self.theta_max.max(other.theta_max),
        }
    }

    /// Enlarge to include point `c`.
    pub fn enlarge_to_include(&self, c: &Coordinate) -> Rectangle {
        self.merge(&Rectangle::from_point(c))
    }

    /// Volume growth needed to also cover `other`.
    pub fn enlargement(&self, other: &Rectangle) -> f64 {
        self.merge(other).volume() - self.volume()
    }

    /// Overlap of two non-wrapping rectangles, None when disjoint.
    pub fn intersection(&self, other: &Rectangle) -> Option<Rectangle> {
        if !self.intersects(other) {
            return None;
        }
        Some(Rectangle {
            t_min: self.t_min.max(other.t_min),
            t_max: self.t_max.min(other.t_max),
            r_min: self.r_min.max(other.r_min),
            r_max: self.r_max.min(other.r_max),
            theta_min: self.theta_min.max(other.theta_min),
            theta_max: self.theta_max.min(other.theta_max),
        })
    }

    /// Lower bound on the squared distance from `probe` to any point
    /// inside this rectangle. Each term is minimized independently, so
    /// the bound is admissible for best-first k-NN pruning.
    pub fn min_dist2(&self, probe: &Coordinate, w: &Weights) -> f64 {
        let dt = clamp_delta(probe.t, self.t_min, self.t_max);
        let dr = clamp_delta(probe.r, self.r_min, self.r_max);
        let dtheta = if self.contains_theta(probe.theta) {
            0.0
        } else {
            let a = arc_delta(probe.theta, self.theta_min);
            let b = arc_delta(probe.theta, norm_theta(self.theta_max));
            a.min(b)
        };
        w.t * dt * dt
            + w.r * dr * dr
            + w.theta * probe.r * self.r_min * (1.0 - dtheta.cos())
    }

    fn contains_theta(&self, theta: f64) -> bool {
        if self.is_wrapping() {
            theta >= self.theta_min || theta <= self.theta_max
        } else {
            self.theta_min <= theta && theta <= self.theta_max
        }
    }
}

impl fmt::Display for Rectangle {
    fn fmt(&self, f: &mut fmt::Formatter) -> result::Result<(), fmt::Error> {
        write!(
            f,
            "rect<t:[{},{}] r:[{},{}] θ:[{},{}]>",
            self.t_min, self.t_max, self.r_min, self.r_max, self.theta_min, self.theta_max
        )
    }
}

// normalize into [0, 2π).
#[inline]
pub(crate) fn norm_theta(theta: f64) -> f64 {
    let t = theta.rem_euclid(TAU);
    if t == TAU {
        0.0
    } else {
        t
    }
}

// normalize into [0, 2π], preserving an explicit 2π upper bound.
#[inline]
fn norm_theta_max(theta: f64) -> f64 {
    if theta == TAU {
        TAU
    } else {
        norm_theta(theta)
    }
}

// distance from x to the closest point of [lo, hi] along a linear axis.
#[inline]
fn clamp_delta(x: f64, lo: f64, hi: f64) -> f64 {
    if x < lo {
        lo - x
    } else if x > hi {
        x - hi
    } else {
        0.0
    }
}

// shorter-arc angular distance.
#[inline]
fn arc_delta(a: f64, b: f64) -> f64 {
    let d = (a - b).rem_euclid(TAU);
    if d > TAU / 2.0 {
        TAU - d
    } else {
        d
    }
}

#[cfg(test)]
#[path = "coord_test.rs"]
mod coord_test;
