//! Long-distance highway shortcut edges
//!
//! A highway connects two link cells through a cubic bezier. The curve is
//! precomputed as a dense polyline with a cumulative arc-length table so
//! the mover can sample lane-accurate positions by distance.

use super::types::{GridPos, HighwayId, Vec2, HIGHWAY_SPEED_MULTIPLIER};

/// Polyline samples per curve. Dense enough that linear interpolation
/// between samples is visually smooth at cell scale.
const CURVE_SAMPLES: usize = 64;

#[derive(Debug, Clone)]
pub struct Highway {
    pub id: HighwayId,
    pub a: GridPos,
    pub b: GridPos,
    pub control_a: Vec2,
    pub control_b: Vec2,
    polyline: Vec<Vec2>,
    cumulative: Vec<f32>,
}

impl Highway {
    pub fn new(id: HighwayId, a: GridPos, b: GridPos, control_a: Vec2, control_b: Vec2) -> Self {
        let mut hw = Self {
            id,
            a,
            b,
            control_a,
            control_b,
            polyline: Vec::new(),
            cumulative: Vec::new(),
        };
        hw.recompute();
        hw
    }

    /// Move the control points and rebuild the polyline.
    pub fn set_control_points(&mut self, control_a: Vec2, control_b: Vec2) {
        self.control_a = control_a;
        self.control_b = control_b;
        self.recompute();
    }

    fn recompute(&mut self) {
        let p0 = self.a.center();
        let p3 = self.b.center();
        let p1 = self.control_a;
        let p2 = self.control_b;

        self.polyline.clear();
        self.cumulative.clear();
        let mut total = 0.0;
        let mut prev = p0;
        for i in 0..=CURVE_SAMPLES {
            let t = i as f32 / CURVE_SAMPLES as f32;
            let point = cubic_bezier(p0, p1, p2, p3, t);
            if i > 0 {
                total += prev.distance(&point);
            }
            self.polyline.push(point);
            self.cumulative.push(total);
            prev = point;
        }
    }

    /// Arc length of the whole curve, in cells.
    pub fn length(&self) -> f32 {
        *self.cumulative.last().unwrap_or(&0.0)
    }

    /// Pathfinder edge cost: arc length discounted by the speed multiplier.
    pub fn travel_cost(&self) -> f32 {
        self.length() / HIGHWAY_SPEED_MULTIPLIER
    }

    pub fn connects(&self, from: GridPos, to: GridPos) -> bool {
        (self.a == from && self.b == to) || (self.a == to && self.b == from)
    }

    pub fn other_end(&self, pos: GridPos) -> Option<GridPos> {
        if self.a == pos {
            Some(self.b)
        } else if self.b == pos {
            Some(self.a)
        } else {
            None
        }
    }

    /// Sample position and heading at an arc-length distance from `a`.
    /// When `reversed`, distance is measured from `b` instead.
    pub fn sample(&self, dist: f32, reversed: bool) -> (Vec2, f32) {
        let dist = if reversed {
            (self.length() - dist).max(0.0)
        } else {
            dist.clamp(0.0, self.length())
        };

        // Binary search the cumulative table for the surrounding segment.
        let mut lo = 0;
        let mut hi = self.cumulative.len() - 1;
        while lo + 1 < hi {
            let mid = (lo + hi) / 2;
            if self.cumulative[mid] <= dist {
                lo = mid;
            } else {
                hi = mid;
            }
        }
        let seg_len = self.cumulative[hi] - self.cumulative[lo];
        let t = if seg_len > 1e-6 {
            (dist - self.cumulative[lo]) / seg_len
        } else {
            0.0
        };
        let p = self.polyline[lo].lerp(&self.polyline[hi], t);
        let heading = if reversed {
            self.polyline[hi].angle_to(&self.polyline[lo])
        } else {
            self.polyline[lo].angle_to(&self.polyline[hi])
        };
        (p, heading)
    }
}

fn cubic_bezier(p0: Vec2, p1: Vec2, p2: Vec2, p3: Vec2, t: f32) -> Vec2 {
    let u = 1.0 - t;
    let x = u * u * u * p0.x + 3.0 * u * u * t * p1.x + 3.0 * u * t * t * p2.x + t * t * t * p3.x;
    let y = u * u * u * p0.y + 3.0 * u * u * t * p1.y + 3.0 * u * t * t * p2.y + t * t * t * p3.y;
    Vec2::new(x, y)
}
