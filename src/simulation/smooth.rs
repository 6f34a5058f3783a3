//! Smoothed geometric paths for lane-accurate positions
//!
//! Logical progress is discrete (path index + fractional segment progress);
//! the rendered position is sampled by arc length from a lane-offset,
//! corner-rounded polyline built once per path assignment. The two differ
//! at turns, which is the point: the mapping table keeps them in sync.

use super::types::{GridPos, Vec2, CORNER_RADIUS, LANE_OFFSET};

/// Bezier samples inserted at each rounded corner.
const CORNER_SAMPLES: usize = 6;

#[derive(Debug, Clone)]
pub struct SmoothPath {
    points: Vec<Vec2>,
    cumulative: Vec<f32>,
    /// Arc-length distance at which each original grid step's anchor sits.
    /// `step_dist[i]` maps step `i` of the covered run to the polyline.
    step_dist: Vec<f32>,
}

impl SmoothPath {
    /// Build from a run of grid cells (no highway steps). Applies the
    /// right-hand lane offset, then rounds every interior corner with a
    /// quadratic bezier so turns are geometrically continuous.
    pub fn build(cells: &[GridPos]) -> SmoothPath {
        let mut anchors: Vec<Vec2> = Vec::with_capacity(cells.len());
        for (i, cell) in cells.iter().enumerate() {
            let center = cell.center();
            // Offset perpendicular to the local travel direction.
            let (from, to) = if i + 1 < cells.len() {
                (center, cells[i + 1].center())
            } else if i > 0 {
                (cells[i - 1].center(), center)
            } else {
                (center, center)
            };
            let n = from.right_normal(&to);
            anchors.push(Vec2::new(
                center.x + n.x * LANE_OFFSET,
                center.y + n.y * LANE_OFFSET,
            ));
        }

        if anchors.len() < 2 {
            let p = anchors.first().copied().unwrap_or_default();
            return SmoothPath {
                points: vec![p, p],
                cumulative: vec![0.0, 0.0],
                step_dist: vec![0.0; anchors.len().max(1)],
            };
        }

        // Round corners: replace each interior anchor with an entry point,
        // bezier samples, and an exit point.
        let mut points: Vec<Vec2> = Vec::new();
        let mut anchor_point_index: Vec<usize> = Vec::with_capacity(anchors.len());

        points.push(anchors[0]);
        anchor_point_index.push(0);

        for i in 1..anchors.len() - 1 {
            let prev = anchors[i - 1];
            let here = anchors[i];
            let next = anchors[i + 1];

            let in_len = prev.distance(&here);
            let out_len = here.distance(&next);
            let r = CORNER_RADIUS.min(in_len * 0.5).min(out_len * 0.5);

            let entry = here.lerp(&prev, r / in_len.max(1e-6));
            let exit = here.lerp(&next, r / out_len.max(1e-6));

            points.push(entry);
            // The anchor maps to the corner apex sample.
            anchor_point_index.push(points.len() + CORNER_SAMPLES / 2 - 1);
            for s in 1..=CORNER_SAMPLES {
                let t = s as f32 / (CORNER_SAMPLES + 1) as f32;
                points.push(quadratic_bezier(entry, here, exit, t));
            }
            points.push(exit);
        }

        anchor_point_index.push(points.len());
        points.push(anchors[anchors.len() - 1]);

        let mut cumulative = Vec::with_capacity(points.len());
        let mut total = 0.0;
        cumulative.push(0.0);
        for w in 1..points.len() {
            total += points[w - 1].distance(&points[w]);
            cumulative.push(total);
        }

        let step_dist = anchor_point_index
            .iter()
            .map(|&i| cumulative[i.min(cumulative.len() - 1)])
            .collect();

        SmoothPath {
            points,
            cumulative,
            step_dist,
        }
    }

    pub fn total_length(&self) -> f32 {
        *self.cumulative.last().unwrap_or(&0.0)
    }

    /// Arc-length distance for a discrete (run-local step index, fractional
    /// progress) pair.
    pub fn dist_at(&self, step: usize, progress: f32) -> f32 {
        if self.step_dist.is_empty() {
            return 0.0;
        }
        let i = step.min(self.step_dist.len() - 1);
        let here = self.step_dist[i];
        let next = self
            .step_dist
            .get(i + 1)
            .copied()
            .unwrap_or(self.total_length());
        here + (next - here) * progress.clamp(0.0, 1.0)
    }

    /// Sample position and heading at an arc-length distance.
    pub fn sample(&self, dist: f32) -> (Vec2, f32) {
        let dist = dist.clamp(0.0, self.total_length());
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
        let seg = self.cumulative[hi] - self.cumulative[lo];
        let t = if seg > 1e-6 {
            (dist - self.cumulative[lo]) / seg
        } else {
            0.0
        };
        let p = self.points[lo].lerp(&self.points[hi], t);
        let heading = self.points[lo].angle_to(&self.points[hi]);
        (p, heading)
    }
}

fn quadratic_bezier(p0: Vec2, p1: Vec2, p2: Vec2, t: f32) -> Vec2 {
    let u = 1.0 - t;
    Vec2::new(
        u * u * p0.x + 2.0 * u * t * p1.x + t * t * p2.x,
        u * u * p0.y + 2.0 * u * t * p1.y + t * t * p2.y,
    )
}
