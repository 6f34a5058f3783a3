//! Continuous vehicle advancement
//!
//! Advances one vehicle per call against the tick's traffic indices. The
//! tentative progress delta is clamped by the follower gap, by next-cell
//! occupancy, and by the intersection yield decision, then mapped onto the
//! smoothed polyline for the rendered position. Waiting is simply zero
//! speed for the rest of the tick.

use log::{debug, warn};
use std::collections::HashMap;

use super::grid::{Cell, RoadGraph};
use super::highway::Highway;
use super::pathfind::PathStep;
use super::traffic::{lane_key, IntersectionEntry, LaneKey, TrafficIndex};
use super::types::{
    Dir, HighwayId, COMFORT_GAP, CONNECTOR_SLOWDOWN, FUEL_PER_CELL,
    HIGHWAY_SPEED_MULTIPLIER, INTERSECTION_DEADLOCK_TIMEOUT, INTERSECTION_SLOWDOWN,
    LANE_DEADLOCK_TIMEOUT, MIN_GAP, YIELD_SLOW_DISTANCE, YIELD_STOP_DISTANCE,
};
use super::vehicle::{HighwayRide, Vehicle};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MoveResult {
    Moving,
    /// Reached the final path step; the world runs the arrival handler.
    Arrived,
}

/// The cell/lane a vehicle currently owns: its current cell before the
/// segment midpoint, its next cell past it.
pub fn owned_key(v: &Vehicle) -> Option<LaneKey> {
    if v.highway.is_some() {
        return None;
    }
    let here = v.current_cell()?;
    let dir = v.travel_dir()?;
    if v.progress < 0.5 {
        Some(lane_key(here, dir))
    } else {
        Some(lane_key(here.step(dir), dir))
    }
}

pub fn advance_vehicle(
    v: &mut Vehicle,
    delta_secs: f32,
    time: f32,
    graph: &RoadGraph,
    highways: &HashMap<HighwayId, Highway>,
    traffic: &mut TrafficIndex,
) -> MoveResult {
    if v.highway.is_some() {
        return advance_on_highway(v, delta_secs, highways);
    }

    let here = match v.current_cell() {
        Some(c) => c,
        None => return MoveResult::Moving,
    };
    if v.path_index + 1 >= v.path.len() {
        return MoveResult::Arrived;
    }

    let next = match v.path[v.path_index + 1] {
        PathStep::Highway { id, from, .. } => {
            // Switch to independent arc-length traversal. The grid claim is
            // released; highway riders occupy no cell.
            let reversed = match highways.get(&id) {
                Some(hw) => hw.b == from,
                None => {
                    warn!("vehicle {:?}: highway {:?} vanished, stranding", v.id, id);
                    v.strand();
                    return MoveResult::Moving;
                }
            };
            if let Some(key) = owned_key(v) {
                traffic.release(v.id, key);
            }
            v.highway = Some(HighwayRide {
                id,
                dist: 0.0,
                reversed,
            });
            return advance_on_highway(v, delta_secs, highways);
        }
        PathStep::Cell(n) => n,
    };

    let dir = match Dir::between(here, next) {
        Some(d) => d,
        None => {
            warn!("vehicle {:?}: non-adjacent step {:?} -> {:?}", v.id, here, next);
            v.strand();
            return MoveResult::Moving;
        }
    };
    let seg_len = dir.length();

    let mut mult = 1.0;
    if graph.is_intersection(here) || graph.is_intersection(next) {
        mult *= INTERSECTION_SLOWDOWN;
    } else if matches!(graph.cell(here), Cell::Connector { .. })
        || matches!(graph.cell(next), Cell::Connector { .. })
    {
        mult *= CONNECTOR_SLOWDOWN;
    }

    let free_delta = v.speed * mult * delta_secs / seg_len;
    let mut delta = free_delta;

    // (a)+(b) follower gap and next-cell occupancy, on the same lane key.
    let next_claimed = traffic
        .occupant(lane_key(next, dir))
        .is_some_and(|o| o != v.id);
    if next_claimed {
        let gap = (1.0 - v.progress) * seg_len;
        if gap <= MIN_GAP {
            delta = 0.0;
        } else {
            delta *= ((gap - MIN_GAP) / (COMFORT_GAP - MIN_GAP)).clamp(0.0, 1.0);
        }
        // Never cross the midpoint into a claimed slot.
        if v.progress < 0.5 {
            delta = delta.min((0.5 - 1e-3 - v.progress).max(0.0));
        } else {
            delta = 0.0;
        }
        if delta <= 1e-6 {
            v.lane_wait += delta_secs;
            if v.lane_wait >= LANE_DEADLOCK_TIMEOUT {
                debug!(
                    "vehicle {:?}: same-lane deadlock override after {:.1}s",
                    v.id, v.lane_wait
                );
                delta = free_delta;
                v.lane_wait = 0.0;
            }
        }
    } else {
        v.lane_wait = 0.0;
    }

    // (c) intersection right-of-way while still outside the junction.
    if delta > 0.0 && graph.is_intersection(next) {
        let arrival = *v.approach_since.get_or_insert(time);
        let exit = match v.path.get(v.path_index + 2) {
            Some(PathStep::Cell(after)) => Dir::between(next, *after).unwrap_or(dir),
            _ => dir,
        };
        let me = IntersectionEntry {
            vehicle: v.id,
            entry: dir,
            exit,
            inside: false,
            arrival,
        };
        if traffic.may_enter(graph, next, &me, v.intersection_wait) {
            if v.intersection_wait >= INTERSECTION_DEADLOCK_TIMEOUT {
                warn!(
                    "vehicle {:?}: forcing through {:?} after {:.1}s wait",
                    v.id, next, v.intersection_wait
                );
            }
            v.intersection_wait = 0.0;
        } else {
            // Smoothly decelerate toward the stop point at the entry. The
            // stop point stays short of the segment midpoint so a waiting
            // vehicle never owns the junction cell itself.
            let stop_progress = (1.0 - YIELD_STOP_DISTANCE / seg_len).clamp(0.0, 0.45);
            if v.progress >= stop_progress {
                delta = 0.0;
            } else {
                let dist_to_stop = (stop_progress - v.progress) * seg_len;
                delta *= (dist_to_stop / YIELD_SLOW_DISTANCE).clamp(0.0, 1.0);
                delta = delta.min(stop_progress - v.progress);
            }
            v.intersection_wait += delta_secs;
        }
    }

    let old_key = owned_key(v);
    v.progress += delta;
    v.fuel = (v.fuel - delta * seg_len * FUEL_PER_CELL).max(0.0);

    if v.progress >= 1.0 {
        v.progress = 0.0;
        v.path_index += 1;
        v.approach_since = None;
        if v.path_index + 1 >= v.path.len() {
            if let Some(key) = old_key {
                traffic.release(v.id, key);
            }
            if let Some(dest) = v.destination() {
                v.pos = dest.center();
            }
            return MoveResult::Arrived;
        }
    }

    let new_key = owned_key(v);
    if new_key != old_key {
        match (old_key, new_key) {
            (Some(old), Some(new)) => traffic.move_claim(v.id, old, new),
            (None, Some(new)) => traffic.claim(new, v.id),
            (Some(old), None) => traffic.release(v.id, old),
            (None, None) => {}
        }
    }

    if v.fuel <= 0.0 {
        warn!("vehicle {:?} ran dry at {:?}", v.id, v.current_cell());
        if let Some(key) = owned_key(v) {
            traffic.release(v.id, key);
        }
        v.strand();
        return MoveResult::Moving;
    }

    v.sample_position();
    MoveResult::Moving
}

fn advance_on_highway(
    v: &mut Vehicle,
    delta_secs: f32,
    highways: &HashMap<HighwayId, Highway>,
) -> MoveResult {
    let ride = match v.highway {
        Some(r) => r,
        None => return MoveResult::Moving,
    };
    let hw = match highways.get(&ride.id) {
        Some(hw) => hw,
        None => {
            warn!("vehicle {:?}: highway {:?} removed mid-ride", v.id, ride.id);
            v.strand();
            return MoveResult::Moving;
        }
    };

    let travelled = v.speed * HIGHWAY_SPEED_MULTIPLIER * delta_secs;
    let dist = ride.dist + travelled;
    // Highway fuel burn is discounted by the speed multiplier.
    v.fuel = (v.fuel - travelled * FUEL_PER_CELL / HIGHWAY_SPEED_MULTIPLIER).max(0.0);

    if dist >= hw.length() {
        // Resume grid traversal at the landing anchor with a fresh smooth
        // run for the remainder of the path.
        v.highway = None;
        v.path_index += 1;
        v.progress = 0.0;
        v.rebuild_smooth_run();
        if v.path_index + 1 >= v.path.len() {
            if let Some(dest) = v.destination() {
                v.pos = dest.center();
            }
            return MoveResult::Arrived;
        }
        v.sample_position();
    } else {
        v.highway = Some(HighwayRide { dist, ..ride });
        let (p, heading) = hw.sample(dist, ride.reversed);
        v.pos = p;
        v.heading = heading;
    }
    MoveResult::Moving
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::simulation::types::{DemandColor, GridPos, HouseId, SimId, VehicleId, BASE_SPEED};
    use crate::simulation::vehicle::VehicleState;

    fn straight_graph() -> RoadGraph {
        let mut g = RoadGraph::new(12, 4);
        for x in 1..11 {
            g.place_link(GridPos::new(x, 1));
        }
        for x in 1..10 {
            g.connect(GridPos::new(x, 1), GridPos::new(x + 1, 1));
        }
        g.rebuild_intersections();
        g
    }

    fn vehicle_on(path: Vec<GridPos>) -> Vehicle {
        let mut v = Vehicle::new(
            VehicleId(SimId(0)),
            HouseId(SimId(0)),
            DemandColor::Red,
            path[0],
            BASE_SPEED,
        );
        v.state = VehicleState::EnRouteHome;
        v.assign_path(path.into_iter().map(PathStep::Cell).collect());
        v
    }

    #[test]
    fn free_road_advances_and_arrives() {
        let g = straight_graph();
        let highways = HashMap::new();
        let mut traffic = TrafficIndex::new();
        let mut v = vehicle_on(vec![
            GridPos::new(1, 1),
            GridPos::new(2, 1),
            GridPos::new(3, 1),
        ]);
        let mut arrived = false;
        for _ in 0..200 {
            traffic.clear();
            if advance_vehicle(&mut v, 0.05, 0.0, &g, &highways, &mut traffic)
                == MoveResult::Arrived
            {
                arrived = true;
                break;
            }
        }
        assert!(arrived);
        assert!(v.pos.distance(&GridPos::new(3, 1).center()) < 0.1);
    }

    #[test]
    fn follower_holds_behind_claimed_cell() {
        let g = straight_graph();
        let highways = HashMap::new();
        let mut traffic = TrafficIndex::new();
        // A parked leader owns the cell ahead on the same lane.
        traffic.claim(lane_key(GridPos::new(3, 1), Dir::East), VehicleId(SimId(9)));

        let mut v = vehicle_on(vec![
            GridPos::new(2, 1),
            GridPos::new(3, 1),
            GridPos::new(4, 1),
        ]);
        for _ in 0..40 {
            advance_vehicle(&mut v, 0.05, 0.0, &g, &highways, &mut traffic);
        }
        // Never crossed the midpoint into the claimed slot.
        assert_eq!(v.path_index, 0);
        assert!(v.progress < 0.5);
        assert!(v.lane_wait > 0.0);
    }

    #[test]
    fn fuel_burns_with_distance() {
        let g = straight_graph();
        let highways = HashMap::new();
        let mut traffic = TrafficIndex::new();
        let mut v = vehicle_on(vec![
            GridPos::new(1, 1),
            GridPos::new(2, 1),
            GridPos::new(3, 1),
        ]);
        let before = v.fuel;
        traffic.clear();
        advance_vehicle(&mut v, 0.1, 0.0, &g, &highways, &mut traffic);
        assert!(v.fuel < before);
    }
}
