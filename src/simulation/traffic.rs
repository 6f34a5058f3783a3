//! Per-tick traffic coordination
//!
//! Rebuilt from scratch from the live vehicle list every tick, never
//! incrementally diffed. Two indices: cell/lane occupancy, and per-
//! intersection entry lists. The mover asks "may this vehicle advance?"
//! against these; during the move phase each vehicle only re-keys its own
//! occupancy claim, so no other vehicle's decision changes mid-phase.

use log::debug;
use std::collections::HashMap;

use super::grid::RoadGraph;
use super::types::{
    Dir, GridPos, VehicleId, GAP_SCAN_TILES, INTERSECTION_DEADLOCK_TIMEOUT,
};

/// Occupancy key: a cell and the lane for one travel direction. Opposite
/// flows through the same cell use distinct lanes.
pub type LaneKey = (GridPos, u8);

pub fn lane_key(cell: GridPos, dir: Dir) -> LaneKey {
    (cell, dir.index())
}

/// One vehicle's registration at an intersection this tick.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct IntersectionEntry {
    pub vehicle: VehicleId,
    pub entry: Dir,
    pub exit: Dir,
    pub inside: bool,
    /// Simulation time at which the vehicle began approaching.
    pub arrival: f32,
}

/// The maneuver a vehicle performs through an intersection, derived purely
/// from its entry/exit direction pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Maneuver {
    Straight,
    Right,
    Left,
}

pub fn maneuver(entry: Dir, exit: Dir) -> Maneuver {
    let diff = (exit.index() + 8 - entry.index()) % 8;
    match diff {
        0 => Maneuver::Straight,
        1..=3 => Maneuver::Right,
        // U-turns yield like the widest left turn.
        _ => Maneuver::Left,
    }
}

/// Whether two maneuvers geometrically conflict: same exit lane (merge),
/// crossing straights, or a turn against an oncoming straight or turn.
pub fn maneuvers_conflict(me: &IntersectionEntry, other: &IntersectionEntry) -> bool {
    if me.exit == other.exit {
        return true;
    }
    let me_turn = maneuver(me.entry, me.exit);
    let other_turn = maneuver(other.entry, other.exit);
    let oncoming = other.entry == me.entry.opposite();

    if me_turn == Maneuver::Straight && other_turn == Maneuver::Straight {
        // Perpendicular straights cross; oncoming straights pass freely.
        return !oncoming && me.entry != other.entry;
    }
    if oncoming && (me_turn == Maneuver::Left || other_turn == Maneuver::Left) {
        return true;
    }
    false
}

#[derive(Default)]
pub struct TrafficIndex {
    occupancy: HashMap<LaneKey, VehicleId>,
    /// Cells with at least one vehicle on any lane, for gap scans.
    cell_load: HashMap<GridPos, u32>,
    intersections: HashMap<GridPos, Vec<IntersectionEntry>>,
}

impl TrafficIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drop everything; buffers keep their capacity across ticks.
    pub fn clear(&mut self) {
        self.occupancy.clear();
        self.cell_load.clear();
        for list in self.intersections.values_mut() {
            list.clear();
        }
    }

    /// Claim a lane slot during the rebuild phase. First claim wins; a
    /// second claim on the same key is a coordination fault and is logged,
    /// never silently overwritten.
    pub fn claim(&mut self, key: LaneKey, vehicle: VehicleId) {
        let slot = self.occupancy.entry(key).or_insert(vehicle);
        if *slot != vehicle {
            debug!(
                "occupancy clash at {:?}: {:?} already holds it, {:?} queued behind",
                key, slot, vehicle
            );
            return;
        }
        *self.cell_load.entry(key.0).or_insert(0) += 1;
    }

    pub fn occupant(&self, key: LaneKey) -> Option<VehicleId> {
        self.occupancy.get(&key).copied()
    }

    pub fn cell_occupied(&self, cell: GridPos) -> bool {
        self.cell_load.get(&cell).copied().unwrap_or(0) > 0
    }

    pub fn occupancy_iter(&self) -> impl Iterator<Item = (&LaneKey, &VehicleId)> {
        self.occupancy.iter()
    }

    /// Re-key one vehicle's own claim during its move update. Only touches
    /// keys held by that vehicle.
    pub fn move_claim(&mut self, vehicle: VehicleId, old: LaneKey, new: LaneKey) {
        if self.occupancy.get(&old) == Some(&vehicle) {
            self.occupancy.remove(&old);
            if let Some(n) = self.cell_load.get_mut(&old.0) {
                *n = n.saturating_sub(1);
            }
        }
        self.claim(new, vehicle);
    }

    pub fn release(&mut self, vehicle: VehicleId, key: LaneKey) {
        if self.occupancy.get(&key) == Some(&vehicle) {
            self.occupancy.remove(&key);
            if let Some(n) = self.cell_load.get_mut(&key.0) {
                *n = n.saturating_sub(1);
            }
        }
    }

    pub fn register_approach(&mut self, cell: GridPos, entry: IntersectionEntry) {
        self.intersections.entry(cell).or_default().push(entry);
    }

    pub fn entries(&self, cell: GridPos) -> &[IntersectionEntry] {
        self.intersections
            .get(&cell)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Pairwise right-of-way: must `me` yield to `other`? Deterministic for
    /// a fixed pair of entries. Only applies when maneuvers conflict.
    pub fn should_yield(
        graph: &RoadGraph,
        cell: GridPos,
        me: &IntersectionEntry,
        other: &IntersectionEntry,
    ) -> bool {
        if me.vehicle == other.vehicle || !maneuvers_conflict(me, other) {
            return false;
        }
        // A vehicle already inside always wins over one still approaching.
        if me.inside {
            return false;
        }
        if other.inside {
            return true;
        }
        // T-junction: the major road's through-traffic beats the minor road.
        if let Some(info) = graph.intersection_info(cell) {
            if let Some(major) = info.major_axis {
                let me_major = me.entry.axis() == Some(major);
                let other_major = other.entry.axis() == Some(major);
                if me_major != other_major {
                    return !me_major;
                }
            }
        }
        // Fixed right-of-way rotation.
        if other.entry == me.entry.yield_to() {
            return true;
        }
        if me.entry == other.entry.yield_to() {
            return false;
        }
        // Earlier arrival wins; vehicle id is the final deterministic tie.
        if other.arrival != me.arrival {
            other.arrival < me.arrival
        } else {
            other.vehicle < me.vehicle
        }
    }

    /// Full entry decision for an approaching vehicle: pairwise yields plus
    /// the minor-road gap requirement at T-junctions. `wait` is how long the
    /// vehicle has already been held; past the deadlock timeout it is
    /// granted passage unconditionally.
    pub fn may_enter(
        &self,
        graph: &RoadGraph,
        cell: GridPos,
        me: &IntersectionEntry,
        wait: f32,
    ) -> bool {
        if wait >= INTERSECTION_DEADLOCK_TIMEOUT {
            return true;
        }
        if let Some(info) = graph.intersection_info(cell) {
            if let Some(major) = info.major_axis {
                if me.entry.axis() != Some(major) && !self.major_road_gap(graph, cell, major) {
                    return false;
                }
            }
        }
        !self
            .entries(cell)
            .iter()
            .any(|other| Self::should_yield(graph, cell, me, other))
    }

    /// Scan a fixed number of tiles along the major axis for occupying
    /// vehicles. The minor road may only enter into a clear gap.
    fn major_road_gap(
        &self,
        graph: &RoadGraph,
        cell: GridPos,
        major: super::types::Axis,
    ) -> bool {
        let dirs = match major {
            super::types::Axis::NorthSouth => [Dir::North, Dir::South],
            super::types::Axis::EastWest => [Dir::East, Dir::West],
        };
        for dir in dirs {
            let mut p = cell;
            for _ in 0..GAP_SCAN_TILES {
                p = p.step(dir);
                if !graph.is_traversable(p, true) {
                    break;
                }
                if self.cell_occupied(p) {
                    return false;
                }
            }
        }
        !self.cell_occupied(cell)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::simulation::types::SimId;

    fn entry(id: usize, entry: Dir, exit: Dir, inside: bool, arrival: f32) -> IntersectionEntry {
        IntersectionEntry {
            vehicle: VehicleId(SimId(id)),
            entry,
            exit,
            inside,
            arrival,
        }
    }

    fn four_way() -> (RoadGraph, GridPos) {
        let mut g = RoadGraph::new(9, 9);
        let c = GridPos::new(4, 4);
        g.place_link(c);
        for d in Dir::CARDINAL {
            let p = c.step(d);
            g.place_link(p);
            g.connect(c, p);
        }
        g.rebuild_intersections();
        (g, c)
    }

    #[test]
    fn maneuver_classification() {
        assert_eq!(maneuver(Dir::North, Dir::North), Maneuver::Straight);
        assert_eq!(maneuver(Dir::North, Dir::East), Maneuver::Right);
        assert_eq!(maneuver(Dir::North, Dir::West), Maneuver::Left);
        assert_eq!(maneuver(Dir::East, Dir::North), Maneuver::Left);
        assert_eq!(maneuver(Dir::West, Dir::West), Maneuver::Straight);
    }

    #[test]
    fn oncoming_straights_do_not_conflict() {
        let a = entry(1, Dir::North, Dir::North, false, 0.0);
        let b = entry(2, Dir::South, Dir::South, false, 0.0);
        assert!(!maneuvers_conflict(&a, &b));
    }

    #[test]
    fn crossing_straights_conflict() {
        let a = entry(1, Dir::North, Dir::North, false, 0.0);
        let b = entry(2, Dir::East, Dir::East, false, 0.0);
        assert!(maneuvers_conflict(&a, &b));
    }

    #[test]
    fn left_turn_against_oncoming_conflicts() {
        let a = entry(1, Dir::North, Dir::West, false, 0.0);
        let b = entry(2, Dir::South, Dir::South, false, 0.0);
        assert!(maneuvers_conflict(&a, &b));
    }

    #[test]
    fn merge_on_same_exit_conflicts() {
        let a = entry(1, Dir::North, Dir::East, false, 0.0);
        let b = entry(2, Dir::West, Dir::East, false, 0.0);
        assert!(maneuvers_conflict(&a, &b));
    }

    #[test]
    fn inside_vehicle_always_wins() {
        let (g, c) = four_way();
        let inside = entry(1, Dir::North, Dir::North, true, 5.0);
        let approaching = entry(2, Dir::East, Dir::East, false, 1.0);
        assert!(TrafficIndex::should_yield(&g, c, &approaching, &inside));
        assert!(!TrafficIndex::should_yield(&g, c, &inside, &approaching));
    }

    #[test]
    fn yield_to_right_at_four_way() {
        let (g, c) = four_way();
        // Northbound yields to westbound traffic (coming from its right).
        let north = entry(1, Dir::North, Dir::North, false, 0.0);
        let west = entry(2, Dir::West, Dir::West, false, 0.0);
        assert!(TrafficIndex::should_yield(&g, c, &north, &west));
        assert!(!TrafficIndex::should_yield(&g, c, &west, &north));
    }

    #[test]
    fn should_yield_is_deterministic() {
        let (g, c) = four_way();
        let a = entry(1, Dir::North, Dir::North, false, 2.0);
        let b = entry(2, Dir::East, Dir::East, false, 2.0);
        let first = TrafficIndex::should_yield(&g, c, &a, &b);
        for _ in 0..10 {
            assert_eq!(TrafficIndex::should_yield(&g, c, &a, &b), first);
        }
        // Exactly one of the ordered pair yields.
        assert_ne!(first, TrafficIndex::should_yield(&g, c, &b, &a));
    }

    #[test]
    fn deadlock_timeout_grants_passage() {
        let (g, c) = four_way();
        let mut index = TrafficIndex::new();
        let blocker = entry(1, Dir::West, Dir::West, false, 0.0);
        index.register_approach(c, blocker);
        let me = entry(2, Dir::North, Dir::North, false, 0.0);
        assert!(!index.may_enter(&g, c, &me, 0.0));
        assert!(index.may_enter(&g, c, &me, INTERSECTION_DEADLOCK_TIMEOUT));
    }

    #[test]
    fn minor_road_waits_for_gap() {
        let mut g = RoadGraph::new(9, 9);
        let c = GridPos::new(4, 4);
        g.place_link(c);
        for d in [Dir::East, Dir::West, Dir::South] {
            let p = c.step(d);
            g.place_link(p);
            g.connect(c, p);
        }
        // Extend the major road so the scan has tiles to inspect.
        for x in [2, 6] {
            g.place_link(GridPos::new(x, 4));
        }
        g.connect(GridPos::new(2, 4), GridPos::new(3, 4));
        g.connect(GridPos::new(5, 4), GridPos::new(6, 4));
        g.rebuild_intersections();

        let mut index = TrafficIndex::new();
        // Major-road traffic two tiles east of the junction.
        index.claim(lane_key(GridPos::new(6, 4), Dir::West), VehicleId(SimId(9)));

        let me = entry(2, Dir::North, Dir::North, false, 0.0);
        assert!(!index.may_enter(&g, c, &me, 0.0));

        let mut empty = TrafficIndex::new();
        empty.clear();
        assert!(empty.may_enter(&g, c, &me, 0.0));
    }

    #[test]
    fn occupancy_claims_are_exclusive() {
        let mut index = TrafficIndex::new();
        let key = lane_key(GridPos::new(1, 1), Dir::East);
        index.claim(key, VehicleId(SimId(1)));
        index.claim(key, VehicleId(SimId(2)));
        assert_eq!(index.occupant(key), Some(VehicleId(SimId(1))));
        // Opposite lane on the same cell is a different slot.
        let other = lane_key(GridPos::new(1, 1), Dir::West);
        index.claim(other, VehicleId(SimId(2)));
        assert_eq!(index.occupant(other), Some(VehicleId(SimId(2))));
    }
}
