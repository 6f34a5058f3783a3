//! Vehicle entity and state machine
//!
//! Vehicles are created into a house's pool, dispatched onto the grid, and
//! recycled into the pool when they return. A vehicle that loses every
//! route goes `Stranded` and stays visible; it is never silently deleted.

use super::grid::RoadGraph;
use super::highway::Highway;
use super::pathfind::PathStep;
use super::smooth::SmoothPath;
use super::types::{
    BusinessId, DemandColor, Dir, GridPos, HighwayId, HouseId, StationId, Vec2, VehicleId,
    FUEL_CAPACITY,
};
use std::collections::HashMap;

/// What a vehicle will do after topping up at a station.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum RouteIntent {
    Deliver(BusinessId),
    Home,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum VehicleState {
    /// Pooled at its house.
    Idle,
    EnRouteToBusiness(BusinessId),
    EnRouteToStation(StationId),
    EnRouteHome,
    /// Facility sub-states, entered on arrival.
    ParkingIn,
    Unloading,
    Refueling,
    WaitingToExit,
    ParkingOut,
    /// Terminal-but-visible: no route exists. Recoverable by future edits.
    Stranded,
}

/// Which facility a parked vehicle currently sits at.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ParkedAt {
    Business(BusinessId),
    Station(StationId),
}

/// Active traversal of a highway edge, measured by independent arc length.
#[derive(Debug, Clone, Copy)]
pub struct HighwayRide {
    pub id: HighwayId,
    pub dist: f32,
    pub reversed: bool,
}

#[derive(Debug, Clone)]
pub struct Vehicle {
    pub id: VehicleId,
    pub color: DemandColor,
    pub home: HouseId,
    pub state: VehicleState,

    /// Assigned route. Step 0 is the cell the vehicle starts on.
    pub path: Vec<PathStep>,
    pub path_index: usize,
    /// Fractional progress along the current step, 0..1.
    pub progress: f32,

    /// Smoothed polyline for the current contiguous grid run.
    pub smooth: Option<SmoothPath>,
    /// Path index where the current smooth run starts.
    pub smooth_base: usize,
    pub highway: Option<HighwayRide>,

    pub fuel: f32,
    /// Base speed in cells per second, jittered per vehicle at creation.
    pub speed: f32,
    pub parked_at: Option<ParkedAt>,
    pub slot: Option<usize>,
    pub post_refuel_intent: Option<RouteIntent>,
    /// Delivery target cell remembered across a refuel detour.
    pub pending_delivery_pos: Option<GridPos>,
    /// Travel state to adopt once the park-out maneuver finishes.
    pub post_departure_state: Option<VehicleState>,

    // Timers, in simulated seconds.
    pub intersection_wait: f32,
    pub lane_wait: f32,
    pub dwell_timer: f32,
    /// Set when the vehicle first registers at an upcoming intersection.
    pub approach_since: Option<f32>,

    // Rendering state.
    pub pos: Vec2,
    pub heading: f32,
}

impl Vehicle {
    pub fn new(id: VehicleId, home: HouseId, color: DemandColor, at: GridPos, speed: f32) -> Self {
        Self {
            id,
            color,
            home,
            state: VehicleState::Idle,
            path: Vec::new(),
            path_index: 0,
            progress: 0.0,
            smooth: None,
            smooth_base: 0,
            highway: None,
            fuel: FUEL_CAPACITY,
            speed,
            parked_at: None,
            slot: None,
            post_refuel_intent: None,
            pending_delivery_pos: None,
            post_departure_state: None,
            intersection_wait: 0.0,
            lane_wait: 0.0,
            dwell_timer: 0.0,
            approach_since: None,
            pos: at.center(),
            heading: 0.0,
        }
    }

    /// The cell the vehicle's current step lands on.
    pub fn current_cell(&self) -> Option<GridPos> {
        self.path.get(self.path_index).map(PathStep::pos)
    }

    pub fn next_step(&self) -> Option<&PathStep> {
        self.path.get(self.path_index + 1)
    }

    pub fn destination(&self) -> Option<GridPos> {
        self.path.last().map(PathStep::pos)
    }

    /// Travel direction of the current grid segment.
    pub fn travel_dir(&self) -> Option<Dir> {
        let here = self.current_cell()?;
        match self.next_step()? {
            PathStep::Cell(next) => Dir::between(here, *next),
            PathStep::Highway { .. } => None,
        }
    }

    /// Steps not yet completed, starting at the current cell.
    pub fn remaining_steps(&self) -> &[PathStep] {
        &self.path[self.path_index.min(self.path.len())..]
    }

    pub fn in_transit(&self) -> bool {
        matches!(
            self.state,
            VehicleState::EnRouteToBusiness(_)
                | VehicleState::EnRouteToStation(_)
                | VehicleState::EnRouteHome
        )
    }

    pub fn in_facility(&self) -> bool {
        matches!(
            self.state,
            VehicleState::ParkingIn
                | VehicleState::Unloading
                | VehicleState::Refueling
                | VehicleState::WaitingToExit
                | VehicleState::ParkingOut
        )
    }

    /// Assign a new route and rebuild the smoothed run. Resets all
    /// per-segment bookkeeping so stale mappings are never sampled.
    pub fn assign_path(&mut self, path: Vec<PathStep>) {
        self.path = path;
        self.path_index = 0;
        self.progress = 0.0;
        self.highway = None;
        self.intersection_wait = 0.0;
        self.lane_wait = 0.0;
        self.approach_since = None;
        self.rebuild_smooth_run();
        if let Some(cell) = self.current_cell() {
            if self.smooth.is_none() {
                self.pos = cell.center();
            }
        }
    }

    /// Build the smooth polyline for the contiguous grid run starting at
    /// the current path index, stopping before the next highway step.
    pub fn rebuild_smooth_run(&mut self) {
        self.smooth_base = self.path_index;
        let mut cells = Vec::new();
        for (i, step) in self.path[self.path_index..].iter().enumerate() {
            match step {
                PathStep::Cell(p) => cells.push(*p),
                // A leading highway step anchors the run at its landing
                // cell; a later one ends the run.
                PathStep::Highway { to, .. } if i == 0 => cells.push(*to),
                PathStep::Highway { .. } => break,
            }
        }
        self.smooth = if cells.len() >= 2 {
            Some(SmoothPath::build(&cells))
        } else {
            None
        };
    }

    /// Update the rendering position from the smooth run.
    pub fn sample_position(&mut self) {
        if let Some(smooth) = &self.smooth {
            let local = self.path_index - self.smooth_base;
            let dist = smooth.dist_at(local, self.progress);
            let (p, heading) = smooth.sample(dist);
            self.pos = p;
            self.heading = heading;
        }
    }

    /// Enter the stranded state: clear the route and snap to the last known
    /// good cell center.
    pub fn strand(&mut self) {
        if let Some(cell) = self.current_cell() {
            self.pos = cell.center();
        }
        self.path.clear();
        self.path_index = 0;
        self.progress = 0.0;
        self.smooth = None;
        self.highway = None;
        self.parked_at = None;
        self.slot = None;
        self.post_refuel_intent = None;
        self.pending_delivery_pos = None;
        self.post_departure_state = None;
        self.state = VehicleState::Stranded;
    }

    /// Whether any remaining step crosses a cell that is no longer
    /// traversable, or references a highway that no longer exists. Vehicles
    /// heading home may still cross pending-removal cells they are already
    /// committed to.
    pub fn path_invalidated(
        &self,
        graph: &RoadGraph,
        highways: &HashMap<HighwayId, Highway>,
    ) -> bool {
        let allow_pending = self.state == VehicleState::EnRouteHome;
        let steps = self.remaining_steps();
        for (i, step) in steps.iter().enumerate() {
            match step {
                PathStep::Cell(p) => {
                    let is_destination = i == steps.len() - 1;
                    if is_destination {
                        if !graph.cell(*p).is_building() && !graph.is_traversable(*p, allow_pending)
                        {
                            return true;
                        }
                    } else if !graph.is_traversable(*p, allow_pending) {
                        return true;
                    }
                    // Connection bit must still be present between steps.
                    if i > 0 {
                        if let PathStep::Cell(prev) = steps[i - 1] {
                            let crossing_own_pending =
                                allow_pending && graph.cell(prev).is_pending_removal();
                            if !graph.is_connected(prev, *p) && !crossing_own_pending {
                                return true;
                            }
                        }
                    }
                }
                PathStep::Highway { id, from, to } => {
                    match highways.get(id) {
                        Some(hw) if hw.connects(*from, *to) => {}
                        _ => return true,
                    }
                }
            }
        }
        false
    }
}
