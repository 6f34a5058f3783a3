//! Top-level simulation world
//!
//! Owns every entity map plus the grid, pathfinder and per-tick traffic
//! indices, and drives the fixed tick pipeline: reconcile edits, accrue
//! demand, dispatch, rebuild traffic, then move every vehicle. Vehicle
//! iteration is always over sorted ids so a given seed replays exactly.

use log::{info, warn};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::HashMap;

use super::buildings::{Business, House, Station};
use super::dispatch::run_dispatch;
use super::edits::reconcile;
use super::game_state::{
    Budget, FreeBudget, GameState, COST_BUSINESS, COST_HIGHWAY, COST_HOUSE, COST_LINK,
    COST_STATION,
};
use super::grid::{Cell, RoadGraph};
use super::highway::Highway;
use super::mover::{advance_vehicle, owned_key, MoveResult};
use super::parking::{handle_arrival, update_parked_vehicle, ParkEvent};
use super::pathfind::{PathStep, Pathfinder};
use super::traffic::{IntersectionEntry, TrafficIndex};
use super::types::{
    BusinessId, DemandColor, Dir, GridPos, HighwayId, HouseId, SimId, StationId, Vec2, VehicleId,
    BASE_SPEED, DISPATCH_INTERVAL, HOUSE_POOL_SIZE,
};
use super::vehicle::{Vehicle, VehicleState};

/// Running totals, printed by the headless binary.
#[derive(Debug, Default, Clone)]
pub struct SimStats {
    pub deliveries: usize,
    pub refuels: usize,
    pub returns_home: usize,
    pub strandings: usize,
    pub ticks: u64,
}

pub struct SimWorld {
    pub graph: RoadGraph,
    pub pathfinder: Pathfinder,
    pub highways: HashMap<HighwayId, Highway>,
    pub houses: HashMap<HouseId, House>,
    pub businesses: HashMap<BusinessId, Business>,
    pub stations: HashMap<StationId, Station>,
    pub vehicles: HashMap<VehicleId, Vehicle>,
    pub time: f32,
    pub stats: SimStats,
    pub game_state: Option<GameState>,
    free_budget: FreeBudget,
    traffic: TrafficIndex,
    next_sim_id: usize,
    last_dispatch: f32,
    rng: StdRng,
}

impl SimWorld {
    pub fn new(width: i32, height: i32) -> Self {
        Self::new_with_seed(width, height, 0)
    }

    pub fn new_with_seed(width: i32, height: i32, seed: u64) -> Self {
        Self {
            graph: RoadGraph::new(width, height),
            pathfinder: Pathfinder::new(),
            highways: HashMap::new(),
            houses: HashMap::new(),
            businesses: HashMap::new(),
            stations: HashMap::new(),
            vehicles: HashMap::new(),
            time: 0.0,
            stats: SimStats::default(),
            game_state: None,
            free_budget: FreeBudget,
            traffic: TrafficIndex::new(),
            next_sim_id: 0,
            last_dispatch: f32::NEG_INFINITY,
            rng: StdRng::seed_from_u64(seed),
        }
    }

    /// A world with the budget-and-goals layer enabled.
    pub fn new_with_game(width: i32, height: i32, seed: u64) -> Self {
        let mut world = Self::new_with_seed(width, height, seed);
        world.game_state = Some(GameState::new());
        world
    }

    fn next_id(&mut self) -> SimId {
        let id = SimId(self.next_sim_id);
        self.next_sim_id += 1;
        id
    }

    /// The active budget: the attached game, or the free one otherwise.
    fn budget(&mut self) -> &mut dyn Budget {
        match &mut self.game_state {
            Some(gs) => gs,
            None => &mut self.free_budget,
        }
    }

    fn charge(&mut self, cost: i32) -> bool {
        self.budget().spend(cost)
    }

    fn refund(&mut self, amount: i32) {
        self.budget().refund(amount);
    }

    // ---- construction / edit API -------------------------------------

    pub fn place_link(&mut self, pos: GridPos) -> bool {
        if !self.charge(COST_LINK) {
            return false;
        }
        if self.graph.place_link(pos) {
            true
        } else {
            self.refund(COST_LINK);
            false
        }
    }

    /// Remove a roadway cell, deferring while traffic still references it.
    pub fn remove_link(&mut self, pos: GridPos) -> bool {
        let referenced = self.vehicles.values().any(|v| {
            v.remaining_steps()
                .iter()
                .any(|s| matches!(s, PathStep::Cell(p) if *p == pos))
        });
        self.graph.remove_link(pos, referenced)
    }

    pub fn connect(&mut self, a: GridPos, b: GridPos) -> bool {
        self.graph.connect(a, b)
    }

    pub fn disconnect(&mut self, a: GridPos, b: GridPos) -> bool {
        self.graph.disconnect(a, b)
    }

    /// Lay a straight run of connected road cells between two aligned
    /// points, inclusive.
    pub fn place_road(&mut self, from: GridPos, to: GridPos) -> bool {
        let Some(dir) = Dir::between_aligned(from, to) else {
            return false;
        };
        let mut p = from;
        self.place_link(p);
        while p != to {
            let next = p.step(dir);
            self.place_link(next);
            self.connect(p, next);
            p = next;
        }
        true
    }

    pub fn add_house(&mut self, pos: GridPos, exit: Dir, color: DemandColor) -> Option<HouseId> {
        if !self.charge(COST_HOUSE) {
            return None;
        }
        let id = HouseId(self.next_id());
        if !self.graph.place_house(pos, exit, id) {
            self.refund(COST_HOUSE);
            return None;
        }
        self.attach_connector(pos, exit);
        let mut house = House::new(id, pos, exit, color);
        for _ in 0..HOUSE_POOL_SIZE {
            let vid = VehicleId(self.next_id());
            let speed = BASE_SPEED * self.rng.random_range(0.9..1.1);
            self.vehicles
                .insert(vid, Vehicle::new(vid, id, color, pos, speed));
            house.pool.push(vid);
        }
        self.houses.insert(id, house);
        Some(id)
    }

    pub fn add_business(
        &mut self,
        pos: GridPos,
        exit: Dir,
        color: DemandColor,
    ) -> Option<BusinessId> {
        if !self.charge(COST_BUSINESS) {
            return None;
        }
        let id = BusinessId(self.next_id());
        if !self.graph.place_business(pos, exit, id) {
            self.refund(COST_BUSINESS);
            return None;
        }
        self.attach_connector(pos, exit);
        self.businesses
            .insert(id, Business::new(id, pos, exit, color));
        Some(id)
    }

    pub fn add_station(&mut self, pos: GridPos, exit: Dir) -> Option<StationId> {
        if !self.charge(COST_STATION) {
            return None;
        }
        let id = StationId(self.next_id());
        if !self.graph.place_station(pos, exit, id) {
            self.refund(COST_STATION);
            return None;
        }
        self.attach_connector(pos, exit);
        self.stations.insert(id, Station::new(id, pos, exit));
        Some(id)
    }

    /// Join a fresh facility connector to the road cell directly beyond
    /// it, when one exists.
    fn attach_connector(&mut self, pos: GridPos, exit: Dir) {
        let connector = pos.step(exit);
        let road = connector.step(exit);
        if self.graph.cell(road).is_roadway() {
            self.graph.connect(connector, road);
        }
    }

    /// Remove a facility and its entity record. Pooled vehicles go with
    /// their house; vehicles out driving keep running and are rerouted or
    /// stranded by the next reconciliation.
    pub fn remove_facility(&mut self, pos: GridPos) -> bool {
        let cell = self.graph.cell(pos);
        if !self.graph.remove_facility(pos) {
            return false;
        }
        match cell {
            Cell::House { owner, .. } => {
                if let Some(h) = self.houses.remove(&owner) {
                    for vid in h.pool {
                        self.vehicles.remove(&vid);
                    }
                }
            }
            Cell::Business { owner, .. } => {
                self.businesses.remove(&owner);
            }
            Cell::Station { owner, .. } => {
                self.stations.remove(&owner);
            }
            _ => {}
        }
        true
    }

    /// Add a curved highway between two existing road cells.
    pub fn add_highway(
        &mut self,
        a: GridPos,
        b: GridPos,
        control_a: Vec2,
        control_b: Vec2,
    ) -> Option<HighwayId> {
        if !matches!(self.graph.cell(a), Cell::Link { .. })
            || !matches!(self.graph.cell(b), Cell::Link { .. })
        {
            return None;
        }
        if !self.charge(COST_HIGHWAY) {
            return None;
        }
        let id = HighwayId(self.next_id());
        self.highways
            .insert(id, Highway::new(id, a, b, control_a, control_b));
        self.graph.mark_dirty();
        Some(id)
    }

    pub fn remove_highway(&mut self, id: HighwayId) -> bool {
        if self.highways.remove(&id).is_some() {
            self.graph.mark_dirty();
            true
        } else {
            false
        }
    }

    // ---- demo map ----------------------------------------------------

    pub fn create_demo_world() -> Self {
        Self::build_demo_world(Self::new(24, 14))
    }

    /// Demo world with a seeded RNG for reproducible runs.
    pub fn create_demo_world_with_seed(seed: u64) -> Self {
        Self::build_demo_world(Self::new_with_seed(24, 14, seed))
    }

    fn build_demo_world(mut world: SimWorld) -> Self {
        // Two east-west avenues joined by three cross streets.
        world.place_road(GridPos::new(2, 3), GridPos::new(21, 3));
        world.place_road(GridPos::new(2, 9), GridPos::new(21, 9));
        for x in [4, 12, 19] {
            world.place_road(GridPos::new(x, 3), GridPos::new(x, 9));
        }

        world.add_house(GridPos::new(3, 1), Dir::South, DemandColor::Red);
        world.add_house(GridPos::new(7, 1), Dir::South, DemandColor::Blue);
        world.add_station(GridPos::new(15, 1), Dir::South);
        world.add_business(GridPos::new(14, 11), Dir::North, DemandColor::Red);
        world.add_business(GridPos::new(17, 11), Dir::North, DemandColor::Blue);

        // A swooping shortcut between the far corners.
        world.add_highway(
            GridPos::new(2, 3),
            GridPos::new(21, 9),
            Vec2::new(0.0, 8.0),
            Vec2::new(23.0, 4.0),
        );
        world
    }

    // ---- tick pipeline -----------------------------------------------

    pub fn tick(&mut self, delta_secs: f32) {
        reconcile(
            &mut self.graph,
            &self.highways,
            &mut self.pathfinder,
            &self.houses,
            &mut self.vehicles,
        );

        for b in self.businesses.values_mut() {
            b.update(delta_secs);
        }

        if self.time - self.last_dispatch >= DISPATCH_INTERVAL {
            self.last_dispatch = self.time;
            run_dispatch(
                &self.graph,
                &self.highways,
                &mut self.pathfinder,
                &mut self.houses,
                &mut self.businesses,
                &self.stations,
                &mut self.vehicles,
            );
        }

        let ids = self.sorted_vehicle_ids();
        self.rebuild_traffic(&ids);
        self.move_vehicles(&ids, delta_secs);

        self.time += delta_secs;
        self.stats.ticks += 1;
        if let Some(gs) = &mut self.game_state {
            gs.update(delta_secs);
        }
    }

    fn sorted_vehicle_ids(&self) -> Vec<VehicleId> {
        let mut ids: Vec<VehicleId> = self.vehicles.keys().copied().collect();
        ids.sort();
        ids
    }

    /// Rebuild the occupancy and intersection indices from scratch.
    fn rebuild_traffic(&mut self, ids: &[VehicleId]) {
        let graph = &self.graph;
        let traffic = &mut self.traffic;
        let time = self.time;
        traffic.clear();
        for id in ids {
            let Some(v) = self.vehicles.get(id) else {
                continue;
            };
            if !v.in_transit() || v.highway.is_some() {
                continue;
            }
            if let Some(key) = owned_key(v) {
                traffic.claim(key, v.id);
            }
            register_intersection(graph, traffic, time, v);
        }
    }

    fn move_vehicles(&mut self, ids: &[VehicleId], delta_secs: f32) {
        for id in ids {
            // Remove, update against the rest of the world, reinsert.
            let Some(mut v) = self.vehicles.remove(id) else {
                continue;
            };
            let was_stranded = v.state == VehicleState::Stranded;

            if v.in_transit() {
                let result = advance_vehicle(
                    &mut v,
                    delta_secs,
                    self.time,
                    &self.graph,
                    &self.highways,
                    &mut self.traffic,
                );
                if result == MoveResult::Arrived {
                    let event = handle_arrival(
                        &mut v,
                        &self.graph,
                        &self.highways,
                        &mut self.pathfinder,
                        &mut self.houses,
                        &mut self.businesses,
                        &mut self.stations,
                    );
                    self.record_event(event);
                }
            } else if v.in_facility() {
                let event = update_parked_vehicle(
                    &mut v,
                    delta_secs,
                    self.time,
                    &self.graph,
                    &self.highways,
                    &mut self.pathfinder,
                    &self.houses,
                    &mut self.businesses,
                    &mut self.stations,
                    &self.traffic,
                );
                self.record_event(event);
            }

            if v.state == VehicleState::Stranded && !was_stranded {
                self.stats.strandings += 1;
            }
            self.vehicles.insert(*id, v);
        }
    }

    fn record_event(&mut self, event: Option<ParkEvent>) {
        match event {
            Some(ParkEvent::Delivered(_)) => {
                self.stats.deliveries += 1;
                if let Some(gs) = &mut self.game_state {
                    gs.complete_delivery();
                }
            }
            Some(ParkEvent::Refueled(_)) => self.stats.refuels += 1,
            Some(ParkEvent::ReturnedHome(_)) => self.stats.returns_home += 1,
            None => {}
        }
    }

    // ---- reporting ----------------------------------------------------

    pub fn stranded_count(&self) -> usize {
        self.vehicles
            .values()
            .filter(|v| v.state == VehicleState::Stranded)
            .count()
    }

    pub fn in_transit_count(&self) -> usize {
        self.vehicles.values().filter(|v| v.in_transit()).count()
    }

    pub fn print_summary(&self) {
        println!(
            "t={:.1}s  vehicles: {} ({} driving, {} stranded)  deliveries: {}  refuels: {}",
            self.time,
            self.vehicles.len(),
            self.in_transit_count(),
            self.stranded_count(),
            self.stats.deliveries,
            self.stats.refuels,
        );
        if let Some(gs) = &self.game_state {
            println!("{}", gs.summary());
            if gs.is_won {
                info!("goal reached");
            } else if gs.is_lost {
                warn!("bankrupt");
            }
        }
    }

    /// Render the grid as ASCII, with vehicles overlaid as `*`.
    pub fn draw_map(&self) -> String {
        let mut rows: Vec<Vec<char>> = (0..self.graph.height())
            .map(|y| {
                (0..self.graph.width())
                    .map(|x| self.cell_glyph(GridPos::new(x, y)))
                    .collect()
            })
            .collect();
        for v in self.vehicles.values() {
            if v.state == VehicleState::Idle {
                continue;
            }
            let x = v.pos.x.round() as i32;
            let y = v.pos.y.round() as i32;
            if self.graph.in_bounds(GridPos::new(x, y)) {
                rows[y as usize][x as usize] = '*';
            }
        }
        let mut out = String::new();
        for row in rows {
            out.extend(row);
            out.push('\n');
        }
        out
    }

    fn cell_glyph(&self, pos: GridPos) -> char {
        match self.graph.cell(pos) {
            Cell::Empty => '.',
            Cell::Obstacle => '#',
            Cell::Link {
                pending_removal: true,
                ..
            } => 'x',
            Cell::Link { links, .. } => {
                if self.graph.is_intersection(pos) {
                    '+'
                } else if links.contains(Dir::North) || links.contains(Dir::South) {
                    '|'
                } else {
                    '-'
                }
            }
            Cell::Connector { .. } => '=',
            Cell::House { .. } => 'H',
            Cell::Business { .. } => 'B',
            Cell::Station { .. } => 'F',
            Cell::ParkingLot { .. } => 'P',
        }
    }
}

/// Register a vehicle at the junction it is inside and the one it is
/// approaching, if any.
fn register_intersection(graph: &RoadGraph, traffic: &mut TrafficIndex, time: f32, v: &Vehicle) {
    let Some(here) = v.current_cell() else {
        return;
    };
    if graph.is_intersection(here) {
        if let Some(entry) = entry_dir(v) {
            traffic.register_approach(
                here,
                IntersectionEntry {
                    vehicle: v.id,
                    entry,
                    exit: v.travel_dir().unwrap_or(entry),
                    inside: true,
                    arrival: v.approach_since.unwrap_or(time),
                },
            );
        }
    }
    if let Some(PathStep::Cell(next)) = v.next_step() {
        if graph.is_intersection(*next) {
            let Some(entry) = v.travel_dir() else {
                return;
            };
            let exit = match v.path.get(v.path_index + 2) {
                Some(PathStep::Cell(after)) => Dir::between(*next, *after).unwrap_or(entry),
                _ => entry,
            };
            traffic.register_approach(
                *next,
                IntersectionEntry {
                    vehicle: v.id,
                    entry,
                    exit,
                    inside: false,
                    arrival: v.approach_since.unwrap_or(time),
                },
            );
        }
    }
}

/// Direction the vehicle entered its current cell from.
fn entry_dir(v: &Vehicle) -> Option<Dir> {
    if v.path_index == 0 {
        return v.travel_dir();
    }
    match (&v.path[v.path_index - 1], &v.path[v.path_index]) {
        (PathStep::Cell(prev), step) => Dir::between(*prev, step.pos()),
        _ => v.travel_dir(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn edits_are_budget_gated() {
        let mut world = SimWorld::new_with_game(8, 8, 1);
        world.game_state.as_mut().unwrap().money = COST_LINK - 1;
        assert!(!world.place_link(GridPos::new(2, 2)));
        assert!(!world.graph.cell(GridPos::new(2, 2)).is_roadway());

        world.game_state.as_mut().unwrap().money = COST_LINK;
        assert!(world.place_link(GridPos::new(2, 2)));
        assert_eq!(world.game_state.as_ref().unwrap().money, 0);
    }

    #[test]
    fn failed_placement_refunds() {
        let mut world = SimWorld::new_with_game(8, 8, 1);
        let before = world.game_state.as_ref().unwrap().money;
        world.place_link(GridPos::new(3, 3));
        // Occupied cell: charge must be returned.
        assert!(!world.place_link(GridPos::new(3, 3)));
        assert_eq!(
            world.game_state.as_ref().unwrap().money,
            before - COST_LINK
        );
    }

    #[test]
    fn house_spawns_a_vehicle_pool() {
        let mut world = SimWorld::new(10, 10);
        world.place_road(GridPos::new(1, 3), GridPos::new(8, 3));
        let hid = world
            .add_house(GridPos::new(2, 1), Dir::South, DemandColor::Red)
            .unwrap();
        assert_eq!(world.houses[&hid].pool.len(), HOUSE_POOL_SIZE);
        assert_eq!(world.vehicles.len(), HOUSE_POOL_SIZE);
    }

    #[test]
    fn removing_a_house_retires_its_pool() {
        let mut world = SimWorld::new(10, 10);
        world.place_road(GridPos::new(1, 3), GridPos::new(8, 3));
        let hid = world
            .add_house(GridPos::new(2, 1), Dir::South, DemandColor::Red)
            .unwrap();
        assert!(world.remove_facility(GridPos::new(2, 1)));
        assert!(!world.houses.contains_key(&hid));
        assert!(world.vehicles.is_empty());
        assert_eq!(world.graph.cell(GridPos::new(2, 1)), Cell::Empty);
        assert_eq!(world.graph.cell(GridPos::new(2, 2)), Cell::Empty);
    }

    #[test]
    fn identical_seeds_replay_identically() {
        let build = |seed: u64| {
            let mut w = SimWorld::new_with_seed(20, 8, seed);
            w.place_road(GridPos::new(1, 3), GridPos::new(18, 3));
            w.add_house(GridPos::new(3, 1), Dir::South, DemandColor::Red);
            w.add_business(GridPos::new(15, 1), Dir::South, DemandColor::Red);
            for _ in 0..600 {
                w.tick(0.05);
            }
            let mut poses: Vec<(VehicleId, (i32, i32))> = w
                .vehicles
                .iter()
                .map(|(id, v)| (*id, ((v.pos.x * 100.0) as i32, (v.pos.y * 100.0) as i32)))
                .collect();
            poses.sort();
            (w.stats.deliveries, poses)
        };
        assert_eq!(build(42), build(42));
    }
}
