//! Facility parking, unloading, and refueling
//!
//! Arrival hands a vehicle to a facility slot; from there it walks a fixed
//! sub-state chain (park in, dwell, wait for the exit lane, park out) on
//! timers, then re-enters the road network with a freshly planned route.
//! Parked vehicles hold no occupancy claims.

use log::{debug, info, warn};
use std::collections::HashMap;

use super::buildings::{Business, House, Station};
use super::dispatch::nearest_station;
use super::grid::RoadGraph;
use super::highway::Highway;
use super::pathfind::{path_cost, PathStep, Pathfinder};
use super::traffic::TrafficIndex;
use super::types::{
    BusinessId, HighwayId, HouseId, StationId, EXIT_COOLDOWN, FUEL_CAPACITY, FUEL_PER_CELL,
    FUEL_RESERVE_MARGIN, PARK_MANEUVER_TIME, REFUEL_TIME, UNLOAD_TIME,
};
use super::vehicle::{ParkedAt, RouteIntent, Vehicle, VehicleState};

/// Completed facility work this tick, reported up for scoring.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ParkEvent {
    Delivered(BusinessId),
    Refueled(StationId),
    /// Returned to its house pool.
    ReturnedHome(HouseId),
}

/// Handle a vehicle that has just reached the last step of its route.
/// Returns an event when the arrival completes something immediately.
pub fn handle_arrival(
    v: &mut Vehicle,
    graph: &RoadGraph,
    highways: &HashMap<HighwayId, Highway>,
    pathfinder: &mut Pathfinder,
    houses: &mut HashMap<HouseId, House>,
    businesses: &mut HashMap<BusinessId, Business>,
    stations: &mut HashMap<StationId, Station>,
) -> Option<ParkEvent> {
    match v.state {
        VehicleState::EnRouteToBusiness(bid) => {
            let Some(b) = businesses.get_mut(&bid) else {
                warn!("{:?} arrived at missing business {:?}", v.id, bid);
                v.strand();
                return None;
            };
            if let Some(slot) = b.claim_slot(v.id) {
                v.parked_at = Some(ParkedAt::Business(bid));
                v.slot = Some(slot);
                v.state = VehicleState::ParkingIn;
                v.dwell_timer = 0.0;
                anchor_at_arrival(v);
            } else {
                // Lot is full; abandon the reservation and head home.
                debug!("{:?}: no free slot at {:?}, bouncing home", v.id, bid);
                b.reserved = b.reserved.saturating_sub(1);
                route_home(v, graph, highways, pathfinder, &*houses);
            }
            None
        }
        VehicleState::EnRouteToStation(sid) => {
            let Some(s) = stations.get_mut(&sid) else {
                warn!("{:?} arrived at missing station {:?}", v.id, sid);
                v.strand();
                return None;
            };
            if let Some(slot) = s.claim_slot(v.id) {
                v.parked_at = Some(ParkedAt::Station(sid));
                v.slot = Some(slot);
                v.state = VehicleState::ParkingIn;
                v.dwell_timer = 0.0;
                anchor_at_arrival(v);
            }
            // All pumps busy: hold at the entrance and retry next tick.
            None
        }
        VehicleState::EnRouteHome => {
            let hid = v.home;
            v.state = VehicleState::Idle;
            v.parked_at = None;
            v.slot = None;
            v.path.clear();
            v.smooth = None;
            if let Some(h) = houses.get_mut(&hid) {
                v.pos = h.pos.center();
                h.pool.push(v.id);
            }
            Some(ParkEvent::ReturnedHome(hid))
        }
        _ => None,
    }
}

/// Collapse the finished route down to the facility cell the vehicle is
/// standing on. The departure planner needs that anchor as its start.
fn anchor_at_arrival(v: &mut Vehicle) {
    if let Some(cell) = v.current_cell() {
        v.path = vec![PathStep::Cell(cell)];
    } else {
        v.path.clear();
    }
    v.path_index = 0;
    v.smooth = None;
}

/// Advance a parked vehicle's sub-state by one tick.
pub fn update_parked_vehicle(
    v: &mut Vehicle,
    delta_secs: f32,
    time: f32,
    graph: &RoadGraph,
    highways: &HashMap<HighwayId, Highway>,
    pathfinder: &mut Pathfinder,
    houses: &HashMap<HouseId, House>,
    businesses: &mut HashMap<BusinessId, Business>,
    stations: &mut HashMap<StationId, Station>,
    traffic: &TrafficIndex,
) -> Option<ParkEvent> {
    let parked_at = v.parked_at?;
    match v.state {
        VehicleState::ParkingIn => {
            v.dwell_timer += delta_secs;
            let t = (v.dwell_timer / PARK_MANEUVER_TIME).min(1.0);
            let Some(pos) = slot_lerp(v, parked_at, businesses, stations, t) else {
                warn!("{:?}: facility removed mid-maneuver", v.id);
                v.strand();
                return None;
            };
            v.pos = pos;
            if t >= 1.0 {
                v.dwell_timer = 0.0;
                v.state = match parked_at {
                    ParkedAt::Business(_) => VehicleState::Unloading,
                    ParkedAt::Station(_) => VehicleState::Refueling,
                };
            }
            None
        }
        VehicleState::Unloading => {
            v.dwell_timer += delta_secs;
            if v.dwell_timer < UNLOAD_TIME {
                return None;
            }
            v.dwell_timer = 0.0;
            v.state = VehicleState::WaitingToExit;
            let ParkedAt::Business(bid) = parked_at else {
                return None;
            };
            if let Some(b) = businesses.get_mut(&bid) {
                b.receive_delivery();
            }
            info!("{:?} delivered to {:?}", v.id, bid);
            Some(ParkEvent::Delivered(bid))
        }
        VehicleState::Refueling => {
            v.dwell_timer += delta_secs;
            if v.dwell_timer < REFUEL_TIME {
                return None;
            }
            v.dwell_timer = 0.0;
            v.fuel = FUEL_CAPACITY;
            v.state = VehicleState::WaitingToExit;
            let ParkedAt::Station(sid) = parked_at else {
                return None;
            };
            if let Some(s) = stations.get_mut(&sid) {
                s.refuels_completed += 1;
            }
            Some(ParkEvent::Refueled(sid))
        }
        VehicleState::WaitingToExit => {
            let lot = match parked_at {
                ParkedAt::Business(bid) => businesses
                    .get(&bid)
                    .map(|b| (b.pos, b.exit, b.last_exit_time)),
                ParkedAt::Station(sid) => stations
                    .get(&sid)
                    .map(|s| (s.pos, s.exit, s.last_exit_time)),
            };
            let Some((pos, exit, last_exit)) = lot else {
                warn!("{:?}: facility removed while waiting to exit", v.id);
                v.strand();
                return None;
            };
            // Departures are rate limited per facility, and the exit
            // connector must be clear.
            if time - last_exit < EXIT_COOLDOWN || traffic.cell_occupied(pos.step(exit)) {
                return None;
            }
            if !plan_departure(v, parked_at, graph, highways, pathfinder, houses, stations) {
                return None;
            }
            match parked_at {
                ParkedAt::Business(bid) => {
                    if let Some(b) = businesses.get_mut(&bid) {
                        b.last_exit_time = time;
                        b.release_slot(v.id);
                    }
                }
                ParkedAt::Station(sid) => {
                    if let Some(s) = stations.get_mut(&sid) {
                        s.last_exit_time = time;
                        s.release_slot(v.id);
                    }
                }
            }
            v.slot = None;
            v.dwell_timer = 0.0;
            v.state = VehicleState::ParkingOut;
            None
        }
        VehicleState::ParkingOut => {
            v.dwell_timer += delta_secs;
            let t = (v.dwell_timer / PARK_MANEUVER_TIME).min(1.0);
            // Reverse of the park-in arc, back to the roadway entry point.
            if let Some(cell) = v.current_cell() {
                let slot_pos = v.pos;
                v.pos = slot_pos.lerp(&cell.center(), t);
            }
            if t >= 1.0 {
                v.dwell_timer = 0.0;
                v.parked_at = None;
                v.state = v
                    .post_departure_state
                    .take()
                    .unwrap_or(VehicleState::EnRouteHome);
                v.sample_position();
            }
            None
        }
        _ => None,
    }
}

fn slot_lerp(
    v: &Vehicle,
    parked_at: ParkedAt,
    businesses: &HashMap<BusinessId, Business>,
    stations: &HashMap<StationId, Station>,
    t: f32,
) -> Option<super::types::Vec2> {
    let (center, slot_pos) = match parked_at {
        ParkedAt::Business(bid) => {
            let b = businesses.get(&bid)?;
            (b.pos.center(), b.slot_position(v.slot.unwrap_or(0)))
        }
        ParkedAt::Station(sid) => {
            let s = stations.get(&sid)?;
            (s.pos.center(), s.slot_position(v.slot.unwrap_or(0)))
        }
    };
    Some(center.lerp(&slot_pos, t))
}

/// Plan the route a departing vehicle will follow, respecting remaining
/// fuel and any pending post-refuel intent. Returns false when no legal
/// route exists yet; the vehicle keeps waiting and may strand later
/// through the edit reconciliation path.
fn plan_departure(
    v: &mut Vehicle,
    parked_at: ParkedAt,
    graph: &RoadGraph,
    highways: &HashMap<HighwayId, Highway>,
    pathfinder: &mut Pathfinder,
    houses: &HashMap<HouseId, House>,
    stations: &HashMap<StationId, Station>,
) -> bool {
    let Some(from) = v.current_cell() else {
        return false;
    };

    let intent = match parked_at {
        // Leaving a station resumes whatever the detour interrupted.
        ParkedAt::Station(_) => v.post_refuel_intent.take().unwrap_or(RouteIntent::Home),
        ParkedAt::Business(_) => RouteIntent::Home,
    };

    match intent {
        RouteIntent::Deliver(bid) => {
            // The delivery target cell is the cached path goal; the caller
            // re-resolves it from the business map.
            let Some(target) = v.pending_delivery_pos else {
                return false;
            };
            let Some(path) = pathfinder.find_path(graph, highways, from, target, false) else {
                warn!("{:?}: delivery route vanished while refueling", v.id);
                v.post_refuel_intent = None;
                return plan_home(v, from, graph, highways, pathfinder, houses, stations);
            };
            v.assign_path(path);
            v.pending_delivery_pos = None;
            v.post_departure_state = Some(VehicleState::EnRouteToBusiness(bid));
            true
        }
        RouteIntent::Home => plan_home(v, from, graph, highways, pathfinder, houses, stations),
    }
}

/// Immediate turn-around without parking: plan a route home from the
/// vehicle's current cell and resume driving, or strand if none exists.
fn route_home(
    v: &mut Vehicle,
    graph: &RoadGraph,
    highways: &HashMap<HighwayId, Highway>,
    pathfinder: &mut Pathfinder,
    houses: &HashMap<HouseId, House>,
) {
    let (Some(from), Some(home)) = (v.current_cell(), houses.get(&v.home)) else {
        v.strand();
        return;
    };
    match pathfinder.find_path(graph, highways, from, home.pos, true) {
        Some(path) => {
            v.assign_path(path);
            v.state = VehicleState::EnRouteHome;
        }
        None => {
            warn!("{:?}: bounced with no route home", v.id);
            v.strand();
        }
    }
}

fn plan_home(
    v: &mut Vehicle,
    from: super::types::GridPos,
    graph: &RoadGraph,
    highways: &HashMap<HighwayId, Highway>,
    pathfinder: &mut Pathfinder,
    houses: &HashMap<HouseId, House>,
    stations: &HashMap<StationId, Station>,
) -> bool {
    let Some(home) = houses.get(&v.home) else {
        v.strand();
        return false;
    };
    let Some(path) = pathfinder.find_path(graph, highways, from, home.pos, true) else {
        warn!("{:?}: no route home from {:?}", v.id, from);
        v.strand();
        return false;
    };

    let needed = path_cost(&path, highways) * FUEL_PER_CELL * FUEL_RESERVE_MARGIN;
    if v.fuel < needed {
        if let Some(sid) = nearest_station(stations, from) {
            if let Some(detour) =
                pathfinder.find_path(graph, highways, from, stations[&sid].pos, false)
            {
                v.assign_path(detour);
                v.post_refuel_intent = Some(RouteIntent::Home);
                v.post_departure_state = Some(VehicleState::EnRouteToStation(sid));
                return true;
            }
        }
        // Try the direct trip anyway; running dry strands it en route.
        debug!("{:?}: heading home on low fuel", v.id);
    }
    v.assign_path(path);
    v.post_departure_state = Some(VehicleState::EnRouteHome);
    true
}
