//! Graph edit reconciliation
//!
//! Edits mark the graph dirty; nothing else reacts immediately. At the
//! start of the next tick the world reconciles: route caches drop,
//! intersection metadata rebuilds, every in-flight route is revalidated,
//! and pending-removal cells with no remaining traffic are swept away.

use log::{debug, info};
use std::collections::HashMap;

use super::buildings::House;
use super::grid::RoadGraph;
use super::highway::Highway;
use super::pathfind::{PathStep, Pathfinder};
use super::types::{GridPos, HighwayId, HouseId, VehicleId};
use super::vehicle::{Vehicle, VehicleState};

/// Bring all derived state back in line with an edited graph. No-op when
/// the graph is clean.
pub fn reconcile(
    graph: &mut RoadGraph,
    highways: &HashMap<HighwayId, Highway>,
    pathfinder: &mut Pathfinder,
    houses: &HashMap<HouseId, House>,
    vehicles: &mut HashMap<VehicleId, Vehicle>,
) {
    if !graph.is_dirty() {
        return;
    }
    info!("graph changed, reconciling routes");
    graph.rebuild_intersections();
    pathfinder.invalidate();
    reroute_affected(graph, highways, pathfinder, houses, vehicles);
    sweep_clear_pending(graph, vehicles);
    graph.clear_dirty();
}

/// Revalidate every in-flight route and replace the broken ones. A vehicle
/// keeps its destination when a new route exists, falls back to heading
/// home otherwise, and strands only when even that fails.
fn reroute_affected(
    graph: &RoadGraph,
    highways: &HashMap<HighwayId, Highway>,
    pathfinder: &mut Pathfinder,
    houses: &HashMap<HouseId, House>,
    vehicles: &mut HashMap<VehicleId, Vehicle>,
) {
    let mut ids: Vec<VehicleId> = vehicles.keys().copied().collect();
    ids.sort();

    for id in ids {
        let Some(v) = vehicles.get_mut(&id) else {
            continue;
        };
        if !v.in_transit() || !v.path_invalidated(graph, highways) {
            continue;
        }

        if v.highway.is_some() {
            reroute_mid_ride(v, graph, highways, pathfinder, houses);
            continue;
        }

        let allow_pending = v.state == VehicleState::EnRouteHome;
        let (Some(from), Some(dest)) = (v.current_cell(), v.destination()) else {
            v.strand();
            continue;
        };
        if let Some(path) = pathfinder.find_path(graph, highways, from, dest, allow_pending) {
            debug!("{:?}: rerouted to {:?}", id, dest);
            v.assign_path(path);
            continue;
        }
        fall_back_home(v, from, graph, highways, pathfinder, houses);
    }
}

/// A vehicle on a highway cannot leave mid-span. Replan from the landing
/// anchor and splice the new tail onto the ride in progress.
fn reroute_mid_ride(
    v: &mut Vehicle,
    graph: &RoadGraph,
    highways: &HashMap<HighwayId, Highway>,
    pathfinder: &mut Pathfinder,
    houses: &HashMap<HouseId, House>,
) {
    let ride_ok = v
        .highway
        .and_then(|r| highways.get(&r.id))
        .is_some();
    let landing = v.path.get(v.path_index + 1).map(PathStep::pos);
    let (true, Some(landing)) = (ride_ok, landing) else {
        v.strand();
        return;
    };

    let dest = v.destination();
    let new_tail = dest
        .and_then(|d| pathfinder.find_path(graph, highways, landing, d, false))
        .or_else(|| {
            houses
                .get(&v.home)
                .and_then(|h| pathfinder.find_path(graph, highways, landing, h.pos, true))
        });
    match new_tail {
        Some(tail) => {
            if dest.map(|d| tail.last().map(PathStep::pos) != Some(d)) == Some(true) {
                v.state = VehicleState::EnRouteHome;
            }
            let mut spliced: Vec<PathStep> = v.path[..=v.path_index + 1].to_vec();
            spliced.extend_from_slice(&tail[1..]);
            v.path = spliced;
        }
        None => v.strand(),
    }
}

fn fall_back_home(
    v: &mut Vehicle,
    from: GridPos,
    graph: &RoadGraph,
    highways: &HashMap<HighwayId, Highway>,
    pathfinder: &mut Pathfinder,
    houses: &HashMap<HouseId, House>,
) {
    let home = houses.get(&v.home).map(|h| h.pos);
    let fallback = home.and_then(|h| pathfinder.find_path(graph, highways, from, h, true));
    match fallback {
        Some(path) => {
            debug!("{:?}: destination unreachable, heading home", v.id);
            v.assign_path(path);
            v.state = VehicleState::EnRouteHome;
            v.post_refuel_intent = None;
            v.pending_delivery_pos = None;
        }
        None => {
            info!("{:?}: no route anywhere, stranding", v.id);
            v.strand();
        }
    }
}

/// Finalize deferred removals once no route still references the cell and
/// no vehicle is standing on it.
fn sweep_clear_pending(graph: &mut RoadGraph, vehicles: &HashMap<VehicleId, Vehicle>) {
    for pos in graph.pending_cells() {
        let referenced = vehicles.values().any(|v| {
            v.remaining_steps()
                .iter()
                .any(|s| matches!(s, PathStep::Cell(p) if *p == pos))
        });
        if !referenced {
            graph.sweep_pending(pos);
            debug!("swept pending cell {:?}", pos);
        }
    }
}
