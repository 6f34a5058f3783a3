//! Demand-driven vehicle dispatch
//!
//! Runs on a fixed cadence, not every tick. Each business with unmet
//! demand is matched against the nearest house of its color that still has
//! a pooled vehicle. A vehicle that cannot make the trip on its remaining
//! fuel is sent to a fuel station first and remembers the delivery as its
//! post-refuel intent.

use log::{debug, info};
use ordered_float::OrderedFloat;
use std::collections::HashMap;

use super::buildings::{Business, House, Station};
use super::grid::RoadGraph;
use super::highway::Highway;
use super::pathfind::{path_cost, Pathfinder};
use super::types::{
    BusinessId, GridPos, HighwayId, HouseId, StationId, VehicleId, FUEL_PER_CELL,
    FUEL_RESERVE_MARGIN,
};
use super::vehicle::{RouteIntent, Vehicle, VehicleState};

/// The station nearest to `from` by straight-line distance. Route
/// feasibility is checked by the caller; this is only a candidate order.
pub fn nearest_station(
    stations: &HashMap<StationId, Station>,
    from: GridPos,
) -> Option<StationId> {
    stations
        .values()
        .min_by_key(|s| (OrderedFloat(from.octile(&s.pos)), s.id))
        .map(|s| s.id)
}

pub fn run_dispatch(
    graph: &RoadGraph,
    highways: &HashMap<HighwayId, Highway>,
    pathfinder: &mut Pathfinder,
    houses: &mut HashMap<HouseId, House>,
    businesses: &mut HashMap<BusinessId, Business>,
    stations: &HashMap<StationId, Station>,
    vehicles: &mut HashMap<VehicleId, Vehicle>,
) {
    let mut business_ids: Vec<BusinessId> = businesses.keys().copied().collect();
    business_ids.sort();

    for bid in business_ids {
        let (b_pos, b_color, mut unmet) = {
            let b = &businesses[&bid];
            (b.pos, b.color, b.unmet_demand())
        };

        while unmet > 0 {
            // Nearest matching house that still has a pooled vehicle.
            let mut candidates: Vec<&House> = houses
                .values()
                .filter(|h| h.color == b_color && !h.pool.is_empty())
                .collect();
            candidates.sort_by_key(|h| (OrderedFloat(h.pos.octile(&b_pos)), h.id));

            let Some(hid) = candidates.first().map(|h| h.id) else {
                break;
            };
            let house_pos = houses[&hid].pos;

            let Some(path) = pathfinder.find_path(graph, highways, house_pos, b_pos, false) else {
                // No route from the nearest supplier; closer houses will
                // not help, try again next cycle.
                debug!("dispatch: no route {:?} -> {:?}", hid, bid);
                break;
            };

            let Some(vid) = houses.get_mut(&hid).and_then(|h| h.pool.pop()) else {
                break;
            };
            let Some(v) = vehicles.get_mut(&vid) else {
                continue;
            };

            let needed = path_cost(&path, highways) * FUEL_PER_CELL * FUEL_RESERVE_MARGIN;
            if v.fuel < needed {
                if !send_via_station(
                    graph, highways, pathfinder, stations, v, house_pos, bid, b_pos,
                ) {
                    // Cannot even reach a station; return to the pool.
                    debug!("dispatch: {:?} low on fuel with no reachable station", vid);
                    if let Some(h) = houses.get_mut(&hid) {
                        h.pool.push(vid);
                    }
                    break;
                }
            } else {
                v.assign_path(path);
                v.state = VehicleState::EnRouteToBusiness(bid);
                v.post_refuel_intent = None;
                v.pending_delivery_pos = None;
                info!("dispatch: {:?} from {:?} to {:?}", vid, hid, bid);
            }

            if let Some(b) = businesses.get_mut(&bid) {
                b.reserved += 1;
            }
            unmet -= 1;
        }
    }
}

/// Reroute a low-fuel departure through the nearest reachable station,
/// keeping the delivery as the post-refuel intent.
fn send_via_station(
    graph: &RoadGraph,
    highways: &HashMap<HighwayId, Highway>,
    pathfinder: &mut Pathfinder,
    stations: &HashMap<StationId, Station>,
    v: &mut Vehicle,
    from: GridPos,
    deliver_to: BusinessId,
    deliver_pos: GridPos,
) -> bool {
    let Some(sid) = nearest_station(stations, from) else {
        return false;
    };
    let station_pos = stations[&sid].pos;
    let Some(detour) = pathfinder.find_path(graph, highways, from, station_pos, false) else {
        return false;
    };
    v.assign_path(detour);
    v.state = VehicleState::EnRouteToStation(sid);
    v.post_refuel_intent = Some(RouteIntent::Deliver(deliver_to));
    v.pending_delivery_pos = Some(deliver_pos);
    info!(
        "dispatch: {:?} detours via {:?} before delivering to {:?}",
        v.id, sid, deliver_to
    );
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::simulation::pathfind::PathStep;
    use crate::simulation::types::{DemandColor, Dir, SimId, BASE_SPEED};

    fn setup() -> (
        RoadGraph,
        HashMap<HighwayId, Highway>,
        Pathfinder,
        HashMap<HouseId, House>,
        HashMap<BusinessId, Business>,
        HashMap<StationId, Station>,
        HashMap<VehicleId, Vehicle>,
    ) {
        let mut g = RoadGraph::new(16, 6);
        for x in 1..15 {
            g.place_link(GridPos::new(x, 3));
        }
        for x in 1..14 {
            g.connect(GridPos::new(x, 3), GridPos::new(x + 1, 3));
        }
        let hid = HouseId(SimId(1));
        let bid = BusinessId(SimId(2));
        g.place_house(GridPos::new(2, 1), Dir::South, hid);
        g.connect(GridPos::new(2, 2), GridPos::new(2, 3));
        g.place_business(GridPos::new(12, 1), Dir::South, bid);
        g.connect(GridPos::new(12, 2), GridPos::new(12, 3));
        g.rebuild_intersections();

        let mut houses = HashMap::new();
        let mut house = House::new(hid, GridPos::new(2, 1), Dir::South, DemandColor::Red);
        let vid = VehicleId(SimId(3));
        house.pool.push(vid);
        houses.insert(hid, house);

        let mut businesses = HashMap::new();
        let mut business =
            Business::new(bid, GridPos::new(12, 1), Dir::South, DemandColor::Red);
        business.demand = 1.0;
        businesses.insert(bid, business);

        let mut vehicles = HashMap::new();
        vehicles.insert(
            vid,
            Vehicle::new(vid, hid, DemandColor::Red, GridPos::new(2, 1), BASE_SPEED),
        );

        (
            g,
            HashMap::new(),
            Pathfinder::new(),
            houses,
            businesses,
            HashMap::new(),
            vehicles,
        )
    }

    #[test]
    fn dispatch_sends_pooled_vehicle_to_demanding_business() {
        let (g, hw, mut pf, mut houses, mut businesses, stations, mut vehicles) = setup();
        run_dispatch(
            &g, &hw, &mut pf, &mut houses, &mut businesses, &stations, &mut vehicles,
        );
        let vid = VehicleId(SimId(3));
        let v = &vehicles[&vid];
        assert_eq!(
            v.state,
            VehicleState::EnRouteToBusiness(BusinessId(SimId(2)))
        );
        assert!(!v.path.is_empty());
        assert_eq!(businesses[&BusinessId(SimId(2))].reserved, 1);
        assert!(houses[&HouseId(SimId(1))].pool.is_empty());
    }

    #[test]
    fn reserved_demand_is_not_dispatched_twice() {
        let (g, hw, mut pf, mut houses, mut businesses, stations, mut vehicles) = setup();
        run_dispatch(
            &g, &hw, &mut pf, &mut houses, &mut businesses, &stations, &mut vehicles,
        );
        // Add a second pooled vehicle; demand is still 1.0 and now reserved.
        let vid2 = VehicleId(SimId(4));
        houses.get_mut(&HouseId(SimId(1))).unwrap().pool.push(vid2);
        vehicles.insert(
            vid2,
            Vehicle::new(
                vid2,
                HouseId(SimId(1)),
                DemandColor::Red,
                GridPos::new(2, 1),
                BASE_SPEED,
            ),
        );
        run_dispatch(
            &g, &hw, &mut pf, &mut houses, &mut businesses, &stations, &mut vehicles,
        );
        assert_eq!(vehicles[&vid2].state, VehicleState::Idle);
        assert_eq!(businesses[&BusinessId(SimId(2))].reserved, 1);
    }

    #[test]
    fn low_fuel_vehicle_detours_via_station() {
        let (mut g, hw, mut pf, mut houses, mut businesses, mut stations, mut vehicles) = setup();
        let sid = StationId(SimId(9));
        g.place_station(GridPos::new(6, 1), Dir::South, sid);
        g.connect(GridPos::new(6, 2), GridPos::new(6, 3));
        g.rebuild_intersections();
        stations.insert(sid, Station::new(sid, GridPos::new(6, 1), Dir::South));

        let vid = VehicleId(SimId(3));
        vehicles.get_mut(&vid).unwrap().fuel = 6.0;
        run_dispatch(
            &g, &hw, &mut pf, &mut houses, &mut businesses, &stations, &mut vehicles,
        );
        let v = &vehicles[&vid];
        assert_eq!(v.state, VehicleState::EnRouteToStation(sid));
        assert_eq!(
            v.post_refuel_intent,
            Some(RouteIntent::Deliver(BusinessId(SimId(2))))
        );
        assert!(matches!(v.path.last(), Some(PathStep::Cell(p)) if *p == GridPos::new(6, 1)));
    }

    #[test]
    fn mismatched_color_is_ignored() {
        let (g, hw, mut pf, mut houses, mut businesses, stations, mut vehicles) = setup();
        businesses
            .get_mut(&BusinessId(SimId(2)))
            .unwrap()
            .color = DemandColor::Blue;
        run_dispatch(
            &g, &hw, &mut pf, &mut houses, &mut businesses, &stations, &mut vehicles,
        );
        assert_eq!(vehicles[&VehicleId(SimId(3))].state, VehicleState::Idle);
        assert_eq!(businesses[&BusinessId(SimId(2))].reserved, 0);
    }
}
