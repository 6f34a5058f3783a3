//! Houses, businesses and gas stations
//!
//! Houses own pools of idle vehicles. Businesses accumulate demand pins
//! that the dispatcher works off. Stations refuel. Parking slots hold
//! vehicle ids by reference, never ownership.

use super::types::{
    BusinessId, DemandColor, Dir, GridPos, HouseId, StationId, VehicleId, DEMAND_CAP,
    DEMAND_RATE, PARKING_SLOTS,
};

/// An origin of vehicles. The pool holds vehicles currently at home.
#[derive(Debug, Clone)]
pub struct House {
    pub id: HouseId,
    pub pos: GridPos,
    pub exit: Dir,
    pub color: DemandColor,
    pub pool: Vec<VehicleId>,
}

impl House {
    pub fn new(id: HouseId, pos: GridPos, exit: Dir, color: DemandColor) -> Self {
        Self {
            id,
            pos,
            exit,
            color,
            pool: Vec::new(),
        }
    }
}

/// A demand sink with limited parking.
#[derive(Debug, Clone)]
pub struct Business {
    pub id: BusinessId,
    pub pos: GridPos,
    pub exit: Dir,
    pub color: DemandColor,
    /// Undelivered demand units, accrued over time up to the cap.
    pub demand: f32,
    /// Vehicles already dispatched toward this business; prevents
    /// over-assignment within a dispatch cycle.
    pub reserved: u32,
    pub slots: Vec<Option<VehicleId>>,
    pub deliveries_received: usize,
    /// Simulation time of the last departure from the exit lane.
    pub last_exit_time: f32,
}

impl Business {
    pub fn new(id: BusinessId, pos: GridPos, exit: Dir, color: DemandColor) -> Self {
        Self {
            id,
            pos,
            exit,
            color,
            demand: 1.0,
            reserved: 0,
            slots: vec![None; PARKING_SLOTS],
            deliveries_received: 0,
            last_exit_time: f32::NEG_INFINITY,
        }
    }

    pub fn update(&mut self, delta_secs: f32) {
        self.demand = (self.demand + DEMAND_RATE * delta_secs).min(DEMAND_CAP);
    }

    /// Whole demand pins not yet covered by en-route vehicles.
    pub fn unmet_demand(&self) -> u32 {
        (self.demand.floor() as u32).saturating_sub(self.reserved)
    }

    pub fn free_slot(&self) -> Option<usize> {
        self.slots.iter().position(Option::is_none)
    }

    pub fn claim_slot(&mut self, vehicle: VehicleId) -> Option<usize> {
        let idx = self.free_slot()?;
        self.slots[idx] = Some(vehicle);
        Some(idx)
    }

    pub fn release_slot(&mut self, vehicle: VehicleId) {
        for slot in &mut self.slots {
            if *slot == Some(vehicle) {
                *slot = None;
            }
        }
    }

    /// Settle one delivery: the demand unit and its reservation are both
    /// consumed.
    pub fn receive_delivery(&mut self) {
        if self.demand >= 1.0 {
            self.demand -= 1.0;
        }
        self.reserved = self.reserved.saturating_sub(1);
        self.deliveries_received += 1;
    }

    /// World position of a parking slot, fanned out behind the building.
    pub fn slot_position(&self, idx: usize) -> super::types::Vec2 {
        slot_position(self.pos, self.exit, idx)
    }
}

/// A refueling facility with the same slot discipline as a business.
#[derive(Debug, Clone)]
pub struct Station {
    pub id: StationId,
    pub pos: GridPos,
    pub exit: Dir,
    pub slots: Vec<Option<VehicleId>>,
    pub refuels_completed: usize,
    pub last_exit_time: f32,
}

impl Station {
    pub fn new(id: StationId, pos: GridPos, exit: Dir) -> Self {
        Self {
            id,
            pos,
            exit,
            slots: vec![None; PARKING_SLOTS],
            refuels_completed: 0,
            last_exit_time: f32::NEG_INFINITY,
        }
    }

    pub fn free_slot(&self) -> Option<usize> {
        self.slots.iter().position(Option::is_none)
    }

    pub fn claim_slot(&mut self, vehicle: VehicleId) -> Option<usize> {
        let idx = self.free_slot()?;
        self.slots[idx] = Some(vehicle);
        Some(idx)
    }

    pub fn release_slot(&mut self, vehicle: VehicleId) {
        for slot in &mut self.slots {
            if *slot == Some(vehicle) {
                *slot = None;
            }
        }
    }

    pub fn slot_position(&self, idx: usize) -> super::types::Vec2 {
        slot_position(self.pos, self.exit, idx)
    }
}

/// Slots sit on the parking-lot side of the facility, opposite its exit,
/// spread perpendicular to the exit axis.
fn slot_position(pos: GridPos, exit: Dir, idx: usize) -> super::types::Vec2 {
    let lot = pos.step(exit.opposite()).center();
    let spread = (idx as f32 - (PARKING_SLOTS as f32 - 1.0) / 2.0) * 0.3;
    let n = pos.center().right_normal(&lot);
    super::types::Vec2::new(lot.x + n.x * spread, lot.y + n.y * spread)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::simulation::types::SimId;

    #[test]
    fn demand_accrues_and_caps() {
        let mut b = Business::new(
            BusinessId(SimId(1)),
            GridPos::new(2, 2),
            Dir::East,
            DemandColor::Blue,
        );
        let start = b.demand;
        b.update(10.0);
        assert!(b.demand > start);
        b.update(10_000.0);
        assert_eq!(b.demand, DEMAND_CAP);
    }

    #[test]
    fn reservations_reduce_unmet_demand() {
        let mut b = Business::new(
            BusinessId(SimId(1)),
            GridPos::new(2, 2),
            Dir::East,
            DemandColor::Blue,
        );
        b.demand = 3.0;
        assert_eq!(b.unmet_demand(), 3);
        b.reserved = 2;
        assert_eq!(b.unmet_demand(), 1);
        b.reserved = 5;
        assert_eq!(b.unmet_demand(), 0);
    }

    #[test]
    fn slots_hold_one_vehicle_each() {
        let mut b = Business::new(
            BusinessId(SimId(1)),
            GridPos::new(2, 2),
            Dir::East,
            DemandColor::Blue,
        );
        let mut claimed = Vec::new();
        for i in 0..PARKING_SLOTS {
            let v = VehicleId(SimId(i));
            claimed.push(b.claim_slot(v).expect("slot free"));
        }
        assert!(b.claim_slot(VehicleId(SimId(99))).is_none());
        b.release_slot(VehicleId(SimId(0)));
        assert!(b.free_slot().is_some());
    }

    #[test]
    fn delivery_decrements_demand_but_not_below_zero() {
        let mut b = Business::new(
            BusinessId(SimId(1)),
            GridPos::new(2, 2),
            Dir::East,
            DemandColor::Blue,
        );
        b.demand = 0.5;
        b.receive_delivery();
        assert_eq!(b.deliveries_received, 1);
        assert!(b.demand >= 0.0 && b.demand < 1.0);
    }
}
