//! Grid traffic simulation core
//!
//! All simulation logic lives here and runs headless; the binary only
//! drives ticks and prints. Entities are stored in id-keyed maps on
//! `SimWorld` and every per-tick iteration runs in sorted id order, so a
//! run is fully determined by its seed and edit sequence.

mod buildings;
mod dispatch;
mod edits;
mod game_state;
mod grid;
mod highway;
mod mover;
mod parking;
mod pathfind;
mod smooth;
mod traffic;
mod types;
mod vehicle;
mod world;

// Re-export public types for external use
// These may not be used within this crate but are part of the public API
#[allow(unused_imports)]
pub use buildings::{Business, House, Station};
#[allow(unused_imports)]
pub use game_state::{
    Budget, FreeBudget, GameState, COST_BUSINESS, COST_HIGHWAY, COST_HOUSE, COST_LINK,
    COST_STATION, GOAL_DELIVERIES, GOAL_MONEY, REVENUE_DELIVERY, STARTING_BUDGET,
};
#[allow(unused_imports)]
pub use grid::{Cell, IntersectionInfo, RoadGraph};
#[allow(unused_imports)]
pub use highway::Highway;
#[allow(unused_imports)]
pub use mover::{owned_key, MoveResult};
#[allow(unused_imports)]
pub use parking::ParkEvent;
#[allow(unused_imports)]
pub use pathfind::{path_cost, PathStep, Pathfinder};
#[allow(unused_imports)]
pub use smooth::SmoothPath;
#[allow(unused_imports)]
pub use traffic::{
    lane_key, maneuver, maneuvers_conflict, IntersectionEntry, LaneKey, Maneuver, TrafficIndex,
};
#[allow(unused_imports)]
pub use types::{
    Axis, BusinessId, DemandColor, Dir, DirSet, GridPos, HighwayId, HouseId, SimId, StationId,
    Vec2, VehicleId, BASE_SPEED, DISPATCH_INTERVAL, FUEL_CAPACITY, FUEL_PER_CELL,
    FUEL_RESERVE_MARGIN, HIGHWAY_SPEED_MULTIPLIER, HOUSE_POOL_SIZE,
    INTERSECTION_DEADLOCK_TIMEOUT, PARKING_SLOTS,
};
#[allow(unused_imports)]
pub use vehicle::{ParkedAt, RouteIntent, Vehicle, VehicleState};
pub use world::{SimStats, SimWorld};
