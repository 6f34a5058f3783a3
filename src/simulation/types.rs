//! Core types for the grid traffic simulation
//!
//! Standalone ids, grid coordinates, directions and tunable constants.

/// A unique identifier for simulation entities
/// This is a simple wrapper around a usize for type safety
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SimId(pub usize);

/// A wrapper type for vehicle IDs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct VehicleId(pub SimId);

/// A wrapper type for house IDs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct HouseId(pub SimId);

/// A wrapper type for business IDs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BusinessId(pub SimId);

/// A wrapper type for gas station IDs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StationId(pub SimId);

/// A wrapper type for highway IDs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct HighwayId(pub SimId);

/// Demand category shared by houses and businesses. A house only serves
/// businesses of its own color.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DemandColor {
    Red,
    Blue,
    Green,
    Yellow,
}

/// A cell coordinate on the grid. `y` grows southwards.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct GridPos {
    pub x: i32,
    pub y: i32,
}

impl GridPos {
    pub fn new(x: i32, y: i32) -> Self {
        Self { x, y }
    }

    pub fn step(&self, dir: Dir) -> GridPos {
        let (dx, dy) = dir.delta();
        GridPos::new(self.x + dx, self.y + dy)
    }

    /// Octile distance in cells, matching the pathfinder's cost model.
    pub fn octile(&self, other: &GridPos) -> f32 {
        let dx = (self.x - other.x).abs() as f32;
        let dy = (self.y - other.y).abs() as f32;
        let (lo, hi) = if dx < dy { (dx, dy) } else { (dy, dx) };
        hi + (std::f32::consts::SQRT_2 - 1.0) * lo
    }

    pub fn center(&self) -> Vec2 {
        Vec2::new(self.x as f32 + 0.5, self.y as f32 + 0.5)
    }

    /// True when `other` is one of the 8 surrounding cells.
    pub fn is_adjacent(&self, other: &GridPos) -> bool {
        let dx = (self.x - other.x).abs();
        let dy = (self.y - other.y).abs();
        dx <= 1 && dy <= 1 && (dx, dy) != (0, 0)
    }
}

/// A 2D point in world units (one cell = one unit), used for rendering
/// positions and arc-length geometry.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Vec2 {
    pub x: f32,
    pub y: f32,
}

impl Vec2 {
    pub fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }

    pub fn distance(&self, other: &Vec2) -> f32 {
        let dx = self.x - other.x;
        let dy = self.y - other.y;
        (dx * dx + dy * dy).sqrt()
    }

    pub fn lerp(&self, other: &Vec2, t: f32) -> Vec2 {
        Vec2::new(
            self.x + (other.x - self.x) * t,
            self.y + (other.y - self.y) * t,
        )
    }

    /// Heading angle from this point toward another, in radians.
    pub fn angle_to(&self, other: &Vec2) -> f32 {
        (other.y - self.y).atan2(other.x - self.x)
    }

    /// Unit vector perpendicular to the segment self->other, pointing to the
    /// driving right (y grows southwards, so right of (dx,dy) is (-dy,dx)).
    pub fn right_normal(&self, other: &Vec2) -> Vec2 {
        let dx = other.x - self.x;
        let dy = other.y - self.y;
        let len = (dx * dx + dy * dy).sqrt();
        if len > 1e-6 {
            Vec2::new(-dy / len, dx / len)
        } else {
            Vec2::default()
        }
    }
}

/// The eight travel directions, in clockwise order starting at North.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Dir {
    North,
    NorthEast,
    East,
    SouthEast,
    South,
    SouthWest,
    West,
    NorthWest,
}

/// The axis of a cardinal direction, used for T-junction major/minor roads.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Axis {
    NorthSouth,
    EastWest,
}

impl Dir {
    pub const ALL: [Dir; 8] = [
        Dir::North,
        Dir::NorthEast,
        Dir::East,
        Dir::SouthEast,
        Dir::South,
        Dir::SouthWest,
        Dir::West,
        Dir::NorthWest,
    ];

    pub const CARDINAL: [Dir; 4] = [Dir::North, Dir::East, Dir::South, Dir::West];

    pub fn index(&self) -> u8 {
        match self {
            Dir::North => 0,
            Dir::NorthEast => 1,
            Dir::East => 2,
            Dir::SouthEast => 3,
            Dir::South => 4,
            Dir::SouthWest => 5,
            Dir::West => 6,
            Dir::NorthWest => 7,
        }
    }

    pub fn from_index(index: u8) -> Dir {
        Dir::ALL[(index % 8) as usize]
    }

    pub fn delta(&self) -> (i32, i32) {
        match self {
            Dir::North => (0, -1),
            Dir::NorthEast => (1, -1),
            Dir::East => (1, 0),
            Dir::SouthEast => (1, 1),
            Dir::South => (0, 1),
            Dir::SouthWest => (-1, 1),
            Dir::West => (-1, 0),
            Dir::NorthWest => (-1, -1),
        }
    }

    pub fn opposite(&self) -> Dir {
        Dir::from_index(self.index() + 4)
    }

    pub fn is_cardinal(&self) -> bool {
        self.index() % 2 == 0
    }

    /// Segment length in cells when stepping this direction.
    pub fn length(&self) -> f32 {
        if self.is_cardinal() {
            1.0
        } else {
            std::f32::consts::SQRT_2
        }
    }

    pub fn axis(&self) -> Option<Axis> {
        match self {
            Dir::North | Dir::South => Some(Axis::NorthSouth),
            Dir::East | Dir::West => Some(Axis::EastWest),
            _ => None,
        }
    }

    /// The travel direction of a vehicle approaching from this direction's
    /// right-hand side. A northbound vehicle yields to westbound traffic.
    pub fn yield_to(&self) -> Dir {
        Dir::from_index(self.index() + 6)
    }

    /// Direction between two 8-adjacent cells.
    pub fn between(from: GridPos, to: GridPos) -> Option<Dir> {
        let d = (to.x - from.x, to.y - from.y);
        Dir::ALL.iter().copied().find(|dir| dir.delta() == d)
    }

    /// Direction of a straight run between two cells at any distance, as
    /// long as they share a row, column, or exact diagonal.
    pub fn between_aligned(from: GridPos, to: GridPos) -> Option<Dir> {
        let (dx, dy) = (to.x - from.x, to.y - from.y);
        if dx == 0 && dy == 0 {
            return None;
        }
        let aligned = dx == 0 || dy == 0 || dx.abs() == dy.abs();
        if !aligned {
            return None;
        }
        Dir::between(from, GridPos::new(from.x + dx.signum(), from.y + dy.signum()))
    }
}

/// An explicit bitset over the 8 directions, backing each cell's
/// connection mask.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DirSet(pub u8);

impl DirSet {
    pub const EMPTY: DirSet = DirSet(0);

    pub fn single(dir: Dir) -> DirSet {
        DirSet(1 << dir.index())
    }

    pub fn contains(&self, dir: Dir) -> bool {
        self.0 & (1 << dir.index()) != 0
    }

    pub fn insert(&mut self, dir: Dir) {
        self.0 |= 1 << dir.index();
    }

    pub fn remove(&mut self, dir: Dir) {
        self.0 &= !(1 << dir.index());
    }

    pub fn is_empty(&self) -> bool {
        self.0 == 0
    }

    pub fn len(&self) -> u32 {
        self.0.count_ones()
    }

    pub fn iter(&self) -> impl Iterator<Item = Dir> + '_ {
        Dir::ALL.iter().copied().filter(|d| self.contains(*d))
    }

    /// Count of cardinal connections, which decides intersection status.
    pub fn cardinal_len(&self) -> u32 {
        Dir::CARDINAL.iter().filter(|d| self.contains(**d)).count() as u32
    }
}

// ----- tunable constants -----

/// Base vehicle speed in cells per second.
pub const BASE_SPEED: f32 = 2.0;
/// Speed multiplier while traversing a highway edge.
pub const HIGHWAY_SPEED_MULTIPLIER: f32 = 2.5;
/// Speed multiplier while crossing an intersection cell.
pub const INTERSECTION_SLOWDOWN: f32 = 0.55;
/// Speed multiplier while crossing a connector cell.
pub const CONNECTOR_SLOWDOWN: f32 = 0.6;

/// Minimum bumper gap to a leader, in cells.
pub const MIN_GAP: f32 = 0.35;
/// Gap below which a follower starts slowing down, in cells.
pub const COMFORT_GAP: f32 = 0.9;

/// Distance before an intersection entry at which a yielding vehicle stops.
pub const YIELD_STOP_DISTANCE: f32 = 0.25;
/// Distance over which a yielding vehicle decelerates toward the stop point.
pub const YIELD_SLOW_DISTANCE: f32 = 1.25;

/// Seconds of forced yielding after which passage is granted unconditionally.
pub const INTERSECTION_DEADLOCK_TIMEOUT: f32 = 6.0;
/// Seconds of same-lane blockage after which a follower pushes on.
pub const LANE_DEADLOCK_TIMEOUT: f32 = 8.0;
/// Tiles scanned along the major road when a minor road waits for a gap.
pub const GAP_SCAN_TILES: i32 = 3;

/// Seconds spent unloading at a business.
pub const UNLOAD_TIME: f32 = 2.0;
/// Seconds spent refueling at a station.
pub const REFUEL_TIME: f32 = 3.0;
/// Minimum seconds between two departures from the same facility.
pub const EXIT_COOLDOWN: f32 = 1.0;
/// Seconds taken by a parking-in or parking-out maneuver.
pub const PARK_MANEUVER_TIME: f32 = 1.2;

/// Seconds between dispatcher passes.
pub const DISPATCH_INTERVAL: f32 = 0.5;

/// Fuel tank capacity, in fuel units.
pub const FUEL_CAPACITY: f32 = 60.0;
/// Fuel burned per cell of grid travel. Highway travel is discounted by
/// the highway speed multiplier.
pub const FUEL_PER_CELL: f32 = 1.0;
/// Safety factor applied to trip cost when deciding whether to refuel first.
pub const FUEL_RESERVE_MARGIN: f32 = 1.25;

/// Maximum undelivered demand units a business accumulates.
pub const DEMAND_CAP: f32 = 5.0;
/// Demand units accrued per second at a business.
pub const DEMAND_RATE: f32 = 0.12;

/// Idle vehicles owned by each house.
pub const HOUSE_POOL_SIZE: usize = 2;
/// Parking slots per business or station.
pub const PARKING_SLOTS: usize = 3;

/// Perpendicular lane displacement from cell centers, in cells.
pub const LANE_OFFSET: f32 = 0.18;
/// Corner rounding radius for the smoothed path, in cells.
pub const CORNER_RADIUS: f32 = 0.35;
