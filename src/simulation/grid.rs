//! Road graph: the authoritative grid of cells and their connections
//!
//! Owns all cell mutation. Every structural change sets a dirty flag that
//! the world reconciles once per tick (path cache clear, intersection cache
//! rebuild, reroute of affected vehicles).

use log::debug;
use std::collections::HashMap;

use super::types::{Axis, BusinessId, Dir, DirSet, GridPos, HouseId, SimId, StationId};

/// One grid tile. Connection masks live only on roadway cells; buildings
/// are entered through their connector and exited through their exit
/// direction.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Cell {
    Empty,
    Obstacle,
    /// A plain road cell.
    Link { links: DirSet, pending_removal: bool },
    /// Buffer cell between a building and the network, permanently linked
    /// to its owner. The owner-facing bit survives all graph edits.
    Connector { links: DirSet, owner: SimId },
    House { owner: HouseId, exit: Dir },
    Business { owner: BusinessId, exit: Dir },
    Station { owner: StationId, exit: Dir },
    /// Slot area belonging to a business or station. Impassable.
    ParkingLot { owner: SimId },
}

impl Cell {
    /// The connection mask, empty for non-roadway cells.
    pub fn links(&self) -> DirSet {
        match self {
            Cell::Link { links, .. } | Cell::Connector { links, .. } => *links,
            _ => DirSet::EMPTY,
        }
    }

    pub fn is_roadway(&self) -> bool {
        matches!(self, Cell::Link { .. } | Cell::Connector { .. })
    }

    pub fn is_building(&self) -> bool {
        matches!(
            self,
            Cell::House { .. } | Cell::Business { .. } | Cell::Station { .. }
        )
    }

    pub fn is_pending_removal(&self) -> bool {
        matches!(
            self,
            Cell::Link {
                pending_removal: true,
                ..
            }
        )
    }

    /// Exit direction for building cells.
    pub fn exit_dir(&self) -> Option<Dir> {
        match self {
            Cell::House { exit, .. }
            | Cell::Business { exit, .. }
            | Cell::Station { exit, .. } => Some(*exit),
            _ => None,
        }
    }
}

/// Classification of an intersection cell, rebuilt whenever the graph is
/// reconciled. A cell is an intersection iff it has at least 3 cardinal
/// link connections; at a 3-way the pair of opposite directions forms the
/// major road.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct IntersectionInfo {
    pub approaches: DirSet,
    pub major_axis: Option<Axis>,
}

/// The road grid. Created once per session and never resized.
pub struct RoadGraph {
    width: i32,
    height: i32,
    cells: Vec<Cell>,
    dirty: bool,
    intersections: HashMap<GridPos, IntersectionInfo>,
}

impl RoadGraph {
    pub fn new(width: i32, height: i32) -> Self {
        Self {
            width,
            height,
            cells: vec![Cell::Empty; (width * height) as usize],
            dirty: false,
            intersections: HashMap::new(),
        }
    }

    pub fn width(&self) -> i32 {
        self.width
    }

    pub fn height(&self) -> i32 {
        self.height
    }

    pub fn in_bounds(&self, pos: GridPos) -> bool {
        pos.x >= 0 && pos.y >= 0 && pos.x < self.width && pos.y < self.height
    }

    fn index(&self, pos: GridPos) -> usize {
        (pos.y * self.width + pos.x) as usize
    }

    /// Cell lookup. Out-of-bounds positions read as Obstacle so traversal
    /// checks never need a separate bounds branch.
    pub fn cell(&self, pos: GridPos) -> Cell {
        if self.in_bounds(pos) {
            self.cells[self.index(pos)]
        } else {
            Cell::Obstacle
        }
    }

    fn cell_mut(&mut self, pos: GridPos) -> &mut Cell {
        let idx = self.index(pos);
        &mut self.cells[idx]
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    pub fn clear_dirty(&mut self) {
        self.dirty = false;
    }

    /// Highway edits route through the same reconciliation pass, so the
    /// flag is settable from outside.
    pub fn mark_dirty(&mut self) {
        self.dirty = true;
    }

    // ----- mutation API -----

    /// Place a link cell. Fails silently on occupied or out-of-bounds cells.
    pub fn place_link(&mut self, pos: GridPos) -> bool {
        if !self.in_bounds(pos) || self.cell(pos) != Cell::Empty {
            return false;
        }
        *self.cell_mut(pos) = Cell::Link {
            links: DirSet::EMPTY,
            pending_removal: false,
        };
        self.mark_dirty();
        true
    }

    pub fn place_obstacle(&mut self, pos: GridPos) -> bool {
        if !self.in_bounds(pos) || self.cell(pos) != Cell::Empty {
            return false;
        }
        *self.cell_mut(pos) = Cell::Obstacle;
        self.mark_dirty();
        true
    }

    /// Remove a link cell. When `defer` is set the cell is only marked
    /// pending removal; masks on both sides stay intact so a vehicle that
    /// is explicitly allowed across (`allow_pending`) can still cross it,
    /// while the pending flag keeps it out of every ordinary search. The
    /// owner sweeps it once unreferenced, and only the sweep detaches the
    /// neighbor bits.
    pub fn remove_link(&mut self, pos: GridPos, defer: bool) -> bool {
        let links = match self.cell(pos) {
            Cell::Link { links, .. } => links,
            _ => return false,
        };
        if defer {
            *self.cell_mut(pos) = Cell::Link {
                links,
                pending_removal: true,
            };
            debug!("link at {:?} marked pending removal", pos);
        } else {
            self.detach_neighbors(pos, links);
            *self.cell_mut(pos) = Cell::Empty;
        }
        self.mark_dirty();
        true
    }

    fn detach_neighbors(&mut self, pos: GridPos, links: DirSet) {
        for dir in links.iter() {
            let neighbor = pos.step(dir);
            match self.cell_mut_checked(neighbor) {
                Some(Cell::Link { links, .. }) | Some(Cell::Connector { links, .. }) => {
                    links.remove(dir.opposite());
                }
                _ => {}
            }
        }
    }

    /// Finalize a deferred removal once no vehicle references the cell.
    pub fn sweep_pending(&mut self, pos: GridPos) -> bool {
        match self.cell(pos) {
            Cell::Link {
                pending_removal: true,
                links,
            } => {
                self.detach_neighbors(pos, links);
                *self.cell_mut(pos) = Cell::Empty;
                self.mark_dirty();
                true
            }
            _ => false,
        }
    }

    /// Positions of all links currently pending removal.
    pub fn pending_cells(&self) -> Vec<GridPos> {
        let mut out = Vec::new();
        for y in 0..self.height {
            for x in 0..self.width {
                let pos = GridPos::new(x, y);
                if self.cell(pos).is_pending_removal() {
                    out.push(pos);
                }
            }
        }
        out
    }

    fn cell_mut_checked(&mut self, pos: GridPos) -> Option<&mut Cell> {
        if self.in_bounds(pos) {
            let idx = self.index(pos);
            Some(&mut self.cells[idx])
        } else {
            None
        }
    }

    /// Connect two roadway cells with symmetric bits. Must be 8-neighbors;
    /// fails if either cell is a building, empty, or pending removal.
    pub fn connect(&mut self, a: GridPos, b: GridPos) -> bool {
        let dir = match Dir::between(a, b) {
            Some(d) => d,
            None => return false,
        };
        let ok = self.cell(a).is_roadway()
            && self.cell(b).is_roadway()
            && !self.cell(a).is_pending_removal()
            && !self.cell(b).is_pending_removal();
        if !ok {
            return false;
        }
        if let Some(Cell::Link { links, .. }) | Some(Cell::Connector { links, .. }) =
            self.cell_mut_checked(a)
        {
            links.insert(dir);
        }
        if let Some(Cell::Link { links, .. }) | Some(Cell::Connector { links, .. }) =
            self.cell_mut_checked(b)
        {
            links.insert(dir.opposite());
        }
        self.mark_dirty();
        true
    }

    /// Remove the symmetric connection between two roadway cells. Building
    /// links cannot be severed this way: buildings carry no mask, so the
    /// permanent connector->building bit is out of reach by construction.
    pub fn disconnect(&mut self, a: GridPos, b: GridPos) -> bool {
        let dir = match Dir::between(a, b) {
            Some(d) => d,
            None => return false,
        };
        if !self.cell(a).is_roadway() || !self.cell(b).is_roadway() {
            return false;
        }
        if let Some(Cell::Link { links, .. }) | Some(Cell::Connector { links, .. }) =
            self.cell_mut_checked(a)
        {
            links.remove(dir);
        }
        if let Some(Cell::Link { links, .. }) | Some(Cell::Connector { links, .. }) =
            self.cell_mut_checked(b)
        {
            links.remove(dir.opposite());
        }
        self.mark_dirty();
        true
    }

    /// Place a building cell and its connector. The connector cell goes in
    /// the exit direction and receives a permanent one-sided bit toward the
    /// building. Both target cells must be empty.
    fn place_building(&mut self, pos: GridPos, exit: Dir, cell: Cell, owner: SimId) -> bool {
        let connector_pos = pos.step(exit);
        if !self.in_bounds(pos) || !self.in_bounds(connector_pos) {
            return false;
        }
        if self.cell(pos) != Cell::Empty || self.cell(connector_pos) != Cell::Empty {
            return false;
        }
        *self.cell_mut(pos) = cell;
        *self.cell_mut(connector_pos) = Cell::Connector {
            links: DirSet::single(exit.opposite()),
            owner,
        };
        self.mark_dirty();
        true
    }

    pub fn place_house(&mut self, pos: GridPos, exit: Dir, owner: HouseId) -> bool {
        self.place_building(pos, exit, Cell::House { owner, exit }, owner.0)
    }

    pub fn place_business(&mut self, pos: GridPos, exit: Dir, owner: BusinessId) -> bool {
        if !self.place_building(pos, exit, Cell::Business { owner, exit }, owner.0) {
            return false;
        }
        // Optional slot area behind the business, when the cell is free.
        let lot = pos.step(exit.opposite());
        if self.in_bounds(lot) && self.cell(lot) == Cell::Empty {
            *self.cell_mut(lot) = Cell::ParkingLot { owner: owner.0 };
        }
        true
    }

    pub fn place_station(&mut self, pos: GridPos, exit: Dir, owner: StationId) -> bool {
        if !self.place_building(pos, exit, Cell::Station { owner, exit }, owner.0) {
            return false;
        }
        let lot = pos.step(exit.opposite());
        if self.in_bounds(lot) && self.cell(lot) == Cell::Empty {
            *self.cell_mut(lot) = Cell::ParkingLot { owner: owner.0 };
        }
        true
    }

    /// Remove a building, its connector and any parking lot cells it owns.
    pub fn remove_facility(&mut self, pos: GridPos) -> bool {
        let (owner, exit) = match self.cell(pos) {
            Cell::House { owner, exit } => (owner.0, exit),
            Cell::Business { owner, exit } => (owner.0, exit),
            Cell::Station { owner, exit } => (owner.0, exit),
            _ => return false,
        };
        let connector_pos = pos.step(exit);
        // Detach the connector from the network before clearing it.
        if let Cell::Connector { links, .. } = self.cell(connector_pos) {
            for dir in links.iter() {
                let neighbor = connector_pos.step(dir);
                if let Some(Cell::Link { links, .. }) | Some(Cell::Connector { links, .. }) =
                    self.cell_mut_checked(neighbor)
                {
                    links.remove(dir.opposite());
                }
            }
            *self.cell_mut(connector_pos) = Cell::Empty;
        }
        *self.cell_mut(pos) = Cell::Empty;
        for dir in Dir::ALL {
            let p = pos.step(dir);
            if self.cell(p) == (Cell::ParkingLot { owner }) {
                *self.cell_mut(p) = Cell::Empty;
            }
        }
        self.mark_dirty();
        true
    }

    // ----- queries -----

    /// Whether a vehicle may stand on / travel through this cell.
    pub fn is_traversable(&self, pos: GridPos, allow_pending: bool) -> bool {
        match self.cell(pos) {
            Cell::Link {
                pending_removal, ..
            } => !pending_removal || allow_pending,
            Cell::Connector { .. } => true,
            _ => false,
        }
    }

    /// Whether the connection bit from `from` toward `to` is set (building
    /// exits count as connected toward their connector, and connectors
    /// toward their building).
    pub fn is_connected(&self, from: GridPos, to: GridPos) -> bool {
        let dir = match Dir::between(from, to) {
            Some(d) => d,
            None => return false,
        };
        match self.cell(from) {
            Cell::Link { links, .. } | Cell::Connector { links, .. } => links.contains(dir),
            c if c.is_building() => c.exit_dir() == Some(dir),
            _ => false,
        }
    }

    // ----- intersection classification cache -----

    /// Rebuild the intersection classification for the whole grid. Called
    /// by the owner on dirty reconciliation, never mid-tick.
    pub fn rebuild_intersections(&mut self) {
        self.intersections.clear();
        for y in 0..self.height {
            for x in 0..self.width {
                let pos = GridPos::new(x, y);
                let links = match self.cell(pos) {
                    Cell::Link { links, .. } => links,
                    _ => continue,
                };
                let mut approaches = DirSet::EMPTY;
                for dir in Dir::CARDINAL {
                    if links.contains(dir) && self.cell(pos.step(dir)).is_roadway() {
                        approaches.insert(dir);
                    }
                }
                if approaches.cardinal_len() < 3 {
                    continue;
                }
                let major_axis = if approaches.cardinal_len() == 3 {
                    if approaches.contains(Dir::North) && approaches.contains(Dir::South) {
                        Some(Axis::NorthSouth)
                    } else if approaches.contains(Dir::East) && approaches.contains(Dir::West) {
                        Some(Axis::EastWest)
                    } else {
                        None
                    }
                } else {
                    None
                };
                self.intersections.insert(
                    pos,
                    IntersectionInfo {
                        approaches,
                        major_axis,
                    },
                );
            }
        }
    }

    pub fn is_intersection(&self, pos: GridPos) -> bool {
        self.intersections.contains_key(&pos)
    }

    pub fn intersection_info(&self, pos: GridPos) -> Option<&IntersectionInfo> {
        self.intersections.get(&pos)
    }

    pub fn intersection_count(&self) -> usize {
        self.intersections.len()
    }

    pub fn link_count(&self) -> usize {
        self.cells
            .iter()
            .filter(|c| matches!(c, Cell::Link { .. }))
            .count()
    }
}
