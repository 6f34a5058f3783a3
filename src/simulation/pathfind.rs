//! A* pathfinding over the cell grid plus highway shortcut edges
//!
//! Stateless per call apart from the memoization cache, which the world
//! invalidates wholesale on any graph mutation.

use log::trace;
use pathfinding::prelude::astar;
use std::collections::HashMap;

use super::grid::{Cell, RoadGraph};
use super::highway::Highway;
use super::types::{Dir, GridPos, HighwayId, HIGHWAY_SPEED_MULTIPLIER};

/// Edge weights are centi-cells so the search runs on integers: 100 for a
/// cardinal move, 141 for a diagonal.
const CARDINAL_COST: u32 = 100;
const DIAGONAL_COST: u32 = 141;

/// One step of a returned path. A highway step lands at its `to` anchor;
/// the preceding step is always `Cell(from)`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum PathStep {
    Cell(GridPos),
    Highway {
        id: HighwayId,
        from: GridPos,
        to: GridPos,
    },
}

impl PathStep {
    /// The grid cell this step lands on.
    pub fn pos(&self) -> GridPos {
        match self {
            PathStep::Cell(p) => *p,
            PathStep::Highway { to, .. } => *to,
        }
    }
}

/// Total traversal cost of a path in cells, with highway steps discounted
/// by the speed multiplier. Used for fuel estimates.
pub fn path_cost(path: &[PathStep], highways: &HashMap<HighwayId, Highway>) -> f32 {
    let mut cost = 0.0;
    for w in path.windows(2) {
        match w[1] {
            PathStep::Cell(to) => {
                if let Some(dir) = Dir::between(w[0].pos(), to) {
                    cost += dir.length();
                }
            }
            PathStep::Highway { id, .. } => {
                if let Some(hw) = highways.get(&id) {
                    cost += hw.length() / HIGHWAY_SPEED_MULTIPLIER;
                }
            }
        }
    }
    cost
}

type CacheKey = (GridPos, GridPos, bool);

/// A* searcher with a per-(origin, destination, allow-pending) result cache.
#[derive(Default)]
pub struct Pathfinder {
    cache: HashMap<CacheKey, Option<Vec<PathStep>>>,
}

impl Pathfinder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drop all memoized results. Called on every graph mutation.
    pub fn invalidate(&mut self) {
        self.cache.clear();
    }

    #[cfg(test)]
    pub fn cached_entries(&self) -> usize {
        self.cache.len()
    }

    /// Find a legal path from `from` to `to`. Returns `None` when the goal
    /// is unreachable; never an error. `allow_pending` lets return-trip
    /// searches cross cells marked for removal.
    pub fn find_path(
        &mut self,
        graph: &RoadGraph,
        highways: &HashMap<HighwayId, Highway>,
        from: GridPos,
        to: GridPos,
        allow_pending: bool,
    ) -> Option<Vec<PathStep>> {
        let key = (from, to, allow_pending);
        if let Some(cached) = self.cache.get(&key) {
            return cached.clone();
        }

        let result = self.search(graph, highways, from, to, allow_pending);
        trace!(
            "path {:?} -> {:?}: {}",
            from,
            to,
            match &result {
                Some(p) => format!("{} steps", p.len()),
                None => "unreachable".to_string(),
            }
        );
        self.cache.insert(key, result.clone());
        result
    }

    fn search(
        &self,
        graph: &RoadGraph,
        highways: &HashMap<HighwayId, Highway>,
        from: GridPos,
        to: GridPos,
        allow_pending: bool,
    ) -> Option<Vec<PathStep>> {
        if from == to {
            return Some(vec![PathStep::Cell(from)]);
        }

        let successors = |pos: &GridPos| -> Vec<(GridPos, u32)> {
            let mut out = Vec::new();
            let cell = graph.cell(*pos);
            match cell {
                Cell::Link { links, .. } | Cell::Connector { links, .. } => {
                    for dir in links.iter() {
                        let next = pos.step(dir);
                        let legal = match graph.cell(next) {
                            Cell::Link {
                                pending_removal, ..
                            } => !pending_removal || allow_pending,
                            Cell::Connector { .. } => true,
                            // Buildings are enterable only as the goal.
                            c if c.is_building() => next == to,
                            _ => false,
                        };
                        if legal {
                            let cost = if dir.is_cardinal() {
                                CARDINAL_COST
                            } else {
                                DIAGONAL_COST
                            };
                            out.push((next, cost));
                        }
                    }
                }
                c if c.is_building() => {
                    // Exit only toward the designated connector.
                    if let Some(exit) = c.exit_dir() {
                        let next = pos.step(exit);
                        if matches!(graph.cell(next), Cell::Connector { .. }) {
                            out.push((next, CARDINAL_COST));
                        }
                    }
                }
                _ => {}
            }
            // Highway edges attach to any link cell that anchors one.
            if matches!(cell, Cell::Link { .. }) {
                for hw in highways.values() {
                    if let Some(other) = hw.other_end(*pos) {
                        if graph.is_traversable(other, allow_pending) {
                            let cost = (hw.travel_cost() * 100.0).max(1.0) as u32;
                            out.push((other, cost));
                        }
                    }
                }
            }
            out
        };

        // Octile distance, divided by the highway multiplier so shortcut
        // edges cannot make the heuristic inadmissible.
        let heuristic = |pos: &GridPos| -> u32 {
            (pos.octile(&to) * 100.0 / HIGHWAY_SPEED_MULTIPLIER) as u32
        };

        let (nodes, _cost) = astar(&from, successors, heuristic, |pos| *pos == to)?;

        // Re-derive step kinds: non-adjacent hops were highway edges.
        let mut steps = Vec::with_capacity(nodes.len());
        steps.push(PathStep::Cell(nodes[0]));
        for w in nodes.windows(2) {
            if w[0].is_adjacent(&w[1]) {
                steps.push(PathStep::Cell(w[1]));
            } else {
                let hw = highways.values().find(|h| h.connects(w[0], w[1]))?;
                steps.push(PathStep::Highway {
                    id: hw.id,
                    from: w[0],
                    to: w[1],
                });
            }
        }
        Some(steps)
    }
}
