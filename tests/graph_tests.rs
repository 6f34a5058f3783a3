//! Road graph and pathfinding validation tests

use std::collections::HashMap;

use trafficgrid::simulation::{
    Dir, GridPos, Highway, HighwayId, PathStep, Pathfinder, RoadGraph, SimId, Vec2,
};

fn straight_road(graph: &mut RoadGraph, y: i32, x0: i32, x1: i32) {
    for x in x0..=x1 {
        graph.place_link(GridPos::new(x, y));
    }
    for x in x0..x1 {
        graph.connect(GridPos::new(x, y), GridPos::new(x + 1, y));
    }
}

/// Every consecutive pair of grid steps must be adjacent with the
/// connection bit set in the traversal direction; highway steps must
/// reference a live highway with matching endpoints.
fn assert_path_legal(
    path: &[PathStep],
    graph: &RoadGraph,
    highways: &HashMap<HighwayId, Highway>,
) {
    for w in path.windows(2) {
        match (&w[0], &w[1]) {
            (PathStep::Cell(a), PathStep::Cell(b)) => {
                assert!(a.is_adjacent(b), "steps {:?} -> {:?} not adjacent", a, b);
                assert!(
                    graph.is_connected(*a, *b),
                    "no connection bit {:?} -> {:?}",
                    a,
                    b
                );
            }
            (_, PathStep::Highway { id, from, to }) => {
                let hw = highways.get(id).expect("highway step without highway");
                assert!(hw.connects(*from, *to));
            }
            (PathStep::Highway { to, .. }, PathStep::Cell(b)) => {
                assert!(to.is_adjacent(b) || to == b);
            }
        }
    }
}

#[test]
fn test_paths_are_legal() {
    let mut graph = RoadGraph::new(20, 10);
    straight_road(&mut graph, 2, 1, 18);
    straight_road(&mut graph, 7, 1, 18);
    for y in 2..7 {
        graph.place_link(GridPos::new(9, y));
    }
    for y in 2..6 {
        graph.connect(GridPos::new(9, y), GridPos::new(9, y + 1));
    }
    graph.connect(GridPos::new(9, 6), GridPos::new(9, 7));
    graph.rebuild_intersections();

    let highways = HashMap::new();
    let mut pf = Pathfinder::new();
    for (from, to) in [
        (GridPos::new(1, 2), GridPos::new(18, 7)),
        (GridPos::new(18, 2), GridPos::new(1, 7)),
        (GridPos::new(5, 2), GridPos::new(5, 2)),
    ] {
        let path = pf
            .find_path(&graph, &highways, from, to, false)
            .expect("route exists");
        assert_eq!(path.first().map(PathStep::pos), Some(from));
        assert_eq!(path.last().map(PathStep::pos), Some(to));
        assert_path_legal(&path, &graph, &highways);
    }
}

#[test]
fn test_highway_shortcut_is_taken_and_legal() {
    let mut graph = RoadGraph::new(40, 6);
    straight_road(&mut graph, 2, 1, 38);
    graph.rebuild_intersections();

    let mut highways = HashMap::new();
    let id = HighwayId(SimId(0));
    // Nearly straight span, far cheaper than 30 surface cells.
    highways.insert(
        id,
        Highway::new(
            id,
            GridPos::new(4, 2),
            GridPos::new(34, 2),
            Vec2::new(14.0, 2.5),
            Vec2::new(24.0, 2.5),
        ),
    );

    let mut pf = Pathfinder::new();
    let path = pf
        .find_path(&graph, &highways, GridPos::new(1, 2), GridPos::new(38, 2), false)
        .expect("route exists");
    assert!(
        path.iter()
            .any(|s| matches!(s, PathStep::Highway { id: hid, .. } if *hid == id)),
        "path ignored the shortcut"
    );
    assert_path_legal(&path, &graph, &highways);
}

#[test]
fn test_cache_is_dropped_on_invalidation() {
    let mut graph = RoadGraph::new(12, 4);
    straight_road(&mut graph, 1, 1, 10);
    let highways = HashMap::new();
    let mut pf = Pathfinder::new();

    let from = GridPos::new(1, 1);
    let to = GridPos::new(10, 1);
    let first = pf.find_path(&graph, &highways, from, to, false);
    let second = pf.find_path(&graph, &highways, from, to, false);
    assert_eq!(first, second);
    assert!(first.is_some());

    // Sever the only route; a stale cache entry would still answer.
    graph.remove_link(GridPos::new(5, 1), false);
    pf.invalidate();
    assert!(pf.find_path(&graph, &highways, from, to, false).is_none());
}

#[test]
fn test_pending_removal_blocks_only_new_routes() {
    let mut graph = RoadGraph::new(12, 4);
    straight_road(&mut graph, 1, 1, 10);
    let highways = HashMap::new();
    let mut pf = Pathfinder::new();

    graph.remove_link(GridPos::new(5, 1), true);
    let from = GridPos::new(1, 1);
    let to = GridPos::new(10, 1);
    assert!(pf.find_path(&graph, &highways, from, to, false).is_none());
    // Homebound traffic may still cross the doomed cell.
    assert!(pf.find_path(&graph, &highways, from, to, true).is_some());
}

#[test]
fn test_place_then_remove_restores_connectivity() {
    let mut graph = RoadGraph::new(8, 8);
    straight_road(&mut graph, 3, 2, 6);
    let before: Vec<_> = (2..=6)
        .map(|x| graph.cell(GridPos::new(x, 3)).links())
        .collect();

    // Branch off and immediately remove it again.
    let spur = GridPos::new(4, 4);
    graph.place_link(spur);
    graph.connect(GridPos::new(4, 3), spur);
    graph.remove_link(spur, false);

    let after: Vec<_> = (2..=6)
        .map(|x| graph.cell(GridPos::new(x, 3)).links())
        .collect();
    assert_eq!(before, after, "residual connection bits after removal");
    assert!(!graph.cell(spur).is_roadway());
}

#[test]
fn test_edits_reject_illegal_operations() {
    let mut graph = RoadGraph::new(8, 8);
    graph.place_link(GridPos::new(2, 2));
    graph.place_link(GridPos::new(5, 5));

    // Non-adjacent connect, double placement, out-of-bounds placement.
    assert!(!graph.connect(GridPos::new(2, 2), GridPos::new(5, 5)));
    assert!(!graph.place_link(GridPos::new(2, 2)));
    assert!(!graph.place_link(GridPos::new(-1, 3)));
    assert!(!graph.remove_link(GridPos::new(3, 3), false));
}

#[test]
fn test_building_paths_respect_exit_direction() {
    use trafficgrid::simulation::HouseId;

    let mut graph = RoadGraph::new(12, 6);
    straight_road(&mut graph, 3, 1, 10);
    let hid = HouseId(SimId(7));
    graph.place_house(GridPos::new(5, 1), Dir::South, hid);
    graph.connect(GridPos::new(5, 2), GridPos::new(5, 3));
    graph.rebuild_intersections();

    let highways = HashMap::new();
    let mut pf = Pathfinder::new();
    let path = pf
        .find_path(&graph, &highways, GridPos::new(5, 1), GridPos::new(9, 3), false)
        .expect("route from house");
    // First hop must go through the exit connector, never sideways.
    assert_eq!(path[1], PathStep::Cell(GridPos::new(5, 2)));
}
