use rt_common::db::core::{ConnectType, LayerDirection, NetlistDB, SpacingRule};
use rt_common::db::gcell::GCellAxis;
use rt_common::db::indices::NetId;
use rt_common::error::ConfigError;
use rt_common::geom::coord::GridCoord;
use rt_common::geom::rect::{LayerRect, Rect};
use rt_common::geom::segment::Segment;
use rt_common::util::config::{Config, Stage, TrackAssignmentConfig};
use rt_common::util::generator::generate_random_design;
use rt_router::global_router::CoarseTree;
use rt_router::grid::TrackOccupancy;
use rt_router::task::{GCellBox, PriorityKey};
use rt_router::track_assigner::{TrackAssignTask, TrackAssigner};
use rt_router::violation_repair::RepairState;
use rt_router::{RouteError, RouterError, route};
use std::collections::BTreeSet;

/// Horizontal M1 and vertical M2 on a unit grid: every GCell holds exactly
/// one track per layer.
fn unit_design(die: i32) -> NetlistDB {
    let area = Rect::from_coords(0, 0, die, die);
    let mut db = NetlistDB::new(area, GCellAxis::uniform(area, 1).unwrap());
    db.add_layer("M1", LayerDirection::Horizontal, 1, 1, SpacingRule::new(1), 0);
    db.add_layer("M2", LayerDirection::Vertical, 1, 1, SpacingRule::new(1), 0);
    db
}

/// A single horizontal layer with one track per GCell row.
fn one_track_design() -> NetlistDB {
    let area = Rect::from_coords(0, 0, 40, 10);
    let mut db = NetlistDB::new(area, GCellAxis::uniform(area, 10).unwrap());
    db.add_layer("M1", LayerDirection::Horizontal, 10, 4, SpacingRule::new(4), 0);
    db
}

fn planar_edges(trees: &[CoarseTree]) -> u64 {
    trees
        .iter()
        .map(|t| t.edges.iter().filter(|e| e.is_planar()).count() as u64)
        .sum()
}

fn dot(x: i32, y: i32) -> Vec<LayerRect> {
    vec![LayerRect::new(0, Rect::from_coords(x, y, x + 1, y + 1))]
}

fn stages(list: &[Stage]) -> Config {
    let mut config = Config::default();
    config.flow.stages = list.to_vec();
    config
}

#[test]
fn three_pin_net_takes_the_shortest_tree() {
    let mut db = unit_design(11);
    let n = db.add_net("n0", ConnectType::Signal);
    db.add_pin(n, "a", dot(0, 0));
    db.add_pin(n, "b", dot(10, 0));
    db.add_pin(n, "c", dot(10, 10));

    let outcome = route(&db, &stages(&[Stage::GlobalRoute])).unwrap();
    assert_eq!(outcome.trees.len(), 1);
    let tree = &outcome.trees[0];
    // East on M1, north on M2.
    assert_eq!(tree.wirelength(), 20);
    assert_eq!(tree.via_count(), 2);
    assert_eq!(outcome.summary.grid_demand, 20);
    assert_eq!(outcome.summary.routed, 1);
    assert!(outcome.summary.excluded.is_empty());
}

#[test]
fn single_pin_net_routes_to_an_empty_tree() {
    let mut db = unit_design(11);
    let n = db.add_net("lonely", ConnectType::Signal);
    db.add_pin(n, "a", dot(3, 3));

    let outcome = route(&db, &stages(&[Stage::GlobalRoute])).unwrap();
    assert_eq!(outcome.trees.len(), 1);
    assert!(outcome.trees[0].segments.is_empty());
    assert_eq!(outcome.summary.routed, 1);
}

#[test]
fn empty_design_is_rejected() {
    let db = unit_design(11);
    assert!(matches!(
        route(&db, &Config::default()),
        Err(RouterError::EmptyDesign)
    ));
}

#[test]
fn stage_without_its_input_is_rejected() {
    let mut db = unit_design(11);
    let n = db.add_net("n0", ConnectType::Signal);
    db.add_pin(n, "a", dot(0, 0));

    let err = route(&db, &stages(&[Stage::PinAccess, Stage::TrackAssign])).unwrap_err();
    assert!(matches!(
        err,
        RouterError::Config(ConfigError::MissingDependency {
            stage: Stage::TrackAssign,
            requires: Stage::GlobalRoute,
        })
    ));
}

#[test]
fn full_flow_accounts_for_every_net() {
    let db = generate_random_design(40, 1200, 3, 11).unwrap();
    let outcome = route(&db, &Config::default()).unwrap();

    let routed: BTreeSet<_> = outcome.geometry.iter().map(|g| g.net).collect();
    let excluded: BTreeSet<_> = outcome.summary.excluded.iter().map(|e| e.net).collect();
    assert!(routed.is_disjoint(&excluded));
    assert_eq!(routed.len() + excluded.len(), db.nets.len());
    assert_eq!(outcome.summary.routed, routed.len());
    assert_eq!(outcome.stats.len(), Stage::ALL.len());
    assert!(
        outcome.summary.broken.is_empty(),
        "open or looped nets: {:?}",
        outcome.summary.broken
    );

    // Excluded and escalated nets gave their demand back.
    assert_eq!(outcome.summary.grid_demand, planar_edges(&outcome.trees));
    let with_tree: BTreeSet<_> = outcome.trees.iter().map(|t| t.net).collect();
    assert!(with_tree.is_disjoint(&excluded));

    for record in &outcome.violations {
        assert!(
            matches!(record.state, RepairState::Resolved | RepairState::Abandoned),
            "violation {} ended in {:?}",
            record.id,
            record.state
        );
    }
    let abandoned = outcome
        .violations
        .iter()
        .filter(|r| r.state == RepairState::Abandoned)
        .count();
    assert_eq!(outcome.summary.violation_flagged, abandoned);
}

#[test]
fn outcome_does_not_depend_on_thread_count() {
    let db = generate_random_design(30, 1000, 3, 5).unwrap();
    let run = |threads: usize| {
        let mut config = Config::default();
        config.io.thread_number = Some(threads);
        let outcome = route(&db, &config).unwrap();
        (
            serde_json::to_string(&outcome.trees).unwrap(),
            serde_json::to_string(&outcome.track_paths).unwrap(),
            serde_json::to_string(&outcome.geometry).unwrap(),
            serde_json::to_string(&outcome.violations).unwrap(),
        )
    };
    assert_eq!(run(1), run(4));
}

#[test]
fn exhausted_track_escalates_once_then_excludes() {
    let mut db = one_track_design();
    for name in ["a", "b"] {
        let n = db.add_net(name, ConnectType::Signal);
        db.add_pin(n, "l", dot(0, 0));
        db.add_pin(n, "r", dot(35, 0));
    }

    let outcome = route(&db, &stages(&[Stage::GlobalRoute, Stage::TrackAssign])).unwrap();
    let summary = &outcome.summary;
    assert_eq!(summary.escalations, 1);
    assert_eq!(summary.routed, 1);
    assert_eq!(summary.excluded.len(), 1);
    let dropped = &summary.excluded[0];
    assert_eq!(dropped.stage, Stage::TrackAssign);
    assert!(dropped.reason.contains("no free track"), "{}", dropped.reason);

    // The loser's tree and claims are gone; the winner keeps one run.
    assert_eq!(outcome.trees.len(), 1);
    assert_eq!(outcome.track_paths.len(), 1);
    assert_ne!(outcome.trees[0].net, dropped.net);
    assert_eq!(outcome.track_paths[0].net, outcome.trees[0].net);
    assert_eq!(summary.grid_demand, 3);
    assert_eq!(summary.grid_demand, planar_edges(&outcome.trees));
}

#[test]
fn contested_row_moves_to_the_upper_layer() {
    let mut db = one_track_design();
    db.add_layer("M2", LayerDirection::Vertical, 10, 4, SpacingRule::new(4), 0);
    db.add_layer("M3", LayerDirection::Horizontal, 10, 4, SpacingRule::new(4), 0);
    for name in ["a", "b"] {
        let n = db.add_net(name, ConnectType::Signal);
        db.add_pin(n, "l", dot(0, 0));
        db.add_pin(n, "r", dot(35, 0));
    }

    let outcome = route(&db, &stages(&[Stage::GlobalRoute, Stage::TrackAssign])).unwrap();
    let summary = &outcome.summary;
    assert!(summary.excluded.is_empty(), "{:?}", summary.excluded);
    assert_eq!(summary.escalations, 0);
    assert_eq!(summary.routed, 2);
    assert_eq!(outcome.track_paths.len(), 2);
    let layers: BTreeSet<u8> = outcome
        .track_paths
        .iter()
        .flat_map(|p| p.segments.iter().map(|s| s.layer))
        .collect();
    assert_eq!(layers, BTreeSet::from([0, 2]));
    assert_eq!(summary.grid_demand, planar_edges(&outcome.trees));
}

fn straight_task(net: u32, fanout: u32) -> TrackAssignTask {
    let a = GridCoord::new(0, 0, 0);
    let b = GridCoord::new(3, 0, 0);
    TrackAssignTask {
        net: NetId(net),
        key: PriorityKey {
            critical: false,
            fanout,
            bbox_size: 30,
            net: NetId(net),
        },
        window: GCellBox { x0: 0, y0: 0, x1: 3, y1: 0 },
        tree: CoarseTree {
            net: NetId(net),
            segments: vec![Segment::new(a, b)],
            edges: Vec::new(),
            terminals: vec![a, b],
        },
        pin_points: Vec::new(),
        avoid: BTreeSet::new(),
    }
}

#[test]
fn higher_priority_net_wins_a_contested_track() {
    // A single track per GCell row.
    let db = {
        let area = Rect::from_coords(0, 0, 40, 10);
        let mut db = NetlistDB::new(area, GCellAxis::uniform(area, 10).unwrap());
        db.add_layer("M1", LayerDirection::Horizontal, 10, 4, SpacingRule::new(4), 0);
        db
    };
    let occupancy = TrackOccupancy::new();
    let config = TrackAssignmentConfig::default();
    let assigner = TrackAssigner::new(&db.gcell_axis, &db.layers, &occupancy, &config);

    let results = assigner.run(vec![straight_task(0, 2), straight_task(1, 3)]);
    assert_eq!(results.len(), 2);
    let (winner, won) = &results[0];
    assert_eq!(*winner, NetId(1));
    assert_eq!(won.as_ref().unwrap().segments[0].track, 0);
    let (loser, lost) = &results[1];
    assert_eq!(*loser, NetId(0));
    assert_eq!(
        lost,
        &Err(RouteError::NoAvailableTrack { segment: 0, layer: 0 })
    );
}
