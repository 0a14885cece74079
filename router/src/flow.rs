//! Runs the configured stages in order over one design snapshot.

use crate::algo::maze::MazeSolver;
use crate::context::{Exclusion, RouteContext};
use crate::data_manager::DataManager;
use crate::detailed_router::{DetailedRouteTask, DetailedRouter, NetGeometry};
use crate::error::{RouteError, RouterError};
use crate::global_router::{CoarseTree, GlobalRouteTask, GlobalRouter};
use crate::pin_access::{PinAccessTask, PinAccessor};
use crate::resource_allocator::{AllocationTask, ResourceAllocator};
use crate::shapes::{self, ShapeIndex};
use crate::task::GCellBox;
use crate::track_assigner::{TrackAssignTask, TrackAssigner, TrackPath};
use crate::violation_repair::{RepairNet, RepairState, ViolationRecord, ViolationRepairer};
use rt_common::db::core::NetlistDB;
use rt_common::db::indices::NetId;
use rt_common::util::check::{self, NetRoute};
use rt_common::util::config::{Config, Stage};
use rt_common::util::profiler::{ScopedTimer, StageMeter};
use serde::Serialize;
use std::collections::BTreeSet;

#[derive(Clone, Debug, Serialize)]
pub struct StageStats {
    pub stage: Stage,
    pub elapsed_ms: f64,
    pub memory_delta_kb: i64,
    /// Nets the stage produced a result for.
    pub committed: usize,
    /// Nets the stage dropped.
    pub excluded: usize,
}

#[derive(Clone, Debug, Default, Serialize)]
pub struct RunSummary {
    pub routed: usize,
    pub excluded: Vec<Exclusion>,
    /// Violations still present when repair gave up.
    pub violation_flagged: usize,
    pub wirelength: i64,
    pub vias: usize,
    /// Nets whose final wiring is open or looped.
    pub broken: Vec<String>,
    /// Escalations spent across all nets.
    pub escalations: u32,
    /// GCell edge demand still booked by the committed coarse trees.
    pub grid_demand: u64,
}

#[derive(Clone, Debug, Default, Serialize)]
pub struct RouteOutcome {
    pub geometry: Vec<NetGeometry>,
    pub trees: Vec<CoarseTree>,
    pub track_paths: Vec<TrackPath>,
    pub violations: Vec<ViolationRecord>,
    pub stats: Vec<StageStats>,
    pub summary: RunSummary,
}

/// Validates inputs, then runs every configured stage inside a worker pool
/// sized by `io.thread_number`.
pub fn route(db: &NetlistDB, config: &Config) -> Result<RouteOutcome, RouterError> {
    config.validate()?;
    db.validate()?;
    if db.nets.is_empty() {
        return Err(RouterError::EmptyDesign);
    }

    let mut builder = rayon::ThreadPoolBuilder::new();
    if let Some(n) = config.io.thread_number {
        builder = builder.num_threads(n);
    }
    let pool = builder.build()?;
    pool.install(|| run(db, config))
}

fn run(db: &NetlistDB, config: &Config) -> Result<RouteOutcome, RouterError> {
    let _timer = ScopedTimer::new("Routing");
    log::info!(
        "Routing {} nets on {} layers, stages: {:?}",
        db.nets.len(),
        db.layers.len(),
        config.flow.stages
    );
    let mut ctx = RouteContext::new(db, config)?;
    let mut stats = Vec::with_capacity(config.flow.stages.len());

    for &stage in &config.flow.stages {
        let meter = StageMeter::start();
        let before = ctx.excluded.len();
        let committed = match stage {
            Stage::PinAccess => pin_access(&mut ctx)?,
            Stage::ResourceAllocate => resource_allocate(&mut ctx)?,
            Stage::GlobalRoute => global_route(&mut ctx)?,
            Stage::TrackAssign => track_assign(&mut ctx)?,
            Stage::DetailedRoute => detailed_route(&mut ctx)?,
            Stage::ViolationRepair => violation_repair(&mut ctx)?,
        };
        let reading = meter.finish();
        let s = StageStats {
            stage,
            elapsed_ms: reading.elapsed.as_secs_f64() * 1000.0,
            memory_delta_kb: reading.memory_delta_kb,
            committed,
            excluded: ctx.excluded.len() - before,
        };
        log::info!(
            "{}: {} committed, {} excluded, {:.1} ms, {:+} kB",
            stage,
            s.committed,
            s.excluded,
            s.elapsed_ms,
            s.memory_delta_kb
        );
        stats.push(s);
        if config.io.enable_debug_image {
            ctx.dump_image(stage);
        }
    }
    Ok(finish(ctx, stats))
}

fn pin_access(ctx: &mut RouteContext<'_>) -> Result<usize, RouterError> {
    let db = ctx.db;
    let conv = ctx.converter();
    let keys = &ctx.keys;
    let stage = DataManager::new(db, &ctx.config.layers).adapt(
        Stage::PinAccess,
        &ctx.active(),
        |net| {
            Some(PinAccessTask {
                net,
                key: keys[net.index()],
                window: conv.cover(&db.net_bbox(net)),
                pins: db.net(net).pins.clone(),
            })
        },
    )?;
    for (net, e) in stage.excluded {
        ctx.exclude(net, Stage::PinAccess, e.to_string());
    }

    let foreign = ShapeIndex::bulk_load(shapes::fixed_shapes(db));
    let accessor = PinAccessor::new(
        &stage.layers,
        &foreign,
        ctx.config.pin_access.access_point_count,
    );
    let mut committed = 0;
    for (net, result) in accessor.run(db, &stage.tasks) {
        match result {
            Ok(points) => {
                for (pin, ranked) in points {
                    ctx.access[pin.index()] = ranked;
                }
                committed += 1;
            }
            Err(e) => ctx.exclude(net, Stage::PinAccess, e.to_string()),
        }
    }
    Ok(committed)
}

fn resource_allocate(ctx: &mut RouteContext<'_>) -> Result<usize, RouterError> {
    let db = ctx.db;
    let shared = &*ctx;
    let stage = DataManager::new(db, &shared.config.layers).adapt(
        Stage::ResourceAllocate,
        &shared.active(),
        |net| {
            let mut terminals: Vec<(u32, u32)> = Vec::new();
            for c in shared.terminal_cells(net) {
                if !terminals.contains(&(c.x, c.y)) {
                    terminals.push((c.x, c.y));
                }
            }
            if terminals.len() < 2 {
                return None;
            }
            Some(AllocationTask {
                net,
                key: shared.key(net),
                window: GCellBox::around(terminals.iter().copied())?,
                terminals,
            })
        },
    )?;
    let planar = ctx.grid.project_2d();
    let allocation =
        ResourceAllocator::new(&ctx.config.resource_allocate).allocate(planar.clone(), &stage.tasks);
    for (net, e) in stage.excluded {
        ctx.exclude(net, Stage::ResourceAllocate, e.to_string());
    }
    ctx.allocation = Some((allocation, planar));
    Ok(stage.tasks.len())
}

fn global_task(ctx: &RouteContext<'_>, net: NetId, cost_scale: f64) -> GlobalRouteTask {
    let terminals = ctx.terminal_cells(net);
    let conv = ctx.converter();
    let window = GCellBox::around(terminals.iter().map(|c| (c.x, c.y)))
        .unwrap_or_else(|| GCellBox::cell(0, 0))
        .expand(
            ctx.config.global_routing.search_margin,
            conv.x_cells(),
            conv.y_cells(),
        );
    GlobalRouteTask {
        net,
        key: ctx.key(net),
        window,
        terminals,
        cost_scale,
    }
}

fn global_router<'c>(ctx: &'c RouteContext<'_>) -> GlobalRouter<'c> {
    let congestion = ctx
        .allocation
        .as_ref()
        .map(|(a, planar)| (&a.cost_map, planar));
    GlobalRouter::new(
        &ctx.grid,
        &ctx.db.layers,
        congestion,
        &ctx.config.global_routing,
    )
}

/// Routes one net again at the escalated cost scale and commits it.
fn reroute(ctx: &mut RouteContext<'_>, net: NetId) -> Result<(), RouteError> {
    ctx.release_from(net, Stage::GlobalRoute);
    let task = global_task(ctx, net, ctx.config.global_routing.escalation_cost_scale);
    let router = global_router(ctx);
    let tree = router.route(&task, &mut MazeSolver::new())?;
    router.commit(&tree);
    ctx.trees[net.index()] = Some(tree);
    Ok(())
}

fn global_route(ctx: &mut RouteContext<'_>) -> Result<usize, RouterError> {
    let db = ctx.db;
    let shared = &*ctx;
    let stage = DataManager::new(db, &shared.config.layers).adapt(
        Stage::GlobalRoute,
        &shared.active(),
        |net| Some(global_task(shared, net, 1.0)),
    )?;
    let results = global_router(ctx).run(stage.tasks);
    for (net, e) in stage.excluded {
        ctx.exclude(net, Stage::GlobalRoute, e.to_string());
    }

    let mut committed = 0;
    let mut failed = Vec::new();
    for (net, result) in results {
        match result {
            Ok(tree) => {
                ctx.trees[net.index()] = Some(tree);
                committed += 1;
            }
            Err(e) => failed.push((net, e)),
        }
    }
    for (net, e) in failed {
        if !(e.is_capacity() && ctx.take_escalation(net)) {
            ctx.exclude(net, Stage::GlobalRoute, e.to_string());
            continue;
        }
        log::debug!("GR: escalating net {} after: {}", net, e);
        match reroute(ctx, net) {
            Ok(()) => committed += 1,
            Err(e) => ctx.exclude(net, Stage::GlobalRoute, e.to_string()),
        }
    }
    Ok(committed)
}

fn track_task(ctx: &RouteContext<'_>, net: NetId) -> Option<TrackAssignTask> {
    let tree = ctx.trees[net.index()].as_ref()?;
    Some(TrackAssignTask {
        net,
        key: ctx.key(net),
        window: ctx.tree_window(tree),
        tree: tree.clone(),
        pin_points: ctx.pin_terminals(net).iter().map(|t| t.at).collect(),
        avoid: BTreeSet::new(),
    })
}

/// Global route at the escalated scale, then tracks again.
fn reassign(ctx: &mut RouteContext<'_>, net: NetId) -> Result<(), RouteError> {
    reroute(ctx, net)?;
    let Some(task) = track_task(ctx, net) else {
        return Err(RouteError::UnroutableNet);
    };
    let path = TrackAssigner::new(
        &ctx.db.gcell_axis,
        &ctx.db.layers,
        &ctx.occupancy,
        &ctx.config.track_assignment,
    )
    .assign(&task)?;
    ctx.paths[net.index()] = Some(path);
    Ok(())
}

fn track_assign(ctx: &mut RouteContext<'_>) -> Result<usize, RouterError> {
    let db = ctx.db;
    let shared = &*ctx;
    let stage = DataManager::new(db, &shared.config.layers).adapt(
        Stage::TrackAssign,
        &shared.active(),
        |net| track_task(shared, net),
    )?;
    let results = TrackAssigner::new(
        &stage.axis,
        &stage.layers,
        &ctx.occupancy,
        &ctx.config.track_assignment,
    )
    .run(stage.tasks);
    for (net, e) in stage.excluded {
        ctx.exclude(net, Stage::TrackAssign, e.to_string());
    }

    let mut committed = 0;
    let mut failed = Vec::new();
    for (net, result) in results {
        match result {
            Ok(path) => {
                ctx.paths[net.index()] = Some(path);
                committed += 1;
            }
            Err(e) => failed.push((net, e)),
        }
    }
    for (net, e) in failed {
        if !(e.is_capacity() && ctx.take_escalation(net)) {
            ctx.exclude(net, Stage::TrackAssign, e.to_string());
            continue;
        }
        log::debug!("TA: escalating net {} after: {}", net, e);
        match reassign(ctx, net) {
            Ok(()) => committed += 1,
            Err(e) => ctx.exclude(net, Stage::TrackAssign, e.to_string()),
        }
    }
    Ok(committed)
}

fn detail_task(ctx: &RouteContext<'_>, net: NetId) -> Option<DetailedRouteTask> {
    let i = net.index();
    let tree = ctx.trees[i].as_ref()?;
    let path = ctx.paths[i].as_ref()?;
    let pins = ctx.pin_terminals(net);
    let conv = ctx.converter();
    let pin_cells = GCellBox::around(pins.iter().map(|p| {
        let c = conv.point_to_grid(p.at);
        (c.x, c.y)
    }));
    let window = match (tree.bbox(), pin_cells) {
        (Some(a), Some(b)) => a.union(&b),
        (Some(a), None) | (None, Some(a)) => a,
        (None, None) => GCellBox::cell(0, 0),
    }
    .expand(1, conv.x_cells(), conv.y_cells());
    Some(DetailedRouteTask {
        net,
        key: ctx.key(net),
        window,
        tree: tree.clone(),
        path: path.clone(),
        pins,
    })
}

fn detailed_route(ctx: &mut RouteContext<'_>) -> Result<usize, RouterError> {
    let db = ctx.db;
    let shared = &*ctx;
    let stage = DataManager::new(db, &shared.config.layers).adapt(
        Stage::DetailedRoute,
        &shared.active(),
        |net| detail_task(shared, net),
    )?;
    let mut foreign = ShapeIndex::bulk_load(shapes::fixed_shapes(db));
    let results = {
        let router = DetailedRouter::new(
            &stage.axis,
            &stage.layers,
            &stage.vias,
            &ctx.config.detailed_routing,
        );
        router.run(stage.tasks, &mut foreign)
    };
    for (net, e) in stage.excluded {
        ctx.exclude(net, Stage::DetailedRoute, e.to_string());
    }

    let mut committed = 0;
    let mut failed = Vec::new();
    for (net, result) in results {
        match result {
            Ok(g) => {
                ctx.geometry[net.index()] = Some(g);
                committed += 1;
            }
            Err(e) => failed.push((net, e)),
        }
    }
    for (net, e) in failed {
        if !(e.is_capacity() && ctx.take_escalation(net)) {
            ctx.exclude(net, Stage::DetailedRoute, e.to_string());
            continue;
        }
        log::debug!("DR: escalating net {} after: {}", net, e);
        let lowered = reassign(ctx, net).and_then(|()| {
            let task = detail_task(ctx, net).ok_or(RouteError::UnroutableNet)?;
            DetailedRouter::new(
                &db.gcell_axis,
                &db.layers,
                &db.vias,
                &ctx.config.detailed_routing,
            )
            .lower(&task, &foreign)
        });
        match lowered {
            Ok(g) => {
                DetailedRouter::new(
                    &db.gcell_axis,
                    &db.layers,
                    &db.vias,
                    &ctx.config.detailed_routing,
                )
                .commit(&mut foreign, &g);
                ctx.geometry[net.index()] = Some(g);
                committed += 1;
            }
            Err(e) => ctx.exclude(net, Stage::DetailedRoute, e.to_string()),
        }
    }
    Ok(committed)
}

fn violation_repair(ctx: &mut RouteContext<'_>) -> Result<usize, RouterError> {
    let db = ctx.db;
    let shared = &*ctx;
    let stage = DataManager::new(db, &shared.config.layers).adapt(
        Stage::ViolationRepair,
        &shared.active(),
        |net| {
            let i = net.index();
            let tree = shared.trees[i].clone()?;
            Some(RepairNet {
                key: shared.key(net),
                window: shared.tree_window(&tree),
                path: shared.paths[i].clone()?,
                pins: shared.pin_terminals(net),
                geometry: shared.geometry[i].clone()?,
                tree,
            })
        },
    )?;
    for (net, e) in stage.excluded {
        ctx.exclude(net, Stage::ViolationRepair, e.to_string());
    }

    let outcome = ViolationRepairer::new(
        db,
        &ctx.config.violation_repair,
        &ctx.config.track_assignment,
        &ctx.config.detailed_routing,
    )
    .repair(stage.tasks, ctx.occupancy.clone());
    let committed = outcome.nets.len();
    for g in outcome.nets {
        let i = g.net.index();
        ctx.geometry[i] = Some(g);
    }
    ctx.violations = outcome.records;
    Ok(committed)
}

fn finish(ctx: RouteContext<'_>, stats: Vec<StageStats>) -> RouteOutcome {
    let db = ctx.db;
    let active: Vec<NetId> = ctx.active();

    let legs: Vec<(NetId, Vec<_>)> = active
        .iter()
        .filter_map(|&n| ctx.geometry[n.index()].as_ref().map(|g| (n, g.legs())))
        .collect();
    let routes: Vec<NetRoute<'_>> = legs
        .iter()
        .filter_map(|(n, segs)| {
            let g = ctx.geometry[n.index()].as_ref()?;
            Some(NetRoute {
                name: &db.net(*n).name,
                segments: segs,
                terminals: &g.terminals,
            })
        })
        .collect();
    let broken: Vec<String> = check::run(&routes)
        .into_iter()
        .map(|(name, e)| {
            log::warn!("net '{}' fails the connectivity check: {}", name, e);
            name
        })
        .collect();

    let geometry: Vec<NetGeometry> = ctx.geometry.iter().flatten().cloned().collect();
    let trees: Vec<CoarseTree> = ctx.trees.iter().flatten().cloned().collect();
    let track_paths: Vec<TrackPath> = ctx.paths.iter().flatten().cloned().collect();

    let deepest = ctx.config.flow.stages.iter().copied().max();
    let routed = active
        .iter()
        .filter(|n| {
            let i = n.index();
            match deepest {
                Some(s) if s >= Stage::DetailedRoute => ctx.geometry[i].is_some(),
                Some(Stage::TrackAssign) => ctx.paths[i].is_some(),
                Some(Stage::GlobalRoute) => ctx.trees[i].is_some(),
                _ => true,
            }
        })
        .count();
    let violation_flagged = ctx
        .violations
        .iter()
        .filter(|r| r.state == RepairState::Abandoned)
        .count();

    let summary = RunSummary {
        routed,
        excluded: ctx.excluded.values().cloned().collect(),
        violation_flagged,
        wirelength: geometry.iter().map(|g| g.wirelength()).sum(),
        vias: geometry.iter().map(|g| g.vias.len()).sum(),
        broken,
        escalations: ctx.escalations.iter().sum(),
        grid_demand: ctx.grid.total_demand(),
    };
    log::info!(
        "Routed {} nets, {} excluded, wirelength {}, {} vias, {} violations flagged",
        summary.routed,
        summary.excluded.len(),
        summary.wirelength,
        summary.vias,
        summary.violation_flagged
    );
    if summary.violation_flagged > 0 {
        log::warn!(
            "{} violations remain after repair",
            summary.violation_flagged
        );
    }

    RouteOutcome {
        geometry,
        trees,
        track_paths,
        violations: ctx.violations,
        stats,
        summary,
    }
}
