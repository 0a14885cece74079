use crate::algo::batch::run_waves;
use crate::algo::maze::{MazeSolver, SearchWindow};
use crate::error::RouteError;
use crate::grid::{EdgeDir, EdgeGrid, GridEdge, PlanarGrid, RoutingGrid};
use crate::resource_allocator::CostMap;
use crate::task::{GCellBox, PriorityKey, StageTask};
use crate::utils::tree::segments_from_edges;
use rt_common::db::core::LayerData;
use rt_common::db::indices::NetId;
use rt_common::geom::coord::GridCoord;
use rt_common::geom::segment::Segment;
use rt_common::util::config::GlobalRoutingConfig;
use serde::Serialize;
use std::collections::BTreeSet;

/// Fixed-point scale of search costs.
const COST_UNIT: f64 = 1000.0;

pub struct GlobalRouteTask {
    pub net: NetId,
    pub key: PriorityKey,
    /// Terminal box grown by the search margin.
    pub window: GCellBox,
    /// Distinct terminal cells, driver first.
    pub terminals: Vec<GridCoord>,
    /// Multiplier on the congestion terms; raised when a net escalates.
    pub cost_scale: f64,
}

impl StageTask for GlobalRouteTask {
    fn net(&self) -> NetId {
        self.net
    }
    fn priority(&self) -> PriorityKey {
        self.key
    }
    fn window(&self) -> GCellBox {
        self.window
    }
}

/// A net's committed coarse route.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct CoarseTree {
    pub net: NetId,
    pub segments: Vec<Segment<GridCoord>>,
    /// Unit edges booked on the grid, sorted and unique.
    pub edges: Vec<GridEdge>,
    pub terminals: Vec<GridCoord>,
}

impl CoarseTree {
    pub fn wirelength(&self) -> u32 {
        self.segments.iter().map(|s| s.length()).sum()
    }

    pub fn via_count(&self) -> u32 {
        self.segments
            .iter()
            .filter(|s| s.is_via())
            .map(|s| s.first.z.abs_diff(s.second.z) as u32)
            .sum()
    }

    /// Planar box of every cell the tree touches.
    pub fn bbox(&self) -> Option<GCellBox> {
        GCellBox::around(
            self.segments
                .iter()
                .flat_map(|s| [s.first, s.second])
                .chain(self.terminals.iter().copied())
                .map(|c| (c.x, c.y)),
        )
    }
}

pub struct GlobalRouter<'a> {
    grid: &'a EdgeGrid,
    layers: &'a [LayerData],
    congestion: Option<(&'a CostMap, &'a PlanarGrid)>,
    config: &'a GlobalRoutingConfig,
}

impl<'a> GlobalRouter<'a> {
    pub fn new(
        grid: &'a EdgeGrid,
        layers: &'a [LayerData],
        congestion: Option<(&'a CostMap, &'a PlanarGrid)>,
        config: &'a GlobalRoutingConfig,
    ) -> Self {
        Self {
            grid,
            layers,
            congestion,
            config,
        }
    }

    fn step_cost(&self, a: GridCoord, b: GridCoord, scale: f64) -> Option<i64> {
        let e = GridEdge::between(a, b)?;
        if e.dir == EdgeDir::Up {
            return Some((COST_UNIT * self.config.via_cost).round() as i64);
        }
        let layer = self.layers.get(e.from.z as usize)?;
        if (e.dir == EdgeDir::East) != layer.direction.is_horizontal() {
            return None;
        }
        let supply = self.grid.supply(e);
        if supply == 0 {
            return None;
        }

        let mut extra = match self.congestion {
            Some((map, planar)) => self.config.congestion_weight * map.at(planar, e),
            None => 0.0,
        };
        if self.grid.demand(e) >= supply {
            extra += self.config.overflow_cost;
        }
        Some((COST_UNIT * (1.0 + extra * scale)).round() as i64)
    }

    fn search(
        &self,
        solver: &mut MazeSolver,
        window: &SearchWindow,
        tree: &[GridCoord],
        target: GridCoord,
        scale: f64,
    ) -> Option<Vec<GridCoord>> {
        solver.find_path(self.grid, window, tree, target, COST_UNIT as i64, |a, b| {
            self.step_cost(a, b, scale)
        })
    }

    /// Connects the task's terminals into one tree. Each step joins the
    /// remaining terminal nearest to the tree, searching from every tree cell.
    pub fn route(
        &self,
        task: &GlobalRouteTask,
        solver: &mut MazeSolver,
    ) -> Result<CoarseTree, RouteError> {
        let mut tree = CoarseTree {
            net: task.net,
            terminals: task.terminals.clone(),
            ..CoarseTree::default()
        };
        let Some(&root) = task.terminals.first() else {
            return Ok(tree);
        };

        let window = SearchWindow::new(task.window, self.grid.layers());
        let full = SearchWindow::full(self.grid);
        let mut cells = vec![root];
        let mut in_tree: BTreeSet<GridCoord> = cells.iter().copied().collect();
        let mut edges: BTreeSet<GridEdge> = BTreeSet::new();
        let mut pending: Vec<GridCoord> = task.terminals[1..].to_vec();

        while !pending.is_empty() {
            let distance = |t: &GridCoord| {
                cells
                    .iter()
                    .map(|c| c.planar_distance(t) + c.z.abs_diff(t.z) as u32)
                    .min()
                    .unwrap_or(u32::MAX)
            };
            let mut pick = 0;
            let mut best = u32::MAX;
            for (i, t) in pending.iter().enumerate() {
                let d = distance(t);
                if d < best {
                    best = d;
                    pick = i;
                }
            }
            let target = pending.remove(pick);
            if in_tree.contains(&target) {
                continue;
            }

            let path = self
                .search(solver, &window, &cells, target, task.cost_scale)
                .or_else(|| {
                    log::debug!("GR: net {} leaves its window", task.net);
                    self.search(solver, &full, &cells, target, task.cost_scale)
                })
                .ok_or(RouteError::UnroutableNet)?;

            for w in path.windows(2) {
                if let Some(e) = GridEdge::between(w[0], w[1]) {
                    edges.insert(e);
                }
            }
            for c in path {
                if in_tree.insert(c) {
                    cells.push(c);
                }
            }
        }

        let pairs: Vec<(GridCoord, GridCoord)> = edges.iter().map(|e| (e.from, e.to())).collect();
        tree.segments = segments_from_edges(&pairs, &task.terminals);
        tree.edges = edges.into_iter().collect();
        Ok(tree)
    }

    pub fn commit(&self, tree: &CoarseTree) {
        for &e in &tree.edges {
            self.grid.add_demand(e);
        }
    }

    pub fn rip_up(&self, tree: &CoarseTree) {
        for &e in &tree.edges {
            self.grid.remove_demand(e);
        }
    }

    /// Routes every task wave by wave. Each wave searches against the demand
    /// left by earlier waves; its trees are committed in priority order once
    /// the wave is done.
    pub fn run(&self, tasks: Vec<GlobalRouteTask>) -> Vec<(NetId, Result<CoarseTree, RouteError>)> {
        log::info!("Starting Global Routing ({} nets)", tasks.len());
        let mut results = Vec::with_capacity(tasks.len());
        run_waves(
            "GR",
            tasks,
            self.grid.x_cells(),
            self.grid.y_cells(),
            MazeSolver::new(),
            |solver, task| self.route(task, solver),
            |task, result| {
                if let Ok(tree) = &result {
                    self.commit(tree);
                }
                results.push((task.net, result));
            },
        );
        log::info!(
            "GR done: demand {}, overflow {}",
            self.grid.total_demand(),
            self.grid.total_overflow()
        );
        results
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rt_common::db::core::{LayerDirection, SpacingRule};

    fn layer(index: u8, direction: LayerDirection) -> LayerData {
        LayerData {
            name: format!("M{}", index + 1),
            index,
            direction,
            pitch: 1,
            offset: 0,
            min_width: 1,
            spacing: SpacingRule::new(1),
            min_area: 0,
        }
    }

    fn open_grid(x: u32, y: u32, layers: u8, supply: u32) -> EdgeGrid {
        let mut grid = EdgeGrid::new(x, y, layers);
        for z in 0..layers {
            for j in 0..y {
                for i in 0..x {
                    let c = GridCoord::new(i, j, z);
                    grid.set_supply(GridEdge::new(c, EdgeDir::East), supply);
                    grid.set_supply(GridEdge::new(c, EdgeDir::North), supply);
                }
            }
        }
        grid
    }

    fn task(net: u32, terminals: Vec<GridCoord>, window: GCellBox) -> GlobalRouteTask {
        GlobalRouteTask {
            net: NetId(net),
            key: PriorityKey {
                critical: false,
                fanout: terminals.len() as u32,
                bbox_size: 0,
                net: NetId(net),
            },
            window,
            terminals,
            cost_scale: 1.0,
        }
    }

    #[test]
    fn single_terminal_gives_empty_tree() {
        let grid = open_grid(4, 4, 1, 1);
        let layers = [layer(0, LayerDirection::Horizontal)];
        let config = GlobalRoutingConfig::default();
        let router = GlobalRouter::new(&grid, &layers, None, &config);
        let t = task(0, vec![GridCoord::new(1, 1, 0)], GCellBox::cell(1, 1));
        let tree = router.route(&t, &mut MazeSolver::new()).unwrap();
        assert!(tree.segments.is_empty());
        assert!(tree.edges.is_empty());
    }

    #[test]
    fn vertical_run_climbs_to_the_vertical_layer() {
        let grid = open_grid(6, 6, 2, 2);
        let layers = [
            layer(0, LayerDirection::Horizontal),
            layer(1, LayerDirection::Vertical),
        ];
        let config = GlobalRoutingConfig {
            via_cost: 1.0,
            ..GlobalRoutingConfig::default()
        };
        let router = GlobalRouter::new(&grid, &layers, None, &config);
        let t = task(
            0,
            vec![GridCoord::new(0, 0, 0), GridCoord::new(0, 5, 0)],
            GCellBox { x0: 0, y0: 0, x1: 5, y1: 5 },
        );
        let tree = router.route(&t, &mut MazeSolver::new()).unwrap();
        assert_eq!(tree.wirelength(), 5);
        assert_eq!(tree.via_count(), 2);
    }

    #[test]
    fn wrong_way_edges_are_never_taken() {
        // Both directions carry supply, but M1 only runs east-west.
        let grid = open_grid(4, 4, 1, 4);
        let layers = [layer(0, LayerDirection::Horizontal)];
        let config = GlobalRoutingConfig::default();
        let router = GlobalRouter::new(&grid, &layers, None, &config);
        let t = task(
            0,
            vec![GridCoord::new(0, 0, 0), GridCoord::new(0, 2, 0)],
            GCellBox { x0: 0, y0: 0, x1: 3, y1: 3 },
        );
        assert_eq!(
            router.route(&t, &mut MazeSolver::new()),
            Err(RouteError::UnroutableNet)
        );
    }

    #[test]
    fn commit_and_rip_up_are_symmetric() {
        let grid = open_grid(5, 5, 2, 1);
        let layers = [
            layer(0, LayerDirection::Horizontal),
            layer(1, LayerDirection::Vertical),
        ];
        let config = GlobalRoutingConfig::default();
        let router = GlobalRouter::new(&grid, &layers, None, &config);
        let t = task(
            0,
            vec![GridCoord::new(0, 0, 0), GridCoord::new(4, 0, 0), GridCoord::new(4, 3, 0)],
            GCellBox { x0: 0, y0: 0, x1: 4, y1: 4 },
        );
        let tree = router.route(&t, &mut MazeSolver::new()).unwrap();
        router.commit(&tree);
        let planar = tree.edges.iter().filter(|e| e.is_planar()).count();
        assert_eq!(grid.total_demand(), planar as u64);
        assert_eq!(planar as u32, tree.wirelength());
        assert_eq!(tree.wirelength(), 7);
        router.rip_up(&tree);
        assert_eq!(grid.total_demand(), 0);
    }

    #[test]
    fn blocked_window_falls_back_to_full_grid() {
        let mut grid = open_grid(5, 5, 2, 1);
        for x in 0..4 {
            grid.set_supply(GridEdge::new(GridCoord::new(x, 0, 0), EdgeDir::East), 0);
        }
        let layers = [
            layer(0, LayerDirection::Horizontal),
            layer(1, LayerDirection::Vertical),
        ];
        let config = GlobalRoutingConfig::default();
        let router = GlobalRouter::new(&grid, &layers, None, &config);
        let t = task(
            0,
            vec![GridCoord::new(0, 0, 0), GridCoord::new(4, 0, 0)],
            GCellBox { x0: 0, y0: 0, x1: 4, y1: 0 },
        );
        let tree = router.route(&t, &mut MazeSolver::new()).unwrap();
        assert_eq!(tree.wirelength(), 6);

        let mut walled = open_grid(3, 1, 1, 1);
        walled.set_supply(GridEdge::new(GridCoord::new(1, 0, 0), EdgeDir::East), 0);
        let router = GlobalRouter::new(&walled, &layers[..1], None, &config);
        let t = task(
            0,
            vec![GridCoord::new(0, 0, 0), GridCoord::new(2, 0, 0)],
            GCellBox { x0: 0, y0: 0, x1: 2, y1: 0 },
        );
        assert_eq!(
            router.route(&t, &mut MazeSolver::new()),
            Err(RouteError::UnroutableNet)
        );
    }
}
