//! Negotiated cost map on the 2-D projection of the GCell graph.
//!
//! Every net is routed with cheap L-shaped routes; the resulting demand is
//! turned into a per-edge congestion cost that the global router reads as a
//! hint. The penalty starts high and decays so later iterations weigh
//! congestion less.

use crate::grid::{GridEdge, PlanarGrid};
use crate::task::{GCellBox, PriorityKey, StageTask};
use rayon::prelude::*;
use rt_common::db::indices::NetId;
use rt_common::geom::coord::GridCoord;
use rt_common::util::config::ResourceAllocateConfig;
use serde::Serialize;
use std::collections::BTreeSet;

/// `max(0, demand + 1 - supply) / max(supply, 1)`: zero while one more wire
/// still fits, growing with the shortfall.
pub fn congestion_term(demand: u32, supply: u32) -> f64 {
    let short = (demand as i64 + 1 - supply as i64).max(0);
    short as f64 / supply.max(1) as f64
}

/// Congestion cost per planar edge slot of the projection.
#[derive(Clone, Debug, Serialize)]
pub struct CostMap {
    values: Vec<f64>,
}

impl CostMap {
    pub fn uniform(len: usize) -> Self {
        Self {
            values: vec![0.0; len],
        }
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn at_slot(&self, slot: usize) -> f64 {
        self.values.get(slot).copied().unwrap_or(0.0)
    }

    /// Cost of a planar edge on any layer, read from its projection.
    pub fn at(&self, grid: &PlanarGrid, e: GridEdge) -> f64 {
        let flat = GridEdge::new(GridCoord::new(e.from.x, e.from.y, 0), e.dir);
        grid.slot_of(flat).map(|s| self.at_slot(s)).unwrap_or(0.0)
    }

    fn refresh(&mut self, grid: &PlanarGrid, penalty: f64) {
        self.values
            .par_iter_mut()
            .zip(grid.demands().par_iter().zip(grid.supplies().par_iter()))
            .for_each(|(v, (&d, &s))| *v = penalty * congestion_term(d, s));
    }
}

#[derive(Clone, Debug, Serialize)]
pub struct Allocation {
    pub cost_map: CostMap,
    /// Penalty applied in each outer iteration, in order.
    pub penalties: Vec<f64>,
    /// Total sketch overflow after the last iteration.
    pub overflow: u64,
}

pub struct AllocationTask {
    pub net: NetId,
    pub key: PriorityKey,
    pub window: GCellBox,
    /// Planar terminal cells, driver first.
    pub terminals: Vec<(u32, u32)>,
}

impl StageTask for AllocationTask {
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

pub struct ResourceAllocator<'a> {
    config: &'a ResourceAllocateConfig,
}

impl<'a> ResourceAllocator<'a> {
    pub fn new(config: &'a ResourceAllocateConfig) -> Self {
        Self { config }
    }

    pub fn allocate(&self, mut grid: PlanarGrid, tasks: &[AllocationTask]) -> Allocation {
        log::info!(
            "Starting Resource Allocation ({} nets, {}x{} iterations)",
            tasks.len(),
            self.config.outer_iterations,
            self.config.inner_iterations
        );
        let mut cost_map = CostMap::uniform(grid.edge_count());
        let mut penalties = Vec::with_capacity(self.config.outer_iterations);
        let mut penalty = self.config.initial_penalty;

        for outer in 0..self.config.outer_iterations {
            penalties.push(penalty);
            for _ in 0..self.config.inner_iterations {
                let sketches: Vec<Vec<usize>> = tasks
                    .par_iter()
                    .map(|t| sketch(&grid, &cost_map, &t.terminals))
                    .collect();
                let mut demand = vec![0u32; grid.edge_count()];
                for slots in &sketches {
                    for &s in slots {
                        demand[s] += 1;
                    }
                }
                grid.set_demand(demand);
                cost_map.refresh(&grid, penalty);
            }
            log::debug!(
                "RA outer {}: penalty {:.3}, overflow {}",
                outer,
                penalty,
                overflow(&grid)
            );
            penalty *= self.config.penalty_drop_rate;
        }

        let overflow = overflow(&grid);
        log::info!("RA done: sketch overflow {}", overflow);
        Allocation {
            cost_map,
            penalties,
            overflow,
        }
    }
}

fn overflow(grid: &PlanarGrid) -> u64 {
    grid.demands()
        .iter()
        .zip(grid.supplies())
        .map(|(&d, &s)| d.saturating_sub(s) as u64)
        .sum()
}

/// Edge slots walked from `from` to `to`, first along `first_x` then the
/// other axis.
fn l_route(grid: &PlanarGrid, from: (u32, u32), to: (u32, u32), first_x: bool) -> Vec<usize> {
    let mut slots = Vec::new();
    let mut walk = |a: (u32, u32), b: (u32, u32)| {
        let (mut x, mut y) = a;
        while (x, y) != b {
            let (nx, ny) = if x != b.0 {
                (if b.0 > x { x + 1 } else { x - 1 }, y)
            } else {
                (x, if b.1 > y { y + 1 } else { y - 1 })
            };
            let e = GridEdge::between(GridCoord::new(x, y, 0), GridCoord::new(nx, ny, 0));
            if let Some(s) = e.and_then(|e| grid.slot_of(e)) {
                slots.push(s);
            }
            x = nx;
            y = ny;
        }
    };
    if first_x {
        walk(from, (to.0, from.1));
        walk((to.0, from.1), to);
    } else {
        walk(from, (from.0, to.1));
        walk((from.0, to.1), to);
    }
    slots
}

/// Unique edge slots of a Prim-ordered L-shape tree over `terminals`.
fn sketch(grid: &PlanarGrid, cost_map: &CostMap, terminals: &[(u32, u32)]) -> Vec<usize> {
    let mut used: BTreeSet<usize> = BTreeSet::new();
    let Some(&first) = terminals.first() else {
        return Vec::new();
    };
    let mut tree = vec![first];
    let mut rest: Vec<(u32, u32)> = terminals[1..].to_vec();
    let dist = |a: (u32, u32), b: (u32, u32)| a.0.abs_diff(b.0) + a.1.abs_diff(b.1);

    while !rest.is_empty() {
        let mut best = (u32::MAX, 0, 0);
        for (i, &t) in rest.iter().enumerate() {
            for (j, &s) in tree.iter().enumerate() {
                let d = dist(t, s);
                if d < best.0 {
                    best = (d, i, j);
                }
            }
        }
        let (_, i, j) = best;
        let target = rest.remove(i);
        let source = tree[j];

        let h = l_route(grid, source, target, true);
        let v = l_route(grid, source, target, false);
        let price = |slots: &[usize]| slots.iter().map(|&s| cost_map.at_slot(s)).sum::<f64>();
        let chosen = if price(&v) < price(&h) { v } else { h };
        used.extend(chosen);
        tree.push(target);
    }
    used.into_iter().collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grid::{EdgeDir, EdgeGrid};

    fn slot(grid: &PlanarGrid, x: u32, y: u32, dir: EdgeDir) -> Option<usize> {
        grid.slot_of(GridEdge::new(GridCoord::new(x, y, 0), dir))
    }

    fn planar_grid(x: u32, y: u32, supply: u32) -> PlanarGrid {
        let mut g = EdgeGrid::new(x, y, 1);
        for j in 0..y {
            for i in 0..x {
                let c = GridCoord::new(i, j, 0);
                g.set_supply(GridEdge::new(c, EdgeDir::East), supply);
                g.set_supply(GridEdge::new(c, EdgeDir::North), supply);
            }
        }
        g.project_2d()
    }

    fn task(net: u32, terminals: Vec<(u32, u32)>) -> AllocationTask {
        AllocationTask {
            net: NetId(net),
            key: PriorityKey {
                critical: false,
                fanout: terminals.len() as u32,
                bbox_size: 0,
                net: NetId(net),
            },
            window: GCellBox::cell(0, 0),
            terminals,
        }
    }

    #[test]
    fn congestion_term_values() {
        assert_eq!(congestion_term(0, 2), 0.0);
        assert_eq!(congestion_term(1, 2), 0.0);
        assert_eq!(congestion_term(2, 2), 0.5);
        assert_eq!(congestion_term(3, 0), 4.0);
    }

    #[test]
    fn sketch_prefers_horizontal_first_on_ties() {
        let grid = planar_grid(4, 4, 1);
        let map = CostMap::uniform(grid.edge_count());
        let slots = sketch(&grid, &map, &[(0, 0), (2, 2)]);
        assert_eq!(slots.len(), 4);
        assert!(slots.contains(&slot(&grid, 0, 0, EdgeDir::East).unwrap()));
        assert!(slots.contains(&slot(&grid, 2, 0, EdgeDir::North).unwrap()));
    }

    #[test]
    fn penalty_schedule_and_final_cost_map() {
        let config = ResourceAllocateConfig {
            initial_penalty: 1.0,
            penalty_drop_rate: 0.5,
            outer_iterations: 3,
            inner_iterations: 1,
        };
        let grid = planar_grid(3, 1, 1);
        let tasks = vec![task(0, vec![(0, 0), (2, 0)]), task(1, vec![(0, 0), (1, 0)])];
        let alloc = ResourceAllocator::new(&config).allocate(grid.clone(), &tasks);
        assert_eq!(alloc.penalties, vec![1.0, 0.5, 0.25]);

        // Both sketches use (0,0)-(1,0): demand 2, supply 1.
        let e = slot(&grid, 0, 0, EdgeDir::East).unwrap();
        assert_eq!(alloc.cost_map.at_slot(e), 0.25 * congestion_term(2, 1));
        let f = slot(&grid, 1, 0, EdgeDir::East).unwrap();
        assert_eq!(alloc.cost_map.at_slot(f), 0.25 * congestion_term(1, 1));
        assert_eq!(alloc.overflow, 1);
    }
}
