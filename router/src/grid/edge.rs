use super::RoutingGrid;
use rayon::prelude::*;
use rt_common::db::core::LayerData;
use rt_common::db::gcell::GCellAxis;
use rt_common::geom::coord::GridCoord;
use rt_common::geom::rect::{LayerRect, Rect};
use rt_common::geom::rtree::SpatialIndex;
use serde::Serialize;
use std::sync::atomic::{AtomicU32, Ordering};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub enum EdgeDir {
    East,
    North,
    Up,
}

/// Edge of the GCell graph, stored from its lower endpoint.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct GridEdge {
    pub from: GridCoord,
    pub dir: EdgeDir,
}

impl GridEdge {
    pub fn new(from: GridCoord, dir: EdgeDir) -> Self {
        Self { from, dir }
    }

    /// The edge joining two adjacent cells, in either order.
    pub fn between(a: GridCoord, b: GridCoord) -> Option<GridEdge> {
        let (lo, hi) = if a <= b { (a, b) } else { (b, a) };
        let dir = if hi == GridCoord::new(lo.x + 1, lo.y, lo.z) {
            EdgeDir::East
        } else if hi == GridCoord::new(lo.x, lo.y + 1, lo.z) {
            EdgeDir::North
        } else if lo.z < u8::MAX && hi == GridCoord::new(lo.x, lo.y, lo.z + 1) {
            EdgeDir::Up
        } else {
            return None;
        };
        Some(GridEdge { from: lo, dir })
    }

    pub fn to(&self) -> GridCoord {
        let f = self.from;
        match self.dir {
            EdgeDir::East => GridCoord::new(f.x + 1, f.y, f.z),
            EdgeDir::North => GridCoord::new(f.x, f.y + 1, f.z),
            EdgeDir::Up => GridCoord::new(f.x, f.y, f.z + 1),
        }
    }

    pub fn is_planar(&self) -> bool {
        self.dir != EdgeDir::Up
    }
}

fn slot(dir: EdgeDir) -> usize {
    match dir {
        EdgeDir::North => 1,
        _ => 0,
    }
}

/// Layered GCell edge capacities. Demand counters are atomics so tasks in a
/// wave commit without a grid-wide lock. Up edges carry no capacity.
pub struct EdgeGrid {
    x_cells: u32,
    y_cells: u32,
    layers: u8,
    supply: Vec<u32>,
    demand: Vec<AtomicU32>,
}

impl EdgeGrid {
    pub fn new(x_cells: u32, y_cells: u32, layers: u8) -> Self {
        let size = x_cells as usize * y_cells as usize * layers as usize * 2;
        Self {
            x_cells,
            y_cells,
            layers,
            supply: vec![0; size],
            demand: (0..size).map(|_| AtomicU32::new(0)).collect(),
        }
    }

    /// Supply of every planar edge from the layer tracks crossing it, minus
    /// tracks a blockage cuts, scaled by the layer's utilization ratio.
    /// Only edges along a layer's preferred direction get supply; wrong-way
    /// edges and layers outside `routable` stay at zero.
    pub fn build(
        axis: &GCellAxis,
        layers: &[LayerData],
        routable: (u8, u8),
        utilization: &[f64],
        blockages: &[LayerRect],
    ) -> Self {
        let mut grid = Self::new(axis.x_cells(), axis.y_cells(), layers.len() as u8);
        let blocked = SpatialIndex::bulk_load(blockages.iter().map(|b| (*b, ())).collect());
        let (nx, ny) = (grid.x_cells, grid.y_cells);
        let plane = nx as usize * ny as usize * 2;

        grid.supply
            .par_chunks_mut(plane)
            .enumerate()
            .for_each(|(z, chunk)| {
                let layer = &layers[z];
                if (z as u8) < routable.0 || (z as u8) > routable.1 {
                    return;
                }
                let ratio = utilization.get(z).copied().unwrap_or(1.0);
                let hw = layer.half_width();
                let horizontal = layer.direction.is_horizontal();
                for y in 0..ny {
                    for x in 0..nx {
                        let base = (y as usize * nx as usize + x as usize) * 2;
                        let here = axis.cell_center(x, y);
                        if horizontal && x + 1 < nx {
                            let there = axis.cell_center(x + 1, y);
                            let (y0, y1) = axis.y_span(y);
                            let free = layer
                                .tracks_in(y0, y1)
                                .into_iter()
                                .filter(|&t| {
                                    let run = Rect::from_coords(here.x, t - hw, there.x, t + hw);
                                    !blocked.query(z as u8, run).any(|e| e.shape.rect.overlaps(&run))
                                })
                                .count();
                            chunk[base] = (free as f64 * ratio).floor() as u32;
                        }
                        if !horizontal && y + 1 < ny {
                            let there = axis.cell_center(x, y + 1);
                            let (x0, x1) = axis.x_span(x);
                            let free = layer
                                .tracks_in(x0, x1)
                                .into_iter()
                                .filter(|&t| {
                                    let run = Rect::from_coords(t - hw, here.y, t + hw, there.y);
                                    !blocked.query(z as u8, run).any(|e| e.shape.rect.overlaps(&run))
                                })
                                .count();
                            chunk[base + 1] = (free as f64 * ratio).floor() as u32;
                        }
                    }
                }
            });
        grid
    }

    #[inline(always)]
    fn index(&self, e: GridEdge) -> usize {
        let c = e.from;
        ((c.z as usize * self.y_cells as usize + c.y as usize) * self.x_cells as usize
            + c.x as usize)
            * 2
            + slot(e.dir)
    }

    fn in_range(&self, e: GridEdge) -> bool {
        let to = e.to();
        self.contains(e.from) && self.contains(to)
    }

    pub fn set_supply(&mut self, e: GridEdge, supply: u32) {
        if e.is_planar() && self.in_range(e) {
            let idx = self.index(e);
            self.supply[idx] = supply;
        }
    }

    pub fn add_demand(&self, e: GridEdge) {
        if e.is_planar() && self.in_range(e) {
            self.demand[self.index(e)].fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn remove_demand(&self, e: GridEdge) {
        if e.is_planar() && self.in_range(e) {
            let _ = self.demand[self.index(e)]
                .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |d| Some(d.saturating_sub(1)));
        }
    }

    pub fn total_demand(&self) -> u64 {
        self.demand
            .iter()
            .map(|d| d.load(Ordering::Relaxed) as u64)
            .sum()
    }

    pub fn total_overflow(&self) -> u64 {
        self.demand
            .iter()
            .zip(&self.supply)
            .map(|(d, &s)| d.load(Ordering::Relaxed).saturating_sub(s) as u64)
            .sum()
    }

    /// Collapses the layers into one plane; supply is summed per direction.
    pub fn project_2d(&self) -> PlanarGrid {
        let plane = self.x_cells as usize * self.y_cells as usize * 2;
        let mut supply = vec![0u32; plane];
        for layer in self.supply.chunks(plane) {
            for (acc, s) in supply.iter_mut().zip(layer) {
                *acc += *s;
            }
        }
        PlanarGrid {
            x_cells: self.x_cells,
            y_cells: self.y_cells,
            supply,
            demand: vec![0; plane],
        }
    }
}

impl RoutingGrid for EdgeGrid {
    fn x_cells(&self) -> u32 {
        self.x_cells
    }
    fn y_cells(&self) -> u32 {
        self.y_cells
    }
    fn layers(&self) -> u8 {
        self.layers
    }

    fn supply(&self, e: GridEdge) -> u32 {
        if !e.is_planar() {
            return u32::MAX;
        }
        if !self.in_range(e) {
            return 0;
        }
        self.supply[self.index(e)]
    }

    fn demand(&self, e: GridEdge) -> u32 {
        if !e.is_planar() || !self.in_range(e) {
            return 0;
        }
        self.demand[self.index(e)].load(Ordering::Relaxed)
    }
}

/// Single-layer projection used by the resource allocator.
#[derive(Clone, Debug)]
pub struct PlanarGrid {
    x_cells: u32,
    y_cells: u32,
    supply: Vec<u32>,
    demand: Vec<u32>,
}

impl PlanarGrid {
    pub fn edge_count(&self) -> usize {
        self.supply.len()
    }

    /// Dense slot of a planar edge on layer 0.
    pub fn slot_of(&self, e: GridEdge) -> Option<usize> {
        let to = e.to();
        if !e.is_planar() || to.x >= self.x_cells || to.y >= self.y_cells {
            return None;
        }
        Some((e.from.y as usize * self.x_cells as usize + e.from.x as usize) * 2 + slot(e.dir))
    }

    pub fn set_demand(&mut self, demand: Vec<u32>) {
        debug_assert_eq!(demand.len(), self.supply.len());
        self.demand = demand;
    }

    pub fn demands(&self) -> &[u32] {
        &self.demand
    }

    pub fn supplies(&self) -> &[u32] {
        &self.supply
    }
}

impl RoutingGrid for PlanarGrid {
    fn x_cells(&self) -> u32 {
        self.x_cells
    }
    fn y_cells(&self) -> u32 {
        self.y_cells
    }
    fn layers(&self) -> u8 {
        1
    }

    fn supply(&self, e: GridEdge) -> u32 {
        self.slot_of(e).map(|s| self.supply[s]).unwrap_or(0)
    }

    fn demand(&self, e: GridEdge) -> u32 {
        self.slot_of(e).map(|s| self.demand[s]).unwrap_or(0)
    }
}
