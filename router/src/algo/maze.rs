use crate::grid::RoutingGrid;
use crate::task::GCellBox;
use priority_queue::PriorityQueue;
use rt_common::geom::coord::GridCoord;
use std::cmp::Reverse;

/// Sub-box of the GCell graph a search may expand into.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SearchWindow {
    min_x: u32,
    max_x: u32,
    min_y: u32,
    max_y: u32,
    width: u32,
    height: u32,
    layers: u8,
}

impl SearchWindow {
    pub fn new(bbox: GCellBox, layers: u8) -> Self {
        Self {
            min_x: bbox.x0,
            max_x: bbox.x1,
            min_y: bbox.y0,
            max_y: bbox.y1,
            width: bbox.x1 - bbox.x0 + 1,
            height: bbox.y1 - bbox.y0 + 1,
            layers,
        }
    }

    pub fn full<G: RoutingGrid + ?Sized>(grid: &G) -> Self {
        Self::new(
            GCellBox {
                x0: 0,
                y0: 0,
                x1: grid.x_cells().saturating_sub(1),
                y1: grid.y_cells().saturating_sub(1),
            },
            grid.layers(),
        )
    }

    #[inline(always)]
    pub fn contains(&self, c: GridCoord) -> bool {
        c.x >= self.min_x
            && c.x <= self.max_x
            && c.y >= self.min_y
            && c.y <= self.max_y
            && c.z < self.layers
    }

    pub fn size(&self) -> usize {
        self.width as usize * self.height as usize * self.layers as usize
    }

    #[inline(always)]
    fn local_idx(&self, c: GridCoord) -> usize {
        let lx = c.x - self.min_x;
        let ly = c.y - self.min_y;
        let lz = c.z as u32;
        (lz * self.width * self.height + ly * self.width + lx) as usize
    }

    #[inline(always)]
    fn coord(&self, idx: u32) -> GridCoord {
        let plane = self.width * self.height;
        let z = (idx / plane) as u8;
        let rem = idx % plane;
        GridCoord::new(rem % self.width + self.min_x, rem / self.width + self.min_y, z)
    }
}

/// Multi-source A* over a GCell graph. Buffers are reused across searches,
/// so keep one solver per worker.
#[derive(Clone)]
pub struct MazeSolver {
    parents: Vec<u32>,
    g_score: Vec<i64>,
    visited_tag: Vec<u32>,
    current_tag: u32,
    frontier: PriorityQueue<u32, Reverse<(i64, u32)>>,
}

impl Default for MazeSolver {
    fn default() -> Self {
        Self::new()
    }
}

impl MazeSolver {
    pub fn new() -> Self {
        let cap = 16_384;
        Self {
            parents: vec![u32::MAX; cap],
            g_score: vec![i64::MAX; cap],
            visited_tag: vec![0; cap],
            current_tag: 1,
            frontier: PriorityQueue::new(),
        }
    }

    fn ensure_capacity(&mut self, size: usize) {
        if size > self.parents.len() {
            let cap = size.max(self.parents.len() * 2);
            self.parents.resize(cap, u32::MAX);
            self.g_score.resize(cap, i64::MAX);
            self.visited_tag.resize(cap, 0);
        }
    }

    fn reset_window(&mut self) {
        self.current_tag = self.current_tag.wrapping_add(1);
        if self.current_tag == 0 {
            self.visited_tag.fill(0);
            self.current_tag = 1;
        }
        self.frontier.clear();
    }

    /// Cheapest path from any of `sources` to `end` inside `window`.
    ///
    /// `step` prices a move between adjacent cells and returns `None` for an
    /// impassable one. `unit` must not exceed the cost of any planar step, so
    /// the Manhattan heuristic stays admissible. Ties are broken by cell
    /// index, which makes the result deterministic.
    pub fn find_path<G, F>(
        &mut self,
        grid: &G,
        window: &SearchWindow,
        sources: &[GridCoord],
        end: GridCoord,
        unit: i64,
        step: F,
    ) -> Option<Vec<GridCoord>>
    where
        G: RoutingGrid + ?Sized,
        F: Fn(GridCoord, GridCoord) -> Option<i64>,
    {
        if !window.contains(end) {
            return None;
        }
        self.ensure_capacity(window.size());
        self.reset_window();

        let h = |c: GridCoord| (c.x.abs_diff(end.x) + c.y.abs_diff(end.y)) as i64 * unit;

        for &s in sources {
            if !window.contains(s) || !grid.contains(s) {
                continue;
            }
            let idx = window.local_idx(s);
            self.g_score[idx] = 0;
            self.visited_tag[idx] = self.current_tag;
            self.parents[idx] = u32::MAX;
            self.frontier.push_increase(idx as u32, Reverse((h(s), idx as u32)));
        }

        while let Some((index, _)) = self.frontier.pop() {
            let curr = index as usize;
            let position = window.coord(index);
            if position == end {
                return Some(self.reconstruct_path(end, window));
            }
            let current_g = self.g_score[curr];

            let (neighbors, count) = grid.neighbors(position);
            for &next in &neighbors[..count] {
                if !window.contains(next) {
                    continue;
                }
                let Some(cost) = step(position, next) else {
                    continue;
                };
                let tentative = current_g + cost;
                let n = window.local_idx(next);
                if self.visited_tag[n] != self.current_tag || tentative < self.g_score[n] {
                    self.parents[n] = curr as u32;
                    self.g_score[n] = tentative;
                    self.visited_tag[n] = self.current_tag;
                    self.frontier
                        .push_increase(n as u32, Reverse((tentative + h(next), n as u32)));
                }
            }
        }
        None
    }

    fn reconstruct_path(&self, end: GridCoord, window: &SearchWindow) -> Vec<GridCoord> {
        let mut path = Vec::new();
        let mut curr = window.local_idx(end);
        loop {
            path.push(window.coord(curr as u32));
            let parent = self.parents[curr];
            if parent == u32::MAX {
                break;
            }
            curr = parent as usize;
        }
        path.reverse();
        path
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grid::{EdgeDir, EdgeGrid, GridEdge};

    fn open_grid(x: u32, y: u32, z: u8) -> EdgeGrid {
        let mut grid = EdgeGrid::new(x, y, z);
        for l in 0..z {
            for j in 0..y {
                for i in 0..x {
                    let c = GridCoord::new(i, j, l);
                    grid.set_supply(GridEdge::new(c, EdgeDir::East), 1);
                    grid.set_supply(GridEdge::new(c, EdgeDir::North), 1);
                }
            }
        }
        grid
    }

    fn uniform(grid: &EdgeGrid) -> impl Fn(GridCoord, GridCoord) -> Option<i64> + '_ {
        move |a, b| {
            let e = GridEdge::between(a, b)?;
            if !grid.is_passable(e) {
                return None;
            }
            Some(if e.is_planar() { 1000 } else { 4000 })
        }
    }

    #[test]
    fn finds_shortest_planar_path() {
        let grid = open_grid(6, 6, 1);
        let mut solver = MazeSolver::new();
        let window = SearchWindow::full(&grid);
        let path = solver
            .find_path(&grid, &window, &[GridCoord::new(0, 0, 0)], GridCoord::new(3, 2, 0), 1000, uniform(&grid))
            .unwrap();
        assert_eq!(path.len(), 6);
        assert_eq!(path[0], GridCoord::new(0, 0, 0));
        assert_eq!(path[5], GridCoord::new(3, 2, 0));
    }

    #[test]
    fn multi_source_starts_from_nearest_tree_cell() {
        let grid = open_grid(8, 8, 1);
        let mut solver = MazeSolver::new();
        let window = SearchWindow::full(&grid);
        let tree: Vec<GridCoord> = (0..8).map(|x| GridCoord::new(x, 0, 0)).collect();
        let path = solver
            .find_path(&grid, &window, &tree, GridCoord::new(5, 4, 0), 1000, uniform(&grid))
            .unwrap();
        assert_eq!(path[0], GridCoord::new(5, 0, 0));
        assert_eq!(path.len(), 5);
    }

    #[test]
    fn respects_window_and_blocked_edges() {
        let mut grid = open_grid(5, 5, 2);
        for y in 0..5 {
            grid.set_supply(GridEdge::new(GridCoord::new(1, y, 0), EdgeDir::East), 0);
        }
        let mut solver = MazeSolver::new();
        let window = SearchWindow::full(&grid);
        let path = solver
            .find_path(&grid, &window, &[GridCoord::new(0, 0, 0)], GridCoord::new(4, 0, 0), 1000, uniform(&grid))
            .unwrap();
        assert!(path.iter().any(|c| c.z == 1));

        let narrow = SearchWindow::new(GCellBox { x0: 0, y0: 0, x1: 4, y1: 4 }, 1);
        assert!(solver
            .find_path(&grid, &narrow, &[GridCoord::new(0, 0, 0)], GridCoord::new(4, 0, 0), 1000, uniform(&grid))
            .is_none());
    }
}
