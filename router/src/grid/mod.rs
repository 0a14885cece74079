pub mod edge;
pub mod track;

pub use edge::{EdgeDir, EdgeGrid, GridEdge, PlanarGrid};
pub use track::{Claim, TrackKey, TrackOccupancy};

use rt_common::geom::coord::GridCoord;

/// A GCell graph with per-edge supply and demand.
pub trait RoutingGrid: Sync + Send {
    fn x_cells(&self) -> u32;
    fn y_cells(&self) -> u32;
    fn layers(&self) -> u8;

    fn supply(&self, edge: GridEdge) -> u32;
    fn demand(&self, edge: GridEdge) -> u32;

    fn contains(&self, c: GridCoord) -> bool {
        c.x < self.x_cells() && c.y < self.y_cells() && c.z < self.layers()
    }

    fn is_passable(&self, edge: GridEdge) -> bool {
        edge.dir == EdgeDir::Up || self.supply(edge) > 0
    }

    /// Up to six axis neighbours of `c` inside the grid.
    fn neighbors(&self, c: GridCoord) -> ([GridCoord; 6], usize) {
        let mut out = [c; 6];
        let mut n = 0;
        let mut push = |g: GridCoord| {
            out[n] = g;
            n += 1;
        };
        if c.x > 0 {
            push(GridCoord::new(c.x - 1, c.y, c.z));
        }
        if c.x + 1 < self.x_cells() {
            push(GridCoord::new(c.x + 1, c.y, c.z));
        }
        if c.y > 0 {
            push(GridCoord::new(c.x, c.y - 1, c.z));
        }
        if c.y + 1 < self.y_cells() {
            push(GridCoord::new(c.x, c.y + 1, c.z));
        }
        if c.z > 0 {
            push(GridCoord::new(c.x, c.y, c.z - 1));
        }
        if c.z + 1 < self.layers() {
            push(GridCoord::new(c.x, c.y, c.z + 1));
        }
        (out, n)
    }
}
