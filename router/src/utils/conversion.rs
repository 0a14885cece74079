use crate::task::GCellBox;
use rt_common::db::gcell::GCellAxis;
use rt_common::geom::coord::{GridCoord, LayerPoint};
use rt_common::geom::point::Point;
use rt_common::geom::rect::Rect;

/// Maps between database coordinates and GCell indices.
#[derive(Clone, Copy)]
pub struct GridConverter<'a> {
    axis: &'a GCellAxis,
}

impl<'a> GridConverter<'a> {
    pub fn new(axis: &'a GCellAxis) -> Self {
        Self { axis }
    }

    pub fn to_grid(&self, p: Point<i32>, layer: u8) -> GridCoord {
        let (x, y) = self.axis.locate(p);
        GridCoord::new(x, y, layer)
    }

    pub fn point_to_grid(&self, p: LayerPoint) -> GridCoord {
        self.to_grid(p.point(), p.layer)
    }

    /// Centre of the GCell.
    pub fn to_world(&self, g: GridCoord) -> Point<i32> {
        self.axis.cell_center(g.x, g.y)
    }

    pub fn cell_rect(&self, g: GridCoord) -> Rect {
        self.axis.cell_rect(g.x, g.y)
    }

    pub fn cover(&self, r: &Rect) -> GCellBox {
        let (x0, x1, y0, y1) = self.axis.cover(r);
        GCellBox { x0, y0, x1, y1 }
    }

    pub fn x_cells(&self) -> u32 {
        self.axis.x_cells()
    }

    pub fn y_cells(&self) -> u32 {
        self.axis.y_cells()
    }
}
