use crate::error::DbError;
use crate::geom::point::Point;
use crate::geom::rect::Rect;
use serde::{Deserialize, Serialize};

/// Grid lines of the (possibly non-uniform) coarse routing grid.
///
/// Cell `i` on an axis covers `[lines[i], lines[i + 1])`; the last cell also
/// owns its upper line. Coordinates outside the grid clamp to the border cell.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct GCellAxis {
    x_lines: Vec<i32>,
    y_lines: Vec<i32>,
}

impl GCellAxis {
    pub fn new(x_lines: Vec<i32>, y_lines: Vec<i32>) -> Result<Self, DbError> {
        let axis = Self { x_lines, y_lines };
        axis.validate()?;
        Ok(axis)
    }

    /// Uniform grid of `step` over `die`; the last cell absorbs the remainder.
    pub fn uniform(die: Rect, step: i32) -> Result<Self, DbError> {
        if step <= 0 {
            return Err(DbError::InvalidGCellStep(step));
        }
        let lines = |lo: i32, hi: i32| {
            let mut v: Vec<i32> = (lo..hi).step_by(step as usize).collect();
            v.push(hi);
            v
        };
        Self::new(
            lines(die.min.x, die.max.x),
            lines(die.min.y, die.max.y),
        )
    }

    pub fn validate(&self) -> Result<(), DbError> {
        for (axis, lines) in [('x', &self.x_lines), ('y', &self.y_lines)] {
            if lines.len() < 2 {
                return Err(DbError::AxisTooShort { axis });
            }
            if let Some(index) = lines.windows(2).position(|w| w[0] >= w[1]) {
                return Err(DbError::AxisNotIncreasing {
                    axis,
                    index: index + 1,
                });
            }
        }
        Ok(())
    }

    pub fn x_cells(&self) -> u32 {
        (self.x_lines.len() - 1) as u32
    }
    pub fn y_cells(&self) -> u32 {
        (self.y_lines.len() - 1) as u32
    }

    pub fn x_lines(&self) -> &[i32] {
        &self.x_lines
    }
    pub fn y_lines(&self) -> &[i32] {
        &self.y_lines
    }

    fn locate_in(lines: &[i32], c: i32) -> u32 {
        let cells = lines.len() - 1;
        let upper = lines.partition_point(|&l| l <= c);
        upper.saturating_sub(1).min(cells - 1) as u32
    }

    pub fn locate_x(&self, x: i32) -> u32 {
        Self::locate_in(&self.x_lines, x)
    }
    pub fn locate_y(&self, y: i32) -> u32 {
        Self::locate_in(&self.y_lines, y)
    }

    pub fn locate(&self, p: Point<i32>) -> (u32, u32) {
        (self.locate_x(p.x), self.locate_y(p.y))
    }

    pub fn x_span(&self, gx: u32) -> (i32, i32) {
        (self.x_lines[gx as usize], self.x_lines[gx as usize + 1])
    }
    pub fn y_span(&self, gy: u32) -> (i32, i32) {
        (self.y_lines[gy as usize], self.y_lines[gy as usize + 1])
    }

    pub fn cell_rect(&self, gx: u32, gy: u32) -> Rect {
        let (x0, x1) = self.x_span(gx);
        let (y0, y1) = self.y_span(gy);
        Rect::from_coords(x0, y0, x1, y1)
    }

    pub fn cell_center(&self, gx: u32, gy: u32) -> Point<i32> {
        self.cell_rect(gx, gy).center()
    }

    /// GCell-index box covering a real-coordinate box.
    pub fn cover(&self, r: &Rect) -> (u32, u32, u32, u32) {
        let (x0, y0) = self.locate(r.min);
        let (x1, y1) = self.locate(r.max);
        (x0, x1, y0, y1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_coordinate_maps_to_one_cell() {
        let axis = GCellAxis::new(vec![0, 10, 25, 40], vec![0, 5]).unwrap();
        assert_eq!(axis.locate_x(0), 0);
        assert_eq!(axis.locate_x(9), 0);
        assert_eq!(axis.locate_x(10), 1);
        assert_eq!(axis.locate_x(24), 1);
        assert_eq!(axis.locate_x(25), 2);
        assert_eq!(axis.locate_x(40), 2);
        assert_eq!(axis.locate_x(-7), 0);
        assert_eq!(axis.locate_x(1000), 2);
        assert_eq!(axis.x_cells(), 3);
    }

    #[test]
    fn rejects_non_increasing_lines() {
        let err = GCellAxis::new(vec![0, 10, 10], vec![0, 5]).unwrap_err();
        assert!(matches!(err, DbError::AxisNotIncreasing { axis: 'x', index: 2 }));
        assert!(GCellAxis::new(vec![0], vec![0, 5]).is_err());
    }

    #[test]
    fn uniform_absorbs_remainder() {
        let axis = GCellAxis::uniform(Rect::from_coords(0, 0, 25, 20), 10).unwrap();
        assert_eq!(axis.x_lines(), &[0, 10, 20, 25]);
        assert_eq!(axis.y_lines(), &[0, 10, 20]);
        assert_eq!(axis.cell_center(1, 1), Point::new(15, 15));
    }
}
