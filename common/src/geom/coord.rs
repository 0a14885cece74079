use super::point::Point;
use serde::{Deserialize, Serialize};

/// Cell of the 3-D GCell graph: column, row and routing layer.
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize,
)]
pub struct GridCoord {
    pub x: u32,
    pub y: u32,
    pub z: u8,
}

impl GridCoord {
    pub fn new(x: u32, y: u32, z: u8) -> Self {
        Self { x, y, z }
    }

    pub fn planar_distance(&self, other: &GridCoord) -> u32 {
        self.x.abs_diff(other.x) + self.y.abs_diff(other.y)
    }
}

/// An exact coordinate on a routing layer.
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize,
)]
pub struct LayerPoint {
    pub layer: u8,
    pub x: i32,
    pub y: i32,
}

impl LayerPoint {
    pub fn new(x: i32, y: i32, layer: u8) -> Self {
        Self { layer, x, y }
    }

    pub fn at(p: Point<i32>, layer: u8) -> Self {
        Self::new(p.x, p.y, layer)
    }

    pub fn point(&self) -> Point<i32> {
        Point::new(self.x, self.y)
    }
}
