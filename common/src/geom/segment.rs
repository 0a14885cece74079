use super::coord::{GridCoord, LayerPoint};
use super::rect::Rect;
use serde::{Deserialize, Serialize};

/// One wire or via leg between two coordinates.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Segment<C> {
    pub first: C,
    pub second: C,
}

impl<C: Ord + Copy> Segment<C> {
    pub fn new(first: C, second: C) -> Self {
        Self { first, second }
    }

    /// Same leg with endpoints in ascending order, used to de-duplicate.
    pub fn normalized(&self) -> Self {
        if self.first <= self.second {
            *self
        } else {
            Self::new(self.second, self.first)
        }
    }
}

impl Segment<GridCoord> {
    pub fn is_via(&self) -> bool {
        self.first.z != self.second.z
    }

    pub fn is_horizontal(&self) -> bool {
        !self.is_via() && self.first.y == self.second.y && self.first.x != self.second.x
    }

    pub fn is_vertical(&self) -> bool {
        !self.is_via() && self.first.x == self.second.x && self.first.y != self.second.y
    }

    /// Planar length in GCells; via legs have length 0.
    pub fn length(&self) -> u32 {
        if self.is_via() {
            0
        } else {
            self.first.planar_distance(&self.second)
        }
    }
}

impl Segment<LayerPoint> {
    pub fn is_via(&self) -> bool {
        self.first.layer != self.second.layer
    }

    pub fn is_horizontal(&self) -> bool {
        !self.is_via() && self.first.y == self.second.y
    }

    pub fn length(&self) -> i64 {
        if self.is_via() {
            0
        } else {
            self.first.point().manhattan(&self.second.point())
        }
    }

    pub fn bbox(&self) -> Rect {
        Rect::new(self.first.point(), self.second.point())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn grid_segment_orientation() {
        let h = Segment::new(GridCoord::new(0, 2, 1), GridCoord::new(5, 2, 1));
        assert!(h.is_horizontal());
        assert_eq!(h.length(), 5);

        let v = Segment::new(GridCoord::new(3, 0, 0), GridCoord::new(3, 4, 0));
        assert!(v.is_vertical());

        let via = Segment::new(GridCoord::new(3, 4, 0), GridCoord::new(3, 4, 1));
        assert!(via.is_via());
        assert_eq!(via.length(), 0);
    }

    #[test]
    fn normalized_orders_endpoints() {
        let a = LayerPoint::new(10, 0, 0);
        let b = LayerPoint::new(0, 0, 0);
        let s = Segment::new(a, b);
        assert_eq!(s.normalized(), Segment::new(b, a));
        assert_eq!(s.normalized(), s.normalized().normalized());
        assert_eq!(s.length(), 10);
    }
}
