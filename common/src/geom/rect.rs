use super::point::Point;
use serde::{Deserialize, Serialize};

/// Axis-aligned rectangle in database units. `min` is inclusive, `max` is inclusive.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Rect {
    pub min: Point<i32>,
    pub max: Point<i32>,
}

impl Rect {
    pub fn new(a: Point<i32>, b: Point<i32>) -> Self {
        Self {
            min: Point::new(a.x.min(b.x), a.y.min(b.y)),
            max: Point::new(a.x.max(b.x), a.y.max(b.y)),
        }
    }

    pub fn from_coords(x1: i32, y1: i32, x2: i32, y2: i32) -> Self {
        Self::new(Point::new(x1, y1), Point::new(x2, y2))
    }

    pub fn around(center: Point<i32>, half_w: i32, half_h: i32) -> Self {
        Self::from_coords(
            center.x - half_w,
            center.y - half_h,
            center.x + half_w,
            center.y + half_h,
        )
    }

    pub fn width(&self) -> i32 {
        self.max.x - self.min.x
    }
    pub fn height(&self) -> i32 {
        self.max.y - self.min.y
    }
    pub fn area(&self) -> i64 {
        self.width() as i64 * self.height() as i64
    }
    pub fn min_side(&self) -> i32 {
        self.width().min(self.height())
    }
    pub fn half_perimeter(&self) -> i64 {
        self.width() as i64 + self.height() as i64
    }

    pub fn center(&self) -> Point<i32> {
        Point::new(
            self.min.x + self.width() / 2,
            self.min.y + self.height() / 2,
        )
    }

    /// Interiors overlap; touching edges do not count.
    pub fn overlaps(&self, other: &Rect) -> bool {
        self.min.x < other.max.x
            && self.max.x > other.min.x
            && self.min.y < other.max.y
            && self.max.y > other.min.y
    }

    /// Closed rectangles share at least one point.
    pub fn touches(&self, other: &Rect) -> bool {
        self.min.x <= other.max.x
            && self.max.x >= other.min.x
            && self.min.y <= other.max.y
            && self.max.y >= other.min.y
    }

    pub fn contains(&self, p: Point<i32>) -> bool {
        p.x >= self.min.x && p.x <= self.max.x && p.y >= self.min.y && p.y <= self.max.y
    }

    pub fn expand(&self, d: i32) -> Rect {
        Rect {
            min: Point::new(self.min.x - d, self.min.y - d),
            max: Point::new(self.max.x + d, self.max.y + d),
        }
    }

    pub fn union(&self, other: &Rect) -> Rect {
        Rect {
            min: Point::new(self.min.x.min(other.min.x), self.min.y.min(other.min.y)),
            max: Point::new(self.max.x.max(other.max.x), self.max.y.max(other.max.y)),
        }
    }

    pub fn intersection(&self, other: &Rect) -> Option<Rect> {
        if !self.touches(other) {
            return None;
        }
        Some(Rect {
            min: Point::new(self.min.x.max(other.min.x), self.min.y.max(other.min.y)),
            max: Point::new(self.max.x.min(other.max.x), self.max.y.min(other.max.y)),
        })
    }

    pub fn translate(&self, by: Point<i32>) -> Rect {
        Rect {
            min: self.min + by,
            max: self.max + by,
        }
    }

    /// Squared euclidean gap between two rectangles, 0 when they touch.
    pub fn distance_sq(&self, other: &Rect) -> i64 {
        let dx = (other.min.x as i64 - self.max.x as i64)
            .max(self.min.x as i64 - other.max.x as i64)
            .max(0);
        let dy = (other.min.y as i64 - self.max.y as i64)
            .max(self.min.y as i64 - other.max.y as i64)
            .max(0);
        dx * dx + dy * dy
    }

    /// True when the gap to `other` is smaller than `spacing`.
    pub fn within_spacing(&self, other: &Rect, spacing: i32) -> bool {
        let s = spacing as i64;
        self.distance_sq(other) < s * s
    }

    pub fn bounding<I: IntoIterator<Item = Point<i32>>>(points: I) -> Option<Rect> {
        let mut iter = points.into_iter();
        let first = iter.next()?;
        let mut r = Rect::new(first, first);
        for p in iter {
            r = r.union(&Rect::new(p, p));
        }
        Some(r)
    }
}

/// A rectangle on a specific routing layer.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LayerRect {
    pub layer: u8,
    pub rect: Rect,
}

impl LayerRect {
    pub fn new(layer: u8, rect: Rect) -> Self {
        Self { layer, rect }
    }
}

/// Area covered by the union of `rects`, by coordinate compression.
pub fn union_area(rects: &[Rect]) -> i64 {
    if rects.is_empty() {
        return 0;
    }
    let mut xs: Vec<i32> = rects.iter().flat_map(|r| [r.min.x, r.max.x]).collect();
    let mut ys: Vec<i32> = rects.iter().flat_map(|r| [r.min.y, r.max.y]).collect();
    xs.sort_unstable();
    xs.dedup();
    ys.sort_unstable();
    ys.dedup();

    let mut area = 0i64;
    for wx in xs.windows(2) {
        for wy in ys.windows(2) {
            let covered = rects.iter().any(|r| {
                r.min.x <= wx[0] && r.max.x >= wx[1] && r.min.y <= wy[0] && r.max.y >= wy[1]
            });
            if covered {
                area += (wx[1] - wx[0]) as i64 * (wy[1] - wy[0]) as i64;
            }
        }
    }
    area
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_normalizes_corners() {
        let r = Rect::from_coords(10, 5, 0, 0);
        assert_eq!(r.min, Point::new(0, 0));
        assert_eq!(r.max, Point::new(10, 5));
        assert_eq!(r.area(), 50);
    }

    #[test]
    fn touching_is_not_overlapping() {
        let a = Rect::from_coords(0, 0, 10, 10);
        let b = Rect::from_coords(10, 0, 20, 10);
        assert!(!a.overlaps(&b));
        assert!(a.touches(&b));
        assert_eq!(a.distance_sq(&b), 0);
    }

    #[test]
    fn corner_gap_is_euclidean() {
        let a = Rect::from_coords(0, 0, 10, 10);
        let b = Rect::from_coords(13, 14, 20, 20);
        assert_eq!(a.distance_sq(&b), 9 + 16);
        assert!(a.within_spacing(&b, 6));
        assert!(!a.within_spacing(&b, 5));
    }

    #[test]
    fn union_area_counts_overlap_once() {
        let rects = [
            Rect::from_coords(0, 0, 10, 2),
            Rect::from_coords(8, 0, 10, 10),
        ];
        assert_eq!(union_area(&rects), 20 + 16);
    }

    #[test]
    fn bounding_of_points() {
        let r = Rect::bounding([Point::new(3, 9), Point::new(-1, 2), Point::new(4, 4)]).unwrap();
        assert_eq!(r, Rect::from_coords(-1, 2, 4, 9));
        assert!(Rect::bounding(std::iter::empty()).is_none());
    }
}
