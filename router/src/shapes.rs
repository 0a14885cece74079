//! Ownership-tagged shape index shared by pin access, lowering and repair.

use rt_common::db::core::{LayerData, NetlistDB};
use rt_common::db::indices::NetId;
use rt_common::geom::rect::{LayerRect, Rect};
use rt_common::geom::rtree::SpatialIndex;
use serde::Serialize;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub enum Owner {
    Blockage,
    Net(NetId),
}

impl Owner {
    pub fn net(&self) -> Option<NetId> {
        match self {
            Owner::Net(n) => Some(*n),
            Owner::Blockage => None,
        }
    }
}

pub type ShapeIndex = SpatialIndex<Owner>;

/// Pins of every net plus blockages.
pub fn fixed_shapes(db: &NetlistDB) -> Vec<(LayerRect, Owner)> {
    db.pins
        .iter()
        .flat_map(|p| p.shapes.iter().map(move |s| (*s, Owner::Net(p.net))))
        .chain(db.blockages.iter().map(|b| (*b, Owner::Blockage)))
        .collect()
}

/// Spacing required between two shapes on `layer`, driven by the wider one.
pub fn required_spacing(layer: &LayerData, a: &Rect, b: &Rect) -> i32 {
    layer.spacing.spacing_for(a.min_side().max(b.min_side()))
}

/// First shape owned by someone other than `net` that `shape` crowds.
pub fn first_conflict(
    index: &ShapeIndex,
    layer: &LayerData,
    shape: &LayerRect,
    net: NetId,
) -> Option<(Owner, Rect)> {
    let reach = shape.rect.expand(layer.spacing.max_spacing());
    index
        .query(shape.layer, reach)
        .filter(|e| e.data != Owner::Net(net))
        .find(|e| {
            e.shape.rect.overlaps(&shape.rect)
                || shape
                    .rect
                    .within_spacing(&e.shape.rect, required_spacing(layer, &shape.rect, &e.shape.rect))
        })
        .map(|e| (e.data, e.shape.rect))
}

pub fn is_clear(index: &ShapeIndex, layer: &LayerData, shape: &LayerRect, net: NetId) -> bool {
    first_conflict(index, layer, shape, net).is_none()
}

/// Squared intrusion of foreign shapes into a halo of `halo` around `shape`.
pub fn halo_intrusion(index: &ShapeIndex, shape: &LayerRect, net: NetId, halo: i32) -> i64 {
    let h = halo as i64;
    index
        .query(shape.layer, shape.rect.expand(halo))
        .filter(|e| e.data != Owner::Net(net))
        .map(|e| (h * h - shape.rect.distance_sq(&e.shape.rect)).max(0))
        .sum()
}

#[cfg(test)]
mod tests {
    use super::*;
    use rt_common::db::core::{LayerDirection, SpacingRule};

    fn layer() -> LayerData {
        LayerData {
            name: "M1".into(),
            index: 0,
            direction: LayerDirection::Horizontal,
            pitch: 10,
            offset: 0,
            min_width: 4,
            spacing: SpacingRule {
                min_spacing: 4,
                width_table: vec![(10, 8)],
            },
            min_area: 0,
        }
    }

    #[test]
    fn own_shapes_never_conflict() {
        let index = ShapeIndex::bulk_load(vec![(
            LayerRect::new(0, Rect::from_coords(0, 0, 4, 4)),
            Owner::Net(NetId(1)),
        )]);
        let candidate = LayerRect::new(0, Rect::from_coords(5, 0, 9, 4));
        assert!(is_clear(&index, &layer(), &candidate, NetId(1)));
        assert!(!is_clear(&index, &layer(), &candidate, NetId(2)));
    }

    #[test]
    fn wide_shapes_need_wider_spacing() {
        let index = ShapeIndex::bulk_load(vec![(
            LayerRect::new(0, Rect::from_coords(0, 0, 20, 20)),
            Owner::Blockage,
        )]);
        let near = LayerRect::new(0, Rect::from_coords(26, 0, 30, 4));
        let far = LayerRect::new(0, Rect::from_coords(28, 0, 32, 4));
        assert!(!is_clear(&index, &layer(), &near, NetId(0)));
        assert!(is_clear(&index, &layer(), &far, NetId(0)));
        assert!(halo_intrusion(&index, &near, NetId(0), 8) > halo_intrusion(&index, &far, NetId(0), 8));
    }
}
