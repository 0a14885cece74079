use crate::error::RouteError;
use crate::shapes::{self, ShapeIndex};
use crate::task::{GCellBox, PriorityKey, StageTask};
use rayon::prelude::*;
use rt_common::db::core::{LayerData, NetlistDB, PinData};
use rt_common::db::indices::{NetId, PinId};
use rt_common::geom::coord::LayerPoint;
use rt_common::geom::rect::{LayerRect, Rect};
use serde::Serialize;

/// A legal point where a wire may land on a pin.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub struct AccessPoint {
    pub at: LayerPoint,
    /// Manhattan distance to the centre of the shape it sits on.
    pub distance: i64,
}

pub struct PinAccessTask {
    pub net: NetId,
    pub key: PriorityKey,
    pub window: GCellBox,
    pub pins: Vec<PinId>,
}

impl StageTask for PinAccessTask {
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

pub type PinAccessResult = Result<Vec<(PinId, Vec<AccessPoint>)>, RouteError>;

pub struct PinAccessor<'a> {
    layers: &'a [LayerData],
    foreign: &'a ShapeIndex,
    count: usize,
}

impl<'a> PinAccessor<'a> {
    /// `foreign` holds every pin shape and blockage; a pin's own net is
    /// filtered out at query time.
    pub fn new(layers: &'a [LayerData], foreign: &'a ShapeIndex, count: usize) -> Self {
        Self {
            layers,
            foreign,
            count: count.max(1),
        }
    }

    /// Adjacent layer running across `layer`, upper neighbour first.
    fn crossing_layer(&self, layer: &LayerData) -> Option<&LayerData> {
        let i = layer.index as usize;
        [i + 1, i.wrapping_sub(1)]
            .into_iter()
            .filter_map(|j| self.layers.get(j))
            .find(|l| l.direction != layer.direction)
    }

    fn candidates(&self, shape: &LayerRect) -> Vec<LayerPoint> {
        let layer = &self.layers[shape.layer as usize];
        let r = &shape.rect;
        let center = r.center();
        let horizontal = layer.direction.is_horizontal();

        // Tracks are half-open ranges; shape edges are inclusive.
        let (along_lo, along_hi, across_lo, across_hi) = if horizontal {
            (r.min.y, r.max.y + 1, r.min.x, r.max.x + 1)
        } else {
            (r.min.x, r.max.x + 1, r.min.y, r.max.y + 1)
        };
        let preferred = layer.tracks_in(along_lo, along_hi);
        if preferred.is_empty() {
            return vec![LayerPoint::at(center, shape.layer)];
        }
        let crossing = match self.crossing_layer(layer) {
            Some(c) => c.tracks_in(across_lo, across_hi),
            None => Vec::new(),
        };
        let crossing = if crossing.is_empty() {
            vec![if horizontal { center.x } else { center.y }]
        } else {
            crossing
        };

        let mut out = Vec::with_capacity(preferred.len() * crossing.len());
        for &t in &preferred {
            for &c in &crossing {
                let (x, y) = if horizontal { (c, t) } else { (t, c) };
                out.push(LayerPoint::new(x, y, shape.layer));
            }
        }
        out
    }

    /// Ranked legal access points of `pin`, best first.
    pub fn compute_access_points(&self, pin: &PinData) -> Result<Vec<AccessPoint>, RouteError> {
        let mut points: Vec<AccessPoint> = Vec::new();
        for shape in &pin.shapes {
            let Some(layer) = self.layers.get(shape.layer as usize) else {
                continue;
            };
            let hw = layer.half_width();
            let center = shape.rect.center();
            for at in self.candidates(shape) {
                let stub = LayerRect::new(at.layer, Rect::around(at.point(), hw, hw));
                if !shapes::is_clear(self.foreign, layer, &stub, pin.net) {
                    continue;
                }
                points.push(AccessPoint {
                    at,
                    distance: at.point().manhattan(&center),
                });
            }
        }

        points.sort_by_key(|p| (p.distance, p.at.layer, p.at.y, p.at.x));
        points.dedup_by_key(|p| p.at);
        points.truncate(self.count);

        if points.is_empty() {
            return Err(RouteError::NoLegalAccessPoint {
                pin: pin.name.clone(),
            });
        }
        Ok(points)
    }

    fn access_net(&self, db: &NetlistDB, task: &PinAccessTask) -> PinAccessResult {
        task.pins
            .iter()
            .map(|&p| Ok((p, self.compute_access_points(db.pin(p))?)))
            .collect()
    }

    /// Access points of every task's pins. Tasks only read shared state, so
    /// they all run at once.
    pub fn run(&self, db: &NetlistDB, tasks: &[PinAccessTask]) -> Vec<(NetId, PinAccessResult)> {
        log::info!("Starting Pin Access ({} nets)", tasks.len());
        tasks
            .par_iter()
            .map(|t| (t.net, self.access_net(db, t)))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shapes::Owner;
    use rt_common::db::core::{LayerDirection, SpacingRule};

    fn layers() -> Vec<LayerData> {
        [LayerDirection::Horizontal, LayerDirection::Vertical]
            .into_iter()
            .enumerate()
            .map(|(i, direction)| LayerData {
                name: format!("M{}", i + 1),
                index: i as u8,
                direction,
                pitch: 10,
                offset: 0,
                min_width: 4,
                spacing: SpacingRule::new(4),
                min_area: 0,
            })
            .collect()
    }

    fn pin(net: u32, rect: Rect) -> PinData {
        PinData {
            name: "p".into(),
            net: NetId(net),
            shapes: vec![LayerRect::new(0, rect)],
        }
    }

    #[test]
    fn ranks_track_crossings_by_distance() {
        let layers = layers();
        let index = ShapeIndex::new();
        let pa = PinAccessor::new(&layers, &index, 3);
        let points = pa
            .compute_access_points(&pin(0, Rect::from_coords(8, 8, 32, 12)))
            .unwrap();
        let xy: Vec<(i32, i32)> = points.iter().map(|p| (p.at.x, p.at.y)).collect();
        assert_eq!(xy, vec![(20, 10), (10, 10), (30, 10)]);
        assert_eq!(points[0].distance, 0);
    }

    #[test]
    fn shape_without_tracks_uses_its_centre() {
        let layers = layers();
        let index = ShapeIndex::new();
        let pa = PinAccessor::new(&layers, &index, 3);
        let points = pa
            .compute_access_points(&pin(0, Rect::from_coords(12, 12, 16, 16)))
            .unwrap();
        assert_eq!(points.len(), 1);
        assert_eq!(points[0].at, LayerPoint::new(14, 14, 0));
    }

    #[test]
    fn crowded_points_are_filtered() {
        let layers = layers();
        let index = ShapeIndex::bulk_load(vec![(
            LayerRect::new(0, Rect::from_coords(24, 0, 40, 20)),
            Owner::Blockage,
        )]);
        let pa = PinAccessor::new(&layers, &index, 3);
        let points = pa
            .compute_access_points(&pin(0, Rect::from_coords(8, 8, 32, 12)))
            .unwrap();
        assert_eq!(points.len(), 1);
        assert_eq!((points[0].at.x, points[0].at.y), (10, 10));

        let walled = ShapeIndex::bulk_load(vec![(
            LayerRect::new(0, Rect::from_coords(0, 0, 40, 20)),
            Owner::Net(NetId(5)),
        )]);
        let pa = PinAccessor::new(&layers, &walled, 3);
        assert!(matches!(
            pa.compute_access_points(&pin(0, Rect::from_coords(8, 8, 32, 12))),
            Err(RouteError::NoLegalAccessPoint { .. })
        ));
    }
}
