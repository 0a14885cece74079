use crate::algo::batch::run_waves;
use crate::error::RouteError;
use crate::global_router::CoarseTree;
use crate::grid::{TrackKey, TrackOccupancy};
use crate::task::{GCellBox, PriorityKey, StageTask};
use rt_common::db::core::LayerData;
use rt_common::db::gcell::GCellAxis;
use rt_common::db::indices::NetId;
use rt_common::geom::coord::LayerPoint;
use rt_common::util::config::TrackAssignmentConfig;
use serde::Serialize;
use std::collections::BTreeSet;

/// Cells a track assignment window adds around the coarse tree.
pub const WINDOW_MARGIN: u32 = 2;

pub struct TrackAssignTask {
    pub net: NetId,
    pub key: PriorityKey,
    pub window: GCellBox,
    pub tree: CoarseTree,
    /// Where the net lands on its pins; pulls tracks toward them.
    pub pin_points: Vec<LayerPoint>,
    /// Track coordinates this net must not use.
    pub avoid: BTreeSet<TrackKey>,
}

impl StageTask for TrackAssignTask {
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

/// One planar coarse segment placed on a track.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub struct AssignedSegment {
    /// Index of the coarse segment in the net's tree.
    pub coarse: usize,
    pub layer: u8,
    pub horizontal: bool,
    pub track: i32,
    /// GCell row (horizontal) or column (vertical) holding the track.
    pub panel: u32,
    /// First and last GCell along the run, inclusive.
    pub lo: u32,
    pub hi: u32,
}

impl AssignedSegment {
    pub fn key(&self) -> TrackKey {
        TrackKey {
            layer: self.layer,
            horizontal: self.horizontal,
            coord: self.track,
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct TrackPath {
    pub net: NetId,
    pub segments: Vec<AssignedSegment>,
    /// Every interval the net holds, for exact release.
    pub claims: Vec<(TrackKey, i32, i32)>,
}

pub struct TrackAssigner<'a> {
    axis: &'a GCellAxis,
    layers: &'a [LayerData],
    occupancy: &'a TrackOccupancy,
    config: &'a TrackAssignmentConfig,
}

impl<'a> TrackAssigner<'a> {
    pub fn new(
        axis: &'a GCellAxis,
        layers: &'a [LayerData],
        occupancy: &'a TrackOccupancy,
        config: &'a TrackAssignmentConfig,
    ) -> Self {
        Self {
            axis,
            layers,
            occupancy,
            config,
        }
    }

    /// Coordinate span of cells `lo..=hi` along the run axis.
    fn span(&self, horizontal: bool, lo: u32, hi: u32) -> (i32, i32) {
        if horizontal {
            (self.axis.x_span(lo).0, self.axis.x_span(hi).1)
        } else {
            (self.axis.y_span(lo).0, self.axis.y_span(hi).1)
        }
    }

    fn cells_along(&self, horizontal: bool) -> u32 {
        if horizontal {
            self.axis.x_cells()
        } else {
            self.axis.y_cells()
        }
    }

    /// Coordinate the track should hug: a pin landing in one of the end
    /// cells, else the middle of the panel.
    fn preferred(&self, task: &TrackAssignTask, seg: &AssignedSegment, panel: (i32, i32)) -> i32 {
        let ends = [seg.lo, seg.hi];
        task.pin_points
            .iter()
            .find(|p| {
                let (gx, gy) = self.axis.locate(p.point());
                if seg.horizontal {
                    gy == seg.panel && ends.contains(&gx)
                } else {
                    gx == seg.panel && ends.contains(&gy)
                }
            })
            .map(|p| if seg.horizontal { p.y } else { p.x })
            .unwrap_or((panel.0 + panel.1) / 2)
    }

    pub fn assign(&self, task: &TrackAssignTask) -> Result<TrackPath, RouteError> {
        let mut path = TrackPath {
            net: task.net,
            ..TrackPath::default()
        };
        let occupancy_weight = if task.key.critical {
            self.config.occupancy_weight * 0.5
        } else {
            self.config.occupancy_weight
        };

        for (i, seg) in task.tree.segments.iter().enumerate() {
            if seg.is_via() || seg.length() == 0 {
                continue;
            }
            let horizontal = seg.is_horizontal();
            let z = seg.first.z;
            let Some(layer) = self.layers.get(z as usize) else {
                continue;
            };
            if horizontal != layer.direction.is_horizontal() {
                self.occupancy.release(task.net, &path.claims);
                return Err(RouteError::WrongWaySegment {
                    segment: i,
                    layer: z,
                });
            }
            let (panel, lo, hi) = if horizontal {
                (seg.first.y, seg.first.x.min(seg.second.x), seg.first.x.max(seg.second.x))
            } else {
                (seg.first.x, seg.first.y.min(seg.second.y), seg.first.y.max(seg.second.y))
            };
            let panel_span = if horizontal {
                self.axis.y_span(panel)
            } else {
                self.axis.x_span(panel)
            };
            let mut assigned = AssignedSegment {
                coarse: i,
                layer: z,
                horizontal,
                track: 0,
                panel,
                lo,
                hi,
            };
            let (claim_lo, claim_hi) = self.span(horizontal, lo, hi);
            let (load_lo, load_hi) = self.span(
                horizontal,
                lo.saturating_sub(1),
                (hi + 1).min(self.cells_along(horizontal) - 1),
            );
            let preferred = self.preferred(task, &assigned, panel_span);
            let key_of = |coord| TrackKey {
                layer: z,
                horizontal,
                coord,
            };

            let mut scored: Vec<(f64, i32)> = layer
                .tracks_in(panel_span.0, panel_span.1)
                .into_iter()
                .filter(|&c| !task.avoid.contains(&key_of(c)))
                .map(|c| {
                    let load = self.occupancy.load(key_of(c), task.net, load_lo, load_hi) as f64;
                    let offset = (c - preferred).abs() as f64 / layer.pitch as f64;
                    (
                        load * occupancy_weight + offset * self.config.alignment_weight,
                        c,
                    )
                })
                .collect();
            scored.sort_by(|a, b| a.0.total_cmp(&b.0).then(a.1.cmp(&b.1)));

            let won = scored
                .into_iter()
                .map(|(_, c)| c)
                .find(|&c| self.occupancy.try_claim(key_of(c), task.net, claim_lo, claim_hi));
            match won {
                Some(c) => {
                    assigned.track = c;
                    path.claims.push((key_of(c), claim_lo, claim_hi));
                    path.segments.push(assigned);
                }
                None => {
                    self.occupancy.release(task.net, &path.claims);
                    return Err(RouteError::NoAvailableTrack {
                        segment: i,
                        layer: z,
                    });
                }
            }
        }
        Ok(path)
    }

    pub fn release(&self, path: &TrackPath) {
        self.occupancy.release(path.net, &path.claims);
    }

    /// Assigns tracks wave by wave. Claims are taken inside the parallel
    /// section under per-coordinate locks; waves never share a cell, so the
    /// outcome does not depend on thread timing.
    pub fn run(&self, tasks: Vec<TrackAssignTask>) -> Vec<(NetId, Result<TrackPath, RouteError>)> {
        log::info!("Starting Track Assignment ({} nets)", tasks.len());
        let mut results = Vec::with_capacity(tasks.len());
        run_waves(
            "TA",
            tasks,
            self.axis.x_cells(),
            self.axis.y_cells(),
            (),
            |_, task| self.assign(task),
            |task, result| results.push((task.net, result)),
        );
        log::info!("TA done: {} claims held", self.occupancy.total_claims());
        results
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rt_common::db::core::{LayerDirection, SpacingRule};
    use rt_common::geom::coord::GridCoord;
    use rt_common::geom::rect::Rect;
    use rt_common::geom::segment::Segment;

    fn layers() -> Vec<LayerData> {
        vec![LayerData {
            name: "M1".into(),
            index: 0,
            direction: LayerDirection::Horizontal,
            pitch: 10,
            offset: 0,
            min_width: 4,
            spacing: SpacingRule::new(4),
            min_area: 0,
        }]
    }

    fn axis() -> GCellAxis {
        GCellAxis::uniform(Rect::from_coords(0, 0, 100, 40), 20).unwrap()
    }

    fn task(net: u32, critical: bool, x0: u32, x1: u32, pins: Vec<LayerPoint>) -> TrackAssignTask {
        let a = GridCoord::new(x0, 0, 0);
        let b = GridCoord::new(x1, 0, 0);
        TrackAssignTask {
            net: NetId(net),
            key: PriorityKey {
                critical,
                fanout: 2,
                bbox_size: 0,
                net: NetId(net),
            },
            window: GCellBox { x0, y0: 0, x1, y1: 0 },
            tree: CoarseTree {
                net: NetId(net),
                segments: vec![Segment::new(a, b)],
                edges: Vec::new(),
                terminals: vec![a, b],
            },
            pin_points: pins,
            avoid: BTreeSet::new(),
        }
    }

    #[test]
    fn picks_panel_centre_then_lower_coordinate() {
        let (axis, layers) = (axis(), layers());
        let occ = TrackOccupancy::new();
        let config = TrackAssignmentConfig::default();
        let ta = TrackAssigner::new(&axis, &layers, &occ, &config);
        // Row 0 spans [0, 20): tracks 0 and 10, centre 10.
        let path = ta.assign(&task(0, false, 0, 2, vec![])).unwrap();
        assert_eq!(path.segments[0].track, 10);
        assert_eq!(path.claims, vec![(path.segments[0].key(), 0, 60)]);

        // Track 10 is now taken on the overlapping span; 0 is the only other.
        let path = ta.assign(&task(1, false, 2, 4, vec![])).unwrap();
        assert_eq!(path.segments[0].track, 0);
    }

    #[test]
    fn pin_coordinate_attracts_the_track() {
        let (axis, layers) = (axis(), layers());
        let occ = TrackOccupancy::new();
        let config = TrackAssignmentConfig::default();
        let ta = TrackAssigner::new(&axis, &layers, &occ, &config);
        let pins = vec![LayerPoint::new(5, 0, 0)];
        let path = ta.assign(&task(0, false, 0, 3, pins)).unwrap();
        assert_eq!(path.segments[0].track, 0);
    }

    #[test]
    fn exhausted_panel_reports_and_releases() {
        let (axis, layers) = (axis(), layers());
        let occ = TrackOccupancy::new();
        let config = TrackAssignmentConfig::default();
        let ta = TrackAssigner::new(&axis, &layers, &occ, &config);
        ta.assign(&task(0, false, 0, 4, vec![])).unwrap();
        ta.assign(&task(1, false, 0, 4, vec![])).unwrap();
        let before = occ.total_claims();
        let err = ta.assign(&task(2, false, 1, 2, vec![])).unwrap_err();
        assert_eq!(err, RouteError::NoAvailableTrack { segment: 0, layer: 0 });
        assert_eq!(occ.total_claims(), before);
    }

    #[test]
    fn avoided_tracks_are_skipped() {
        let (axis, layers) = (axis(), layers());
        let occ = TrackOccupancy::new();
        let config = TrackAssignmentConfig::default();
        let ta = TrackAssigner::new(&axis, &layers, &occ, &config);
        let mut t = task(0, false, 0, 1, vec![]);
        t.avoid.insert(TrackKey {
            layer: 0,
            horizontal: true,
            coord: 10,
        });
        assert_eq!(ta.assign(&t).unwrap().segments[0].track, 0);
    }

    #[test]
    fn wrong_way_segment_is_refused() {
        let (axis, layers) = (axis(), layers());
        let occ = TrackOccupancy::new();
        let config = TrackAssignmentConfig::default();
        let ta = TrackAssigner::new(&axis, &layers, &occ, &config);
        // A legal east run followed by a north run on the horizontal layer.
        let mut t = task(0, false, 0, 2, vec![]);
        let (b, c) = (GridCoord::new(2, 0, 0), GridCoord::new(2, 1, 0));
        t.tree.segments.push(Segment::new(b, c));
        t.window.y1 = 1;
        assert_eq!(
            ta.assign(&t),
            Err(RouteError::WrongWaySegment { segment: 1, layer: 0 })
        );
        assert_eq!(occ.total_claims(), 0);
    }
}
