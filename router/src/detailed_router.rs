use crate::algo::batch::plan_waves;
use crate::error::RouteError;
use crate::global_router::CoarseTree;
use crate::shapes::{self, Owner, ShapeIndex};
use crate::task::{GCellBox, PriorityKey, StageTask};
use crate::track_assigner::{AssignedSegment, TrackPath};
use rayon::prelude::*;
use rt_common::db::core::{LayerData, ViaMaster};
use rt_common::db::gcell::GCellAxis;
use rt_common::db::indices::{NetId, PinId, ViaId};
use rt_common::geom::coord::{GridCoord, LayerPoint};
use rt_common::geom::point::Point;
use rt_common::geom::rect::LayerRect;
use rt_common::geom::segment::Segment;
use rt_common::util::config::DetailedRoutingConfig;
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};

/// Where a pin's wiring lands.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub struct PinTerminal {
    pub pin: PinId,
    pub at: LayerPoint,
}

pub struct DetailedRouteTask {
    pub net: NetId,
    pub key: PriorityKey,
    pub window: GCellBox,
    pub tree: CoarseTree,
    pub path: TrackPath,
    pub pins: Vec<PinTerminal>,
}

impl StageTask for DetailedRouteTask {
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

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub struct Wire {
    pub layer: u8,
    pub segment: Segment<LayerPoint>,
    pub width: i32,
    /// Coarse segment the wire was lowered from; `None` for pin connectors.
    pub source: Option<usize>,
}

impl Wire {
    pub fn shape(&self) -> LayerRect {
        LayerRect::new(self.layer, self.segment.bbox().expand(self.width / 2))
    }

    pub fn is_horizontal(&self) -> bool {
        self.segment.first.y == self.segment.second.y
    }
}

/// A placed via; `at.layer` is the cut layer, i.e. the lower metal.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub struct ViaInstance {
    pub master: ViaId,
    pub at: LayerPoint,
}

impl ViaInstance {
    pub fn shapes(&self, vias: &[ViaMaster]) -> Vec<LayerRect> {
        vias.get(self.master.index())
            .map(|m| m.shapes_at(self.at.point()).to_vec())
            .unwrap_or_default()
    }

    pub fn leg(&self) -> Segment<LayerPoint> {
        Segment::new(
            self.at,
            LayerPoint::new(self.at.x, self.at.y, self.at.layer + 1),
        )
    }
}

/// Which object of a net a shape came from.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub enum ShapeRef {
    Wire(usize),
    Via(usize),
    Patch(usize),
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct NetGeometry {
    pub net: NetId,
    pub wires: Vec<Wire>,
    pub vias: Vec<ViaInstance>,
    /// Metal added to meet minimum area.
    pub patches: Vec<LayerRect>,
    /// Pin landing points the wiring must reach.
    pub terminals: Vec<LayerPoint>,
}

impl NetGeometry {
    pub fn empty(net: NetId) -> Self {
        Self {
            net,
            ..Self::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        self.wires.is_empty() && self.vias.is_empty() && self.patches.is_empty()
    }

    /// Wire and via legs, the input of the connectivity check.
    pub fn legs(&self) -> Vec<Segment<LayerPoint>> {
        self.wires
            .iter()
            .map(|w| w.segment)
            .chain(self.vias.iter().map(|v| v.leg()))
            .collect()
    }

    pub fn shapes(&self, vias: &[ViaMaster]) -> Vec<(ShapeRef, LayerRect)> {
        let mut out: Vec<(ShapeRef, LayerRect)> = self
            .wires
            .iter()
            .enumerate()
            .map(|(i, w)| (ShapeRef::Wire(i), w.shape()))
            .collect();
        for (i, v) in self.vias.iter().enumerate() {
            out.extend(v.shapes(vias).into_iter().map(|s| (ShapeRef::Via(i), s)));
        }
        out.extend(
            self.patches
                .iter()
                .enumerate()
                .map(|(i, p)| (ShapeRef::Patch(i), *p)),
        );
        out
    }

    pub fn wirelength(&self) -> i64 {
        self.wires.iter().map(|w| w.segment.length()).sum()
    }
}

type Leg = (Segment<LayerPoint>, Option<usize>);

pub struct DetailedRouter<'a> {
    axis: &'a GCellAxis,
    layers: &'a [LayerData],
    vias: &'a [ViaMaster],
    config: &'a DetailedRoutingConfig,
}

impl<'a> DetailedRouter<'a> {
    pub fn new(
        axis: &'a GCellAxis,
        layers: &'a [LayerData],
        vias: &'a [ViaMaster],
        config: &'a DetailedRoutingConfig,
    ) -> Self {
        Self {
            axis,
            layers,
            vias,
            config,
        }
    }

    fn halo(&self, layer: u8) -> i32 {
        self.layers
            .get(layer as usize)
            .map(|l| (self.config.via_halo_factor * l.spacing.min_spacing as f64).round() as i32)
            .unwrap_or(0)
    }

    /// Best legal master for a via on `cut` at `at`: both enclosures clear of
    /// foreign shapes, least halo intrusion, lowest id on ties.
    pub fn pick_via(
        &self,
        foreign: &ShapeIndex,
        net: NetId,
        cut: u8,
        at: Point<i32>,
        skip: Option<ViaId>,
    ) -> Result<ViaId, RouteError> {
        let mut best: Option<(i64, ViaId)> = None;
        for (i, master) in self.vias.iter().enumerate() {
            let id = ViaId::new(i);
            if master.cut_layer != cut || Some(id) == skip {
                continue;
            }
            let shapes = master.shapes_at(at);
            let legal = shapes.iter().all(|s| {
                self.layers
                    .get(s.layer as usize)
                    .is_some_and(|l| shapes::is_clear(foreign, l, s, net))
            });
            if !legal {
                continue;
            }
            let intrusion: i64 = shapes
                .iter()
                .map(|s| shapes::halo_intrusion(foreign, s, net, self.halo(s.layer)))
                .sum();
            if best.is_none_or(|(b, _)| intrusion < b) {
                best = Some((intrusion, id));
            }
        }
        best.map(|(_, id)| id).ok_or(RouteError::NoLegalVia {
            cut,
            x: at.x,
            y: at.y,
        })
    }

    fn centre_track(&self, seg: &Segment<GridCoord>, coarse: usize) -> AssignedSegment {
        let horizontal = seg.is_horizontal();
        let (panel, lo, hi) = if horizontal {
            (seg.first.y, seg.first.x.min(seg.second.x), seg.first.x.max(seg.second.x))
        } else {
            (seg.first.x, seg.first.y.min(seg.second.y), seg.first.y.max(seg.second.y))
        };
        let c = if horizontal {
            self.axis.cell_center(lo, panel).y
        } else {
            self.axis.cell_center(panel, lo).x
        };
        AssignedSegment {
            coarse,
            layer: seg.first.z,
            horizontal,
            track: c,
            panel,
            lo,
            hi,
        }
    }

    /// Turns a net's track assignment into wires and vias.
    pub fn lower(
        &self,
        task: &DetailedRouteTask,
        foreign: &ShapeIndex,
    ) -> Result<NetGeometry, RouteError> {
        let mut geometry = NetGeometry::empty(task.net);
        geometry.terminals = task.pins.iter().map(|p| p.at).collect();

        let mut assigned: Vec<AssignedSegment> = task.path.segments.clone();
        let covered: BTreeSet<usize> = assigned.iter().map(|s| s.coarse).collect();
        for (i, seg) in task.tree.segments.iter().enumerate() {
            if !seg.is_via() && seg.length() > 0 && !covered.contains(&i) {
                assigned.push(self.centre_track(seg, i));
            }
        }

        let mut pins_at: BTreeMap<(u32, u32), Vec<LayerPoint>> = BTreeMap::new();
        for p in &task.pins {
            pins_at
                .entry(self.axis.locate(p.at.point()))
                .or_default()
                .push(p.at);
        }
        let mut h_track: BTreeMap<(u32, u32), i32> = BTreeMap::new();
        let mut v_track: BTreeMap<(u32, u32), i32> = BTreeMap::new();
        for s in &assigned {
            let ends = if s.horizontal {
                [(s.lo, s.panel), (s.hi, s.panel)]
            } else {
                [(s.panel, s.lo), (s.panel, s.hi)]
            };
            let map = if s.horizontal { &mut h_track } else { &mut v_track };
            for cell in ends {
                map.entry(cell).or_insert(s.track);
            }
        }
        let junction = |cell: (u32, u32)| -> Point<i32> {
            if let Some(p) = pins_at.get(&cell).and_then(|v| v.first()) {
                return p.point();
            }
            let centre = self.axis.cell_center(cell.0, cell.1);
            Point::new(
                v_track.get(&cell).copied().unwrap_or(centre.x),
                h_track.get(&cell).copied().unwrap_or(centre.y),
            )
        };

        let mut used: BTreeMap<(u32, u32), BTreeSet<u8>> = BTreeMap::new();
        let mut legs: Vec<Leg> = Vec::new();
        let mut push = |a: LayerPoint, b: LayerPoint, src: Option<usize>| {
            if a != b {
                legs.push((Segment::new(a, b).normalized(), src));
            }
        };

        for s in &assigned {
            let (ca, cb) = if s.horizontal {
                ((s.lo, s.panel), (s.hi, s.panel))
            } else {
                ((s.panel, s.lo), (s.panel, s.hi))
            };
            let (ja, jb) = (junction(ca), junction(cb));
            let l = s.layer;
            let src = Some(s.coarse);
            if s.horizontal {
                let (a, b) = (LayerPoint::new(ja.x, s.track, l), LayerPoint::new(jb.x, s.track, l));
                push(a, b, src);
                push(a, LayerPoint::at(ja, l), src);
                push(b, LayerPoint::at(jb, l), src);
            } else {
                let (a, b) = (LayerPoint::new(s.track, ja.y, l), LayerPoint::new(s.track, jb.y, l));
                push(a, b, src);
                push(a, LayerPoint::at(ja, l), src);
                push(b, LayerPoint::at(jb, l), src);
            }
            used.entry(ca).or_default().insert(l);
            used.entry(cb).or_default().insert(l);
        }

        for seg in task.tree.segments.iter().filter(|s| s.is_via()) {
            let (lo, hi) = (seg.first.z.min(seg.second.z), seg.first.z.max(seg.second.z));
            used.entry((seg.first.x, seg.first.y))
                .or_default()
                .extend(lo..=hi);
        }

        for (&cell, points) in &pins_at {
            let j = junction(cell);
            for p in points {
                used.entry(cell).or_default().insert(p.layer);
                let corner = LayerPoint::new(j.x, p.y, p.layer);
                push(*p, corner, None);
                push(corner, LayerPoint::at(j, p.layer), None);
            }
        }

        for (&cell, layers) in &used {
            let (Some(&lo), Some(&hi)) = (layers.first(), layers.last()) else {
                continue;
            };
            let j = junction(cell);
            for l in lo..hi {
                push(LayerPoint::at(j, l), LayerPoint::at(j, l + 1), None);
            }
        }

        let kept = merge_runs(prune_to_tree(legs, &geometry.terminals), &geometry.terminals);
        for (seg, source) in kept {
            if seg.is_via() {
                let cut = seg.first.layer.min(seg.second.layer);
                let at = seg.first.point();
                let master = self.pick_via(foreign, task.net, cut, at, None)?;
                geometry.vias.push(ViaInstance {
                    master,
                    at: LayerPoint::at(at, cut),
                });
            } else {
                let width = self
                    .layers
                    .get(seg.first.layer as usize)
                    .map(|l| l.min_width)
                    .unwrap_or(1);
                geometry.wires.push(Wire {
                    layer: seg.first.layer,
                    segment: seg,
                    width,
                    source,
                });
            }
        }
        Ok(geometry)
    }

    /// Lowers every task wave by wave against `foreign`, which holds fixed
    /// shapes; each wave's geometry is added to it before the next wave.
    pub fn run(
        &self,
        tasks: Vec<DetailedRouteTask>,
        foreign: &mut ShapeIndex,
    ) -> Vec<(NetId, Result<NetGeometry, RouteError>)> {
        log::info!("Starting Detailed Routing ({} nets)", tasks.len());
        let total = tasks.len();
        let waves = plan_waves(tasks, self.axis.x_cells(), self.axis.y_cells());
        log::debug!("DR: {} tasks in {} waves", total, waves.len());

        let mut results = Vec::with_capacity(total);
        for wave in waves {
            let view: &ShapeIndex = foreign;
            let lowered: Vec<Result<NetGeometry, RouteError>> =
                wave.par_iter().map(|t| self.lower(t, view)).collect();
            for (task, result) in wave.into_iter().zip(lowered) {
                if let Ok(g) = &result {
                    self.commit(foreign, g);
                }
                results.push((task.net, result));
            }
        }
        results
    }

    pub fn commit(&self, index: &mut ShapeIndex, geometry: &NetGeometry) {
        for (_, shape) in geometry.shapes(self.vias) {
            index.insert(shape, Owner::Net(geometry.net));
        }
    }
}

fn lies_on(seg: &Segment<LayerPoint>, p: &LayerPoint) -> bool {
    p.layer == seg.first.layer && !seg.is_via() && seg.bbox().contains(p.point())
}

/// Splits legs wherever another leg ends on them and keeps a spanning
/// forest of the pieces, so overlapping or looping legs collapse.
fn prune_to_tree(legs: Vec<Leg>, terminals: &[LayerPoint]) -> Vec<Leg> {
    let mut points: Vec<LayerPoint> = legs
        .iter()
        .flat_map(|(s, _)| [s.first, s.second])
        .chain(terminals.iter().copied())
        .collect();
    points.sort_unstable();
    points.dedup();

    let mut pieces: BTreeMap<Segment<LayerPoint>, Option<usize>> = BTreeMap::new();
    for (seg, src) in &legs {
        if seg.is_via() {
            pieces.entry(seg.normalized()).or_insert(*src);
            continue;
        }
        let cuts: Vec<LayerPoint> = points.iter().filter(|p| lies_on(seg, p)).copied().collect();
        for w in cuts.windows(2) {
            pieces.entry(Segment::new(w[0], w[1])).or_insert(*src);
        }
    }

    let mut parent: Vec<usize> = (0..points.len()).collect();
    fn find(parent: &mut [usize], mut i: usize) -> usize {
        while parent[i] != i {
            parent[i] = parent[parent[i]];
            i = parent[i];
        }
        i
    }
    let index = |p: &LayerPoint| points.binary_search(p).ok();

    let mut kept = Vec::with_capacity(pieces.len());
    for (seg, src) in pieces {
        let (Some(a), Some(b)) = (index(&seg.first), index(&seg.second)) else {
            continue;
        };
        let (ra, rb) = (find(&mut parent, a), find(&mut parent, b));
        if ra != rb {
            parent[ra] = rb;
            kept.push((seg, src));
        }
    }
    drop_stubs(kept, terminals)
}

/// Repeatedly removes pieces hanging off a point that is neither a
/// terminal nor shared with another piece.
fn drop_stubs(mut pieces: Vec<Leg>, terminals: &[LayerPoint]) -> Vec<Leg> {
    let keep: BTreeSet<LayerPoint> = terminals.iter().copied().collect();
    loop {
        let mut degree: BTreeMap<LayerPoint, usize> = BTreeMap::new();
        for (s, _) in &pieces {
            *degree.entry(s.first).or_default() += 1;
            *degree.entry(s.second).or_default() += 1;
        }
        let dangling = |p: &LayerPoint| !keep.contains(p) && degree.get(p) == Some(&1);
        let before = pieces.len();
        pieces.retain(|(s, _)| !dangling(&s.first) && !dangling(&s.second));
        if pieces.len() == before {
            return pieces;
        }
    }
}

/// Joins collinear planar pieces meeting at a point nothing else touches.
fn merge_runs(pieces: Vec<Leg>, terminals: &[LayerPoint]) -> Vec<Leg> {
    let keep: BTreeSet<LayerPoint> = terminals.iter().copied().collect();
    let mut at: BTreeMap<LayerPoint, Vec<usize>> = BTreeMap::new();
    for (i, (s, _)) in pieces.iter().enumerate() {
        at.entry(s.first).or_default().push(i);
        at.entry(s.second).or_default().push(i);
    }
    let horizontal = |s: &Segment<LayerPoint>| s.first.y == s.second.y;

    let mut done = vec![false; pieces.len()];
    let mut out = Vec::with_capacity(pieces.len());
    for i in 0..pieces.len() {
        if done[i] {
            continue;
        }
        done[i] = true;
        let (seg, mut src) = pieces[i];
        if seg.is_via() {
            out.push((seg, src));
            continue;
        }
        let dir = horizontal(&seg);
        let mut ends = [seg.first, seg.second];
        for end in ends.iter_mut() {
            loop {
                if keep.contains(end) {
                    break;
                }
                let Some(touching) = at.get(end) else { break };
                if touching.len() != 2 {
                    break;
                }
                let Some(&j) = touching.iter().find(|&&j| !done[j]) else {
                    break;
                };
                let (next, next_src) = pieces[j];
                if next.is_via() || horizontal(&next) != dir {
                    break;
                }
                done[j] = true;
                src = src.or(next_src);
                *end = if next.first == *end { next.second } else { next.first };
            }
        }
        out.push((Segment::new(ends[0], ends[1]).normalized(), src));
    }
    out.sort_unstable();
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use rt_common::db::core::{LayerDirection, SpacingRule};
    use rt_common::geom::rect::Rect;
    use rt_common::util::check::check_tree;

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

    fn vias() -> Vec<ViaMaster> {
        let r = Rect::from_coords(-3, -3, 3, 3);
        let wide = Rect::from_coords(-8, -3, 8, 3);
        vec![
            ViaMaster {
                name: "V12_W".into(),
                cut_layer: 0,
                below: wide,
                above: r,
                cut: Rect::from_coords(-2, -2, 2, 2),
            },
            ViaMaster {
                name: "V12".into(),
                cut_layer: 0,
                below: r,
                above: r,
                cut: Rect::from_coords(-2, -2, 2, 2),
            },
        ]
    }

    fn axis() -> GCellAxis {
        GCellAxis::uniform(Rect::from_coords(0, 0, 100, 100), 20).unwrap()
    }

    fn key(net: u32) -> PriorityKey {
        PriorityKey {
            critical: false,
            fanout: 2,
            bbox_size: 0,
            net: NetId(net),
        }
    }

    /// Pins at (10,10) and (50,50) on M1; coarse route east on M1 then up
    /// to M2 and north.
    fn l_task() -> DetailedRouteTask {
        let g = |x, y, z| GridCoord::new(x, y, z);
        let tree = CoarseTree {
            net: NetId(0),
            segments: vec![
                Segment::new(g(0, 0, 0), g(2, 0, 0)),
                Segment::new(g(2, 0, 0), g(2, 0, 1)),
                Segment::new(g(2, 0, 1), g(2, 2, 1)),
                Segment::new(g(2, 2, 0), g(2, 2, 1)),
            ],
            edges: Vec::new(),
            terminals: vec![g(0, 0, 0), g(2, 2, 0)],
        };
        let path = TrackPath {
            net: NetId(0),
            segments: vec![
                AssignedSegment {
                    coarse: 0,
                    layer: 0,
                    horizontal: true,
                    track: 10,
                    panel: 0,
                    lo: 0,
                    hi: 2,
                },
                AssignedSegment {
                    coarse: 2,
                    layer: 1,
                    horizontal: false,
                    track: 50,
                    panel: 2,
                    lo: 0,
                    hi: 2,
                },
            ],
            claims: Vec::new(),
        };
        DetailedRouteTask {
            net: NetId(0),
            key: key(0),
            window: GCellBox { x0: 0, y0: 0, x1: 3, y1: 3 },
            tree,
            path,
            pins: vec![
                PinTerminal {
                    pin: PinId(0),
                    at: LayerPoint::new(10, 10, 0),
                },
                PinTerminal {
                    pin: PinId(1),
                    at: LayerPoint::new(50, 50, 0),
                },
            ],
        }
    }

    #[test]
    fn lowered_net_is_a_connected_tree() {
        let (axis, layers, vias) = (axis(), layers(), vias());
        let config = DetailedRoutingConfig::default();
        let dr = DetailedRouter::new(&axis, &layers, &vias, &config);
        let g = dr.lower(&l_task(), &ShapeIndex::new()).unwrap();

        assert_eq!(g.wirelength(), 80);
        assert_eq!(g.vias.len(), 2);
        assert!(g.wires.iter().all(|w| w.width == 4));
        assert_eq!(check_tree(&g.legs(), &g.terminals), Ok(()));
    }

    #[test]
    fn via_choice_avoids_crowded_enclosures() {
        let (axis, layers, vias) = (axis(), layers(), vias());
        let config = DetailedRoutingConfig::default();
        let dr = DetailedRouter::new(&axis, &layers, &vias, &config);
        let empty = ShapeIndex::new();
        assert_eq!(
            dr.pick_via(&empty, NetId(0), 0, Point::new(50, 50), None),
            Ok(ViaId(0))
        );

        let crowded = ShapeIndex::bulk_load(vec![(
            LayerRect::new(0, Rect::from_coords(60, 40, 70, 60)),
            Owner::Net(NetId(3)),
        )]);
        assert_eq!(
            dr.pick_via(&crowded, NetId(0), 0, Point::new(50, 50), None),
            Ok(ViaId(1))
        );

        let walled = ShapeIndex::bulk_load(vec![(
            LayerRect::new(1, Rect::from_coords(40, 40, 60, 60)),
            Owner::Blockage,
        )]);
        assert_eq!(
            dr.pick_via(&walled, NetId(0), 0, Point::new(50, 50), None),
            Err(RouteError::NoLegalVia { cut: 0, x: 50, y: 50 })
        );
    }

    #[test]
    fn overlapping_legs_collapse_to_a_tree() {
        let p = |x, y| LayerPoint::new(x, y, 0);
        let legs = vec![
            (Segment::new(p(0, 0), p(20, 0)), Some(0)),
            (Segment::new(p(10, 0), p(30, 0)), Some(1)),
            (Segment::new(p(10, 0), p(10, 10)), None),
            (Segment::new(p(10, 10), p(20, 10)), None),
            (Segment::new(p(20, 10), p(20, 0)), None),
        ];
        let terminals = [p(0, 0), p(30, 0)];
        let kept = merge_runs(prune_to_tree(legs, &terminals), &terminals);
        let segs: Vec<Segment<LayerPoint>> = kept.iter().map(|(s, _)| *s).collect();
        assert_eq!(check_tree(&segs, &terminals), Ok(()));
        assert!(segs.contains(&Segment::new(p(0, 0), p(30, 0))));
    }
}
