//! Detect-and-repair loop over lowered geometry.
//!
//! Every iteration scans all nets for spacing, short and minimum-area
//! violations, then tries a cheap local edit per violation. Violations that
//! resist local edits escalate: the net gets new tracks from a repair-local
//! occupancy copy and is lowered again. A record that a later scan no longer
//! finds is resolved; whatever survives the last iteration is abandoned.

use crate::detailed_router::{DetailedRouteTask, DetailedRouter, NetGeometry, PinTerminal, ShapeRef, Wire};
use crate::global_router::CoarseTree;
use crate::grid::{TrackKey, TrackOccupancy};
use crate::shapes::{self, Owner, ShapeIndex};
use crate::task::{GCellBox, PriorityKey};
use crate::track_assigner::{TrackAssignTask, TrackAssigner, TrackPath};
use rayon::prelude::*;
use rt_common::db::core::{LayerData, NetlistDB};
use rt_common::db::indices::NetId;
use rt_common::geom::coord::LayerPoint;
use rt_common::geom::point::Point;
use rt_common::geom::rect::{LayerRect, Rect, union_area};
use rt_common::geom::segment::Segment;
use rt_common::util::config::{DetailedRoutingConfig, TrackAssignmentConfig, ViolationRepairConfig};
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize)]
pub enum ViolationKind {
    Short { other: Owner },
    Spacing { other: Owner, required: i32 },
    MinArea { area: i64, required: i64 },
}

impl ViolationKind {
    /// Same rule against the same owner; measured values may differ.
    fn same_class(&self, other: &ViolationKind) -> bool {
        match (self, other) {
            (ViolationKind::Short { other: a }, ViolationKind::Short { other: b }) => a == b,
            (ViolationKind::Spacing { other: a, .. }, ViolationKind::Spacing { other: b, .. }) => {
                a == b
            }
            (ViolationKind::MinArea { .. }, ViolationKind::MinArea { .. }) => true,
            _ => false,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub enum RepairState {
    Detected,
    LocallyFixed,
    Escalated,
    Resolved,
    Abandoned,
}

impl RepairState {
    pub fn is_final(&self) -> bool {
        matches!(self, RepairState::Resolved | RepairState::Abandoned)
    }
}

#[derive(Clone, Debug, Serialize)]
pub struct ViolationRecord {
    pub id: usize,
    pub net: NetId,
    pub kind: ViolationKind,
    pub layer: u8,
    pub region: Rect,
    pub state: RepairState,
    /// Local edits tried so far.
    pub attempts: u32,
    pub history: Vec<RepairState>,
    /// The net's shape the last scan blamed.
    pub object: Option<ShapeRef>,
}

impl ViolationRecord {
    fn set(&mut self, state: RepairState) {
        self.state = state;
        self.history.push(state);
    }
}

#[derive(Clone, Debug)]
struct Detection {
    net: NetId,
    kind: ViolationKind,
    layer: u8,
    region: Rect,
    object: Option<ShapeRef>,
}

impl Detection {
    fn sort_key(&self) -> (NetId, ViolationKind, u8, i32, i32, i32, i32) {
        let r = &self.region;
        (self.net, self.kind, self.layer, r.min.x, r.min.y, r.max.x, r.max.y)
    }
}

/// Everything repair needs to know about one routed net.
pub struct RepairNet {
    pub key: PriorityKey,
    pub window: GCellBox,
    pub tree: CoarseTree,
    pub path: TrackPath,
    pub pins: Vec<PinTerminal>,
    pub geometry: NetGeometry,
}

#[derive(Clone, Debug, Default, Serialize)]
pub struct RepairOutcome {
    pub nets: Vec<NetGeometry>,
    pub records: Vec<ViolationRecord>,
    pub iterations: usize,
    pub escalations: usize,
}

impl RepairOutcome {
    pub fn abandoned(&self) -> usize {
        self.records
            .iter()
            .filter(|r| r.state == RepairState::Abandoned)
            .count()
    }
}

/// Shapes split by origin: pins and blockages never move, routed shapes
/// belong to the nets being repaired.
struct Scene {
    fixed: ShapeIndex,
    routed: ShapeIndex,
    all: ShapeIndex,
}

/// Box between two rectangles; their intersection when they overlap.
fn gap(a: &Rect, b: &Rect) -> Rect {
    Rect::from_coords(
        a.max.x.min(b.max.x),
        a.max.y.min(b.max.y),
        a.min.x.max(b.min.x),
        a.min.y.max(b.min.y),
    )
}

fn inside(die: &Rect, r: &Rect) -> bool {
    die.contains(r.min) && die.contains(r.max)
}

pub struct ViolationRepairer<'a> {
    db: &'a NetlistDB,
    config: &'a ViolationRepairConfig,
    track_config: &'a TrackAssignmentConfig,
    detail_config: &'a DetailedRoutingConfig,
}

impl<'a> ViolationRepairer<'a> {
    pub fn new(
        db: &'a NetlistDB,
        config: &'a ViolationRepairConfig,
        track_config: &'a TrackAssignmentConfig,
        detail_config: &'a DetailedRoutingConfig,
    ) -> Self {
        Self {
            db,
            config,
            track_config,
            detail_config,
        }
    }

    fn layer(&self, index: u8) -> Option<&LayerData> {
        self.db.layers.get(index as usize)
    }

    fn detailed_router(&self) -> DetailedRouter<'_> {
        DetailedRouter::new(
            &self.db.gcell_axis,
            &self.db.layers,
            &self.db.vias,
            self.detail_config,
        )
    }

    fn scene(&self, nets: &[RepairNet]) -> Scene {
        let fixed = shapes::fixed_shapes(self.db);
        let routed: Vec<(LayerRect, Owner)> = nets
            .iter()
            .flat_map(|n| {
                let owner = Owner::Net(n.geometry.net);
                n.geometry
                    .shapes(&self.db.vias)
                    .into_iter()
                    .map(move |(_, s)| (s, owner))
            })
            .collect();
        let all: Vec<(LayerRect, Owner)> = fixed.iter().chain(&routed).copied().collect();
        Scene {
            fixed: ShapeIndex::bulk_load(fixed),
            routed: ShapeIndex::bulk_load(routed),
            all: ShapeIndex::bulk_load(all),
        }
    }

    fn detect(
        &self,
        scene: &Scene,
        nets: &[RepairNet],
        keys: &BTreeMap<NetId, PriorityKey>,
    ) -> Vec<Detection> {
        let mut found: Vec<Detection> = nets
            .par_iter()
            .flat_map_iter(|n| {
                let mut out = self.detect_spacing(scene, n, keys);
                out.extend(self.detect_min_area(n));
                out
            })
            .collect();
        found.sort_by_key(|d| d.sort_key());
        found.dedup_by_key(|d| d.sort_key());
        found
    }

    /// Spacing and shorts of the net's routed shapes. Between two routed
    /// nets only the lower-priority one is blamed.
    fn detect_spacing(
        &self,
        scene: &Scene,
        net: &RepairNet,
        keys: &BTreeMap<NetId, PriorityKey>,
    ) -> Vec<Detection> {
        let id = net.geometry.net;
        let mut out = Vec::new();
        for (object, shape) in net.geometry.shapes(&self.db.vias) {
            let Some(layer) = self.layer(shape.layer) else {
                continue;
            };
            let reach = shape.rect.expand(layer.spacing.max_spacing());
            let nearby = scene
                .fixed
                .query(shape.layer, reach)
                .map(|e| (e, false))
                .chain(scene.routed.query(shape.layer, reach).map(|e| (e, true)));
            for (e, routed) in nearby {
                if e.data == Owner::Net(id) {
                    continue;
                }
                if routed {
                    let theirs = e.data.net().and_then(|n| keys.get(&n));
                    if theirs.is_some_and(|k| net.key > *k) {
                        continue;
                    }
                }
                let kind = if e.shape.rect.overlaps(&shape.rect) {
                    ViolationKind::Short { other: e.data }
                } else {
                    let required = shapes::required_spacing(layer, &shape.rect, &e.shape.rect);
                    if !shape.rect.within_spacing(&e.shape.rect, required) {
                        continue;
                    }
                    ViolationKind::Spacing {
                        other: e.data,
                        required,
                    }
                };
                out.push(Detection {
                    net: id,
                    kind,
                    layer: shape.layer,
                    region: gap(&shape.rect, &e.shape.rect),
                    object: Some(object),
                });
            }
        }
        out
    }

    /// Islands of touching same-net metal, pins included, that hold routed
    /// metal and fall short of the layer's minimum area.
    fn detect_min_area(&self, net: &RepairNet) -> Vec<Detection> {
        let id = net.geometry.net;
        let mut per_layer: BTreeMap<u8, Vec<(Option<ShapeRef>, Rect)>> = BTreeMap::new();
        for (object, shape) in net.geometry.shapes(&self.db.vias) {
            per_layer
                .entry(shape.layer)
                .or_default()
                .push((Some(object), shape.rect));
        }
        if let Some(data) = self.db.nets.get(id.index()) {
            for &p in &data.pins {
                if let Some(pin) = self.db.pins.get(p.index()) {
                    for s in &pin.shapes {
                        if let Some(v) = per_layer.get_mut(&s.layer) {
                            v.push((None, s.rect));
                        }
                    }
                }
            }
        }

        let mut out = Vec::new();
        for (l, items) in per_layer {
            let Some(layer) = self.layer(l) else { continue };
            if layer.min_area <= 0 {
                continue;
            }
            let mut parent: Vec<usize> = (0..items.len()).collect();
            fn find(parent: &mut [usize], mut i: usize) -> usize {
                while parent[i] != i {
                    parent[i] = parent[parent[i]];
                    i = parent[i];
                }
                i
            }
            for i in 0..items.len() {
                for j in i + 1..items.len() {
                    if items[i].1.touches(&items[j].1) {
                        let (a, b) = (find(&mut parent, i), find(&mut parent, j));
                        parent[a] = b;
                    }
                }
            }
            let mut islands: BTreeMap<usize, Vec<usize>> = BTreeMap::new();
            for i in 0..items.len() {
                islands.entry(find(&mut parent, i)).or_default().push(i);
            }
            for members in islands.values() {
                let rects: Vec<Rect> = members.iter().map(|&i| items[i].1).collect();
                let area = union_area(&rects);
                if area >= layer.min_area {
                    continue;
                }
                // Widest wire first, any other routed shape otherwise.
                let object = members
                    .iter()
                    .filter_map(|&i| match items[i].0 {
                        Some(r @ ShapeRef::Wire(_)) => Some((1, items[i].1.area(), r)),
                        Some(r) => Some((0, items[i].1.area(), r)),
                        None => None,
                    })
                    .max_by(|a, b| a.0.cmp(&b.0).then(a.1.cmp(&b.1)).then(b.2.cmp(&a.2)))
                    .map(|(_, _, r)| r);
                if object.is_none() {
                    continue;
                }
                let Some(region) = rects.iter().copied().reduce(|a, b| a.union(&b)) else {
                    continue;
                };
                out.push(Detection {
                    net: id,
                    kind: ViolationKind::MinArea {
                        area,
                        required: layer.min_area,
                    },
                    layer: l,
                    region,
                    object,
                });
            }
        }
        out
    }

    /// Grows the blamed shape along the layer direction until the island
    /// can reach its minimum area: centred first, then one-sided.
    fn patch(&self, all: &ShapeIndex, g: &mut NetGeometry, object: ShapeRef, l: u8, missing: i64) -> bool {
        let Some(layer) = self.layer(l) else {
            return false;
        };
        let base = match object {
            ShapeRef::Wire(i) => g.wires.get(i).map(|w| w.shape().rect),
            ShapeRef::Via(i) => g.vias.get(i).and_then(|v| {
                v.shapes(&self.db.vias)
                    .into_iter()
                    .find(|s| s.layer == l)
                    .map(|s| s.rect)
            }),
            ShapeRef::Patch(i) => g.patches.get(i).map(|p| p.rect),
        };
        let Some(base) = base else {
            return false;
        };
        let horizontal = layer.direction.is_horizontal();
        let across = if horizontal { base.height() } else { base.width() }.max(1) as i64;
        let grow = ((missing + across - 1) / across) as i32;
        let stretch = |lo: i32, hi: i32| {
            if horizontal {
                Rect::from_coords(base.min.x - lo, base.min.y, base.max.x + hi, base.max.y)
            } else {
                Rect::from_coords(base.min.x, base.min.y - lo, base.max.x, base.max.y + hi)
            }
        };
        let half = (grow + 1) / 2;
        for rect in [stretch(half, half), stretch(0, grow), stretch(grow, 0)] {
            let shape = LayerRect::new(l, rect);
            if inside(&self.db.die_area, &rect) && shapes::is_clear(all, layer, &shape, g.net) {
                g.patches.push(shape);
                return true;
            }
        }
        false
    }

    /// Moves a wire sideways by whole pitches and jogs back to its old
    /// endpoints. Wire indices stay stable; the jogs are appended.
    fn shift_wire(&self, all: &ShapeIndex, g: &mut NetGeometry, i: usize) -> bool {
        let Some(&wire) = g.wires.get(i) else {
            return false;
        };
        let Some(layer) = self.layer(wire.layer) else {
            return false;
        };
        let horizontal = wire.is_horizontal();
        let (a, b) = (wire.segment.first, wire.segment.second);
        for k in [1, -1, 2, -2] {
            let d = k * layer.pitch;
            let by = if horizontal { Point::new(0, d) } else { Point::new(d, 0) };
            let moved = |p: LayerPoint| LayerPoint::at(p.point() + by, p.layer);
            let shifted = Wire {
                segment: Segment::new(moved(a), moved(b)),
                ..wire
            };
            let jog = |p: LayerPoint| Wire {
                segment: Segment::new(p, moved(p)).normalized(),
                source: None,
                ..wire
            };
            let pieces = [shifted, jog(a), jog(b)];
            let legal = pieces.iter().all(|w| {
                let s = w.shape();
                inside(&self.db.die_area, &s.rect) && shapes::is_clear(all, layer, &s, g.net)
            });
            if legal {
                g.wires[i] = shifted;
                g.wires.extend_from_slice(&pieces[1..]);
                return true;
            }
        }
        false
    }

    fn swap_via(&self, all: &ShapeIndex, g: &mut NetGeometry, i: usize) -> bool {
        let Some(via) = g.vias.get(i).copied() else {
            return false;
        };
        match self
            .detailed_router()
            .pick_via(all, g.net, via.at.layer, via.at.point(), Some(via.master))
        {
            Ok(master) => {
                g.vias[i].master = master;
                true
            }
            Err(_) => false,
        }
    }

    fn fix_locally(&self, all: &ShapeIndex, g: &mut NetGeometry, record: &ViolationRecord) -> bool {
        match (record.kind, record.object) {
            (ViolationKind::MinArea { area, required }, Some(object)) => {
                self.patch(all, g, object, record.layer, required - area)
            }
            (_, Some(ShapeRef::Wire(i))) => self.shift_wire(all, g, i),
            (_, Some(ShapeRef::Via(i))) => self.swap_via(all, g, i),
            _ => false,
        }
    }

    /// Track the blamed wire was lowered from, if any.
    fn blamed_track(net: &RepairNet, object: Option<ShapeRef>) -> Option<TrackKey> {
        let Some(ShapeRef::Wire(i)) = object else {
            return None;
        };
        let coarse = net.geometry.wires.get(i)?.source?;
        net.path
            .segments
            .iter()
            .find(|s| s.coarse == coarse)
            .map(|s| s.key())
    }

    fn reclaim(occupancy: &TrackOccupancy, path: &TrackPath) {
        let lost = path
            .claims
            .iter()
            .filter(|&&(key, lo, hi)| !occupancy.try_claim(key, path.net, lo, hi))
            .count();
        if lost > 0 {
            log::debug!("VR: net {} lost {} claims on restore", path.net, lost);
        }
    }

    /// New tracks with `avoid` excluded, then a fresh lowering. On failure
    /// the net keeps its geometry and its old claims.
    fn escalate(
        &self,
        all: &ShapeIndex,
        occupancy: &TrackOccupancy,
        net: &mut RepairNet,
        avoid: BTreeSet<TrackKey>,
    ) -> bool {
        let id = net.geometry.net;
        let assigner = TrackAssigner::new(
            &self.db.gcell_axis,
            &self.db.layers,
            occupancy,
            self.track_config,
        );
        assigner.release(&net.path);
        let task = TrackAssignTask {
            net: id,
            key: net.key,
            window: net.window,
            tree: net.tree.clone(),
            pin_points: net.pins.iter().map(|p| p.at).collect(),
            avoid,
        };
        let path = match assigner.assign(&task) {
            Ok(path) => path,
            Err(e) => {
                log::debug!("VR: net {} reassignment failed: {}", id, e);
                Self::reclaim(occupancy, &net.path);
                return false;
            }
        };
        let lowering = DetailedRouteTask {
            net: id,
            key: net.key,
            window: net.window,
            tree: net.tree.clone(),
            path: path.clone(),
            pins: net.pins.clone(),
        };
        match self.detailed_router().lower(&lowering, all) {
            Ok(geometry) => {
                net.geometry = geometry;
                net.path = path;
                true
            }
            Err(e) => {
                log::debug!("VR: net {} relowering failed: {}", id, e);
                assigner.release(&path);
                Self::reclaim(occupancy, &net.path);
                false
            }
        }
    }

    /// Runs the repair loop. `occupancy` must hold every net's current
    /// claims; it is consumed as a scratch copy.
    pub fn repair(&self, mut nets: Vec<RepairNet>, occupancy: TrackOccupancy) -> RepairOutcome {
        log::info!(
            "Starting Violation Repair ({} nets, at most {} iterations)",
            nets.len(),
            self.config.max_iterations
        );
        let keys: BTreeMap<NetId, PriorityKey> =
            nets.iter().map(|n| (n.geometry.net, n.key)).collect();
        let slots: BTreeMap<NetId, usize> = nets
            .iter()
            .enumerate()
            .map(|(i, n)| (n.geometry.net, i))
            .collect();
        let mut records: Vec<ViolationRecord> = Vec::new();
        let mut iterations = 0;
        let mut escalations = 0;

        for iteration in 0..self.config.max_iterations {
            let scene = self.scene(&nets);
            let seen = reconcile(&mut records, self.detect(&scene, &nets, &keys));
            for r in records.iter_mut() {
                if !r.state.is_final() && !seen.contains(&r.id) {
                    r.set(RepairState::Resolved);
                }
            }
            let open: Vec<usize> = records
                .iter()
                .filter(|r| !r.state.is_final())
                .map(|r| r.id)
                .collect();
            log::debug!("VR iteration {}: {} open violations", iteration, open.len());
            if open.is_empty() {
                break;
            }
            iterations += 1;

            let mut edited: BTreeSet<(usize, Option<ShapeRef>)> = BTreeSet::new();
            let mut escalate: BTreeMap<usize, BTreeSet<TrackKey>> = BTreeMap::new();
            for id in open {
                let record = &mut records[id];
                let Some(&slot) = slots.get(&record.net) else {
                    continue;
                };
                if let Some(avoid) = escalate.get_mut(&slot) {
                    avoid.extend(Self::blamed_track(&nets[slot], record.object));
                    record.set(RepairState::Escalated);
                    continue;
                }
                if !edited.insert((slot, record.object)) {
                    continue;
                }
                if record.attempts < self.config.retry_budget {
                    record.attempts += 1;
                    if self.fix_locally(&scene.all, &mut nets[slot].geometry, record) {
                        record.set(RepairState::LocallyFixed);
                        continue;
                    }
                }
                escalate
                    .entry(slot)
                    .or_default()
                    .extend(Self::blamed_track(&nets[slot], record.object));
                record.set(RepairState::Escalated);
            }

            for (slot, avoid) in escalate {
                if self.escalate(&scene.all, &occupancy, &mut nets[slot], avoid) {
                    escalations += 1;
                }
            }
        }

        let scene = self.scene(&nets);
        let seen = reconcile(&mut records, self.detect(&scene, &nets, &keys));
        for r in records.iter_mut().filter(|r| !r.state.is_final()) {
            if seen.contains(&r.id) {
                r.set(RepairState::Abandoned);
            } else {
                r.set(RepairState::Resolved);
            }
        }

        let outcome = RepairOutcome {
            nets: nets.into_iter().map(|n| n.geometry).collect(),
            records,
            iterations,
            escalations,
        };
        let abandoned = outcome.abandoned();
        if abandoned > 0 {
            log::warn!(
                "VR done: {} of {} violations abandoned",
                abandoned,
                outcome.records.len()
            );
        } else {
            log::info!("VR done: {} violations resolved", outcome.records.len());
        }
        outcome
    }
}

/// Folds a scan into the ledger. A detection continues an open record of
/// the same net, layer and class whose region it touches; anything else
/// opens a new record. Returns the ids of every record seen.
fn reconcile(records: &mut Vec<ViolationRecord>, found: Vec<Detection>) -> BTreeSet<usize> {
    let mut seen = BTreeSet::new();
    for d in found {
        let hit = records.iter_mut().find(|r| {
            !r.state.is_final()
                && r.net == d.net
                && r.layer == d.layer
                && r.kind.same_class(&d.kind)
                && r.region.touches(&d.region)
        });
        match hit {
            Some(r) => {
                r.kind = d.kind;
                r.region = d.region;
                r.object = d.object;
                seen.insert(r.id);
            }
            None => {
                let id = records.len();
                records.push(ViolationRecord {
                    id,
                    net: d.net,
                    kind: d.kind,
                    layer: d.layer,
                    region: d.region,
                    state: RepairState::Detected,
                    attempts: 0,
                    history: vec![RepairState::Detected],
                    object: d.object,
                });
                seen.insert(id);
            }
        }
    }
    seen
}
