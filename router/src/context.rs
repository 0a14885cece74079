//! Per-run state shared by the stages: committed results, capacity counters
//! and the exclusion ledger.

use crate::data_manager::DataManager;
use crate::detailed_router::{NetGeometry, PinTerminal, ShapeRef};
use crate::error::RouterError;
use crate::global_router::{CoarseTree, GlobalRouter};
use crate::grid::{EdgeGrid, PlanarGrid, TrackOccupancy};
use crate::pin_access::AccessPoint;
use crate::resource_allocator::Allocation;
use crate::task::{GCellBox, PriorityKey};
use crate::track_assigner::{TrackPath, WINDOW_MARGIN};
use crate::utils::conversion::GridConverter;
use crate::violation_repair::ViolationRecord;
use rt_common::db::core::NetlistDB;
use rt_common::db::indices::{NetId, PinId};
use rt_common::geom::coord::{GridCoord, LayerPoint};
use rt_common::geom::rect::{LayerRect, Rect};
use rt_common::util::config::{Config, Stage};
use rt_common::util::visualization::{self, ShapeKind};
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::Path;

/// A net dropped from the run, with the stage that gave up on it.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct Exclusion {
    pub net: NetId,
    pub name: String,
    pub stage: Stage,
    pub reason: String,
}

pub struct RouteContext<'a> {
    pub db: &'a NetlistDB,
    pub config: &'a Config,
    pub routable: (u8, u8),
    pub keys: Vec<PriorityKey>,
    /// Ranked access points per pin; empty until pin access ran.
    pub access: Vec<Vec<AccessPoint>>,
    pub allocation: Option<(Allocation, PlanarGrid)>,
    pub grid: EdgeGrid,
    pub occupancy: TrackOccupancy,
    pub trees: Vec<Option<CoarseTree>>,
    pub paths: Vec<Option<TrackPath>>,
    pub geometry: Vec<Option<NetGeometry>>,
    pub violations: Vec<ViolationRecord>,
    pub excluded: BTreeMap<NetId, Exclusion>,
    /// Escalations spent per net.
    pub escalations: Vec<u32>,
}

impl<'a> RouteContext<'a> {
    pub fn new(db: &'a NetlistDB, config: &'a Config) -> Result<Self, RouterError> {
        let dm = DataManager::new(db, &config.layers);
        let routable = dm.routable_range()?;
        let utilization = dm.utilization()?;
        let grid = EdgeGrid::build(
            &db.gcell_axis,
            &db.layers,
            routable,
            &utilization,
            &db.blockages,
        );
        let n = db.nets.len();
        Ok(Self {
            db,
            config,
            routable,
            keys: (0..n).map(|i| PriorityKey::of(db, NetId::new(i))).collect(),
            access: vec![Vec::new(); db.pins.len()],
            allocation: None,
            grid,
            occupancy: TrackOccupancy::new(),
            trees: vec![None; n],
            paths: vec![None; n],
            geometry: vec![None; n],
            violations: Vec::new(),
            excluded: BTreeMap::new(),
            escalations: vec![0; n],
        })
    }

    pub fn converter(&self) -> GridConverter<'a> {
        GridConverter::new(&self.db.gcell_axis)
    }

    pub fn key(&self, net: NetId) -> PriorityKey {
        self.keys[net.index()]
    }

    /// Nets still in the run, in id order.
    pub fn active(&self) -> Vec<NetId> {
        (0..self.db.nets.len())
            .map(NetId::new)
            .filter(|n| !self.excluded.contains_key(n))
            .collect()
    }

    /// Driver first, then the other pins in net order.
    fn pins_of(&self, net: NetId) -> Vec<PinId> {
        let data = self.db.net(net);
        let mut pins = vec![data.driver];
        pins.extend(data.pins.iter().copied().filter(|&p| p != data.driver));
        pins
    }

    /// Where wiring lands on `pin`: its best access point, else the centre
    /// of its first shape.
    pub fn landing(&self, pin: PinId) -> Option<LayerPoint> {
        if let Some(ap) = self.access.get(pin.index()).and_then(|a| a.first()) {
            return Some(ap.at);
        }
        self.db
            .pin(pin)
            .shapes
            .first()
            .map(|s| LayerPoint::at(s.rect.center(), s.layer))
    }

    pub fn pin_terminals(&self, net: NetId) -> Vec<PinTerminal> {
        let mut out: Vec<PinTerminal> = Vec::new();
        for pin in self.pins_of(net) {
            if let Some(at) = self.landing(pin) {
                if !out.iter().any(|t| t.at == at) {
                    out.push(PinTerminal { pin, at });
                }
            }
        }
        out
    }

    /// Distinct terminal cells, driver first.
    pub fn terminal_cells(&self, net: NetId) -> Vec<GridCoord> {
        let conv = self.converter();
        let mut cells: Vec<GridCoord> = Vec::new();
        for t in self.pin_terminals(net) {
            let c = conv.point_to_grid(t.at);
            if !cells.contains(&c) {
                cells.push(c);
            }
        }
        cells
    }

    /// Track assignment window: the coarse tree grown by a margin.
    pub fn tree_window(&self, tree: &CoarseTree) -> GCellBox {
        let conv = self.converter();
        tree.bbox()
            .unwrap_or_else(|| GCellBox::cell(0, 0))
            .expand(WINDOW_MARGIN, conv.x_cells(), conv.y_cells())
    }

    /// Gives back everything `net` holds from `from` onwards.
    pub fn release_from(&mut self, net: NetId, from: Stage) {
        let i = net.index();
        if from <= Stage::GlobalRoute {
            if let Some(tree) = self.trees[i].take() {
                GlobalRouter::new(&self.grid, &self.db.layers, None, &self.config.global_routing)
                    .rip_up(&tree);
            }
        }
        if from <= Stage::TrackAssign {
            if let Some(path) = self.paths[i].take() {
                self.occupancy.release(net, &path.claims);
            }
        }
        self.geometry[i] = None;
    }

    pub fn exclude(&mut self, net: NetId, stage: Stage, reason: String) {
        let name = self.db.net(net).name.clone();
        log::warn!("{}: excluding net '{}': {}", stage, name, reason);
        self.release_from(net, Stage::GlobalRoute);
        self.excluded.insert(
            net,
            Exclusion {
                net,
                name,
                stage,
                reason,
            },
        );
    }

    /// One more escalation for `net`, if its budget allows.
    pub fn take_escalation(&mut self, net: NetId) -> bool {
        let spent = &mut self.escalations[net.index()];
        if *spent >= self.config.global_routing.escalation_retries {
            return false;
        }
        *spent += 1;
        true
    }

    /// Writes a PNG of the design and whatever the run has committed so far.
    /// Coarse segments of nets without geometry are drawn as thin bars
    /// through the GCell centres.
    pub fn dump_image(&self, stage: Stage) {
        let mut shapes = visualization::design_shapes(self.db);
        let conv = self.converter();
        for (i, tree) in self.trees.iter().enumerate() {
            if self.geometry[i].is_some() {
                continue;
            }
            for seg in tree.iter().flat_map(|t| &t.segments).filter(|s| !s.is_via()) {
                let (a, b) = (conv.to_world(seg.first), conv.to_world(seg.second));
                let bar = Rect::new(a, b).expand(1);
                shapes.push((ShapeKind::Wire, LayerRect::new(seg.first.z, bar)));
            }
        }
        for g in self.geometry.iter().flatten() {
            for (object, shape) in g.shapes(&self.db.vias) {
                let kind = match object {
                    ShapeRef::Wire(_) => ShapeKind::Wire,
                    ShapeRef::Via(_) => ShapeKind::Via,
                    ShapeRef::Patch(_) => ShapeKind::Patch,
                };
                shapes.push((kind, shape));
            }
        }

        let dir = Path::new(&self.config.io.temp_directory_path);
        if let Err(e) = std::fs::create_dir_all(dir) {
            log::warn!("cannot create {}: {}", dir.display(), e);
            return;
        }
        let file = dir.join(format!("{}.png", stage.name()));
        match visualization::draw_layout(self.db.die_area, &shapes, &file, 1024) {
            Ok(()) => log::info!("{}: wrote {}", stage, file.display()),
            Err(e) => log::warn!("{}: failed to write {}: {}", stage, file.display(), e),
        }
    }
}
