use rt_common::db::core::{ConnectType, NetlistDB};
use rt_common::db::indices::NetId;
use serde::Serialize;
use std::cmp::Ordering;

/// Scheduling priority of a net. Greater means routed earlier: critical nets
/// first, then larger fanout, then larger bounding box; ties go to the lower
/// net id so the order is total.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub struct PriorityKey {
    pub critical: bool,
    pub fanout: u32,
    pub bbox_size: i64,
    pub net: NetId,
}

impl PriorityKey {
    pub fn of(db: &NetlistDB, net: NetId) -> Self {
        let data = db.net(net);
        Self {
            critical: data.critical || data.connect_type == ConnectType::Clock,
            fanout: data.pins.len() as u32,
            bbox_size: db.net_bbox(net).half_perimeter(),
            net,
        }
    }
}

impl Ord for PriorityKey {
    fn cmp(&self, other: &Self) -> Ordering {
        self.critical
            .cmp(&other.critical)
            .then_with(|| self.fanout.cmp(&other.fanout))
            .then_with(|| self.bbox_size.cmp(&other.bbox_size))
            .then_with(|| other.net.cmp(&self.net))
    }
}

impl PartialOrd for PriorityKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Inclusive box of GCell indices.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
pub struct GCellBox {
    pub x0: u32,
    pub y0: u32,
    pub x1: u32,
    pub y1: u32,
}

impl GCellBox {
    pub fn cell(x: u32, y: u32) -> Self {
        Self {
            x0: x,
            y0: y,
            x1: x,
            y1: y,
        }
    }

    pub fn around<I: IntoIterator<Item = (u32, u32)>>(cells: I) -> Option<Self> {
        cells
            .into_iter()
            .map(|(x, y)| Self::cell(x, y))
            .reduce(|a, b| a.union(&b))
    }

    pub fn union(&self, other: &GCellBox) -> GCellBox {
        GCellBox {
            x0: self.x0.min(other.x0),
            y0: self.y0.min(other.y0),
            x1: self.x1.max(other.x1),
            y1: self.y1.max(other.y1),
        }
    }

    /// Grows by `margin` cells, clipped to an `x_cells` by `y_cells` grid.
    pub fn expand(&self, margin: u32, x_cells: u32, y_cells: u32) -> GCellBox {
        GCellBox {
            x0: self.x0.saturating_sub(margin),
            y0: self.y0.saturating_sub(margin),
            x1: (self.x1 + margin).min(x_cells.saturating_sub(1)),
            y1: (self.y1 + margin).min(y_cells.saturating_sub(1)),
        }
    }

    pub fn contains(&self, x: u32, y: u32) -> bool {
        x >= self.x0 && x <= self.x1 && y >= self.y0 && y <= self.y1
    }

    pub fn touches(&self, other: &GCellBox) -> bool {
        self.x0 <= other.x1 && other.x0 <= self.x1 && self.y0 <= other.y1 && other.y0 <= self.y1
    }
}

/// What every per-stage task exposes to the scheduler.
pub trait StageTask: Send {
    fn net(&self) -> NetId;
    fn priority(&self) -> PriorityKey;
    /// GCells whose shared resources the task may read or claim.
    fn window(&self) -> GCellBox;
}

/// Highest priority first.
pub fn sort_by_priority<T: StageTask>(tasks: &mut [T]) {
    tasks.sort_by(|a, b| b.priority().cmp(&a.priority()));
}
