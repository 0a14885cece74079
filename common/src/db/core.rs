use crate::db::gcell::GCellAxis;
use crate::db::indices::*;
use crate::error::DbError;
use crate::geom::point::Point;
use crate::geom::rect::{LayerRect, Rect};
use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LayerDirection {
    Vertical,
    Horizontal,
}

impl LayerDirection {
    pub fn is_horizontal(&self) -> bool {
        matches!(self, LayerDirection::Horizontal)
    }

    pub fn flip(&self) -> Self {
        match self {
            LayerDirection::Vertical => LayerDirection::Horizontal,
            LayerDirection::Horizontal => LayerDirection::Vertical,
        }
    }
}

/// Spacing rule: a base spacing plus optional `(min_width, spacing)` rows,
/// sorted by width, that apply to wider shapes.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpacingRule {
    pub min_spacing: i32,
    #[serde(default)]
    pub width_table: Vec<(i32, i32)>,
}

impl SpacingRule {
    pub fn new(min_spacing: i32) -> Self {
        Self {
            min_spacing,
            width_table: Vec::new(),
        }
    }

    pub fn spacing_for(&self, width: i32) -> i32 {
        self.width_table
            .iter()
            .filter(|(w, _)| width >= *w)
            .map(|&(_, s)| s)
            .fold(self.min_spacing, i32::max)
    }

    pub fn max_spacing(&self) -> i32 {
        self.width_table
            .iter()
            .map(|&(_, s)| s)
            .fold(self.min_spacing, i32::max)
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct LayerData {
    pub name: String,
    pub index: u8,
    pub direction: LayerDirection,
    pub pitch: i32,
    pub offset: i32,
    pub min_width: i32,
    pub spacing: SpacingRule,
    pub min_area: i64,
}

impl LayerData {
    /// Track coordinates of this layer's grid in `[lo, hi)`.
    pub fn tracks_in(&self, lo: i32, hi: i32) -> Vec<i32> {
        if hi <= lo || self.pitch <= 0 {
            return Vec::new();
        }
        let k0 = (lo - self.offset).div_euclid(self.pitch)
            + i32::from((lo - self.offset).rem_euclid(self.pitch) != 0);
        let mut out = Vec::new();
        let mut c = self.offset + k0 * self.pitch;
        while c < hi {
            out.push(c);
            c += self.pitch;
        }
        out
    }

    pub fn half_width(&self) -> i32 {
        self.min_width / 2
    }
}

/// A fixed via shape between routing layers `cut_layer` and `cut_layer + 1`.
/// All rectangles are relative to the via origin.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ViaMaster {
    pub name: String,
    pub cut_layer: u8,
    pub below: Rect,
    pub above: Rect,
    pub cut: Rect,
}

impl ViaMaster {
    pub fn shapes_at(&self, at: Point<i32>) -> [LayerRect; 2] {
        [
            LayerRect::new(self.cut_layer, self.below.translate(at)),
            LayerRect::new(self.cut_layer + 1, self.above.translate(at)),
        ]
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ConnectType {
    #[default]
    Signal,
    Clock,
    Power,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PinData {
    pub name: String,
    pub net: NetId,
    pub shapes: Vec<LayerRect>,
}

impl PinData {
    pub fn bbox(&self) -> Option<Rect> {
        self.shapes.iter().map(|s| s.rect).reduce(|a, b| a.union(&b))
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct NetData {
    pub name: String,
    pub pins: Vec<PinId>,
    pub driver: PinId,
    pub connect_type: ConnectType,
    #[serde(default)]
    pub critical: bool,
}

/// Read-only design snapshot handed to the routing pipeline.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct NetlistDB {
    pub die_area: Rect,
    pub gcell_axis: GCellAxis,
    pub layers: Vec<LayerData>,
    pub vias: Vec<ViaMaster>,
    pub nets: Vec<NetData>,
    pub pins: Vec<PinData>,
    #[serde(default)]
    pub blockages: Vec<LayerRect>,
}

impl NetlistDB {
    pub fn new(die_area: Rect, gcell_axis: GCellAxis) -> Self {
        Self {
            die_area,
            gcell_axis,
            layers: Vec::new(),
            vias: Vec::new(),
            nets: Vec::with_capacity(1000),
            pins: Vec::with_capacity(5000),
            blockages: Vec::new(),
        }
    }

    pub fn num_nets(&self) -> usize {
        self.nets.len()
    }
    pub fn num_layers(&self) -> usize {
        self.layers.len()
    }

    pub fn net(&self, id: NetId) -> &NetData {
        &self.nets[id.index()]
    }
    pub fn pin(&self, id: PinId) -> &PinData {
        &self.pins[id.index()]
    }

    pub fn layer_index(&self, name: &str) -> Option<u8> {
        self.layers.iter().find(|l| l.name == name).map(|l| l.index)
    }

    pub fn add_layer(
        &mut self,
        name: &str,
        direction: LayerDirection,
        pitch: i32,
        min_width: i32,
        spacing: SpacingRule,
        min_area: i64,
    ) -> u8 {
        let index = self.layers.len() as u8;
        self.layers.push(LayerData {
            name: name.to_string(),
            index,
            direction,
            pitch,
            offset: 0,
            min_width,
            spacing,
            min_area,
        });
        index
    }

    pub fn add_via(&mut self, name: &str, cut_layer: u8, below: Rect, above: Rect, cut: Rect) -> ViaId {
        let id = ViaId::new(self.vias.len());
        self.vias.push(ViaMaster {
            name: name.to_string(),
            cut_layer,
            below,
            above,
            cut,
        });
        id
    }

    pub fn add_net(&mut self, name: &str, connect_type: ConnectType) -> NetId {
        let id = NetId::new(self.nets.len());
        self.nets.push(NetData {
            name: name.to_string(),
            pins: Vec::new(),
            driver: PinId(u32::MAX),
            connect_type,
            critical: false,
        });
        id
    }

    /// The first pin added to a net becomes its driver.
    pub fn add_pin(&mut self, net: NetId, name: &str, shapes: Vec<LayerRect>) -> PinId {
        let pid = PinId::new(self.pins.len());
        self.pins.push(PinData {
            name: name.to_string(),
            net,
            shapes,
        });
        let net = &mut self.nets[net.index()];
        if net.pins.is_empty() {
            net.driver = pid;
        }
        net.pins.push(pid);
        pid
    }

    pub fn add_blockage(&mut self, shape: LayerRect) {
        self.blockages.push(shape);
    }

    pub fn net_bbox(&self, net: NetId) -> Rect {
        self.net(net)
            .pins
            .iter()
            .filter_map(|&p| self.pin(p).bbox())
            .reduce(|a, b| a.union(&b))
            .unwrap_or_default()
    }

    /// Structural checks run before any stage.
    pub fn validate(&self) -> Result<(), DbError> {
        self.gcell_axis.validate()?;
        if self.layers.is_empty() {
            return Err(DbError::NoLayers);
        }
        for (expected, layer) in self.layers.iter().enumerate() {
            if layer.index as usize != expected {
                return Err(DbError::LayerIndex {
                    name: layer.name.clone(),
                    expected,
                    found: layer.index,
                });
            }
            if layer.pitch <= 0 || layer.min_width <= 0 {
                return Err(DbError::LayerGeometry {
                    name: layer.name.clone(),
                });
            }
        }
        for via in &self.vias {
            if via.cut_layer as usize + 1 >= self.layers.len() {
                return Err(DbError::ViaLayer {
                    name: via.name.clone(),
                    cut: via.cut_layer,
                });
            }
        }
        for (idx, net) in self.nets.iter().enumerate() {
            if net.pins.is_empty() {
                return Err(DbError::EmptyNet {
                    net: net.name.clone(),
                });
            }
            for &pin in &net.pins {
                if self.pins.get(pin.index()).map(|p| p.net.index()) != Some(idx) {
                    return Err(DbError::PinOwnership {
                        net: net.name.clone(),
                        pin: pin.0,
                    });
                }
            }
            if !net.pins.contains(&net.driver) {
                return Err(DbError::DriverNotInNet {
                    net: net.name.clone(),
                    pin: net.driver.0,
                });
            }
        }
        Ok(())
    }
}
