//! Projects the shared design snapshot into each stage's working set.

use crate::error::AdaptationError;
use rayon::prelude::*;
use rt_common::db::core::{LayerData, NetlistDB, ViaMaster};
use rt_common::db::gcell::GCellAxis;
use rt_common::db::indices::NetId;
use rt_common::geom::rect::Rect;
use rt_common::util::config::{LayerConfig, Stage};

/// A stage's view of the design: technology copied out of the snapshot plus
/// one task per active net.
pub struct StageDatabase<T> {
    pub stage: Stage,
    pub die: Rect,
    pub axis: GCellAxis,
    pub layers: Vec<LayerData>,
    pub vias: Vec<ViaMaster>,
    /// Inclusive range of layers wires may run on.
    pub routable: (u8, u8),
    /// Per-layer fraction of tracks the capacity model may use.
    pub utilization: Vec<f64>,
    pub tasks: Vec<T>,
    pub excluded: Vec<(NetId, AdaptationError)>,
}

pub struct DataManager<'a> {
    db: &'a NetlistDB,
    config: &'a LayerConfig,
}

impl<'a> DataManager<'a> {
    pub fn new(db: &'a NetlistDB, config: &'a LayerConfig) -> Self {
        Self { db, config }
    }

    fn lookup(&self, name: &Option<String>, fallback: u8) -> Result<u8, AdaptationError> {
        match name {
            None => Ok(fallback),
            Some(n) => self
                .db
                .layer_index(n)
                .ok_or_else(|| AdaptationError::MissingLayer(n.clone())),
        }
    }

    pub fn routable_range(&self) -> Result<(u8, u8), AdaptationError> {
        if self.db.layers.is_empty() {
            return Err(AdaptationError::NoLayers);
        }
        let top_default = (self.db.layers.len() - 1) as u8;
        let bottom = self.lookup(&self.config.bottom_routing_layer, 0)?;
        let top = self.lookup(&self.config.top_routing_layer, top_default)?;
        if bottom > top {
            return Err(AdaptationError::InvertedLayerRange {
                bottom: self.db.layers[bottom as usize].name.clone(),
                top: self.db.layers[top as usize].name.clone(),
            });
        }
        Ok((bottom, top))
    }

    pub fn utilization(&self) -> Result<Vec<f64>, AdaptationError> {
        let mut ratios = vec![1.0; self.db.layers.len()];
        for (name, &ratio) in &self.config.utilization_ratio {
            let idx = self
                .db
                .layer_index(name)
                .ok_or_else(|| AdaptationError::MissingLayer(name.clone()))?;
            ratios[idx as usize] = ratio;
        }
        Ok(ratios)
    }

    /// A pin shape on a layer the snapshot does not define.
    fn undefined_layer(&self, net: NetId) -> Option<AdaptationError> {
        let data = self.db.net(net);
        let layers = self.db.layers.len();
        data.pins.iter().find_map(|&p| {
            let pin = self.db.pin(p);
            pin.shapes
                .iter()
                .find(|s| s.layer as usize >= layers)
                .map(|s| AdaptationError::UndefinedLayer {
                    net: data.name.clone(),
                    pin: pin.name.clone(),
                    layer: s.layer,
                })
        })
    }

    /// Builds `stage`'s database for `nets`. `build` returns `None` for a
    /// net with nothing to do in this stage; such nets are simply skipped.
    pub fn adapt<T, F>(
        &self,
        stage: Stage,
        nets: &[NetId],
        build: F,
    ) -> Result<StageDatabase<T>, AdaptationError>
    where
        T: Send,
        F: Fn(NetId) -> Option<T> + Sync,
    {
        let routable = self.routable_range()?;
        let utilization = self.utilization()?;

        let built: Vec<Result<Option<T>, (NetId, AdaptationError)>> = nets
            .par_iter()
            .map(|&net| match self.undefined_layer(net) {
                Some(err) => Err((net, err)),
                None => Ok(build(net)),
            })
            .collect();

        let mut tasks = Vec::with_capacity(built.len());
        let mut excluded = Vec::new();
        for item in built {
            match item {
                Ok(Some(task)) => tasks.push(task),
                Ok(None) => {}
                Err(e) => excluded.push(e),
            }
        }

        log::debug!(
            "{}: adapted {} tasks, {} nets rejected",
            stage,
            tasks.len(),
            excluded.len()
        );

        Ok(StageDatabase {
            stage,
            die: self.db.die_area,
            axis: self.db.gcell_axis.clone(),
            layers: self.db.layers.clone(),
            vias: self.db.vias.clone(),
            routable,
            utilization,
            tasks,
            excluded,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rt_common::db::core::{ConnectType, LayerDirection, SpacingRule};
    use rt_common::geom::rect::LayerRect;

    fn db() -> NetlistDB {
        let die = Rect::from_coords(0, 0, 100, 100);
        let mut db = NetlistDB::new(die, GCellAxis::uniform(die, 20).unwrap());
        db.add_layer("M1", LayerDirection::Horizontal, 10, 4, SpacingRule::new(4), 0);
        db.add_layer("M2", LayerDirection::Vertical, 10, 4, SpacingRule::new(4), 0);
        db.add_layer("M3", LayerDirection::Horizontal, 10, 4, SpacingRule::new(4), 0);
        let a = db.add_net("a", ConnectType::Signal);
        db.add_pin(a, "p", vec![LayerRect::new(0, Rect::from_coords(0, 0, 2, 2))]);
        let b = db.add_net("b", ConnectType::Signal);
        db.add_pin(b, "q", vec![LayerRect::new(7, Rect::from_coords(0, 0, 2, 2))]);
        db
    }

    #[test]
    fn resolves_layer_range_and_ratios() {
        let db = db();
        let config = LayerConfig {
            bottom_routing_layer: Some("M2".into()),
            top_routing_layer: None,
            utilization_ratio: [("M3".to_string(), 0.5)].into_iter().collect(),
        };
        let dm = DataManager::new(&db, &config);
        assert_eq!(dm.routable_range().unwrap(), (1, 2));
        assert_eq!(dm.utilization().unwrap(), vec![1.0, 1.0, 0.5]);
    }

    #[test]
    fn bad_layer_names_fail_adaptation() {
        let db = db();
        let missing = LayerConfig {
            top_routing_layer: Some("M9".into()),
            ..LayerConfig::default()
        };
        let dm = DataManager::new(&db, &missing);
        assert_eq!(
            dm.adapt(Stage::GlobalRoute, &[], |_| Some(())).err(),
            Some(AdaptationError::MissingLayer("M9".into()))
        );

        let inverted = LayerConfig {
            bottom_routing_layer: Some("M3".into()),
            top_routing_layer: Some("M1".into()),
            ..LayerConfig::default()
        };
        let dm = DataManager::new(&db, &inverted);
        assert!(matches!(
            dm.routable_range(),
            Err(AdaptationError::InvertedLayerRange { .. })
        ));
    }

    #[test]
    fn undefined_pin_layer_excludes_only_that_net() {
        let db = db();
        let config = LayerConfig::default();
        let dm = DataManager::new(&db, &config);
        let stage = dm
            .adapt(Stage::PinAccess, &[NetId(0), NetId(1)], |n| Some(n))
            .unwrap();
        assert_eq!(stage.tasks, vec![NetId(0)]);
        assert_eq!(stage.excluded.len(), 1);
        assert!(matches!(
            stage.excluded[0].1,
            AdaptationError::UndefinedLayer { layer: 7, .. }
        ));
        assert_eq!(stage.routable, (0, 2));
    }
}
