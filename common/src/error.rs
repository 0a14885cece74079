//! Error types shared by the design snapshot and the configuration layer.

use crate::util::config::Stage;

/// Structural problems in a design snapshot. Any of these aborts a run before
/// the first stage.
#[derive(Debug, thiserror::Error)]
pub enum DbError {
    #[error("gcell axis {axis} needs at least two grid lines")]
    AxisTooShort { axis: char },

    #[error("gcell axis {axis} is not strictly increasing at line {index}")]
    AxisNotIncreasing { axis: char, index: usize },

    #[error("gcell step must be positive, got {0}")]
    InvalidGCellStep(i32),

    #[error("design has no routing layers")]
    NoLayers,

    #[error("layer '{name}' has index {found}, expected {expected}")]
    LayerIndex {
        name: String,
        expected: usize,
        found: u8,
    },

    #[error("layer '{name}' has non-positive pitch or width")]
    LayerGeometry { name: String },

    #[error("via '{name}' references cut layer {cut} without a layer above it")]
    ViaLayer { name: String, cut: u8 },

    #[error("net '{net}' has no pins")]
    EmptyNet { net: String },

    #[error("net '{net}' lists pin {pin} owned by another net")]
    PinOwnership { net: String, pin: u32 },

    #[error("net '{net}' drives from pin {pin} which it does not contain")]
    DriverNotInNet { net: String, pin: u32 },
}

/// Invalid run configuration, reported before any work starts.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to parse configuration: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("unknown stage '{0}'")]
    UnknownStage(String),

    #[error("stage list is empty")]
    EmptyFlow,

    #[error("stage {0:?} is listed more than once")]
    DuplicateStage(Stage),

    #[error("stage {stage:?} must not run after {after:?}")]
    StageOrder { stage: Stage, after: Stage },

    #[error("stage {stage:?} requires {requires:?} earlier in the flow")]
    MissingDependency { stage: Stage, requires: Stage },

    #[error("{name} must be at least 1")]
    ZeroIterations { name: &'static str },

    #[error("{name} must be within {range}, got {value}")]
    OutOfRange {
        name: &'static str,
        range: &'static str,
        value: f64,
    },

    #[error("utilization ratio for layer '{layer}' must be within (0, 1], got {value}")]
    UtilizationRatio { layer: String, value: f64 },

    #[error("thread_number must be at least 1")]
    ZeroThreads,

    #[error("unknown log level '{0}'")]
    LogLevel(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn db_error_display() {
        let err = DbError::AxisNotIncreasing { axis: 'y', index: 3 };
        assert_eq!(
            err.to_string(),
            "gcell axis y is not strictly increasing at line 3"
        );
    }

    #[test]
    fn config_error_display() {
        let err = ConfigError::MissingDependency {
            stage: Stage::TrackAssign,
            requires: Stage::GlobalRoute,
        };
        let msg = err.to_string();
        assert!(msg.contains("TrackAssign"));
        assert!(msg.contains("GlobalRoute"));
    }
}
