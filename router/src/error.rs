use rt_common::error::{ConfigError, DbError};

/// Problems projecting the design into a stage's representation.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AdaptationError {
    #[error("design has no routing layers")]
    NoLayers,

    #[error("configured routing layer '{0}' does not exist")]
    MissingLayer(String),

    #[error("bottom routing layer '{bottom}' lies above top routing layer '{top}'")]
    InvertedLayerRange { bottom: String, top: String },

    #[error("net '{net}' pin '{pin}' has a shape on undefined layer {layer}")]
    UndefinedLayer { net: String, pin: String, layer: u8 },
}

/// Per-net failures inside a stage. The orchestrator turns these into an
/// escalation or an exclusion; they never abort the run.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RouteError {
    #[error("pin '{pin}' has no legal access point")]
    NoLegalAccessPoint { pin: String },

    #[error("no path connects every terminal")]
    UnroutableNet,

    #[error("no free track for coarse segment {segment} on layer {layer}")]
    NoAvailableTrack { segment: usize, layer: u8 },

    #[error("coarse segment {segment} runs against the direction of layer {layer}")]
    WrongWaySegment { segment: usize, layer: u8 },

    #[error("no legal via on cut layer {cut} at ({x}, {y})")]
    NoLegalVia { cut: u8, x: i32, y: i32 },
}

impl RouteError {
    /// Capacity failures get one escalation before the net is dropped.
    pub fn is_capacity(&self) -> bool {
        !matches!(
            self,
            RouteError::NoLegalAccessPoint { .. } | RouteError::WrongWaySegment { .. }
        )
    }
}

/// Errors that stop a run before any stage executes.
#[derive(Debug, thiserror::Error)]
pub enum RouterError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("invalid design: {0}")]
    Db(#[from] DbError),

    #[error(transparent)]
    Adaptation(#[from] AdaptationError),

    #[error("design has no nets to route")]
    EmptyDesign,

    #[error("failed to build worker pool: {0}")]
    ThreadPool(#[from] rayon::ThreadPoolBuildError),
}
