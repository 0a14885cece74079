use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// Pipeline stages in their canonical order.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Stage {
    PinAccess,
    ResourceAllocate,
    GlobalRoute,
    TrackAssign,
    DetailedRoute,
    ViolationRepair,
}

impl Stage {
    pub const ALL: [Stage; 6] = [
        Stage::PinAccess,
        Stage::ResourceAllocate,
        Stage::GlobalRoute,
        Stage::TrackAssign,
        Stage::DetailedRoute,
        Stage::ViolationRepair,
    ];

    /// The stage whose committed result this one consumes, if it cannot run
    /// without it.
    pub fn requires(&self) -> Option<Stage> {
        match self {
            Stage::TrackAssign => Some(Stage::GlobalRoute),
            Stage::DetailedRoute => Some(Stage::TrackAssign),
            Stage::ViolationRepair => Some(Stage::DetailedRoute),
            _ => None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Stage::PinAccess => "pin_access",
            Stage::ResourceAllocate => "resource_allocate",
            Stage::GlobalRoute => "global_route",
            Stage::TrackAssign => "track_assign",
            Stage::DetailedRoute => "detailed_route",
            Stage::ViolationRepair => "violation_repair",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Stage {
    type Err = ConfigError;

    /// Accepts both the config spelling (`GlobalRoute`) and the snake-case
    /// display name (`global_route`).
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        Stage::ALL
            .into_iter()
            .find(|st| st.name() == s || format!("{st:?}") == s)
            .ok_or_else(|| ConfigError::UnknownStage(s.to_string()))
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub flow: FlowConfig,
    #[serde(default)]
    pub io: IoConfig,
    #[serde(default)]
    pub layers: LayerConfig,
    #[serde(default)]
    pub pin_access: PinAccessConfig,
    #[serde(default)]
    pub resource_allocate: ResourceAllocateConfig,
    #[serde(default)]
    pub global_routing: GlobalRoutingConfig,
    #[serde(default)]
    pub track_assignment: TrackAssignmentConfig,
    #[serde(default)]
    pub detailed_routing: DetailedRoutingConfig,
    #[serde(default)]
    pub violation_repair: ViolationRepairConfig,
}

impl Config {
    pub fn from_toml_str(s: &str) -> Result<Self, ConfigError> {
        let config: Config = toml::from_str(s)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.flow.validate()?;
        self.io.validate()?;
        for (layer, &value) in &self.layers.utilization_ratio {
            if !(value > 0.0 && value <= 1.0) {
                return Err(ConfigError::UtilizationRatio {
                    layer: layer.clone(),
                    value,
                });
            }
        }

        if self.pin_access.access_point_count == 0 {
            return Err(ConfigError::ZeroIterations {
                name: "pin_access.access_point_count",
            });
        }

        let ra = &self.resource_allocate;
        if ra.outer_iterations == 0 {
            return Err(ConfigError::ZeroIterations {
                name: "resource_allocate.outer_iterations",
            });
        }
        if ra.inner_iterations == 0 {
            return Err(ConfigError::ZeroIterations {
                name: "resource_allocate.inner_iterations",
            });
        }
        check_range("resource_allocate.initial_penalty", ra.initial_penalty, "(0, inf)", |v| v > 0.0)?;
        check_range("resource_allocate.penalty_drop_rate", ra.penalty_drop_rate, "(0, 1)", |v| {
            v > 0.0 && v < 1.0
        })?;

        let gr = &self.global_routing;
        check_range("global_routing.via_cost", gr.via_cost, "[0, inf)", |v| v >= 0.0)?;
        check_range("global_routing.congestion_weight", gr.congestion_weight, "[0, inf)", |v| v >= 0.0)?;
        check_range("global_routing.overflow_cost", gr.overflow_cost, "[0, inf)", |v| v >= 0.0)?;
        check_range(
            "global_routing.escalation_cost_scale",
            gr.escalation_cost_scale,
            "[1, inf)",
            |v| v >= 1.0,
        )?;

        let ta = &self.track_assignment;
        check_range("track_assignment.occupancy_weight", ta.occupancy_weight, "[0, inf)", |v| v >= 0.0)?;
        check_range("track_assignment.alignment_weight", ta.alignment_weight, "[0, inf)", |v| v >= 0.0)?;

        check_range(
            "detailed_routing.via_halo_factor",
            self.detailed_routing.via_halo_factor,
            "[1, inf)",
            |v| v >= 1.0,
        )?;

        if self.violation_repair.max_iterations == 0 {
            return Err(ConfigError::ZeroIterations {
                name: "violation_repair.max_iterations",
            });
        }
        Ok(())
    }
}

fn check_range(
    name: &'static str,
    value: f64,
    range: &'static str,
    ok: impl Fn(f64) -> bool,
) -> Result<(), ConfigError> {
    if ok(value) {
        Ok(())
    } else {
        Err(ConfigError::OutOfRange { name, range, value })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FlowConfig {
    #[serde(default = "default_stages")]
    pub stages: Vec<Stage>,
}

impl Default for FlowConfig {
    fn default() -> Self {
        Self {
            stages: default_stages(),
        }
    }
}

impl FlowConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.stages.is_empty() {
            return Err(ConfigError::EmptyFlow);
        }
        for (i, stage) in self.stages.iter().enumerate() {
            if self.stages[..i].contains(stage) {
                return Err(ConfigError::DuplicateStage(*stage));
            }
            if let Some(&after) = self.stages[..i].iter().find(|prev| *prev > stage) {
                return Err(ConfigError::StageOrder {
                    stage: *stage,
                    after,
                });
            }
            if let Some(requires) = stage.requires() {
                if !self.stages[..i].contains(&requires) {
                    return Err(ConfigError::MissingDependency {
                        stage: *stage,
                        requires,
                    });
                }
            }
        }
        Ok(())
    }

    pub fn contains(&self, stage: Stage) -> bool {
        self.stages.contains(&stage)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IoConfig {
    #[serde(default = "default_output_path")]
    pub output_path: String,
    #[serde(default = "default_temp_directory_path")]
    pub temp_directory_path: String,
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Worker threads; unset uses one per core.
    #[serde(default)]
    pub thread_number: Option<usize>,
    #[serde(default)]
    pub enable_debug_image: bool,
}

impl Default for IoConfig {
    fn default() -> Self {
        Self {
            output_path: default_output_path(),
            temp_directory_path: default_temp_directory_path(),
            log_level: default_log_level(),
            thread_number: None,
            enable_debug_image: false,
        }
    }
}

impl IoConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.thread_number == Some(0) {
            return Err(ConfigError::ZeroThreads);
        }
        self.level_filter().map(|_| ())
    }

    pub fn level_filter(&self) -> Result<log::LevelFilter, ConfigError> {
        self.log_level
            .parse::<log::LevelFilter>()
            .map_err(|_| ConfigError::LogLevel(self.log_level.clone()))
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LayerConfig {
    /// Lowest layer usable for wiring; unset means the bottom layer.
    #[serde(default)]
    pub bottom_routing_layer: Option<String>,
    #[serde(default)]
    pub top_routing_layer: Option<String>,
    /// Fraction of each layer's tracks offered as GCell edge supply.
    #[serde(default)]
    pub utilization_ratio: BTreeMap<String, f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PinAccessConfig {
    #[serde(default = "default_access_point_count")]
    pub access_point_count: usize,
}

impl Default for PinAccessConfig {
    fn default() -> Self {
        Self {
            access_point_count: default_access_point_count(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResourceAllocateConfig {
    #[serde(default = "default_ra_initial_penalty")]
    pub initial_penalty: f64,
    #[serde(default = "default_ra_penalty_drop_rate")]
    pub penalty_drop_rate: f64,
    #[serde(default = "default_ra_outer_iterations")]
    pub outer_iterations: usize,
    #[serde(default = "default_ra_inner_iterations")]
    pub inner_iterations: usize,
}

impl Default for ResourceAllocateConfig {
    fn default() -> Self {
        Self {
            initial_penalty: default_ra_initial_penalty(),
            penalty_drop_rate: default_ra_penalty_drop_rate(),
            outer_iterations: default_ra_outer_iterations(),
            inner_iterations: default_ra_inner_iterations(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GlobalRoutingConfig {
    #[serde(default = "default_gr_via_cost")]
    pub via_cost: f64,
    #[serde(default = "default_gr_congestion_weight")]
    pub congestion_weight: f64,
    #[serde(default = "default_gr_overflow_cost")]
    pub overflow_cost: f64,
    #[serde(default = "default_gr_search_margin")]
    pub search_margin: u32,
    #[serde(default = "default_gr_escalation_cost_scale")]
    pub escalation_cost_scale: f64,
    #[serde(default = "default_gr_escalation_retries")]
    pub escalation_retries: u32,
}

impl Default for GlobalRoutingConfig {
    fn default() -> Self {
        Self {
            via_cost: default_gr_via_cost(),
            congestion_weight: default_gr_congestion_weight(),
            overflow_cost: default_gr_overflow_cost(),
            search_margin: default_gr_search_margin(),
            escalation_cost_scale: default_gr_escalation_cost_scale(),
            escalation_retries: default_gr_escalation_retries(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrackAssignmentConfig {
    #[serde(default = "default_ta_occupancy_weight")]
    pub occupancy_weight: f64,
    #[serde(default = "default_ta_alignment_weight")]
    pub alignment_weight: f64,
}

impl Default for TrackAssignmentConfig {
    fn default() -> Self {
        Self {
            occupancy_weight: default_ta_occupancy_weight(),
            alignment_weight: default_ta_alignment_weight(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DetailedRoutingConfig {
    /// Via halo as a multiple of the layer spacing.
    #[serde(default = "default_dr_via_halo_factor")]
    pub via_halo_factor: f64,
}

impl Default for DetailedRoutingConfig {
    fn default() -> Self {
        Self {
            via_halo_factor: default_dr_via_halo_factor(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ViolationRepairConfig {
    #[serde(default = "default_vr_max_iterations")]
    pub max_iterations: usize,
    #[serde(default = "default_vr_retry_budget")]
    pub retry_budget: u32,
}

impl Default for ViolationRepairConfig {
    fn default() -> Self {
        Self {
            max_iterations: default_vr_max_iterations(),
            retry_budget: default_vr_retry_budget(),
        }
    }
}

fn default_stages() -> Vec<Stage> {
    Stage::ALL.to_vec()
}

fn default_output_path() -> String {
    "output/route.json".to_string()
}

fn default_temp_directory_path() -> String {
    "output/debug".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_access_point_count() -> usize {
    3
}

fn default_ra_initial_penalty() -> f64 {
    10.0
}

fn default_ra_penalty_drop_rate() -> f64 {
    0.8
}

fn default_ra_outer_iterations() -> usize {
    4
}

fn default_ra_inner_iterations() -> usize {
    2
}

fn default_gr_via_cost() -> f64 {
    4.0
}

fn default_gr_congestion_weight() -> f64 {
    1.0
}

fn default_gr_overflow_cost() -> f64 {
    8.0
}

fn default_gr_search_margin() -> u32 {
    4
}

fn default_gr_escalation_cost_scale() -> f64 {
    2.0
}

fn default_gr_escalation_retries() -> u32 {
    1
}

fn default_ta_occupancy_weight() -> f64 {
    1.0
}

fn default_ta_alignment_weight() -> f64 {
    0.5
}

fn default_dr_via_halo_factor() -> f64 {
    2.0
}

fn default_vr_max_iterations() -> usize {
    5
}

fn default_vr_retry_budget() -> u32 {
    3
}
