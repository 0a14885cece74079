pub mod algo;
pub mod context;
pub mod data_manager;
pub mod detailed_router;
pub mod error;
pub mod flow;
pub mod global_router;
pub mod grid;
pub mod pin_access;
pub mod resource_allocator;
pub mod shapes;
pub mod task;
pub mod track_assigner;
pub mod utils;
pub mod violation_repair;

pub use error::{RouteError, RouterError};
pub use flow::{RouteOutcome, route};
