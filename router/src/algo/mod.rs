pub mod batch;
pub mod maze;
