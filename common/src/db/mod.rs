pub mod core;
pub mod gcell;
pub mod indices;
