pub mod conversion;
pub mod tree;
