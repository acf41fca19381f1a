pub mod cache;
pub mod moesi;
pub mod network;

pub use moesi::{AccessError, MemHierarchy};
