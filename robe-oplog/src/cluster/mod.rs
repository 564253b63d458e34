//! Replica set topology
pub mod topology;
pub mod types;

pub use topology::resolve_primary;
pub use types::{ClusterNode, NodeFlags, PrimarySelection};
