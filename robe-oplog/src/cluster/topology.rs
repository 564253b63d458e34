//! Primary node resolution
//!
//! Picks the one writable node of a replica set from a topology snapshot.
//! The result is pinned for the lifetime of a tailing connection; topology
//! changes are only picked up when the watcher restarts its cursor.

use super::types::{ClusterNode, PrimarySelection};
use crate::core::{WatchError, WatchResult};
use tracing::{debug, warn};

/// Select the primary node from `topology`
pub fn resolve_primary(
    topology: &[ClusterNode],
    selection: PrimarySelection,
) -> WatchResult<ClusterNode> {
    let candidates: Vec<&ClusterNode> = topology.iter().filter(|n| n.is_primary()).collect();

    match (candidates.as_slice(), selection) {
        ([], _) => Err(WatchError::NoPrimaryFound(format!(
            "none of {} known nodes is a healthy primary",
            topology.len()
        ))),
        ([node], _) => {
            debug!("Resolved primary {}", node);
            Ok((*node).clone())
        }
        ([first, ..], PrimarySelection::FirstMatch) => {
            warn!(
                "{} primary candidates reported, using first match {}",
                candidates.len(),
                first
            );
            Ok((*first).clone())
        }
        (many, PrimarySelection::Strict) => {
            let addrs: Vec<String> = many.iter().map(|n| n.address()).collect();
            Err(WatchError::NoPrimaryFound(format!(
                "ambiguous topology, multiple primaries: {}",
                addrs.join(", ")
            )))
        }
    }
}
