//! Placement strategy abstractions.
//!
//! A placement strategy decides which storage nodes host the replicas of one
//! block. Different strategies optimize for different goals:
//!
//! - **RandomStrategy**: R distinct nodes drawn uniformly at random
//! - **RackAwareStrategy**: replicas spread over as many racks as possible
//!
//! The name service only sees the trait, so capacity- or affinity-aware
//! policies can be swapped in without touching locking or replication.

pub mod rack_aware;
pub mod random;

pub use rack_aware::RackAwareStrategy;
pub use random::RandomStrategy;

use corelib::config::PlacementKind;
use corelib::node::Node;
use corelib::{Error, Result};
use std::sync::Arc;

/// Trait for placement strategies.
///
/// # Thread Safety
///
/// Implementations must be thread-safe (Send + Sync) as one instance is shared
/// by every concurrent open.
pub trait PlacementStrategy: Send + Sync + 'static {
    /// Number of replicas this strategy places per block.
    fn replication_factor(&self) -> usize;

    /// Choose the replica set for one block.
    ///
    /// # Arguments
    /// * `candidates` - Live storage nodes, no duplicates
    ///
    /// # Returns
    /// Exactly `replication_factor()` distinct nodes; position `i` in the
    /// result becomes replica index `i` (the first is the primary).
    ///
    /// # Errors
    /// `InsufficientNodes` when there are fewer candidates than replicas.
    fn place(&self, candidates: &[Node]) -> Result<Vec<Node>>;

    /// Strategy name (for logging/debugging).
    fn name(&self) -> &'static str;
}

/// Build the configured strategy.
pub fn from_kind(kind: PlacementKind, replication_factor: usize) -> Result<Arc<dyn PlacementStrategy>> {
    Ok(match kind {
        PlacementKind::Random => Arc::new(RandomStrategy::new(replication_factor)?),
        PlacementKind::RackAware => Arc::new(RackAwareStrategy::new(replication_factor)?),
    })
}

pub(crate) fn check_factor(replication_factor: usize) -> Result<()> {
    if replication_factor == 0 {
        return Err(Error::Config("replication factor must be at least 1".into()));
    }
    Ok(())
}

pub(crate) fn check_candidates(replication_factor: usize, candidates: &[Node]) -> Result<()> {
    if candidates.len() < replication_factor {
        return Err(Error::InsufficientNodes {
            needed: replication_factor,
            available: candidates.len(),
        });
    }
    Ok(())
}
