//! Random placement strategy.
//!
//! Picks R distinct nodes uniformly at random, without replacement, from the
//! live node set. This is the default and works well for:
//!
//! - Small clusters
//! - Single rack deployments
//! - When load and network topology don't matter
//!
//! # Algorithm
//!
//! 1. Copy the candidate list
//! 2. Partially shuffle the first R positions
//! 3. Return those R nodes in selection order (the first is the primary)
//!
//! # Limitations
//!
//! - No rack or affinity awareness
//! - No load awareness: a nearly full node is as likely as an empty one

use crate::strategy::{check_candidates, check_factor, PlacementStrategy};
use corelib::node::Node;
use corelib::Result;
use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;

/// Random placement: R distinct nodes drawn uniformly at random.
///
/// # Example
///
/// ```rust
/// use replication::{PlacementStrategy, RandomStrategy};
/// use corelib::{Node, NodeId};
///
/// let strategy = RandomStrategy::new(2).unwrap();
/// let nodes: Vec<Node> = (0..4)
///     .map(|i| Node::new(NodeId(i), format!("dn-{i}"), format!("127.0.0.1:{}", 9100 + i)))
///     .collect();
///
/// let replicas = strategy.place(&nodes).unwrap();
/// assert_eq!(replicas.len(), 2);
/// ```
#[derive(Debug)]
pub struct RandomStrategy {
    /// Number of replicas to place (including primary).
    replication_factor: usize,
    rng: Mutex<StdRng>,
}

impl RandomStrategy {
    /// Create a new random strategy with the given replication factor.
    ///
    /// # Arguments
    /// * `replication_factor` - Number of replicas (typically 1-5)
    ///   - 1: No replication (single copy)
    ///   - 3: Standard (primary + 2 replicas)
    pub fn new(replication_factor: usize) -> Result<Self> {
        check_factor(replication_factor)?;
        Ok(Self {
            replication_factor,
            rng: Mutex::new(StdRng::from_entropy()),
        })
    }

    /// Deterministic variant for tests and simulations.
    pub fn with_seed(replication_factor: usize, seed: u64) -> Result<Self> {
        check_factor(replication_factor)?;
        Ok(Self {
            replication_factor,
            rng: Mutex::new(StdRng::seed_from_u64(seed)),
        })
    }
}

impl PlacementStrategy for RandomStrategy {
    fn replication_factor(&self) -> usize {
        self.replication_factor
    }

    fn place(&self, candidates: &[Node]) -> Result<Vec<Node>> {
        check_candidates(self.replication_factor, candidates)?;

        let mut pool = candidates.to_vec();
        let mut rng = self.rng.lock();
        let (chosen, _) = pool.partial_shuffle(&mut *rng, self.replication_factor);
        Ok(chosen.to_vec())
    }

    fn name(&self) -> &'static str {
        "RandomStrategy"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use corelib::{Error, NodeId};
    use proptest::prelude::*;
    use std::collections::{HashMap, HashSet};

    fn nodes(n: u128) -> Vec<Node> {
        (0..n)
            .map(|i| Node::new(NodeId(i), format!("dn-{i}"), format!("127.0.0.1:{}", 9100 + i)))
            .collect()
    }

    #[test]
    fn test_random_strategy_replication_factor() {
        let strategy = RandomStrategy::new(3).unwrap();
        assert_eq!(strategy.replication_factor(), 3);
        assert!(RandomStrategy::new(0).is_err());
    }

    #[test]
    fn test_random_strategy_replicas() {
        let strategy = RandomStrategy::with_seed(3, 42).unwrap();
        let replicas = strategy.place(&nodes(5)).unwrap();

        assert_eq!(replicas.len(), 3);
        // Should have unique nodes
        let unique: HashSet<_> = replicas.iter().map(|n| n.id).collect();
        assert_eq!(unique.len(), 3);
    }

    #[test]
    fn test_too_few_nodes() {
        let strategy = RandomStrategy::new(3).unwrap();
        match strategy.place(&nodes(2)) {
            Err(Error::InsufficientNodes { needed, available }) => {
                assert_eq!(needed, 3);
                assert_eq!(available, 2);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_every_node_gets_picked_as_primary() {
        // Flat random choice: over many draws every node should lead a chain.
        let strategy = RandomStrategy::with_seed(2, 7).unwrap();
        let pool = nodes(4);
        let mut primaries: HashMap<NodeId, usize> = HashMap::new();
        for _ in 0..400 {
            let chosen = strategy.place(&pool).unwrap();
            *primaries.entry(chosen[0].id).or_default() += 1;
        }
        assert_eq!(primaries.len(), 4);
        assert!(primaries.values().all(|&count| count > 40));
    }

    proptest! {
        #[test]
        fn prop_distinct_members(total in 1u128..20, factor in 1usize..6, seed in any::<u64>()) {
            let pool = nodes(total);
            let strategy = RandomStrategy::with_seed(factor, seed).unwrap();
            match strategy.place(&pool) {
                Ok(chosen) => {
                    prop_assert_eq!(chosen.len(), factor);
                    let unique: HashSet<_> = chosen.iter().map(|n| n.id).collect();
                    prop_assert_eq!(unique.len(), factor);
                    prop_assert!(chosen.iter().all(|n| pool.contains(n)));
                }
                Err(_) => prop_assert!((total as usize) < factor),
            }
        }
    }
}
