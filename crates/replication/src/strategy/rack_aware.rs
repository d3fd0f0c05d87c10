//! Rack-aware placement strategy.
//!
//! Spreads the replicas of a block across as many racks as the live node set
//! offers, so losing one rack never loses every copy.
//!
//! # Algorithm
//!
//! 1. Group candidates by rack label (unlabelled nodes form their own group)
//! 2. Visit racks in random order, taking one random node from each, until R
//!    nodes are chosen or every rack has contributed once
//! 3. Fill any remaining slots with random nodes not yet chosen
//!
//! With at least R racks every replica lands on a different rack; with fewer,
//! some racks hold two copies but every rack holds at least one.

use crate::strategy::{check_candidates, check_factor, PlacementStrategy};
use corelib::node::Node;
use corelib::Result;
use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use std::collections::BTreeMap;

#[derive(Debug)]
pub struct RackAwareStrategy {
    replication_factor: usize,
    rng: Mutex<StdRng>,
}

impl RackAwareStrategy {
    pub fn new(replication_factor: usize) -> Result<Self> {
        check_factor(replication_factor)?;
        Ok(Self {
            replication_factor,
            rng: Mutex::new(StdRng::from_entropy()),
        })
    }

    pub fn with_seed(replication_factor: usize, seed: u64) -> Result<Self> {
        check_factor(replication_factor)?;
        Ok(Self {
            replication_factor,
            rng: Mutex::new(StdRng::seed_from_u64(seed)),
        })
    }
}

impl PlacementStrategy for RackAwareStrategy {
    fn replication_factor(&self) -> usize {
        self.replication_factor
    }

    fn place(&self, candidates: &[Node]) -> Result<Vec<Node>> {
        check_candidates(self.replication_factor, candidates)?;

        let mut racks: BTreeMap<Option<&str>, Vec<&Node>> = BTreeMap::new();
        for node in candidates {
            racks.entry(node.rack.as_deref()).or_default().push(node);
        }

        let mut rng = self.rng.lock();
        let mut groups: Vec<Vec<&Node>> = racks.into_values().collect();
        groups.shuffle(&mut *rng);

        let mut chosen: Vec<Node> = Vec::with_capacity(self.replication_factor);
        for group in &mut groups {
            if chosen.len() == self.replication_factor {
                break;
            }
            group.shuffle(&mut *rng);
            if let Some(node) = group.pop() {
                chosen.push(node.clone());
            }
        }

        let mut rest: Vec<&Node> = groups.into_iter().flatten().collect();
        rest.shuffle(&mut *rng);
        for node in rest {
            if chosen.len() == self.replication_factor {
                break;
            }
            chosen.push(node.clone());
        }

        Ok(chosen)
    }

    fn name(&self) -> &'static str {
        "RackAwareStrategy"
    }
}
