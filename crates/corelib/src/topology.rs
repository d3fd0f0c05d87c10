//! Cluster membership as seen by the name service.
//!
//! Storage nodes join either statically (listed in configuration, always
//! considered live) or dynamically by sending heartbeats. A dynamic node that
//! stays silent longer than the node timeout is no longer offered to placement.

use crate::node::{Node, NodeId};
use crate::protocol::NodeReport;
use dashmap::DashMap;
use std::time::Duration;
use tokio::time::Instant;

/// Last known state of one storage node.
#[derive(Debug, Clone)]
pub struct NodeStatus {
    pub node: Node,
    pub last_seen: Instant,
    pub blocks: u64,
    pub bytes: u64,
    /// Statically configured; never expires.
    pub pinned: bool,
}

impl NodeStatus {
    fn is_live(&self, now: Instant, timeout: Duration) -> bool {
        self.pinned || now.saturating_duration_since(self.last_seen) <= timeout
    }
}

/// Thread-safe registry of known storage nodes.
#[derive(Debug, Default)]
pub struct Topology {
    nodes: DashMap<NodeId, NodeStatus>,
}

impl Topology {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a statically configured node.
    pub fn register_static(&self, node: Node) {
        tracing::info!(node = %node, id = %node.id, "registered static storage node");
        self.nodes.insert(
            node.id,
            NodeStatus {
                node,
                last_seen: Instant::now(),
                blocks: 0,
                bytes: 0,
                pinned: true,
            },
        );
    }

    /// Record a heartbeat. Returns `true` if the node was not known before.
    pub fn observe(&self, report: NodeReport) -> bool {
        self.observe_at(report, Instant::now())
    }

    fn observe_at(&self, report: NodeReport, now: Instant) -> bool {
        let mut joined = false;
        self.nodes
            .entry(report.node.id)
            .and_modify(|status| {
                status.node = report.node.clone();
                status.last_seen = now;
                status.blocks = report.blocks;
                status.bytes = report.bytes;
            })
            .or_insert_with(|| {
                joined = true;
                NodeStatus {
                    node: report.node.clone(),
                    last_seen: now,
                    blocks: report.blocks,
                    bytes: report.bytes,
                    pinned: false,
                }
            });
        if joined {
            tracing::info!(node = %report.node, id = %report.node.id, "storage node joined");
        }
        joined
    }

    /// Nodes eligible for placement, sorted by id.
    pub fn live_nodes(&self, timeout: Duration) -> Vec<Node> {
        self.live_nodes_at(Instant::now(), timeout)
    }

    fn live_nodes_at(&self, now: Instant, timeout: Duration) -> Vec<Node> {
        let mut live: Vec<Node> = self
            .nodes
            .iter()
            .filter(|entry| entry.value().is_live(now, timeout))
            .map(|entry| entry.value().node.clone())
            .collect();
        live.sort_by_key(|n| n.id);
        live
    }

    /// Forget dynamic nodes silent for longer than `timeout`.
    pub fn expire(&self, timeout: Duration) -> Vec<NodeId> {
        self.expire_at(Instant::now(), timeout)
    }

    fn expire_at(&self, now: Instant, timeout: Duration) -> Vec<NodeId> {
        let dead: Vec<NodeId> = self
            .nodes
            .iter()
            .filter(|entry| !entry.value().is_live(now, timeout))
            .map(|entry| *entry.key())
            .collect();

        for id in &dead {
            if let Some((_, status)) = self.nodes.remove(id) {
                tracing::warn!(node = %status.node, id = %id, "storage node expired");
            }
        }
        dead
    }

    pub fn get(&self, id: &NodeId) -> Option<NodeStatus> {
        self.nodes.get(id).map(|entry| entry.value().clone())
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}
