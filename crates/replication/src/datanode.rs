//! Storage node service: chain-replicated block writes and replica reads.
//!
//! # Chain replication
//!
//! A write carries the whole remaining chain for one block: this node's replica
//! first, then every downstream replica still to be written.
//!
//! ```text
//! caller ──WriteBlock[r0,r1,r2]──▶ dn-a ──WriteBlock[r1,r2]──▶ dn-b ──WriteBlock[r2]──▶ dn-c
//!        ◀──────── outcome ─────── persist r0          persist r1           persist r2
//! ```
//!
//! Each node persists its own replica before forwarding, so replica *i* is on
//! disk before replica *i+1* is attempted. The caller only sees the aggregate
//! outcome of the chain: a failure anywhere downstream comes back unchanged.
//! Nothing is rolled back; replicas written before the failing hop stay.

use crate::block_store::BlockStore;
use async_trait::async_trait;
use bytes::Bytes;
use corelib::protocol::{NodeReport, Reply, Request, RequestBody, RequestId, Response};
use corelib::{
    retry_with_backoff, Block, ContentKey, DataNodeConnector, DataNodeRpc, Error, Node, NodeId,
    ReplicaAssignment, RequestHandler, Result, RetryPolicy,
};
use dashmap::DashMap;
use std::sync::Arc;
use std::time::Instant;

/// What a node knows about one replica it holds.
#[derive(Debug, Clone)]
pub struct ReplicaState {
    /// Always `initialized == true` once recorded.
    pub assignment: ReplicaAssignment,
    /// Local commit time.
    pub written_at: Instant,
    pub len: u64,
    /// BLAKE3 of the bytes; unknown for replicas recovered from disk.
    pub checksum: Option<blake3::Hash>,
}

/// Block service of one storage node.
pub struct StorageNode {
    node: Node,
    store: Arc<dyn BlockStore>,
    replicas: DashMap<ContentKey, ReplicaState>,
    peers: Arc<dyn DataNodeConnector>,
    forward_retry: RetryPolicy,
}

impl StorageNode {
    pub fn new(
        node: Node,
        store: Arc<dyn BlockStore>,
        peers: Arc<dyn DataNodeConnector>,
        forward_retry: RetryPolicy,
    ) -> Self {
        Self {
            node,
            store,
            replicas: DashMap::new(),
            peers,
            forward_retry,
        }
    }

    pub fn node(&self) -> &Node {
        &self.node
    }

    /// Rebuild replica state from what the block store already holds.
    ///
    /// Digests recorded by the store come back too, so reads keep verifying
    /// replicas written before the restart. Returns the number of replicas found.
    pub async fn recover(&self) -> Result<usize> {
        let keys = self.store.keys().await?;
        let mut unverified = 0usize;
        for key in &keys {
            let Some(stat) = self.store.stat(key).await? else {
                continue;
            };
            if stat.checksum.is_none() {
                unverified += 1;
            }
            let assignment = ReplicaAssignment {
                file: key.file.clone(),
                block: key.block,
                replica: key.replica,
                replication: key.replica + 1,
                target: self.node.clone(),
                initialized: true,
            };
            self.replicas.insert(
                key.clone(),
                ReplicaState {
                    assignment,
                    written_at: Instant::now(),
                    len: stat.len,
                    checksum: stat.checksum,
                },
            );
        }
        if unverified > 0 {
            tracing::warn!(node = %self.node, unverified, "replicas recovered without a digest");
        }
        tracing::info!(node = %self.node, replicas = keys.len(), "recovered replica inventory");
        Ok(keys.len())
    }

    pub fn replica(&self, key: &ContentKey) -> Option<ReplicaState> {
        self.replicas.get(key).map(|entry| entry.value().clone())
    }

    /// Inventory for the next heartbeat.
    pub fn report(&self) -> NodeReport {
        let bytes = self.replicas.iter().map(|entry| entry.value().len).sum();
        NodeReport {
            node: self.node.clone(),
            blocks: self.replicas.len() as u64,
            bytes,
        }
    }

    /// Persist the head of the chain and relay the rest.
    #[tracing::instrument(level = "debug", skip_all, fields(node = %self.node.name, request = %request.request_id))]
    pub async fn handle_write(&self, request: Request) -> Response {
        let id = request.request_id;
        let chain = match request.body {
            RequestBody::WriteBlock { chain } => chain,
            other => {
                let err = Error::Malformed(format!("{} sent to WriteBlock", other.operation()));
                return Response::failure_from(id, &err);
            }
        };

        match self.write_chain(id, chain).await {
            Ok(response) => response,
            Err(e) => {
                tracing::warn!(error = %e, "block write failed");
                Response::failure_from(id, &e)
            }
        }
    }

    async fn write_chain(&self, id: RequestId, chain: Vec<Block>) -> Result<Response> {
        let mut chain = chain.into_iter();
        let head = chain
            .next()
            .ok_or_else(|| Error::Malformed("empty write chain".to_string()))?;
        let rest: Vec<Block> = chain.collect();
        let a = head.assignment.clone();

        if a.target.id != self.node.id {
            // Routing is the caller's job; write anyway.
            tracing::debug!(target = %a.target, "chain head names another node");
        }

        self.persist(head).await?;

        if !a.has_successor() {
            return Ok(Response::success(
                id,
                format!(
                    "Block {} replication {} for {} write success",
                    a.block, a.replica, a.file
                ),
            ));
        }

        if rest.is_empty() {
            return Err(Error::Malformed(format!(
                "chain for {} block {} ends at replica {} of {}",
                a.file, a.block, a.replica, a.replication
            )));
        }

        let downstream = self.forward(rest).await?;
        if downstream.is_success() {
            Ok(Response::success(
                id,
                format!(
                    "Block {} replication {}..{} for {} write success",
                    a.block,
                    a.replica,
                    a.replication - 1,
                    a.file
                ),
            ))
        } else {
            metrics::counter!("chainfs_forward_failures_total").increment(1);
            tracing::warn!(message = %downstream.message, "downstream replica failed");
            Ok(Response {
                response_id: id,
                ..downstream
            })
        }
    }

    async fn persist(&self, block: Block) -> Result<()> {
        let key = block.assignment.key();
        let checksum = blake3::hash(&block.data);
        let len = block.data.len() as u64;

        self.store.put(&key, block.data).await?;

        let mut assignment = block.assignment;
        assignment.initialized = true;
        let previous = self.replicas.insert(
            key.clone(),
            ReplicaState {
                assignment,
                written_at: Instant::now(),
                len,
                checksum: Some(checksum),
            },
        );
        if previous.is_some() {
            tracing::debug!(key = %key, "replica rewritten");
        }
        metrics::counter!("chainfs_blocks_written_total").increment(1);
        tracing::debug!(key = %key, len, "replica persisted");
        Ok(())
    }

    async fn forward(&self, rest: Vec<Block>) -> Result<Response> {
        let next = rest[0].assignment.target.clone();
        let request = Request::new(RequestBody::WriteBlock { chain: rest });
        let what = format!("forward {} to {}", request.request_id, next);

        // Resolving the peer is part of each attempt: a node that is down now
        // may be back before the budget runs out.
        retry_with_backoff(&self.forward_retry, &what, || {
            let peer = self.peers.connect(&next);
            let request = request.clone();
            async move { peer?.write_block(request).await }
        })
        .await
    }

    /// Read one replica from the local store. Misses are not forwarded.
    #[tracing::instrument(level = "debug", skip_all, fields(node = %self.node.name, request = %request.request_id))]
    pub async fn handle_read(&self, request: Request) -> Response {
        let id = request.request_id;
        let replica = match request.body {
            RequestBody::ReadBlock { replica } => replica,
            other => {
                let err = Error::Malformed(format!("{} sent to ReadBlock", other.operation()));
                return Response::failure_from(id, &err);
            }
        };

        match self.read_replica(&replica).await {
            Ok(data) => {
                metrics::counter!("chainfs_blocks_read_total").increment(1);
                let message = format!(
                    "Block {} replication {} for {} read success",
                    replica.block, replica.replica, replica.file
                );
                let mut assignment = replica;
                assignment.initialized = true;
                Response::success(id, message).with_block(Block::new(assignment, data))
            }
            Err(e) => Response::failure_from(id, &e),
        }
    }

    async fn read_replica(&self, replica: &ReplicaAssignment) -> Result<Bytes> {
        let key = replica.key();
        let data = self.store.get(&key).await?.ok_or_else(|| {
            Error::NotFound(format!(
                "Block {} replication {} for {} does not exist",
                replica.block, replica.replica, replica.file
            ))
        })?;

        let expected = self.replicas.get(&key).and_then(|state| state.checksum);
        if let Some(expected) = expected {
            if blake3::hash(&data) != expected {
                tracing::error!(key = %key, "replica checksum mismatch");
                return Err(Error::LocalIo(format!("checksum mismatch for {key}")));
            }
        }
        Ok(data)
    }
}

#[async_trait]
impl DataNodeRpc for StorageNode {
    async fn write_block(&self, request: Request) -> Result<Response> {
        Ok(self.handle_write(request).await)
    }

    async fn read_block(&self, request: Request) -> Result<Response> {
        Ok(self.handle_read(request).await)
    }
}

#[async_trait]
impl RequestHandler for StorageNode {
    async fn handle(&self, request: Request) -> Reply {
        match request.body {
            RequestBody::WriteBlock { .. } => self.handle_write(request).await.into(),
            RequestBody::ReadBlock { .. } => self.handle_read(request).await.into(),
            _ => {
                let err = Error::Malformed(format!(
                    "storage node does not serve {}",
                    request.body.operation()
                ));
                Response::failure_from(request.request_id, &err).into()
            }
        }
    }
}

/// Connector that resolves nodes to services living in this process.
///
/// Used by tests and embedded clusters. Removing a node makes it unreachable,
/// which is how tests simulate a crashed peer.
#[derive(Default)]
pub struct LocalConnector {
    nodes: DashMap<NodeId, Arc<dyn DataNodeRpc>>,
}

impl LocalConnector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, id: NodeId, service: Arc<dyn DataNodeRpc>) {
        self.nodes.insert(id, service);
    }

    pub fn remove(&self, id: &NodeId) -> bool {
        self.nodes.remove(id).is_some()
    }
}

impl DataNodeConnector for LocalConnector {
    fn connect(&self, node: &Node) -> Result<Arc<dyn DataNodeRpc>> {
        self.nodes
            .get(&node.id)
            .map(|entry| Arc::clone(entry.value()))
            .ok_or_else(|| Error::RemoteUnreachable {
                addr: node.addr.clone(),
                reason: format!("{} is not running", node.name),
            })
    }
}
