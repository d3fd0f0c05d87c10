//! Tests for chain-replicated writes and replica reads on storage nodes.
//!
//! # Test Strategy
//!
//! 1. **Happy path**: every replica written, byte-identical, in chain order
//! 2. **Partial failure**: local and downstream failures, no rollback
//! 3. **Reads**: hits, misses, no forwarding, checksum verification
//! 4. **Recovery**: inventory rebuilt from an on-disk store

use bytes::Bytes;
use corelib::protocol::{Request, RequestBody};
use corelib::{
    Block, BlockPlacement, DataNodeConnector, DataNodeRpc, ErrorCode, Node, NodeId,
    ReplicaAssignment, RetryPolicy,
};
use replication::{BlockStore, FsBlockStore, LocalConnector, MemoryBlockStore, StorageNode};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

struct Cluster {
    connector: Arc<LocalConnector>,
    nodes: Vec<Arc<StorageNode>>,
    stores: Vec<Arc<MemoryBlockStore>>,
}

fn fast_retry() -> RetryPolicy {
    RetryPolicy {
        max_retries: 2,
        base_delay_ms: 1,
        max_delay_ms: 5,
        attempt_timeout_ms: 1_000,
    }
}

fn cluster(n: u128) -> Cluster {
    let connector = Arc::new(LocalConnector::new());
    let mut nodes = Vec::new();
    let mut stores = Vec::new();
    for i in 0..n {
        let node = Node::new(NodeId(i), format!("dn-{i}"), format!("127.0.0.1:{}", 9100 + i));
        let store = Arc::new(MemoryBlockStore::new());
        let dn = Arc::new(StorageNode::new(
            node,
            store.clone(),
            connector.clone(),
            fast_retry(),
        ));
        connector.register(NodeId(i), dn.clone());
        nodes.push(dn);
        stores.push(store);
    }
    Cluster {
        connector,
        nodes,
        stores,
    }
}

fn placement(cluster: &Cluster, file: &str, block: u64, order: &[usize]) -> BlockPlacement {
    let replicas = order
        .iter()
        .enumerate()
        .map(|(replica, &n)| ReplicaAssignment {
            file: file.to_string(),
            block,
            replica: replica as u32,
            replication: order.len() as u32,
            target: cluster.nodes[n].node().clone(),
            initialized: false,
        })
        .collect();
    BlockPlacement {
        index: block,
        replicas,
    }
}

fn write_request(placement: &BlockPlacement, data: &'static [u8]) -> Request {
    Request::new(RequestBody::WriteBlock {
        chain: Block::chain(placement, Bytes::from_static(data)),
    })
}

fn read_request(assignment: &ReplicaAssignment) -> Request {
    Request::new(RequestBody::ReadBlock {
        replica: assignment.clone(),
    })
}

// ============================================================================
// Happy Path
// ============================================================================

#[tokio::test]
async fn test_chain_writes_every_replica_in_order() {
    let cluster = cluster(4);
    let placement = placement(&cluster, "a.txt", 0, &[2, 0, 3]);
    let request = write_request(&placement, b"block-zero");
    let request_id = request.request_id;

    let response = cluster.nodes[2].handle_write(request).await;
    assert!(response.is_success(), "{}", response.message);
    assert_eq!(response.response_id, request_id);

    let mut written_at = Vec::new();
    for (replica, &n) in [2usize, 0, 3].iter().enumerate() {
        let key = placement.replicas[replica].key();
        let stored = cluster.stores[n].get(&key).await.unwrap();
        assert_eq!(stored.as_deref(), Some(&b"block-zero"[..]));

        let state = cluster.nodes[n].replica(&key).expect("replica state");
        assert!(state.assignment.initialized);
        written_at.push(state.written_at);
    }
    assert!(written_at[0] <= written_at[1], "replica 0 commits before replica 1");
    assert!(written_at[1] <= written_at[2], "replica 1 commits before replica 2");

    // The node outside the chain holds nothing.
    assert!(cluster.stores[1].is_empty());
}

#[tokio::test]
async fn test_single_replica_chain() {
    let cluster = cluster(1);
    let placement = placement(&cluster, "solo", 3, &[0]);

    let response = cluster.nodes[0].handle_write(write_request(&placement, b"x")).await;
    assert!(response.is_success());
    assert_eq!(cluster.stores[0].len(), 1);
}

// ============================================================================
// Partial Failure
// ============================================================================

#[tokio::test]
async fn test_tail_failure_propagates_without_rollback() {
    let cluster = cluster(3);
    cluster.stores[2].set_read_only(true);
    let placement = placement(&cluster, "a.txt", 0, &[0, 1, 2]);
    let request = write_request(&placement, b"data");
    let request_id = request.request_id;

    let response = cluster.nodes[0].handle_write(request).await;
    assert!(!response.is_success());
    assert_eq!(response.response_id, request_id);
    assert_eq!(response.error, Some(ErrorCode::LocalIoFailure));
    assert!(response.message.contains("read-only"), "{}", response.message);

    // Replicas ahead of the failure stay persisted.
    assert_eq!(cluster.stores[0].len(), 1);
    assert_eq!(cluster.stores[1].len(), 1);
    assert!(cluster.stores[2].is_empty());
}

#[tokio::test]
async fn test_local_failure_skips_downstream() {
    let cluster = cluster(3);
    cluster.stores[0].set_read_only(true);
    let placement = placement(&cluster, "a.txt", 0, &[0, 1, 2]);

    let response = cluster.nodes[0].handle_write(write_request(&placement, b"data")).await;
    assert_eq!(response.error, Some(ErrorCode::LocalIoFailure));
    assert!(cluster.stores[1].is_empty(), "no replication after a local failure");
    assert!(cluster.stores[2].is_empty());
}

#[tokio::test]
async fn test_unreachable_peer_exhausts_retries() {
    let cluster = cluster(3);
    cluster.connector.remove(&NodeId(1));
    let placement = placement(&cluster, "a.txt", 0, &[0, 1, 2]);

    let response = cluster.nodes[0].handle_write(write_request(&placement, b"data")).await;
    assert_eq!(response.error, Some(ErrorCode::RetriesExhausted));
    assert_eq!(cluster.stores[0].len(), 1);
    assert!(cluster.stores[2].is_empty());
}

#[tokio::test]
async fn test_peer_back_within_retry_budget() {
    /// Resolves to the real cluster, but reports the first `failures` lookups
    /// as unreachable.
    struct Flaky {
        inner: Arc<LocalConnector>,
        failures: AtomicU32,
    }

    impl DataNodeConnector for Flaky {
        fn connect(&self, node: &Node) -> corelib::Result<Arc<dyn DataNodeRpc>> {
            let left = self.failures.load(Ordering::SeqCst);
            if left > 0 {
                self.failures.store(left - 1, Ordering::SeqCst);
                return Err(corelib::Error::RemoteUnreachable {
                    addr: node.addr.clone(),
                    reason: "still starting".into(),
                });
            }
            self.inner.connect(node)
        }
    }

    let cluster = cluster(2);
    let flaky = Arc::new(Flaky {
        inner: cluster.connector.clone(),
        failures: AtomicU32::new(2),
    });
    let head = StorageNode::new(
        cluster.nodes[0].node().clone(),
        Arc::new(MemoryBlockStore::new()),
        flaky.clone(),
        fast_retry(),
    );
    let placement = placement(&cluster, "a.txt", 0, &[0, 1]);

    let response = head.handle_write(write_request(&placement, b"late")).await;
    assert!(response.is_success(), "{}", response.message);
    assert_eq!(flaky.failures.load(Ordering::SeqCst), 0);
    assert_eq!(cluster.stores[1].len(), 1);
}

#[tokio::test]
async fn test_truncated_and_empty_chains_are_malformed() {
    let cluster = cluster(3);
    let full = placement(&cluster, "a.txt", 0, &[0, 1, 2]);
    let mut chain = Block::chain(&full, Bytes::from_static(b"data"));
    chain.truncate(2);

    let response = cluster.nodes[0]
        .handle_write(Request::new(RequestBody::WriteBlock { chain }))
        .await;
    assert_eq!(response.error, Some(ErrorCode::MalformedMessage));

    let response = cluster.nodes[0]
        .handle_write(Request::new(RequestBody::WriteBlock { chain: vec![] }))
        .await;
    assert_eq!(response.error, Some(ErrorCode::MalformedMessage));

    let response = cluster.nodes[0].handle_write(Request::new(RequestBody::List)).await;
    assert_eq!(response.error, Some(ErrorCode::MalformedMessage));
}

// ============================================================================
// Reads
// ============================================================================

#[tokio::test]
async fn test_read_hit_and_miss() {
    let cluster = cluster(3);
    let placement = placement(&cluster, "a.txt", 0, &[0, 1, 2]);
    assert!(cluster.nodes[0]
        .handle_write(write_request(&placement, b"payload"))
        .await
        .is_success());

    let primary = &placement.replicas[0];
    let response = cluster.nodes[0].handle_read(read_request(primary)).await;
    assert!(response.is_success());
    let block = response.block.expect("block");
    assert_eq!(block.data.as_ref(), b"payload");
    assert!(block.assignment.initialized);

    // Asking node 0 for replica 1 misses: node 0 does not go looking elsewhere.
    let response = cluster.nodes[0].handle_read(read_request(&placement.replicas[1])).await;
    assert_eq!(response.error, Some(ErrorCode::NotFound));
    assert!(response.message.contains("does not exist"));
}

#[tokio::test]
async fn test_primary_serves_reads_with_peers_down() {
    let cluster = cluster(3);
    let placement = placement(&cluster, "a.txt", 0, &[0, 1, 2]);
    assert!(cluster.nodes[0]
        .handle_write(write_request(&placement, b"still here"))
        .await
        .is_success());

    cluster.connector.remove(&NodeId(1));
    cluster.connector.remove(&NodeId(2));

    let response = cluster.nodes[0].handle_read(read_request(&placement.replicas[0])).await;
    assert_eq!(response.block.unwrap().data.as_ref(), b"still here");
}

#[tokio::test]
async fn test_checksum_mismatch_is_reported() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let store = Arc::new(FsBlockStore::open(dir.path()).await?);
    let node = Node::new(NodeId(7), "dn-7", "127.0.0.1:9107");
    let dn = StorageNode::new(node.clone(), store, Arc::new(LocalConnector::new()), fast_retry());

    let assignment = ReplicaAssignment {
        file: "a.txt".into(),
        block: 0,
        replica: 0,
        replication: 1,
        target: node,
        initialized: false,
    };
    let chain = vec![Block::new(assignment.clone(), Bytes::from_static(b"original"))];
    assert!(dn.handle_write(Request::new(RequestBody::WriteBlock { chain })).await.is_success());

    std::fs::write(dir.path().join(assignment.key().file_name()), b"bitrot!!")?;

    let response = dn.handle_read(read_request(&assignment)).await;
    assert_eq!(response.error, Some(ErrorCode::LocalIoFailure));
    assert!(response.message.contains("checksum mismatch"));
    Ok(())
}

// ============================================================================
// Recovery
// ============================================================================

#[tokio::test]
async fn test_recover_rebuilds_inventory() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let node = Node::new(NodeId(5), "dn-5", "127.0.0.1:9105");
    {
        let store = FsBlockStore::open(dir.path()).await?;
        store.put(&corelib::ContentKey::new("a.txt", 0, 1), Bytes::from_static(b"abc")).await?;
        store.put(&corelib::ContentKey::new("b.txt", 2, 0), Bytes::from_static(b"de")).await?;
    }

    let store = Arc::new(FsBlockStore::open(dir.path()).await?);
    let dn = StorageNode::new(node, store, Arc::new(LocalConnector::new()), fast_retry());
    assert_eq!(dn.recover().await?, 2);

    let report = dn.report();
    assert_eq!(report.blocks, 2);
    assert_eq!(report.bytes, 5);

    let state = dn.replica(&corelib::ContentKey::new("a.txt", 0, 1)).unwrap();
    assert!(state.assignment.initialized);
    assert_eq!(state.len, 3);
    assert_eq!(state.checksum, Some(blake3::hash(b"abc")));
    Ok(())
}

#[tokio::test]
async fn test_corruption_after_restart_is_detected() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let node = Node::new(NodeId(6), "dn-6", "127.0.0.1:9106");
    let assignment = ReplicaAssignment {
        file: "a.txt".into(),
        block: 0,
        replica: 0,
        replication: 1,
        target: node.clone(),
        initialized: false,
    };
    {
        let store = Arc::new(FsBlockStore::open(dir.path()).await?);
        let dn = StorageNode::new(node.clone(), store, Arc::new(LocalConnector::new()), fast_retry());
        let chain = vec![Block::new(assignment.clone(), Bytes::from_static(b"good"))];
        assert!(dn.handle_write(Request::new(RequestBody::WriteBlock { chain })).await.is_success());
    }

    let store = Arc::new(FsBlockStore::open(dir.path()).await?);
    let dn = StorageNode::new(node, store, Arc::new(LocalConnector::new()), fast_retry());
    assert_eq!(dn.recover().await?, 1);
    std::fs::write(dir.path().join(assignment.key().file_name()), b"evil")?;

    let response = dn.handle_read(read_request(&assignment)).await;
    assert_eq!(response.error, Some(ErrorCode::LocalIoFailure));
    assert!(response.message.contains("checksum mismatch"));
    assert!(response.block.is_none());
    Ok(())
}
