//! Client side: remote stubs for the name service and storage nodes.
//!
//! Each stub owns an [`Endpoint`], a small pool of idle TCP connections to one
//! address. A call borrows a connection (or dials a new one), sends one
//! request frame, waits for one reply frame and returns the connection to the
//! pool. A connection that fails mid-call is dropped, never reused.

use crate::codec::{read_frame, write_frame};
use async_trait::async_trait;
use corelib::protocol::{ListResponse, Reply, Request, RequestId};
use corelib::{
    DataNodeConnector, DataNodeRpc, Error, NameNodeRpc, Node, NodeId,
    Response, Result, RetryPolicy,
};
use dashmap::DashMap;
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::net::TcpStream;

/// Idle connections kept per endpoint.
const MAX_IDLE: usize = 4;

/// Connection pool to one remote address.
#[derive(Debug)]
pub struct Endpoint {
    addr: String,
    policy: RetryPolicy,
    idle: Mutex<Vec<TcpStream>>,
}

impl Endpoint {
    /// No connection is made until the first call.
    pub fn new(addr: impl Into<String>, policy: RetryPolicy) -> Self {
        Self {
            addr: addr.into(),
            policy,
            idle: Mutex::new(Vec::new()),
        }
    }

    pub fn addr(&self) -> &str {
        &self.addr
    }

    /// Send `request` and wait for its reply, bounded by the attempt timeout.
    ///
    /// Not retried here: callers decide which operations are safe to repeat.
    pub async fn call(&self, request: Request) -> Result<Reply> {
        let what = format!("{} to {}", request.body.operation(), self.addr);
        match tokio::time::timeout(self.policy.attempt_timeout(), self.exchange(&request)).await {
            Ok(result) => result,
            Err(_) => Err(Error::Timeout(what)),
        }
    }

    async fn exchange(&self, request: &Request) -> Result<Reply> {
        let pooled = self.idle.lock().pop();
        if let Some(stream) = pooled {
            match self.round_trip(stream, request).await {
                Err(e) if e.is_retryable() => {
                    // The server hung up on an idle connection; it never saw this request.
                    tracing::debug!(addr = %self.addr, error = %e, "pooled connection went stale");
                }
                result => return result,
            }
        }
        let stream = self.dial().await?;
        self.round_trip(stream, request).await
    }

    async fn round_trip(&self, mut stream: TcpStream, request: &Request) -> Result<Reply> {
        write_frame(&mut stream, request)
            .await
            .map_err(|e| e.into_core(&self.addr))?;
        let reply: Reply = read_frame(&mut stream)
            .await
            .map_err(|e| e.into_core(&self.addr))?
            .ok_or_else(|| Error::RemoteUnreachable {
                addr: self.addr.clone(),
                reason: "connection closed before reply".to_string(),
            })?;

        if reply.response_id() != request.request_id && reply.response_id() != RequestId::NIL {
            // Out of step with the server; do not reuse.
            return Err(Error::Malformed(format!(
                "reply {} does not answer request {}",
                reply.response_id(),
                request.request_id
            )));
        }

        let mut idle = self.idle.lock();
        if idle.len() < MAX_IDLE {
            idle.push(stream);
        }
        Ok(reply)
    }

    async fn dial(&self) -> Result<TcpStream> {
        let stream = TcpStream::connect(&self.addr)
            .await
            .map_err(|e| Error::RemoteUnreachable {
                addr: self.addr.clone(),
                reason: e.to_string(),
            })?;
        stream.set_nodelay(true)?;
        Ok(stream)
    }
}

/// Name service reached over TCP.
#[derive(Debug)]
pub struct RemoteNameNode {
    endpoint: Endpoint,
}

impl RemoteNameNode {
    pub fn new(addr: impl Into<String>, policy: RetryPolicy) -> Self {
        Self {
            endpoint: Endpoint::new(addr, policy),
        }
    }

    pub fn addr(&self) -> &str {
        self.endpoint.addr()
    }
}

#[async_trait]
impl NameNodeRpc for RemoteNameNode {
    async fn open_file(&self, request: Request) -> Result<Response> {
        self.endpoint.call(request).await?.into_response()
    }

    async fn close_file(&self, request: Request) -> Result<Response> {
        self.endpoint.call(request).await?.into_response()
    }

    async fn list(&self, request: Request) -> Result<ListResponse> {
        self.endpoint.call(request).await?.into_list()
    }

    async fn renew_lease(&self, request: Request) -> Result<Response> {
        self.endpoint.call(request).await?.into_response()
    }

    async fn heartbeat(&self, request: Request) -> Result<Response> {
        self.endpoint.call(request).await?.into_response()
    }
}

/// Storage node reached over TCP.
#[derive(Debug)]
pub struct RemoteDataNode {
    endpoint: Endpoint,
}

impl RemoteDataNode {
    pub fn new(addr: impl Into<String>, policy: RetryPolicy) -> Self {
        Self {
            endpoint: Endpoint::new(addr, policy),
        }
    }

    pub fn addr(&self) -> &str {
        self.endpoint.addr()
    }
}

#[async_trait]
impl DataNodeRpc for RemoteDataNode {
    async fn write_block(&self, request: Request) -> Result<Response> {
        self.endpoint.call(request).await?.into_response()
    }

    async fn read_block(&self, request: Request) -> Result<Response> {
        self.endpoint.call(request).await?.into_response()
    }
}

/// Resolves storage nodes to TCP stubs, one cached stub per node.
#[derive(Debug)]
pub struct TcpConnector {
    policy: RetryPolicy,
    stubs: DashMap<NodeId, Arc<RemoteDataNode>>,
}

impl TcpConnector {
    pub fn new(policy: RetryPolicy) -> Self {
        Self {
            policy,
            stubs: DashMap::new(),
        }
    }
}

impl DataNodeConnector for TcpConnector {
    fn connect(&self, node: &Node) -> Result<Arc<dyn DataNodeRpc>> {
        let mut stub = self
            .stubs
            .entry(node.id)
            .or_insert_with(|| Arc::new(RemoteDataNode::new(node.addr.clone(), self.policy.clone())));
        if stub.addr() != node.addr {
            // The node came back on a new address.
            *stub = Arc::new(RemoteDataNode::new(node.addr.clone(), self.policy.clone()));
        }
        Ok(Arc::clone(stub.value()) as Arc<dyn DataNodeRpc>)
    }
}
