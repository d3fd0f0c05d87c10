//! Transport-agnostic RPC contracts.
//!
//! The name service and storage nodes implement these traits directly, and the
//! TCP stubs in the `streaming` crate implement them by shipping the request
//! over the wire. Callers cannot tell the two apart.
//!
//! An `Err` from any of these methods means the call itself failed (peer
//! unreachable, timeout, garbage on the wire). A service that ran and said no
//! answers `Ok` with a FAILURE response.

use crate::error::Result;
use crate::node::Node;
use crate::protocol::{ListResponse, Reply, Request, Response};
use async_trait::async_trait;
use std::sync::Arc;

/// Name service operations.
#[async_trait]
pub trait NameNodeRpc: Send + Sync {
    async fn open_file(&self, request: Request) -> Result<Response>;

    async fn close_file(&self, request: Request) -> Result<Response>;

    async fn list(&self, request: Request) -> Result<ListResponse>;

    async fn renew_lease(&self, request: Request) -> Result<Response>;

    async fn heartbeat(&self, request: Request) -> Result<Response>;
}

/// Storage node operations.
#[async_trait]
pub trait DataNodeRpc: Send + Sync {
    async fn write_block(&self, request: Request) -> Result<Response>;

    async fn read_block(&self, request: Request) -> Result<Response>;
}

/// Resolves a storage node to something that can be called.
///
/// Production clusters resolve over TCP; tests and embedded clusters resolve
/// to in-process services.
pub trait DataNodeConnector: Send + Sync {
    fn connect(&self, node: &Node) -> Result<Arc<dyn DataNodeRpc>>;
}

/// Server side of the wire: turn one decoded request into one reply.
#[async_trait]
pub trait RequestHandler: Send + Sync + 'static {
    async fn handle(&self, request: Request) -> Reply;
}
