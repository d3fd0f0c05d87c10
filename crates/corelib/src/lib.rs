//! Core library for the chainfs block store.
//!
//! This crate provides the abstractions every service shares:
//! - Node identity and cluster membership
//! - File, block and replica metadata
//! - The request/response envelope and RPC contracts
//! - Error taxonomy, retry policy and configuration

pub mod config;
pub mod error;
pub mod file;
pub mod network;
pub mod node;
pub mod protocol;
pub mod retry;
pub mod topology;

pub use config::ClusterConfig;
pub use error::{Error, ErrorCode, Result};
pub use file::{Block, BlockPlacement, ContentKey, FileHandle, FileRecord, OpenMode, ReplicaAssignment};
pub use network::{DataNodeConnector, DataNodeRpc, NameNodeRpc, RequestHandler};
pub use node::{Node, NodeId};
pub use protocol::{LeaseId, ListResponse, NodeReport, Reply, Request, RequestBody, RequestId, Response};
pub use retry::{retry_with_backoff, RetryPolicy};
pub use topology::Topology;
