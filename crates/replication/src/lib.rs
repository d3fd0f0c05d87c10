//! Replica placement and storage for chainfs.
//!
//! This crate provides:
//! - Pluggable placement strategies deciding which nodes host a block
//! - Block stores persisting replica bytes
//! - The storage node service (chain-replicated writes, replica reads)
//! - The storage node's heartbeat to the name service

pub mod block_store;
pub mod datanode;
pub mod heartbeat;
pub mod strategy;

pub use block_store::{BlockStore, FsBlockStore, MemoryBlockStore, ReplicaStat};
pub use datanode::{LocalConnector, ReplicaState, StorageNode};
pub use heartbeat::{send_heartbeat, spawn_heartbeat};
pub use strategy::{PlacementStrategy, RackAwareStrategy, RandomStrategy};
