//! Name service for chainfs.
//!
//! Owns the file table, decides where each block's replicas go and hands out
//! per-file locks under expiring leases.

pub mod lock;
pub mod namespace;

pub use lock::{Lease, LockTable};
pub use namespace::{FileState, NameService, NameServiceConfig};
