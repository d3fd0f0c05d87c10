//! Cluster configuration.
//!
//! One YAML file describes the name node, the storage nodes and the client.
//! Every field has a default, so an empty file (or no file) gives a working
//! single-host setup; command-line flags override individual fields.
//!
//! ```yaml
//! namenode:
//!   listen: 0.0.0.0:9000
//!   replication: 3
//!   placement: rack_aware
//!   static_nodes:
//!     - { name: dn-1, addr: 10.0.0.1:9100, rack: r1 }
//! datanode:
//!   data_dir: /var/lib/chainfs
//!   namenode_addr: 10.0.0.100:9000
//! ```

use crate::error::{Error, Result};
use crate::file::{DEFAULT_BLOCK_SIZE, DEFAULT_REPLICATION};
use crate::node::{Node, NodeId};
use crate::retry::RetryPolicy;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClusterConfig {
    pub namenode: NameNodeConfig,
    pub datanode: DataNodeConfig,
    pub client: ClientConfig,
}

/// Which placement strategy the name node uses.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlacementKind {
    #[default]
    Random,
    RackAware,
}

/// A storage node listed in configuration instead of discovered by heartbeat.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StaticNode {
    pub name: String,
    pub addr: String,
    #[serde(default)]
    pub rack: Option<String>,
}

impl StaticNode {
    pub fn to_node(&self) -> Node {
        Node::new(NodeId::from_name(&self.name), self.name.clone(), self.addr.clone())
            .with_rack(self.rack.clone())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NameNodeConfig {
    pub listen: String,
    pub block_size: u64,
    pub replication: u32,
    pub lease_ttl_secs: u64,
    /// How long a read-open waits for a writer before giving up.
    pub lock_wait_ms: u64,
    /// Silence after which a heartbeating node is considered down.
    pub node_timeout_secs: u64,
    /// Period of lease reaping and node expiry.
    pub maintenance_interval_secs: u64,
    pub placement: PlacementKind,
    pub static_nodes: Vec<StaticNode>,
}

impl Default for NameNodeConfig {
    fn default() -> Self {
        Self {
            listen: "127.0.0.1:9000".to_string(),
            block_size: DEFAULT_BLOCK_SIZE,
            replication: DEFAULT_REPLICATION,
            lease_ttl_secs: 60,
            lock_wait_ms: 5_000,
            node_timeout_secs: 15,
            maintenance_interval_secs: 5,
            placement: PlacementKind::Random,
            static_nodes: Vec::new(),
        }
    }
}

impl NameNodeConfig {
    pub fn lease_ttl(&self) -> Duration {
        Duration::from_secs(self.lease_ttl_secs)
    }

    pub fn lock_wait(&self) -> Duration {
        Duration::from_millis(self.lock_wait_ms)
    }

    pub fn node_timeout(&self) -> Duration {
        Duration::from_secs(self.node_timeout_secs)
    }

    pub fn maintenance_interval(&self) -> Duration {
        Duration::from_secs(self.maintenance_interval_secs.max(1))
    }

    pub fn validate(&self) -> Result<()> {
        if self.block_size == 0 {
            return Err(Error::Config("block_size must be positive".into()));
        }
        if self.replication == 0 {
            return Err(Error::Config("replication must be at least 1".into()));
        }
        if self.lease_ttl_secs == 0 {
            return Err(Error::Config("lease_ttl_secs must be positive".into()));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DataNodeConfig {
    pub listen: String,
    /// Address other nodes and clients use to reach this node; defaults to `listen`.
    pub advertise: Option<String>,
    pub name: Option<String>,
    pub rack: Option<String>,
    pub data_dir: PathBuf,
    pub namenode_addr: String,
    pub heartbeat_interval_secs: u64,
    /// Budget for relaying a block to the next replica.
    pub forward_retry: RetryPolicy,
}

impl Default for DataNodeConfig {
    fn default() -> Self {
        Self {
            listen: "127.0.0.1:9100".to_string(),
            advertise: None,
            name: None,
            rack: None,
            data_dir: PathBuf::from("./data"),
            namenode_addr: "127.0.0.1:9000".to_string(),
            heartbeat_interval_secs: 5,
            forward_retry: RetryPolicy::default(),
        }
    }
}

impl DataNodeConfig {
    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs(self.heartbeat_interval_secs.max(1))
    }

    pub fn advertise_addr(&self) -> &str {
        self.advertise.as_deref().unwrap_or(&self.listen)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    pub namenode_addr: String,
    pub retry: RetryPolicy,
    /// The name node's lease TTL; a writer renews at a third of it.
    pub lease_ttl_secs: u64,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            namenode_addr: "127.0.0.1:9000".to_string(),
            retry: RetryPolicy::default(),
            lease_ttl_secs: 60,
        }
    }
}

impl ClientConfig {
    pub fn renew_interval(&self) -> Duration {
        Duration::from_secs((self.lease_ttl_secs / 3).max(1))
    }
}

/// Load a YAML configuration file.
pub fn load_config(path: impl AsRef<Path>) -> Result<ClusterConfig> {
    let path = path.as_ref();
    let content = std::fs::read_to_string(path)
        .map_err(|e| Error::Config(format!("failed to read {}: {e}", path.display())))?;
    parse_config(&content)
}

/// Parse YAML configuration text.
pub fn parse_config(content: &str) -> Result<ClusterConfig> {
    let cfg: ClusterConfig = serde_yaml::from_str(content)
        .map_err(|e| Error::Config(format!("failed to parse YAML config: {e}")))?;
    cfg.namenode.validate()?;
    Ok(cfg)
}
