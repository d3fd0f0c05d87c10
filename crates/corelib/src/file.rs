//! File, block and replica metadata.
//!
//! A file is cut into fixed-size blocks. Every block has a placement: an ordered
//! list of replica assignments, one per replica index, where replica 0 is the
//! primary write target and the preferred read source.
//!
//! ```text
//! FileRecord "logs/a.txt" (size 130, block_size 64, replication 3)
//!   block 0 -> [r0 @ dn-2, r1 @ dn-0, r2 @ dn-4]
//!   block 1 -> [r0 @ dn-1, r1 @ dn-3, r2 @ dn-2]
//!   block 2 -> [r0 @ dn-4, r1 @ dn-1, r2 @ dn-0]
//! ```

use crate::error::{Error, Result};
use crate::node::Node;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Default block size (64 MB, decimal).
pub const DEFAULT_BLOCK_SIZE: u64 = 64_000_000;

/// Default replication factor.
pub const DEFAULT_REPLICATION: u32 = 3;

/// Access mode requested by an open and declared again by the matching close.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OpenMode {
    Read,
    Write,
}

impl fmt::Display for OpenMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OpenMode::Read => f.write_str("READ"),
            OpenMode::Write => f.write_str("WRITE"),
        }
    }
}

/// Number of blocks needed for `size` bytes.
///
/// `ceil(size / block_size)`, except that an empty file still occupies one
/// (empty) block so every file has at least one placement.
pub fn block_count(size: u64, block_size: u64) -> u64 {
    if size == 0 {
        return 1;
    }
    size.div_ceil(block_size)
}

/// Identity of one stored replica: `file ‖ block ‖ replica`.
///
/// Two replicas of the same block never share a key, even though their bytes
/// are identical.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ContentKey {
    pub file: String,
    pub block: u64,
    pub replica: u32,
}

impl ContentKey {
    pub fn new(file: impl Into<String>, block: u64, replica: u32) -> Self {
        Self {
            file: file.into(),
            block,
            replica,
        }
    }

    /// Filesystem-safe name for this key.
    ///
    /// Bytes outside `[A-Za-z0-9._-]` in the file path are percent-encoded so the
    /// result is a single path component; `parse_file_name` reverses it.
    pub fn file_name(&self) -> String {
        let mut out = String::with_capacity(self.file.len() + 16);
        for b in self.file.bytes() {
            match b {
                b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'.' | b'_' | b'-' => out.push(b as char),
                _ => out.push_str(&format!("%{:02X}", b)),
            }
        }
        out.push_str(&format!("_{}_{}", self.block, self.replica));
        out
    }

    /// Parse a name produced by `file_name`.
    pub fn parse_file_name(name: &str) -> Result<Self> {
        let bad = || Error::Malformed(format!("not a block file name: {name}"));

        let mut parts = name.rsplitn(3, '_');
        let replica = parts.next().and_then(|s| s.parse().ok()).ok_or_else(bad)?;
        let block = parts.next().and_then(|s| s.parse().ok()).ok_or_else(bad)?;
        let encoded = parts.next().ok_or_else(bad)?;

        let raw = encoded.as_bytes();
        let mut decoded = Vec::with_capacity(raw.len());
        let mut i = 0;
        while i < raw.len() {
            if raw[i] == b'%' {
                let hex = encoded.get(i + 1..i + 3).ok_or_else(bad)?;
                decoded.push(u8::from_str_radix(hex, 16).map_err(|_| bad())?);
                i += 3;
            } else {
                decoded.push(raw[i]);
                i += 1;
            }
        }
        let file = String::from_utf8(decoded).map_err(|_| bad())?;

        Ok(Self {
            file,
            block,
            replica,
        })
    }
}

impl fmt::Display for ContentKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}_{}_{}", self.file, self.block, self.replica)
    }
}

/// Assignment of one replica of one block to a storage node.
///
/// Owned by the `FileRecord`; storage nodes receive their own copy inside the
/// transfer message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplicaAssignment {
    pub file: String,
    pub block: u64,
    /// Position in the chain; 0 is the primary.
    pub replica: u32,
    /// Replication factor pinned on the file at creation.
    pub replication: u32,
    pub target: Node,
    /// Set once the target has persisted the bytes.
    pub initialized: bool,
}

impl ReplicaAssignment {
    pub fn key(&self) -> ContentKey {
        ContentKey::new(self.file.clone(), self.block, self.replica)
    }

    /// Whether another replica follows this one in the chain.
    pub fn has_successor(&self) -> bool {
        self.replica + 1 < self.replication
    }
}

/// Replica set of one block, ordered by replica index.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockPlacement {
    pub index: u64,
    pub replicas: Vec<ReplicaAssignment>,
}

impl BlockPlacement {
    /// Replica 0, the head of the write chain.
    pub fn primary(&self) -> Option<&ReplicaAssignment> {
        self.replicas.first()
    }
}

/// Metadata of one stored file.
///
/// Block size and replication factor are pinned at creation, so a record stays
/// self-describing even if the cluster defaults change later.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileRecord {
    pub path: String,
    /// Declared size in bytes.
    pub size: u64,
    pub block_size: u64,
    pub replication: u32,
    pub blocks: Vec<BlockPlacement>,
    pub exists: bool,
}

/// What a caller receives from a successful open.
pub type FileHandle = FileRecord;

impl FileRecord {
    /// Copy with blocks sorted by index and each replica set sorted by replica index.
    pub fn sorted(&self) -> Self {
        let mut copy = self.clone();
        copy.blocks.sort_by_key(|b| b.index);
        for block in &mut copy.blocks {
            block.replicas.sort_by_key(|r| r.replica);
        }
        copy
    }

    pub fn num_blocks(&self) -> usize {
        self.blocks.len()
    }

    /// Byte range `[start, end)` covered by block `index`.
    pub fn block_range(&self, index: u64) -> (u64, u64) {
        let start = (index * self.block_size).min(self.size);
        let end = (start + self.block_size).min(self.size);
        (start, end)
    }
}

/// One replica's bytes together with its assignment.
///
/// A write chain is a `Vec<Block>`: this node's entry first, then every
/// downstream replica still to be written.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Block {
    pub assignment: ReplicaAssignment,
    pub data: Bytes,
}

impl Block {
    pub fn new(assignment: ReplicaAssignment, data: Bytes) -> Self {
        Self { assignment, data }
    }

    /// Build the write chain for one block: every replica of `placement`
    /// carrying the same bytes, primary first.
    pub fn chain(placement: &BlockPlacement, data: Bytes) -> Vec<Block> {
        let mut replicas = placement.replicas.clone();
        replicas.sort_by_key(|r| r.replica);
        replicas
            .into_iter()
            .map(|assignment| Block::new(assignment, data.clone()))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::NodeId;
    use proptest::prelude::*;

    fn assignment(block: u64, replica: u32) -> ReplicaAssignment {
        ReplicaAssignment {
            file: "a.txt".to_string(),
            block,
            replica,
            replication: 3,
            target: Node::new(NodeId(replica as u128), format!("dn-{replica}"), "127.0.0.1:1"),
            initialized: false,
        }
    }

    #[test]
    fn test_block_count_boundaries() {
        assert_eq!(block_count(0, 64), 1);
        assert_eq!(block_count(1, 64), 1);
        assert_eq!(block_count(64, 64), 1);
        assert_eq!(block_count(65, 64), 2);
        assert_eq!(block_count(128, 64), 2);
    }

    #[test]
    fn test_content_key_file_name() {
        let key = ContentKey::new("dir/my file_v2.txt", 4, 1);
        let name = key.file_name();
        assert!(!name.contains('/'));
        assert_eq!(name, "dir%2Fmy%20file_v2.txt_4_1");
        assert_eq!(ContentKey::parse_file_name(&name).unwrap(), key);
    }

    #[test]
    fn test_content_key_rejects_garbage() {
        assert!(ContentKey::parse_file_name("no-suffix").is_err());
        assert!(ContentKey::parse_file_name("a_x_1").is_err());
        assert!(ContentKey::parse_file_name("a%2_0_1").is_err());
    }

    #[test]
    fn test_replica_keys_differ() {
        let a = assignment(0, 0).key();
        let b = assignment(0, 1).key();
        assert_ne!(a, b);
        assert_eq!(a.to_string(), "a.txt_0_0");
    }

    #[test]
    fn test_sorted_restores_order() {
        let record = FileRecord {
            path: "a.txt".into(),
            size: 10,
            block_size: 5,
            replication: 3,
            blocks: vec![
                BlockPlacement {
                    index: 1,
                    replicas: vec![assignment(1, 2), assignment(1, 0), assignment(1, 1)],
                },
                BlockPlacement {
                    index: 0,
                    replicas: vec![assignment(0, 1), assignment(0, 0), assignment(0, 2)],
                },
            ],
            exists: true,
        };

        let sorted = record.sorted();
        assert_eq!(sorted.blocks[0].index, 0);
        assert_eq!(sorted.blocks[1].index, 1);
        for block in &sorted.blocks {
            let order: Vec<u32> = block.replicas.iter().map(|r| r.replica).collect();
            assert_eq!(order, vec![0, 1, 2]);
        }
    }

    #[test]
    fn test_chain_is_primary_first() {
        let placement = BlockPlacement {
            index: 0,
            replicas: vec![assignment(0, 1), assignment(0, 2), assignment(0, 0)],
        };
        let chain = Block::chain(&placement, Bytes::from_static(b"xyz"));
        let order: Vec<u32> = chain.iter().map(|b| b.assignment.replica).collect();
        assert_eq!(order, vec![0, 1, 2]);
        assert!(chain.iter().all(|b| b.data.as_ref() == b"xyz"));
        assert!(chain[1].assignment.has_successor());
        assert!(!chain[2].assignment.has_successor());
    }

    proptest! {
        #[test]
        fn prop_block_count_is_ceiling(size in 0u64..10_000_000, block_size in 1u64..100_000) {
            let n = block_count(size, block_size);
            if size == 0 {
                prop_assert_eq!(n, 1);
            } else {
                prop_assert!(n * block_size >= size);
                prop_assert!((n - 1) * block_size < size);
            }
        }

        #[test]
        fn prop_file_name_round_trips(file in "\\PC{1,40}", block in 0u64..1000, replica in 0u32..8) {
            let key = ContentKey::new(file, block, replica);
            prop_assert_eq!(ContentKey::parse_file_name(&key.file_name()).unwrap(), key);
        }
    }
}
