//! Local persistence of block replicas.
//!
//! A block store maps a `ContentKey` to the raw bytes of one replica. Replicas
//! are written once and never updated in place.
//!
//! Every replica is stored with its BLAKE3 digest, so a node that restarts can
//! still tell a damaged replica from a good one.

use async_trait::async_trait;
use bytes::Bytes;
use corelib::{ContentKey, Error, Result};
use dashmap::DashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::{fs, io::AsyncWriteExt};

/// Size and digest of a stored replica.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReplicaStat {
    pub len: u64,
    /// `None` when the digest was lost, e.g. a crash between data and digest.
    pub checksum: Option<blake3::Hash>,
}

#[async_trait]
pub trait BlockStore: Send + Sync {
    async fn put(&self, key: &ContentKey, data: Bytes) -> Result<()>;

    /// `None` if the replica is not stored here.
    async fn get(&self, key: &ContentKey) -> Result<Option<Bytes>>;

    /// Size and digest recorded at `put`, without reading the bytes.
    async fn stat(&self, key: &ContentKey) -> Result<Option<ReplicaStat>>;

    async fn contains(&self, key: &ContentKey) -> Result<bool>;

    /// Every replica currently stored.
    async fn keys(&self) -> Result<Vec<ContentKey>>;
}

/// One file per replica under a data directory, plus a `.b3` sidecar holding
/// the hex digest.
#[derive(Debug, Clone)]
pub struct FsBlockStore {
    root: PathBuf,
}

impl FsBlockStore {
    /// Open (creating if needed) a store rooted at `root`.
    pub async fn open<P: AsRef<Path>>(root: P) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        fs::create_dir_all(&root).await?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_for(&self, key: &ContentKey) -> PathBuf {
        self.root.join(key.file_name())
    }

    fn digest_path_for(&self, key: &ContentKey) -> PathBuf {
        self.root.join(format!("{}.{DIGEST_EXT}", key.file_name()))
    }

    /// Write-then-rename: `path` is either absent or complete.
    async fn write_atomic(&self, path: &Path, data: &[u8]) -> std::io::Result<()> {
        let mut tmp = path.as_os_str().to_owned();
        tmp.push(format!(".{:016x}.tmp", rand::random::<u64>()));
        let tmp = PathBuf::from(tmp);

        let result = async {
            let mut f = fs::File::create(&tmp).await?;
            f.write_all(data).await?;
            f.sync_all().await?;
            fs::rename(&tmp, path).await
        }
        .await;

        if result.is_err() {
            let _ = fs::remove_file(&tmp).await;
        }
        result
    }

    async fn read_digest(&self, key: &ContentKey) -> Option<blake3::Hash> {
        let path = self.digest_path_for(key);
        let hex = fs::read_to_string(&path).await.ok()?;
        match blake3::Hash::from_hex(hex.trim()) {
            Ok(hash) => Some(hash),
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "unreadable replica digest");
                None
            }
        }
    }
}

const DIGEST_EXT: &str = "b3";

#[async_trait]
impl BlockStore for FsBlockStore {
    #[tracing::instrument(level = "trace", skip(self, data), fields(key = %key, len = data.len()))]
    async fn put(&self, key: &ContentKey, data: Bytes) -> Result<()> {
        let path = self.path_for(key);
        let digest_path = self.digest_path_for(key);
        let digest = blake3::hash(&data);

        // A stale digest must never outlive the bytes it described.
        match fs::remove_file(&digest_path).await {
            Err(e) if e.kind() != std::io::ErrorKind::NotFound => {
                return Err(Error::LocalIo(format!("removing {}: {e}", digest_path.display())))
            }
            _ => {}
        }
        self.write_atomic(&path, &data)
            .await
            .map_err(|e| Error::LocalIo(format!("writing {}: {e}", path.display())))?;
        self.write_atomic(&digest_path, digest.to_hex().as_bytes())
            .await
            .map_err(|e| Error::LocalIo(format!("writing {}: {e}", digest_path.display())))?;
        Ok(())
    }

    async fn get(&self, key: &ContentKey) -> Result<Option<Bytes>> {
        let path = self.path_for(key);
        match fs::read(&path).await {
            Ok(data) => Ok(Some(Bytes::from(data))),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(Error::LocalIo(format!("reading {}: {e}", path.display()))),
        }
    }

    async fn stat(&self, key: &ContentKey) -> Result<Option<ReplicaStat>> {
        let path = self.path_for(key);
        let len = match fs::metadata(&path).await {
            Ok(meta) => meta.len(),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(Error::LocalIo(format!("stat {}: {e}", path.display()))),
        };
        Ok(Some(ReplicaStat {
            len,
            checksum: self.read_digest(key).await,
        }))
    }

    async fn contains(&self, key: &ContentKey) -> Result<bool> {
        Ok(fs::try_exists(self.path_for(key)).await?)
    }

    async fn keys(&self) -> Result<Vec<ContentKey>> {
        let mut keys = Vec::new();
        let mut dir = fs::read_dir(&self.root).await?;
        while let Some(entry) = dir.next_entry().await? {
            let name = entry.file_name();
            let Some(name) = name.to_str() else {
                continue;
            };
            if name.ends_with(&format!(".{DIGEST_EXT}")) {
                continue;
            }
            match ContentKey::parse_file_name(name) {
                Ok(key) => keys.push(key),
                Err(_) => tracing::debug!(name, "skipping foreign file in data dir"),
            }
        }
        keys.sort();
        Ok(keys)
    }
}

/// In-memory store for tests and embedded clusters.
#[derive(Debug, Default)]
pub struct MemoryBlockStore {
    blocks: DashMap<ContentKey, (Bytes, blake3::Hash)>,
    read_only: AtomicBool,
}

impl MemoryBlockStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent `put` fail, as a full or failed disk would.
    pub fn set_read_only(&self, read_only: bool) {
        self.read_only.store(read_only, Ordering::SeqCst);
    }

    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }
}

#[async_trait]
impl BlockStore for MemoryBlockStore {
    async fn put(&self, key: &ContentKey, data: Bytes) -> Result<()> {
        if self.read_only.load(Ordering::SeqCst) {
            return Err(Error::LocalIo(format!("store is read-only, cannot write {key}")));
        }
        let digest = blake3::hash(&data);
        self.blocks.insert(key.clone(), (data, digest));
        Ok(())
    }

    async fn get(&self, key: &ContentKey) -> Result<Option<Bytes>> {
        Ok(self.blocks.get(key).map(|entry| entry.value().0.clone()))
    }

    async fn stat(&self, key: &ContentKey) -> Result<Option<ReplicaStat>> {
        Ok(self.blocks.get(key).map(|entry| {
            let (data, digest) = entry.value();
            ReplicaStat {
                len: data.len() as u64,
                checksum: Some(*digest),
            }
        }))
    }

    async fn contains(&self, key: &ContentKey) -> Result<bool> {
        Ok(self.blocks.contains_key(key))
    }

    async fn keys(&self) -> Result<Vec<ContentKey>> {
        let mut keys: Vec<ContentKey> = self.blocks.iter().map(|e| e.key().clone()).collect();
        keys.sort();
        Ok(keys)
    }
}
