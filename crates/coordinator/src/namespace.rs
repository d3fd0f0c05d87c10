//! The name service: file table, block placement and lock lifecycle.
//!
//! # File lifecycle
//!
//! ```text
//!            write-open                 write-close
//! (unknown) ───────────▶ Pending ─────────────────────▶ Committed
//!                           │
//!                           └── writer's lease expires ──▶ (unknown)
//! ```
//!
//! A pending file is invisible to `List` and blocks readers until its writer
//! closes it. If the writer disappears, its lease expires, the pending record
//! and its lock object are dropped, and the path can be created again.
//!
//! Everything lives in memory; a restart loses the namespace.

use crate::lock::LockTable;
use async_trait::async_trait;
use corelib::config::NameNodeConfig;
use corelib::file::block_count;
use corelib::protocol::{ListResponse, NodeReport, Outcome, Reply, Request, RequestBody};
use corelib::{
    BlockPlacement, Error, FileHandle, FileRecord, LeaseId, NameNodeRpc, OpenMode,
    ReplicaAssignment, RequestHandler, Response, Result, Topology,
};
use dashmap::DashMap;
use replication::strategy::{self, PlacementStrategy};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

/// Tunables of one name service instance.
#[derive(Debug, Clone)]
pub struct NameServiceConfig {
    pub block_size: u64,
    pub lease_ttl: Duration,
    /// How long a read-open waits for a writer.
    pub lock_wait: Duration,
    pub node_timeout: Duration,
}

impl Default for NameServiceConfig {
    fn default() -> Self {
        Self::from(&NameNodeConfig::default())
    }
}

impl From<&NameNodeConfig> for NameServiceConfig {
    fn from(cfg: &NameNodeConfig) -> Self {
        Self {
            block_size: cfg.block_size,
            lease_ttl: cfg.lease_ttl(),
            lock_wait: cfg.lock_wait(),
            node_timeout: cfg.node_timeout(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileState {
    /// Created, blocks still being written.
    Pending,
    Committed,
}

#[derive(Debug, Clone)]
struct FileEntry {
    record: FileRecord,
    state: FileState,
    /// Lease of the write-open that created the entry.
    writer: LeaseId,
}

/// Metadata coordinator for one cluster.
pub struct NameService {
    files: DashMap<String, FileEntry>,
    locks: LockTable,
    topology: Arc<Topology>,
    placement: Arc<dyn PlacementStrategy>,
    config: NameServiceConfig,
}

impl NameService {
    pub fn new(
        config: NameServiceConfig,
        topology: Arc<Topology>,
        placement: Arc<dyn PlacementStrategy>,
    ) -> Self {
        tracing::info!(
            strategy = placement.name(),
            replication = placement.replication_factor(),
            block_size = config.block_size,
            "name service ready"
        );
        Self {
            files: DashMap::new(),
            locks: LockTable::new(config.lease_ttl),
            topology,
            placement,
            config,
        }
    }

    /// Build from configuration: static nodes registered, strategy chosen by kind.
    pub fn from_config(cfg: &NameNodeConfig) -> Result<Self> {
        cfg.validate()?;
        let topology = Arc::new(Topology::new());
        for node in &cfg.static_nodes {
            topology.register_static(node.to_node());
        }
        let placement = strategy::from_kind(cfg.placement, cfg.replication as usize)?;
        Ok(Self::new(NameServiceConfig::from(cfg), topology, placement))
    }

    pub fn topology(&self) -> &Arc<Topology> {
        &self.topology
    }

    pub fn config(&self) -> &NameServiceConfig {
        &self.config
    }

    pub fn file_state(&self, path: &str) -> Option<FileState> {
        self.files.get(path).map(|entry| entry.state)
    }

    /// Open `path`: create it for writing, or open it for reading.
    ///
    /// Either way the caller walks away holding a lock, identified by the
    /// returned lease, until it calls [`NameService::close`].
    #[tracing::instrument(level = "debug", skip(self))]
    pub async fn open(&self, path: &str, size: u64, mode: OpenMode) -> Result<(FileHandle, LeaseId)> {
        match mode {
            OpenMode::Write => self.open_for_write(path, size),
            OpenMode::Read => self.open_for_read(path).await,
        }
    }

    fn open_for_write(&self, path: &str, size: u64) -> Result<(FileHandle, LeaseId)> {
        if let Some(state) = self.file_state(path) {
            return Err(match state {
                FileState::Committed => Error::AlreadyExists(path.to_string()),
                FileState::Pending => {
                    Error::LockContended(format!("{path} is already being created"))
                }
            });
        }

        let lease = self.locks.create_exclusive(path)?;
        let record = match self.assign_blocks(path, size) {
            Ok(record) => record,
            Err(e) => {
                if let Ok(Some(held)) = self.locks.release(path, OpenMode::Write, lease) {
                    self.locks.forget(&held);
                }
                return Err(e);
            }
        };

        self.files.insert(
            path.to_string(),
            FileEntry {
                record: record.clone(),
                state: FileState::Pending,
                writer: lease,
            },
        );
        metrics::counter!("chainfs_files_created_total").increment(1);
        tracing::info!(path, size, blocks = record.num_blocks(), lease = %lease, "file created");
        Ok((record, lease))
    }

    async fn open_for_read(&self, path: &str) -> Result<(FileHandle, LeaseId)> {
        if self.file_state(path).is_none() {
            return Err(Error::NotFound(format!("File {path} does not exist")));
        }

        let lease = self
            .locks
            .acquire_shared(path, self.config.lock_wait)
            .await
            .map_err(|e| match e {
                Error::NotFound(_) => Error::NotFound(format!("File {path} does not exist")),
                other => other,
            })?;

        // The writer we waited on may have given up.
        let entry = self.files.get(path).map(|entry| entry.value().clone());
        match entry {
            Some(FileEntry {
                record,
                state: FileState::Committed,
                ..
            }) => {
                tracing::debug!(path, lease = %lease, "file opened for read");
                Ok((record.sorted(), lease))
            }
            other => {
                drop(self.locks.release(path, OpenMode::Read, lease));
                Err(match other {
                    None => Error::NotFound(format!("File {path} does not exist")),
                    Some(_) => Error::LockContended(format!("{path} is being recreated")),
                })
            }
        }
    }

    /// Compute placements for a new file of `size` bytes.
    ///
    /// Pure with respect to the file table: nothing is recorded here.
    pub fn assign_blocks(&self, path: &str, size: u64) -> Result<FileRecord> {
        let block_size = self.config.block_size;
        let replication = self.placement.replication_factor() as u32;
        let candidates = self.topology.live_nodes(self.config.node_timeout);

        let num_blocks = block_count(size, block_size);
        let mut blocks = Vec::new();
        for index in 0..num_blocks {
            let chosen = self.placement.place(&candidates)?;
            let replicas = chosen
                .into_iter()
                .enumerate()
                .map(|(replica, target)| ReplicaAssignment {
                    file: path.to_string(),
                    block: index,
                    replica: replica as u32,
                    replication,
                    target,
                    initialized: false,
                })
                .collect();
            blocks.push(BlockPlacement { index, replicas });
        }

        Ok(FileRecord {
            path: path.to_string(),
            size,
            block_size,
            replication,
            blocks,
            exists: true,
        })
    }

    /// Release the lock taken by an open.
    ///
    /// Closing a write lease commits the file. Closing a lease that is no
    /// longer held succeeds with nothing to do, unless it is a write lease
    /// whose file is not the committed file that lease created: then the
    /// writer's file was discarded on expiry and the close is `NotFound`.
    #[tracing::instrument(level = "debug", skip(self))]
    pub fn close(&self, path: &str, mode: OpenMode, lease: LeaseId) -> Result<String> {
        let Some(held) = self.locks.release(path, mode, lease)? else {
            if mode == OpenMode::Write && !self.committed_by(path, lease) {
                return Err(Error::NotFound(format!(
                    "File {path} was discarded after its lease expired"
                )));
            }
            return Ok(format!("File {path} closed, nothing held"));
        };

        if mode == OpenMode::Write {
            if let Some(mut entry) = self.files.get_mut(path) {
                if entry.writer == lease {
                    entry.state = FileState::Committed;
                }
            }
            tracing::info!(path, "file committed");
        }
        // Readers waiting on the writer wake up here, after the commit.
        drop(held);
        Ok(format!("File {path} closed"))
    }

    fn committed_by(&self, path: &str, lease: LeaseId) -> bool {
        self.files
            .get(path)
            .is_some_and(|entry| entry.state == FileState::Committed && entry.writer == lease)
    }

    /// Committed paths, sorted.
    pub fn list(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .files
            .iter()
            .filter(|entry| entry.value().state == FileState::Committed)
            .map(|entry| entry.key().clone())
            .collect();
        names.sort();
        names
    }

    pub fn renew_lease(&self, lease: LeaseId) -> Result<()> {
        self.locks.renew(lease)?;
        Ok(())
    }

    pub fn heartbeat(&self, report: NodeReport) {
        self.topology.observe(report);
    }

    /// Force-release expired leases and forget silent storage nodes.
    ///
    /// Returns the number of leases reaped.
    pub fn run_maintenance(&self) -> usize {
        let expired = self.locks.reap_expired();
        let reaped = expired.len();

        for lease in expired {
            metrics::counter!("chainfs_leases_expired_total").increment(1);
            tracing::warn!(path = %lease.path, mode = %lease.mode, lease = %lease.id, "lease expired");

            if lease.mode == OpenMode::Write {
                let discarded = self
                    .files
                    .remove_if(&lease.path, |_, entry| {
                        entry.state == FileState::Pending && entry.writer == lease.id
                    })
                    .is_some();
                if discarded {
                    self.locks.forget(&lease);
                    tracing::warn!(path = %lease.path, "discarded unfinished file");
                }
            }
        }

        self.topology.expire(self.config.node_timeout);
        reaped
    }

    /// Run [`NameService::run_maintenance`] every `interval` until aborted.
    pub fn spawn_maintenance(self: &Arc<Self>, interval: Duration) -> JoinHandle<()> {
        let service = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                service.run_maintenance();
            }
        })
    }

    // Envelope adapters: every error becomes a FAILURE response.

    pub async fn handle_open(&self, request: Request) -> Response {
        let id = request.request_id;
        let (path, size, mode) = match request.body {
            RequestBody::OpenFile { path, size, mode } => (path, size, mode),
            other => return wrong_body(id, "OpenFile", &other),
        };
        match self.open(&path, size, mode).await {
            Ok((handle, lease)) => {
                let message = match mode {
                    OpenMode::Write => {
                        format!("File {path} created with {} blocks", handle.num_blocks())
                    }
                    OpenMode::Read => format!("File {path} opened for read"),
                };
                Response::success(id, message)
                    .with_file_handle(handle)
                    .with_lease(lease)
            }
            Err(e) => {
                tracing::debug!(path, %mode, error = %e, "open refused");
                Response::failure_from(id, &e)
            }
        }
    }

    pub async fn handle_close(&self, request: Request) -> Response {
        let id = request.request_id;
        let (path, mode, lease) = match request.body {
            RequestBody::CloseFile { path, mode, lease } => (path, mode, lease),
            other => return wrong_body(id, "CloseFile", &other),
        };
        match self.close(&path, mode, lease) {
            Ok(message) => Response::success(id, message),
            Err(e) => Response::failure_from(id, &e),
        }
    }

    pub fn handle_list(&self, request: Request) -> ListResponse {
        let file_names = self.list();
        ListResponse {
            response_id: request.request_id,
            outcome: Outcome::Success,
            message: format!("{} files", file_names.len()),
            file_names,
        }
    }

    pub fn handle_renew(&self, request: Request) -> Response {
        let id = request.request_id;
        let lease = match request.body {
            RequestBody::RenewLease { lease } => lease,
            other => return wrong_body(id, "RenewLease", &other),
        };
        match self.renew_lease(lease) {
            Ok(()) => Response::success(id, format!("Lease {lease} renewed")).with_lease(lease),
            Err(e) => Response::failure_from(id, &e),
        }
    }

    pub fn handle_heartbeat(&self, request: Request) -> Response {
        let id = request.request_id;
        let report = match request.body {
            RequestBody::Heartbeat(report) => report,
            other => return wrong_body(id, "Heartbeat", &other),
        };
        let name = report.node.name.clone();
        self.heartbeat(report);
        Response::success(id, format!("Heartbeat from {name} received"))
    }
}

fn wrong_body(id: corelib::RequestId, expected: &str, body: &RequestBody) -> Response {
    let err = Error::Malformed(format!("{} sent to {expected}", body.operation()));
    Response::failure_from(id, &err)
}

#[async_trait]
impl NameNodeRpc for NameService {
    async fn open_file(&self, request: Request) -> Result<Response> {
        Ok(self.handle_open(request).await)
    }

    async fn close_file(&self, request: Request) -> Result<Response> {
        Ok(self.handle_close(request).await)
    }

    async fn list(&self, request: Request) -> Result<ListResponse> {
        Ok(self.handle_list(request))
    }

    async fn renew_lease(&self, request: Request) -> Result<Response> {
        Ok(self.handle_renew(request))
    }

    async fn heartbeat(&self, request: Request) -> Result<Response> {
        Ok(self.handle_heartbeat(request))
    }
}

#[async_trait]
impl RequestHandler for NameService {
    async fn handle(&self, request: Request) -> Reply {
        match request.body {
            RequestBody::OpenFile { .. } => self.handle_open(request).await.into(),
            RequestBody::CloseFile { .. } => self.handle_close(request).await.into(),
            RequestBody::List => self.handle_list(request).into(),
            RequestBody::RenewLease { .. } => self.handle_renew(request).into(),
            RequestBody::Heartbeat(_) => self.handle_heartbeat(request).into(),
            _ => {
                let err = Error::Malformed(format!(
                    "name service does not serve {}",
                    request.body.operation()
                ));
                Response::failure_from(request.request_id, &err).into()
            }
        }
    }
}
