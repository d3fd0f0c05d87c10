//! Caller side of the file protocol.
//!
//! Writing a file is `OpenFile(WRITE)`, then one chain write per block in
//! index order, then `CloseFile(WRITE)`. Reading is `OpenFile(READ)`, one
//! replica read per block, then `CloseFile(READ)`. The close always happens,
//! even when a transfer in between failed, so the lock is never left behind.

use bytes::{Bytes, BytesMut};
use corelib::file::block_count;
use corelib::protocol::{Request, RequestBody};
use corelib::{
    retry_with_backoff, Block, BlockPlacement, DataNodeConnector, Error, FileHandle, LeaseId,
    NameNodeRpc, OpenMode, Response, Result, RetryPolicy,
};
use std::sync::Arc;
use std::time::Duration;

/// Split `data` into the blocks a file of its size occupies.
///
/// Always yields `block_count(len, block_size)` chunks; an empty input yields
/// one empty chunk.
pub fn split_blocks(data: &Bytes, block_size: u64) -> Vec<Bytes> {
    let block_size = block_size.max(1) as usize;
    if data.is_empty() {
        return vec![Bytes::new()];
    }
    (0..data.len())
        .step_by(block_size)
        .map(|start| data.slice(start..(start + block_size).min(data.len())))
        .collect()
}

pub struct FileClient {
    namenode: Arc<dyn NameNodeRpc>,
    datanodes: Arc<dyn DataNodeConnector>,
    retry: RetryPolicy,
    renew_interval: Duration,
}

impl FileClient {
    pub fn new(
        namenode: Arc<dyn NameNodeRpc>,
        datanodes: Arc<dyn DataNodeConnector>,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            namenode,
            datanodes,
            retry,
            renew_interval: Duration::from_secs(20),
        }
    }

    /// How often a writer renews its lease while transferring blocks.
    pub fn with_renew_interval(mut self, interval: Duration) -> Self {
        self.renew_interval = interval;
        self
    }

    /// Store `data` as `path`.
    #[tracing::instrument(level = "info", skip(self, data), fields(size = data.len()))]
    pub async fn put(&self, path: &str, data: Bytes) -> Result<FileHandle> {
        let (handle, lease) = self.open(path, data.len() as u64, OpenMode::Write).await?;

        let renewer = self.spawn_renewer(lease);
        let written = self.write_blocks(&handle, &data).await;
        renewer.abort();

        let closed = self.close(path, OpenMode::Write, lease).await;
        written?;
        closed?;
        tracing::info!(path, blocks = handle.num_blocks(), "file stored");
        Ok(handle)
    }

    /// Fetch `path` in full.
    #[tracing::instrument(level = "info", skip(self))]
    pub async fn get(&self, path: &str) -> Result<Bytes> {
        let (handle, lease) = self.open(path, 0, OpenMode::Read).await?;
        let read = self.read_blocks(&handle).await;
        let closed = self.close(path, OpenMode::Read, lease).await;

        let data = read?;
        closed?;
        Ok(data)
    }

    /// Committed file names, sorted.
    pub async fn list(&self) -> Result<Vec<String>> {
        let request = Request::new(RequestBody::List);
        let namenode = Arc::clone(&self.namenode);
        let response = retry_with_backoff(&self.retry, "List", || {
            let namenode = Arc::clone(&namenode);
            let request = request.clone();
            async move { namenode.list(request).await }
        })
        .await?;
        Ok(response.file_names)
    }

    async fn open(&self, path: &str, size: u64, mode: OpenMode) -> Result<(FileHandle, LeaseId)> {
        let request = Request::new(RequestBody::OpenFile {
            path: path.to_string(),
            size,
            mode,
        });
        let response = self
            .call_namenode("OpenFile", request, |nn, req| async move {
                nn.open_file(req).await
            })
            .await?
            .into_result()?;

        let handle = response
            .file_handle
            .ok_or_else(|| Error::Malformed("open succeeded without a file handle".into()))?;
        let lease = response
            .lease
            .ok_or_else(|| Error::Malformed("open succeeded without a lease".into()))?;
        Ok((handle.sorted(), lease))
    }

    async fn close(&self, path: &str, mode: OpenMode, lease: LeaseId) -> Result<()> {
        let request = Request::new(RequestBody::CloseFile {
            path: path.to_string(),
            mode,
            lease,
        });
        self.call_namenode("CloseFile", request, |nn, req| async move {
            nn.close_file(req).await
        })
        .await?
        .into_result()?;
        Ok(())
    }

    async fn call_namenode<F, Fut>(&self, what: &str, request: Request, op: F) -> Result<Response>
    where
        F: Fn(Arc<dyn NameNodeRpc>, Request) -> Fut,
        Fut: std::future::Future<Output = Result<Response>>,
    {
        retry_with_backoff(&self.retry, what, || {
            op(Arc::clone(&self.namenode), request.clone())
        })
        .await
    }

    fn spawn_renewer(&self, lease: LeaseId) -> tokio::task::JoinHandle<()> {
        let namenode = Arc::clone(&self.namenode);
        let interval = self.renew_interval;
        tokio::spawn(async move {
            loop {
                tokio::time::sleep(interval).await;
                let request = Request::new(RequestBody::RenewLease { lease });
                match namenode.renew_lease(request).await.and_then(Response::into_result) {
                    Ok(_) => tracing::debug!(lease = %lease, "lease renewed"),
                    Err(e) => tracing::warn!(lease = %lease, error = %e, "lease renewal failed"),
                }
            }
        })
    }

    async fn write_blocks(&self, handle: &FileHandle, data: &Bytes) -> Result<()> {
        let chunks = split_blocks(data, handle.block_size);
        let expected = block_count(handle.size, handle.block_size) as usize;
        if chunks.len() != handle.num_blocks() || chunks.len() != expected {
            return Err(Error::Malformed(format!(
                "{} has {} placements for {} blocks",
                handle.path,
                handle.num_blocks(),
                chunks.len()
            )));
        }

        for (placement, chunk) in handle.blocks.iter().zip(chunks) {
            self.write_block(placement, chunk).await?;
        }
        Ok(())
    }

    async fn write_block(&self, placement: &BlockPlacement, data: Bytes) -> Result<()> {
        let primary = placement
            .primary()
            .ok_or_else(|| Error::Malformed(format!("block {} has no replicas", placement.index)))?;
        let peer = self.datanodes.connect(&primary.target)?;
        let request = Request::new(RequestBody::WriteBlock {
            chain: Block::chain(placement, data),
        });
        let what = format!("WriteBlock {} of {} to {}", placement.index, primary.file, primary.target);

        let response = retry_with_backoff(&self.retry, &what, || {
            let peer = Arc::clone(&peer);
            let request = request.clone();
            async move { peer.write_block(request).await }
        })
        .await?
        .into_result()?;
        tracing::debug!(block = placement.index, message = %response.message, "block written");
        Ok(())
    }

    async fn read_blocks(&self, handle: &FileHandle) -> Result<Bytes> {
        let mut out = BytesMut::with_capacity(handle.size as usize);
        for placement in &handle.blocks {
            out.extend_from_slice(&self.read_block(placement).await?);
        }
        out.truncate(handle.size as usize);
        Ok(out.freeze())
    }

    /// Try each replica in index order until one answers.
    async fn read_block(&self, placement: &BlockPlacement) -> Result<Bytes> {
        let mut last = Error::NotFound(format!("block {} has no replicas", placement.index));
        for replica in &placement.replicas {
            let request = Request::new(RequestBody::ReadBlock {
                replica: replica.clone(),
            });
            let attempt = match self.datanodes.connect(&replica.target) {
                Ok(peer) => peer.read_block(request).await.and_then(Response::into_result),
                Err(e) => Err(e),
            };
            match attempt.map(|response| response.block) {
                Ok(Some(block)) => return Ok(block.data),
                Ok(None) => {
                    last = Error::Malformed(format!("{} answered without a block", replica.target))
                }
                Err(e) => {
                    tracing::debug!(replica = replica.replica, target = %replica.target, error = %e, "replica unavailable");
                    last = e;
                }
            }
        }
        Err(last)
    }
}
