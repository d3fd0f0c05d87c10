//! Subcommand implementations.

use crate::config::{CliConfig, Command};
use crate::driver::FileClient;
use anyhow::Context;
use bytes::Bytes;
use coordinator::NameService;
use corelib::config::{ClientConfig, DataNodeConfig, NameNodeConfig};
use corelib::{Node, NodeId};
use replication::{spawn_heartbeat, FsBlockStore, StorageNode};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use streaming::{serve, RemoteNameNode, TcpConnector};
use tokio::net::TcpListener;

impl CliConfig {
    pub async fn run(self) -> anyhow::Result<()> {
        let cfg = self.cluster_config()?;
        match self.command {
            Command::Namenode { .. } => run_namenode(cfg.namenode).await,
            Command::Datanode { .. } => run_datanode(cfg.datanode).await,
            Command::Put { local, remote, .. } => put(&cfg.client, &local, remote).await,
            Command::Get { remote, local, .. } => get(&cfg.client, &remote, local).await,
            Command::Ls { .. } => ls(&cfg.client).await,
        }
    }
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "cannot listen for ctrl-c");
        std::future::pending::<()>().await;
    }
}

pub async fn run_namenode(cfg: NameNodeConfig) -> anyhow::Result<()> {
    let service = Arc::new(NameService::from_config(&cfg)?);
    let maintenance = service.spawn_maintenance(cfg.maintenance_interval());

    let listener = TcpListener::bind(&cfg.listen)
        .await
        .with_context(|| format!("binding {}", cfg.listen))?;
    serve(listener, service, shutdown_signal()).await?;

    maintenance.abort();
    Ok(())
}

pub async fn run_datanode(cfg: DataNodeConfig) -> anyhow::Result<()> {
    let addr = cfg.advertise_addr().to_string();
    let name = cfg.name.clone().unwrap_or_else(|| addr.clone());
    let node = Node::new(NodeId::from_name(&name), name, addr).with_rack(cfg.rack.clone());

    let store = Arc::new(FsBlockStore::open(&cfg.data_dir).await?);
    let peers = Arc::new(TcpConnector::new(cfg.forward_retry.clone()));
    let datanode = Arc::new(StorageNode::new(node, store, peers, cfg.forward_retry.clone()));
    datanode.recover().await?;

    let namenode = Arc::new(RemoteNameNode::new(
        cfg.namenode_addr.clone(),
        cfg.forward_retry.clone(),
    ));
    let heartbeat = spawn_heartbeat(Arc::clone(&datanode), namenode, cfg.heartbeat_interval());

    let listener = TcpListener::bind(&cfg.listen)
        .await
        .with_context(|| format!("binding {}", cfg.listen))?;
    serve(listener, datanode, shutdown_signal()).await?;

    heartbeat.abort();
    Ok(())
}

fn client(cfg: &ClientConfig) -> FileClient {
    FileClient::new(
        Arc::new(RemoteNameNode::new(cfg.namenode_addr.clone(), cfg.retry.clone())),
        Arc::new(TcpConnector::new(cfg.retry.clone())),
        cfg.retry.clone(),
    )
    .with_renew_interval(cfg.renew_interval())
}

async fn put(cfg: &ClientConfig, local: &Path, remote: Option<String>) -> anyhow::Result<()> {
    let remote = match remote {
        Some(name) => name,
        None => local
            .file_name()
            .and_then(|n| n.to_str())
            .map(str::to_string)
            .with_context(|| format!("cannot derive a name from {}", local.display()))?,
    };
    let data = tokio::fs::read(local)
        .await
        .with_context(|| format!("reading {}", local.display()))?;

    let handle = client(cfg).put(&remote, Bytes::from(data)).await?;
    println!(
        "stored {} ({} bytes, {} blocks, {} replicas each)",
        handle.path,
        handle.size,
        handle.num_blocks(),
        handle.replication
    );
    Ok(())
}

async fn get(cfg: &ClientConfig, remote: &str, local: Option<PathBuf>) -> anyhow::Result<()> {
    let local = local.unwrap_or_else(|| PathBuf::from(remote.rsplit('/').next().unwrap_or(remote)));
    let data = client(cfg).get(remote).await?;
    tokio::fs::write(&local, &data)
        .await
        .with_context(|| format!("writing {}", local.display()))?;
    println!("fetched {} ({} bytes) into {}", remote, data.len(), local.display());
    Ok(())
}

async fn ls(cfg: &ClientConfig) -> anyhow::Result<()> {
    for name in client(cfg).list().await? {
        println!("{name}");
    }
    Ok(())
}
