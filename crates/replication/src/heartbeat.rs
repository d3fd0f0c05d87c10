//! Periodic liveness and inventory report from a storage node to the name service.
//!
//! A failed heartbeat is logged and simply tried again on the next tick; the
//! name service treats a node it has not heard from within its node timeout as
//! down and stops placing new replicas on it.

use crate::datanode::StorageNode;
use corelib::protocol::{Request, RequestBody};
use corelib::{NameNodeRpc, Result};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

/// Send one heartbeat carrying the node's current inventory.
pub async fn send_heartbeat(node: &StorageNode, namenode: &dyn NameNodeRpc) -> Result<()> {
    let request = Request::new(RequestBody::Heartbeat(node.report()));
    namenode.heartbeat(request).await?.into_result()?;
    Ok(())
}

/// Heartbeat every `interval` until the returned task is aborted.
pub fn spawn_heartbeat(
    node: Arc<StorageNode>,
    namenode: Arc<dyn NameNodeRpc>,
    interval: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut failing = false;

        loop {
            ticker.tick().await;
            match send_heartbeat(&node, namenode.as_ref()).await {
                Ok(()) => {
                    if failing {
                        tracing::info!(node = %node.node(), "heartbeat restored");
                    }
                    failing = false;
                }
                Err(e) => {
                    if !failing {
                        tracing::warn!(node = %node.node(), error = %e, "heartbeat failed");
                    }
                    failing = true;
                }
            }
        }
    })
}
