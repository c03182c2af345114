//! Periodic metadata snapshots.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tracing::{debug, warn};

use crate::node::Node;

/// Snapshot the metadata table every `interval`, racing the shutdown
/// channel so the task exits promptly. The final snapshot on shutdown is
/// taken by the lifecycle code after all tasks have stopped.
pub async fn run_checkpoint(node: Arc<Node>, interval: Duration, mut shutdown: watch::Receiver<bool>) {
    let mut ticker = tokio::time::interval(interval);
    // The interval fires immediately; the table was just loaded, skip it.
    ticker.tick().await;

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                match node.meta.save(&node.paths.metadata_db) {
                    Ok(()) => debug!(entries = node.meta.count(), "periodic metadata checkpoint"),
                    Err(e) => warn!(error = %e, "metadata checkpoint failed"),
                }
            }
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
            }
        }
    }
    debug!("checkpoint task stopped");
}
