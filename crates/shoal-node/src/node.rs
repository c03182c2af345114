//! Shared node context.
//!
//! One [`Node`] is built at startup and handed to every task and
//! connection handler by `Arc`. It replaces the pile of process-wide
//! globals a storage daemon otherwise accumulates: the metadata table,
//! the lock map, the mutable backup target, and the replication queue
//! handle all live here.

use std::time::{SystemTime, UNIX_EPOCH};

use shoal_config::{BackupTarget, NodeOptions, NodePaths};
use shoal_locks::LockMap;
use shoal_meta::MetadataStore;

use crate::replicate::ReplHandle;

#[derive(Debug)]
pub struct Node {
    /// Name-server-assigned id, fixed after registration.
    pub ss_id: i32,
    pub opts: NodeOptions,
    pub paths: NodePaths,
    pub meta: MetadataStore,
    pub locks: LockMap,
    /// Current backup peer. Control messages replace it at runtime, so
    /// every read goes through the mutex.
    pub backup: tokio::sync::Mutex<Option<BackupTarget>>,
    pub repl: ReplHandle,
}

impl Node {
    pub fn new(
        ss_id: i32,
        opts: NodeOptions,
        paths: NodePaths,
        meta: MetadataStore,
        backup: Option<BackupTarget>,
        repl: ReplHandle,
    ) -> Self {
        Self {
            ss_id,
            opts,
            paths,
            meta,
            locks: LockMap::new(),
            backup: tokio::sync::Mutex::new(backup),
            repl,
        }
    }

    pub async fn backup_target(&self) -> Option<BackupTarget> {
        self.backup.lock().await.clone()
    }

    pub async fn set_backup_target(&self, target: Option<BackupTarget>) {
        *self.backup.lock().await = target;
    }
}

/// Current unix time in seconds.
pub fn unix_now() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs() as i64
}
