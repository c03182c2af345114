//! # shoal-config
//!
//! Node-local configuration for a shoal storage node: the address set the
//! process was launched with, the `ss_data_{id}/` directory layout derived
//! from the name-server-assigned id, and the protocol timing constants.

pub mod logging;

use std::net::{IpAddr, SocketAddr};
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Seconds between heartbeat frames on the name-server channel.
pub const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(5);

/// Seconds between periodic metadata snapshots.
pub const CHECKPOINT_INTERVAL: Duration = Duration::from_secs(60);

/// Outbound replication attempts per task before it is abandoned.
pub const MAX_REPL_ATTEMPTS: u32 = 5;

/// Buffer size for inbound file-content reads.
pub const RECV_CHUNK: usize = 4096;

/// Buffer size for outbound file-content streaming.
pub const SEND_CHUNK: usize = 64 * 1024;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid address: {0}")]
    InvalidAddr(String),
}

/// Addresses the node was launched with, before registration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeOptions {
    pub ns_ip: String,
    pub ns_port: u16,
    pub ip: String,
    pub client_port: u16,
    pub repl_port: u16,
}

impl NodeOptions {
    pub fn ns_addr(&self) -> Result<SocketAddr, ConfigError> {
        Self::parse_addr(&self.ns_ip, self.ns_port)
    }

    pub fn client_addr(&self) -> Result<SocketAddr, ConfigError> {
        Self::parse_addr(&self.ip, self.client_port)
    }

    pub fn repl_addr(&self) -> Result<SocketAddr, ConfigError> {
        Self::parse_addr(&self.ip, self.repl_port)
    }

    fn parse_addr(ip: &str, port: u16) -> Result<SocketAddr, ConfigError> {
        let ip: IpAddr = ip
            .parse()
            .map_err(|_| ConfigError::InvalidAddr(format!("{ip}:{port}")))?;
        Ok(SocketAddr::new(ip, port))
    }
}

/// The peer this node replicates to. Replaced at runtime by name-server
/// control messages; an absent target disables outbound replication.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackupTarget {
    pub ip: String,
    pub port: u16,
}

impl BackupTarget {
    /// A target from registration/control payloads, where an empty ip or
    /// zero port means "no backup assigned".
    pub fn from_parts(ip: &str, port: u16) -> Option<Self> {
        if ip.is_empty() || port == 0 {
            return None;
        }
        Some(Self {
            ip: ip.to_string(),
            port,
        })
    }

    pub fn addr(&self) -> String {
        format!("{}:{}", self.ip, self.port)
    }
}

/// On-disk layout rooted at `ss_data_{ss_id}/`.
#[derive(Debug, Clone)]
pub struct NodePaths {
    pub root: PathBuf,
    pub files: PathBuf,
    pub undo: PathBuf,
    pub checkpoints: PathBuf,
    pub metadata_db: PathBuf,
}

impl NodePaths {
    pub fn for_node(base: &Path, ss_id: i32) -> Self {
        let root = base.join(format!("ss_data_{ss_id}"));
        Self {
            files: root.join("files"),
            undo: root.join("undo"),
            checkpoints: root.join("checkpoints"),
            metadata_db: root.join("metadata.db"),
            root,
        }
    }

    /// Create every directory of the layout.
    pub fn ensure(&self) -> Result<(), ConfigError> {
        for dir in [&self.root, &self.files, &self.undo, &self.checkpoints] {
            std::fs::create_dir_all(dir)?;
        }
        Ok(())
    }

    pub fn file(&self, name: &str) -> PathBuf {
        self.files.join(name)
    }

    pub fn undo_blob(&self, name: &str) -> PathBuf {
        self.undo.join(name)
    }

    pub fn checkpoint_blob(&self, name: &str) -> PathBuf {
        self.checkpoints.join(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn paths_follow_node_id() {
        let dir = tempdir().unwrap();
        let paths = NodePaths::for_node(dir.path(), 7);

        assert!(paths.root.ends_with("ss_data_7"));
        assert!(paths.file("a.txt").ends_with("ss_data_7/files/a.txt"));
        assert!(paths.undo_blob("a.txt").ends_with("ss_data_7/undo/a.txt"));
        assert!(paths
            .checkpoint_blob("a.txt")
            .ends_with("ss_data_7/checkpoints/a.txt"));
    }

    #[test]
    fn ensure_creates_layout() {
        let dir = tempdir().unwrap();
        let paths = NodePaths::for_node(dir.path(), 1);
        paths.ensure().unwrap();

        assert!(paths.files.is_dir());
        assert!(paths.undo.is_dir());
        assert!(paths.checkpoints.is_dir());
        assert!(!paths.metadata_db.exists());
    }

    #[test]
    fn backup_target_from_parts() {
        assert!(BackupTarget::from_parts("", 9102).is_none());
        assert!(BackupTarget::from_parts("127.0.0.1", 0).is_none());

        let t = BackupTarget::from_parts("127.0.0.1", 9102).unwrap();
        assert_eq!(t.addr(), "127.0.0.1:9102");
    }

    #[test]
    fn node_options_addrs() {
        let opts = NodeOptions {
            ns_ip: "127.0.0.1".into(),
            ns_port: 9000,
            ip: "127.0.0.1".into(),
            client_port: 9101,
            repl_port: 9102,
        };
        assert_eq!(opts.ns_addr().unwrap().port(), 9000);
        assert_eq!(opts.client_addr().unwrap().port(), 9101);
        assert_eq!(opts.repl_addr().unwrap().port(), 9102);

        let bad = NodeOptions {
            ns_ip: "not-an-ip".into(),
            ..opts
        };
        assert!(bad.ns_addr().is_err());
    }
}
