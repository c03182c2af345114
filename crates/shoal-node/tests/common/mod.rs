//! Shared test support: a node rooted in a scratch directory, plus small
//! builders for metadata records.
#![allow(dead_code)]

use std::sync::Arc;

use tempfile::TempDir;
use tokio::sync::mpsc::UnboundedReceiver;

use shoal_config::{BackupTarget, NodeOptions, NodePaths};
use shoal_meta::{FileMetadata, MetadataStore};
use shoal_node::node::Node;
use shoal_node::replicate::{repl_queue, ReplTask};

pub fn test_node(
    backup: Option<BackupTarget>,
) -> (Arc<Node>, UnboundedReceiver<ReplTask>, TempDir) {
    let dir = TempDir::new().unwrap();
    let paths = NodePaths::for_node(dir.path(), 1);
    paths.ensure().unwrap();

    let (repl, rx) = repl_queue();
    let opts = NodeOptions {
        ns_ip: "127.0.0.1".into(),
        ns_port: 0,
        ip: "127.0.0.1".into(),
        client_port: 0,
        repl_port: 0,
    };
    let node = Arc::new(Node::new(1, opts, paths, MetadataStore::new(), backup, repl));
    (node, rx, dir)
}

pub fn meta_entry(name: &str, owner: &str, size: u64, is_backup: bool) -> FileMetadata {
    FileMetadata {
        filename: name.to_string(),
        owner: owner.to_string(),
        file_size: size,
        word_count: 1,
        char_count: size,
        last_access: 1_700_000_000,
        last_modified: 1_700_000_000,
        is_backup,
    }
}

/// Seed a file on disk plus its metadata entry.
pub fn seed_file(node: &Node, name: &str, owner: &str, content: &[u8], is_backup: bool) {
    std::fs::write(node.paths.file(name), content).unwrap();
    node.meta
        .insert(meta_entry(name, owner, content.len() as u64, is_backup));
}
