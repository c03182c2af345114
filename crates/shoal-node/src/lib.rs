//! # shoal-node
//!
//! The storage node of the shoal distributed file service.
//!
//! ## Architecture
//!
//! One process serves three audiences over TCP:
//! - clients, on the client port (reads, streams, write transactions,
//!   undo, per-file checkpoints),
//! - the name server, over a persistent channel opened at startup
//!   (registration, heartbeat out, control messages in) and as
//!   single-shot requests on the client port,
//! - peer storage nodes, on the replication port (replica pushes,
//!   deletes, recovery sweeps).
//!
//! All state shared between tasks lives in one [`node::Node`] context:
//! the metadata table, the per-file lock map, the mutable backup target,
//! and the replication queue handle.

pub mod checkpoint;
pub mod control;
pub mod dispatch;
pub mod fileops;
pub mod node;
pub mod recovery;
pub mod replicate;
pub mod scan;

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use tokio::net::TcpListener;
use tokio::signal::unix::{signal, SignalKind};
use tokio::sync::{mpsc, watch};
use tracing::info;

use shoal_config::{BackupTarget, NodeOptions, CHECKPOINT_INTERVAL, HEARTBEAT_INTERVAL};
use shoal_meta::MetadataStore;

use crate::node::Node;

/// Bring the node up, run until a shutdown signal or a fatal task error,
/// then tear down and take a final metadata snapshot.
pub async fn run_node(opts: NodeOptions) -> anyhow::Result<()> {
    // A peer hanging up mid-send must surface as an I/O error on the
    // socket, not kill the process.
    unsafe {
        libc::signal(libc::SIGPIPE, libc::SIG_IGN);
    }

    let (ns_stream, ack) = control::register(&opts).await?;
    let ss_id = ack.new_ss_id;

    let paths = shoal_config::NodePaths::for_node(Path::new("."), ss_id);
    paths
        .ensure()
        .context("cannot initialize the data directory")?;

    let meta = MetadataStore::load(&paths.metadata_db)
        .context("cannot load metadata snapshot")?
        .unwrap_or_else(|| {
            info!("no metadata snapshot found, starting with an empty table");
            MetadataStore::new()
        });

    let (repl, repl_rx) = replicate::repl_queue();
    let backup = BackupTarget::from_parts(&ack.backup_ss_ip, ack.backup_ss_port);
    let node = Arc::new(Node::new(ss_id, opts.clone(), paths, meta, backup, repl));

    let adopted = scan::scan_files_dir(&node.paths, &node.meta)
        .context("cannot scan the files directory")?;
    info!(
        adopted,
        tracked = node.meta.count(),
        "metadata reconciled with the files directory"
    );

    if ack.must_recover {
        info!("name server flagged this node for recovery, awaiting recovery push");
    }

    let client_listener = TcpListener::bind(opts.client_addr()?)
        .await
        .context("cannot bind the client listener")?;
    let repl_listener = TcpListener::bind(opts.repl_addr()?)
        .await
        .context("cannot bind the replication listener")?;
    info!(
        ss_id,
        client = %client_listener.local_addr()?,
        replication = %repl_listener.local_addr()?,
        "listeners up"
    );

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let (ns_rd, ns_wr) = ns_stream.into_split();

    // Tasks whose failure invalidates the node's role report through this
    // channel; everything else just logs and keeps the node up.
    let (fatal_tx, mut fatal_rx) = mpsc::channel::<anyhow::Error>(2);

    let mut handles = Vec::new();
    handles.push(tokio::spawn(dispatch::run_client_listener(
        Arc::clone(&node),
        client_listener,
        shutdown_rx.clone(),
    )));
    handles.push(tokio::spawn(dispatch::run_repl_listener(
        Arc::clone(&node),
        repl_listener,
        shutdown_rx.clone(),
    )));
    handles.push(tokio::spawn(replicate::run_worker(
        Arc::clone(&node),
        repl_rx,
        shutdown_rx.clone(),
    )));
    handles.push(tokio::spawn(checkpoint::run_checkpoint(
        Arc::clone(&node),
        CHECKPOINT_INTERVAL,
        shutdown_rx.clone(),
    )));

    {
        let fatal_tx = fatal_tx.clone();
        let shutdown_rx = shutdown_rx.clone();
        handles.push(tokio::spawn(async move {
            if let Err(e) = control::run_heartbeat(ns_wr, ss_id, HEARTBEAT_INTERVAL, shutdown_rx).await {
                let _ = fatal_tx.send(e.context("heartbeat task failed")).await;
            }
        }));
    }
    {
        let node = Arc::clone(&node);
        handles.push(tokio::spawn(async move {
            if let Err(e) = control::run_control_listener(node, ns_rd, shutdown_rx).await {
                let _ = fatal_tx.send(e.context("control listener failed")).await;
            }
        }));
    }

    let mut sigint = signal(SignalKind::interrupt())?;
    let mut sigterm = signal(SignalKind::terminate())?;

    let fatal = tokio::select! {
        _ = sigint.recv() => {
            info!("SIGINT received, shutting down");
            None
        }
        _ = sigterm.recv() => {
            info!("SIGTERM received, shutting down");
            None
        }
        err = fatal_rx.recv() => err,
    };

    let _ = shutdown_tx.send(true);
    for handle in handles {
        let _ = tokio::time::timeout(Duration::from_secs(5), handle).await;
    }

    node.meta
        .save(&node.paths.metadata_db)
        .context("final metadata snapshot failed")?;
    info!(entries = node.meta.count(), "final metadata snapshot written");

    match fatal {
        Some(e) => Err(e),
        None => Ok(()),
    }
}
