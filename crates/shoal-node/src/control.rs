//! Name-server channel: registration handshake, heartbeat, and inbound
//! control messages.
//!
//! One TCP connection is opened at startup and kept for the process
//! lifetime. The write half belongs to the heartbeat task, the read half
//! to the control listener; control messages are never acked on this
//! socket, so the two halves never contend.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use tokio::io::AsyncRead;
use tokio::net::TcpStream;
use tokio::sync::watch;
use tracing::{info, warn};

use shoal_config::{BackupTarget, NodeOptions};
use shoal_proto::messages::{Heartbeat, RegisterAck, RegisterRequest, SyncFromBackup, UpdateBackup};
use shoal_proto::{frame, FrameHeader, MsgKind, ProtoError};

use crate::node::Node;
use crate::recovery;

/// Connect to the name server and run the registration handshake.
pub async fn register(opts: &NodeOptions) -> anyhow::Result<(TcpStream, RegisterAck)> {
    let ns_addr = opts.ns_addr()?;
    let mut stream = TcpStream::connect(ns_addr)
        .await
        .with_context(|| format!("name server unreachable at {ns_addr}"))?;

    frame::send_message(
        &mut stream,
        MsgKind::S2nRegister,
        &RegisterRequest {
            ip: opts.ip.clone(),
            client_port: opts.client_port,
            // Peers reach us for replication on our own listener; the
            // name server hands this address to whichever node we back up.
            backup_ip: opts.ip.clone(),
            backup_port: opts.repl_port,
            file_count: 0,
        },
    )
    .await?;

    let ack: RegisterAck = frame::expect_message(&mut stream, MsgKind::N2sRegisterAck)
        .await
        .context("registration rejected by name server")?;

    info!(
        ss_id = ack.new_ss_id,
        backup_of = ack.backup_of_ss_id,
        must_recover = ack.must_recover,
        "registered with name server"
    );
    Ok((stream, ack))
}

/// Heartbeat task. A failed send is fatal for the node: losing the name
/// server channel means the cluster has already written us off.
pub async fn run_heartbeat<W>(
    mut wr: W,
    ss_id: i32,
    interval: Duration,
    mut shutdown: watch::Receiver<bool>,
) -> anyhow::Result<()>
where
    W: tokio::io::AsyncWrite + Unpin,
{
    let mut ticker = tokio::time::interval(interval);
    loop {
        tokio::select! {
            _ = ticker.tick() => {
                frame::send_message(&mut wr, MsgKind::S2nHeartbeat, &Heartbeat { ss_id })
                    .await
                    .context("heartbeat to name server failed")?;
            }
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    return Ok(());
                }
            }
        }
    }
}

/// Control-listener task: reads name-server frames off the shared socket
/// for as long as the process lives.
pub async fn run_control_listener<R>(
    node: Arc<Node>,
    mut rd: R,
    mut shutdown: watch::Receiver<bool>,
) -> anyhow::Result<()>
where
    R: AsyncRead + Unpin,
{
    loop {
        let header = tokio::select! {
            header = frame::read_header(&mut rd) => match header {
                Ok(h) => h,
                Err(ProtoError::PeerClosed) => {
                    anyhow::bail!("name server closed the control channel");
                }
                Err(e) => return Err(e.into()),
            },
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    return Ok(());
                }
                continue;
            }
        };

        if let Err(e) = dispatch_control(&node, &mut rd, header).await {
            // A garbled control frame is logged and skipped; only the
            // loss of the channel itself is fatal.
            warn!(error = %e, "control message failed");
        }
    }
}

/// Apply one name-server control message. Shared between the dedicated
/// control channel and control frames arriving on the client-facing port.
pub async fn dispatch_control<R>(node: &Arc<Node>, rd: &mut R, header: FrameHeader) -> Result<(), ProtoError>
where
    R: AsyncRead + Unpin,
{
    match header.msg_kind()? {
        MsgKind::N2sUpdateBackup => {
            let req: UpdateBackup = frame::read_message(rd, &header).await?;
            let target = BackupTarget::from_parts(&req.backup_ip, req.backup_port);
            info!(target = ?target, "backup target updated");
            node.set_backup_target(target).await;
        }
        MsgKind::N2sReReplicateAll => {
            let req: UpdateBackup = frame::read_message(rd, &header).await?;
            let target = BackupTarget::from_parts(&req.backup_ip, req.backup_port);
            info!(target = ?target, "new backup assigned, re-replicating all primary files");
            node.set_backup_target(target).await;
            recovery::re_replicate_all(node).await?;
        }
        MsgKind::N2sSyncFromBackup => {
            let req: SyncFromBackup = frame::read_message(rd, &header).await?;
            // The sweep can move a full file set; run it off the control
            // loop so further control messages keep flowing.
            let node = Arc::clone(node);
            tokio::spawn(async move {
                if let Err(e) = recovery::sync_from_backup(&node, &req.target_ip, req.target_port).await {
                    warn!(peer = %req.target_ip, error = %e, "recovery push failed");
                }
            });
        }
        MsgKind::N2sSyncToPrimary => {
            frame::read_payload(rd, &header).await?;
            // Nothing to do actively: the replication listener will take
            // the backup's inbound sweep.
            info!("awaiting recovery push from backup peer");
        }
        other => {
            warn!(kind = ?other, "unexpected kind on control path");
            frame::read_payload(rd, &header).await?;
        }
    }
    Ok(())
}
