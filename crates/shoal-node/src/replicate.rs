//! Asynchronous replication: the outbound task queue and worker, and the
//! inbound receiver peers push to.
//!
//! Mutation paths enqueue `(filename, op)` tasks and move on; a single
//! consumer drains the queue in FIFO order, so the backup peer observes
//! updates to any one file in local commit order. Tasks are never
//! deduplicated or coalesced; a later UPDATE simply overwrites the
//! earlier bytes at the backup.

use std::sync::Arc;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

use shoal_config::{BackupTarget, MAX_REPL_ATTEMPTS, RECV_CHUNK, SEND_CHUNK};
use shoal_meta::FileMetadata;
use shoal_proto::messages::{check_filename, check_owner, DeleteFile, ReplicateFile};
use shoal_proto::{frame, FrameHeader, MsgKind, ProtoError};

use crate::node::{unix_now, Node};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplOp {
    Update,
    Delete,
}

/// One pending outbound operation. The attempt counter rides along with
/// the task, so retries for distinct filenames never share state.
#[derive(Debug, Clone)]
pub struct ReplTask {
    pub filename: String,
    pub op: ReplOp,
    pub attempts: u32,
}

/// Producer side of the replication queue. Scheduling never blocks the
/// caller.
#[derive(Debug, Clone)]
pub struct ReplHandle {
    tx: mpsc::UnboundedSender<ReplTask>,
}

impl ReplHandle {
    pub fn schedule_update(&self, filename: &str) {
        self.push(ReplTask {
            filename: filename.to_string(),
            op: ReplOp::Update,
            attempts: 0,
        });
    }

    pub fn schedule_delete(&self, filename: &str) {
        self.push(ReplTask {
            filename: filename.to_string(),
            op: ReplOp::Delete,
            attempts: 0,
        });
    }

    fn push(&self, task: ReplTask) {
        // Send only fails after the worker is gone, i.e. during shutdown.
        if self.tx.send(task).is_err() {
            debug!("replication queue closed, dropping task");
        }
    }
}

/// Build the queue; the receiver goes to [`run_worker`].
pub fn repl_queue() -> (ReplHandle, mpsc::UnboundedReceiver<ReplTask>) {
    let (tx, rx) = mpsc::unbounded_channel();
    (ReplHandle { tx }, rx)
}

/// What became of one dequeued task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskOutcome {
    Sent,
    Skipped,
    Failed,
}

/// Single consumer draining the replication queue.
pub async fn run_worker(
    node: Arc<Node>,
    mut rx: mpsc::UnboundedReceiver<ReplTask>,
    mut shutdown: watch::Receiver<bool>,
) {
    info!("replication worker started");
    loop {
        let task = tokio::select! {
            task = rx.recv() => match task {
                Some(task) => task,
                None => break,
            },
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
                continue;
            }
        };

        if process_task(&node, &task).await == TaskOutcome::Failed {
            let attempts = task.attempts + 1;
            if attempts < MAX_REPL_ATTEMPTS {
                node.repl.push(ReplTask { attempts, ..task });
            } else {
                warn!(
                    file = %task.filename,
                    op = ?task.op,
                    attempts,
                    "abandoning replication task after repeated failures"
                );
            }
        }
    }
    info!("replication worker stopped");
}

/// Ship one task to the current backup peer.
pub async fn process_task(node: &Node, task: &ReplTask) -> TaskOutcome {
    let Some(target) = node.backup_target().await else {
        debug!(file = %task.filename, "no backup target, skipping replication");
        return TaskOutcome::Skipped;
    };

    match task.op {
        ReplOp::Update => send_update(node, &target, &task.filename).await,
        ReplOp::Delete => send_delete(&target, &task.filename).await,
    }
}

async fn send_update(node: &Node, target: &BackupTarget, filename: &str) -> TaskOutcome {
    // A file we only hold as someone else's replica never goes back out;
    // that would cascade backups of backups.
    let meta = match node.meta.get(filename) {
        Some(meta) => meta,
        None => {
            warn!(file = %filename, "no metadata entry for update task, skipping");
            return TaskOutcome::Skipped;
        }
    };
    if meta.is_backup {
        info!(file = %filename, "skipping backup file");
        return TaskOutcome::Skipped;
    }

    let lock = node.locks.get(filename);
    let _guard = lock.read().await;

    let path = node.paths.file(filename);
    let mut file = match tokio::fs::File::open(&path).await {
        Ok(f) => f,
        Err(e) => {
            warn!(file = %filename, error = %e, "cannot open file for replication");
            return TaskOutcome::Failed;
        }
    };
    let file_size = match file.metadata().await {
        Ok(m) => m.len(),
        Err(e) => {
            warn!(file = %filename, error = %e, "cannot stat file for replication");
            return TaskOutcome::Failed;
        }
    };

    let result: Result<(), ProtoError> = async {
        let mut sock = TcpStream::connect(target.addr()).await?;
        frame::send_message(
            &mut sock,
            MsgKind::S2sReplicateFile,
            &ReplicateFile {
                filename: filename.to_string(),
                owner: meta.owner.clone(),
                file_size,
            },
        )
        .await?;
        copy_exact(&mut file, &mut sock, file_size).await?;
        frame::expect_frame(&mut sock, MsgKind::S2sAck).await?;
        Ok(())
    }
    .await;

    match result {
        Ok(()) => {
            debug!(file = %filename, bytes = file_size, peer = %target.addr(), "replica updated");
            TaskOutcome::Sent
        }
        Err(e) => {
            warn!(file = %filename, peer = %target.addr(), error = %e, "replica update failed");
            TaskOutcome::Failed
        }
    }
}

async fn send_delete(target: &BackupTarget, filename: &str) -> TaskOutcome {
    let result: Result<(), ProtoError> = async {
        let mut sock = TcpStream::connect(target.addr()).await?;
        frame::send_message(
            &mut sock,
            MsgKind::S2sDeleteFile,
            &DeleteFile {
                filename: filename.to_string(),
            },
        )
        .await?;
        frame::expect_frame(&mut sock, MsgKind::S2sAck).await?;
        Ok(())
    }
    .await;

    match result {
        Ok(()) => {
            debug!(file = %filename, peer = %target.addr(), "replica deleted");
            TaskOutcome::Sent
        }
        Err(e) => {
            warn!(file = %filename, peer = %target.addr(), error = %e, "replica delete failed");
            TaskOutcome::Failed
        }
    }
}

/// Handle one inbound peer frame whose header is already read. The
/// replication accept loop calls this inline, one request per connection.
pub async fn handle_peer_frame<S>(node: &Node, stream: &mut S, header: FrameHeader) -> Result<(), ProtoError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    match header.msg_kind()? {
        MsgKind::S2sReplicateFile => receive_replica(node, stream, header).await,
        MsgKind::S2sDeleteFile => receive_delete(node, stream, header).await,
        other => {
            warn!(kind = ?other, "unexpected frame on replication channel, closing");
            Ok(())
        }
    }
}

async fn receive_replica<S>(node: &Node, stream: &mut S, header: FrameHeader) -> Result<(), ProtoError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let req: ReplicateFile = frame::read_message(stream, &header).await?;
    check_filename(&req.filename)?;
    check_owner(&req.owner)?;

    let lock = node.locks.get(&req.filename);
    let _guard = lock.write().await;

    let path = node.paths.file(&req.filename);
    receive_file_bytes(stream, &path, req.file_size).await?;

    let now = unix_now();
    node.meta.insert(FileMetadata {
        filename: req.filename.clone(),
        owner: req.owner,
        file_size: req.file_size,
        word_count: 0,
        char_count: 0,
        last_access: now,
        last_modified: now,
        is_backup: true,
    });

    frame::send_ack(stream).await?;
    info!(file = %req.filename, bytes = req.file_size, "replica received");
    Ok(())
}

async fn receive_delete<S>(node: &Node, stream: &mut S, header: FrameHeader) -> Result<(), ProtoError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let req: DeleteFile = frame::read_message(stream, &header).await?;
    check_filename(&req.filename)?;

    let lock = node.locks.get(&req.filename);
    let _guard = lock.write().await;

    match tokio::fs::remove_file(node.paths.file(&req.filename)).await {
        Ok(()) => {}
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => return Err(e.into()),
    }
    let _ = node.meta.remove(&req.filename);

    frame::send_ack(stream).await?;
    info!(file = %req.filename, "replica deleted on request");
    Ok(())
}

/// Stream exactly `file_size` bytes from the socket into `path`. The file
/// is only left on disk after the full body arrived; a short transfer
/// removes the partial write before the error propagates.
pub(crate) async fn receive_file_bytes<R: AsyncRead + Unpin>(
    stream: &mut R,
    path: &std::path::Path,
    file_size: u64,
) -> Result<(), ProtoError> {
    let mut file = tokio::fs::File::create(path).await?;

    let mut remaining = file_size;
    let mut buf = vec![0u8; RECV_CHUNK];
    while remaining > 0 {
        let want = buf.len().min(remaining as usize);
        let n = match stream.read(&mut buf[..want]).await {
            Ok(0) => 0,
            Ok(n) => n,
            Err(e) => {
                drop(file);
                let _ = tokio::fs::remove_file(path).await;
                return Err(e.into());
            }
        };
        if n == 0 {
            drop(file);
            let _ = tokio::fs::remove_file(path).await;
            return Err(ProtoError::PeerClosed);
        }
        if let Err(e) = file.write_all(&buf[..n]).await {
            drop(file);
            let _ = tokio::fs::remove_file(path).await;
            return Err(e.into());
        }
        remaining -= n as u64;
    }
    file.flush().await?;
    Ok(())
}

/// Stream exactly `len` bytes from `src` into `dst`.
pub(crate) async fn copy_exact<R, W>(src: &mut R, dst: &mut W, len: u64) -> Result<(), ProtoError>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut remaining = len;
    let mut buf = vec![0u8; SEND_CHUNK];
    while remaining > 0 {
        let want = buf.len().min(remaining as usize);
        let n = src.read(&mut buf[..want]).await?;
        if n == 0 {
            return Err(ProtoError::PeerClosed);
        }
        dst.write_all(&buf[..n]).await?;
        remaining -= n as u64;
    }
    dst.flush().await?;
    Ok(())
}
