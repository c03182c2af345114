//! Client and name-server file operations.
//!
//! Every handler takes the file's lock before touching disk or metadata
//! and releases it on all exit paths by guard scope. Undo and checkpoint
//! state are opaque blobs keyed by filename under `undo/` and
//! `checkpoints/`; the node never looks inside them.

use std::io::Write;

use tokio::io::{AsyncRead, AsyncWrite};
use tracing::{debug, info, warn};

use shoal_meta::{count_words_chars, FileMetadata};
use shoal_proto::messages::{
    check_filename, check_owner, CheckpointRequest, ContentHeader, CreateFile, FileRequest,
    ReadRequest, StreamRequest, UndoRequest, WriteBegin, WriteChunk,
};
use shoal_proto::{frame, FrameHeader, MsgKind, ProtoError};

use crate::node::{unix_now, Node};
use crate::replicate::copy_exact;

/// `C2sRead`: reply with a content header and the raw file bytes.
pub async fn handle_read<S>(node: &Node, stream: &mut S, header: FrameHeader) -> Result<(), ProtoError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let req: ReadRequest = frame::read_message(stream, &header).await?;
    if check_filename(&req.filename).is_err() {
        return frame::send_fail(stream, "invalid filename").await;
    }

    let lock = node.locks.get(&req.filename);
    let _guard = lock.read().await;

    send_content(node, stream, &req.filename).await?;
    let _ = node.meta.update_access_time(&req.filename, unix_now());
    Ok(())
}

/// `C2sStream`: identical envelope to read, but the body goes out in
/// small chunks so a consumer can process it as it arrives.
pub async fn handle_stream<S>(node: &Node, stream: &mut S, header: FrameHeader) -> Result<(), ProtoError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let req: StreamRequest = frame::read_message(stream, &header).await?;
    if check_filename(&req.filename).is_err() {
        return frame::send_fail(stream, "invalid filename").await;
    }

    let lock = node.locks.get(&req.filename);
    let _guard = lock.read().await;

    let path = node.paths.file(&req.filename);
    let mut file = match tokio::fs::File::open(&path).await {
        Ok(f) => f,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return frame::send_file_not_found(stream).await;
        }
        Err(e) => return Err(e.into()),
    };
    let file_size = file.metadata().await?.len();

    frame::send_message(stream, MsgKind::S2cOk, &ContentHeader { file_size }).await?;

    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    let mut buf = vec![0u8; shoal_config::RECV_CHUNK];
    let mut remaining = file_size;
    while remaining > 0 {
        let want = buf.len().min(remaining as usize);
        let n = file.read(&mut buf[..want]).await?;
        if n == 0 {
            return Err(ProtoError::PeerClosed);
        }
        stream.write_all(&buf[..n]).await?;
        stream.flush().await?;
        remaining -= n as u64;
    }

    let _ = node.meta.update_access_time(&req.filename, unix_now());
    Ok(())
}

/// `C2sWriteBegin` … `C2sWriteChunk`* … `C2sWriteEnd`: one write
/// transaction over a single connection.
///
/// The file's write lock is held for the whole transaction. A concurrent
/// writer is told so immediately instead of queueing behind an open-ended
/// client exchange. Chunks accumulate in a temp file that is renamed over
/// the target only on `WriteEnd`, and the pre-image is parked under
/// `undo/` before the rename.
pub async fn handle_write_transaction<S>(
    node: &Node,
    stream: &mut S,
    header: FrameHeader,
) -> Result<(), ProtoError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let begin: WriteBegin = frame::read_message(stream, &header).await?;
    if check_filename(&begin.filename).is_err() || check_owner(&begin.owner).is_err() {
        return frame::send_fail(stream, "invalid filename or owner").await;
    }

    let lock = node.locks.get(&begin.filename);
    let guard = match lock.try_write() {
        Ok(g) => g,
        Err(_) => {
            debug!(file = %begin.filename, "write rejected, file is write-locked");
            return frame::send_write_locked(stream).await;
        }
    };

    let path = node.paths.file(&begin.filename);

    // Park the pre-image so the transaction can be undone later.
    if path.exists() {
        if let Err(e) = std::fs::copy(&path, node.paths.undo_blob(&begin.filename)) {
            warn!(file = %begin.filename, error = %e, "cannot stage undo blob");
            return frame::send_fail(stream, "undo staging failed").await;
        }
    }

    // Staged outside files/ so a crash mid-transaction never leaves a
    // stray entry for the startup scan to adopt.
    let mut tmp = match tempfile::NamedTempFile::new_in(&node.paths.root) {
        Ok(t) => t,
        Err(e) => {
            warn!(file = %begin.filename, error = %e, "cannot create staging file");
            return frame::send_fail(stream, "staging failed").await;
        }
    };

    frame::send_ok(stream).await?;

    loop {
        let header = frame::read_header(stream).await?;
        match header.msg_kind()? {
            MsgKind::C2sWriteChunk => {
                let chunk: WriteChunk = frame::read_message(stream, &header).await?;
                if let Err(e) = tmp.as_file_mut().write_all(&chunk.bytes) {
                    warn!(file = %begin.filename, error = %e, "staging write failed");
                    return frame::send_fail(stream, "write failed").await;
                }
            }
            MsgKind::C2sWriteEnd => {
                frame::read_payload(stream, &header).await?;
                break;
            }
            other => {
                warn!(kind = ?other, "unexpected frame inside write transaction");
                return frame::send_fail(stream, "protocol error in transaction").await;
            }
        }
    }

    if let Err(e) = tmp.as_file_mut().flush() {
        warn!(file = %begin.filename, error = %e, "staging flush failed");
        return frame::send_fail(stream, "write failed").await;
    }
    if let Err(e) = tmp.as_file().sync_all() {
        warn!(file = %begin.filename, error = %e, "staging sync failed");
        return frame::send_fail(stream, "write failed").await;
    }
    if let Err(e) = tmp.persist(&path) {
        warn!(file = %begin.filename, error = %e.error, "cannot commit write transaction");
        return frame::send_fail(stream, "commit failed").await;
    }

    // Disk is committed; bring the metadata entry in line under the same
    // lock before anyone else can observe the file.
    let content = std::fs::read(&path)?;
    let (words, chars) = count_words_chars(&content);
    let now = unix_now();
    node.meta.insert(FileMetadata {
        filename: begin.filename.clone(),
        owner: begin.owner.clone(),
        file_size: content.len() as u64,
        word_count: words,
        char_count: chars,
        last_access: now,
        last_modified: now,
        is_backup: false,
    });

    frame::send_ok(stream).await?;
    drop(guard);

    node.repl.schedule_update(&begin.filename);
    info!(file = %begin.filename, owner = %begin.owner, bytes = content.len(), "write transaction committed");
    Ok(())
}

/// `C2sUndo`: restore the parked pre-image of the last write transaction.
pub async fn handle_undo<S>(node: &Node, stream: &mut S, header: FrameHeader) -> Result<(), ProtoError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let req: UndoRequest = frame::read_message(stream, &header).await?;
    if check_filename(&req.filename).is_err() {
        return frame::send_fail(stream, "invalid filename").await;
    }

    let lock = node.locks.get(&req.filename);
    let _guard = lock.write().await;

    let blob = node.paths.undo_blob(&req.filename);
    if !blob.exists() {
        return frame::send_fail(stream, "nothing to undo").await;
    }

    let path = node.paths.file(&req.filename);
    if let Err(e) = std::fs::copy(&blob, &path) {
        warn!(file = %req.filename, error = %e, "undo restore failed");
        return frame::send_fail(stream, "undo failed").await;
    }

    let content = std::fs::read(&path)?;
    let (words, chars) = count_words_chars(&content);
    let owner = node
        .meta
        .get(&req.filename)
        .map(|m| m.owner)
        .unwrap_or_default();
    let now = unix_now();
    node.meta.insert(FileMetadata {
        filename: req.filename.clone(),
        owner,
        file_size: content.len() as u64,
        word_count: words,
        char_count: chars,
        last_access: now,
        last_modified: now,
        is_backup: false,
    });

    frame::send_ok(stream).await?;
    node.repl.schedule_update(&req.filename);
    info!(file = %req.filename, "write transaction undone");
    Ok(())
}

/// `C2sCheckpoint`: snapshot the current content as an opaque blob under
/// `checkpoints/`.
pub async fn handle_checkpoint_op<S>(
    node: &Node,
    stream: &mut S,
    header: FrameHeader,
) -> Result<(), ProtoError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let req: CheckpointRequest = frame::read_message(stream, &header).await?;
    if check_filename(&req.filename).is_err() {
        return frame::send_fail(stream, "invalid filename").await;
    }

    let lock = node.locks.get(&req.filename);
    let _guard = lock.read().await;

    let path = node.paths.file(&req.filename);
    if !path.exists() {
        return frame::send_file_not_found(stream).await;
    }
    if let Err(e) = std::fs::copy(&path, node.paths.checkpoint_blob(&req.filename)) {
        warn!(file = %req.filename, error = %e, "checkpoint copy failed");
        return frame::send_fail(stream, "checkpoint failed").await;
    }

    frame::send_ok(stream).await?;
    info!(file = %req.filename, "file checkpoint taken");
    Ok(())
}

/// `N2sCreateFile`: create an empty file owned by `owner`.
pub async fn handle_create<S>(node: &Node, stream: &mut S, header: FrameHeader) -> Result<(), ProtoError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let req: CreateFile = frame::read_message(stream, &header).await?;
    if check_filename(&req.filename).is_err() || check_owner(&req.owner).is_err() {
        return frame::send_ack_fail(stream, "invalid filename or owner").await;
    }

    let lock = node.locks.get(&req.filename);
    let _guard = lock.write().await;

    let path = node.paths.file(&req.filename);
    if path.exists() {
        return frame::send_ack_fail(stream, "file already exists").await;
    }
    if let Err(e) = std::fs::File::create(&path) {
        warn!(file = %req.filename, error = %e, "create failed");
        return frame::send_ack_fail(stream, "create failed").await;
    }

    let now = unix_now();
    node.meta.insert(FileMetadata {
        filename: req.filename.clone(),
        owner: req.owner.clone(),
        file_size: 0,
        word_count: 0,
        char_count: 0,
        last_access: now,
        last_modified: now,
        is_backup: false,
    });

    frame::send_ack_ok(stream).await?;
    node.repl.schedule_update(&req.filename);
    info!(file = %req.filename, owner = %req.owner, "file created");
    Ok(())
}

/// `N2sDeleteFile`.
pub async fn handle_delete<S>(node: &Node, stream: &mut S, header: FrameHeader) -> Result<(), ProtoError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let req: FileRequest = frame::read_message(stream, &header).await?;
    if check_filename(&req.filename).is_err() {
        return frame::send_ack_fail(stream, "invalid filename").await;
    }

    let lock = node.locks.get(&req.filename);
    let _guard = lock.write().await;

    match tokio::fs::remove_file(node.paths.file(&req.filename)).await {
        Ok(()) => {}
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return frame::send_ack_fail(stream, "no such file").await;
        }
        Err(e) => {
            warn!(file = %req.filename, error = %e, "delete failed");
            return frame::send_ack_fail(stream, "delete failed").await;
        }
    }
    let _ = node.meta.remove(&req.filename);

    frame::send_ack_ok(stream).await?;
    node.repl.schedule_delete(&req.filename);
    info!(file = %req.filename, "file deleted");
    Ok(())
}

/// `N2sGetInfo`: the metadata record, serialized back in the ack payload.
pub async fn handle_get_info<S>(node: &Node, stream: &mut S, header: FrameHeader) -> Result<(), ProtoError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let req: FileRequest = frame::read_message(stream, &header).await?;
    match node.meta.get(&req.filename) {
        Some(meta) => frame::send_message(stream, MsgKind::S2nAckOk, &meta).await,
        None => frame::send_ack_fail(stream, "no metadata entry").await,
    }
}

/// `N2sGetContent`: content header plus raw bytes, for server-side
/// execution of a file by the name server.
pub async fn handle_get_content<S>(node: &Node, stream: &mut S, header: FrameHeader) -> Result<(), ProtoError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let req: FileRequest = frame::read_message(stream, &header).await?;
    if check_filename(&req.filename).is_err() {
        return frame::send_ack_fail(stream, "invalid filename").await;
    }

    let lock = node.locks.get(&req.filename);
    let _guard = lock.read().await;

    let path = node.paths.file(&req.filename);
    let mut file = match tokio::fs::File::open(&path).await {
        Ok(f) => f,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return frame::send_ack_fail(stream, "no such file").await;
        }
        Err(e) => return Err(e.into()),
    };
    let file_size = file.metadata().await?.len();

    frame::send_message(stream, MsgKind::S2nAckOk, &ContentHeader { file_size }).await?;
    copy_exact(&mut file, stream, file_size).await?;

    let _ = node.meta.update_access_time(&req.filename, unix_now());
    Ok(())
}

/// Shared read-reply path: content header then raw bytes.
async fn send_content<S>(node: &Node, stream: &mut S, filename: &str) -> Result<(), ProtoError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let path = node.paths.file(filename);
    let mut file = match tokio::fs::File::open(&path).await {
        Ok(f) => f,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return frame::send_file_not_found(stream).await;
        }
        Err(e) => return Err(e.into()),
    };
    let file_size = file.metadata().await?.len();

    frame::send_message(stream, MsgKind::S2cOk, &ContentHeader { file_size }).await?;
    copy_exact(&mut file, stream, file_size).await
}
