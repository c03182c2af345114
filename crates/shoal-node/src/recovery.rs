//! Name-server-driven recovery between a primary and its backup peer.
//!
//! The sweep only ever takes per-file locks. Files not currently in
//! flight stay fully serviceable, and a broken socket aborts the rest of
//! the sweep while keeping everything already committed to disk.

use std::sync::Arc;

use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tracing::{error, info, warn};

use shoal_meta::FileMetadata;
use shoal_proto::messages::{check_filename, FileList, ReplicateFile, StartRecovery};
use shoal_proto::{frame, FrameHeader, MsgKind, ProtoError};

use crate::node::{unix_now, Node};
use crate::replicate::{copy_exact, receive_file_bytes};

/// Regular-file names currently present in the files directory.
fn list_files(node: &Node) -> std::io::Result<Vec<String>> {
    let mut names = Vec::new();
    for entry in std::fs::read_dir(&node.paths.files)? {
        let entry = entry?;
        if entry.file_type()?.is_file() {
            names.push(entry.file_name().to_string_lossy().into_owned());
        }
    }
    names.sort();
    Ok(names)
}

/// We are the backup: push our full file set to a revived primary.
pub async fn sync_from_backup(node: &Arc<Node>, target_ip: &str, target_port: u16) -> Result<(), ProtoError> {
    let addr = format!("{target_ip}:{target_port}");
    info!(peer = %addr, "starting recovery push");

    let names = list_files(node)?;

    // Metadata records drive the transfer; a file on disk without an
    // entry is a consistency fault we report and leave out rather than
    // papering over with synthesized metadata.
    let mut files = Vec::with_capacity(names.len());
    for name in &names {
        match node.meta.get(name) {
            Some(meta) => files.push(meta),
            None => error!(file = %name, "file on disk without metadata entry, not sending"),
        }
    }

    let mut sock = TcpStream::connect(&addr).await?;
    frame::send_message(
        &mut sock,
        MsgKind::S2sStartRecovery,
        &StartRecovery {
            ss_id: node.ss_id,
            is_primary_recovery: true,
        },
    )
    .await?;
    frame::send_message(&mut sock, MsgKind::S2sFileList, &FileList { files: files.clone() })
        .await?;

    for meta in &files {
        let lock = node.locks.get(&meta.filename);
        let _guard = lock.read().await;

        let path = node.paths.file(&meta.filename);
        let mut file = tokio::fs::File::open(&path).await?;
        let file_size = file.metadata().await?.len();

        frame::send_message(
            &mut sock,
            MsgKind::S2sReplicateFile,
            &ReplicateFile {
                filename: meta.filename.clone(),
                owner: meta.owner.clone(),
                file_size,
            },
        )
        .await?;
        copy_exact(&mut file, &mut sock, file_size).await?;
        frame::expect_frame(&mut sock, MsgKind::S2sAck).await?;
    }

    frame::send_frame(&mut sock, MsgKind::S2sRecoveryComplete, &[]).await?;
    info!(peer = %addr, files = files.len(), "recovery push complete");
    Ok(())
}

/// We are the primary and a new backup was assigned: feed every primary
/// file through the normal replication pipeline.
pub async fn re_replicate_all(node: &Node) -> std::io::Result<u32> {
    let mut scheduled = 0;
    for name in list_files(node)? {
        match node.meta.get(&name) {
            Some(meta) if !meta.is_backup => {
                node.repl.schedule_update(&name);
                scheduled += 1;
            }
            Some(_) => {}
            None => warn!(file = %name, "file on disk without metadata entry, not re-replicating"),
        }
    }
    info!(scheduled, "re-replication of primary files scheduled");
    Ok(scheduled)
}

/// Inbound side of a recovery sweep; `header` is the already-read
/// `S2sStartRecovery` frame header.
pub async fn handle_start_recovery<S>(node: &Node, stream: &mut S, header: FrameHeader) -> Result<(), ProtoError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let start: StartRecovery = frame::read_message(stream, &header).await?;
    info!(
        from_ss_id = start.ss_id,
        primary_recovery = start.is_primary_recovery,
        "inbound recovery sweep"
    );

    // Clear phase: the incoming set replaces everything we hold.
    for name in list_files(node)? {
        let lock = node.locks.get(&name);
        let _guard = lock.write().await;
        match tokio::fs::remove_file(node.paths.file(&name)).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }
        let _ = node.meta.remove(&name);
    }

    let list: FileList = frame::expect_message(stream, MsgKind::S2sFileList).await?;
    let expected = list.files.len();

    // The sender claiming primary-recovery means we are the revived
    // primary, so the incoming entries are ours; otherwise this is a
    // backup refresh and they stay marked as replicas.
    let install_as_backup = !start.is_primary_recovery;

    let mut received = 0usize;
    while received < expected {
        let header = frame::read_header(stream).await?;
        match header.msg_kind()? {
            MsgKind::S2sRecoveryComplete => {
                frame::read_payload(stream, &header).await?;
                warn!(received, expected, "recovery sweep ended short");
                return Ok(());
            }
            MsgKind::S2sReplicateFile => {}
            other => {
                return Err(ProtoError::UnexpectedKind {
                    expected: MsgKind::S2sReplicateFile,
                    got: other,
                })
            }
        }

        let req: ReplicateFile = frame::read_message(stream, &header).await?;
        check_filename(&req.filename)?;

        let lock = node.locks.get(&req.filename);
        let _guard = lock.write().await;

        receive_file_bytes(stream, &node.paths.file(&req.filename), req.file_size).await?;

        // Prefer the announced record for counts and times; it reflects
        // the sender's authoritative view.
        let announced = list.files.iter().find(|m| m.filename == req.filename);
        let now = unix_now();
        node.meta.insert(FileMetadata {
            filename: req.filename.clone(),
            owner: req.owner.clone(),
            file_size: req.file_size,
            word_count: announced.map_or(0, |m| m.word_count),
            char_count: announced.map_or(0, |m| m.char_count),
            last_access: announced.map_or(now, |m| m.last_access),
            last_modified: announced.map_or(now, |m| m.last_modified),
            is_backup: install_as_backup,
        });

        frame::send_ack(stream).await?;
        received += 1;
    }

    // The sender closes the sweep explicitly; tolerate a peer that just
    // hangs up after the last ack.
    match frame::read_header(stream).await {
        Ok(header) => {
            if header.msg_kind()? == MsgKind::S2sRecoveryComplete {
                frame::read_payload(stream, &header).await?;
            }
        }
        Err(ProtoError::PeerClosed) => {}
        Err(e) => return Err(e),
    }

    info!(received, "inbound recovery sweep complete");
    Ok(())
}
