//! Connection dispatcher.
//!
//! Two accept loops: the client-facing listener spawns a task per
//! connection, the replication-facing listener handles each connection
//! inline. Inbound replication writes shared disk and metadata for
//! arbitrary files, so serializing it at the accept site keeps the
//! receiver simple at the cost of parallelism.

use std::sync::Arc;

use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;
use tracing::{debug, error, warn};

use shoal_proto::{frame, MsgKind, ProtoError};

use crate::node::Node;
use crate::{control, fileops, recovery, replicate};

/// Client-facing accept loop.
pub async fn run_client_listener(
    node: Arc<Node>,
    listener: TcpListener,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        tokio::select! {
            accepted = listener.accept() => match accepted {
                Ok((stream, peer)) => {
                    debug!(%peer, "client connection accepted");
                    let node = Arc::clone(&node);
                    tokio::spawn(async move {
                        if let Err(e) = handle_client_conn(node, stream).await {
                            warn!(%peer, error = %e, "connection handler failed");
                        }
                    });
                }
                Err(e) => error!(error = %e, "client accept failed"),
            },
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
            }
        }
    }
    debug!("client listener stopped");
}

/// Replication-facing accept loop. One request per connection, processed
/// inline on this task.
pub async fn run_repl_listener(
    node: Arc<Node>,
    listener: TcpListener,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        tokio::select! {
            accepted = listener.accept() => match accepted {
                Ok((mut stream, peer)) => {
                    debug!(%peer, "peer connection accepted");
                    let result = async {
                        let header = frame::read_header(&mut stream).await?;
                        match header.msg_kind()? {
                            MsgKind::S2sStartRecovery => {
                                recovery::handle_start_recovery(&node, &mut stream, header).await
                            }
                            _ => replicate::handle_peer_frame(&node, &mut stream, header).await,
                        }
                    }
                    .await;
                    if let Err(e) = result {
                        warn!(%peer, error = %e, "peer request failed");
                    }
                }
                Err(e) => error!(error = %e, "replication accept failed"),
            },
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
            }
        }
    }
    debug!("replication listener stopped");
}

/// One client/name-server connection: read the first header, route on its
/// kind, close when the handler returns.
pub async fn handle_client_conn(node: Arc<Node>, mut stream: TcpStream) -> Result<(), ProtoError> {
    let header = match frame::read_header(&mut stream).await {
        Ok(h) => h,
        // A probe that connects and hangs up is routine, not an error.
        Err(ProtoError::PeerClosed) => return Ok(()),
        Err(e) => return Err(e),
    };

    let kind = match header.msg_kind() {
        Ok(k) => k,
        Err(e) => {
            warn!(error = %e, "unroutable frame, closing connection");
            return Ok(());
        }
    };

    match kind {
        // Client file operations.
        MsgKind::C2sRead => fileops::handle_read(&node, &mut stream, header).await,
        MsgKind::C2sStream => fileops::handle_stream(&node, &mut stream, header).await,
        MsgKind::C2sWriteBegin => {
            fileops::handle_write_transaction(&node, &mut stream, header).await
        }
        MsgKind::C2sUndo => fileops::handle_undo(&node, &mut stream, header).await,
        MsgKind::C2sCheckpoint => fileops::handle_checkpoint_op(&node, &mut stream, header).await,

        // Name-server file operations, single-shot over this connection.
        MsgKind::N2sCreateFile => fileops::handle_create(&node, &mut stream, header).await,
        MsgKind::N2sDeleteFile => fileops::handle_delete(&node, &mut stream, header).await,
        MsgKind::N2sGetInfo => fileops::handle_get_info(&node, &mut stream, header).await,
        MsgKind::N2sGetContent => fileops::handle_get_content(&node, &mut stream, header).await,

        // Control kinds are accepted here as well as on the dedicated
        // name-server channel.
        MsgKind::N2sUpdateBackup
        | MsgKind::N2sReReplicateAll
        | MsgKind::N2sSyncFromBackup
        | MsgKind::N2sSyncToPrimary => control::dispatch_control(&node, &mut stream, header).await,

        // Peer traffic that arrived on the client port.
        MsgKind::S2sReplicateFile | MsgKind::S2sDeleteFile => {
            replicate::handle_peer_frame(&node, &mut stream, header).await
        }
        MsgKind::S2sStartRecovery => {
            recovery::handle_start_recovery(&node, &mut stream, header).await
        }

        other => {
            warn!(kind = ?other, "frame kind not valid as a request, closing");
            Ok(())
        }
    }
}
