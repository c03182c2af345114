//! Frame payload types.
//!
//! All payloads are bincode-encoded serde structs. Payloads that carry a
//! filename or owner are validated with [`check_filename`]/[`check_owner`]
//! before the node acts on them, since both end up in filesystem paths.

use serde::{Deserialize, Serialize};

use crate::{FileMetadata, ProtoError, Result, MAX_FILENAME, MAX_USERNAME};

/// Reject names that are empty, oversized, or could escape the data
/// directory.
pub fn check_filename(name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(ProtoError::Decode("empty filename".into()));
    }
    if name.len() > MAX_FILENAME {
        return Err(ProtoError::FieldTooLong {
            field: "filename",
            limit: MAX_FILENAME,
        });
    }
    if name.contains('/') || name.contains('\0') || name == "." || name == ".." {
        return Err(ProtoError::Decode(format!("unsafe filename {name:?}")));
    }
    Ok(())
}

pub fn check_owner(owner: &str) -> Result<()> {
    if owner.len() > MAX_USERNAME {
        return Err(ProtoError::FieldTooLong {
            field: "owner",
            limit: MAX_USERNAME,
        });
    }
    if owner.contains('\0') {
        return Err(ProtoError::Decode("owner contains NUL".into()));
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Registration and name-server channel
// ---------------------------------------------------------------------------

/// `S2nRegister`: first frame a node sends on its name-server channel.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegisterRequest {
    pub ip: String,
    pub client_port: u16,
    /// Where peers reach this node's replication listener; advertised so
    /// the name server can hand it to whichever node we back up.
    pub backup_ip: String,
    pub backup_port: u16,
    pub file_count: u32,
}

/// `N2sRegisterAck`: the name server's reply to a registration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegisterAck {
    pub new_ss_id: i32,
    /// Id of the node we act as backup for, or -1 when unassigned.
    pub backup_of_ss_id: i32,
    /// Our own backup target; an empty ip or zero port means none yet.
    pub backup_ss_ip: String,
    pub backup_ss_port: u16,
    /// When set, the node holds off and waits for name-server-driven
    /// recovery before serving its old file set as authoritative.
    pub must_recover: bool,
}

/// `S2nHeartbeat`, sent on the name-server channel at a fixed interval.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Heartbeat {
    pub ss_id: i32,
}

/// `N2sUpdateBackup`: replace this node's backup target at runtime.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpdateBackup {
    pub backup_ip: String,
    pub backup_port: u16,
}

/// `N2sSyncFromBackup`: we hold the replicas; push them to a revived
/// primary at the given address.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncFromBackup {
    pub target_ip: String,
    pub target_port: u16,
}

// ---------------------------------------------------------------------------
// Peer replication and recovery
// ---------------------------------------------------------------------------

/// `S2sReplicateFile`: announces one file; exactly `file_size` raw bytes
/// follow the frame on the same stream.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReplicateFile {
    pub filename: String,
    pub owner: String,
    pub file_size: u64,
}

/// `S2sDeleteFile`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeleteFile {
    pub filename: String,
}

/// `S2sStartRecovery`: opens a bulk transfer sweep.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StartRecovery {
    pub ss_id: i32,
    /// True when the sender is a backup restoring a revived primary; the
    /// receiver then installs the incoming set as primary entries.
    pub is_primary_recovery: bool,
}

/// `S2sFileList`: the full metadata set for a recovery sweep. The record
/// count doubles as the number of `S2sReplicateFile` transfers to expect.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileList {
    pub files: Vec<FileMetadata>,
}

// ---------------------------------------------------------------------------
// Client operations
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReadRequest {
    pub filename: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamRequest {
    pub filename: String,
}

/// `C2sWriteBegin`: opens a write transaction; the connection then carries
/// `C2sWriteChunk` frames and a closing `C2sWriteEnd`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WriteBegin {
    pub filename: String,
    pub owner: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WriteChunk {
    pub bytes: Vec<u8>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UndoRequest {
    pub filename: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckpointRequest {
    pub filename: String,
}

/// Name-server file operations carry the same shape.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateFile {
    pub filename: String,
    pub owner: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileRequest {
    pub filename: String,
}

// ---------------------------------------------------------------------------
// Replies
// ---------------------------------------------------------------------------

/// Payload of an `S2cOk` reply to read/stream/get-content: raw file bytes
/// of the announced size follow the frame.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContentHeader {
    pub file_size: u64,
}

/// Payload of `S2cFail` / `S2nAckFail`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorReply {
    pub reason: String,
}
