//! # shoal-proto
//!
//! Wire protocol spoken between clients, the name server, and storage
//! nodes. Every conversation is a sequence of self-delimiting frames:
//!
//! ```text
//! ┌────────────┬───────────────┬──────────────────┐
//! │ kind (u32) │ payload (u32) │ payload bytes    │
//! │ LE         │ length, LE    │ bincode-encoded  │
//! └────────────┴───────────────┴──────────────────┘
//! ```
//!
//! No framing state survives across calls; a frame is fully described by
//! its own header. Bulk file content is not framed: a `ReplicateFile` or
//! read reply frame announces `file_size` and the raw bytes follow on the
//! same stream.

pub mod frame;
pub mod messages;

pub use shoal_meta::FileMetadata;

/// Hard ceiling on a single frame payload. File content travels outside
/// frames, so control payloads never come close to this.
pub const MAX_PAYLOAD: usize = 16 * 1024 * 1024;

/// Longest accepted filename, in bytes.
pub const MAX_FILENAME: usize = 256;

/// Longest accepted owner name, in bytes.
pub const MAX_USERNAME: usize = 64;

#[derive(Debug, thiserror::Error)]
pub enum ProtoError {
    #[error("peer closed the connection")]
    PeerClosed,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("unknown message kind {0:#06x}")]
    UnknownKind(u32),

    #[error("unexpected message kind {got:?} (expected {expected:?})")]
    UnexpectedKind { expected: MsgKind, got: MsgKind },

    #[error("payload of {0} bytes exceeds the frame limit")]
    PayloadTooLarge(usize),

    #[error("malformed payload: {0}")]
    Decode(String),

    #[error("{field} exceeds {limit} bytes")]
    FieldTooLong { field: &'static str, limit: usize },
}

pub type Result<T> = std::result::Result<T, ProtoError>;

/// Every message kind on the wire, grouped by direction.
///
/// Discriminant ranges are part of the protocol: `0x1___` client → storage,
/// `0x2___` name server → storage, `0x3___` storage → name server,
/// `0x4___` storage ↔ storage, `0x5___` storage → client.
#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MsgKind {
    // Client → storage node.
    C2sRead = 0x1001,
    C2sStream = 0x1002,
    C2sWriteBegin = 0x1003,
    C2sWriteChunk = 0x1004,
    C2sWriteEnd = 0x1005,
    C2sUndo = 0x1006,
    C2sCheckpoint = 0x1007,

    // Name server → storage node.
    N2sCreateFile = 0x2001,
    N2sDeleteFile = 0x2002,
    N2sGetInfo = 0x2003,
    N2sGetContent = 0x2004,
    N2sSyncFromBackup = 0x2005,
    N2sSyncToPrimary = 0x2006,
    N2sReReplicateAll = 0x2007,
    N2sUpdateBackup = 0x2008,
    N2sRegisterAck = 0x2009,

    // Storage node → name server.
    S2nRegister = 0x3001,
    S2nHeartbeat = 0x3002,
    S2nAckOk = 0x3003,
    S2nAckFail = 0x3004,

    // Storage node ↔ storage node.
    S2sReplicateFile = 0x4001,
    S2sDeleteFile = 0x4002,
    S2sStartRecovery = 0x4003,
    S2sFileList = 0x4004,
    S2sAck = 0x4005,
    S2sRecoveryComplete = 0x4006,

    // Storage node → client.
    S2cOk = 0x5001,
    S2cFail = 0x5002,
    S2cWriteLocked = 0x5003,
    S2cFileNotFound = 0x5004,
}

impl TryFrom<u32> for MsgKind {
    type Error = ProtoError;

    fn try_from(value: u32) -> Result<Self> {
        use MsgKind::*;
        Ok(match value {
            0x1001 => C2sRead,
            0x1002 => C2sStream,
            0x1003 => C2sWriteBegin,
            0x1004 => C2sWriteChunk,
            0x1005 => C2sWriteEnd,
            0x1006 => C2sUndo,
            0x1007 => C2sCheckpoint,
            0x2001 => N2sCreateFile,
            0x2002 => N2sDeleteFile,
            0x2003 => N2sGetInfo,
            0x2004 => N2sGetContent,
            0x2005 => N2sSyncFromBackup,
            0x2006 => N2sSyncToPrimary,
            0x2007 => N2sReReplicateAll,
            0x2008 => N2sUpdateBackup,
            0x2009 => N2sRegisterAck,
            0x3001 => S2nRegister,
            0x3002 => S2nHeartbeat,
            0x3003 => S2nAckOk,
            0x3004 => S2nAckFail,
            0x4001 => S2sReplicateFile,
            0x4002 => S2sDeleteFile,
            0x4003 => S2sStartRecovery,
            0x4004 => S2sFileList,
            0x4005 => S2sAck,
            0x4006 => S2sRecoveryComplete,
            0x5001 => S2cOk,
            0x5002 => S2cFail,
            0x5003 => S2cWriteLocked,
            0x5004 => S2cFileNotFound,
            other => return Err(ProtoError::UnknownKind(other)),
        })
    }
}

/// Fixed 8-byte frame header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    pub kind: u32,
    pub len: u32,
}

impl FrameHeader {
    pub const SIZE: usize = 8;

    pub fn new(kind: MsgKind, len: u32) -> Self {
        Self {
            kind: kind as u32,
            len,
        }
    }

    /// Decoded message kind, or an error for a discriminant this build
    /// does not know.
    pub fn msg_kind(&self) -> Result<MsgKind> {
        MsgKind::try_from(self.kind)
    }

    pub fn to_bytes(&self) -> [u8; Self::SIZE] {
        let mut bytes = [0u8; Self::SIZE];
        bytes[0..4].copy_from_slice(&self.kind.to_le_bytes());
        bytes[4..8].copy_from_slice(&self.len.to_le_bytes());
        bytes
    }

    pub fn from_bytes(bytes: &[u8; Self::SIZE]) -> Self {
        Self {
            kind: u32::from_le_bytes(bytes[0..4].try_into().unwrap()),
            len: u32::from_le_bytes(bytes[4..8].try_into().unwrap()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_is_eight_bytes() {
        assert_eq!(FrameHeader::SIZE, 8);
    }

    #[test]
    fn header_round_trip() {
        let header = FrameHeader::new(MsgKind::S2sReplicateFile, 1234);
        let decoded = FrameHeader::from_bytes(&header.to_bytes());
        assert_eq!(decoded, header);
        assert_eq!(decoded.msg_kind().unwrap(), MsgKind::S2sReplicateFile);
        assert_eq!(decoded.len, 1234);
    }

    #[test]
    fn header_bytes_are_little_endian() {
        let header = FrameHeader::new(MsgKind::C2sRead, 5);
        let bytes = header.to_bytes();
        assert_eq!(bytes, [0x01, 0x10, 0x00, 0x00, 0x05, 0x00, 0x00, 0x00]);
    }

    #[test]
    fn unknown_kind_is_rejected() {
        let header = FrameHeader { kind: 0xdead, len: 0 };
        assert!(matches!(
            header.msg_kind(),
            Err(ProtoError::UnknownKind(0xdead))
        ));
    }

    #[test]
    fn every_kind_round_trips_through_u32() {
        use MsgKind::*;
        for kind in [
            C2sRead,
            C2sStream,
            C2sWriteBegin,
            C2sWriteChunk,
            C2sWriteEnd,
            C2sUndo,
            C2sCheckpoint,
            N2sCreateFile,
            N2sDeleteFile,
            N2sGetInfo,
            N2sGetContent,
            N2sSyncFromBackup,
            N2sSyncToPrimary,
            N2sReReplicateAll,
            N2sUpdateBackup,
            N2sRegisterAck,
            S2nRegister,
            S2nHeartbeat,
            S2nAckOk,
            S2nAckFail,
            S2sReplicateFile,
            S2sDeleteFile,
            S2sStartRecovery,
            S2sFileList,
            S2sAck,
            S2sRecoveryComplete,
            S2cOk,
            S2cFail,
            S2cWriteLocked,
            S2cFileNotFound,
        ] {
            assert_eq!(MsgKind::try_from(kind as u32).unwrap(), kind);
        }
    }
}
