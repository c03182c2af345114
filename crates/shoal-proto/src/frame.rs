//! Async frame I/O.
//!
//! Send paths write the 8-byte header then the payload with `write_all`;
//! receive paths use `read_exact`, so short reads only surface as a closed
//! peer or an OS error. An orderly close while waiting for a header maps
//! to [`ProtoError::PeerClosed`].

use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::messages::ErrorReply;
use crate::{FrameHeader, MsgKind, ProtoError, Result, MAX_PAYLOAD};

/// Send one frame: header, then exactly `payload.len()` bytes.
pub async fn send_frame<W: AsyncWrite + Unpin>(
    w: &mut W,
    kind: MsgKind,
    payload: &[u8],
) -> Result<()> {
    if payload.len() > MAX_PAYLOAD {
        return Err(ProtoError::PayloadTooLarge(payload.len()));
    }
    let header = FrameHeader::new(kind, payload.len() as u32);
    w.write_all(&header.to_bytes()).await?;
    if !payload.is_empty() {
        w.write_all(payload).await?;
    }
    w.flush().await?;
    Ok(())
}

/// Bincode-encode `msg` and send it as a frame of the given kind.
pub async fn send_message<W, T>(w: &mut W, kind: MsgKind, msg: &T) -> Result<()>
where
    W: AsyncWrite + Unpin,
    T: Serialize,
{
    let payload =
        bincode::serialize(msg).map_err(|e| ProtoError::Decode(e.to_string()))?;
    send_frame(w, kind, &payload).await
}

/// Read one frame header.
pub async fn read_header<R: AsyncRead + Unpin>(r: &mut R) -> Result<FrameHeader> {
    let mut buf = [0u8; FrameHeader::SIZE];
    match r.read_exact(&mut buf).await {
        Ok(_) => {}
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
            return Err(ProtoError::PeerClosed)
        }
        Err(e) => return Err(e.into()),
    }
    Ok(FrameHeader::from_bytes(&buf))
}

/// Read the payload announced by `header`.
pub async fn read_payload<R: AsyncRead + Unpin>(
    r: &mut R,
    header: &FrameHeader,
) -> Result<Vec<u8>> {
    let len = header.len as usize;
    if len > MAX_PAYLOAD {
        return Err(ProtoError::PayloadTooLarge(len));
    }
    let mut payload = vec![0u8; len];
    match r.read_exact(&mut payload).await {
        Ok(_) => Ok(payload),
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => Err(ProtoError::PeerClosed),
        Err(e) => Err(e.into()),
    }
}

/// Read and decode the payload announced by `header`.
pub async fn read_message<R, T>(r: &mut R, header: &FrameHeader) -> Result<T>
where
    R: AsyncRead + Unpin,
    T: DeserializeOwned,
{
    let payload = read_payload(r, header).await?;
    bincode::deserialize(&payload).map_err(|e| ProtoError::Decode(e.to_string()))
}

/// Read a full frame, requiring it to be of `expected` kind.
pub async fn expect_message<R, T>(r: &mut R, expected: MsgKind) -> Result<T>
where
    R: AsyncRead + Unpin,
    T: DeserializeOwned,
{
    let header = read_header(r).await?;
    let got = header.msg_kind()?;
    if got != expected {
        return Err(ProtoError::UnexpectedKind { expected, got });
    }
    read_message(r, &header).await
}

/// Read a payload-less frame of `expected` kind, discarding any payload.
pub async fn expect_frame<R: AsyncRead + Unpin>(r: &mut R, expected: MsgKind) -> Result<()> {
    let header = read_header(r).await?;
    let got = header.msg_kind()?;
    if got != expected {
        return Err(ProtoError::UnexpectedKind { expected, got });
    }
    read_payload(r, &header).await?;
    Ok(())
}

// ---------------------------------------------------------------------------
// Canned replies. Receivers branch on the frame kind alone, so most of
// these carry no payload.
// ---------------------------------------------------------------------------

pub async fn send_ok<W: AsyncWrite + Unpin>(w: &mut W) -> Result<()> {
    send_frame(w, MsgKind::S2cOk, &[]).await
}

pub async fn send_fail<W: AsyncWrite + Unpin>(w: &mut W, reason: &str) -> Result<()> {
    send_message(
        w,
        MsgKind::S2cFail,
        &ErrorReply {
            reason: reason.to_string(),
        },
    )
    .await
}

pub async fn send_write_locked<W: AsyncWrite + Unpin>(w: &mut W) -> Result<()> {
    send_frame(w, MsgKind::S2cWriteLocked, &[]).await
}

pub async fn send_file_not_found<W: AsyncWrite + Unpin>(w: &mut W) -> Result<()> {
    send_frame(w, MsgKind::S2cFileNotFound, &[]).await
}

pub async fn send_ack<W: AsyncWrite + Unpin>(w: &mut W) -> Result<()> {
    send_frame(w, MsgKind::S2sAck, &[]).await
}

pub async fn send_ack_ok<W: AsyncWrite + Unpin>(w: &mut W) -> Result<()> {
    send_frame(w, MsgKind::S2nAckOk, &[]).await
}

pub async fn send_ack_fail<W: AsyncWrite + Unpin>(w: &mut W, reason: &str) -> Result<()> {
    send_message(
        w,
        MsgKind::S2nAckFail,
        &ErrorReply {
            reason: reason.to_string(),
        },
    )
    .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::messages::{DeleteFile, ReplicateFile};

    #[tokio::test]
    async fn frame_round_trip() {
        let (mut client, mut server) = tokio::io::duplex(4096);

        let req = ReplicateFile {
            filename: "b.txt".into(),
            owner: "alice".into(),
            file_size: 5,
        };
        send_message(&mut client, MsgKind::S2sReplicateFile, &req)
            .await
            .unwrap();

        let header = read_header(&mut server).await.unwrap();
        assert_eq!(header.msg_kind().unwrap(), MsgKind::S2sReplicateFile);
        let decoded: ReplicateFile = read_message(&mut server, &header).await.unwrap();
        assert_eq!(decoded.filename, "b.txt");
        assert_eq!(decoded.file_size, 5);
    }

    #[tokio::test]
    async fn empty_payload_frames() {
        let (mut client, mut server) = tokio::io::duplex(64);

        send_ack(&mut client).await.unwrap();
        let header = read_header(&mut server).await.unwrap();
        assert_eq!(header.msg_kind().unwrap(), MsgKind::S2sAck);
        assert_eq!(header.len, 0);
        assert!(read_payload(&mut server, &header).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn orderly_close_maps_to_peer_closed() {
        let (client, mut server) = tokio::io::duplex(64);
        drop(client);

        assert!(matches!(
            read_header(&mut server).await,
            Err(ProtoError::PeerClosed)
        ));
    }

    #[tokio::test]
    async fn truncated_payload_maps_to_peer_closed() {
        let (mut client, mut server) = tokio::io::duplex(64);

        // Header claims 100 bytes; only 3 arrive before the close.
        let header = FrameHeader::new(MsgKind::C2sWriteChunk, 100);
        client.write_all(&header.to_bytes()).await.unwrap();
        client.write_all(b"abc").await.unwrap();
        drop(client);

        let header = read_header(&mut server).await.unwrap();
        assert!(matches!(
            read_payload(&mut server, &header).await,
            Err(ProtoError::PeerClosed)
        ));
    }

    #[tokio::test]
    async fn oversized_payload_is_rejected_without_reading() {
        let (mut client, mut server) = tokio::io::duplex(64);

        let header = FrameHeader::new(MsgKind::C2sWriteChunk, (MAX_PAYLOAD + 1) as u32);
        client.write_all(&header.to_bytes()).await.unwrap();

        let header = read_header(&mut server).await.unwrap();
        assert!(matches!(
            read_payload(&mut server, &header).await,
            Err(ProtoError::PayloadTooLarge(_))
        ));
    }

    #[tokio::test]
    async fn expect_message_rejects_wrong_kind() {
        let (mut client, mut server) = tokio::io::duplex(4096);

        send_message(
            &mut client,
            MsgKind::S2sDeleteFile,
            &DeleteFile {
                filename: "a.txt".into(),
            },
        )
        .await
        .unwrap();

        let err = expect_message::<_, ReplicateFile>(&mut server, MsgKind::S2sReplicateFile)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            ProtoError::UnexpectedKind {
                expected: MsgKind::S2sReplicateFile,
                got: MsgKind::S2sDeleteFile,
            }
        ));
    }
}
