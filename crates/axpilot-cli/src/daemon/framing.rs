//! Length-prefixed frame I/O over async streams.

use anyhow::{bail, Context, Result};
use axpilot_core::protocol::{self, FRAME_HEADER_LEN};
use serde::Serialize;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Outcome of reading one frame.
#[derive(Debug, PartialEq, Eq)]
pub enum Frame {
    /// A complete payload.
    Message(Vec<u8>),
    /// A payload over the size limit; it has been read and discarded.
    Oversized(usize),
    /// The peer closed the stream at a frame boundary.
    Eof,
}

/// Read one frame, discarding payloads larger than `max_size`.
///
/// EOF before the first header byte is a clean close. EOF anywhere else is
/// an error.
pub async fn read_frame<R: AsyncRead + Unpin>(reader: &mut R, max_size: usize) -> Result<Frame> {
    let mut header = [0u8; FRAME_HEADER_LEN];
    let mut filled = 0;
    while filled < FRAME_HEADER_LEN {
        let n = reader
            .read(&mut header[filled..])
            .await
            .context("Failed to read frame header")?;
        if n == 0 {
            if filled == 0 {
                return Ok(Frame::Eof);
            }
            bail!("Connection closed inside a frame header");
        }
        filled += n;
    }

    let len = protocol::parse_header(header);
    if len > max_size {
        let drained = tokio::io::copy(&mut (&mut *reader).take(len as u64), &mut tokio::io::sink())
            .await
            .context("Failed to discard oversized frame")?;
        if drained < len as u64 {
            bail!("Connection closed inside an oversized frame");
        }
        return Ok(Frame::Oversized(len));
    }

    let mut payload = vec![0u8; len];
    reader
        .read_exact(&mut payload)
        .await
        .context("Connection closed inside a frame")?;
    Ok(Frame::Message(payload))
}

/// Serialize `message` and write it as one frame.
pub async fn write_frame<W: AsyncWrite + Unpin, T: Serialize>(writer: &mut W, message: &T) -> Result<()> {
    let frame = protocol::encode_frame(message).context("Failed to encode frame")?;
    writer
        .write_all(&frame)
        .await
        .context("Failed to write frame")?;
    writer.flush().await.context("Failed to flush")?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axpilot_core::protocol::Response;

    fn framed(payload: &[u8]) -> Vec<u8> {
        let mut out = (payload.len() as u32).to_be_bytes().to_vec();
        out.extend_from_slice(payload);
        out
    }

    #[tokio::test]
    async fn test_read_frame_round_trip() {
        let mut buf = Vec::new();
        write_frame(&mut buf, &Response::ok("hi")).await.unwrap();
        let mut reader = std::io::Cursor::new(buf);

        let bytes = match read_frame(&mut reader, 1024).await.unwrap() {
            Frame::Message(bytes) => bytes,
            other => panic!("expected a message, got {:?}", other),
        };
        let response: Response = protocol::decode(&bytes).unwrap();
        assert_eq!(response, Response::ok("hi"));

        assert_eq!(read_frame(&mut reader, 1024).await.unwrap(), Frame::Eof);
    }

    #[tokio::test]
    async fn test_oversized_frame_is_drained() {
        let mut data = framed(&[b'x'; 64]);
        data.extend(framed(b"{}"));
        let mut reader = std::io::Cursor::new(data);

        assert_eq!(read_frame(&mut reader, 16).await.unwrap(), Frame::Oversized(64));
        // The next frame is intact.
        assert_eq!(
            read_frame(&mut reader, 16).await.unwrap(),
            Frame::Message(b"{}".to_vec())
        );
    }

    #[tokio::test]
    async fn test_truncated_frames_are_errors() {
        let mut reader = std::io::Cursor::new(vec![0u8, 0]);
        assert!(read_frame(&mut reader, 16).await.is_err());

        let mut data = framed(b"abcdef");
        data.truncate(7);
        let mut reader = std::io::Cursor::new(data);
        assert!(read_frame(&mut reader, 16).await.is_err());
    }

    #[tokio::test]
    async fn test_header_split_across_reads() {
        let (mut client, mut server) = tokio::io::duplex(2);
        let writer = tokio::spawn(async move {
            client.write_all(&framed(b"[1,2,3]")).await.unwrap();
        });
        let frame = read_frame(&mut server, 1024).await.unwrap();
        assert_eq!(frame, Frame::Message(b"[1,2,3]".to_vec()));
        writer.await.unwrap();
    }
}
