//! Length-prefixed framing: a 4-byte big-endian length `L` followed by
//! exactly `L` bytes of payload, usable over any async byte stream (a
//! client socket or a worker's stdio pipe).

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

#[derive(Debug, thiserror::Error)]
pub enum FramingError {
    #[error("connection closed before a complete frame was read")]
    Eof,
    #[error("frame of {len} bytes exceeds the {max} byte limit")]
    TooLarge { len: u32, max: u32 },
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Reads one length-prefixed frame, rejecting the length before allocating
/// the buffer if it exceeds `max_payload_bytes`.
pub async fn read_frame<R: AsyncRead + Unpin>(
    reader: &mut R,
    max_payload_bytes: u32,
) -> Result<Vec<u8>, FramingError> {
    let mut len_buf = [0u8; 4];
    match reader.read_exact(&mut len_buf).await {
        Ok(()) => {}
        Err(err) if err.kind() == std::io::ErrorKind::UnexpectedEof => {
            return Err(FramingError::Eof);
        }
        Err(err) => return Err(FramingError::Io(err)),
    }
    let len = u32::from_be_bytes(len_buf);
    if len > max_payload_bytes {
        return Err(FramingError::TooLarge {
            len,
            max: max_payload_bytes,
        });
    }

    let mut payload = vec![0u8; len as usize];
    reader
        .read_exact(&mut payload)
        .await
        .map_err(|err| match err.kind() {
            std::io::ErrorKind::UnexpectedEof => FramingError::Eof,
            _ => FramingError::Io(err),
        })?;
    Ok(payload)
}

/// Writes one length-prefixed frame as a single coordinated write sequence
/// so it cannot be interleaved with a concurrent frame on the same stream.
pub async fn write_frame<W: AsyncWrite + Unpin>(
    writer: &mut W,
    payload: &[u8],
) -> Result<(), FramingError> {
    let len: u32 = payload
        .len()
        .try_into()
        .map_err(|_| FramingError::TooLarge {
            len: u32::MAX,
            max: u32::MAX,
        })?;

    let mut buf = Vec::with_capacity(4 + payload.len());
    buf.extend_from_slice(&len.to_be_bytes());
    buf.extend_from_slice(payload);
    writer.write_all(&buf).await?;
    writer.flush().await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[tokio::test]
    async fn round_trips_a_frame() {
        let mut buf = Vec::new();
        write_frame(&mut buf, b"hello").await.unwrap();

        let mut cursor = Cursor::new(buf);
        let payload = read_frame(&mut cursor, 1024).await.unwrap();
        assert_eq!(payload, b"hello");
    }

    #[tokio::test]
    async fn rejects_oversized_frame_without_reading_payload() {
        let mut buf = Vec::new();
        write_frame(&mut buf, &vec![0u8; 2048]).await.unwrap();

        let mut cursor = Cursor::new(buf);
        let err = read_frame(&mut cursor, 1024).await.unwrap_err();
        assert!(matches!(err, FramingError::TooLarge { len: 2048, max: 1024 }));
    }

    #[tokio::test]
    async fn empty_stream_is_eof() {
        let mut cursor = Cursor::new(Vec::<u8>::new());
        let err = read_frame(&mut cursor, 1024).await.unwrap_err();
        assert!(matches!(err, FramingError::Eof));
    }

    #[tokio::test]
    async fn frame_at_exact_limit_is_accepted() {
        let mut buf = Vec::new();
        write_frame(&mut buf, &vec![7u8; 1024]).await.unwrap();

        let mut cursor = Cursor::new(buf);
        let payload = read_frame(&mut cursor, 1024).await.unwrap();
        assert_eq!(payload.len(), 1024);
    }
}
