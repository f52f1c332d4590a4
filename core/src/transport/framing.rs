//! Length-prefixed message framing for TCP links
//!
//! Every frame is a 4-byte big-endian length followed by the payload.
//! Frames above [`MAX_MESSAGE_SIZE`] are refused on both sides; settings
//! traffic is tiny, so an oversized frame means a confused or hostile
//! peer, not a legitimate message.

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::protocol::constants::MAX_MESSAGE_SIZE;
use crate::{Error, Result};

/// Read one length-prefixed frame from an async reader.
pub async fn read_frame<R: AsyncRead + Unpin>(reader: &mut R) -> Result<Vec<u8>> {
    let mut len_buf = [0u8; 4];
    reader
        .read_exact(&mut len_buf)
        .await
        .map_err(|e| Error::Network(e.to_string()))?;

    let len = u32::from_be_bytes(len_buf) as usize;
    if len > MAX_MESSAGE_SIZE {
        return Err(Error::InvalidMessage(format!(
            "frame too large: {} bytes (max {})",
            len, MAX_MESSAGE_SIZE
        )));
    }

    let mut payload = vec![0u8; len];
    reader
        .read_exact(&mut payload)
        .await
        .map_err(|e| Error::Network(e.to_string()))?;

    Ok(payload)
}

/// Write one length-prefixed frame to an async writer.
pub async fn write_frame<W: AsyncWrite + Unpin>(writer: &mut W, payload: &[u8]) -> Result<()> {
    if payload.len() > MAX_MESSAGE_SIZE {
        return Err(Error::InvalidMessage(format!(
            "frame too large: {} bytes (max {})",
            payload.len(),
            MAX_MESSAGE_SIZE
        )));
    }

    let len_bytes = (payload.len() as u32).to_be_bytes();
    writer
        .write_all(&len_bytes)
        .await
        .map_err(|e| Error::Network(e.to_string()))?;
    writer
        .write_all(payload)
        .await
        .map_err(|e| Error::Network(e.to_string()))?;
    writer
        .flush()
        .await
        .map_err(|e| Error::Network(e.to_string()))?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[tokio::test]
    async fn test_frame_roundtrip() {
        let original = b"{\"SettingsRequest\":{\"request_id\":1}}";

        let mut buffer = Vec::new();
        write_frame(&mut buffer, original).await.unwrap();

        let mut cursor = Cursor::new(buffer);
        let result = read_frame(&mut cursor).await.unwrap();

        assert_eq!(result, original);
    }

    #[tokio::test]
    async fn test_empty_frame() {
        let mut buffer = Vec::new();
        write_frame(&mut buffer, b"").await.unwrap();

        let mut cursor = Cursor::new(buffer);
        let result = read_frame(&mut cursor).await.unwrap();

        assert!(result.is_empty());
    }

    #[tokio::test]
    async fn test_frame_too_large() {
        let oversized = vec![0u8; MAX_MESSAGE_SIZE + 1];
        let mut buffer = Vec::new();

        assert!(write_frame(&mut buffer, &oversized).await.is_err());
    }

    #[tokio::test]
    async fn test_oversized_length_prefix_refused() {
        let mut buffer = Vec::new();
        buffer.extend(((MAX_MESSAGE_SIZE + 1) as u32).to_be_bytes());
        buffer.extend(vec![0u8; 16]);

        let mut cursor = Cursor::new(buffer);
        assert!(read_frame(&mut cursor).await.is_err());
    }
}
