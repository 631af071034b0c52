//! Job protocol wire framing (spec §4.6): two independent TCP channels,
//! both using `uint32 header_len` + JSON header + `uint64 payload_size` +
//! raw payload bytes, all integers network byte order.

pub mod dispatch;
pub mod upload;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::time::{timeout, Duration};

use crate::error::FarmError;

/// Metadata reads/writes use a short timeout; payload bodies are only
/// bounded by connection inactivity (spec §4.6).
pub const METADATA_TIMEOUT: Duration = Duration::from_secs(10);

/// Payload bodies have no total timeout, but a connection that goes quiet
/// mid-transfer is dropped after this long without forward progress (spec
/// §5). Applied per chunk, not to the transfer as a whole.
pub const PAYLOAD_IDLE_TIMEOUT: Duration = Duration::from_secs(60);

const PAYLOAD_CHUNK: usize = 64 * 1024;

/// A short read (peer closed before sending the declared byte count) is a
/// protocol integrity violation, not a transient network error (spec §7).
fn payload_read_error(err: std::io::Error) -> FarmError {
    if err.kind() == std::io::ErrorKind::UnexpectedEof {
        FarmError::IntegrityError(format!("payload truncated: {err}"))
    } else {
        FarmError::NetworkError(err.to_string())
    }
}

/// Writes `uint32 header_len` followed by `header` itself.
pub async fn write_header<W: AsyncWrite + Unpin>(writer: &mut W, header: &[u8]) -> Result<(), FarmError> {
    let len: u32 = header
        .len()
        .try_into()
        .map_err(|_| FarmError::IntegrityError("header too large".into()))?;
    timeout(METADATA_TIMEOUT, async {
        writer.write_u32(len).await?;
        writer.write_all(header).await
    })
    .await
    .map_err(|_| FarmError::NetworkError("timed out writing header".into()))??;
    Ok(())
}

/// Reads `uint32 header_len` then exactly that many bytes.
pub async fn read_header<R: AsyncRead + Unpin>(reader: &mut R) -> Result<Vec<u8>, FarmError> {
    let len = timeout(METADATA_TIMEOUT, reader.read_u32())
        .await
        .map_err(|_| FarmError::NetworkError("timed out reading header length".into()))??;
    let mut buf = vec![0u8; len as usize];
    timeout(METADATA_TIMEOUT, reader.read_exact(&mut buf))
        .await
        .map_err(|_| FarmError::NetworkError("timed out reading header body".into()))??;
    Ok(buf)
}

/// Writes `uint64 size` followed by exactly `payload`.
pub async fn write_payload<W: AsyncWrite + Unpin>(writer: &mut W, payload: &[u8]) -> Result<(), FarmError> {
    writer.write_u64(payload.len() as u64).await?;
    writer.write_all(payload).await?;
    Ok(())
}

/// Reads `uint64 size` then reads exactly that many bytes from a file into
/// the writer (used for scene/dependency bodies which may be large).
pub async fn copy_payload_to_file<R: AsyncRead + Unpin>(
    reader: &mut R,
    dest: &mut tokio::fs::File,
) -> Result<u64, FarmError> {
    let size = timeout(METADATA_TIMEOUT, reader.read_u64())
        .await
        .map_err(|_| FarmError::NetworkError("timed out reading payload size".into()))??;
    let mut remaining = size;
    let mut buf = [0u8; PAYLOAD_CHUNK];
    while remaining > 0 {
        let chunk = remaining.min(buf.len() as u64) as usize;
        timeout(PAYLOAD_IDLE_TIMEOUT, reader.read_exact(&mut buf[..chunk]))
            .await
            .map_err(|_| FarmError::NetworkError("payload stalled: no bytes received within idle timeout".into()))?
            .map_err(payload_read_error)?;
        dest.write_all(&buf[..chunk]).await?;
        remaining -= chunk as u64;
    }
    Ok(size)
}

/// Reads `uint64 size` then exactly that many bytes into memory (used for
/// the frame-upload payload, which the coordinator writes out itself).
pub async fn read_payload_to_vec<R: AsyncRead + Unpin>(reader: &mut R) -> Result<Vec<u8>, FarmError> {
    let size = timeout(METADATA_TIMEOUT, reader.read_u64())
        .await
        .map_err(|_| FarmError::NetworkError("timed out reading payload size".into()))??;
    let mut buf = vec![0u8; size as usize];
    let mut offset = 0usize;
    while offset < buf.len() {
        let end = (offset + PAYLOAD_CHUNK).min(buf.len());
        timeout(PAYLOAD_IDLE_TIMEOUT, reader.read_exact(&mut buf[offset..end]))
            .await
            .map_err(|_| FarmError::NetworkError("payload stalled: no bytes received within idle timeout".into()))?
            .map_err(payload_read_error)?;
        offset = end;
    }
    Ok(buf)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[tokio::test]
    async fn header_round_trips() {
        let mut buf = Vec::new();
        write_header(&mut buf, b"{\"cmd\":\"render\"}").await.unwrap();
        let mut cursor = Cursor::new(buf);
        let header = read_header(&mut cursor).await.unwrap();
        assert_eq!(header, b"{\"cmd\":\"render\"}");
    }

    #[tokio::test]
    async fn payload_round_trips_to_vec() {
        let mut buf = Vec::new();
        write_payload(&mut buf, b"hello frame").await.unwrap();
        let mut cursor = Cursor::new(buf);
        let payload = read_payload_to_vec(&mut cursor).await.unwrap();
        assert_eq!(payload, b"hello frame");
    }

    #[tokio::test]
    async fn truncated_payload_is_integrity_error() {
        let mut buf = Vec::new();
        write_payload(&mut buf, b"hello frame").await.unwrap();
        buf.truncate(buf.len() - 4); // declared size survives, body gets cut short
        let mut cursor = Cursor::new(buf);
        let err = read_payload_to_vec(&mut cursor).await.unwrap_err();
        assert!(matches!(err, FarmError::IntegrityError(_)), "expected IntegrityError, got {err:?}");
    }

    #[tokio::test]
    async fn copy_payload_to_file_detects_truncation() {
        let mut buf = Vec::new();
        write_payload(&mut buf, &vec![7u8; 200 * 1024]).await.unwrap(); // multi-chunk body
        buf.truncate(buf.len() - 10);
        let mut cursor = Cursor::new(buf);
        let dir = tempfile::tempdir().unwrap();
        let mut dest = tokio::fs::File::create(dir.path().join("out.bin")).await.unwrap();
        let err = copy_payload_to_file(&mut cursor, &mut dest).await.unwrap_err();
        assert!(matches!(err, FarmError::IntegrityError(_)), "expected IntegrityError, got {err:?}");
    }
}
