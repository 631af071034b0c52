//! Frame upload channel (worker → coordinator, port `U`, spec §4.6/§4.8).
//!
//! One fresh connection per frame: header, then payload, then the worker
//! closes. The coordinator resolves a destination directory and writes the
//! payload as `destination_dir/filename`, overwrite-by-name (idempotent).

use std::path::Path;

use serde::{Deserialize, Serialize};
use tokio::io::{AsyncRead, AsyncWriteExt};
use tokio::net::TcpStream;

use super::{read_header, read_payload_to_vec, write_header, write_payload};
use crate::error::FarmError;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadHeader {
    pub frame: i64,
    pub filename: String,
    pub job_id: String,
}

/// Uploads one rendered frame file.
pub async fn send_frame(
    addr: (std::net::IpAddr, u16),
    job_id: &str,
    frame: i64,
    file_path: &Path,
) -> Result<(), FarmError> {
    let filename = file_path
        .file_name()
        .map(|s| s.to_string_lossy().into_owned())
        .ok_or_else(|| FarmError::IntegrityError("frame path has no filename".into()))?;

    let header = UploadHeader { frame, filename, job_id: job_id.to_string() };
    let bytes = tokio::fs::read(file_path).await?;

    let mut stream = TcpStream::connect(addr).await?;
    let json = serde_json::to_vec(&header)?;
    write_header(&mut stream, &json).await?;
    write_payload(&mut stream, &bytes).await?;
    stream.shutdown().await?;
    Ok(())
}

/// Reads one accepted upload connection's header and payload. The caller
/// resolves `job_id` to a destination directory and writes the bytes.
pub async fn receive_frame(
    stream: &mut (impl AsyncRead + Unpin),
) -> Result<(UploadHeader, Vec<u8>), FarmError> {
    let raw = read_header(stream).await?;
    let header: UploadHeader = serde_json::from_slice(&raw)?;
    let payload = read_payload_to_vec(stream).await?;
    Ok((header, payload))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_round_trips_through_json() {
        let header = UploadHeader { frame: 42, filename: "0042.png".into(), job_id: "scene_1-50".into() };
        let json = serde_json::to_string(&header).unwrap();
        let back: UploadHeader = serde_json::from_str(&json).unwrap();
        assert_eq!(back.frame, 42);
        assert_eq!(back.filename, "0042.png");
        assert_eq!(back.job_id, "scene_1-50");
    }
}
