//! Job dispatch channel (coordinator → worker, port `J`, spec §4.6).

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tokio::fs::File;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;

use super::{copy_payload_to_file, read_header, write_header, write_payload};
use crate::error::FarmError;
use crate::model::Dependency;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DispatchHeader {
    pub cmd: String,
    pub job_id: String,
    pub file: String,
    pub dependencies: Vec<String>,
    pub start: i64,
    pub end: i64,
    pub upload_host: String,
    pub upload_port: u16,
    pub run_script: bool,
    pub script_name: String,
}

impl DispatchHeader {
    pub fn new(
        job_id: String,
        file: String,
        dependencies: Vec<String>,
        start: i64,
        end: i64,
        upload_host: String,
        upload_port: u16,
        run_script: bool,
        script_name: String,
    ) -> Self {
        Self {
            cmd: "render".to_string(),
            job_id,
            file,
            dependencies,
            start,
            end,
            upload_host,
            upload_port,
            run_script,
            script_name,
        }
    }
}

/// Sends one job dispatch: header, then scene bytes, then each dependency's
/// bytes in declared order. Closes the connection on completion.
pub async fn send_job(
    addr: (std::net::IpAddr, u16),
    header: &DispatchHeader,
    scene_path: &Path,
    dependencies: &[Dependency],
) -> Result<(), FarmError> {
    let mut stream = TcpStream::connect(addr).await?;
    let json = serde_json::to_vec(header)?;
    write_header(&mut stream, &json).await?;

    send_file_payload(&mut stream, scene_path).await?;
    for dep in dependencies {
        send_file_payload(&mut stream, &dep.local_abs_path).await?;
    }

    stream.shutdown().await?;
    Ok(())
}

async fn send_file_payload<W: AsyncWrite + Unpin>(writer: &mut W, path: &Path) -> Result<(), FarmError> {
    let bytes = tokio::fs::read(path).await?;
    write_payload(writer, &bytes).await
}

/// Reads one job dispatch off an accepted connection: header, then the
/// scene file, then each declared dependency, staged under
/// `jobs_root/<job_id>/` (spec §4.7/§6) — the same directory `frames/`
/// lives under, so a worker can purge the whole job in one step once its
/// frames are uploaded.
pub async fn receive_job(
    stream: &mut (impl AsyncRead + Unpin),
    jobs_root: &Path,
) -> Result<(DispatchHeader, PathBuf, Vec<PathBuf>), FarmError> {
    let raw = read_header(stream).await?;
    let header: DispatchHeader = serde_json::from_slice(&raw)?;

    let job_dir = jobs_root.join(&header.job_id);
    tokio::fs::create_dir_all(&job_dir).await?;
    let scene_dest = job_dir.join(&header.file);
    write_staged_file(stream, &scene_dest).await?;

    let mut dep_paths = Vec::with_capacity(header.dependencies.len());
    for rel in &header.dependencies {
        let dest = job_dir.join(rel);
        if let Some(parent) = dest.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        write_staged_file(stream, &dest).await?;
        dep_paths.push(dest);
    }

    Ok((header, scene_dest, dep_paths))
}

async fn write_staged_file(stream: &mut (impl AsyncRead + Unpin), dest: &Path) -> Result<(), FarmError> {
    let mut file = File::create(dest).await?;
    copy_payload_to_file(stream, &mut file).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_serializes_with_cmd_render() {
        let header = DispatchHeader::new(
            "scene_1-10".into(),
            "scene.blend".into(),
            vec!["tex/a.png".into()],
            1,
            10,
            "127.0.0.1".into(),
            50020,
            false,
            String::new(),
        );
        let json = serde_json::to_value(&header).unwrap();
        assert_eq!(json["cmd"], "render");
        assert_eq!(json["job_id"], "scene_1-10");
        assert_eq!(json["dependencies"][0], "tex/a.png");
    }
}
