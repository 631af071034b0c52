//! Worker job server (spec §4.7): accepts job dispatch connections on port
//! `J`, stages the scene and its dependencies, drives the renderer, and
//! uploads finished frames as they land plus a safety sweep afterward.

use std::path::{Path, PathBuf};

use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::error::FarmError;
use crate::model::FrameRange;
use crate::protocol::dispatch::{self, DispatchHeader};
use crate::protocol::upload;
use crate::renderer::driver::{self, DriverEvent, DriverOutcome, RenderRequest};

/// Where staged jobs and their output frames live: `<jobs_root>/<job_id>/`.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    pub jobs_root: PathBuf,
    pub renderer_exe: PathBuf,
}

/// Accepts job dispatch connections until `cancel` fires. Jobs are served
/// serially, one at a time, per spec §4.7 concurrency note.
pub async fn run(config: WorkerConfig, job_port: u16, cancel: CancellationToken) -> Result<(), FarmError> {
    let listener = TcpListener::bind(("0.0.0.0", job_port))
        .await
        .map_err(|e| FarmError::NetworkError(format!("job server bind failed: {e}")))?;

    loop {
        tokio::select! {
            _ = cancel.cancelled() => return Ok(()),
            accepted = listener.accept() => {
                match accepted {
                    Ok((stream, peer)) => {
                        tracing::info!(%peer, "job dispatch connection accepted");
                        if let Err(err) = handle_connection(&config, stream, cancel.clone()).await {
                            tracing::warn!(%peer, %err, "job failed");
                        }
                    }
                    Err(err) => tracing::warn!(%err, "job server accept error"),
                }
            }
        }
    }
}

async fn handle_connection(
    config: &WorkerConfig,
    mut stream: TcpStream,
    cancel: CancellationToken,
) -> Result<(), FarmError> {
    let (header, scene_path, _deps) = dispatch::receive_job(&mut stream, &config.jobs_root).await?;
    drop(stream); // spec §4.7: close the dispatch connection before launching the renderer

    let job_dir = config.jobs_root.join(&header.job_id);
    let frames_dir = job_dir.join("frames");
    let upload_addr = (
        header.upload_host.parse().map_err(|_| {
            FarmError::InvalidConfig(format!("invalid upload_host: {}", header.upload_host))
        })?,
        header.upload_port,
    );

    let outcome = run_render(config, &header, &scene_path, &frames_dir, cancel, upload_addr).await?;
    safety_sweep(&frames_dir, &header.job_id, upload_addr).await;

    match outcome {
        DriverOutcome::Completed => tracing::info!(job_id = %header.job_id, "job completed"),
        DriverOutcome::RendererFailed(code) => {
            tracing::warn!(job_id = %header.job_id, code, "renderer exited non-zero")
        }
        DriverOutcome::Cancelled => tracing::info!(job_id = %header.job_id, "job cancelled"),
    }
    Ok(())
}

async fn run_render(
    config: &WorkerConfig,
    header: &DispatchHeader,
    scene_path: &Path,
    frames_dir: &Path,
    cancel: CancellationToken,
    upload_addr: (std::net::IpAddr, u16),
) -> Result<DriverOutcome, FarmError> {
    let request = RenderRequest {
        renderer_exe: config.renderer_exe.clone(),
        scene_path: scene_path.to_path_buf(),
        range: FrameRange::new(header.start, header.end),
        output_dir: frames_dir.to_path_buf(),
        run_script: header.run_script,
        script_name: if header.script_name.is_empty() {
            None
        } else {
            Some(PathBuf::from(&header.script_name))
        },
    };

    let (tx, mut rx) = mpsc::unbounded_channel::<DriverEvent>();
    let job_id = header.job_id.clone();
    let frames_dir_owned = frames_dir.to_path_buf();

    let uploads = tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            if let DriverEvent::FrameSaved(n) = event {
                if let Some(path) = most_recently_modified(&frames_dir_owned).await {
                    if let Err(err) = upload::send_frame(upload_addr, &job_id, n, &path).await {
                        tracing::warn!(frame = n, %err, "frame upload failed");
                    }
                }
            }
        }
    });

    let outcome = driver::render(&request, &cancel, tx).await?;
    let _ = uploads.await;
    Ok(outcome)
}

/// Iterates `frames/` in sorted order and uploads any file the streaming
/// path missed (spec §4.7 safety sweep). Best-effort: duplicates are
/// tolerated by the coordinator.
async fn safety_sweep(frames_dir: &Path, job_id: &str, upload_addr: (std::net::IpAddr, u16)) {
    let Ok(mut entries) = tokio::fs::read_dir(frames_dir).await else {
        return;
    };
    let mut files = Vec::new();
    while let Ok(Some(entry)) = entries.next_entry().await {
        if entry.path().is_file() {
            files.push(entry.path());
        }
    }
    files.sort();

    for path in files {
        let frame = path
            .file_stem()
            .and_then(|s| s.to_str())
            .and_then(crate::scanner::frames::parse_frame_number)
            .unwrap_or(0);
        if let Err(err) = upload::send_frame(upload_addr, job_id, frame, &path).await {
            tracing::warn!(?path, %err, "safety sweep upload failed");
        }
    }
}

async fn most_recently_modified(dir: &Path) -> Option<PathBuf> {
    let mut entries = tokio::fs::read_dir(dir).await.ok()?;
    let mut best: Option<(PathBuf, std::time::SystemTime)> = None;
    while let Ok(Some(entry)) = entries.next_entry().await {
        let path = entry.path();
        if !path.is_file() {
            continue;
        }
        let modified = entry.metadata().await.ok()?.modified().ok()?;
        if best.as_ref().map(|(_, t)| modified > *t).unwrap_or(true) {
            best = Some((path, modified));
        }
    }
    best.map(|(path, _)| path)
}
