//! Renderer driver (spec §4.4).
//!
//! Spawns the renderer subprocess with the documented frame-range flags,
//! streams its combined stdout/stderr line by line, and emits
//! [`DriverEvent::FrameSaved`] for lines matching the `Saved: '...'`
//! contract. Cancellation kills the whole subprocess tree, not just the
//! direct child (spec §4.4/§9 "Subprocess tree termination").

use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::error::FarmError;
use crate::model::FrameRange;

const GRACEFUL_SHUTDOWN_WAIT: Duration = Duration::from_secs(2);

#[derive(Debug, Clone)]
pub struct RenderRequest {
    pub renderer_exe: PathBuf,
    pub scene_path: PathBuf,
    pub range: FrameRange,
    pub output_dir: PathBuf,
    pub run_script: bool,
    pub script_name: Option<PathBuf>,
}

#[derive(Debug, Clone)]
pub enum DriverEvent {
    FrameSaved(i64),
    Log(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DriverOutcome {
    Completed,
    RendererFailed(i32),
    Cancelled,
}

/// Drives one renderer invocation to completion, cancellation, or failure.
/// `events` receives a [`DriverEvent`] per parsed output line; the caller
/// (worker job server or local scheduler leg) reacts to `FrameSaved` by
/// uploading the corresponding frame.
pub async fn render(
    req: &RenderRequest,
    cancel: &CancellationToken,
    events: mpsc::UnboundedSender<DriverEvent>,
) -> Result<DriverOutcome, FarmError> {
    tokio::fs::create_dir_all(&req.output_dir).await?;

    let mut command = Command::new(&req.renderer_exe);
    if req.run_script {
        if let Some(script) = &req.script_name {
            command.arg("--enable-autoexec").arg("--python").arg(script);
        }
    }
    command
        .arg("-b")
        .arg(&req.scene_path)
        .arg("-s")
        .arg(req.range.start.to_string())
        .arg("-e")
        .arg(req.range.end.to_string())
        .arg("-o")
        .arg(req.output_dir.join("####"))
        .arg("-a")
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    #[cfg(unix)]
    command.process_group(0);

    let mut child = command
        .spawn()
        .map_err(|e| FarmError::NetworkError(format!("failed to spawn renderer: {e}")))?;
    let pid = child.id();

    let stdout = child.stdout.take().expect("renderer spawned with piped stdout");
    let stderr = child.stderr.take().expect("renderer spawned with piped stderr");

    let (line_tx, mut line_rx) = mpsc::unbounded_channel::<String>();
    let stdout_tx = line_tx.clone();
    let stdout_task = tokio::spawn(async move {
        let mut lines = BufReader::new(stdout).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            if stdout_tx.send(line).is_err() {
                break;
            }
        }
    });
    let stderr_task = tokio::spawn(async move {
        let mut lines = BufReader::new(stderr).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            if line_tx.send(line).is_err() {
                break;
            }
        }
    });

    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                kill_tree(&mut child, pid).await;
                stdout_task.abort();
                stderr_task.abort();
                return Ok(DriverOutcome::Cancelled);
            }
            line = line_rx.recv() => {
                match line {
                    Some(line) => {
                        let event = match parse_saved_frame(&line) {
                            Some(n) => DriverEvent::FrameSaved(n),
                            None => DriverEvent::Log(line),
                        };
                        let _ = events.send(event);
                    }
                    None => break,
                }
            }
        }
    }

    let _ = stdout_task.await;
    let _ = stderr_task.await;

    let status = child
        .wait()
        .await
        .map_err(|e| FarmError::NetworkError(format!("renderer wait failed: {e}")))?;

    if cancel.is_cancelled() {
        return Ok(DriverOutcome::Cancelled);
    }
    if status.success() {
        Ok(DriverOutcome::Completed)
    } else {
        Ok(DriverOutcome::RendererFailed(status.code().unwrap_or(-1)))
    }
}

async fn kill_tree(child: &mut Child, pid: Option<u32>) {
    #[cfg(unix)]
    if let Some(pid) = pid {
        use nix::sys::signal::{self, Signal};
        use nix::unistd::Pid;

        let pgid = Pid::from_raw(pid as i32);
        let _ = signal::killpg(pgid, Signal::SIGTERM);

        let graceful = tokio::time::sleep(GRACEFUL_SHUTDOWN_WAIT);
        tokio::pin!(graceful);
        tokio::select! {
            _ = child.wait() => return,
            _ = &mut graceful => {}
        }

        let _ = signal::killpg(pgid, Signal::SIGKILL);
        let _ = child.wait().await;
        return;
    }

    let _ = child.start_kill();
    let _ = child.wait().await;
}

/// Parses `Saved: '<...><sep><digits>.<ext>'` (case-insensitive) and
/// returns the digit group immediately before the extension.
fn parse_saved_frame(line: &str) -> Option<i64> {
    let lower = line.to_ascii_lowercase();
    let idx = lower.find("saved:")?;
    let rest = &line[idx..];

    let first_quote = rest.find('\'')?;
    let after_first = &rest[first_quote + 1..];
    let second_quote = after_first.find('\'')?;
    let path = &after_first[..second_quote];

    let filename = path.rsplit(['/', '\\']).next().unwrap_or(path);
    let (stem, _ext) = filename.rsplit_once('.')?;

    let digits: String = stem.chars().rev().take_while(|c| c.is_ascii_digit()).collect();
    if digits.is_empty() {
        return None;
    }
    digits.chars().rev().collect::<String>().parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_saved_frame_unix_path() {
        assert_eq!(parse_saved_frame("Saved: '/tmp/out/0042.png'"), Some(42));
    }

    #[test]
    fn parses_saved_frame_windows_path() {
        assert_eq!(parse_saved_frame(r"Saved: 'C:\out\0007.exr'"), Some(7));
    }

    #[test]
    fn parses_saved_frame_case_insensitive() {
        assert_eq!(parse_saved_frame("SAVED: '/tmp/out/0100.jpg'"), Some(100));
    }

    #[test]
    fn ignores_unrelated_lines() {
        assert_eq!(parse_saved_frame("Fra:42 Mem:12.3M | Rendering"), None);
    }

    #[test]
    fn ignores_lines_with_no_trailing_digits() {
        assert_eq!(parse_saved_frame("Saved: '/tmp/out/final.png'"), None);
    }
}
