//! Scene-frame-range probing: the `RANGE <start> <end>` half of the
//! renderer's introspection contract (spec §4.9 step 1, §6).

use std::path::Path;
use std::process::Stdio;

use tokio::process::Command;

use crate::error::FarmError;
use crate::model::FrameRange;

const RANGE_PREFIX: &str = "RANGE ";

pub async fn probe_frame_range(renderer_exe: &Path, scene_path: &Path) -> Result<FrameRange, FarmError> {
    let output = Command::new(renderer_exe)
        .arg("-b")
        .arg(scene_path)
        .arg("--python-expr")
        .arg("import bpy; print(f'RANGE {bpy.context.scene.frame_start} {bpy.context.scene.frame_end}')")
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .output()
        .await
        .map_err(|e| FarmError::SceneProbeFailed(e.to_string()))?;

    let combined = format!(
        "{}\n{}",
        String::from_utf8_lossy(&output.stdout),
        String::from_utf8_lossy(&output.stderr)
    );

    if !output.status.success() {
        return Err(FarmError::SceneProbeFailed(format!(
            "renderer exited with {:?}; output: {combined}",
            output.status.code()
        )));
    }

    parse_range_line(&combined)
        .ok_or_else(|| FarmError::SceneProbeFailed(format!("no RANGE sentinel in output: {combined}")))
}

fn parse_range_line(output: &str) -> Option<FrameRange> {
    let line = output.lines().find(|l| l.starts_with(RANGE_PREFIX))?;
    let mut parts = line[RANGE_PREFIX.len()..].split_whitespace();
    let start: i64 = parts.next()?.parse().ok()?;
    let end: i64 = parts.next()?.parse().ok()?;
    if start > end {
        return None;
    }
    Some(FrameRange::new(start, end))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_range_line_among_noise() {
        let output = "Blender 4.0\nsome warning\nRANGE 1 250\n";
        assert_eq!(parse_range_line(output), Some(FrameRange::new(1, 250)));
    }

    #[test]
    fn rejects_missing_sentinel() {
        assert!(parse_range_line("no sentinel here").is_none());
    }

    #[test]
    fn rejects_inverted_range() {
        assert!(parse_range_line("RANGE 10 5").is_none());
    }
}
