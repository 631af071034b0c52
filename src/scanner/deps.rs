//! Dependency scanner (spec §4.3).
//!
//! Invokes the renderer in background mode with a one-shot introspection
//! script. The renderer prints a single `DEPS <json array>` line and exits.
//! This module parses that line and remaps each absolute asset path to a
//! transportable relative path.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::process::Stdio;

use tokio::process::Command;

use crate::error::FarmError;
use crate::model::Dependency;

const DEPS_SENTINEL: &str = "DEPS ";

/// Runs the renderer's dependency-introspection mode and maps every
/// absolute asset path it reports to a [`Dependency`].
///
/// `script_path` is a one-shot script (provided by the caller, typically
/// generated alongside the renderer invocation) that causes the renderer to
/// print the sentinel line and exit.
pub async fn scan_dependencies(
    renderer_exe: &Path,
    scene_path: &Path,
    script_path: &Path,
) -> Result<Vec<Dependency>, FarmError> {
    let output = Command::new(renderer_exe)
        .arg("-b")
        .arg(scene_path)
        .arg("--python")
        .arg(script_path)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .output()
        .await
        .map_err(|e| FarmError::DependencyScanFailed(e.to_string()))?;

    let combined = format!(
        "{}\n{}",
        String::from_utf8_lossy(&output.stdout),
        String::from_utf8_lossy(&output.stderr)
    );

    if !output.status.success() {
        return Err(FarmError::DependencyScanFailed(format!(
            "renderer exited with {:?}; output: {combined}",
            output.status.code()
        )));
    }

    let Some(line) = combined.lines().find(|l| l.starts_with(DEPS_SENTINEL)) else {
        return Err(FarmError::DependencyScanFailed(format!(
            "no DEPS sentinel in renderer output: {combined}"
        )));
    };

    let json = &line[DEPS_SENTINEL.len()..];
    let paths: Vec<PathBuf> = serde_json::from_str(json)
        .map_err(|e| FarmError::DependencyScanFailed(format!("invalid DEPS json: {e}")))?;

    Ok(map_dependencies(scene_path, &paths))
}

/// Path mapping rules from spec §4.3: assets under `scene.parent` keep their
/// relative path (forward slashes); everything else becomes
/// `_external/<basename>`, with `_1`, `_2`, ... suffixes on basename
/// collisions, resolved in enumeration order.
pub fn map_dependencies(scene_path: &Path, abs_paths: &[PathBuf]) -> Vec<Dependency> {
    let scene_dir = scene_path.parent().unwrap_or_else(|| Path::new(""));
    let mut seen_external = HashSet::new();
    let mut out = Vec::with_capacity(abs_paths.len());

    for p in abs_paths {
        let remote_rel_path = if let Ok(rel) = p.strip_prefix(scene_dir) {
            rel.components()
                .map(|c| c.as_os_str().to_string_lossy().into_owned())
                .collect::<Vec<_>>()
                .join("/")
        } else {
            let basename = p
                .file_name()
                .map(|s| s.to_string_lossy().into_owned())
                .unwrap_or_else(|| "asset".to_string());
            let mut candidate = format!("_external/{basename}");
            let mut suffix = 0;
            while !seen_external.insert(candidate.clone()) {
                suffix += 1;
                let (stem, ext) = split_ext(&basename);
                candidate = match &ext {
                    Some(ext) => format!("_external/{stem}_{suffix}.{ext}"),
                    None => format!("_external/{stem}_{suffix}"),
                };
            }
            candidate
        };

        out.push(Dependency {
            local_abs_path: p.clone(),
            remote_rel_path,
        });
    }

    out
}

fn split_ext(basename: &str) -> (String, Option<String>) {
    match basename.rsplit_once('.') {
        Some((stem, ext)) if !stem.is_empty() => (stem.to_string(), Some(ext.to_string())),
        _ => (basename.to_string(), None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn maps_internal_and_external_assets() {
        let scene = PathBuf::from("/a/b/s.blend");
        let deps = map_dependencies(
            &scene,
            &[
                PathBuf::from("/a/b/tex/x.png"),
                PathBuf::from("/z/q/env.hdr"),
            ],
        );
        assert_eq!(deps[0].remote_rel_path, "tex/x.png");
        assert_eq!(deps[1].remote_rel_path, "_external/env.hdr");
    }

    #[test]
    fn resolves_external_basename_collisions_in_order() {
        let scene = PathBuf::from("/a/b/s.blend");
        let deps = map_dependencies(
            &scene,
            &[
                PathBuf::from("/x/env.hdr"),
                PathBuf::from("/y/env.hdr"),
                PathBuf::from("/z/env.hdr"),
            ],
        );
        assert_eq!(deps[0].remote_rel_path, "_external/env.hdr");
        assert_eq!(deps[1].remote_rel_path, "_external/env_1.hdr");
        assert_eq!(deps[2].remote_rel_path, "_external/env_2.hdr");
    }
}
