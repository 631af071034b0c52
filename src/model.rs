//! Core data model (spec §3).

use std::path::{Path, PathBuf};
use std::time::Instant;

use serde::{Deserialize, Serialize};

/// A renderer input file. Immutable while a job referencing it is in flight.
#[derive(Debug, Clone)]
pub struct Scene {
    pub path: PathBuf,
    /// Cached `[first, last]` once probed via the renderer's introspection mode.
    pub frame_range: Option<FrameRange>,
    pub dependencies: Vec<Dependency>,
}

impl Scene {
    pub fn new(path: PathBuf) -> Self {
        Self {
            path,
            frame_range: None,
            dependencies: Vec::new(),
        }
    }

    /// `stem(Scene.path)`, used to key `out_root / stem`.
    pub fn stem(&self) -> String {
        self.path
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or("scene")
            .to_string()
    }

    pub fn basename(&self) -> String {
        self.path
            .file_name()
            .and_then(|s| s.to_str())
            .unwrap_or("scene.blend")
            .to_string()
    }

    pub fn output_dir(&self, out_root: &Path) -> PathBuf {
        out_root.join(self.stem())
    }
}

/// Closed integer interval `[a, b]` with `a <= b`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FrameRange {
    pub start: i64,
    pub end: i64,
}

impl FrameRange {
    pub fn new(start: i64, end: i64) -> Self {
        debug_assert!(start <= end);
        Self { start, end }
    }

    pub fn len(&self) -> i64 {
        self.end - self.start + 1
    }

    pub fn is_empty(&self) -> bool {
        self.start > self.end
    }

    pub fn contains(&self, frame: i64) -> bool {
        frame >= self.start && frame <= self.end
    }
}

/// Ordered sequence of [`FrameRange`]s covering exactly a scene's missing
/// set, where every range has length `<=` the configured chunk size.
pub type ChunkPlan = Vec<FrameRange>;

/// `{local_abs_path, remote_rel_path}` (spec §3/§4.3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Dependency {
    pub local_abs_path: PathBuf,
    /// Scene-relative path (forward slashes) or `_external/<basename>`.
    pub remote_rel_path: String,
}

/// `{id, hostname, ip, job_port, selected, lastSeen}`, keyed by `ip`.
#[derive(Debug, Clone)]
pub struct WorkerRecord {
    pub id: String,
    pub hostname: String,
    pub ip: std::net::IpAddr,
    pub job_port: u16,
    pub selected: bool,
    pub last_seen: Instant,
}

/// Where a job's chunks should run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobTarget {
    Local,
    Worker { id: String, ip: std::net::IpAddr, job_port: u16 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobState {
    Pending,
    Dispatched,
    Running,
    Completed,
    Failed,
    Cancelled,
}

/// `{job_id, scene_ref, chunks[], target, upload_endpoint, run_script,
/// script_name, state}` (spec §3).
#[derive(Debug, Clone)]
pub struct Job {
    pub job_id: String,
    pub scene_stem: String,
    pub scene_path: PathBuf,
    pub chunks: Vec<FrameRange>,
    pub target: JobTarget,
    pub upload_host: String,
    pub upload_port: u16,
    pub run_script: bool,
    pub script_name: String,
    pub state: JobState,
}

impl Job {
    /// `<stem>_<a>-<b>` convention over the job's spanning range.
    pub fn make_id(scene_stem: &str, start: i64, end: i64) -> String {
        format!("{scene_stem}_{start}-{end}")
    }

    pub fn spanning_range(&self) -> FrameRange {
        let start = self.chunks.iter().map(|c| c.start).min().unwrap_or(0);
        let end = self.chunks.iter().map(|c| c.end).max().unwrap_or(0);
        FrameRange::new(start, end)
    }
}

/// Transient record of one uploaded frame.
#[derive(Debug, Clone)]
pub struct FrameUploadRecord {
    pub frame_number: i64,
    pub filename: String,
    pub byte_size: u64,
}
