//! Scheduler (spec §4.9): probes a scene, computes its missing set, scans
//! dependencies, plans chunks, builds the worker roster, and dispatches
//! concurrently. Progress is tracked by subscribing to frame-level events
//! rather than waiting on remote jobs, since the job-dispatch protocol has
//! no completion signal beyond the frames it uploads.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::coordinator::roster::Roster;
use crate::coordinator::upload_server::JobDestinations;
use crate::error::FarmError;
use crate::events::{Event, EventBus, LogEvent};
use crate::model::{Dependency, FrameRange, Job};
use crate::protocol::dispatch::DispatchHeader;
use crate::renderer::driver::{self, DriverEvent, RenderRequest};
use crate::renderer::probe;
use crate::scanner::{deps, frames, ranges};

#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    pub renderer_exe: PathBuf,
    pub out_root: PathBuf,
    pub chunk_size: i64,
    pub run_script: bool,
    pub script_name: String,
    pub upload_host: String,
    pub upload_port: u16,
    /// Path to the one-shot dependency-introspection script (spec §4.3);
    /// caller-provided since its contents are renderer-specific.
    pub dependency_script: PathBuf,
}

pub struct Scheduler {
    config: SchedulerConfig,
    roster: Arc<Roster>,
    destinations: JobDestinations,
    events: EventBus,
    cancel: CancellationToken,
}

impl Scheduler {
    pub fn new(
        config: SchedulerConfig,
        roster: Arc<Roster>,
        destinations: JobDestinations,
        events: EventBus,
    ) -> Self {
        Self { config, roster, destinations, events, cancel: CancellationToken::new() }
    }

    /// Sets the shared cancellation signal the local driver observes.
    /// Already-dispatched remote jobs are not aborted; their uploads still
    /// land (spec §4.9).
    pub fn cancel_all(&self) {
        self.cancel.cancel();
    }

    pub async fn render_scene(&self, scene_path: PathBuf) -> Result<(), FarmError> {
        let scene_stem = stem_of(&scene_path);
        let output_dir = self.config.out_root.join(&scene_stem);

        let range = match probe::probe_frame_range(&self.config.renderer_exe, &scene_path).await {
            Ok(r) => r,
            Err(err) => {
                self.events.log(LogEvent::SceneSkipped { scene_stem, reason: err.to_string() });
                return Ok(());
            }
        };

        let existing = frames::existing_frames(&output_dir);
        let missing: Vec<i64> = (range.start..=range.end).filter(|n| !existing.contains(n)).collect();
        if missing.is_empty() {
            self.events.log(LogEvent::SceneComplete { scene_stem });
            return Ok(());
        }

        let dependencies = match deps::scan_dependencies(
            &self.config.renderer_exe,
            &scene_path,
            &self.config.dependency_script,
        )
        .await
        {
            Ok(d) => d,
            Err(err) => {
                tracing::warn!(scene = %scene_stem, %err, "dependency scan failed, continuing without assets");
                Vec::new()
            }
        };

        let contiguous = ranges::contiguous_ranges(&missing);
        let chunk_plan = ranges::split_by_chunk(&contiguous, self.config.chunk_size)?;

        let workers = self.roster.selected_snapshot().await;
        tokio::fs::create_dir_all(&output_dir).await?;

        let missing_set: HashSet<i64> = missing.iter().copied().collect();
        let watcher = self.spawn_progress_watcher(scene_stem.clone(), missing_set);

        self.dispatch(&scene_stem, &scene_path, &output_dir, chunk_plan, &workers, &dependencies)
            .await?;

        drop(watcher); // detached: keeps running in the background until the scene's missing set is covered
        Ok(())
    }

    async fn dispatch(
        &self,
        scene_stem: &str,
        scene_path: &Path,
        output_dir: &Path,
        chunk_plan: Vec<FrameRange>,
        workers: &[crate::model::WorkerRecord],
        dependencies: &[Dependency],
    ) -> Result<(), FarmError> {
        let mut slots = route_round_robin(chunk_plan, workers.len());
        let local_chunks = std::mem::take(&mut slots[0]);

        let mut dispatches: Vec<(
            FrameRange,
            std::pin::Pin<Box<dyn std::future::Future<Output = Result<(), FarmError>> + Send + '_>>,
        )> = Vec::new();

        if let Some(span) = coalesce_span(&local_chunks) {
            dispatches.push((span, Box::pin(self.run_local(scene_stem, scene_path, output_dir, local_chunks))));
        }

        for (worker, chunks) in workers.iter().zip(slots.into_iter().skip(1)) {
            let Some(span) = coalesce_span(&chunks) else { continue };
            dispatches.push((
                span,
                Box::pin(self.run_remote(scene_stem, scene_path, output_dir, worker, span, dependencies)),
            ));
        }

        let (spans, futures): (Vec<_>, Vec<_>) = dispatches.into_iter().unzip();
        let results = futures::future::join_all(futures).await;
        for (span, result) in spans.into_iter().zip(results) {
            if let Err(err) = result {
                self.events.log(LogEvent::ChunkFailed {
                    scene_stem: scene_stem.to_string(),
                    chunk: (span.start, span.end),
                    reason: err.to_string(),
                });
            }
        }
        Ok(())
    }

    async fn run_local(
        &self,
        scene_stem: &str,
        scene_path: &Path,
        output_dir: &Path,
        chunks: Vec<FrameRange>,
    ) -> Result<(), FarmError> {
        for chunk in chunks {
            let job_id = Job::make_id(scene_stem, chunk.start, chunk.end);
            let request = RenderRequest {
                renderer_exe: self.config.renderer_exe.clone(),
                scene_path: scene_path.to_path_buf(),
                range: chunk,
                output_dir: output_dir.to_path_buf(),
                run_script: self.config.run_script,
                script_name: if self.config.script_name.is_empty() {
                    None
                } else {
                    Some(PathBuf::from(&self.config.script_name))
                },
            };

            let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel::<DriverEvent>();
            let events = self.events.clone();
            let job_id_for_task = job_id.clone();
            let relay = tokio::spawn(async move {
                while let Some(event) = rx.recv().await {
                    if let DriverEvent::FrameSaved(n) = event {
                        events.frame_received(&job_id_for_task, n);
                    }
                }
            });

            let started = std::time::Instant::now();
            let outcome = driver::render(&request, &self.cancel, tx).await?;
            let _ = relay.await;
            crate::metrics::record_job_dispatched(false);

            match outcome {
                driver::DriverOutcome::Completed => {
                    let frame_count = (chunk.end - chunk.start + 1) as u64;
                    crate::metrics::record_chunk_rendered(frame_count, started.elapsed());
                }
                driver::DriverOutcome::Cancelled => return Ok(()),
                driver::DriverOutcome::RendererFailed(code) => {
                    self.events.log(LogEvent::ChunkFailed {
                        scene_stem: scene_stem.to_string(),
                        chunk: (chunk.start, chunk.end),
                        reason: format!("renderer exited with {code}"),
                    });
                }
            }
        }
        Ok(())
    }

    async fn run_remote(
        &self,
        scene_stem: &str,
        scene_path: &Path,
        output_dir: &Path,
        worker: &crate::model::WorkerRecord,
        span: FrameRange,
        dependencies: &[Dependency],
    ) -> Result<(), FarmError> {
        let job_id = self
            .destinations
            .register_unique(Job::make_id(scene_stem, span.start, span.end), output_dir.to_path_buf());

        let scene_file = scene_path
            .file_name()
            .and_then(|s| s.to_str())
            .ok_or_else(|| FarmError::InvalidConfig("scene path has no filename".into()))?
            .to_string();

        let header = DispatchHeader::new(
            job_id,
            scene_file,
            dependencies.iter().map(|d| d.remote_rel_path.clone()).collect(),
            span.start,
            span.end,
            self.config.upload_host.clone(),
            self.config.upload_port,
            self.config.run_script,
            self.config.script_name.clone(),
        );

        crate::protocol::dispatch::send_job((worker.ip, worker.job_port), &header, scene_path, dependencies)
            .await?;
        crate::metrics::record_job_dispatched(true);
        Ok(())
    }

    /// Spawns a detached background task that turns `FrameReceived` events
    /// for this scene into `ProgressEvent`s, exiting once every missing
    /// frame has been counted once.
    fn spawn_progress_watcher(&self, scene_stem: String, mut missing: HashSet<i64>) -> tokio::task::JoinHandle<()> {
        let total_missing = missing.len();
        let events = self.events.clone();
        let mut receiver = events.subscribe();
        let prefix = format!("{scene_stem}_");
        let cancel = self.cancel.clone();

        tokio::spawn(async move {
            let mut completed = 0usize;
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => return,
                    received = receiver.recv() => {
                        match received {
                            Ok(Event::FrameReceived(fr)) if fr.job_id.starts_with(&prefix) => {
                                if missing.remove(&fr.frame) {
                                    completed += 1;
                                    events.progress(&scene_stem, total_missing, completed);
                                    if completed >= total_missing {
                                        return;
                                    }
                                }
                            }
                            Ok(_) => {}
                            Err(tokio::sync::broadcast::error::RecvError::Lagged(_)) => {}
                            Err(tokio::sync::broadcast::error::RecvError::Closed) => return,
                        }
                    }
                }
            }
        })
    }
}

fn stem_of(scene_path: &Path) -> String {
    scene_path.file_stem().and_then(|s| s.to_str()).unwrap_or("scene").to_string()
}

/// Routes `chunk_plan` round-robin across `worker_count + 1` slots: slot 0
/// (chunk indices `0, k, 2k, ...`) is local, slot `i` (`1..=worker_count`)
/// is worker `i - 1` (spec §8: local receives chunks index 0, k, 2k, ...,
/// and assignment is balanced to within one chunk per slot).
fn route_round_robin(chunk_plan: Vec<FrameRange>, worker_count: usize) -> Vec<Vec<FrameRange>> {
    let roster_len = worker_count + 1;
    let mut slots: Vec<Vec<FrameRange>> = vec![Vec::new(); roster_len];
    for (i, chunk) in chunk_plan.into_iter().enumerate() {
        slots[i % roster_len].push(chunk);
    }
    slots
}

/// Coalesces a slot's chunks into the single range spanning them, so a
/// remote worker gets one dispatch covering all of its assigned frames
/// instead of one connection per chunk.
fn coalesce_span(chunks: &[FrameRange]) -> Option<FrameRange> {
    let start = chunks.iter().map(|c| c.start).min()?;
    let end = chunks.iter().map(|c| c.end).max()?;
    Some(FrameRange::new(start, end))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stem_of_strips_extension() {
        assert_eq!(stem_of(Path::new("/scenes/intro.blend")), "intro");
    }

    fn chunks(n: usize) -> Vec<FrameRange> {
        (0..n as i64).map(|i| FrameRange::new(i * 10, i * 10 + 9)).collect()
    }

    #[test]
    fn route_round_robin_local_gets_every_kth_chunk() {
        let plan = chunks(9);
        let slots = route_round_robin(plan.clone(), 2);
        assert_eq!(slots[0], vec![plan[0], plan[3], plan[6]]);
    }

    #[test]
    fn route_round_robin_balances_counts_within_one() {
        let plan = chunks(10);
        let slots = route_round_robin(plan, 3);
        let counts: Vec<usize> = slots.iter().map(|s| s.len()).collect();
        assert_eq!(counts, vec![3, 3, 2, 2]); // ceil(10/4) = 3, floor(10/4) = 2
        assert!(counts.iter().max().unwrap() - counts.iter().min().unwrap() <= 1);
    }

    #[test]
    fn route_round_robin_no_workers_keeps_everything_local() {
        let plan = chunks(4);
        let slots = route_round_robin(plan.clone(), 0);
        assert_eq!(slots, vec![plan]);
    }

    #[test]
    fn coalesce_span_spans_min_to_max_regardless_of_order() {
        let chunks = [FrameRange::new(10, 19), FrameRange::new(30, 39), FrameRange::new(20, 29)];
        assert_eq!(coalesce_span(&chunks), Some(FrameRange::new(10, 39)));
    }

    #[test]
    fn coalesce_span_empty_is_none() {
        assert_eq!(coalesce_span(&[]), None);
    }
}
