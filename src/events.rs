//! Progress/log event bus (spec §9 Design Notes).
//!
//! Delivered to zero or more subscribers without blocking producers. Backed
//! by `tokio::sync::broadcast`: a lagging subscriber misses old events
//! instead of the producer blocking on it, which is the "drop-on-overflow"
//! behavior the design notes ask for.

use tokio::sync::broadcast;

#[derive(Debug, Clone)]
pub struct ProgressEvent {
    pub scene_stem: String,
    pub total_missing: usize,
    pub completed_in_session: usize,
}

#[derive(Debug, Clone)]
pub enum LogEvent {
    SceneComplete { scene_stem: String },
    SceneSkipped { scene_stem: String, reason: String },
    ChunkFailed { scene_stem: String, chunk: (i64, i64), reason: String },
    Info(String),
    Warn(String),
}

/// Raw signal from the upload server (spec §4.8): a frame landed for some
/// job. The scheduler is the one that knows each job's scene and missing
/// set, so it subscribes to this and turns it into a [`ProgressEvent`].
#[derive(Debug, Clone)]
pub struct FrameReceived {
    pub job_id: String,
    pub frame: i64,
}

#[derive(Debug, Clone)]
pub enum Event {
    Progress(ProgressEvent),
    Log(LogEvent),
    FrameReceived(FrameReceived),
}

const BUS_CAPACITY: usize = 1024;

/// Non-blocking publish/subscribe handle shared across the coordinator.
#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<Event>,
}

impl EventBus {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(BUS_CAPACITY);
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.sender.subscribe()
    }

    /// Never blocks. A dropped send (no subscribers, or a full channel
    /// dropped by the broadcast queue itself) is intentionally ignored.
    pub fn publish(&self, event: Event) {
        let _ = self.sender.send(event);
    }

    pub fn progress(&self, scene_stem: &str, total_missing: usize, completed_in_session: usize) {
        self.publish(Event::Progress(ProgressEvent {
            scene_stem: scene_stem.to_string(),
            total_missing,
            completed_in_session,
        }));
        crate::metrics::record_frame_progress(scene_stem, completed_in_session);
    }

    pub fn frame_received(&self, job_id: &str, frame: i64) {
        self.publish(Event::FrameReceived(FrameReceived { job_id: job_id.to_string(), frame }));
    }

    pub fn log(&self, event: LogEvent) {
        match &event {
            LogEvent::SceneComplete { scene_stem } => {
                tracing::info!(scene = %scene_stem, "scene complete")
            }
            LogEvent::SceneSkipped { scene_stem, reason } => {
                tracing::warn!(scene = %scene_stem, reason = %reason, "scene skipped")
            }
            LogEvent::ChunkFailed { scene_stem, chunk, reason } => {
                tracing::warn!(scene = %scene_stem, ?chunk, reason = %reason, "chunk failed")
            }
            LogEvent::Info(msg) => tracing::info!("{msg}"),
            LogEvent::Warn(msg) => tracing::warn!("{msg}"),
        }
        self.publish(Event::Log(event));
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}
