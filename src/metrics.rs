use metrics::{counter, describe_counter, describe_histogram, histogram};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use std::time::Instant;

/// Initialize the Prometheus metrics recorder and return the handle for scraping.
pub fn init_metrics() -> PrometheusHandle {
    let handle = PrometheusBuilder::new()
        .install_recorder()
        .expect("failed to install Prometheus recorder");

    describe_counter!("discovery_cycles_total", "Total number of discovery probe cycles run");
    describe_counter!("workers_discovered_total", "Total number of distinct worker replies observed");
    describe_counter!("jobs_dispatched_total", "Total number of chunk jobs dispatched, local and remote");
    describe_counter!("frames_rendered_total", "Total number of frames rendered locally");
    describe_counter!("frames_received_total", "Total number of frames received by the upload server");
    describe_counter!("scene_progress_frames", "Frames completed in the current rendering session, per scene");
    describe_histogram!("chunk_render_duration_seconds", "Wall-clock duration of one local chunk render");
    describe_counter!("http_requests_total", "Total number of ambient HTTP requests served");
    describe_histogram!("http_request_duration_seconds", "Ambient HTTP request duration in seconds");

    counter!("jobs_dispatched_total", "target" => "local").absolute(0);
    counter!("jobs_dispatched_total", "target" => "remote").absolute(0);

    handle
}

pub fn record_discovery_cycle(replies: usize) {
    counter!("discovery_cycles_total").increment(1);
    counter!("workers_discovered_total").increment(replies as u64);
}

pub fn record_job_dispatched(remote: bool) {
    let target = if remote { "remote" } else { "local" };
    counter!("jobs_dispatched_total", "target" => target).increment(1);
}

pub fn record_chunk_rendered(frame_count: u64, duration: std::time::Duration) {
    counter!("frames_rendered_total").increment(frame_count);
    histogram!("chunk_render_duration_seconds").record(duration.as_secs_f64());
}

pub fn record_frame_received() {
    counter!("frames_received_total").increment(1);
}

/// Called with the running total of frames completed in the current
/// rendering session for a scene (spec §4.9 progress reporting).
pub fn record_frame_progress(scene_stem: &str, completed_in_session: usize) {
    counter!("scene_progress_frames", "scene" => scene_stem.to_string()).absolute(completed_in_session as u64);
}

/// Record an ambient HTTP request with its method, path, status, and duration.
pub fn record_request(method: &str, path: &str, status: u16, duration: std::time::Duration) {
    let labels = [
        ("method", method.to_string()),
        ("path", path.to_string()),
        ("status", status.to_string()),
    ];

    counter!("http_requests_total", &labels).increment(1);
    histogram!("http_request_duration_seconds", &labels).record(duration.as_secs_f64());
}

/// A guard that records request duration when dropped.
pub struct RequestTimer {
    start: Instant,
    method: String,
    path: String,
}

impl RequestTimer {
    pub fn new(method: &str, path: &str) -> Self {
        Self {
            start: Instant::now(),
            method: method.to_string(),
            path: path.to_string(),
        }
    }

    pub fn finish(self, status: u16) {
        record_request(&self.method, &self.path, status, self.start.elapsed());
    }
}
