//! Coordinator upload server (spec §4.8): accepts one fresh connection per
//! frame on port `U`, resolves a destination directory by `job_id`, and
//! writes the payload as `destination_dir/filename`.

use std::path::PathBuf;

use dashmap::DashMap;
use tokio::net::{TcpListener, TcpStream};
use tokio_util::sync::CancellationToken;

use crate::error::FarmError;
use crate::events::EventBus;
use crate::protocol::upload;

/// `job_id -> output_dir` registry, populated by the scheduler before
/// dispatch and consulted by every accepted upload connection.
#[derive(Clone, Default)]
pub struct JobDestinations {
    inner: std::sync::Arc<DashMap<String, PathBuf>>,
}

impl JobDestinations {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, job_id: String, output_dir: PathBuf) {
        self.inner.insert(job_id, output_dir);
    }

    /// Registers `job_id`, appending a `_dup<n>` suffix if it already names a
    /// destination (spec: the `<stem>_<a>-<b>` convention is not unique
    /// across coordinator runs, e.g. a re-dispatch after a crash). Returns
    /// the id actually registered.
    pub fn register_unique(&self, job_id: String, output_dir: PathBuf) -> String {
        if !self.inner.contains_key(&job_id) {
            self.inner.insert(job_id.clone(), output_dir);
            return job_id;
        }
        let mut n = 2;
        loop {
            let candidate = format!("{job_id}_dup{n}");
            if !self.inner.contains_key(&candidate) {
                self.inner.insert(candidate.clone(), output_dir);
                return candidate;
            }
            n += 1;
        }
    }

    pub fn resolve(&self, job_id: &str) -> Option<PathBuf> {
        self.inner.get(job_id).map(|entry| entry.clone())
    }
}

pub async fn run(
    upload_port: u16,
    destinations: JobDestinations,
    events: EventBus,
    cancel: CancellationToken,
) -> Result<(), FarmError> {
    let listener = TcpListener::bind(("0.0.0.0", upload_port))
        .await
        .map_err(|e| FarmError::NetworkError(format!("upload server bind failed: {e}")))?;

    loop {
        tokio::select! {
            _ = cancel.cancelled() => return Ok(()),
            accepted = listener.accept() => {
                match accepted {
                    Ok((stream, peer)) => {
                        let destinations = destinations.clone();
                        let events = events.clone();
                        tokio::spawn(async move {
                            if let Err(err) = handle_connection(stream, &destinations, &events).await {
                                tracing::warn!(%peer, %err, "upload connection failed");
                            }
                        });
                    }
                    Err(err) => tracing::warn!(%err, "upload server accept error"),
                }
            }
        }
    }
}

async fn handle_connection(
    mut stream: TcpStream,
    destinations: &JobDestinations,
    events: &EventBus,
) -> Result<(), FarmError> {
    let (header, payload) = upload::receive_frame(&mut stream).await?;

    let Some(dest_dir) = destinations.resolve(&header.job_id) else {
        return Err(FarmError::IntegrityError(format!(
            "unknown destination for job {}",
            header.job_id
        )));
    };

    tokio::fs::create_dir_all(&dest_dir).await?;
    tokio::fs::write(dest_dir.join(&header.filename), &payload).await?;

    crate::metrics::record_frame_received();
    events.frame_received(&header.job_id, header.frame);

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn destinations_resolve_after_register() {
        let destinations = JobDestinations::new();
        destinations.register("job_1-10".into(), PathBuf::from("/out/intro"));
        assert_eq!(destinations.resolve("job_1-10"), Some(PathBuf::from("/out/intro")));
        assert_eq!(destinations.resolve("missing"), None);
    }

    #[test]
    fn register_unique_appends_suffix_on_collision() {
        let destinations = JobDestinations::new();
        let first = destinations.register_unique("intro_1-10".into(), PathBuf::from("/out/a"));
        let second = destinations.register_unique("intro_1-10".into(), PathBuf::from("/out/b"));
        assert_eq!(first, "intro_1-10");
        assert_eq!(second, "intro_1-10_dup2");
        assert_eq!(destinations.resolve("intro_1-10"), Some(PathBuf::from("/out/a")));
        assert_eq!(destinations.resolve("intro_1-10_dup2"), Some(PathBuf::from("/out/b")));
    }
}
