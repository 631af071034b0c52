//! End-to-end test for the job dispatch/upload round trip.
//!
//! Spawns the real `blendfarm worker` binary against a fake renderer
//! executable (`tests/fixtures/fake_renderer.sh`), drives it over the real
//! TCP job-dispatch protocol, and checks that frames land on a fake
//! coordinator-side upload listener — mirroring the teacher's "spawn the
//! real binary, poll readiness, assert behavior" e2e style.
//!
//! Unix-only: the fixture is a shell script and the worker's process-group
//! kill path is unix-specific.
#![cfg(unix)]

use std::net::TcpListener as StdTcpListener;
use std::path::PathBuf;
use std::process::{Child, Command, Stdio};
use std::time::Duration;

use tokio::net::TcpListener;
use tokio::time::timeout;

use blendfarm::model::Dependency;
use blendfarm::protocol::dispatch::{self, DispatchHeader};
use blendfarm::protocol::upload;

fn find_available_port() -> u16 {
    StdTcpListener::bind("127.0.0.1:0")
        .expect("failed to bind")
        .local_addr()
        .expect("failed to read local addr")
        .port()
}

fn fixture_renderer() -> PathBuf {
    use std::os::unix::fs::PermissionsExt;
    let path = PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("tests/fixtures/fake_renderer.sh");
    let mut perms = std::fs::metadata(&path).unwrap().permissions();
    perms.set_mode(0o755);
    std::fs::set_permissions(&path, perms).unwrap();
    path
}

struct WorkerProcess {
    process: Child,
}

impl Drop for WorkerProcess {
    fn drop(&mut self) {
        let _ = self.process.kill();
        let _ = self.process.wait();
    }
}

async fn wait_for_live(http_port: u16, timeout_dur: Duration) -> bool {
    let client = reqwest::Client::new();
    let start = std::time::Instant::now();
    while start.elapsed() < timeout_dur {
        if client
            .get(format!("http://127.0.0.1:{http_port}/live"))
            .send()
            .await
            .is_ok()
        {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
    false
}

fn spawn_worker(renderer_exe: &PathBuf, jobs_root: &PathBuf, udp_port: u16, job_port: u16, http_port: u16) -> WorkerProcess {
    let manifest_dir = PathBuf::from(env!("CARGO_MANIFEST_DIR"));
    let process = Command::new("cargo")
        .args([
            "run",
            "--bin",
            "blendfarm",
            "--",
            "worker",
            "--renderer-exe",
            renderer_exe.to_str().unwrap(),
            "--jobs-root",
            jobs_root.to_str().unwrap(),
            "--advertised-ip",
            "127.0.0.1",
            "--udp-port",
            &udp_port.to_string(),
            "--job-port",
            &job_port.to_string(),
            "--http-bind",
            &format!("127.0.0.1:{http_port}"),
        ])
        .current_dir(&manifest_dir)
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .spawn()
        .expect("failed to spawn worker");

    WorkerProcess { process }
}

#[tokio::test]
async fn worker_renders_and_uploads_dispatched_chunk() {
    let renderer_exe = fixture_renderer();
    let jobs_root = tempfile::tempdir().unwrap();
    let scene_dir = tempfile::tempdir().unwrap();
    let scene_path = scene_dir.path().join("scene.blend");
    std::fs::write(&scene_path, b"not a real scene, the fake renderer ignores this").unwrap();

    let udp_port = find_available_port();
    let job_port = find_available_port();
    let http_port = find_available_port();
    let upload_port = find_available_port();

    let _worker = spawn_worker(&renderer_exe, &jobs_root.path().to_path_buf(), udp_port, job_port, http_port);
    assert!(
        wait_for_live(http_port, Duration::from_secs(30)).await,
        "worker did not become ready in time"
    );

    // Fake coordinator-side upload server: accepts connections and records
    // every frame it receives.
    let upload_listener = TcpListener::bind(("127.0.0.1", upload_port)).await.unwrap();
    let collector = tokio::spawn(async move {
        let mut received = Vec::new();
        while received.len() < 3 {
            let Ok(Ok((mut stream, _))) = timeout(Duration::from_secs(10), upload_listener.accept()).await else {
                break;
            };
            if let Ok((header, _payload)) = upload::receive_frame(&mut stream).await {
                received.push((header.job_id, header.frame));
            }
        }
        received
    });

    let header = DispatchHeader::new(
        "scene_1-3".to_string(),
        "scene.blend".to_string(),
        Vec::new(),
        1,
        3,
        "127.0.0.1".to_string(),
        upload_port,
        false,
        String::new(),
    );

    dispatch::send_job(
        ("127.0.0.1".parse().unwrap(), job_port),
        &header,
        &scene_path,
        &[] as &[Dependency],
    )
    .await
    .expect("dispatch failed");

    let received = timeout(Duration::from_secs(15), collector)
        .await
        .expect("timed out waiting for uploads")
        .expect("collector task panicked");

    let mut frames: Vec<i64> = received.iter().map(|(_, f)| *f).collect();
    frames.sort_unstable();
    frames.dedup();
    assert_eq!(frames, vec![1, 2, 3]);
    assert!(received.iter().all(|(job_id, _)| job_id == "scene_1-3"));
}

#[tokio::test]
async fn worker_exposes_live_and_metrics() {
    let renderer_exe = fixture_renderer();
    let jobs_root = tempfile::tempdir().unwrap();

    let udp_port = find_available_port();
    let job_port = find_available_port();
    let http_port = find_available_port();

    let _worker = spawn_worker(&renderer_exe, &jobs_root.path().to_path_buf(), udp_port, job_port, http_port);
    assert!(
        wait_for_live(http_port, Duration::from_secs(30)).await,
        "worker did not become ready in time"
    );

    let client = reqwest::Client::new();
    let response = client
        .get(format!("http://127.0.0.1:{http_port}/metrics"))
        .send()
        .await
        .expect("failed to fetch metrics");
    assert!(response.status().is_success());

    let body = response.text().await.unwrap();
    assert!(body.contains("# HELP"));
    assert!(body.contains("frames_received_total"));
}
