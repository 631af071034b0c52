mod cli;

use std::sync::Arc;

use clap::Parser;
use tokio_util::sync::CancellationToken;

use blendfarm::coordinator::roster::Roster;
use blendfarm::coordinator::scheduler::{Scheduler, SchedulerConfig};
use blendfarm::coordinator::upload_server::JobDestinations;
use blendfarm::discovery;
use blendfarm::events::EventBus;
use blendfarm::http::{self, HttpState};
use blendfarm::worker::server::{self as job_server, WorkerConfig};
use blendfarm::{metrics, telemetry};

use cli::{Cli, Command, CoordinatorArgs, LogFormat, PlanArgs, WorkerArgs};

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let log_format = match cli.log_format {
        LogFormat::Pretty => telemetry::LogFormat::Pretty,
        LogFormat::Json => telemetry::LogFormat::Json,
    };
    let telemetry_config = telemetry::TelemetryConfig {
        service_name: "blendfarm".to_string(),
        log_format,
        ..Default::default()
    };
    let provider = telemetry::init_tracing(telemetry_config);
    let metrics_handle = metrics::init_metrics();

    let runtime = tokio::runtime::Runtime::new()?;
    let result = runtime.block_on(async {
        match cli.command {
            Command::Coordinator(args) => run_coordinator(args, metrics_handle).await,
            Command::Worker(args) => run_worker(args, metrics_handle).await,
            Command::Plan(args) => run_plan(args).await,
        }
    });

    telemetry::shutdown_tracing(provider);
    result
}

async fn run_coordinator(args: CoordinatorArgs, metrics_handle: metrics_exporter_prometheus::PrometheusHandle) -> anyhow::Result<()> {
    let core = args.core;
    if core.chunk_size < 1 {
        anyhow::bail!("chunk_size must be >= 1");
    }
    if core.scenes.is_empty() {
        anyhow::bail!("at least one --scene is required");
    }

    http::spawn(HttpState { metrics_handle }, args.http_bind.clone());

    let roster = Arc::new(Roster::new());
    let destinations = JobDestinations::new();
    let events = EventBus::new();
    let cancel = CancellationToken::new();

    let discovery_cancel = cancel.clone();
    let roster_for_discovery = roster.clone();
    let events_for_discovery = events.clone();
    tokio::spawn(discovery::run_probe_loop(
        core.udp_port,
        std::time::Duration::from_millis(core.discovery_period_ms),
        std::time::Duration::from_secs(1),
        discovery_cancel,
        move |replies| {
            metrics::record_discovery_cycle(replies.len());
            for reply in replies {
                let roster = roster_for_discovery.clone();
                let events = events_for_discovery.clone();
                tokio::spawn(async move {
                    roster.observe(reply.clone()).await;
                    roster.set_selected(reply.ip, true).await;
                    events.log(blendfarm::events::LogEvent::Info(format!(
                        "worker discovered: {}@{}",
                        reply.hostname, reply.ip
                    )));
                });
            }
        },
    ));

    let upload_cancel = cancel.clone();
    let upload_destinations = destinations.clone();
    let upload_events = events.clone();
    tokio::spawn(async move {
        if let Err(err) = blendfarm::coordinator::upload_server::run(
            core.upload_port,
            upload_destinations,
            upload_events,
            upload_cancel,
        )
        .await
        {
            tracing::error!(%err, "upload server exited");
        }
    });

    let scheduler = Scheduler::new(
        SchedulerConfig {
            renderer_exe: core.renderer_exe.clone(),
            out_root: core.out_root.clone(),
            chunk_size: core.chunk_size,
            run_script: core.run_script,
            script_name: core.script_name.clone(),
            upload_host: args.upload_host.clone(),
            upload_port: core.upload_port,
            dependency_script: core.dependency_script.clone(),
        },
        roster,
        destinations,
        events,
    );

    for scene in &core.scenes {
        if let Err(err) = scheduler.render_scene(scene.clone()).await {
            tracing::error!(scene = %scene.display(), %err, "scene failed");
        }
    }

    tokio::signal::ctrl_c().await?;
    scheduler.cancel_all();
    cancel.cancel();
    Ok(())
}

async fn run_worker(args: WorkerArgs, metrics_handle: metrics_exporter_prometheus::PrometheusHandle) -> anyhow::Result<()> {
    http::spawn(HttpState { metrics_handle }, args.http_bind.clone());

    let cancel = CancellationToken::new();

    let listener_cancel = cancel.clone();
    let advertised_ip = args.advertised_ip;
    let udp_port = args.udp_port;
    let job_port = args.job_port;
    tokio::spawn(async move {
        if let Err(err) = discovery::listen(udp_port, job_port, advertised_ip, listener_cancel).await {
            tracing::error!(%err, "discovery listener exited");
        }
    });

    let config = WorkerConfig { jobs_root: args.jobs_root, renderer_exe: args.renderer_exe };
    let server_cancel = cancel.clone();
    let job_server_handle = tokio::spawn(async move { job_server::run(config, job_port, server_cancel).await });

    tokio::signal::ctrl_c().await?;
    cancel.cancel();
    let _ = job_server_handle.await;
    Ok(())
}

async fn run_plan(args: PlanArgs) -> anyhow::Result<()> {
    let range = blendfarm::renderer::probe::probe_frame_range(&args.renderer_exe, &args.scene).await?;
    let stem = args
        .scene
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("scene")
        .to_string();
    let output_dir = args.out_root.join(&stem);
    let existing = blendfarm::scanner::frames::existing_frames(&output_dir);
    let missing: Vec<i64> = (range.start..=range.end).filter(|n| !existing.contains(n)).collect();
    let contiguous = blendfarm::scanner::ranges::contiguous_ranges(&missing);
    let chunks = blendfarm::scanner::ranges::split_by_chunk(&contiguous, args.chunk_size)?;

    println!("scene: {stem}");
    println!("frame range: {}..={}", range.start, range.end);
    println!("missing: {} frames", missing.len());
    for chunk in &chunks {
        println!("chunk: {}..={}", chunk.start, chunk.end);
    }
    Ok(())
}
