//! CLI surface: a single `blendfarm` binary with `coordinator`/`worker`/`plan`
//! subcommands, mirroring the teacher's single-binary `Render`/`Lsp`
//! `clap::Subcommand` split.

use std::net::IpAddr;
use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};

#[derive(Parser, Debug)]
#[command(name = "blendfarm", version, about = "Distributed render farm coordinator/worker")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Log output format.
    #[arg(long, global = true, value_enum, default_value_t = LogFormat::Pretty)]
    pub log_format: LogFormat,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, ValueEnum)]
pub enum LogFormat {
    Pretty,
    Json,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run the coordinator: discover workers, scan scenes, dispatch jobs.
    Coordinator(CoordinatorArgs),
    /// Run a worker: listen for discovery probes and job dispatches.
    Worker(WorkerArgs),
    /// Dry-run: print the chunk plan for a scene without starting any
    /// network service or renderer.
    Plan(PlanArgs),
}

#[derive(clap::Args, Debug, Clone)]
pub struct CoreConfig {
    /// Path to the renderer executable.
    #[arg(long, env = "BLENDFARM_RENDERER_EXE")]
    pub renderer_exe: PathBuf,

    /// Scene files to render.
    #[arg(long = "scene", required = true)]
    pub scenes: Vec<PathBuf>,

    /// Root directory for rendered output, keyed by scene stem.
    #[arg(long, env = "BLENDFARM_OUT_ROOT", default_value = "out")]
    pub out_root: PathBuf,

    /// Maximum frames per dispatched chunk.
    #[arg(long, env = "BLENDFARM_CHUNK_SIZE", default_value_t = 10)]
    pub chunk_size: i64,

    /// Run an auxiliary Python script alongside the render.
    #[arg(long, env = "BLENDFARM_RUN_SCRIPT", default_value_t = false)]
    pub run_script: bool,

    /// Script name passed to the renderer when `run_script` is set.
    #[arg(long, env = "BLENDFARM_SCRIPT_NAME", default_value = "")]
    pub script_name: String,

    /// One-shot dependency-introspection script fed to the renderer.
    #[arg(long, env = "BLENDFARM_DEPENDENCY_SCRIPT")]
    pub dependency_script: PathBuf,

    /// Discovery probe period.
    #[arg(long, env = "BLENDFARM_DISCOVERY_PERIOD_MS", default_value_t = 3000)]
    pub discovery_period_ms: u64,

    #[arg(long, env = "BLENDFARM_UDP_PORT", default_value_t = 50000)]
    pub udp_port: u16,

    #[arg(long, env = "BLENDFARM_JOB_PORT", default_value_t = 50010)]
    pub job_port: u16,

    #[arg(long, env = "BLENDFARM_UPLOAD_PORT", default_value_t = 50020)]
    pub upload_port: u16,
}

#[derive(clap::Args, Debug, Clone)]
pub struct CoordinatorArgs {
    #[command(flatten)]
    pub core: CoreConfig,

    /// Address this coordinator advertises to workers for frame uploads.
    #[arg(long, env = "BLENDFARM_UPLOAD_HOST")]
    pub upload_host: String,

    /// Bind address for the ambient HTTP surface (`/live`, `/metrics`).
    #[arg(long, env = "BLENDFARM_HTTP_BIND", default_value = "0.0.0.0:9000")]
    pub http_bind: String,
}

#[derive(clap::Args, Debug, Clone)]
pub struct WorkerArgs {
    #[arg(long, env = "BLENDFARM_RENDERER_EXE")]
    pub renderer_exe: PathBuf,

    /// Directory staged jobs and their output frames live under.
    #[arg(long, env = "BLENDFARM_JOBS_ROOT", default_value = "jobs")]
    pub jobs_root: PathBuf,

    /// IP address this worker advertises in discovery replies.
    #[arg(long, env = "BLENDFARM_ADVERTISED_IP")]
    pub advertised_ip: IpAddr,

    #[arg(long, env = "BLENDFARM_UDP_PORT", default_value_t = 50000)]
    pub udp_port: u16,

    #[arg(long, env = "BLENDFARM_JOB_PORT", default_value_t = 50010)]
    pub job_port: u16,

    /// Bind address for the ambient HTTP surface (`/live`, `/metrics`).
    #[arg(long, env = "BLENDFARM_HTTP_BIND", default_value = "0.0.0.0:9001")]
    pub http_bind: String,
}

#[derive(clap::Args, Debug, Clone)]
pub struct PlanArgs {
    #[arg(long, env = "BLENDFARM_RENDERER_EXE")]
    pub renderer_exe: PathBuf,

    pub scene: PathBuf,

    #[arg(long, default_value = "out")]
    pub out_root: PathBuf,

    #[arg(long, default_value_t = 10)]
    pub chunk_size: i64,
}
