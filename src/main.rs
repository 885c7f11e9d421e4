//! Streaming inference demo CLI
//!
//! Runs the pipeline over a synthetic source and executor, which makes the
//! scheduling behaviour observable without model or camera hardware.

use std::time::Duration;

use clap::Parser;
use infer_stream::synthetic::{NullSink, SyntheticExecutor, SyntheticSource};
use infer_stream::{Pipeline, PipelineConfig, PipelineError, PipelineMode};
use tracing::{error, info};
use tracing_subscriber::{fmt, EnvFilter};

const EXIT_OK: i32 = 0;
const EXIT_RUNTIME: i32 = 1;
const EXIT_CONFIG: i32 = 2;
const EXIT_QUIT: i32 = 130;

#[derive(Parser, Debug)]
#[command(name = "infer-stream")]
#[command(about = "Concurrent streaming inference pipeline demo")]
#[command(version)]
struct Cli {
    /// Operating discipline
    #[arg(short, long, value_enum, default_value = "camera")]
    mode: PipelineMode,

    /// Path to a TOML configuration file (CLI flags override it)
    #[arg(short, long)]
    config: Option<String>,

    /// Number of frames to stream (default: 300 for video, endless for camera)
    #[arg(long)]
    frames: Option<u64>,

    /// Number of concurrent executors
    #[arg(short, long)]
    workers: Option<usize>,

    /// Pacing target in frames per second
    #[arg(long)]
    fps: Option<f64>,

    /// Nominal source rate in frames per second
    #[arg(long, default_value_t = 30.0)]
    source_fps: f64,

    /// Synthetic model latency in milliseconds
    #[arg(long, default_value_t = 40)]
    inference_ms: u64,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,
}

fn main() {
    std::process::exit(run());
}

fn run() -> i32 {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };
    fmt().with_env_filter(filter).with_target(false).init();

    let mut config = match &cli.config {
        Some(path) => match PipelineConfig::load(path) {
            Ok(config) => config,
            Err(err) => {
                error!(config_path = %path, error = %err, "invalid configuration");
                return EXIT_CONFIG;
            }
        },
        None => PipelineConfig::for_mode(cli.mode),
    };
    if let Some(workers) = cli.workers {
        config.max_workers = workers;
    }
    if cli.fps.is_some() {
        config.target_fps = cli.fps;
    }

    let source = match (config.mode, cli.frames) {
        (_, Some(frames)) => SyntheticSource::finite(frames, cli.source_fps),
        (PipelineMode::Video, None) => SyntheticSource::finite(300, cli.source_fps),
        (PipelineMode::Camera, None) => SyntheticSource::endless(cli.source_fps),
    };

    let latency = Duration::from_millis(cli.inference_ms);
    let pipeline = match Pipeline::new(
        config,
        source,
        move || Ok(SyntheticExecutor::new(latency)),
        NullSink::default(),
    ) {
        Ok(pipeline) => pipeline,
        Err(PipelineError::Config(err)) => {
            error!(error = %err, "invalid configuration");
            return EXIT_CONFIG;
        }
        Err(err) => {
            error!(error = %err, "failed to build pipeline");
            return EXIT_RUNTIME;
        }
    };

    // Ctrl+C raises the shared stop signal; every actor winds down from it.
    let stop = pipeline.stop_signal();
    if let Err(err) = signal_hook::flag::register(signal_hook::consts::SIGINT, stop.flag()) {
        error!(error = %err, "failed to register SIGINT handler");
        return EXIT_RUNTIME;
    }

    match pipeline.run() {
        Ok(summary) => {
            info!(
                produced = summary.monitor.produced,
                displayed = summary.monitor.displayed,
                dropped = summary.monitor.dropped(),
                errors = summary.monitor.processed_error,
                timeouts = summary.monitor.processed_timeout,
                displayed_fps = summary.monitor.displayed_fps,
                "run complete"
            );
            if summary.quit || stop.is_stopped() {
                EXIT_QUIT
            } else {
                EXIT_OK
            }
        }
        Err(err) => {
            error!(error = %err, "pipeline failed");
            EXIT_RUNTIME
        }
    }
}
