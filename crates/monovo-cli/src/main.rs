use std::path::PathBuf;

use anyhow::{Context, bail};
use clap::{Args, Parser, Subcommand};
use monovo_cli::config::{load_intrinsics, load_vo_config};
use monovo_cli::eval::{DEFAULT_MAX_TIME_DIFF, evaluate};
use monovo_cli::output::tum::read_tum;
use monovo_cli::{DatasetFormat, FrameRange, OutputPaths, ProcessingConfig, SequenceProcessor};
use monovo_core::VoConfig;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "monovo", version, about = "Monocular visual odometry over recorded datasets")]
struct Cli {
    /// Debug-level logs (RUST_LOG takes precedence).
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Estimate trajectories and point clouds for one or more datasets.
    Run(RunArgs),
    /// Compare an estimated TUM trajectory with ground truth.
    Eval(EvalArgs),
}

#[derive(Debug, Args)]
struct RunArgs {
    /// Dataset root, or a video file with `--format video`; repeat to process
    /// several streams in parallel.
    #[arg(long = "dataset", required = true)]
    datasets: Vec<PathBuf>,

    #[arg(long, value_enum, default_value_t = DatasetFormat::Euroc)]
    format: DatasetFormat,

    /// Result document (JSON).
    #[arg(short, long)]
    output: PathBuf,

    /// Pipeline configuration (YAML).
    #[arg(long)]
    config: Option<PathBuf>,

    /// Camera intrinsics (YAML); overrides config and dataset calibration.
    #[arg(long)]
    intrinsics: Option<PathBuf>,

    /// Also export the map as an ASCII PLY point cloud.
    #[arg(long)]
    ply: Option<PathBuf>,

    /// Also export the trajectory in TUM format.
    #[arg(long)]
    tum_trajectory: Option<PathBuf>,

    #[arg(long, default_value_t = 0)]
    start: usize,

    /// First frame index not processed.
    #[arg(long)]
    end: Option<usize>,

    #[arg(long, default_value_t = 1, value_parser = clap::value_parser!(u64).range(1..))]
    stride: u64,

    /// Playback rate for `--format images`; fallback rate for videos.
    #[arg(long, default_value_t = 20.0)]
    fps: f64,

    #[arg(long)]
    checkpoint_every: Option<usize>,

    /// Stop each stream after this much wall-clock time.
    #[arg(long)]
    max_seconds: Option<f64>,
}

#[derive(Debug, Args)]
struct EvalArgs {
    #[arg(long)]
    estimate: PathBuf,

    #[arg(long)]
    groundtruth: PathBuf,

    /// Association tolerance in seconds.
    #[arg(long, default_value_t = DEFAULT_MAX_TIME_DIFF)]
    max_time_diff: f64,

    /// Write the metrics as JSON.
    #[arg(long)]
    json: Option<PathBuf>,
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match cli.command {
        Command::Run(args) => run(args),
        Command::Eval(args) => eval(args),
    }
}

fn init_tracing(verbose: bool) {
    let default_level = if verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

fn run(args: RunArgs) -> anyhow::Result<()> {
    let vo = match &args.config {
        Some(path) => load_vo_config(path)
            .with_context(|| format!("loading config {}", path.display()))?,
        None => VoConfig::default(),
    };
    let intrinsics = args
        .intrinsics
        .as_ref()
        .map(|path| {
            load_intrinsics(path).with_context(|| format!("loading intrinsics {}", path.display()))
        })
        .transpose()?;

    let config = ProcessingConfig {
        format: args.format,
        range: FrameRange::new(args.start, args.end, args.stride as usize)?,
        fps: args.fps,
        checkpoint_every: args.checkpoint_every,
        max_seconds: args.max_seconds,
        vo,
        intrinsics,
    };
    let outputs = OutputPaths {
        json: args.output,
        ply: args.ply,
        tum: args.tum_trajectory,
    };

    let processor = SequenceProcessor::new(config);
    let results = processor.process_all(&args.datasets, &outputs);

    let mut failed = 0;
    for (root, result) in &results {
        match result {
            Ok(output) => info!(
                "{}: {}/{} frames, {} landmarks",
                root.display(),
                output.processed_frames,
                output.total_frames,
                output.summary.landmarks
            ),
            Err(err) => {
                error!("{}: {err}", root.display());
                failed += 1;
            }
        }
    }
    if failed > 0 {
        bail!("{failed} of {} datasets failed", results.len());
    }
    Ok(())
}

fn eval(args: EvalArgs) -> anyhow::Result<()> {
    let estimate = read_tum(&args.estimate)
        .with_context(|| format!("reading {}", args.estimate.display()))?;
    let groundtruth = read_tum(&args.groundtruth)
        .with_context(|| format!("reading {}", args.groundtruth.display()))?;

    let metrics = evaluate(&estimate, &groundtruth, args.max_time_diff)?;
    println!("pairs: {}", metrics.pairs);
    println!("scale: {:.6}", metrics.scale);
    println!("ATE RMSE (m): {:.6}", metrics.ate_rmse);
    println!("ATE max (m): {:.6}", metrics.ate_max);
    println!("RPE RMSE (m): {:.6}", metrics.rpe_rmse);

    if let Some(path) = &args.json {
        std::fs::write(path, serde_json::to_string_pretty(&metrics)?)
            .with_context(|| format!("writing {}", path.display()))?;
    }
    Ok(())
}
