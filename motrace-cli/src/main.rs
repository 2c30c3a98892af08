// motrace command line interface
// Runs tracking pipelines over recorded detection streams

use anyhow::{bail, Context};
use chrono::Local;
use clap::{Parser, Subcommand};
use motrace_core::{
    trajectory_file_name, FanoutSink, JsonFileSink, LogSink, PipelineSession, ReplaySegmenter,
    ReplaySource, Sink, TrackingConfig,
};
use std::path::{Path, PathBuf};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "motrace")]
#[command(about = "Multi-object motion tracking over recorded detection streams", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Log level (error, warn, info, debug, trace); RUST_LOG takes precedence
    #[arg(long, default_value = "info", global = true)]
    log_level: String,

    /// Emit logs as JSON
    #[arg(long, global = true)]
    log_json: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Track objects in a recorded detection stream
    Run {
        /// JSON-lines detection stream, one frame per line
        #[arg(long, short)]
        input: PathBuf,

        /// Configuration file (JSON, TOML, or YAML)
        #[arg(long, short)]
        config: Option<PathBuf>,

        /// Frame rate used for frames without a timestamp
        #[arg(long, default_value = "30")]
        fps: f64,

        /// Trajectory export path
        #[arg(long, short, conflicts_with = "output_dir")]
        output: Option<PathBuf>,

        /// Directory for a timestamped trajectory export
        #[arg(long)]
        output_dir: Option<PathBuf>,

        /// Log every snapshot row
        #[arg(long)]
        print: bool,
    },

    /// Configuration management
    #[command(subcommand)]
    Config(ConfigCommands),
}

#[derive(Subcommand)]
enum ConfigCommands {
    /// Show effective configuration as TOML
    Show {
        /// Configuration file to start from instead of the defaults
        #[arg(long, short)]
        config: Option<PathBuf>,
    },

    /// Check a configuration file
    Validate {
        file: PathBuf,
    },
}

fn init_logging(level: &str, json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

fn load_config(path: Option<&Path>) -> anyhow::Result<TrackingConfig> {
    let config = match path {
        Some(path) => TrackingConfig::from_file(path)
            .with_context(|| format!("Failed to load configuration from {}", path.display()))?,
        None => TrackingConfig::default(),
    };
    Ok(config.with_env_overrides())
}

fn export_path(input: &Path, output: Option<PathBuf>, output_dir: Option<PathBuf>) -> PathBuf {
    match (output, output_dir) {
        (Some(path), _) => path,
        (None, dir) => dir
            .unwrap_or_else(|| PathBuf::from("."))
            .join(trajectory_file_name(input, &Local::now())),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_logging(&cli.log_level, cli.log_json);

    match cli.command {
        Commands::Run {
            input,
            config,
            fps,
            output,
            output_dir,
            print,
        } => run(input, config, fps, output, output_dir, print).await,
        Commands::Config(cmd) => handle_config_command(cmd),
    }
}

async fn run(
    input: PathBuf,
    config: Option<PathBuf>,
    fps: f64,
    output: Option<PathBuf>,
    output_dir: Option<PathBuf>,
    print: bool,
) -> anyhow::Result<()> {
    if !(fps.is_finite() && fps > 0.0) {
        bail!("--fps must be a positive number, got {}", fps);
    }

    let config = load_config(config.as_deref())?;
    let export = export_path(&input, output, output_dir);

    let mut sinks: Vec<Box<dyn Sink>> = vec![Box::new(JsonFileSink::new(&export))];
    if print {
        sinks.push(Box::new(LogSink));
    }

    info!("Tracking {} -> {}", input.display(), export.display());
    let session = PipelineSession::start(
        config,
        ReplaySource::from_file(&input, fps),
        ReplaySegmenter,
        Box::new(FanoutSink::new(sinks)),
    )
    .context("Failed to start pipeline")?;

    let cancel = session.cancellation();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted, stopping pipeline");
            cancel.cancel();
        }
    });

    let summary = session
        .wait()
        .await
        .with_context(|| format!("Tracking run over {} failed", input.display()))?;

    println!("{}", serde_json::to_string_pretty(&summary)?);
    Ok(())
}

fn handle_config_command(cmd: ConfigCommands) -> anyhow::Result<()> {
    match cmd {
        ConfigCommands::Show { config } => {
            let config = load_config(config.as_deref())?;
            print!("{}", config.to_toml_string()?);
        }
        ConfigCommands::Validate { file } => {
            let config = TrackingConfig::from_file(&file)
                .with_context(|| format!("Failed to load {}", file.display()))?;
            if let Err(e) = config.validate() {
                bail!("{} is invalid: {}", file.display(), e);
            }
            println!("{} is valid", file.display());
        }
    }
    Ok(())
}
