//! Homogenizer
//!
//! Batch homogenization of a gridded climate variable against a reference
//! product, and transfer of the resulting adjustments to derived variables.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use tracing::{info, warn};
use tracing_subscriber::{fmt, EnvFilter};

use homogenizer::{load_run_config, read_grid, read_result, write_result, ReferenceGrid};

/// Homogenizer
#[derive(Parser, Debug)]
#[command(name = "homogenizer")]
#[command(about = "Breakpoint detection and correction for gridded climate data")]
struct Args {
    #[command(subcommand)]
    command: Command,

    /// Log level
    #[arg(long, default_value = "info", env = "RUST_LOG", global = true)]
    log_level: String,

    /// Log format (json or pretty)
    #[arg(long, default_value = "json", env = "HOMOGENIZER_LOG_FORMAT", global = true)]
    log_format: String,

    /// Number of worker threads for the grid pass
    #[arg(long, env = "HOMOGENIZER_THREADS", global = true)]
    threads: Option<usize>,

    /// Write Prometheus metrics to this file when the run ends
    #[arg(long, env = "HOMOGENIZER_METRICS_FILE", global = true)]
    metrics_file: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Homogenize a target grid against a reference grid
    Run {
        /// Run configuration file path
        #[arg(short, long, env = "HOMOGENIZER_CONFIG")]
        config: PathBuf,

        /// Target grid (JSON)
        #[arg(long)]
        target: PathBuf,

        /// Reference grid (JSON); the eastward component with --reference-v
        #[arg(long)]
        reference: PathBuf,

        /// Northward wind component of the reference (JSON)
        #[arg(long)]
        reference_v: Option<PathBuf>,

        /// Output result document
        #[arg(short, long)]
        output: PathBuf,
    },

    /// Apply the adjustments of a stored run to a derived variable
    Transfer {
        /// Run configuration of the derived variable
        #[arg(short, long, env = "HOMOGENIZER_CONFIG")]
        config: PathBuf,

        /// Result document of the base variable
        #[arg(long)]
        base: PathBuf,

        /// Derived variable grid (JSON)
        #[arg(long)]
        derived: PathBuf,

        /// Output result document
        #[arg(short, long)]
        output: PathBuf,
    },
}

fn main() -> Result<()> {
    // Load .env file if present
    dotenvy::dotenv().ok();

    let args = Args::parse();
    init_tracing(&args)?;

    if let Some(threads) = args.threads {
        info!("Configuring grid pass with {} worker threads", threads);
        rayon::ThreadPoolBuilder::new()
            .num_threads(threads)
            .build_global()
            .context("Failed to configure worker threads")?;
    }

    let prometheus = match &args.metrics_file {
        Some(_) => Some(
            PrometheusBuilder::new()
                .install_recorder()
                .context("Failed to install Prometheus recorder")?,
        ),
        None => None,
    };

    let outcome = execute(&args.command);

    if let (Some(handle), Some(path)) = (&prometheus, &args.metrics_file) {
        if let Err(e) = write_metrics(handle, path) {
            warn!(error = %e, "Failed to write metrics");
        }
    }

    outcome
}

fn init_tracing(args: &Args) -> Result<()> {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level));
    let builder = fmt().with_env_filter(filter).with_target(true).with_level(true);

    match args.log_format.to_lowercase().as_str() {
        "json" => builder.json().try_init(),
        "pretty" => builder.pretty().try_init(),
        other => anyhow::bail!("Invalid log format: {}. Must be one of: json, pretty", other),
    }
    .map_err(|e| anyhow::anyhow!("Failed to initialize tracing: {}", e))
}

fn execute(command: &Command) -> Result<()> {
    match command {
        Command::Run {
            config,
            target,
            reference,
            reference_v,
            output,
        } => {
            let config = load_run_config(config)?;
            info!(variable = %config.variable.name, "Starting homogenization run");

            let target = read_grid(target)?;
            let reference = match reference_v {
                Some(v) => ReferenceGrid::WindComponents {
                    u: read_grid(reference)?,
                    v: read_grid(v)?,
                },
                None => ReferenceGrid::Direct(read_grid(reference)?),
            };

            let document = homogenizer::run(&config, &target, &reference, None)?;
            write_result(output, &document)?;
            info!(output = ?output, "Wrote result document");
        }
        Command::Transfer {
            config,
            base,
            derived,
            output,
        } => {
            let config = load_run_config(config)?;
            let base = read_result(base)?;
            info!(
                base = %base.variable.name,
                variable = %config.variable.name,
                "Starting adjustment transfer"
            );

            let derived = read_grid(derived)?;
            let document = homogenizer::transfer(&config, &base, &derived)?;
            write_result(output, &document)?;
            info!(output = ?output, "Wrote result document");
        }
    }
    Ok(())
}

fn write_metrics(handle: &PrometheusHandle, path: &Path) -> Result<()> {
    fs::write(path, handle.render())
        .with_context(|| format!("Failed to write metrics to {:?}", path))?;
    info!(path = ?path, "Wrote metrics");
    Ok(())
}
