//! gemv-bench CLI
//!
//! Measures latency and throughput of the fused 4-bit GEMV + RMS
//! normalization kernel on the local GPU.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use gemv_bench::BenchConfig;
use tracing::{debug, error};

mod commands;

use commands::{OutputFormat, RunArgs};

/// Fused Q4 GEMV + RMSNorm GPU benchmark
#[derive(Parser)]
#[command(name = "gemv-bench")]
#[command(about = "Benchmark a fused 4-bit GEMV + RMS normalization wgpu kernel")]
#[command(long_about = r#"
Runs one warm-up pass of the kernel, then a fixed number of measured passes
submitted back-to-back, and reports average latency and achieved throughput.

Examples:
  # Default 4096x4096 problem, 100 measured passes
  gemv-bench run

  # Smaller problem, JSON output
  gemv-bench run --dim 1024 --iterations 500 --format json

  # List adapters
  gemv-bench probe

  # Print the effective configuration
  gemv-bench --config bench.toml config
"#)]
#[command(version)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, value_name = "PATH", global = true)]
    config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, value_name = "LEVEL", global = true)]
    log_level: Option<String>,

    /// Log output format
    #[arg(long, value_enum, default_value_t = LogFormat::Compact, global = true)]
    log_format: LogFormat,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum LogFormat {
    Pretty,
    Compact,
    Json,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the benchmark
    #[command(alias = "bench")]
    Run(RunArgs),

    /// List available GPU adapters
    Probe {
        /// Output format
        #[arg(long, value_enum, default_value_t = OutputFormat::Text)]
        format: OutputFormat,
    },

    /// Print the effective configuration as TOML
    Config,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    setup_logging(cli.log_level.as_deref(), cli.log_format);

    let result = match load_configuration(&cli) {
        Ok(config) => match &cli.command {
            Commands::Run(args) => args.execute(config).await,
            Commands::Probe { format } => commands::probe(*format),
            Commands::Config => commands::show_config(&config),
        },
        Err(e) => Err(e),
    };

    if let Err(e) = result {
        error!("Command failed: {}", e);

        let mut source = e.source();
        while let Some(err) = source {
            error!("  Caused by: {}", err);
            source = err.source();
        }

        std::process::exit(1);
    }

    Ok(())
}

/// File (if given) or defaults, then `GEMV_BENCH_*` overrides. Validation
/// waits until each subcommand has applied its own flags.
fn load_configuration(cli: &Cli) -> Result<BenchConfig> {
    let config = match &cli.config {
        Some(path) => BenchConfig::layered(Some(path.as_path()))
            .with_context(|| format!("failed to load config from {}", path.display()))?,
        None => BenchConfig::layered(None).context("failed to build configuration")?,
    };
    debug!(?config, "layered configuration");
    Ok(config)
}

/// `RUST_LOG` wins, then `--log-level`, then `info`. Logs go to stderr so
/// JSON results on stdout stay machine-readable.
fn setup_logging(level: Option<&str>, format: LogFormat) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level.unwrap_or("info")));

    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false);

    match format {
        LogFormat::Json => {
            subscriber.json().with_timer(tracing_subscriber::fmt::time::uptime()).init();
        }
        LogFormat::Compact => subscriber.compact().init(),
        LogFormat::Pretty => subscriber.pretty().init(),
    }
}
