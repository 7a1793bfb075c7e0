//! Subcommand handlers and result rendering.

use anyhow::{Context, Result};
use clap::{Args, ValueEnum};
use console::style;
use gemv_bench::{AdapterSummary, BenchConfig, CancelToken, PowerPreference, RunReport};
use tokio::task::{JoinError, JoinHandle};
use tracing::warn;

/// Result output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum OutputFormat {
    #[default]
    Text,
    Json,
}

/// Flags for `gemv-bench run`. Each one overrides the file/env value.
#[derive(Debug, Clone, Default, Args)]
pub struct RunArgs {
    /// Problem dimension (vector length and matrix side)
    #[arg(long, value_name = "N")]
    pub dim: Option<u32>,

    /// Number of measured passes
    #[arg(short = 'n', long, value_name = "N")]
    pub iterations: Option<u32>,

    /// Normalization epsilon
    #[arg(long, value_name = "EPS")]
    pub epsilon: Option<f32>,

    /// Output scale
    #[arg(long)]
    pub scale: Option<f32>,

    /// Seed for the input and weight contents
    #[arg(long)]
    pub seed: Option<u64>,

    /// Prefer a low-power adapter
    #[arg(long)]
    pub low_power: bool,

    /// Time with the host clock only, even if the adapter has timestamp queries
    #[arg(long)]
    pub no_gpu_timestamps: bool,

    /// Number of output values to include in the report
    #[arg(long, value_name = "N")]
    pub output_preview: Option<usize>,

    /// Output format
    #[arg(long, value_enum, default_value_t = OutputFormat::Text)]
    pub format: OutputFormat,
}

impl RunArgs {
    /// Overlay these flags onto `config`.
    pub fn apply(&self, config: &mut BenchConfig) {
        if let Some(dim) = self.dim {
            config.dim = dim;
        }
        if let Some(iterations) = self.iterations {
            config.iterations = iterations;
        }
        if let Some(epsilon) = self.epsilon {
            config.epsilon = epsilon;
        }
        if let Some(scale) = self.scale {
            config.scale = scale;
        }
        if let Some(seed) = self.seed {
            config.seed = seed;
        }
        if self.low_power {
            config.power_preference = PowerPreference::Low;
        }
        if self.no_gpu_timestamps {
            config.gpu_timestamps = false;
        }
        if let Some(n) = self.output_preview {
            config.output_preview = n;
        }
    }

    /// Overlay these flags onto `config` and validate the merged result.
    pub fn resolve(&self, mut config: BenchConfig) -> Result<BenchConfig> {
        self.apply(&mut config);
        config.validate().context("invalid benchmark configuration")?;
        Ok(config)
    }

    pub async fn execute(&self, config: BenchConfig) -> Result<()> {
        let config = self.resolve(config)?;

        let cancel = CancelToken::new();
        let worker_cancel = cancel.clone();
        let task = tokio::task::spawn_blocking(move || {
            pollster::block_on(gemv_bench::run_with_cancel(&config, &worker_cancel))
        });

        let joined = join_or_cancel(task, &cancel, tokio::signal::ctrl_c()).await;
        let report = joined.context("benchmark task panicked")?.context("benchmark failed")?;

        match self.format {
            OutputFormat::Text => print!("{}", render_report(&report)),
            OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&report)?),
        }
        Ok(())
    }
}

/// Await `task`, cancelling `cancel` if `interrupt` fires first. An interrupt
/// that resolves to an error (no signal handler) is ignored and the task is
/// awaited to completion.
async fn join_or_cancel<T, F>(
    mut task: JoinHandle<T>,
    cancel: &CancelToken,
    interrupt: F,
) -> std::result::Result<T, JoinError>
where
    F: Future<Output = std::io::Result<()>>,
{
    tokio::select! {
        joined = &mut task => joined,
        Ok(()) = interrupt => {
            warn!("interrupt received, stopping at the next iteration boundary");
            cancel.cancel();
            task.await
        }
    }
}

/// `gemv-bench probe`: list every adapter wgpu can see.
pub fn probe(format: OutputFormat) -> Result<()> {
    let adapters = gemv_bench::enumerate_adapters();
    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&adapters)?),
        OutputFormat::Text => print!("{}", render_adapters(&adapters)),
    }
    Ok(())
}

/// `gemv-bench config`: validate and print the effective configuration.
pub fn show_config(config: &BenchConfig) -> Result<()> {
    config.validate().context("invalid benchmark configuration")?;
    print!("{}", config.to_toml().context("failed to render configuration")?);
    Ok(())
}

pub fn render_report(report: &RunReport) -> String {
    let mut out = String::new();
    out.push_str(&format!("{}\n", style("Fused Q4 GEMV + RMSNorm").bold().cyan()));
    out.push_str(&format!("  Adapter:     {}\n", report.adapter));
    out.push_str(&format!("  Problem:     {0}x{0}\n", report.dim));
    out.push_str(&format!("  Iterations:  {}\n", report.iterations));
    out.push_str(&format!("  Timing:      {}\n", report.timing));
    out.push('\n');
    out.push_str(&format!("{}\n", style("Results:").bold()));
    out.push_str(&format!("  Elapsed:     {:.3} ms\n", report.elapsed_ms));
    out.push_str(&format!(
        "  Latency:     {:.4} ms/iter\n",
        report.metrics.average_latency_ms()
    ));
    out.push_str(&format!(
        "  Throughput:  {} TFLOPS\n",
        style(format!("{:.4}", report.metrics.throughput_tflops())).green()
    ));
    if let (Some(total), Some(avg)) = (report.gpu_elapsed_ms, report.gpu_average_latency_ms) {
        out.push_str(&format!("  GPU span:    {total:.3} ms ({avg:.4} ms/iter)\n"));
    }
    if !report.output_preview.is_empty() {
        let values: Vec<String> = report.output_preview.iter().map(|v| format!("{v:.4}")).collect();
        out.push_str(&format!("  Output[..{}]: [{}]\n", values.len(), values.join(", ")));
    }
    out
}

pub fn render_adapters(adapters: &[AdapterSummary]) -> String {
    if adapters.is_empty() {
        return format!("{}\n", style("No wgpu adapters found").red());
    }
    let mut out = format!("{}\n", style("wgpu adapters:").bold());
    for (i, a) in adapters.iter().enumerate() {
        let timestamps = if a.timestamp_query {
            style("timestamps").green()
        } else {
            style("no timestamps").yellow()
        };
        out.push_str(&format!("  [{i}] {a}, max buffer {} bytes, {timestamps}\n", a.max_buffer_size));
        if !a.driver.is_empty() {
            out.push_str(&format!("      driver: {}\n", a.driver));
        }
    }
    out
}
