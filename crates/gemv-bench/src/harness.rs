//! The caller-facing entry point: negotiate, allocate, bind, run, compute.

use serde::Serialize;
use tracing::info;

use crate::adapter::AdapterSummary;
use crate::binding::BindingSet;
use crate::buffer::BufferSet;
use crate::config::BenchConfig;
use crate::device::DeviceHandle;
use crate::dispatch::{TimingStrategy, WgpuDispatcher};
use crate::driver::{CancelToken, Clock, Dispatcher, ExecutionDriver, Measurement, MonotonicClock};
use crate::error::Result;
use crate::metrics::RunMetrics;
use crate::pipeline::FusedQ4Gemv;
use crate::problem::ProblemSize;

/// Everything a completed run reports.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunReport {
    pub adapter: AdapterSummary,
    pub dim: u32,
    pub iterations: u32,
    pub timing: TimingStrategy,
    pub elapsed_ms: f64,
    pub metrics: RunMetrics,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gpu_elapsed_ms: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gpu_average_latency_ms: Option<f64>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub output_preview: Vec<f32>,
}

impl RunReport {
    /// Assemble a report from a finished measurement.
    pub fn new(
        adapter: AdapterSummary,
        problem: ProblemSize,
        timing: TimingStrategy,
        measurement: &Measurement,
        metrics: RunMetrics,
        output_preview: Vec<f32>,
    ) -> Self {
        let gpu_elapsed_ms = measurement.gpu_elapsed_ms();
        Self {
            adapter,
            dim: problem.dim(),
            iterations: measurement.iterations,
            timing,
            elapsed_ms: measurement.elapsed_ms(),
            metrics,
            gpu_elapsed_ms,
            gpu_average_latency_ms: gpu_elapsed_ms
                .map(|ms| ms / f64::from(measurement.iterations)),
            output_preview,
        }
    }
}

/// Run the warm-up/measure protocol and derive metrics from the host span.
///
/// No metrics are produced unless the full run completes.
pub fn measure<C: Clock, D: Dispatcher>(
    clock: C,
    dispatcher: &mut D,
    problem: ProblemSize,
    iterations: u32,
    cancel: &CancelToken,
) -> Result<(Measurement, RunMetrics)> {
    let measurement =
        ExecutionDriver::new(clock).run(dispatcher, iterations, problem.workgroups(), cancel)?;
    let metrics = RunMetrics::compute(measurement.elapsed_ms(), measurement.iterations, problem)?;
    Ok((measurement, metrics))
}

/// The timing strategy a finished run actually used. A dispatcher that
/// records timestamps but produced no usable span fell back to the host clock.
pub fn reported_timing(capability: TimingStrategy, measurement: &Measurement) -> TimingStrategy {
    match measurement.gpu_elapsed {
        Some(_) => capability,
        None => TimingStrategy::HostClock,
    }
}

/// Run one benchmark with `config`.
pub async fn run(config: &BenchConfig) -> Result<RunReport> {
    run_with_cancel(config, &CancelToken::new()).await
}

/// Run one benchmark, honoring `cancel` at driver state boundaries.
pub async fn run_with_cancel(config: &BenchConfig, cancel: &CancelToken) -> Result<RunReport> {
    config.validate()?;
    let problem = ProblemSize::new(config.dim)?;

    let handle = DeviceHandle::acquire(config).await?;
    let buffers = BufferSet::allocate(&handle, problem)?;
    buffers.upload_params(&handle, config.epsilon, config.scale);
    buffers.fill_operands(&handle, config.seed);

    let kernel = FusedQ4Gemv::new(&handle)?;
    let bindings = BindingSet::build(&handle.device, &kernel, &buffers)?;

    let mut dispatcher = WgpuDispatcher::new(&handle, &kernel, &bindings);
    let (measurement, metrics) =
        measure(MonotonicClock::new(), &mut dispatcher, problem, config.iterations, cancel)?;
    let timing = reported_timing(dispatcher.timing_strategy(), &measurement);

    let output_preview = buffers.read_output(&handle, config.output_preview)?;
    let report = RunReport::new(
        handle.adapter().clone(),
        problem,
        timing,
        &measurement,
        metrics,
        output_preview,
    );

    info!(
        adapter = %report.adapter,
        %problem,
        iterations = report.iterations,
        %timing,
        average_latency_ms = report.metrics.average_latency_ms(),
        throughput_tflops = report.metrics.throughput_tflops(),
        "benchmark complete"
    );
    Ok(report)
}
