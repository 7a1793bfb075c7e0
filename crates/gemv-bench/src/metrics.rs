//! Average latency and achieved throughput from a measured span.

use serde::Serialize;

use crate::error::{BenchError, Result};
use crate::problem::ProblemSize;

/// Result of one benchmark run.
///
/// Throughput uses the GEMV convention of `2 * dim^2` operations per pass.
/// The normalization step and nibble unpacking are not counted, so this is a
/// lower bound on the fused kernel's arithmetic.
///
/// Only [`RunMetrics::compute`] builds one, so the two values always
/// describe the same measurement.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct RunMetrics {
    average_latency_ms: f64,
    throughput_tflops: f64,
}

impl RunMetrics {
    /// Host-clock span divided by the number of measured passes.
    pub fn average_latency_ms(&self) -> f64 {
        self.average_latency_ms
    }

    /// `2 * dim^2` operations per average pass, in TFLOPS.
    pub fn throughput_tflops(&self) -> f64 {
        self.throughput_tflops
    }

    pub fn compute(elapsed_ms: f64, iterations: u32, problem: ProblemSize) -> Result<Self> {
        if iterations == 0 {
            return Err(BenchError::MeasurementResolution(
                "iterations must be greater than zero".into(),
            ));
        }
        if !elapsed_ms.is_finite() || elapsed_ms <= 0.0 {
            return Err(BenchError::MeasurementResolution(format!(
                "elapsed time {elapsed_ms} ms over {iterations} iterations is below clock \
                 resolution; increase iterations"
            )));
        }

        let average_latency_ms = elapsed_ms / f64::from(iterations);
        let throughput_tflops = problem.ops_per_pass() / (average_latency_ms / 1e3) / 1e12;
        Ok(Self { average_latency_ms, throughput_tflops })
    }
}
