//! Benchmark error types.

use thiserror::Error;

use crate::config::ConfigError;

/// Errors produced by a benchmark run.
///
/// None of these are recoverable within a run: recovery means restarting the
/// whole negotiate → allocate → bind → run sequence.
#[derive(Debug, Error)]
pub enum BenchError {
    #[error("no suitable GPU adapter found")]
    NoAdapter,

    #[error("failed to request device: {0}")]
    DeviceRequest(#[from] wgpu::RequestDeviceError),

    #[error("invalid problem size: {0}")]
    InvalidProblem(String),

    #[error("cannot allocate {buffer} buffer: {requested} bytes exceeds device limit of {limit} bytes")]
    Allocation { buffer: &'static str, requested: u64, limit: u64 },

    #[error("device out of memory allocating {requested} bytes: {message}")]
    OutOfMemory { requested: u64, message: String },

    #[error("dispatch of {workgroups} workgroups exceeds device limit of {limit} per dimension")]
    DispatchLimit { workgroups: u32, limit: u32 },

    #[error("pipeline creation failed: {0}")]
    PipelineCreation(String),

    #[error("kernel binding layout mismatch: {0}")]
    LayoutMismatch(String),

    #[error("GPU device lost: {0}")]
    DeviceLost(String),

    #[error("measurement resolution too coarse: {0}")]
    MeasurementResolution(String),

    #[error("buffer mapping failed: {0}")]
    BufferMap(String),

    #[error("run cancelled after {completed} measured iterations")]
    Cancelled { completed: u32 },

    #[error(transparent)]
    Config(#[from] ConfigError),
}

/// Convenience result alias.
pub type Result<T> = std::result::Result<T, BenchError>;
