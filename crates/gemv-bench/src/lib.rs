//! Warm-up/measure benchmark harness for a fused 4-bit GEMV + RMS
//! normalization compute kernel on wgpu.
//!
//! A run flows through five stages, each taking the [`DeviceHandle`]
//! explicitly:
//!
//! 1. [`device::negotiate`] enables GPU timestamps only if the adapter
//!    advertises them.
//! 2. [`BufferSet::allocate`] sizes the input, weight, output and params
//!    buffers from `dim` and checks them against device limits.
//! 3. [`BindingSet::build`] binds each buffer to the slot the kernel declares.
//! 4. [`ExecutionDriver::run`] performs one drained warm-up pass, then
//!    `iterations` back-to-back passes, then drains before stopping the clock.
//! 5. [`RunMetrics::compute`] derives average latency and throughput.
//!
//! [`run`] wires these together.

pub mod adapter;
pub mod binding;
pub mod buffer;
pub mod config;
pub mod device;
pub mod dispatch;
pub mod driver;
pub mod error;
pub mod harness;
pub mod metrics;
pub mod params;
pub mod pipeline;
pub mod problem;
pub mod timer;

pub use adapter::{AdapterSummary, enumerate_adapters};
pub use binding::BindingSet;
pub use buffer::{BufferRole, BufferSet};
pub use config::{BenchConfig, ConfigError, PowerPreference};
pub use device::{DeviceCapabilities, DeviceHandle};
pub use dispatch::{TimingStrategy, WgpuDispatcher};
pub use driver::{CancelToken, Clock, Dispatcher, ExecutionDriver, Measurement, MonotonicClock, Pass};
pub use error::{BenchError, Result};
pub use harness::{RunReport, measure, reported_timing, run, run_with_cancel};
pub use metrics::RunMetrics;
pub use params::KernelParams;
pub use pipeline::{FusedQ4Gemv, KernelPipeline};
pub use problem::{MIN_ALLOCATABLE_DIM, ProblemSize};
