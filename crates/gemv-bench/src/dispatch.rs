//! wgpu-backed [`Dispatcher`]: one command buffer per pass, drained with
//! `on_submitted_work_done`.

use std::sync::mpsc::{self, TryRecvError};
use std::time::Duration;

use serde::Serialize;
use tracing::{debug, warn};

use crate::binding::BindingSet;
use crate::device::DeviceHandle;
use crate::driver::{Dispatcher, Pass};
use crate::error::{BenchError, Result};
use crate::pipeline::KernelPipeline;
use crate::timer::GpuTimer;

/// How the measured span is timed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TimingStrategy {
    /// Host wall clock only; the adapter has no usable timestamp queries.
    HostClock,
    /// Host wall clock, plus a GPU-side span from timestamp queries.
    HostClockWithGpuTimestamps,
}

impl std::fmt::Display for TimingStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::HostClock => f.write_str("host clock"),
            Self::HostClockWithGpuTimestamps => f.write_str("host clock + GPU timestamps"),
        }
    }
}

/// Reject grids the device cannot launch in one dimension.
pub fn check_workgroups(workgroups: u32, limit: u32) -> Result<()> {
    if workgroups == 0 || workgroups > limit {
        return Err(BenchError::DispatchLimit { workgroups, limit });
    }
    Ok(())
}

pub struct WgpuDispatcher<'a, K> {
    handle: &'a DeviceHandle,
    kernel: &'a K,
    bindings: &'a BindingSet,
    timer: Option<GpuTimer>,
    max_workgroups: u32,
}

impl<'a, K: KernelPipeline> WgpuDispatcher<'a, K> {
    pub fn new(handle: &'a DeviceHandle, kernel: &'a K, bindings: &'a BindingSet) -> Self {
        let timer = if handle.capabilities().timestamp_query {
            Some(GpuTimer::new(handle))
        } else {
            warn!("GPU timestamps unavailable, measuring with host clock only");
            None
        };
        Self {
            handle,
            kernel,
            bindings,
            timer,
            max_workgroups: handle.limits().max_compute_workgroups_per_dimension,
        }
    }

    pub fn timing_strategy(&self) -> TimingStrategy {
        match self.timer {
            Some(_) => TimingStrategy::HostClockWithGpuTimestamps,
            None => TimingStrategy::HostClock,
        }
    }
}

impl<K: KernelPipeline> Dispatcher for WgpuDispatcher<'_, K> {
    fn submit(&mut self, pass: Pass, workgroups: u32) -> Result<()> {
        check_workgroups(workgroups, self.max_workgroups)?;

        let device = &self.handle.device;
        let mut encoder = device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
            label: Some("gemv-dispatch"),
        });
        {
            let timestamp_writes = self.timer.as_ref().and_then(|t| t.pass_writes(pass));
            let mut cpass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
                label: Some("fused_q4_gemv"),
                timestamp_writes,
            });
            self.kernel.dispatch(&mut cpass, self.bindings, workgroups);
        }
        self.handle.queue.submit(std::iter::once(encoder.finish()));
        self.handle.faults().check()
    }

    fn drain(&mut self) -> Result<()> {
        let (tx, rx) = mpsc::channel();
        self.handle.queue.on_submitted_work_done(move || {
            let _ = tx.send(());
        });
        loop {
            self.handle.device.poll(wgpu::Maintain::Wait);
            self.handle.faults().check()?;
            match rx.try_recv() {
                Ok(()) => break,
                Err(TryRecvError::Empty) => continue,
                Err(TryRecvError::Disconnected) => {
                    return Err(BenchError::DeviceLost(
                        "queue dropped the work-done callback".into(),
                    ));
                }
            }
        }
        debug!("queue drained");
        Ok(())
    }

    fn gpu_elapsed(&mut self) -> Result<Option<Duration>> {
        self.timer.as_ref().map(|t| t.read(self.handle)).transpose()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn workgroups_within_limit() {
        assert!(check_workgroups(4096, 65_535).is_ok());
        assert!(check_workgroups(65_535, 65_535).is_ok());
    }

    #[test]
    fn workgroups_over_limit_is_reported() {
        match check_workgroups(70_000, 65_535) {
            Err(BenchError::DispatchLimit { workgroups, limit }) => {
                assert_eq!(workgroups, 70_000);
                assert_eq!(limit, 65_535);
            }
            other => panic!("expected DispatchLimit, got {other:?}"),
        }
    }

    #[test]
    fn empty_grid_is_rejected() {
        assert!(check_workgroups(0, 65_535).is_err());
    }

    #[test]
    fn timing_strategy_serializes_snake_case() {
        assert_eq!(serde_json::to_string(&TimingStrategy::HostClock).unwrap(), "\"host_clock\"");
        assert_eq!(
            serde_json::to_string(&TimingStrategy::HostClockWithGpuTimestamps).unwrap(),
            "\"host_clock_with_gpu_timestamps\""
        );
    }

    #[test]
    #[ignore = "requires GPU adapter - run manually on machines with a GPU"]
    fn drives_real_kernel() {
        use crate::buffer::BufferSet;
        use crate::config::BenchConfig;
        use crate::driver::{CancelToken, ExecutionDriver, MonotonicClock};
        use crate::pipeline::FusedQ4Gemv;
        use crate::problem::ProblemSize;

        let handle = pollster::block_on(DeviceHandle::acquire(&BenchConfig::default())).unwrap();
        let problem = ProblemSize::new(256).unwrap();
        let kernel = FusedQ4Gemv::new(&handle).unwrap();
        let buffers = BufferSet::allocate(&handle, problem).unwrap();
        buffers.upload_params(&handle, 1e-5, 1.0);
        buffers.fill_operands(&handle, 1);
        let bindings = BindingSet::build(&handle.device, &kernel, &buffers).unwrap();

        let mut dispatcher = WgpuDispatcher::new(&handle, &kernel, &bindings);
        let m = ExecutionDriver::new(MonotonicClock::new())
            .run(&mut dispatcher, 5, problem.workgroups(), &CancelToken::new())
            .unwrap();
        assert_eq!(m.iterations, 5);
        assert_eq!(
            m.gpu_elapsed.is_some(),
            dispatcher.timing_strategy() == TimingStrategy::HostClockWithGpuTimestamps
        );
    }
}
