//! GPU-side timestamp capture around the measured passes.

use std::time::Duration;

use tracing::debug;

use crate::buffer::map_staging;
use crate::device::DeviceHandle;
use crate::driver::Pass;
use crate::error::{BenchError, Result};

const BEGIN: u32 = 0;
const END: u32 = 1;
const QUERY_COUNT: u32 = 2;
const RESOLVE_BYTES: u64 = QUERY_COUNT as u64 * std::mem::size_of::<u64>() as u64;

/// Query-set indices written by `pass`: begin on the first measured pass,
/// end on the last. Warm-up passes write nothing.
pub fn timestamp_indices(pass: Pass) -> (Option<u32>, Option<u32>) {
    match pass {
        Pass::Warmup => (None, None),
        Pass::Measured { index, total } => {
            let begin = (index == 0).then_some(BEGIN);
            let end = (index + 1 == total).then_some(END);
            (begin, end)
        }
    }
}

/// Convert a pair of raw ticks into a duration using the queue's
/// nanoseconds-per-tick period.
///
/// Returns `None` for a non-monotonic pair or a non-positive period.
pub fn ticks_to_duration(begin: u64, end: u64, period_ns: f32) -> Option<Duration> {
    if end < begin || !(period_ns.is_finite() && period_ns > 0.0) {
        return None;
    }
    let nanos = (end - begin) as f64 * f64::from(period_ns);
    Some(Duration::from_nanos(nanos.round() as u64))
}

/// Two-entry timestamp query set plus its resolve and readback buffers.
pub struct GpuTimer {
    query_set: wgpu::QuerySet,
    resolve: wgpu::Buffer,
    readback: wgpu::Buffer,
    period_ns: f32,
}

impl GpuTimer {
    /// Requires the device to have been created with `TIMESTAMP_QUERY`.
    pub fn new(handle: &DeviceHandle) -> Self {
        let device = &handle.device;
        let query_set = device.create_query_set(&wgpu::QuerySetDescriptor {
            label: Some("measured-span"),
            ty: wgpu::QueryType::Timestamp,
            count: QUERY_COUNT,
        });
        let resolve = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("timestamp-resolve"),
            size: RESOLVE_BYTES,
            usage: wgpu::BufferUsages::QUERY_RESOLVE | wgpu::BufferUsages::COPY_SRC,
            mapped_at_creation: false,
        });
        let readback = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("timestamp-readback"),
            size: RESOLVE_BYTES,
            usage: wgpu::BufferUsages::MAP_READ | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });
        let period_ns = handle.queue.get_timestamp_period();
        debug!(period_ns, "created GPU timestamp query set");
        Self { query_set, resolve, readback, period_ns }
    }

    /// Timestamp writes to attach to the compute pass for `pass`, if any.
    pub fn pass_writes(&self, pass: Pass) -> Option<wgpu::ComputePassTimestampWrites<'_>> {
        match timestamp_indices(pass) {
            (None, None) => None,
            (begin, end) => Some(wgpu::ComputePassTimestampWrites {
                query_set: &self.query_set,
                beginning_of_pass_write_index: begin,
                end_of_pass_write_index: end,
            }),
        }
    }

    /// Resolve and read back the measured span.
    ///
    /// Must run after the measured passes have drained.
    pub fn read(&self, handle: &DeviceHandle) -> Result<Duration> {
        let mut encoder = handle.device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
            label: Some("timestamp-resolve"),
        });
        encoder.resolve_query_set(&self.query_set, 0..QUERY_COUNT, &self.resolve, 0);
        encoder.copy_buffer_to_buffer(&self.resolve, 0, &self.readback, 0, RESOLVE_BYTES);
        handle.queue.submit(std::iter::once(encoder.finish()));

        let bytes = map_staging(handle, &self.readback)?;
        let tick = |i: usize| {
            let mut raw = [0u8; 8];
            raw.copy_from_slice(&bytes[i * 8..(i + 1) * 8]);
            u64::from_le_bytes(raw)
        };
        let (begin, end) = (tick(BEGIN as usize), tick(END as usize));
        ticks_to_duration(begin, end, self.period_ns).ok_or_else(|| {
            BenchError::MeasurementResolution(format!(
                "unusable GPU timestamps: begin {begin}, end {end}, period {} ns",
                self.period_ns
            ))
        })
    }
}
