//! Resource allocation: the four kernel buffers, sized from `dim`.

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use tracing::{debug, info};

use crate::device::DeviceHandle;
use crate::error::{BenchError, Result};
use crate::params::KernelParams;
use crate::problem::{MIN_ALLOCATABLE_DIM, ProblemSize};

/// The role a buffer plays in the kernel, and the binding slot it occupies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BufferRole {
    Input,
    Weight,
    Output,
    Params,
}

impl BufferRole {
    /// All roles in binding-slot order.
    pub const ALL: [BufferRole; 4] =
        [BufferRole::Input, BufferRole::Weight, BufferRole::Output, BufferRole::Params];

    /// Binding slot the kernel declares for this role.
    pub const fn binding(self) -> u32 {
        match self {
            Self::Input => 0,
            Self::Weight => 1,
            Self::Output => 2,
            Self::Params => 3,
        }
    }

    pub const fn label(self) -> &'static str {
        match self {
            Self::Input => "input",
            Self::Weight => "weight",
            Self::Output => "output",
            Self::Params => "params",
        }
    }

    /// Host-write/kernel-read for operands and params; output is copied back
    /// to the host after execution.
    pub fn usage(self) -> wgpu::BufferUsages {
        match self {
            Self::Input | Self::Weight => {
                wgpu::BufferUsages::STORAGE | wgpu::BufferUsages::COPY_DST
            }
            Self::Output => wgpu::BufferUsages::STORAGE | wgpu::BufferUsages::COPY_SRC,
            Self::Params => wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
        }
    }

    /// Size in bytes for `problem`.
    pub const fn size(self, problem: ProblemSize) -> u64 {
        match self {
            Self::Input => problem.input_bytes(),
            Self::Weight => problem.weight_bytes(),
            Self::Output => problem.output_bytes(),
            Self::Params => problem.params_bytes(),
        }
    }
}

impl std::fmt::Display for BufferRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

/// The subset of device limits that bound buffer allocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BufferLimits {
    pub max_buffer_size: u64,
    pub max_storage_binding: u64,
    pub max_uniform_binding: u64,
}

impl From<&wgpu::Limits> for BufferLimits {
    fn from(limits: &wgpu::Limits) -> Self {
        Self {
            max_buffer_size: limits.max_buffer_size,
            max_storage_binding: u64::from(limits.max_storage_buffer_binding_size),
            max_uniform_binding: u64::from(limits.max_uniform_buffer_binding_size),
        }
    }
}

impl BufferLimits {
    /// Largest size `role` may have: a buffer that cannot be bound whole is
    /// as unusable as one that cannot be created.
    pub fn limit_for(&self, role: BufferRole) -> u64 {
        let binding = match role {
            BufferRole::Params => self.max_uniform_binding,
            _ => self.max_storage_binding,
        };
        self.max_buffer_size.min(binding)
    }
}

/// Check every buffer of `problem` against `limits` before touching the device.
///
/// Oversized requests are reported, never truncated.
pub fn check_allocation(problem: ProblemSize, limits: &BufferLimits) -> Result<()> {
    for role in BufferRole::ALL {
        let requested = role.size(problem);
        if requested == 0 {
            return Err(BenchError::InvalidProblem(format!(
                "dim {} packs the {role} buffer into zero bytes; minimum dim is {MIN_ALLOCATABLE_DIM}",
                problem.dim()
            )));
        }
        let limit = limits.limit_for(role);
        if requested > limit {
            return Err(BenchError::Allocation { buffer: role.label(), requested, limit });
        }
    }
    Ok(())
}

/// Deterministic operand contents: inputs in `[-1, 1)` and fully random
/// weight words (every nibble is a valid 4-bit code).
pub fn operand_data(problem: ProblemSize, seed: u64) -> (Vec<f32>, Vec<u32>) {
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    let input: Vec<f32> = (0..problem.dim()).map(|_| rng.random_range(-1.0..1.0)).collect();
    let weight: Vec<u32> = (0..problem.weight_words()).map(|_| rng.random::<u32>()).collect();
    (input, weight)
}

/// The four GPU buffers a run owns. Never resized; released on drop.
pub struct BufferSet {
    problem: ProblemSize,
    pub input: wgpu::Buffer,
    pub weight: wgpu::Buffer,
    pub output: wgpu::Buffer,
    pub params: wgpu::Buffer,
}

impl BufferSet {
    /// Allocate the input, weight, output and params buffers for `problem`.
    pub fn allocate(handle: &DeviceHandle, problem: ProblemSize) -> Result<Self> {
        check_allocation(problem, &BufferLimits::from(&handle.limits()))?;

        let device = &handle.device;
        device.push_error_scope(wgpu::ErrorFilter::OutOfMemory);
        let create = |role: BufferRole| {
            device.create_buffer(&wgpu::BufferDescriptor {
                label: Some(role.label()),
                size: role.size(problem),
                usage: role.usage(),
                mapped_at_creation: false,
            })
        };
        let set = Self {
            problem,
            input: create(BufferRole::Input),
            weight: create(BufferRole::Weight),
            output: create(BufferRole::Output),
            params: create(BufferRole::Params),
        };
        if let Some(err) = pollster::block_on(device.pop_error_scope()) {
            return Err(BenchError::OutOfMemory {
                requested: set.total_bytes(),
                message: err.to_string(),
            });
        }

        info!(
            %problem,
            input_bytes = problem.input_bytes(),
            weight_bytes = problem.weight_bytes(),
            output_bytes = problem.output_bytes(),
            "allocated kernel buffers"
        );
        Ok(set)
    }

    pub fn problem(&self) -> ProblemSize {
        self.problem
    }

    /// Buffer occupying `role`'s slot.
    pub fn get(&self, role: BufferRole) -> &wgpu::Buffer {
        match role {
            BufferRole::Input => &self.input,
            BufferRole::Weight => &self.weight,
            BufferRole::Output => &self.output,
            BufferRole::Params => &self.params,
        }
    }

    /// Combined size of all four buffers in bytes.
    pub fn total_bytes(&self) -> u64 {
        BufferRole::ALL.iter().map(|r| r.size(self.problem)).sum()
    }

    /// Write dimension, epsilon and scale into the params block.
    pub fn upload_params(&self, handle: &DeviceHandle, epsilon: f32, scale: f32) -> KernelParams {
        let params = KernelParams::new(self.problem, epsilon, scale);
        handle.queue.write_buffer(&self.params, 0, &params.to_bytes());
        debug!(dim = params.dim, epsilon, scale, "uploaded kernel params");
        params
    }

    /// Fill input and weight with deterministic pseudo-random contents.
    pub fn fill_operands(&self, handle: &DeviceHandle, seed: u64) {
        let (input, weight) = operand_data(self.problem, seed);
        handle.queue.write_buffer(&self.input, 0, bytemuck::cast_slice(&input));
        handle.queue.write_buffer(&self.weight, 0, bytemuck::cast_slice(&weight));
        debug!(seed, "uploaded operand data");
    }

    /// Copy the first `count` output values back to the host.
    ///
    /// Blocks until the copy (and all work submitted before it) has retired.
    pub fn read_output(&self, handle: &DeviceHandle, count: usize) -> Result<Vec<f32>> {
        let count = count.min(self.problem.dim() as usize);
        if count == 0 {
            return Ok(Vec::new());
        }
        let size = (count * std::mem::size_of::<f32>()) as u64;
        let staging = handle.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("output-readback"),
            size,
            usage: wgpu::BufferUsages::MAP_READ | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });

        let mut encoder = handle.device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
            label: Some("readback-encoder"),
        });
        encoder.copy_buffer_to_buffer(&self.output, 0, &staging, 0, size);
        handle.queue.submit(std::iter::once(encoder.finish()));

        let bytes = map_staging(handle, &staging)?;
        Ok(bytes
            .chunks_exact(std::mem::size_of::<f32>())
            .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
            .collect())
    }
}

/// Map a `MAP_READ` staging buffer and copy its contents out.
///
/// Blocks until every submission touching `staging` has retired.
pub(crate) fn map_staging(handle: &DeviceHandle, staging: &wgpu::Buffer) -> Result<Vec<u8>> {
    let slice = staging.slice(..);
    let (tx, rx) = std::sync::mpsc::channel();
    slice.map_async(wgpu::MapMode::Read, move |result| {
        let _ = tx.send(result);
    });
    handle.device.poll(wgpu::Maintain::Wait);
    handle.faults().check()?;
    rx.recv()
        .map_err(|e| BenchError::BufferMap(e.to_string()))?
        .map_err(|e: wgpu::BufferAsyncError| BenchError::BufferMap(e.to_string()))?;

    let data = slice.get_mapped_range();
    let bytes = data.to_vec();
    drop(data);
    staging.unmap();
    Ok(bytes)
}
