//! The 16-byte scalar parameter block read by the kernel as a uniform.

use bytemuck::{Pod, Zeroable};

use crate::problem::{PARAMS_BYTES, ProblemSize};

/// Byte offset of `dim` (`u32`).
pub const DIM_OFFSET: usize = 0;
/// Byte offset of `epsilon` (`f32`).
pub const EPSILON_OFFSET: usize = 4;
/// Byte offset of `scale` (`f32`).
pub const SCALE_OFFSET: usize = 8;
/// Byte offset of the reserved padding word.
pub const RESERVED_OFFSET: usize = 12;

/// Default normalization epsilon.
pub const DEFAULT_EPSILON: f32 = 1e-5;
/// Default output scale.
pub const DEFAULT_SCALE: f32 = 1.0;

/// Uniform parameters for the fused GEMV kernel.
///
/// Mirrors the WGSL `Params` struct field for field.
#[repr(C)]
#[derive(Copy, Clone, Debug, PartialEq, Pod, Zeroable)]
pub struct KernelParams {
    pub dim: u32,
    pub epsilon: f32,
    pub scale: f32,
    pub _reserved: u32,
}

impl KernelParams {
    pub fn new(problem: ProblemSize, epsilon: f32, scale: f32) -> Self {
        Self { dim: problem.dim(), epsilon, scale, _reserved: 0 }
    }

    /// Encode as little-endian bytes at the fixed offsets the kernel expects.
    pub fn to_bytes(&self) -> [u8; PARAMS_BYTES as usize] {
        let mut out = [0u8; PARAMS_BYTES as usize];
        out[DIM_OFFSET..DIM_OFFSET + 4].copy_from_slice(&self.dim.to_le_bytes());
        out[EPSILON_OFFSET..EPSILON_OFFSET + 4].copy_from_slice(&self.epsilon.to_le_bytes());
        out[SCALE_OFFSET..SCALE_OFFSET + 4].copy_from_slice(&self.scale.to_le_bytes());
        out[RESERVED_OFFSET..RESERVED_OFFSET + 4].copy_from_slice(&self._reserved.to_le_bytes());
        out
    }
}
