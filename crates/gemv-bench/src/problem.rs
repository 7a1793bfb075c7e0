//! Problem sizing: buffer footprints and the operation-count model.
//!
//! Everything here derives from the single `dim` parameter.

use serde::Serialize;

use crate::error::{BenchError, Result};

/// Bytes per dense element (`f32`) and per packed weight word (`u32`).
pub const ELEMENT_BYTES: u64 = 4;

/// 4-bit codes packed into one 32-bit weight word.
pub const CODES_PER_WORD: u64 = 8;

/// Size of the scalar parameter block in bytes.
pub const PARAMS_BYTES: u64 = 16;

/// Smallest `dim` whose packed weight matrix is at least one word. Below it
/// `dim * dim / 8` truncates to zero and allocation is refused.
pub const MIN_ALLOCATABLE_DIM: u32 = 3;

/// Problem dimension: vector length and side of the square weight matrix.
///
/// Invariant: `dim > 0`. Immutable once constructed.
///
/// A `ProblemSize` of 1 or 2 is valid for sizing arithmetic, but
/// [`check_allocation`](crate::buffer::check_allocation) rejects it: the
/// real minimum for a run is [`MIN_ALLOCATABLE_DIM`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct ProblemSize {
    dim: u32,
}

impl ProblemSize {
    /// Create a problem size, rejecting `dim == 0`. Dims below
    /// [`MIN_ALLOCATABLE_DIM`] are accepted here and refused at allocation.
    pub fn new(dim: u32) -> Result<Self> {
        if dim == 0 {
            return Err(BenchError::InvalidProblem("dim must be > 0".into()));
        }
        Ok(Self { dim })
    }

    /// The problem dimension.
    pub const fn dim(&self) -> u32 {
        self.dim
    }

    /// Input vector size in bytes: one `f32` per dimension.
    pub const fn input_bytes(&self) -> u64 {
        self.dim as u64 * ELEMENT_BYTES
    }

    /// Output vector size in bytes: one `f32` per dimension.
    pub const fn output_bytes(&self) -> u64 {
        self.dim as u64 * ELEMENT_BYTES
    }

    /// Number of 32-bit words holding the packed `dim × dim` matrix.
    pub const fn weight_words(&self) -> u64 {
        let d = self.dim as u64;
        d * d / CODES_PER_WORD
    }

    /// Packed weight matrix size in bytes: `(dim * dim / 8) * 4`.
    pub const fn weight_bytes(&self) -> u64 {
        self.weight_words() * ELEMENT_BYTES
    }

    /// Parameter block size in bytes (always 16).
    pub const fn params_bytes(&self) -> u64 {
        PARAMS_BYTES
    }

    /// Workgroups per dispatch: one per output row.
    pub const fn workgroups(&self) -> u32 {
        self.dim
    }

    /// Floating-point operations per pass under the GEMV convention.
    ///
    /// `2 * dim^2`: one multiply and one add per matrix element. The
    /// normalization and dequantization arithmetic is not counted, so this
    /// undercounts the fused kernel's true work; it is a known approximation.
    pub fn ops_per_pass(&self) -> f64 {
        let d = f64::from(self.dim);
        2.0 * d * d
    }
}

impl std::fmt::Display for ProblemSize {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{0}x{0}", self.dim)
    }
}
