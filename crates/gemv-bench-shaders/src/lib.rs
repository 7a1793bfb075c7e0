//! WGSL compute shader sources for the quantized GEMV benchmark.
//!
//! Shaders are exposed as `&'static str` constants for runtime compilation by
//! the wgpu pipeline in `gemv-bench`.

pub mod q4_gemv;

pub use q4_gemv::{ENTRY_POINT, FUSED_Q4_GEMV_RMSNORM_SRC, WORKGROUP_SIZE};

/// Returns all shader sources as `(name, source)` pairs for bulk validation.
pub fn all_shader_sources() -> Vec<(&'static str, &'static str)> {
    vec![("fused_q4_gemv_rmsnorm", q4_gemv::FUSED_Q4_GEMV_RMSNORM_SRC)]
}
