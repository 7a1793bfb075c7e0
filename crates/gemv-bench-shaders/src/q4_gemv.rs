//! Fused 4-bit GEMV + RMS normalization WGSL compute shader.

/// Threads per workgroup. One workgroup reduces one output row.
pub const WORKGROUP_SIZE: u32 = 64;

/// Shader entry point name.
pub const ENTRY_POINT: &str = "main";

/// Quantized matrix-vector product fused with RMS normalization.
///
/// Each workgroup computes one output row:
///
/// ```text
/// output[row] = scale * dot(W[row, :], x) / sqrt(mean(x^2) + epsilon)
/// ```
///
/// `W` is stored as a flat stream of 4-bit codes, eight per `u32` word,
/// lowest nibble first; a code `q` decodes to the signed value `q - 8`.
/// The flat element index is `row * dim + col`, so rows are not required to
/// start on a word boundary. Words past the end of the buffer read as zero.
///
/// Bindings:
/// - 0: `input`: `array<f32>`, `dim` elements (read-only storage)
/// - 1: `weight`: `array<u32>`, `dim * dim / 8` words (read-only storage)
/// - 2: `output`: `array<f32>`, `dim` elements (read-write storage)
/// - 3: `params`: `{ dim: u32, epsilon: f32, scale: f32, _reserved: u32 }` (uniform)
pub const FUSED_Q4_GEMV_RMSNORM_SRC: &str = r"
struct Params {
    dim: u32,
    epsilon: f32,
    scale: f32,
    _reserved: u32,
}

@group(0) @binding(0) var<storage, read> input: array<f32>;
@group(0) @binding(1) var<storage, read> weight: array<u32>;
@group(0) @binding(2) var<storage, read_write> output: array<f32>;
@group(0) @binding(3) var<uniform> params: Params;

const WG_SIZE: u32 = 64u;

var<workgroup> shared_dot: array<f32, 64>;
var<workgroup> shared_sq: array<f32, 64>;

@compute @workgroup_size(64, 1, 1)
fn main(
    @builtin(local_invocation_id) lid: vec3<u32>,
    @builtin(workgroup_id) wgid: vec3<u32>,
) {
    let row = wgid.x;
    let dim = params.dim;
    if row >= dim { return; }

    let tid = lid.x;
    let n_words = arrayLength(&weight);

    // Strided partial sums: quantized dot product and input sum of squares
    var dot: f32 = 0.0;
    var sq: f32 = 0.0;
    var col = tid;
    while col < dim {
        let x = input[col];
        sq += x * x;
        let e = row * dim + col;
        let word_idx = e / 8u;
        if word_idx < n_words {
            let code = (weight[word_idx] >> ((e % 8u) * 4u)) & 0xFu;
            dot += f32(i32(code) - 8) * x;
        }
        col += WG_SIZE;
    }
    shared_dot[tid] = dot;
    shared_sq[tid] = sq;
    workgroupBarrier();

    var stride: u32 = WG_SIZE / 2u;
    while stride > 0u {
        if tid < stride {
            shared_dot[tid] = shared_dot[tid] + shared_dot[tid + stride];
            shared_sq[tid] = shared_sq[tid] + shared_sq[tid + stride];
        }
        workgroupBarrier();
        stride = stride / 2u;
    }

    if tid == 0u {
        let rms = sqrt(shared_sq[0] / f32(dim) + params.epsilon);
        output[row] = shared_dot[0] / rms * params.scale;
    }
}
";
