//! Benchmark configuration.
//!
//! Loads [`BenchConfig`] from a TOML file with environment variable overrides
//! via `GEMV_BENCH_*` prefixed variables. Every field has a default, so a
//! partial file (or none at all) is valid.

use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::params::{DEFAULT_EPSILON, DEFAULT_SCALE};

/// Largest `dim` the harness accepts: one workgroup is dispatched per row and
/// WebGPU guarantees at least 65535 workgroups per dimension.
pub const MAX_DIM: u32 = 65_535;

/// Adapter power preference.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PowerPreference {
    /// Prefer a discrete, high-performance GPU.
    High,
    /// Prefer an integrated, low-power GPU.
    Low,
}

impl std::fmt::Display for PowerPreference {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::High => write!(f, "high"),
            Self::Low => write!(f, "low"),
        }
    }
}

impl std::str::FromStr for PowerPreference {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "high" | "high-performance" => Ok(Self::High),
            "low" | "low-power" => Ok(Self::Low),
            other => Err(format!("unknown power preference: {other}")),
        }
    }
}

impl From<PowerPreference> for wgpu::PowerPreference {
    fn from(p: PowerPreference) -> Self {
        match p {
            PowerPreference::High => wgpu::PowerPreference::HighPerformance,
            PowerPreference::Low => wgpu::PowerPreference::LowPower,
        }
    }
}

/// Benchmark configuration loaded from TOML with environment variable overrides.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BenchConfig {
    /// Problem dimension: vector length and matrix side.
    /// Override: `GEMV_BENCH_DIM`
    pub dim: u32,

    /// Number of measured passes.
    /// Override: `GEMV_BENCH_ITERATIONS`
    pub iterations: u32,

    /// Normalization epsilon uploaded to the kernel.
    /// Override: `GEMV_BENCH_EPSILON`
    pub epsilon: f32,

    /// Output scale uploaded to the kernel.
    /// Override: `GEMV_BENCH_SCALE`
    pub scale: f32,

    /// Seed for the pseudo-random input and weight contents.
    /// Override: `GEMV_BENCH_SEED`
    pub seed: u64,

    /// Adapter power preference.
    /// Override: `GEMV_BENCH_POWER_PREFERENCE`
    pub power_preference: PowerPreference,

    /// Use GPU timestamp queries when the adapter supports them.
    /// Override: `GEMV_BENCH_GPU_TIMESTAMPS`
    pub gpu_timestamps: bool,

    /// Number of output values to read back into the report (0 = none).
    /// Override: `GEMV_BENCH_OUTPUT_PREVIEW`
    pub output_preview: usize,
}

impl Default for BenchConfig {
    fn default() -> Self {
        Self {
            dim: 4096,
            iterations: 100,
            epsilon: DEFAULT_EPSILON,
            scale: DEFAULT_SCALE,
            seed: 42,
            power_preference: PowerPreference::High,
            gpu_timestamps: true,
            output_preview: 0,
        }
    }
}

/// Errors that can occur when loading or validating a [`BenchConfig`].
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse TOML: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("failed to serialize TOML: {0}")]
    Serialize(#[from] toml::ser::Error),
    #[error("validation failed: {0}")]
    Validation(String),
    #[error("invalid environment override {key}={value}: {reason}")]
    EnvOverride { key: String, value: String, reason: String },
}

fn parse_flag(key: &str, val: &str) -> Result<bool, ConfigError> {
    match val.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" => Ok(true),
        "0" | "false" | "no" => Ok(false),
        _ => Err(ConfigError::EnvOverride {
            key: key.into(),
            value: val.into(),
            reason: "expected one of 1, true, yes, 0, false, no".into(),
        }),
    }
}

fn parse_env<T>(key: &str, val: &str) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    val.parse::<T>().map_err(|e| ConfigError::EnvOverride {
        key: key.into(),
        value: val.into(),
        reason: e.to_string(),
    })
}

impl BenchConfig {
    /// Render the default configuration as a TOML string.
    pub fn default_toml() -> Result<String, ConfigError> {
        Self::default().to_toml()
    }

    /// Render this configuration as a TOML string.
    pub fn to_toml(&self) -> Result<String, ConfigError> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Load configuration from a TOML file, then apply environment overrides.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_toml(&contents)
    }

    /// Load from a TOML string, then apply environment overrides.
    pub fn from_toml(toml_str: &str) -> Result<Self, ConfigError> {
        let cfg = Self::parse_with_env(toml_str)?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Load only from environment variables, starting from defaults.
    pub fn from_env() -> Result<Self, ConfigError> {
        let cfg = Self::layered(None)?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// The file at `path` (or defaults), then environment overrides, without
    /// validation. For callers that layer further overrides on top and call
    /// [`BenchConfig::validate`] once the merge is complete.
    pub fn layered(path: Option<&Path>) -> Result<Self, ConfigError> {
        match path {
            Some(path) => Self::parse_with_env(&std::fs::read_to_string(path)?),
            None => {
                let mut cfg = Self::default();
                cfg.apply_env_overrides()?;
                Ok(cfg)
            }
        }
    }

    fn parse_with_env(toml_str: &str) -> Result<Self, ConfigError> {
        let mut cfg: BenchConfig = toml::from_str(toml_str)?;
        cfg.apply_env_overrides()?;
        Ok(cfg)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.dim == 0 {
            return Err(ConfigError::Validation("dim must be > 0".into()));
        }
        if self.dim > MAX_DIM {
            return Err(ConfigError::Validation(format!(
                "dim must be <= {MAX_DIM}, got {}",
                self.dim
            )));
        }
        if self.iterations == 0 {
            return Err(ConfigError::Validation("iterations must be > 0".into()));
        }
        if !self.epsilon.is_finite() || self.epsilon <= 0.0 {
            return Err(ConfigError::Validation(format!(
                "epsilon must be finite and > 0, got {}",
                self.epsilon
            )));
        }
        if !self.scale.is_finite() {
            return Err(ConfigError::Validation(format!(
                "scale must be finite, got {}",
                self.scale
            )));
        }
        if self.output_preview > self.dim as usize {
            return Err(ConfigError::Validation(format!(
                "output_preview ({}) must not exceed dim ({})",
                self.output_preview, self.dim
            )));
        }
        Ok(())
    }

    /// Apply `GEMV_BENCH_*` environment variable overrides.
    pub fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        if let Ok(val) = std::env::var("GEMV_BENCH_DIM") {
            self.dim = parse_env("GEMV_BENCH_DIM", &val)?;
        }
        if let Ok(val) = std::env::var("GEMV_BENCH_ITERATIONS") {
            self.iterations = parse_env("GEMV_BENCH_ITERATIONS", &val)?;
        }
        if let Ok(val) = std::env::var("GEMV_BENCH_EPSILON") {
            self.epsilon = parse_env("GEMV_BENCH_EPSILON", &val)?;
        }
        if let Ok(val) = std::env::var("GEMV_BENCH_SCALE") {
            self.scale = parse_env("GEMV_BENCH_SCALE", &val)?;
        }
        if let Ok(val) = std::env::var("GEMV_BENCH_SEED") {
            self.seed = parse_env("GEMV_BENCH_SEED", &val)?;
        }
        if let Ok(val) = std::env::var("GEMV_BENCH_POWER_PREFERENCE") {
            self.power_preference = parse_env("GEMV_BENCH_POWER_PREFERENCE", &val)?;
        }
        if let Ok(val) = std::env::var("GEMV_BENCH_GPU_TIMESTAMPS") {
            self.gpu_timestamps = parse_flag("GEMV_BENCH_GPU_TIMESTAMPS", &val)?;
        }
        if let Ok(val) = std::env::var("GEMV_BENCH_OUTPUT_PREVIEW") {
            self.output_preview = parse_env("GEMV_BENCH_OUTPUT_PREVIEW", &val)?;
        }
        Ok(())
    }
}
