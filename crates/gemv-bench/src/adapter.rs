//! wgpu adapter discovery and summary information.

use serde::Serialize;
use tracing::info;

use crate::config::PowerPreference;
use crate::error::{BenchError, Result};

/// Information about a wgpu adapter, as carried in run reports.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AdapterSummary {
    /// Human-readable adapter name.
    pub name: String,
    /// Backend API (Vulkan, Metal, DX12, ...).
    pub backend: String,
    /// Device type classification.
    pub device_type: String,
    /// Driver name (may be empty on some platforms).
    pub driver: String,
    /// Whether the adapter advertises GPU timestamp queries.
    pub timestamp_query: bool,
    /// Maximum size of a single buffer in bytes.
    pub max_buffer_size: u64,
}

impl AdapterSummary {
    pub fn from_adapter(adapter: &wgpu::Adapter) -> Self {
        let info = adapter.get_info();
        Self {
            name: info.name,
            backend: format!("{:?}", info.backend),
            device_type: format!("{:?}", info.device_type),
            driver: info.driver,
            timestamp_query: adapter.features().contains(wgpu::Features::TIMESTAMP_QUERY),
            max_buffer_size: adapter.limits().max_buffer_size,
        }
    }
}

impl std::fmt::Display for AdapterSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({}, {})", self.name, self.backend, self.device_type)
    }
}

fn instance() -> wgpu::Instance {
    wgpu::Instance::new(&wgpu::InstanceDescriptor {
        backends: wgpu::Backends::all(),
        ..Default::default()
    })
}

/// Request the adapter matching `power`.
///
/// There is no fallback path: no adapter is fatal.
pub async fn request_adapter(power: PowerPreference) -> Result<wgpu::Adapter> {
    let adapter = instance()
        .request_adapter(&wgpu::RequestAdapterOptions {
            power_preference: power.into(),
            compatible_surface: None,
            force_fallback_adapter: false,
        })
        .await
        .ok_or(BenchError::NoAdapter)?;

    let adapter_info = adapter.get_info();
    info!(
        backend = ?adapter_info.backend,
        device = %adapter_info.name,
        %power,
        "selected wgpu adapter"
    );
    Ok(adapter)
}

/// Enumerate every adapter visible to wgpu.
///
/// Returns an empty `Vec` when none are found.
pub fn enumerate_adapters() -> Vec<AdapterSummary> {
    instance()
        .enumerate_adapters(wgpu::Backends::all())
        .iter()
        .map(AdapterSummary::from_adapter)
        .collect()
}
