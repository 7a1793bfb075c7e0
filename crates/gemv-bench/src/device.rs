//! Capability negotiation and the device handle threaded through a run.

use std::sync::{Arc, OnceLock};

use serde::Serialize;
use tracing::{error, info, warn};

use crate::adapter::{self, AdapterSummary};
use crate::config::BenchConfig;
use crate::error::{BenchError, Result};

/// Optional device features, fixed for the lifetime of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct DeviceCapabilities {
    /// GPU-side timestamp queries are enabled on the device.
    pub timestamp_query: bool,
}

impl DeviceCapabilities {
    /// Capabilities an adapter advertises.
    pub fn from_features(features: wgpu::Features) -> Self {
        Self { timestamp_query: features.contains(wgpu::Features::TIMESTAMP_QUERY) }
    }

    /// Features to request from the adapter for these capabilities.
    pub fn required_features(&self) -> wgpu::Features {
        let mut features = wgpu::Features::empty();
        if self.timestamp_query {
            features |= wgpu::Features::TIMESTAMP_QUERY;
        }
        features
    }
}

/// The adapter side of negotiation: advertise features, hand out a device.
#[allow(async_fn_in_trait)]
pub trait GpuAdapter {
    type Device;

    /// Features the adapter advertises.
    fn features(&self) -> wgpu::Features;

    /// Request a device with exactly `required` features enabled.
    ///
    /// Requesting a feature the adapter does not advertise fails.
    async fn request_device(&self, required: wgpu::Features) -> Result<Self::Device>;
}

impl GpuAdapter for wgpu::Adapter {
    type Device = (wgpu::Device, wgpu::Queue);

    fn features(&self) -> wgpu::Features {
        wgpu::Adapter::features(self)
    }

    async fn request_device(&self, required: wgpu::Features) -> Result<Self::Device> {
        let pair = wgpu::Adapter::request_device(
            self,
            &wgpu::DeviceDescriptor {
                label: Some("gemv-bench"),
                required_features: required,
                required_limits: self.limits(),
                ..Default::default()
            },
            None,
        )
        .await?;
        Ok(pair)
    }
}

/// Query the adapter, then request a device with timestamp capture enabled
/// only if it is both advertised and allowed.
///
/// The capability query always precedes and gates the device request: an
/// unsupported feature is never requested.
pub async fn negotiate<A: GpuAdapter>(
    adapter: &A,
    allow_timestamps: bool,
) -> Result<(A::Device, DeviceCapabilities)> {
    let advertised = DeviceCapabilities::from_features(adapter.features());
    let capabilities =
        DeviceCapabilities { timestamp_query: allow_timestamps && advertised.timestamp_query };

    if !advertised.timestamp_query {
        warn!("adapter has no timestamp query support, timing falls back to host clock");
    } else if !allow_timestamps {
        info!("GPU timestamps disabled by configuration");
    }

    let device = adapter.request_device(capabilities.required_features()).await?;
    info!(timestamp_query = capabilities.timestamp_query, "device negotiated");
    Ok((device, capabilities))
}

/// First fatal fault reported by the device, if any.
///
/// Fed by the device-lost callback and the uncaptured-error handler.
#[derive(Debug, Clone, Default)]
pub struct DeviceFaults {
    first: Arc<OnceLock<String>>,
}

impl DeviceFaults {
    /// Install the wgpu callbacks that record faults for `device`.
    pub fn install(device: &wgpu::Device) -> Self {
        let faults = Self::default();

        let lost = faults.clone();
        device.set_device_lost_callback(move |reason, message| {
            error!(?reason, %message, "wgpu device lost");
            lost.record(format!("{reason:?}: {message}"));
        });

        let uncaptured = faults.clone();
        device.on_uncaptured_error(Box::new(move |err| {
            error!(error = %err, "wgpu uncaptured error");
            uncaptured.record(err.to_string());
        }));

        faults
    }

    /// Record a fault. Only the first one is kept.
    pub fn record(&self, message: impl Into<String>) {
        let _ = self.first.set(message.into());
    }

    /// Fail with [`BenchError::DeviceLost`] if any fault has been recorded.
    pub fn check(&self) -> Result<()> {
        match self.first.get() {
            Some(message) => Err(BenchError::DeviceLost(message.clone())),
            None => Ok(()),
        }
    }
}

/// Device, queue and negotiated capabilities for one benchmark run.
///
/// Passed explicitly to every component; there is no process-wide GPU context.
pub struct DeviceHandle {
    pub device: wgpu::Device,
    pub queue: wgpu::Queue,
    capabilities: DeviceCapabilities,
    adapter: AdapterSummary,
    faults: DeviceFaults,
}

impl DeviceHandle {
    /// Request an adapter per `config`, negotiate capabilities and create the device.
    pub async fn acquire(config: &BenchConfig) -> Result<Self> {
        let adapter = adapter::request_adapter(config.power_preference).await?;
        let summary = AdapterSummary::from_adapter(&adapter);
        let ((device, queue), capabilities) = negotiate(&adapter, config.gpu_timestamps).await?;
        let faults = DeviceFaults::install(&device);
        Ok(Self { device, queue, capabilities, adapter: summary, faults })
    }

    pub fn capabilities(&self) -> DeviceCapabilities {
        self.capabilities
    }

    pub fn adapter(&self) -> &AdapterSummary {
        &self.adapter
    }

    pub fn faults(&self) -> &DeviceFaults {
        &self.faults
    }

    /// Device limits in effect.
    pub fn limits(&self) -> wgpu::Limits {
        self.device.limits()
    }
}
