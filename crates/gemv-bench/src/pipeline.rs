//! The kernel collaborator: a compiled pipeline plus its declared binding layout.

use gemv_bench_shaders::{ENTRY_POINT, FUSED_Q4_GEMV_RMSNORM_SRC};
use tracing::debug;

use crate::binding::BindingSet;
use crate::device::DeviceHandle;
use crate::error::{BenchError, Result};

/// How a binding slot is accessed by the shader.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotKind {
    /// `var<storage, read>`
    ReadOnlyStorage,
    /// `var<storage, read_write>`
    Storage,
    /// `var<uniform>`
    Uniform,
}

impl SlotKind {
    fn binding_type(self) -> wgpu::BindingType {
        let ty = match self {
            Self::ReadOnlyStorage => wgpu::BufferBindingType::Storage { read_only: true },
            Self::Storage => wgpu::BufferBindingType::Storage { read_only: false },
            Self::Uniform => wgpu::BufferBindingType::Uniform,
        };
        wgpu::BindingType::Buffer { ty, has_dynamic_offset: false, min_binding_size: None }
    }
}

/// One binding slot a kernel declares in bind group 0.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BindingSlot {
    pub binding: u32,
    pub kind: SlotKind,
}

impl BindingSlot {
    pub const fn new(binding: u32, kind: SlotKind) -> Self {
        Self { binding, kind }
    }

    fn layout_entry(&self) -> wgpu::BindGroupLayoutEntry {
        wgpu::BindGroupLayoutEntry {
            binding: self.binding,
            visibility: wgpu::ShaderStages::COMPUTE,
            ty: self.kind.binding_type(),
            count: None,
        }
    }
}

/// A kernel's declared binding layout.
pub struct KernelLayout<'a> {
    pub slots: &'a [BindingSlot],
    pub bind_group_layout: &'a wgpu::BindGroupLayout,
}

/// An opaque, already-compiled compute kernel.
///
/// The harness never inspects kernel internals: it builds bindings against
/// [`binding_layout`](Self::binding_layout) and records work through
/// [`dispatch`](Self::dispatch).
pub trait KernelPipeline {
    /// Slots the kernel declares, with the layout to build bind groups against.
    fn binding_layout(&self) -> KernelLayout<'_>;

    /// Record one dispatch of `workgroups` workgroups into `pass`.
    fn dispatch(&self, pass: &mut wgpu::ComputePass<'_>, bindings: &BindingSet, workgroups: u32);
}

/// Fused 4-bit GEMV + RMS normalization kernel.
pub struct FusedQ4Gemv {
    pipeline: wgpu::ComputePipeline,
    bind_group_layout: wgpu::BindGroupLayout,
    slots: [BindingSlot; 4],
}

impl FusedQ4Gemv {
    /// Slots declared by the WGSL source.
    pub const SLOTS: [BindingSlot; 4] = [
        // binding 0: input vector (read-only)
        BindingSlot::new(0, SlotKind::ReadOnlyStorage),
        // binding 1: packed weights (read-only)
        BindingSlot::new(1, SlotKind::ReadOnlyStorage),
        // binding 2: output vector (read-write)
        BindingSlot::new(2, SlotKind::Storage),
        // binding 3: params (uniform)
        BindingSlot::new(3, SlotKind::Uniform),
    ];

    /// Compile the WGSL shader into a ready-to-dispatch pipeline.
    pub fn new(handle: &DeviceHandle) -> Result<Self> {
        let device = &handle.device;
        device.push_error_scope(wgpu::ErrorFilter::Validation);

        let module = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("fused_q4_gemv_rmsnorm"),
            source: wgpu::ShaderSource::Wgsl(FUSED_Q4_GEMV_RMSNORM_SRC.into()),
        });

        let entries: Vec<wgpu::BindGroupLayoutEntry> =
            Self::SLOTS.iter().map(BindingSlot::layout_entry).collect();
        let bind_group_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("fused_q4_gemv_bgl"),
            entries: &entries,
        });

        let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("fused_q4_gemv_layout"),
            bind_group_layouts: &[&bind_group_layout],
            push_constant_ranges: &[],
        });

        let pipeline = device.create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
            label: Some("fused_q4_gemv"),
            layout: Some(&pipeline_layout),
            module: &module,
            entry_point: Some(ENTRY_POINT),
            compilation_options: Default::default(),
            cache: None,
        });

        if let Some(err) = pollster::block_on(device.pop_error_scope()) {
            return Err(BenchError::PipelineCreation(err.to_string()));
        }

        debug!(entry_point = ENTRY_POINT, "compiled fused Q4 GEMV pipeline");
        Ok(Self { pipeline, bind_group_layout, slots: Self::SLOTS })
    }
}

impl KernelPipeline for FusedQ4Gemv {
    fn binding_layout(&self) -> KernelLayout<'_> {
        KernelLayout { slots: &self.slots, bind_group_layout: &self.bind_group_layout }
    }

    fn dispatch(&self, pass: &mut wgpu::ComputePass<'_>, bindings: &BindingSet, workgroups: u32) {
        pass.set_pipeline(&self.pipeline);
        pass.set_bind_group(0, bindings.bind_group(), &[]);
        pass.dispatch_workgroups(workgroups, 1, 1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn declared_slots_are_dense_from_zero() {
        let bindings: Vec<u32> = FusedQ4Gemv::SLOTS.iter().map(|s| s.binding).collect();
        assert_eq!(bindings, vec![0, 1, 2, 3]);
    }

    #[test]
    fn only_output_is_writable() {
        let writable: Vec<u32> = FusedQ4Gemv::SLOTS
            .iter()
            .filter(|s| s.kind == SlotKind::Storage)
            .map(|s| s.binding)
            .collect();
        assert_eq!(writable, vec![2]);
    }

    #[test]
    fn layout_entry_maps_kind() {
        let entry = BindingSlot::new(3, SlotKind::Uniform).layout_entry();
        assert_eq!(entry.binding, 3);
        assert_eq!(entry.visibility, wgpu::ShaderStages::COMPUTE);
        assert!(matches!(
            entry.ty,
            wgpu::BindingType::Buffer { ty: wgpu::BufferBindingType::Uniform, .. }
        ));

        let entry = BindingSlot::new(0, SlotKind::ReadOnlyStorage).layout_entry();
        assert!(matches!(
            entry.ty,
            wgpu::BindingType::Buffer {
                ty: wgpu::BufferBindingType::Storage { read_only: true },
                ..
            }
        ));
    }

    #[test]
    #[ignore = "requires GPU adapter - run manually on machines with a GPU"]
    fn compiles_on_real_device() {
        use crate::config::BenchConfig;

        let handle = pollster::block_on(DeviceHandle::acquire(&BenchConfig::default())).unwrap();
        let kernel = FusedQ4Gemv::new(&handle).unwrap();
        assert_eq!(kernel.binding_layout().slots.len(), 4);
    }
}
