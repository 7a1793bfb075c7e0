//! Binding builder: associates each buffer with the slot the kernel declares.

use tracing::debug;

use crate::buffer::{BufferRole, BufferSet};
use crate::error::{BenchError, Result};
use crate::pipeline::{BindingSlot, KernelPipeline, SlotKind};

/// Slot kind the harness expects for `role`.
pub const fn expected_kind(role: BufferRole) -> SlotKind {
    match role {
        BufferRole::Input | BufferRole::Weight => SlotKind::ReadOnlyStorage,
        BufferRole::Output => SlotKind::Storage,
        BufferRole::Params => SlotKind::Uniform,
    }
}

/// Check that a kernel declares exactly the four expected slots.
///
/// The GPU API only checks binding arity and size, so a slot that is present
/// but bound to the wrong buffer would silently corrupt results. Slot order in
/// `slots` does not matter; binding indices and kinds do.
pub fn validate_layout(slots: &[BindingSlot]) -> Result<()> {
    if slots.len() != BufferRole::ALL.len() {
        return Err(BenchError::LayoutMismatch(format!(
            "expected {} binding slots, found {}",
            BufferRole::ALL.len(),
            slots.len()
        )));
    }

    for role in BufferRole::ALL {
        let binding = role.binding();
        let declared: Vec<&BindingSlot> = slots.iter().filter(|s| s.binding == binding).collect();
        let slot = match declared.as_slice() {
            [slot] => slot,
            [] => {
                return Err(BenchError::LayoutMismatch(format!(
                    "kernel declares no slot {binding} for the {role} buffer"
                )));
            }
            _ => {
                return Err(BenchError::LayoutMismatch(format!(
                    "kernel declares slot {binding} more than once"
                )));
            }
        };
        let expected = expected_kind(role);
        if slot.kind != expected {
            return Err(BenchError::LayoutMismatch(format!(
                "slot {binding} ({role}) declared as {:?}, expected {expected:?}",
                slot.kind
            )));
        }
    }
    Ok(())
}

/// Immutable slot → buffer association, built once per run.
#[derive(Debug)]
pub struct BindingSet {
    bind_group: wgpu::BindGroup,
}

impl BindingSet {
    /// Build the bind group for `kernel` from `buffers`.
    pub fn build<K: KernelPipeline>(
        device: &wgpu::Device,
        kernel: &K,
        buffers: &BufferSet,
    ) -> Result<Self> {
        let layout = kernel.binding_layout();
        validate_layout(layout.slots)?;

        let entries: Vec<wgpu::BindGroupEntry<'_>> = BufferRole::ALL
            .iter()
            .map(|&role| wgpu::BindGroupEntry {
                binding: role.binding(),
                resource: buffers.get(role).as_entire_binding(),
            })
            .collect();

        let bind_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("fused_q4_gemv_bind_group"),
            layout: layout.bind_group_layout,
            entries: &entries,
        });
        debug!(slots = entries.len(), "built binding set");
        Ok(Self { bind_group })
    }

    pub fn bind_group(&self) -> &wgpu::BindGroup {
        &self.bind_group
    }
}
