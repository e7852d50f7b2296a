//! Resource groups and their layouts
//!
//! A resource group is what gets bound to one descriptor-set slot: a
//! descriptor set from the frame [`DescriptorPool`] plus, when the layout has
//! a constant buffer, a region of the frame [`BufferPool`].
//!
//! Layouts know where each registered named constant lives in their constant
//! buffer. Offsets are resolved by member name against the effect's
//! constant-buffer reflection; a constant the shader does not declare resolves
//! to `-1`.

use vesta_core::{FrameStamp, ObjectId};

use super::parameters::{ParameterCollection, ParameterCollectionLayout};
use super::pools::{
    BufferPool, BufferPoolAllocation, BufferPoolAllocationType, DescriptorEntry, DescriptorPool,
    DescriptorSetId,
};
use crate::config::RenderSystemConfig;
use crate::device::DescriptorSetLayoutHandle;
use crate::effect::{DescriptorSetLayoutBuilder, EffectConstantBufferDescription};

/// Offset of a constant the shader does not declare.
pub const INVALID_OFFSET: i32 = -1;

/// A bound descriptor set and its constant-buffer region.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResourceGroup {
    pub descriptor_set: DescriptorSetId,
    pub constant_buffer: Option<BufferPoolAllocation>,
}

/// Index of a deduplicated PerFrame layout of a feature.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FrameLayoutId(pub(crate) usize);

/// Index of a deduplicated PerView layout of a feature. Two effects whose
/// PerView slots are structurally identical resolve to the same id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ViewLayoutId(pub(crate) usize);

/// Handle to a named constant registered on a feature.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConstantBufferOffsetReference(pub(crate) usize);

impl ConstantBufferOffsetReference {
    #[inline]
    #[must_use]
    pub const fn index(self) -> usize {
        self.0
    }
}

/// Layout of one descriptor-set slot of an effect.
#[derive(Debug, Clone)]
pub struct ResourceGroupLayout {
    pub name: String,
    pub descriptor_set_layout_builder: DescriptorSetLayoutBuilder,
    pub descriptor_set_layout: DescriptorSetLayoutHandle,
    pub constant_buffer_reflection: Option<EffectConstantBufferDescription>,
    pub constant_buffer_size: u32,
    pub constant_buffer_hash: ObjectId,
    /// Binding index of the constant buffer inside the descriptor set.
    pub constant_buffer_binding: Option<usize>,
    offsets: Vec<i32>,
}

impl ResourceGroupLayout {
    #[must_use]
    pub fn new(
        name: impl Into<String>,
        descriptor_set_layout_builder: DescriptorSetLayoutBuilder,
        descriptor_set_layout: DescriptorSetLayoutHandle,
        constant_buffer_reflection: Option<EffectConstantBufferDescription>,
    ) -> Self {
        let name = name.into();
        let (constant_buffer_size, constant_buffer_hash) = constant_buffer_reflection
            .as_ref()
            .map_or((0, ObjectId::EMPTY), |cb| (cb.size, cb.hash()));
        let constant_buffer_binding = descriptor_set_layout_builder.constant_buffer_binding(&name);

        Self {
            name,
            descriptor_set_layout_builder,
            descriptor_set_layout,
            constant_buffer_reflection,
            constant_buffer_size,
            constant_buffer_hash,
            constant_buffer_binding,
            offsets: Vec::new(),
        }
    }

    /// Combined descriptor layout and constant buffer hash; structurally
    /// identical layouts hash equal.
    #[must_use]
    pub fn hash(&self) -> ObjectId {
        self.descriptor_set_layout_builder
            .hash()
            .combine(self.constant_buffer_hash)
    }

    /// Byte offset of a registered constant, `None` when the shader does not
    /// declare it.
    #[inline]
    #[must_use]
    pub fn constant_buffer_offset(&self, slot: ConstantBufferOffsetReference) -> Option<usize> {
        match self.offsets.get(slot.0) {
            Some(&offset) if offset >= 0 => Some(offset as usize),
            _ => None,
        }
    }

    /// Raw resolved offset, `-1` for absent constants.
    #[must_use]
    pub fn raw_constant_buffer_offset(&self, slot: ConstantBufferOffsetReference) -> i32 {
        self.offsets.get(slot.0).copied().unwrap_or(INVALID_OFFSET)
    }

    #[must_use]
    pub fn constant_buffer_offset_count(&self) -> usize {
        self.offsets.len()
    }

    /// Writes `value` at the resolved offset of `slot`. Returns `false`, and
    /// writes nothing, when the constant is absent.
    pub fn write_constant<T: bytemuck::Pod>(
        &self,
        buffer_pool: &mut BufferPool,
        allocation: BufferPoolAllocation,
        slot: ConstantBufferOffsetReference,
        value: &T,
    ) -> bool {
        match self.constant_buffer_offset(slot) {
            Some(offset) => {
                buffer_pool.write(allocation, offset, value);
                true
            }
            None => false,
        }
    }

    /// Parameter layout matching this group: constant-buffer members at their
    /// reflected offsets, then every non constant-buffer binding.
    #[must_use]
    pub fn parameter_collection_layout(&self) -> ParameterCollectionLayout {
        let mut layout = self
            .constant_buffer_reflection
            .as_ref()
            .map_or_else(ParameterCollectionLayout::new, ParameterCollectionLayout::from_constant_buffer);
        for (binding, entry) in self.descriptor_set_layout_builder.entries().iter().enumerate() {
            if Some(binding) != self.constant_buffer_binding {
                layout.add_resource(&entry.key_name);
            }
        }
        layout
    }

    /// Resolves every registered constant name against the constant-buffer
    /// reflection.
    pub(crate) fn resolve_constant_buffer_offsets(&mut self, definitions: &[String]) {
        self.offsets.resize(definitions.len(), INVALID_OFFSET);
        for (offset, name) in self.offsets.iter_mut().zip(definitions) {
            *offset = self
                .constant_buffer_reflection
                .as_ref()
                .and_then(|cb| cb.member(name))
                .map_or(INVALID_OFFSET, |member| member.offset as i32);
        }
    }
}

/// A lazily allocated resource group, allocated at most once per frame.
#[derive(Debug, Clone, Default)]
pub struct ResourceGroupEntry {
    stamp: FrameStamp,
    pub resources: Option<ResourceGroup>,
}

impl ResourceGroupEntry {
    /// Returns `true` on the first call of `frame`.
    #[inline]
    pub fn mark_as_used(&mut self, frame: u64) -> bool {
        self.stamp.mark_as_used(frame)
    }
}

/// Layout shared by every effect whose PerFrame slot is structurally equal.
#[derive(Debug, Clone)]
pub struct FrameResourceGroupLayout {
    pub layout: ResourceGroupLayout,
    pub entry: ResourceGroupEntry,
}

/// Layout shared by every effect whose PerView slot is structurally equal,
/// with one entry per view index.
#[derive(Debug, Clone)]
pub struct ViewResourceGroupLayout {
    pub layout: ResourceGroupLayout,
    pub entries: Vec<ResourceGroupEntry>,
}

impl ViewResourceGroupLayout {
    pub fn ensure_view_count(&mut self, count: usize) {
        if self.entries.len() < count {
            self.entries.resize_with(count, ResourceGroupEntry::default);
        }
    }
}

/// The per-frame pools, reset at the start of every frame.
pub struct FrameResources {
    pub descriptor_pool: DescriptorPool,
    pub buffer_pool: BufferPool,
}

impl FrameResources {
    #[must_use]
    pub fn new(config: &RenderSystemConfig) -> Self {
        Self {
            descriptor_pool: DescriptorPool::new(config.descriptor_pool_capacity),
            buffer_pool: BufferPool::new(config.buffer_pool_size, config.constant_buffer_alignment),
        }
    }

    pub fn reset(&mut self) {
        self.descriptor_pool.reset();
        self.buffer_pool.reset();
    }

    /// Allocates a descriptor set for `layout` and, if the layout has one, its
    /// constant-buffer region, bound into the set.
    pub fn prepare_resource_group(
        &mut self,
        layout: &ResourceGroupLayout,
        ty: BufferPoolAllocationType,
    ) -> ResourceGroup {
        let descriptor_set = self.descriptor_pool.allocate(
            layout.descriptor_set_layout,
            layout.descriptor_set_layout_builder.len(),
        );

        let constant_buffer = (layout.constant_buffer_size > 0)
            .then(|| self.buffer_pool.allocate(layout.constant_buffer_size as usize, ty));

        if let (Some(allocation), Some(binding)) = (constant_buffer, layout.constant_buffer_binding) {
            self.descriptor_pool.set_entry(
                descriptor_set,
                binding,
                DescriptorEntry::ConstantBuffer(allocation),
            );
        }

        ResourceGroup {
            descriptor_set,
            constant_buffer,
        }
    }

    /// Allocates a group and fills it from `parameters` by member name.
    /// The collection is relaid out to match the group first.
    pub fn prepare_resource_group_from_parameters(
        &mut self,
        layout: &ResourceGroupLayout,
        ty: BufferPoolAllocationType,
        parameters: &mut ParameterCollection,
    ) -> ResourceGroup {
        let group = self.prepare_resource_group(layout, ty);
        parameters.update_layout(&layout.parameter_collection_layout());

        if let Some(allocation) = group.constant_buffer {
            let data = parameters.data();
            let len = (allocation.size as usize).min(data.len());
            self.buffer_pool.write_bytes(allocation, 0, &data[..len]);
        }

        for (binding, entry) in layout.descriptor_set_layout_builder.entries().iter().enumerate() {
            if Some(binding) == layout.constant_buffer_binding {
                continue;
            }
            if let Some(value) = parameters.resource_by_name(&entry.key_name) {
                self.descriptor_pool
                    .set_entry(group.descriptor_set, binding, DescriptorEntry::Resource(value));
            }
        }

        group
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::effect::EffectParameterClass;

    fn layout_with(members: &[(&str, u32)]) -> ResourceGroupLayout {
        let mut builder = DescriptorSetLayoutBuilder::new();
        builder.add_binding(
            "PerDraw",
            EffectParameterClass::ConstantBuffer,
            1,
            wgpu::ShaderStages::VERTEX,
        );
        ResourceGroupLayout::new(
            "PerDraw",
            builder,
            DescriptorSetLayoutHandle(0),
            Some(EffectConstantBufferDescription::packed("PerDraw", members)),
        )
    }

    #[test]
    fn missing_member_resolves_to_invalid_offset() {
        let mut layout = layout_with(&[("Transformation.WorldInverseTranspose", 64)]);
        let definitions = vec![
            "Transformation.World".to_owned(),
            "Transformation.WorldInverseTranspose".to_owned(),
        ];
        layout.resolve_constant_buffer_offsets(&definitions);

        let world = ConstantBufferOffsetReference(0);
        let inverse = ConstantBufferOffsetReference(1);
        assert_eq!(layout.raw_constant_buffer_offset(world), INVALID_OFFSET);
        assert_eq!(layout.constant_buffer_offset(world), None);
        assert_eq!(layout.constant_buffer_offset(inverse), Some(0));
    }

    #[test]
    fn prepared_group_binds_constant_buffer() {
        let layout = layout_with(&[("Transformation.World", 64)]);
        let mut resources = FrameResources::new(&RenderSystemConfig::default());
        let group = resources.prepare_resource_group(&layout, BufferPoolAllocationType::UsedOnce);

        let allocation = group.constant_buffer.unwrap();
        assert_eq!(allocation.size, 64);
        let set = resources.descriptor_pool.get(group.descriptor_set).unwrap();
        assert_eq!(set.entries[0], DescriptorEntry::ConstantBuffer(allocation));
    }

    #[test]
    fn parameters_fill_group_by_member_name() {
        let layout = layout_with(&[("Material.Roughness", 4), ("Material.Color", 16)]);
        let color = crate::resources::ParameterKey::<glam::Vec4>::new("Material.Color");
        let mut parameters = ParameterCollection::new();
        parameters.set(&color, glam::Vec4::new(1.0, 0.5, 0.25, 1.0));

        let mut resources = FrameResources::new(&RenderSystemConfig::default());
        let group = resources.prepare_resource_group_from_parameters(
            &layout,
            BufferPoolAllocationType::UsedOnce,
            &mut parameters,
        );

        let allocation = group.constant_buffer.unwrap();
        let written: glam::Vec4 = resources.buffer_pool.read(allocation, 16);
        assert_eq!(written, glam::Vec4::new(1.0, 0.5, 0.25, 1.0));
    }

    #[test]
    fn write_constant_skips_absent_members() {
        let mut layout = layout_with(&[("Transformation.WorldViewProjection", 64)]);
        layout.resolve_constant_buffer_offsets(&["Transformation.World".to_owned()]);
        let mut resources = FrameResources::new(&RenderSystemConfig::default());
        let group = resources.prepare_resource_group(&layout, BufferPoolAllocationType::UsedOnce);

        let written = layout.write_constant(
            &mut resources.buffer_pool,
            group.constant_buffer.unwrap(),
            ConstantBufferOffsetReference(0),
            &glam::Mat4::IDENTITY,
        );
        assert!(!written);
    }
}
