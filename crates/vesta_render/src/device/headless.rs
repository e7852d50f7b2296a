//! Headless Device
//!
//! A [`GraphicsDevice`] that keeps buffers in host memory and records every
//! command. Nothing is rasterized.

use std::any::Any;

use vesta_core::ObjectId;

use super::{
    BufferDescriptor, BufferHandle, DescriptorSetLayoutHandle, DeviceError, GraphicsDevice,
    PipelineStateHandle, RootSignatureHandle, SamplerHandle, TextureDescriptor, TextureHandle,
};
use crate::effect::DescriptorSetLayoutBuilder;
use crate::feature::PipelineStateDescription;
use crate::resources::{DescriptorEntry, DescriptorSet};

/// A recorded command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeviceCommand {
    SetPipelineState(PipelineStateHandle),
    SetDescriptorSet {
        index: u32,
        layout: DescriptorSetLayoutHandle,
        /// `(buffer, offset, size)` of the set's constant buffer, if any.
        constant_buffer: Option<(BufferHandle, u32, u32)>,
    },
    SetVertexBuffer {
        slot: u32,
        buffer: BufferHandle,
        offset: u64,
        stride: u32,
    },
    SetIndexBuffer {
        buffer: BufferHandle,
        offset: u64,
        format: wgpu::IndexFormat,
    },
    Draw {
        vertex_count: u32,
        start_vertex: u32,
    },
    DrawIndexed {
        index_count: u32,
        start_index: u32,
        base_vertex: i32,
    },
}

#[derive(Default)]
pub struct HeadlessDevice {
    buffers: Vec<Option<Vec<u8>>>,
    textures: Vec<wgpu::TextureFormat>,
    samplers: u32,
    descriptor_set_layouts: Vec<ObjectId>,
    root_signatures: Vec<Vec<Option<DescriptorSetLayoutHandle>>>,
    pipeline_states: Vec<PipelineStateDescription>,
    commands: Vec<DeviceCommand>,
}

impl HeadlessDevice {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn commands(&self) -> &[DeviceCommand] {
        &self.commands
    }

    pub fn take_commands(&mut self) -> Vec<DeviceCommand> {
        std::mem::take(&mut self.commands)
    }

    /// Host copy of a buffer's contents.
    #[must_use]
    pub fn buffer_contents(&self, buffer: BufferHandle) -> Option<&[u8]> {
        self.buffers
            .get(buffer.0 as usize)
            .and_then(|b| b.as_deref())
    }

    #[must_use]
    pub fn live_buffer_count(&self) -> usize {
        self.buffers.iter().filter(|b| b.is_some()).count()
    }

    #[must_use]
    pub fn descriptor_set_layout_count(&self) -> usize {
        self.descriptor_set_layouts.len()
    }

    #[must_use]
    pub fn root_signature_count(&self) -> usize {
        self.root_signatures.len()
    }

    #[must_use]
    pub fn pipeline_state_count(&self) -> usize {
        self.pipeline_states.len()
    }

    #[must_use]
    pub fn pipeline_state(&self, handle: PipelineStateHandle) -> Option<&PipelineStateDescription> {
        self.pipeline_states.get(handle.0 as usize)
    }

    /// Number of recorded `Draw` and `DrawIndexed` commands.
    #[must_use]
    pub fn draw_call_count(&self) -> usize {
        self.commands
            .iter()
            .filter(|c| matches!(c, DeviceCommand::Draw { .. } | DeviceCommand::DrawIndexed { .. }))
            .count()
    }

    fn buffer_mut(&mut self, buffer: BufferHandle) -> Result<&mut Vec<u8>, DeviceError> {
        self.buffers
            .get_mut(buffer.0 as usize)
            .and_then(Option::as_mut)
            .ok_or(DeviceError::InvalidHandle {
                kind: "buffer",
                id: buffer.0,
            })
    }
}

impl GraphicsDevice for HeadlessDevice {
    fn name(&self) -> &str {
        "Headless"
    }

    fn create_buffer(&mut self, desc: &BufferDescriptor<'_>) -> Result<BufferHandle, DeviceError> {
        let size = usize::try_from(desc.size).map_err(|_| DeviceError::OutOfMemory("buffer"))?;
        let handle = BufferHandle(self.buffers.len() as u32);
        self.buffers.push(Some(vec![0; size]));
        log::trace!(
            "Headless: created buffer {:?} '{}' ({} bytes)",
            handle,
            desc.label.unwrap_or_default(),
            size
        );
        Ok(handle)
    }

    fn write_buffer(
        &mut self,
        buffer: BufferHandle,
        offset: u64,
        data: &[u8],
    ) -> Result<(), DeviceError> {
        let storage = self.buffer_mut(buffer)?;
        let start = offset as usize;
        let end = start + data.len();
        if end > storage.len() {
            return Err(DeviceError::OutOfBounds {
                offset,
                size: data.len() as u64,
                capacity: storage.len() as u64,
            });
        }
        storage[start..end].copy_from_slice(data);
        Ok(())
    }

    fn destroy_buffer(&mut self, buffer: BufferHandle) {
        if let Some(slot) = self.buffers.get_mut(buffer.0 as usize) {
            *slot = None;
        }
    }

    fn create_texture(
        &mut self,
        desc: &TextureDescriptor<'_>,
    ) -> Result<TextureHandle, DeviceError> {
        let handle = TextureHandle(self.textures.len() as u32);
        self.textures.push(desc.format);
        Ok(handle)
    }

    fn create_sampler(&mut self, _label: Option<&str>) -> Result<SamplerHandle, DeviceError> {
        let handle = SamplerHandle(self.samplers);
        self.samplers += 1;
        Ok(handle)
    }

    fn create_descriptor_set_layout(
        &mut self,
        layout: &DescriptorSetLayoutBuilder,
    ) -> Result<DescriptorSetLayoutHandle, DeviceError> {
        let handle = DescriptorSetLayoutHandle(self.descriptor_set_layouts.len() as u32);
        self.descriptor_set_layouts.push(layout.hash());
        Ok(handle)
    }

    fn create_root_signature(
        &mut self,
        layouts: &[Option<DescriptorSetLayoutHandle>],
    ) -> Result<RootSignatureHandle, DeviceError> {
        let handle = RootSignatureHandle(self.root_signatures.len() as u32);
        self.root_signatures.push(layouts.to_vec());
        Ok(handle)
    }

    fn create_pipeline_state(
        &mut self,
        desc: &PipelineStateDescription,
    ) -> Result<PipelineStateHandle, DeviceError> {
        let handle = PipelineStateHandle(self.pipeline_states.len() as u32);
        self.pipeline_states.push(desc.clone());
        Ok(handle)
    }

    fn set_pipeline_state(&mut self, pipeline: PipelineStateHandle) {
        self.commands.push(DeviceCommand::SetPipelineState(pipeline));
    }

    fn set_descriptor_set(
        &mut self,
        index: u32,
        set: &DescriptorSet,
        constant_buffer_pool: Option<BufferHandle>,
    ) {
        let constant_buffer = set.entries.iter().find_map(|entry| match entry {
            DescriptorEntry::ConstantBuffer(allocation) => {
                constant_buffer_pool.map(|buffer| (buffer, allocation.offset, allocation.size))
            }
            _ => None,
        });
        self.commands.push(DeviceCommand::SetDescriptorSet {
            index,
            layout: set.layout,
            constant_buffer,
        });
    }

    fn set_vertex_buffer(&mut self, slot: u32, buffer: BufferHandle, offset: u64, stride: u32) {
        self.commands.push(DeviceCommand::SetVertexBuffer {
            slot,
            buffer,
            offset,
            stride,
        });
    }

    fn set_index_buffer(&mut self, buffer: BufferHandle, offset: u64, format: wgpu::IndexFormat) {
        self.commands.push(DeviceCommand::SetIndexBuffer {
            buffer,
            offset,
            format,
        });
    }

    fn draw(&mut self, vertex_count: u32, start_vertex: u32) {
        self.commands.push(DeviceCommand::Draw {
            vertex_count,
            start_vertex,
        });
    }

    fn draw_indexed(&mut self, index_count: u32, start_index: u32, base_vertex: i32) {
        self.commands.push(DeviceCommand::DrawIndexed {
            index_count,
            start_index,
            base_vertex,
        });
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn write_buffer_checks_bounds() {
        let mut device = HeadlessDevice::new();
        let buffer = device
            .create_buffer(&BufferDescriptor {
                label: Some("test"),
                size: 8,
                usage: wgpu::BufferUsages::UNIFORM,
            })
            .unwrap();

        device.write_buffer(buffer, 4, &[1, 2, 3, 4]).unwrap();
        assert_eq!(device.buffer_contents(buffer).unwrap(), &[0, 0, 0, 0, 1, 2, 3, 4]);

        let err = device.write_buffer(buffer, 6, &[0; 4]).unwrap_err();
        assert!(matches!(err, DeviceError::OutOfBounds { .. }));
    }

    #[test]
    fn destroyed_buffer_rejects_writes() {
        let mut device = HeadlessDevice::new();
        let buffer = device
            .create_buffer(&BufferDescriptor {
                label: None,
                size: 4,
                usage: wgpu::BufferUsages::UNIFORM,
            })
            .unwrap();
        device.destroy_buffer(buffer);

        assert_eq!(device.live_buffer_count(), 0);
        assert!(device.write_buffer(buffer, 0, &[0]).is_err());
    }
}
