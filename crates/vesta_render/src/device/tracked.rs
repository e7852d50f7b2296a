//! Command list with state tracking
//!
//! Avoids redundant state changes between consecutive draws.

use super::{BufferHandle, GraphicsDevice, PipelineStateHandle};
use crate::resources::{DescriptorSet, DescriptorSetId};

const MAX_DESCRIPTOR_SETS: usize = 8;
const MAX_VERTEX_BUFFERS: usize = 8;

pub struct TrackedCommandList<'a> {
    device: &'a mut dyn GraphicsDevice,
    current_pipeline: Option<PipelineStateHandle>,
    current_descriptor_sets: [Option<DescriptorSetId>; MAX_DESCRIPTOR_SETS],
    current_vertex_buffers: [Option<(BufferHandle, u64)>; MAX_VERTEX_BUFFERS],
    current_index_buffer: Option<(BufferHandle, u64)>,
    skipped_binds: usize,
}

impl<'a> TrackedCommandList<'a> {
    #[must_use]
    pub fn new(device: &'a mut dyn GraphicsDevice) -> Self {
        Self {
            device,
            current_pipeline: None,
            current_descriptor_sets: [None; MAX_DESCRIPTOR_SETS],
            current_vertex_buffers: [None; MAX_VERTEX_BUFFERS],
            current_index_buffer: None,
            skipped_binds: 0,
        }
    }

    pub fn set_pipeline_state(&mut self, pipeline: PipelineStateHandle) {
        if self.current_pipeline == Some(pipeline) {
            self.skipped_binds += 1;
            return;
        }
        self.device.set_pipeline_state(pipeline);
        self.current_pipeline = Some(pipeline);
    }

    pub fn set_descriptor_set(
        &mut self,
        index: u32,
        id: DescriptorSetId,
        set: &DescriptorSet,
        constant_buffer_pool: Option<BufferHandle>,
    ) {
        let slot = index as usize;
        if slot < MAX_DESCRIPTOR_SETS {
            if self.current_descriptor_sets[slot] == Some(id) {
                self.skipped_binds += 1;
                return;
            }
            self.current_descriptor_sets[slot] = Some(id);
        }
        self.device
            .set_descriptor_set(index, set, constant_buffer_pool);
    }

    pub fn set_vertex_buffer(&mut self, slot: u32, buffer: BufferHandle, offset: u64, stride: u32) {
        let index = slot as usize;
        if index < MAX_VERTEX_BUFFERS {
            if self.current_vertex_buffers[index] == Some((buffer, offset)) {
                self.skipped_binds += 1;
                return;
            }
            self.current_vertex_buffers[index] = Some((buffer, offset));
        }
        self.device.set_vertex_buffer(slot, buffer, offset, stride);
    }

    pub fn set_index_buffer(&mut self, buffer: BufferHandle, offset: u64, format: wgpu::IndexFormat) {
        if self.current_index_buffer == Some((buffer, offset)) {
            self.skipped_binds += 1;
            return;
        }
        self.current_index_buffer = Some((buffer, offset));
        self.device.set_index_buffer(buffer, offset, format);
    }

    pub fn draw(&mut self, vertex_count: u32, start_vertex: u32) {
        self.device.draw(vertex_count, start_vertex);
    }

    pub fn draw_indexed(&mut self, index_count: u32, start_index: u32, base_vertex: i32) {
        self.device
            .draw_indexed(index_count, start_index, base_vertex);
    }

    /// Number of binds elided so far.
    #[must_use]
    pub fn skipped_binds(&self) -> usize {
        self.skipped_binds
    }
}
