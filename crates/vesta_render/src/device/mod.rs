//! Graphics Device Abstraction
//!
//! The render pipeline never talks to a GPU API directly. Everything it needs
//! (buffer uploads, descriptor-set layouts, root signatures, pipeline states and
//! command recording) goes through the [`GraphicsDevice`] trait.
//!
//! Formats, usages and fixed-function state reuse the `wgpu` type vocabulary so
//! that a wgpu-backed device can forward them unchanged.
//!
//! - [`HeadlessDevice`]: records commands in memory (tests, tools)
//! - [`TrackedCommandList`]: skips redundant state binds on top of any device

mod headless;
mod tracked;

use std::any::Any;

use thiserror::Error;

pub use headless::{DeviceCommand, HeadlessDevice};
pub use tracked::TrackedCommandList;

use crate::effect::DescriptorSetLayoutBuilder;
use crate::feature::PipelineStateDescription;
use crate::resources::DescriptorSet;

macro_rules! device_handle {
    ($($(#[$meta:meta])* $name:ident),* $(,)?) => {
        $(
            $(#[$meta])*
            #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
            pub struct $name(pub u32);
        )*
    };
}

device_handle! {
    /// GPU buffer.
    BufferHandle,
    /// GPU texture.
    TextureHandle,
    /// Sampler state.
    SamplerHandle,
    /// Device descriptor-set layout.
    DescriptorSetLayoutHandle,
    /// Root signature (ordered list of descriptor-set layouts).
    RootSignatureHandle,
    /// Compiled pipeline state object.
    PipelineStateHandle,
}

/// Errors reported by a graphics device.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DeviceError {
    /// The device could not allocate memory for a resource.
    #[error("Out of device memory while creating {0}")]
    OutOfMemory(&'static str),

    /// A handle did not name a live resource.
    #[error("Invalid {kind} handle {id}")]
    InvalidHandle {
        /// Resource kind
        kind: &'static str,
        /// Raw handle value
        id: u32,
    },

    /// A write went past the end of a buffer.
    #[error("Write of {size} bytes at offset {offset} exceeds buffer capacity {capacity}")]
    OutOfBounds {
        /// Write offset
        offset: u64,
        /// Write size
        size: u64,
        /// Buffer capacity
        capacity: u64,
    },
}

/// Buffer creation parameters.
#[derive(Debug, Clone, Copy)]
pub struct BufferDescriptor<'a> {
    pub label: Option<&'a str>,
    pub size: u64,
    pub usage: wgpu::BufferUsages,
}

/// Texture creation parameters.
#[derive(Debug, Clone, Copy)]
pub struct TextureDescriptor<'a> {
    pub label: Option<&'a str>,
    pub width: u32,
    pub height: u32,
    pub format: wgpu::TextureFormat,
}

/// Opaque graphics device: resource creation plus command recording.
pub trait GraphicsDevice: Send {
    /// Human readable device name.
    fn name(&self) -> &str;

    fn create_buffer(&mut self, desc: &BufferDescriptor<'_>) -> Result<BufferHandle, DeviceError>;

    fn write_buffer(
        &mut self,
        buffer: BufferHandle,
        offset: u64,
        data: &[u8],
    ) -> Result<(), DeviceError>;

    fn destroy_buffer(&mut self, buffer: BufferHandle);

    fn create_texture(
        &mut self,
        desc: &TextureDescriptor<'_>,
    ) -> Result<TextureHandle, DeviceError>;

    fn create_sampler(&mut self, label: Option<&str>) -> Result<SamplerHandle, DeviceError>;

    fn create_descriptor_set_layout(
        &mut self,
        layout: &DescriptorSetLayoutBuilder,
    ) -> Result<DescriptorSetLayoutHandle, DeviceError>;

    /// Creates a root signature; `None` entries are descriptor-set slots the
    /// effect does not use.
    fn create_root_signature(
        &mut self,
        layouts: &[Option<DescriptorSetLayoutHandle>],
    ) -> Result<RootSignatureHandle, DeviceError>;

    fn create_pipeline_state(
        &mut self,
        desc: &PipelineStateDescription,
    ) -> Result<PipelineStateHandle, DeviceError>;

    // === Command recording ===

    fn set_pipeline_state(&mut self, pipeline: PipelineStateHandle);

    /// Binds a descriptor set. `constant_buffer_pool` is the frame buffer pool
    /// that constant-buffer entries of the set point into.
    fn set_descriptor_set(
        &mut self,
        index: u32,
        set: &DescriptorSet,
        constant_buffer_pool: Option<BufferHandle>,
    );

    fn set_vertex_buffer(&mut self, slot: u32, buffer: BufferHandle, offset: u64, stride: u32);

    fn set_index_buffer(&mut self, buffer: BufferHandle, offset: u64, format: wgpu::IndexFormat);

    fn draw(&mut self, vertex_count: u32, start_vertex: u32);

    fn draw_indexed(&mut self, index_count: u32, start_index: u32, base_vertex: i32);

    /// Downcasting hook, mostly for inspecting a [`HeadlessDevice`].
    fn as_any(&self) -> &dyn Any;

    fn as_any_mut(&mut self) -> &mut dyn Any;
}
