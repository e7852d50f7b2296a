//! Pipeline state descriptions and their cache.
//!
//! Some `wgpu` descriptor types are not hashable, so the description stores
//! hashable mirrors of the fields that take part in pipeline identity.

use std::hash::{Hash, Hasher};

use rustc_hash::FxHashMap;
use smallvec::SmallVec;
use vesta_core::ObjectId;

use crate::device::{DeviceError, GraphicsDevice, PipelineStateHandle, RootSignatureHandle};
use crate::stage::RenderOutputDescription;

// ─── Hashable Mirror Types ────────────────────────────────────────────────────

/// Hashable mirror of `wgpu::BlendComponent`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BlendComponentKey {
    pub src_factor: wgpu::BlendFactor,
    pub dst_factor: wgpu::BlendFactor,
    pub operation: wgpu::BlendOperation,
}

impl From<wgpu::BlendComponent> for BlendComponentKey {
    fn from(b: wgpu::BlendComponent) -> Self {
        Self {
            src_factor: b.src_factor,
            dst_factor: b.dst_factor,
            operation: b.operation,
        }
    }
}

/// Hashable mirror of `wgpu::BlendState`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BlendStateKey {
    pub color: BlendComponentKey,
    pub alpha: BlendComponentKey,
}

impl From<wgpu::BlendState> for BlendStateKey {
    fn from(b: wgpu::BlendState) -> Self {
        Self {
            color: b.color.into(),
            alpha: b.alpha.into(),
        }
    }
}

impl BlendStateKey {
    #[must_use]
    pub fn as_wgpu(&self) -> wgpu::BlendState {
        let component = |c: BlendComponentKey| wgpu::BlendComponent {
            src_factor: c.src_factor,
            dst_factor: c.dst_factor,
            operation: c.operation,
        };
        wgpu::BlendState {
            color: component(self.color),
            alpha: component(self.alpha),
        }
    }
}

// ─── Vertex Input ────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct VertexAttributeDescription {
    pub format: wgpu::VertexFormat,
    pub offset: u64,
    pub shader_location: u32,
}

/// Layout of one vertex buffer.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct VertexLayout {
    pub stride: u64,
    pub step_mode: wgpu::VertexStepMode,
    pub attributes: SmallVec<[VertexAttributeDescription; 4]>,
}

impl VertexLayout {
    #[must_use]
    pub fn new(stride: u64) -> Self {
        Self {
            stride,
            step_mode: wgpu::VertexStepMode::Vertex,
            attributes: SmallVec::new(),
        }
    }

    /// Appends an attribute at the next shader location.
    #[must_use]
    pub fn with_attribute(mut self, format: wgpu::VertexFormat, offset: u64) -> Self {
        let shader_location = self.attributes.len() as u32;
        self.attributes.push(VertexAttributeDescription {
            format,
            offset,
            shader_location,
        });
        self
    }

    /// Interleaved position/normal/uv layout.
    #[must_use]
    pub fn position_normal_uv() -> Self {
        Self::new(32)
            .with_attribute(wgpu::VertexFormat::Float32x3, 0)
            .with_attribute(wgpu::VertexFormat::Float32x3, 12)
            .with_attribute(wgpu::VertexFormat::Float32x2, 24)
    }
}

// ─── Pipeline State ──────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RasterizerState {
    pub cull_mode: Option<wgpu::Face>,
    pub front_face: wgpu::FrontFace,
    pub depth_clip_enable: bool,
}

impl Default for RasterizerState {
    fn default() -> Self {
        Self {
            cull_mode: Some(wgpu::Face::Back),
            front_face: wgpu::FrontFace::Ccw,
            depth_clip_enable: true,
        }
    }
}

/// Everything a device needs to build a pipeline state object.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PipelineStateDescription {
    pub effect_bytecode: ObjectId,
    pub root_signature: RootSignatureHandle,
    pub primitive_topology: wgpu::PrimitiveTopology,
    pub rasterizer: RasterizerState,
    pub blend: Option<BlendStateKey>,
    pub depth_write: bool,
    pub depth_compare: wgpu::CompareFunction,
    pub vertex_layouts: SmallVec<[VertexLayout; 2]>,
    pub output: RenderOutputDescription,
}

impl PipelineStateDescription {
    #[must_use]
    pub fn new(
        effect_bytecode: ObjectId,
        root_signature: RootSignatureHandle,
        output: RenderOutputDescription,
    ) -> Self {
        Self {
            effect_bytecode,
            root_signature,
            primitive_topology: wgpu::PrimitiveTopology::TriangleList,
            rasterizer: RasterizerState::default(),
            blend: None,
            depth_write: true,
            depth_compare: wgpu::CompareFunction::LessEqual,
            vertex_layouts: SmallVec::new(),
            output,
        }
    }
}

/// Hashes any key with `FxHasher`.
#[inline]
#[must_use]
pub fn fx_hash_key<K: Hash>(key: &K) -> u64 {
    let mut hasher = rustc_hash::FxHasher::default();
    key.hash(&mut hasher);
    hasher.finish()
}

/// Device pipeline states deduplicated by description hash.
#[derive(Debug, Default)]
pub struct PipelineStateCache {
    lookup: FxHashMap<u64, PipelineStateHandle>,
}

impl PipelineStateCache {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get_or_create(
        &mut self,
        device: &mut dyn GraphicsDevice,
        desc: &PipelineStateDescription,
    ) -> Result<PipelineStateHandle, DeviceError> {
        let hash = fx_hash_key(desc);
        if let Some(&handle) = self.lookup.get(&hash) {
            return Ok(handle);
        }
        let handle = device.create_pipeline_state(desc)?;
        log::debug!(
            "Created pipeline state {} for effect {}",
            handle.0,
            desc.effect_bytecode
        );
        self.lookup.insert(hash, handle);
        Ok(handle)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.lookup.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.lookup.is_empty()
    }

    pub fn clear(&mut self) {
        self.lookup.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::HeadlessDevice;

    #[test]
    fn identical_descriptions_share_a_pipeline_state() {
        let mut device = HeadlessDevice::new();
        let mut cache = PipelineStateCache::new();
        let desc = PipelineStateDescription::new(
            ObjectId::from_bytes(b"effect"),
            RootSignatureHandle(0),
            RenderOutputDescription::default(),
        );

        let a = cache.get_or_create(&mut device, &desc).unwrap();
        let b = cache.get_or_create(&mut device, &desc.clone()).unwrap();
        assert_eq!(a, b);
        assert_eq!(device.pipeline_state_count(), 1);

        let mut culled = desc;
        culled.rasterizer.cull_mode = None;
        let c = cache.get_or_create(&mut device, &culled).unwrap();
        assert_ne!(a, c);
        assert_eq!(cache.len(), 2);
    }

    #[test]
    fn vertex_layout_assigns_sequential_locations() {
        let layout = VertexLayout::position_normal_uv();
        let locations: Vec<u32> = layout.attributes.iter().map(|a| a.shader_location).collect();
        assert_eq!(locations, vec![0, 1, 2]);
    }
}
