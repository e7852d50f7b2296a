//! Scene Bridge
//!
//! The renderer does not own a scene graph. Game code describes what to draw
//! with [`ModelComponent`]s (a shared [`Model`], material overrides, a world
//! matrix) and hands them to a [`ModelProcessor`], which keeps one
//! [`RenderModel`] per component and one render object per mesh.

mod processor;

use std::sync::Arc;

use glam::{Mat4, Vec3};
use smallvec::SmallVec;

pub use processor::{ModelProcessor, RenderModel};

use crate::device::BufferHandle;
use crate::effect::{EffectParameterValue, PermutationParameterKey};
use crate::feature::VertexLayout;
use crate::object::RenderGroupMask;
use crate::resources::ParameterCollection;

/// Identifier of a scene entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EntityId(pub u64);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VertexBufferBinding {
    pub buffer: BufferHandle,
    pub offset: u64,
    pub layout: VertexLayout,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IndexBufferBinding {
    pub buffer: BufferHandle,
    pub offset: u64,
    pub format: wgpu::IndexFormat,
}

/// Geometry and draw range of a mesh.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MeshDraw {
    pub primitive_topology: wgpu::PrimitiveTopology,
    /// Index count when indexed, vertex count otherwise.
    pub draw_count: u32,
    pub start_location: u32,
    pub vertex_buffers: SmallVec<[VertexBufferBinding; 2]>,
    pub index_buffer: Option<IndexBufferBinding>,
}

impl MeshDraw {
    /// A triangle list over one vertex buffer, optionally indexed.
    #[must_use]
    pub fn triangles(
        vertex_buffer: VertexBufferBinding,
        index_buffer: Option<IndexBufferBinding>,
        draw_count: u32,
    ) -> Self {
        Self {
            primitive_topology: wgpu::PrimitiveTopology::TriangleList,
            draw_count,
            start_location: 0,
            vertex_buffers: SmallVec::from_elem(vertex_buffer, 1),
            index_buffer,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Mesh {
    pub name: String,
    pub draw: MeshDraw,
    pub material_index: usize,
    /// Bounding center in model space.
    pub center: Vec3,
}

/// Surface description: permutation parameters, shader constants and
/// fixed-function hints.
#[derive(Debug, Clone)]
pub struct Material {
    pub name: String,
    pub has_transparency: bool,
    pub is_shadow_caster: bool,
    pub cull_mode: Option<wgpu::Face>,
    /// Compile-time parameters, validated into every effect using the material.
    pub permutation: Vec<(PermutationParameterKey, EffectParameterValue)>,
    /// Values of the PerMaterial resource group.
    pub parameters: ParameterCollection,
}

impl Material {
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            has_transparency: false,
            is_shadow_caster: true,
            cull_mode: Some(wgpu::Face::Back),
            permutation: Vec::new(),
            parameters: ParameterCollection::new(),
        }
    }

    #[must_use]
    pub fn transparent(mut self) -> Self {
        self.has_transparency = true;
        self.is_shadow_caster = false;
        self
    }

    #[must_use]
    pub fn with_permutation(mut self, key: &str, value: impl Into<EffectParameterValue>) -> Self {
        self.permutation
            .push((PermutationParameterKey::new(key), value.into()));
        self
    }
}

#[derive(Debug, Clone, Default)]
pub struct Model {
    pub meshes: Vec<Mesh>,
    pub materials: Vec<Arc<Material>>,
}

/// What a scene entity wants rendered.
#[derive(Debug, Clone)]
pub struct ModelComponent {
    pub model: Option<Arc<Model>>,
    /// Per material-index overrides of the model's materials.
    pub materials: Vec<Option<Arc<Material>>>,
    pub world: Mat4,
    pub enabled: bool,
    pub render_groups: RenderGroupMask,
}

impl ModelComponent {
    #[must_use]
    pub fn new(model: Arc<Model>) -> Self {
        Self {
            model: Some(model),
            materials: Vec::new(),
            world: Mat4::IDENTITY,
            enabled: true,
            render_groups: RenderGroupMask::default(),
        }
    }

    #[must_use]
    pub fn with_world(mut self, world: Mat4) -> Self {
        self.world = world;
        self
    }

    /// Component override first, then the model's own material.
    #[must_use]
    pub fn material_for(&self, model: &Model, material_index: usize) -> Option<Arc<Material>> {
        self.materials
            .get(material_index)
            .cloned()
            .flatten()
            .or_else(|| model.materials.get(material_index).cloned())
    }
}
