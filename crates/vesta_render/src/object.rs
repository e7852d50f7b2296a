//! Render Objects
//!
//! A [`RenderObject`] is anything the renderer can draw. Its payload is a
//! tagged [`RenderObjectKind`]; root features pick the objects they support
//! by matching on it.

use std::any::Any;
use std::sync::Arc;

use bitflags::bitflags;
use glam::{Mat4, Vec3};
use smallvec::SmallVec;
use vesta_core::StaticObjectNode;

use crate::nodes::ObjectNodeReference;
use crate::scene::{EntityId, Material, MeshDraw};

bitflags! {
    /// Render groups an object belongs to; views only see objects whose
    /// groups intersect their culling mask.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct RenderGroupMask: u32 {
        const GROUP_0 = 1 << 0;
        const GROUP_1 = 1 << 1;
        const GROUP_2 = 1 << 2;
        const GROUP_3 = 1 << 3;
        const _ = !0;
    }
}

impl RenderGroupMask {
    /// Mask of a single group, `index < 32`.
    #[must_use]
    pub const fn group(index: u32) -> Self {
        Self::from_bits_retain(1 << (index & 31))
    }
}

impl Default for RenderGroupMask {
    fn default() -> Self {
        Self::GROUP_0
    }
}

/// Whether an object renders in a stage, and with which effect.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ActiveRenderStage {
    effect_name: Option<Arc<str>>,
}

impl ActiveRenderStage {
    pub const INACTIVE: Self = Self { effect_name: None };

    #[must_use]
    pub fn new(effect_name: impl Into<Arc<str>>) -> Self {
        Self {
            effect_name: Some(effect_name.into()),
        }
    }

    #[inline]
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.effect_name.is_some()
    }

    #[must_use]
    pub fn effect_name(&self) -> Option<&Arc<str>> {
        self.effect_name.as_ref()
    }
}

/// A mesh of a model, refreshed every frame from its scene component.
#[derive(Debug, Clone)]
pub struct RenderMesh {
    pub render_model: EntityId,
    pub mesh_index: usize,
    pub material_index: usize,
    pub draw: MeshDraw,
    pub material: Option<Arc<Material>>,
    pub world: Mat4,
}

impl RenderMesh {
    /// Transparent materials render in the transparent stage.
    #[must_use]
    pub fn has_transparency(&self) -> bool {
        self.material.as_ref().is_some_and(|m| m.has_transparency)
    }

    #[must_use]
    pub fn is_shadow_caster(&self) -> bool {
        self.material.as_ref().is_none_or(|m| m.is_shadow_caster)
    }
}

/// Payload of an object no built-in feature knows about.
pub struct CustomRenderObject {
    pub type_name: &'static str,
    pub world: Mat4,
    pub data: Box<dyn Any + Send + Sync>,
}

impl std::fmt::Debug for CustomRenderObject {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CustomRenderObject")
            .field("type_name", &self.type_name)
            .finish_non_exhaustive()
    }
}

#[derive(Debug)]
pub enum RenderObjectKind {
    Mesh(RenderMesh),
    Custom(CustomRenderObject),
}

#[derive(Debug)]
pub struct RenderObject {
    pub kind: RenderObjectKind,
    pub enabled: bool,
    pub render_groups: RenderGroupMask,
    /// World-space center used for depth sorting.
    pub bounding_center: Vec3,
    /// Extra key for state sorting; lower draws first.
    pub state_sort_key: u32,
    /// Indexed by render stage.
    pub active_render_stages: SmallVec<[ActiveRenderStage; 8]>,
    pub(crate) render_feature: Option<usize>,
    pub(crate) static_object_node: Option<StaticObjectNode>,
    pub(crate) object_node: ObjectNodeReference,
}

impl RenderObject {
    #[must_use]
    pub fn new(kind: RenderObjectKind) -> Self {
        Self {
            kind,
            enabled: true,
            render_groups: RenderGroupMask::default(),
            bounding_center: Vec3::ZERO,
            state_sort_key: 0,
            active_render_stages: SmallVec::new(),
            render_feature: None,
            static_object_node: None,
            object_node: ObjectNodeReference::INVALID,
        }
    }

    #[must_use]
    pub fn mesh(mesh: RenderMesh) -> Self {
        let center = mesh.world.w_axis.truncate();
        let mut object = Self::new(RenderObjectKind::Mesh(mesh));
        object.bounding_center = center;
        object
    }

    #[must_use]
    pub fn as_mesh(&self) -> Option<&RenderMesh> {
        match &self.kind {
            RenderObjectKind::Mesh(mesh) => Some(mesh),
            RenderObjectKind::Custom(_) => None,
        }
    }

    pub fn as_mesh_mut(&mut self) -> Option<&mut RenderMesh> {
        match &mut self.kind {
            RenderObjectKind::Mesh(mesh) => Some(mesh),
            RenderObjectKind::Custom(_) => None,
        }
    }

    #[must_use]
    pub fn world_matrix(&self) -> Mat4 {
        match &self.kind {
            RenderObjectKind::Mesh(mesh) => mesh.world,
            RenderObjectKind::Custom(custom) => custom.world,
        }
    }

    /// Activates or deactivates a stage for this object.
    pub fn set_active_render_stage(&mut self, stage: usize, active: ActiveRenderStage) {
        if self.active_render_stages.len() <= stage {
            self.active_render_stages
                .resize(stage + 1, ActiveRenderStage::INACTIVE);
        }
        self.active_render_stages[stage] = active;
    }

    #[must_use]
    pub fn is_active_in(&self, stage: usize) -> bool {
        self.active_render_stages
            .get(stage)
            .is_some_and(ActiveRenderStage::is_active)
    }

    /// Index of the owning root feature, if any feature accepted the object.
    #[must_use]
    pub fn render_feature(&self) -> Option<usize> {
        self.render_feature
    }

    #[must_use]
    pub fn static_object_node(&self) -> Option<StaticObjectNode> {
        self.static_object_node
    }

    /// Object node of the current frame; `INVALID` after a reset.
    #[must_use]
    pub fn object_node(&self) -> ObjectNodeReference {
        self.object_node
    }
}
