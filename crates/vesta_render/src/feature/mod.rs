//! Render Features
//!
//! A root render feature owns one kind of render object (meshes, particles,
//! ...) and drives it through the frame phases. Features keep their per-frame
//! state in flat node arrays ([`RenderFeatureCore`]) so that each phase is a
//! linear walk over contiguous data.
//!
//! Effect-driven features embed a [`RootEffectRenderFeature`] and delegate
//! constants and permutation parameters to [`SubRenderFeature`]s such as
//! [`TransformRenderFeature`].

mod effect;
mod material;
mod mesh;
mod picking;
mod pipeline_state;
mod transform;

use std::any::Any;

use slotmap::SlotMap;
use vesta_core::{RenderObjectKey, StaticObjectNode};

pub use effect::{
    ComputeFallbackEffect, EffectCompiledCallback, EffectDescriptorSetSlot,
    MAX_EFFECT_PERMUTATION_SLOTS, PostProcessPipelineState, RenderEffectReflection,
    RootEffectRenderFeature,
};
pub use material::MaterialRenderFeature;
pub use mesh::{MeshRenderFeature, RenderStageSelector};
pub use picking::PickingRenderFeature;
pub use pipeline_state::{
    BlendComponentKey, BlendStateKey, PipelineStateCache, PipelineStateDescription,
    RasterizerState, VertexAttributeDescription, VertexLayout, fx_hash_key,
};
pub use transform::TransformRenderFeature;

use crate::errors::Result;
use crate::nodes::{
    ObjectNode, ObjectNodeReference, RenderNode, RenderNodeReference, ViewObjectNode,
    ViewObjectNodeReference,
};
use crate::object::RenderObject;
use crate::stage::{RenderStage, RenderStageId};
use crate::system::{RenderContext, RenderDrawContext};
use crate::view::RenderViewId;

/// Node storage shared by every root feature.
///
/// Static nodes live as long as their render object is registered. Object,
/// view-object and render nodes are rebuilt every frame.
#[derive(Debug, Default)]
pub struct RenderFeatureCore {
    index: Option<usize>,
    pub static_objects: SlotMap<StaticObjectNode, RenderObjectKey>,
    pub object_nodes: Vec<ObjectNode>,
    pub view_object_nodes: Vec<ViewObjectNode>,
    pub render_nodes: Vec<RenderNode>,
}

impl RenderFeatureCore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Index of the feature inside its render system. Unregistered features
    /// report `usize::MAX`.
    #[inline]
    #[must_use]
    pub fn index(&self) -> usize {
        self.index.unwrap_or(usize::MAX)
    }

    pub(crate) fn set_index(&mut self, index: usize) {
        self.index = Some(index);
    }

    /// Assigns a static node to a newly registered object.
    pub fn add_render_object(&mut self, key: RenderObjectKey, object: &mut RenderObject) -> StaticObjectNode {
        let node = self.static_objects.insert(key);
        object.static_object_node = Some(node);
        object.render_feature = self.index;
        node
    }

    /// Releases the object's static node.
    pub fn remove_render_object(&mut self, object: &mut RenderObject) -> Option<StaticObjectNode> {
        let node = object.static_object_node.take()?;
        self.static_objects.remove(node);
        object.render_feature = None;
        Some(node)
    }

    /// Returns the object's node for this frame, creating it on first request.
    pub fn get_or_create_object_node(
        &mut self,
        key: RenderObjectKey,
        object: &mut RenderObject,
    ) -> ObjectNodeReference {
        if object.object_node.is_valid() {
            return object.object_node;
        }
        let reference = ObjectNodeReference::new(self.object_nodes.len());
        self.object_nodes.push(ObjectNode { render_object: key });
        object.object_node = reference;
        reference
    }

    pub fn create_view_object_node(
        &mut self,
        render_view: RenderViewId,
        render_object: RenderObjectKey,
        object_node: ObjectNodeReference,
    ) -> ViewObjectNodeReference {
        let reference = ViewObjectNodeReference::new(self.view_object_nodes.len());
        self.view_object_nodes.push(ViewObjectNode {
            render_object,
            render_view,
            object_node,
        });
        reference
    }

    pub fn create_render_node(
        &mut self,
        render_object: RenderObjectKey,
        render_view: RenderViewId,
        view_object_node: ViewObjectNodeReference,
        render_stage: RenderStageId,
    ) -> RenderNodeReference {
        let reference = RenderNodeReference::new(self.render_nodes.len());
        self.render_nodes.push(RenderNode {
            render_object,
            render_view,
            view_object_node,
            render_stage,
            render_effect: None,
            effect_object_node: Default::default(),
        });
        reference
    }

    #[inline]
    #[must_use]
    pub fn object_node(&self, reference: ObjectNodeReference) -> &ObjectNode {
        &self.object_nodes[reference.index()]
    }

    #[inline]
    #[must_use]
    pub fn view_object_node(&self, reference: ViewObjectNodeReference) -> &ViewObjectNode {
        &self.view_object_nodes[reference.index()]
    }

    #[inline]
    #[must_use]
    pub fn render_node(&self, reference: RenderNodeReference) -> &RenderNode {
        &self.render_nodes[reference.index()]
    }

    /// Object node behind a render node.
    #[inline]
    #[must_use]
    pub fn render_node_object_node(&self, node: &RenderNode) -> ObjectNodeReference {
        self.view_object_nodes[node.view_object_node.index()].object_node
    }

    /// Drops every per-frame node; static nodes survive.
    pub fn reset(&mut self) {
        self.object_nodes.clear();
        self.view_object_nodes.clear();
        self.render_nodes.clear();
    }
}

/// A feature driven by the render system through the frame phases.
pub trait RootRenderFeature: Send {
    fn name(&self) -> &str;

    fn core(&self) -> &RenderFeatureCore;

    fn core_mut(&mut self) -> &mut RenderFeatureCore;

    /// Whether this feature takes ownership of `object`. The render system
    /// assigns an object to the first feature answering `true`.
    fn supports_render_object(&self, object: &RenderObject) -> bool;

    /// Called once, either by `RenderSystem::initialize` or when the feature is
    /// added to an initialized system.
    fn initialize(&mut self, ctx: &mut RenderContext) -> Result<()>;

    fn on_render_stage_added(&mut self, _stage: &RenderStage) -> Result<()> {
        Ok(())
    }

    fn add_render_object(&mut self, key: RenderObjectKey, object: &mut RenderObject) {
        self.core_mut().add_render_object(key, object);
    }

    fn remove_render_object(&mut self, _key: RenderObjectKey, object: &mut RenderObject) {
        self.core_mut().remove_render_object(object);
    }

    /// Recomputes the object's active render stages. The default keeps the
    /// stages set by the application.
    fn compute_render_stages(&self, _object: &mut RenderObject, _stages: &[RenderStage]) {}

    fn reset(&mut self) {
        self.core_mut().reset();
    }

    /// Copies stable data out of the render objects once the object nodes of
    /// this frame exist.
    fn extract(&mut self, _ctx: &RenderContext) {}

    fn prepare_effect_permutations(&mut self, _ctx: &mut RenderContext) -> Result<()> {
        Ok(())
    }

    fn prepare(&mut self, ctx: &mut RenderContext) -> Result<()>;

    /// Draws `ctx.view_stage.sorted_render_nodes[start..end]`, all of which
    /// belong to this feature.
    fn draw(&mut self, ctx: &mut RenderDrawContext<'_>, start: usize, end: usize) -> Result<()>;

    /// Key grouping render nodes with identical GPU state, used by
    /// [`SortMode::StateChange`](crate::stage::SortMode::StateChange).
    fn render_node_sort_key(&self, _node: RenderNodeReference) -> u32 {
        0
    }

    fn as_any(&self) -> &dyn Any;

    fn as_any_mut(&mut self) -> &mut dyn Any;
}

/// A slice of behaviour plugged into an effect-driven root feature.
///
/// Sub-features register descriptor slots and constant offsets against the
/// root at initialization, contribute permutation parameters and fill
/// constant buffers once the root has allocated the resource groups.
pub trait SubRenderFeature: Send {
    fn initialize(&mut self, _root: &mut RootEffectRenderFeature) -> Result<()> {
        Ok(())
    }

    fn extract(&mut self, _root: &RootEffectRenderFeature, _ctx: &RenderContext) {}

    fn prepare_effect_permutations(&mut self, _root: &mut RootEffectRenderFeature, _ctx: &RenderContext) {}

    fn prepare(&mut self, _root: &mut RootEffectRenderFeature, _ctx: &mut RenderContext) -> Result<()> {
        Ok(())
    }

    fn as_any(&self) -> &dyn Any;
}
