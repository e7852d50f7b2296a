//! Mesh rendering.

use std::any::Any;
use std::sync::Arc;

use vesta_core::RenderObjectKey;

use super::{
    PipelineStateDescription, RenderFeatureCore, RootEffectRenderFeature, RootRenderFeature,
    SubRenderFeature,
};
use crate::errors::{RenderError, Result};
use crate::nodes::{RenderNode, RenderNodeReference};
use crate::object::{ActiveRenderStage, RenderObject, RenderObjectKind};
use crate::stage::RenderStage;
use crate::system::{RenderContext, RenderDrawContext};

/// Picks the effect an object uses in a stage; `None` leaves the stage
/// inactive for the object.
pub type RenderStageSelector = Box<dyn Fn(&RenderObject, &RenderStage) -> Option<Arc<str>> + Send>;

/// Root feature for [`RenderMesh`](crate::object::RenderMesh) objects.
pub struct MeshRenderFeature {
    root: RootEffectRenderFeature,
    sub_features: Vec<Box<dyn SubRenderFeature>>,
    render_stage_selector: Option<RenderStageSelector>,
}

impl Default for MeshRenderFeature {
    fn default() -> Self {
        Self::new()
    }
}

impl MeshRenderFeature {
    #[must_use]
    pub fn new() -> Self {
        Self {
            root: RootEffectRenderFeature::new("MeshRenderFeature"),
            sub_features: Vec::new(),
            render_stage_selector: None,
        }
    }

    /// Sub-features run in insertion order in every phase.
    #[must_use]
    pub fn with_sub_feature(mut self, sub_feature: impl SubRenderFeature + 'static) -> Self {
        self.sub_features.push(Box::new(sub_feature));
        self
    }

    #[must_use]
    pub fn with_render_stage_selector(mut self, selector: RenderStageSelector) -> Self {
        self.render_stage_selector = Some(selector);
        self
    }

    #[must_use]
    pub fn root(&self) -> &RootEffectRenderFeature {
        &self.root
    }

    pub fn root_mut(&mut self) -> &mut RootEffectRenderFeature {
        &mut self.root
    }

    #[must_use]
    pub fn sub_feature<T: SubRenderFeature + 'static>(&self) -> Option<&T> {
        self.sub_features
            .iter()
            .find_map(|sub_feature| sub_feature.as_any().downcast_ref::<T>())
    }
}

/// Vertex input, topology and raster state of a mesh draw.
fn process_pipeline_state(_node: &RenderNode, object: &RenderObject, desc: &mut PipelineStateDescription) {
    let Some(mesh) = object.as_mesh() else {
        return;
    };
    desc.primitive_topology = mesh.draw.primitive_topology;
    desc.vertex_layouts = mesh
        .draw
        .vertex_buffers
        .iter()
        .map(|binding| binding.layout.clone())
        .collect();

    if let Some(material) = &mesh.material {
        desc.rasterizer.cull_mode = material.cull_mode;
        if material.has_transparency {
            desc.blend = Some(wgpu::BlendState::ALPHA_BLENDING.into());
            desc.depth_write = false;
        }
    }
}

impl RootRenderFeature for MeshRenderFeature {
    fn name(&self) -> &str {
        self.root.name()
    }

    fn core(&self) -> &RenderFeatureCore {
        self.root.core()
    }

    fn core_mut(&mut self) -> &mut RenderFeatureCore {
        self.root.core_mut()
    }

    fn supports_render_object(&self, object: &RenderObject) -> bool {
        matches!(object.kind, RenderObjectKind::Mesh(_))
    }

    fn initialize(&mut self, ctx: &mut RenderContext) -> Result<()> {
        self.root.initialize(ctx)?;
        for sub_feature in &mut self.sub_features {
            sub_feature.initialize(&mut self.root)?;
        }
        Ok(())
    }

    fn on_render_stage_added(&mut self, stage: &RenderStage) -> Result<()> {
        self.root.on_render_stage_added(stage)
    }

    fn add_render_object(&mut self, key: RenderObjectKey, object: &mut RenderObject) {
        self.root.add_render_object(key, object);
    }

    fn remove_render_object(&mut self, _key: RenderObjectKey, object: &mut RenderObject) {
        self.root.remove_render_object(object);
    }

    fn compute_render_stages(&self, object: &mut RenderObject, stages: &[RenderStage]) {
        let Some(selector) = &self.render_stage_selector else {
            return;
        };
        for stage in stages {
            let active = selector(object, stage).map_or(ActiveRenderStage::INACTIVE, ActiveRenderStage::new);
            object.set_active_render_stage(stage.id().index(), active);
        }
    }

    fn reset(&mut self) {
        self.root.reset();
    }

    fn extract(&mut self, ctx: &RenderContext) {
        for sub_feature in &mut self.sub_features {
            sub_feature.extract(&self.root, ctx);
        }
    }

    fn prepare_effect_permutations(&mut self, ctx: &mut RenderContext) -> Result<()> {
        self.root.begin_effect_permutations(ctx);
        for sub_feature in &mut self.sub_features {
            sub_feature.prepare_effect_permutations(&mut self.root, ctx);
        }
        self.root.compile_effect_permutations(ctx)
    }

    fn prepare(&mut self, ctx: &mut RenderContext) -> Result<()> {
        self.root.prepare(ctx, process_pipeline_state)?;
        for sub_feature in &mut self.sub_features {
            sub_feature.prepare(&mut self.root, ctx)?;
        }
        Ok(())
    }

    fn draw(&mut self, ctx: &mut RenderDrawContext<'_>, start: usize, end: usize) -> Result<()> {
        let slot_count = self.root.descriptor_set_slot_count();
        let view_stage = ctx.view_stage;
        let render_objects = ctx.render_objects;
        let frame_resources = ctx.frame_resources;
        let constant_buffer_pool = frame_resources.buffer_pool.buffer();

        for node_reference in &view_stage.sorted_render_nodes[start..end] {
            let node = self.root.core().render_node(node_reference.render_node);
            let pipeline_state = node
                .render_effect
                .and_then(|reference| self.root.render_effect(reference))
                .and_then(|effect| effect.pipeline_state);
            let Some(pipeline_state) = pipeline_state.filter(|_| node.effect_object_node.is_valid()) else {
                log::warn!(
                    "Skipping draw in stage '{}': effect of the render node is not ready",
                    ctx.render_stage.name()
                );
                continue;
            };
            let Some(mesh) = render_objects
                .get(node.render_object)
                .and_then(|object| object.as_mesh())
            else {
                continue;
            };

            ctx.command_list.set_pipeline_state(pipeline_state);

            let offset = self.root.compute_resource_group_offset(node_reference.render_node);
            for slot in 0..slot_count {
                let Some(group) = self.root.resource_group_pool().get(offset + slot).copied().flatten() else {
                    continue;
                };
                let set = frame_resources
                    .descriptor_pool
                    .get(group.descriptor_set)
                    .ok_or_else(|| {
                        RenderError::InvalidOperation(format!(
                            "descriptor set {} was released before draw",
                            group.descriptor_set.0
                        ))
                    })?;
                ctx.command_list
                    .set_descriptor_set(slot as u32, group.descriptor_set, set, constant_buffer_pool);
            }

            let draw = &mesh.draw;
            for (slot, binding) in draw.vertex_buffers.iter().enumerate() {
                ctx.command_list
                    .set_vertex_buffer(slot as u32, binding.buffer, binding.offset, binding.layout.stride as u32);
            }
            match draw.index_buffer {
                Some(index_buffer) => {
                    ctx.command_list
                        .set_index_buffer(index_buffer.buffer, index_buffer.offset, index_buffer.format);
                    ctx.command_list
                        .draw_indexed(draw.draw_count, draw.start_location, 0);
                }
                None => ctx.command_list.draw(draw.draw_count, draw.start_location),
            }
        }
        Ok(())
    }

    fn render_node_sort_key(&self, node: RenderNodeReference) -> u32 {
        let node = self.root.core().render_node(node);
        node.render_effect
            .and_then(|reference| self.root.render_effect(reference))
            .and_then(|effect| effect.pipeline_state)
            .map_or(u32::MAX, |handle| handle.0)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}
