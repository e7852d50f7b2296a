//! World/view transforms.

use std::any::Any;

use glam::Mat4;

use super::{RootEffectRenderFeature, SubRenderFeature};
use crate::errors::Result;
use crate::nodes::RenderNodeReference;
use crate::resources::{
    BufferPool, BufferPoolAllocation, ConstantBufferOffsetReference, ResourceGroupLayout,
};
use crate::system::RenderContext;

/// Writes object and camera matrices into the PerDraw and PerView groups.
///
/// World matrices are copied per object node during extract; combined
/// matrices are computed per render node during prepare.
#[derive(Debug, Default)]
pub struct TransformRenderFeature {
    world: Option<ConstantBufferOffsetReference>,
    world_inverse_transpose: Option<ConstantBufferOffsetReference>,
    world_view: Option<ConstantBufferOffsetReference>,
    world_view_projection: Option<ConstantBufferOffsetReference>,

    view: Option<ConstantBufferOffsetReference>,
    projection: Option<ConstantBufferOffsetReference>,
    view_projection: Option<ConstantBufferOffsetReference>,
    eye: Option<ConstantBufferOffsetReference>,

    /// Indexed by object node.
    world_matrices: Vec<Mat4>,
}

/// Padded to a vec4.
#[repr(C)]
#[derive(Debug, Clone, Copy, bytemuck::Pod, bytemuck::Zeroable)]
struct EyePosition([f32; 4]);

impl TransformRenderFeature {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// World matrices copied during the last extract, by object node.
    #[must_use]
    pub fn world_matrices(&self) -> &[Mat4] {
        &self.world_matrices
    }
}

impl SubRenderFeature for TransformRenderFeature {
    fn initialize(&mut self, root: &mut RootEffectRenderFeature) -> Result<()> {
        self.world = Some(root.create_draw_cbuffer_offset_slot("Transformation.World"));
        self.world_inverse_transpose =
            Some(root.create_draw_cbuffer_offset_slot("Transformation.WorldInverseTranspose"));
        self.world_view = Some(root.create_draw_cbuffer_offset_slot("Transformation.WorldView"));
        self.world_view_projection =
            Some(root.create_draw_cbuffer_offset_slot("Transformation.WorldViewProjection"));

        self.view = Some(root.create_view_cbuffer_offset_slot("Transformation.View"));
        self.projection = Some(root.create_view_cbuffer_offset_slot("Transformation.Projection"));
        self.view_projection = Some(root.create_view_cbuffer_offset_slot("Transformation.ViewProjection"));
        self.eye = Some(root.create_view_cbuffer_offset_slot("Transformation.Eye"));
        Ok(())
    }

    fn extract(&mut self, root: &RootEffectRenderFeature, ctx: &RenderContext) {
        self.world_matrices.clear();
        self.world_matrices.extend(root.core().object_nodes.iter().map(|node| {
            ctx.render_objects
                .get(node.render_object)
                .map_or(Mat4::IDENTITY, |object| object.world_matrix())
        }));
    }

    fn prepare(&mut self, root: &mut RootEffectRenderFeature, ctx: &mut RenderContext) -> Result<()> {
        let feature_index = root.core().index();
        let buffer_pool = &mut ctx.frame_resources.buffer_pool;

        // PerView
        for view in &ctx.views {
            let Some(view_feature) = view.features.get(feature_index) else {
                continue;
            };
            let eye = EyePosition(view.eye.extend(1.0).to_array());
            for &layout_id in &view_feature.layouts {
                let view_layout = root.view_layout(layout_id);
                let Some(allocation) = view_layout
                    .entries
                    .get(view.id().index())
                    .and_then(|entry| entry.resources)
                    .and_then(|group| group.constant_buffer)
                else {
                    continue;
                };
                let layout = &view_layout.layout;
                write(layout, buffer_pool, allocation, self.view, &view.view);
                write(layout, buffer_pool, allocation, self.projection, &view.projection);
                write(layout, buffer_pool, allocation, self.view_projection, &view.view_projection);
                write(layout, buffer_pool, allocation, self.eye, &eye);
            }
        }

        // PerDraw
        let per_draw = root.per_draw_slot();
        for (index, node) in root.core().render_nodes.iter().enumerate() {
            let Some((_, reflection)) = root.render_node_effect(node) else {
                continue;
            };
            let Some(layout) = &reflection.per_draw_layout else {
                continue;
            };
            let node_reference = RenderNodeReference::new(index);
            let Some(allocation) = root
                .resource_group(node_reference, per_draw)
                .and_then(|group| group.constant_buffer)
            else {
                continue;
            };

            let object_node = root.core().render_node_object_node(node);
            let world = self
                .world_matrices
                .get(object_node.index())
                .copied()
                .unwrap_or(Mat4::IDENTITY);
            let view = &ctx.views[node.render_view.index()];

            write(layout, buffer_pool, allocation, self.world, &world);
            write(
                layout,
                buffer_pool,
                allocation,
                self.world_inverse_transpose,
                &world.inverse().transpose(),
            );
            write(layout, buffer_pool, allocation, self.world_view, &(view.view * world));
            write(
                layout,
                buffer_pool,
                allocation,
                self.world_view_projection,
                &(view.view_projection * world),
            );
        }
        Ok(())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

#[inline]
fn write<T: bytemuck::Pod>(
    layout: &ResourceGroupLayout,
    buffer_pool: &mut BufferPool,
    allocation: BufferPoolAllocation,
    slot: Option<ConstantBufferOffsetReference>,
    value: &T,
) {
    if let Some(slot) = slot {
        layout.write_constant(buffer_pool, allocation, slot, value);
    }
}
