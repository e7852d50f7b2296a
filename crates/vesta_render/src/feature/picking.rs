//! Object ids for GPU picking.

use std::any::Any;

use super::{RootEffectRenderFeature, SubRenderFeature};
use crate::errors::Result;
use crate::nodes::RenderNodeReference;
use crate::resources::ConstantBufferOffsetReference;
use crate::system::RenderContext;

/// Writes `[entity, mesh index, material index, 0]` into `Picking.ObjectInfo`
/// of every draw whose effect declares it.
#[derive(Debug, Default)]
pub struct PickingRenderFeature {
    object_info: Option<ConstantBufferOffsetReference>,
}

impl PickingRenderFeature {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl SubRenderFeature for PickingRenderFeature {
    fn initialize(&mut self, root: &mut RootEffectRenderFeature) -> Result<()> {
        self.object_info = Some(root.create_draw_cbuffer_offset_slot("Picking.ObjectInfo"));
        Ok(())
    }

    fn prepare(&mut self, root: &mut RootEffectRenderFeature, ctx: &mut RenderContext) -> Result<()> {
        let Some(object_info) = self.object_info else {
            return Ok(());
        };
        let per_draw = root.per_draw_slot();

        for (index, node) in root.core().render_nodes.iter().enumerate() {
            let Some((_, reflection)) = root.render_node_effect(node) else {
                continue;
            };
            let Some(layout) = &reflection.per_draw_layout else {
                continue;
            };
            if layout.constant_buffer_offset(object_info).is_none() {
                continue;
            }
            let Some(allocation) = root
                .resource_group(RenderNodeReference::new(index), per_draw)
                .and_then(|group| group.constant_buffer)
            else {
                continue;
            };
            let Some(mesh) = ctx
                .render_objects
                .get(node.render_object)
                .and_then(|object| object.as_mesh())
            else {
                continue;
            };

            let info: [u32; 4] = [
                mesh.render_model.0 as u32,
                mesh.mesh_index as u32,
                mesh.material_index as u32,
                0,
            ];
            layout.write_constant(&mut ctx.frame_resources.buffer_pool, allocation, object_info, &info);
        }
        Ok(())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}
