//! Material permutations and PerMaterial resource groups.

use std::any::Any;
use std::sync::Arc;

use rustc_hash::FxHashMap;
use slotmap::SecondaryMap;
use vesta_core::{ObjectId, StaticObjectNode};

use super::{EffectDescriptorSetSlot, RootEffectRenderFeature, SubRenderFeature};
use crate::errors::Result;
use crate::nodes::RenderNodeReference;
use crate::render_effect::RenderEffectState;
use crate::resources::{BufferPoolAllocationType, ResourceGroup};
use crate::scene::Material;
use crate::system::RenderContext;

/// Feeds each mesh's material into its effects.
///
/// Permutation parameters are validated into every effect the object uses
/// this frame. Constants and resources go to the "PerMaterial" group, which
/// is allocated once per (material, layout) per frame and shared by every
/// node using that pair.
#[derive(Debug, Default)]
pub struct MaterialRenderFeature {
    per_material_slot: Option<EffectDescriptorSetSlot>,
    pipeline_inputs: SecondaryMap<StaticObjectNode, MaterialPipelineInputs>,
    groups: FxHashMap<(usize, ObjectId), ResourceGroup>,
}

impl MaterialRenderFeature {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of PerMaterial groups allocated during the last prepare.
    #[must_use]
    pub fn material_group_count(&self) -> usize {
        self.groups.len()
    }
}

fn material_key(material: &Arc<Material>) -> usize {
    Arc::as_ptr(material) as usize
}

/// Material state baked into a mesh's pipeline state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct MaterialPipelineInputs {
    cull_mode: Option<wgpu::Face>,
    has_transparency: bool,
}

impl MaterialPipelineInputs {
    fn of(material: Option<&Material>) -> Self {
        material.map_or(
            Self {
                cull_mode: Some(wgpu::Face::Back),
                has_transparency: false,
            },
            |m| Self {
                cull_mode: m.cull_mode,
                has_transparency: m.has_transparency,
            },
        )
    }
}

impl SubRenderFeature for MaterialRenderFeature {
    fn initialize(&mut self, root: &mut RootEffectRenderFeature) -> Result<()> {
        self.per_material_slot = Some(root.get_or_create_effect_descriptor_set_slot("PerMaterial"));
        Ok(())
    }

    fn prepare_effect_permutations(&mut self, root: &mut RootEffectRenderFeature, ctx: &RenderContext) {
        let pipeline_inputs = &self.pipeline_inputs;
        root.for_each_used_render_effect(ctx.frame_counter, |static_node, key, effect| {
            let Some(mesh) = ctx.render_objects.get(key).and_then(|object| object.as_mesh()) else {
                return;
            };
            let material = mesh.material.as_deref();

            if pipeline_inputs.get(static_node) != Some(&MaterialPipelineInputs::of(material)) {
                effect.pipeline_state = None;
            }

            if let Some(material) = material {
                for (parameter, value) in &material.permutation {
                    effect
                        .effect_validator
                        .validate_parameter(*parameter, value.clone());
                }
            }
        });

        for (static_node, &key) in &root.core().static_objects {
            let Some(mesh) = ctx.render_objects.get(key).and_then(|object| object.as_mesh()) else {
                continue;
            };
            self.pipeline_inputs
                .insert(static_node, MaterialPipelineInputs::of(mesh.material.as_deref()));
        }
    }

    fn prepare(&mut self, root: &mut RootEffectRenderFeature, ctx: &mut RenderContext) -> Result<()> {
        self.groups.clear();
        let Some(slot) = self.per_material_slot else {
            return Ok(());
        };

        for index in 0..root.core().render_nodes.len() {
            let node_reference = RenderNodeReference::new(index);
            let node = *root.core().render_node(node_reference);
            let Some((effect, reflection)) = root.render_node_effect(&node) else {
                continue;
            };
            if effect.state != RenderEffectState::Normal {
                continue;
            }
            let Some(layout) = reflection.extra_layout(slot) else {
                continue;
            };
            let Some(material) = ctx
                .render_objects
                .get(node.render_object)
                .and_then(|object| object.as_mesh())
                .and_then(|mesh| mesh.material.as_ref())
            else {
                continue;
            };

            let frame_resources = &mut ctx.frame_resources;
            let group = *self
                .groups
                .entry((material_key(material), layout.hash()))
                .or_insert_with(|| {
                    let mut parameters = material.parameters.clone();
                    frame_resources.prepare_resource_group_from_parameters(
                        layout,
                        BufferPoolAllocationType::UsedMultipleTime,
                        &mut parameters,
                    )
                });
            root.set_resource_group(node_reference, slot, group);
        }

        log::trace!("Prepared {} PerMaterial groups", self.groups.len());
        Ok(())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}
