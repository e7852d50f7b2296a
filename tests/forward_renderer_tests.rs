//! Forward Renderer Tests
//!
//! Tests for:
//! - Draw recording: redundant state binds are skipped
//! - Stage order: shadow views are drawn before the main view
//! - Stage selection: transparent meshes, back-to-front ordering
//! - Picking constants
//! - Scene bridge: model identity changes re-create render objects

mod common;

use std::sync::Arc;

use glam::{Mat4, Vec3};

use vesta::prelude::*;
use vesta::render::device::DeviceCommand;
use vesta::render::feature::{MeshRenderFeature, PipelineStateDescription};
use vesta::render::nodes::RenderNodeReference;

use common::{camera, compiler, init_logger, model_with, opaque_model};

fn renderer(settings: ForwardRendererSettings) -> ForwardRenderer {
    init_logger();
    let mut renderer = ForwardRenderer::new(RenderSystemConfig::default(), settings).unwrap();
    renderer
        .initialize(compiler(), Box::new(HeadlessDevice::new()))
        .unwrap();
    let (view, projection) = camera();
    renderer.set_camera(view, projection);
    renderer
}

fn without_shadows() -> ForwardRendererSettings {
    ForwardRendererSettings {
        shadows: false,
        ..Default::default()
    }
}

/// Pipeline descriptions in the order they were bound.
fn bound_pipelines(renderer: &ForwardRenderer) -> Vec<PipelineStateDescription> {
    let device = common::headless(renderer.system());
    device
        .commands()
        .iter()
        .filter_map(|command| match command {
            DeviceCommand::SetPipelineState(handle) => device.pipeline_state(*handle).cloned(),
            _ => None,
        })
        .collect()
}

fn count_commands(renderer: &ForwardRenderer, predicate: impl Fn(&DeviceCommand) -> bool) -> usize {
    common::headless(renderer.system())
        .commands()
        .iter()
        .filter(|command| predicate(command))
        .count()
}

// ============================================================================
// Draw Recording Tests
// ============================================================================

#[test]
fn redundant_binds_are_skipped() {
    let mut renderer = renderer(without_shadows());
    let mut processor = ModelProcessor::new();
    let component = ModelComponent::new(opaque_model(3));
    processor
        .update(renderer.system_mut(), [(EntityId(1), &component)])
        .unwrap();

    renderer.draw_frame().unwrap();

    assert_eq!(common::headless(renderer.system()).draw_call_count(), 3);
    assert_eq!(
        count_commands(&renderer, |c| matches!(c, DeviceCommand::SetPipelineState(_))),
        1
    );
    // PerFrame, PerView and PerMaterial are shared; only PerDraw changes.
    assert_eq!(
        count_commands(&renderer, |c| matches!(c, DeviceCommand::SetDescriptorSet { .. })),
        4 + 2
    );
    // The vertex buffer is shared as well.
    assert_eq!(
        count_commands(&renderer, |c| matches!(c, DeviceCommand::SetVertexBuffer { .. })),
        1
    );
}

#[test]
fn pipeline_states_are_reused_across_frames() {
    let mut renderer = renderer(without_shadows());
    let mut processor = ModelProcessor::new();
    let component = ModelComponent::new(opaque_model(2));
    processor
        .update(renderer.system_mut(), [(EntityId(1), &component)])
        .unwrap();

    renderer.draw_frame().unwrap();
    renderer.draw_frame().unwrap();

    assert_eq!(common::headless(renderer.system()).pipeline_state_count(), 1);
    assert_eq!(renderer.mesh_feature().unwrap().root().pipeline_state_count(), 1);
}

// ============================================================================
// Stage Order Tests
// ============================================================================

#[test]
fn shadow_views_are_drawn_before_the_main_view() {
    let mut renderer = renderer(ForwardRendererSettings::default());
    let light_view = Mat4::look_at_rh(Vec3::new(5.0, 10.0, 5.0), Vec3::ZERO, Vec3::Y);
    let light_projection = Mat4::orthographic_rh(-10.0, 10.0, -10.0, 10.0, 0.1, 50.0);
    let shadow_view = renderer
        .add_shadow_view(light_view, light_projection)
        .unwrap();
    assert_eq!(
        renderer.system().view(shadow_view).unwrap().parent(),
        Some(renderer.main_view())
    );

    let mut processor = ModelProcessor::new();
    let component = ModelComponent::new(opaque_model(1));
    processor
        .update(renderer.system_mut(), [(EntityId(1), &component)])
        .unwrap();
    renderer.draw_frame().unwrap();

    let pipelines = bound_pipelines(&renderer);
    assert_eq!(pipelines.len(), 2);

    let shadow = &pipelines[0];
    assert_eq!(shadow.output.render_target_format, None);
    assert_eq!(
        shadow.output.depth_stencil_format,
        Some(wgpu::TextureFormat::Depth32Float)
    );
    assert_eq!(shadow.rasterizer.cull_mode, None);
    assert!(!shadow.rasterizer.depth_clip_enable);

    let main = &pipelines[1];
    assert_eq!(
        main.output.render_target_format,
        Some(wgpu::TextureFormat::Rgba8UnormSrgb)
    );
    assert_eq!(main.rasterizer.cull_mode, Some(wgpu::Face::Back));
}

#[test]
fn gbuffer_is_drawn_first_when_enabled() {
    let mut renderer = renderer(ForwardRendererSettings {
        gbuffer: true,
        shadows: false,
        ..Default::default()
    });
    let mut processor = ModelProcessor::new();
    let component = ModelComponent::new(opaque_model(1));
    processor
        .update(renderer.system_mut(), [(EntityId(1), &component)])
        .unwrap();
    renderer.draw_frame().unwrap();

    let pipelines = bound_pipelines(&renderer);
    assert_eq!(
        pipelines.first().unwrap().output.render_target_format,
        Some(wgpu::TextureFormat::Rg11b10Ufloat)
    );
}

// ============================================================================
// Stage Selection Tests
// ============================================================================

#[test]
fn transparent_meshes_sort_back_to_front() {
    let mut renderer = renderer(ForwardRendererSettings::default());
    let glass = Arc::new(Material::new("Glass").transparent());
    let model = model_with(vec![glass], 1);

    let mut processor = ModelProcessor::new();
    let near = ModelComponent::new(model.clone()).with_world(Mat4::from_translation(Vec3::new(0.0, 0.0, 2.0)));
    let far = ModelComponent::new(model).with_world(Mat4::from_translation(Vec3::new(0.0, 0.0, -6.0)));
    processor
        .update(renderer.system_mut(), [(EntityId(1), &near), (EntityId(2), &far)])
        .unwrap();
    renderer.draw_frame().unwrap();

    let stages = renderer.stages();
    let view = renderer.system().view(renderer.main_view()).unwrap();
    assert!(view.render_stage(stages.main).unwrap().render_nodes.is_empty());

    let sorted = &view
        .render_stage(stages.transparent)
        .unwrap()
        .sorted_render_nodes;
    let far_key = processor.render_model(EntityId(2)).unwrap().meshes[0];
    let near_key = processor.render_model(EntityId(1)).unwrap().meshes[0];
    let order: Vec<_> = sorted.iter().map(|node| node.render_object).collect();
    assert_eq!(order, vec![far_key, near_key]);

    let blended = bound_pipelines(&renderer);
    assert!(blended.iter().all(|desc| desc.blend.is_some() && !desc.depth_write));
}

#[test]
fn material_turning_transparent_rebuilds_the_pipeline() {
    let mut renderer = renderer(without_shadows());
    let mut processor = ModelProcessor::new();
    let mut component = ModelComponent::new(opaque_model(1));
    processor
        .update(renderer.system_mut(), [(EntityId(1), &component)])
        .unwrap();
    renderer.draw_frame().unwrap();

    let opaque = bound_pipelines(&renderer);
    assert_eq!(opaque.len(), 1);
    assert!(opaque[0].blend.is_none() && opaque[0].depth_write);

    // Same permutation and cull mode, only transparency differs.
    component.materials = vec![Some(Arc::new(Material::new("Glass").transparent()))];
    processor
        .update(renderer.system_mut(), [(EntityId(1), &component)])
        .unwrap();
    renderer
        .system_mut()
        .device_as_mut::<HeadlessDevice>()
        .unwrap()
        .take_commands();
    renderer.draw_frame().unwrap();

    let view = renderer.system().view(renderer.main_view()).unwrap();
    assert!(view.render_stage(renderer.stages().main).unwrap().render_nodes.is_empty());
    assert_eq!(
        view.render_stage(renderer.stages().transparent)
            .unwrap()
            .render_nodes
            .len(),
        1
    );

    let blended = bound_pipelines(&renderer);
    assert_eq!(blended.len(), 1);
    assert!(blended[0].blend.is_some());
    assert!(!blended[0].depth_write);
}

#[test]
fn picking_writes_object_info() {
    let mut renderer = renderer(ForwardRendererSettings {
        picking: true,
        shadows: false,
        ..Default::default()
    });
    let mut processor = ModelProcessor::new();
    let component = ModelComponent::new(opaque_model(1));
    processor
        .update(renderer.system_mut(), [(EntityId(42), &component)])
        .unwrap();
    renderer.draw_frame().unwrap();

    let object_info = renderer
        .system_mut()
        .feature_as_mut::<MeshRenderFeature>()
        .unwrap()
        .root_mut()
        .create_draw_cbuffer_offset_slot("Picking.ObjectInfo");
    let picking_stage = renderer.stages().picking.unwrap();
    let root = renderer.mesh_feature().unwrap().root();
    let index = root
        .core()
        .render_nodes
        .iter()
        .position(|node| node.render_stage == picking_stage)
        .unwrap();
    let node = RenderNodeReference::new(index);
    let (effect, reflection) = root.render_node_effect(root.core().render_node(node)).unwrap();
    assert_eq!(effect.effect_name.as_ref(), "Model.Picking");

    let offset = reflection
        .per_draw_layout
        .as_ref()
        .and_then(|layout| layout.constant_buffer_offset(object_info))
        .unwrap();
    let allocation = root
        .resource_group(node, root.per_draw_slot())
        .and_then(|group| group.constant_buffer)
        .unwrap();
    let info: [u32; 4] = renderer
        .system()
        .context()
        .frame_resources
        .buffer_pool
        .read(allocation, offset);
    assert_eq!(info, [42, 0, 0, 0]);
}

// ============================================================================
// Scene Bridge Tests
// ============================================================================

#[test]
fn model_identity_change_recreates_meshes() {
    let mut renderer = renderer(without_shadows());
    let mut processor = ModelProcessor::new();
    let mut component = ModelComponent::new(opaque_model(2));
    processor
        .update(renderer.system_mut(), [(EntityId(1), &component)])
        .unwrap();
    renderer.draw_frame().unwrap();
    let old_keys = processor.render_model(EntityId(1)).unwrap().meshes.clone();

    // Same content, new identity.
    component.model = Some(opaque_model(2));
    processor
        .update(renderer.system_mut(), [(EntityId(1), &component)])
        .unwrap();
    let new_keys = processor.render_model(EntityId(1)).unwrap().meshes.clone();

    assert_eq!(new_keys.len(), 2);
    for key in &old_keys {
        assert!(renderer.system().render_object(*key).is_none());
        assert!(!new_keys.contains(key));
    }
    assert_eq!(renderer.system().render_object_count(), 2);
    renderer.draw_frame().unwrap();
}

#[test]
fn unchanged_model_keeps_its_meshes() {
    let mut renderer = renderer(without_shadows());
    let mut processor = ModelProcessor::new();
    let mut component = ModelComponent::new(opaque_model(2));
    processor
        .update(renderer.system_mut(), [(EntityId(1), &component)])
        .unwrap();
    let keys = processor.render_model(EntityId(1)).unwrap().meshes.clone();

    let moved = Mat4::from_translation(Vec3::new(3.0, 0.0, 0.0));
    component.world = moved;
    processor
        .update(renderer.system_mut(), [(EntityId(1), &component)])
        .unwrap();

    assert_eq!(processor.render_model(EntityId(1)).unwrap().meshes, keys);
    let object = renderer.system().render_object(keys[0]).unwrap();
    assert_eq!(object.world_matrix(), moved);
    assert_eq!(object.bounding_center, Vec3::new(3.0, 0.0, 0.0));
}
