//! Shared fixtures for the integration tests.

#![allow(dead_code)]

use std::sync::Arc;

use glam::{Mat4, Vec3};

use vesta::prelude::*;
use vesta::render::object::RenderMesh;

pub const MATRIX: u32 = 64;

pub fn init_logger() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// Reflection of a typical lit model effect.
pub fn model_reflection() -> EffectReflection {
    EffectReflection::new()
        .with_constant_buffer("PerFrame", &[("Global.Time", 4)])
        .with_constant_buffer(
            "PerView",
            &[
                ("Transformation.View", MATRIX),
                ("Transformation.Projection", MATRIX),
                ("Transformation.ViewProjection", MATRIX),
                ("Transformation.Eye", 16),
            ],
        )
        .with_constant_buffer(
            "PerDraw",
            &[
                ("Transformation.World", MATRIX),
                ("Transformation.WorldInverseTranspose", MATRIX),
                ("Transformation.WorldView", MATRIX),
                ("Transformation.WorldViewProjection", MATRIX),
                ("Picking.ObjectInfo", 16),
            ],
        )
        .with_constant_buffer("PerMaterial", &[("Material.DiffuseColor", 16)])
        .with_resource("PerMaterial", "Material.DiffuseMap", EffectParameterClass::ShaderResourceView)
}

pub fn compiler() -> Arc<PrecompiledEffectCompiler> {
    let compiler = PrecompiledEffectCompiler::new();
    compiler.register("Model", model_reflection());
    Arc::new(compiler)
}

pub fn triangle_draw() -> MeshDraw {
    MeshDraw::triangles(
        VertexBufferBinding {
            buffer: BufferHandle(0),
            offset: 0,
            layout: VertexLayout::position_normal_uv(),
        },
        None,
        3,
    )
}

pub fn model_with(materials: Vec<Arc<Material>>, mesh_count: usize) -> Arc<Model> {
    Arc::new(Model {
        meshes: (0..mesh_count)
            .map(|i| Mesh {
                name: format!("mesh{i}"),
                draw: triangle_draw(),
                material_index: i % materials.len().max(1),
                center: Vec3::ZERO,
            })
            .collect(),
        materials,
    })
}

pub fn opaque_model(mesh_count: usize) -> Arc<Model> {
    model_with(vec![Arc::new(Material::new("Opaque"))], mesh_count)
}

/// A mesh render object outside of any model processor.
pub fn mesh_object(entity: u64, world: Mat4) -> RenderObject {
    RenderObject::mesh(RenderMesh {
        render_model: EntityId(entity),
        mesh_index: 0,
        material_index: 0,
        draw: triangle_draw(),
        material: Some(Arc::new(Material::new("Default"))),
        world,
    })
}

pub fn camera() -> (Mat4, Mat4) {
    (
        Mat4::look_at_rh(Vec3::new(0.0, 0.0, 10.0), Vec3::ZERO, Vec3::Y),
        Mat4::perspective_rh(1.0, 1.0, 0.1, 100.0),
    )
}

pub fn headless(system: &RenderSystem) -> &HeadlessDevice {
    system
        .device_as::<HeadlessDevice>()
        .expect("render system should run on a headless device")
}
