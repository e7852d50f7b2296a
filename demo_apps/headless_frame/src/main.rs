//! Headless frame demo.
//!
//! Builds a forward renderer on top of [`HeadlessDevice`], feeds it a grid of
//! opaque boxes plus a few glass panes, and logs the commands recorded for
//! each frame. An optional first argument points at a JSON file with
//! [`ForwardRendererSettings`].
//!
//! ```text
//! RUST_LOG=info cargo run -p headless_frame -- settings.json
//! ```

use std::sync::Arc;

use anyhow::Context;
use glam::{Mat4, Vec3};

use vesta::prelude::*;
use vesta::render::device::{BufferDescriptor, DeviceCommand};

const FRAMES: usize = 3;
const GRID: i32 = 4;

fn main() -> anyhow::Result<()> {
    env_logger::init();

    let settings = match std::env::args().nth(1) {
        Some(path) => {
            let text = std::fs::read_to_string(&path).with_context(|| format!("reading {path}"))?;
            serde_json::from_str(&text).with_context(|| format!("parsing {path}"))?
        }
        None => ForwardRendererSettings {
            picking: true,
            ..Default::default()
        },
    };

    let mut renderer = ForwardRenderer::new(RenderSystemConfig::default(), settings)?;
    renderer.initialize(Arc::new(effect_compiler()), Box::new(HeadlessDevice::new()))?;
    renderer.set_camera(
        Mat4::look_at_rh(Vec3::new(0.0, 6.0, 12.0), Vec3::ZERO, Vec3::Y),
        Mat4::perspective_rh(std::f32::consts::FRAC_PI_4, 16.0 / 9.0, 0.1, 100.0),
    );
    if renderer.settings().shadows {
        renderer.add_shadow_view(
            Mat4::look_at_rh(Vec3::new(4.0, 10.0, 4.0), Vec3::ZERO, Vec3::Y),
            Mat4::orthographic_rh(-8.0, 8.0, -8.0, 8.0, 0.1, 30.0),
        )?;
    }

    let vertex_buffer = renderer
        .system_mut()
        .device_as_mut::<HeadlessDevice>()
        .context("renderer is not running on the headless device")?
        .create_buffer(&BufferDescriptor {
            label: Some("box vertices"),
            size: 36 * VertexLayout::position_normal_uv().stride,
            usage: wgpu::BufferUsages::VERTEX,
        })?;
    let (opaque, glass) = models(vertex_buffer);

    let mut components: Vec<(EntityId, ModelComponent)> = Vec::new();
    for x in 0..GRID {
        for z in 0..GRID {
            let position = Vec3::new((x - GRID / 2) as f32 * 2.0, 0.0, (z - GRID / 2) as f32 * 2.0);
            let entity = EntityId(components.len() as u64);
            components.push((entity, ModelComponent::new(opaque.clone()).with_world(Mat4::from_translation(position))));
        }
    }
    for i in 0..3 {
        let entity = EntityId(components.len() as u64);
        let position = Vec3::new(i as f32 * 1.5 - 1.5, 1.0, 3.0 - i as f32);
        components.push((entity, ModelComponent::new(glass.clone()).with_world(Mat4::from_translation(position))));
    }

    let mut processor = ModelProcessor::new();
    for frame in 0..FRAMES {
        // Spin the first box so per-draw constants change between frames.
        if let Some((_, component)) = components.first_mut() {
            component.world = Mat4::from_rotation_y(frame as f32 * 0.25);
        }
        processor.update(renderer.system_mut(), components.iter().map(|(entity, c)| (*entity, c)))?;
        renderer.draw_frame()?;

        let device = renderer
            .system_mut()
            .device_as_mut::<HeadlessDevice>()
            .context("renderer is not running on the headless device")?;
        let commands = device.take_commands();
        let draws = commands
            .iter()
            .filter(|c| matches!(c, DeviceCommand::Draw { .. } | DeviceCommand::DrawIndexed { .. }))
            .count();
        let pipelines = commands
            .iter()
            .filter(|c| matches!(c, DeviceCommand::SetPipelineState(_)))
            .count();
        log::info!(
            "Frame {}: {} commands, {} draws, {} pipeline binds, {} render objects",
            renderer.system().frame_counter(),
            commands.len(),
            draws,
            pipelines,
            renderer.system().render_object_count()
        );
    }

    Ok(())
}

fn effect_compiler() -> PrecompiledEffectCompiler {
    const MATRIX: u32 = 64;
    let compiler = PrecompiledEffectCompiler::new();
    compiler.register(
        "Model",
        EffectReflection::new()
            .with_constant_buffer("PerFrame", &[("Global.Time", 4)])
            .with_constant_buffer(
                "PerView",
                &[
                    ("Transformation.ViewProjection", MATRIX),
                    ("Transformation.Eye", 16),
                ],
            )
            .with_constant_buffer(
                "PerDraw",
                &[
                    ("Transformation.World", MATRIX),
                    ("Transformation.WorldInverseTranspose", MATRIX),
                    ("Transformation.WorldViewProjection", MATRIX),
                    ("Picking.ObjectInfo", 16),
                ],
            )
            .with_constant_buffer("PerMaterial", &[("Material.DiffuseColor", 16)])
            .with_resource("PerMaterial", "Material.DiffuseMap", EffectParameterClass::ShaderResourceView),
    );
    compiler
}

fn models(vertex_buffer: BufferHandle) -> (Arc<Model>, Arc<Model>) {
    let draw = MeshDraw::triangles(
        VertexBufferBinding {
            buffer: vertex_buffer,
            offset: 0,
            layout: VertexLayout::position_normal_uv(),
        },
        None,
        36,
    );
    let mesh = Mesh {
        name: "box".to_owned(),
        draw,
        material_index: 0,
        center: Vec3::ZERO,
    };

    let opaque = Arc::new(Model {
        meshes: vec![mesh.clone()],
        materials: vec![Arc::new(Material::new("Stone"))],
    });
    let glass = Arc::new(Model {
        meshes: vec![mesh],
        materials: vec![Arc::new(Material::new("Glass").transparent())],
    });
    (opaque, glass)
}
