//! Forward Renderer
//!
//! A ready-made frame setup on top of [`RenderSystem`]: the usual stages of a
//! forward renderer, one [`MeshRenderFeature`] with transform, material and
//! picking sub-features, a main view and optional shadow views.
//!
//! ```rust,ignore
//! use vesta::forward_renderer::{ForwardRenderer, ForwardRendererSettings};
//!
//! let mut renderer = ForwardRenderer::new(RenderSystemConfig::default(), ForwardRendererSettings::default())?;
//! renderer.initialize(compiler, Box::new(HeadlessDevice::new()))?;
//! renderer.set_camera(view, projection);
//! renderer.draw_frame()?;
//! ```

use std::sync::Arc;

use glam::Mat4;
use serde::{Deserialize, Serialize};
use vesta_render::device::GraphicsDevice;
use vesta_render::effect::EffectCompiler;
use vesta_render::feature::{
    MaterialRenderFeature, MeshRenderFeature, PickingRenderFeature, PipelineStateDescription,
    RenderStageSelector, TransformRenderFeature,
};
use vesta_render::nodes::RenderNode;
use vesta_render::{
    RenderError, RenderObject, RenderOutputDescription, RenderStage, RenderStageId,
    RenderSystem, RenderSystemConfig, RenderView, RenderViewId, Result, SortMode,
};

pub const MAIN_STAGE: &str = "Main";
pub const TRANSPARENT_STAGE: &str = "Transparent";
pub const GBUFFER_STAGE: &str = "GBuffer";
pub const SHADOW_MAP_CASTER_STAGE: &str = "ShadowMapCaster";
pub const PICKING_STAGE: &str = "Picking";

/// Which optional stages the renderer sets up, and the effect meshes use.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ForwardRendererSettings {
    /// Base effect name; stage-specific variants append `.<Stage>`.
    pub model_effect: String,
    pub shadows: bool,
    pub gbuffer: bool,
    pub picking: bool,
    #[serde(skip, default = "default_color_format")]
    pub color_format: wgpu::TextureFormat,
    #[serde(skip, default = "default_depth_format")]
    pub depth_format: wgpu::TextureFormat,
}

fn default_color_format() -> wgpu::TextureFormat {
    wgpu::TextureFormat::Rgba8UnormSrgb
}

fn default_depth_format() -> wgpu::TextureFormat {
    wgpu::TextureFormat::Depth32Float
}

impl Default for ForwardRendererSettings {
    fn default() -> Self {
        Self {
            model_effect: "Model".to_owned(),
            shadows: true,
            gbuffer: false,
            picking: false,
            color_format: default_color_format(),
            depth_format: default_depth_format(),
        }
    }
}

/// Stage ids registered by the renderer.
#[derive(Debug, Clone, Copy)]
pub struct ForwardStages {
    pub main: RenderStageId,
    pub transparent: RenderStageId,
    pub gbuffer: Option<RenderStageId>,
    pub shadow_map_caster: Option<RenderStageId>,
    pub picking: Option<RenderStageId>,
}

pub struct ForwardRenderer {
    system: RenderSystem,
    settings: ForwardRendererSettings,
    stages: ForwardStages,
    main_view: RenderViewId,
    shadow_views: Vec<RenderViewId>,
    mesh_feature: usize,
}

impl ForwardRenderer {
    pub fn new(config: RenderSystemConfig, settings: ForwardRendererSettings) -> Result<Self> {
        let mut system = RenderSystem::new(config);
        let stages = add_stages(&mut system, &settings)?;

        let mesh_feature = MeshRenderFeature::new()
            .with_sub_feature(TransformRenderFeature::new())
            .with_sub_feature(MaterialRenderFeature::new())
            .with_sub_feature(PickingRenderFeature::new())
            .with_render_stage_selector(stage_selector(&settings));
        let mut mesh_feature = Box::new(mesh_feature);
        mesh_feature.root_mut().post_process_pipeline_state = Some(Box::new(shadow_pipeline_state));
        let mesh_feature = system.add_render_feature(mesh_feature)?;

        let mut main_view = RenderView::main()
            .with_render_stage(stages.main)
            .with_render_stage(stages.transparent);
        for stage in [stages.gbuffer, stages.picking].into_iter().flatten() {
            main_view.add_render_stage(stage);
        }
        let main_view = system.add_view(main_view);
        log::info!(
            "Forward renderer created: {} stages (shadows: {}, gbuffer: {}, picking: {})",
            system.render_stages().len(),
            settings.shadows,
            settings.gbuffer,
            settings.picking
        );

        Ok(Self {
            system,
            settings,
            stages,
            main_view,
            shadow_views: Vec::new(),
            mesh_feature,
        })
    }

    pub fn initialize(
        &mut self,
        effect_compiler: Arc<dyn EffectCompiler>,
        device: Box<dyn GraphicsDevice>,
    ) -> Result<()> {
        self.system.initialize(effect_compiler, device)
    }

    #[must_use]
    pub fn settings(&self) -> &ForwardRendererSettings {
        &self.settings
    }

    #[must_use]
    pub fn stages(&self) -> ForwardStages {
        self.stages
    }

    #[must_use]
    pub fn main_view(&self) -> RenderViewId {
        self.main_view
    }

    #[must_use]
    pub fn shadow_views(&self) -> &[RenderViewId] {
        &self.shadow_views
    }

    #[must_use]
    pub fn system(&self) -> &RenderSystem {
        &self.system
    }

    pub fn system_mut(&mut self) -> &mut RenderSystem {
        &mut self.system
    }

    #[must_use]
    pub fn mesh_feature(&self) -> Option<&MeshRenderFeature> {
        self.system
            .feature(self.mesh_feature)
            .and_then(|feature| feature.as_any().downcast_ref::<MeshRenderFeature>())
    }

    pub fn set_camera(&mut self, view: Mat4, projection: Mat4) {
        if let Some(main_view) = self.system.view_mut(self.main_view) {
            main_view.set_camera(view, projection);
        }
    }

    /// Adds a light's shadow view, drawn before the main view.
    pub fn add_shadow_view(&mut self, view: Mat4, projection: Mat4) -> Result<RenderViewId> {
        let stage = self.stages.shadow_map_caster.ok_or_else(|| {
            RenderError::InvalidOperation("shadows are disabled in the renderer settings".to_owned())
        })?;
        let shadow_view = RenderView::shadow(self.main_view)
            .with_camera(view, projection)
            .with_render_stage(stage);
        let id = self.system.add_view(shadow_view);
        log::debug!("Added shadow view {} under main view {}", id.index(), self.main_view.index());
        self.shadow_views.push(id);
        Ok(id)
    }

    /// Runs extract and prepare, then draws every stage in dependency order.
    pub fn draw_frame(&mut self) -> Result<()> {
        self.system.extract()?;
        self.system.prepare()?;

        if let Some(gbuffer) = self.stages.gbuffer {
            self.system.draw(self.main_view, gbuffer)?;
        }
        if let Some(shadow_stage) = self.stages.shadow_map_caster {
            for &shadow_view in &self.shadow_views {
                let is_child = self
                    .system
                    .view(shadow_view)
                    .is_some_and(|view| view.parent() == Some(self.main_view));
                if is_child {
                    self.system.draw(shadow_view, shadow_stage)?;
                }
            }
        }
        self.system.draw(self.main_view, self.stages.main)?;
        self.system.draw(self.main_view, self.stages.transparent)?;
        if let Some(picking) = self.stages.picking {
            self.system.draw(self.main_view, picking)?;
        }
        Ok(())
    }
}

fn add_stages(system: &mut RenderSystem, settings: &ForwardRendererSettings) -> Result<ForwardStages> {
    let color = RenderOutputDescription::new(Some(settings.color_format), Some(settings.depth_format));

    let main = system.add_render_stage(
        RenderStage::new(MAIN_STAGE)
            .with_output(color)
            .with_sort_mode(SortMode::StateChange),
    )?;
    let transparent = system.add_render_stage(
        RenderStage::new(TRANSPARENT_STAGE)
            .with_effect_slot(MAIN_STAGE)
            .with_output(color)
            .with_sort_mode(SortMode::BackToFront),
    )?;
    let gbuffer = if settings.gbuffer {
        Some(system.add_render_stage(RenderStage::new(GBUFFER_STAGE).with_output(
            RenderOutputDescription::new(
                Some(wgpu::TextureFormat::Rg11b10Ufloat),
                Some(settings.depth_format),
            ),
        ))?)
    } else {
        None
    };
    let shadow_map_caster = if settings.shadows {
        Some(system.add_render_stage(
            RenderStage::new(SHADOW_MAP_CASTER_STAGE)
                .with_output(RenderOutputDescription::new(None, Some(wgpu::TextureFormat::Depth32Float)))
                .with_sort_mode(SortMode::FrontToBack),
        )?)
    } else {
        None
    };
    let picking = if settings.picking {
        Some(system.add_render_stage(RenderStage::new(PICKING_STAGE).with_output(
            RenderOutputDescription::new(
                Some(wgpu::TextureFormat::Rgba32Uint),
                Some(settings.depth_format),
            ),
        ))?)
    } else {
        None
    };

    Ok(ForwardStages {
        main,
        transparent,
        gbuffer,
        shadow_map_caster,
        picking,
    })
}

/// Shadow casters render both faces without depth clipping.
fn shadow_pipeline_state(
    _node: &RenderNode,
    _object: &RenderObject,
    stage: &RenderStage,
    desc: &mut PipelineStateDescription,
) {
    if stage.name() == SHADOW_MAP_CASTER_STAGE {
        desc.rasterizer.cull_mode = None;
        desc.rasterizer.depth_clip_enable = false;
    }
}

/// Transparent meshes go to the transparent stage only; opaque meshes to
/// main, plus shadow casting, gbuffer and picking when enabled.
fn stage_selector(settings: &ForwardRendererSettings) -> RenderStageSelector {
    let base: Arc<str> = Arc::from(settings.model_effect.as_str());
    let variant = |stage: &str| -> Arc<str> { Arc::from(format!("{}.{stage}", settings.model_effect)) };
    let shadow_effect = variant(SHADOW_MAP_CASTER_STAGE);
    let gbuffer_effect = variant(GBUFFER_STAGE);
    let picking_effect = variant(PICKING_STAGE);

    Box::new(move |object: &RenderObject, stage: &RenderStage| {
        let mesh = object.as_mesh()?;
        let transparent = mesh.has_transparency();
        match stage.name() {
            MAIN_STAGE if !transparent => Some(base.clone()),
            TRANSPARENT_STAGE if transparent => Some(base.clone()),
            SHADOW_MAP_CASTER_STAGE if mesh.is_shadow_caster() => Some(shadow_effect.clone()),
            GBUFFER_STAGE if !transparent => Some(gbuffer_effect.clone()),
            PICKING_STAGE => Some(picking_effect.clone()),
            _ => None,
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn settings_load_with_defaults() {
        let settings: ForwardRendererSettings =
            serde_json::from_str(r#"{ "picking": true }"#).unwrap();
        assert!(settings.picking);
        assert!(settings.shadows);
        assert_eq!(settings.model_effect, "Model");
        assert_eq!(settings.depth_format, wgpu::TextureFormat::Depth32Float);
    }

    #[test]
    fn optional_stages_follow_settings() {
        let settings = ForwardRendererSettings {
            shadows: false,
            gbuffer: true,
            ..Default::default()
        };
        let mut renderer = ForwardRenderer::new(RenderSystemConfig::default(), settings).unwrap();
        let stages = renderer.stages();
        assert!(stages.gbuffer.is_some());
        assert!(stages.shadow_map_caster.is_none());
        assert_eq!(
            renderer.system().render_stage(stages.transparent).unwrap().effect_slot_name(),
            MAIN_STAGE
        );
        assert!(matches!(
            renderer.add_shadow_view(Mat4::IDENTITY, Mat4::IDENTITY),
            Err(RenderError::InvalidOperation(_))
        ));
    }
}
