//! Render System
//!
//! [`RenderSystem`] owns the render objects, stages, views and root features
//! and drives them through the frame phases:
//!
//! ```text
//! extract()  : reset -> render stages -> object nodes -> feature extract
//!              -> view/object culling -> render nodes per (view, stage)
//! prepare()  : effect permutations -> resource groups / constants
//!              -> stage sorting -> constant buffer upload
//! draw(v, s) : one feature.draw() per contiguous run of nodes
//! ```
//!
//! Features are stored next to the [`RenderContext`] rather than inside it, so
//! a feature can mutate its own state while borrowing the shared context.

mod context;
mod sort;

use std::any::Any;
use std::sync::Arc;

use vesta_core::RenderObjectKey;

pub use context::{RenderContext, RenderDrawContext};

use crate::config::RenderSystemConfig;
use crate::device::{GraphicsDevice, TrackedCommandList};
use crate::effect::EffectCompiler;
use crate::errors::{RenderError, Result};
use crate::feature::RootRenderFeature;
use crate::nodes::{ObjectNodeReference, RenderNodeFeatureReference};
use crate::object::{ActiveRenderStage, RenderObject};
use crate::resources::FrameResources;
use crate::stage::{RenderStage, RenderStageId};
use crate::view::{RenderView, RenderViewFeature, RenderViewId};

pub struct RenderSystem {
    context: RenderContext,
    features: Vec<Box<dyn RootRenderFeature>>,
    initialized: bool,
}

impl RenderSystem {
    #[must_use]
    pub fn new(config: RenderSystemConfig) -> Self {
        Self {
            context: RenderContext::new(config),
            features: Vec::new(),
            initialized: false,
        }
    }

    /// Attaches the device and effect compiler and initializes every feature
    /// registered so far.
    pub fn initialize(
        &mut self,
        effect_compiler: Arc<dyn EffectCompiler>,
        device: Box<dyn GraphicsDevice>,
    ) -> Result<()> {
        if self.initialized {
            return Err(RenderError::AlreadyInitialized);
        }
        log::info!(
            "Initializing render system on '{}' with {} feature(s)",
            device.name(),
            self.features.len()
        );
        self.context.frame_resources = FrameResources::new(&self.context.config);
        self.context.device = Some(device);
        self.context.effect_compiler = Some(effect_compiler);

        for feature in &mut self.features {
            feature.initialize(&mut self.context)?;
        }
        self.initialized = true;
        Ok(())
    }

    #[inline]
    #[must_use]
    pub fn is_initialized(&self) -> bool {
        self.initialized
    }

    fn ensure_initialized(&self) -> Result<()> {
        if self.initialized {
            Ok(())
        } else {
            Err(RenderError::NotInitialized)
        }
    }

    // ========================================================================
    // Registration
    // ========================================================================

    /// Registers a root feature and returns its index.
    pub fn add_render_feature(&mut self, mut feature: Box<dyn RootRenderFeature>) -> Result<usize> {
        let index = self.features.len();
        feature.core_mut().set_index(index);
        if self.initialized {
            feature.initialize(&mut self.context)?;
        }
        log::debug!("Registered render feature '{}' at index {index}", feature.name());
        self.features.push(feature);
        Ok(index)
    }

    pub fn add_render_stage(&mut self, mut stage: RenderStage) -> Result<RenderStageId> {
        let index = self.context.render_stages.len();
        stage.index = index;
        for feature in &mut self.features {
            feature.on_render_stage_added(&stage)?;
        }
        for (_, object) in &mut self.context.render_objects {
            if object.active_render_stages.len() <= index {
                object
                    .active_render_stages
                    .resize(index + 1, ActiveRenderStage::INACTIVE);
            }
        }
        self.context.render_stages.push(stage);
        Ok(RenderStageId(index))
    }

    pub fn add_view(&mut self, mut view: RenderView) -> RenderViewId {
        let index = self.context.views.len();
        view.index = index;
        self.context.views.push(view);
        RenderViewId(index)
    }

    /// Registers an object with the first feature that supports it.
    ///
    /// An object no feature accepts stays registered but is never extracted.
    pub fn add_render_object(&mut self, mut object: RenderObject) -> RenderObjectKey {
        let stage_count = self.context.render_stages.len();
        if object.active_render_stages.len() < stage_count {
            object
                .active_render_stages
                .resize(stage_count, ActiveRenderStage::INACTIVE);
        }

        let key = self.context.render_objects.insert(object);
        let Some(object) = self.context.render_objects.get_mut(key) else {
            return key;
        };
        match self
            .features
            .iter_mut()
            .find(|feature| feature.supports_render_object(&*object))
        {
            Some(feature) => feature.add_render_object(key, object),
            None => log::warn!("No render feature supports the render object; it will not be drawn"),
        }
        key
    }

    pub fn remove_render_object(&mut self, key: RenderObjectKey) -> Result<RenderObject> {
        let mut object = self
            .context
            .render_objects
            .remove(key)
            .ok_or(RenderError::UnknownRenderObject)?;
        if let Some(feature) = object
            .render_feature
            .and_then(|index| self.features.get_mut(index))
        {
            feature.remove_render_object(key, &mut object);
        }
        Ok(object)
    }

    // ========================================================================
    // Accessors
    // ========================================================================

    #[must_use]
    pub fn render_object(&self, key: RenderObjectKey) -> Option<&RenderObject> {
        self.context.render_objects.get(key)
    }

    pub fn render_object_mut(&mut self, key: RenderObjectKey) -> Option<&mut RenderObject> {
        self.context.render_objects.get_mut(key)
    }

    #[must_use]
    pub fn render_object_count(&self) -> usize {
        self.context.render_objects.len()
    }

    #[must_use]
    pub fn view(&self, id: RenderViewId) -> Option<&RenderView> {
        self.context.views.get(id.index())
    }

    pub fn view_mut(&mut self, id: RenderViewId) -> Option<&mut RenderView> {
        self.context.views.get_mut(id.index())
    }

    #[must_use]
    pub fn views(&self) -> &[RenderView] {
        &self.context.views
    }

    #[must_use]
    pub fn render_stage(&self, id: RenderStageId) -> Option<&RenderStage> {
        self.context.render_stages.get(id.index())
    }

    #[must_use]
    pub fn render_stages(&self) -> &[RenderStage] {
        &self.context.render_stages
    }

    #[must_use]
    pub fn render_stage_by_name(&self, name: &str) -> Option<RenderStageId> {
        self.context
            .render_stages
            .iter()
            .find(|stage| stage.name() == name)
            .map(RenderStage::id)
    }

    #[must_use]
    pub fn feature_count(&self) -> usize {
        self.features.len()
    }

    #[must_use]
    pub fn feature(&self, index: usize) -> Option<&dyn RootRenderFeature> {
        self.features.get(index).map(|feature| &**feature)
    }

    pub fn feature_mut(&mut self, index: usize) -> Option<&mut (dyn RootRenderFeature + 'static)> {
        self.features.get_mut(index).map(|feature| &mut **feature)
    }

    /// First registered feature of type `T`.
    #[must_use]
    pub fn feature_as<T: RootRenderFeature + 'static>(&self) -> Option<&T> {
        self.features
            .iter()
            .find_map(|feature| feature.as_any().downcast_ref::<T>())
    }

    pub fn feature_as_mut<T: RootRenderFeature + 'static>(&mut self) -> Option<&mut T> {
        self.features
            .iter_mut()
            .find_map(|feature| feature.as_any_mut().downcast_mut::<T>())
    }

    #[inline]
    #[must_use]
    pub fn frame_counter(&self) -> u64 {
        self.context.frame_counter
    }

    #[must_use]
    pub fn config(&self) -> &RenderSystemConfig {
        &self.context.config
    }

    #[must_use]
    pub fn context(&self) -> &RenderContext {
        &self.context
    }

    #[must_use]
    pub fn device(&self) -> Option<&dyn GraphicsDevice> {
        self.context.device.as_deref()
    }

    /// Concrete device, e.g. a [`HeadlessDevice`](crate::device::HeadlessDevice).
    #[must_use]
    pub fn device_as<T: Any>(&self) -> Option<&T> {
        self.context
            .device
            .as_deref()
            .and_then(|device| device.as_any().downcast_ref::<T>())
    }

    pub fn device_as_mut<T: Any>(&mut self) -> Option<&mut T> {
        self.context
            .device
            .as_deref_mut()
            .and_then(|device| device.as_any_mut().downcast_mut::<T>())
    }

    // ========================================================================
    // Frame phases
    // ========================================================================

    /// Starts a new frame: bumps the frame counter, resets the frame pools
    /// and drops every per-frame node.
    pub fn reset(&mut self) -> Result<()> {
        self.ensure_initialized()?;
        self.context.frame_counter += 1;
        self.context.frame_resources.reset();
        for (_, object) in &mut self.context.render_objects {
            object.object_node = ObjectNodeReference::INVALID;
        }
        for feature in &mut self.features {
            feature.reset();
        }
        Ok(())
    }

    /// Re-indexes the views and clears their per-frame lists.
    pub fn reset_views(&mut self) {
        let feature_count = self.features.len();
        for (index, view) in self.context.views.iter_mut().enumerate() {
            view.index = index;
            view.features
                .resize_with(feature_count, RenderViewFeature::default);
            for view_feature in &mut view.features {
                view_feature.clear();
            }
            for view_stage in &mut view.render_stages {
                view_stage.clear();
            }
        }
    }

    pub fn extract(&mut self) -> Result<()> {
        self.reset()?;
        let RenderContext {
            render_objects,
            render_stages,
            ..
        } = &mut self.context;

        for (key, object) in render_objects.iter_mut() {
            let Some(feature) = object
                .render_feature
                .and_then(|index| self.features.get_mut(index))
            else {
                continue;
            };
            feature.compute_render_stages(object, render_stages);
            if object.enabled {
                feature.core_mut().get_or_create_object_node(key, object);
            }
        }

        for feature in &mut self.features {
            feature.extract(&self.context);
        }

        self.reset_views();
        self.collect_render_nodes();

        if self.context.config.sort_render_nodes_by_feature {
            for view in &mut self.context.views {
                for view_stage in &mut view.render_stages {
                    sort::sort_by_feature(&mut view_stage.render_nodes);
                }
            }
        }

        log::trace!(
            "Extracted frame {}: {} object(s), {} view(s)",
            self.context.frame_counter,
            self.context.render_objects.len(),
            self.context.views.len()
        );
        Ok(())
    }

    /// Creates the view-object and render nodes of every view.
    fn collect_render_nodes(&mut self) {
        let RenderContext {
            render_objects,
            views,
            ..
        } = &mut self.context;

        for view in views.iter_mut() {
            let view_id = view.id();
            for (key, object) in render_objects.iter() {
                if !object.enabled || !object.object_node.is_valid() {
                    continue;
                }
                let Some(feature_index) = object.render_feature else {
                    continue;
                };
                if !view.culling_mask.intersects(object.render_groups) {
                    continue;
                }
                let Some(feature) = self.features.get_mut(feature_index) else {
                    continue;
                };
                let core = feature.core_mut();

                let view_object_node = core.create_view_object_node(view_id, key, object.object_node);
                view.features[feature_index]
                    .view_object_nodes
                    .push(view_object_node);

                for view_stage in &mut view.render_stages {
                    let stage = view_stage.render_stage;
                    if !object.is_active_in(stage.index()) {
                        continue;
                    }
                    let render_node = core.create_render_node(key, view_id, view_object_node, stage);
                    view.features[feature_index].render_nodes.push(render_node);
                    view_stage.render_nodes.push(RenderNodeFeatureReference {
                        root_render_feature: feature_index,
                        render_node,
                        render_object: key,
                    });
                }
            }
        }
    }

    pub fn prepare(&mut self) -> Result<()> {
        self.ensure_initialized()?;

        for feature in &mut self.features {
            feature.prepare_effect_permutations(&mut self.context)?;
        }
        for feature in &mut self.features {
            feature.prepare(&mut self.context)?;
        }

        let RenderContext {
            render_objects,
            render_stages,
            views,
            frame_resources,
            device,
            ..
        } = &mut self.context;

        for view in views.iter_mut() {
            let eye = view.eye;
            for view_stage in &mut view.render_stages {
                let mode = render_stages
                    .get(view_stage.render_stage.index())
                    .map(|stage| stage.sort_mode)
                    .unwrap_or_default();
                sort::sort_render_nodes(
                    mode,
                    eye,
                    &view_stage.render_nodes,
                    &mut view_stage.sorted_render_nodes,
                    &self.features,
                    render_objects,
                );
            }
        }

        let device = device.as_deref_mut().ok_or(RenderError::NotInitialized)?;
        frame_resources.buffer_pool.flush(device)?;
        log::trace!(
            "Prepared frame {}: {} bytes of constants, {} descriptor set(s)",
            self.context.frame_counter,
            self.context.frame_resources.buffer_pool.used_size(),
            self.context.frame_resources.descriptor_pool.len()
        );
        Ok(())
    }

    /// Records the draws of one (view, stage) pair.
    pub fn draw(&mut self, view: RenderViewId, stage: RenderStageId) -> Result<()> {
        self.ensure_initialized()?;
        let missing = || RenderError::MissingRenderViewStage {
            view: view.index(),
            stage: stage.index(),
        };

        let RenderContext {
            render_objects,
            render_stages,
            views,
            frame_resources,
            device,
            ..
        } = &mut self.context;

        let render_view = views.get(view.index()).ok_or_else(missing)?;
        let view_stage = render_view.render_stage(stage).ok_or_else(missing)?;
        let render_stage = render_stages.get(stage.index()).ok_or_else(missing)?;
        let device = device.as_deref_mut().ok_or(RenderError::NotInitialized)?;

        let mut ctx = RenderDrawContext {
            command_list: TrackedCommandList::new(device),
            render_objects,
            render_view,
            view_stage,
            render_stage,
            frame_resources,
        };

        let nodes = &view_stage.sorted_render_nodes;
        let mut start = 0;
        while start < nodes.len() {
            let feature_index = nodes[start].root_render_feature;
            let end = nodes[start..]
                .iter()
                .position(|node| node.root_render_feature != feature_index)
                .map_or(nodes.len(), |offset| start + offset);
            if let Some(feature) = self.features.get_mut(feature_index) {
                feature.draw(&mut ctx, start, end)?;
            }
            start = end;
        }

        log::trace!(
            "Drew {} node(s) of stage '{}', {} redundant bind(s) skipped",
            nodes.len(),
            render_stage.name(),
            ctx.command_list.skipped_binds()
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::HeadlessDevice;
    use crate::effect::PrecompiledEffectCompiler;
    use crate::feature::RenderFeatureCore;
    use crate::object::{CustomRenderObject, RenderGroupMask, RenderObjectKind};

    /// Accepts custom objects and records the node ranges it is asked to draw.
    #[derive(Default)]
    struct MarkerFeature {
        core: RenderFeatureCore,
        drawn: Vec<(usize, usize)>,
    }

    impl RootRenderFeature for MarkerFeature {
        fn name(&self) -> &str {
            "Marker"
        }

        fn core(&self) -> &RenderFeatureCore {
            &self.core
        }

        fn core_mut(&mut self) -> &mut RenderFeatureCore {
            &mut self.core
        }

        fn supports_render_object(&self, object: &RenderObject) -> bool {
            matches!(object.kind, RenderObjectKind::Custom(_))
        }

        fn initialize(&mut self, _ctx: &mut RenderContext) -> Result<()> {
            Ok(())
        }

        fn prepare(&mut self, _ctx: &mut RenderContext) -> Result<()> {
            Ok(())
        }

        fn draw(&mut self, _ctx: &mut RenderDrawContext<'_>, start: usize, end: usize) -> Result<()> {
            self.drawn.push((start, end));
            Ok(())
        }

        fn as_any(&self) -> &dyn Any {
            self
        }

        fn as_any_mut(&mut self) -> &mut dyn Any {
            self
        }
    }

    fn marker() -> RenderObject {
        RenderObject::new(RenderObjectKind::Custom(CustomRenderObject {
            type_name: "Marker",
            world: glam::Mat4::IDENTITY,
            data: Box::new(()),
        }))
    }

    fn initialized_system() -> RenderSystem {
        let mut system = RenderSystem::new(RenderSystemConfig::default());
        system
            .add_render_feature(Box::new(MarkerFeature::default()))
            .unwrap();
        system
            .initialize(
                Arc::new(PrecompiledEffectCompiler::new()),
                Box::new(HeadlessDevice::new()),
            )
            .unwrap();
        system
    }

    #[test]
    fn frame_operations_require_initialize() {
        let mut system = RenderSystem::new(RenderSystemConfig::default());
        assert!(matches!(system.extract(), Err(RenderError::NotInitialized)));
        assert!(matches!(system.prepare(), Err(RenderError::NotInitialized)));
        assert!(matches!(
            system.draw(RenderViewId(0), RenderStageId(0)),
            Err(RenderError::NotInitialized)
        ));
    }

    #[test]
    fn second_initialize_is_rejected() {
        let mut system = initialized_system();
        let result = system.initialize(
            Arc::new(PrecompiledEffectCompiler::new()),
            Box::new(HeadlessDevice::new()),
        );
        assert!(matches!(result, Err(RenderError::AlreadyInitialized)));
    }

    #[test]
    fn reset_bumps_counter_and_invalidates_object_nodes() {
        let mut system = initialized_system();
        let stage = system.add_render_stage(RenderStage::new("Main")).unwrap();
        system.add_view(RenderView::main().with_render_stage(stage));
        let mut object = marker();
        object.set_active_render_stage(stage.index(), ActiveRenderStage::new("Marker"));
        let key = system.add_render_object(object);

        assert_eq!(system.frame_counter(), 1);
        system.extract().unwrap();
        assert_eq!(system.frame_counter(), 2);
        assert!(system.render_object(key).unwrap().object_node().is_valid());

        system.reset().unwrap();
        assert!(!system.render_object(key).unwrap().object_node().is_valid());
        assert!(system.feature(0).unwrap().core().render_nodes.is_empty());
    }

    #[test]
    fn culling_mask_filters_objects() {
        let mut system = initialized_system();
        let stage = system.add_render_stage(RenderStage::new("Main")).unwrap();
        let mut view = RenderView::main().with_render_stage(stage);
        view.culling_mask = RenderGroupMask::GROUP_0;
        let view = system.add_view(view);

        let mut visible = marker();
        visible.render_groups = RenderGroupMask::GROUP_0;
        visible.set_active_render_stage(stage.index(), ActiveRenderStage::new("Marker"));
        let mut hidden = marker();
        hidden.render_groups = RenderGroupMask::GROUP_1;
        hidden.set_active_render_stage(stage.index(), ActiveRenderStage::new("Marker"));
        let visible = system.add_render_object(visible);
        system.add_render_object(hidden);

        system.extract().unwrap();
        let nodes = &system.view(view).unwrap().render_stage(stage).unwrap().render_nodes;
        assert_eq!(nodes.len(), 1);
        assert_eq!(nodes[0].render_object, visible);
    }

    #[test]
    fn disabled_objects_are_not_extracted() {
        let mut system = initialized_system();
        let stage = system.add_render_stage(RenderStage::new("Main")).unwrap();
        let view = system.add_view(RenderView::main().with_render_stage(stage));
        let mut object = marker();
        object.enabled = false;
        object.set_active_render_stage(stage.index(), ActiveRenderStage::new("Marker"));
        system.add_render_object(object);

        system.extract().unwrap();
        assert!(system.view(view).unwrap().render_stages[0].render_nodes.is_empty());
    }

    #[test]
    fn draw_dispatches_contiguous_feature_runs() {
        let mut system = initialized_system();
        let stage = system.add_render_stage(RenderStage::new("Main")).unwrap();
        let view = system.add_view(RenderView::main().with_render_stage(stage));
        for _ in 0..3 {
            let mut object = marker();
            object.set_active_render_stage(stage.index(), ActiveRenderStage::new("Marker"));
            system.add_render_object(object);
        }

        system.extract().unwrap();
        system.prepare().unwrap();
        system.draw(view, stage).unwrap();
        let feature = system.feature_as::<MarkerFeature>().unwrap();
        assert_eq!(feature.drawn, vec![(0, 3)]);
    }

    #[test]
    fn removing_unknown_object_fails() {
        let mut system = initialized_system();
        let key = system.add_render_object(marker());
        system.remove_render_object(key).unwrap();
        assert!(matches!(
            system.remove_render_object(key),
            Err(RenderError::UnknownRenderObject)
        ));
        assert!(system.feature(0).unwrap().core().static_objects.is_empty());
    }
}
