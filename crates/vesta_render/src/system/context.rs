//! Frame contexts handed to render features.

use std::sync::Arc;

use slotmap::SlotMap;
use vesta_core::RenderObjectKey;

use crate::config::RenderSystemConfig;
use crate::device::{GraphicsDevice, TrackedCommandList};
use crate::effect::EffectCompiler;
use crate::errors::{RenderError, Result};
use crate::object::RenderObject;
use crate::resources::FrameResources;
use crate::stage::RenderStage;
use crate::view::{RenderView, RenderViewStage};

/// Render-system state shared with features during extract and prepare.
///
/// Fields are public so that a feature can borrow disjoint parts at once,
/// e.g. the views mutably while reading the render objects.
pub struct RenderContext {
    pub config: RenderSystemConfig,
    /// Starts at 1 and increments on every reset.
    pub frame_counter: u64,
    pub render_objects: SlotMap<RenderObjectKey, RenderObject>,
    pub render_stages: Vec<RenderStage>,
    pub views: Vec<RenderView>,
    pub frame_resources: FrameResources,
    pub device: Option<Box<dyn GraphicsDevice>>,
    pub effect_compiler: Option<Arc<dyn EffectCompiler>>,
}

impl RenderContext {
    #[must_use]
    pub fn new(config: RenderSystemConfig) -> Self {
        let frame_resources = FrameResources::new(&config);
        Self {
            config,
            frame_counter: 1,
            render_objects: SlotMap::with_key(),
            render_stages: Vec::new(),
            views: Vec::new(),
            frame_resources,
            device: None,
            effect_compiler: None,
        }
    }

    pub fn device_mut(&mut self) -> Result<&mut dyn GraphicsDevice> {
        match self.device.as_deref_mut() {
            Some(device) => Ok(device),
            None => Err(RenderError::NotInitialized),
        }
    }

    pub fn effect_compiler(&self) -> Result<&Arc<dyn EffectCompiler>> {
        self.effect_compiler.as_ref().ok_or(RenderError::NotInitialized)
    }
}

/// Everything a feature needs to record draws of one (view, stage) pair.
pub struct RenderDrawContext<'a> {
    pub command_list: TrackedCommandList<'a>,
    pub render_objects: &'a SlotMap<RenderObjectKey, RenderObject>,
    pub render_view: &'a RenderView,
    pub view_stage: &'a RenderViewStage,
    pub render_stage: &'a RenderStage,
    pub frame_resources: &'a FrameResources,
}
