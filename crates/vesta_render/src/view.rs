//! Render Views
//!
//! A view is a camera-like viewpoint (the main camera, a shadow-casting light)
//! with the list of stages it renders. Per-feature scratch lists are cleared
//! and refilled every frame.

use glam::{Mat4, Vec3};

use crate::nodes::{RenderNodeFeatureReference, RenderNodeReference, ViewObjectNodeReference};
use crate::object::RenderGroupMask;
use crate::resources::ViewLayoutId;
use crate::stage::RenderStageId;

/// Index of a registered view.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RenderViewId(pub(crate) usize);

impl RenderViewId {
    #[inline]
    #[must_use]
    pub const fn index(self) -> usize {
        self.0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RenderViewKind {
    Main,
    /// Shadow map view of a light, drawn before its parent view.
    Shadow { parent: RenderViewId },
}

/// A (view, stage) participation and the nodes extracted for it.
#[derive(Debug, Clone)]
pub struct RenderViewStage {
    pub render_stage: RenderStageId,
    pub render_nodes: Vec<RenderNodeFeatureReference>,
    /// Draw order; equals `render_nodes` unless the stage has a sort mode.
    pub sorted_render_nodes: Vec<RenderNodeFeatureReference>,
}

impl RenderViewStage {
    #[must_use]
    pub fn new(render_stage: RenderStageId) -> Self {
        Self {
            render_stage,
            render_nodes: Vec::new(),
            sorted_render_nodes: Vec::new(),
        }
    }

    pub(crate) fn clear(&mut self) {
        self.render_nodes.clear();
        self.sorted_render_nodes.clear();
    }
}

/// Per-feature scratch of a view.
#[derive(Debug, Clone, Default)]
pub struct RenderViewFeature {
    pub render_nodes: Vec<RenderNodeReference>,
    pub view_object_nodes: Vec<ViewObjectNodeReference>,
    /// PerView layouts used by this view this frame.
    pub layouts: Vec<ViewLayoutId>,
}

impl RenderViewFeature {
    pub(crate) fn clear(&mut self) {
        self.render_nodes.clear();
        self.view_object_nodes.clear();
        self.layouts.clear();
    }
}

#[derive(Debug, Clone)]
pub struct RenderView {
    pub view: Mat4,
    pub projection: Mat4,
    pub view_projection: Mat4,
    pub eye: Vec3,
    /// Render groups visible from this view.
    pub culling_mask: RenderGroupMask,
    pub kind: RenderViewKind,
    pub render_stages: Vec<RenderViewStage>,
    pub features: Vec<RenderViewFeature>,
    pub(crate) index: usize,
}

impl RenderView {
    #[must_use]
    pub fn new(kind: RenderViewKind) -> Self {
        Self {
            view: Mat4::IDENTITY,
            projection: Mat4::IDENTITY,
            view_projection: Mat4::IDENTITY,
            eye: Vec3::ZERO,
            culling_mask: RenderGroupMask::all(),
            kind,
            render_stages: Vec::new(),
            features: Vec::new(),
            index: usize::MAX,
        }
    }

    #[must_use]
    pub fn main() -> Self {
        Self::new(RenderViewKind::Main)
    }

    #[must_use]
    pub fn shadow(parent: RenderViewId) -> Self {
        Self::new(RenderViewKind::Shadow { parent })
    }

    /// Sets view/projection and derives the view-projection and eye position.
    pub fn set_camera(&mut self, view: Mat4, projection: Mat4) {
        self.view = view;
        self.projection = projection;
        self.view_projection = projection * view;
        self.eye = view.inverse().w_axis.truncate();
    }

    #[must_use]
    pub fn with_camera(mut self, view: Mat4, projection: Mat4) -> Self {
        self.set_camera(view, projection);
        self
    }

    /// Registers the view for a stage; adding the same stage twice is a no-op.
    pub fn add_render_stage(&mut self, stage: RenderStageId) {
        if self.render_stage(stage).is_none() {
            self.render_stages.push(RenderViewStage::new(stage));
        }
    }

    #[must_use]
    pub fn with_render_stage(mut self, stage: RenderStageId) -> Self {
        self.add_render_stage(stage);
        self
    }

    #[must_use]
    pub fn render_stage(&self, stage: RenderStageId) -> Option<&RenderViewStage> {
        self.render_stages.iter().find(|s| s.render_stage == stage)
    }

    #[must_use]
    pub fn id(&self) -> RenderViewId {
        RenderViewId(self.index)
    }

    /// Parent view of a shadow view.
    #[must_use]
    pub fn parent(&self) -> Option<RenderViewId> {
        match self.kind {
            RenderViewKind::Shadow { parent } => Some(parent),
            RenderViewKind::Main => None,
        }
    }
}
