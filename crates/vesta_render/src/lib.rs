//! Vesta Render
//!
//! A data-oriented render-feature pipeline. Render objects are registered
//! with a [`RenderSystem`], claimed by a [`RootRenderFeature`] and processed
//! every frame in strictly ordered phases:
//!
//! 1. **Extract**: per-frame object, view-object and render nodes are built
//!    in flat arrays from the registered objects and views.
//! 2. **Prepare**: effect permutations are validated and compiled, resource
//!    groups are allocated from frame pools and constants are written.
//! 3. **Draw**: each (view, stage) pair is drawn in sorted order, one batch
//!    per contiguous run of nodes owned by the same feature.
//!
//! The GPU sits behind [`GraphicsDevice`]; [`HeadlessDevice`] records commands
//! in memory. Shader programs come from an [`EffectCompiler`].

pub mod config;
pub mod device;
pub mod effect;
pub mod errors;
pub mod feature;
pub mod nodes;
pub mod object;
pub mod render_effect;
pub mod resources;
pub mod scene;
pub mod stage;
pub mod system;
pub mod view;

pub use config::RenderSystemConfig;
pub use device::{GraphicsDevice, HeadlessDevice};
pub use effect::{EffectCompiler, PrecompiledEffectCompiler};
pub use errors::{RenderError, Result};
pub use feature::{
    MaterialRenderFeature, MeshRenderFeature, PickingRenderFeature, RootEffectRenderFeature,
    RootRenderFeature, SubRenderFeature, TransformRenderFeature,
};
pub use object::{RenderGroupMask, RenderObject, RenderObjectKind};
pub use stage::{RenderOutputDescription, RenderStage, RenderStageId, SortMode};
pub use system::{RenderContext, RenderDrawContext, RenderSystem};
pub use view::{RenderView, RenderViewId};
