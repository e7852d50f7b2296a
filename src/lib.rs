#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::cast_precision_loss)]
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::too_many_arguments)]

//! Vesta
//!
//! Umbrella crate: re-exports the core and render crates and provides a
//! [`ForwardRenderer`] wiring the common stages and mesh features together.

pub mod forward_renderer;

pub use vesta_core as core;
pub use vesta_render as render;

pub use forward_renderer::{ForwardRenderer, ForwardRendererSettings};
pub use vesta_render::{
    RenderError, RenderObject, RenderStage, RenderSystem, RenderSystemConfig, RenderView, Result,
};

/// Common imports for applications.
pub mod prelude {
    pub use crate::forward_renderer::{ForwardRenderer, ForwardRendererSettings, ForwardStages};
    pub use vesta_core::{ObjectId, RenderObjectKey};
    pub use vesta_render::device::{BufferHandle, GraphicsDevice, HeadlessDevice};
    pub use vesta_render::effect::{
        EffectCompiler, EffectParameterClass, EffectReflection, PrecompiledEffectCompiler,
    };
    pub use vesta_render::feature::VertexLayout;
    pub use vesta_render::scene::{
        EntityId, IndexBufferBinding, Material, Mesh, MeshDraw, Model, ModelComponent,
        ModelProcessor, VertexBufferBinding,
    };
    pub use vesta_render::{
        RenderError, RenderGroupMask, RenderObject, RenderStage, RenderSystem, RenderSystemConfig,
        RenderView, RenderViewId, Result, SortMode,
    };
}
