//! Error Types
//!
//! [`RenderError`] covers every failure mode of the render pipeline. All
//! fallible operations return [`Result<T>`].
//!
//! Missing shader members are not errors: their constant-buffer offsets resolve
//! to `-1` and writes to them are skipped.

use thiserror::Error;

use crate::device::DeviceError;

/// The main error type for the render pipeline.
#[derive(Error, Debug)]
pub enum RenderError {
    // ========================================================================
    // Lifecycle Errors
    // ========================================================================
    /// A frame operation was invoked before `RenderSystem::initialize`.
    #[error("Render system is not initialized; call RenderSystem::initialize first")]
    NotInitialized,

    /// `RenderSystem::initialize` was called twice.
    #[error("Render system is already initialized")]
    AlreadyInitialized,

    /// Generic misuse of the API.
    #[error("Invalid operation: {0}")]
    InvalidOperation(String),

    // ========================================================================
    // Lookup Errors
    // ========================================================================
    /// Draw was requested for a view/stage pair that was never registered.
    #[error(
        "Requested render view {view} / render stage {stage} combination doesn't exist; add the stage to the view first"
    )]
    MissingRenderViewStage {
        /// Index of the view
        view: usize,
        /// Index of the render stage
        stage: usize,
    },

    /// A render object key did not resolve to a registered object.
    #[error("Unknown or removed render object")]
    UnknownRenderObject,

    // ========================================================================
    // Effect Errors
    // ========================================================================
    /// More distinct effect permutation slots were requested than supported.
    #[error("Only {max} effect permutation slots are currently allowed")]
    TooManyEffectPermutationSlots {
        /// The slot limit
        max: usize,
    },

    /// The effect compiler reported a failure and no fallback was available.
    #[error("Failed to compile effect '{effect}': {reason}")]
    EffectCompilation {
        /// Effect name
        effect: String,
        /// Compiler message
        reason: String,
    },

    // ========================================================================
    // Device Errors
    // ========================================================================
    /// Resource creation or upload failed on the graphics device.
    #[error("Graphics device error: {0}")]
    Device(#[from] DeviceError),
}

impl From<crate::effect::EffectCompileError> for RenderError {
    fn from(err: crate::effect::EffectCompileError) -> Self {
        Self::EffectCompilation {
            effect: err.effect,
            reason: err.reason,
        }
    }
}

/// Alias for `Result<T, RenderError>`.
pub type Result<T> = std::result::Result<T, RenderError>;
