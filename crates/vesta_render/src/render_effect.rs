//! Render Effects
//!
//! One [`RenderEffect`] exists per (static object node, effect permutation
//! slot). It survives across frames and is recompiled only when its
//! permutation changes.

use std::sync::Arc;

use vesta_core::FrameStamp;

use crate::device::PipelineStateHandle;
use crate::effect::{Effect, EffectTask, EffectValidator};
use crate::resources::ParameterCollection;

/// Compilation state of the effect currently in use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum RenderEffectState {
    /// The requested permutation is compiled and in use.
    #[default]
    Normal,
    /// A fallback is in use while the requested permutation compiles.
    Compiling,
    /// The requested permutation failed; a fallback is in use.
    Error,
}

/// Index of an instantiated effect reflection inside a feature.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ReflectionId(pub(crate) usize);

#[derive(Debug)]
pub struct RenderEffect {
    pub effect_name: Arc<str>,
    pub effect_validator: EffectValidator,
    pub state: RenderEffectState,
    pub effect: Option<Arc<Effect>>,
    /// Values bound to the extra resource groups of fallback effects.
    pub fallback_parameters: ParameterCollection,
    /// Cleared whenever `effect` changes.
    pub pipeline_state: Option<PipelineStateHandle>,
    pub(crate) reflection: Option<ReflectionId>,
    pub(crate) pending_effect: Option<EffectTask>,
    stamp: FrameStamp,
}

impl RenderEffect {
    #[must_use]
    pub fn new(effect_name: Arc<str>) -> Self {
        Self {
            effect_name,
            effect_validator: EffectValidator::new(),
            state: RenderEffectState::Normal,
            effect: None,
            fallback_parameters: ParameterCollection::new(),
            pipeline_state: None,
            reflection: None,
            pending_effect: None,
            stamp: FrameStamp::new(),
        }
    }

    /// Returns `true` on the first call of `frame`.
    #[inline]
    pub fn mark_as_used(&mut self, frame: u64) -> bool {
        self.stamp.mark_as_used(frame)
    }

    #[inline]
    #[must_use]
    pub fn is_used_during_this_frame(&self, frame: u64) -> bool {
        self.stamp.is_used_during_this_frame(frame)
    }

    #[must_use]
    pub fn reflection(&self) -> Option<ReflectionId> {
        self.reflection
    }

    #[must_use]
    pub fn is_compiling(&self) -> bool {
        self.pending_effect.is_some()
    }

    /// Drops values bound for a previous fallback effect.
    pub fn clear_fallback_parameters(&mut self) {
        self.fallback_parameters = ParameterCollection::new();
    }

    /// Installs a new effect and drops state derived from the previous one.
    pub(crate) fn set_effect(&mut self, effect: Option<Arc<Effect>>, state: RenderEffectState) {
        self.state = state;
        if let (Some(current), Some(next)) = (&self.effect, &effect)
            && Arc::ptr_eq(current, next)
        {
            return;
        }
        self.effect = effect;
        self.reflection = None;
        self.pipeline_state = None;
    }
}
