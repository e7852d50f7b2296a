//! Render Stages
//!
//! A stage is a named rendering pass (main, transparent, shadow caster, ...)
//! with its output formats. Each stage maps to an effect permutation slot
//! through its effect slot name; stages sharing a slot name share compiled
//! effects.

/// Index of a registered render stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RenderStageId(pub(crate) usize);

impl RenderStageId {
    #[inline]
    #[must_use]
    pub const fn index(self) -> usize {
        self.0
    }
}

/// Render target formats of a stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RenderOutputDescription {
    pub render_target_format: Option<wgpu::TextureFormat>,
    pub depth_stencil_format: Option<wgpu::TextureFormat>,
    pub sample_count: u32,
}

impl RenderOutputDescription {
    #[must_use]
    pub const fn new(
        render_target_format: Option<wgpu::TextureFormat>,
        depth_stencil_format: Option<wgpu::TextureFormat>,
    ) -> Self {
        Self {
            render_target_format,
            depth_stencil_format,
            sample_count: 1,
        }
    }
}

impl Default for RenderOutputDescription {
    fn default() -> Self {
        Self::new(
            Some(wgpu::TextureFormat::Rgba8UnormSrgb),
            Some(wgpu::TextureFormat::Depth32Float),
        )
    }
}

/// Ordering applied to a stage's render nodes after prepare.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SortMode {
    /// Keep extraction order.
    #[default]
    None,
    /// Group by feature, then pipeline state.
    StateChange,
    /// Nearest first (opaque).
    FrontToBack,
    /// Farthest first (transparent).
    BackToFront,
}

#[derive(Debug, Clone)]
pub struct RenderStage {
    name: String,
    effect_slot_name: String,
    pub output: RenderOutputDescription,
    pub sort_mode: SortMode,
    pub(crate) index: usize,
}

impl RenderStage {
    /// A stage whose effect slot is named after the stage.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            effect_slot_name: name.clone(),
            name,
            output: RenderOutputDescription::default(),
            sort_mode: SortMode::None,
            index: usize::MAX,
        }
    }

    #[must_use]
    pub fn with_effect_slot(mut self, effect_slot_name: impl Into<String>) -> Self {
        self.effect_slot_name = effect_slot_name.into();
        self
    }

    #[must_use]
    pub fn with_output(mut self, output: RenderOutputDescription) -> Self {
        self.output = output;
        self
    }

    #[must_use]
    pub fn with_sort_mode(mut self, sort_mode: SortMode) -> Self {
        self.sort_mode = sort_mode;
        self
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn effect_slot_name(&self) -> &str {
        &self.effect_slot_name
    }

    #[must_use]
    pub fn id(&self) -> RenderStageId {
        RenderStageId(self.index)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn effect_slot_defaults_to_name() {
        let main = RenderStage::new("Main");
        let transparent = RenderStage::new("Transparent").with_effect_slot("Main");
        assert_eq!(main.effect_slot_name(), "Main");
        assert_eq!(transparent.effect_slot_name(), "Main");
        assert_eq!(transparent.name(), "Transparent");
    }
}
