//! Per-frame nodes
//!
//! Features rebuild these arrays every frame during extraction. References are
//! plain indices: they are only meaningful between the reset that allocated
//! them and the next one.

use vesta_core::{RenderObjectKey, StaticObjectNode, node_reference};

use crate::stage::RenderStageId;
use crate::view::RenderViewId;

node_reference! {
    /// Index into a feature's object nodes.
    pub struct ObjectNodeReference;
}

node_reference! {
    /// Index into a feature's view-object nodes.
    pub struct ViewObjectNodeReference;
}

node_reference! {
    /// Index into a feature's render nodes.
    pub struct RenderNodeReference;
}

node_reference! {
    /// Index into a feature's effect-object nodes.
    pub struct EffectObjectNodeReference;
}

/// Effect permutation slot of a feature.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EffectPermutationSlot(pub(crate) usize);

impl EffectPermutationSlot {
    #[inline]
    #[must_use]
    pub const fn index(self) -> usize {
        self.0
    }
}

/// Render effect of a (static object, permutation slot) pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RenderEffectReference {
    pub static_node: StaticObjectNode,
    pub slot: EffectPermutationSlot,
}

/// One per render object per frame.
#[derive(Debug, Clone, Copy)]
pub struct ObjectNode {
    pub render_object: RenderObjectKey,
}

/// One per (view, render object) pair that passed culling.
#[derive(Debug, Clone, Copy)]
pub struct ViewObjectNode {
    pub render_object: RenderObjectKey,
    pub render_view: RenderViewId,
    pub object_node: ObjectNodeReference,
}

/// One per (view, stage, render object) triple that will be drawn.
#[derive(Debug, Clone, Copy)]
pub struct RenderNode {
    pub render_object: RenderObjectKey,
    pub render_view: RenderViewId,
    pub view_object_node: ViewObjectNodeReference,
    pub render_stage: RenderStageId,
    pub render_effect: Option<RenderEffectReference>,
    pub effect_object_node: EffectObjectNodeReference,
}

/// One per render node whose effect is ready this frame.
#[derive(Debug, Clone, Copy)]
pub struct EffectObjectNode {
    pub object_node: ObjectNodeReference,
    pub render_effect: RenderEffectReference,
}

/// Entry of a view stage's node list: which feature owns which node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RenderNodeFeatureReference {
    pub root_render_feature: usize,
    pub render_node: RenderNodeReference,
    pub render_object: RenderObjectKey,
}
