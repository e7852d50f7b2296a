//! Effect-driven root feature
//!
//! [`RootEffectRenderFeature`] holds everything a feature needs to draw with
//! effects:
//!
//! - **Descriptor-set slots**: named resource groups ("PerFrame", "PerView",
//!   "PerDraw", plus whatever sub-features or effects add). Slot `i` is bound
//!   at descriptor-set index `i`.
//! - **Effect permutation slots**: one per distinct stage effect slot name;
//!   every static object owns at most one [`RenderEffect`] per slot.
//! - **Constant offset slots**: named constants whose byte offsets are
//!   resolved against every layout, present and future.
//! - **Layout caches**: PerFrame/PerView layouts shared by structurally
//!   identical effects, descriptor-set layouts and pipeline states
//!   deduplicated by content hash.
//! - **Resource group pool**: a flat array indexed by
//!   `render_node * slot_count + slot`, rebuilt every frame.
//!
//! Owning features call the phases in order: [`begin_effect_permutations`],
//! let their sub-features validate, [`compile_effect_permutations`], then
//! [`prepare`].
//!
//! [`begin_effect_permutations`]: RootEffectRenderFeature::begin_effect_permutations
//! [`compile_effect_permutations`]: RootEffectRenderFeature::compile_effect_permutations
//! [`prepare`]: RootEffectRenderFeature::prepare

use std::sync::Arc;

use rustc_hash::FxHashMap;
use slotmap::SecondaryMap;
use smallvec::SmallVec;
use vesta_core::{ObjectId, RenderObjectKey, StaticObjectNode};

use super::RenderFeatureCore;
use super::pipeline_state::{PipelineStateCache, PipelineStateDescription};
use crate::device::{DescriptorSetLayoutHandle, GraphicsDevice, RootSignatureHandle};
use crate::effect::{
    DescriptorSetLayoutBuilder, Effect, EffectCompileError, EffectCompiler,
    EffectDescriptorSetReflection, EffectTaskStatus,
};
use crate::errors::{RenderError, Result};
use crate::nodes::{
    EffectObjectNode, EffectObjectNodeReference, EffectPermutationSlot, RenderEffectReference,
    RenderNode, RenderNodeReference,
};
use crate::object::{ActiveRenderStage, RenderObject};
use crate::render_effect::{ReflectionId, RenderEffect, RenderEffectState};
use crate::resources::{
    BufferPoolAllocationType, ConstantBufferOffsetReference, FrameLayoutId,
    FrameResourceGroupLayout, ResourceGroup, ResourceGroupEntry, ResourceGroupLayout,
    ViewLayoutId, ViewResourceGroupLayout,
};
use crate::stage::{RenderStage, RenderStageId};
use crate::system::RenderContext;

/// Upper bound on distinct effect permutation slots per feature.
pub const MAX_EFFECT_PERMUTATION_SLOTS: usize = 32;

const PER_FRAME: &str = "PerFrame";
const PER_VIEW: &str = "PerView";
const PER_DRAW: &str = "PerDraw";

const PER_FRAME_SLOT: usize = 0;
const PER_VIEW_SLOT: usize = 1;
const PER_DRAW_SLOT: usize = 2;

/// Descriptor-set slot of a feature; also the descriptor-set bind index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EffectDescriptorSetSlot(pub(crate) usize);

impl EffectDescriptorSetSlot {
    #[inline]
    #[must_use]
    pub const fn index(self) -> usize {
        self.0
    }
}

/// Supplies a replacement effect while the real one is compiling
/// ([`RenderEffectState::Compiling`]) or after it failed
/// ([`RenderEffectState::Error`]).
pub type ComputeFallbackEffect =
    Box<dyn Fn(&RenderObject, &RenderEffect, RenderEffectState) -> Option<Arc<Effect>> + Send>;

/// Notified once per newly instantiated effect.
pub type EffectCompiledCallback = Box<dyn FnMut(&Effect, &RenderEffectReflection) + Send>;

/// Last chance to adjust a pipeline description before creation.
pub type PostProcessPipelineState =
    Box<dyn Fn(&RenderNode, &RenderObject, &RenderStage, &mut PipelineStateDescription) + Send>;

/// Device objects and layouts derived from one compiled effect.
#[derive(Debug)]
pub struct RenderEffectReflection {
    pub effect_bytecode: ObjectId,
    pub descriptor_reflection: EffectDescriptorSetReflection,
    /// Indexed by descriptor-set slot; `None` for slots the effect ignores.
    pub descriptor_set_layouts: Vec<Option<DescriptorSetLayoutHandle>>,
    pub root_signature: RootSignatureHandle,
    pub per_draw_layout: Option<ResourceGroupLayout>,
    pub per_frame_layout: Option<FrameLayoutId>,
    pub per_view_layout: Option<ViewLayoutId>,
    /// Layouts of every other slot (PerMaterial, ...).
    pub extra_layouts: Vec<(EffectDescriptorSetSlot, ResourceGroupLayout)>,
}

impl RenderEffectReflection {
    #[must_use]
    pub fn extra_layout(&self, slot: EffectDescriptorSetSlot) -> Option<&ResourceGroupLayout> {
        self.extra_layouts
            .iter()
            .find(|(s, _)| *s == slot)
            .map(|(_, layout)| layout)
    }
}

pub struct RootEffectRenderFeature {
    name: String,
    core: RenderFeatureCore,
    initial_pool_size: usize,

    effect_descriptor_set_slots: Vec<String>,
    effect_permutation_slots: FxHashMap<String, EffectPermutationSlot>,
    stage_effect_slots: Vec<Option<EffectPermutationSlot>>,

    frame_cbuffer_offset_slots: Vec<String>,
    view_cbuffer_offset_slots: Vec<String>,
    draw_cbuffer_offset_slots: Vec<String>,

    render_effects: SecondaryMap<StaticObjectNode, SmallVec<[Option<RenderEffect>; 4]>>,
    instantiated_effects: FxHashMap<ObjectId, ReflectionId>,
    reflections: Vec<RenderEffectReflection>,

    frame_layouts: Vec<FrameResourceGroupLayout>,
    frame_layout_cache: FxHashMap<ObjectId, FrameLayoutId>,
    view_layouts: Vec<ViewResourceGroupLayout>,
    view_layout_cache: FxHashMap<ObjectId, ViewLayoutId>,
    descriptor_set_layout_cache: FxHashMap<ObjectId, DescriptorSetLayoutHandle>,
    pipeline_states: PipelineStateCache,

    frame_layouts_used: Vec<FrameLayoutId>,
    effect_object_nodes: Vec<EffectObjectNode>,
    resource_group_pool: Vec<Option<ResourceGroup>>,

    pub compute_fallback_effect: Option<ComputeFallbackEffect>,
    pub effect_compiled: Option<EffectCompiledCallback>,
    pub post_process_pipeline_state: Option<PostProcessPipelineState>,
}

impl RootEffectRenderFeature {
    /// Creates the feature with its "PerFrame", "PerView" and "PerDraw" slots.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            core: RenderFeatureCore::new(),
            initial_pool_size: 0,
            effect_descriptor_set_slots: vec![PER_FRAME.to_owned(), PER_VIEW.to_owned(), PER_DRAW.to_owned()],
            effect_permutation_slots: FxHashMap::default(),
            stage_effect_slots: Vec::new(),
            frame_cbuffer_offset_slots: Vec::new(),
            view_cbuffer_offset_slots: Vec::new(),
            draw_cbuffer_offset_slots: Vec::new(),
            render_effects: SecondaryMap::new(),
            instantiated_effects: FxHashMap::default(),
            reflections: Vec::new(),
            frame_layouts: Vec::new(),
            frame_layout_cache: FxHashMap::default(),
            view_layouts: Vec::new(),
            view_layout_cache: FxHashMap::default(),
            descriptor_set_layout_cache: FxHashMap::default(),
            pipeline_states: PipelineStateCache::new(),
            frame_layouts_used: Vec::new(),
            effect_object_nodes: Vec::new(),
            resource_group_pool: Vec::new(),
            compute_fallback_effect: None,
            effect_compiled: None,
            post_process_pipeline_state: None,
        }
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[inline]
    #[must_use]
    pub fn core(&self) -> &RenderFeatureCore {
        &self.core
    }

    #[inline]
    pub fn core_mut(&mut self) -> &mut RenderFeatureCore {
        &mut self.core
    }

    pub fn initialize(&mut self, ctx: &RenderContext) -> Result<()> {
        self.initial_pool_size = ctx.config.initial_resource_group_pool_size;
        for stage in &ctx.render_stages {
            self.on_render_stage_added(stage)?;
        }
        log::debug!(
            "Initialized '{}' with {} render stages",
            self.name,
            ctx.render_stages.len()
        );
        Ok(())
    }

    // ── Slots ────────────────────────────────────────────────────────────────

    /// Idempotent by name.
    pub fn get_or_create_effect_descriptor_set_slot(&mut self, name: &str) -> EffectDescriptorSetSlot {
        if let Some(index) = self.effect_descriptor_set_slots.iter().position(|s| s == name) {
            return EffectDescriptorSetSlot(index);
        }
        self.effect_descriptor_set_slots.push(name.to_owned());
        EffectDescriptorSetSlot(self.effect_descriptor_set_slots.len() - 1)
    }

    #[must_use]
    pub fn effect_descriptor_set_slots(&self) -> &[String] {
        &self.effect_descriptor_set_slots
    }

    #[inline]
    #[must_use]
    pub fn descriptor_set_slot_count(&self) -> usize {
        self.effect_descriptor_set_slots.len()
    }

    #[must_use]
    pub const fn per_frame_slot(&self) -> EffectDescriptorSetSlot {
        EffectDescriptorSetSlot(PER_FRAME_SLOT)
    }

    #[must_use]
    pub const fn per_view_slot(&self) -> EffectDescriptorSetSlot {
        EffectDescriptorSetSlot(PER_VIEW_SLOT)
    }

    #[must_use]
    pub const fn per_draw_slot(&self) -> EffectDescriptorSetSlot {
        EffectDescriptorSetSlot(PER_DRAW_SLOT)
    }

    /// Idempotent by name; fails once [`MAX_EFFECT_PERMUTATION_SLOTS`] distinct
    /// names exist.
    pub fn create_effect_permutation_slot(&mut self, name: &str) -> Result<EffectPermutationSlot> {
        if let Some(&slot) = self.effect_permutation_slots.get(name) {
            return Ok(slot);
        }
        if self.effect_permutation_slots.len() >= MAX_EFFECT_PERMUTATION_SLOTS {
            return Err(RenderError::TooManyEffectPermutationSlots {
                max: MAX_EFFECT_PERMUTATION_SLOTS,
            });
        }
        let slot = EffectPermutationSlot(self.effect_permutation_slots.len());
        self.effect_permutation_slots.insert(name.to_owned(), slot);
        Ok(slot)
    }

    #[must_use]
    pub fn effect_permutation_slot_count(&self) -> usize {
        self.effect_permutation_slots.len()
    }

    pub fn on_render_stage_added(&mut self, stage: &RenderStage) -> Result<()> {
        let slot = self.create_effect_permutation_slot(stage.effect_slot_name())?;
        let index = stage.id().index();
        if self.stage_effect_slots.len() <= index {
            self.stage_effect_slots.resize(index + 1, None);
        }
        self.stage_effect_slots[index] = Some(slot);
        Ok(())
    }

    #[must_use]
    pub fn effect_permutation_slot(&self, stage: RenderStageId) -> Option<EffectPermutationSlot> {
        self.stage_effect_slots.get(stage.index()).copied().flatten()
    }

    pub fn create_frame_cbuffer_offset_slot(&mut self, name: &str) -> ConstantBufferOffsetReference {
        let (reference, added) = register_offset_slot(&mut self.frame_cbuffer_offset_slots, name);
        if added {
            for frame_layout in &mut self.frame_layouts {
                frame_layout
                    .layout
                    .resolve_constant_buffer_offsets(&self.frame_cbuffer_offset_slots);
            }
        }
        reference
    }

    pub fn create_view_cbuffer_offset_slot(&mut self, name: &str) -> ConstantBufferOffsetReference {
        let (reference, added) = register_offset_slot(&mut self.view_cbuffer_offset_slots, name);
        if added {
            for view_layout in &mut self.view_layouts {
                view_layout
                    .layout
                    .resolve_constant_buffer_offsets(&self.view_cbuffer_offset_slots);
            }
        }
        reference
    }

    pub fn create_draw_cbuffer_offset_slot(&mut self, name: &str) -> ConstantBufferOffsetReference {
        let (reference, added) = register_offset_slot(&mut self.draw_cbuffer_offset_slots, name);
        if added {
            for reflection in &mut self.reflections {
                if let Some(layout) = &mut reflection.per_draw_layout {
                    layout.resolve_constant_buffer_offsets(&self.draw_cbuffer_offset_slots);
                }
            }
        }
        reference
    }

    // ── Objects ──────────────────────────────────────────────────────────────

    pub fn add_render_object(&mut self, key: RenderObjectKey, object: &mut RenderObject) {
        self.core.add_render_object(key, object);
    }

    /// Releases the static node and every render effect of the object.
    pub fn remove_render_object(&mut self, object: &mut RenderObject) {
        if let Some(node) = self.core.remove_render_object(object) {
            self.render_effects.remove(node);
        }
    }

    pub fn reset(&mut self) {
        self.core.reset();
        self.frame_layouts_used.clear();
        self.effect_object_nodes.clear();
    }

    // ── Lookups ──────────────────────────────────────────────────────────────

    #[must_use]
    pub fn render_effect(&self, reference: RenderEffectReference) -> Option<&RenderEffect> {
        self.render_effects
            .get(reference.static_node)?
            .get(reference.slot.index())?
            .as_ref()
    }

    pub fn render_effect_mut(&mut self, reference: RenderEffectReference) -> Option<&mut RenderEffect> {
        self.render_effects
            .get_mut(reference.static_node)?
            .get_mut(reference.slot.index())?
            .as_mut()
    }

    /// Every render effect of a static object.
    pub fn render_effects_mut(&mut self, node: StaticObjectNode) -> impl Iterator<Item = &mut RenderEffect> {
        self.render_effects
            .get_mut(node)
            .into_iter()
            .flat_map(|effects| effects.iter_mut().flatten())
    }

    /// Calls `f` for every render effect used during `frame`, with its owner.
    pub fn for_each_used_render_effect(
        &mut self,
        frame: u64,
        mut f: impl FnMut(StaticObjectNode, RenderObjectKey, &mut RenderEffect),
    ) {
        for (static_node, effects) in &mut self.render_effects {
            let Some(&key) = self.core.static_objects.get(static_node) else {
                continue;
            };
            for effect in effects.iter_mut().flatten() {
                if effect.is_used_during_this_frame(frame) {
                    f(static_node, key, effect);
                }
            }
        }
    }

    #[must_use]
    pub fn reflection(&self, id: ReflectionId) -> Option<&RenderEffectReflection> {
        self.reflections.get(id.0)
    }

    /// Effect and reflection of a render node, when compiled.
    #[must_use]
    pub fn render_node_effect(&self, node: &RenderNode) -> Option<(&RenderEffect, &RenderEffectReflection)> {
        let effect = self.render_effect(node.render_effect?)?;
        let reflection = self.reflection(effect.reflection?)?;
        Some((effect, reflection))
    }

    /// Reflection of the effect `object` uses in `stage`, when compiled.
    #[must_use]
    pub fn render_effect_reflection(
        &self,
        object: &RenderObject,
        stage: RenderStageId,
    ) -> Option<&RenderEffectReflection> {
        let reference = RenderEffectReference {
            static_node: object.static_object_node()?,
            slot: self.effect_permutation_slot(stage)?,
        };
        self.reflection(self.render_effect(reference)?.reflection?)
    }

    #[must_use]
    pub fn frame_layout(&self, id: FrameLayoutId) -> &FrameResourceGroupLayout {
        &self.frame_layouts[id.0]
    }

    #[must_use]
    pub fn view_layout(&self, id: ViewLayoutId) -> &ViewResourceGroupLayout {
        &self.view_layouts[id.0]
    }

    /// PerFrame layouts allocated this frame.
    #[must_use]
    pub fn frame_layouts_used(&self) -> &[FrameLayoutId] {
        &self.frame_layouts_used
    }

    #[must_use]
    pub fn view_layout_count(&self) -> usize {
        self.view_layouts.len()
    }

    #[must_use]
    pub fn instantiated_effect_count(&self) -> usize {
        self.reflections.len()
    }

    #[must_use]
    pub fn pipeline_state_count(&self) -> usize {
        self.pipeline_states.len()
    }

    #[must_use]
    pub fn effect_object_nodes(&self) -> &[EffectObjectNode] {
        &self.effect_object_nodes
    }

    #[inline]
    #[must_use]
    pub fn compute_resource_group_offset(&self, node: RenderNodeReference) -> usize {
        node.index() * self.effect_descriptor_set_slots.len()
    }

    #[must_use]
    pub fn resource_group(&self, node: RenderNodeReference, slot: EffectDescriptorSetSlot) -> Option<&ResourceGroup> {
        self.resource_group_pool
            .get(self.compute_resource_group_offset(node) + slot.0)?
            .as_ref()
    }

    pub fn set_resource_group(&mut self, node: RenderNodeReference, slot: EffectDescriptorSetSlot, group: ResourceGroup) {
        let offset = self.compute_resource_group_offset(node) + slot.0;
        if let Some(entry) = self.resource_group_pool.get_mut(offset) {
            *entry = Some(group);
        }
    }

    #[must_use]
    pub fn resource_group_pool(&self) -> &[Option<ResourceGroup>] {
        &self.resource_group_pool
    }

    // ── Effect permutations ──────────────────────────────────────────────────

    /// Fetches or creates the render effect of every render node and opens
    /// validation on its first use this frame.
    pub fn begin_effect_permutations(&mut self, ctx: &RenderContext) {
        let frame = ctx.frame_counter;
        for node in &mut self.core.render_nodes {
            let Some(object) = ctx.render_objects.get(node.render_object) else {
                continue;
            };
            let Some(static_node) = object.static_object_node() else {
                continue;
            };
            let stage = node.render_stage.index();
            let Some(slot) = self.stage_effect_slots.get(stage).copied().flatten() else {
                continue;
            };
            let Some(effect_name) = object
                .active_render_stages
                .get(stage)
                .and_then(ActiveRenderStage::effect_name)
            else {
                continue;
            };
            let Some(effects) = self.render_effects.entry(static_node).map(|e| e.or_default()) else {
                continue;
            };

            if effects.len() <= slot.index() {
                effects.resize_with(slot.index() + 1, || None);
            }
            let entry = &mut effects[slot.index()];
            if entry.as_ref().is_none_or(|e| e.effect_name != *effect_name) {
                *entry = Some(RenderEffect::new(effect_name.clone()));
            }
            if let Some(effect) = entry
                && effect.mark_as_used(frame)
            {
                effect.effect_validator.begin_effect_validation();
            }

            node.render_effect = Some(RenderEffectReference { static_node, slot });
        }
    }

    /// Closes validation of every used effect, (re)compiles the changed ones
    /// and instantiates reflections for newly seen effects.
    pub fn compile_effect_permutations(&mut self, ctx: &mut RenderContext) -> Result<()> {
        let compiler = ctx.effect_compiler.clone().ok_or(RenderError::NotInitialized)?;
        let mut render_effects = std::mem::take(&mut self.render_effects);
        let result = self.compile_render_effects(&mut render_effects, ctx, compiler.as_ref());
        self.render_effects = render_effects;
        result
    }

    fn compile_render_effects(
        &mut self,
        render_effects: &mut SecondaryMap<StaticObjectNode, SmallVec<[Option<RenderEffect>; 4]>>,
        ctx: &mut RenderContext,
        compiler: &dyn EffectCompiler,
    ) -> Result<()> {
        let frame = ctx.frame_counter;
        for (static_node, effects) in render_effects.iter_mut() {
            let object = self
                .core
                .static_objects
                .get(static_node)
                .and_then(|&key| ctx.render_objects.get(key));

            for effect in effects.iter_mut().flatten() {
                if !effect.is_used_during_this_frame(frame) {
                    continue;
                }

                let unchanged = effect.effect_validator.end_effect_validation();
                if unchanged && effect.effect.is_some() {
                    self.poll_pending_effect(effect, object)?;
                } else {
                    self.compile_render_effect(effect, object, compiler)?;
                }

                if effect.reflection.is_none()
                    && let Some(compiled) = effect.effect.clone()
                {
                    let device = ctx.device.as_deref_mut().ok_or(RenderError::NotInitialized)?;
                    effect.reflection = Some(self.instantiate_effect(device, &compiled)?);
                }
            }
        }
        Ok(())
    }

    fn compile_render_effect(
        &self,
        effect: &mut RenderEffect,
        object: Option<&RenderObject>,
        compiler: &dyn EffectCompiler,
    ) -> Result<()> {
        let parameters = effect.effect_validator.compiler_parameters();
        log::debug!(
            "Compiling effect '{}' with {} permutation parameters",
            effect.effect_name,
            parameters.len()
        );

        let task = compiler.load_effect(&effect.effect_name, &parameters);
        effect.pending_effect = None;
        effect.clear_fallback_parameters();

        match task.poll() {
            EffectTaskStatus::Completed(compiled) => {
                effect.set_effect(Some(compiled), RenderEffectState::Normal);
                Ok(())
            }
            EffectTaskStatus::Faulted(err) => self.fail_or_fallback(effect, object, err),
            EffectTaskStatus::Pending => {
                if let Some(fallback) = self.fallback_effect(object, effect, RenderEffectState::Compiling) {
                    effect.set_effect(Some(fallback), RenderEffectState::Compiling);
                    effect.pending_effect = Some(task);
                    return Ok(());
                }
                match task.wait() {
                    Ok(compiled) => {
                        effect.set_effect(Some(compiled), RenderEffectState::Normal);
                        Ok(())
                    }
                    Err(err) => self.fail_or_fallback(effect, object, err),
                }
            }
        }
    }

    fn poll_pending_effect(&self, effect: &mut RenderEffect, object: Option<&RenderObject>) -> Result<()> {
        let status = match &effect.pending_effect {
            Some(task) => task.poll(),
            None => return Ok(()),
        };
        match status {
            EffectTaskStatus::Pending => Ok(()),
            EffectTaskStatus::Completed(compiled) => {
                log::debug!("Effect '{}' finished compiling", effect.effect_name);
                effect.pending_effect = None;
                effect.set_effect(Some(compiled), RenderEffectState::Normal);
                Ok(())
            }
            EffectTaskStatus::Faulted(err) => {
                effect.pending_effect = None;
                self.fail_or_fallback(effect, object, err)
            }
        }
    }

    fn fallback_effect(
        &self,
        object: Option<&RenderObject>,
        effect: &RenderEffect,
        state: RenderEffectState,
    ) -> Option<Arc<Effect>> {
        let compute = self.compute_fallback_effect.as_ref()?;
        compute(object?, effect, state)
    }

    fn fail_or_fallback(
        &self,
        effect: &mut RenderEffect,
        object: Option<&RenderObject>,
        err: EffectCompileError,
    ) -> Result<()> {
        log::error!("Effect '{}' failed to compile: {}", effect.effect_name, err.reason);
        effect.clear_fallback_parameters();
        match self.fallback_effect(object, effect, RenderEffectState::Error) {
            Some(fallback) => {
                effect.set_effect(Some(fallback), RenderEffectState::Error);
                Ok(())
            }
            None => Err(err.into()),
        }
    }

    fn instantiate_effect(
        &mut self,
        device: &mut dyn GraphicsDevice,
        effect: &Arc<Effect>,
    ) -> Result<ReflectionId> {
        let bytecode_id = effect.bytecode().id;
        if let Some(&id) = self.instantiated_effects.get(&bytecode_id) {
            return Ok(id);
        }

        let descriptor_reflection = EffectDescriptorSetReflection::new(
            effect.reflection(),
            &self.effect_descriptor_set_slots,
            PER_FRAME,
        );

        let known_slots = self.effect_descriptor_set_slots.len();
        for layout in &descriptor_reflection.layouts()[known_slots..] {
            let slot = self.get_or_create_effect_descriptor_set_slot(&layout.name);
            log::debug!(
                "Effect '{}' declares resource group '{}', assigned to descriptor slot {}",
                effect.name(),
                layout.name,
                slot.0
            );
        }

        let mut descriptor_set_layouts = Vec::with_capacity(descriptor_reflection.layouts().len());
        for layout in descriptor_reflection.layouts() {
            let handle = match &layout.layout {
                Some(builder) => Some(self.create_unique_descriptor_set_layout(device, builder)?),
                None => None,
            };
            descriptor_set_layouts.push(handle);
        }
        let root_signature = device.create_root_signature(&descriptor_set_layouts)?;

        let layout_for = |slot: usize| -> Option<ResourceGroupLayout> {
            let entry = descriptor_reflection.layouts().get(slot)?;
            Some(ResourceGroupLayout::new(
                entry.name.clone(),
                entry.layout.clone()?,
                (*descriptor_set_layouts.get(slot)?)?,
                effect.reflection().constant_buffer(&entry.name).cloned(),
            ))
        };

        let mut per_draw_layout = layout_for(PER_DRAW_SLOT);
        if let Some(layout) = &mut per_draw_layout {
            layout.resolve_constant_buffer_offsets(&self.draw_cbuffer_offset_slots);
        }
        let per_frame_layout = layout_for(PER_FRAME_SLOT).map(|layout| self.frame_layout_id(layout));
        let per_view_layout = layout_for(PER_VIEW_SLOT).map(|layout| self.view_layout_id(layout));
        let extra_layouts = (0..descriptor_reflection.layouts().len())
            .filter(|slot| ![PER_FRAME_SLOT, PER_VIEW_SLOT, PER_DRAW_SLOT].contains(slot))
            .filter_map(|slot| Some((EffectDescriptorSetSlot(slot), layout_for(slot)?)))
            .collect();

        let reflection = RenderEffectReflection {
            effect_bytecode: bytecode_id,
            descriptor_reflection,
            descriptor_set_layouts,
            root_signature,
            per_draw_layout,
            per_frame_layout,
            per_view_layout,
            extra_layouts,
        };

        if let Some(callback) = &mut self.effect_compiled {
            callback(effect, &reflection);
        }

        let id = ReflectionId(self.reflections.len());
        self.reflections.push(reflection);
        self.instantiated_effects.insert(bytecode_id, id);
        log::debug!("Instantiated effect '{}' ({bytecode_id})", effect.name());
        Ok(id)
    }

    /// Device descriptor-set layouts, deduplicated by builder hash.
    pub fn create_unique_descriptor_set_layout(
        &mut self,
        device: &mut dyn GraphicsDevice,
        builder: &DescriptorSetLayoutBuilder,
    ) -> Result<DescriptorSetLayoutHandle> {
        let hash = builder.hash();
        if let Some(&handle) = self.descriptor_set_layout_cache.get(&hash) {
            return Ok(handle);
        }
        let handle = device.create_descriptor_set_layout(builder)?;
        self.descriptor_set_layout_cache.insert(hash, handle);
        Ok(handle)
    }

    fn frame_layout_id(&mut self, mut layout: ResourceGroupLayout) -> FrameLayoutId {
        let hash = layout.hash();
        if let Some(&id) = self.frame_layout_cache.get(&hash) {
            return id;
        }
        layout.resolve_constant_buffer_offsets(&self.frame_cbuffer_offset_slots);
        let id = FrameLayoutId(self.frame_layouts.len());
        self.frame_layouts.push(FrameResourceGroupLayout {
            layout,
            entry: ResourceGroupEntry::default(),
        });
        self.frame_layout_cache.insert(hash, id);
        log::debug!("Created PerFrame layout {} ({hash})", id.0);
        id
    }

    fn view_layout_id(&mut self, mut layout: ResourceGroupLayout) -> ViewLayoutId {
        let hash = layout.hash();
        if let Some(&id) = self.view_layout_cache.get(&hash) {
            return id;
        }
        layout.resolve_constant_buffer_offsets(&self.view_cbuffer_offset_slots);
        let id = ViewLayoutId(self.view_layouts.len());
        self.view_layouts.push(ViewResourceGroupLayout {
            layout,
            entries: Vec::new(),
        });
        self.view_layout_cache.insert(hash, id);
        log::debug!("Created PerView layout {} ({hash})", id.0);
        id
    }

    // ── Prepare ──────────────────────────────────────────────────────────────

    /// Allocates and binds the resource groups of every render node with a
    /// compiled effect, then builds missing pipeline states.
    ///
    /// `process_pipeline_state` fills the feature-specific part of the
    /// description (vertex input, topology, raster state).
    pub fn prepare(
        &mut self,
        ctx: &mut RenderContext,
        process_pipeline_state: impl Fn(&RenderNode, &RenderObject, &mut PipelineStateDescription),
    ) -> Result<()> {
        self.effect_object_nodes.clear();

        let slot_count = self.effect_descriptor_set_slots.len();
        let required = self.core.render_nodes.len() * slot_count;
        if self.resource_group_pool.len() < required {
            let new_len = required
                .max(self.resource_group_pool.len() * 2)
                .max(self.initial_pool_size);
            log::info!(
                "Growing resource group pool of '{}' from {} to {new_len} entries",
                self.name,
                self.resource_group_pool.len()
            );
            self.resource_group_pool.resize(new_len, None);
        }
        self.resource_group_pool[..required].fill(None);

        let frame = ctx.frame_counter;
        let view_count = ctx.views.len();
        let feature_index = self.core.index();
        let RenderContext {
            views,
            render_objects,
            render_stages,
            frame_resources,
            device,
            ..
        } = ctx;
        let device = device.as_deref_mut().ok_or(RenderError::NotInitialized)?;

        for view in views.iter_mut() {
            let view_index = view.id().index();
            let Some(view_feature) = view.features.get_mut(feature_index) else {
                continue;
            };

            for position in 0..view_feature.render_nodes.len() {
                let node_reference = view_feature.render_nodes[position];
                let node = self.core.render_nodes[node_reference.index()];
                let Some(effect_reference) = node.render_effect else {
                    continue;
                };
                let Some(render_effect) = self
                    .render_effects
                    .get_mut(effect_reference.static_node)
                    .and_then(|effects| effects.get_mut(effect_reference.slot.index()))
                    .and_then(Option::as_mut)
                else {
                    continue;
                };
                let (Some(reflection_id), Some(effect)) = (render_effect.reflection, render_effect.effect.as_ref())
                else {
                    continue;
                };
                let reflection = &self.reflections[reflection_id.0];
                let offset = node_reference.index() * slot_count;

                if let Some(layout_id) = reflection.per_view_layout {
                    let ViewResourceGroupLayout { layout, entries } = &mut self.view_layouts[layout_id.0];
                    if entries.len() < view_count {
                        entries.resize_with(view_count, ResourceGroupEntry::default);
                    }
                    let entry = &mut entries[view_index];
                    if entry.mark_as_used(frame) {
                        entry.resources = Some(
                            frame_resources.prepare_resource_group(layout, BufferPoolAllocationType::UsedMultipleTime),
                        );
                        view_feature.layouts.push(layout_id);
                    }
                    self.resource_group_pool[offset + PER_VIEW_SLOT] = entry.resources;
                }

                if let Some(layout_id) = reflection.per_frame_layout {
                    let FrameResourceGroupLayout { layout, entry } = &mut self.frame_layouts[layout_id.0];
                    if entry.mark_as_used(frame) {
                        entry.resources = Some(
                            frame_resources.prepare_resource_group(layout, BufferPoolAllocationType::UsedMultipleTime),
                        );
                        self.frame_layouts_used.push(layout_id);
                    }
                    self.resource_group_pool[offset + PER_FRAME_SLOT] = entry.resources;
                }

                if let Some(layout) = &reflection.per_draw_layout {
                    self.resource_group_pool[offset + PER_DRAW_SLOT] =
                        Some(frame_resources.prepare_resource_group(layout, BufferPoolAllocationType::UsedOnce));
                }

                if render_effect.state != RenderEffectState::Normal {
                    for (slot, layout) in &reflection.extra_layouts {
                        let group = frame_resources.prepare_resource_group_from_parameters(
                            layout,
                            BufferPoolAllocationType::UsedOnce,
                            &mut render_effect.fallback_parameters,
                        );
                        self.resource_group_pool[offset + slot.0] = Some(group);
                    }
                }

                if render_effect.pipeline_state.is_none() {
                    let Some(object) = render_objects.get(node.render_object) else {
                        continue;
                    };
                    let render_stage = &render_stages[node.render_stage.index()];
                    let mut desc = PipelineStateDescription::new(
                        effect.bytecode().id,
                        reflection.root_signature,
                        render_stage.output,
                    );
                    process_pipeline_state(&node, object, &mut desc);
                    if let Some(post_process) = &self.post_process_pipeline_state {
                        post_process(&node, object, render_stage, &mut desc);
                    }
                    render_effect.pipeline_state = Some(self.pipeline_states.get_or_create(device, &desc)?);
                }

                let effect_object_node = EffectObjectNodeReference::new(self.effect_object_nodes.len());
                self.effect_object_nodes.push(EffectObjectNode {
                    object_node: self.core.render_node_object_node(&node),
                    render_effect: effect_reference,
                });
                self.core.render_nodes[node_reference.index()].effect_object_node = effect_object_node;
            }
        }

        log::trace!(
            "'{}' prepared {} of {} render nodes",
            self.name,
            self.effect_object_nodes.len(),
            self.core.render_nodes.len()
        );
        Ok(())
    }
}

fn register_offset_slot(slots: &mut Vec<String>, name: &str) -> (ConstantBufferOffsetReference, bool) {
    if let Some(index) = slots.iter().position(|s| s == name) {
        return (ConstantBufferOffsetReference(index), false);
    }
    slots.push(name.to_owned());
    (ConstantBufferOffsetReference(slots.len() - 1), true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stage::RenderStage;

    #[test]
    fn descriptor_set_slots_are_idempotent() {
        let mut root = RootEffectRenderFeature::new("Test");
        let a = root.get_or_create_effect_descriptor_set_slot("PerMaterial");
        let b = root.get_or_create_effect_descriptor_set_slot("PerMaterial");
        assert_eq!(a, b);
        assert_eq!(a.index(), 3);
        assert_eq!(root.get_or_create_effect_descriptor_set_slot("PerDraw"), root.per_draw_slot());
        assert_eq!(root.descriptor_set_slot_count(), 4);
    }

    #[test]
    fn permutation_slots_are_capped() {
        let mut root = RootEffectRenderFeature::new("Test");
        for i in 0..MAX_EFFECT_PERMUTATION_SLOTS {
            root.create_effect_permutation_slot(&format!("Slot{i}")).unwrap();
        }
        assert!(root.create_effect_permutation_slot("Slot0").is_ok());
        assert!(matches!(
            root.create_effect_permutation_slot("OneTooMany"),
            Err(RenderError::TooManyEffectPermutationSlots { max: 32 })
        ));
    }

    #[test]
    fn stages_sharing_a_slot_name_share_a_permutation_slot() {
        let mut root = RootEffectRenderFeature::new("Test");
        let mut main = RenderStage::new("Main");
        main.index = 0;
        let mut transparent = RenderStage::new("Transparent").with_effect_slot("Main");
        transparent.index = 1;
        root.on_render_stage_added(&main).unwrap();
        root.on_render_stage_added(&transparent).unwrap();

        assert_eq!(
            root.effect_permutation_slot(main.id()),
            root.effect_permutation_slot(transparent.id())
        );
        assert_eq!(root.effect_permutation_slot_count(), 1);
    }

    fn custom_object() -> RenderObject {
        RenderObject::new(crate::object::RenderObjectKind::Custom(crate::object::CustomRenderObject {
            type_name: "Test",
            world: glam::Mat4::IDENTITY,
            data: Box::new(()),
        }))
    }

    fn fallback_effect() -> Arc<Effect> {
        let compiler = crate::effect::PrecompiledEffectCompiler::new();
        compiler.register("Fallback", crate::effect::EffectReflection::new());
        compiler
            .load_effect("Fallback", &crate::effect::CompilerParameters::new())
            .wait()
            .unwrap()
    }

    #[test]
    fn failed_compile_starts_from_empty_fallback_parameters() {
        let mut root = RootEffectRenderFeature::new("Test");
        let fallback = fallback_effect();
        root.compute_fallback_effect = Some(Box::new(
            move |_object: &RenderObject, _effect: &RenderEffect, _state: RenderEffectState| {
                Some(fallback.clone())
            },
        ));
        let tint = crate::resources::ParameterKey::<[f32; 4]>::new("Fallback.Tint");
        let mut effect = RenderEffect::new(Arc::from("Model"));
        effect.fallback_parameters.set(&tint, [1.0, 0.0, 1.0, 1.0]);

        let compiler = crate::effect::PrecompiledEffectCompiler::new();
        root.compile_render_effect(&mut effect, Some(&custom_object()), &compiler)
            .unwrap();

        assert_eq!(effect.state, RenderEffectState::Error);
        assert!(effect.fallback_parameters.get(&tint).is_none());
        assert!(effect.fallback_parameters.is_empty());
    }

    #[test]
    fn offset_slots_are_deduplicated_by_name() {
        let mut root = RootEffectRenderFeature::new("Test");
        let a = root.create_draw_cbuffer_offset_slot("Transformation.World");
        let b = root.create_draw_cbuffer_offset_slot("Transformation.World");
        let c = root.create_view_cbuffer_offset_slot("Transformation.World");
        assert_eq!(a, b);
        assert_eq!(a.index(), 0);
        assert_eq!(c.index(), 0);
    }
}
