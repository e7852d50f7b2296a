//! Effect Permutation Tests
//!
//! Tests for:
//! - Permutation caching: unchanged parameters never reach the compiler again
//! - Recompilation when a material permutation parameter changes
//! - Fallback effects while an asynchronous compilation is pending
//! - Compilation failures with and without a fallback

mod common;

use std::sync::Arc;

use parking_lot::Mutex;

use vesta::prelude::*;
use vesta::render::effect::{
    CompilerParameters, Effect, EffectCompileError, EffectTask, EffectTaskCompleter,
    PermutationParameterKey,
};
use vesta::render::feature::MeshRenderFeature;
use vesta::render::render_effect::{RenderEffect, RenderEffectState};

use common::{camera, compiler, init_logger, model_reflection, opaque_model};

fn renderer(compiler: Arc<dyn EffectCompiler>) -> ForwardRenderer {
    init_logger();
    let settings = ForwardRendererSettings {
        shadows: false,
        ..Default::default()
    };
    let mut renderer = ForwardRenderer::new(RenderSystemConfig::default(), settings).unwrap();
    renderer
        .initialize(compiler, Box::new(HeadlessDevice::new()))
        .unwrap();
    let (view, projection) = camera();
    renderer.set_camera(view, projection);
    renderer
}

/// `(effect name, state)` of every render node's effect.
fn node_effects(renderer: &ForwardRenderer) -> Vec<(String, RenderEffectState)> {
    let mesh = renderer.mesh_feature().unwrap();
    mesh.root()
        .core()
        .render_nodes
        .iter()
        .filter_map(|node| node.render_effect)
        .filter_map(|reference| mesh.root().render_effect(reference))
        .map(|effect| {
            let name = effect
                .effect
                .as_ref()
                .map(|e| e.name().to_owned())
                .unwrap_or_default();
            (name, effect.state)
        })
        .collect()
}

fn set_fallback(renderer: &mut ForwardRenderer, fallback: Arc<Effect>) {
    let mesh = renderer
        .system_mut()
        .feature_as_mut::<MeshRenderFeature>()
        .unwrap();
    mesh.root_mut().compute_fallback_effect = Some(Box::new(
        move |_object: &RenderObject, _effect: &RenderEffect, _state: RenderEffectState| {
            Some(fallback.clone())
        },
    ));
}

fn fallback_effect() -> Arc<Effect> {
    let compiler = PrecompiledEffectCompiler::new();
    compiler.register("Fallback", model_reflection());
    compiler
        .load_effect("Fallback", &CompilerParameters::new())
        .wait()
        .unwrap()
}

/// Holds every compilation until `release` is called.
struct GatedCompiler {
    inner: PrecompiledEffectCompiler,
    held: Mutex<Vec<(EffectTaskCompleter, std::result::Result<Arc<Effect>, EffectCompileError>)>>,
}

impl GatedCompiler {
    fn new() -> Self {
        let inner = PrecompiledEffectCompiler::new();
        inner.register("Model", model_reflection());
        Self {
            inner,
            held: Mutex::new(Vec::new()),
        }
    }

    fn release(&self) {
        for (completer, result) in self.held.lock().drain(..) {
            completer.complete(result);
        }
    }
}

impl EffectCompiler for GatedCompiler {
    fn load_effect(&self, effect_name: &str, parameters: &CompilerParameters) -> EffectTask {
        let result = self.inner.load_effect(effect_name, parameters).wait();
        let (task, completer) = EffectTask::pending(effect_name);
        self.held.lock().push((completer, result));
        task
    }
}

// ============================================================================
// Permutation Cache Tests
// ============================================================================

#[test]
fn unchanged_permutations_are_not_recompiled() {
    let compiler = compiler();
    let mut renderer = renderer(compiler.clone());
    let mut processor = ModelProcessor::new();
    let component = ModelComponent::new(opaque_model(2));
    processor
        .update(renderer.system_mut(), [(EntityId(1), &component)])
        .unwrap();

    renderer.draw_frame().unwrap();
    let requests = compiler.request_count();
    assert_eq!(requests, 2, "one compile per (object, permutation slot)");

    renderer.draw_frame().unwrap();
    renderer.draw_frame().unwrap();
    assert_eq!(compiler.request_count(), requests);
    assert!(
        node_effects(&renderer)
            .iter()
            .all(|(name, state)| name == "Model" && *state == RenderEffectState::Normal)
    );
}

#[test]
fn changed_material_permutation_triggers_recompile() {
    let compiler = compiler();
    let mut renderer = renderer(compiler.clone());
    let mut processor = ModelProcessor::new();
    let mut component = ModelComponent::new(opaque_model(1));
    processor
        .update(renderer.system_mut(), [(EntityId(1), &component)])
        .unwrap();
    renderer.draw_frame().unwrap();
    let requests = compiler.request_count();

    component.materials = vec![Some(Arc::new(
        Material::new("NormalMapped").with_permutation("Material.HasNormalMap", true),
    ))];
    processor
        .update(renderer.system_mut(), [(EntityId(1), &component)])
        .unwrap();
    renderer.draw_frame().unwrap();

    assert_eq!(compiler.request_count(), requests + 1);
    let (name, parameters) = compiler.requests().pop().unwrap();
    assert_eq!(name, "Model");
    assert_eq!(
        parameters
            .get(PermutationParameterKey::new("Material.HasNormalMap"))
            .and_then(|value| value.as_bool()),
        Some(true)
    );

    // Stable again on the next frame.
    renderer.draw_frame().unwrap();
    assert_eq!(compiler.request_count(), requests + 1);
}

// ============================================================================
// Fallback Tests
// ============================================================================

#[test]
fn fallback_is_used_while_compiling() {
    let compiler = Arc::new(GatedCompiler::new());
    let mut renderer = renderer(compiler.clone());
    set_fallback(&mut renderer, fallback_effect());

    let mut processor = ModelProcessor::new();
    let component = ModelComponent::new(opaque_model(1));
    processor
        .update(renderer.system_mut(), [(EntityId(1), &component)])
        .unwrap();

    renderer.draw_frame().unwrap();
    assert_eq!(
        node_effects(&renderer),
        vec![("Fallback".to_owned(), RenderEffectState::Compiling)]
    );
    // The fallback is drawable.
    assert_eq!(common::headless(renderer.system()).draw_call_count(), 1);

    compiler.release();
    renderer.draw_frame().unwrap();
    assert_eq!(
        node_effects(&renderer),
        vec![("Model".to_owned(), RenderEffectState::Normal)]
    );
}

#[test]
fn pending_compile_without_fallback_blocks_until_done() {
    let compiler = Arc::new(GatedCompiler::new());
    let mut renderer = renderer(compiler.clone());
    let mut processor = ModelProcessor::new();
    let component = ModelComponent::new(opaque_model(1));
    processor
        .update(renderer.system_mut(), [(EntityId(1), &component)])
        .unwrap();

    let releaser = {
        let compiler = compiler.clone();
        std::thread::spawn(move || {
            while compiler.held.lock().is_empty() {
                std::thread::yield_now();
            }
            compiler.release();
        })
    };
    renderer.draw_frame().unwrap();
    releaser.join().unwrap();

    assert_eq!(
        node_effects(&renderer),
        vec![("Model".to_owned(), RenderEffectState::Normal)]
    );
}

// ============================================================================
// Failure Tests
// ============================================================================

#[test]
fn compile_failure_without_fallback_propagates() {
    let mut renderer = renderer(Arc::new(PrecompiledEffectCompiler::new()));
    let mut processor = ModelProcessor::new();
    let component = ModelComponent::new(opaque_model(1));
    processor
        .update(renderer.system_mut(), [(EntityId(1), &component)])
        .unwrap();

    let err = renderer.draw_frame().unwrap_err();
    assert!(matches!(err, RenderError::EffectCompilation { ref effect, .. } if effect == "Model"));
}

#[test]
fn compile_failure_with_fallback_marks_error_state() {
    let mut renderer = renderer(Arc::new(PrecompiledEffectCompiler::new()));
    set_fallback(&mut renderer, fallback_effect());
    let mut processor = ModelProcessor::new();
    let component = ModelComponent::new(opaque_model(1));
    processor
        .update(renderer.system_mut(), [(EntityId(1), &component)])
        .unwrap();

    renderer.draw_frame().unwrap();
    assert_eq!(
        node_effects(&renderer),
        vec![("Fallback".to_owned(), RenderEffectState::Error)]
    );
}
