//! Effect compilation service boundary
//!
//! Compilation is asynchronous: [`EffectCompiler::load_effect`] returns an
//! [`EffectTask`] immediately. The render pipeline polls it without blocking
//! and only waits when no fallback effect is available.

use std::sync::Arc;

use flume::TryRecvError;
use parking_lot::{Mutex, RwLock};
use rustc_hash::FxHashMap;
use thiserror::Error;
use vesta_core::{ObjectId, ObjectIdBuilder};

use super::{CompilerParameters, Effect, EffectBytecode, EffectReflection};

/// Failure reported by an effect compiler.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("effect '{effect}': {reason}")]
pub struct EffectCompileError {
    pub effect: String,
    pub reason: String,
}

type EffectResult = Result<Arc<Effect>, EffectCompileError>;

/// Source of compiled effects.
pub trait EffectCompiler: Send + Sync {
    fn load_effect(&self, effect_name: &str, parameters: &CompilerParameters) -> EffectTask;
}

/// Result of [`EffectTask::poll`].
#[derive(Debug)]
pub enum EffectTaskStatus {
    Pending,
    Completed(Arc<Effect>),
    Faulted(EffectCompileError),
}

/// Handle to an in-flight compilation.
#[derive(Debug)]
pub struct EffectTask {
    effect_name: String,
    receiver: flume::Receiver<EffectResult>,
}

/// Producer side of a pending [`EffectTask`].
#[derive(Debug)]
pub struct EffectTaskCompleter {
    sender: flume::Sender<EffectResult>,
}

impl EffectTaskCompleter {
    pub fn complete(self, result: Result<Arc<Effect>, EffectCompileError>) {
        // The task may already have been dropped; nothing to notify then.
        let _ = self.sender.send(result);
    }
}

impl EffectTask {
    /// An already completed task.
    #[must_use]
    pub fn ready(effect_name: &str, result: Result<Arc<Effect>, EffectCompileError>) -> Self {
        let (task, completer) = Self::pending(effect_name);
        completer.complete(result);
        task
    }

    /// A task completed later through the returned completer.
    #[must_use]
    pub fn pending(effect_name: &str) -> (Self, EffectTaskCompleter) {
        let (sender, receiver) = flume::bounded(1);
        (
            Self {
                effect_name: effect_name.to_owned(),
                receiver,
            },
            EffectTaskCompleter { sender },
        )
    }

    #[must_use]
    pub fn effect_name(&self) -> &str {
        &self.effect_name
    }

    /// Non-blocking check. A completed or faulted status is reported once;
    /// the task should be dropped afterwards.
    #[must_use]
    pub fn poll(&self) -> EffectTaskStatus {
        match self.receiver.try_recv() {
            Ok(Ok(effect)) => EffectTaskStatus::Completed(effect),
            Ok(Err(err)) => EffectTaskStatus::Faulted(err),
            Err(TryRecvError::Empty) => EffectTaskStatus::Pending,
            Err(TryRecvError::Disconnected) => EffectTaskStatus::Faulted(self.abandoned()),
        }
    }

    /// Blocks until the compiler delivers a result.
    pub fn wait(self) -> Result<Arc<Effect>, EffectCompileError> {
        match self.receiver.recv() {
            Ok(result) => result,
            Err(_) => Err(self.abandoned()),
        }
    }

    fn abandoned(&self) -> EffectCompileError {
        EffectCompileError {
            effect: self.effect_name.clone(),
            reason: "compiler dropped the task without a result".to_owned(),
        }
    }
}

/// Compiler backed by a registry of precompiled reflections.
///
/// An effect name resolves to an exact registration first, then to the
/// registration of its base name (`"Model.ShadowMapCaster"` → `"Model"`).
/// Identical `(name, parameters)` requests return the same [`Effect`].
#[derive(Default)]
pub struct PrecompiledEffectCompiler {
    sources: RwLock<FxHashMap<String, EffectReflection>>,
    cache: Mutex<FxHashMap<ObjectId, Arc<Effect>>>,
    requests: Mutex<Vec<(String, CompilerParameters)>>,
}

impl PrecompiledEffectCompiler {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, effect_name: impl Into<String>, reflection: EffectReflection) {
        self.sources.write().insert(effect_name.into(), reflection);
    }

    /// Number of `load_effect` calls served so far.
    #[must_use]
    pub fn request_count(&self) -> usize {
        self.requests.lock().len()
    }

    /// Every request, in order.
    #[must_use]
    pub fn requests(&self) -> Vec<(String, CompilerParameters)> {
        self.requests.lock().clone()
    }

    fn resolve(&self, effect_name: &str) -> Option<EffectReflection> {
        let sources = self.sources.read();
        sources
            .get(effect_name)
            .or_else(|| {
                let (base, _) = effect_name.split_once('.')?;
                sources.get(base)
            })
            .cloned()
    }
}

impl EffectCompiler for PrecompiledEffectCompiler {
    fn load_effect(&self, effect_name: &str, parameters: &CompilerParameters) -> EffectTask {
        self.requests
            .lock()
            .push((effect_name.to_owned(), parameters.clone()));

        let Some(reflection) = self.resolve(effect_name) else {
            return EffectTask::ready(
                effect_name,
                Err(EffectCompileError {
                    effect: effect_name.to_owned(),
                    reason: "no precompiled bytecode registered".to_owned(),
                }),
            );
        };

        let id = ObjectIdBuilder::new()
            .write_str(effect_name)
            .write_id(parameters.hash())
            .finish();

        let effect = self
            .cache
            .lock()
            .entry(id)
            .or_insert_with(|| {
                log::debug!("Instantiating precompiled effect '{effect_name}' ({id})");
                Arc::new(Effect::new(
                    effect_name,
                    Arc::new(EffectBytecode::new(id, reflection)),
                    parameters.clone(),
                ))
            })
            .clone();

        EffectTask::ready(effect_name, Ok(effect))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pending_task_completes_later() {
        let (task, completer) = EffectTask::pending("Model");
        assert!(matches!(task.poll(), EffectTaskStatus::Pending));

        completer.complete(Err(EffectCompileError {
            effect: "Model".into(),
            reason: "syntax error".into(),
        }));
        assert!(matches!(task.poll(), EffectTaskStatus::Faulted(_)));
    }

    #[test]
    fn dropped_completer_faults_the_task() {
        let (task, completer) = EffectTask::pending("Model");
        drop(completer);
        assert!(task.wait().is_err());
    }

    #[test]
    fn base_name_resolution_and_caching() {
        let compiler = PrecompiledEffectCompiler::new();
        compiler.register("Model", EffectReflection::new());

        let params = CompilerParameters::new();
        let a = compiler.load_effect("Model.ShadowMapCaster", &params).wait().unwrap();
        let b = compiler.load_effect("Model.ShadowMapCaster", &params).wait().unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(compiler.request_count(), 2);

        assert!(compiler.load_effect("Unknown", &params).wait().is_err());
    }
}
