//! Effects
//!
//! An effect is a compiled shader program plus its reflection. Compilation is
//! an external service reached through [`EffectCompiler`]; this module only
//! defines what goes in (a name and [`CompilerParameters`]) and what comes out
//! (an [`Effect`] with [`EffectReflection`]).
//!
//! # Permutations
//!
//! Every render object owns one `RenderEffect` per effect permutation slot.
//! Each frame, sub-features feed the permutation parameters they care about to
//! the effect's [`EffectValidator`]; only a changed parameter sequence triggers
//! a new compile request.

mod compiler;
mod descriptor;
mod reflection;
mod validator;

use std::sync::Arc;

use vesta_core::ObjectId;

pub use compiler::{
    EffectCompileError, EffectCompiler, EffectTask, EffectTaskCompleter, EffectTaskStatus,
    PrecompiledEffectCompiler,
};
pub use descriptor::{
    DescriptorSetLayoutBuilder, DescriptorSetLayoutEntry, EffectDescriptorSetLayout,
    EffectDescriptorSetReflection,
};
pub use reflection::{
    EffectConstantBufferDescription, EffectParameterClass, EffectReflection,
    EffectResourceBindingDescription, EffectValueDescription,
};
pub use validator::{
    CompilerParameters, EffectParameterValue, EffectValidator, PermutationParameterKey,
};

/// Compiled program data.
#[derive(Debug, Clone)]
pub struct EffectBytecode {
    /// Content hash; effects with equal ids share their instantiated reflection.
    pub id: ObjectId,
    pub reflection: EffectReflection,
}

impl EffectBytecode {
    #[must_use]
    pub fn new(id: ObjectId, reflection: EffectReflection) -> Self {
        Self { id, reflection }
    }
}

/// A compiled effect permutation.
#[derive(Debug, Clone)]
pub struct Effect {
    name: String,
    bytecode: Arc<EffectBytecode>,
    parameters: CompilerParameters,
}

impl Effect {
    #[must_use]
    pub fn new(name: impl Into<String>, bytecode: Arc<EffectBytecode>, parameters: CompilerParameters) -> Self {
        Self {
            name: name.into(),
            bytecode,
            parameters,
        }
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn bytecode(&self) -> &Arc<EffectBytecode> {
        &self.bytecode
    }

    #[must_use]
    pub fn reflection(&self) -> &EffectReflection {
        &self.bytecode.reflection
    }

    /// Permutation the effect was compiled with.
    #[must_use]
    pub fn parameters(&self) -> &CompilerParameters {
        &self.parameters
    }
}
