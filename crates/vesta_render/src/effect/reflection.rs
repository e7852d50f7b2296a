//! Shader reflection as reported by the effect compiler.

use vesta_core::{ObjectId, ObjectIdBuilder};

/// Kind of a shader resource binding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EffectParameterClass {
    ConstantBuffer,
    ShaderResourceView,
    UnorderedAccessView,
    Sampler,
}

impl EffectParameterClass {
    pub(crate) const fn tag(self) -> u32 {
        match self {
            Self::ConstantBuffer => 0,
            Self::ShaderResourceView => 1,
            Self::UnorderedAccessView => 2,
            Self::Sampler => 3,
        }
    }
}

/// One member of a constant buffer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EffectValueDescription {
    pub key_name: String,
    pub offset: u32,
    pub size: u32,
}

/// A constant buffer and its members.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EffectConstantBufferDescription {
    pub name: String,
    pub size: u32,
    pub members: Vec<EffectValueDescription>,
}

impl EffectConstantBufferDescription {
    /// Lays members out sequentially. Members of 16 bytes or more start on a
    /// 16-byte boundary; the total size is rounded up to 16 bytes.
    #[must_use]
    pub fn packed(name: impl Into<String>, members: &[(&str, u32)]) -> Self {
        let mut offset = 0u32;
        let mut values = Vec::with_capacity(members.len());
        for &(key_name, size) in members {
            let alignment = if size >= 16 { 16 } else { 4 };
            offset = offset.next_multiple_of(alignment);
            values.push(EffectValueDescription {
                key_name: key_name.to_owned(),
                offset,
                size,
            });
            offset += size;
        }
        Self {
            name: name.into(),
            size: offset.next_multiple_of(16),
            members: values,
        }
    }

    #[must_use]
    pub fn member(&self, key_name: &str) -> Option<&EffectValueDescription> {
        self.members.iter().find(|m| m.key_name == key_name)
    }

    /// Structural hash: name, size and every member.
    #[must_use]
    pub fn hash(&self) -> ObjectId {
        let mut builder = ObjectIdBuilder::new();
        builder.write_str(&self.name).write_u32(self.size);
        for member in &self.members {
            builder
                .write_str(&member.key_name)
                .write_u32(member.offset)
                .write_u32(member.size);
        }
        builder.finish()
    }
}

/// A resource the shader binds, with the resource group it belongs to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EffectResourceBindingDescription {
    pub key_name: String,
    /// Descriptor-set slot name ("PerDraw", "PerMaterial", ...). Bindings
    /// without a group land in the default slot.
    pub resource_group: Option<String>,
    pub class: EffectParameterClass,
    pub stage: wgpu::ShaderStages,
    pub count: u32,
}

/// Reflection of a compiled effect.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EffectReflection {
    pub constant_buffers: Vec<EffectConstantBufferDescription>,
    pub resource_bindings: Vec<EffectResourceBindingDescription>,
}

impl EffectReflection {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a constant buffer bound in its own resource group of the same name.
    #[must_use]
    pub fn with_constant_buffer(mut self, group: &str, members: &[(&str, u32)]) -> Self {
        self.constant_buffers
            .push(EffectConstantBufferDescription::packed(group, members));
        self.resource_bindings.push(EffectResourceBindingDescription {
            key_name: group.to_owned(),
            resource_group: Some(group.to_owned()),
            class: EffectParameterClass::ConstantBuffer,
            stage: wgpu::ShaderStages::VERTEX_FRAGMENT,
            count: 1,
        });
        self
    }

    /// Adds a non-constant-buffer binding to `group`.
    #[must_use]
    pub fn with_resource(mut self, group: &str, key_name: &str, class: EffectParameterClass) -> Self {
        self.resource_bindings.push(EffectResourceBindingDescription {
            key_name: key_name.to_owned(),
            resource_group: Some(group.to_owned()),
            class,
            stage: wgpu::ShaderStages::FRAGMENT,
            count: 1,
        });
        self
    }

    #[must_use]
    pub fn constant_buffer(&self, name: &str) -> Option<&EffectConstantBufferDescription> {
        self.constant_buffers.iter().find(|cb| cb.name == name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn packed_layout_aligns_matrices() {
        let cb = EffectConstantBufferDescription::packed(
            "PerDraw",
            &[("Scale", 4), ("Transformation.World", 64)],
        );
        assert_eq!(cb.member("Scale").unwrap().offset, 0);
        assert_eq!(cb.member("Transformation.World").unwrap().offset, 16);
        assert_eq!(cb.size, 80);
    }

    #[test]
    fn structural_hash_ignores_identity() {
        let a = EffectConstantBufferDescription::packed("PerView", &[("View", 64)]);
        let b = EffectConstantBufferDescription::packed("PerView", &[("View", 64)]);
        let c = EffectConstantBufferDescription::packed("PerView", &[("Projection", 64)]);
        assert_eq!(a.hash(), b.hash());
        assert_ne!(a.hash(), c.hash());
    }
}
