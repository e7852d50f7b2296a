//! Descriptor-set layouts derived from effect reflection.

use vesta_core::{ObjectId, ObjectIdBuilder};

use super::reflection::{EffectParameterClass, EffectReflection};

/// One binding of a descriptor-set layout.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DescriptorSetLayoutEntry {
    pub key_name: String,
    pub class: EffectParameterClass,
    pub count: u32,
    pub stage: wgpu::ShaderStages,
}

/// Ordered list of bindings with a structural hash.
///
/// Two builders with the same bindings in the same order hash equal, which is
/// what device layout deduplication keys on.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DescriptorSetLayoutBuilder {
    entries: Vec<DescriptorSetLayoutEntry>,
    hash: ObjectId,
}

impl DescriptorSetLayoutBuilder {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_binding(
        &mut self,
        key_name: impl Into<String>,
        class: EffectParameterClass,
        count: u32,
        stage: wgpu::ShaderStages,
    ) -> &mut Self {
        self.entries.push(DescriptorSetLayoutEntry {
            key_name: key_name.into(),
            class,
            count,
            stage,
        });
        self.hash = self.compute_hash();
        self
    }

    fn compute_hash(&self) -> ObjectId {
        let mut builder = ObjectIdBuilder::new();
        for entry in &self.entries {
            builder
                .write_str(&entry.key_name)
                .write_u32(entry.class.tag())
                .write_u32(entry.count)
                .write_u32(entry.stage.bits());
        }
        builder.finish()
    }

    #[inline]
    #[must_use]
    pub fn hash(&self) -> ObjectId {
        self.hash
    }

    #[must_use]
    pub fn entries(&self) -> &[DescriptorSetLayoutEntry] {
        &self.entries
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    #[must_use]
    pub fn binding_index(&self, key_name: &str) -> Option<usize> {
        self.entries.iter().position(|e| e.key_name == key_name)
    }

    /// Binding index of the constant buffer called `name`.
    #[must_use]
    pub fn constant_buffer_binding(&self, name: &str) -> Option<usize> {
        self.entries
            .iter()
            .position(|e| e.class == EffectParameterClass::ConstantBuffer && e.key_name == name)
    }
}

/// A named descriptor-set slot of an effect. `layout` is `None` when the
/// effect binds nothing in that slot.
#[derive(Debug, Clone)]
pub struct EffectDescriptorSetLayout {
    pub name: String,
    pub layout: Option<DescriptorSetLayoutBuilder>,
}

/// Per-effect descriptor-set layouts, ordered by the feature's descriptor-set
/// slots first, then any extra resource groups in declaration order.
#[derive(Debug, Clone)]
pub struct EffectDescriptorSetReflection {
    layouts: Vec<EffectDescriptorSetLayout>,
}

impl EffectDescriptorSetReflection {
    #[must_use]
    pub fn new(reflection: &EffectReflection, slot_names: &[String], default_set_slot: &str) -> Self {
        let mut layouts: Vec<EffectDescriptorSetLayout> = slot_names
            .iter()
            .map(|name| EffectDescriptorSetLayout {
                name: name.clone(),
                layout: None,
            })
            .collect();

        for binding in &reflection.resource_bindings {
            let group = binding.resource_group.as_deref().unwrap_or(default_set_slot);
            let index = if let Some(index) = layouts.iter().position(|l| l.name == group) {
                index
            } else {
                layouts.push(EffectDescriptorSetLayout {
                    name: group.to_owned(),
                    layout: None,
                });
                layouts.len() - 1
            };

            layouts[index]
                .layout
                .get_or_insert_with(DescriptorSetLayoutBuilder::new)
                .add_binding(binding.key_name.clone(), binding.class, binding.count, binding.stage);
        }

        Self { layouts }
    }

    #[must_use]
    pub fn layouts(&self) -> &[EffectDescriptorSetLayout] {
        &self.layouts
    }

    #[must_use]
    pub fn layout_index(&self, name: &str) -> Option<usize> {
        self.layouts.iter().position(|l| l.name == name)
    }

    #[must_use]
    pub fn layout(&self, name: &str) -> Option<&DescriptorSetLayoutBuilder> {
        self.layouts
            .iter()
            .find(|l| l.name == name)
            .and_then(|l| l.layout.as_ref())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn slots() -> Vec<String> {
        ["PerFrame", "PerView", "PerDraw"].map(String::from).to_vec()
    }

    #[test]
    fn bindings_group_by_slot_and_extras_append() {
        let reflection = EffectReflection::new()
            .with_constant_buffer("PerDraw", &[("Transformation.World", 64)])
            .with_constant_buffer("PerMaterial", &[("Material.DiffuseValue", 16)])
            .with_resource("PerMaterial", "Material.DiffuseMap", EffectParameterClass::ShaderResourceView);

        let descriptors = EffectDescriptorSetReflection::new(&reflection, &slots(), "PerFrame");
        let names: Vec<_> = descriptors.layouts().iter().map(|l| l.name.as_str()).collect();
        assert_eq!(names, ["PerFrame", "PerView", "PerDraw", "PerMaterial"]);

        assert!(descriptors.layout("PerView").is_none());
        assert_eq!(descriptors.layout("PerDraw").unwrap().len(), 1);
        assert_eq!(descriptors.layout("PerMaterial").unwrap().len(), 2);
    }

    #[test]
    fn identical_bindings_share_hash() {
        let reflection = EffectReflection::new().with_constant_buffer("PerView", &[("View", 64)]);
        let a = EffectDescriptorSetReflection::new(&reflection, &slots(), "PerFrame");
        let b = EffectDescriptorSetReflection::new(&reflection, &slots(), "PerFrame");
        assert_eq!(
            a.layout("PerView").unwrap().hash(),
            b.layout("PerView").unwrap().hash()
        );
    }
}
