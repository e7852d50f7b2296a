use std::sync::Arc;

use rustc_hash::{FxHashMap, FxHashSet};
use vesta_core::RenderObjectKey;

use super::{EntityId, Model, ModelComponent};
use crate::errors::Result;
use crate::object::{RenderMesh, RenderObject};
use crate::system::RenderSystem;

/// Render-side mirror of one [`ModelComponent`].
#[derive(Debug, Default)]
pub struct RenderModel {
    pub model: Option<Arc<Model>>,
    /// One render object per mesh of `model`, in mesh order.
    pub meshes: Vec<RenderObjectKey>,
}

/// Keeps render objects in sync with model components.
#[derive(Debug, Default)]
pub struct ModelProcessor {
    render_models: FxHashMap<EntityId, RenderModel>,
}

impl ModelProcessor {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn render_model(&self, entity: EntityId) -> Option<&RenderModel> {
        self.render_models.get(&entity)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.render_models.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.render_models.is_empty()
    }

    /// Reconciles the registered render models with `components`.
    ///
    /// Components absent from the iterator are unregistered. A component
    /// whose model changed identity gets its meshes re-created.
    pub fn update<'a>(
        &mut self,
        system: &mut RenderSystem,
        components: impl IntoIterator<Item = (EntityId, &'a ModelComponent)>,
    ) -> Result<()> {
        let mut seen = FxHashSet::default();

        for (entity, component) in components {
            seen.insert(entity);
            let render_model = self.render_models.entry(entity).or_default();

            let same_model = match (&render_model.model, &component.model) {
                (Some(current), Some(next)) => Arc::ptr_eq(current, next),
                (None, None) => true,
                _ => false,
            };
            if !same_model {
                for key in render_model.meshes.drain(..) {
                    system.remove_render_object(key)?;
                }
                render_model.model = component.model.clone();
                if let Some(model) = &render_model.model {
                    log::debug!("Creating {} mesh(es) for entity {}", model.meshes.len(), entity.0);
                    for (mesh_index, mesh) in model.meshes.iter().enumerate() {
                        let object = RenderObject::mesh(RenderMesh {
                            render_model: entity,
                            mesh_index,
                            material_index: mesh.material_index,
                            draw: mesh.draw.clone(),
                            material: component.material_for(model, mesh.material_index),
                            world: component.world,
                        });
                        render_model.meshes.push(system.add_render_object(object));
                    }
                }
            }

            let Some(model) = &render_model.model else {
                continue;
            };
            for (mesh, &key) in model.meshes.iter().zip(&render_model.meshes) {
                let Some(object) = system.render_object_mut(key) else {
                    continue;
                };
                object.enabled = component.enabled;
                object.render_groups = component.render_groups;
                object.bounding_center = component.world.transform_point3(mesh.center);
                if let Some(render_mesh) = object.as_mesh_mut() {
                    render_mesh.world = component.world;
                    render_mesh.material = component.material_for(model, mesh.material_index);
                }
            }
        }

        let removed: Vec<EntityId> = self
            .render_models
            .keys()
            .filter(|entity| !seen.contains(entity))
            .copied()
            .collect();
        for entity in removed {
            if let Some(render_model) = self.render_models.remove(&entity) {
                for key in render_model.meshes {
                    system.remove_render_object(key)?;
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use glam::{Mat4, Vec3};

    use super::*;
    use crate::config::RenderSystemConfig;
    use crate::device::BufferHandle;
    use crate::feature::{MeshRenderFeature, VertexLayout};
    use crate::scene::{Material, Mesh, MeshDraw, VertexBufferBinding};

    fn model(mesh_count: usize) -> Arc<Model> {
        let draw = MeshDraw::triangles(
            VertexBufferBinding {
                buffer: BufferHandle(0),
                offset: 0,
                layout: VertexLayout::position_normal_uv(),
            },
            None,
            3,
        );
        Arc::new(Model {
            meshes: (0..mesh_count)
                .map(|i| Mesh {
                    name: format!("mesh{i}"),
                    draw: draw.clone(),
                    material_index: 0,
                    center: Vec3::new(0.0, 1.0, 0.0),
                })
                .collect(),
            materials: vec![Arc::new(Material::new("Default"))],
        })
    }

    fn system() -> RenderSystem {
        let mut system = RenderSystem::new(RenderSystemConfig::default());
        system
            .add_render_feature(Box::new(MeshRenderFeature::new()))
            .unwrap();
        system
    }

    #[test]
    fn registers_one_object_per_mesh() {
        let mut system = system();
        let mut processor = ModelProcessor::new();
        let component = ModelComponent::new(model(2)).with_world(Mat4::from_translation(Vec3::X));

        processor
            .update(&mut system, [(EntityId(7), &component)])
            .unwrap();

        let render_model = processor.render_model(EntityId(7)).unwrap();
        assert_eq!(render_model.meshes.len(), 2);
        let object = system.render_object(render_model.meshes[1]).unwrap();
        assert_eq!(object.render_feature(), Some(0));
        assert_eq!(object.bounding_center, Vec3::new(1.0, 1.0, 0.0));
        assert_eq!(object.as_mesh().unwrap().mesh_index, 1);
    }

    #[test]
    fn material_override_wins() {
        let mut system = system();
        let mut processor = ModelProcessor::new();
        let mut component = ModelComponent::new(model(1));
        let override_material = Arc::new(Material::new("Override"));
        component.materials = vec![Some(override_material.clone())];

        processor
            .update(&mut system, [(EntityId(1), &component)])
            .unwrap();

        let key = processor.render_model(EntityId(1)).unwrap().meshes[0];
        let material = system
            .render_object(key)
            .and_then(|object| object.as_mesh())
            .and_then(|mesh| mesh.material.clone())
            .unwrap();
        assert!(Arc::ptr_eq(&material, &override_material));
    }

    #[test]
    fn vanished_components_are_unregistered() {
        let mut system = system();
        let mut processor = ModelProcessor::new();
        let component = ModelComponent::new(model(3));

        processor
            .update(&mut system, [(EntityId(1), &component)])
            .unwrap();
        assert_eq!(system.render_object_count(), 3);

        processor.update(&mut system, []).unwrap();
        assert!(processor.is_empty());
        assert_eq!(system.render_object_count(), 0);
    }

    #[test]
    fn disabling_component_disables_meshes() {
        let mut system = system();
        let mut processor = ModelProcessor::new();
        let mut component = ModelComponent::new(model(1));
        processor
            .update(&mut system, [(EntityId(1), &component)])
            .unwrap();

        component.enabled = false;
        processor
            .update(&mut system, [(EntityId(1), &component)])
            .unwrap();
        let key = processor.render_model(EntityId(1)).unwrap().meshes[0];
        assert!(!system.render_object(key).unwrap().enabled);
    }
}
