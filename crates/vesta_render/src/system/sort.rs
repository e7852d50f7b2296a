//! Draw ordering of view stages.

use glam::Vec3;
use slotmap::SlotMap;
use vesta_core::RenderObjectKey;

use crate::feature::RootRenderFeature;
use crate::nodes::RenderNodeFeatureReference;
use crate::object::RenderObject;
use crate::stage::SortMode;

/// Groups nodes by owning feature, keeping extraction order inside a feature.
pub(crate) fn sort_by_feature(nodes: &mut [RenderNodeFeatureReference]) {
    nodes.sort_by_key(|node| node.root_render_feature);
}

/// Fills `sorted` from `nodes` according to the stage sort mode.
pub(crate) fn sort_render_nodes(
    mode: SortMode,
    eye: Vec3,
    nodes: &[RenderNodeFeatureReference],
    sorted: &mut Vec<RenderNodeFeatureReference>,
    features: &[Box<dyn RootRenderFeature>],
    render_objects: &SlotMap<RenderObjectKey, RenderObject>,
) {
    sorted.clear();
    sorted.extend_from_slice(nodes);

    let distance = |node: &RenderNodeFeatureReference| {
        render_objects
            .get(node.render_object)
            .map_or(0.0, |object| object.bounding_center.distance_squared(eye))
    };

    match mode {
        SortMode::None => {}
        SortMode::StateChange => {
            sorted.sort_by_cached_key(|node| {
                let state_key = features
                    .get(node.root_render_feature)
                    .map_or(0, |feature| feature.render_node_sort_key(node.render_node));
                let object_key = render_objects
                    .get(node.render_object)
                    .map_or(0, |object| object.state_sort_key);
                (node.root_render_feature, state_key, object_key)
            });
        }
        // Depth order applies within each feature's run.
        SortMode::FrontToBack => {
            sorted.sort_by(|a, b| {
                a.root_render_feature
                    .cmp(&b.root_render_feature)
                    .then_with(|| distance(a).total_cmp(&distance(b)))
            });
        }
        SortMode::BackToFront => {
            sorted.sort_by(|a, b| {
                a.root_render_feature
                    .cmp(&b.root_render_feature)
                    .then_with(|| distance(b).total_cmp(&distance(a)))
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::nodes::RenderNodeReference;
    use crate::object::{CustomRenderObject, RenderObjectKind};

    fn custom_object(center: Vec3) -> RenderObject {
        let mut object = RenderObject::new(RenderObjectKind::Custom(CustomRenderObject {
            type_name: "Marker",
            world: glam::Mat4::IDENTITY,
            data: Box::new(()),
        }));
        object.bounding_center = center;
        object
    }

    fn reference(feature: usize, node: usize, key: RenderObjectKey) -> RenderNodeFeatureReference {
        RenderNodeFeatureReference {
            root_render_feature: feature,
            render_node: RenderNodeReference::new(node),
            render_object: key,
        }
    }

    #[test]
    fn feature_grouping_is_stable() {
        let mut objects = SlotMap::with_key();
        let key = objects.insert(custom_object(Vec3::ZERO));
        let mut nodes = vec![
            reference(1, 0, key),
            reference(0, 0, key),
            reference(1, 1, key),
            reference(0, 1, key),
        ];
        sort_by_feature(&mut nodes);
        let order: Vec<_> = nodes
            .iter()
            .map(|n| (n.root_render_feature, n.render_node.index()))
            .collect();
        assert_eq!(order, vec![(0, 0), (0, 1), (1, 0), (1, 1)]);
    }

    #[test]
    fn depth_modes_order_by_distance_to_eye() {
        let mut objects = SlotMap::with_key();
        let far = objects.insert(custom_object(Vec3::new(0.0, 0.0, -20.0)));
        let near = objects.insert(custom_object(Vec3::new(0.0, 0.0, -2.0)));
        let mid = objects.insert(custom_object(Vec3::new(0.0, 0.0, -8.0)));
        let nodes = vec![reference(0, 0, far), reference(0, 1, near), reference(0, 2, mid)];

        let mut sorted = Vec::new();
        sort_render_nodes(SortMode::FrontToBack, Vec3::ZERO, &nodes, &mut sorted, &[], &objects);
        let keys: Vec<_> = sorted.iter().map(|n| n.render_object).collect();
        assert_eq!(keys, vec![near, mid, far]);

        sort_render_nodes(SortMode::BackToFront, Vec3::ZERO, &nodes, &mut sorted, &[], &objects);
        let keys: Vec<_> = sorted.iter().map(|n| n.render_object).collect();
        assert_eq!(keys, vec![far, mid, near]);

        sort_render_nodes(SortMode::None, Vec3::ZERO, &nodes, &mut sorted, &[], &objects);
        assert_eq!(sorted, nodes);
    }

    #[test]
    fn depth_modes_keep_features_contiguous() {
        let mut objects = SlotMap::with_key();
        let a = objects.insert(custom_object(Vec3::new(0.0, 0.0, -1.0)));
        let b = objects.insert(custom_object(Vec3::new(0.0, 0.0, -5.0)));
        let c = objects.insert(custom_object(Vec3::new(0.0, 0.0, -3.0)));
        let nodes = vec![reference(0, 0, a), reference(0, 1, b), reference(1, 0, c)];

        let mut sorted = Vec::new();
        sort_render_nodes(SortMode::BackToFront, Vec3::ZERO, &nodes, &mut sorted, &[], &objects);
        let order: Vec<_> = sorted
            .iter()
            .map(|n| (n.root_render_feature, n.render_object))
            .collect();
        assert_eq!(order, vec![(0, b), (0, a), (1, c)]);

        sort_render_nodes(SortMode::FrontToBack, Vec3::ZERO, &nodes, &mut sorted, &[], &objects);
        let order: Vec<_> = sorted
            .iter()
            .map(|n| (n.root_render_feature, n.render_object))
            .collect();
        assert_eq!(order, vec![(0, a), (0, b), (1, c)]);
    }
}
