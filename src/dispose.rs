//! Deterministic release of a chapter's GPU-backed resources.
//!
//! When a chapter is swapped out, the [`Disposer`] traverses its stage
//! from the root and releases every reachable geometry, material, and
//! texture exactly once. An identity set keyed by
//! [`ResourceId`](crate::stage::ResourceId) prevents double-free when
//! several nodes share a resource, or when a node's cached material
//! variants alias its base textures. The set lives in the Director and
//! spans chapter swaps, so nothing freed for one chapter can be freed
//! again through another path.

use std::collections::HashSet;

use log::debug;

use crate::stage::{NodeId, ResourceId, Stage, TextureId};

/// Releases stage resources exactly once each.
pub struct Disposer {
    released: HashSet<ResourceId>,
    sequence: Vec<ResourceId>,
}

impl Disposer {
    pub fn new() -> Self {
        Self {
            released: HashSet::new(),
            sequence: Vec::new(),
        }
    }

    /// Release everything reachable from the stage root.
    ///
    /// Safe to call on a stage that never got resources (a chapter whose
    /// init failed or never ran) — it degrades to a no-op. Calling it a
    /// second time on the same stage releases nothing further.
    pub fn dispose_stage(&mut self, stage: &mut Stage) {
        let nodes = stage.descendants(stage.root());
        let node_set: HashSet<NodeId> = nodes.iter().copied().collect();

        let mut geometry_ids = Vec::new();
        let mut material_ids = Vec::new();
        for &id in &nodes {
            let node = stage.node(id);
            if let Some(g) = node.geometry {
                geometry_ids.push(g);
            }
            material_ids.extend(node.materials.iter());
        }
        // Lazily built variants belong to their node and die with it.
        material_ids.extend(
            stage
                .variants
                .iter()
                .filter(|((node, _), _)| node_set.contains(node))
                .map(|(_, &material)| material),
        );

        let before = self.sequence.len();

        for g in geometry_ids {
            let geometry = &mut stage.geometries[g.0];
            let resource = geometry.resource_id();
            if self.released.insert(resource) {
                geometry.release();
                self.sequence.push(resource);
            }
        }

        for m in material_ids {
            let resource = stage.materials[m.0].resource_id();
            if self.released.contains(&resource) {
                continue;
            }
            // Textures referenced by the material's known slots go first.
            let slots: Vec<TextureId> = stage.materials[m.0].texture_slots().collect();
            for t in slots {
                let texture = &mut stage.textures[t.0];
                let texture_resource = texture.resource_id();
                if self.released.insert(texture_resource) {
                    texture.release();
                    self.sequence.push(texture_resource);
                }
            }
            stage.materials[m.0].release();
            self.released.insert(resource);
            self.sequence.push(resource);
        }

        stage.variants.clear();
        debug!(
            "[dispose] released {} resources from stage",
            self.sequence.len() - before
        );
    }

    /// Total resources released through this disposer, in order.
    pub fn release_sequence(&self) -> &[ResourceId] {
        &self.sequence
    }

    pub fn released_count(&self) -> usize {
        self.sequence.len()
    }
}

impl Default for Disposer {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mesh::MeshData;
    use crate::stage::{Material, MaterialSlot, MaterialVariant, TextureData};

    fn stage_with_shared_resources() -> Stage {
        let mut stage = Stage::new();
        let geometry = stage.add_geometry(MeshData::cube());
        let texture = stage.add_texture(TextureData::solid([255, 0, 0, 255]));
        let material = stage.add_material(Material::new([1.0; 4]).with_map(texture));

        // Two nodes sharing one geometry and one material.
        for name in ["left", "right"] {
            let node = stage.add_node(stage.root(), name);
            stage.node_mut(node).geometry = Some(geometry);
            stage.node_mut(node).materials = MaterialSlot::Single(material);
        }
        stage
    }

    #[test]
    fn shared_resources_release_exactly_once() {
        let mut stage = stage_with_shared_resources();
        let mut disposer = Disposer::new();
        disposer.dispose_stage(&mut stage);

        assert_eq!(stage.geometries[0].release_count(), 1);
        assert_eq!(stage.materials[0].release_count(), 1);
        assert_eq!(stage.textures[0].release_count(), 1);
        // geometry + texture + material
        assert_eq!(disposer.released_count(), 3);
    }

    #[test]
    fn double_dispose_is_idempotent() {
        let mut stage = stage_with_shared_resources();
        let mut disposer = Disposer::new();
        disposer.dispose_stage(&mut stage);
        disposer.dispose_stage(&mut stage);

        assert_eq!(stage.geometries[0].release_count(), 1);
        assert_eq!(stage.materials[0].release_count(), 1);
        assert_eq!(stage.textures[0].release_count(), 1);
    }

    #[test]
    fn textures_release_before_their_material() {
        let mut stage = stage_with_shared_resources();
        let texture_resource = stage.textures[0].resource_id();
        let material_resource = stage.materials[0].resource_id();

        let mut disposer = Disposer::new();
        disposer.dispose_stage(&mut stage);

        let sequence = disposer.release_sequence();
        let texture_at = sequence.iter().position(|&r| r == texture_resource);
        let material_at = sequence.iter().position(|&r| r == material_resource);
        assert!(texture_at.unwrap() < material_at.unwrap());
    }

    #[test]
    fn material_array_slots_are_released() {
        let mut stage = Stage::new();
        let a = stage.add_material(Material::new([1.0, 0.0, 0.0, 1.0]));
        let b = stage.add_material(Material::new([0.0, 1.0, 0.0, 1.0]));
        let node = stage.add_node(stage.root(), "multi");
        stage.node_mut(node).materials = MaterialSlot::Multi(vec![a, b]);

        let mut disposer = Disposer::new();
        disposer.dispose_stage(&mut stage);
        assert!(stage.materials[a.0].is_released());
        assert!(stage.materials[b.0].is_released());
    }

    #[test]
    fn variant_materials_die_with_the_chapter() {
        let mut stage = Stage::new();
        let node = stage.add_node(stage.root(), "shell");
        let base = stage.add_material(Material::new([0.4, 0.4, 0.4, 1.0]));
        stage.node_mut(node).materials = MaterialSlot::Single(base);
        let glass = stage
            .apply_variant(node, MaterialVariant::Glass)
            .expect("node has a material");

        let mut disposer = Disposer::new();
        disposer.dispose_stage(&mut stage);
        assert!(stage.materials[glass.0].is_released());
        assert!(stage.materials[base.0].is_released());
    }

    #[test]
    fn never_initialized_stage_is_a_noop() {
        let mut stage = Stage::new();
        let mut disposer = Disposer::new();
        disposer.dispose_stage(&mut stage);
        assert_eq!(disposer.released_count(), 0);
    }
}
