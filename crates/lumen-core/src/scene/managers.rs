// Copyright 2025 eraflo
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Lookup of backend nodes by id.

use std::collections::HashMap;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use super::{Camera, Entity, Geometry, Light, Material, NodeId};

/// Read access to the backend nodes of a scene.
///
/// Implementations are shared between the scene front end and the renderer jobs, so they
/// hand out owned snapshots rather than references.
pub trait NodeManagers: Send + Sync {
    /// The entity `id`.
    fn entity(&self, id: NodeId) -> Option<Entity>;
    /// The geometry `id`.
    fn geometry(&self, id: NodeId) -> Option<Arc<Geometry>>;
    /// The material `id`.
    fn material(&self, id: NodeId) -> Option<Material>;
    /// The light `id`.
    fn light(&self, id: NodeId) -> Option<Light>;
    /// The camera `id`.
    fn camera(&self, id: NodeId) -> Option<Camera>;
}

#[derive(Debug, Default)]
struct Nodes {
    entities: HashMap<NodeId, Entity>,
    geometries: HashMap<NodeId, Arc<Geometry>>,
    materials: HashMap<NodeId, Material>,
    lights: HashMap<NodeId, Light>,
    cameras: HashMap<NodeId, Camera>,
    next_id: u64,
}

/// An in-memory [`NodeManagers`] with interior mutability.
#[derive(Debug, Default)]
pub struct SceneNodeManagers {
    nodes: RwLock<Nodes>,
}

impl SceneNodeManagers {
    /// Creates an empty scene.
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> RwLockReadGuard<'_, Nodes> {
        self.nodes.read().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, Nodes> {
        self.nodes.write().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Returns a fresh node id.
    pub fn allocate_id(&self) -> NodeId {
        let mut nodes = self.write();
        nodes.next_id += 1;
        NodeId(nodes.next_id)
    }

    /// Inserts or replaces an entity.
    pub fn insert_entity(&self, entity: Entity) {
        self.write().entities.insert(entity.id, entity);
    }

    /// Creates an entity named `name` under `parent` and returns its id.
    pub fn spawn(&self, name: &str, parent: Option<NodeId>) -> NodeId {
        let id = self.allocate_id();
        let mut nodes = self.write();
        nodes.entities.insert(id, Entity::new(id, name));
        if let Some(parent) = parent.and_then(|p| nodes.entities.get_mut(&p)) {
            parent.children.push(id);
        }
        id
    }

    /// Applies `f` to entity `id`. Returns `false` when the entity does not exist.
    pub fn update_entity(&self, id: NodeId, f: impl FnOnce(&mut Entity)) -> bool {
        match self.write().entities.get_mut(&id) {
            Some(entity) => {
                f(entity);
                true
            }
            None => false,
        }
    }

    /// Adds a geometry node and returns its id.
    pub fn add_geometry(&self, mut geometry: Geometry) -> NodeId {
        let id = self.allocate_id();
        geometry.id = Some(id);
        self.write().geometries.insert(id, Arc::new(geometry));
        id
    }

    /// Replaces the data of geometry `id`, bumping its revision.
    pub fn replace_geometry(&self, id: NodeId, mut geometry: Geometry) -> bool {
        let mut nodes = self.write();
        let Some(old) = nodes.geometries.get(&id) else {
            return false;
        };
        geometry.id = Some(id);
        geometry.revision = old.revision + 1;
        nodes.geometries.insert(id, Arc::new(geometry));
        true
    }

    /// Adds a material node and returns its id.
    pub fn add_material(&self, material: Material) -> NodeId {
        let id = self.allocate_id();
        self.write().materials.insert(id, material);
        id
    }

    /// Adds a light node and returns its id.
    pub fn add_light(&self, light: Light) -> NodeId {
        let id = self.allocate_id();
        self.write().lights.insert(id, light);
        id
    }

    /// Adds a camera node and returns its id.
    pub fn add_camera(&self, camera: Camera) -> NodeId {
        let id = self.allocate_id();
        self.write().cameras.insert(id, camera);
        id
    }

    /// Number of entities.
    pub fn entity_count(&self) -> usize {
        self.read().entities.len()
    }
}

impl NodeManagers for SceneNodeManagers {
    fn entity(&self, id: NodeId) -> Option<Entity> {
        self.read().entities.get(&id).cloned()
    }

    fn geometry(&self, id: NodeId) -> Option<Arc<Geometry>> {
        self.read().geometries.get(&id).cloned()
    }

    fn material(&self, id: NodeId) -> Option<Material> {
        self.read().materials.get(&id).copied()
    }

    fn light(&self, id: NodeId) -> Option<Light> {
        self.read().lights.get(&id).copied()
    }

    fn camera(&self, id: NodeId) -> Option<Camera> {
        self.read().cameras.get(&id).copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::math::Vec3;

    #[test]
    fn spawn_links_children() {
        let scene = SceneNodeManagers::new();
        let root = scene.spawn("root", None);
        let child = scene.spawn("child", Some(root));
        assert_eq!(scene.entity(root).unwrap().children, vec![child]);
        assert_eq!(scene.entity_count(), 2);
    }

    #[test]
    fn replacing_geometry_bumps_revision() {
        let scene = SceneNodeManagers::new();
        let id = scene.add_geometry(Geometry {
            positions: vec![Vec3::ZERO, Vec3::X, Vec3::Y],
            indices: vec![0, 1, 2],
            ..Default::default()
        });
        assert_eq!(scene.geometry(id).unwrap().revision, 0);
        let moved = Geometry {
            positions: vec![Vec3::ZERO, Vec3::X * 2.0, Vec3::Y],
            indices: vec![0, 1, 2],
            ..Default::default()
        };
        assert!(scene.replace_geometry(id, moved));
        let current = scene.geometry(id).unwrap();
        assert_eq!(current.revision, 1);
        assert_eq!(current.id, Some(id));
        assert!(!scene.replace_geometry(NodeId(999), Geometry::default()));
    }
}
