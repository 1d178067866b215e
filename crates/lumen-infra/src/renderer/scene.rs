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

//! Flattens the entity hierarchy into what one frame needs.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use lumen_core::math::{Affine3, Vec3};
use lumen_core::scene::{Camera, Geometry, LightKind, Material, NodeId, NodeManagers};

use super::gpu::{LightGpu, MaterialGpu, MAX_LIGHTS, MAX_MATERIALS};

/// A geometry placed in the world.
#[derive(Debug, Clone)]
pub struct InstanceDesc {
    /// The entity the geometry is attached to.
    pub entity: NodeId,
    /// The geometry node.
    pub geometry_id: NodeId,
    /// The geometry data at the time of the walk.
    pub geometry: Arc<Geometry>,
    /// Object-to-world transform.
    pub transform: Affine3,
    /// Slot in the material table.
    pub material: u32,
}

/// The camera a frame is rendered from.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CameraView {
    /// The entity carrying the camera, `None` for the fallback view.
    pub entity: Option<NodeId>,
    /// Camera-to-world transform.
    pub transform: Affine3,
    /// Lens parameters.
    pub camera: Camera,
}

impl Default for CameraView {
    fn default() -> Self {
        Self {
            entity: None,
            transform: Affine3::IDENTITY,
            camera: Camera::default(),
        }
    }
}

impl CameraView {
    /// World position.
    pub fn origin(&self) -> Vec3 {
        self.transform.translation()
    }

    /// Unit view direction (the transformed negative Z axis).
    pub fn forward(&self) -> Vec3 {
        self.transform.transform_vector(-Vec3::Z).normalize()
    }

    /// Unit right vector.
    pub fn right(&self) -> Vec3 {
        self.transform.transform_vector(Vec3::X).normalize()
    }

    /// Unit up vector.
    pub fn up(&self) -> Vec3 {
        self.transform.transform_vector(Vec3::Y).normalize()
    }
}

/// Everything the renderer reads from the scene for one frame.
#[derive(Debug, Clone)]
pub struct SceneSnapshot {
    /// Visible geometry instances in walk order.
    pub instances: Vec<InstanceDesc>,
    /// The material table; slot 0 is the default material.
    pub materials: Vec<MaterialGpu>,
    /// The light table.
    pub lights: Vec<LightGpu>,
    /// The active camera.
    pub camera: CameraView,
}

impl Default for SceneSnapshot {
    fn default() -> Self {
        Self {
            instances: Vec::new(),
            materials: vec![MaterialGpu::from(&Material::default())],
            lights: Vec::new(),
            camera: CameraView::default(),
        }
    }
}

impl SceneSnapshot {
    /// Walks the hierarchy below `root`.
    ///
    /// Disabled entities hide their subtree. An entity reachable twice is visited once.
    /// The camera is `camera_override` when that entity carries one, otherwise the first
    /// camera met in depth-first order.
    pub fn collect(
        managers: &dyn NodeManagers,
        root: NodeId,
        camera_override: Option<NodeId>,
    ) -> Self {
        let mut snapshot = Self::default();
        let mut material_slots: HashMap<NodeId, u32> = HashMap::new();
        let mut visited = HashSet::new();
        let mut first_camera = None;
        let mut override_camera = None;
        let mut stack = vec![(root, Affine3::IDENTITY)];

        while let Some((id, parent_world)) = stack.pop() {
            if !visited.insert(id) {
                log::warn!("Scene walk: entity {id:?} is reachable more than once, skipped");
                continue;
            }
            let Some(entity) = managers.entity(id) else {
                log::debug!("Scene walk: entity {id:?} does not exist");
                continue;
            };
            if !entity.enabled {
                continue;
            }
            let world = parent_world * entity.transform;

            if let Some(geometry_id) = entity.geometry {
                match managers.geometry(geometry_id) {
                    Some(geometry) if geometry.triangle_count() > 0 => {
                        let material = entity
                            .material
                            .map(|m| snapshot.material_slot(managers, &mut material_slots, m))
                            .unwrap_or(0);
                        snapshot.instances.push(InstanceDesc {
                            entity: id,
                            geometry_id,
                            geometry,
                            transform: world,
                            material,
                        });
                    }
                    Some(_) => log::debug!("Scene walk: geometry {geometry_id:?} is empty"),
                    None => log::debug!("Scene walk: geometry {geometry_id:?} does not exist"),
                }
            }

            if let Some(light) = entity.light.and_then(|l| managers.light(l)) {
                if snapshot.lights.len() < MAX_LIGHTS {
                    let direction = match light.kind {
                        LightKind::Directional { direction } => world.transform_vector(direction),
                        LightKind::Point => Vec3::ZERO,
                    };
                    snapshot
                        .lights
                        .push(LightGpu::new(&light, world.translation(), direction));
                } else {
                    log::warn!("Scene walk: more than {MAX_LIGHTS} lights, {id:?} ignored");
                }
            }

            if let Some(camera) = entity.camera.and_then(|c| managers.camera(c)) {
                let view = CameraView {
                    entity: Some(id),
                    transform: world,
                    camera,
                };
                if camera_override == Some(id) {
                    override_camera = Some(view);
                }
                first_camera.get_or_insert(view);
            }

            // Reversed so children are visited in declaration order.
            for child in entity.children.iter().rev() {
                stack.push((*child, world));
            }
        }

        if camera_override.is_some() && override_camera.is_none() {
            log::warn!("Scene walk: camera override {camera_override:?} has no camera");
        }
        match override_camera.or(first_camera) {
            Some(view) => snapshot.camera = view,
            None => log::debug!("Scene walk: no camera, using the default view"),
        }
        snapshot
    }

    fn material_slot(
        &mut self,
        managers: &dyn NodeManagers,
        slots: &mut HashMap<NodeId, u32>,
        material: NodeId,
    ) -> u32 {
        if let Some(slot) = slots.get(&material) {
            return *slot;
        }
        let Some(params) = managers.material(material) else {
            return 0;
        };
        if self.materials.len() >= MAX_MATERIALS {
            log::warn!("Scene walk: more than {MAX_MATERIALS} materials, {material:?} uses the default");
            return 0;
        }
        let slot = self.materials.len() as u32;
        self.materials.push(MaterialGpu::from(&params));
        slots.insert(material, slot);
        slot
    }
}
