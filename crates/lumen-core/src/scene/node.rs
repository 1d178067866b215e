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

//! Backend nodes the renderer reads from the scene graph.

use serde::{Deserialize, Serialize};

use crate::math::{Affine3, Vec3};

/// Identifies a backend node (entity or component).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NodeId(pub u64);

/// A node of the scene hierarchy and the components attached to it.
#[derive(Debug, Clone, PartialEq)]
pub struct Entity {
    /// The entity.
    pub id: NodeId,
    /// Debug name.
    pub name: String,
    /// Disabled entities and their subtrees are not rendered.
    pub enabled: bool,
    /// Parent-relative transform.
    pub transform: Affine3,
    /// Child entities.
    pub children: Vec<NodeId>,
    /// Attached geometry.
    pub geometry: Option<NodeId>,
    /// Attached material.
    pub material: Option<NodeId>,
    /// Attached light.
    pub light: Option<NodeId>,
    /// Attached camera.
    pub camera: Option<NodeId>,
}

impl Entity {
    /// An enabled entity with an identity transform and no components.
    pub fn new(id: NodeId, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            enabled: true,
            transform: Affine3::IDENTITY,
            children: Vec::new(),
            geometry: None,
            material: None,
            light: None,
            camera: None,
        }
    }
}

/// An indexed triangle mesh in object space.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Geometry {
    /// The geometry node.
    pub id: Option<NodeId>,
    /// Vertex positions.
    pub positions: Vec<Vec3>,
    /// Triangle indices; three per triangle.
    pub indices: Vec<u32>,
    /// Bumped by the scene whenever the data changes.
    pub revision: u64,
}

impl Geometry {
    /// Number of triangles.
    pub fn triangle_count(&self) -> usize {
        self.indices.len() / 3
    }

    /// `true` when the topology (vertex count or index list) differs from `other`, which
    /// rules out refitting an acceleration structure built for one with the other.
    pub fn topology_differs(&self, other: &Geometry) -> bool {
        self.positions.len() != other.positions.len() || self.indices != other.indices
    }
}

/// Surface parameters.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Material {
    /// Diffuse reflectance in linear RGB.
    pub albedo: [f32; 3],
    /// Emitted radiance in linear RGB.
    pub emission: [f32; 3],
    /// Roughness in `[0, 1]`.
    pub roughness: f32,
}

impl Default for Material {
    fn default() -> Self {
        Self {
            albedo: [0.8, 0.8, 0.8],
            emission: [0.0; 3],
            roughness: 1.0,
        }
    }
}

/// The shape of a light.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum LightKind {
    /// Parallel rays travelling along `direction`.
    Directional {
        /// World-space direction the light travels in.
        direction: Vec3,
    },
    /// Rays emitted in all directions from the entity origin.
    Point,
}

/// A light source.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Light {
    /// Shape.
    pub kind: LightKind,
    /// Linear RGB colour.
    pub color: [f32; 3],
    /// Multiplier applied to `color`.
    pub intensity: f32,
}

/// A pinhole camera looking down its entity's negative Z axis.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Camera {
    /// Vertical field of view in radians.
    pub fov_y: f32,
    /// Exposure multiplier applied to traced radiance.
    pub exposure: f32,
}

impl Default for Camera {
    fn default() -> Self {
        Self {
            fov_y: std::f32::consts::FRAC_PI_3,
            exposure: 1.0,
        }
    }
}
