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

//! Plain-old-data layouts shared between the renderer and its ray-generation program.

use bytemuck::{Pod, Zeroable};
use lumen_core::math::Vec3;
use lumen_core::scene::{Light, LightKind, Material};

/// Descriptor binding of the top-level acceleration structure.
pub const BINDING_SCENE: u32 = 0;
/// Descriptor binding of the HDR storage image.
pub const BINDING_HDR_TARGET: u32 = 1;
/// Descriptor binding of the material table.
pub const BINDING_MATERIALS: u32 = 2;
/// Descriptor binding of the light table.
pub const BINDING_LIGHTS: u32 = 3;

/// Capacity of the material table. Slot 0 holds the default material.
pub const MAX_MATERIALS: usize = 256;
/// Capacity of the light table.
pub const MAX_LIGHTS: usize = 16;

/// One entry of the material table, indexed by the instance custom index.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Default, Pod, Zeroable)]
pub struct MaterialGpu {
    /// Diffuse reflectance; `w` holds the roughness.
    pub albedo: [f32; 4],
    /// Emitted radiance; `w` is unused.
    pub emission: [f32; 4],
}

impl From<&Material> for MaterialGpu {
    fn from(material: &Material) -> Self {
        let [r, g, b] = material.albedo;
        let [er, eg, eb] = material.emission;
        Self {
            albedo: [r, g, b, material.roughness],
            emission: [er, eg, eb, 0.0],
        }
    }
}

/// One entry of the light table.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Default, Pod, Zeroable)]
pub struct LightGpu {
    /// World position (`w == 1`) of a point light, or the unit direction towards a
    /// directional light (`w == 0`).
    pub position_or_direction: [f32; 4],
    /// Colour times intensity; `w` is unused.
    pub radiance: [f32; 4],
}

impl LightGpu {
    /// Places `light` in the world. `position` and `travel_direction` are world-space.
    pub fn new(light: &Light, position: Vec3, travel_direction: Vec3) -> Self {
        let position_or_direction = match light.kind {
            LightKind::Point => [position.x, position.y, position.z, 1.0],
            LightKind::Directional { .. } => {
                let to_light = (-travel_direction).normalize();
                [to_light.x, to_light.y, to_light.z, 0.0]
            }
        };
        let [r, g, b] = light.color.map(|c| c * light.intensity);
        Self {
            position_or_direction,
            radiance: [r, g, b, 0.0],
        }
    }

    /// `true` for a point light.
    pub fn is_point(&self) -> bool {
        self.position_or_direction[3] != 0.0
    }
}

/// The push-constant block of a frame dispatch.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Default, Pod, Zeroable)]
pub struct FramePushConstants {
    /// Camera position; `w` holds `tan(fov_y / 2)`.
    pub camera_origin: [f32; 4],
    /// Unit view direction; `w` holds the aspect ratio.
    pub camera_forward: [f32; 4],
    /// Unit right vector.
    pub camera_right: [f32; 4],
    /// Unit up vector.
    pub camera_up: [f32; 4],
    /// Sky radiance; `w` holds the exposure.
    pub sky: [f32; 4],
    /// Frame number, samples per pixel, light count, material count.
    pub counts: [u32; 4],
}

impl FramePushConstants {
    /// Frame number the block was recorded for.
    pub fn frame(&self) -> u32 {
        self.counts[0]
    }

    /// Samples traced per pixel.
    pub fn samples(&self) -> u32 {
        self.counts[1].max(1)
    }

    /// Entries used in the light table.
    pub fn light_count(&self) -> u32 {
        self.counts[2]
    }

    /// Entries used in the material table.
    pub fn material_count(&self) -> u32 {
        self.counts[3]
    }
}

/// `xyz` of a padded vector.
pub(crate) fn xyz(v: [f32; 4]) -> Vec3 {
    Vec3::new(v[0], v[1], v[2])
}
