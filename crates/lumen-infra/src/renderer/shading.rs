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

//! The default ray-generation program: direct lighting with hard shadows under a
//! constant sky.

use lumen_core::math::Vec3;

use crate::graphics::headless::{LaunchInfo, Ray, RayContext, RayGenProgram};

use super::gpu::{xyz, FramePushConstants, LightGpu, MaterialGpu, BINDING_LIGHTS, BINDING_MATERIALS};

/// Fraction of the sky radiance reaching every surface as ambient light.
const AMBIENT: f32 = 0.1;
/// Offset applied along the normal before tracing shadow rays.
const SHADOW_BIAS: f32 = 1e-3;

/// Shades the first hit of each camera ray with every light of the light table.
///
/// Misses return the sky radiance. Each sample jitters the ray inside the pixel; the
/// result is the average of all samples, multiplied by the exposure.
#[derive(Debug, Default, Clone, Copy)]
pub struct SkyShadingProgram;

impl SkyShadingProgram {
    fn radiance(&self, ray: &Ray, frame: &FramePushConstants, ctx: &RayContext<'_>) -> Vec3 {
        let sky = xyz(frame.sky);
        let Some(hit) = ctx.scene().trace(ray, 0xff) else {
            return sky;
        };

        let material = ctx
            .read_buffer::<MaterialGpu>(BINDING_MATERIALS, hit.custom_index as usize)
            .unwrap_or_default();
        let albedo = xyz(material.albedo);
        let position = ray.at(hit.t);
        let origin = position + hit.normal * SHADOW_BIAS;

        let mut incoming = sky * AMBIENT;
        for index in 0..frame.light_count() as usize {
            let Some(light) = ctx.read_buffer::<LightGpu>(BINDING_LIGHTS, index) else {
                break;
            };
            let (direction, distance, falloff) = if light.is_point() {
                let to_light = xyz(light.position_or_direction) - position;
                let distance = to_light.length();
                if distance <= f32::EPSILON {
                    continue;
                }
                (to_light * (1.0 / distance), distance, 1.0 / (distance * distance))
            } else {
                (xyz(light.position_or_direction), f32::INFINITY, 1.0)
            };

            let cosine = hit.normal.dot(direction);
            if cosine <= 0.0 {
                continue;
            }
            let shadow = Ray {
                t_max: distance,
                ..Ray::new(origin, direction)
            };
            if ctx.scene().occluded(&shadow, 0xff) {
                continue;
            }
            incoming = incoming + xyz(light.radiance) * (cosine * falloff);
        }

        xyz(material.emission) + albedo.mul_elem(incoming)
    }
}

impl RayGenProgram for SkyShadingProgram {
    fn shade(&self, launch: &LaunchInfo, ctx: &RayContext<'_>) -> [f32; 4] {
        let Some(frame) = ctx.read_push_constants::<FramePushConstants>() else {
            return [0.0, 0.0, 0.0, 1.0];
        };
        let origin = xyz(frame.camera_origin);
        let forward = xyz(frame.camera_forward);
        let right = xyz(frame.camera_right);
        let up = xyz(frame.camera_up);
        let tan_half_fov = frame.camera_origin[3];
        let aspect = frame.camera_forward[3];

        let samples = frame.samples();
        let mut sum = Vec3::ZERO;
        for sample in 0..samples {
            let (jx, jy) = if samples == 1 {
                (0.5, 0.5)
            } else {
                jitter(launch.x, launch.y, frame.frame(), sample)
            };
            let u = ((launch.x as f32 + jx) / launch.width as f32) * 2.0 - 1.0;
            let v = 1.0 - ((launch.y as f32 + jy) / launch.height as f32) * 2.0;
            let direction = (forward
                + right * (u * tan_half_fov * aspect)
                + up * (v * tan_half_fov))
                .normalize();
            sum = sum + self.radiance(&Ray::new(origin, direction), &frame, ctx);
        }

        let exposure = frame.sky[3];
        let color = sum * (exposure / samples as f32);
        [color.x, color.y, color.z, 1.0]
    }
}

/// A sub-pixel offset in `[0, 1)²`, stable for a given pixel, frame and sample.
fn jitter(x: u32, y: u32, frame: u32, sample: u32) -> (f32, f32) {
    let seed = hash(x ^ hash(y ^ hash(frame ^ hash(sample))));
    let a = hash(seed);
    let b = hash(a);
    let to_unit = |h: u32| (h >> 8) as f32 / (1u32 << 24) as f32;
    (to_unit(a), to_unit(b))
}

fn hash(mut h: u32) -> u32 {
    h ^= h >> 16;
    h = h.wrapping_mul(0x7feb_352d);
    h ^= h >> 15;
    h = h.wrapping_mul(0x846c_a68b);
    h ^= h >> 16;
    h
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::sync::Arc;

    use super::*;
    use crate::graphics::headless::{BottomLevelGeometry, SceneInstance, SceneQuery};
    use lumen_core::math::Affine3;

    fn frame(light_count: u32) -> FramePushConstants {
        FramePushConstants {
            camera_origin: [0.0, 0.0, 0.0, 1.0],
            camera_forward: [0.0, 0.0, -1.0, 1.0],
            camera_right: [1.0, 0.0, 0.0, 0.0],
            camera_up: [0.0, 1.0, 0.0, 0.0],
            sky: [0.2, 0.4, 0.8, 1.0],
            counts: [0, 1, light_count, 1],
        }
    }

    fn wall() -> SceneQuery {
        let geometry = Arc::new(BottomLevelGeometry {
            triangles: vec![[
                Vec3::new(-10.0, -10.0, -5.0),
                Vec3::new(10.0, -10.0, -5.0),
                Vec3::new(0.0, 10.0, -5.0),
            ]],
            aabbs: Vec::new(),
        });
        let instance = SceneInstance::new(Affine3::IDENTITY, geometry).unwrap();
        SceneQuery::new(vec![instance])
    }

    fn center() -> LaunchInfo {
        LaunchInfo {
            x: 0,
            y: 0,
            width: 1,
            height: 1,
            miss_index: 0,
            hit_index: 0,
        }
    }

    #[test]
    fn miss_returns_exposed_sky() {
        let scene = SceneQuery::new(Vec::new());
        let mut block = frame(0);
        block.sky[3] = 2.0;
        let buffers = HashMap::new();
        let ctx = RayContext::new(&scene, bytemuck::bytes_of(&block), &buffers);
        assert_eq!(SkyShadingProgram.shade(&center(), &ctx), [0.4, 0.8, 1.6, 1.0]);
    }

    #[test]
    fn lit_surface_is_brighter_than_ambient() {
        let scene = wall();
        let material = MaterialGpu {
            albedo: [1.0, 1.0, 1.0, 1.0],
            emission: [0.0; 4],
        };
        let light = LightGpu {
            position_or_direction: [0.0, 0.0, 1.0, 0.0],
            radiance: [1.0, 1.0, 1.0, 0.0],
        };
        let mut buffers = HashMap::new();
        buffers.insert(BINDING_MATERIALS, bytemuck::bytes_of(&material).to_vec());
        buffers.insert(BINDING_LIGHTS, bytemuck::bytes_of(&light).to_vec());

        let dark = frame(0);
        let ctx = RayContext::new(&scene, bytemuck::bytes_of(&dark), &buffers);
        let ambient = SkyShadingProgram.shade(&center(), &ctx);
        assert!((ambient[2] - 0.08).abs() < 1e-5);

        let lit = frame(1);
        let ctx = RayContext::new(&scene, bytemuck::bytes_of(&lit), &buffers);
        let shaded = SkyShadingProgram.shade(&center(), &ctx);
        assert!((shaded[0] - 1.02).abs() < 1e-4, "{shaded:?}");
    }

    #[test]
    fn jitter_stays_inside_the_pixel() {
        for sample in 0..64 {
            let (x, y) = jitter(3, 7, 11, sample);
            assert!((0.0..1.0).contains(&x) && (0.0..1.0).contains(&y));
        }
        assert_eq!(jitter(1, 2, 3, 4), jitter(1, 2, 3, 4));
    }
}
