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

//! Brute-force ray queries over built acceleration structures, and the CPU
//! ray-generation programs that stand in for shaders on the headless device.

use std::collections::HashMap;
use std::fmt::Debug;
use std::sync::Arc;

use lumen_core::math::{Affine3, Vec3};
use lumen_core::renderer::api::acceleration::InstanceFlags;

const HIT_EPSILON: f32 = 1e-7;

/// A ray with a parametric extent `[t_min, t_max]`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Ray {
    /// Origin in world space.
    pub origin: Vec3,
    /// Direction; not required to be normalized.
    pub direction: Vec3,
    /// Closest accepted parameter.
    pub t_min: f32,
    /// Farthest accepted parameter.
    pub t_max: f32,
}

impl Ray {
    /// A ray from `origin` along `direction` over `[1e-4, inf)`.
    pub fn new(origin: Vec3, direction: Vec3) -> Self {
        Self {
            origin,
            direction,
            t_min: 1e-4,
            t_max: f32::INFINITY,
        }
    }

    /// The point at parameter `t`.
    pub fn at(&self, t: f32) -> Vec3 {
        self.origin + self.direction * t
    }
}

/// The closest intersection found by [`SceneQuery::trace`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Hit {
    /// Ray parameter of the hit.
    pub t: f32,
    /// Index of the instance in the top-level structure.
    pub instance_index: u32,
    /// The instance's 24-bit custom index.
    pub custom_index: u32,
    /// The instance's hit-group offset.
    pub hit_group_offset: u32,
    /// Triangle or AABB index inside the bottom-level structure.
    pub primitive_index: u32,
    /// Barycentric `(u, v)` of a triangle hit; zero for AABBs.
    pub barycentrics: [f32; 2],
    /// World-space unit normal, facing against the ray.
    pub normal: Vec3,
}

/// The primitives of a built bottom-level structure, in object space.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BottomLevelGeometry {
    /// Triangles, three vertices each.
    pub triangles: Vec<[Vec3; 3]>,
    /// Boxes as `[min, max]`.
    pub aabbs: Vec<[Vec3; 2]>,
}

impl BottomLevelGeometry {
    /// Number of primitives.
    pub fn primitive_count(&self) -> usize {
        self.triangles.len() + self.aabbs.len()
    }
}

/// One resolved instance of a built top-level structure.
#[derive(Debug, Clone)]
pub struct SceneInstance {
    /// Object-to-world transform.
    pub transform: Affine3,
    /// The inverse of `transform`.
    pub world_to_object: Affine3,
    /// 24-bit custom index.
    pub custom_index: u32,
    /// Visibility mask.
    pub mask: u8,
    /// Hit-group offset.
    pub hit_group_offset: u32,
    /// Instance flags.
    pub flags: InstanceFlags,
    /// The referenced bottom-level primitives.
    pub geometry: Arc<BottomLevelGeometry>,
}

impl SceneInstance {
    /// Builds an instance, or `None` when `transform` is singular.
    pub fn new(transform: Affine3, geometry: Arc<BottomLevelGeometry>) -> Option<Self> {
        Some(Self {
            transform,
            world_to_object: transform.inverse()?,
            custom_index: 0,
            mask: 0xff,
            hit_group_offset: 0,
            flags: InstanceFlags::EMPTY,
            geometry,
        })
    }
}

/// Traces rays against every instance of a top-level structure.
#[derive(Debug, Clone)]
pub struct SceneQuery {
    instances: Arc<[SceneInstance]>,
}

impl Default for SceneQuery {
    fn default() -> Self {
        Self::new(Vec::new())
    }
}

impl SceneQuery {
    /// A query over `instances`.
    pub fn new(instances: impl Into<Arc<[SceneInstance]>>) -> Self {
        Self {
            instances: instances.into(),
        }
    }

    /// Number of instances.
    pub fn instance_count(&self) -> usize {
        self.instances.len()
    }

    /// The closest hit of `ray` among instances whose mask intersects `mask`.
    pub fn trace(&self, ray: &Ray, mask: u8) -> Option<Hit> {
        let mut closest: Option<Hit> = None;
        let mut t_max = ray.t_max;
        for (index, instance) in self.instances.iter().enumerate() {
            if instance.mask & mask == 0 {
                continue;
            }
            if let Some(hit) = intersect_instance(instance, index as u32, ray, t_max, false) {
                t_max = hit.t;
                closest = Some(hit);
            }
        }
        closest
    }

    /// `true` when anything blocks `ray`.
    pub fn occluded(&self, ray: &Ray, mask: u8) -> bool {
        self.instances.iter().enumerate().any(|(index, instance)| {
            instance.mask & mask != 0
                && intersect_instance(instance, index as u32, ray, ray.t_max, true).is_some()
        })
    }
}

fn intersect_instance(
    instance: &SceneInstance,
    index: u32,
    ray: &Ray,
    t_max: f32,
    any_hit: bool,
) -> Option<Hit> {
    let w2o = &instance.world_to_object;
    let origin = w2o.transform_point(ray.origin);
    let direction = w2o.transform_vector(ray.direction);

    let mut best: Option<(f32, u32, [f32; 2], Vec3)> = None;
    let mut limit = t_max;

    for (primitive, tri) in instance.geometry.triangles.iter().enumerate() {
        if let Some((t, u, v)) = intersect_triangle(origin, direction, tri, ray.t_min, limit) {
            let normal = (tri[1] - tri[0]).cross(tri[2] - tri[0]);
            best = Some((t, primitive as u32, [u, v], normal));
            if any_hit {
                break;
            }
            limit = t;
        }
    }
    if best.is_none() || !any_hit {
        let base = instance.geometry.triangles.len() as u32;
        for (primitive, aabb) in instance.geometry.aabbs.iter().enumerate() {
            if let Some((t, normal)) = intersect_aabb(origin, direction, aabb, ray.t_min, limit) {
                best = Some((t, base + primitive as u32, [0.0, 0.0], normal));
                if any_hit {
                    break;
                }
                limit = t;
            }
        }
    }

    let (t, primitive_index, barycentrics, object_normal) = best?;
    let mut normal = normal_to_world(w2o, object_normal).normalize();
    if normal.dot(ray.direction) > 0.0 {
        normal = -normal;
    }
    Some(Hit {
        t,
        instance_index: index,
        custom_index: instance.custom_index,
        hit_group_offset: instance.hit_group_offset,
        primitive_index,
        barycentrics,
        normal,
    })
}

// Two-sided Möller–Trumbore.
fn intersect_triangle(
    origin: Vec3,
    direction: Vec3,
    tri: &[Vec3; 3],
    t_min: f32,
    t_max: f32,
) -> Option<(f32, f32, f32)> {
    let edge1 = tri[1] - tri[0];
    let edge2 = tri[2] - tri[0];
    let p = direction.cross(edge2);
    let det = edge1.dot(p);
    if det.abs() < HIT_EPSILON {
        return None;
    }
    let inv_det = 1.0 / det;
    let s = origin - tri[0];
    let u = s.dot(p) * inv_det;
    if !(0.0..=1.0).contains(&u) {
        return None;
    }
    let q = s.cross(edge1);
    let v = direction.dot(q) * inv_det;
    if v < 0.0 || u + v > 1.0 {
        return None;
    }
    let t = edge2.dot(q) * inv_det;
    (t >= t_min && t < t_max).then_some((t, u, v))
}

fn intersect_aabb(
    origin: Vec3,
    direction: Vec3,
    aabb: &[Vec3; 2],
    t_min: f32,
    t_max: f32,
) -> Option<(f32, Vec3)> {
    let o = origin.to_array();
    let d = direction.to_array();
    let lo = aabb[0].to_array();
    let hi = aabb[1].to_array();

    let mut near = f32::NEG_INFINITY;
    let mut far = f32::INFINITY;
    let mut near_axis = 0;
    for axis in 0..3 {
        if d[axis].abs() < HIT_EPSILON {
            if o[axis] < lo[axis] || o[axis] > hi[axis] {
                return None;
            }
            continue;
        }
        let inv = 1.0 / d[axis];
        let (t0, t1) = {
            let a = (lo[axis] - o[axis]) * inv;
            let b = (hi[axis] - o[axis]) * inv;
            if a < b {
                (a, b)
            } else {
                (b, a)
            }
        };
        if t0 > near {
            near = t0;
            near_axis = axis;
        }
        far = far.min(t1);
        if near > far {
            return None;
        }
    }

    let t = if near >= t_min { near } else { far };
    if t < t_min || t >= t_max {
        return None;
    }
    let mut normal = [0.0f32; 3];
    normal[near_axis] = 1.0;
    Some((t, Vec3::from(normal)))
}

// Normals go through the inverse transpose of the object-to-world transform.
fn normal_to_world(world_to_object: &Affine3, n: Vec3) -> Vec3 {
    let r = &world_to_object.rows;
    Vec3::new(
        r[0][0] * n.x + r[1][0] * n.y + r[2][0] * n.z,
        r[0][1] * n.x + r[1][1] * n.y + r[2][1] * n.z,
        r[0][2] * n.x + r[1][2] * n.y + r[2][2] * n.z,
    )
}

/// Where a ray-generation invocation runs and which shader records it was given.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LaunchInfo {
    /// Pixel column.
    pub x: u32,
    /// Pixel row.
    pub y: u32,
    /// Launch width.
    pub width: u32,
    /// Launch height.
    pub height: u32,
    /// Miss record selected by the dispatch.
    pub miss_index: u32,
    /// Hit-group record selected by the dispatch.
    pub hit_index: u32,
}

/// What a ray-generation program can see while it runs.
#[derive(Debug, Clone, Copy)]
pub struct RayContext<'a> {
    scene: &'a SceneQuery,
    push_constants: &'a [u8],
    buffers: &'a HashMap<u32, Vec<u8>>,
}

impl<'a> RayContext<'a> {
    /// Builds a context over bound data.
    pub fn new(
        scene: &'a SceneQuery,
        push_constants: &'a [u8],
        buffers: &'a HashMap<u32, Vec<u8>>,
    ) -> Self {
        Self {
            scene,
            push_constants,
            buffers,
        }
    }

    /// The top-level structure bound at set 0.
    pub fn scene(&self) -> &SceneQuery {
        self.scene
    }

    /// The raw push-constant block.
    pub fn push_constants(&self) -> &[u8] {
        self.push_constants
    }

    /// Reads a `T` from the start of the push-constant block.
    pub fn read_push_constants<T: bytemuck::Pod>(&self) -> Option<T> {
        let size = std::mem::size_of::<T>();
        self.push_constants
            .get(..size)
            .map(bytemuck::pod_read_unaligned)
    }

    /// Contents of the buffer bound at `binding` of set 0.
    pub fn buffer(&self, binding: u32) -> Option<&[u8]> {
        self.buffers.get(&binding).map(Vec::as_slice)
    }

    /// Element `index` of the buffer bound at `binding`, read as an array of `T`.
    pub fn read_buffer<T: bytemuck::Pod>(&self, binding: u32, index: usize) -> Option<T> {
        let size = std::mem::size_of::<T>();
        let start = index.checked_mul(size)?;
        self.buffer(binding)?
            .get(start..start.checked_add(size)?)
            .map(bytemuck::pod_read_unaligned)
    }
}

/// A CPU ray-generation program, run once per launched pixel.
///
/// The returned value is stored in the storage image bound at set 0.
pub trait RayGenProgram: Send + Sync + Debug {
    /// Shades one pixel.
    fn shade(&self, launch: &LaunchInfo, ctx: &RayContext<'_>) -> [f32; 4];
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unit_triangle_at(z: f32) -> Arc<BottomLevelGeometry> {
        Arc::new(BottomLevelGeometry {
            triangles: vec![[
                Vec3::new(-1.0, -1.0, z),
                Vec3::new(1.0, -1.0, z),
                Vec3::new(0.0, 1.0, z),
            ]],
            aabbs: Vec::new(),
        })
    }

    fn forward_ray() -> Ray {
        Ray::new(Vec3::ZERO, Vec3::new(0.0, 0.0, -1.0))
    }

    #[test]
    fn closest_instance_wins() {
        let near = SceneInstance::new(Affine3::IDENTITY, unit_triangle_at(-2.0)).unwrap();
        let mut far = SceneInstance::new(Affine3::IDENTITY, unit_triangle_at(-5.0)).unwrap();
        far.custom_index = 9;
        let query = SceneQuery::new(vec![far, near]);

        let hit = query.trace(&forward_ray(), 0xff).expect("ray hits");
        assert!((hit.t - 2.0).abs() < 1e-5);
        assert_eq!(hit.instance_index, 1);
        assert!((hit.normal.z - 1.0).abs() < 1e-5);
    }

    #[test]
    fn instance_transform_moves_geometry() {
        let shifted = SceneInstance::new(
            Affine3::from_translation(Vec3::new(10.0, 0.0, 0.0)),
            unit_triangle_at(-2.0),
        )
        .unwrap();
        let query = SceneQuery::new(vec![shifted]);
        assert!(query.trace(&forward_ray(), 0xff).is_none());

        let ray = Ray::new(Vec3::new(10.0, 0.0, 0.0), Vec3::new(0.0, 0.0, -1.0));
        let hit = query.trace(&ray, 0xff).expect("shifted ray hits");
        assert!((hit.t - 2.0).abs() < 1e-5);
    }

    #[test]
    fn mask_filters_instances() {
        let mut instance = SceneInstance::new(Affine3::IDENTITY, unit_triangle_at(-2.0)).unwrap();
        instance.mask = 0b0000_0010;
        let query = SceneQuery::new(vec![instance]);
        assert!(query.trace(&forward_ray(), 0b0000_0001).is_none());
        assert!(query.occluded(&forward_ray(), 0b0000_0010));
    }

    #[test]
    fn t_max_limits_occlusion() {
        let query = SceneQuery::new(vec![
            SceneInstance::new(Affine3::IDENTITY, unit_triangle_at(-2.0)).unwrap()
        ]);
        let mut ray = forward_ray();
        ray.t_max = 1.5;
        assert!(!query.occluded(&ray, 0xff));
    }

    #[test]
    fn aabb_primitives_are_hit_after_triangles() {
        let geometry = Arc::new(BottomLevelGeometry {
            triangles: Vec::new(),
            aabbs: vec![[Vec3::new(-1.0, -1.0, -4.0), Vec3::new(1.0, 1.0, -3.0)]],
        });
        let query =
            SceneQuery::new(vec![SceneInstance::new(Affine3::IDENTITY, geometry).unwrap()]);
        let hit = query.trace(&forward_ray(), 0xff).expect("box is hit");
        assert!((hit.t - 3.0).abs() < 1e-5);
        assert_eq!(hit.primitive_index, 0);
        assert!((hit.normal.z - 1.0).abs() < 1e-5);
    }

    #[test]
    fn singular_instance_transform_is_rejected() {
        let flat = Affine3::from_scale(Vec3::new(1.0, 0.0, 1.0));
        assert!(SceneInstance::new(flat, unit_triangle_at(0.0)).is_none());
    }

    #[test]
    fn context_reads_pod_values() {
        let scene = SceneQuery::default();
        let push = 7u32.to_le_bytes();
        let mut buffers = HashMap::new();
        buffers.insert(2, [1.0f32, 2.0, 3.0].iter().flat_map(|f| f.to_le_bytes()).collect());
        let ctx = RayContext::new(&scene, &push, &buffers);

        assert_eq!(ctx.read_push_constants::<u32>(), Some(7));
        assert_eq!(ctx.read_push_constants::<[u32; 2]>(), None);
        assert_eq!(ctx.read_buffer::<f32>(2, 2), Some(3.0));
        assert_eq!(ctx.read_buffer::<f32>(2, 3), None);
        assert!(ctx.buffer(5).is_none());
    }
}
