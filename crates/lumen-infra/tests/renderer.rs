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

use std::sync::Arc;

use lumen_core::math::{Affine3, Vec3};
use lumen_core::renderer::api::resource::ImageFormat;
use lumen_core::renderer::{RaytraceRenderer, RenderError, RenderSettings};
use lumen_core::scene::{
    DirtySet, Geometry, Light, LightKind, Material, NodeId, RenderImageType, SceneNodeManagers,
};
use lumen_infra::HeadlessRaytraceRenderer;

const SIZE: u32 = 8;

fn init_logger() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn wall(z: f32) -> Geometry {
    Geometry {
        positions: vec![
            Vec3::new(-100.0, -100.0, z),
            Vec3::new(100.0, -100.0, z),
            Vec3::new(100.0, 100.0, z),
            Vec3::new(-100.0, 100.0, z),
        ],
        indices: vec![0, 1, 2, 0, 2, 3],
        ..Default::default()
    }
}

struct Fixture {
    scene: Arc<SceneNodeManagers>,
    root: NodeId,
    wall: NodeId,
    mesh: NodeId,
    renderer: HeadlessRaytraceRenderer,
}

fn fixture(settings: RenderSettings) -> Fixture {
    init_logger();
    let scene = Arc::new(SceneNodeManagers::new());
    let root = scene.spawn("root", None);
    let wall_entity = scene.spawn("wall", Some(root));
    let mesh = scene.add_geometry(wall(-2.0));
    let white = scene.add_material(Material {
        albedo: [1.0; 3],
        ..Default::default()
    });
    scene.update_entity(wall_entity, |e| {
        e.geometry = Some(mesh);
        e.material = Some(white);
    });

    let mut renderer = HeadlessRaytraceRenderer::with_settings(settings);
    renderer.set_node_managers(scene.clone());
    renderer.set_scene_root(Some(root));
    renderer.initialize().unwrap();
    Fixture {
        scene,
        root,
        wall: wall_entity,
        mesh,
        renderer,
    }
}

fn small() -> RenderSettings {
    RenderSettings {
        width: SIZE,
        height: SIZE,
        ..Default::default()
    }
}

fn run_frame(renderer: &mut HeadlessRaytraceRenderer, time: i64) {
    for mut job in renderer.jobs_to_execute(time) {
        job.run().unwrap();
    }
}

fn center_hdr(renderer: &mut HeadlessRaytraceRenderer) -> [f32; 4] {
    let image = renderer.grab_image(RenderImageType::Hdr).unwrap();
    assert_eq!(image.format, ImageFormat::Rgba32Float);
    image.texel_rgba32f(SIZE / 2, SIZE / 2).unwrap()
}

fn assert_close(actual: f32, expected: f32) {
    assert!(
        (actual - expected).abs() < 1e-4,
        "expected {expected}, got {actual}"
    );
}

#[test]
fn empty_scene_renders_the_exposed_sky() {
    init_logger();
    let mut renderer = HeadlessRaytraceRenderer::with_settings(RenderSettings {
        exposure: 2.0,
        ..small()
    });
    renderer.initialize().unwrap();
    run_frame(&mut renderer, 0);

    let texel = center_hdr(&mut renderer);
    assert_close(texel[0], 1.1);
    assert_close(texel[1], 1.4);
    assert_close(texel[2], 1.8);
    assert_eq!(texel[3], 1.0);

    let device = renderer.device().unwrap();
    assert_eq!(device.take_validation_messages(), Vec::new());
    renderer.shutdown();
    assert_eq!(device.resource_count(), 0);
}

#[test]
fn wall_is_lit_by_ambient_sky_and_directional_light() {
    let mut fx = fixture(small());
    run_frame(&mut fx.renderer, 0);
    let ambient = center_hdr(&mut fx.renderer);
    assert_close(ambient[0], 0.055);
    assert_close(ambient[2], 0.09);

    let sun = fx.scene.spawn("sun", Some(fx.root));
    let light = fx.scene.add_light(Light {
        kind: LightKind::Directional {
            direction: Vec3::new(0.0, 0.0, -1.0),
        },
        color: [1.0; 3],
        intensity: 1.0,
    });
    fx.scene.update_entity(sun, |e| e.light = Some(light));
    fx.renderer.mark_dirty(DirtySet::LIGHT, Some(sun));
    run_frame(&mut fx.renderer, 1);

    let lit = center_hdr(&mut fx.renderer);
    assert_close(lit[0], 1.055);
    assert_close(lit[1], 1.07);

    let final_image = fx.renderer.grab_image(RenderImageType::Final).unwrap();
    assert_eq!(final_image.format, ImageFormat::Rgba8Unorm);
    assert_eq!(final_image.texel(0, 0), Some(&[255u8, 255, 255, 255][..]));

    let device = fx.renderer.device().unwrap();
    assert_eq!(device.take_validation_messages(), Vec::new());
}

#[test]
fn statistics_count_frames_dispatches_and_builds() {
    let mut fx = fixture(small());
    run_frame(&mut fx.renderer, 0);
    run_frame(&mut fx.renderer, 1);

    let stats = fx.renderer.statistics();
    assert_eq!(stats.frame_number, 2);
    assert_eq!(stats.command_buffers_submitted, 2);
    assert_eq!(stats.ray_dispatches, 2);
    assert_eq!(stats.rays_traced, 2 * (SIZE * SIZE) as u64);
    assert_eq!(stats.acceleration_structure_builds, 2);
    assert_eq!(stats.acceleration_structure_updates, 0);
    assert_eq!(stats.instance_count, 1);

    fx.renderer.grab_image(RenderImageType::Hdr).unwrap();
    assert_eq!(fx.renderer.statistics().command_buffers_submitted, 2);
}

#[test]
fn edited_geometry_is_refit_and_moved_entities_update_the_top_level() {
    let mut fx = fixture(small());
    run_frame(&mut fx.renderer, 0);

    assert!(fx.scene.replace_geometry(fx.mesh, wall(-3.0)));
    fx.renderer.mark_dirty(DirtySet::GEOMETRY, Some(fx.mesh));
    run_frame(&mut fx.renderer, 1);
    let stats = fx.renderer.statistics();
    assert_eq!(stats.acceleration_structure_builds, 2);
    assert_eq!(stats.acceleration_structure_updates, 2);

    fx.scene.update_entity(fx.wall, |e| {
        e.transform = Affine3::from_translation(Vec3::new(0.0, 0.0, -1.0));
    });
    fx.renderer.mark_dirty(DirtySet::TRANSFORM, Some(fx.wall));
    run_frame(&mut fx.renderer, 2);
    assert_eq!(fx.renderer.statistics().acceleration_structure_updates, 3);

    let device = fx.renderer.device().unwrap();
    assert_eq!(device.take_validation_messages(), Vec::new());
}

#[test]
fn new_topology_rebuilds_from_scratch() {
    let mut fx = fixture(small());
    run_frame(&mut fx.renderer, 0);

    let triangle = Geometry {
        positions: vec![
            Vec3::new(-100.0, -100.0, -2.0),
            Vec3::new(100.0, -100.0, -2.0),
            Vec3::new(0.0, 100.0, -2.0),
        ],
        indices: vec![0, 1, 2],
        ..Default::default()
    };
    assert!(fx.scene.replace_geometry(fx.mesh, triangle));
    fx.renderer.mark_dirty(DirtySet::GEOMETRY, Some(fx.mesh));
    run_frame(&mut fx.renderer, 1);
    run_frame(&mut fx.renderer, 2);

    let stats = fx.renderer.statistics();
    assert_eq!(stats.acceleration_structure_builds, 3);
    assert_eq!(stats.acceleration_structure_updates, 1);
    let device = fx.renderer.device().unwrap();
    assert_eq!(device.take_validation_messages(), Vec::new());
}

#[test]
fn resizing_recreates_the_targets() {
    let mut fx = fixture(small());
    run_frame(&mut fx.renderer, 0);

    fx.renderer.set_settings(RenderSettings {
        width: 4,
        height: 2,
        frames_in_flight: 3,
        ..small()
    });
    run_frame(&mut fx.renderer, 1);
    let image = fx.renderer.grab_image(RenderImageType::Final).unwrap();
    assert_eq!((image.width, image.height), (4, 2));
    assert_eq!(image.data.len(), 4 * 2 * 4);

    let device = fx.renderer.device().unwrap();
    assert_eq!(device.take_validation_messages(), Vec::new());
}

#[test]
fn shutdown_releases_every_object() {
    let mut fx = fixture(small());
    for time in 0..4 {
        run_frame(&mut fx.renderer, time);
    }
    let device = fx.renderer.device().unwrap();
    assert!(device.resource_count() > 0);

    fx.renderer.shutdown();
    assert_eq!(device.resource_count(), 0);
    assert!(fx.renderer.jobs_to_execute(5).is_empty());
    assert_eq!(
        fx.renderer.grab_image(RenderImageType::Hdr).unwrap_err(),
        RenderError::NotInitialized
    );
}

#[test]
fn lost_device_fails_the_frame_job() {
    let mut fx = fixture(small());
    run_frame(&mut fx.renderer, 0);
    fx.renderer.device().unwrap().lose_device();

    let failures: Vec<RenderError> = fx
        .renderer
        .jobs_to_execute(1)
        .into_iter()
        .filter_map(|mut job| job.run().err())
        .collect();
    assert!(matches!(
        failures.as_slice(),
        [RenderError::JobFailed { job: "frame_render", .. }]
    ));
}
