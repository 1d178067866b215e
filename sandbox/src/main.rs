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

// Lumen sandbox
// Renders a ground quad, a triangle, a sun and a camera through the job interface.

use std::sync::Arc;

use anyhow::{Context, Result};
use lumen_core::math::{Affine3, Vec3};
use lumen_core::renderer::{RaytraceRenderer, RenderSettings};
use lumen_core::scene::{
    Camera, DirtySet, Geometry, Light, LightKind, Material, NodeId, RenderImageType,
    SceneNodeManagers,
};
use lumen_infra::HeadlessRaytraceRenderer;

const FRAMES: i64 = 8;

struct SandboxScene {
    nodes: Arc<SceneNodeManagers>,
    root: NodeId,
    spinner: NodeId,
}

fn build_scene() -> SandboxScene {
    let nodes = Arc::new(SceneNodeManagers::new());
    let root = nodes.spawn("root", None);

    let ground = nodes.spawn("ground", Some(root));
    let quad = nodes.add_geometry(Geometry {
        positions: vec![
            Vec3::new(-10.0, 0.0, -10.0),
            Vec3::new(10.0, 0.0, -10.0),
            Vec3::new(10.0, 0.0, 10.0),
            Vec3::new(-10.0, 0.0, 10.0),
        ],
        indices: vec![0, 2, 1, 0, 3, 2],
        ..Default::default()
    });
    let grey = nodes.add_material(Material::default());
    nodes.update_entity(ground, |e| {
        e.geometry = Some(quad);
        e.material = Some(grey);
    });

    let spinner = nodes.spawn("triangle", Some(root));
    let triangle = nodes.add_geometry(Geometry {
        positions: vec![
            Vec3::new(-1.0, 0.0, 0.0),
            Vec3::new(1.0, 0.0, 0.0),
            Vec3::new(0.0, 1.5, 0.0),
        ],
        indices: vec![0, 1, 2],
        ..Default::default()
    });
    let orange = nodes.add_material(Material {
        albedo: [0.9, 0.45, 0.1],
        ..Default::default()
    });
    nodes.update_entity(spinner, |e| {
        e.transform = Affine3::from_translation(Vec3::new(0.0, 0.0, -4.0));
        e.geometry = Some(triangle);
        e.material = Some(orange);
    });

    let sun = nodes.spawn("sun", Some(root));
    let light = nodes.add_light(Light {
        kind: LightKind::Directional {
            direction: Vec3::new(-0.3, -1.0, -0.5),
        },
        color: [1.0, 0.95, 0.85],
        intensity: 2.0,
    });
    nodes.update_entity(sun, |e| e.light = Some(light));

    let eye = nodes.spawn("camera", Some(root));
    let lens = nodes.add_camera(Camera::default());
    nodes.update_entity(eye, |e| {
        e.transform = Affine3::from_translation(Vec3::new(0.0, 1.0, 2.0));
        e.camera = Some(lens);
    });

    SandboxScene {
        nodes,
        root,
        spinner,
    }
}

fn main() -> Result<()> {
    use env_logger::{Builder, Env};

    Builder::from_env(Env::default().default_filter_or("info")).init();

    let settings = match std::env::args().nth(1) {
        Some(path) => RenderSettings::load(&path)
            .with_context(|| format!("Failed to load render settings from '{path}'"))?,
        None => RenderSettings::default(),
    };
    log::info!(
        "Sandbox: rendering {FRAMES} frames at {}x{}",
        settings.width,
        settings.height
    );

    let scene = build_scene();
    let mut renderer = HeadlessRaytraceRenderer::with_settings(settings);
    renderer.set_node_managers(scene.nodes.clone());
    renderer.set_scene_root(Some(scene.root));
    renderer.initialize()?;
    let clock = renderer.frame_advance_service();

    for frame in 0..FRAMES {
        let time = clock.wait_for_next_frame();
        let offset = (frame as f32 * 0.25).sin();
        scene.nodes.update_entity(scene.spinner, |e| {
            e.transform = Affine3::from_translation(Vec3::new(offset, 0.0, -4.0));
        });
        renderer.mark_dirty(DirtySet::TRANSFORM, Some(scene.spinner));

        for mut job in renderer.jobs_to_execute(time) {
            job.run()
                .with_context(|| format!("Frame {frame}: job '{}' failed", job.name()))?;
        }
    }

    let image = renderer.grab_image(RenderImageType::Hdr)?;
    if let Some(texel) = image.texel_rgba32f(image.width / 2, image.height / 2) {
        log::info!("Sandbox: centre radiance {texel:?}");
    }

    let stats = renderer.statistics();
    log::info!(
        "Sandbox: {} frames, {} rays, {} builds, {} updates, {} instances, last frame {:.3} ms CPU / {:.3} ms GPU",
        stats.frame_number,
        stats.rays_traced,
        stats.acceleration_structure_builds,
        stats.acceleration_structure_updates,
        stats.instance_count,
        stats.cpu_record_time_ms,
        stats.gpu_frame_time_ms
    );
    if let Some(device) = renderer.device() {
        for message in device.take_validation_messages() {
            log::warn!("Sandbox: validation: {message}");
        }
    }

    renderer.shutdown();
    Ok(())
}
