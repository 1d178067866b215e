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

use std::fmt;
use std::sync::{Arc, Mutex};

use lumen_core::renderer::{RaytraceRenderer, RenderError, RenderSettings, RenderStatistics};
use lumen_core::scene::{
    order_jobs, DirtySet, FixedStepFrameAdvance, FrameAdvanceService, ImageData, Job, NodeId,
    NodeManagers, RenderImageType,
};

use crate::graphics::headless::HeadlessDevice;

use super::jobs::{
    lock_state, AccelerationStructureJob, FrameRenderJob, SceneUpdateJob, SharedState,
};
use super::state::RendererState;

/// A [`RaytraceRenderer`] running on the CPU [`HeadlessDevice`].
///
/// Nothing touches the device before [`initialize`](RaytraceRenderer::initialize). Each
/// frame the host calls [`jobs_to_execute`](RaytraceRenderer::jobs_to_execute) and runs
/// the returned jobs in order.
pub struct HeadlessRaytraceRenderer {
    settings: RenderSettings,
    root: Option<NodeId>,
    managers: Option<Arc<dyn NodeManagers>>,
    dirty: DirtySet,
    frame_advance: Arc<FixedStepFrameAdvance>,
    device: Option<HeadlessDevice>,
    state: Option<SharedState>,
}

impl fmt::Debug for HeadlessRaytraceRenderer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HeadlessRaytraceRenderer")
            .field("settings", &self.settings)
            .field("root", &self.root)
            .field(
                "managers",
                &self.managers.as_ref().map(|_| "NodeManagers(...)"),
            )
            .field("dirty", &self.dirty)
            .field("frame_advance", &self.frame_advance)
            .field("device", &self.device)
            .field("initialized", &self.state.is_some())
            .finish()
    }
}

impl Default for HeadlessRaytraceRenderer {
    fn default() -> Self {
        Self::new()
    }
}

impl HeadlessRaytraceRenderer {
    /// Creates an uninitialized renderer with default settings.
    pub fn new() -> Self {
        log::info!("HeadlessRaytraceRenderer created (uninitialized).");
        Self {
            settings: RenderSettings::default(),
            root: None,
            managers: None,
            dirty: DirtySet::ALL,
            frame_advance: Arc::new(FixedStepFrameAdvance::sixty_hertz()),
            device: None,
            state: None,
        }
    }

    /// Creates an uninitialized renderer with `settings`.
    pub fn with_settings(settings: RenderSettings) -> Self {
        let mut renderer = Self::new();
        renderer.settings = settings;
        renderer
    }

    /// The device created by [`initialize`](RaytraceRenderer::initialize), if any.
    ///
    /// Exposed so hosts and tests can read validation messages and resource counts.
    pub fn device(&self) -> Option<HeadlessDevice> {
        self.device.clone()
    }

    fn with_state<R>(&self, f: impl FnOnce(&mut RendererState) -> R) -> Option<R> {
        self.state.as_ref().map(|state| f(&mut lock_state(state)))
    }
}

impl RaytraceRenderer for HeadlessRaytraceRenderer {
    fn initialize(&mut self) -> Result<(), RenderError> {
        if self.state.is_some() {
            log::warn!("HeadlessRaytraceRenderer: already initialized.");
            return Ok(());
        }
        log::info!("HeadlessRaytraceRenderer: Initializing...");

        let device = HeadlessDevice::new();
        let state = RendererState::new(
            device.clone(),
            self.settings.clone(),
            self.root,
            self.managers.clone(),
        )
        .map_err(|err| match err {
            RenderError::InitializationFailed(_) => err,
            other => RenderError::InitializationFailed(other.to_string()),
        })?;

        self.device = Some(device);
        self.state = Some(Arc::new(Mutex::new(state)));
        self.dirty = DirtySet::ALL;
        self.frame_advance.start();
        log::info!(
            "HeadlessRaytraceRenderer: initialized at {}x{} with {} frames in flight.",
            self.settings.width,
            self.settings.height,
            self.settings.frames_in_flight
        );
        Ok(())
    }

    fn shutdown(&mut self) {
        let Some(state) = self.state.take() else {
            return;
        };
        log::info!("HeadlessRaytraceRenderer: shutting down.");
        self.frame_advance.stop();
        lock_state(&state).shutdown();
    }

    fn mark_dirty(&mut self, changes: DirtySet, node: Option<NodeId>) {
        log::trace!("HeadlessRaytraceRenderer: {changes:?} dirty on {node:?}");
        self.dirty |= changes;
    }

    fn scene_root(&self) -> Option<NodeId> {
        self.root
    }

    fn set_scene_root(&mut self, root: Option<NodeId>) {
        if self.root != root {
            self.root = root;
            self.dirty |= DirtySet::ALL;
            self.with_state(|state| state.root = root);
        }
    }

    fn settings(&self) -> RenderSettings {
        self.settings.clone()
    }

    fn set_settings(&mut self, settings: RenderSettings) {
        if settings.camera != self.settings.camera {
            self.dirty |= DirtySet::CAMERA;
        }
        self.settings = settings;
        let forwarded = self.settings.clone();
        self.with_state(|state| state.settings = forwarded);
    }

    fn set_node_managers(&mut self, managers: Arc<dyn NodeManagers>) {
        self.managers = Some(Arc::clone(&managers));
        self.dirty |= DirtySet::ALL;
        self.with_state(|state| state.managers = Some(managers));
    }

    fn frame_advance_service(&self) -> Arc<dyn FrameAdvanceService> {
        self.frame_advance.clone()
    }

    fn jobs_to_execute(&mut self, time: i64) -> Vec<Box<dyn Job>> {
        let Some(state) = &self.state else {
            log::warn!("HeadlessRaytraceRenderer: jobs requested before initialize.");
            return Vec::new();
        };
        let dirty = std::mem::take(&mut self.dirty);

        let mut jobs: Vec<Box<dyn Job>> = Vec::with_capacity(3);
        if dirty.intersects(DirtySet::SCENE_UPDATE) {
            jobs.push(Box::new(SceneUpdateJob {
                state: Arc::clone(state),
            }));
        }
        if dirty.intersects(DirtySet::ACCELERATION_STRUCTURE) {
            jobs.push(Box::new(AccelerationStructureJob {
                state: Arc::clone(state),
            }));
        }
        jobs.push(Box::new(FrameRenderJob {
            state: Arc::clone(state),
            time,
        }));

        match order_jobs(jobs) {
            Ok(ordered) => ordered,
            Err(err) => {
                log::error!("HeadlessRaytraceRenderer: could not order jobs: {err}");
                Vec::new()
            }
        }
    }

    fn grab_image(&mut self, image_type: RenderImageType) -> Result<ImageData, RenderError> {
        self.with_state(|state| state.grab_image(image_type))
            .unwrap_or(Err(RenderError::NotInitialized))
    }

    fn statistics(&self) -> RenderStatistics {
        self.with_state(|state| state.statistics())
            .unwrap_or_default()
    }
}

impl Drop for HeadlessRaytraceRenderer {
    fn drop(&mut self) {
        self.shutdown();
    }
}
