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

//! The work units handed to the host each frame.

use std::sync::{Arc, Mutex, MutexGuard};

use lumen_core::renderer::RenderError;
use lumen_core::scene::Job;

use super::state::RendererState;

/// Re-walks the scene and uploads what changed.
pub const SCENE_UPDATE_JOB: &str = "scene_update";
/// Writes instance records and plans the acceleration-structure builds.
pub const ACCELERATION_STRUCTURE_JOB: &str = "acceleration_structure_build";
/// Records, submits and accounts one frame.
pub const FRAME_RENDER_JOB: &str = "frame_render";

pub(crate) type SharedState = Arc<Mutex<RendererState>>;

/// A poisoned lock only means a job panicked mid-frame; the state itself stays usable.
pub(crate) fn lock_state(state: &SharedState) -> MutexGuard<'_, RendererState> {
    state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn job_error(job: &'static str, err: RenderError) -> RenderError {
    match err {
        RenderError::Timeout | RenderError::NotInitialized => err,
        other => RenderError::JobFailed {
            job,
            message: other.to_string(),
        },
    }
}

pub(crate) struct SceneUpdateJob {
    pub(crate) state: SharedState,
}

impl Job for SceneUpdateJob {
    fn name(&self) -> &'static str {
        SCENE_UPDATE_JOB
    }

    fn run(&mut self) -> Result<(), RenderError> {
        lock_state(&self.state)
            .update_scene()
            .map_err(|err| job_error(SCENE_UPDATE_JOB, err))
    }
}

pub(crate) struct AccelerationStructureJob {
    pub(crate) state: SharedState,
}

impl Job for AccelerationStructureJob {
    fn name(&self) -> &'static str {
        ACCELERATION_STRUCTURE_JOB
    }

    fn dependencies(&self) -> &[&'static str] {
        &[SCENE_UPDATE_JOB]
    }

    fn run(&mut self) -> Result<(), RenderError> {
        lock_state(&self.state)
            .prepare_acceleration_structures()
            .map_err(|err| job_error(ACCELERATION_STRUCTURE_JOB, err))
    }
}

pub(crate) struct FrameRenderJob {
    pub(crate) state: SharedState,
    pub(crate) time: i64,
}

impl Job for FrameRenderJob {
    fn name(&self) -> &'static str {
        FRAME_RENDER_JOB
    }

    fn dependencies(&self) -> &[&'static str] {
        &[SCENE_UPDATE_JOB, ACCELERATION_STRUCTURE_JOB]
    }

    fn run(&mut self) -> Result<(), RenderError> {
        lock_state(&self.state)
            .render_frame(self.time)
            .map_err(|err| job_error(FRAME_RENDER_JOB, err))
    }
}
