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

use crate::renderer::api::core::{RenderSettings, RenderStatistics};
use crate::renderer::error::RenderError;
use crate::scene::{DirtySet, FrameAdvanceService, ImageData, Job, NodeId, NodeManagers, RenderImageType};

/// The raytracing backend as seen by the scene graph.
///
/// The host notifies the renderer of scene changes through [`mark_dirty`](Self::mark_dirty)
/// and, once per frame, asks it for the jobs to run through
/// [`jobs_to_execute`](Self::jobs_to_execute). Jobs are returned in dependency order.
pub trait RaytraceRenderer: Send {
    /// Creates the device objects the renderer needs.
    /// ## Errors
    /// * `RenderError::InitializationFailed` - If the backend cannot be brought up.
    fn initialize(&mut self) -> Result<(), RenderError>;

    /// Waits for outstanding work and releases every device object.
    fn shutdown(&mut self);

    /// Records that `changes` happened, optionally on a specific node.
    fn mark_dirty(&mut self, changes: DirtySet, node: Option<NodeId>);

    /// The root entity of the rendered scene.
    fn scene_root(&self) -> Option<NodeId>;

    /// Replaces the scene root. Marks the whole scene dirty.
    fn set_scene_root(&mut self, root: Option<NodeId>);

    /// The active settings.
    fn settings(&self) -> RenderSettings;

    /// Replaces the settings. Takes effect from the next frame.
    fn set_settings(&mut self, settings: RenderSettings);

    /// Sets the lookup used to resolve nodes.
    fn set_node_managers(&mut self, managers: Arc<dyn NodeManagers>);

    /// The clock the host should use to pace frames.
    fn frame_advance_service(&self) -> Arc<dyn FrameAdvanceService>;

    /// The jobs to run for the frame at `time` (nanoseconds), in execution order.
    fn jobs_to_execute(&mut self, time: i64) -> Vec<Box<dyn Job>>;

    /// Reads back a rendered image.
    /// ## Errors
    /// * `RenderError::NotInitialized` - Before [`initialize`](Self::initialize).
    fn grab_image(&mut self, image_type: RenderImageType) -> Result<ImageData, RenderError>;

    /// Counters of the last rendered frame, plus totals.
    fn statistics(&self) -> RenderStatistics;
}
