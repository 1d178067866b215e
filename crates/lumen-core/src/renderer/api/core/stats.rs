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

//! Performance statistics of the raytrace renderer.

use crate::renderer::api::command::RecordingStats;

/// Statistics accumulated over the frames rendered so far.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct RenderStatistics {
    /// A sequential counter for rendered frames.
    pub frame_number: u64,
    /// CPU time spent recording the last frame.
    pub cpu_record_time_ms: f32,
    /// GPU time of the last frame, from timestamp queries when enabled.
    pub gpu_frame_time_ms: f32,
    /// Command buffers submitted.
    pub command_buffers_submitted: u64,
    /// Barriers recorded.
    pub barriers_recorded: u64,
    /// Transitions that needed no barrier.
    pub transitions_elided: u64,
    /// Ray dispatches recorded.
    pub ray_dispatches: u64,
    /// Rays launched.
    pub rays_traced: u64,
    /// Full acceleration-structure builds.
    pub acceleration_structure_builds: u64,
    /// Acceleration-structure updates.
    pub acceleration_structure_updates: u64,
    /// Instances in the current top-level structure.
    pub instance_count: u32,
}

impl RenderStatistics {
    /// Adds the counters of one submitted recording.
    pub fn accumulate(&mut self, recording: &RecordingStats) {
        self.command_buffers_submitted += 1;
        self.barriers_recorded += recording.barriers as u64;
        self.transitions_elided += recording.transitions_elided as u64;
        self.ray_dispatches += recording.ray_dispatches as u64;
        self.rays_traced += recording.rays;
        self.acceleration_structure_builds += recording.acceleration_structure_builds as u64;
        self.acceleration_structure_updates += recording.acceleration_structure_updates as u64;
    }
}
