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

//! The raytrace renderer: scene flattening, device objects, per-frame recording and the
//! jobs that drive them.

mod frame;
mod gpu;
mod jobs;
mod scene;
mod shading;
mod state;
mod system;

pub use self::gpu::{
    FramePushConstants, LightGpu, MaterialGpu, BINDING_HDR_TARGET, BINDING_LIGHTS,
    BINDING_MATERIALS, BINDING_SCENE, MAX_LIGHTS, MAX_MATERIALS,
};
pub use self::jobs::{ACCELERATION_STRUCTURE_JOB, FRAME_RENDER_JOB, SCENE_UPDATE_JOB};
pub use self::scene::{CameraView, InstanceDesc, SceneSnapshot};
pub use self::shading::SkyShadingProgram;
pub use self::system::HeadlessRaytraceRenderer;
