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

//! A CPU implementation of the graphics device.
//!
//! Every object lives in host memory. Submitted command buffers are replayed on a worker
//! thread by an executor that tracks image layouts and reports misuse as validation
//! messages instead of corrupting memory. Ray dispatches run an optional CPU ray-generation
//! program against a brute-force traversal of the bound acceleration structures.

mod device;
mod executor;
mod pool;
mod queue;
mod raycast;
mod tracker;

pub use self::device::{
    HeadlessDevice, ValidationMessage, MAX_PUSH_CONSTANTS_SIZE, MAX_RAY_RECURSION_DEPTH,
    SHADER_GROUP_BASE_ALIGNMENT, SHADER_GROUP_HANDLE_SIZE,
};
pub use self::pool::CommandPool;
pub use self::queue::Queue;
pub use self::raycast::{
    BottomLevelGeometry, Hit, LaunchInfo, Ray, RayContext, RayGenProgram, SceneInstance,
    SceneQuery,
};
