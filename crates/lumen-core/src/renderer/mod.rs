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

//! The backend-agnostic recording and raytracing contracts.
//!
//! [`api`] holds the data types every backend shares (handles, states, barriers, the
//! command buffer, pipeline and acceleration-structure descriptions), [`traits`] the
//! seams a backend implements, and [`error`] the recoverable failures. Concrete devices
//! live in `lumen-infra`.

pub mod api;
pub mod error;
pub mod traits;

pub use self::api::command::{CommandBuffer, CommandBufferState};
pub use self::api::core::{RenderSettings, RenderStatistics};
pub use self::api::resource::{ResourceKind, ResourceState};
pub use self::api::sync::{batch_transitions, compute_barrier, BarrierSpec};
pub use self::error::{
    CommandBufferError, DeviceError, RenderError, ResourceError, SettingsError, SubmitError,
};
pub use self::traits::{GraphicsDevice, RaytraceRenderer};
