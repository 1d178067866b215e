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

//! Device hooks behind command-buffer lifecycle calls.

use std::fmt::Debug;

use super::CommandBufferUsage;
use crate::renderer::api::resource::CommandBufferId;
use crate::renderer::error::DeviceResult;

/// The device side of a command buffer.
///
/// Recording itself is purely host-side; only `begin`, `end` and `reset` reach the device
/// and can fail with a device result code.
pub trait CommandBufferBackend: Send + Sync + Debug {
    /// Called before a buffer enters the Recording state.
    fn begin(&self, id: CommandBufferId, usage: CommandBufferUsage) -> DeviceResult<()>;
    /// Called before a buffer becomes Executable.
    fn end(&self, id: CommandBufferId) -> DeviceResult<()>;
    /// Called before a buffer returns to the Initial state.
    fn reset(&self, id: CommandBufferId) -> DeviceResult<()>;
}

/// A backend for buffers that are not attached to any device. Every call succeeds.
#[derive(Debug, Clone, Copy, Default)]
pub struct DetachedBackend;

impl CommandBufferBackend for DetachedBackend {
    fn begin(&self, _id: CommandBufferId, _usage: CommandBufferUsage) -> DeviceResult<()> {
        Ok(())
    }

    fn end(&self, _id: CommandBufferId) -> DeviceResult<()> {
        Ok(())
    }

    fn reset(&self, _id: CommandBufferId) -> DeviceResult<()> {
        Ok(())
    }
}
