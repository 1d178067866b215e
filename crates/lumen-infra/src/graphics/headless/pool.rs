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

//! Command pools: the owners of command buffers.

use std::cell::Cell;
use std::marker::PhantomData;
use std::sync::Arc;

use lumen_core::renderer::api::command::{
    CommandBuffer, CommandBufferBackend, CommandBufferLevel,
};
use lumen_core::renderer::api::resource::{CommandBufferId, ResourceRegistry};
use lumen_core::renderer::error::{CommandBufferError, ResourceError};

use super::device::HeadlessDevice;

/// Allocates command buffers bound to a [`HeadlessDevice`].
///
/// A pool and its buffers belong to one thread at a time: the pool is `Send` but not
/// `Sync`, so concurrent recording needs one pool per thread.
#[derive(Debug)]
pub struct CommandPool {
    device: HeadlessDevice,
    backend: Arc<dyn CommandBufferBackend>,
    buffers: ResourceRegistry<CommandBufferId, CommandBuffer>,
    _not_sync: PhantomData<Cell<()>>,
}

impl CommandPool {
    /// Creates an empty pool on `device`.
    pub fn new(device: &HeadlessDevice) -> Self {
        Self {
            device: device.clone(),
            backend: Arc::new(device.clone()),
            buffers: ResourceRegistry::new(),
            _not_sync: PhantomData,
        }
    }

    /// The device the pool allocates from.
    pub fn device(&self) -> &HeadlessDevice {
        &self.device
    }

    /// Allocates a buffer in the Initial state.
    pub fn allocate(&mut self, level: CommandBufferLevel) -> CommandBufferId {
        let id = self.buffers.insert(CommandBuffer::detached(level));
        if let Some(slot) = self.buffers.get_mut(id) {
            *slot = CommandBuffer::new(id, level, Arc::clone(&self.backend));
        }
        log::trace!("CommandPool: allocated {level:?} buffer {id:?}");
        id
    }

    /// The buffer `id`, or `None` if it was freed.
    pub fn get(&self, id: CommandBufferId) -> Option<&CommandBuffer> {
        self.buffers.get(id)
    }

    /// Mutable variant of [`get`](Self::get).
    pub fn get_mut(&mut self, id: CommandBufferId) -> Option<&mut CommandBuffer> {
        self.buffers.get_mut(id)
    }

    /// Returns the buffer to the pool.
    ///
    /// # Errors
    /// [`ResourceError::InUse`] while the buffer is pending, [`ResourceError::InvalidHandle`]
    /// for a stale id.
    pub fn free(&mut self, id: CommandBufferId) -> Result<(), ResourceError> {
        let buffer = self.buffers.get(id).ok_or(ResourceError::InvalidHandle)?;
        if buffer.is_pending() {
            return Err(ResourceError::InUse { pending_uses: 1 });
        }
        self.buffers.remove(id).map(|_| ())
    }

    /// Resets every buffer of the pool that is not pending.
    ///
    /// Pending buffers are skipped and keep their recording.
    pub fn reset(&mut self) -> Result<(), CommandBufferError> {
        let mut skipped = 0;
        for id in self.buffers.handles() {
            let Some(buffer) = self.buffers.get_mut(id) else {
                continue;
            };
            if buffer.is_pending() {
                skipped += 1;
                continue;
            }
            buffer.reset()?;
        }
        log::debug!(
            "CommandPool: reset {} buffer(s), {skipped} pending",
            self.buffers.len() - skipped
        );
        Ok(())
    }

    /// Number of allocated buffers.
    pub fn len(&self) -> usize {
        self.buffers.len()
    }

    /// `true` when no buffer is allocated.
    pub fn is_empty(&self) -> bool {
        self.buffers.is_empty()
    }
}
