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

//! The submission queue and its worker thread.

use std::panic::{self, AssertUnwindSafe};
use std::sync::{Mutex, MutexGuard};
use std::thread::{self, JoinHandle};

use lumen_core::renderer::api::command::{CommandBufferLevel, CommandBufferState, CommandBufferUsage};
use lumen_core::renderer::api::resource::CommandBufferId;
use lumen_core::renderer::api::sync::Fence;
use lumen_core::renderer::error::{CommandBufferError, DeviceError, ResourceError, SubmitError};

use super::device::HeadlessDevice;
use super::executor::{execute_submission, Submission};
use super::pool::CommandPool;

/// A queue that executes submissions in order on a dedicated thread.
///
/// `submit` returns as soon as the work is handed over; the returned [`Fence`] is
/// signaled once the worker has executed it and released every resource it retained.
#[derive(Debug)]
pub struct Queue {
    device: HeadlessDevice,
    sender: Option<flume::Sender<Submission>>,
    worker: Option<JoinHandle<()>>,
    in_flight: Mutex<Vec<Fence>>,
}

impl Queue {
    /// Creates a queue on `device` and starts its worker.
    ///
    /// # Errors
    /// [`DeviceError::Backend`] if the worker thread cannot be spawned.
    pub fn new(device: &HeadlessDevice) -> Result<Self, DeviceError> {
        let (sender, receiver) = flume::unbounded::<Submission>();
        let worker_device = device.clone();
        let worker = thread::Builder::new()
            .name("lumen-queue".into())
            .spawn(move || {
                log::debug!("Queue worker started");
                while let Ok(submission) = receiver.recv() {
                    let result = panic::catch_unwind(AssertUnwindSafe(|| {
                        execute_submission(&worker_device, &submission)
                    }));
                    if result.is_err() {
                        log::error!("Queue worker: execution panicked, the device is lost");
                        worker_device.lose_device();
                        worker_device.lock().release_all(&submission.retained);
                    }
                    submission.fence.signal();
                }
                log::debug!("Queue worker stopped");
            })
            .map_err(|err| DeviceError::Backend(format!("cannot spawn the queue worker: {err}")))?;

        Ok(Self {
            device: device.clone(),
            sender: Some(sender),
            worker: Some(worker),
            in_flight: Mutex::new(Vec::new()),
        })
    }

    fn in_flight(&self) -> MutexGuard<'_, Vec<Fence>> {
        self.in_flight
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Submits executable primary buffers of `pool`, in order.
    ///
    /// Every buffer is checked before anything changes: on error no buffer becomes
    /// pending and no resource stays retained.
    ///
    /// ## Errors
    /// * [`SubmitError::Device`] when the device is lost.
    /// * [`SubmitError::Command`] for a secondary, non-executable, or already pending buffer.
    /// * [`SubmitError::Resource`] for a freed buffer or a destroyed resource it references.
    /// * [`SubmitError::QueueClosed`] when the worker is gone.
    pub fn submit(
        &self,
        pool: &mut CommandPool,
        ids: &[CommandBufferId],
    ) -> Result<Fence, SubmitError> {
        if self.device.is_lost() {
            return Err(SubmitError::Device(DeviceError::DeviceLost));
        }

        let mut handles = Vec::new();
        let mut buffers = Vec::with_capacity(ids.len());
        for (position, id) in ids.iter().enumerate() {
            let buffer = pool.get(*id).ok_or(ResourceError::InvalidHandle)?;
            let state = buffer.state();
            if buffer.level() != CommandBufferLevel::Primary {
                return Err(CommandBufferError::InvalidState {
                    operation: "submit",
                    state,
                }
                .into());
            }
            let simultaneous = buffer.usage().contains(CommandBufferUsage::SIMULTANEOUS_USE);
            let repeated = ids[..position].contains(id);
            match state {
                CommandBufferState::Executable if !repeated || simultaneous => {}
                CommandBufferState::Pending if simultaneous => {}
                CommandBufferState::Executable | CommandBufferState::Pending => {
                    return Err(CommandBufferError::Pending.into())
                }
                state => {
                    return Err(CommandBufferError::InvalidState {
                        operation: "submit",
                        state,
                    }
                    .into())
                }
            }
            for command in buffer.commands() {
                handles.extend(command.referenced_resources());
            }
            buffers.push((*id, buffer.snapshot()));
        }

        {
            // Work reaching a set's bindings must keep them alive as well.
            let mut resources = self.device.lock();
            resources.expand_descriptor_sets(&mut handles);
            resources.retain_all(&handles)?;
        }

        let fence = Fence::new();
        for id in ids {
            let Some(buffer) = pool.get_mut(*id) else {
                continue;
            };
            if let Err(err) = buffer.mark_pending(fence.clone()) {
                // Buffers marked so far return to Executable once the fence is signaled.
                self.device.lock().release_all(&handles);
                fence.signal();
                return Err(err.into());
            }
        }

        let submission = Submission {
            buffers,
            retained: handles,
            fence: fence.clone(),
        };
        let Some(sender) = self.sender.as_ref() else {
            self.device.lock().release_all(&submission.retained);
            fence.signal();
            return Err(SubmitError::QueueClosed);
        };
        if let Err(flume::SendError(submission)) = sender.send(submission) {
            self.device.lock().release_all(&submission.retained);
            fence.signal();
            return Err(SubmitError::QueueClosed);
        }

        log::trace!("Queue: submitted {} command buffer(s)", ids.len());
        self.device.track_fence(fence.clone());
        let mut in_flight = self.in_flight();
        in_flight.retain(|f| !f.is_signaled());
        in_flight.push(fence.clone());
        Ok(fence)
    }

    /// Blocks until every submission made so far has completed.
    pub fn wait_idle(&self) -> Result<(), DeviceError> {
        let fences: Vec<Fence> = self.in_flight().drain(..).collect();
        for fence in fences {
            fence.wait();
        }
        if self.device.is_lost() {
            Err(DeviceError::DeviceLost)
        } else {
            Ok(())
        }
    }
}

impl Drop for Queue {
    fn drop(&mut self) {
        // Closing the channel lets the worker drain what was submitted and exit.
        self.sender.take();
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                log::error!("Queue worker panicked during shutdown");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lumen_core::renderer::api::resource::{BufferDescriptor, BufferUsage};
    use lumen_core::renderer::GraphicsDevice;

    fn staging(device: &HeadlessDevice, bytes: &[u8]) -> lumen_core::renderer::api::resource::BufferId {
        let id = device
            .create_buffer(&BufferDescriptor {
                label: None,
                size: bytes.len() as u64,
                usage: BufferUsage::TRANSFER_SRC.union(BufferUsage::TRANSFER_DST),
                host_visible: true,
            })
            .unwrap();
        device.write_buffer(id, 0, bytes).unwrap();
        id
    }

    #[test]
    fn submitted_copy_runs_and_signals() {
        let device = HeadlessDevice::new();
        let queue = Queue::new(&device).unwrap();
        let mut pool = CommandPool::new(&device);
        let src = staging(&device, &[1, 2, 3, 4]);
        let dst = staging(&device, &[0; 4]);

        let id = pool.allocate(CommandBufferLevel::Primary);
        let cb = pool.get_mut(id).unwrap();
        cb.begin(CommandBufferUsage::ONE_TIME_SUBMIT, None).unwrap();
        cb.copy_buffer(src, 0, dst, 0, 4);
        cb.end().unwrap();

        let fence = queue.submit(&mut pool, &[id]).unwrap();
        fence.wait();
        assert_eq!(device.read_buffer(dst, 0, 4).unwrap(), vec![1, 2, 3, 4]);
        assert_eq!(pool.get(id).unwrap().state(), CommandBufferState::Invalid);
        assert!(device.take_validation_messages().is_empty());
    }

    #[test]
    fn rejected_submission_changes_nothing() {
        let device = HeadlessDevice::new();
        let queue = Queue::new(&device).unwrap();
        let mut pool = CommandPool::new(&device);
        let ready = pool.allocate(CommandBufferLevel::Primary);
        let initial = pool.allocate(CommandBufferLevel::Primary);
        let cb = pool.get_mut(ready).unwrap();
        cb.begin(CommandBufferUsage::EMPTY, None).unwrap();
        cb.end().unwrap();

        let err = queue.submit(&mut pool, &[ready, initial]).unwrap_err();
        assert_eq!(
            err,
            SubmitError::Command(CommandBufferError::InvalidState {
                operation: "submit",
                state: CommandBufferState::Initial
            })
        );
        assert_eq!(pool.get(ready).unwrap().state(), CommandBufferState::Executable);

        let err = queue.submit(&mut pool, &[ready, ready]).unwrap_err();
        assert_eq!(err, SubmitError::Command(CommandBufferError::Pending));
        queue.wait_idle().unwrap();
    }

    #[test]
    fn lost_device_rejects_submission() {
        let device = HeadlessDevice::new();
        let queue = Queue::new(&device).unwrap();
        let mut pool = CommandPool::new(&device);
        let id = pool.allocate(CommandBufferLevel::Primary);
        let cb = pool.get_mut(id).unwrap();
        cb.begin(CommandBufferUsage::EMPTY, None).unwrap();
        cb.end().unwrap();

        device.lose_device();
        assert_eq!(
            queue.submit(&mut pool, &[id]).unwrap_err(),
            SubmitError::Device(DeviceError::DeviceLost)
        );
        assert_eq!(queue.wait_idle(), Err(DeviceError::DeviceLost));
    }
}
