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

//! Defines the hierarchy of recoverable error types for the rendering subsystem.
//!
//! Only device- and runtime-level failures live here. Contract violations by the caller
//! (recording outside of `begin`/`end`, an out-of-range push-constant range, a ray
//! dispatch without a ray-tracing pipeline, an invalid state pairing) are bugs and panic.

use crate::renderer::api::command::CommandBufferState;
use std::fmt;

/// A result code reported by the graphics device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeviceError {
    /// A host memory allocation failed.
    OutOfHostMemory,
    /// A device memory allocation failed.
    OutOfDeviceMemory,
    /// The device was lost (driver reset, hang, removal). Unrecoverable for this device.
    DeviceLost,
    /// The device refused an operation for a backend-specific reason.
    Backend(String),
}

/// Shorthand for results carrying a [`DeviceError`].
pub type DeviceResult<T> = Result<T, DeviceError>;

impl fmt::Display for DeviceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeviceError::OutOfHostMemory => write!(f, "Out of host memory."),
            DeviceError::OutOfDeviceMemory => write!(f, "Out of device memory."),
            DeviceError::DeviceLost => write!(f, "The graphics device was lost."),
            DeviceError::Backend(msg) => write!(f, "Backend-specific device error: {msg}"),
        }
    }
}

impl std::error::Error for DeviceError {}

/// A lifecycle failure of a command buffer (`begin`, `end`, `reset`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommandBufferError {
    /// The lifecycle call is not allowed in the buffer's current state.
    InvalidState {
        /// The lifecycle call that was attempted.
        operation: &'static str,
        /// The state the buffer was in.
        state: CommandBufferState,
    },
    /// `end` was called while a render pass was still open.
    RenderPassOpen,
    /// The buffer is still pending execution on the device.
    Pending,
    /// The device rejected the call.
    Device(DeviceError),
}

impl fmt::Display for CommandBufferError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CommandBufferError::InvalidState { operation, state } => {
                write!(f, "Cannot {operation} a command buffer in the {state:?} state")
            }
            CommandBufferError::RenderPassOpen => {
                write!(f, "Command buffer ended with an open render pass")
            }
            CommandBufferError::Pending => {
                write!(f, "Command buffer is still pending execution")
            }
            CommandBufferError::Device(err) => write!(f, "Command buffer device error: {err}"),
        }
    }
}

impl std::error::Error for CommandBufferError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            CommandBufferError::Device(err) => Some(err),
            _ => None,
        }
    }
}

impl From<DeviceError> for CommandBufferError {
    fn from(err: DeviceError) -> Self {
        CommandBufferError::Device(err)
    }
}

/// An error related to the creation, lookup or destruction of a GPU resource.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResourceError {
    /// The handle does not refer to a live resource (never created, destroyed, or stale).
    InvalidHandle,
    /// The resource is still referenced by work pending on the device.
    InUse {
        /// How many pending submissions still reference the resource.
        pending_uses: u32,
    },
    /// An access fell outside the resource.
    OutOfBounds {
        /// First byte (or texel) of the access.
        offset: u64,
        /// Length of the access.
        size: u64,
        /// Size of the resource.
        capacity: u64,
    },
    /// The descriptor was rejected (zero size, unsupported combination...).
    InvalidDescriptor(String),
    /// The handle refers to a resource of another kind than the operation expects.
    WrongKind {
        /// The kind the operation needs.
        expected: &'static str,
        /// The kind of the resource.
        found: &'static str,
    },
    /// The device failed to allocate or release the resource.
    Device(DeviceError),
}

impl fmt::Display for ResourceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResourceError::InvalidHandle => write!(f, "Invalid or stale resource handle."),
            ResourceError::InUse { pending_uses } => write!(
                f,
                "Resource is still referenced by {pending_uses} pending submission(s)."
            ),
            ResourceError::OutOfBounds {
                offset,
                size,
                capacity,
            } => write!(
                f,
                "Resource access out of bounds: {size} at offset {offset} exceeds {capacity}."
            ),
            ResourceError::InvalidDescriptor(msg) => {
                write!(f, "Invalid resource descriptor: {msg}")
            }
            ResourceError::WrongKind { expected, found } => {
                write!(f, "Expected a {expected} resource, found a {found}.")
            }
            ResourceError::Device(err) => write!(f, "Device resource error: {err}"),
        }
    }
}

impl std::error::Error for ResourceError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ResourceError::Device(err) => Some(err),
            _ => None,
        }
    }
}

impl From<DeviceError> for ResourceError {
    fn from(err: DeviceError) -> Self {
        ResourceError::Device(err)
    }
}

/// A failure while handing command buffers to a queue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubmitError {
    /// A submitted buffer was not executable.
    Command(CommandBufferError),
    /// A submitted buffer references a resource that no longer exists.
    Resource(ResourceError),
    /// The device refused the submission.
    Device(DeviceError),
    /// The queue has been shut down.
    QueueClosed,
}

impl fmt::Display for SubmitError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SubmitError::Command(err) => write!(f, "Submission rejected: {err}"),
            SubmitError::Resource(err) => write!(f, "Submission references a bad resource: {err}"),
            SubmitError::Device(err) => write!(f, "Submission failed on the device: {err}"),
            SubmitError::QueueClosed => write!(f, "The queue has been shut down."),
        }
    }
}

impl std::error::Error for SubmitError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            SubmitError::Command(err) => Some(err),
            SubmitError::Resource(err) => Some(err),
            SubmitError::Device(err) => Some(err),
            SubmitError::QueueClosed => None,
        }
    }
}

impl From<CommandBufferError> for SubmitError {
    fn from(err: CommandBufferError) -> Self {
        SubmitError::Command(err)
    }
}

impl From<ResourceError> for SubmitError {
    fn from(err: ResourceError) -> Self {
        SubmitError::Resource(err)
    }
}

impl From<DeviceError> for SubmitError {
    fn from(err: DeviceError) -> Self {
        SubmitError::Device(err)
    }
}

/// A high-level error that can occur within the raytrace renderer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RenderError {
    /// An operation was attempted before the renderer was initialized.
    NotInitialized,
    /// A failure occurred while initializing the backend.
    InitializationFailed(String),
    /// A command buffer lifecycle call failed.
    Command(CommandBufferError),
    /// A submission failed.
    Submit(SubmitError),
    /// A resource operation failed.
    Resource(ResourceError),
    /// The device reported an error.
    Device(DeviceError),
    /// Waiting on the device timed out.
    Timeout,
    /// A scheduled job failed.
    JobFailed {
        /// The name of the failing job.
        job: &'static str,
        /// What went wrong.
        message: String,
    },
}

impl fmt::Display for RenderError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RenderError::NotInitialized => write!(f, "The renderer is not initialized."),
            RenderError::InitializationFailed(msg) => {
                write!(f, "Failed to initialize the renderer: {msg}")
            }
            RenderError::Command(err) => write!(f, "Command recording failed: {err}"),
            RenderError::Submit(err) => write!(f, "Queue submission failed: {err}"),
            RenderError::Resource(err) => write!(f, "Graphics resource operation failed: {err}"),
            RenderError::Device(err) => write!(f, "Device failure: {err}"),
            RenderError::Timeout => write!(f, "Timed out waiting for the device."),
            RenderError::JobFailed { job, message } => write!(f, "Job '{job}' failed: {message}"),
        }
    }
}

impl std::error::Error for RenderError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            RenderError::Command(err) => Some(err),
            RenderError::Submit(err) => Some(err),
            RenderError::Resource(err) => Some(err),
            RenderError::Device(err) => Some(err),
            _ => None,
        }
    }
}

impl From<CommandBufferError> for RenderError {
    fn from(err: CommandBufferError) -> Self {
        RenderError::Command(err)
    }
}

impl From<SubmitError> for RenderError {
    fn from(err: SubmitError) -> Self {
        RenderError::Submit(err)
    }
}

impl From<ResourceError> for RenderError {
    fn from(err: ResourceError) -> Self {
        RenderError::Resource(err)
    }
}

impl From<DeviceError> for RenderError {
    fn from(err: DeviceError) -> Self {
        RenderError::Device(err)
    }
}

/// A failure while loading [`RenderSettings`](crate::renderer::api::core::RenderSettings).
#[derive(Debug)]
pub enum SettingsError {
    /// The settings file could not be read.
    Io(std::io::Error),
    /// The settings document is not valid.
    Parse(serde_json::Error),
}

impl fmt::Display for SettingsError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SettingsError::Io(err) => write!(f, "Failed to read render settings: {err}"),
            SettingsError::Parse(err) => write!(f, "Failed to parse render settings: {err}"),
        }
    }
}

impl std::error::Error for SettingsError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            SettingsError::Io(err) => Some(err),
            SettingsError::Parse(err) => Some(err),
        }
    }
}

impl From<std::io::Error> for SettingsError {
    fn from(err: std::io::Error) -> Self {
        SettingsError::Io(err)
    }
}

impl From<serde_json::Error> for SettingsError {
    fn from(err: serde_json::Error) -> Self {
        SettingsError::Parse(err)
    }
}

#[cfg(test)]
mod tests {
    use std::error::Error;

    use super::*;

    #[test]
    fn command_buffer_error_display() {
        let err = CommandBufferError::InvalidState {
            operation: "end",
            state: CommandBufferState::Initial,
        };
        assert_eq!(
            format!("{err}"),
            "Cannot end a command buffer in the Initial state"
        );
    }

    #[test]
    fn render_error_chains_device_error() {
        let cmd_err: CommandBufferError = DeviceError::DeviceLost.into();
        let render_err: RenderError = cmd_err.into();
        assert_eq!(
            format!("{render_err}"),
            "Command recording failed: Command buffer device error: The graphics device was lost."
        );
        assert!(render_err.source().is_some());
        assert!(render_err.source().unwrap().source().is_some());
    }

    #[test]
    fn submit_error_wraps_resource_error() {
        let err: SubmitError = ResourceError::InUse { pending_uses: 2 }.into();
        assert_eq!(
            format!("{err}"),
            "Submission references a bad resource: Resource is still referenced by 2 pending submission(s)."
        );
    }
}
