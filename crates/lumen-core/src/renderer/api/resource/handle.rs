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

//! Opaque, generation-checked handles to device objects.
//!
//! A handle is an `(index, generation)` pair. The slot index may be reused after the
//! object is destroyed, but the generation is bumped, so an old handle is detected as
//! stale instead of silently aliasing a new object.

use std::fmt::Debug;
use std::hash::Hash;

/// The untyped payload of every handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RawHandle {
    /// Slot index in the owning registry.
    pub index: u32,
    /// Generation of the slot at creation time. Generation `0` is never live.
    pub generation: u32,
}

/// Common behaviour of all typed handles.
pub trait Handle: Copy + Eq + Hash + Debug + 'static {
    /// Wraps a raw handle.
    fn from_raw(raw: RawHandle) -> Self;
    /// Returns the raw handle.
    fn raw(&self) -> RawHandle;
}

macro_rules! define_handle {
    ($(#[$attr:meta])* $name:ident) => {
        $(#[$attr])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub struct $name(RawHandle);

        impl $name {
            /// A handle that never refers to a live object.
            pub const NULL: Self = Self(RawHandle { index: u32::MAX, generation: 0 });

            /// Builds a handle from its parts.
            pub const fn new(index: u32, generation: u32) -> Self {
                Self(RawHandle { index, generation })
            }

            /// The slot index.
            pub const fn index(&self) -> u32 {
                self.0.index
            }

            /// The generation of the slot this handle was issued for.
            pub const fn generation(&self) -> u32 {
                self.0.generation
            }

            /// `true` for [`Self::NULL`] (or any generation-0 handle).
            pub const fn is_null(&self) -> bool {
                self.0.generation == 0
            }
        }

        impl Handle for $name {
            fn from_raw(raw: RawHandle) -> Self {
                Self(raw)
            }

            fn raw(&self) -> RawHandle {
                self.0
            }
        }
    };
}

define_handle!(
    /// A GPU buffer.
    BufferId
);
define_handle!(
    /// A GPU image.
    ImageId
);
define_handle!(
    /// A top- or bottom-level acceleration structure.
    AccelerationStructureId
);
define_handle!(
    /// A bound set of descriptors.
    DescriptorSetId
);
define_handle!(
    /// A compiled pipeline of any bind point.
    PipelineId
);
define_handle!(
    /// The layout (descriptor-set layouts and push-constant ranges) of a pipeline.
    PipelineLayoutId
);
define_handle!(
    /// A pool of timestamp or occlusion queries.
    QueryPoolId
);
define_handle!(
    /// A device event that command buffers can signal.
    EventId
);
define_handle!(
    /// A render pass object.
    RenderPassId
);
define_handle!(
    /// A framebuffer compatible with a render pass.
    FramebufferId
);
define_handle!(
    /// A command buffer allocated from a pool.
    CommandBufferId
);

/// Any device object a recorded command can reference.
///
/// Used by submission layers to retain every object a pending command buffer touches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResourceHandle {
    /// A buffer.
    Buffer(BufferId),
    /// An image.
    Image(ImageId),
    /// An acceleration structure.
    AccelerationStructure(AccelerationStructureId),
    /// A descriptor set.
    DescriptorSet(DescriptorSetId),
    /// A pipeline.
    Pipeline(PipelineId),
    /// A query pool.
    QueryPool(QueryPoolId),
    /// An event.
    Event(EventId),
}
