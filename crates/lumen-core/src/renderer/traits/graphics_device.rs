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

use std::fmt::Debug;

use crate::renderer::api::acceleration::{AccelerationStructureInfo, AccelerationStructureSizes};
use crate::renderer::api::command::{QueryPool, QueryType};
use crate::renderer::api::pipeline::{
    DescriptorSetDescriptor, Pipeline, PipelineDescriptor, RayTracingPipeline,
    RayTracingPipelineDescriptor,
};
use crate::renderer::api::resource::{
    AccelerationStructureId, BufferDescriptor, BufferId, DescriptorSetId, EventId,
    ImageDescriptor, ImageId, PipelineId,
};
use crate::renderer::error::{DeviceError, ResourceError};

/// Creates, destroys and gives host access to the objects command buffers reference.
///
/// Destroying an object that is still referenced by pending work fails with
/// [`ResourceError::InUse`]; a destroyed object's handle is stale from then on.
pub trait GraphicsDevice: Send + Sync + Debug + 'static {
    /// Creates a new buffer.
    /// ## Arguments
    /// * `descriptor` - Size, usage and host visibility of the buffer.
    /// ## Returns
    /// The handle of the new buffer.
    /// ## Errors
    /// * `ResourceError::InvalidDescriptor` - If the descriptor is rejected.
    /// * `ResourceError::Device` - If the allocation fails.
    fn create_buffer(&self, descriptor: &BufferDescriptor) -> Result<BufferId, ResourceError>;

    /// Destroys a buffer.
    /// ## Errors
    /// * `ResourceError::InvalidHandle` - If the handle is stale.
    /// * `ResourceError::InUse` - If pending work still references the buffer.
    fn destroy_buffer(&self, id: BufferId) -> Result<(), ResourceError>;

    /// Writes `data` into a host-visible buffer at `offset`.
    /// ## Errors
    /// * `ResourceError::OutOfBounds` - If the write does not fit.
    fn write_buffer(&self, id: BufferId, offset: u64, data: &[u8]) -> Result<(), ResourceError>;

    /// Reads `size` bytes of a host-visible buffer starting at `offset`.
    /// ## Errors
    /// * `ResourceError::OutOfBounds` - If the read does not fit.
    fn read_buffer(&self, id: BufferId, offset: u64, size: u64) -> Result<Vec<u8>, ResourceError>;

    /// Creates a new image.
    /// ## Arguments
    /// * `descriptor` - Extent, format, mip levels, layers and usage of the image.
    /// ## Returns
    /// The handle of the new image, in the `Undefined` state.
    fn create_image(&self, descriptor: &ImageDescriptor) -> Result<ImageId, ResourceError>;

    /// Destroys an image.
    fn destroy_image(&self, id: ImageId) -> Result<(), ResourceError>;

    /// Storage and scratch requirements of an acceleration structure.
    fn acceleration_structure_sizes(
        &self,
        info: &AccelerationStructureInfo,
    ) -> AccelerationStructureSizes {
        info.estimate_sizes()
    }

    /// Allocates an acceleration structure able to hold a build of `info`.
    ///
    /// The structure stays empty until a build command executes.
    fn create_acceleration_structure(
        &self,
        info: &AccelerationStructureInfo,
    ) -> Result<AccelerationStructureId, ResourceError>;

    /// Destroys an acceleration structure.
    fn destroy_acceleration_structure(&self, id: AccelerationStructureId)
        -> Result<(), ResourceError>;

    /// Creates a descriptor set.
    /// ## Errors
    /// * `ResourceError::InvalidHandle` - If a binding references a stale resource.
    fn create_descriptor_set(
        &self,
        descriptor: &DescriptorSetDescriptor,
    ) -> Result<DescriptorSetId, ResourceError>;

    /// Destroys a descriptor set.
    fn destroy_descriptor_set(&self, id: DescriptorSetId) -> Result<(), ResourceError>;

    /// Creates a graphics or compute pipeline.
    ///
    /// Ray-tracing pipelines go through
    /// [`create_ray_tracing_pipeline`](Self::create_ray_tracing_pipeline).
    fn create_pipeline(&self, descriptor: &PipelineDescriptor) -> Result<Pipeline, ResourceError>;

    /// Creates a ray-tracing pipeline together with its shader binding table.
    /// ## Returns
    /// The pipeline, the SBT buffer it owns and the addressing constants of that table.
    fn create_ray_tracing_pipeline(
        &self,
        descriptor: &RayTracingPipelineDescriptor,
    ) -> Result<RayTracingPipeline, ResourceError>;

    /// Destroys a pipeline. For ray-tracing pipelines the SBT buffer is destroyed too.
    fn destroy_pipeline(&self, id: PipelineId) -> Result<(), ResourceError>;

    /// Creates a pool of `count` queries. Every slot starts unavailable.
    fn create_query_pool(&self, ty: QueryType, count: u32) -> Result<QueryPool, ResourceError>;

    /// Destroys a query pool.
    fn destroy_query_pool(&self, pool: &QueryPool) -> Result<(), ResourceError>;

    /// Results of `count` queries starting at `first`; `None` for slots with no result yet.
    fn query_results(
        &self,
        pool: &QueryPool,
        first: u32,
        count: u32,
    ) -> Result<Vec<Option<u64>>, ResourceError>;

    /// Nanoseconds per timestamp tick.
    fn timestamp_period(&self) -> f32;

    /// Creates an unsignaled event.
    fn create_event(&self) -> Result<EventId, ResourceError>;

    /// Destroys an event.
    fn destroy_event(&self, id: EventId) -> Result<(), ResourceError>;

    /// `true` once a `set_event` command for this event has executed.
    fn event_status(&self, id: EventId) -> Result<bool, ResourceError>;

    /// Blocks until every submitted piece of work has completed.
    fn wait_idle(&self) -> Result<(), DeviceError>;
}
