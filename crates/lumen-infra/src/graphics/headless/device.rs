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

//! A graphics device that keeps every resource in host memory.

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Instant;

use lumen_core::renderer::api::acceleration::{
    AccelerationStructureInfo, AccelerationStructureKind, AccelerationStructureSizes, BuildFlags,
};
use lumen_core::renderer::api::command::{
    CommandBufferBackend, CommandBufferUsage, QueryPool, QueryType,
};
use lumen_core::renderer::api::pipeline::{
    DescriptorResource, DescriptorSetDescriptor, Pipeline, PipelineBindPoint, PipelineDescriptor,
    PushConstantRange, RayTracingPipeline, RayTracingPipelineDescriptor, ShaderBindingTableBuilder,
    ShaderBindingTableLayout, ShaderGroup,
};
use lumen_core::renderer::api::resource::{
    AccelerationStructureId, BufferDescriptor, BufferId, BufferUsage, CommandBufferId,
    DescriptorSetId, EventId, ImageDescriptor, ImageFormat, ImageId, PipelineId,
    PipelineLayoutId, QueryPoolId, ResourceHandle, ResourceRegistry,
};
use lumen_core::renderer::api::sync::{Fence, ImageLayout};
use lumen_core::renderer::error::{DeviceError, DeviceResult, ResourceError};
use lumen_core::renderer::GraphicsDevice;

use super::raycast::{BottomLevelGeometry, RayGenProgram, SceneInstance};
use super::tracker::StateTracker;

/// Size in bytes of a shader group handle.
pub const SHADER_GROUP_HANDLE_SIZE: u32 = 32;
/// Alignment of shader-binding-table records.
pub const SHADER_GROUP_BASE_ALIGNMENT: u32 = 64;
/// Size of the push-constant block.
pub const MAX_PUSH_CONSTANTS_SIZE: u32 = 256;
/// Deepest ray recursion a pipeline may declare.
pub const MAX_RAY_RECURSION_DEPTH: u32 = 31;

const GROUP_HANDLE_MAGIC: [u8; 4] = *b"LMSG";

/// A problem the executor found while replaying a submission.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationMessage {
    /// Name of the offending command.
    pub command: &'static str,
    /// What was wrong.
    pub message: String,
}

impl fmt::Display for ValidationMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.command, self.message)
    }
}

#[derive(Debug)]
pub(crate) struct BufferEntry {
    pub(crate) descriptor: BufferDescriptor,
    pub(crate) data: Vec<u8>,
}

#[derive(Debug)]
pub(crate) struct ImageEntry {
    pub(crate) descriptor: ImageDescriptor,
    // Base mip level of every array layer, row-major.
    pub(crate) layers: Vec<Vec<[f32; 4]>>,
}

impl ImageEntry {
    fn new(descriptor: ImageDescriptor) -> Self {
        let texels = descriptor.extent.area() as usize;
        let layers = vec![vec![[0.0; 4]; texels]; descriptor.array_layers as usize];
        Self { descriptor, layers }
    }

    pub(crate) fn width(&self) -> u32 {
        self.descriptor.extent.width
    }

    pub(crate) fn height(&self) -> u32 {
        self.descriptor.extent.height
    }

    pub(crate) fn texel(&self, layer: u32, x: u32, y: u32) -> Option<[f32; 4]> {
        if x >= self.width() || y >= self.height() {
            return None;
        }
        let index = y as usize * self.width() as usize + x as usize;
        self.layers.get(layer as usize)?.get(index).copied()
    }

    pub(crate) fn store(&mut self, layer: u32, x: u32, y: u32, texel: [f32; 4]) {
        if x >= self.width() || y >= self.height() {
            return;
        }
        let index = y as usize * self.width() as usize + x as usize;
        let format = self.descriptor.format;
        if let Some(slot) = self
            .layers
            .get_mut(layer as usize)
            .and_then(|layer| layer.get_mut(index))
        {
            *slot = quantize(format, texel);
        }
    }
}

fn quantize(format: ImageFormat, texel: [f32; 4]) -> [f32; 4] {
    match format {
        ImageFormat::Rgba8Unorm => texel.map(|c| (c.clamp(0.0, 1.0) * 255.0).round() / 255.0),
        ImageFormat::Depth32Float => [texel[0], 0.0, 0.0, 0.0],
        ImageFormat::Rgba32Float => texel,
    }
}

/// Encodes a texel the way an image-to-buffer copy lays it out.
pub(crate) fn encode_texel(format: ImageFormat, texel: [f32; 4], out: &mut Vec<u8>) {
    match format {
        ImageFormat::Rgba8Unorm => {
            out.extend(texel.map(|c| (c.clamp(0.0, 1.0) * 255.0).round() as u8));
        }
        ImageFormat::Rgba32Float => {
            for c in texel {
                out.extend_from_slice(&c.to_le_bytes());
            }
        }
        ImageFormat::Depth32Float => out.extend_from_slice(&texel[0].to_le_bytes()),
    }
}

#[derive(Debug, Clone)]
pub(crate) enum BuiltStructure {
    Bottom(Arc<BottomLevelGeometry>),
    Top(Arc<[SceneInstance]>),
}

#[derive(Debug)]
pub(crate) struct AccelerationStructureEntry {
    pub(crate) kind: AccelerationStructureKind,
    pub(crate) sizes: AccelerationStructureSizes,
    pub(crate) built: Option<BuiltStructure>,
    pub(crate) build_flags: BuildFlags,
    pub(crate) primitive_count: u64,
}

impl AccelerationStructureEntry {
    pub(crate) fn kind_name(&self) -> &'static str {
        kind_name(self.kind)
    }
}

pub(crate) fn kind_name(kind: AccelerationStructureKind) -> &'static str {
    match kind {
        AccelerationStructureKind::TopLevel => "top-level acceleration structure",
        AccelerationStructureKind::BottomLevel => "bottom-level acceleration structure",
    }
}

#[derive(Debug, Clone, Copy)]
pub(crate) struct ShaderBindingTable {
    pub(crate) buffer: BufferId,
    pub(crate) layout: ShaderBindingTableLayout,
}

#[derive(Debug)]
pub(crate) struct PipelineEntry {
    pub(crate) pipeline: Pipeline,
    pub(crate) descriptor_set_count: u32,
    pub(crate) sbt: Option<ShaderBindingTable>,
    pub(crate) program: Option<Arc<dyn RayGenProgram>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum QuerySlot {
    Unavailable,
    Reset,
    Written(u64),
}

#[derive(Debug)]
pub(crate) struct QueryPoolEntry {
    pub(crate) ty: QueryType,
    pub(crate) slots: Vec<QuerySlot>,
}

#[derive(Debug, Default)]
pub(crate) struct EventEntry {
    pub(crate) signaled: bool,
}

/// Every live object of a [`HeadlessDevice`], guarded by one lock.
#[derive(Debug, Default)]
pub(crate) struct Resources {
    pub(crate) buffers: ResourceRegistry<BufferId, BufferEntry>,
    pub(crate) images: ResourceRegistry<ImageId, ImageEntry>,
    pub(crate) acceleration_structures:
        ResourceRegistry<AccelerationStructureId, AccelerationStructureEntry>,
    pub(crate) descriptor_sets: ResourceRegistry<DescriptorSetId, DescriptorSetDescriptor>,
    pub(crate) pipelines: ResourceRegistry<PipelineId, PipelineEntry>,
    pub(crate) query_pools: ResourceRegistry<QueryPoolId, QueryPoolEntry>,
    pub(crate) events: ResourceRegistry<EventId, EventEntry>,
    pub(crate) tracker: StateTracker,
}

impl Resources {
    pub(crate) fn retain(&mut self, handle: ResourceHandle) -> Result<(), ResourceError> {
        match handle {
            ResourceHandle::Buffer(id) => self.buffers.retain(id),
            ResourceHandle::Image(id) => self.images.retain(id),
            ResourceHandle::AccelerationStructure(id) => self.acceleration_structures.retain(id),
            ResourceHandle::DescriptorSet(id) => self.descriptor_sets.retain(id),
            ResourceHandle::Pipeline(id) => self.pipelines.retain(id),
            ResourceHandle::QueryPool(id) => self.query_pools.retain(id),
            ResourceHandle::Event(id) => self.events.retain(id),
        }
    }

    pub(crate) fn release(&mut self, handle: ResourceHandle) -> Result<(), ResourceError> {
        match handle {
            ResourceHandle::Buffer(id) => self.buffers.release(id),
            ResourceHandle::Image(id) => self.images.release(id),
            ResourceHandle::AccelerationStructure(id) => self.acceleration_structures.release(id),
            ResourceHandle::DescriptorSet(id) => self.descriptor_sets.release(id),
            ResourceHandle::Pipeline(id) => self.pipelines.release(id),
            ResourceHandle::QueryPool(id) => self.query_pools.release(id),
            ResourceHandle::Event(id) => self.events.release(id),
        }
    }

    /// Appends the objects bound by every live descriptor set in `handles`.
    pub(crate) fn expand_descriptor_sets(&self, handles: &mut Vec<ResourceHandle>) {
        let bound: Vec<ResourceHandle> = handles
            .iter()
            .filter_map(|handle| match handle {
                ResourceHandle::DescriptorSet(id) => self.descriptor_sets.get(*id),
                _ => None,
            })
            .flat_map(|set| set.resources())
            .collect();
        handles.extend(bound);
    }

    /// Retains every handle, or none of them.
    pub(crate) fn retain_all(&mut self, handles: &[ResourceHandle]) -> Result<(), ResourceError> {
        for (done, handle) in handles.iter().enumerate() {
            if let Err(err) = self.retain(*handle) {
                for retained in &handles[..done] {
                    let _ = self.release(*retained);
                }
                return Err(err);
            }
        }
        Ok(())
    }

    pub(crate) fn release_all(&mut self, handles: &[ResourceHandle]) {
        for handle in handles {
            if let Err(err) = self.release(*handle) {
                log::warn!("HeadlessDevice: could not release {handle:?}: {err}");
            }
        }
    }

    fn live_count(&self) -> usize {
        self.buffers.len()
            + self.images.len()
            + self.acceleration_structures.len()
            + self.descriptor_sets.len()
            + self.pipelines.len()
            + self.query_pools.len()
            + self.events.len()
    }
}

/// Encodes the synthetic handle of a shader group.
///
/// Layout: magic `LMSG`, group kind, three bytes of padding, group index, pipeline slot
/// index and pipeline generation (little endian), zero-filled to
/// [`SHADER_GROUP_HANDLE_SIZE`] bytes.
pub(crate) fn encode_group_handle(
    pipeline: PipelineId,
    group: ShaderGroup,
) -> [u8; SHADER_GROUP_HANDLE_SIZE as usize] {
    let (tag, index) = match group {
        ShaderGroup::RayGen => (1u8, 0u32),
        ShaderGroup::Miss(index) => (2, index),
        ShaderGroup::HitGroup(index) => (3, index),
    };
    let mut handle = [0u8; SHADER_GROUP_HANDLE_SIZE as usize];
    handle[0..4].copy_from_slice(&GROUP_HANDLE_MAGIC);
    handle[4] = tag;
    handle[8..12].copy_from_slice(&index.to_le_bytes());
    handle[12..16].copy_from_slice(&pipeline.index().to_le_bytes());
    handle[16..20].copy_from_slice(&pipeline.generation().to_le_bytes());
    handle
}

/// Decodes a record written by [`encode_group_handle`].
pub(crate) fn decode_group_handle(record: &[u8]) -> Option<(PipelineId, ShaderGroup)> {
    let record = record.get(..SHADER_GROUP_HANDLE_SIZE as usize)?;
    if record[0..4] != GROUP_HANDLE_MAGIC {
        return None;
    }
    let word = |at: usize| u32::from_le_bytes([record[at], record[at + 1], record[at + 2], record[at + 3]]);
    let index = word(8);
    let group = match record[4] {
        1 => ShaderGroup::RayGen,
        2 => ShaderGroup::Miss(index),
        3 => ShaderGroup::HitGroup(index),
        _ => return None,
    };
    Some((PipelineId::new(word(12), word(16)), group))
}

/// The internal, non-clonable state of the [`HeadlessDevice`].
#[derive(Debug)]
struct HeadlessDeviceInternal {
    resources: Mutex<Resources>,
    lost: AtomicBool,
    validation_enabled: AtomicBool,
    validation: Mutex<Vec<ValidationMessage>>,
    in_flight: Mutex<Vec<Fence>>,
    epoch: Instant,
    next_layout: AtomicU32,
}

/// A clonable, thread-safe handle to a device that executes on the CPU.
///
/// Resources live in host memory, submitted work is replayed by the queue's worker
/// thread, and ray dispatches run [`RayGenProgram`]s against a brute-force scene query.
/// The device can be told to fail with [`lose_device`](Self::lose_device).
#[derive(Clone, Debug)]
pub struct HeadlessDevice {
    internal: Arc<HeadlessDeviceInternal>,
}

impl Default for HeadlessDevice {
    fn default() -> Self {
        Self::new()
    }
}

fn lock_recovering<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl HeadlessDevice {
    /// Creates a device with validation enabled.
    pub fn new() -> Self {
        log::info!("HeadlessDevice created");
        Self {
            internal: Arc::new(HeadlessDeviceInternal {
                resources: Mutex::new(Resources::default()),
                lost: AtomicBool::new(false),
                validation_enabled: AtomicBool::new(true),
                validation: Mutex::new(Vec::new()),
                in_flight: Mutex::new(Vec::new()),
                epoch: Instant::now(),
                next_layout: AtomicU32::new(0),
            }),
        }
    }

    pub(crate) fn lock(&self) -> MutexGuard<'_, Resources> {
        lock_recovering(&self.internal.resources)
    }

    fn check_lost(&self) -> DeviceResult<()> {
        if self.is_lost() {
            Err(DeviceError::DeviceLost)
        } else {
            Ok(())
        }
    }

    /// Simulates a device loss: every later device call fails with
    /// [`DeviceError::DeviceLost`].
    pub fn lose_device(&self) {
        log::error!("HeadlessDevice: device lost");
        self.internal.lost.store(true, Ordering::Release);
    }

    /// `true` after [`lose_device`](Self::lose_device).
    pub fn is_lost(&self) -> bool {
        self.internal.lost.load(Ordering::Acquire)
    }

    /// Turns the collection of validation messages on or off.
    pub fn set_validation_enabled(&self, enabled: bool) {
        self.internal
            .validation_enabled
            .store(enabled, Ordering::Release);
    }

    /// `true` when executor findings are collected.
    pub fn validation_enabled(&self) -> bool {
        self.internal.validation_enabled.load(Ordering::Acquire)
    }

    /// Drains the validation messages collected so far.
    pub fn take_validation_messages(&self) -> Vec<ValidationMessage> {
        std::mem::take(&mut *lock_recovering(&self.internal.validation))
    }

    pub(crate) fn report(&self, command: &'static str, message: String) {
        if self.validation_enabled() {
            log::warn!("Validation [{command}]: {message}");
            lock_recovering(&self.internal.validation).push(ValidationMessage { command, message });
        } else {
            log::debug!("Validation [{command}]: {message}");
        }
    }

    pub(crate) fn timestamp_now(&self) -> u64 {
        self.internal.epoch.elapsed().as_nanos() as u64
    }

    pub(crate) fn track_fence(&self, fence: Fence) {
        let mut in_flight = lock_recovering(&self.internal.in_flight);
        in_flight.retain(|f| !f.is_signaled());
        in_flight.push(fence);
    }

    /// Number of live objects of every kind.
    pub fn resource_count(&self) -> usize {
        self.lock().live_count()
    }

    /// How many pending submissions reference `handle`; `None` for a stale handle.
    pub fn pending_uses(&self, handle: ResourceHandle) -> Option<u32> {
        let resources = self.lock();
        match handle {
            ResourceHandle::Buffer(id) => resources.buffers.pending_uses(id),
            ResourceHandle::Image(id) => resources.images.pending_uses(id),
            ResourceHandle::AccelerationStructure(id) => {
                resources.acceleration_structures.pending_uses(id)
            }
            ResourceHandle::DescriptorSet(id) => resources.descriptor_sets.pending_uses(id),
            ResourceHandle::Pipeline(id) => resources.pipelines.pending_uses(id),
            ResourceHandle::QueryPool(id) => resources.query_pools.pending_uses(id),
            ResourceHandle::Event(id) => resources.events.pending_uses(id),
        }
    }

    /// Creates a ray-tracing pipeline whose ray-generation stage runs `program`.
    ///
    /// ## Arguments
    /// * `descriptor` - counts of miss and hit groups, layout and recursion depth.
    /// * `program` - the program executed per pixel by `trace_rays`.
    ///
    /// ## Errors
    /// [`ResourceError::InvalidDescriptor`] for an unusable descriptor, or
    /// [`ResourceError::Device`] when the device is lost.
    pub fn create_ray_tracing_pipeline_with_program(
        &self,
        descriptor: &RayTracingPipelineDescriptor,
        program: Arc<dyn RayGenProgram>,
    ) -> Result<RayTracingPipeline, ResourceError> {
        self.create_ray_tracing_pipeline_inner(descriptor, Some(program))
    }

    fn next_layout(&self) -> PipelineLayoutId {
        PipelineLayoutId::new(self.internal.next_layout.fetch_add(1, Ordering::Relaxed), 1)
    }

    fn create_ray_tracing_pipeline_inner(
        &self,
        descriptor: &RayTracingPipelineDescriptor,
        program: Option<Arc<dyn RayGenProgram>>,
    ) -> Result<RayTracingPipeline, ResourceError> {
        self.check_lost()?;
        if descriptor.miss_shader_count == 0 || descriptor.hit_group_count == 0 {
            return Err(ResourceError::InvalidDescriptor(format!(
                "ray-tracing pipeline {:?} needs at least one miss shader and one hit group",
                descriptor.label
            )));
        }
        if !(1..=MAX_RAY_RECURSION_DEPTH).contains(&descriptor.max_recursion_depth) {
            return Err(ResourceError::InvalidDescriptor(format!(
                "recursion depth {} outside 1..={MAX_RAY_RECURSION_DEPTH}",
                descriptor.max_recursion_depth
            )));
        }
        validate_push_constant_ranges(&descriptor.push_constant_ranges)?;

        let layout = ShaderBindingTableLayout::new(
            SHADER_GROUP_HANDLE_SIZE,
            SHADER_GROUP_BASE_ALIGNMENT,
            descriptor.miss_shader_count,
            descriptor.hit_group_count,
        );

        let mut resources = self.lock();
        let pipeline_id = resources.pipelines.insert(PipelineEntry {
            pipeline: Pipeline::new(PipelineId::NULL, PipelineBindPoint::RayTracing, PipelineLayoutId::NULL),
            descriptor_set_count: descriptor.descriptor_set_count,
            sbt: None,
            program,
        });

        let mut builder = ShaderBindingTableBuilder::new(layout);
        builder.raygen(&encode_group_handle(pipeline_id, ShaderGroup::RayGen));
        for index in 0..layout.miss_count {
            builder.miss(index, &encode_group_handle(pipeline_id, ShaderGroup::Miss(index)));
        }
        for index in 0..layout.hit_group_count {
            builder.hit_group(
                index,
                &encode_group_handle(pipeline_id, ShaderGroup::HitGroup(index)),
            );
        }
        let table = match builder.build() {
            Ok(table) => table,
            Err(err) => {
                let _ = resources.pipelines.remove(pipeline_id);
                return Err(err);
            }
        };

        let sbt_buffer = resources.buffers.insert(BufferEntry {
            descriptor: BufferDescriptor {
                label: descriptor.label.as_ref().map(|label| format!("{label} SBT")),
                size: layout.size(),
                usage: BufferUsage::SHADER_BINDING_TABLE.union(BufferUsage::TRANSFER_SRC),
                host_visible: true,
            },
            data: table,
        });

        let mut pipeline = Pipeline::new(pipeline_id, PipelineBindPoint::RayTracing, self.next_layout());
        pipeline.push_constant_ranges = descriptor.push_constant_ranges.clone();
        if let Some(entry) = resources.pipelines.get_mut(pipeline_id) {
            entry.pipeline = pipeline.clone();
            entry.sbt = Some(ShaderBindingTable {
                buffer: sbt_buffer,
                layout,
            });
        }
        log::debug!(
            "HeadlessDevice: ray-tracing pipeline {pipeline_id:?} ({:?}), SBT {sbt_buffer:?} of {} bytes",
            descriptor.label,
            layout.size()
        );
        Ok(RayTracingPipeline::new(pipeline, sbt_buffer, &layout))
    }

    /// Reads every texel of array layer `layer` of the base mip level.
    pub fn image_texels(&self, id: ImageId, layer: u32) -> Result<Vec<[f32; 4]>, ResourceError> {
        self.check_lost()?;
        let resources = self.lock();
        let image = resources.images.get(id).ok_or(ResourceError::InvalidHandle)?;
        image
            .layers
            .get(layer as usize)
            .cloned()
            .ok_or(ResourceError::OutOfBounds {
                offset: layer as u64,
                size: 1,
                capacity: image.layers.len() as u64,
            })
    }

    /// Overwrites array layer `layer` of the base mip level.
    pub fn write_image(
        &self,
        id: ImageId,
        layer: u32,
        texels: &[[f32; 4]],
    ) -> Result<(), ResourceError> {
        self.check_lost()?;
        let mut resources = self.lock();
        let image = resources.images.get_mut(id).ok_or(ResourceError::InvalidHandle)?;
        let capacity = image.descriptor.extent.area();
        if texels.len() as u64 != capacity || layer >= image.descriptor.array_layers {
            return Err(ResourceError::OutOfBounds {
                offset: layer as u64 * capacity,
                size: texels.len() as u64,
                capacity: capacity * image.descriptor.array_layers as u64,
            });
        }
        let format = image.descriptor.format;
        image.layers[layer as usize] = texels.iter().map(|t| quantize(format, *t)).collect();
        Ok(())
    }

    /// The layout the executor last moved subresource `(level, layer)` into.
    pub fn image_layout(&self, id: ImageId, level: u32, layer: u32) -> Option<ImageLayout> {
        self.lock().tracker.layout(id, level, layer)
    }
}

fn validate_push_constant_ranges(ranges: &[PushConstantRange]) -> Result<(), ResourceError> {
    for range in ranges {
        let end = range.offset as u64 + range.size as u64;
        if range.size == 0
            || range.offset % 4 != 0
            || range.size % 4 != 0
            || end > MAX_PUSH_CONSTANTS_SIZE as u64
        {
            return Err(ResourceError::InvalidDescriptor(format!(
                "push-constant range {range:?} must be a non-empty multiple of 4 inside {MAX_PUSH_CONSTANTS_SIZE} bytes"
            )));
        }
    }
    Ok(())
}

impl GraphicsDevice for HeadlessDevice {
    fn create_buffer(&self, descriptor: &BufferDescriptor) -> Result<BufferId, ResourceError> {
        self.check_lost()?;
        descriptor.validate()?;
        let id = self.lock().buffers.insert(BufferEntry {
            descriptor: descriptor.clone(),
            data: vec![0; descriptor.size as usize],
        });
        log::trace!("HeadlessDevice: buffer {id:?} {:?} ({} bytes)", descriptor.label, descriptor.size);
        Ok(id)
    }

    fn destroy_buffer(&self, id: BufferId) -> Result<(), ResourceError> {
        self.lock().buffers.remove(id).map(|_| ())
    }

    fn write_buffer(&self, id: BufferId, offset: u64, data: &[u8]) -> Result<(), ResourceError> {
        self.check_lost()?;
        let mut resources = self.lock();
        let buffer = resources.buffers.get_mut(id).ok_or(ResourceError::InvalidHandle)?;
        if !buffer.descriptor.host_visible {
            return Err(ResourceError::WrongKind {
                expected: "host-visible buffer",
                found: "device-local buffer",
            });
        }
        let end = offset
            .checked_add(data.len() as u64)
            .filter(|end| *end <= buffer.descriptor.size)
            .ok_or(ResourceError::OutOfBounds {
                offset,
                size: data.len() as u64,
                capacity: buffer.descriptor.size,
            })?;
        buffer.data[offset as usize..end as usize].copy_from_slice(data);
        Ok(())
    }

    fn read_buffer(&self, id: BufferId, offset: u64, size: u64) -> Result<Vec<u8>, ResourceError> {
        self.check_lost()?;
        let resources = self.lock();
        let buffer = resources.buffers.get(id).ok_or(ResourceError::InvalidHandle)?;
        if !buffer.descriptor.host_visible {
            return Err(ResourceError::WrongKind {
                expected: "host-visible buffer",
                found: "device-local buffer",
            });
        }
        let end = offset
            .checked_add(size)
            .filter(|end| *end <= buffer.descriptor.size)
            .ok_or(ResourceError::OutOfBounds {
                offset,
                size,
                capacity: buffer.descriptor.size,
            })?;
        Ok(buffer.data[offset as usize..end as usize].to_vec())
    }

    fn create_image(&self, descriptor: &ImageDescriptor) -> Result<ImageId, ResourceError> {
        self.check_lost()?;
        descriptor.validate()?;
        let mut resources = self.lock();
        let id = resources.images.insert(ImageEntry::new(descriptor.clone()));
        resources
            .tracker
            .register(id, descriptor.mip_levels, descriptor.array_layers);
        log::trace!(
            "HeadlessDevice: image {id:?} {:?} {}x{} {:?}",
            descriptor.label,
            descriptor.extent.width,
            descriptor.extent.height,
            descriptor.format
        );
        Ok(id)
    }

    fn destroy_image(&self, id: ImageId) -> Result<(), ResourceError> {
        let mut resources = self.lock();
        resources.images.remove(id)?;
        resources.tracker.forget(id);
        Ok(())
    }

    fn create_acceleration_structure(
        &self,
        info: &AccelerationStructureInfo,
    ) -> Result<AccelerationStructureId, ResourceError> {
        self.check_lost()?;
        info.validate()?;
        let sizes = self.acceleration_structure_sizes(info);
        let id = self.lock().acceleration_structures.insert(AccelerationStructureEntry {
            kind: info.kind,
            sizes,
            built: None,
            build_flags: info.flags,
            primitive_count: info.primitive_count(),
        });
        log::trace!("HeadlessDevice: {} {id:?} ({sizes:?})", kind_name(info.kind));
        Ok(id)
    }

    fn destroy_acceleration_structure(
        &self,
        id: AccelerationStructureId,
    ) -> Result<(), ResourceError> {
        self.lock().acceleration_structures.remove(id).map(|_| ())
    }

    fn create_descriptor_set(
        &self,
        descriptor: &DescriptorSetDescriptor,
    ) -> Result<DescriptorSetId, ResourceError> {
        self.check_lost()?;
        let mut resources = self.lock();
        for (position, binding) in descriptor.bindings.iter().enumerate() {
            if descriptor.bindings[..position]
                .iter()
                .any(|other| other.binding == binding.binding)
            {
                return Err(ResourceError::InvalidDescriptor(format!(
                    "binding {} is bound twice in {:?}",
                    binding.binding, descriptor.label
                )));
            }
            match binding.resource {
                DescriptorResource::StorageImage(id) | DescriptorResource::SampledImage(id) => {
                    if !resources.images.contains(id) {
                        return Err(ResourceError::InvalidHandle);
                    }
                }
                DescriptorResource::UniformBuffer(id) | DescriptorResource::StorageBuffer(id) => {
                    if !resources.buffers.contains(id) {
                        return Err(ResourceError::InvalidHandle);
                    }
                }
                DescriptorResource::AccelerationStructure(id) => {
                    let entry = resources
                        .acceleration_structures
                        .get(id)
                        .ok_or(ResourceError::InvalidHandle)?;
                    if entry.kind != AccelerationStructureKind::TopLevel {
                        return Err(ResourceError::WrongKind {
                            expected: kind_name(AccelerationStructureKind::TopLevel),
                            found: entry.kind_name(),
                        });
                    }
                }
            }
        }
        Ok(resources.descriptor_sets.insert(descriptor.clone()))
    }

    fn destroy_descriptor_set(&self, id: DescriptorSetId) -> Result<(), ResourceError> {
        self.lock().descriptor_sets.remove(id).map(|_| ())
    }

    fn create_pipeline(&self, descriptor: &PipelineDescriptor) -> Result<Pipeline, ResourceError> {
        self.check_lost()?;
        if descriptor.bind_point == PipelineBindPoint::RayTracing {
            return Err(ResourceError::InvalidDescriptor(
                "ray-tracing pipelines are created with create_ray_tracing_pipeline".into(),
            ));
        }
        validate_push_constant_ranges(&descriptor.push_constant_ranges)?;

        let layout = self.next_layout();
        let mut resources = self.lock();
        let id = resources.pipelines.insert(PipelineEntry {
            pipeline: Pipeline::new(PipelineId::NULL, descriptor.bind_point, layout),
            descriptor_set_count: descriptor.descriptor_set_count,
            sbt: None,
            program: None,
        });
        let mut pipeline = Pipeline::new(id, descriptor.bind_point, layout);
        pipeline.push_constant_ranges = descriptor.push_constant_ranges.clone();
        if let Some(entry) = resources.pipelines.get_mut(id) {
            entry.pipeline = pipeline.clone();
        }
        Ok(pipeline)
    }

    fn create_ray_tracing_pipeline(
        &self,
        descriptor: &RayTracingPipelineDescriptor,
    ) -> Result<RayTracingPipeline, ResourceError> {
        self.create_ray_tracing_pipeline_inner(descriptor, None)
    }

    fn destroy_pipeline(&self, id: PipelineId) -> Result<(), ResourceError> {
        let mut resources = self.lock();
        let sbt = resources
            .pipelines
            .get(id)
            .ok_or(ResourceError::InvalidHandle)?
            .sbt;
        if let Some(sbt) = sbt {
            match resources.buffers.pending_uses(sbt.buffer) {
                Some(0) | None => {}
                Some(pending_uses) => return Err(ResourceError::InUse { pending_uses }),
            }
        }
        resources.pipelines.remove(id)?;
        if let Some(sbt) = sbt {
            // The table may already be gone if the caller destroyed it by hand.
            let _ = resources.buffers.remove(sbt.buffer);
        }
        Ok(())
    }

    fn create_query_pool(&self, ty: QueryType, count: u32) -> Result<QueryPool, ResourceError> {
        self.check_lost()?;
        if count == 0 {
            return Err(ResourceError::InvalidDescriptor("empty query pool".into()));
        }
        let id = self.lock().query_pools.insert(QueryPoolEntry {
            ty,
            slots: vec![QuerySlot::Unavailable; count as usize],
        });
        Ok(QueryPool { id, ty, count })
    }

    fn destroy_query_pool(&self, pool: &QueryPool) -> Result<(), ResourceError> {
        self.lock().query_pools.remove(pool.id).map(|_| ())
    }

    fn query_results(
        &self,
        pool: &QueryPool,
        first: u32,
        count: u32,
    ) -> Result<Vec<Option<u64>>, ResourceError> {
        self.check_lost()?;
        let resources = self.lock();
        let entry = resources
            .query_pools
            .get(pool.id)
            .ok_or(ResourceError::InvalidHandle)?;
        let capacity = entry.slots.len() as u64;
        let end = first as u64 + count as u64;
        if end > capacity {
            return Err(ResourceError::OutOfBounds {
                offset: first as u64,
                size: count as u64,
                capacity,
            });
        }
        Ok(entry.slots[first as usize..end as usize]
            .iter()
            .map(|slot| match slot {
                QuerySlot::Written(value) => Some(*value),
                QuerySlot::Unavailable | QuerySlot::Reset => None,
            })
            .collect())
    }

    fn timestamp_period(&self) -> f32 {
        1.0
    }

    fn create_event(&self) -> Result<EventId, ResourceError> {
        self.check_lost()?;
        Ok(self.lock().events.insert(EventEntry::default()))
    }

    fn destroy_event(&self, id: EventId) -> Result<(), ResourceError> {
        self.lock().events.remove(id).map(|_| ())
    }

    fn event_status(&self, id: EventId) -> Result<bool, ResourceError> {
        self.check_lost()?;
        self.lock()
            .events
            .get(id)
            .map(|event| event.signaled)
            .ok_or(ResourceError::InvalidHandle)
    }

    fn wait_idle(&self) -> Result<(), DeviceError> {
        let fences: Vec<Fence> = lock_recovering(&self.internal.in_flight).drain(..).collect();
        for fence in &fences {
            fence.wait();
        }
        self.check_lost()
    }
}

impl CommandBufferBackend for HeadlessDevice {
    fn begin(&self, _id: CommandBufferId, _usage: CommandBufferUsage) -> DeviceResult<()> {
        self.check_lost()
    }

    fn end(&self, _id: CommandBufferId) -> DeviceResult<()> {
        self.check_lost()
    }

    fn reset(&self, _id: CommandBufferId) -> DeviceResult<()> {
        self.check_lost()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lumen_core::renderer::api::acceleration::{GeometryDesc, GeometryFlags, TriangleGeometry};
    use lumen_core::renderer::api::common::Extent2d;
    use lumen_core::renderer::api::resource::ImageUsage;

    fn host_buffer(device: &HeadlessDevice, size: u64) -> BufferId {
        device
            .create_buffer(&BufferDescriptor {
                label: Some("test".into()),
                size,
                usage: BufferUsage::STORAGE,
                host_visible: true,
            })
            .unwrap()
    }

    fn bottom_level(device: &HeadlessDevice) -> AccelerationStructureInfo {
        let vertices = host_buffer(device, 36);
        AccelerationStructureInfo::bottom_level(
            vec![GeometryDesc::Triangles {
                triangles: TriangleGeometry {
                    vertex_buffer: vertices,
                    vertex_offset: 0,
                    vertex_count: 3,
                    vertex_stride: 12,
                    index_buffer: None,
                    index_count: 0,
                },
                flags: GeometryFlags::OPAQUE,
            }],
            BuildFlags::EMPTY,
        )
    }

    #[test]
    fn group_handles_round_trip_their_identity() {
        let pipeline = PipelineId::new(7, 3);
        for group in [ShaderGroup::RayGen, ShaderGroup::Miss(2), ShaderGroup::HitGroup(5)] {
            let handle = encode_group_handle(pipeline, group);
            assert_eq!(decode_group_handle(&handle), Some((pipeline, group)));
        }
        assert_eq!(decode_group_handle(&[0u8; 32]), None);
        assert_eq!(decode_group_handle(&[0u8; 8]), None);
    }

    #[test]
    fn buffer_host_access_is_bounds_checked() {
        let device = HeadlessDevice::new();
        let buffer = host_buffer(&device, 16);
        device.write_buffer(buffer, 4, &[1, 2, 3, 4]).unwrap();
        assert_eq!(device.read_buffer(buffer, 4, 4).unwrap(), vec![1, 2, 3, 4]);
        assert_eq!(
            device.write_buffer(buffer, 14, &[0; 4]),
            Err(ResourceError::OutOfBounds {
                offset: 14,
                size: 4,
                capacity: 16
            })
        );
    }

    #[test]
    fn device_local_buffers_reject_host_access() {
        let device = HeadlessDevice::new();
        let buffer = device
            .create_buffer(&BufferDescriptor {
                size: 16,
                usage: BufferUsage::STORAGE,
                ..Default::default()
            })
            .unwrap();
        assert!(matches!(
            device.read_buffer(buffer, 0, 4),
            Err(ResourceError::WrongKind { .. })
        ));
    }

    #[test]
    fn ray_tracing_pipeline_fills_its_binding_table() {
        let device = HeadlessDevice::new();
        let pipeline = device
            .create_ray_tracing_pipeline(&RayTracingPipelineDescriptor {
                miss_shader_count: 2,
                hit_group_count: 3,
                ..Default::default()
            })
            .unwrap();
        assert_eq!(pipeline.shader_binding_table_stride, 64);
        assert_eq!(pipeline.hit_group_offset, 3 * 64);

        let table = device
            .read_buffer(pipeline.shader_binding_table, 0, 6 * 64)
            .unwrap();
        let at = |record: usize| decode_group_handle(&table[record * 64..]);
        assert_eq!(at(0), Some((pipeline.id, ShaderGroup::RayGen)));
        assert_eq!(at(2), Some((pipeline.id, ShaderGroup::Miss(1))));
        assert_eq!(at(5), Some((pipeline.id, ShaderGroup::HitGroup(2))));

        device.destroy_pipeline(pipeline.id).unwrap();
        assert_eq!(
            device.read_buffer(pipeline.shader_binding_table, 0, 4),
            Err(ResourceError::InvalidHandle)
        );
    }

    #[test]
    fn unusable_ray_tracing_descriptors_are_rejected() {
        let device = HeadlessDevice::new();
        for descriptor in [
            RayTracingPipelineDescriptor {
                miss_shader_count: 0,
                ..Default::default()
            },
            RayTracingPipelineDescriptor {
                max_recursion_depth: 0,
                ..Default::default()
            },
            RayTracingPipelineDescriptor {
                push_constant_ranges: vec![PushConstantRange::new(
                    0,
                    MAX_PUSH_CONSTANTS_SIZE + 4,
                    lumen_core::renderer::api::pipeline::ShaderStageFlags::RAYGEN,
                )],
                ..Default::default()
            },
        ] {
            assert!(matches!(
                device.create_ray_tracing_pipeline(&descriptor),
                Err(ResourceError::InvalidDescriptor(_))
            ));
        }
        assert!(matches!(
            device.create_pipeline(&PipelineDescriptor::new(PipelineBindPoint::RayTracing)),
            Err(ResourceError::InvalidDescriptor(_))
        ));
    }

    #[test]
    fn descriptor_sets_bind_only_top_level_structures() {
        let device = HeadlessDevice::new();
        let blas = device
            .create_acceleration_structure(&bottom_level(&device))
            .unwrap();
        let result = device.create_descriptor_set(
            &DescriptorSetDescriptor::default().with(0, DescriptorResource::AccelerationStructure(blas)),
        );
        assert_eq!(
            result,
            Err(ResourceError::WrongKind {
                expected: "top-level acceleration structure",
                found: "bottom-level acceleration structure"
            })
        );

        let tlas = device
            .create_acceleration_structure(&AccelerationStructureInfo::top_level(0, BuildFlags::EMPTY))
            .unwrap();
        assert!(device
            .create_descriptor_set(
                &DescriptorSetDescriptor::default()
                    .with(0, DescriptorResource::AccelerationStructure(tlas))
            )
            .is_ok());
    }

    #[test]
    fn lost_device_fails_creation_and_host_access() {
        let device = HeadlessDevice::new();
        let buffer = host_buffer(&device, 4);
        device.lose_device();
        assert!(device.is_lost());
        assert_eq!(
            device.read_buffer(buffer, 0, 4),
            Err(ResourceError::Device(DeviceError::DeviceLost))
        );
        assert_eq!(
            device.create_event(),
            Err(ResourceError::Device(DeviceError::DeviceLost))
        );
        assert_eq!(device.wait_idle(), Err(DeviceError::DeviceLost));
        assert_eq!(
            CommandBufferBackend::begin(&device, CommandBufferId::NULL, CommandBufferUsage::EMPTY),
            Err(DeviceError::DeviceLost)
        );
    }

    #[test]
    fn rgba8_images_store_quantized_texels() {
        let device = HeadlessDevice::new();
        let image = device
            .create_image(&ImageDescriptor {
                extent: Extent2d::new(1, 1),
                usage: ImageUsage::STORAGE,
                ..Default::default()
            })
            .unwrap();
        device.write_image(image, 0, &[[0.5, 2.0, -1.0, 1.0]]).unwrap();
        let texel = device.image_texels(image, 0).unwrap()[0];
        assert_eq!(texel, [128.0 / 255.0, 1.0, 0.0, 1.0]);
        assert_eq!(device.image_layout(image, 0, 0), Some(ImageLayout::Undefined));
        assert!(device.write_image(image, 1, &[[0.0; 4]]).is_err());
    }

    #[test]
    fn fresh_queries_are_unavailable() {
        let device = HeadlessDevice::new();
        let pool = device.create_query_pool(QueryType::Timestamp, 2).unwrap();
        assert_eq!(device.query_results(&pool, 0, 2).unwrap(), vec![None, None]);
        assert!(device.query_results(&pool, 1, 2).is_err());
        assert_eq!(device.timestamp_period(), 1.0);
    }
}
