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

//! The command buffer: a lifecycle state machine around an append-only recording.

use std::sync::Arc;
use std::thread::{self, ThreadId};

use super::{
    BufferCopy, BufferImageCopy, Command, CommandBufferBackend, CommandBufferLevel,
    CommandBufferUsage, DetachedBackend, ImageBlit, InheritanceInfo, QueryPool, QueryType,
    RenderPassBeginInfo, SecondaryCommands, SubpassContents, Viewport,
};
use crate::renderer::api::acceleration::{
    AccelerationStructureInfo, AccelerationStructureKind, BuildMode,
};
use crate::renderer::api::common::{Filter, Rect2d};
use crate::renderer::api::pipeline::{Pipeline, PipelineBindPoint, RayTracingPipeline};
use crate::renderer::api::resource::{
    AccelerationStructureId, BufferId, CommandBufferId, DescriptorSetId, EventId, ImageId,
    ImageSubresourceRange, ResourceState,
};
use crate::renderer::api::sync::{
    batch_transitions, AccessFlags, Fence, PipelineBarrier, PipelineStage, TransitionSet,
};
use crate::renderer::error::CommandBufferError;

/// The lifecycle state of a [`CommandBuffer`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CommandBufferState {
    /// Empty, ready for `begin`.
    Initial,
    /// Between `begin` and `end`; recording calls are allowed.
    Recording,
    /// Recorded and ready for submission.
    Executable,
    /// Submitted and not yet completed on the device.
    Pending,
    /// A one-time-submit buffer whose execution completed; must be reset.
    Invalid,
}

/// Counters gathered while recording.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct RecordingStats {
    /// Commands appended.
    pub commands: u32,
    /// Buffer, image and memory barriers recorded.
    pub barriers: u32,
    /// Requested transitions that needed no barrier.
    pub transitions_elided: u32,
    /// Ray dispatches recorded.
    pub ray_dispatches: u32,
    /// Rays launched by those dispatches.
    pub rays: u64,
    /// Full acceleration-structure builds recorded.
    pub acceleration_structure_builds: u32,
    /// Acceleration-structure updates recorded.
    pub acceleration_structure_updates: u32,
}

/// Records GPU operations for later submission.
///
/// The buffer references resources by handle and owns no device memory. Lifecycle calls
/// ([`begin`](Self::begin), [`end`](Self::end), [`reset`](Self::reset)) report misuse and
/// device failures as errors. Recording calls are only valid in the
/// [`Recording`](CommandBufferState::Recording) state, from the thread that called `begin`;
/// anything else is a bug and panics.
#[derive(Debug)]
pub struct CommandBuffer {
    id: CommandBufferId,
    level: CommandBufferLevel,
    backend: Arc<dyn CommandBufferBackend>,
    state: CommandBufferState,
    usage: CommandBufferUsage,
    inheritance: Option<InheritanceInfo>,
    commands: Vec<Command>,
    recording_thread: Option<ThreadId>,
    render_pass_open: bool,
    pending: Vec<Fence>,
    stats: RecordingStats,
}

impl CommandBuffer {
    /// Creates a buffer whose lifecycle calls go through `backend`.
    pub fn new(
        id: CommandBufferId,
        level: CommandBufferLevel,
        backend: Arc<dyn CommandBufferBackend>,
    ) -> Self {
        Self {
            id,
            level,
            backend,
            state: CommandBufferState::Initial,
            usage: CommandBufferUsage::EMPTY,
            inheritance: None,
            commands: Vec::new(),
            recording_thread: None,
            render_pass_open: false,
            pending: Vec::new(),
            stats: RecordingStats::default(),
        }
    }

    /// Creates a buffer that is not attached to any device.
    pub fn detached(level: CommandBufferLevel) -> Self {
        Self::new(CommandBufferId::NULL, level, Arc::new(DetachedBackend))
    }

    /// The handle of the buffer.
    pub fn id(&self) -> CommandBufferId {
        self.id
    }

    /// Primary or secondary.
    pub fn level(&self) -> CommandBufferLevel {
        self.level
    }

    /// The usage flags given to the last `begin`.
    pub fn usage(&self) -> CommandBufferUsage {
        self.usage
    }

    /// The inheritance info given to the last `begin`.
    pub fn inheritance(&self) -> Option<&InheritanceInfo> {
        self.inheritance.as_ref()
    }

    /// The recorded commands, in recording order.
    pub fn commands(&self) -> &[Command] {
        &self.commands
    }

    /// A shareable copy of the recorded commands.
    pub fn snapshot(&self) -> Arc<[Command]> {
        Arc::from(self.commands.as_slice())
    }

    /// Counters of the current recording.
    pub fn stats(&self) -> RecordingStats {
        self.stats
    }

    fn completed_state(&self) -> CommandBufferState {
        if self.usage.contains(CommandBufferUsage::ONE_TIME_SUBMIT) {
            CommandBufferState::Invalid
        } else {
            CommandBufferState::Executable
        }
    }

    /// The current state. A Pending buffer whose fences have all signaled reports the
    /// state it returns to: Executable, or Invalid for one-time-submit recordings.
    pub fn state(&self) -> CommandBufferState {
        if self.state == CommandBufferState::Pending
            && self.pending.iter().all(Fence::is_signaled)
        {
            return self.completed_state();
        }
        self.state
    }

    /// `true` while submitted work that uses this buffer has not completed.
    pub fn is_pending(&self) -> bool {
        self.state() == CommandBufferState::Pending
    }

    fn refresh(&mut self) {
        if self.state == CommandBufferState::Pending {
            self.pending.retain(|fence| !fence.is_signaled());
            if self.pending.is_empty() {
                self.state = self.completed_state();
                log::trace!("Command buffer {:?} completed -> {:?}", self.id, self.state);
            }
        }
    }

    fn clear_recording(&mut self) {
        self.commands.clear();
        self.render_pass_open = false;
        self.recording_thread = None;
        self.inheritance = None;
        self.stats = RecordingStats::default();
    }

    /// Starts recording.
    ///
    /// # Errors
    /// * [`CommandBufferError::Pending`] while a submission still uses the buffer.
    /// * [`CommandBufferError::InvalidState`] unless the buffer is Initial (already
    ///   recording, or recorded and not reset).
    /// * [`CommandBufferError::Device`] when the device refuses.
    ///
    /// # Panics
    /// When `RENDER_PASS_CONTINUE` is requested for a primary buffer or without a render
    /// pass in `inheritance`.
    pub fn begin(
        &mut self,
        usage: CommandBufferUsage,
        inheritance: Option<InheritanceInfo>,
    ) -> Result<(), CommandBufferError> {
        self.refresh();
        match self.state {
            CommandBufferState::Initial => {}
            CommandBufferState::Pending => return Err(CommandBufferError::Pending),
            state => {
                return Err(CommandBufferError::InvalidState {
                    operation: "begin",
                    state,
                })
            }
        }

        if usage.contains(CommandBufferUsage::RENDER_PASS_CONTINUE) {
            assert!(
                self.level == CommandBufferLevel::Secondary,
                "RENDER_PASS_CONTINUE is only valid for secondary command buffers"
            );
            assert!(
                inheritance.is_some_and(|info| info.render_pass.is_some()),
                "RENDER_PASS_CONTINUE requires inheritance info naming a render pass"
            );
        }

        self.backend.begin(self.id, usage)?;

        self.clear_recording();
        self.usage = usage;
        self.inheritance = inheritance;
        self.recording_thread = Some(thread::current().id());
        self.state = CommandBufferState::Recording;
        log::debug!("Command buffer {:?} begin ({usage:?})", self.id);
        Ok(())
    }

    /// Finishes recording.
    ///
    /// # Errors
    /// * [`CommandBufferError::InvalidState`] without a matching `begin`.
    /// * [`CommandBufferError::RenderPassOpen`] when a render pass was not closed.
    /// * [`CommandBufferError::Device`] when the device refuses.
    pub fn end(&mut self) -> Result<(), CommandBufferError> {
        self.refresh();
        if self.state != CommandBufferState::Recording {
            return Err(CommandBufferError::InvalidState {
                operation: "end",
                state: self.state,
            });
        }
        self.assert_recording_thread("end");
        if self.render_pass_open {
            return Err(CommandBufferError::RenderPassOpen);
        }

        self.backend.end(self.id)?;

        self.state = CommandBufferState::Executable;
        self.recording_thread = None;
        log::debug!(
            "Command buffer {:?} end: {} commands",
            self.id,
            self.commands.len()
        );
        Ok(())
    }

    /// Discards the recording and returns to the Initial state.
    ///
    /// # Errors
    /// * [`CommandBufferError::Pending`] while a submission still uses the buffer.
    /// * [`CommandBufferError::Device`] when the device refuses.
    pub fn reset(&mut self) -> Result<(), CommandBufferError> {
        self.refresh();
        if self.state == CommandBufferState::Pending {
            return Err(CommandBufferError::Pending);
        }

        self.backend.reset(self.id)?;

        self.clear_recording();
        self.usage = CommandBufferUsage::EMPTY;
        self.state = CommandBufferState::Initial;
        log::trace!("Command buffer {:?} reset", self.id);
        Ok(())
    }

    /// Moves an Executable buffer to Pending until `fence` is signaled.
    ///
    /// Called by queue implementations on submission.
    ///
    /// # Errors
    /// * [`CommandBufferError::Pending`] when the buffer is already pending and was not
    ///   recorded with `SIMULTANEOUS_USE`.
    /// * [`CommandBufferError::InvalidState`] when the buffer is not executable or is a
    ///   secondary buffer.
    pub fn mark_pending(&mut self, fence: Fence) -> Result<(), CommandBufferError> {
        self.refresh();
        if self.level != CommandBufferLevel::Primary {
            return Err(CommandBufferError::InvalidState {
                operation: "submit",
                state: self.state,
            });
        }
        match self.state {
            CommandBufferState::Executable => {}
            CommandBufferState::Pending
                if self.usage.contains(CommandBufferUsage::SIMULTANEOUS_USE) => {}
            CommandBufferState::Pending => return Err(CommandBufferError::Pending),
            state => {
                return Err(CommandBufferError::InvalidState {
                    operation: "submit",
                    state,
                })
            }
        }
        self.pending.push(fence);
        self.state = CommandBufferState::Pending;
        Ok(())
    }

    /// The recording of this secondary buffer, ready for [`execute_commands`](Self::execute_commands).
    ///
    /// # Panics
    /// When the buffer is not an executable secondary buffer.
    pub fn secondary_commands(&self) -> SecondaryCommands {
        assert!(
            self.level == CommandBufferLevel::Secondary,
            "Only secondary command buffers can be executed from another buffer"
        );
        let state = self.state();
        assert!(
            matches!(
                state,
                CommandBufferState::Executable | CommandBufferState::Pending
            ),
            "Secondary command buffer {:?} is {state:?}, not executable",
            self.id
        );
        SecondaryCommands {
            id: self.id,
            commands: self.snapshot(),
        }
    }

    fn assert_recording_thread(&self, operation: &str) {
        let current = thread::current().id();
        assert!(
            self.recording_thread == Some(current),
            "{operation}: command buffer {:?} began recording on {:?} but is used from {current:?}",
            self.id,
            self.recording_thread
        );
    }

    fn assert_recording(&self, operation: &str) {
        assert!(
            self.state == CommandBufferState::Recording,
            "Cannot record {operation} into a command buffer in the {:?} state",
            self.state
        );
        self.assert_recording_thread(operation);
    }

    fn assert_outside_render_pass(&self, operation: &str) {
        assert!(
            !self.render_pass_open,
            "{operation} is not allowed inside a render pass"
        );
    }

    fn record(&mut self, command: Command) {
        log::trace!("Command buffer {:?}: {}", self.id, command.name());
        self.stats.commands += 1;
        self.commands.push(command);
    }

    /// Records the synchronization for a set of state transitions as a single barrier.
    ///
    /// Accepts a single [`BufferTransition`](crate::renderer::api::sync::BufferTransition)
    /// or [`ImageTransition`](crate::renderer::api::sync::ImageTransition), slices, arrays
    /// or vectors of either, a `(buffers, images)` pair, or a [`TransitionSet`]. Transitions
    /// whose states map to the same scope are elided; nothing is recorded when all are.
    ///
    /// # Panics
    /// Outside of recording, or for an invalid transition (to `Undefined`, or through a
    /// state with no meaning for the resource kind).
    pub fn resource_barrier(&mut self, transitions: impl Into<TransitionSet>) {
        self.assert_recording("resource_barrier");
        let batch = batch_transitions(&transitions.into());
        self.stats.transitions_elided += batch.elided as u32;
        if let Some(barrier) = batch.barrier {
            self.stats.barriers += barrier.barrier_count() as u32;
            self.record(Command::PipelineBarrier(barrier));
        }
    }

    /// Records a global memory barrier with caller-provided masks.
    pub fn pipeline_barrier(
        &mut self,
        src_stages: PipelineStage,
        src_access: AccessFlags,
        dst_stages: PipelineStage,
        dst_access: AccessFlags,
    ) {
        self.assert_recording("pipeline_barrier");
        self.stats.barriers += 1;
        self.record(Command::PipelineBarrier(PipelineBarrier::memory(
            src_stages, src_access, dst_stages, dst_access,
        )));
    }

    /// Signals `event` once `stages` completed.
    pub fn set_event(&mut self, event: EventId, stages: PipelineStage) {
        self.assert_recording("set_event");
        self.assert_outside_render_pass("set_event");
        self.record(Command::SetEvent { event, stages });
    }

    /// Opens a render pass. Passes cannot nest.
    pub fn begin_render_pass(&mut self, info: RenderPassBeginInfo, contents: SubpassContents) {
        self.assert_recording("begin_render_pass");
        assert!(
            self.level == CommandBufferLevel::Primary,
            "Render passes are begun from primary command buffers"
        );
        assert!(!self.render_pass_open, "A render pass is already open");
        self.render_pass_open = true;
        self.record(Command::BeginRenderPass { info, contents });
    }

    /// Closes the open render pass.
    pub fn end_render_pass(&mut self) {
        self.assert_recording("end_render_pass");
        assert!(self.render_pass_open, "end_render_pass without begin_render_pass");
        self.render_pass_open = false;
        self.record(Command::EndRenderPass);
    }

    /// `true` between `begin_render_pass` and `end_render_pass`.
    pub fn is_inside_render_pass(&self) -> bool {
        self.render_pass_open
    }

    /// Clears `range` of `image` to black.
    ///
    /// # Panics
    /// When `state` is not a clear destination (`TransferDst` or `General`).
    pub fn clear_color_image(
        &mut self,
        image: ImageId,
        state: ResourceState,
        range: ImageSubresourceRange,
    ) {
        self.assert_recording("clear_color_image");
        self.assert_outside_render_pass("clear_color_image");
        assert!(
            matches!(state, ResourceState::TransferDst | ResourceState::General),
            "clear_color_image needs the image in TransferDst or General, not {state:?}"
        );
        self.record(Command::ClearColorImage {
            image,
            layout: state.image_layout(),
            range,
        });
    }

    /// Binds `pipeline` at its bind point.
    pub fn bind_pipeline(&mut self, pipeline: &Pipeline) {
        self.assert_recording("bind_pipeline");
        self.record(Command::BindPipeline {
            bind_point: pipeline.bind_point,
            pipeline: pipeline.id,
        });
    }

    /// Binds descriptor sets starting at `first_set`, for `pipeline`'s layout and bind point.
    pub fn bind_descriptor_sets(
        &mut self,
        pipeline: &Pipeline,
        first_set: u32,
        sets: &[DescriptorSetId],
    ) {
        self.assert_recording("bind_descriptor_sets");
        self.record(Command::BindDescriptorSets {
            bind_point: pipeline.bind_point,
            layout: pipeline.layout,
            first_set,
            sets: sets.to_vec(),
        });
    }

    fn record_build(
        &mut self,
        info: &AccelerationStructureInfo,
        instances: Option<(BufferId, u64)>,
        mode: BuildMode,
        dst: AccelerationStructureId,
        scratch: BufferId,
    ) {
        if mode.is_update() {
            self.stats.acceleration_structure_updates += 1;
        } else {
            self.stats.acceleration_structure_builds += 1;
        }
        self.record(Command::BuildAccelerationStructure {
            info: info.clone(),
            instances,
            mode,
            dst,
            scratch,
            scratch_offset: 0,
        });
    }

    /// Builds or updates a top-level structure from the instance records in `instances`.
    ///
    /// # Panics
    /// When `info` does not describe a top-level structure.
    pub fn build_top_level_acceleration_structure(
        &mut self,
        info: &AccelerationStructureInfo,
        dst: AccelerationStructureId,
        mode: BuildMode,
        instances: BufferId,
        scratch: BufferId,
    ) {
        self.assert_recording("build_top_level_acceleration_structure");
        self.assert_outside_render_pass("build_top_level_acceleration_structure");
        assert_eq!(
            info.kind,
            AccelerationStructureKind::TopLevel,
            "build_top_level_acceleration_structure needs a top-level description"
        );
        self.record_build(info, Some((instances, 0)), mode, dst, scratch);
    }

    /// Builds or updates a bottom-level structure from the geometries in `info`.
    ///
    /// # Panics
    /// When `info` does not describe a bottom-level structure.
    pub fn build_bottom_level_acceleration_structure(
        &mut self,
        info: &AccelerationStructureInfo,
        dst: AccelerationStructureId,
        mode: BuildMode,
        scratch: BufferId,
    ) {
        self.assert_recording("build_bottom_level_acceleration_structure");
        self.assert_outside_render_pass("build_bottom_level_acceleration_structure");
        assert_eq!(
            info.kind,
            AccelerationStructureKind::BottomLevel,
            "build_bottom_level_acceleration_structure needs a bottom-level description"
        );
        self.record_build(info, None, mode, dst, scratch);
    }

    /// Copies `size` bytes between buffers already in transfer states.
    pub fn copy_buffer(
        &mut self,
        src: BufferId,
        src_offset: u64,
        dst: BufferId,
        dst_offset: u64,
        size: u64,
    ) {
        self.assert_recording("copy_buffer");
        self.assert_outside_render_pass("copy_buffer");
        assert!(size > 0, "copy_buffer of zero bytes");
        self.record(Command::CopyBuffer {
            src,
            dst,
            region: BufferCopy {
                src_offset,
                dst_offset,
                size,
            },
        });
    }

    /// Copies texels of `src` (in `src_state`) into `dst`.
    ///
    /// # Panics
    /// When `src_state` is not a transfer source (`TransferSrc` or `General`).
    pub fn copy_image_to_buffer(
        &mut self,
        src: ImageId,
        src_state: ResourceState,
        dst: BufferId,
        region: BufferImageCopy,
    ) {
        self.assert_recording("copy_image_to_buffer");
        self.assert_outside_render_pass("copy_image_to_buffer");
        assert_transfer_state(src_state, ResourceState::TransferSrc, "copy_image_to_buffer source");
        self.record(Command::CopyImageToBuffer {
            src,
            src_layout: src_state.image_layout(),
            dst,
            region,
        });
    }

    /// Blits a region of `src` onto `dst`, scaling with `filter`.
    ///
    /// # Panics
    /// When the states are not transfer source / destination compatible.
    pub fn blit_image(
        &mut self,
        src: ImageId,
        src_state: ResourceState,
        dst: ImageId,
        dst_state: ResourceState,
        region: ImageBlit,
        filter: Filter,
    ) {
        self.assert_recording("blit_image");
        self.assert_outside_render_pass("blit_image");
        assert_transfer_state(src_state, ResourceState::TransferSrc, "blit_image source");
        assert_transfer_state(dst_state, ResourceState::TransferDst, "blit_image destination");
        self.record(Command::BlitImage {
            src,
            src_layout: src_state.image_layout(),
            dst,
            dst_layout: dst_state.image_layout(),
            region,
            filter,
        });
    }

    /// Dispatches `x * y * z` compute work groups.
    pub fn dispatch(&mut self, x: u32, y: u32, z: u32) {
        self.assert_recording("dispatch");
        self.assert_outside_render_pass("dispatch");
        self.record(Command::Dispatch { x, y, z });
    }

    /// Draws `vertex_count` vertices for `instance_count` instances.
    ///
    /// # Panics
    /// When no render pass is open.
    pub fn draw(
        &mut self,
        vertex_count: u32,
        instance_count: u32,
        first_vertex: u32,
        first_instance: u32,
    ) {
        self.assert_recording("draw");
        assert!(self.render_pass_open, "draw outside a render pass");
        self.record(Command::Draw {
            vertex_count,
            instance_count,
            first_vertex,
            first_instance,
        });
    }

    /// Launches `width * height` rays using miss record 0 and hit group 0.
    ///
    /// # Panics
    /// When the pipeline does not bind to the ray-tracing bind point.
    pub fn trace_rays(&mut self, pipeline: &RayTracingPipeline, width: u32, height: u32) {
        self.trace_rays_with(pipeline, width, height, 0, 0);
    }

    /// Launches `width * height` rays with explicit miss and hit-group record indices.
    ///
    /// The ray-generation record is at offset 0 of the table, the miss record at
    /// `(1 + miss_index) * stride`, the hit group at `hit_group_offset + hit_index * stride`.
    ///
    /// # Panics
    /// When the pipeline does not bind to the ray-tracing bind point.
    pub fn trace_rays_with(
        &mut self,
        pipeline: &RayTracingPipeline,
        width: u32,
        height: u32,
        miss_index: u32,
        hit_index: u32,
    ) {
        self.assert_recording("trace_rays");
        self.assert_outside_render_pass("trace_rays");
        assert_eq!(
            pipeline.bind_point,
            PipelineBindPoint::RayTracing,
            "trace_rays needs a ray-tracing pipeline"
        );
        self.stats.ray_dispatches += 1;
        self.stats.rays += width as u64 * height as u64;
        self.record(Command::TraceRays {
            regions: pipeline.regions(miss_index, hit_index),
            width,
            height,
            depth: 1,
        });
    }

    /// Updates the push-constant range `range_index` of `pipeline` with `data`.
    ///
    /// Offset, size and stages come from the range.
    ///
    /// # Panics
    /// When `range_index` is out of range, or `data` is not exactly the range size.
    pub fn push_constants(&mut self, pipeline: &Pipeline, range_index: usize, data: &[u8]) {
        self.assert_recording("push_constants");
        let range = *pipeline.push_constant_range(range_index);
        assert_eq!(
            data.len(),
            range.size as usize,
            "push_constants: range {range_index} is {} bytes",
            range.size
        );
        self.record(Command::PushConstants {
            layout: pipeline.layout,
            stages: range.stages,
            offset: range.offset,
            data: data.to_vec(),
        });
    }

    /// [`push_constants`](Self::push_constants) with a plain-old-data value.
    pub fn push_constants_pod<T: bytemuck::Pod>(
        &mut self,
        pipeline: &Pipeline,
        range_index: usize,
        value: &T,
    ) {
        self.push_constants(pipeline, range_index, bytemuck::bytes_of(value));
    }

    /// Sets viewport 0.
    pub fn set_viewport(&mut self, viewport: Viewport) {
        self.assert_recording("set_viewport");
        self.record(Command::SetViewport(viewport));
    }

    /// Sets scissor 0.
    pub fn set_scissor(&mut self, rect: Rect2d) {
        self.assert_recording("set_scissor");
        self.record(Command::SetScissor(rect));
    }

    /// Resets `count` slots of `pool` starting at `first`.
    ///
    /// # Panics
    /// When the slots are outside the pool.
    pub fn reset_query_pool(&mut self, pool: &QueryPool, first: u32, count: u32) {
        self.assert_recording("reset_query_pool");
        self.assert_outside_render_pass("reset_query_pool");
        assert!(
            pool.contains_range(first, count),
            "reset_query_pool: slots {first}..{} outside a pool of {}",
            first as u64 + count as u64,
            pool.count
        );
        self.record(Command::ResetQueryPool {
            pool: pool.id,
            first,
            count,
        });
    }

    /// Writes a timestamp into slot `query` once `stage` completed.
    ///
    /// # Panics
    /// When the pool does not hold timestamps or the slot is outside the pool.
    pub fn write_timestamp(&mut self, stage: PipelineStage, pool: &QueryPool, query: u32) {
        self.assert_recording("write_timestamp");
        assert_eq!(pool.ty, QueryType::Timestamp, "write_timestamp needs a timestamp pool");
        assert!(
            query < pool.count,
            "write_timestamp: slot {query} outside a pool of {}",
            pool.count
        );
        self.record(Command::WriteTimestamp {
            stage,
            pool: pool.id,
            query,
        });
    }

    /// Runs the recordings of secondary buffers.
    ///
    /// # Panics
    /// When called on a secondary buffer.
    pub fn execute_commands(&mut self, secondaries: &[SecondaryCommands]) {
        self.assert_recording("execute_commands");
        assert!(
            self.level == CommandBufferLevel::Primary,
            "execute_commands can only be recorded into a primary command buffer"
        );
        self.record(Command::ExecuteCommands(secondaries.to_vec()));
    }
}

fn assert_transfer_state(state: ResourceState, expected: ResourceState, what: &str) {
    assert!(
        state == expected || state == ResourceState::General,
        "{what} must be in {expected:?} or General, not {state:?}"
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::renderer::error::DeviceError;
    use crate::renderer::api::resource::{PipelineId, PipelineLayoutId, QueryPoolId};
    use crate::renderer::api::sync::ImageTransition;
    use crate::renderer::error::DeviceResult;
    use std::sync::atomic::{AtomicBool, Ordering};

    fn recording() -> CommandBuffer {
        let mut cb = CommandBuffer::detached(CommandBufferLevel::Primary);
        cb.begin(CommandBufferUsage::EMPTY, None).unwrap();
        cb
    }

    #[derive(Debug, Default)]
    struct FailingBackend {
        lost: AtomicBool,
    }

    impl CommandBufferBackend for FailingBackend {
        fn begin(&self, _: CommandBufferId, _: CommandBufferUsage) -> DeviceResult<()> {
            if self.lost.load(Ordering::SeqCst) {
                Err(DeviceError::DeviceLost)
            } else {
                Ok(())
            }
        }

        fn end(&self, _: CommandBufferId) -> DeviceResult<()> {
            Err(DeviceError::OutOfDeviceMemory)
        }

        fn reset(&self, _: CommandBufferId) -> DeviceResult<()> {
            Ok(())
        }
    }

    #[test]
    fn lifecycle_walks_through_every_state() {
        let mut cb = CommandBuffer::detached(CommandBufferLevel::Primary);
        assert_eq!(cb.state(), CommandBufferState::Initial);
        cb.begin(CommandBufferUsage::EMPTY, None).unwrap();
        assert_eq!(cb.state(), CommandBufferState::Recording);
        cb.dispatch(1, 1, 1);
        cb.end().unwrap();
        assert_eq!(cb.state(), CommandBufferState::Executable);

        let fence = Fence::new();
        cb.mark_pending(fence.clone()).unwrap();
        assert_eq!(cb.state(), CommandBufferState::Pending);
        assert_eq!(cb.reset(), Err(CommandBufferError::Pending));

        fence.signal();
        assert_eq!(cb.state(), CommandBufferState::Executable);
        cb.reset().unwrap();
        assert_eq!(cb.state(), CommandBufferState::Initial);
        assert!(cb.commands().is_empty());
    }

    #[test]
    fn one_time_submit_becomes_invalid_after_completion() {
        let mut cb = CommandBuffer::detached(CommandBufferLevel::Primary);
        cb.begin(CommandBufferUsage::ONE_TIME_SUBMIT, None).unwrap();
        cb.end().unwrap();
        cb.mark_pending(Fence::signaled()).unwrap();
        assert_eq!(cb.state(), CommandBufferState::Invalid);
        assert_eq!(
            cb.mark_pending(Fence::new()),
            Err(CommandBufferError::InvalidState {
                operation: "submit",
                state: CommandBufferState::Invalid
            })
        );
        assert!(matches!(
            cb.begin(CommandBufferUsage::EMPTY, None),
            Err(CommandBufferError::InvalidState { .. })
        ));
        cb.reset().unwrap();
        cb.begin(CommandBufferUsage::EMPTY, None).unwrap();
    }

    #[test]
    fn double_submit_needs_simultaneous_use() {
        let mut cb = recording();
        cb.end().unwrap();
        cb.mark_pending(Fence::new()).unwrap();
        assert_eq!(cb.mark_pending(Fence::new()), Err(CommandBufferError::Pending));

        let mut shared = CommandBuffer::detached(CommandBufferLevel::Primary);
        shared.begin(CommandBufferUsage::SIMULTANEOUS_USE, None).unwrap();
        shared.end().unwrap();
        let (a, b) = (Fence::new(), Fence::new());
        shared.mark_pending(a.clone()).unwrap();
        shared.mark_pending(b.clone()).unwrap();
        a.signal();
        assert!(shared.is_pending());
        b.signal();
        assert!(!shared.is_pending());
    }

    #[test]
    fn device_errors_leave_the_state_unchanged() {
        let backend = Arc::new(FailingBackend::default());
        let mut cb = CommandBuffer::new(
            CommandBufferId::new(0, 1),
            CommandBufferLevel::Primary,
            backend.clone(),
        );
        cb.begin(CommandBufferUsage::EMPTY, None).unwrap();
        assert_eq!(
            cb.end(),
            Err(CommandBufferError::Device(DeviceError::OutOfDeviceMemory))
        );
        assert_eq!(cb.state(), CommandBufferState::Recording);

        cb.reset().unwrap();
        backend.lost.store(true, Ordering::SeqCst);
        assert_eq!(
            cb.begin(CommandBufferUsage::EMPTY, None),
            Err(CommandBufferError::Device(DeviceError::DeviceLost))
        );
        assert_eq!(cb.state(), CommandBufferState::Initial);
    }

    #[test]
    fn end_with_open_render_pass_fails() {
        let mut cb = recording();
        cb.begin_render_pass(
            RenderPassBeginInfo {
                render_pass: crate::renderer::api::resource::RenderPassId::new(0, 1),
                framebuffer: crate::renderer::api::resource::FramebufferId::new(0, 1),
                render_area: Rect2d::new(0, 0, 4, 4),
                clear_values: vec![[0.0; 4]],
            },
            SubpassContents::Inline,
        );
        cb.draw(3, 1, 0, 0);
        assert_eq!(cb.end(), Err(CommandBufferError::RenderPassOpen));
        cb.end_render_pass();
        cb.end().unwrap();
    }

    #[test]
    #[should_panic(expected = "not allowed inside a render pass")]
    fn copies_inside_render_pass_panic() {
        let mut cb = recording();
        cb.begin_render_pass(
            RenderPassBeginInfo {
                render_pass: crate::renderer::api::resource::RenderPassId::new(0, 1),
                framebuffer: crate::renderer::api::resource::FramebufferId::new(0, 1),
                render_area: Rect2d::new(0, 0, 4, 4),
                clear_values: Vec::new(),
            },
            SubpassContents::Inline,
        );
        cb.copy_buffer(BufferId::new(0, 1), 0, BufferId::new(1, 1), 0, 16);
    }

    #[test]
    #[should_panic(expected = "draw outside a render pass")]
    fn draw_without_render_pass_panics() {
        let mut cb = recording();
        cb.draw(3, 1, 0, 0);
    }

    #[test]
    #[should_panic(expected = "TransferDst or General")]
    fn clear_requires_a_clear_destination_state() {
        let mut cb = recording();
        cb.clear_color_image(
            ImageId::new(0, 1),
            ResourceState::ShaderRead,
            ImageSubresourceRange::default(),
        );
    }

    #[test]
    fn clear_records_the_layout_of_the_state() {
        let mut cb = recording();
        cb.clear_color_image(
            ImageId::new(0, 1),
            ResourceState::General,
            ImageSubresourceRange::default(),
        );
        assert!(matches!(
            cb.commands()[0],
            Command::ClearColorImage {
                layout: crate::renderer::api::sync::ImageLayout::General,
                ..
            }
        ));
    }

    #[test]
    fn elided_transitions_record_nothing() {
        let mut cb = recording();
        cb.resource_barrier(ImageTransition::new(
            ImageId::new(0, 1),
            ResourceState::ShaderRead,
            ResourceState::ShaderRead,
        ));
        assert!(cb.commands().is_empty());
        assert_eq!(cb.stats().transitions_elided, 1);
    }

    #[test]
    fn recording_from_another_thread_panics() {
        let mut cb = recording();
        let result = thread::spawn(move || {
            cb.dispatch(1, 1, 1);
        })
        .join();
        assert!(result.is_err());
    }

    #[test]
    #[should_panic(expected = "write_timestamp: slot 4 outside a pool of 4")]
    fn timestamp_slot_is_bounded() {
        let pool = QueryPool {
            id: QueryPoolId::new(0, 1),
            ty: QueryType::Timestamp,
            count: 4,
        };
        recording().write_timestamp(PipelineStage::BOTTOM_OF_PIPE, &pool, 4);
    }

    #[test]
    fn secondary_recordings_embed_into_primaries() {
        let mut secondary = CommandBuffer::detached(CommandBufferLevel::Secondary);
        secondary.begin(CommandBufferUsage::EMPTY, None).unwrap();
        let pipeline = Pipeline::new(
            PipelineId::new(0, 1),
            PipelineBindPoint::Compute,
            PipelineLayoutId::new(0, 1),
        );
        secondary.bind_pipeline(&pipeline);
        secondary.dispatch(8, 8, 1);
        secondary.end().unwrap();

        let mut primary = recording();
        primary.execute_commands(&[secondary.secondary_commands()]);
        let Command::ExecuteCommands(embedded) = &primary.commands()[0] else {
            panic!("expected execute_commands");
        };
        assert_eq!(embedded[0].commands.len(), 2);
    }
}
