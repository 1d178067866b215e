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

//! The vocabulary of recorded operations.

use std::sync::Arc;

use super::{
    BufferCopy, BufferImageCopy, ImageBlit, RenderPassBeginInfo, SubpassContents, Viewport,
};
use crate::renderer::api::acceleration::{AccelerationStructureInfo, BuildMode};
use crate::renderer::api::common::{Filter, Rect2d};
use crate::renderer::api::pipeline::{PipelineBindPoint, ShaderStageFlags, TraceRaysRegions};
use crate::renderer::api::resource::{
    AccelerationStructureId, BufferId, CommandBufferId, DescriptorSetId, EventId, ImageId,
    ImageSubresourceRange, PipelineId, PipelineLayoutId, QueryPoolId, ResourceHandle,
};
use crate::renderer::api::sync::{ImageLayout, PipelineBarrier, PipelineStage};

/// The recording of an executable secondary buffer, as embedded by `execute_commands`.
#[derive(Debug, Clone, PartialEq)]
pub struct SecondaryCommands {
    /// The secondary buffer.
    pub id: CommandBufferId,
    /// Its recorded commands.
    pub commands: Arc<[Command]>,
}

/// One recorded GPU operation.
///
/// Commands reference resources by handle only and own no device memory.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    /// An execution and memory dependency.
    PipelineBarrier(PipelineBarrier),
    /// Signals an event once `stages` completed.
    SetEvent {
        /// The event.
        event: EventId,
        /// Stages to wait for.
        stages: PipelineStage,
    },
    /// Opens a render pass.
    BeginRenderPass {
        /// Pass parameters.
        info: RenderPassBeginInfo,
        /// Where the first subpass contents come from.
        contents: SubpassContents,
    },
    /// Closes the open render pass.
    EndRenderPass,
    /// Clears an image to black.
    ClearColorImage {
        /// The image.
        image: ImageId,
        /// Its layout during the clear.
        layout: ImageLayout,
        /// The subresources cleared.
        range: ImageSubresourceRange,
    },
    /// Binds a pipeline.
    BindPipeline {
        /// The bind point.
        bind_point: PipelineBindPoint,
        /// The pipeline.
        pipeline: PipelineId,
    },
    /// Binds descriptor sets.
    BindDescriptorSets {
        /// The bind point.
        bind_point: PipelineBindPoint,
        /// Layout the sets are compatible with.
        layout: PipelineLayoutId,
        /// Index of the first set.
        first_set: u32,
        /// The sets.
        sets: Vec<DescriptorSetId>,
    },
    /// Builds or updates an acceleration structure.
    BuildAccelerationStructure {
        /// What is built.
        info: AccelerationStructureInfo,
        /// Instance buffer and offset of a top-level build.
        instances: Option<(BufferId, u64)>,
        /// Build or update.
        mode: BuildMode,
        /// The structure written.
        dst: AccelerationStructureId,
        /// Scratch buffer.
        scratch: BufferId,
        /// Offset in the scratch buffer.
        scratch_offset: u64,
    },
    /// Copies bytes between buffers.
    CopyBuffer {
        /// Source.
        src: BufferId,
        /// Destination.
        dst: BufferId,
        /// What is copied.
        region: BufferCopy,
    },
    /// Copies texels into a buffer.
    CopyImageToBuffer {
        /// Source image.
        src: ImageId,
        /// Its layout during the copy.
        src_layout: ImageLayout,
        /// Destination buffer.
        dst: BufferId,
        /// What is copied.
        region: BufferImageCopy,
    },
    /// Scales and converts texels between images.
    BlitImage {
        /// Source image.
        src: ImageId,
        /// Its layout during the blit.
        src_layout: ImageLayout,
        /// Destination image.
        dst: ImageId,
        /// Its layout during the blit.
        dst_layout: ImageLayout,
        /// What is blitted.
        region: ImageBlit,
        /// Filter applied when scaling.
        filter: Filter,
    },
    /// Compute dispatch.
    Dispatch {
        /// Work groups along X.
        x: u32,
        /// Work groups along Y.
        y: u32,
        /// Work groups along Z.
        z: u32,
    },
    /// Non-indexed draw.
    Draw {
        /// Vertices per instance.
        vertex_count: u32,
        /// Instances.
        instance_count: u32,
        /// First vertex index.
        first_vertex: u32,
        /// First instance index.
        first_instance: u32,
    },
    /// Ray dispatch.
    TraceRays {
        /// Shader-binding-table regions.
        regions: TraceRaysRegions,
        /// Rays along X.
        width: u32,
        /// Rays along Y.
        height: u32,
        /// Rays along Z; always 1.
        depth: u32,
    },
    /// Updates push constants.
    PushConstants {
        /// The layout declaring the range.
        layout: PipelineLayoutId,
        /// Stages of the range.
        stages: ShaderStageFlags,
        /// Offset of the range.
        offset: u32,
        /// The bytes, exactly the size of the range.
        data: Vec<u8>,
    },
    /// Sets the viewport.
    SetViewport(Viewport),
    /// Sets the scissor rectangle.
    SetScissor(Rect2d),
    /// Resets query slots.
    ResetQueryPool {
        /// The pool.
        pool: QueryPoolId,
        /// First slot.
        first: u32,
        /// Slot count.
        count: u32,
    },
    /// Writes a timestamp once `stage` completed.
    WriteTimestamp {
        /// The stage waited for.
        stage: PipelineStage,
        /// The pool.
        pool: QueryPoolId,
        /// The slot.
        query: u32,
    },
    /// Runs secondary buffers.
    ExecuteCommands(Vec<SecondaryCommands>),
}

impl Command {
    /// A short name for logs.
    pub fn name(&self) -> &'static str {
        match self {
            Command::PipelineBarrier(_) => "pipeline_barrier",
            Command::SetEvent { .. } => "set_event",
            Command::BeginRenderPass { .. } => "begin_render_pass",
            Command::EndRenderPass => "end_render_pass",
            Command::ClearColorImage { .. } => "clear_color_image",
            Command::BindPipeline { .. } => "bind_pipeline",
            Command::BindDescriptorSets { .. } => "bind_descriptor_sets",
            Command::BuildAccelerationStructure { .. } => "build_acceleration_structure",
            Command::CopyBuffer { .. } => "copy_buffer",
            Command::CopyImageToBuffer { .. } => "copy_image_to_buffer",
            Command::BlitImage { .. } => "blit_image",
            Command::Dispatch { .. } => "dispatch",
            Command::Draw { .. } => "draw",
            Command::TraceRays { .. } => "trace_rays",
            Command::PushConstants { .. } => "push_constants",
            Command::SetViewport(_) => "set_viewport",
            Command::SetScissor(_) => "set_scissor",
            Command::ResetQueryPool { .. } => "reset_query_pool",
            Command::WriteTimestamp { .. } => "write_timestamp",
            Command::ExecuteCommands(_) => "execute_commands",
        }
    }

    /// Every device object the command reads or writes, including those of embedded
    /// secondary recordings. May contain duplicates.
    ///
    /// A descriptor set is reported as the set alone; what it binds is only known to the
    /// device that owns it.
    pub fn referenced_resources(&self) -> Vec<ResourceHandle> {
        let mut out = Vec::new();
        self.collect_resources(&mut out);
        out
    }

    fn collect_resources(&self, out: &mut Vec<ResourceHandle>) {
        use ResourceHandle as R;
        match self {
            Command::PipelineBarrier(barrier) => {
                out.extend(barrier.buffer_barriers.iter().map(|b| R::Buffer(b.buffer)));
                out.extend(barrier.image_barriers.iter().map(|i| R::Image(i.image)));
            }
            Command::SetEvent { event, .. } => out.push(R::Event(*event)),
            Command::ClearColorImage { image, .. } => out.push(R::Image(*image)),
            Command::BindPipeline { pipeline, .. } => out.push(R::Pipeline(*pipeline)),
            Command::BindDescriptorSets { sets, .. } => {
                out.extend(sets.iter().map(|s| R::DescriptorSet(*s)));
            }
            Command::BuildAccelerationStructure {
                info,
                instances,
                mode,
                dst,
                scratch,
                ..
            } => {
                out.push(R::AccelerationStructure(*dst));
                out.push(R::Buffer(*scratch));
                if let Some(source) = mode.source() {
                    out.push(R::AccelerationStructure(source));
                }
                if let Some((buffer, _)) = instances {
                    out.push(R::Buffer(*buffer));
                }
                for geometry in &info.geometries {
                    out.extend(geometry.buffers().map(R::Buffer));
                }
            }
            Command::CopyBuffer { src, dst, .. } => {
                out.push(R::Buffer(*src));
                out.push(R::Buffer(*dst));
            }
            Command::CopyImageToBuffer { src, dst, .. } => {
                out.push(R::Image(*src));
                out.push(R::Buffer(*dst));
            }
            Command::BlitImage { src, dst, .. } => {
                out.push(R::Image(*src));
                out.push(R::Image(*dst));
            }
            Command::TraceRays { regions, .. } => out.push(R::Buffer(regions.raygen.buffer)),
            Command::ResetQueryPool { pool, .. } | Command::WriteTimestamp { pool, .. } => {
                out.push(R::QueryPool(*pool));
            }
            Command::ExecuteCommands(secondaries) => {
                for secondary in secondaries {
                    for command in secondary.commands.iter() {
                        command.collect_resources(out);
                    }
                }
            }
            Command::BeginRenderPass { .. }
            | Command::EndRenderPass
            | Command::Dispatch { .. }
            | Command::Draw { .. }
            | Command::PushConstants { .. }
            | Command::SetViewport(_)
            | Command::SetScissor(_) => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::renderer::api::acceleration::BuildFlags;

    #[test]
    fn update_build_references_its_source() {
        let source = AccelerationStructureId::new(1, 1);
        let dst = AccelerationStructureId::new(2, 1);
        let command = Command::BuildAccelerationStructure {
            info: AccelerationStructureInfo::top_level(1, BuildFlags::ALLOW_UPDATE),
            instances: Some((BufferId::new(3, 1), 0)),
            mode: BuildMode::Update { source },
            dst,
            scratch: BufferId::new(4, 1),
            scratch_offset: 0,
        };
        let resources = command.referenced_resources();
        assert!(resources.contains(&ResourceHandle::AccelerationStructure(source)));
        assert!(resources.contains(&ResourceHandle::AccelerationStructure(dst)));
        assert!(resources.contains(&ResourceHandle::Buffer(BufferId::new(3, 1))));
        assert_eq!(resources.len(), 4);
    }

    #[test]
    fn secondary_recordings_are_walked() {
        let inner = Command::CopyBuffer {
            src: BufferId::new(0, 1),
            dst: BufferId::new(1, 1),
            region: BufferCopy {
                src_offset: 0,
                dst_offset: 0,
                size: 4,
            },
        };
        let outer = Command::ExecuteCommands(vec![SecondaryCommands {
            id: CommandBufferId::new(0, 1),
            commands: Arc::from(vec![inner]),
        }]);
        assert_eq!(outer.referenced_resources().len(), 2);
        assert_eq!(outer.name(), "execute_commands");
    }
}
