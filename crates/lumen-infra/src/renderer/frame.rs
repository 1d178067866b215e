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

//! Recording of one frame into a primary command buffer.

use lumen_core::renderer::api::acceleration::{AccelerationStructureInfo, BuildMode};
use lumen_core::renderer::api::command::{CommandBuffer, ImageBlit, QueryPool};
use lumen_core::renderer::api::common::{Extent2d, Extent3d, Filter};
use lumen_core::renderer::api::pipeline::RayTracingPipeline;
use lumen_core::renderer::api::resource::{
    AccelerationStructureId, BufferId, DescriptorSetId, ImageId, ResourceState,
};
use lumen_core::renderer::api::sync::{
    AccessFlags, BufferTransition, ImageTransition, PipelineStage, TransitionSet,
};

use super::gpu::FramePushConstants;

/// A bottom-level build or refit waiting to be recorded.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct BlasBuild {
    pub(crate) info: AccelerationStructureInfo,
    pub(crate) dst: AccelerationStructureId,
    pub(crate) mode: BuildMode,
}

/// The top-level build of a frame.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct TlasBuild {
    pub(crate) info: AccelerationStructureInfo,
    pub(crate) dst: AccelerationStructureId,
    pub(crate) mode: BuildMode,
    pub(crate) instances: BufferId,
}

/// Timestamp queries written around a frame.
#[derive(Debug, Clone, Copy)]
pub(crate) struct FrameTimestamps {
    pub(crate) pool: QueryPool,
    pub(crate) first_query: u32,
}

/// Everything [`record_frame`] records, gathered before the command buffer is borrowed.
#[derive(Debug)]
pub(crate) struct FramePlan {
    pub(crate) pipeline: RayTracingPipeline,
    pub(crate) descriptor_set: DescriptorSetId,
    pub(crate) push_constants: FramePushConstants,
    pub(crate) extent: Extent2d,
    pub(crate) hdr: ImageId,
    pub(crate) hdr_state: ResourceState,
    pub(crate) final_image: ImageId,
    pub(crate) final_state: ResourceState,
    /// Geometry and instance buffers moving to the build state.
    pub(crate) build_inputs: Vec<BufferTransition>,
    /// Material and light tables moving to the shader-read state.
    pub(crate) shader_tables: Vec<BufferTransition>,
    pub(crate) blas_builds: Vec<BlasBuild>,
    pub(crate) tlas_build: Option<TlasBuild>,
    pub(crate) scratch: Option<BufferId>,
    pub(crate) timestamps: Option<FrameTimestamps>,
}

impl FramePlan {
    pub(crate) fn has_builds(&self) -> bool {
        !self.blas_builds.is_empty() || self.tlas_build.is_some()
    }
}

/// Scratch memory is reused by consecutive builds.
fn scratch_barrier(cmd: &mut CommandBuffer) {
    cmd.pipeline_barrier(
        PipelineStage::ACCELERATION_STRUCTURE_BUILD,
        AccessFlags::ACCELERATION_STRUCTURE_WRITE,
        PipelineStage::ACCELERATION_STRUCTURE_BUILD,
        AccessFlags::ACCELERATION_STRUCTURE_READ | AccessFlags::ACCELERATION_STRUCTURE_WRITE,
    );
}

/// Records `plan` into `cmd`, which must be recording.
///
/// Order: timestamps, build inputs, bottom-level then top-level builds, the dispatch into
/// the HDR target, the blit into the final image, closing timestamp. Afterwards the HDR
/// target is in `TransferSrc` and the final image in `ShaderRead`.
pub(crate) fn record_frame(cmd: &mut CommandBuffer, plan: &FramePlan) {
    if let Some(ts) = &plan.timestamps {
        cmd.reset_query_pool(&ts.pool, ts.first_query, 2);
        cmd.write_timestamp(PipelineStage::TOP_OF_PIPE, &ts.pool, ts.first_query);
    }

    if let (true, Some(scratch)) = (plan.has_builds(), plan.scratch) {
        cmd.resource_barrier(plan.build_inputs.as_slice());
        for (index, build) in plan.blas_builds.iter().enumerate() {
            if index > 0 {
                scratch_barrier(cmd);
            }
            cmd.build_bottom_level_acceleration_structure(&build.info, build.dst, build.mode, scratch);
        }
        if let Some(tlas) = &plan.tlas_build {
            if !plan.blas_builds.is_empty() {
                scratch_barrier(cmd);
            }
            cmd.build_top_level_acceleration_structure(
                &tlas.info,
                tlas.dst,
                tlas.mode,
                tlas.instances,
                scratch,
            );
        }
        cmd.pipeline_barrier(
            PipelineStage::ACCELERATION_STRUCTURE_BUILD,
            AccessFlags::ACCELERATION_STRUCTURE_WRITE,
            PipelineStage::RAY_TRACING_SHADER,
            AccessFlags::ACCELERATION_STRUCTURE_READ,
        );
    }

    let mut pre_trace: TransitionSet = plan.shader_tables.as_slice().into();
    pre_trace.push(ImageTransition::new(
        plan.hdr,
        plan.hdr_state,
        ResourceState::ShaderWrite,
    ));
    cmd.resource_barrier(pre_trace);

    let pipeline = &plan.pipeline.pipeline;
    cmd.bind_pipeline(pipeline);
    cmd.bind_descriptor_sets(pipeline, 0, &[plan.descriptor_set]);
    cmd.push_constants_pod(pipeline, 0, &plan.push_constants);
    cmd.trace_rays(&plan.pipeline, plan.extent.width, plan.extent.height);

    cmd.resource_barrier(
        TransitionSet::new()
            .image(ImageTransition::new(
                plan.hdr,
                ResourceState::ShaderWrite,
                ResourceState::TransferSrc,
            ))
            .image(ImageTransition::new(
                plan.final_image,
                plan.final_state,
                ResourceState::TransferDst,
            )),
    );
    let extent = Extent3d::from(plan.extent);
    cmd.blit_image(
        plan.hdr,
        ResourceState::TransferSrc,
        plan.final_image,
        ResourceState::TransferDst,
        ImageBlit::whole(extent, extent),
        Filter::Linear,
    );
    cmd.resource_barrier(ImageTransition::new(
        plan.final_image,
        ResourceState::TransferDst,
        ResourceState::ShaderRead,
    ));

    if let Some(ts) = &plan.timestamps {
        cmd.write_timestamp(PipelineStage::BOTTOM_OF_PIPE, &ts.pool, ts.first_query + 1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lumen_core::renderer::api::acceleration::BuildFlags;
    use lumen_core::renderer::api::command::{
        Command, CommandBufferLevel, CommandBufferUsage, QueryType,
    };
    use lumen_core::renderer::api::pipeline::{
        Pipeline, PipelineBindPoint, PushConstantRange, ShaderBindingTableLayout,
        ShaderStageFlags,
    };
    use lumen_core::renderer::api::resource::{PipelineId, PipelineLayoutId, QueryPoolId};

    fn plan() -> FramePlan {
        let pipeline = Pipeline::new(
            PipelineId::new(0, 1),
            PipelineBindPoint::RayTracing,
            PipelineLayoutId::new(0, 1),
        )
        .with_push_constant_range(PushConstantRange::new(
            0,
            std::mem::size_of::<FramePushConstants>() as u32,
            ShaderStageFlags::ALL_RAY_TRACING,
        ));
        let layout = ShaderBindingTableLayout::new(32, 64, 1, 1);
        FramePlan {
            pipeline: RayTracingPipeline::new(pipeline, BufferId::new(9, 1), &layout),
            descriptor_set: DescriptorSetId::new(0, 1),
            push_constants: FramePushConstants::default(),
            extent: Extent2d::new(4, 2),
            hdr: ImageId::new(0, 1),
            hdr_state: ResourceState::Undefined,
            final_image: ImageId::new(1, 1),
            final_state: ResourceState::Undefined,
            build_inputs: Vec::new(),
            shader_tables: Vec::new(),
            blas_builds: Vec::new(),
            tlas_build: None,
            scratch: None,
            timestamps: None,
        }
    }

    fn names(cmd: &CommandBuffer) -> Vec<&'static str> {
        cmd.commands().iter().map(Command::name).collect()
    }

    fn recording() -> CommandBuffer {
        let mut cmd = CommandBuffer::detached(CommandBufferLevel::Primary);
        cmd.begin(CommandBufferUsage::ONE_TIME_SUBMIT, None).unwrap();
        cmd
    }

    #[test]
    fn frame_without_builds_traces_then_blits() {
        let mut cmd = recording();
        record_frame(&mut cmd, &plan());
        let names = names(&cmd);
        let trace = names.iter().position(|n| *n == "trace_rays").unwrap();
        let blit = names.iter().position(|n| *n == "blit_image").unwrap();
        assert!(trace < blit);
        assert!(!names.iter().any(|n| n.starts_with("build_")));
        assert_eq!(cmd.stats().ray_dispatches, 1);
        assert_eq!(cmd.stats().rays, 8);
    }

    #[test]
    fn builds_come_first_and_share_scratch_behind_barriers() {
        let mut plan = plan();
        plan.scratch = Some(BufferId::new(5, 1));
        plan.tlas_build = Some(TlasBuild {
            info: AccelerationStructureInfo::top_level(1, BuildFlags::ALLOW_UPDATE),
            dst: AccelerationStructureId::new(0, 1),
            mode: BuildMode::Build,
            instances: BufferId::new(6, 1),
        });
        plan.build_inputs = vec![BufferTransition::new(
            BufferId::new(6, 1),
            ResourceState::HostWrite,
            ResourceState::AccelerationStructureBuild,
        )];
        plan.timestamps = Some(FrameTimestamps {
            pool: QueryPool {
                id: QueryPoolId::new(0, 1),
                ty: QueryType::Timestamp,
                count: 2,
            },
            first_query: 0,
        });

        let mut cmd = recording();
        record_frame(&mut cmd, &plan);
        let names = names(&cmd);
        assert_eq!(names[0], "reset_query_pool");
        assert_eq!(names[1], "write_timestamp");
        let build = names
            .iter()
            .position(|n| *n == "build_acceleration_structure")
            .unwrap();
        let trace = names.iter().position(|n| *n == "trace_rays").unwrap();
        assert!(build < trace);
        assert_eq!(names.last(), Some(&"write_timestamp"));
        assert_eq!(cmd.stats().acceleration_structure_builds, 1);
    }
}
