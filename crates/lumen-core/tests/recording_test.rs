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

use std::panic::{catch_unwind, AssertUnwindSafe};

use lumen_core::renderer::api::acceleration::{
    AccelerationStructureInfo, BuildFlags, BuildMode, GeometryDesc, GeometryFlags,
    TriangleGeometry,
};
use lumen_core::renderer::api::command::{
    BufferImageCopy, Command, CommandBuffer, CommandBufferLevel, CommandBufferState,
    CommandBufferUsage, QueryPool, QueryType,
};
use lumen_core::renderer::api::common::{Extent3d, Filter};
use lumen_core::renderer::api::pipeline::{
    Pipeline, PipelineBindPoint, PushConstantRange, RayTracingPipeline, ShaderBindingTableLayout,
    ShaderStageFlags,
};
use lumen_core::renderer::api::resource::{
    AccelerationStructureId, BufferId, ImageId, PipelineId, PipelineLayoutId, QueryPoolId,
    ResourceState,
};
use lumen_core::renderer::api::sync::{ImageTransition, PipelineStage};
use lumen_core::renderer::error::CommandBufferError;

fn primary() -> CommandBuffer {
    CommandBuffer::detached(CommandBufferLevel::Primary)
}

fn compute_pipeline(ranges: usize) -> Pipeline {
    let mut pipeline = Pipeline::new(
        PipelineId::new(1, 1),
        PipelineBindPoint::Compute,
        PipelineLayoutId::new(1, 1),
    );
    for i in 0..ranges as u32 {
        pipeline = pipeline.with_push_constant_range(PushConstantRange::new(
            i * 16,
            16,
            ShaderStageFlags::COMPUTE,
        ));
    }
    pipeline
}

fn ray_tracing_pipeline(stride: u64, hit_group_offset: u64) -> RayTracingPipeline {
    let layout = ShaderBindingTableLayout::new(32, 64, 4, 4);
    let mut pipeline = RayTracingPipeline::new(
        Pipeline::new(
            PipelineId::new(2, 1),
            PipelineBindPoint::RayTracing,
            PipelineLayoutId::new(2, 1),
        ),
        BufferId::new(9, 1),
        &layout,
    );
    pipeline.shader_binding_table_stride = stride;
    pipeline.hit_group_offset = hit_group_offset;
    pipeline
}

fn blas_info() -> AccelerationStructureInfo {
    AccelerationStructureInfo::bottom_level(
        vec![GeometryDesc::Triangles {
            triangles: TriangleGeometry {
                vertex_buffer: BufferId::new(3, 1),
                vertex_offset: 0,
                vertex_count: 3,
                vertex_stride: 12,
                index_buffer: None,
                index_count: 0,
            },
            flags: GeometryFlags::OPAQUE,
        }],
        BuildFlags::ALLOW_UPDATE,
    )
}

/// Records a representative frame into `cb`.
fn record_frame(cb: &mut CommandBuffer) {
    let pool = QueryPool {
        id: QueryPoolId::new(0, 1),
        ty: QueryType::Timestamp,
        count: 2,
    };
    let rt = ray_tracing_pipeline(64, 320);
    cb.reset_query_pool(&pool, 0, 2);
    cb.write_timestamp(PipelineStage::TOP_OF_PIPE, &pool, 0);
    cb.resource_barrier(ImageTransition::new(
        ImageId::new(0, 1),
        ResourceState::Undefined,
        ResourceState::ShaderWrite,
    ));
    cb.bind_pipeline(&rt);
    cb.trace_rays(&rt, 16, 8);
    cb.resource_barrier(ImageTransition::new(
        ImageId::new(0, 1),
        ResourceState::ShaderWrite,
        ResourceState::TransferSrc,
    ));
    cb.copy_image_to_buffer(
        ImageId::new(0, 1),
        ResourceState::TransferSrc,
        BufferId::new(4, 1),
        BufferImageCopy::whole(Extent3d::new(16, 8, 1)),
    );
    cb.write_timestamp(PipelineStage::BOTTOM_OF_PIPE, &pool, 1);
}

#[test]
fn end_without_begin_fails() {
    let mut cb = primary();
    assert_eq!(
        cb.end(),
        Err(CommandBufferError::InvalidState {
            operation: "end",
            state: CommandBufferState::Initial,
        })
    );
}

#[test]
fn begin_twice_fails() {
    let mut cb = primary();
    cb.begin(CommandBufferUsage::EMPTY, None).unwrap();
    assert_eq!(
        cb.begin(CommandBufferUsage::EMPTY, None),
        Err(CommandBufferError::InvalidState {
            operation: "begin",
            state: CommandBufferState::Recording,
        })
    );
    // The failed call leaves the recording intact.
    assert_eq!(cb.state(), CommandBufferState::Recording);
}

#[test]
#[should_panic(expected = "Cannot record dispatch into a command buffer in the Initial state")]
fn recording_before_begin_panics() {
    primary().dispatch(1, 1, 1);
}

#[test]
#[should_panic(expected = "in the Executable state")]
fn recording_after_end_panics() {
    let mut cb = primary();
    cb.begin(CommandBufferUsage::EMPTY, None).unwrap();
    cb.end().unwrap();
    cb.bind_pipeline(&compute_pipeline(0));
}

#[test]
fn every_recording_call_panics_outside_recording() {
    let rt = ray_tracing_pipeline(64, 128);
    let calls: Vec<(&str, Box<dyn Fn(&mut CommandBuffer)>)> = vec![
        ("draw", Box::new(|cb: &mut CommandBuffer| cb.draw(3, 1, 0, 0))),
        ("trace_rays", Box::new(move |cb: &mut CommandBuffer| cb.trace_rays(&rt, 1, 1))),
        (
            "push_constants",
            Box::new(|cb: &mut CommandBuffer| cb.push_constants(&compute_pipeline(1), 0, &[0; 16])),
        ),
        (
            "copy_buffer",
            Box::new(|cb: &mut CommandBuffer| cb.copy_buffer(BufferId::new(0, 1), 0, BufferId::new(1, 1), 0, 4)),
        ),
        (
            "blit_image",
            Box::new(|cb: &mut CommandBuffer| {
                cb.blit_image(
                    ImageId::new(0, 1),
                    ResourceState::TransferSrc,
                    ImageId::new(1, 1),
                    ResourceState::TransferDst,
                    lumen_core::renderer::api::command::ImageBlit::whole(
                        Extent3d::new(4, 4, 1),
                        Extent3d::new(2, 2, 1),
                    ),
                    Filter::Linear,
                )
            }),
        ),
    ];

    for (name, call) in &calls {
        let mut fresh = primary();
        let result = catch_unwind(AssertUnwindSafe(|| call(&mut fresh)));
        assert!(result.is_err(), "{name} before begin must panic");
        assert!(fresh.commands().is_empty());
    }
}

#[test]
fn push_constant_range_index_is_checked_for_every_range_count() {
    for n in [0usize, 1, 5] {
        let pipeline = compute_pipeline(n);
        for index in [n, n + 1, usize::MAX] {
            let mut cb = primary();
            cb.begin(CommandBufferUsage::EMPTY, None).unwrap();
            let result = catch_unwind(AssertUnwindSafe(|| {
                cb.push_constants(&pipeline, index, &[0; 16]);
            }));
            assert!(result.is_err(), "index {index} with {n} ranges must panic");
        }

        if n > 0 {
            let mut cb = primary();
            cb.begin(CommandBufferUsage::EMPTY, None).unwrap();
            cb.push_constants(&pipeline, n - 1, &[7; 16]);
            let Command::PushConstants { offset, data, .. } = &cb.commands()[0] else {
                panic!("expected push constants");
            };
            assert_eq!(*offset, (n as u32 - 1) * 16);
            assert_eq!(data, &vec![7u8; 16]);
        }
    }
}

#[test]
fn trace_rays_addresses_the_requested_records() {
    const STRIDE: u64 = 64;
    const HIT_OFFSET: u64 = 448;
    let rt = ray_tracing_pipeline(STRIDE, HIT_OFFSET);

    let mut cb = primary();
    cb.begin(CommandBufferUsage::EMPTY, None).unwrap();
    cb.trace_rays_with(&rt, 32, 16, 2, 3);
    cb.trace_rays(&rt, 4, 4);
    cb.end().unwrap();

    let Command::TraceRays {
        regions,
        width,
        height,
        depth,
    } = &cb.commands()[0]
    else {
        panic!("expected trace_rays");
    };
    assert_eq!((*width, *height, *depth), (32, 16, 1));
    assert_eq!(regions.raygen.offset, 0);
    assert_eq!(regions.miss.offset, 3 * STRIDE);
    assert_eq!(regions.hit.offset, HIT_OFFSET + 3 * STRIDE);
    assert_eq!(regions.miss.stride, STRIDE);

    let Command::TraceRays { regions, .. } = &cb.commands()[1] else {
        panic!("expected trace_rays");
    };
    assert_eq!(regions.miss.offset, STRIDE);
    assert_eq!(regions.hit.offset, HIT_OFFSET);
    assert_eq!(cb.stats().rays, 32 * 16 + 16);
}

#[test]
#[should_panic(expected = "trace_rays needs a ray-tracing pipeline")]
fn trace_rays_with_a_compute_pipeline_panics() {
    let mut rt = ray_tracing_pipeline(64, 128);
    rt.pipeline.bind_point = PipelineBindPoint::Compute;
    let mut cb = primary();
    cb.begin(CommandBufferUsage::EMPTY, None).unwrap();
    cb.trace_rays(&rt, 1, 1);
}

#[test]
fn bottom_level_build_is_an_update_only_with_a_source() {
    let info = blas_info();
    let dst = AccelerationStructureId::new(0, 1);
    let scratch = BufferId::new(5, 1);

    for source in [None, Some(AccelerationStructureId::new(1, 1))] {
        let mut cb = primary();
        cb.begin(CommandBufferUsage::EMPTY, None).unwrap();
        cb.build_bottom_level_acceleration_structure(
            &info,
            dst,
            BuildMode::from_source(source),
            scratch,
        );
        cb.end().unwrap();

        let Command::BuildAccelerationStructure { mode, instances, .. } = &cb.commands()[0] else {
            panic!("expected a build");
        };
        assert_eq!(mode.is_update(), source.is_some());
        assert_eq!(mode.source(), source);
        assert!(instances.is_none());

        let stats = cb.stats();
        let expected = if source.is_some() { (0, 1) } else { (1, 0) };
        assert_eq!(
            (
                stats.acceleration_structure_builds,
                stats.acceleration_structure_updates
            ),
            expected
        );
    }
}

#[test]
fn top_level_build_references_the_instance_buffer() {
    let info = AccelerationStructureInfo::top_level(4, BuildFlags::PREFER_FAST_TRACE);
    let mut cb = primary();
    cb.begin(CommandBufferUsage::EMPTY, None).unwrap();
    cb.build_top_level_acceleration_structure(
        &info,
        AccelerationStructureId::new(7, 1),
        BuildMode::Build,
        BufferId::new(6, 1),
        BufferId::new(5, 1),
    );
    let Command::BuildAccelerationStructure { instances, .. } = &cb.commands()[0] else {
        panic!("expected a build");
    };
    assert_eq!(*instances, Some((BufferId::new(6, 1), 0)));
}

#[test]
fn reset_then_begin_records_like_a_fresh_buffer() {
    let mut fresh = primary();
    fresh.begin(CommandBufferUsage::ONE_TIME_SUBMIT, None).unwrap();
    record_frame(&mut fresh);
    fresh.end().unwrap();

    let mut reused = primary();
    reused.begin(CommandBufferUsage::EMPTY, None).unwrap();
    reused.dispatch(4, 4, 4);
    reused.build_bottom_level_acceleration_structure(
        &blas_info(),
        AccelerationStructureId::new(0, 1),
        BuildMode::Build,
        BufferId::new(5, 1),
    );
    reused.end().unwrap();
    reused.reset().unwrap();
    assert_eq!(reused.state(), CommandBufferState::Initial);

    reused.begin(CommandBufferUsage::ONE_TIME_SUBMIT, None).unwrap();
    record_frame(&mut reused);
    reused.end().unwrap();

    assert_eq!(reused.commands(), fresh.commands());
    assert_eq!(reused.stats(), fresh.stats());
    assert_eq!(reused.usage(), fresh.usage());
}
