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

use std::sync::Arc;

use lumen_core::renderer::api::acceleration::{AccelerationStructureInfo, BuildFlags, BuildMode};
use lumen_core::renderer::api::command::{
    CommandBufferLevel, CommandBufferUsage, QueryType,
};
use lumen_core::renderer::api::common::Extent2d;
use lumen_core::renderer::api::pipeline::{
    DescriptorResource, DescriptorSetDescriptor, RayTracingPipelineDescriptor,
};
use lumen_core::renderer::api::resource::{
    BufferDescriptor, BufferUsage, ImageDescriptor, ImageFormat, ImageId, ImageUsage,
    ResourceHandle, ResourceState,
};
use lumen_core::renderer::api::sync::{AccessFlags, ImageTransition, PipelineStage};
use lumen_core::renderer::{GraphicsDevice, ResourceError};
use lumen_infra::graphics::headless::{LaunchInfo, RayContext, RayGenProgram};
use lumen_infra::{CommandPool, HeadlessDevice, Queue};

const GATE_COLOR: [f32; 4] = [0.25, 0.5, 0.75, 1.0];

/// Blocks every pixel until the test opens the gate.
#[derive(Debug)]
struct GatedProgram {
    gate: flume::Receiver<()>,
}

impl RayGenProgram for GatedProgram {
    fn shade(&self, _launch: &LaunchInfo, _ctx: &RayContext<'_>) -> [f32; 4] {
        let _ = self.gate.recv();
        GATE_COLOR
    }
}

fn init_logger() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn storage_image(device: &HeadlessDevice) -> ImageId {
    device
        .create_image(&ImageDescriptor {
            label: Some("target".into()),
            extent: Extent2d::new(1, 1),
            format: ImageFormat::Rgba32Float,
            usage: ImageUsage::STORAGE | ImageUsage::TRANSFER_SRC | ImageUsage::TRANSFER_DST,
            ..Default::default()
        })
        .unwrap()
}

#[test]
fn resources_of_a_pending_dispatch_cannot_be_destroyed() {
    init_logger();
    let device = HeadlessDevice::new();
    let queue = Queue::new(&device).unwrap();
    let mut pool = CommandPool::new(&device);
    let (open, gate) = flume::unbounded();

    let pipeline = device
        .create_ray_tracing_pipeline_with_program(
            &RayTracingPipelineDescriptor::default(),
            Arc::new(GatedProgram { gate }),
        )
        .unwrap();
    let info = AccelerationStructureInfo::top_level(0, BuildFlags::PREFER_FAST_TRACE);
    let tlas = device.create_acceleration_structure(&info).unwrap();
    let instances = device
        .create_buffer(&BufferDescriptor {
            label: None,
            size: 64,
            usage: BufferUsage::ACCELERATION_STRUCTURE_INPUT,
            host_visible: true,
        })
        .unwrap();
    let scratch = device
        .create_buffer(&BufferDescriptor {
            label: None,
            size: info.estimate_sizes().build_scratch_size.max(256),
            usage: BufferUsage::SCRATCH,
            host_visible: false,
        })
        .unwrap();
    let target = storage_image(&device);
    let set = device
        .create_descriptor_set(
            &DescriptorSetDescriptor {
                label: None,
                bindings: Vec::new(),
            }
            .with(0, DescriptorResource::AccelerationStructure(tlas))
            .with(1, DescriptorResource::StorageImage(target)),
        )
        .unwrap();

    let id = pool.allocate(CommandBufferLevel::Primary);
    let cmd = pool.get_mut(id).unwrap();
    cmd.begin(CommandBufferUsage::ONE_TIME_SUBMIT, None).unwrap();
    cmd.build_top_level_acceleration_structure(&info, tlas, BuildMode::Build, instances, scratch);
    cmd.pipeline_barrier(
        PipelineStage::ACCELERATION_STRUCTURE_BUILD,
        AccessFlags::ACCELERATION_STRUCTURE_WRITE,
        PipelineStage::RAY_TRACING_SHADER,
        AccessFlags::ACCELERATION_STRUCTURE_READ,
    );
    cmd.resource_barrier(ImageTransition::new(
        target,
        ResourceState::Undefined,
        ResourceState::ShaderWrite,
    ));
    cmd.bind_pipeline(&pipeline);
    cmd.bind_descriptor_sets(&pipeline, 0, &[set]);
    cmd.trace_rays(&pipeline, 1, 1);
    cmd.end().unwrap();

    let fence = queue.submit(&mut pool, &[id]).unwrap();
    assert_eq!(device.pending_uses(ResourceHandle::Image(target)), Some(1));
    assert_eq!(
        device.destroy_image(target),
        Err(ResourceError::InUse { pending_uses: 1 })
    );

    open.send(()).unwrap();
    fence.wait();
    assert_eq!(device.image_texels(target, 0).unwrap(), vec![GATE_COLOR]);
    assert_eq!(device.pending_uses(ResourceHandle::Image(target)), Some(0));
    device.destroy_image(target).unwrap();
    assert!(device.take_validation_messages().is_empty());
}

#[test]
fn dispatch_only_submission_keeps_bound_resources_alive() {
    init_logger();
    let device = HeadlessDevice::new();
    let queue = Queue::new(&device).unwrap();
    let mut pool = CommandPool::new(&device);
    let (open, gate) = flume::unbounded();

    let pipeline = device
        .create_ray_tracing_pipeline_with_program(
            &RayTracingPipelineDescriptor::default(),
            Arc::new(GatedProgram { gate }),
        )
        .unwrap();
    let info = AccelerationStructureInfo::top_level(0, BuildFlags::PREFER_FAST_TRACE);
    let tlas = device.create_acceleration_structure(&info).unwrap();
    let instances = device
        .create_buffer(&BufferDescriptor {
            label: None,
            size: 64,
            usage: BufferUsage::ACCELERATION_STRUCTURE_INPUT,
            host_visible: true,
        })
        .unwrap();
    let scratch = device
        .create_buffer(&BufferDescriptor {
            label: None,
            size: info.estimate_sizes().build_scratch_size.max(256),
            usage: BufferUsage::SCRATCH,
            host_visible: false,
        })
        .unwrap();
    let target = storage_image(&device);
    let set = device
        .create_descriptor_set(
            &DescriptorSetDescriptor {
                label: None,
                bindings: Vec::new(),
            }
            .with(0, DescriptorResource::AccelerationStructure(tlas))
            .with(1, DescriptorResource::StorageImage(target)),
        )
        .unwrap();

    let setup = pool.allocate(CommandBufferLevel::Primary);
    let cmd = pool.get_mut(setup).unwrap();
    cmd.begin(CommandBufferUsage::ONE_TIME_SUBMIT, None).unwrap();
    cmd.build_top_level_acceleration_structure(&info, tlas, BuildMode::Build, instances, scratch);
    cmd.resource_barrier(ImageTransition::new(
        target,
        ResourceState::Undefined,
        ResourceState::ShaderWrite,
    ));
    cmd.end().unwrap();
    queue.submit(&mut pool, &[setup]).unwrap().wait();

    // The image and the TLAS only reach this buffer through the set.
    let id = pool.allocate(CommandBufferLevel::Primary);
    let cmd = pool.get_mut(id).unwrap();
    cmd.begin(CommandBufferUsage::ONE_TIME_SUBMIT, None).unwrap();
    cmd.bind_pipeline(&pipeline);
    cmd.bind_descriptor_sets(&pipeline, 0, &[set]);
    cmd.trace_rays(&pipeline, 1, 1);
    cmd.end().unwrap();

    let fence = queue.submit(&mut pool, &[id]).unwrap();
    assert_eq!(device.pending_uses(ResourceHandle::Image(target)), Some(1));
    assert_eq!(
        device.pending_uses(ResourceHandle::AccelerationStructure(tlas)),
        Some(1)
    );
    assert_eq!(
        device.destroy_image(target),
        Err(ResourceError::InUse { pending_uses: 1 })
    );
    assert_eq!(
        device.destroy_acceleration_structure(tlas),
        Err(ResourceError::InUse { pending_uses: 1 })
    );

    open.send(()).unwrap();
    fence.wait();
    assert_eq!(device.image_texels(target, 0).unwrap(), vec![GATE_COLOR]);
    assert_eq!(device.pending_uses(ResourceHandle::Image(target)), Some(0));
    assert_eq!(
        device.pending_uses(ResourceHandle::AccelerationStructure(tlas)),
        Some(0)
    );
    assert!(device.take_validation_messages().is_empty());
}

#[test]
fn overflowing_copy_is_reported_without_losing_the_device() {
    init_logger();
    let device = HeadlessDevice::new();
    let queue = Queue::new(&device).unwrap();
    let mut pool = CommandPool::new(&device);
    let buffer = |usage| {
        device
            .create_buffer(&BufferDescriptor {
                label: None,
                size: 4,
                usage,
                host_visible: true,
            })
            .unwrap()
    };
    let src = buffer(BufferUsage::TRANSFER_SRC);
    let dst = buffer(BufferUsage::TRANSFER_DST);

    let id = pool.allocate(CommandBufferLevel::Primary);
    let cmd = pool.get_mut(id).unwrap();
    cmd.begin(CommandBufferUsage::ONE_TIME_SUBMIT, None).unwrap();
    cmd.copy_buffer(src, 0, dst, u64::MAX - 1, 4);
    cmd.end().unwrap();
    queue.submit(&mut pool, &[id]).unwrap().wait();

    assert!(!device.is_lost());
    let messages = device.take_validation_messages();
    assert_eq!(messages.len(), 1, "{messages:?}");
    assert_eq!(messages[0].command, "copy_buffer");
    assert!(messages[0].message.contains("overflows"));

    let id = pool.allocate(CommandBufferLevel::Primary);
    let cmd = pool.get_mut(id).unwrap();
    cmd.begin(CommandBufferUsage::ONE_TIME_SUBMIT, None).unwrap();
    cmd.copy_buffer(src, 0, dst, 0, 4);
    cmd.end().unwrap();
    queue.submit(&mut pool, &[id]).unwrap().wait();
    assert!(device.take_validation_messages().is_empty());
}

#[test]
fn barrier_from_the_wrong_layout_is_reported() {
    init_logger();
    let device = HeadlessDevice::new();
    let queue = Queue::new(&device).unwrap();
    let mut pool = CommandPool::new(&device);
    let image = storage_image(&device);

    let id = pool.allocate(CommandBufferLevel::Primary);
    let cmd = pool.get_mut(id).unwrap();
    cmd.begin(CommandBufferUsage::ONE_TIME_SUBMIT, None).unwrap();
    cmd.resource_barrier(ImageTransition::new(
        image,
        ResourceState::Undefined,
        ResourceState::TransferSrc,
    ));
    cmd.resource_barrier(ImageTransition::new(
        image,
        ResourceState::ShaderWrite,
        ResourceState::TransferDst,
    ));
    cmd.end().unwrap();
    queue.submit(&mut pool, &[id]).unwrap().wait();

    let messages = device.take_validation_messages();
    assert_eq!(messages.len(), 1, "{messages:?}");
    assert_eq!(messages[0].command, "pipeline_barrier");
    assert!(messages[0].message.contains("the barrier expects"));
}

#[test]
fn dispatch_through_the_wrong_record_is_reported() {
    init_logger();
    let device = HeadlessDevice::new();
    let queue = Queue::new(&device).unwrap();
    let mut pool = CommandPool::new(&device);
    let pipeline = device
        .create_ray_tracing_pipeline(&RayTracingPipelineDescriptor::default())
        .unwrap();

    let id = pool.allocate(CommandBufferLevel::Primary);
    let cmd = pool.get_mut(id).unwrap();
    cmd.begin(CommandBufferUsage::ONE_TIME_SUBMIT, None).unwrap();
    cmd.bind_pipeline(&pipeline);
    // One miss shader: miss record 1 lands on the first hit group.
    cmd.trace_rays_with(&pipeline, 1, 1, 1, 0);
    cmd.end().unwrap();
    queue.submit(&mut pool, &[id]).unwrap().wait();

    let messages = device.take_validation_messages();
    assert_eq!(messages.len(), 1, "{messages:?}");
    assert_eq!(messages[0].command, "trace_rays");
    assert!(messages[0].message.contains("expected a miss record"));
}

#[test]
fn timestamps_need_a_reset_first() {
    init_logger();
    let device = HeadlessDevice::new();
    let queue = Queue::new(&device).unwrap();
    let mut pool = CommandPool::new(&device);
    let queries = device.create_query_pool(QueryType::Timestamp, 2).unwrap();

    let id = pool.allocate(CommandBufferLevel::Primary);
    let cmd = pool.get_mut(id).unwrap();
    cmd.begin(CommandBufferUsage::ONE_TIME_SUBMIT, None).unwrap();
    cmd.write_timestamp(PipelineStage::TOP_OF_PIPE, &queries, 0);
    cmd.reset_query_pool(&queries, 1, 1);
    cmd.write_timestamp(PipelineStage::BOTTOM_OF_PIPE, &queries, 1);
    cmd.end().unwrap();
    queue.submit(&mut pool, &[id]).unwrap().wait();

    let messages = device.take_validation_messages();
    assert_eq!(messages.len(), 1, "{messages:?}");
    assert!(messages[0].message.contains("reset it first"));
    let results = device.query_results(&queries, 0, 2).unwrap();
    assert!(results[0].is_none());
    assert!(results[1].is_some());
}
