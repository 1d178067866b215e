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

//! Replays submitted command buffers against the resources of a [`HeadlessDevice`].
//!
//! The executor is the headless device's "GPU". Besides performing copies, blits,
//! acceleration-structure builds and ray dispatches, it checks what a real driver's
//! validation layer would: the layouts recorded in barriers and transfer commands
//! against the tracked ones, scratch sizes, update sources, bound pipelines and the
//! shader-binding-table records addressed by `trace_rays`. Findings go to
//! [`HeadlessDevice::report`].

use std::collections::HashMap;
use std::sync::Arc;

use lumen_core::math::Vec3;
use lumen_core::renderer::api::acceleration::{
    AccelerationStructureInfo, AccelerationStructureKind, BuildFlags, BuildMode, GeometryDesc,
    GeometryInstance,
};
use lumen_core::renderer::api::command::{
    BufferCopy, BufferImageCopy, Command, ImageBlit, SecondaryCommands,
};
use lumen_core::renderer::api::common::Filter;
use lumen_core::renderer::api::pipeline::{
    DescriptorResource, PipelineBindPoint, ShaderBindingRegion, ShaderGroup, TraceRaysRegions,
};
use lumen_core::renderer::api::resource::{
    AccelerationStructureId, BufferId, BufferUsage, CommandBufferId, DescriptorSetId, ImageId,
    ImageSubresourceLayers, ImageSubresourceRange, PipelineId, QueryPoolId, ResourceHandle,
};
use lumen_core::renderer::api::sync::{Fence, ImageLayout, PipelineBarrier};

use super::device::{
    decode_group_handle, encode_texel, kind_name, BuiltStructure, HeadlessDevice, QuerySlot,
    Resources, MAX_PUSH_CONSTANTS_SIZE, SHADER_GROUP_HANDLE_SIZE,
};
use super::raycast::{BottomLevelGeometry, LaunchInfo, RayContext, SceneInstance, SceneQuery};

const INSTANCE_SIZE: u64 = std::mem::size_of::<GeometryInstance>() as u64;

/// Work handed from a queue to its worker thread.
#[derive(Debug)]
pub(crate) struct Submission {
    pub(crate) buffers: Vec<(CommandBufferId, Arc<[Command]>)>,
    pub(crate) retained: Vec<ResourceHandle>,
    pub(crate) fence: Fence,
}

/// Executes every buffer of `submission` in order, then drops its retains.
///
/// Signaling the fence is left to the caller.
pub(crate) fn execute_submission(device: &HeadlessDevice, submission: &Submission) {
    if device.is_lost() {
        log::warn!(
            "HeadlessDevice: dropping a submission of {} command buffer(s) on a lost device",
            submission.buffers.len()
        );
    } else {
        for (id, commands) in &submission.buffers {
            Executor::new(device, *id).run(commands);
        }
    }
    device.lock().release_all(&submission.retained);
}

struct BoundState {
    pipelines: HashMap<PipelineBindPoint, PipelineId>,
    sets: HashMap<(PipelineBindPoint, u32), DescriptorSetId>,
    push_constants: [u8; MAX_PUSH_CONSTANTS_SIZE as usize],
}

impl Default for BoundState {
    fn default() -> Self {
        Self {
            pipelines: HashMap::new(),
            sets: HashMap::new(),
            push_constants: [0; MAX_PUSH_CONSTANTS_SIZE as usize],
        }
    }
}

struct Executor<'a> {
    device: &'a HeadlessDevice,
    buffer: CommandBufferId,
    bound: BoundState,
    command: &'static str,
}

impl<'a> Executor<'a> {
    fn new(device: &'a HeadlessDevice, buffer: CommandBufferId) -> Self {
        Self {
            device,
            buffer,
            bound: BoundState::default(),
            command: "",
        }
    }

    fn report(&self, message: impl Into<String>) {
        self.device.report(
            self.command,
            format!("command buffer {:?}: {}", self.buffer, message.into()),
        );
    }

    fn run(&mut self, commands: &[Command]) {
        log::debug!(
            "HeadlessDevice: executing {} command(s) of {:?}",
            commands.len(),
            self.buffer
        );
        for command in commands {
            self.command = command.name();
            log::trace!("HeadlessDevice: {:?} -> {}", self.buffer, self.command);
            self.execute(command);
        }
    }

    fn execute(&mut self, command: &Command) {
        match command {
            Command::PipelineBarrier(barrier) => self.pipeline_barrier(barrier),
            Command::SetEvent { event, .. } => {
                match self.device.lock().events.get_mut(*event) {
                    Some(entry) => entry.signaled = true,
                    None => self.report(format!("event {event:?} does not exist")),
                }
            }
            Command::BeginRenderPass { .. } | Command::EndRenderPass => {}
            Command::ClearColorImage {
                image,
                layout,
                range,
            } => self.clear_color_image(*image, *layout, range),
            Command::BindPipeline {
                bind_point,
                pipeline,
            } => self.bind_pipeline(*bind_point, *pipeline),
            Command::BindDescriptorSets {
                bind_point,
                first_set,
                sets,
                ..
            } => self.bind_descriptor_sets(*bind_point, *first_set, sets),
            Command::BuildAccelerationStructure {
                info,
                instances,
                mode,
                dst,
                scratch,
                scratch_offset,
            } => self.build_acceleration_structure(
                info,
                *instances,
                *mode,
                *dst,
                *scratch,
                *scratch_offset,
            ),
            Command::CopyBuffer { src, dst, region } => self.copy_buffer(*src, *dst, region),
            Command::CopyImageToBuffer {
                src,
                src_layout,
                dst,
                region,
            } => self.copy_image_to_buffer(*src, *src_layout, *dst, region),
            Command::BlitImage {
                src,
                src_layout,
                dst,
                dst_layout,
                region,
                filter,
            } => self.blit_image(*src, *src_layout, *dst, *dst_layout, region, *filter),
            Command::Dispatch { .. } => self.require_pipeline(PipelineBindPoint::Compute),
            Command::Draw { .. } => self.require_pipeline(PipelineBindPoint::Graphics),
            Command::TraceRays {
                regions,
                width,
                height,
                depth,
            } => self.trace_rays(regions, *width, *height, *depth),
            Command::PushConstants { offset, data, .. } => self.push_constants(*offset, data),
            Command::SetViewport(_) | Command::SetScissor(_) => {}
            Command::ResetQueryPool { pool, first, count } => {
                self.reset_query_pool(*pool, *first, *count)
            }
            Command::WriteTimestamp { pool, query, .. } => self.write_timestamp(*pool, *query),
            Command::ExecuteCommands(secondaries) => self.execute_commands(secondaries),
        }
    }

    fn pipeline_barrier(&self, barrier: &PipelineBarrier) {
        let device = self.device;
        let mut resources = device.lock();
        for buffer_barrier in &barrier.buffer_barriers {
            match resources.buffers.get(buffer_barrier.buffer) {
                None => self.report(format!("buffer {:?} does not exist", buffer_barrier.buffer)),
                Some(entry) if buffer_barrier.range.resolve(entry.descriptor.size).is_none() => {
                    self.report(format!(
                        "barrier range {:?} exceeds buffer {:?} of {} bytes",
                        buffer_barrier.range, buffer_barrier.buffer, entry.descriptor.size
                    ))
                }
                Some(_) => {}
            }
        }
        for image_barrier in &barrier.image_barriers {
            let image = image_barrier.image;
            if !resources.images.contains(image) {
                self.report(format!("image {image:?} does not exist"));
                continue;
            }
            let old = image_barrier.old_layout();
            if old != ImageLayout::Undefined {
                for mismatch in resources.tracker.mismatches(image, &image_barrier.range, old) {
                    self.report(format!(
                        "image {image:?} level {} layer {} is in {:?}, the barrier expects {old:?}",
                        mismatch.level, mismatch.layer, mismatch.actual
                    ));
                }
            }
            resources
                .tracker
                .transition(image, &image_barrier.range, image_barrier.new_layout());
        }
    }

    fn check_layout(
        &self,
        resources: &Resources,
        image: ImageId,
        range: &ImageSubresourceRange,
        layout: ImageLayout,
    ) {
        for mismatch in resources.tracker.mismatches(image, range, layout) {
            self.report(format!(
                "image {image:?} level {} layer {} is in {:?}, the command says {layout:?}",
                mismatch.level, mismatch.layer, mismatch.actual
            ));
        }
    }

    fn clear_color_image(&self, image: ImageId, layout: ImageLayout, range: &ImageSubresourceRange) {
        let device = self.device;
        let mut resources = device.lock();
        let Some(entry) = resources.images.get(image) else {
            self.report(format!("image {image:?} does not exist"));
            return;
        };
        let levels = entry.descriptor.mip_levels;
        let layers = entry.descriptor.array_layers;
        self.check_layout(&resources, image, range, layout);
        if !range.levels(levels).contains(&0) {
            return;
        }
        if let Some(entry) = resources.images.get_mut(image) {
            for layer in range.layers(layers) {
                if let Some(texels) = entry.layers.get_mut(layer as usize) {
                    texels.fill([0.0; 4]);
                }
            }
        }
    }

    fn bind_pipeline(&mut self, bind_point: PipelineBindPoint, pipeline: PipelineId) {
        let actual = self
            .device
            .lock()
            .pipelines
            .get(pipeline)
            .map(|entry| entry.pipeline.bind_point);
        match actual {
            None => self.report(format!("pipeline {pipeline:?} does not exist")),
            Some(actual) if actual != bind_point => self.report(format!(
                "pipeline {pipeline:?} is a {actual:?} pipeline, bound at {bind_point:?}"
            )),
            Some(_) => {
                self.bound.pipelines.insert(bind_point, pipeline);
            }
        }
    }

    fn bind_descriptor_sets(
        &mut self,
        bind_point: PipelineBindPoint,
        first_set: u32,
        sets: &[DescriptorSetId],
    ) {
        let device = self.device;
        let resources = device.lock();
        for (offset, set) in sets.iter().enumerate() {
            if !resources.descriptor_sets.contains(*set) {
                self.report(format!("descriptor set {set:?} does not exist"));
                continue;
            }
            self.bound
                .sets
                .insert((bind_point, first_set + offset as u32), *set);
        }
    }

    fn require_pipeline(&self, bind_point: PipelineBindPoint) {
        if !self.bound.pipelines.contains_key(&bind_point) {
            self.report(format!("no {bind_point:?} pipeline is bound"));
        }
    }

    fn build_acceleration_structure(
        &self,
        info: &AccelerationStructureInfo,
        instances: Option<(BufferId, u64)>,
        mode: BuildMode,
        dst: AccelerationStructureId,
        scratch: BufferId,
        scratch_offset: u64,
    ) {
        let device = self.device;
        let mut resources = device.lock();

        let Some(target) = resources.acceleration_structures.get(dst) else {
            self.report(format!("acceleration structure {dst:?} does not exist"));
            return;
        };
        if target.kind != info.kind {
            self.report(format!(
                "{dst:?} is a {}, the build describes a {}",
                target.kind_name(),
                kind_name(info.kind)
            ));
            return;
        }
        if let Err(err) = info.validate() {
            self.report(err.to_string());
            return;
        }
        let sizes = info.estimate_sizes();
        if sizes.storage_size > target.sizes.storage_size {
            self.report(format!(
                "{dst:?} holds {} bytes, the build needs {}",
                target.sizes.storage_size, sizes.storage_size
            ));
            return;
        }

        let required_scratch = if mode.is_update() {
            sizes.update_scratch_size
        } else {
            sizes.build_scratch_size
        };
        match resources.buffers.get(scratch) {
            None => {
                self.report(format!("scratch buffer {scratch:?} does not exist"));
                return;
            }
            Some(entry) => {
                if !entry.descriptor.usage.contains(BufferUsage::SCRATCH) {
                    self.report(format!("buffer {scratch:?} was not created for SCRATCH use"));
                }
                let available = entry.descriptor.size.saturating_sub(scratch_offset);
                if available < required_scratch {
                    self.report(format!(
                        "scratch buffer {scratch:?} has {available} bytes past offset {scratch_offset}, the build needs {required_scratch}"
                    ));
                    return;
                }
            }
        }

        if let BuildMode::Update { source } = mode {
            if !info.flags.contains(BuildFlags::ALLOW_UPDATE) {
                self.report("an update build must keep ALLOW_UPDATE");
                return;
            }
            match resources.acceleration_structures.get(source) {
                None => {
                    self.report(format!("update source {source:?} does not exist"));
                    return;
                }
                Some(entry) if entry.built.is_none() => {
                    self.report(format!("update source {source:?} was never built"));
                    return;
                }
                Some(entry) if !entry.build_flags.contains(BuildFlags::ALLOW_UPDATE) => {
                    self.report(format!(
                        "update source {source:?} was built without ALLOW_UPDATE"
                    ));
                    return;
                }
                Some(entry) if entry.primitive_count != info.primitive_count() => {
                    self.report(format!(
                        "update source {source:?} has {} primitives, the update has {}",
                        entry.primitive_count,
                        info.primitive_count()
                    ));
                    return;
                }
                Some(_) => {}
            }
        }

        let built = match info.kind {
            AccelerationStructureKind::BottomLevel => self
                .gather_bottom_level(&resources, info)
                .map(|geometry| BuiltStructure::Bottom(Arc::new(geometry))),
            AccelerationStructureKind::TopLevel => {
                let Some((buffer, offset)) = instances else {
                    self.report("top-level build without an instance buffer");
                    return;
                };
                self.gather_instances(&resources, buffer, offset, info.instance_count)
                    .map(|instances| BuiltStructure::Top(instances.into()))
            }
        };
        let Some(built) = built else {
            return;
        };

        if let Some(target) = resources.acceleration_structures.get_mut(dst) {
            target.built = Some(built);
            target.build_flags = info.flags;
            target.primitive_count = info.primitive_count();
        }
    }

    fn read_bytes<'r>(
        &self,
        resources: &'r Resources,
        buffer: BufferId,
        offset: u64,
        len: u64,
    ) -> Option<&'r [u8]> {
        let Some(entry) = resources.buffers.get(buffer) else {
            self.report(format!("buffer {buffer:?} does not exist"));
            return None;
        };
        let bytes = offset
            .checked_add(len)
            .and_then(|end| usize::try_from(offset).ok().zip(usize::try_from(end).ok()))
            .and_then(|(start, end)| entry.data.get(start..end));
        if bytes.is_none() {
            self.report(format!(
                "reading {len} bytes at {offset} overruns buffer {buffer:?} of {} bytes",
                entry.descriptor.size
            ));
        }
        bytes
    }

    /// Byte offset of element `index` of a strided array, `None` past the address range.
    fn element_offset(&self, base: u64, index: u64, stride: u64) -> Option<u64> {
        let offset = index.checked_mul(stride).and_then(|o| o.checked_add(base));
        if offset.is_none() {
            self.report(format!(
                "element {index} with stride {stride} at {base} overflows the address range"
            ));
        }
        offset
    }

    fn gather_bottom_level(
        &self,
        resources: &Resources,
        info: &AccelerationStructureInfo,
    ) -> Option<BottomLevelGeometry> {
        let mut geometry = BottomLevelGeometry::default();
        for desc in &info.geometries {
            match desc {
                GeometryDesc::Triangles { triangles, .. } => {
                    let stride = triangles.vertex_stride.max(12);
                    let mut vertices = Vec::with_capacity(triangles.vertex_count as usize);
                    for index in 0..triangles.vertex_count as u64 {
                        let bytes = self.read_bytes(
                            resources,
                            triangles.vertex_buffer,
                            self.element_offset(triangles.vertex_offset, index, stride)?,
                            12,
                        )?;
                        vertices.push(Vec3::from(bytemuck::pod_read_unaligned::<[f32; 3]>(bytes)));
                    }
                    let indices: Vec<u32> = match triangles.index_buffer {
                        Some((buffer, offset)) => {
                            let bytes = self.read_bytes(
                                resources,
                                buffer,
                                offset,
                                triangles.index_count as u64 * 4,
                            )?;
                            bytes
                                .chunks_exact(4)
                                .map(|chunk| u32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
                                .collect()
                        }
                        None => (0..triangles.vertex_count).collect(),
                    };
                    for tri in indices.chunks_exact(3) {
                        let corner = |i: u32| vertices.get(i as usize).copied();
                        match (corner(tri[0]), corner(tri[1]), corner(tri[2])) {
                            (Some(a), Some(b), Some(c)) => geometry.triangles.push([a, b, c]),
                            _ => {
                                self.report(format!(
                                    "triangle {tri:?} indexes past {} vertices",
                                    vertices.len()
                                ));
                                return None;
                            }
                        }
                    }
                }
                GeometryDesc::Aabbs { aabbs, .. } => {
                    let stride = aabbs.stride.max(24);
                    for index in 0..aabbs.count as u64 {
                        let offset = self.element_offset(aabbs.offset, index, stride)?;
                        let bytes = self.read_bytes(resources, aabbs.buffer, offset, 24)?;
                        let [x0, y0, z0, x1, y1, z1] = bytemuck::pod_read_unaligned::<[f32; 6]>(bytes);
                        geometry
                            .aabbs
                            .push([Vec3::new(x0, y0, z0), Vec3::new(x1, y1, z1)]);
                    }
                }
            }
        }
        Some(geometry)
    }

    fn gather_instances(
        &self,
        resources: &Resources,
        buffer: BufferId,
        offset: u64,
        count: u32,
    ) -> Option<Vec<SceneInstance>> {
        let bytes = self.read_bytes(resources, buffer, offset, count as u64 * INSTANCE_SIZE)?;
        let mut instances = Vec::with_capacity(count as usize);
        for (index, record) in bytes.chunks_exact(INSTANCE_SIZE as usize).enumerate() {
            let instance: GeometryInstance = bytemuck::pod_read_unaligned(record);
            let blas = instance.acceleration_structure();
            let geometry = match resources.acceleration_structures.get(blas) {
                Some(entry) => match &entry.built {
                    Some(BuiltStructure::Bottom(geometry)) => Arc::clone(geometry),
                    Some(BuiltStructure::Top(_)) => {
                        self.report(format!("instance {index} references top-level {blas:?}"));
                        return None;
                    }
                    None => {
                        self.report(format!("instance {index} references unbuilt {blas:?}"));
                        return None;
                    }
                },
                None => {
                    self.report(format!("instance {index} references missing {blas:?}"));
                    return None;
                }
            };
            let Some(mut resolved) = SceneInstance::new(instance.transform, geometry) else {
                self.report(format!("instance {index} has a singular transform"));
                return None;
            };
            resolved.custom_index = instance.custom_index();
            resolved.mask = instance.mask();
            resolved.hit_group_offset = instance.hit_group_offset();
            resolved.flags = instance.flags();
            instances.push(resolved);
        }
        Some(instances)
    }

    fn copy_buffer(&self, src: BufferId, dst: BufferId, region: &BufferCopy) {
        let device = self.device;
        let mut resources = device.lock();
        let Some(data) = self
            .read_bytes(&resources, src, region.src_offset, region.size)
            .map(<[u8]>::to_vec)
        else {
            return;
        };
        let Some(dst_end) = region.dst_offset.checked_add(region.size) else {
            self.report(format!(
                "writing {} bytes at {} overflows the address range of {dst:?}",
                region.size, region.dst_offset
            ));
            return;
        };
        if src == dst
            && region.src_offset < dst_end
            && region.dst_offset < region.src_offset + region.size
        {
            self.report(format!("source and destination ranges of {src:?} overlap"));
            return;
        }
        let Some(entry) = resources.buffers.get_mut(dst) else {
            self.report(format!("buffer {dst:?} does not exist"));
            return;
        };
        let target = usize::try_from(region.dst_offset)
            .ok()
            .zip(usize::try_from(dst_end).ok())
            .and_then(|(start, end)| entry.data.get_mut(start..end));
        match target {
            Some(target) => target.copy_from_slice(&data),
            None => self.report(format!(
                "writing {} bytes at {} overruns buffer {dst:?} of {} bytes",
                region.size, region.dst_offset, entry.descriptor.size
            )),
        }
    }

    fn copy_image_to_buffer(
        &self,
        src: ImageId,
        src_layout: ImageLayout,
        dst: BufferId,
        region: &BufferImageCopy,
    ) {
        let device = self.device;
        let mut resources = device.lock();
        let Some(image) = resources.images.get(src) else {
            self.report(format!("image {src:?} does not exist"));
            return;
        };
        let sub = region.image_subresource;
        let range = ImageSubresourceRange {
            aspect: sub.aspect,
            base_mip_level: sub.mip_level,
            level_count: Some(1),
            base_array_layer: sub.base_array_layer,
            layer_count: Some(sub.layer_count),
        };
        self.check_layout(&resources, src, &range, src_layout);
        if sub.mip_level != 0 {
            self.report("only the base mip level holds texels on this device");
            return;
        }

        let format = image.descriptor.format;
        let extent = region.image_extent;
        let row_length = match region.buffer_row_length {
            0 => extent.width as u64,
            length => length as u64,
        };
        let image_height = match region.buffer_image_height {
            0 => extent.height as u64,
            height => height as u64,
        };
        let texel_size = format.bytes_per_texel();
        let (x0, y0) = (region.image_offset.x, region.image_offset.y);
        if x0 < 0
            || y0 < 0
            || x0 as u64 + extent.width as u64 > image.width() as u64
            || y0 as u64 + extent.height as u64 > image.height() as u64
            || sub.base_array_layer + sub.layer_count > image.descriptor.array_layers
        {
            self.report(format!(
                "copy region {region:?} exceeds image {src:?} ({}x{})",
                image.width(),
                image.height()
            ));
            return;
        }

        let mut writes: Vec<(u64, Vec<u8>)> = Vec::new();
        for layer in 0..sub.layer_count {
            for y in 0..extent.height {
                let Some(row_start) = (layer as u64 * image_height + y as u64)
                    .checked_mul(row_length)
                    .and_then(|texels| texels.checked_mul(texel_size))
                    .and_then(|bytes| bytes.checked_add(region.buffer_offset))
                else {
                    self.report(format!(
                        "copy region {region:?} overflows the address range of {dst:?}"
                    ));
                    return;
                };
                let mut row = Vec::with_capacity((extent.width as u64 * texel_size) as usize);
                for x in 0..extent.width {
                    let texel = image
                        .texel(sub.base_array_layer + layer, x0 as u32 + x, y0 as u32 + y)
                        .unwrap_or([0.0; 4]);
                    encode_texel(format, texel, &mut row);
                }
                writes.push((row_start, row));
            }
        }

        let Some(entry) = resources.buffers.get_mut(dst) else {
            self.report(format!("buffer {dst:?} does not exist"));
            return;
        };
        let capacity = entry.descriptor.size;
        if let Some((start, row)) = writes
            .iter()
            .find(|(start, row)| start.saturating_add(row.len() as u64) > capacity)
        {
            self.report(format!(
                "row of {} bytes at {start} overruns buffer {dst:?} of {capacity} bytes",
                row.len()
            ));
            return;
        }
        for (start, row) in writes {
            let start = start as usize;
            entry.data[start..start + row.len()].copy_from_slice(&row);
        }
    }

    fn blit_image(
        &self,
        src: ImageId,
        src_layout: ImageLayout,
        dst: ImageId,
        dst_layout: ImageLayout,
        region: &ImageBlit,
        filter: Filter,
    ) {
        let device = self.device;
        let mut resources = device.lock();
        let (Some(source), true) = (resources.images.get(src), resources.images.contains(dst)) else {
            self.report(format!("blit between {src:?} and {dst:?} references a missing image"));
            return;
        };
        let as_range = |sub: ImageSubresourceLayers| {
            ImageSubresourceRange {
                aspect: sub.aspect,
                base_mip_level: sub.mip_level,
                level_count: Some(1),
                base_array_layer: sub.base_array_layer,
                layer_count: Some(sub.layer_count),
            }
        };
        self.check_layout(&resources, src, &as_range(region.src_subresource), src_layout);
        self.check_layout(&resources, dst, &as_range(region.dst_subresource), dst_layout);
        if region.src_subresource.mip_level != 0 || region.dst_subresource.mip_level != 0 {
            self.report("only the base mip level holds texels on this device");
            return;
        }
        if region.src_subresource.layer_count != region.dst_subresource.layer_count {
            self.report("source and destination layer counts differ");
            return;
        }

        let (sw, sh) = (source.width(), source.height());
        let layers: Vec<Vec<[f32; 4]>> = (0..region.src_subresource.layer_count)
            .filter_map(|layer| {
                source
                    .layers
                    .get((region.src_subresource.base_array_layer + layer) as usize)
                    .cloned()
            })
            .collect();

        let Some(target) = resources.images.get_mut(dst) else {
            return;
        };
        let [s0, s1] = region.src_offsets;
        let [d0, d1] = region.dst_offsets;
        let (dx_lo, dx_hi) = (d0.x.min(d1.x), d0.x.max(d1.x));
        let (dy_lo, dy_hi) = (d0.y.min(d1.y), d0.y.max(d1.y));
        let span_x = (d1.x - d0.x) as f32;
        let span_y = (d1.y - d0.y) as f32;
        if span_x == 0.0 || span_y == 0.0 {
            return;
        }

        for (layer_index, texels) in layers.iter().enumerate() {
            let dst_layer = region.dst_subresource.base_array_layer + layer_index as u32;
            for dy in dy_lo.max(0)..dy_hi.min(target.height() as i32) {
                let v = (dy as f32 + 0.5 - d0.y as f32) / span_y;
                let sy = s0.y as f32 + v * (s1.y - s0.y) as f32;
                for dx in dx_lo.max(0)..dx_hi.min(target.width() as i32) {
                    let u = (dx as f32 + 0.5 - d0.x as f32) / span_x;
                    let sx = s0.x as f32 + u * (s1.x - s0.x) as f32;
                    let texel = sample(texels, sw, sh, sx, sy, filter);
                    target.store(dst_layer, dx as u32, dy as u32, texel);
                }
            }
        }
    }

    fn push_constants(&mut self, offset: u32, data: &[u8]) {
        let start = offset as usize;
        match self.bound.push_constants.get_mut(start..start + data.len()) {
            Some(block) => block.copy_from_slice(data),
            None => self.report(format!(
                "{} bytes at offset {offset} exceed the {MAX_PUSH_CONSTANTS_SIZE}-byte block",
                data.len()
            )),
        }
    }

    fn reset_query_pool(&self, pool: QueryPoolId, first: u32, count: u32) {
        let device = self.device;
        let mut resources = device.lock();
        let Some(entry) = resources.query_pools.get_mut(pool) else {
            self.report(format!("query pool {pool:?} does not exist"));
            return;
        };
        let end = (first as usize + count as usize).min(entry.slots.len());
        for slot in &mut entry.slots[(first as usize).min(end)..end] {
            *slot = QuerySlot::Reset;
        }
    }

    fn write_timestamp(&self, pool: QueryPoolId, query: u32) {
        let now = self.device.timestamp_now();
        let device = self.device;
        let mut resources = device.lock();
        let Some(entry) = resources.query_pools.get_mut(pool) else {
            self.report(format!("query pool {pool:?} does not exist"));
            return;
        };
        match entry.slots.get_mut(query as usize) {
            Some(slot) if *slot == QuerySlot::Reset => *slot = QuerySlot::Written(now),
            Some(slot) => {
                let state = *slot;
                self.report(format!(
                    "query {query} of {pool:?} written while {state:?}; reset it first"
                ));
            }
            None => self.report(format!("query {query} outside {pool:?}")),
        }
    }

    fn execute_commands(&self, secondaries: &[SecondaryCommands]) {
        for secondary in secondaries {
            Executor::new(self.device, secondary.id).run(&secondary.commands);
        }
    }

    // Checks that the record at `region.offset` is a handle of `pipeline` of the
    // expected group kind and returns the group.
    fn check_record(
        &self,
        resources: &Resources,
        pipeline: PipelineId,
        region: &ShaderBindingRegion,
        expected: &str,
        accepts: fn(&ShaderGroup) -> bool,
    ) -> Option<ShaderGroup> {
        let record = self.read_bytes(
            resources,
            region.buffer,
            region.offset,
            SHADER_GROUP_HANDLE_SIZE as u64,
        )?;
        match decode_group_handle(record) {
            None => {
                self.report(format!(
                    "no shader group handle at offset {} of {:?}",
                    region.offset, region.buffer
                ));
                None
            }
            Some((owner, group)) if owner != pipeline => {
                self.report(format!(
                    "{group:?} at offset {} belongs to {owner:?}, the bound pipeline is {pipeline:?}",
                    region.offset
                ));
                None
            }
            Some((_, group)) if !accepts(&group) => {
                self.report(format!(
                    "expected a {expected} record at offset {}, found {group:?}",
                    region.offset
                ));
                None
            }
            Some((_, group)) => Some(group),
        }
    }

    fn trace_rays(&self, regions: &TraceRaysRegions, width: u32, height: u32, depth: u32) {
        let Some(&pipeline) = self.bound.pipelines.get(&PipelineBindPoint::RayTracing) else {
            self.report("no RayTracing pipeline is bound");
            return;
        };
        let device = self.device;
        let resources = device.lock();
        let Some(entry) = resources.pipelines.get(pipeline) else {
            self.report(format!("pipeline {pipeline:?} does not exist"));
            return;
        };

        let raygen = self.check_record(&resources, pipeline, &regions.raygen, "ray-generation", |g| {
            matches!(g, ShaderGroup::RayGen)
        });
        let miss = self.check_record(&resources, pipeline, &regions.miss, "miss", |g| {
            matches!(g, ShaderGroup::Miss(_))
        });
        let hit = self.check_record(&resources, pipeline, &regions.hit, "hit-group", |g| {
            matches!(g, ShaderGroup::HitGroup(_))
        });
        if regions.callable.is_some() {
            self.report("callable shaders are not supported");
        }
        let (Some(_), Some(ShaderGroup::Miss(miss_index)), Some(ShaderGroup::HitGroup(hit_index))) =
            (raygen, miss, hit)
        else {
            return;
        };
        if depth != 1 {
            self.report(format!("launch depth {depth} is traced as 1"));
        }

        let Some(program) = entry.program.clone() else {
            log::trace!("HeadlessDevice: {pipeline:?} has no ray-generation program");
            return;
        };
        let Some(set) = self
            .bound
            .sets
            .get(&(PipelineBindPoint::RayTracing, 0))
            .and_then(|id| resources.descriptor_sets.get(*id))
        else {
            self.report("trace_rays without a descriptor set bound at set 0");
            return;
        };

        let mut scene = None;
        let mut target = None;
        let mut buffers = HashMap::new();
        for binding in &set.bindings {
            match binding.resource {
                DescriptorResource::AccelerationStructure(id) => {
                    match resources.acceleration_structures.get(id).and_then(|e| e.built.as_ref()) {
                        Some(BuiltStructure::Top(instances)) => {
                            scene = Some(SceneQuery::new(Arc::clone(instances)));
                        }
                        _ => self.report(format!(
                            "binding {} holds {id:?}, which is not a built top-level structure",
                            binding.binding
                        )),
                    }
                }
                DescriptorResource::StorageImage(id) if target.is_none() => target = Some(id),
                DescriptorResource::StorageBuffer(id) | DescriptorResource::UniformBuffer(id) => {
                    match resources.buffers.get(id) {
                        Some(buffer) => {
                            buffers.insert(binding.binding, buffer.data.clone());
                        }
                        None => self.report(format!("buffer {id:?} does not exist")),
                    }
                }
                _ => {}
            }
        }
        let (Some(scene), Some(target)) = (scene, target) else {
            self.report("set 0 needs a built top-level structure and a storage image");
            return;
        };
        let Some(image) = resources.images.get(target) else {
            self.report(format!("storage image {target:?} does not exist"));
            return;
        };
        match resources.tracker.layout(target, 0, 0) {
            Some(ImageLayout::General) => {}
            other => {
                self.report(format!(
                    "storage image {target:?} is in {other:?}, ray dispatches write it in General"
                ));
                return;
            }
        }
        if width > image.width() || height > image.height() {
            self.report(format!(
                "launch {width}x{height} exceeds storage image {target:?} ({}x{})",
                image.width(),
                image.height()
            ));
        }
        let (width, height) = (width.min(image.width()), height.min(image.height()));
        let push_constants = self.bound.push_constants;
        drop(resources);

        let ctx = RayContext::new(&scene, &push_constants, &buffers);
        let mut output = Vec::with_capacity(width as usize * height as usize);
        for y in 0..height {
            for x in 0..width {
                let launch = LaunchInfo {
                    x,
                    y,
                    width,
                    height,
                    miss_index,
                    hit_index,
                };
                output.push(program.shade(&launch, &ctx));
            }
        }

        let mut resources = device.lock();
        let Some(image) = resources.images.get_mut(target) else {
            self.report(format!(
                "storage image {target:?} was destroyed during the dispatch, output dropped"
            ));
            return;
        };
        for (index, texel) in output.into_iter().enumerate() {
            let (x, y) = (index as u32 % width.max(1), index as u32 / width.max(1));
            image.store(0, x, y, texel);
        }
    }
}

fn sample(texels: &[[f32; 4]], width: u32, height: u32, x: f32, y: f32, filter: Filter) -> [f32; 4] {
    let fetch = |x: i64, y: i64| {
        let x = x.clamp(0, width as i64 - 1) as usize;
        let y = y.clamp(0, height as i64 - 1) as usize;
        texels.get(y * width as usize + x).copied().unwrap_or([0.0; 4])
    };
    match filter {
        Filter::Nearest => fetch(x.floor() as i64, y.floor() as i64),
        Filter::Linear => {
            let (fx, fy) = (x - 0.5, y - 0.5);
            let (x0, y0) = (fx.floor(), fy.floor());
            let (tx, ty) = (fx - x0, fy - y0);
            let (x0, y0) = (x0 as i64, y0 as i64);
            let lerp = |a: [f32; 4], b: [f32; 4], t: f32| {
                [0, 1, 2, 3].map(|i| a[i] + (b[i] - a[i]) * t)
            };
            let top = lerp(fetch(x0, y0), fetch(x0 + 1, y0), tx);
            let bottom = lerp(fetch(x0, y0 + 1), fetch(x0 + 1, y0 + 1), tx);
            lerp(top, bottom, ty)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const CHECKER: [[f32; 4]; 4] = [
        [0.0, 0.0, 0.0, 1.0],
        [1.0, 1.0, 1.0, 1.0],
        [1.0, 1.0, 1.0, 1.0],
        [0.0, 0.0, 0.0, 1.0],
    ];

    #[test]
    fn nearest_sampling_picks_the_covering_texel() {
        assert_eq!(sample(&CHECKER, 2, 2, 1.2, 0.3, Filter::Nearest), CHECKER[1]);
        assert_eq!(sample(&CHECKER, 2, 2, 5.0, -1.0, Filter::Nearest), CHECKER[1]);
    }

    #[test]
    fn linear_sampling_blends_neighbours() {
        let center = sample(&CHECKER, 2, 2, 1.0, 1.0, Filter::Linear);
        assert!((center[0] - 0.5).abs() < 1e-6);
        assert_eq!(center[3], 1.0);
        assert_eq!(sample(&CHECKER, 2, 2, 0.5, 0.5, Filter::Linear), CHECKER[0]);
    }
}
