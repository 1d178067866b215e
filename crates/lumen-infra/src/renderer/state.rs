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

//! Device objects owned by the renderer and the per-frame work on them.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use lumen_core::renderer::api::acceleration::{
    AccelerationStructureInfo, BuildFlags, BuildMode, GeometryDesc, GeometryFlags,
    GeometryInstance, TriangleGeometry,
};
use lumen_core::renderer::api::command::{
    BufferImageCopy, CommandBufferLevel, CommandBufferState, CommandBufferUsage, QueryPool,
    QueryType,
};
use lumen_core::renderer::api::common::Extent2d;
use lumen_core::renderer::api::pipeline::{
    DescriptorResource, DescriptorSetDescriptor, PushConstantRange, RayTracingPipeline,
    RayTracingPipelineDescriptor, ShaderStageFlags,
};
use lumen_core::renderer::api::resource::{
    AccelerationStructureId, BufferDescriptor, BufferId, BufferUsage, CommandBufferId,
    DescriptorSetId, ImageDescriptor, ImageFormat, ImageId, ImageUsage, ResourceHandle,
    ResourceState,
};
use lumen_core::renderer::api::sync::{BufferTransition, Fence, ImageTransition, TransitionSet};
use lumen_core::renderer::error::{DeviceError, RenderError, ResourceError};
use lumen_core::renderer::{GraphicsDevice, RenderSettings, RenderStatistics};
use lumen_core::scene::{Geometry, ImageData, NodeId, NodeManagers, RenderImageType};

use crate::graphics::headless::{CommandPool, HeadlessDevice, Queue};

use super::frame::{record_frame, BlasBuild, FramePlan, FrameTimestamps, TlasBuild};
use super::gpu::{
    FramePushConstants, LightGpu, MaterialGpu, BINDING_HDR_TARGET, BINDING_LIGHTS,
    BINDING_MATERIALS, BINDING_SCENE, MAX_LIGHTS, MAX_MATERIALS,
};
use super::scene::{InstanceDesc, SceneSnapshot};
use super::shading::SkyShadingProgram;

/// How long a frame waits for the submission that last used its command buffer.
pub(crate) const FRAME_WAIT_TIMEOUT: Duration = Duration::from_secs(10);
const INITIAL_INSTANCE_CAPACITY: u32 = 16;
const TIMESTAMPS_PER_FRAME: u32 = 2;

#[derive(Debug)]
struct GeometryResources {
    revision: u64,
    geometry: Arc<Geometry>,
    vertex_buffer: BufferId,
    index_buffer: BufferId,
    blas: AccelerationStructureId,
    info: AccelerationStructureInfo,
}

#[derive(Debug)]
struct TopLevel {
    id: AccelerationStructureId,
    instance_buffer: BufferId,
    capacity: u32,
    built_instances: Option<u32>,
}

impl TopLevel {
    fn create(device: &HeadlessDevice, capacity: u32) -> Result<Self, ResourceError> {
        let info = AccelerationStructureInfo::top_level(capacity, BuildFlags::ALLOW_UPDATE);
        let id = device.create_acceleration_structure(&info)?;
        let instance_buffer = device.create_buffer(&BufferDescriptor {
            label: Some("lumen.instances".into()),
            size: capacity as u64 * std::mem::size_of::<GeometryInstance>() as u64,
            usage: BufferUsage::ACCELERATION_STRUCTURE_INPUT,
            host_visible: true,
        })?;
        Ok(Self {
            id,
            instance_buffer,
            capacity,
            built_instances: None,
        })
    }
}

#[derive(Debug)]
struct RenderTargets {
    extent: Extent2d,
    hdr: ImageId,
    hdr_state: ResourceState,
    final_image: ImageId,
    final_state: ResourceState,
    readback: BufferId,
}

impl RenderTargets {
    fn create(device: &HeadlessDevice, extent: Extent2d) -> Result<Self, ResourceError> {
        let hdr = device.create_image(&ImageDescriptor {
            label: Some("lumen.hdr".into()),
            extent,
            format: ImageFormat::Rgba32Float,
            usage: ImageUsage::STORAGE | ImageUsage::TRANSFER_SRC,
            ..Default::default()
        })?;
        let final_image = device.create_image(&ImageDescriptor {
            label: Some("lumen.final".into()),
            extent,
            format: ImageFormat::Rgba8Unorm,
            usage: ImageUsage::TRANSFER_DST | ImageUsage::TRANSFER_SRC | ImageUsage::SAMPLED,
            ..Default::default()
        })?;
        let readback = device.create_buffer(&BufferDescriptor {
            label: Some("lumen.readback".into()),
            size: extent.area() * ImageFormat::Rgba32Float.bytes_per_texel(),
            usage: BufferUsage::TRANSFER_DST,
            host_visible: true,
        })?;
        Ok(Self {
            extent,
            hdr,
            hdr_state: ResourceState::Undefined,
            final_image,
            final_state: ResourceState::Undefined,
            readback,
        })
    }

    fn handles(&self) -> [ResourceHandle; 3] {
        [
            ResourceHandle::Image(self.hdr),
            ResourceHandle::Image(self.final_image),
            ResourceHandle::Buffer(self.readback),
        ]
    }
}

#[derive(Debug)]
struct FrameSlot {
    command_buffer: CommandBufferId,
    fence: Option<Fence>,
    first_query: u32,
    timestamps_written: bool,
}

enum GeometryAction {
    Keep,
    Refit,
    Create,
}

fn destroy(device: &HeadlessDevice, handle: ResourceHandle) -> Result<(), ResourceError> {
    match handle {
        ResourceHandle::Buffer(id) => device.destroy_buffer(id),
        ResourceHandle::Image(id) => device.destroy_image(id),
        ResourceHandle::AccelerationStructure(id) => device.destroy_acceleration_structure(id),
        ResourceHandle::DescriptorSet(id) => device.destroy_descriptor_set(id),
        ResourceHandle::Pipeline(id) => device.destroy_pipeline(id),
        ResourceHandle::Event(id) => device.destroy_event(id),
        ResourceHandle::QueryPool(_) => Err(ResourceError::WrongKind {
            expected: "buffer, image, structure, set, pipeline or event",
            found: "query pool",
        }),
    }
}

fn same_instances(a: &[InstanceDesc], b: &[InstanceDesc]) -> bool {
    a.len() == b.len()
        && a.iter().zip(b).all(|(x, y)| {
            x.geometry_id == y.geometry_id && x.transform == y.transform && x.material == y.material
        })
}

/// The renderer's device, queue and every object created on them.
///
/// Shared between the renderer and the jobs it hands out; all access goes through one lock.
pub(crate) struct RendererState {
    device: HeadlessDevice,
    queue: Queue,
    pool: CommandPool,
    active: bool,
    pub(crate) settings: RenderSettings,
    pub(crate) root: Option<NodeId>,
    pub(crate) managers: Option<Arc<dyn NodeManagers>>,
    pipeline: RayTracingPipeline,
    materials: BufferId,
    lights: BufferId,
    targets: RenderTargets,
    descriptor_set: DescriptorSetId,
    descriptor_dirty: bool,
    top_level: TopLevel,
    geometries: HashMap<NodeId, GeometryResources>,
    scratch: Option<(BufferId, u64)>,
    buffer_states: HashMap<BufferId, ResourceState>,
    snapshot: SceneSnapshot,
    instances_dirty: bool,
    pending_blas: Vec<BlasBuild>,
    pending_tlas: Option<(BuildMode, u32)>,
    retired: Vec<ResourceHandle>,
    frames: Vec<FrameSlot>,
    next_frame: usize,
    timestamps: QueryPool,
    readback_command: CommandBufferId,
    statistics: RenderStatistics,
}

impl fmt::Debug for RendererState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RendererState")
            .field("active", &self.active)
            .field("root", &self.root)
            .field("managers", &self.managers.as_ref().map(|_| "NodeManagers(...)"))
            .field("extent", &self.targets.extent)
            .field("geometries", &self.geometries.len())
            .field("instances", &self.snapshot.instances.len())
            .field("frames_in_flight", &self.frames.len())
            .field("retired", &self.retired.len())
            .finish()
    }
}

impl RendererState {
    /// Creates every object a frame needs on `device`.
    pub(crate) fn new(
        device: HeadlessDevice,
        settings: RenderSettings,
        root: Option<NodeId>,
        managers: Option<Arc<dyn NodeManagers>>,
    ) -> Result<Self, RenderError> {
        device.set_validation_enabled(settings.enable_validation);
        let queue = Queue::new(&device)?;
        let mut pool = CommandPool::new(&device);

        let pipeline = device.create_ray_tracing_pipeline_with_program(
            &RayTracingPipelineDescriptor {
                label: Some("lumen.raytrace".into()),
                push_constant_ranges: vec![PushConstantRange::new(
                    0,
                    std::mem::size_of::<FramePushConstants>() as u32,
                    ShaderStageFlags::ALL_RAY_TRACING,
                )],
                max_recursion_depth: 2,
                ..Default::default()
            },
            Arc::new(SkyShadingProgram),
        )?;
        let table = |label: &str, entries: usize, entry_size: usize| {
            device.create_buffer(&BufferDescriptor {
                label: Some(label.into()),
                size: (entries * entry_size) as u64,
                usage: BufferUsage::STORAGE,
                host_visible: true,
            })
        };
        let materials = table(
            "lumen.materials",
            MAX_MATERIALS,
            std::mem::size_of::<MaterialGpu>(),
        )?;
        let lights = table("lumen.lights", MAX_LIGHTS, std::mem::size_of::<LightGpu>())?;

        let extent = Extent2d::new(settings.width.max(1), settings.height.max(1));
        let targets = RenderTargets::create(&device, extent)?;
        let top_level = TopLevel::create(&device, INITIAL_INSTANCE_CAPACITY)?;

        let frame_count = settings.frames_in_flight.max(1);
        let timestamps =
            device.create_query_pool(QueryType::Timestamp, frame_count * TIMESTAMPS_PER_FRAME)?;
        let frames = (0..frame_count)
            .map(|index| FrameSlot {
                command_buffer: pool.allocate(CommandBufferLevel::Primary),
                fence: None,
                first_query: index * TIMESTAMPS_PER_FRAME,
                timestamps_written: false,
            })
            .collect();
        let readback_command = pool.allocate(CommandBufferLevel::Primary);

        let mut state = Self {
            device,
            queue,
            pool,
            active: true,
            settings,
            root,
            managers,
            pipeline,
            materials,
            lights,
            targets,
            descriptor_set: DescriptorSetId::NULL,
            descriptor_dirty: true,
            top_level,
            geometries: HashMap::new(),
            scratch: None,
            buffer_states: HashMap::new(),
            snapshot: SceneSnapshot::default(),
            instances_dirty: true,
            pending_blas: Vec::new(),
            pending_tlas: None,
            retired: Vec::new(),
            frames,
            next_frame: 0,
            timestamps,
            readback_command,
            statistics: RenderStatistics::default(),
        };
        let defaults = state.snapshot.materials.clone();
        state.write_host(state.materials, bytemuck::cast_slice(&defaults))?;
        state.rebuild_descriptor_set()?;
        Ok(state)
    }

    /// Fails once [`shutdown`](Self::shutdown) ran.
    pub(crate) fn ensure_active(&self) -> Result<(), RenderError> {
        if self.active {
            Ok(())
        } else {
            Err(RenderError::NotInitialized)
        }
    }

    pub(crate) fn statistics(&self) -> RenderStatistics {
        self.statistics.clone()
    }

    fn buffer_state(&self, buffer: BufferId) -> ResourceState {
        self.buffer_states
            .get(&buffer)
            .copied()
            .unwrap_or(ResourceState::Undefined)
    }

    /// Blocks until no pending submission reads `handle`.
    fn wait_until_unused(&self, handle: ResourceHandle) -> Result<(), RenderError> {
        if self.device.pending_uses(handle).unwrap_or(0) > 0 {
            log::debug!("Renderer: waiting for the device to release {handle:?}");
            self.queue.wait_idle()?;
        }
        Ok(())
    }

    /// Writes host data into a buffer no pending work reads.
    fn write_host(&mut self, buffer: BufferId, data: &[u8]) -> Result<(), RenderError> {
        self.wait_until_unused(ResourceHandle::Buffer(buffer))?;
        if !data.is_empty() {
            self.device.write_buffer(buffer, 0, data)?;
        }
        self.buffer_states.insert(buffer, ResourceState::HostWrite);
        Ok(())
    }

    /// Destroys `handle` now, or once the work still using it completed.
    fn retire(&mut self, handle: ResourceHandle) {
        if let ResourceHandle::Buffer(id) = handle {
            self.buffer_states.remove(&id);
        }
        match destroy(&self.device, handle) {
            Ok(()) => log::trace!("Renderer: destroyed {handle:?}"),
            Err(ResourceError::InUse { .. }) => self.retired.push(handle),
            Err(err) => log::warn!("Renderer: could not destroy {handle:?}: {err}"),
        }
    }

    fn collect_retired(&mut self) {
        for handle in std::mem::take(&mut self.retired) {
            self.retire(handle);
        }
    }

    fn rebuild_descriptor_set(&mut self) -> Result<(), RenderError> {
        if !self.descriptor_set.is_null() {
            self.retire(ResourceHandle::DescriptorSet(self.descriptor_set));
            self.descriptor_set = DescriptorSetId::NULL;
        }
        let set = self.device.create_descriptor_set(
            &DescriptorSetDescriptor {
                label: Some("lumen.frame".into()),
                bindings: Vec::new(),
            }
            .with(
                BINDING_SCENE,
                DescriptorResource::AccelerationStructure(self.top_level.id),
            )
            .with(
                BINDING_HDR_TARGET,
                DescriptorResource::StorageImage(self.targets.hdr),
            )
            .with(
                BINDING_MATERIALS,
                DescriptorResource::StorageBuffer(self.materials),
            )
            .with(BINDING_LIGHTS, DescriptorResource::StorageBuffer(self.lights)),
        )?;
        self.descriptor_set = set;
        self.descriptor_dirty = false;
        Ok(())
    }

    // --- Scene update ---

    /// Re-walks the scene, uploads changed geometry and tables and queues the
    /// bottom-level builds the changes need.
    pub(crate) fn update_scene(&mut self) -> Result<(), RenderError> {
        self.ensure_active()?;
        let snapshot = match (&self.managers, self.root) {
            (Some(managers), Some(root)) => {
                SceneSnapshot::collect(managers.as_ref(), root, self.settings.camera)
            }
            _ => {
                log::debug!("Renderer: no scene root or node managers, rendering the sky");
                SceneSnapshot::default()
            }
        };

        let queued_before = self.pending_blas.len();
        self.sync_geometries(&snapshot)?;
        if snapshot.materials != self.snapshot.materials {
            self.write_host(self.materials, bytemuck::cast_slice(&snapshot.materials))?;
        }
        if snapshot.lights != self.snapshot.lights {
            self.write_host(self.lights, bytemuck::cast_slice(&snapshot.lights))?;
        }
        if !same_instances(&snapshot.instances, &self.snapshot.instances)
            || self.pending_blas.len() != queued_before
        {
            self.instances_dirty = true;
        }
        log::debug!(
            "Renderer: scene has {} instances, {} lights, {} materials",
            snapshot.instances.len(),
            snapshot.lights.len(),
            snapshot.materials.len()
        );
        self.snapshot = snapshot;
        Ok(())
    }

    fn sync_geometries(&mut self, snapshot: &SceneSnapshot) -> Result<(), RenderError> {
        let mut seen = HashSet::new();
        for instance in &snapshot.instances {
            let id = instance.geometry_id;
            if !seen.insert(id) {
                continue;
            }
            let geometry = &instance.geometry;
            let action = match self.geometries.get(&id) {
                Some(existing) if existing.revision == geometry.revision => GeometryAction::Keep,
                Some(existing) if !existing.geometry.topology_differs(geometry) => {
                    GeometryAction::Refit
                }
                _ => GeometryAction::Create,
            };
            match action {
                GeometryAction::Keep => {}
                GeometryAction::Refit => self.refit_geometry(id, geometry)?,
                GeometryAction::Create => {
                    if let Some(old) = self.geometries.remove(&id) {
                        self.retire_geometry(old);
                    }
                    let created = self.create_geometry(geometry)?;
                    self.queue_blas(BlasBuild {
                        info: created.info.clone(),
                        dst: created.blas,
                        mode: BuildMode::Build,
                    });
                    self.geometries.insert(id, created);
                }
            }
        }

        let stale: Vec<NodeId> = self
            .geometries
            .keys()
            .filter(|id| !seen.contains(id))
            .copied()
            .collect();
        for id in stale {
            if let Some(old) = self.geometries.remove(&id) {
                log::debug!("Renderer: geometry {id:?} is no longer referenced");
                self.retire_geometry(old);
            }
        }
        Ok(())
    }

    fn create_geometry(&mut self, geometry: &Arc<Geometry>) -> Result<GeometryResources, RenderError> {
        let index_count = geometry.triangle_count() as u32 * 3;
        let input_buffer = |label: &str, size: usize| {
            self.device.create_buffer(&BufferDescriptor {
                label: Some(label.into()),
                size: size as u64,
                usage: BufferUsage::ACCELERATION_STRUCTURE_INPUT | BufferUsage::STORAGE,
                host_visible: true,
            })
        };
        let positions: &[u8] = bytemuck::cast_slice(&geometry.positions);
        let indices: &[u8] = bytemuck::cast_slice(&geometry.indices[..index_count as usize]);
        let vertex_buffer = input_buffer("lumen.vertices", positions.len())?;
        let index_buffer = input_buffer("lumen.indices", indices.len())?;

        let info = AccelerationStructureInfo::bottom_level(
            vec![GeometryDesc::Triangles {
                triangles: TriangleGeometry {
                    vertex_buffer,
                    vertex_offset: 0,
                    vertex_count: geometry.positions.len() as u32,
                    vertex_stride: std::mem::size_of::<lumen_core::math::Vec3>() as u64,
                    index_buffer: Some((index_buffer, 0)),
                    index_count,
                },
                flags: GeometryFlags::OPAQUE,
            }],
            BuildFlags::ALLOW_UPDATE | BuildFlags::PREFER_FAST_TRACE,
        );
        let blas = self.device.create_acceleration_structure(&info)?;
        self.write_host(vertex_buffer, positions)?;
        self.write_host(index_buffer, indices)?;
        log::debug!(
            "Renderer: created {blas:?} for {} triangles",
            geometry.triangle_count()
        );

        Ok(GeometryResources {
            revision: geometry.revision,
            geometry: Arc::clone(geometry),
            vertex_buffer,
            index_buffer,
            blas,
            info,
        })
    }

    fn refit_geometry(&mut self, id: NodeId, geometry: &Arc<Geometry>) -> Result<(), RenderError> {
        let Some(existing) = self.geometries.get(&id) else {
            return Ok(());
        };
        let (vertex_buffer, build) = (
            existing.vertex_buffer,
            BlasBuild {
                info: existing.info.clone(),
                dst: existing.blas,
                mode: BuildMode::Update {
                    source: existing.blas,
                },
            },
        );
        self.write_host(vertex_buffer, bytemuck::cast_slice(&geometry.positions))?;
        self.queue_blas(build);
        if let Some(existing) = self.geometries.get_mut(&id) {
            existing.revision = geometry.revision;
            existing.geometry = Arc::clone(geometry);
        }
        Ok(())
    }

    /// Queues a bottom-level build. A full build already queued for the same structure
    /// is kept, since an update needs a built source.
    fn queue_blas(&mut self, build: BlasBuild) {
        match self.pending_blas.iter_mut().find(|b| b.dst == build.dst) {
            Some(queued) if !queued.mode.is_update() => {}
            Some(queued) => *queued = build,
            None => self.pending_blas.push(build),
        }
    }

    fn retire_geometry(&mut self, old: GeometryResources) {
        self.pending_blas.retain(|b| b.dst != old.blas);
        self.retire(ResourceHandle::AccelerationStructure(old.blas));
        self.retire(ResourceHandle::Buffer(old.vertex_buffer));
        self.retire(ResourceHandle::Buffer(old.index_buffer));
    }

    // --- Acceleration structures ---

    /// Writes the instance records of the current snapshot and decides how the top-level
    /// structure is brought up to date.
    pub(crate) fn prepare_acceleration_structures(&mut self) -> Result<(), RenderError> {
        self.ensure_active()?;
        let instances: Vec<GeometryInstance> = self
            .snapshot
            .instances
            .iter()
            .filter_map(|instance| {
                let blas = self.geometries.get(&instance.geometry_id)?.blas;
                Some(GeometryInstance::new(instance.transform, instance.material, 0, blas))
            })
            .collect();
        let count = instances.len() as u32;

        let mut rebuild = self.top_level.built_instances != Some(count)
            || matches!(self.pending_tlas, Some((BuildMode::Build, _)));
        if count > self.top_level.capacity {
            let capacity = count.next_power_of_two();
            log::debug!("Renderer: growing the top-level structure to {capacity} instances");
            let old = std::mem::replace(
                &mut self.top_level,
                TopLevel::create(&self.device, capacity)?,
            );
            self.retire(ResourceHandle::AccelerationStructure(old.id));
            self.retire(ResourceHandle::Buffer(old.instance_buffer));
            self.descriptor_dirty = true;
            rebuild = true;
        }
        self.write_host(self.top_level.instance_buffer, bytemuck::cast_slice(&instances))?;

        let mode = if rebuild {
            BuildMode::Build
        } else {
            BuildMode::Update {
                source: self.top_level.id,
            }
        };
        self.pending_tlas = Some((mode, count));
        self.statistics.instance_count = count;
        self.instances_dirty = false;
        Ok(())
    }

    fn ensure_scratch(&mut self, required: u64) -> Result<BufferId, RenderError> {
        if let Some((buffer, size)) = self.scratch {
            if size >= required {
                return Ok(buffer);
            }
            self.retire(ResourceHandle::Buffer(buffer));
        }
        let size = required.max(1).next_power_of_two();
        let buffer = self.device.create_buffer(&BufferDescriptor {
            label: Some("lumen.scratch".into()),
            size,
            usage: BufferUsage::SCRATCH,
            host_visible: false,
        })?;
        self.scratch = Some((buffer, size));
        Ok(buffer)
    }

    // --- Frames ---

    fn apply_settings(&mut self) -> Result<(), RenderError> {
        self.device
            .set_validation_enabled(self.settings.enable_validation);

        let extent = Extent2d::new(self.settings.width.max(1), self.settings.height.max(1));
        if extent != self.targets.extent {
            log::info!(
                "Renderer: resizing targets to {}x{}",
                extent.width,
                extent.height
            );
            let old = std::mem::replace(
                &mut self.targets,
                RenderTargets::create(&self.device, extent)?,
            );
            for handle in old.handles() {
                self.retire(handle);
            }
            self.descriptor_dirty = true;
        }

        let frame_count = self.settings.frames_in_flight.max(1);
        if frame_count as usize != self.frames.len() {
            self.recreate_frames(frame_count)?;
        }
        if self.descriptor_dirty {
            self.rebuild_descriptor_set()?;
        }
        Ok(())
    }

    fn recreate_frames(&mut self, frame_count: u32) -> Result<(), RenderError> {
        log::info!("Renderer: cycling {frame_count} frames in flight");
        self.queue.wait_idle()?;
        for slot in self.frames.drain(..) {
            self.pool.free(slot.command_buffer)?;
        }
        self.device.destroy_query_pool(&self.timestamps)?;
        self.timestamps = self
            .device
            .create_query_pool(QueryType::Timestamp, frame_count * TIMESTAMPS_PER_FRAME)?;
        for index in 0..frame_count {
            self.frames.push(FrameSlot {
                command_buffer: self.pool.allocate(CommandBufferLevel::Primary),
                fence: None,
                first_query: index * TIMESTAMPS_PER_FRAME,
                timestamps_written: false,
            });
        }
        self.next_frame = 0;
        Ok(())
    }

    /// Waits for the last submission of slot `index` and makes its buffer recordable.
    fn acquire_slot(&mut self, index: usize) -> Result<CommandBufferId, RenderError> {
        let slot = &mut self.frames[index];
        if let Some(fence) = slot.fence.take() {
            if !fence.wait_timeout(FRAME_WAIT_TIMEOUT) {
                log::error!("Renderer: frame slot {index} did not complete in time");
                slot.fence = Some(fence);
                return Err(RenderError::Timeout);
            }
        }
        let (command_buffer, first_query, had_timestamps) = (
            slot.command_buffer,
            slot.first_query,
            std::mem::take(&mut slot.timestamps_written),
        );

        if had_timestamps {
            let results = self.device.query_results(&self.timestamps, first_query, 2)?;
            if let [Some(start), Some(end)] = results[..] {
                self.statistics.gpu_frame_time_ms =
                    end.saturating_sub(start) as f32 * self.device.timestamp_period() / 1e6;
            }
        }

        let cmd = self
            .pool
            .get_mut(command_buffer)
            .ok_or(ResourceError::InvalidHandle)?;
        if cmd.state() != CommandBufferState::Initial {
            cmd.reset()?;
        }
        Ok(command_buffer)
    }

    fn push_constants(&self) -> FramePushConstants {
        let view = &self.snapshot.camera;
        let (origin, forward, right, up) = (view.origin(), view.forward(), view.right(), view.up());
        let extent = self.targets.extent;
        let aspect = extent.width as f32 / extent.height as f32;
        let [sr, sg, sb] = self.settings.sky_radiance();
        FramePushConstants {
            camera_origin: [origin.x, origin.y, origin.z, (view.camera.fov_y * 0.5).tan()],
            camera_forward: [forward.x, forward.y, forward.z, aspect],
            camera_right: [right.x, right.y, right.z, 0.0],
            camera_up: [up.x, up.y, up.z, 0.0],
            sky: [sr, sg, sb, self.settings.exposure * view.camera.exposure],
            counts: [
                self.statistics.frame_number as u32,
                self.settings.samples_per_frame.max(1),
                self.snapshot.lights.len() as u32,
                self.snapshot.materials.len() as u32,
            ],
        }
    }

    /// Moves `buffers` to `state`, returning the transitions to record.
    fn transitions_to(&mut self, buffers: &[BufferId], state: ResourceState) -> Vec<BufferTransition> {
        buffers
            .iter()
            .map(|buffer| {
                let old = self.buffer_states.insert(*buffer, state);
                BufferTransition::new(*buffer, old.unwrap_or(ResourceState::Undefined), state)
            })
            .collect()
    }

    /// Records and submits one frame.
    pub(crate) fn render_frame(&mut self, time: i64) -> Result<(), RenderError> {
        self.ensure_active()?;
        let started = Instant::now();
        self.apply_settings()?;
        if self.instances_dirty {
            self.prepare_acceleration_structures()?;
            if self.descriptor_dirty {
                self.rebuild_descriptor_set()?;
            }
        }
        self.collect_retired();

        let slot = self.next_frame;
        let command_buffer = self.acquire_slot(slot)?;

        let blas_builds = std::mem::take(&mut self.pending_blas);
        let tlas_build = self.pending_tlas.take().map(|(mode, count)| TlasBuild {
            info: AccelerationStructureInfo::top_level(count, BuildFlags::ALLOW_UPDATE),
            dst: self.top_level.id,
            mode,
            instances: self.top_level.instance_buffer,
        });

        let mut inputs = Vec::new();
        let mut required_scratch = 0;
        for build in &blas_builds {
            if let Some(geometry) = self.geometries.values().find(|g| g.blas == build.dst) {
                inputs.extend([geometry.vertex_buffer, geometry.index_buffer]);
            }
            required_scratch = required_scratch.max(scratch_size(&build.info, build.mode));
        }
        if let Some(tlas) = &tlas_build {
            inputs.push(tlas.instances);
            required_scratch = required_scratch.max(scratch_size(&tlas.info, tlas.mode));
        }
        let scratch = if blas_builds.is_empty() && tlas_build.is_none() {
            None
        } else {
            Some(self.ensure_scratch(required_scratch)?)
        };
        let build_inputs = self.transitions_to(&inputs, ResourceState::AccelerationStructureBuild);
        let shader_tables =
            self.transitions_to(&[self.materials, self.lights], ResourceState::ShaderRead);

        let timestamps = self.settings.enable_gpu_timestamps.then(|| FrameTimestamps {
            pool: self.timestamps,
            first_query: self.frames[slot].first_query,
        });
        let plan = FramePlan {
            pipeline: self.pipeline.clone(),
            descriptor_set: self.descriptor_set,
            push_constants: self.push_constants(),
            extent: self.targets.extent,
            hdr: self.targets.hdr,
            hdr_state: self.targets.hdr_state,
            final_image: self.targets.final_image,
            final_state: self.targets.final_state,
            build_inputs,
            shader_tables,
            blas_builds,
            tlas_build,
            scratch,
            timestamps,
        };

        let cmd = self
            .pool
            .get_mut(command_buffer)
            .ok_or(ResourceError::InvalidHandle)?;
        cmd.begin(CommandBufferUsage::ONE_TIME_SUBMIT, None)?;
        record_frame(cmd, &plan);
        cmd.end()?;
        let recording = cmd.stats();

        let fence = self.queue.submit(&mut self.pool, &[command_buffer])?;
        self.targets.hdr_state = ResourceState::TransferSrc;
        self.targets.final_state = ResourceState::ShaderRead;
        if let Some(tlas) = &plan.tlas_build {
            self.top_level.built_instances = Some(tlas.info.instance_count);
        }
        let frame = &mut self.frames[slot];
        frame.fence = Some(fence);
        frame.timestamps_written = plan.timestamps.is_some();
        self.next_frame = (slot + 1) % self.frames.len();

        self.statistics.accumulate(&recording);
        self.statistics.frame_number += 1;
        self.statistics.cpu_record_time_ms = started.elapsed().as_secs_f32() * 1000.0;
        log::trace!(
            "Renderer: frame {} at {time} ns submitted ({} commands)",
            self.statistics.frame_number,
            recording.commands
        );
        Ok(())
    }

    // --- Readback ---

    /// Copies a rendered image into the readback buffer and returns its texels.
    pub(crate) fn grab_image(&mut self, image_type: RenderImageType) -> Result<ImageData, RenderError> {
        self.ensure_active()?;
        self.queue.wait_idle()?;

        let targets = &self.targets;
        let (image, state, format) = match image_type {
            RenderImageType::Hdr => (targets.hdr, targets.hdr_state, ImageFormat::Rgba32Float),
            RenderImageType::Final => (
                targets.final_image,
                targets.final_state,
                ImageFormat::Rgba8Unorm,
            ),
        };
        let (extent, readback) = (targets.extent, targets.readback);
        let readback_state = self.buffer_state(readback);

        let cmd = self
            .pool
            .get_mut(self.readback_command)
            .ok_or(ResourceError::InvalidHandle)?;
        if cmd.state() != CommandBufferState::Initial {
            cmd.reset()?;
        }
        cmd.begin(CommandBufferUsage::ONE_TIME_SUBMIT, None)?;
        cmd.resource_barrier(
            TransitionSet::new()
                .image(ImageTransition::new(image, state, ResourceState::TransferSrc))
                .buffer(BufferTransition::new(
                    readback,
                    readback_state,
                    ResourceState::TransferDst,
                )),
        );
        cmd.copy_image_to_buffer(
            image,
            ResourceState::TransferSrc,
            readback,
            BufferImageCopy::whole(extent.into()),
        );
        cmd.resource_barrier(BufferTransition::new(
            readback,
            ResourceState::TransferDst,
            ResourceState::HostRead,
        ));
        cmd.end()?;

        let fence = self.queue.submit(&mut self.pool, &[self.readback_command])?;
        match image_type {
            RenderImageType::Hdr => self.targets.hdr_state = ResourceState::TransferSrc,
            RenderImageType::Final => self.targets.final_state = ResourceState::TransferSrc,
        }
        self.buffer_states.insert(readback, ResourceState::HostRead);
        if !fence.wait_timeout(FRAME_WAIT_TIMEOUT) {
            return Err(RenderError::Timeout);
        }
        if self.device.is_lost() {
            return Err(DeviceError::DeviceLost.into());
        }

        let size = extent.area() * format.bytes_per_texel();
        let data = self.device.read_buffer(readback, 0, size)?;
        Ok(ImageData {
            width: extent.width,
            height: extent.height,
            format,
            data,
        })
    }

    // --- Teardown ---

    /// Waits for the device and destroys every object the renderer created.
    pub(crate) fn shutdown(&mut self) {
        if !self.active {
            return;
        }
        self.active = false;
        if let Err(err) = self.queue.wait_idle() {
            log::warn!("Renderer: wait_idle failed during shutdown: {err}");
        }

        let mut handles = vec![ResourceHandle::DescriptorSet(self.descriptor_set)];
        handles.extend(std::mem::take(&mut self.retired));
        for (_, geometry) in self.geometries.drain() {
            handles.extend([
                ResourceHandle::AccelerationStructure(geometry.blas),
                ResourceHandle::Buffer(geometry.vertex_buffer),
                ResourceHandle::Buffer(geometry.index_buffer),
            ]);
        }
        handles.extend([
            ResourceHandle::AccelerationStructure(self.top_level.id),
            ResourceHandle::Buffer(self.top_level.instance_buffer),
            ResourceHandle::Buffer(self.materials),
            ResourceHandle::Buffer(self.lights),
            ResourceHandle::Pipeline(self.pipeline.pipeline.id),
        ]);
        handles.extend(self.targets.handles());
        if let Some((scratch, _)) = self.scratch.take() {
            handles.push(ResourceHandle::Buffer(scratch));
        }
        for handle in handles {
            if let Err(err) = destroy(&self.device, handle) {
                log::warn!("Renderer: could not destroy {handle:?} during shutdown: {err}");
            }
        }
        if let Err(err) = self.device.destroy_query_pool(&self.timestamps) {
            log::warn!("Renderer: could not destroy the timestamp pool: {err}");
        }
        self.pending_blas.clear();
        self.pending_tlas = None;
        self.buffer_states.clear();
        log::info!(
            "Renderer: released device objects, {} left",
            self.device.resource_count()
        );
    }
}

fn scratch_size(info: &AccelerationStructureInfo, mode: BuildMode) -> u64 {
    let sizes = info.estimate_sizes();
    if mode.is_update() {
        sizes.update_scratch_size
    } else {
        sizes.build_scratch_size
    }
}
