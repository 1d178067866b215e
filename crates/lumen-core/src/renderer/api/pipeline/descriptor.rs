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

//! Pipeline descriptors: bind point, layout and push-constant ranges.

use crate::renderer::api::resource::{PipelineId, PipelineLayoutId};

/// The pipeline slot a pipeline binds to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PipelineBindPoint {
    /// Rasterization pipelines.
    Graphics,
    /// Compute pipelines.
    Compute,
    /// Ray-tracing pipelines.
    RayTracing,
}

crate::lumen_bitflags! {
    /// Shader stages a push-constant range or descriptor is visible to.
    pub struct ShaderStageFlags: u32 {
        /// Vertex shaders.
        const VERTEX = 1 << 0;
        /// Fragment shaders.
        const FRAGMENT = 1 << 1;
        /// Compute shaders.
        const COMPUTE = 1 << 2;
        /// Ray-generation shaders.
        const RAYGEN = 1 << 3;
        /// Miss shaders.
        const MISS = 1 << 4;
        /// Closest-hit shaders.
        const CLOSEST_HIT = 1 << 5;
        /// Any-hit shaders.
        const ANY_HIT = 1 << 6;
        /// Intersection shaders.
        const INTERSECTION = 1 << 7;
        /// Callable shaders.
        const CALLABLE = 1 << 8;
        /// Every ray-tracing stage.
        const ALL_RAY_TRACING = 0x1f8;
    }
}

/// A block of push-constant bytes visible to some shader stages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PushConstantRange {
    /// Byte offset of the range in the push-constant block.
    pub offset: u32,
    /// Size of the range in bytes.
    pub size: u32,
    /// Stages that read the range.
    pub stages: ShaderStageFlags,
}

impl PushConstantRange {
    /// Creates a range.
    pub const fn new(offset: u32, size: u32, stages: ShaderStageFlags) -> Self {
        Self {
            offset,
            size,
            stages,
        }
    }
}

/// A compiled pipeline as seen by command recording.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Pipeline {
    /// The device pipeline object.
    pub id: PipelineId,
    /// Where the pipeline binds.
    pub bind_point: PipelineBindPoint,
    /// The pipeline layout.
    pub layout: PipelineLayoutId,
    /// Push-constant ranges declared by the layout, addressed by index.
    pub push_constant_ranges: Vec<PushConstantRange>,
}

impl Pipeline {
    /// Creates a pipeline description without push constants.
    pub fn new(id: PipelineId, bind_point: PipelineBindPoint, layout: PipelineLayoutId) -> Self {
        Self {
            id,
            bind_point,
            layout,
            push_constant_ranges: Vec::new(),
        }
    }

    /// Appends a push-constant range.
    #[must_use]
    pub fn with_push_constant_range(mut self, range: PushConstantRange) -> Self {
        self.push_constant_ranges.push(range);
        self
    }

    /// The push-constant range at `index`.
    ///
    /// # Panics
    /// When `index` is outside `[0, push_constant_ranges.len())`.
    pub fn push_constant_range(&self, index: usize) -> &PushConstantRange {
        let count = self.push_constant_ranges.len();
        self.push_constant_ranges.get(index).unwrap_or_else(|| {
            panic!("Push-constant range index {index} out of range: pipeline {:?} declares {count}", self.id)
        })
    }
}

/// Describes a graphics or compute pipeline to create.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineDescriptor {
    /// Debug label.
    pub label: Option<String>,
    /// Where the pipeline binds.
    pub bind_point: PipelineBindPoint,
    /// Number of descriptor sets in the layout.
    pub descriptor_set_count: u32,
    /// Push-constant ranges of the layout.
    pub push_constant_ranges: Vec<PushConstantRange>,
}

impl PipelineDescriptor {
    /// A pipeline with one descriptor set and no push constants.
    pub fn new(bind_point: PipelineBindPoint) -> Self {
        Self {
            label: None,
            bind_point,
            descriptor_set_count: 1,
            push_constant_ranges: Vec::new(),
        }
    }
}

/// Describes a ray-tracing pipeline and the shape of its shader binding table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RayTracingPipelineDescriptor {
    /// Debug label.
    pub label: Option<String>,
    /// Number of descriptor sets in the layout.
    pub descriptor_set_count: u32,
    /// Push-constant ranges of the layout.
    pub push_constant_ranges: Vec<PushConstantRange>,
    /// Number of miss shaders.
    pub miss_shader_count: u32,
    /// Number of hit groups.
    pub hit_group_count: u32,
    /// Maximum trace recursion depth.
    pub max_recursion_depth: u32,
}

impl Default for RayTracingPipelineDescriptor {
    fn default() -> Self {
        Self {
            label: None,
            descriptor_set_count: 1,
            push_constant_ranges: Vec::new(),
            miss_shader_count: 1,
            hit_group_count: 1,
            max_recursion_depth: 1,
        }
    }
}
