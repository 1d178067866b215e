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

//! Ray-tracing pipelines and the dispatch regions derived from them.

use std::ops::Deref;

use super::{Pipeline, PipelineBindPoint, ShaderBindingTableLayout};
use crate::renderer::api::resource::BufferId;

/// A ray-tracing pipeline together with its shader binding table.
///
/// Dereferences to the underlying [`Pipeline`], so it can be bound and used for push
/// constants like any other pipeline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RayTracingPipeline {
    /// The pipeline itself.
    pub pipeline: Pipeline,
    /// The buffer holding the shader binding table.
    pub shader_binding_table: BufferId,
    /// Distance between consecutive records.
    pub shader_binding_table_stride: u64,
    /// Offset of the first hit-group record.
    pub hit_group_offset: u64,
    /// Number of miss records.
    pub miss_count: u32,
    /// Number of hit-group records.
    pub hit_group_count: u32,
}

impl RayTracingPipeline {
    /// Assembles a ray-tracing pipeline from a pipeline and the layout of its table.
    pub fn new(
        pipeline: Pipeline,
        shader_binding_table: BufferId,
        layout: &ShaderBindingTableLayout,
    ) -> Self {
        Self {
            pipeline,
            shader_binding_table,
            shader_binding_table_stride: layout.stride(),
            hit_group_offset: layout.hit_group_offset(),
            miss_count: layout.miss_count,
            hit_group_count: layout.hit_group_count,
        }
    }

    /// The regions a dispatch with the given miss and hit-group indices reads.
    ///
    /// Ray generation is at offset 0, miss shader `i` at `(1 + i) * stride` and hit group
    /// `j` at `hit_group_offset + j * stride`.
    pub fn regions(&self, miss_index: u32, hit_index: u32) -> TraceRaysRegions {
        let stride = self.shader_binding_table_stride;
        let buffer = self.shader_binding_table;
        TraceRaysRegions {
            raygen: ShaderBindingRegion {
                buffer,
                offset: 0,
                stride,
            },
            miss: ShaderBindingRegion {
                buffer,
                offset: (1 + miss_index as u64) * stride,
                stride,
            },
            hit: ShaderBindingRegion {
                buffer,
                offset: self.hit_group_offset + hit_index as u64 * stride,
                stride,
            },
            callable: None,
        }
    }

    /// `true` when the wrapped pipeline binds to the ray-tracing bind point.
    pub fn is_ray_tracing(&self) -> bool {
        self.pipeline.bind_point == PipelineBindPoint::RayTracing
    }
}

impl Deref for RayTracingPipeline {
    type Target = Pipeline;

    fn deref(&self) -> &Pipeline {
        &self.pipeline
    }
}

impl AsRef<Pipeline> for RayTracingPipeline {
    fn as_ref(&self) -> &Pipeline {
        &self.pipeline
    }
}

/// A strided region of a shader binding table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ShaderBindingRegion {
    /// The table buffer.
    pub buffer: BufferId,
    /// First record of the region.
    pub offset: u64,
    /// Distance between records.
    pub stride: u64,
}

/// The table regions consumed by one ray dispatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TraceRaysRegions {
    /// Ray-generation record.
    pub raygen: ShaderBindingRegion,
    /// First miss record used.
    pub miss: ShaderBindingRegion,
    /// First hit-group record used.
    pub hit: ShaderBindingRegion,
    /// Callable records; unused.
    pub callable: Option<ShaderBindingRegion>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::renderer::api::resource::{PipelineId, PipelineLayoutId};

    #[test]
    fn regions_use_the_table_stride() {
        let layout = ShaderBindingTableLayout::new(32, 64, 3, 4);
        let pipeline = Pipeline::new(
            PipelineId::new(0, 1),
            PipelineBindPoint::RayTracing,
            PipelineLayoutId::new(0, 1),
        );
        let rt = RayTracingPipeline::new(pipeline, BufferId::new(5, 1), &layout);
        let regions = rt.regions(2, 3);
        assert_eq!(regions.raygen.offset, 0);
        assert_eq!(regions.miss.offset, 3 * 64);
        assert_eq!(regions.hit.offset, 4 * 64 + 3 * 64);
        assert_eq!(regions.hit.stride, 64);
        assert!(rt.is_ray_tracing());
    }
}
