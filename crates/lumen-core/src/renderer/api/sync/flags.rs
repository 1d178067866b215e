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

//! Pipeline stage and memory access masks used by barriers.

crate::lumen_bitflags! {
    /// A set of pipeline stages, the execution scope of a dependency.
    pub struct PipelineStage: u32 {
        /// The start of the pipeline, before any command runs.
        const TOP_OF_PIPE = 1 << 0;
        /// Indirect draw/dispatch argument fetch.
        const DRAW_INDIRECT = 1 << 1;
        /// Vertex and index fetch.
        const VERTEX_INPUT = 1 << 2;
        /// Vertex shading.
        const VERTEX_SHADER = 1 << 3;
        /// Fragment shading.
        const FRAGMENT_SHADER = 1 << 4;
        /// Depth/stencil tests before fragment shading.
        const EARLY_FRAGMENT_TESTS = 1 << 5;
        /// Depth/stencil tests after fragment shading.
        const LATE_FRAGMENT_TESTS = 1 << 6;
        /// Blending and color attachment writes.
        const COLOR_ATTACHMENT_OUTPUT = 1 << 7;
        /// Compute shading.
        const COMPUTE_SHADER = 1 << 8;
        /// Copies, blits and clears.
        const TRANSFER = 1 << 9;
        /// The end of the pipeline, after every command completed.
        const BOTTOM_OF_PIPE = 1 << 10;
        /// Host reads and writes of mapped memory.
        const HOST = 1 << 11;
        /// Ray generation, intersection, hit and miss shading.
        const RAY_TRACING_SHADER = 1 << 12;
        /// Acceleration-structure builds and updates.
        const ACCELERATION_STRUCTURE_BUILD = 1 << 13;
        /// Every graphics stage.
        const ALL_GRAPHICS = (1 << 1) | (1 << 2) | (1 << 3) | (1 << 4) | (1 << 5) | (1 << 6) | (1 << 7);
        /// Every stage of every command.
        const ALL_COMMANDS = 0x3fff;
    }
}

crate::lumen_bitflags! {
    /// A set of memory access types, the memory scope of a dependency.
    pub struct AccessFlags: u32 {
        /// Reads of indirect command arguments.
        const INDIRECT_COMMAND_READ = 1 << 0;
        /// Reads of an index buffer.
        const INDEX_READ = 1 << 1;
        /// Reads of a vertex buffer.
        const VERTEX_ATTRIBUTE_READ = 1 << 2;
        /// Reads of a uniform buffer.
        const UNIFORM_READ = 1 << 3;
        /// Shader reads of storage or sampled resources.
        const SHADER_READ = 1 << 4;
        /// Shader writes of storage resources.
        const SHADER_WRITE = 1 << 5;
        /// Blending and load-op reads of a color attachment.
        const COLOR_ATTACHMENT_READ = 1 << 6;
        /// Writes to a color attachment.
        const COLOR_ATTACHMENT_WRITE = 1 << 7;
        /// Depth/stencil test reads.
        const DEPTH_STENCIL_ATTACHMENT_READ = 1 << 8;
        /// Depth/stencil writes.
        const DEPTH_STENCIL_ATTACHMENT_WRITE = 1 << 9;
        /// Reads by a copy or blit.
        const TRANSFER_READ = 1 << 10;
        /// Writes by a copy, blit or clear.
        const TRANSFER_WRITE = 1 << 11;
        /// Host reads.
        const HOST_READ = 1 << 12;
        /// Host writes.
        const HOST_WRITE = 1 << 13;
        /// Any read.
        const MEMORY_READ = 1 << 14;
        /// Any write.
        const MEMORY_WRITE = 1 << 15;
        /// Reads of an acceleration structure (traversal or build source).
        const ACCELERATION_STRUCTURE_READ = 1 << 16;
        /// Writes of an acceleration structure or its scratch memory.
        const ACCELERATION_STRUCTURE_WRITE = 1 << 17;
    }
}

impl AccessFlags {
    /// Every write access.
    pub const WRITES: Self = Self::SHADER_WRITE
        .union(Self::COLOR_ATTACHMENT_WRITE)
        .union(Self::DEPTH_STENCIL_ATTACHMENT_WRITE)
        .union(Self::TRANSFER_WRITE)
        .union(Self::HOST_WRITE)
        .union(Self::MEMORY_WRITE)
        .union(Self::ACCELERATION_STRUCTURE_WRITE);

    /// `true` when the mask contains at least one write access.
    pub const fn has_writes(&self) -> bool {
        self.intersects(Self::WRITES)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn all_commands_covers_every_named_stage() {
        for stage in [
            PipelineStage::TOP_OF_PIPE,
            PipelineStage::TRANSFER,
            PipelineStage::RAY_TRACING_SHADER,
            PipelineStage::ACCELERATION_STRUCTURE_BUILD,
            PipelineStage::ALL_GRAPHICS,
        ] {
            assert!(PipelineStage::ALL_COMMANDS.contains(stage));
        }
    }

    #[test]
    fn write_detection() {
        assert!(AccessFlags::TRANSFER_WRITE.has_writes());
        assert!((AccessFlags::SHADER_READ | AccessFlags::ACCELERATION_STRUCTURE_WRITE).has_writes());
        assert!(!(AccessFlags::SHADER_READ | AccessFlags::HOST_READ).has_writes());
    }
}
