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

//! The usage state of a buffer or image, and its mapping to barrier scopes.

use crate::renderer::api::sync::{AccessFlags, AccessScope, ImageLayout, PipelineStage};

/// The kind of resource a transition applies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResourceKind {
    /// A buffer; scopes carry no layout.
    Buffer,
    /// An image; scopes carry a layout.
    Image,
}

/// How a resource is being used at a point of the command stream.
///
/// Every recorded operation that reads or writes a resource must be preceded by a
/// transition into the state it requires.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ResourceState {
    /// Contents are undefined. Only valid as the source of a transition.
    #[default]
    Undefined,
    /// Any access from any stage.
    General,
    /// Source of a copy or blit.
    TransferSrc,
    /// Destination of a copy, blit or clear.
    TransferDst,
    /// Read by shaders of any stage.
    ShaderRead,
    /// Written (and read) by shaders as a storage resource.
    ShaderWrite,
    /// Color render target. Images only.
    ColorAttachment,
    /// Writable depth target. Images only.
    DepthAttachment,
    /// Read-only depth, as a target or sampled. Images only.
    DepthRead,
    /// Read and written by an acceleration-structure build (inputs, scratch, result
    /// storage). Buffers only.
    AccelerationStructureBuild,
    /// Traversed by ray-tracing shaders. Buffers only.
    AccelerationStructure,
    /// Read by the host. Buffers only.
    HostRead,
    /// Written by the host. Buffers only.
    HostWrite,
    /// Handed to the presentation engine. Images only.
    Present,
}

impl ResourceState {
    /// Every state, in declaration order.
    pub const ALL: [ResourceState; 14] = [
        ResourceState::Undefined,
        ResourceState::General,
        ResourceState::TransferSrc,
        ResourceState::TransferDst,
        ResourceState::ShaderRead,
        ResourceState::ShaderWrite,
        ResourceState::ColorAttachment,
        ResourceState::DepthAttachment,
        ResourceState::DepthRead,
        ResourceState::AccelerationStructureBuild,
        ResourceState::AccelerationStructure,
        ResourceState::HostRead,
        ResourceState::HostWrite,
        ResourceState::Present,
    ];

    /// The (stages, access, layout) scope of the state for a resource kind, or `None`
    /// when the state has no meaning for that kind. Buffer scopes always use
    /// [`ImageLayout::Undefined`].
    pub fn access_scope(self, kind: ResourceKind) -> Option<AccessScope> {
        use ResourceKind::{Buffer, Image};

        const SHADER_STAGES: PipelineStage = PipelineStage::VERTEX_SHADER
            .union(PipelineStage::FRAGMENT_SHADER)
            .union(PipelineStage::COMPUTE_SHADER)
            .union(PipelineStage::RAY_TRACING_SHADER);

        let (stages, access, layout) = match (self, kind) {
            (ResourceState::Undefined, _) => (
                PipelineStage::TOP_OF_PIPE,
                AccessFlags::EMPTY,
                ImageLayout::Undefined,
            ),
            (ResourceState::General, _) => (
                PipelineStage::ALL_COMMANDS,
                AccessFlags::MEMORY_READ | AccessFlags::MEMORY_WRITE,
                ImageLayout::General,
            ),
            (ResourceState::TransferSrc, _) => (
                PipelineStage::TRANSFER,
                AccessFlags::TRANSFER_READ,
                ImageLayout::TransferSrcOptimal,
            ),
            (ResourceState::TransferDst, _) => (
                PipelineStage::TRANSFER,
                AccessFlags::TRANSFER_WRITE,
                ImageLayout::TransferDstOptimal,
            ),
            (ResourceState::ShaderRead, Buffer) => (
                SHADER_STAGES,
                AccessFlags::SHADER_READ | AccessFlags::UNIFORM_READ,
                ImageLayout::Undefined,
            ),
            (ResourceState::ShaderRead, Image) => (
                SHADER_STAGES,
                AccessFlags::SHADER_READ,
                ImageLayout::ShaderReadOnlyOptimal,
            ),
            (ResourceState::ShaderWrite, _) => (
                SHADER_STAGES,
                AccessFlags::SHADER_READ | AccessFlags::SHADER_WRITE,
                ImageLayout::General,
            ),
            (ResourceState::ColorAttachment, Image) => (
                PipelineStage::COLOR_ATTACHMENT_OUTPUT,
                AccessFlags::COLOR_ATTACHMENT_READ | AccessFlags::COLOR_ATTACHMENT_WRITE,
                ImageLayout::ColorAttachmentOptimal,
            ),
            (ResourceState::DepthAttachment, Image) => (
                PipelineStage::EARLY_FRAGMENT_TESTS | PipelineStage::LATE_FRAGMENT_TESTS,
                AccessFlags::DEPTH_STENCIL_ATTACHMENT_READ
                    | AccessFlags::DEPTH_STENCIL_ATTACHMENT_WRITE,
                ImageLayout::DepthStencilAttachmentOptimal,
            ),
            (ResourceState::DepthRead, Image) => (
                PipelineStage::EARLY_FRAGMENT_TESTS
                    | PipelineStage::LATE_FRAGMENT_TESTS
                    | PipelineStage::FRAGMENT_SHADER,
                AccessFlags::DEPTH_STENCIL_ATTACHMENT_READ | AccessFlags::SHADER_READ,
                ImageLayout::DepthStencilReadOnlyOptimal,
            ),
            (ResourceState::AccelerationStructureBuild, Buffer) => (
                PipelineStage::ACCELERATION_STRUCTURE_BUILD,
                AccessFlags::ACCELERATION_STRUCTURE_READ
                    | AccessFlags::ACCELERATION_STRUCTURE_WRITE,
                ImageLayout::Undefined,
            ),
            (ResourceState::AccelerationStructure, Buffer) => (
                PipelineStage::RAY_TRACING_SHADER,
                AccessFlags::ACCELERATION_STRUCTURE_READ,
                ImageLayout::Undefined,
            ),
            (ResourceState::HostRead, Buffer) => (
                PipelineStage::HOST,
                AccessFlags::HOST_READ,
                ImageLayout::Undefined,
            ),
            (ResourceState::HostWrite, Buffer) => (
                PipelineStage::HOST,
                AccessFlags::HOST_WRITE,
                ImageLayout::Undefined,
            ),
            (ResourceState::Present, Image) => (
                PipelineStage::BOTTOM_OF_PIPE,
                AccessFlags::MEMORY_READ,
                ImageLayout::PresentSrc,
            ),
            (
                ResourceState::ColorAttachment
                | ResourceState::DepthAttachment
                | ResourceState::DepthRead
                | ResourceState::Present,
                Buffer,
            )
            | (
                ResourceState::AccelerationStructureBuild
                | ResourceState::AccelerationStructure
                | ResourceState::HostRead
                | ResourceState::HostWrite,
                Image,
            ) => return None,
        };

        let layout = match kind {
            Buffer => ImageLayout::Undefined,
            Image => layout,
        };
        Some(AccessScope {
            stages,
            access,
            layout,
        })
    }

    /// `true` when the state has a meaning for `kind`.
    pub fn is_valid_for(self, kind: ResourceKind) -> bool {
        self.access_scope(kind).is_some()
    }

    /// The image layout of the state. Panics for states images cannot be in.
    pub fn image_layout(self) -> ImageLayout {
        match self.access_scope(ResourceKind::Image) {
            Some(scope) => scope.layout,
            None => panic!("ResourceState::{self:?} is not a valid image state"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn buffer_scopes_never_carry_a_layout() {
        for state in ResourceState::ALL {
            if let Some(scope) = state.access_scope(ResourceKind::Buffer) {
                assert_eq!(scope.layout, ImageLayout::Undefined, "{state:?}");
            }
        }
    }

    #[test]
    fn attachment_states_are_image_only() {
        assert!(!ResourceState::ColorAttachment.is_valid_for(ResourceKind::Buffer));
        assert!(!ResourceState::Present.is_valid_for(ResourceKind::Buffer));
        assert!(!ResourceState::AccelerationStructure.is_valid_for(ResourceKind::Image));
        assert!(ResourceState::TransferDst.is_valid_for(ResourceKind::Image));
        assert!(ResourceState::TransferDst.is_valid_for(ResourceKind::Buffer));
    }

    #[test]
    fn image_layouts_follow_usage() {
        assert_eq!(
            ResourceState::TransferDst.image_layout(),
            ImageLayout::TransferDstOptimal
        );
        assert_eq!(ResourceState::ShaderWrite.image_layout(), ImageLayout::General);
        assert_eq!(
            ResourceState::ShaderRead.image_layout(),
            ImageLayout::ShaderReadOnlyOptimal
        );
    }

    #[test]
    #[should_panic(expected = "not a valid image state")]
    fn host_state_has_no_image_layout() {
        ResourceState::HostRead.image_layout();
    }
}
