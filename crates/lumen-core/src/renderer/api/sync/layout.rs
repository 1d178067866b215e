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

//! Image layouts.

/// The memory layout an image is in, which restricts how the device may access it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ImageLayout {
    /// Contents are undefined; only valid as the source of a transition.
    #[default]
    Undefined,
    /// Supports every access, possibly at reduced performance.
    General,
    /// Optimal as a color render target.
    ColorAttachmentOptimal,
    /// Optimal as a writable depth/stencil target.
    DepthStencilAttachmentOptimal,
    /// Optimal as a read-only depth/stencil target or sampled depth.
    DepthStencilReadOnlyOptimal,
    /// Optimal for sampled or input-attachment reads.
    ShaderReadOnlyOptimal,
    /// Optimal as a copy/blit source.
    TransferSrcOptimal,
    /// Optimal as a copy/blit/clear destination.
    TransferDstOptimal,
    /// Ready for presentation.
    PresentSrc,
}
