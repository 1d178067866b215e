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

//! Parameter types of recorded commands.

use crate::renderer::api::common::{Extent3d, Offset3d, Rect2d};
use crate::renderer::api::resource::{
    FramebufferId, ImageSubresourceLayers, RenderPassId,
};

/// Whether a buffer is submitted directly or executed from a primary buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum CommandBufferLevel {
    /// Submitted to a queue.
    #[default]
    Primary,
    /// Executed from a primary buffer.
    Secondary,
}

crate::lumen_bitflags! {
    /// How a recording will be used, given to `begin`.
    pub struct CommandBufferUsage: u32 {
        /// The recording is submitted once, then the buffer becomes invalid.
        const ONE_TIME_SUBMIT = 1 << 0;
        /// A secondary buffer entirely inside a render pass.
        const RENDER_PASS_CONTINUE = 1 << 1;
        /// The buffer may be pending several times at once.
        const SIMULTANEOUS_USE = 1 << 2;
    }
}

/// What a secondary buffer inherits from the primary buffer executing it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct InheritanceInfo {
    /// The render pass the buffer runs in, for render-pass-continue buffers.
    pub render_pass: Option<RenderPassId>,
    /// The subpass index.
    pub subpass: u32,
    /// The framebuffer, when known.
    pub framebuffer: Option<FramebufferId>,
}

/// How the contents of a subpass are provided.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum SubpassContents {
    /// Recorded directly in the primary buffer.
    #[default]
    Inline,
    /// Provided by secondary buffers.
    SecondaryCommandBuffers,
}

/// Parameters of `begin_render_pass`.
#[derive(Debug, Clone, PartialEq)]
pub struct RenderPassBeginInfo {
    /// The render pass.
    pub render_pass: RenderPassId,
    /// The framebuffer rendered into.
    pub framebuffer: FramebufferId,
    /// Area affected by the pass.
    pub render_area: Rect2d,
    /// Clear values for attachments with a clear load op.
    pub clear_values: Vec<[f32; 4]>,
}

/// The viewport transform.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Viewport {
    /// Left edge.
    pub x: f32,
    /// Top edge.
    pub y: f32,
    /// Width.
    pub width: f32,
    /// Height.
    pub height: f32,
    /// Depth mapped to the near plane.
    pub min_depth: f32,
    /// Depth mapped to the far plane.
    pub max_depth: f32,
}

impl Viewport {
    /// A viewport covering `rect` with the full `[0, 1]` depth range.
    pub fn from_rect(rect: Rect2d) -> Self {
        Self::from_rect_with_depth(rect, 0.0, 1.0)
    }

    /// A viewport covering `rect` with a custom depth range.
    pub fn from_rect_with_depth(rect: Rect2d, min_depth: f32, max_depth: f32) -> Self {
        Self {
            x: rect.offset.x as f32,
            y: rect.offset.y as f32,
            width: rect.extent.width as f32,
            height: rect.extent.height as f32,
            min_depth,
            max_depth,
        }
    }
}

/// A region of a buffer-to-buffer copy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BufferCopy {
    /// Offset in the source.
    pub src_offset: u64,
    /// Offset in the destination.
    pub dst_offset: u64,
    /// Bytes copied.
    pub size: u64,
}

/// A region of an image-to-buffer copy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BufferImageCopy {
    /// Offset of the first texel in the buffer.
    pub buffer_offset: u64,
    /// Texels per buffer row, `0` for tightly packed.
    pub buffer_row_length: u32,
    /// Rows per buffer image, `0` for tightly packed.
    pub buffer_image_height: u32,
    /// The image subresource copied.
    pub image_subresource: ImageSubresourceLayers,
    /// First texel copied.
    pub image_offset: Offset3d,
    /// Texels copied.
    pub image_extent: Extent3d,
}

impl BufferImageCopy {
    /// Copies the whole `extent` of mip 0, layer 0, tightly packed at the buffer start.
    pub fn whole(extent: Extent3d) -> Self {
        Self {
            buffer_offset: 0,
            buffer_row_length: 0,
            buffer_image_height: 0,
            image_subresource: ImageSubresourceLayers::default(),
            image_offset: Offset3d::default(),
            image_extent: extent,
        }
    }
}

/// A region of an image blit. The offsets are opposite corners of a box in each image.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ImageBlit {
    /// Source subresource.
    pub src_subresource: ImageSubresourceLayers,
    /// Source box corners.
    pub src_offsets: [Offset3d; 2],
    /// Destination subresource.
    pub dst_subresource: ImageSubresourceLayers,
    /// Destination box corners.
    pub dst_offsets: [Offset3d; 2],
}

impl ImageBlit {
    /// Blits the whole of mip 0 of a `src` sized image onto the whole of a `dst` sized one.
    pub fn whole(src: Extent3d, dst: Extent3d) -> Self {
        let corner = |e: Extent3d| Offset3d::new(e.width as i32, e.height as i32, e.depth as i32);
        Self {
            src_subresource: ImageSubresourceLayers::default(),
            src_offsets: [Offset3d::default(), corner(src)],
            dst_subresource: ImageSubresourceLayers::default(),
            dst_offsets: [Offset3d::default(), corner(dst)],
        }
    }
}
