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

//! Creation descriptors for buffers and images.

use crate::renderer::api::common::Extent2d;
use crate::renderer::error::ResourceError;

crate::lumen_bitflags! {
    /// How a buffer will be used.
    pub struct BufferUsage: u32 {
        /// Source of copies.
        const TRANSFER_SRC = 1 << 0;
        /// Destination of copies.
        const TRANSFER_DST = 1 << 1;
        /// Uniform buffer.
        const UNIFORM = 1 << 2;
        /// Storage buffer.
        const STORAGE = 1 << 3;
        /// Index buffer.
        const INDEX = 1 << 4;
        /// Vertex buffer.
        const VERTEX = 1 << 5;
        /// Holds shader-binding-table records.
        const SHADER_BINDING_TABLE = 1 << 6;
        /// Geometry or instance input of an acceleration-structure build.
        const ACCELERATION_STRUCTURE_INPUT = 1 << 7;
        /// Scratch memory of an acceleration-structure build.
        const SCRATCH = 1 << 8;
    }
}

crate::lumen_bitflags! {
    /// How an image will be used.
    pub struct ImageUsage: u32 {
        /// Source of copies and blits.
        const TRANSFER_SRC = 1 << 0;
        /// Destination of copies, blits and clears.
        const TRANSFER_DST = 1 << 1;
        /// Sampled by shaders.
        const SAMPLED = 1 << 2;
        /// Read and written by shaders as a storage image.
        const STORAGE = 1 << 3;
        /// Color render target.
        const COLOR_ATTACHMENT = 1 << 4;
        /// Depth/stencil render target.
        const DEPTH_STENCIL_ATTACHMENT = 1 << 5;
    }
}

/// Describes a buffer to create.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct BufferDescriptor {
    /// Debug label.
    pub label: Option<String>,
    /// Size in bytes.
    pub size: u64,
    /// Allowed usages.
    pub usage: BufferUsage,
    /// Whether the host can map the buffer.
    pub host_visible: bool,
}

impl BufferDescriptor {
    /// Checks that the buffer can be created.
    pub fn validate(&self) -> Result<(), ResourceError> {
        if self.size == 0 {
            return Err(ResourceError::InvalidDescriptor(format!(
                "buffer {:?} has zero size",
                self.label
            )));
        }
        if self.usage.is_empty() {
            return Err(ResourceError::InvalidDescriptor(format!(
                "buffer {:?} has no usage",
                self.label
            )));
        }
        Ok(())
    }
}

/// The texel format of an image.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ImageFormat {
    /// 8-bit normalized RGBA.
    #[default]
    Rgba8Unorm,
    /// 32-bit float RGBA, used for HDR accumulation.
    Rgba32Float,
    /// 32-bit float depth.
    Depth32Float,
}

impl ImageFormat {
    /// Size of one texel in bytes.
    pub const fn bytes_per_texel(&self) -> u64 {
        match self {
            ImageFormat::Rgba8Unorm => 4,
            ImageFormat::Rgba32Float => 16,
            ImageFormat::Depth32Float => 4,
        }
    }

    /// `true` for depth formats.
    pub const fn is_depth(&self) -> bool {
        matches!(self, ImageFormat::Depth32Float)
    }
}

/// Describes a 2D image (optionally layered and mipmapped) to create.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageDescriptor {
    /// Debug label.
    pub label: Option<String>,
    /// Size of mip level 0.
    pub extent: Extent2d,
    /// Number of mip levels.
    pub mip_levels: u32,
    /// Number of array layers.
    pub array_layers: u32,
    /// Texel format.
    pub format: ImageFormat,
    /// Allowed usages.
    pub usage: ImageUsage,
}

impl Default for ImageDescriptor {
    fn default() -> Self {
        Self {
            label: None,
            extent: Extent2d::new(1, 1),
            mip_levels: 1,
            array_layers: 1,
            format: ImageFormat::Rgba8Unorm,
            usage: ImageUsage::EMPTY,
        }
    }
}

impl ImageDescriptor {
    /// Checks that the image can be created.
    pub fn validate(&self) -> Result<(), ResourceError> {
        if self.extent.width == 0 || self.extent.height == 0 {
            return Err(ResourceError::InvalidDescriptor(format!(
                "image {:?} has an empty extent",
                self.label
            )));
        }
        if self.mip_levels == 0 || self.array_layers == 0 {
            return Err(ResourceError::InvalidDescriptor(format!(
                "image {:?} needs at least one mip level and one layer",
                self.label
            )));
        }
        if self.usage.is_empty() {
            return Err(ResourceError::InvalidDescriptor(format!(
                "image {:?} has no usage",
                self.label
            )));
        }
        Ok(())
    }

    /// The extent of mip level `level`.
    pub fn mip_extent(&self, level: u32) -> Extent2d {
        Extent2d::new(
            (self.extent.width >> level).max(1),
            (self.extent.height >> level).max(1),
        )
    }
}
