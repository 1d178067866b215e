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

//! Byte ranges of buffers and subresource ranges of images.

crate::lumen_bitflags! {
    /// The aspects (planes) of an image.
    pub struct ImageAspect: u8 {
        /// Color data.
        const COLOR = 1 << 0;
        /// Depth data.
        const DEPTH = 1 << 1;
        /// Stencil data.
        const STENCIL = 1 << 2;
    }
}

/// A byte range of a buffer. The default covers the whole buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct BufferRange {
    /// First byte of the range.
    pub offset: u64,
    /// Length of the range, `None` for "up to the end of the buffer".
    pub size: Option<u64>,
}

impl BufferRange {
    /// The whole buffer.
    pub const WHOLE: Self = Self {
        offset: 0,
        size: None,
    };

    /// `size` bytes starting at `offset`.
    pub const fn new(offset: u64, size: u64) -> Self {
        Self {
            offset,
            size: Some(size),
        }
    }

    /// Resolves the range against a buffer of `capacity` bytes into `(offset, len)`.
    /// Returns `None` when the range does not fit.
    pub fn resolve(&self, capacity: u64) -> Option<(u64, u64)> {
        let len = match self.size {
            Some(size) => size,
            None => capacity.checked_sub(self.offset)?,
        };
        let end = self.offset.checked_add(len)?;
        (end <= capacity).then_some((self.offset, len))
    }
}

/// A set of mip levels and array layers of one or more image aspects.
///
/// The default is the whole color image: every mip level and every layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ImageSubresourceRange {
    /// The aspects included in the range.
    pub aspect: ImageAspect,
    /// First mip level.
    pub base_mip_level: u32,
    /// Number of mip levels, `None` for "all remaining".
    pub level_count: Option<u32>,
    /// First array layer.
    pub base_array_layer: u32,
    /// Number of array layers, `None` for "all remaining".
    pub layer_count: Option<u32>,
}

impl Default for ImageSubresourceRange {
    fn default() -> Self {
        Self::WHOLE_COLOR
    }
}

impl ImageSubresourceRange {
    /// Every mip level and layer of a color image.
    pub const WHOLE_COLOR: Self = Self::whole(ImageAspect::COLOR);

    /// Every mip level and layer of the given aspects.
    pub const fn whole(aspect: ImageAspect) -> Self {
        Self {
            aspect,
            base_mip_level: 0,
            level_count: None,
            base_array_layer: 0,
            layer_count: None,
        }
    }

    /// A single mip level of a single layer.
    pub const fn single(aspect: ImageAspect, mip_level: u32, array_layer: u32) -> Self {
        Self {
            aspect,
            base_mip_level: mip_level,
            level_count: Some(1),
            base_array_layer: array_layer,
            layer_count: Some(1),
        }
    }

    /// The array layers `[first, end)` covered in an image with `layers` layers.
    pub fn layers(&self, layers: u32) -> std::ops::Range<u32> {
        let end = match self.layer_count {
            Some(count) => self.base_array_layer.saturating_add(count),
            None => layers,
        };
        self.base_array_layer.min(layers)..end.min(layers)
    }

    /// The mip levels `[first, end)` covered in an image with `levels` levels.
    pub fn levels(&self, levels: u32) -> std::ops::Range<u32> {
        let end = match self.level_count {
            Some(count) => self.base_mip_level.saturating_add(count),
            None => levels,
        };
        self.base_mip_level.min(levels)..end.min(levels)
    }
}

/// The layers of a single mip level, as addressed by copies and blits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ImageSubresourceLayers {
    /// The aspect copied.
    pub aspect: ImageAspect,
    /// The mip level.
    pub mip_level: u32,
    /// First array layer.
    pub base_array_layer: u32,
    /// Number of layers.
    pub layer_count: u32,
}

impl Default for ImageSubresourceLayers {
    fn default() -> Self {
        Self {
            aspect: ImageAspect::COLOR,
            mip_level: 0,
            base_array_layer: 0,
            layer_count: 1,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn whole_buffer_range_resolves_to_capacity() {
        assert_eq!(BufferRange::WHOLE.resolve(256), Some((0, 256)));
        assert_eq!(
            BufferRange {
                offset: 64,
                size: None
            }
            .resolve(256),
            Some((64, 192))
        );
    }

    #[test]
    fn out_of_bounds_buffer_range_is_rejected() {
        assert_eq!(BufferRange::new(200, 100).resolve(256), None);
        assert_eq!(
            BufferRange {
                offset: 300,
                size: None
            }
            .resolve(256),
            None
        );
    }

    #[test]
    fn default_image_range_covers_everything() {
        let range = ImageSubresourceRange::default();
        assert_eq!(range.layers(6), 0..6);
        assert_eq!(range.levels(4), 0..4);
        let single = ImageSubresourceRange::single(ImageAspect::COLOR, 2, 3);
        assert_eq!(single.layers(6), 3..4);
        assert_eq!(single.levels(4), 2..3);
    }
}
