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

//! Small geometric value types shared by the command and resource APIs.

use serde::{Deserialize, Serialize};

/// A two-dimensional signed offset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Offset2d {
    /// Horizontal offset.
    pub x: i32,
    /// Vertical offset.
    pub y: i32,
}

/// A two-dimensional size.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct Extent2d {
    /// Width in texels.
    pub width: u32,
    /// Height in texels.
    pub height: u32,
}

impl Extent2d {
    /// Creates an extent.
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    /// `width * height`.
    pub const fn area(&self) -> u64 {
        self.width as u64 * self.height as u64
    }
}

/// A three-dimensional signed offset, used by blits and image copies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Offset3d {
    /// X offset.
    pub x: i32,
    /// Y offset.
    pub y: i32,
    /// Z offset.
    pub z: i32,
}

impl Offset3d {
    /// Creates an offset.
    pub const fn new(x: i32, y: i32, z: i32) -> Self {
        Self { x, y, z }
    }
}

/// A three-dimensional size.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Extent3d {
    /// Width in texels.
    pub width: u32,
    /// Height in texels.
    pub height: u32,
    /// Depth in texels.
    pub depth: u32,
}

impl Extent3d {
    /// Creates an extent.
    pub const fn new(width: u32, height: u32, depth: u32) -> Self {
        Self {
            width,
            height,
            depth,
        }
    }
}

impl From<Extent2d> for Extent3d {
    fn from(extent: Extent2d) -> Self {
        Self::new(extent.width, extent.height, 1)
    }
}

/// An axis-aligned rectangle in framebuffer coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Rect2d {
    /// Top-left corner.
    pub offset: Offset2d,
    /// Size.
    pub extent: Extent2d,
}

impl Rect2d {
    /// Creates a rectangle from its corner and size.
    pub const fn new(x: i32, y: i32, width: u32, height: u32) -> Self {
        Self {
            offset: Offset2d { x, y },
            extent: Extent2d { width, height },
        }
    }
}

/// The filter used when a blit scales an image.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Filter {
    /// Nearest texel.
    #[default]
    Nearest,
    /// Bilinear interpolation.
    Linear,
}
