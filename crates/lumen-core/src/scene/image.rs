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

//! Images the renderer can hand back to the host.

use crate::renderer::api::resource::ImageFormat;

/// Which rendered image to read back.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RenderImageType {
    /// The linear radiance target written by the ray dispatch.
    Hdr,
    /// The 8-bit image blitted from the HDR target.
    Final,
}

/// A tightly packed copy of a rendered image.
#[derive(Debug, Clone, PartialEq)]
pub struct ImageData {
    /// Width in texels.
    pub width: u32,
    /// Height in texels.
    pub height: u32,
    /// Texel format of `data`.
    pub format: ImageFormat,
    /// Row-major texel bytes.
    pub data: Vec<u8>,
}

impl ImageData {
    /// Size of one row in bytes.
    pub fn row_pitch(&self) -> usize {
        self.width as usize * self.format.bytes_per_texel() as usize
    }

    /// The bytes of texel `(x, y)`, or `None` outside the image.
    pub fn texel(&self, x: u32, y: u32) -> Option<&[u8]> {
        if x >= self.width || y >= self.height {
            return None;
        }
        let size = self.format.bytes_per_texel() as usize;
        let start = y as usize * self.row_pitch() + x as usize * size;
        self.data.get(start..start + size)
    }

    /// Texel `(x, y)` of an `Rgba32Float` image.
    pub fn texel_rgba32f(&self, x: u32, y: u32) -> Option<[f32; 4]> {
        if self.format != ImageFormat::Rgba32Float {
            return None;
        }
        let bytes = self.texel(x, y)?;
        let mut out = [0.0f32; 4];
        for (value, chunk) in out.iter_mut().zip(bytes.chunks_exact(4)) {
            *value = f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]);
        }
        Some(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn texel_lookup_respects_bounds() {
        let image = ImageData {
            width: 2,
            height: 1,
            format: ImageFormat::Rgba8Unorm,
            data: vec![1, 2, 3, 4, 5, 6, 7, 8],
        };
        assert_eq!(image.texel(1, 0), Some(&[5, 6, 7, 8][..]));
        assert_eq!(image.texel(2, 0), None);
        assert_eq!(image.texel_rgba32f(0, 0), None);
    }
}
