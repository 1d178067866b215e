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

//! Shader-binding-table layout and record writing.
//!
//! The table is a sequence of equally sized records: the ray-generation record first,
//! then every miss record, then every hit-group record. This order and the stride are the
//! binary contract between the table writer and ray dispatch.

use crate::renderer::error::ResourceError;
use crate::utils::align_up;

/// Identifies one record of the table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ShaderGroup {
    /// The ray-generation record.
    RayGen,
    /// A miss record.
    Miss(u32),
    /// A hit-group record.
    HitGroup(u32),
}

/// Sizes and offsets of a shader binding table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ShaderBindingTableLayout {
    /// Size of an opaque shader-group handle.
    pub handle_size: u32,
    /// Alignment every record must start on.
    pub record_alignment: u32,
    /// Number of miss records.
    pub miss_count: u32,
    /// Number of hit-group records.
    pub hit_group_count: u32,
}

impl ShaderBindingTableLayout {
    /// Creates a layout.
    ///
    /// # Panics
    /// When `record_alignment` is not a power of two or `handle_size` is zero.
    pub fn new(handle_size: u32, record_alignment: u32, miss_count: u32, hit_group_count: u32) -> Self {
        assert!(handle_size > 0, "Shader group handles cannot be empty");
        assert!(
            record_alignment.is_power_of_two(),
            "Record alignment {record_alignment} is not a power of two"
        );
        Self {
            handle_size,
            record_alignment,
            miss_count,
            hit_group_count,
        }
    }

    /// Distance between consecutive records.
    pub fn stride(&self) -> u64 {
        align_up(self.handle_size as u64, self.record_alignment as u64)
    }

    /// Number of records in the table.
    pub fn record_count(&self) -> u64 {
        1 + self.miss_count as u64 + self.hit_group_count as u64
    }

    /// Byte offset of the first hit-group record.
    pub fn hit_group_offset(&self) -> u64 {
        (1 + self.miss_count as u64) * self.stride()
    }

    /// Total size of the table.
    pub fn size(&self) -> u64 {
        self.record_count() * self.stride()
    }

    /// Byte offset of a record.
    ///
    /// # Panics
    /// When the miss or hit-group index is out of range.
    pub fn record_offset(&self, group: ShaderGroup) -> u64 {
        match group {
            ShaderGroup::RayGen => 0,
            ShaderGroup::Miss(index) => {
                assert!(
                    index < self.miss_count,
                    "Miss record {index} out of range ({} declared)",
                    self.miss_count
                );
                (1 + index as u64) * self.stride()
            }
            ShaderGroup::HitGroup(index) => {
                assert!(
                    index < self.hit_group_count,
                    "Hit-group record {index} out of range ({} declared)",
                    self.hit_group_count
                );
                self.hit_group_offset() + index as u64 * self.stride()
            }
        }
    }

    /// Which record starts at `offset`, if any.
    pub fn group_at(&self, offset: u64) -> Option<ShaderGroup> {
        let stride = self.stride();
        if offset % stride != 0 {
            return None;
        }
        let record = offset / stride;
        let misses = self.miss_count as u64;
        match record {
            0 => Some(ShaderGroup::RayGen),
            r if r <= misses => Some(ShaderGroup::Miss((r - 1) as u32)),
            r if r < self.record_count() => Some(ShaderGroup::HitGroup((r - 1 - misses) as u32)),
            _ => None,
        }
    }
}

/// Writes group handles into a table laid out by a [`ShaderBindingTableLayout`].
#[derive(Debug, Clone)]
pub struct ShaderBindingTableBuilder {
    layout: ShaderBindingTableLayout,
    data: Vec<u8>,
    written: Vec<bool>,
}

impl ShaderBindingTableBuilder {
    /// Starts a zero-filled table.
    pub fn new(layout: ShaderBindingTableLayout) -> Self {
        Self {
            layout,
            data: vec![0; layout.size() as usize],
            written: vec![false; layout.record_count() as usize],
        }
    }

    /// The layout being filled.
    pub fn layout(&self) -> &ShaderBindingTableLayout {
        &self.layout
    }

    /// Writes the handle of `group`.
    ///
    /// # Panics
    /// When the handle is not exactly `handle_size` bytes or the group is out of range.
    pub fn write(&mut self, group: ShaderGroup, handle: &[u8]) -> &mut Self {
        assert_eq!(
            handle.len(),
            self.layout.handle_size as usize,
            "Shader group handle for {group:?} has the wrong size"
        );
        let offset = self.layout.record_offset(group);
        let start = offset as usize;
        self.data[start..start + handle.len()].copy_from_slice(handle);
        self.written[(offset / self.layout.stride()) as usize] = true;
        self
    }

    /// Writes the ray-generation handle.
    pub fn raygen(&mut self, handle: &[u8]) -> &mut Self {
        self.write(ShaderGroup::RayGen, handle)
    }

    /// Writes a miss handle.
    pub fn miss(&mut self, index: u32, handle: &[u8]) -> &mut Self {
        self.write(ShaderGroup::Miss(index), handle)
    }

    /// Writes a hit-group handle.
    pub fn hit_group(&mut self, index: u32, handle: &[u8]) -> &mut Self {
        self.write(ShaderGroup::HitGroup(index), handle)
    }

    /// Returns the table bytes once every record has been written.
    pub fn build(&self) -> Result<Vec<u8>, ResourceError> {
        let stride = self.layout.stride();
        if let Some(missing) = self.written.iter().position(|written| !written) {
            let group = self.layout.group_at(missing as u64 * stride);
            return Err(ResourceError::InvalidDescriptor(format!(
                "shader binding table record {group:?} was never written"
            )));
        }
        Ok(self.data.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn records_follow_raygen_miss_hit_order() {
        let layout = ShaderBindingTableLayout::new(32, 64, 2, 3);
        assert_eq!(layout.stride(), 64);
        assert_eq!(layout.record_offset(ShaderGroup::RayGen), 0);
        assert_eq!(layout.record_offset(ShaderGroup::Miss(1)), 128);
        assert_eq!(layout.hit_group_offset(), 192);
        assert_eq!(layout.record_offset(ShaderGroup::HitGroup(2)), 320);
        assert_eq!(layout.size(), 384);
        assert_eq!(layout.group_at(256), Some(ShaderGroup::HitGroup(1)));
        assert_eq!(layout.group_at(100), None);
        assert_eq!(layout.group_at(384), None);
    }

    #[test]
    fn builder_reports_unwritten_records() {
        let layout = ShaderBindingTableLayout::new(4, 4, 1, 1);
        let mut builder = ShaderBindingTableBuilder::new(layout);
        builder.raygen(&[1; 4]).hit_group(0, &[3; 4]);
        assert!(builder.build().is_err());
        builder.miss(0, &[2; 4]);
        assert_eq!(
            builder.build().unwrap(),
            vec![1, 1, 1, 1, 2, 2, 2, 2, 3, 3, 3, 3]
        );
    }

    #[test]
    #[should_panic(expected = "Miss record 1 out of range")]
    fn miss_index_is_bounded() {
        ShaderBindingTableLayout::new(32, 32, 1, 1).record_offset(ShaderGroup::Miss(1));
    }
}
