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

//! The instance record read by top-level builds.

use crate::math::Affine3;
use crate::renderer::api::resource::AccelerationStructureId;

crate::lumen_bitflags! {
    /// Per-instance options.
    pub struct InstanceFlags: u8 {
        /// Disables face culling.
        const TRIANGLE_CULL_DISABLE = 1 << 0;
        /// Counter-clockwise triangles are front facing.
        const TRIANGLE_FRONT_COUNTERCLOCKWISE = 1 << 1;
        /// Treats every geometry as opaque.
        const FORCE_OPAQUE = 1 << 2;
        /// Treats every geometry as non-opaque.
        const FORCE_NO_OPAQUE = 1 << 3;
    }
}

/// One instance of a bottom-level structure inside a top-level one.
///
/// This is the 64-byte record devices read from the instance buffer: a row-major 3×4
/// transform, a 24-bit custom index with an 8-bit visibility mask, a 24-bit hit-group
/// offset with 8 bits of [`InstanceFlags`], and the device reference of the bottom-level
/// structure.
#[derive(Debug, Clone, Copy, PartialEq, bytemuck::Pod, bytemuck::Zeroable)]
#[repr(C)]
pub struct GeometryInstance {
    /// Object-to-world transform.
    pub transform: Affine3,
    custom_index_and_mask: u32,
    hit_group_offset_and_flags: u32,
    /// Device reference of the instanced bottom-level structure.
    pub acceleration_structure_reference: u64,
}

const LOW_24: u32 = 0x00ff_ffff;

impl GeometryInstance {
    /// Creates an instance visible to every ray mask.
    ///
    /// # Panics
    /// When `custom_index` or `hit_group_offset` does not fit in 24 bits.
    pub fn new(
        transform: Affine3,
        custom_index: u32,
        hit_group_offset: u32,
        blas: AccelerationStructureId,
    ) -> Self {
        let mut instance = Self {
            transform,
            custom_index_and_mask: 0,
            hit_group_offset_and_flags: 0,
            acceleration_structure_reference: acceleration_structure_reference(blas),
        };
        instance.set_custom_index(custom_index);
        instance.set_mask(0xff);
        instance.set_hit_group_offset(hit_group_offset);
        instance
    }

    /// The 24-bit custom index.
    pub fn custom_index(&self) -> u32 {
        self.custom_index_and_mask & LOW_24
    }

    /// Sets the 24-bit custom index.
    pub fn set_custom_index(&mut self, index: u32) {
        assert!(index <= LOW_24, "Instance custom index {index} exceeds 24 bits");
        self.custom_index_and_mask = (self.custom_index_and_mask & !LOW_24) | index;
    }

    /// The 8-bit visibility mask.
    pub fn mask(&self) -> u8 {
        (self.custom_index_and_mask >> 24) as u8
    }

    /// Sets the 8-bit visibility mask.
    pub fn set_mask(&mut self, mask: u8) {
        self.custom_index_and_mask = (self.custom_index_and_mask & LOW_24) | ((mask as u32) << 24);
    }

    /// The 24-bit hit-group offset.
    pub fn hit_group_offset(&self) -> u32 {
        self.hit_group_offset_and_flags & LOW_24
    }

    /// Sets the 24-bit hit-group offset.
    pub fn set_hit_group_offset(&mut self, offset: u32) {
        assert!(offset <= LOW_24, "Instance hit-group offset {offset} exceeds 24 bits");
        self.hit_group_offset_and_flags = (self.hit_group_offset_and_flags & !LOW_24) | offset;
    }

    /// The instance flags.
    pub fn flags(&self) -> InstanceFlags {
        InstanceFlags::from_bits_retain((self.hit_group_offset_and_flags >> 24) as u8)
    }

    /// Sets the instance flags.
    pub fn set_flags(&mut self, flags: InstanceFlags) {
        self.hit_group_offset_and_flags =
            (self.hit_group_offset_and_flags & LOW_24) | ((flags.bits() as u32) << 24);
    }

    /// The instanced structure, decoded from its device reference.
    pub fn acceleration_structure(&self) -> AccelerationStructureId {
        let reference = self.acceleration_structure_reference;
        AccelerationStructureId::new((reference >> 32) as u32, reference as u32)
    }
}

/// The device reference stored in instance records for `id`.
pub fn acceleration_structure_reference(id: AccelerationStructureId) -> u64 {
    ((id.index() as u64) << 32) | id.generation() as u64
}
