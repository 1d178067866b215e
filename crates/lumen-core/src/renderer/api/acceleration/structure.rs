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

//! Acceleration-structure build descriptions.

use crate::renderer::api::resource::{AccelerationStructureId, BufferId};
use crate::renderer::error::ResourceError;
use crate::utils::align_up;

/// The level of an acceleration structure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AccelerationStructureKind {
    /// Holds instances of bottom-level structures.
    TopLevel,
    /// Holds geometry.
    BottomLevel,
}

crate::lumen_bitflags! {
    /// Options of an acceleration-structure build.
    pub struct BuildFlags: u32 {
        /// The structure may later be updated in place.
        const ALLOW_UPDATE = 1 << 0;
        /// The structure may be compacted.
        const ALLOW_COMPACTION = 1 << 1;
        /// Favour traversal speed.
        const PREFER_FAST_TRACE = 1 << 2;
        /// Favour build speed.
        const PREFER_FAST_BUILD = 1 << 3;
        /// Favour a small memory footprint.
        const LOW_MEMORY = 1 << 4;
    }
}

crate::lumen_bitflags! {
    /// Per-geometry options.
    pub struct GeometryFlags: u32 {
        /// Any-hit shaders are never invoked for this geometry.
        const OPAQUE = 1 << 0;
        /// Any-hit shaders run at most once per primitive.
        const NO_DUPLICATE_ANY_HIT_INVOCATION = 1 << 1;
    }
}

/// Triangle geometry read from vertex (and optional index) buffers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TriangleGeometry {
    /// Buffer with `vec3` positions.
    pub vertex_buffer: BufferId,
    /// Offset of the first vertex.
    pub vertex_offset: u64,
    /// Number of vertices.
    pub vertex_count: u32,
    /// Distance between vertices.
    pub vertex_stride: u64,
    /// Optional `u32` index buffer and its offset.
    pub index_buffer: Option<(BufferId, u64)>,
    /// Number of indices (ignored without an index buffer).
    pub index_count: u32,
}

/// Procedural geometry: a buffer of axis-aligned boxes (`[min; 3], [max; 3]` floats).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct AabbGeometry {
    /// Buffer holding the boxes.
    pub buffer: BufferId,
    /// Offset of the first box.
    pub offset: u64,
    /// Number of boxes.
    pub count: u32,
    /// Distance between boxes.
    pub stride: u64,
}

/// A geometry of a bottom-level structure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GeometryDesc {
    /// Triangles.
    Triangles {
        /// The triangle data.
        triangles: TriangleGeometry,
        /// Options.
        flags: GeometryFlags,
    },
    /// Axis-aligned boxes.
    Aabbs {
        /// The box data.
        aabbs: AabbGeometry,
        /// Options.
        flags: GeometryFlags,
    },
}

impl GeometryDesc {
    /// Number of primitives (triangles or boxes).
    pub fn primitive_count(&self) -> u32 {
        match self {
            GeometryDesc::Triangles { triangles, .. } => match triangles.index_buffer {
                Some(_) => triangles.index_count / 3,
                None => triangles.vertex_count / 3,
            },
            GeometryDesc::Aabbs { aabbs, .. } => aabbs.count,
        }
    }

    /// Buffers read by a build of this geometry.
    pub fn buffers(&self) -> impl Iterator<Item = BufferId> {
        let (first, second) = match self {
            GeometryDesc::Triangles { triangles, .. } => (
                triangles.vertex_buffer,
                triangles.index_buffer.map(|(buffer, _)| buffer),
            ),
            GeometryDesc::Aabbs { aabbs, .. } => (aabbs.buffer, None),
        };
        std::iter::once(first).chain(second)
    }
}

/// Memory needed by an acceleration structure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct AccelerationStructureSizes {
    /// Size of the structure itself.
    pub storage_size: u64,
    /// Scratch needed by a full build.
    pub build_scratch_size: u64,
    /// Scratch needed by an update.
    pub update_scratch_size: u64,
}

const NODE_SIZE: u64 = 64;
const HEADER_SIZE: u64 = 256;
const SIZE_ALIGNMENT: u64 = 256;

/// Everything a build needs to know about a structure apart from the buffers it writes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccelerationStructureInfo {
    /// Top- or bottom-level.
    pub kind: AccelerationStructureKind,
    /// Build options.
    pub flags: BuildFlags,
    /// Geometries of a bottom-level structure; empty for top-level ones.
    pub geometries: Vec<GeometryDesc>,
    /// Number of instances of a top-level structure; zero for bottom-level ones.
    pub instance_count: u32,
}

impl AccelerationStructureInfo {
    /// A top-level structure over `instance_count` instances.
    pub fn top_level(instance_count: u32, flags: BuildFlags) -> Self {
        Self {
            kind: AccelerationStructureKind::TopLevel,
            flags,
            geometries: Vec::new(),
            instance_count,
        }
    }

    /// A bottom-level structure over `geometries`.
    pub fn bottom_level(geometries: Vec<GeometryDesc>, flags: BuildFlags) -> Self {
        Self {
            kind: AccelerationStructureKind::BottomLevel,
            flags,
            geometries,
            instance_count: 0,
        }
    }

    /// Checks that the description is consistent with its kind.
    pub fn validate(&self) -> Result<(), ResourceError> {
        match self.kind {
            AccelerationStructureKind::TopLevel if !self.geometries.is_empty() => Err(
                ResourceError::InvalidDescriptor("top-level structures hold instances, not geometries".into()),
            ),
            AccelerationStructureKind::BottomLevel if self.instance_count != 0 => Err(
                ResourceError::InvalidDescriptor("bottom-level structures hold geometries, not instances".into()),
            ),
            AccelerationStructureKind::BottomLevel if self.geometries.is_empty() => Err(
                ResourceError::InvalidDescriptor("bottom-level structure without geometry".into()),
            ),
            _ => Ok(()),
        }
    }

    /// Primitives (bottom level) or instances (top level) in the structure.
    pub fn primitive_count(&self) -> u64 {
        match self.kind {
            AccelerationStructureKind::TopLevel => self.instance_count as u64,
            AccelerationStructureKind::BottomLevel => self
                .geometries
                .iter()
                .map(|g| g.primitive_count() as u64)
                .sum(),
        }
    }

    /// Estimates the memory a structure with this description needs.
    ///
    /// The estimate assumes a binary tree with one node per leaf and per inner node.
    pub fn estimate_sizes(&self) -> AccelerationStructureSizes {
        let leaves = self.primitive_count().max(1);
        let nodes = 2 * leaves - 1;
        let storage_size = align_up(HEADER_SIZE + nodes * NODE_SIZE, SIZE_ALIGNMENT);
        let build_scratch_size = align_up(leaves * NODE_SIZE * 2, SIZE_ALIGNMENT);
        let update_scratch_size = if self.flags.contains(BuildFlags::ALLOW_UPDATE) {
            align_up(leaves * NODE_SIZE / 2, SIZE_ALIGNMENT).max(SIZE_ALIGNMENT)
        } else {
            0
        };
        AccelerationStructureSizes {
            storage_size,
            build_scratch_size,
            update_scratch_size,
        }
    }
}

/// Whether a build creates a structure from scratch or refits an existing one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum BuildMode {
    /// Full build.
    #[default]
    Build,
    /// In-place or copy-on-update refit of `source`, which must have been built with
    /// [`BuildFlags::ALLOW_UPDATE`].
    Update {
        /// The previously built structure.
        source: AccelerationStructureId,
    },
}

impl BuildMode {
    /// An update when a source structure is given, a full build otherwise.
    pub fn from_source(source: Option<AccelerationStructureId>) -> Self {
        match source {
            Some(source) => BuildMode::Update { source },
            None => BuildMode::Build,
        }
    }

    /// `true` for [`BuildMode::Update`].
    pub fn is_update(&self) -> bool {
        matches!(self, BuildMode::Update { .. })
    }

    /// The source structure of an update.
    pub fn source(&self) -> Option<AccelerationStructureId> {
        match self {
            BuildMode::Build => None,
            BuildMode::Update { source } => Some(*source),
        }
    }
}
