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

//! Change notifications from the scene graph.

crate::lumen_bitflags! {
    /// What changed in the scene since the last frame.
    pub struct DirtySet: u32 {
        /// Entities were added, removed, enabled or re-parented.
        const ENTITY = 1 << 0;
        /// A transform changed.
        const TRANSFORM = 1 << 1;
        /// Geometry data changed.
        const GEOMETRY = 1 << 2;
        /// Texture data changed.
        const TEXTURE = 1 << 3;
        /// Material parameters changed.
        const MATERIAL = 1 << 4;
        /// Light parameters changed.
        const LIGHT = 1 << 5;
        /// Camera parameters changed.
        const CAMERA = 1 << 6;
        /// Everything.
        const ALL = 0x00ff_ffff;
    }
}

impl DirtySet {
    /// Changes that require the scene to be re-walked.
    pub const SCENE_UPDATE: Self = Self::ENTITY
        .union(Self::TRANSFORM)
        .union(Self::GEOMETRY)
        .union(Self::MATERIAL)
        .union(Self::LIGHT)
        .union(Self::CAMERA);

    /// Changes that invalidate acceleration structures.
    pub const ACCELERATION_STRUCTURE: Self = Self::ENTITY
        .union(Self::TRANSFORM)
        .union(Self::GEOMETRY);
}
