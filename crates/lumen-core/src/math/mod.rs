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

//! The minimal linear algebra needed to describe instances and rays.

pub mod affine;
pub mod vector;

pub use self::affine::Affine3;
pub use self::vector::Vec3;

/// Tolerance used by geometric comparisons.
pub const EPSILON: f32 = 1e-6;

/// Compares two floats with [`EPSILON`] scaled to their magnitude.
#[inline]
pub fn approx_eq(a: f32, b: f32) -> bool {
    (a - b).abs() <= EPSILON * a.abs().max(b.abs()).max(1.0)
}
