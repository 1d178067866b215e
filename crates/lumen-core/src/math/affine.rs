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

//! Row-major 3×4 affine transforms, the layout acceleration-structure instances use.

use serde::{Deserialize, Serialize};
use std::ops::Mul;

use super::Vec3;

/// A 3D affine transformation stored as three rows of four floats.
///
/// The fourth column holds the translation. This is exactly the transform block of a
/// [`GeometryInstance`](crate::renderer::api::acceleration::GeometryInstance), so instances can be
/// filled without any repacking.
#[derive(
    Debug, Copy, Clone, PartialEq, bytemuck::Pod, bytemuck::Zeroable, Serialize, Deserialize,
)]
#[repr(C)]
pub struct Affine3 {
    /// The three rows of the matrix.
    pub rows: [[f32; 4]; 3],
}

impl Default for Affine3 {
    fn default() -> Self {
        Self::IDENTITY
    }
}

impl Affine3 {
    /// The identity transform.
    pub const IDENTITY: Self = Self {
        rows: [
            [1.0, 0.0, 0.0, 0.0],
            [0.0, 1.0, 0.0, 0.0],
            [0.0, 0.0, 1.0, 0.0],
        ],
    };

    /// Creates a pure translation.
    #[inline]
    pub const fn from_translation(t: Vec3) -> Self {
        Self {
            rows: [
                [1.0, 0.0, 0.0, t.x],
                [0.0, 1.0, 0.0, t.y],
                [0.0, 0.0, 1.0, t.z],
            ],
        }
    }

    /// Creates a non-uniform scale.
    #[inline]
    pub const fn from_scale(s: Vec3) -> Self {
        Self {
            rows: [
                [s.x, 0.0, 0.0, 0.0],
                [0.0, s.y, 0.0, 0.0],
                [0.0, 0.0, s.z, 0.0],
            ],
        }
    }

    /// Creates a rotation of `angle` radians around the Y axis.
    pub fn from_rotation_y(angle: f32) -> Self {
        let (s, c) = angle.sin_cos();
        Self {
            rows: [[c, 0.0, s, 0.0], [0.0, 1.0, 0.0, 0.0], [-s, 0.0, c, 0.0]],
        }
    }

    /// The translation part of the transform.
    #[inline]
    pub fn translation(&self) -> Vec3 {
        Vec3::new(self.rows[0][3], self.rows[1][3], self.rows[2][3])
    }

    /// Transforms a point (translation applied).
    #[inline]
    pub fn transform_point(&self, p: Vec3) -> Vec3 {
        let r = &self.rows;
        Vec3::new(
            r[0][0] * p.x + r[0][1] * p.y + r[0][2] * p.z + r[0][3],
            r[1][0] * p.x + r[1][1] * p.y + r[1][2] * p.z + r[1][3],
            r[2][0] * p.x + r[2][1] * p.y + r[2][2] * p.z + r[2][3],
        )
    }

    /// Transforms a direction (translation ignored).
    #[inline]
    pub fn transform_vector(&self, v: Vec3) -> Vec3 {
        let r = &self.rows;
        Vec3::new(
            r[0][0] * v.x + r[0][1] * v.y + r[0][2] * v.z,
            r[1][0] * v.x + r[1][1] * v.y + r[1][2] * v.z,
            r[2][0] * v.x + r[2][1] * v.y + r[2][2] * v.z,
        )
    }

    /// Returns the inverse transform, or `None` when the linear part is singular.
    pub fn inverse(&self) -> Option<Self> {
        let r = &self.rows;
        let (a, b, c) = (r[0][0], r[0][1], r[0][2]);
        let (d, e, f) = (r[1][0], r[1][1], r[1][2]);
        let (g, h, i) = (r[2][0], r[2][1], r[2][2]);

        let det = a * (e * i - f * h) - b * (d * i - f * g) + c * (d * h - e * g);
        if det.abs() < f32::EPSILON {
            return None;
        }
        let inv_det = 1.0 / det;

        let m = [
            [
                (e * i - f * h) * inv_det,
                (c * h - b * i) * inv_det,
                (b * f - c * e) * inv_det,
            ],
            [
                (f * g - d * i) * inv_det,
                (a * i - c * g) * inv_det,
                (c * d - a * f) * inv_det,
            ],
            [
                (d * h - e * g) * inv_det,
                (b * g - a * h) * inv_det,
                (a * e - b * d) * inv_det,
            ],
        ];
        let t = self.translation();
        let mut rows = [[0.0; 4]; 3];
        for (row, src) in rows.iter_mut().zip(m.iter()) {
            row[..3].copy_from_slice(src);
            row[3] = -(src[0] * t.x + src[1] * t.y + src[2] * t.z);
        }
        Some(Self { rows })
    }
}

impl Mul for Affine3 {
    type Output = Self;

    /// Composes two transforms; `(a * b)` applies `b` first.
    fn mul(self, rhs: Self) -> Self {
        let a = &self.rows;
        let b = &rhs.rows;
        let mut rows = [[0.0; 4]; 3];
        for (i, row) in rows.iter_mut().enumerate() {
            for (j, out) in row.iter_mut().enumerate() {
                let mut sum = a[i][0] * b[0][j] + a[i][1] * b[1][j] + a[i][2] * b[2][j];
                if j == 3 {
                    sum += a[i][3];
                }
                *out = sum;
            }
        }
        Self { rows }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vec_approx_eq(a: Vec3, b: Vec3) -> bool {
        (a - b).length() < 1e-4
    }

    #[test]
    fn composition_applies_right_hand_side_first() {
        let scale = Affine3::from_scale(Vec3::new(2.0, 2.0, 2.0));
        let translate = Affine3::from_translation(Vec3::new(1.0, 0.0, 0.0));
        let p = (translate * scale).transform_point(Vec3::ONE);
        assert!(vec_approx_eq(p, Vec3::new(3.0, 2.0, 2.0)));
    }

    #[test]
    fn inverse_round_trips_a_point() {
        let m = Affine3::from_translation(Vec3::new(1.0, -2.0, 5.0))
            * Affine3::from_rotation_y(0.7)
            * Affine3::from_scale(Vec3::new(1.0, 3.0, 0.5));
        let inv = m.inverse().expect("transform is invertible");
        let p = Vec3::new(0.3, 0.2, -4.0);
        assert!(vec_approx_eq(inv.transform_point(m.transform_point(p)), p));
    }

    #[test]
    fn singular_transform_has_no_inverse() {
        assert!(Affine3::from_scale(Vec3::new(1.0, 0.0, 1.0))
            .inverse()
            .is_none());
    }
}
