//! Math types.
//!
//! Only what the bridge needs: points, affine transforms, and the
//! camera-space conversion applied to every published position.

use serde::{Deserialize, Serialize};

/// 3D vector.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Default)]
pub struct Vec3 {
    pub x: f32,
    pub y: f32,
    pub z: f32,
}

impl Vec3 {
    pub const ZERO: Self = Self {
        x: 0.0,
        y: 0.0,
        z: 0.0,
    };

    pub const fn new(x: f32, y: f32, z: f32) -> Self {
        Self { x, y, z }
    }

    pub fn lerp(self, to: Self, t: f32) -> Self {
        let t = t.clamp(0.0, 1.0);
        Self::new(
            self.x + (to.x - self.x) * t,
            self.y + (to.y - self.y) * t,
            self.z + (to.z - self.z) * t,
        )
    }
}

/// 4x4 matrix (column-major, `m[column][row]`).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Mat4 {
    pub m: [[f32; 4]; 4],
}

impl Default for Mat4 {
    fn default() -> Self {
        Self::IDENTITY
    }
}

impl Mat4 {
    pub const IDENTITY: Self = Self {
        m: [
            [1.0, 0.0, 0.0, 0.0],
            [0.0, 1.0, 0.0, 0.0],
            [0.0, 0.0, 1.0, 0.0],
            [0.0, 0.0, 0.0, 1.0],
        ],
    };

    pub fn from_translation(t: Vec3) -> Self {
        let mut out = Self::IDENTITY;
        out.m[3] = [t.x, t.y, t.z, 1.0];
        out
    }

    /// Transforms a point (w = 1). The projective row is ignored.
    pub fn transform_point(&self, p: Vec3) -> Vec3 {
        let m = &self.m;
        Vec3::new(
            m[0][0] * p.x + m[1][0] * p.y + m[2][0] * p.z + m[3][0],
            m[0][1] * p.x + m[1][1] * p.y + m[2][1] * p.z + m[3][1],
            m[0][2] * p.x + m[1][2] * p.y + m[2][2] * p.z + m[3][2],
        )
    }

    /// Inverts an affine transform (rotation/scale/shear + translation).
    ///
    /// Returns `None` when the linear part is singular.
    pub fn inverse_affine(&self) -> Option<Self> {
        let m = &self.m;
        // a[r][c] of the upper-left 3x3 block.
        let a = |r: usize, c: usize| m[c][r];

        let c00 = a(1, 1) * a(2, 2) - a(1, 2) * a(2, 1);
        let c01 = a(1, 2) * a(2, 0) - a(1, 0) * a(2, 2);
        let c02 = a(1, 0) * a(2, 1) - a(1, 1) * a(2, 0);
        let det = a(0, 0) * c00 + a(0, 1) * c01 + a(0, 2) * c02;
        if det == 0.0 || !det.is_finite() {
            return None;
        }
        let inv_det = 1.0 / det;

        // inv[r][c] = cofactor[c][r] / det
        let inv = [
            [
                c00 * inv_det,
                (a(0, 2) * a(2, 1) - a(0, 1) * a(2, 2)) * inv_det,
                (a(0, 1) * a(1, 2) - a(0, 2) * a(1, 1)) * inv_det,
            ],
            [
                c01 * inv_det,
                (a(0, 0) * a(2, 2) - a(0, 2) * a(2, 0)) * inv_det,
                (a(0, 2) * a(1, 0) - a(0, 0) * a(1, 2)) * inv_det,
            ],
            [
                c02 * inv_det,
                (a(0, 1) * a(2, 0) - a(0, 0) * a(2, 1)) * inv_det,
                (a(0, 0) * a(1, 1) - a(0, 1) * a(1, 0)) * inv_det,
            ],
        ];

        let t = [m[3][0], m[3][1], m[3][2]];
        let mut out = Self::IDENTITY;
        for r in 0..3 {
            for c in 0..3 {
                out.m[c][r] = inv[r][c];
            }
            out.m[3][r] = -(inv[r][0] * t[0] + inv[r][1] * t[1] + inv[r][2] * t[2]);
        }
        Some(out)
    }
}

/// World-to-camera transform derived from a camera's world matrix.
///
/// Camera space has +X right, +Y up and +Z pointing forward (the view
/// direction), i.e. the view matrix with its Z axis negated.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CameraView {
    view: Mat4,
}

impl CameraView {
    /// Returns `None` if the camera matrix cannot be inverted.
    pub fn from_camera_world(camera_world: &Mat4) -> Option<Self> {
        camera_world.inverse_affine().map(|view| Self { view })
    }

    pub fn to_camera_space(&self, location: Vec3) -> Vec3 {
        let mut loc = self.view.transform_point(location);
        loc.z = -loc.z;
        loc
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn approx(a: Vec3, b: Vec3) -> bool {
        (a.x - b.x).abs() < 1e-5 && (a.y - b.y).abs() < 1e-5 && (a.z - b.z).abs() < 1e-5
    }

    #[test]
    fn vec3_lerp_midpoint() {
        let a = Vec3::new(0.0, 0.0, 0.0);
        let b = Vec3::new(2.0, 4.0, 6.0);
        let mid = a.lerp(b, 0.5);
        assert_eq!(mid, Vec3::new(1.0, 2.0, 3.0));
    }

    #[test]
    fn inverse_undoes_translation() {
        let m = Mat4::from_translation(Vec3::new(1.0, -2.0, 3.0));
        let inv = m.inverse_affine().unwrap();
        let p = Vec3::new(4.0, 5.0, 6.0);
        assert!(approx(inv.transform_point(m.transform_point(p)), p));
    }

    #[test]
    fn inverse_undoes_rotation_and_scale() {
        // 90 degrees about Z, scaled by 2, then translated.
        let m = Mat4 {
            m: [
                [0.0, 2.0, 0.0, 0.0],
                [-2.0, 0.0, 0.0, 0.0],
                [0.0, 0.0, 2.0, 0.0],
                [5.0, 0.0, -1.0, 1.0],
            ],
        };
        let inv = m.inverse_affine().unwrap();
        let p = Vec3::new(1.5, -0.5, 2.0);
        assert!(approx(inv.transform_point(m.transform_point(p)), p));
    }

    #[test]
    fn singular_matrix_has_no_inverse() {
        let m = Mat4 { m: [[0.0; 4]; 4] };
        assert!(m.inverse_affine().is_none());
    }

    #[test]
    fn camera_space_points_forward() {
        // Camera at z = 10 looking down -Z (identity rotation).
        let cam = Mat4::from_translation(Vec3::new(0.0, 0.0, 10.0));
        let view = CameraView::from_camera_world(&cam).unwrap();
        let loc = view.to_camera_space(Vec3::new(1.0, 2.0, 0.0));
        assert!(approx(loc, Vec3::new(1.0, 2.0, 10.0)));
    }
}
