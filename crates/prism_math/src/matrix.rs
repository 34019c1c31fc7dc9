// Transform helpers for Mat4.
//
// glam::Mat4 already provides transform_point3() and inverse(); these
// extensions cover direction vectors and bounding boxes.

use crate::Aabb;
use glam::{Mat4, Vec3, Vec4};

/// Extension trait adding ray-tracing transform utilities to Mat4.
pub trait Mat4Ext {
    /// Transform a direction vector (w=0): rotation and scale apply,
    /// translation does not.
    fn transform_vector3(&self, vector: Vec3) -> Vec3;

    /// Transform a bounding box by transforming all 8 corners.
    fn transform_aabb(&self, aabb: &Aabb) -> Aabb;
}

impl Mat4Ext for Mat4 {
    fn transform_vector3(&self, vector: Vec3) -> Vec3 {
        let v = *self * Vec4::new(vector.x, vector.y, vector.z, 0.0);
        Vec3::new(v.x, v.y, v.z)
    }

    fn transform_aabb(&self, aabb: &Aabb) -> Aabb {
        if aabb.is_empty() {
            return Aabb::EMPTY;
        }
        let lo = aabb.min();
        let hi = aabb.max();
        let corners = [
            Vec3::new(lo.x, lo.y, lo.z),
            Vec3::new(hi.x, lo.y, lo.z),
            Vec3::new(lo.x, hi.y, lo.z),
            Vec3::new(hi.x, hi.y, lo.z),
            Vec3::new(lo.x, lo.y, hi.z),
            Vec3::new(hi.x, lo.y, hi.z),
            Vec3::new(lo.x, hi.y, hi.z),
            Vec3::new(hi.x, hi.y, hi.z),
        ];

        let mut out = Aabb::EMPTY;
        for corner in corners {
            out.grow(self.transform_point3(corner));
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_vector_ignores_translation() {
        let m = Mat4::from_translation(Vec3::new(10.0, 20.0, 30.0));
        assert_eq!(m.transform_vector3(Vec3::X), Vec3::X);
    }

    #[test]
    fn test_vector_rotation() {
        use std::f32::consts::PI;
        let m = Mat4::from_rotation_z(PI / 2.0);
        let v = m.transform_vector3(Vec3::X);
        assert!((v - Vec3::Y).length() < 1e-5);
    }

    #[test]
    fn test_aabb_translation() {
        let m = Mat4::from_translation(Vec3::splat(5.0));
        let b = m.transform_aabb(&Aabb::from_points(Vec3::ZERO, Vec3::ONE));
        assert!((b.min() - Vec3::splat(5.0)).length() < 1e-3);
        assert!((b.max() - Vec3::splat(6.0)).length() < 1e-3);
    }

    #[test]
    fn test_inverse_roundtrip() {
        let m = Mat4::from_rotation_y(0.7) * Mat4::from_translation(Vec3::new(1.0, 2.0, 3.0));
        let p = Vec3::new(5.0, -3.0, 2.0);
        let back = m.inverse().transform_point3(m.transform_point3(p));
        assert!((back - p).length() < 1e-4);
    }
}
