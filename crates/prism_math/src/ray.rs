use crate::Vec3;

/// A ray with origin and direction.
///
/// The direction is deliberately NOT required to be unit length: the
/// traversal code transforms rays between coordinate spaces without
/// renormalizing so that the hit parameter `t` stays comparable across
/// spaces.
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct Ray {
    pub origin: Vec3,
    pub direction: Vec3,
}

impl Ray {
    pub fn new(origin: Vec3, direction: Vec3) -> Self {
        Self { origin, direction }
    }

    /// Point along the ray at parameter t: origin + t * direction.
    #[inline]
    pub fn at(&self, t: f32) -> Vec3 {
        self.origin + self.direction * t
    }
}
