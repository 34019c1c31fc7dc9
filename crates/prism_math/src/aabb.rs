use crate::{Interval, Ray, Vec3};

/// Axis-aligned bounding box used by the BVH accelerators.
///
/// Represented as one interval per axis.
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct Aabb {
    pub x: Interval,
    pub y: Interval,
    pub z: Interval,
}

/// Minimum extent kept on every axis so flat geometry (a single triangle
/// in a plane) still produces a hittable box.
const MIN_EXTENT: f32 = 0.0001;

impl Aabb {
    /// An empty box (contains nothing).
    pub const EMPTY: Aabb = Aabb {
        x: Interval::EMPTY,
        y: Interval::EMPTY,
        z: Interval::EMPTY,
    };

    /// Build a box spanning two corner points (in any order).
    pub fn from_points(a: Vec3, b: Vec3) -> Self {
        let mut aabb = Self {
            x: Interval::new(a.x.min(b.x), a.x.max(b.x)),
            y: Interval::new(a.y.min(b.y), a.y.max(b.y)),
            z: Interval::new(a.z.min(b.z), a.z.max(b.z)),
        };
        aabb.pad_to_minimums();
        aabb
    }

    /// Smallest box containing both inputs.
    pub fn surrounding(a: &Aabb, b: &Aabb) -> Self {
        Self {
            x: Interval::surrounding(&a.x, &b.x),
            y: Interval::surrounding(&a.y, &b.y),
            z: Interval::surrounding(&a.z, &b.z),
        }
    }

    /// Grow the box to include a point.
    pub fn grow(&mut self, p: Vec3) {
        *self = Aabb::surrounding(self, &Aabb::from_points(p, p));
    }

    pub fn is_empty(&self) -> bool {
        self.x.min > self.x.max || self.y.min > self.y.max || self.z.min > self.z.max
    }

    pub fn min(&self) -> Vec3 {
        Vec3::new(self.x.min, self.y.min, self.z.min)
    }

    pub fn max(&self) -> Vec3 {
        Vec3::new(self.x.max, self.y.max, self.z.max)
    }

    /// Center of the box (used as the BVH split key).
    pub fn centroid(&self) -> Vec3 {
        Vec3::new(
            0.5 * (self.x.min + self.x.max),
            0.5 * (self.y.min + self.y.max),
            0.5 * (self.z.min + self.z.max),
        )
    }

    /// Axis with the largest extent (0=X, 1=Y, 2=Z).
    pub fn longest_axis(&self) -> usize {
        let ex = self.x.size();
        let ey = self.y.size();
        let ez = self.z.size();
        if ex > ey {
            if ex > ez {
                0
            } else {
                2
            }
        } else if ey > ez {
            1
        } else {
            2
        }
    }

    fn axis(&self, n: usize) -> &Interval {
        match n {
            0 => &self.x,
            1 => &self.y,
            _ => &self.z,
        }
    }

    /// Slab-method ray/box intersection test.
    pub fn hit(&self, ray: &Ray, mut ray_t: Interval) -> bool {
        for axis in 0..3 {
            let iv = self.axis(axis);
            let orig = ray.origin[axis];
            let dir = ray.direction[axis];

            let adinv = 1.0 / dir;
            let mut t0 = (iv.min - orig) * adinv;
            let mut t1 = (iv.max - orig) * adinv;
            if adinv < 0.0 {
                std::mem::swap(&mut t0, &mut t1);
            }

            if t0 > ray_t.min {
                ray_t.min = t0;
            }
            if t1 < ray_t.max {
                ray_t.max = t1;
            }
            if ray_t.max <= ray_t.min {
                return false;
            }
        }
        true
    }

    fn pad_to_minimums(&mut self) {
        if self.x.size() < MIN_EXTENT {
            self.x = self.x.expand(MIN_EXTENT);
        }
        if self.y.size() < MIN_EXTENT {
            self.y = self.y.expand(MIN_EXTENT);
        }
        if self.z.size() < MIN_EXTENT {
            self.z = self.z.expand(MIN_EXTENT);
        }
    }
}
