// Re-export glam for convenience
pub use glam::*;

mod aabb;
mod interval;
mod matrix;
mod ray;

pub use aabb::Aabb;
pub use interval::Interval;
pub use matrix::Mat4Ext;
pub use ray::Ray;
