//! Scene-graph node types: geometry groups, groups, and transforms.
//!
//! The compiled graph alternates transforms and groups: every group
//! child is either a transform (subtree) or a geometry group (leaf
//! geometry at this level), and every transform wraps exactly one
//! group-like child. World/object space conversion happens only at
//! transform nodes.

use prism_math::{Aabb, Mat4};

use crate::accel::{Accelerator, AccelKind};
use crate::handle::{GeometryGroupHandle, GeometryInstanceHandle, GroupHandle, TransformHandle};

/// A child slot of a [`Group`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GroupChild {
    Transform(TransformHandle),
    GeometryGroup(GeometryGroupHandle),
}

/// The single child of a [`TransformNode`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransformChild {
    Group(GroupHandle),
    GeometryGroup(GeometryGroupHandle),
}

/// Geometry instances under one mesh-tuned accelerator.
#[derive(Debug, Clone)]
pub struct GeometryGroup {
    pub children: Vec<GeometryInstanceHandle>,
    pub accel: Accelerator,
    pub(crate) bounds: Aabb,
    pub(crate) validated: bool,
}

impl GeometryGroup {
    pub(crate) fn new() -> Self {
        Self {
            children: Vec::new(),
            accel: Accelerator::new(AccelKind::Sbvh),
            bounds: Aabb::EMPTY,
            validated: false,
        }
    }

    pub fn bounds(&self) -> Aabb {
        self.bounds
    }
}

/// An aggregate of transforms and geometry groups.
#[derive(Debug, Clone)]
pub struct Group {
    pub children: Vec<GroupChild>,
    pub accel: Accelerator,
    pub(crate) bounds: Aabb,
    pub(crate) validated: bool,
}

impl Group {
    pub(crate) fn new() -> Self {
        Self {
            children: Vec::new(),
            accel: Accelerator::new(AccelKind::Bvh),
            bounds: Aabb::EMPTY,
            validated: false,
        }
    }

    pub fn bounds(&self) -> Aabb {
        self.bounds
    }
}

/// A matrix (with cached inverse) over one child.
#[derive(Debug, Clone)]
pub struct TransformNode {
    pub matrix: Mat4,
    pub inv_matrix: Mat4,
    pub child: Option<TransformChild>,
    /// World-space bounds of the transformed child.
    pub(crate) bounds: Aabb,
    pub(crate) validated: bool,
}

impl TransformNode {
    pub(crate) fn new() -> Self {
        Self {
            matrix: Mat4::IDENTITY,
            inv_matrix: Mat4::IDENTITY,
            child: None,
            bounds: Aabb::EMPTY,
            validated: false,
        }
    }

    /// Set the matrix, computing the inverse unless one is supplied.
    pub fn set_matrix(&mut self, matrix: Mat4, inverse: Option<Mat4>) {
        self.matrix = matrix;
        self.inv_matrix = inverse.unwrap_or_else(|| matrix.inverse());
    }

    pub fn bounds(&self) -> Aabb {
        self.bounds
    }
}
