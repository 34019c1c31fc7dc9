//! Bounding volume hierarchies over handle-indexed children.
//!
//! One BVH type serves both levels of the scene: per-geometry triangle
//! hierarchies and per-group child hierarchies. Items are (id, box)
//! pairs; the traversal calls back with candidate ids and lets the
//! caller run the actual intersection, shrinking the active interval
//! as closer hits come in.

use prism_math::{Aabb, Interval, Ray};

/// Acceleration structure flavor requested on a group.
///
/// `Sbvh` is the mesh-tuned builder used under geometry groups, `Bvh`
/// the general aggregate builder. Both currently share the median-split
/// builder; the distinction is kept because the scene compiler assigns
/// them deliberately. `NoAccel` skips the hierarchy and tests children
/// linearly (used for trivial wrappers like the root group).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccelKind {
    NoAccel,
    Bvh,
    Sbvh,
}

/// Max items per leaf before a node is split.
const LEAF_MAX: usize = 4;

#[derive(Debug, Clone)]
enum BvhNodeKind {
    Leaf { first: u32, count: u32 },
    Branch { left: u32, right: u32 },
}

#[derive(Debug, Clone)]
struct BvhNode {
    bbox: Aabb,
    kind: BvhNodeKind,
}

/// Outcome of visiting one candidate item.
pub enum Visit {
    /// No intersection in the active interval.
    Miss,
    /// Intersection at t; the interval max shrinks to it.
    Hit(f32),
    /// Stop the whole traversal (any-hit termination).
    Terminate,
}

/// Outcome of a full traversal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Sweep {
    Miss,
    Hit,
    Terminated,
}

/// A flattened median-split BVH.
///
/// Built once at validation time; splits on the longest axis of the
/// centroid bounds.
#[derive(Debug, Clone)]
pub struct Bvh {
    nodes: Vec<BvhNode>,
    items: Vec<u32>,
}

impl Bvh {
    pub fn build(items: &[(u32, Aabb)]) -> Self {
        let mut bvh = Bvh {
            nodes: Vec::new(),
            items: Vec::with_capacity(items.len()),
        };
        if !items.is_empty() {
            let mut working: Vec<(u32, Aabb)> = items.to_vec();
            bvh.build_node(&mut working);
        }
        bvh
    }

    pub fn bounds(&self) -> Aabb {
        self.nodes.first().map(|n| n.bbox).unwrap_or(Aabb::EMPTY)
    }

    fn build_node(&mut self, items: &mut [(u32, Aabb)]) -> u32 {
        let mut bbox = Aabb::EMPTY;
        let mut centroids = Aabb::EMPTY;
        for (_, b) in items.iter() {
            bbox = Aabb::surrounding(&bbox, b);
            centroids.grow(b.centroid());
        }

        let index = self.nodes.len() as u32;
        if items.len() <= LEAF_MAX {
            let first = self.items.len() as u32;
            self.items.extend(items.iter().map(|(id, _)| *id));
            self.nodes.push(BvhNode {
                bbox,
                kind: BvhNodeKind::Leaf {
                    first,
                    count: items.len() as u32,
                },
            });
            return index;
        }

        // Split at the median along the widest centroid axis.
        let axis = centroids.longest_axis();
        items.sort_by(|a, b| {
            a.1.centroid()[axis]
                .partial_cmp(&b.1.centroid()[axis])
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        let mid = items.len() / 2;

        // Reserve the branch slot before recursing so children land after it.
        self.nodes.push(BvhNode {
            bbox,
            kind: BvhNodeKind::Branch { left: 0, right: 0 },
        });
        let (lo, hi) = items.split_at_mut(mid);
        let left = self.build_node(lo);
        let right = self.build_node(hi);
        self.nodes[index as usize].kind = BvhNodeKind::Branch { left, right };
        index
    }

    /// Walk the hierarchy, calling `visit` for every candidate whose box
    /// overlaps the active interval.
    pub fn traverse<F>(&self, ray: &Ray, mut ray_t: Interval, visit: &mut F) -> Sweep
    where
        F: FnMut(u32, Interval) -> Visit,
    {
        if self.nodes.is_empty() {
            return Sweep::Miss;
        }
        let mut hit_any = false;
        let mut stack: Vec<u32> = vec![0];
        while let Some(i) = stack.pop() {
            let node = &self.nodes[i as usize];
            if !node.bbox.hit(ray, ray_t) {
                continue;
            }
            match node.kind {
                BvhNodeKind::Leaf { first, count } => {
                    for &id in &self.items[first as usize..(first + count) as usize] {
                        match visit(id, ray_t) {
                            Visit::Miss => {}
                            Visit::Hit(t) => {
                                hit_any = true;
                                ray_t.max = t;
                            }
                            Visit::Terminate => return Sweep::Terminated,
                        }
                    }
                }
                BvhNodeKind::Branch { left, right } => {
                    stack.push(right);
                    stack.push(left);
                }
            }
        }
        if hit_any {
            Sweep::Hit
        } else {
            Sweep::Miss
        }
    }
}

/// An accelerator slot on a group: requested kind plus the built hierarchy.
#[derive(Debug, Clone)]
pub struct Accelerator {
    pub kind: AccelKind,
    bvh: Option<Bvh>,
    built: bool,
}

impl Accelerator {
    pub fn new(kind: AccelKind) -> Self {
        Self {
            kind,
            bvh: None,
            built: false,
        }
    }

    pub fn is_built(&self) -> bool {
        self.built
    }

    /// (Re)build over the given child boxes. Ids are child slot indices.
    pub fn build(&mut self, items: &[(u32, Aabb)]) {
        self.bvh = match self.kind {
            AccelKind::NoAccel => None,
            AccelKind::Bvh | AccelKind::Sbvh => Some(Bvh::build(items)),
        };
        self.built = true;
    }

    /// Visit candidate children for a ray. With `NoAccel` every child in
    /// `0..count` is tested linearly, still shrinking the interval.
    pub fn traverse<F>(&self, ray: &Ray, mut ray_t: Interval, count: u32, visit: &mut F) -> Sweep
    where
        F: FnMut(u32, Interval) -> Visit,
    {
        match &self.bvh {
            Some(bvh) => bvh.traverse(ray, ray_t, visit),
            None => {
                let mut hit_any = false;
                for id in 0..count {
                    match visit(id, ray_t) {
                        Visit::Miss => {}
                        Visit::Hit(t) => {
                            hit_any = true;
                            ray_t.max = t;
                        }
                        Visit::Terminate => return Sweep::Terminated,
                    }
                }
                if hit_any {
                    Sweep::Hit
                } else {
                    Sweep::Miss
                }
            }
        }
    }
}
