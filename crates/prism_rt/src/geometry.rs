//! Triangle-mesh geometry and geometry instances.

use prism_math::Aabb;

use crate::accel::Bvh;
use crate::handle::{BufferHandle, GeometryHandle, MaterialHandle, ProgramHandle};

/// Geometry buffers plus the two native mesh programs.
///
/// Optional attributes (texcoords, tangent frames) are always backed by
/// a buffer; when the source mesh lacks them the compiler binds a
/// one-element placeholder and clears the corresponding flag, so every
/// slot is bound but shading only reads attributes the flag admits.
#[derive(Debug, Clone)]
pub struct Geometry {
    /// Triangle count; the index buffer holds exactly this many triples.
    pub primitive_count: usize,

    pub index_buffer: Option<BufferHandle>,
    pub vertex_buffer: Option<BufferHandle>,
    pub normal_buffer: Option<BufferHandle>,
    pub texcoord_buffer: Option<BufferHandle>,
    pub tangent_buffer: Option<BufferHandle>,
    pub bitangent_buffer: Option<BufferHandle>,

    pub has_texcoord: bool,
    pub has_tangents: bool,

    pub bounding_box_program: Option<ProgramHandle>,
    pub intersection_program: Option<ProgramHandle>,

    /// Object-space bounds, computed at validation.
    pub(crate) bounds: Aabb,
    /// Per-triangle hierarchy, built at validation.
    pub(crate) triangle_bvh: Option<Bvh>,
    pub(crate) validated: bool,
}

impl Geometry {
    pub(crate) fn new() -> Self {
        Self {
            primitive_count: 0,
            index_buffer: None,
            vertex_buffer: None,
            normal_buffer: None,
            texcoord_buffer: None,
            tangent_buffer: None,
            bitangent_buffer: None,
            has_texcoord: false,
            has_tangents: false,
            bounding_box_program: None,
            intersection_program: None,
            bounds: Aabb::EMPTY,
            triangle_bvh: None,
            validated: false,
        }
    }

    pub fn bounds(&self) -> Aabb {
        self.bounds
    }
}

/// One geometry bound to exactly one material.
#[derive(Debug, Clone)]
pub struct GeometryInstance {
    pub geometry: Option<GeometryHandle>,
    pub material: Option<MaterialHandle>,
    pub(crate) validated: bool,
}

impl GeometryInstance {
    pub(crate) fn new() -> Self {
        Self {
            geometry: None,
            material: None,
            validated: false,
        }
    }
}
