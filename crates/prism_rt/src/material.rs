//! Compiled materials.
//!
//! A material pairs Phong constants with three texture slots (diffuse,
//! specular, bump) and per-ray-type hit programs. Validation guarantees
//! every texture slot is bound, so shading code never branches on a
//! missing map; absent source maps are bound to the white fallback by
//! the compiler.

use prism_math::Vec4;

use crate::handle::{ProgramHandle, TextureHandle};

#[derive(Debug, Clone)]
pub struct Material {
    pub name: String,

    /// Phong constants; unset source values compile to zero.
    pub diffuse: Vec4,
    pub specular: Vec4,
    pub shininess: f32,

    pub map_kd: Option<TextureHandle>,
    pub map_ks: Option<TextureHandle>,
    pub map_bump: Option<TextureHandle>,

    /// Whether the source material referenced any texture map at all.
    /// When false the bound maps are fallbacks and shading skips them.
    pub has_source_maps: bool,

    /// Hit programs indexed by ray type.
    pub(crate) closest_hit: Vec<Option<ProgramHandle>>,
    pub(crate) any_hit: Vec<Option<ProgramHandle>>,

    pub(crate) validated: bool,
}

impl Material {
    pub(crate) fn new(name: impl Into<String>, ray_type_count: usize) -> Self {
        Self {
            name: name.into(),
            diffuse: Vec4::ZERO,
            specular: Vec4::ZERO,
            shininess: 0.0,
            map_kd: None,
            map_ks: None,
            map_bump: None,
            has_source_maps: false,
            closest_hit: vec![None; ray_type_count],
            any_hit: vec![None; ray_type_count],
            validated: false,
        }
    }

    pub fn closest_hit_program(&self, ray_type: usize) -> Option<ProgramHandle> {
        self.closest_hit.get(ray_type).copied().flatten()
    }

    pub fn any_hit_program(&self, ray_type: usize) -> Option<ProgramHandle> {
        self.any_hit.get(ray_type).copied().flatten()
    }
}
