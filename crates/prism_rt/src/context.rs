//! The render context: resource arenas, variables, validation, launch.
//!
//! The context owns every device resource for the lifetime of a session
//! and hands out typed index handles. Validation is explicit and
//! bottom-up: validating a parent before its children is an error, and
//! re-validating an already valid subtree is a no-op in effect (bounds
//! and accelerators are simply rebuilt to the same values).

use std::collections::HashMap;
use std::ops::Deref;
use std::sync::Arc;

use prism_math::{Aabb, Mat4Ext, Vec3, Vec4};
use rayon::prelude::*;

use crate::accel::Bvh;
use crate::buffer::{Buffer, BufferFormat};
use crate::error::{RtError, RtResult};
use crate::geometry::{Geometry, GeometryInstance};
use crate::graph::{GeometryGroup, Group, GroupChild, TransformChild, TransformNode};
use crate::handle::{
    BufferHandle, GeometryGroupHandle, GeometryHandle, GeometryInstanceHandle, GroupHandle,
    MaterialHandle, ProgramHandle, TextureHandle, TransformHandle,
};
use crate::material::Material;
use crate::program::{ExceptionProgram, Program, ProgramKind, ProgramModule, RayGenProgram};
use crate::texture::TextureSampler;
use crate::trace::LaunchCtx;

/// Max |m * m_inv - identity| element tolerated at transform validation.
const INVERSE_TOLERANCE: f32 = 1e-3;

/// A named context variable, readable from device programs.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Variable {
    Int(i32),
    Float(f32),
    Float3(Vec3),
    Float4(Vec4),
    Texture(TextureHandle),
    Buffer(BufferHandle),
    Group(GroupHandle),
    /// Marks the launch output image.
    OutputBuffer,
}

/// Scoped read access to the launch output.
///
/// Holding the map borrows the context, so a launch (which needs
/// `&mut Context`) cannot run while the buffer is mapped; dropping the
/// guard unmaps.
pub struct OutputMap<'a> {
    pixels: &'a [[f32; 4]],
    width: u32,
    height: u32,
}

impl OutputMap<'_> {
    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    /// Pixel at (x, y), row-major from the first launch row.
    pub fn pixel(&self, x: u32, y: u32) -> [f32; 4] {
        debug_assert!(
            x < self.width && y < self.height,
            "pixel ({x}, {y}) outside {}x{} output",
            self.width,
            self.height
        );
        self.pixels[(y * self.width + x) as usize]
    }
}

impl Deref for OutputMap<'_> {
    type Target = [[f32; 4]];

    fn deref(&self) -> &Self::Target {
        self.pixels
    }
}

#[derive(Debug, Default)]
pub struct Context {
    buffers: Vec<Buffer>,
    textures: Vec<TextureSampler>,
    programs: Vec<Program>,
    materials: Vec<Material>,
    geometries: Vec<Geometry>,
    instances: Vec<GeometryInstance>,
    geometry_groups: Vec<GeometryGroup>,
    groups: Vec<Group>,
    transforms: Vec<TransformNode>,

    variables: HashMap<String, Variable>,
    material_names: HashMap<String, MaterialHandle>,

    ray_type_count: usize,
    entry_points: Vec<Option<ProgramHandle>>,
    exception_programs: Vec<Option<ProgramHandle>>,
    miss_programs: Vec<Option<ProgramHandle>>,

    output: Vec<[f32; 4]>,
    output_width: u32,
    output_height: u32,
}

impl Context {
    pub fn new() -> Self {
        Self::default()
    }

    // ---- resource creation ------------------------------------------------

    pub fn create_buffer(&mut self, buffer: Buffer) -> BufferHandle {
        let h = BufferHandle(self.buffers.len() as u32);
        self.buffers.push(buffer);
        h
    }

    pub fn create_texture_sampler(&mut self, sampler: TextureSampler) -> TextureHandle {
        let h = TextureHandle(self.textures.len() as u32);
        self.textures.push(sampler);
        h
    }

    /// Create a program from a module entry; unknown entries fail here.
    pub fn create_program(&mut self, module: &ProgramModule, entry: &str) -> RtResult<ProgramHandle> {
        let kind = module.entry(entry)?.clone();
        let h = ProgramHandle(self.programs.len() as u32);
        self.programs.push(Program {
            name: entry.to_string(),
            module: module.name().to_string(),
            kind,
        });
        Ok(h)
    }

    /// Create a material. Duplicate names are allowed (meshes join their
    /// material by index); the name lookup keeps the later definition.
    pub fn create_material(&mut self, name: &str) -> MaterialHandle {
        let h = MaterialHandle(self.materials.len() as u32);
        if self.material_names.insert(name.to_string(), h).is_some() {
            log::warn!("duplicate material name `{name}`, later definition wins for name lookups");
        }
        self.materials.push(Material::new(name, self.ray_type_count));
        h
    }

    pub fn create_geometry(&mut self) -> GeometryHandle {
        let h = GeometryHandle(self.geometries.len() as u32);
        self.geometries.push(Geometry::new());
        h
    }

    pub fn create_geometry_instance(&mut self) -> GeometryInstanceHandle {
        let h = GeometryInstanceHandle(self.instances.len() as u32);
        self.instances.push(GeometryInstance::new());
        h
    }

    pub fn create_geometry_group(&mut self) -> GeometryGroupHandle {
        let h = GeometryGroupHandle(self.geometry_groups.len() as u32);
        self.geometry_groups.push(GeometryGroup::new());
        h
    }

    pub fn create_group(&mut self) -> GroupHandle {
        let h = GroupHandle(self.groups.len() as u32);
        self.groups.push(Group::new());
        h
    }

    pub fn create_transform(&mut self) -> TransformHandle {
        let h = TransformHandle(self.transforms.len() as u32);
        self.transforms.push(TransformNode::new());
        h
    }

    // ---- accessors ---------------------------------------------------------

    pub fn buffer(&self, h: BufferHandle) -> &Buffer {
        &self.buffers[h.index()]
    }

    pub fn buffer_mut(&mut self, h: BufferHandle) -> &mut Buffer {
        &mut self.buffers[h.index()]
    }

    pub fn texture(&self, h: TextureHandle) -> &TextureSampler {
        &self.textures[h.index()]
    }

    pub fn texture_mut(&mut self, h: TextureHandle) -> &mut TextureSampler {
        &mut self.textures[h.index()]
    }

    pub fn program(&self, h: ProgramHandle) -> &Program {
        &self.programs[h.index()]
    }

    pub fn material(&self, h: MaterialHandle) -> &Material {
        &self.materials[h.index()]
    }

    pub fn material_mut(&mut self, h: MaterialHandle) -> &mut Material {
        &mut self.materials[h.index()]
    }

    pub fn geometry(&self, h: GeometryHandle) -> &Geometry {
        &self.geometries[h.index()]
    }

    pub fn geometry_mut(&mut self, h: GeometryHandle) -> &mut Geometry {
        &mut self.geometries[h.index()]
    }

    pub fn instance(&self, h: GeometryInstanceHandle) -> &GeometryInstance {
        &self.instances[h.index()]
    }

    pub fn instance_mut(&mut self, h: GeometryInstanceHandle) -> &mut GeometryInstance {
        &mut self.instances[h.index()]
    }

    pub fn geometry_group(&self, h: GeometryGroupHandle) -> &GeometryGroup {
        &self.geometry_groups[h.index()]
    }

    pub fn geometry_group_mut(&mut self, h: GeometryGroupHandle) -> &mut GeometryGroup {
        &mut self.geometry_groups[h.index()]
    }

    pub fn group(&self, h: GroupHandle) -> &Group {
        &self.groups[h.index()]
    }

    pub fn group_mut(&mut self, h: GroupHandle) -> &mut Group {
        &mut self.groups[h.index()]
    }

    pub fn transform(&self, h: TransformHandle) -> &TransformNode {
        &self.transforms[h.index()]
    }

    pub fn transform_mut(&mut self, h: TransformHandle) -> &mut TransformNode {
        &mut self.transforms[h.index()]
    }

    pub fn find_material(&self, name: &str) -> Option<MaterialHandle> {
        self.material_names.get(name).copied()
    }

    pub fn material_count(&self) -> usize {
        self.materials.len()
    }

    pub fn texture_count(&self) -> usize {
        self.textures.len()
    }

    pub fn instance_count(&self) -> usize {
        self.instances.len()
    }

    // ---- variables ---------------------------------------------------------

    pub fn set_variable(&mut self, name: &str, value: Variable) {
        self.variables.insert(name.to_string(), value);
    }

    pub fn variable(&self, name: &str) -> Option<&Variable> {
        self.variables.get(name)
    }

    pub fn int_var(&self, name: &str) -> Option<i32> {
        match self.variables.get(name) {
            Some(Variable::Int(v)) => Some(*v),
            _ => None,
        }
    }

    pub fn float_var(&self, name: &str) -> Option<f32> {
        match self.variables.get(name) {
            Some(Variable::Float(v)) => Some(*v),
            _ => None,
        }
    }

    pub fn float3_var(&self, name: &str) -> Option<Vec3> {
        match self.variables.get(name) {
            Some(Variable::Float3(v)) => Some(*v),
            _ => None,
        }
    }

    pub fn texture_var(&self, name: &str) -> Option<TextureHandle> {
        match self.variables.get(name) {
            Some(Variable::Texture(h)) => Some(*h),
            _ => None,
        }
    }

    pub fn group_var(&self, name: &str) -> Option<GroupHandle> {
        match self.variables.get(name) {
            Some(Variable::Group(h)) => Some(*h),
            _ => None,
        }
    }

    // ---- pipeline wiring ---------------------------------------------------

    pub fn set_ray_type_count(&mut self, count: usize) {
        self.ray_type_count = count;
        self.miss_programs.resize(count, None);
    }

    pub fn ray_type_count(&self) -> usize {
        self.ray_type_count
    }

    pub fn set_entry_point_count(&mut self, count: usize) {
        self.entry_points.resize(count, None);
        self.exception_programs.resize(count, None);
    }

    pub fn entry_point_count(&self) -> usize {
        self.entry_points.len()
    }

    pub fn set_ray_generation_program(&mut self, entry: usize, h: ProgramHandle) -> RtResult<()> {
        self.check_entry(entry)?;
        self.expect_kind(h, "ray generation", |k| matches!(k, ProgramKind::RayGen(_)))?;
        self.entry_points[entry] = Some(h);
        Ok(())
    }

    pub fn set_exception_program(&mut self, entry: usize, h: ProgramHandle) -> RtResult<()> {
        self.check_entry(entry)?;
        self.expect_kind(h, "exception", |k| matches!(k, ProgramKind::Exception(_)))?;
        self.exception_programs[entry] = Some(h);
        Ok(())
    }

    pub fn set_miss_program(&mut self, ray_type: usize, h: ProgramHandle) -> RtResult<()> {
        self.check_ray_type(ray_type)?;
        self.expect_kind(h, "miss", |k| matches!(k, ProgramKind::Miss(_)))?;
        self.miss_programs[ray_type] = Some(h);
        Ok(())
    }

    pub fn miss_program(&self, ray_type: usize) -> Option<ProgramHandle> {
        self.miss_programs.get(ray_type).copied().flatten()
    }

    // ---- program overrides -------------------------------------------------

    /// Rebind the closest-hit program of every material for one ray type.
    pub fn set_default_closest_hit_program(
        &mut self,
        ray_type: usize,
        h: ProgramHandle,
    ) -> RtResult<()> {
        self.check_ray_type(ray_type)?;
        self.expect_kind(h, "closest hit", |k| matches!(k, ProgramKind::ClosestHit(_)))?;
        for material in &mut self.materials {
            if let Some(slot) = material.closest_hit.get_mut(ray_type) {
                *slot = Some(h);
            }
        }
        Ok(())
    }

    /// Rebind the any-hit program of every material for one ray type.
    pub fn set_default_any_hit_program(&mut self, ray_type: usize, h: ProgramHandle) -> RtResult<()> {
        self.check_ray_type(ray_type)?;
        self.expect_kind(h, "any hit", |k| matches!(k, ProgramKind::AnyHit(_)))?;
        for material in &mut self.materials {
            if let Some(slot) = material.any_hit.get_mut(ray_type) {
                *slot = Some(h);
            }
        }
        Ok(())
    }

    /// Rebind one material's closest-hit program by material name.
    pub fn set_material_closest_hit_program(
        &mut self,
        name: &str,
        ray_type: usize,
        h: ProgramHandle,
    ) -> RtResult<()> {
        self.check_ray_type(ray_type)?;
        self.expect_kind(h, "closest hit", |k| matches!(k, ProgramKind::ClosestHit(_)))?;
        let material = self
            .find_material(name)
            .ok_or_else(|| RtError::UnknownMaterial(name.to_string()))?;
        self.materials[material.index()].closest_hit[ray_type] = Some(h);
        Ok(())
    }

    /// Rebind one material's any-hit program by material name.
    pub fn set_material_any_hit_program(
        &mut self,
        name: &str,
        ray_type: usize,
        h: ProgramHandle,
    ) -> RtResult<()> {
        self.check_ray_type(ray_type)?;
        self.expect_kind(h, "any hit", |k| matches!(k, ProgramKind::AnyHit(_)))?;
        let material = self
            .find_material(name)
            .ok_or_else(|| RtError::UnknownMaterial(name.to_string()))?;
        self.materials[material.index()].any_hit[ray_type] = Some(h);
        Ok(())
    }

    /// Rebind the bounding box program of every geometry.
    pub fn set_bounding_box_program(&mut self, h: ProgramHandle) -> RtResult<()> {
        self.expect_kind(h, "bounding box", |k| matches!(k, ProgramKind::MeshBounds))?;
        for geometry in &mut self.geometries {
            geometry.bounding_box_program = Some(h);
        }
        Ok(())
    }

    /// Rebind the intersection program of every geometry.
    pub fn set_intersection_program(&mut self, h: ProgramHandle) -> RtResult<()> {
        self.expect_kind(h, "intersection", |k| matches!(k, ProgramKind::MeshIntersect))?;
        for geometry in &mut self.geometries {
            geometry.intersection_program = Some(h);
        }
        Ok(())
    }

    fn check_entry(&self, entry: usize) -> RtResult<()> {
        if entry >= self.entry_points.len() {
            return Err(RtError::EntryPointOutOfRange(entry, self.entry_points.len()));
        }
        Ok(())
    }

    fn check_ray_type(&self, ray_type: usize) -> RtResult<()> {
        if ray_type >= self.ray_type_count {
            return Err(RtError::RayTypeOutOfRange(ray_type, self.ray_type_count));
        }
        Ok(())
    }

    fn expect_kind(
        &self,
        h: ProgramHandle,
        expected: &'static str,
        pred: fn(&ProgramKind) -> bool,
    ) -> RtResult<()> {
        let program = &self.programs[h.index()];
        if !pred(&program.kind) {
            return Err(RtError::ProgramKindMismatch {
                name: program.name.clone(),
                expected,
                actual: program.kind.kind_name(),
            });
        }
        Ok(())
    }

    // ---- validation ---------------------------------------------------------

    pub fn validate_buffer(&mut self, h: BufferHandle) -> RtResult<()> {
        self.buffers[h.index()].validate()
    }

    pub fn validate_texture(&mut self, h: TextureHandle) -> RtResult<()> {
        let sampler = &self.textures[h.index()];
        if sampler.mip_levels.is_empty() {
            return Err(RtError::Validation("texture sampler has no mip levels".into()));
        }
        for &level in &sampler.mip_levels {
            if !self.buffers[level.index()].validated {
                return Err(RtError::ValidationOrder {
                    child: "buffer",
                    parent: "texture sampler",
                });
            }
        }
        self.textures[h.index()].validated = true;
        Ok(())
    }

    pub fn validate_material(&mut self, h: MaterialHandle) -> RtResult<()> {
        let material = &self.materials[h.index()];
        for (slot, tex) in [
            ("map_kd", material.map_kd),
            ("map_ks", material.map_ks),
            ("map_bump", material.map_bump),
        ] {
            let tex = tex.ok_or_else(|| {
                RtError::Validation(format!(
                    "material `{}` has unbound texture slot {slot}",
                    material.name
                ))
            })?;
            if !self.textures[tex.index()].validated {
                return Err(RtError::ValidationOrder {
                    child: "texture sampler",
                    parent: "material",
                });
            }
        }
        for ray_type in 0..self.ray_type_count {
            if let Some(p) = material.closest_hit_program(ray_type) {
                self.expect_kind(p, "closest hit", |k| matches!(k, ProgramKind::ClosestHit(_)))?;
            }
            if let Some(p) = material.any_hit_program(ray_type) {
                self.expect_kind(p, "any hit", |k| matches!(k, ProgramKind::AnyHit(_)))?;
            }
        }
        self.materials[h.index()].validated = true;
        Ok(())
    }

    /// Validate a geometry: check buffer shapes and index ranges, run the
    /// bounds program, and build the triangle hierarchy.
    pub fn validate_geometry(&mut self, h: GeometryHandle) -> RtResult<()> {
        let geometry = &self.geometries[h.index()];

        self.expect_kind(
            geometry.bounding_box_program.ok_or_else(|| {
                RtError::Validation("geometry has no bounding box program".into())
            })?,
            "bounding box",
            |k| matches!(k, ProgramKind::MeshBounds),
        )?;
        self.expect_kind(
            geometry.intersection_program.ok_or_else(|| {
                RtError::Validation("geometry has no intersection program".into())
            })?,
            "intersection",
            |k| matches!(k, ProgramKind::MeshIntersect),
        )?;

        let vertices = self.geometry_buffer(geometry.vertex_buffer, "vertex")?;
        let indices = self.geometry_buffer(geometry.index_buffer, "index")?;
        let vertex_count = vertices.len();

        if indices.format != BufferFormat::Int3 {
            return Err(RtError::Validation(format!(
                "index buffer must be int3, got {}",
                indices.format.name()
            )));
        }
        if indices.len() != geometry.primitive_count {
            return Err(RtError::BufferSizeMismatch {
                what: "index buffer".into(),
                expected: geometry.primitive_count,
                actual: indices.len(),
            });
        }

        let faces = indices.as_int3().unwrap_or(&[]);
        let positions = vertices.as_float3().unwrap_or(&[]);
        if positions.len() != vertex_count {
            return Err(RtError::Validation("vertex buffer must be float3".into()));
        }
        for (prim, face) in faces.iter().enumerate() {
            for &i in face {
                if i < 0 || i as usize >= vertex_count {
                    return Err(RtError::Validation(format!(
                        "triangle {prim} references vertex {i}, valid range is 0..{vertex_count}"
                    )));
                }
            }
        }

        // Attribute buffers: full-size when the flag is set, placeholder
        // otherwise.
        let normals = self.geometry_buffer(geometry.normal_buffer, "normal")?;
        if normals.len() != vertex_count {
            return Err(RtError::BufferSizeMismatch {
                what: "normal buffer".into(),
                expected: vertex_count,
                actual: normals.len(),
            });
        }
        let texcoords = self.geometry_buffer(geometry.texcoord_buffer, "texcoord")?;
        if geometry.has_texcoord && texcoords.len() != vertex_count {
            return Err(RtError::BufferSizeMismatch {
                what: "texcoord buffer".into(),
                expected: vertex_count,
                actual: texcoords.len(),
            });
        }
        let tangents = self.geometry_buffer(geometry.tangent_buffer, "tangent")?;
        let bitangents = self.geometry_buffer(geometry.bitangent_buffer, "bitangent")?;
        if geometry.has_tangents
            && (tangents.len() != vertex_count || bitangents.len() != vertex_count)
        {
            return Err(RtError::BufferSizeMismatch {
                what: "tangent buffers".into(),
                expected: vertex_count,
                actual: tangents.len().min(bitangents.len()),
            });
        }

        // Bounds program output: one box per triangle, also the BVH input.
        let items: Vec<(u32, Aabb)> = faces
            .iter()
            .enumerate()
            .map(|(prim, face)| {
                let mut bbox = Aabb::EMPTY;
                for &i in face {
                    bbox.grow(Vec3::from_array(positions[i as usize]));
                }
                (prim as u32, bbox)
            })
            .collect();
        let bvh = Bvh::build(&items);

        let geometry = &mut self.geometries[h.index()];
        geometry.bounds = bvh.bounds();
        geometry.triangle_bvh = Some(bvh);
        geometry.validated = true;
        Ok(())
    }

    fn geometry_buffer(&self, h: Option<BufferHandle>, what: &str) -> RtResult<&Buffer> {
        let h = h.ok_or_else(|| RtError::Validation(format!("geometry has no {what} buffer")))?;
        let buffer = &self.buffers[h.index()];
        if !buffer.validated {
            return Err(RtError::ValidationOrder {
                child: "buffer",
                parent: "geometry",
            });
        }
        Ok(buffer)
    }

    pub fn validate_geometry_instance(&mut self, h: GeometryInstanceHandle) -> RtResult<()> {
        let instance = &self.instances[h.index()];
        let geometry = instance
            .geometry
            .ok_or_else(|| RtError::Validation("geometry instance has no geometry".into()))?;
        if !self.geometries[geometry.index()].validated {
            return Err(RtError::ValidationOrder {
                child: "geometry",
                parent: "geometry instance",
            });
        }
        let material = instance
            .material
            .ok_or_else(|| RtError::Validation("geometry instance has no material".into()))?;
        if !self.materials[material.index()].validated {
            return Err(RtError::ValidationOrder {
                child: "material",
                parent: "geometry instance",
            });
        }
        self.instances[h.index()].validated = true;
        Ok(())
    }

    pub fn validate_geometry_group(&mut self, h: GeometryGroupHandle) -> RtResult<()> {
        let group = &self.geometry_groups[h.index()];
        let mut items = Vec::with_capacity(group.children.len());
        let mut bounds = Aabb::EMPTY;
        for (slot, &child) in group.children.iter().enumerate() {
            let instance = &self.instances[child.index()];
            if !instance.validated {
                return Err(RtError::ValidationOrder {
                    child: "geometry instance",
                    parent: "geometry group",
                });
            }
            let child_bounds = match instance.geometry {
                Some(g) => self.geometries[g.index()].bounds,
                None => Aabb::EMPTY,
            };
            bounds = Aabb::surrounding(&bounds, &child_bounds);
            items.push((slot as u32, child_bounds));
        }
        let group = &mut self.geometry_groups[h.index()];
        group.accel.build(&items);
        group.bounds = bounds;
        group.validated = true;
        Ok(())
    }

    pub fn validate_transform(&mut self, h: TransformHandle) -> RtResult<()> {
        let transform = &self.transforms[h.index()];
        let child = transform
            .child
            .ok_or_else(|| RtError::Validation("transform has no child".into()))?;
        let child_bounds = match child {
            TransformChild::Group(g) => {
                let group = &self.groups[g.index()];
                if !group.validated {
                    return Err(RtError::ValidationOrder {
                        child: "group",
                        parent: "transform",
                    });
                }
                group.bounds
            }
            TransformChild::GeometryGroup(g) => {
                let group = &self.geometry_groups[g.index()];
                if !group.validated {
                    return Err(RtError::ValidationOrder {
                        child: "geometry group",
                        parent: "transform",
                    });
                }
                group.bounds
            }
        };

        let roundtrip = transform.matrix * transform.inv_matrix;
        let max_err = (roundtrip - prism_math::Mat4::IDENTITY)
            .to_cols_array()
            .iter()
            .fold(0.0f32, |acc, v| acc.max(v.abs()));
        if !max_err.is_finite() || max_err > INVERSE_TOLERANCE {
            return Err(RtError::Validation(
                "transform matrix is not invertible".into(),
            ));
        }

        let world_bounds = transform.matrix.transform_aabb(&child_bounds);
        let transform = &mut self.transforms[h.index()];
        transform.bounds = world_bounds;
        transform.validated = true;
        Ok(())
    }

    pub fn validate_group(&mut self, h: GroupHandle) -> RtResult<()> {
        let group = &self.groups[h.index()];
        let mut items = Vec::with_capacity(group.children.len());
        let mut bounds = Aabb::EMPTY;
        for (slot, &child) in group.children.iter().enumerate() {
            let child_bounds = match child {
                GroupChild::Transform(t) => {
                    let node = &self.transforms[t.index()];
                    if !node.validated {
                        return Err(RtError::ValidationOrder {
                            child: "transform",
                            parent: "group",
                        });
                    }
                    node.bounds
                }
                GroupChild::GeometryGroup(g) => {
                    let node = &self.geometry_groups[g.index()];
                    if !node.validated {
                        return Err(RtError::ValidationOrder {
                            child: "geometry group",
                            parent: "group",
                        });
                    }
                    node.bounds
                }
            };
            bounds = Aabb::surrounding(&bounds, &child_bounds);
            items.push((slot as u32, child_bounds));
        }
        let group = &mut self.groups[h.index()];
        group.accel.build(&items);
        group.bounds = bounds;
        group.validated = true;
        Ok(())
    }

    /// Validate the whole context bottom-up, ending at `top_object`.
    ///
    /// Safe to call again after mutations; subtrees that are already
    /// valid come out unchanged.
    pub fn validate(&mut self) -> RtResult<()> {
        for i in 0..self.buffers.len() {
            self.validate_buffer(BufferHandle(i as u32))?;
        }
        for i in 0..self.textures.len() {
            self.validate_texture(TextureHandle(i as u32))?;
        }
        for i in 0..self.materials.len() {
            self.validate_material(MaterialHandle(i as u32))?;
        }
        for i in 0..self.geometries.len() {
            self.validate_geometry(GeometryHandle(i as u32))?;
        }
        for i in 0..self.instances.len() {
            self.validate_geometry_instance(GeometryInstanceHandle(i as u32))?;
        }

        let top = self
            .group_var("top_object")
            .ok_or_else(|| RtError::Validation("top_object is not set".into()))?;
        self.validate_group_tree(top)?;

        for (entry, slot) in self.entry_points.iter().enumerate() {
            if slot.is_none() {
                return Err(RtError::Validation(format!(
                    "entry point {entry} has no ray generation program"
                )));
            }
        }
        Ok(())
    }

    fn validate_group_tree(&mut self, h: GroupHandle) -> RtResult<()> {
        let children = self.groups[h.index()].children.clone();
        for child in children {
            match child {
                GroupChild::Transform(t) => self.validate_transform_tree(t)?,
                GroupChild::GeometryGroup(g) => self.validate_geometry_group(g)?,
            }
        }
        self.validate_group(h)
    }

    fn validate_transform_tree(&mut self, h: TransformHandle) -> RtResult<()> {
        match self.transforms[h.index()].child {
            Some(TransformChild::Group(g)) => self.validate_group_tree(g)?,
            Some(TransformChild::GeometryGroup(g)) => self.validate_geometry_group(g)?,
            None => return Err(RtError::Validation("transform has no child".into())),
        }
        self.validate_transform(h)
    }

    // ---- launch ---------------------------------------------------------------

    pub fn set_output_size(&mut self, width: u32, height: u32) {
        self.output_width = width;
        self.output_height = height;
        self.output = vec![[0.0; 4]; (width as usize) * (height as usize)];
        self.set_variable("output0", Variable::OutputBuffer);
    }

    pub fn output_size(&self) -> (u32, u32) {
        (self.output_width, self.output_height)
    }

    /// Run one launch over the output size, rows in parallel.
    ///
    /// Non-finite ray generation results are replaced by the entry's
    /// exception program when one is bound.
    pub fn launch(&mut self, entry: usize) -> RtResult<()> {
        let raygen_handle = self
            .entry_points
            .get(entry)
            .copied()
            .ok_or(RtError::EntryPointOutOfRange(entry, self.entry_points.len()))?
            .ok_or_else(|| {
                RtError::Validation(format!("entry point {entry} has no ray generation program"))
            })?;
        let raygen: Arc<dyn RayGenProgram> = match &self.programs[raygen_handle.index()].kind {
            ProgramKind::RayGen(p) => p.clone(),
            other => {
                return Err(RtError::ProgramKindMismatch {
                    name: self.programs[raygen_handle.index()].name.clone(),
                    expected: "ray generation",
                    actual: other.kind_name(),
                })
            }
        };
        let exception: Option<Arc<dyn ExceptionProgram>> = self
            .exception_programs
            .get(entry)
            .copied()
            .flatten()
            .and_then(|h| match &self.programs[h.index()].kind {
                ProgramKind::Exception(p) => Some(p.clone()),
                _ => None,
            });

        let (width, height) = (self.output_width, self.output_height);
        log::debug!("launch entry {entry}: {width}x{height}");

        let rows: Vec<Vec<[f32; 4]>> = {
            let launch = LaunchCtx::new(self, width, height);
            let raygen = &raygen;
            let exception = &exception;
            (0..height)
                .into_par_iter()
                .map(|y| {
                    let launch = &launch;
                    (0..width)
                        .map(|x| {
                            let mut color = raygen.ray_gen(launch, x, y);
                            if !color.is_finite() {
                                if let Some(handler) = exception {
                                    color = handler.exception(x, y);
                                }
                            }
                            color.to_array()
                        })
                        .collect()
                })
                .collect()
        };
        self.output = rows.into_iter().flatten().collect();
        Ok(())
    }

    /// Map the output image for reading. See [`OutputMap`].
    pub fn map_output_buffer(&self) -> OutputMap<'_> {
        OutputMap {
            pixels: &self.output,
            width: self.output_width,
            height: self.output_height,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::program::AnyHitVerdict;
    use prism_math::Ray;

    struct FlatColor(Vec4);

    impl RayGenProgram for FlatColor {
        fn ray_gen(&self, _launch: &LaunchCtx<'_>, _x: u32, _y: u32) -> Vec4 {
            self.0
        }
    }

    struct Magenta;

    impl ExceptionProgram for Magenta {
        fn exception(&self, _x: u32, _y: u32) -> Vec4 {
            Vec4::new(1.0, 0.0, 1.0, 1.0)
        }
    }

    struct NoopAnyHit;

    impl crate::program::AnyHitProgram for NoopAnyHit {
        fn any_hit(
            &self,
            _tracer: &crate::trace::Tracer<'_>,
            _ray: &Ray,
            _hit: &crate::trace::HitRecord,
            _payload: &mut crate::trace::RayPayload,
        ) -> AnyHitVerdict {
            AnyHitVerdict::Accept
        }
    }

    fn test_module() -> ProgramModule {
        let mut module = ProgramModule::new("test");
        module.register("flat", ProgramKind::RayGen(Arc::new(FlatColor(Vec4::ONE))));
        module.register(
            "nan",
            ProgramKind::RayGen(Arc::new(FlatColor(Vec4::splat(f32::NAN)))),
        );
        module.register("magenta", ProgramKind::Exception(Arc::new(Magenta)));
        module.register("anyhit", ProgramKind::AnyHit(Arc::new(NoopAnyHit)));
        module
    }

    #[test]
    fn test_variables_roundtrip() {
        let mut ctx = Context::new();
        ctx.set_variable("eye", Variable::Float3(Vec3::new(1.0, 2.0, 3.0)));
        ctx.set_variable("Phong", Variable::Int(1));
        assert_eq!(ctx.float3_var("eye"), Some(Vec3::new(1.0, 2.0, 3.0)));
        assert_eq!(ctx.int_var("Phong"), Some(1));
        assert_eq!(ctx.float_var("eye"), None);
        assert_eq!(ctx.int_var("missing"), None);
    }

    #[test]
    fn test_program_kind_checked_at_bind() {
        let module = test_module();
        let mut ctx = Context::new();
        ctx.set_ray_type_count(2);
        ctx.set_entry_point_count(1);
        let anyhit = ctx.create_program(&module, "anyhit").unwrap();
        let err = ctx.set_ray_generation_program(0, anyhit).unwrap_err();
        assert!(matches!(err, RtError::ProgramKindMismatch { .. }));

        let anyhit = ctx.create_program(&module, "anyhit").unwrap();
        let err = ctx.set_miss_program(5, anyhit).unwrap_err();
        assert!(matches!(err, RtError::RayTypeOutOfRange(5, 2)));
    }

    #[test]
    fn test_bottom_up_validation_is_enforced() {
        use crate::buffer::{Buffer, BufferData};
        use crate::texture::{ChannelMode, TextureConfig, TextureSampler};

        let mut ctx = Context::new();
        // A texture over a buffer that was never validated.
        let buffer = ctx.create_buffer(Buffer::from_data_2d(
            BufferData::UByte4(vec![[255; 4]]),
            1,
            1,
        ));
        let mut sampler = TextureSampler::new(ChannelMode::Rgba, &TextureConfig::default());
        sampler.mip_levels.push(buffer);
        let texture = ctx.create_texture_sampler(sampler);
        let err = ctx.validate_texture(texture).unwrap_err();
        assert!(matches!(
            err,
            RtError::ValidationOrder { child: "buffer", parent: "texture sampler" }
        ));

        // A geometry group over an unvalidated instance.
        let instance = ctx.create_geometry_instance();
        let gg = ctx.create_geometry_group();
        ctx.geometry_group_mut(gg).children.push(instance);
        let err = ctx.validate_geometry_group(gg).unwrap_err();
        assert!(matches!(err, RtError::ValidationOrder { .. }));
    }

    #[test]
    fn test_geometry_index_validation() {
        use crate::buffer::{Buffer, BufferData};

        let mut module = ProgramModule::new("test");
        module.register("bbox", ProgramKind::MeshBounds);
        module.register("isect", ProgramKind::MeshIntersect);

        let mut ctx = Context::new();
        let vertices = ctx.create_buffer(Buffer::from_data(BufferData::Float3(vec![
            [0.0, 0.0, 0.0],
            [1.0, 0.0, 0.0],
            [0.0, 1.0, 0.0],
        ])));
        let normals =
            ctx.create_buffer(Buffer::from_data(BufferData::Float3(vec![[0.0, 0.0, 1.0]; 3])));
        // Vertex 3 is one past the end.
        let bad_indices = ctx.create_buffer(Buffer::from_data(BufferData::Int3(vec![[0, 1, 3]])));
        let good_indices = ctx.create_buffer(Buffer::from_data(BufferData::Int3(vec![[0, 1, 2]])));
        let placeholder2 =
            ctx.create_buffer(Buffer::from_data(BufferData::Float2(vec![[0.0; 2]])));
        let placeholder3 =
            ctx.create_buffer(Buffer::from_data(BufferData::Float3(vec![[0.0; 3]])));
        for b in [vertices, normals, bad_indices, good_indices, placeholder2, placeholder3] {
            ctx.validate_buffer(b).unwrap();
        }
        let bbox = ctx.create_program(&module, "bbox").unwrap();
        let isect = ctx.create_program(&module, "isect").unwrap();

        let make_geometry = |ctx: &mut Context, indices, primitive_count| {
            let h = ctx.create_geometry();
            let g = ctx.geometry_mut(h);
            g.primitive_count = primitive_count;
            g.vertex_buffer = Some(vertices);
            g.normal_buffer = Some(normals);
            g.index_buffer = Some(indices);
            g.texcoord_buffer = Some(placeholder2);
            g.tangent_buffer = Some(placeholder3);
            g.bitangent_buffer = Some(placeholder3);
            g.bounding_box_program = Some(bbox);
            g.intersection_program = Some(isect);
            h
        };

        let out_of_range = make_geometry(&mut ctx, bad_indices, 1);
        let err = ctx.validate_geometry(out_of_range).unwrap_err();
        assert!(matches!(err, RtError::Validation(_)));

        // Declared primitive count disagrees with the index buffer.
        let short_indices = make_geometry(&mut ctx, good_indices, 2);
        let err = ctx.validate_geometry(short_indices).unwrap_err();
        assert!(matches!(
            err,
            RtError::BufferSizeMismatch { expected: 2, actual: 1, .. }
        ));

        let ok = make_geometry(&mut ctx, good_indices, 1);
        ctx.validate_geometry(ok).unwrap();
        assert!(ctx.geometry(ok).triangle_bvh.is_some());
    }

    #[test]
    fn test_duplicate_material_name_last_wins() {
        let _ = env_logger::builder().is_test(true).try_init();
        let mut ctx = Context::new();
        ctx.set_ray_type_count(2);
        let _first = ctx.create_material("wood");
        let second = ctx.create_material("wood");
        assert_eq!(ctx.find_material("wood"), Some(second));
        assert_eq!(ctx.material_count(), 2);
    }

    #[test]
    fn test_launch_fills_output_and_exception_substitutes() {
        let module = test_module();
        let mut ctx = Context::new();
        ctx.set_entry_point_count(2);
        let flat = ctx.create_program(&module, "flat").unwrap();
        let nan = ctx.create_program(&module, "nan").unwrap();
        let magenta = ctx.create_program(&module, "magenta").unwrap();
        ctx.set_ray_generation_program(0, flat).unwrap();
        ctx.set_ray_generation_program(1, nan).unwrap();
        ctx.set_exception_program(1, magenta).unwrap();
        ctx.set_output_size(4, 3);

        ctx.launch(0).unwrap();
        {
            let map = ctx.map_output_buffer();
            assert_eq!(map.len(), 12);
            assert_eq!(map.pixel(3, 2), [1.0, 1.0, 1.0, 1.0]);
        }

        // NaN from ray gen is replaced by the exception color.
        ctx.launch(1).unwrap();
        let map = ctx.map_output_buffer();
        assert_eq!(map.pixel(0, 0), [1.0, 0.0, 1.0, 1.0]);

        assert!(matches!(
            Context::new().launch(3),
            Err(RtError::EntryPointOutOfRange(3, 0))
        ));
    }

    #[test]
    #[should_panic(expected = "outside 4x3 output")]
    fn test_pixel_out_of_range_is_caught() {
        let mut ctx = Context::new();
        ctx.set_output_size(4, 3);
        // x == width would otherwise read the first pixel of the next row.
        let _ = ctx.map_output_buffer().pixel(4, 0);
    }
}
