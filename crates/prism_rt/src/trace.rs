//! Ray traversal through the compiled scene graph.
//!
//! Rays enter at the `top_object` group and recurse through transforms,
//! groups, geometry groups, and instances. At a transform the ray is
//! taken into object space with the cached inverse WITHOUT renormalizing
//! the direction, so the hit parameter t means the same thing in every
//! space; hit attributes are brought back to world space on the way out.

use std::sync::Arc;

use prism_math::{Interval, Mat4Ext, Ray, Vec2, Vec3, Vec4};

use crate::accel::{Sweep, Visit};
use crate::context::Context;
use crate::graph::{GroupChild, TransformChild};
use crate::handle::{
    GeometryGroupHandle, GeometryInstanceHandle, GroupHandle, MaterialHandle, TransformHandle,
};
use crate::program::{AnyHitProgram, AnyHitVerdict, ProgramKind};

/// Recursion cap for radiance rays.
pub const MAX_TRACE_DEPTH: u32 = 8;

/// Rays starting closer than this to a surface self-intersect.
const T_MIN: f32 = 1e-3;

/// Per-ray state carried through programs.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum RayPayload {
    Radiance { color: Vec4, depth: u32 },
    Shadow { attenuation: f32 },
}

impl RayPayload {
    pub fn radiance(depth: u32) -> Self {
        RayPayload::Radiance {
            color: Vec4::ZERO,
            depth,
        }
    }

    pub fn shadow() -> Self {
        RayPayload::Shadow { attenuation: 1.0 }
    }

    pub fn color(&self) -> Vec4 {
        match self {
            RayPayload::Radiance { color, .. } => *color,
            RayPayload::Shadow { attenuation } => Vec4::splat(*attenuation),
        }
    }

    pub fn attenuation(&self) -> f32 {
        match self {
            RayPayload::Shadow { attenuation } => *attenuation,
            RayPayload::Radiance { .. } => 1.0,
        }
    }
}

/// The intersection handed to hit programs.
///
/// During traversal the directional fields are in the space of the
/// geometry being tested; any-hit programs see them that way. By the
/// time the closest-hit program runs they are world space, normalized,
/// and the normals face against the ray.
#[derive(Debug, Clone, Copy)]
pub struct HitRecord {
    pub t: f32,
    /// World-space hit point.
    pub point: Vec3,
    /// Shading normal (interpolated).
    pub normal: Vec3,
    /// True triangle-plane normal.
    pub geometric_normal: Vec3,
    pub front_face: bool,
    pub tangent: Vec3,
    pub bitangent: Vec3,
    pub uv: Vec2,
    pub has_texcoord: bool,
    pub has_tangents: bool,
    pub material: MaterialHandle,
    pub instance: GeometryInstanceHandle,
    pub primitive: u32,
}

/// Read-only view of the context given to ray generation programs.
pub struct LaunchCtx<'a> {
    ctx: &'a Context,
    pub width: u32,
    pub height: u32,
}

impl<'a> LaunchCtx<'a> {
    pub(crate) fn new(ctx: &'a Context, width: u32, height: u32) -> Self {
        Self { ctx, width, height }
    }

    pub fn context(&self) -> &'a Context {
        self.ctx
    }

    pub fn tracer(&self) -> Tracer<'a> {
        Tracer { ctx: self.ctx }
    }
}

/// Recursive ray dispatch, available to every shading program.
pub struct Tracer<'a> {
    pub(crate) ctx: &'a Context,
}

impl<'a> Tracer<'a> {
    pub fn context(&self) -> &'a Context {
        self.ctx
    }

    /// Trace one ray against `top_object` and run the matching closest
    /// hit or miss program.
    pub fn trace(&self, ray: &Ray, ray_type: usize, payload: &mut RayPayload) {
        if let RayPayload::Radiance { depth, .. } = payload {
            if *depth > MAX_TRACE_DEPTH {
                return;
            }
        }
        let Some(top) = self.ctx.group_var("top_object") else {
            self.run_miss(ray, ray_type, payload);
            return;
        };

        let mut best: Option<HitRecord> = None;
        let sweep = hit_group(
            self.ctx,
            self,
            top,
            ray,
            Interval::new(T_MIN, f32::INFINITY),
            ray_type,
            payload,
            &mut best,
        );
        if sweep == Sweep::Terminated {
            return;
        }

        match best {
            Some(mut hit) => {
                hit.point = ray.at(hit.t);
                hit.normal = hit.normal.normalize_or_zero();
                hit.geometric_normal = hit.geometric_normal.normalize_or_zero();
                hit.front_face = hit.geometric_normal.dot(ray.direction) < 0.0;
                if !hit.front_face {
                    hit.normal = -hit.normal;
                    hit.geometric_normal = -hit.geometric_normal;
                }
                if hit.has_tangents {
                    hit.tangent = hit.tangent.normalize_or_zero();
                    hit.bitangent = hit.bitangent.normalize_or_zero();
                }

                let material = self.ctx.material(hit.material);
                if let Some(h) = material.closest_hit_program(ray_type) {
                    if let ProgramKind::ClosestHit(program) = &self.ctx.program(h).kind {
                        program.closest_hit(self, ray, &hit, payload);
                    }
                }
            }
            None => self.run_miss(ray, ray_type, payload),
        }
    }

    fn run_miss(&self, ray: &Ray, ray_type: usize, payload: &mut RayPayload) {
        if let Some(h) = self.ctx.miss_program(ray_type) {
            if let ProgramKind::Miss(program) = &self.ctx.program(h).kind {
                program.miss(self, ray, payload);
            }
        }
    }
}

fn sweep_to_visit(sweep: Sweep, best: &Option<HitRecord>) -> Visit {
    match sweep {
        Sweep::Terminated => Visit::Terminate,
        Sweep::Miss => Visit::Miss,
        Sweep::Hit => Visit::Hit(best.as_ref().map(|h| h.t).unwrap_or(f32::INFINITY)),
    }
}

#[allow(clippy::too_many_arguments)]
fn hit_group(
    ctx: &Context,
    tracer: &Tracer<'_>,
    h: GroupHandle,
    ray: &Ray,
    ray_t: Interval,
    ray_type: usize,
    payload: &mut RayPayload,
    best: &mut Option<HitRecord>,
) -> Sweep {
    let group = ctx.group(h);
    group.accel.traverse(
        ray,
        ray_t,
        group.children.len() as u32,
        &mut |slot, t_now| match group.children[slot as usize] {
            GroupChild::Transform(t) => {
                hit_transform(ctx, tracer, t, ray, t_now, ray_type, payload, best)
            }
            GroupChild::GeometryGroup(g) => {
                hit_geometry_group(ctx, tracer, g, ray, t_now, ray_type, payload, best)
            }
        },
    )
}

#[allow(clippy::too_many_arguments)]
fn hit_transform(
    ctx: &Context,
    tracer: &Tracer<'_>,
    h: TransformHandle,
    ray: &Ray,
    ray_t: Interval,
    ray_type: usize,
    payload: &mut RayPayload,
    best: &mut Option<HitRecord>,
) -> Visit {
    let node = ctx.transform(h);
    // Object space. The direction keeps its scaled length so t carries over.
    let local_ray = Ray::new(
        node.inv_matrix.transform_point3(ray.origin),
        node.inv_matrix.transform_vector3(ray.direction),
    );

    let visit = match node.child {
        Some(TransformChild::Group(g)) => {
            let sweep = hit_group(ctx, tracer, g, &local_ray, ray_t, ray_type, payload, best);
            sweep_to_visit(sweep, best)
        }
        Some(TransformChild::GeometryGroup(g)) => {
            hit_geometry_group(ctx, tracer, g, &local_ray, ray_t, ray_type, payload, best)
        }
        None => Visit::Miss,
    };

    if let Visit::Hit(_) = visit {
        // The winning record came from under this node; bring its
        // directional attributes one space up. Normals use the
        // inverse-transpose so non-uniform scales stay correct.
        if let Some(hit) = best.as_mut() {
            let normal_matrix = node.inv_matrix.transpose();
            hit.normal = normal_matrix.transform_vector3(hit.normal);
            hit.geometric_normal = normal_matrix.transform_vector3(hit.geometric_normal);
            if hit.has_tangents {
                hit.tangent = node.matrix.transform_vector3(hit.tangent);
                hit.bitangent = node.matrix.transform_vector3(hit.bitangent);
            }
            return Visit::Hit(hit.t);
        }
    }
    visit
}

#[allow(clippy::too_many_arguments)]
fn hit_geometry_group(
    ctx: &Context,
    tracer: &Tracer<'_>,
    h: GeometryGroupHandle,
    ray: &Ray,
    ray_t: Interval,
    ray_type: usize,
    payload: &mut RayPayload,
    best: &mut Option<HitRecord>,
) -> Visit {
    let group = ctx.geometry_group(h);
    let sweep = group.accel.traverse(
        ray,
        ray_t,
        group.children.len() as u32,
        &mut |slot, t_now| {
            hit_instance(
                ctx,
                tracer,
                group.children[slot as usize],
                ray,
                t_now,
                ray_type,
                payload,
                best,
            )
        },
    );
    sweep_to_visit(sweep, best)
}

#[allow(clippy::too_many_arguments)]
fn hit_instance(
    ctx: &Context,
    tracer: &Tracer<'_>,
    h: GeometryInstanceHandle,
    ray: &Ray,
    ray_t: Interval,
    ray_type: usize,
    payload: &mut RayPayload,
    best: &mut Option<HitRecord>,
) -> Visit {
    let instance = ctx.instance(h);
    let (Some(geometry_h), Some(material_h)) = (instance.geometry, instance.material) else {
        return Visit::Miss;
    };
    let geometry = ctx.geometry(geometry_h);
    let Some(bvh) = &geometry.triangle_bvh else {
        return Visit::Miss;
    };

    let faces = buffer_int3(ctx, geometry.index_buffer);
    let positions = buffer_float3(ctx, geometry.vertex_buffer);
    let normals = buffer_float3(ctx, geometry.normal_buffer);
    let texcoords = buffer_float2(ctx, geometry.texcoord_buffer);
    let tangents = buffer_float3(ctx, geometry.tangent_buffer);
    let bitangents = buffer_float3(ctx, geometry.bitangent_buffer);
    if faces.is_empty() || positions.is_empty() {
        return Visit::Miss;
    }

    let any_hit: Option<Arc<dyn AnyHitProgram>> = ctx
        .material(material_h)
        .any_hit_program(ray_type)
        .and_then(|p| match &ctx.program(p).kind {
            ProgramKind::AnyHit(program) => Some(program.clone()),
            _ => None,
        });

    let sweep = bvh.traverse(ray, ray_t, &mut |prim, t_now| {
        let face = faces[prim as usize];
        let Some(tri) = intersect_triangle(positions, face, ray, t_now) else {
            return Visit::Miss;
        };

        let w = 1.0 - tri.u - tri.v;
        let (i0, i1, i2) = (face[0] as usize, face[1] as usize, face[2] as usize);
        let normal = if normals.len() > i0.max(i1).max(i2) {
            interp3(normals, i0, i1, i2, w, tri.u, tri.v)
        } else {
            tri.normal
        };
        let uv = if geometry.has_texcoord && texcoords.len() > i0.max(i1).max(i2) {
            let a = texcoords[i0];
            let b = texcoords[i1];
            let c = texcoords[i2];
            Vec2::new(
                w * a[0] + tri.u * b[0] + tri.v * c[0],
                w * a[1] + tri.u * b[1] + tri.v * c[1],
            )
        } else {
            Vec2::ZERO
        };
        let (tangent, bitangent) = if geometry.has_tangents
            && tangents.len() > i0.max(i1).max(i2)
            && bitangents.len() > i0.max(i1).max(i2)
        {
            (
                interp3(tangents, i0, i1, i2, w, tri.u, tri.v),
                interp3(bitangents, i0, i1, i2, w, tri.u, tri.v),
            )
        } else {
            (Vec3::ZERO, Vec3::ZERO)
        };

        let candidate = HitRecord {
            t: tri.t,
            point: Vec3::ZERO, // world point is filled in after traversal
            normal,
            geometric_normal: tri.normal,
            front_face: true,
            tangent,
            bitangent,
            uv,
            has_texcoord: geometry.has_texcoord,
            has_tangents: geometry.has_tangents,
            material: material_h,
            instance: h,
            primitive: prim,
        };

        if let Some(program) = &any_hit {
            match program.any_hit(tracer, ray, &candidate, payload) {
                AnyHitVerdict::IgnoreIntersection => return Visit::Miss,
                AnyHitVerdict::TerminateRay => return Visit::Terminate,
                AnyHitVerdict::Accept => {}
            }
        }

        let t_hit = candidate.t;
        *best = Some(candidate);
        Visit::Hit(t_hit)
    });
    sweep_to_visit(sweep, best)
}

fn buffer_int3(ctx: &Context, h: Option<crate::handle::BufferHandle>) -> &[[i32; 3]] {
    h.map(|h| ctx.buffer(h).as_int3().unwrap_or(&[]))
        .unwrap_or(&[])
}

fn buffer_float3(ctx: &Context, h: Option<crate::handle::BufferHandle>) -> &[[f32; 3]] {
    h.map(|h| ctx.buffer(h).as_float3().unwrap_or(&[]))
        .unwrap_or(&[])
}

fn buffer_float2(ctx: &Context, h: Option<crate::handle::BufferHandle>) -> &[[f32; 2]] {
    h.map(|h| ctx.buffer(h).as_float2().unwrap_or(&[]))
        .unwrap_or(&[])
}

fn interp3(values: &[[f32; 3]], i0: usize, i1: usize, i2: usize, w: f32, u: f32, v: f32) -> Vec3 {
    Vec3::from_array(values[i0]) * w
        + Vec3::from_array(values[i1]) * u
        + Vec3::from_array(values[i2]) * v
}

struct TriHit {
    t: f32,
    u: f32,
    v: f32,
    normal: Vec3,
}

/// Moller-Trumbore ray/triangle intersection.
fn intersect_triangle(
    positions: &[[f32; 3]],
    face: [i32; 3],
    ray: &Ray,
    ray_t: Interval,
) -> Option<TriHit> {
    let v0 = Vec3::from_array(positions[face[0] as usize]);
    let v1 = Vec3::from_array(positions[face[1] as usize]);
    let v2 = Vec3::from_array(positions[face[2] as usize]);

    let e1 = v1 - v0;
    let e2 = v2 - v0;
    let pvec = ray.direction.cross(e2);
    let det = e1.dot(pvec);
    if det.abs() < 1e-8 {
        return None;
    }
    let inv_det = 1.0 / det;
    let tvec = ray.origin - v0;
    let u = tvec.dot(pvec) * inv_det;
    if !(0.0..=1.0).contains(&u) {
        return None;
    }
    let qvec = tvec.cross(e1);
    let v = ray.direction.dot(qvec) * inv_det;
    if v < 0.0 || u + v > 1.0 {
        return None;
    }
    let t = e2.dot(qvec) * inv_det;
    if !ray_t.surrounds(t) {
        return None;
    }
    Some(TriHit {
        t,
        u,
        v,
        normal: e1.cross(e2),
    })
}
