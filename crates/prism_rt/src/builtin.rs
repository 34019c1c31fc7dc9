//! The built-in program module.
//!
//! These are the stock entries a session binds when the embedder does
//! not supply its own module: a pinhole camera, Phong shading with
//! shadow rays, sky/gradient miss programs, opaque shadow any-hit, and
//! a sentinel exception program. Entry names are the public contract;
//! `Context::create_program` resolves them at load time.

use std::sync::Arc;

use prism_math::{Ray, Vec3, Vec4};

use crate::program::{
    AnyHitProgram, AnyHitVerdict, ClosestHitProgram, ExceptionProgram, MissProgram, ProgramKind,
    ProgramModule, RayGenProgram,
};
use crate::trace::{HitRecord, LaunchCtx, RayPayload, Tracer};

/// Ambient fraction applied to the diffuse color.
const AMBIENT: f32 = 0.2;
/// Offset along the normal for shadow ray origins.
const SHADOW_BIAS: f32 = 1e-3;
/// Texel step for bump-map gradients.
const BUMP_DELTA: f32 = 1.0 / 256.0;

impl ProgramModule {
    /// The standard module; same as [`module`].
    pub fn builtin() -> ProgramModule {
        module()
    }
}

/// The standard module under the name `builtin`.
pub fn module() -> ProgramModule {
    let mut module = ProgramModule::new("builtin");
    module.register("pinhole_camera", ProgramKind::RayGen(Arc::new(PinholeCamera)));
    module.register("exception", ProgramKind::Exception(Arc::new(BadValueColor)));
    module.register("miss_radiance", ProgramKind::Miss(Arc::new(MissRadiance)));
    module.register("miss_shadow", ProgramKind::Miss(Arc::new(MissShadow)));
    module.register(
        "closest_hit_radiance",
        ProgramKind::ClosestHit(Arc::new(PhongRadiance)),
    );
    module.register("any_hit_shadow", ProgramKind::AnyHit(Arc::new(OpaqueShadow)));
    module.register(
        "any_hit_radiance",
        ProgramKind::AnyHit(Arc::new(PassThrough)),
    );
    module.register("boundingBoxMesh", ProgramKind::MeshBounds);
    module.register("intersectMesh", ProgramKind::MeshIntersect);
    module
}

/// Pinhole camera over the `eye`/`U`/`V`/`W` context variables.
///
/// U and V carry the half-screen extents (fov and aspect are baked into
/// their lengths by the session); W is the unit view direction.
pub struct PinholeCamera;

impl RayGenProgram for PinholeCamera {
    fn ray_gen(&self, launch: &LaunchCtx<'_>, x: u32, y: u32) -> Vec4 {
        let ctx = launch.context();
        let eye = ctx.float3_var("eye").unwrap_or(Vec3::ZERO);
        let u = ctx.float3_var("U").unwrap_or(Vec3::X);
        let v = ctx.float3_var("V").unwrap_or(Vec3::Y);
        let w = ctx.float3_var("W").unwrap_or(Vec3::NEG_Z);

        let px = (x as f32 + 0.5) / launch.width as f32 * 2.0 - 1.0;
        let py = (y as f32 + 0.5) / launch.height as f32 * 2.0 - 1.0;
        let direction = (px * u + py * v + w).normalize_or_zero();

        let ray_type = ctx.int_var("Phong").unwrap_or(1) as usize;
        let mut payload = RayPayload::radiance(0);
        launch.tracer().trace(&Ray::new(eye, direction), ray_type, &mut payload);
        payload.color()
    }
}

/// Phong shading with a shadow ray toward the directional light.
pub struct PhongRadiance;

impl ClosestHitProgram for PhongRadiance {
    fn closest_hit(
        &self,
        tracer: &Tracer<'_>,
        ray: &Ray,
        hit: &HitRecord,
        payload: &mut RayPayload,
    ) {
        let ctx = tracer.context();
        let material = ctx.material(hit.material);

        // Materials whose source referenced no maps carry only the flat
        // white fallbacks; skip sampling for them.
        let sample_maps = material.has_source_maps && hit.has_texcoord;
        let kd_map = match (sample_maps, material.map_kd) {
            (true, Some(map)) => ctx.sample_texture(map, hit.uv.x, hit.uv.y),
            _ => Vec4::ONE,
        };
        let ks_map = match (sample_maps, material.map_ks) {
            (true, Some(map)) => ctx.sample_texture(map, hit.uv.x, hit.uv.y),
            _ => Vec4::ONE,
        };
        let kd = material.diffuse * kd_map;
        let ks = material.specular * ks_map;

        let mut normal = hit.normal;
        if sample_maps && hit.has_tangents {
            if let Some(map) = material.map_bump {
                // Height-field gradient over the bump map.
                let gx = ctx.sample_texture(map, hit.uv.x + BUMP_DELTA, hit.uv.y).x
                    - ctx.sample_texture(map, hit.uv.x - BUMP_DELTA, hit.uv.y).x;
                let gy = ctx.sample_texture(map, hit.uv.x, hit.uv.y + BUMP_DELTA).x
                    - ctx.sample_texture(map, hit.uv.x, hit.uv.y - BUMP_DELTA).x;
                normal = (normal - gx * hit.tangent - gy * hit.bitangent).normalize_or_zero();
            }
        }

        let light_dir = ctx
            .float3_var("lightDir")
            .unwrap_or(Vec3::new(0.0, -1.0, 0.0))
            .normalize_or_zero();
        let to_light = -light_dir;

        let n_dot_l = normal.dot(to_light);
        let mut attenuation = 0.0;
        if n_dot_l > 0.0 {
            let shadow_type = ctx.int_var("Shadow").unwrap_or(0) as usize;
            let shadow_ray = Ray::new(hit.point + normal * SHADOW_BIAS, to_light);
            let mut shadow = RayPayload::shadow();
            tracer.trace(&shadow_ray, shadow_type, &mut shadow);
            attenuation = shadow.attenuation();
        }

        let mut color = kd * AMBIENT;
        if attenuation > 0.0 {
            color += kd * n_dot_l * attenuation;
            if material.shininess > 0.0 {
                let view = -ray.direction.normalize_or_zero();
                let reflected = 2.0 * normal.dot(to_light) * normal - to_light;
                let r_dot_v = reflected.dot(view).max(0.0);
                color += ks * r_dot_v.powf(material.shininess) * attenuation;
            }
        }

        if let RayPayload::Radiance { color: out, .. } = payload {
            *out = Vec4::new(color.x, color.y, color.z, 1.0);
        }
    }
}

/// Radiance miss: sample the `sky` texture by direction, or fall back to
/// a vertical gradient.
pub struct MissRadiance;

impl MissProgram for MissRadiance {
    fn miss(&self, tracer: &Tracer<'_>, ray: &Ray, payload: &mut RayPayload) {
        let ctx = tracer.context();
        let dir = ray.direction.normalize_or_zero();

        let color = match ctx.texture_var("sky") {
            Some(sky) => {
                // Equirectangular lookup.
                let u = 0.5 + dir.z.atan2(dir.x) / (2.0 * std::f32::consts::PI);
                let v = 0.5 - dir.y.clamp(-1.0, 1.0).asin() / std::f32::consts::PI;
                ctx.sample_texture(sky, u, v)
            }
            None => {
                let t = 0.5 * (dir.y + 1.0);
                let c = (1.0 - t) * Vec3::ONE + t * Vec3::new(0.5, 0.7, 1.0);
                Vec4::new(c.x, c.y, c.z, 1.0)
            }
        };
        if let RayPayload::Radiance { color: out, .. } = payload {
            *out = color;
        }
    }
}

/// Shadow miss: nothing blocked the ray, transmission stays at 1.
pub struct MissShadow;

impl MissProgram for MissShadow {
    fn miss(&self, _tracer: &Tracer<'_>, _ray: &Ray, _payload: &mut RayPayload) {}
}

/// Any hit for shadow rays: every surface is fully opaque, so the first
/// hit zeroes transmission and ends traversal.
pub struct OpaqueShadow;

impl AnyHitProgram for OpaqueShadow {
    fn any_hit(
        &self,
        _tracer: &Tracer<'_>,
        _ray: &Ray,
        _hit: &HitRecord,
        payload: &mut RayPayload,
    ) -> AnyHitVerdict {
        if let RayPayload::Shadow { attenuation } = payload {
            *attenuation = 0.0;
        }
        AnyHitVerdict::TerminateRay
    }
}

/// Any hit for radiance rays: accept everything.
pub struct PassThrough;

impl AnyHitProgram for PassThrough {
    fn any_hit(
        &self,
        _tracer: &Tracer<'_>,
        _ray: &Ray,
        _hit: &HitRecord,
        _payload: &mut RayPayload,
    ) -> AnyHitVerdict {
        AnyHitVerdict::Accept
    }
}

/// Exception: paint the pixel an unmistakable sentinel color.
pub struct BadValueColor;

impl ExceptionProgram for BadValueColor {
    fn exception(&self, _x: u32, _y: u32) -> Vec4 {
        Vec4::new(1.0, 0.0, 1.0, 1.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::Context;

    #[test]
    fn test_module_has_all_entries() {
        let module = module();
        for name in [
            "pinhole_camera",
            "exception",
            "miss_radiance",
            "miss_shadow",
            "closest_hit_radiance",
            "any_hit_shadow",
            "any_hit_radiance",
            "boundingBoxMesh",
            "intersectMesh",
        ] {
            assert!(module.entry(name).is_ok(), "missing entry {name}");
        }
        assert!(module.entry("no_such_entry").is_err());
    }

    #[test]
    fn test_gradient_miss_without_sky() {
        let ctx = Context::new();
        let tracer = Tracer { ctx: &ctx };
        let mut payload = RayPayload::radiance(0);
        MissRadiance.miss(&tracer, &Ray::new(Vec3::ZERO, Vec3::Y), &mut payload);
        // Straight up hits the blue end of the gradient.
        let c = payload.color();
        assert!((c.x - 0.5).abs() < 1e-5);
        assert!((c.z - 1.0).abs() < 1e-5);
    }

    #[test]
    fn test_untextured_material_skips_map_sampling() {
        use crate::buffer::{Buffer, BufferData};
        use crate::context::Variable;
        use crate::texture::{ChannelMode, TextureConfig, TextureSampler};

        let mut ctx = Context::new();
        ctx.set_variable("lightDir", Variable::Float3(Vec3::NEG_Z));

        // A black stand-in where the compiler would bind the white
        // fallback.
        let black = ctx.create_buffer(Buffer::from_data_2d(
            BufferData::UByte4(vec![[0, 0, 0, 255]]),
            1,
            1,
        ));
        let mut sampler = TextureSampler::new(ChannelMode::Rgba, &TextureConfig::default());
        sampler.mip_levels.push(black);
        let tex = ctx.create_texture_sampler(sampler);

        let material = ctx.create_material("plain");
        {
            let m = ctx.material_mut(material);
            m.diffuse = Vec4::ONE;
            m.map_kd = Some(tex);
            m.map_ks = Some(tex);
        }

        let mut hit = dummy_hit();
        hit.material = material;
        hit.has_texcoord = true;

        let tracer = Tracer { ctx: &ctx };
        let mut payload = RayPayload::radiance(0);
        PhongRadiance.closest_hit(&tracer, &Ray::new(Vec3::Z, Vec3::NEG_Z), &hit, &mut payload);

        // Without source maps the bound texture is never sampled: the
        // diffuse color passes through at full strength (ambient + lit).
        let c = payload.color();
        assert!(c.x > 1.0, "expected unmodulated diffuse, got {c:?}");
    }

    #[test]
    fn test_opaque_shadow_terminates() {
        let ctx = Context::new();
        let tracer = Tracer { ctx: &ctx };
        let mut payload = RayPayload::shadow();
        let hit = dummy_hit();
        let verdict = OpaqueShadow.any_hit(&tracer, &Ray::new(Vec3::ZERO, Vec3::X), &hit, &mut payload);
        assert_eq!(verdict, AnyHitVerdict::TerminateRay);
        assert_eq!(payload.attenuation(), 0.0);
    }

    fn dummy_hit() -> HitRecord {
        HitRecord {
            t: 1.0,
            point: Vec3::ZERO,
            normal: Vec3::Z,
            geometric_normal: Vec3::Z,
            front_face: true,
            tangent: Vec3::X,
            bitangent: Vec3::Y,
            uv: prism_math::Vec2::ZERO,
            has_texcoord: false,
            has_tangents: false,
            material: crate::handle::MaterialHandle(0),
            instance: crate::handle::GeometryInstanceHandle(0),
            primitive: 0,
        }
    }
}
