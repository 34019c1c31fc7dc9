//! Render sessions: one context wired for interactive rendering.
//!
//! A session owns the context, binds the standard pipeline (two ray
//! types, pinhole camera entry, miss and exception programs, the
//! directional light), compiles the scene, and exposes camera movement
//! in view-relative steps.

use prism_math::Vec3;

use crate::compile::{compile_scene, CompileOptions, CompiledScene};
use crate::context::{Context, OutputMap, Variable};
use crate::error::RtResult;
use crate::program::{ProgramModule, RAY_TYPE_RADIANCE, RAY_TYPE_SHADOW};
use crate::texture::{load_texture, ChannelMode, TextureConfig, TexturePolicy};

/// World units moved per step along the view direction.
pub const MOVE_STEP: f32 = 2.0;
/// View-direction nudge per turn step.
pub const TURN_STEP: f32 = 0.1;

/// Eye, view direction, and field of view.
#[derive(Debug, Clone, Copy)]
pub struct CameraState {
    pub eye: Vec3,
    pub look_dir: Vec3,
    pub up: Vec3,
    /// Vertical field of view in radians.
    pub fov: f32,
}

impl Default for CameraState {
    fn default() -> Self {
        Self {
            eye: Vec3::ZERO,
            look_dir: Vec3::NEG_Z,
            up: Vec3::Y,
            fov: 60f32.to_radians(),
        }
    }
}

impl CameraState {
    /// Orthonormal camera frame: (right, up, forward).
    ///
    /// Derived as right = up x -look, up = -look x right, so a slightly
    /// off-axis `up` still yields an orthogonal frame.
    pub fn basis(&self) -> (Vec3, Vec3, Vec3) {
        let w = self.look_dir.normalize_or_zero();
        let right = self.up.cross(-w).normalize_or_zero();
        let up = (-w).cross(right);
        (right, up, w)
    }
}

/// Session construction knobs.
#[derive(Debug, Clone)]
pub struct SessionOptions {
    pub width: u32,
    pub height: u32,
    /// Direction the light travels (from the light into the scene).
    pub light_dir: Vec3,
    /// Optional equirectangular sky image, resolved against the scene's
    /// base directory. Load failures here are fatal.
    pub sky_texture: Option<String>,
    pub texture: TextureConfig,
    pub camera: CameraState,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            width: 720,
            height: 720,
            light_dir: Vec3::new(-0.5, -5.0, -1.0),
            sky_texture: None,
            texture: TextureConfig::default(),
            camera: CameraState::default(),
        }
    }
}

/// A context compiled and wired for rendering one scene.
#[derive(Debug)]
pub struct RenderSession {
    ctx: Context,
    camera: CameraState,
    compiled: CompiledScene,
    entry: usize,
}

impl RenderSession {
    /// Compile `scene` into a fresh context and bind the full pipeline.
    pub fn build(
        scene: &prism_scene::SceneAsset,
        module: &ProgramModule,
        options: SessionOptions,
    ) -> RtResult<Self> {
        let mut ctx = Context::new();
        ctx.set_ray_type_count(2);
        // Ray type ids under their traditional names; the built-in
        // programs read these.
        ctx.set_variable("Shadow", Variable::Int(RAY_TYPE_SHADOW as i32));
        ctx.set_variable("Phong", Variable::Int(RAY_TYPE_RADIANCE as i32));

        let compiled = compile_scene(
            &mut ctx,
            scene,
            module,
            &CompileOptions {
                texture: options.texture.clone(),
            },
        )?;

        let miss_radiance = ctx.create_program(module, "miss_radiance")?;
        ctx.set_miss_program(RAY_TYPE_RADIANCE, miss_radiance)?;
        let miss_shadow = ctx.create_program(module, "miss_shadow")?;
        ctx.set_miss_program(RAY_TYPE_SHADOW, miss_shadow)?;

        ctx.set_entry_point_count(1);
        let camera_program = ctx.create_program(module, "pinhole_camera")?;
        ctx.set_ray_generation_program(0, camera_program)?;
        let exception = ctx.create_program(module, "exception")?;
        ctx.set_exception_program(0, exception)?;

        ctx.set_variable(
            "lightDir",
            Variable::Float3(options.light_dir.normalize_or_zero()),
        );
        if let Some(sky) = &options.sky_texture {
            let tex = load_texture(
                &mut ctx,
                &scene.base_dir,
                sky,
                ChannelMode::Rgba,
                TexturePolicy::Fatal,
                &options.texture,
            )?;
            ctx.set_variable("sky", Variable::Texture(tex));
        }

        ctx.set_output_size(options.width, options.height);

        let mut session = Self {
            ctx,
            camera: options.camera,
            compiled,
            entry: 0,
        };
        session.apply_camera();
        session.ctx.validate()?;
        Ok(session)
    }

    pub fn context(&self) -> &Context {
        &self.ctx
    }

    pub fn context_mut(&mut self) -> &mut Context {
        &mut self.ctx
    }

    pub fn compiled(&self) -> &CompiledScene {
        &self.compiled
    }

    pub fn camera(&self) -> &CameraState {
        &self.camera
    }

    pub fn set_camera(&mut self, camera: CameraState) {
        self.camera = camera;
        self.apply_camera();
    }

    pub fn set_output_size(&mut self, width: u32, height: u32) {
        self.ctx.set_output_size(width, height);
        // Aspect is baked into the camera frame.
        self.apply_camera();
    }

    /// Dolly along the view direction (positive = forward).
    pub fn move_along_view(&mut self, steps: f32) {
        let (_, _, w) = self.camera.basis();
        self.camera.eye += w * MOVE_STEP * steps;
        self.apply_camera();
    }

    /// Turn left/right (positive = right).
    pub fn yaw(&mut self, steps: f32) {
        let (right, _, w) = self.camera.basis();
        self.camera.look_dir = (w + right * TURN_STEP * steps).normalize_or_zero();
        self.apply_camera();
    }

    /// Turn up/down (positive = up).
    pub fn pitch(&mut self, steps: f32) {
        let (_, up, w) = self.camera.basis();
        self.camera.look_dir = (w + up * TURN_STEP * steps).normalize_or_zero();
        self.apply_camera();
    }

    /// Render one frame into the output buffer.
    pub fn render(&mut self) -> RtResult<()> {
        self.ctx.launch(self.entry)
    }

    /// Map the rendered image. See [`OutputMap`].
    pub fn framebuffer(&self) -> OutputMap<'_> {
        self.ctx.map_output_buffer()
    }

    fn apply_camera(&mut self) {
        let (width, height) = self.ctx.output_size();
        let aspect = if height > 0 {
            width as f32 / height as f32
        } else {
            1.0
        };
        let (right, up, w) = self.camera.basis();
        let vlen = (0.5 * self.camera.fov).tan();
        let ulen = vlen * aspect;

        self.ctx.set_variable("eye", Variable::Float3(self.camera.eye));
        self.ctx.set_variable("U", Variable::Float3(right * ulen));
        self.ctx.set_variable("V", Variable::Float3(up * vlen));
        self.ctx.set_variable("W", Variable::Float3(w));
        self.ctx.set_variable("fov", Variable::Float(self.camera.fov));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builtin;
    use prism_math::Vec3;
    use prism_scene::{MaterialDef, MeshData, SceneAsset};

    fn quad_scene() -> SceneAsset {
        let mut scene = SceneAsset::new("quad");
        scene.materials.push(MaterialDef::new("default"));
        scene.meshes.push(MeshData {
            name: "quad".to_string(),
            positions: vec![
                Vec3::new(0.0, 0.0, 0.0),
                Vec3::new(1.0, 0.0, 0.0),
                Vec3::new(1.0, 1.0, 0.0),
                Vec3::new(0.0, 1.0, 0.0),
            ],
            normals: vec![Vec3::Z; 4],
            tangents: None,
            uvs: None,
            faces: vec![[0, 1, 2], [0, 2, 3]],
            material_index: 0,
        });
        scene.root.meshes.push(0);
        scene
    }

    fn quad_session() -> RenderSession {
        let options = SessionOptions {
            width: 9,
            height: 9,
            camera: CameraState {
                eye: Vec3::new(0.5, 0.5, 3.0),
                ..CameraState::default()
            },
            ..SessionOptions::default()
        };
        RenderSession::build(&quad_scene(), &builtin::module(), options).unwrap()
    }

    #[test]
    fn test_camera_basis_is_orthonormal() {
        let camera = CameraState::default();
        let (right, up, w) = camera.basis();
        assert!((right - Vec3::X).length() < 1e-6);
        assert!((up - Vec3::Y).length() < 1e-6);
        assert!((w - Vec3::NEG_Z).length() < 1e-6);
        assert!(right.dot(up).abs() < 1e-6);
        assert!(right.dot(w).abs() < 1e-6);
    }

    #[test]
    fn test_render_hits_center_misses_corner() {
        let mut session = quad_session();
        session.render().unwrap();
        let fb = session.framebuffer();

        // Center ray hits the quad; the default material has zero Phong
        // constants, so the pixel is near-black with full alpha.
        let center = fb.pixel(4, 4);
        assert!(center[0] < 0.05 && center[1] < 0.05 && center[2] < 0.05);
        assert_eq!(center[3], 1.0);

        // Corner ray escapes into the gradient sky.
        let corner = fb.pixel(0, 0);
        assert!(corner[2] > 0.3, "expected sky blue, got {corner:?}");
        assert!(corner[2] > center[2]);
    }

    #[test]
    fn test_movement_updates_camera_variables() {
        let mut session = quad_session();
        let eye0 = session.context().float3_var("eye").unwrap();
        session.move_along_view(1.0);
        let eye1 = session.context().float3_var("eye").unwrap();
        assert!(((eye1 - eye0).length() - MOVE_STEP).abs() < 1e-5);

        let w0 = session.context().float3_var("W").unwrap();
        session.yaw(1.0);
        let w1 = session.context().float3_var("W").unwrap();
        assert!((w1 - w0).length() > 1e-3);
        assert!((w1.length() - 1.0).abs() < 1e-5);
    }

    #[test]
    fn test_missing_sky_texture_is_fatal() {
        let options = SessionOptions {
            sky_texture: Some("no_such_sky.png".to_string()),
            ..SessionOptions::default()
        };
        let err = RenderSession::build(&quad_scene(), &builtin::module(), options).unwrap_err();
        assert!(matches!(err, crate::error::RtError::TextureLoad { .. }));
    }
}
