//! Headless renderer: load an OBJ scene, render one frame, write a PNG.
//!
//! Usage: prism_render <scene.obj> [output.png] [--size WxH] [--sky FILE]

use anyhow::{bail, Context as _, Result};
use prism_math::Vec3;
use prism_rt::session::{CameraState, RenderSession, SessionOptions};
use prism_rt::builtin;

struct Args {
    scene: String,
    output: String,
    width: u32,
    height: u32,
    sky: Option<String>,
}

fn parse_args() -> Result<Args> {
    let mut args = std::env::args().skip(1);
    let mut scene = None;
    let mut output = None;
    let mut width = 720;
    let mut height = 720;
    let mut sky = None;

    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--size" => {
                let value = args.next().context("--size needs WxH")?;
                let (w, h) = value
                    .split_once('x')
                    .context("--size format is WxH, e.g. 1280x720")?;
                width = w.parse().context("bad width")?;
                height = h.parse().context("bad height")?;
            }
            "--sky" => sky = Some(args.next().context("--sky needs a file")?),
            _ if scene.is_none() => scene = Some(arg),
            _ if output.is_none() => output = Some(arg),
            _ => bail!("unexpected argument `{arg}`"),
        }
    }

    let Some(scene) = scene else {
        bail!("usage: prism_render <scene.obj> [output.png] [--size WxH] [--sky FILE]");
    };
    Ok(Args {
        scene,
        output: output.unwrap_or_else(|| "render.png".to_string()),
        width,
        height,
        sky,
    })
}

fn main() -> Result<()> {
    env_logger::init();
    let args = parse_args()?;

    let scene = prism_scene::load_obj(&args.scene)
        .with_context(|| format!("loading scene {}", args.scene))?;

    // Frame the scene along +Z using the mesh bounds.
    let (center, radius) = scene_framing(&scene);
    let camera = CameraState {
        eye: center + Vec3::new(0.0, 0.0, radius * 2.5),
        look_dir: Vec3::NEG_Z,
        ..CameraState::default()
    };

    let options = SessionOptions {
        width: args.width,
        height: args.height,
        sky_texture: args.sky,
        camera,
        ..SessionOptions::default()
    };
    let mut session =
        RenderSession::build(&scene, &builtin::module(), options).context("building session")?;

    let start = std::time::Instant::now();
    session.render().context("rendering")?;
    log::info!(
        "rendered {}x{} in {:.2?}",
        args.width,
        args.height,
        start.elapsed()
    );

    save_png(&session, &args.output)?;
    log::info!("wrote {}", args.output);
    Ok(())
}

/// Rough scene bounds from the raw mesh positions.
fn scene_framing(scene: &prism_scene::SceneAsset) -> (Vec3, f32) {
    let mut lo = Vec3::splat(f32::INFINITY);
    let mut hi = Vec3::splat(f32::NEG_INFINITY);
    for mesh in &scene.meshes {
        for &p in &mesh.positions {
            lo = lo.min(p);
            hi = hi.max(p);
        }
    }
    if lo.x > hi.x {
        return (Vec3::ZERO, 1.0);
    }
    ((lo + hi) * 0.5, ((hi - lo).length() * 0.5).max(1e-3))
}

fn save_png(session: &RenderSession, path: &str) -> Result<()> {
    let fb = session.framebuffer();
    let (w, h) = (fb.width(), fb.height());

    let mut img = image::RgbaImage::new(w, h);
    for y in 0..h {
        for x in 0..w {
            let c = fb.pixel(x, y);
            // Launch row 0 is the bottom of the frame.
            img.put_pixel(x, h - 1 - y, image::Rgba(to_rgba8(c)));
        }
    }
    img.save(path).with_context(|| format!("writing {path}"))?;
    Ok(())
}

/// Gamma-correct and quantize one pixel.
fn to_rgba8(c: [f32; 4]) -> [u8; 4] {
    let q = |v: f32| (linear_to_gamma(v).clamp(0.0, 1.0) * 255.0) as u8;
    [q(c[0]), q(c[1]), q(c[2]), (c[3].clamp(0.0, 1.0) * 255.0) as u8]
}

fn linear_to_gamma(v: f32) -> f32 {
    if v > 0.0 {
        v.sqrt()
    } else {
        0.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_to_rgba8_gamma() {
        assert_eq!(to_rgba8([0.0, 0.0, 0.0, 1.0]), [0, 0, 0, 255]);
        assert_eq!(to_rgba8([1.0, 1.0, 1.0, 1.0]), [255, 255, 255, 255]);
        // 0.25 linear -> 0.5 gamma.
        let px = to_rgba8([0.25, 0.0, 0.0, 1.0]);
        assert_eq!(px[0], 127);
    }
}
