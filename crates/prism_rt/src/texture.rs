//! Texture samplers and image loading.
//!
//! Textures are loaded through one chokepoint with two failure policies:
//! substitute a 1x1 opaque-white texture (material maps, so shading math
//! can multiply by the map unconditionally) or fail the load (explicit
//! lookups like the sky dome). Either way a material texture slot never
//! ends up unset.

use std::path::Path;

use prism_math::Vec4;

use crate::buffer::{Buffer, BufferData};
use crate::context::Context;
use crate::error::{RtError, RtResult};
use crate::handle::{BufferHandle, TextureHandle};

/// Mip levels generated per texture when none are baked in.
pub const DEFAULT_MIP_LEVELS: usize = 1;
/// Anisotropy hint stored on every sampler.
pub const DEFAULT_MAX_ANISOTROPY: f32 = 16.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WrapMode {
    Repeat,
    ClampToEdge,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterMode {
    Nearest,
    Linear,
    None,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadMode {
    NormalizedFloat,
    ElementType,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexMode {
    NormalizedCoordinates,
    ArrayIndex,
}

/// Channel layout requested from the loader.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelMode {
    /// Four channels, ubyte4 texels (color maps).
    Rgba,
    /// Single channel, ubyte texels (bump/height maps).
    Luminance,
}

/// What to do when an image file cannot be read or decoded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TexturePolicy {
    /// Warn and substitute the 1x1 opaque-white texture.
    FallbackWhite,
    /// Propagate the failure to the caller.
    Fatal,
}

/// Loader knobs, normally taken from the session config.
#[derive(Debug, Clone)]
pub struct TextureConfig {
    /// Mip levels to generate (>= 1; level 0 is full resolution).
    pub mip_levels: usize,
    pub max_anisotropy: f32,
}

impl Default for TextureConfig {
    fn default() -> Self {
        Self {
            mip_levels: DEFAULT_MIP_LEVELS,
            max_anisotropy: DEFAULT_MAX_ANISOTROPY,
        }
    }
}

/// Sampler state plus the texel buffers of its mip chain.
#[derive(Debug, Clone)]
pub struct TextureSampler {
    pub channels: ChannelMode,
    pub wrap: [WrapMode; 2],
    /// (minification, magnification, mipmapping)
    pub filtering: (FilterMode, FilterMode, FilterMode),
    pub read_mode: ReadMode,
    pub index_mode: IndexMode,
    pub max_anisotropy: f32,
    pub(crate) mip_levels: Vec<BufferHandle>,
    pub(crate) validated: bool,
}

impl TextureSampler {
    pub(crate) fn new(channels: ChannelMode, config: &TextureConfig) -> Self {
        Self {
            channels,
            wrap: [WrapMode::Repeat; 2],
            filtering: (FilterMode::Linear, FilterMode::Linear, FilterMode::None),
            read_mode: ReadMode::NormalizedFloat,
            index_mode: IndexMode::NormalizedCoordinates,
            max_anisotropy: config.max_anisotropy,
            mip_levels: Vec::new(),
            validated: false,
        }
    }

    pub fn mip_level_count(&self) -> usize {
        self.mip_levels.len()
    }
}

/// Load an image file into a validated texture sampler.
///
/// `file` is resolved against `base_dir`. An empty file name always
/// yields the fallback texture regardless of policy.
pub fn load_texture(
    ctx: &mut Context,
    base_dir: &Path,
    file: &str,
    channels: ChannelMode,
    policy: TexturePolicy,
    config: &TextureConfig,
) -> RtResult<TextureHandle> {
    if file.is_empty() {
        return fallback_texture(ctx, channels, config);
    }

    let path = base_dir.join(file);
    let img = match image::open(&path) {
        Ok(img) => img,
        Err(err) => match policy {
            TexturePolicy::Fatal => {
                return Err(RtError::TextureLoad {
                    path: path.display().to_string(),
                    reason: err.to_string(),
                })
            }
            TexturePolicy::FallbackWhite => {
                log::warn!(
                    "texture `{}` failed to load ({}), using white fallback",
                    path.display(),
                    err
                );
                return fallback_texture(ctx, channels, config);
            }
        },
    };

    log::debug!(
        "loaded texture `{}`: {}x{}, {:?}, {} mip level(s)",
        path.display(),
        img.width(),
        img.height(),
        channels,
        config.mip_levels.max(1)
    );

    let mut sampler = TextureSampler::new(channels, config);
    for level in 0..config.mip_levels.max(1) {
        let w = (img.width() >> level).max(1);
        let h = (img.height() >> level).max(1);
        let scaled = if level == 0 {
            img.clone()
        } else {
            img.resize_exact(w, h, image::imageops::FilterType::Triangle)
        };
        sampler.mip_levels.push(upload_level(ctx, &scaled, channels)?);
    }

    finish_sampler(ctx, sampler)
}

/// The 1x1 opaque-white substitute texture.
pub fn fallback_texture(
    ctx: &mut Context,
    channels: ChannelMode,
    config: &TextureConfig,
) -> RtResult<TextureHandle> {
    let data = match channels {
        ChannelMode::Rgba => BufferData::UByte4(vec![[255, 255, 255, 255]]),
        ChannelMode::Luminance => BufferData::UByte(vec![255]),
    };
    let buffer = ctx.create_buffer(Buffer::from_data_2d(data, 1, 1));
    ctx.validate_buffer(buffer)?;

    let mut sampler = TextureSampler::new(channels, config);
    sampler.mip_levels.push(buffer);
    finish_sampler(ctx, sampler)
}

fn upload_level(
    ctx: &mut Context,
    img: &image::DynamicImage,
    channels: ChannelMode,
) -> RtResult<BufferHandle> {
    let (w, h) = (img.width() as usize, img.height() as usize);
    let data = match channels {
        ChannelMode::Rgba => {
            let raw = img.to_rgba8().into_raw();
            BufferData::UByte4(bytemuck::cast_slice(&raw).to_vec())
        }
        ChannelMode::Luminance => BufferData::UByte(img.to_luma8().into_raw()),
    };
    let buffer = ctx.create_buffer(Buffer::from_data_2d(data, w, h));
    ctx.validate_buffer(buffer)?;
    Ok(buffer)
}

fn finish_sampler(ctx: &mut Context, sampler: TextureSampler) -> RtResult<TextureHandle> {
    let handle = ctx.create_texture_sampler(sampler);
    ctx.validate_texture(handle)?;
    Ok(handle)
}

impl Context {
    /// Bilinear sample of mip level 0 as normalized float RGBA.
    ///
    /// Luminance texels are replicated across RGB with alpha 1.
    pub fn sample_texture(&self, handle: TextureHandle, u: f32, v: f32) -> Vec4 {
        let sampler = self.texture(handle);
        let Some(&level0) = sampler.mip_levels.first() else {
            return Vec4::ONE;
        };
        let buf = self.buffer(level0);
        let (w, h) = (buf.width as i64, buf.height as i64);
        if w == 0 || h == 0 {
            return Vec4::ONE;
        }

        let x = u * w as f32 - 0.5;
        let y = v * h as f32 - 0.5;
        let x0 = x.floor();
        let y0 = y.floor();
        let fx = x - x0;
        let fy = y - y0;

        let fetch = |xi: i64, yi: i64| -> Vec4 {
            let xi = wrap_index(xi, w, sampler.wrap[0]);
            let yi = wrap_index(yi, h, sampler.wrap[1]);
            texel(buf, (yi * w + xi) as usize)
        };

        let c00 = fetch(x0 as i64, y0 as i64);
        let c10 = fetch(x0 as i64 + 1, y0 as i64);
        let c01 = fetch(x0 as i64, y0 as i64 + 1);
        let c11 = fetch(x0 as i64 + 1, y0 as i64 + 1);

        let top = c00 * (1.0 - fx) + c10 * fx;
        let bottom = c01 * (1.0 - fx) + c11 * fx;
        top * (1.0 - fy) + bottom * fy
    }
}

fn wrap_index(i: i64, size: i64, mode: WrapMode) -> i64 {
    match mode {
        WrapMode::Repeat => i.rem_euclid(size),
        WrapMode::ClampToEdge => i.clamp(0, size - 1),
    }
}

fn texel(buf: &Buffer, idx: usize) -> Vec4 {
    match &buf.data {
        BufferData::UByte4(texels) => {
            let [r, g, b, a] = texels[idx];
            Vec4::new(r as f32, g as f32, b as f32, a as f32) / 255.0
        }
        BufferData::UByte(texels) => {
            let l = texels[idx] as f32 / 255.0;
            Vec4::new(l, l, l, 1.0)
        }
        _ => Vec4::ONE,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fallback_is_single_white_texel() {
        let mut ctx = Context::new();
        let cfg = TextureConfig::default();
        let tex = fallback_texture(&mut ctx, ChannelMode::Rgba, &cfg).unwrap();

        let sampler = ctx.texture(tex);
        assert_eq!(sampler.mip_level_count(), 1);
        let buf = ctx.buffer(sampler.mip_levels[0]);
        assert_eq!((buf.width, buf.height), (1, 1));
        assert_eq!(buf.as_ubyte4().unwrap()[0], [255, 255, 255, 255]);

        let c = ctx.sample_texture(tex, 0.3, 0.8);
        assert_eq!(c, Vec4::ONE);
    }

    #[test]
    fn test_missing_file_policies() {
        let _ = env_logger::builder().is_test(true).try_init();
        let mut ctx = Context::new();
        let cfg = TextureConfig::default();

        let fatal = load_texture(
            &mut ctx,
            Path::new("/nonexistent"),
            "missing.png",
            ChannelMode::Rgba,
            TexturePolicy::Fatal,
            &cfg,
        );
        assert!(matches!(fatal, Err(RtError::TextureLoad { .. })));

        let tex = load_texture(
            &mut ctx,
            Path::new("/nonexistent"),
            "missing.png",
            ChannelMode::Luminance,
            TexturePolicy::FallbackWhite,
            &cfg,
        )
        .unwrap();
        assert_eq!(ctx.texture(tex).mip_level_count(), 1);
        assert_eq!(ctx.sample_texture(tex, 0.5, 0.5), Vec4::ONE);

        let rgba = load_texture(
            &mut ctx,
            Path::new("/nonexistent"),
            "missing.png",
            ChannelMode::Rgba,
            TexturePolicy::FallbackWhite,
            &cfg,
        )
        .unwrap();
        let sampler = ctx.texture(rgba);
        assert_eq!(sampler.mip_level_count(), 1);
        let buf = ctx.buffer(sampler.mip_levels[0]);
        assert_eq!(buf.as_ubyte4().unwrap(), &[[255, 255, 255, 255]]);
    }

    #[test]
    fn test_empty_name_yields_fallback() {
        let mut ctx = Context::new();
        let cfg = TextureConfig::default();
        let tex = load_texture(
            &mut ctx,
            Path::new("."),
            "",
            ChannelMode::Rgba,
            TexturePolicy::Fatal,
            &cfg,
        )
        .unwrap();
        assert_eq!(ctx.sample_texture(tex, 0.0, 0.0), Vec4::ONE);
    }

    #[test]
    fn test_bilinear_blends_between_texels() {
        let mut ctx = Context::new();
        // 2x1 texture: black then white.
        let buf = ctx.create_buffer(Buffer::from_data_2d(
            BufferData::UByte4(vec![[0, 0, 0, 255], [255, 255, 255, 255]]),
            2,
            1,
        ));
        ctx.validate_buffer(buf).unwrap();
        let mut sampler = TextureSampler::new(ChannelMode::Rgba, &TextureConfig::default());
        sampler.wrap = [WrapMode::ClampToEdge; 2];
        sampler.mip_levels.push(buf);
        let tex = ctx.create_texture_sampler(sampler);
        ctx.validate_texture(tex).unwrap();

        let mid = ctx.sample_texture(tex, 0.5, 0.5);
        assert!((mid.x - 0.5).abs() < 1e-3);
        let left = ctx.sample_texture(tex, 0.0, 0.5);
        assert!(left.x < 0.01);
    }
}
