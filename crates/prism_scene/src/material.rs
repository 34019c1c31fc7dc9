use prism_math::Vec4;

/// A scene material definition as imported from the asset file.
///
/// Color and shininess queries on the source format can come back empty;
/// those channels are carried as `None` and compile to the device default
/// of zero. Texture references are file paths relative to the scene's
/// base directory.
#[derive(Clone, Debug, Default)]
pub struct MaterialDef {
    /// Material display name. Used as the key for the program-override
    /// API; the compiler joins mesh to material by integer index.
    pub name: String,

    /// Diffuse color (RGBA).
    pub diffuse: Option<Vec4>,

    /// Specular color (RGBA).
    pub specular: Option<Vec4>,

    /// Phong exponent.
    pub shininess: Option<f32>,

    /// Diffuse texture file, relative to the scene base directory.
    pub diffuse_texture: Option<String>,

    /// Specular texture file.
    pub specular_texture: Option<String>,

    /// Bump/height texture file (single channel).
    pub bump_texture: Option<String>,
}

impl MaterialDef {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    /// True if any texture channel is referenced.
    pub fn has_textures(&self) -> bool {
        self.diffuse_texture.is_some()
            || self.specular_texture.is_some()
            || self.bump_texture.is_some()
    }
}
