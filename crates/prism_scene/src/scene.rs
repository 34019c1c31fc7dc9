use std::path::PathBuf;

use crate::{MaterialDef, MeshData, SceneNode};

/// A complete imported scene: materials, meshes, and the node hierarchy.
///
/// The asset is loaded once and treated as immutable by the compiler; the
/// render context keeps the compiled resources, not the asset.
#[derive(Clone, Debug)]
pub struct SceneAsset {
    /// Scene name (usually the file stem).
    pub name: String,

    /// Directory texture paths are resolved against.
    pub base_dir: PathBuf,

    pub materials: Vec<MaterialDef>,
    pub meshes: Vec<MeshData>,
    pub root: SceneNode,
}

impl SceneAsset {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            base_dir: PathBuf::new(),
            materials: Vec::new(),
            meshes: Vec::new(),
            root: SceneNode::new("root"),
        }
    }

    pub fn material_count(&self) -> usize {
        self.materials.len()
    }

    pub fn mesh_count(&self) -> usize {
        self.meshes.len()
    }

    /// Total triangles across all meshes.
    pub fn triangle_count(&self) -> usize {
        self.meshes.iter().map(MeshData::face_count).sum()
    }
}
