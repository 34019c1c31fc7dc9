//! Wavefront OBJ import.
//!
//! Loads an OBJ file (plus its MTL library) into a [`SceneAsset`]. The
//! load options mirror a quality-oriented import preset: faces are
//! triangulated and attributes re-indexed to a single index per vertex.
//! The model graph is kept as-is (one node per OBJ model under an
//! identity root); vertices are never pre-transformed, so the scene-graph
//! compiler sees the full hierarchy.

use std::path::Path;

use prism_math::{Vec3, Vec4};
use thiserror::Error;

use crate::{MaterialDef, MeshData, SceneAsset, SceneNode};

/// Errors that can occur while importing a scene file.
#[derive(Error, Debug)]
pub enum LoadError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("OBJ parse error: {0}")]
    Obj(#[from] tobj::LoadError),

    #[error("no geometry found in {0}")]
    NoGeometry(String),

    #[error("mesh `{mesh}` attribute count mismatch: {what} has {actual} entries for {expected} vertices")]
    AttributeMismatch {
        mesh: String,
        what: &'static str,
        expected: usize,
        actual: usize,
    },
}

pub type LoadResult<T> = Result<T, LoadError>;

/// Load an OBJ scene from `path`.
///
/// Scene-file or MTL-library failures are fatal; missing per-mesh
/// attributes (normals, UVs) are not. Meshes without a material
/// reference are assigned a default material appended to the list.
pub fn load_obj<P: AsRef<Path>>(path: P) -> LoadResult<SceneAsset> {
    let path = path.as_ref();
    let name = path
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("unnamed")
        .to_string();

    let (models, materials) = tobj::load_obj(path, &tobj::GPU_LOAD_OPTIONS)?;
    let materials = materials?;

    if models.is_empty() {
        return Err(LoadError::NoGeometry(path.display().to_string()));
    }

    let mut scene = SceneAsset::new(name);
    scene.base_dir = path.parent().map(Path::to_path_buf).unwrap_or_default();

    for mat in &materials {
        scene.materials.push(convert_material(mat));
    }

    // Default material for meshes without a usemtl statement, appended
    // lazily so well-formed files keep their native material indices.
    let mut default_material: Option<usize> = None;

    let mut root = SceneNode::new("root");
    for (i, model) in models.iter().enumerate() {
        let material_index = match model.mesh.material_id {
            Some(id) => id,
            None => *default_material.get_or_insert_with(|| {
                let id = scene.materials.len();
                scene.materials.push(MaterialDef::new("default"));
                log::warn!("model `{}` has no material, using default", model.name);
                id
            }),
        };

        let mesh = convert_mesh(model, material_index)?;
        log::debug!(
            "imported mesh `{}`: {} vertices, {} faces, uvs={}, material {}",
            mesh.name,
            mesh.vertex_count(),
            mesh.face_count(),
            mesh.has_uvs(),
            material_index
        );

        scene.meshes.push(mesh);
        let node = SceneNode::new(model.name.clone()).with_meshes(vec![i]);
        root.children.push(node);
    }
    scene.root = root;

    log::info!(
        "loaded scene `{}`: {} materials, {} meshes, {} triangles",
        scene.name,
        scene.material_count(),
        scene.mesh_count(),
        scene.triangle_count()
    );

    Ok(scene)
}

fn convert_material(mat: &tobj::Material) -> MaterialDef {
    MaterialDef {
        name: mat.name.clone(),
        diffuse: mat.diffuse.map(|c| Vec4::new(c[0], c[1], c[2], 1.0)),
        specular: mat.specular.map(|c| Vec4::new(c[0], c[1], c[2], 1.0)),
        shininess: mat.shininess,
        diffuse_texture: mat.diffuse_texture.clone(),
        specular_texture: mat.specular_texture.clone(),
        // tobj parses map_bump/bump statements into normal_texture.
        bump_texture: mat.normal_texture.clone(),
    }
}

fn convert_mesh(model: &tobj::Model, material_index: usize) -> LoadResult<MeshData> {
    let m = &model.mesh;

    let positions: Vec<Vec3> = m
        .positions
        .chunks_exact(3)
        .map(|p| Vec3::new(p[0], p[1], p[2]))
        .collect();

    let faces: Vec<[u32; 3]> = m
        .indices
        .chunks_exact(3)
        .map(|f| [f[0], f[1], f[2]])
        .collect();

    let normals: Vec<Vec3> = m
        .normals
        .chunks_exact(3)
        .map(|n| Vec3::new(n[0], n[1], n[2]))
        .collect();

    let uvs: Option<Vec<[f32; 2]>> = if m.texcoords.is_empty() {
        None
    } else {
        Some(m.texcoords.chunks_exact(2).map(|t| [t[0], t[1]]).collect())
    };

    if !normals.is_empty() && normals.len() != positions.len() {
        return Err(LoadError::AttributeMismatch {
            mesh: model.name.clone(),
            what: "normals",
            expected: positions.len(),
            actual: normals.len(),
        });
    }
    if let Some(uvs) = &uvs {
        if uvs.len() != positions.len() {
            return Err(LoadError::AttributeMismatch {
                mesh: model.name.clone(),
                what: "texcoords",
                expected: positions.len(),
                actual: uvs.len(),
            });
        }
    }

    let mut mesh = MeshData {
        name: model.name.clone(),
        positions,
        normals,
        tangents: None, // OBJ carries no tangent frames
        uvs,
        faces,
        material_index,
    };

    if mesh.normals.is_empty() {
        log::debug!("mesh `{}` has no normals, computing smooth normals", mesh.name);
        mesh.compute_normals();
    }

    Ok(mesh)
}
