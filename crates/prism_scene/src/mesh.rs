//! Triangle mesh data as imported from the asset file.

use prism_math::Vec3;

/// Per-vertex tangent frame. Tangents and bitangents are always present
/// together or absent together; carrying them as one struct makes that
/// invariant structural.
#[derive(Clone, Debug)]
pub struct TangentBasis {
    pub tangents: Vec<Vec3>,
    pub bitangents: Vec<Vec3>,
}

/// A pre-triangulated mesh.
///
/// Positions and normals are required (the importer computes smooth
/// normals when the file has none); tangent frames and UVs are optional
/// and surfaced downstream through presence flags.
#[derive(Clone, Debug)]
pub struct MeshData {
    pub name: String,

    /// One position per vertex.
    pub positions: Vec<Vec3>,

    /// One normal per vertex.
    pub normals: Vec<Vec3>,

    /// Optional tangent frame, one entry per vertex in each array.
    pub tangents: Option<TangentBasis>,

    /// Optional UV channel 0, one [u, v] per vertex.
    pub uvs: Option<Vec<[f32; 2]>>,

    /// Triangle faces as vertex-index triples.
    pub faces: Vec<[u32; 3]>,

    /// Index into the scene's material list.
    pub material_index: usize,
}

impl MeshData {
    pub fn vertex_count(&self) -> usize {
        self.positions.len()
    }

    pub fn face_count(&self) -> usize {
        self.faces.len()
    }

    pub fn has_uvs(&self) -> bool {
        self.uvs.is_some()
    }

    pub fn has_tangents(&self) -> bool {
        self.tangents.is_some()
    }

    /// Compute smooth vertex normals by averaging face normals.
    ///
    /// Replaces any existing normals. Degenerate vertices (no incident
    /// faces, or zero-area fans) fall back to +Y.
    pub fn compute_normals(&mut self) {
        let vertex_count = self.positions.len();
        let mut normals = vec![Vec3::ZERO; vertex_count];

        for face in &self.faces {
            let i0 = face[0] as usize;
            let i1 = face[1] as usize;
            let i2 = face[2] as usize;
            if i0 >= vertex_count || i1 >= vertex_count || i2 >= vertex_count {
                continue;
            }

            let p0 = self.positions[i0];
            let p1 = self.positions[i1];
            let p2 = self.positions[i2];
            let face_normal = (p1 - p0).cross(p2 - p0);

            normals[i0] += face_normal;
            normals[i1] += face_normal;
            normals[i2] += face_normal;
        }

        for normal in &mut normals {
            let len = normal.length();
            if len > 0.0 {
                *normal /= len;
            } else {
                *normal = Vec3::Y;
            }
        }

        self.normals = normals;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn quad() -> MeshData {
        MeshData {
            name: "quad".to_string(),
            positions: vec![
                Vec3::new(0.0, 0.0, 0.0),
                Vec3::new(1.0, 0.0, 0.0),
                Vec3::new(0.0, 1.0, 0.0),
                Vec3::new(1.0, 1.0, 0.0),
            ],
            normals: Vec::new(),
            tangents: None,
            uvs: None,
            faces: vec![[0, 1, 2], [1, 3, 2]],
            material_index: 0,
        }
    }

    #[test]
    fn test_counts() {
        let mesh = quad();
        assert_eq!(mesh.vertex_count(), 4);
        assert_eq!(mesh.face_count(), 2);
        assert!(!mesh.has_uvs());
        assert!(!mesh.has_tangents());
    }

    #[test]
    fn test_compute_normals_planar() {
        let mut mesh = quad();
        mesh.compute_normals();
        assert_eq!(mesh.normals.len(), 4);
        // CCW triangles in the XY plane face +Z.
        for n in &mesh.normals {
            assert!((n.z - 1.0).abs() < 1e-5, "normal {n:?} should face +Z");
        }
    }
}
