use prism_math::Mat4;

/// One node in the scene hierarchy: a local transform, the meshes the
/// node owns directly (indices into the scene's mesh list), and child
/// nodes. The tree is rooted at [`crate::SceneAsset::root`] and is
/// cycle-free by construction of the source format.
#[derive(Clone, Debug)]
pub struct SceneNode {
    pub name: String,

    /// Local-to-parent transform.
    pub transform: Mat4,

    /// Indices of directly-owned meshes.
    pub meshes: Vec<usize>,

    pub children: Vec<SceneNode>,
}

impl SceneNode {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            transform: Mat4::IDENTITY,
            meshes: Vec::new(),
            children: Vec::new(),
        }
    }

    /// Build a node from the asset format's row-major 4x4 layout
    /// (rows a1..a4 through d1..d4). glam matrices are column-major, so
    /// the rows are transposed on the way in.
    pub fn from_rows(name: impl Into<String>, rows: [[f32; 4]; 4]) -> Self {
        let flat = [
            rows[0][0], rows[0][1], rows[0][2], rows[0][3],
            rows[1][0], rows[1][1], rows[1][2], rows[1][3],
            rows[2][0], rows[2][1], rows[2][2], rows[2][3],
            rows[3][0], rows[3][1], rows[3][2], rows[3][3],
        ];
        Self {
            name: name.into(),
            transform: Mat4::from_cols_array(&flat).transpose(),
            meshes: Vec::new(),
            children: Vec::new(),
        }
    }

    pub fn with_transform(mut self, transform: Mat4) -> Self {
        self.transform = transform;
        self
    }

    pub fn with_meshes(mut self, meshes: Vec<usize>) -> Self {
        self.meshes = meshes;
        self
    }

    pub fn with_children(mut self, children: Vec<SceneNode>) -> Self {
        self.children = children;
        self
    }

    /// Total node count in this subtree, including self.
    pub fn subtree_len(&self) -> usize {
        1 + self.children.iter().map(SceneNode::subtree_len).sum::<usize>()
    }
}
