//! Scene asset model for PRISM.
//!
//! Defines the immutable in-memory representation of an imported scene
//! (materials, triangle meshes, node hierarchy) that the device compiler
//! in `prism_rt` lowers into GPU-style resources, plus a Wavefront OBJ
//! importer.

mod import;
mod material;
mod mesh;
mod node;
mod scene;

pub use import::{load_obj, LoadError, LoadResult};
pub use material::MaterialDef;
pub use mesh::{MeshData, TangentBasis};
pub use node::SceneNode;
pub use scene::SceneAsset;
