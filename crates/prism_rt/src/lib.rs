//! A retained-mode ray-tracing runtime with a scene compiler.
//!
//! The [`Context`] owns arenas of buffers, textures, programs,
//! materials, geometry, and graph nodes, addressed by typed handles.
//! [`compile::compile_scene`] lowers an imported scene into validated
//! context resources; [`session::RenderSession`] wraps a compiled
//! context with the standard two-ray-type pipeline and a movable
//! pinhole camera.

pub mod accel;
pub mod buffer;
pub mod builtin;
pub mod compile;
mod context;
mod error;
pub mod geometry;
pub mod graph;
mod handle;
pub mod material;
pub mod program;
pub mod session;
pub mod texture;
pub mod trace;

pub use context::{Context, OutputMap, Variable};
pub use error::{RtError, RtResult};
pub use handle::{
    BufferHandle, GeometryGroupHandle, GeometryHandle, GeometryInstanceHandle, GroupHandle,
    MaterialHandle, ProgramHandle, TextureHandle, TransformHandle,
};
pub use session::{CameraState, RenderSession, SessionOptions};
