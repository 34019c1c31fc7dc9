//! Typed indices into the context's resource arenas.
//!
//! The runtime hands out plain index handles instead of reference-counted
//! objects; every resource lives in an arena owned by the [`crate::Context`]
//! for the lifetime of the session. A handle is only meaningful for the
//! context that minted it.

macro_rules! define_handle {
    ($(#[$doc:meta])* $name:ident) => {
        $(#[$doc])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        pub struct $name(pub(crate) u32);

        impl $name {
            #[inline]
            pub fn index(self) -> usize {
                self.0 as usize
            }
        }
    };
}

define_handle!(
    /// A device data buffer.
    BufferHandle
);
define_handle!(
    /// A sampled texture with mip levels.
    TextureHandle
);
define_handle!(
    /// A device program entry (ray gen, miss, hit, ...).
    ProgramHandle
);
define_handle!(
    /// A compiled material with texture slots and hit programs.
    MaterialHandle
);
define_handle!(
    /// Triangle-mesh geometry buffers.
    GeometryHandle
);
define_handle!(
    /// Geometry bound to exactly one material.
    GeometryInstanceHandle
);
define_handle!(
    /// A set of geometry instances under one mesh-tuned accelerator.
    GeometryGroupHandle
);
define_handle!(
    /// An aggregate node: child transforms plus an optional geometry group.
    GroupHandle
);
define_handle!(
    /// A matrix + inverse wrapping exactly one child.
    TransformHandle
);
