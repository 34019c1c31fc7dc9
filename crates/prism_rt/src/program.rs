//! Device programs and program modules.
//!
//! A program is a named entry in a module, bound to context slots by
//! handle. Shading entry points are trait objects invoked during the
//! launch; the two mesh programs (bounds, intersection) are native
//! markers because triangle setup runs in the runtime itself.

use std::collections::HashMap;
use std::sync::Arc;

use prism_math::{Ray, Vec4};

use crate::error::{RtError, RtResult};
use crate::trace::{HitRecord, LaunchCtx, RayPayload, Tracer};

/// Ray type slot for occlusion rays.
pub const RAY_TYPE_SHADOW: usize = 0;
/// Ray type slot for Phong radiance rays.
pub const RAY_TYPE_RADIANCE: usize = 1;

/// What an any-hit program decided about a candidate intersection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AnyHitVerdict {
    /// Keep the hit and continue searching for a closer one.
    Accept,
    /// Discard this intersection and keep searching.
    IgnoreIntersection,
    /// Stop traversal entirely; the payload is final.
    TerminateRay,
}

/// Generates one primary ray per launch index and returns its color.
pub trait RayGenProgram: Send + Sync {
    fn ray_gen(&self, launch: &LaunchCtx<'_>, x: u32, y: u32) -> Vec4;
}

/// Runs when a ray of the bound type escapes the scene.
pub trait MissProgram: Send + Sync {
    fn miss(&self, tracer: &Tracer<'_>, ray: &Ray, payload: &mut RayPayload);
}

/// Shades the closest accepted intersection.
pub trait ClosestHitProgram: Send + Sync {
    fn closest_hit(&self, tracer: &Tracer<'_>, ray: &Ray, hit: &HitRecord, payload: &mut RayPayload);
}

/// Filters every candidate intersection during traversal.
pub trait AnyHitProgram: Send + Sync {
    fn any_hit(&self, tracer: &Tracer<'_>, ray: &Ray, hit: &HitRecord, payload: &mut RayPayload)
        -> AnyHitVerdict;
}

/// Substitutes a pixel color when ray generation produces a non-finite
/// result.
pub trait ExceptionProgram: Send + Sync {
    fn exception(&self, x: u32, y: u32) -> Vec4;
}

/// The entry kinds a program handle can refer to.
#[derive(Clone)]
pub enum ProgramKind {
    RayGen(Arc<dyn RayGenProgram>),
    Miss(Arc<dyn MissProgram>),
    ClosestHit(Arc<dyn ClosestHitProgram>),
    AnyHit(Arc<dyn AnyHitProgram>),
    Exception(Arc<dyn ExceptionProgram>),
    /// Native triangle-mesh bounding box computation.
    MeshBounds,
    /// Native triangle-mesh intersection (Moller-Trumbore).
    MeshIntersect,
}

impl ProgramKind {
    pub fn kind_name(&self) -> &'static str {
        match self {
            ProgramKind::RayGen(_) => "ray generation",
            ProgramKind::Miss(_) => "miss",
            ProgramKind::ClosestHit(_) => "closest hit",
            ProgramKind::AnyHit(_) => "any hit",
            ProgramKind::Exception(_) => "exception",
            ProgramKind::MeshBounds => "bounding box",
            ProgramKind::MeshIntersect => "intersection",
        }
    }
}

impl std::fmt::Debug for ProgramKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "ProgramKind::{}", self.kind_name())
    }
}

/// A program created in a context: the entry plus its provenance.
#[derive(Debug, Clone)]
pub struct Program {
    pub name: String,
    pub module: String,
    pub(crate) kind: ProgramKind,
}

impl Program {
    pub fn kind(&self) -> &ProgramKind {
        &self.kind
    }
}

/// A named registry of program entries.
///
/// Contexts create programs by (module, entry name); an unknown entry is
/// a hard error so a typo in a program name fails at load time.
pub struct ProgramModule {
    name: String,
    entries: HashMap<String, ProgramKind>,
}

impl ProgramModule {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            entries: HashMap::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Register (or replace) an entry.
    pub fn register(&mut self, entry: impl Into<String>, kind: ProgramKind) {
        self.entries.insert(entry.into(), kind);
    }

    pub fn entry(&self, name: &str) -> RtResult<&ProgramKind> {
        self.entries.get(name).ok_or_else(|| RtError::UnknownEntry {
            module: self.name.clone(),
            entry: name.to_string(),
        })
    }

    pub fn entry_names(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unknown_entry_is_an_error() {
        let module = ProgramModule::new("test");
        let err = module.entry("no_such_program").unwrap_err();
        assert!(matches!(err, RtError::UnknownEntry { .. }));
        assert!(err.to_string().contains("no_such_program"));
    }

    #[test]
    fn test_register_and_lookup() {
        let mut module = ProgramModule::new("test");
        module.register("boundingBoxMesh", ProgramKind::MeshBounds);
        assert!(matches!(
            module.entry("boundingBoxMesh").unwrap(),
            ProgramKind::MeshBounds
        ));
    }
}
