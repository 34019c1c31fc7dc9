use thiserror::Error;

/// Errors surfaced by the device runtime and the scene compiler.
///
/// Everything here is a load-phase error: by the time the render loop
/// runs, the context has been validated and launches only fail for
/// out-of-range entry points.
#[derive(Error, Debug)]
pub enum RtError {
    #[error("unknown entry point `{entry}` in module `{module}`")]
    UnknownEntry { module: String, entry: String },

    #[error("program `{name}` is a {actual} program, expected {expected}")]
    ProgramKindMismatch {
        name: String,
        expected: &'static str,
        actual: &'static str,
    },

    #[error("texture `{path}`: {reason}")]
    TextureLoad { path: String, reason: String },

    #[error("mesh `{mesh}` references material index {index}, but only {count} materials are compiled")]
    MaterialLookup {
        mesh: String,
        index: usize,
        count: usize,
    },

    #[error("unknown material `{0}`")]
    UnknownMaterial(String),

    #[error("{what}: expected {expected} entries, got {actual}")]
    BufferSizeMismatch {
        what: String,
        expected: usize,
        actual: usize,
    },

    #[error("validation failed: {0}")]
    Validation(String),

    #[error("{child} must be validated before its parent {parent}")]
    ValidationOrder {
        child: &'static str,
        parent: &'static str,
    },

    #[error("ray type {0} out of range ({1} ray types declared)")]
    RayTypeOutOfRange(usize, usize),

    #[error("entry point {0} out of range ({1} entry points declared)")]
    EntryPointOutOfRange(usize, usize),
}

pub type RtResult<T> = Result<T, RtError>;
