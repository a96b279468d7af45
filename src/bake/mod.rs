//! Ahead-of-time expression baking: a recording pass prints every compiled expression keyed by
//! the file that produced it, and a serving pass replays the printed units in the same order.

mod artifact;
mod cook;
mod error;
mod identity;
mod recorder;
mod server;

pub use artifact::{
    chunk_file_name, runtime_engine, ArtifactRegistry, ArtifactStore, BakedUnit, GeneratedArtifacts, UnitRef,
    FUNCS_PER_CHUNK, REGISTRY_FILE,
};
pub use cook::{BuildMode, ContextGuard, ContextId, CookingContext};
pub use error::BakeError;
pub use identity::{identify, stable_hash, CompileSiteKind, FileId, KeySource};
pub use recorder::{ArtifactBatch, RecordedUnit, RecordingContext, TypedRef};
pub use server::ServingContext;
