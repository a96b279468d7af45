use std::path::PathBuf;

use thiserror::Error;

use super::FileId;

#[derive(Debug, Error)]
pub enum BakeError {
    #[error("file {file_id} has no baked units, but one was requested")]
    NoBakedUnits { file_id: FileId },
    #[error("not enough baked units for file {file_id}: requested #{position}, {available} recorded")]
    NotEnoughBakedUnits { file_id: FileId, position: usize, available: usize },
    #[error("type mismatch at position {position}/{total} for file {file_id}: baked {actual}, requested {expected}")]
    TypeMismatch { file_id: FileId, position: usize, total: usize, expected: String, actual: String },
    #[error("active context is a {actual} context, requested {expected}")]
    WrongContextKind { expected: &'static str, actual: &'static str },
    #[error("closing context for {closing} but {top} is on top of the stack")]
    MismatchedClose { closing: String, top: String },
    #[error("no active {0} context")]
    NoActiveContext(&'static str),
    #[error("{0} contexts still open at export")]
    ContextsStillOpen(usize),
    #[error("artifact io failed for {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("artifact registry {path} is invalid: {source}")]
    Registry {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("failed to compile artifact chunk {chunk}: {message}")]
    Chunk { chunk: String, message: String },
    #[error("registry entry {name} for file {file_id} is missing from chunk {chunk}")]
    MissingUnit { file_id: FileId, name: String, chunk: String },
}

impl BakeError {
    /// Desyncs mean the shipped artifacts no longer match the shipped scripts.
    pub fn is_desync(&self) -> bool {
        matches!(
            self,
            BakeError::NoBakedUnits { .. } | BakeError::NotEnoughBakedUnits { .. } | BakeError::TypeMismatch { .. }
        )
    }
}
