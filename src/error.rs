use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("increment schema mismatch: {0}")]
    SchemaMismatch(String),
    #[error("dataset store {} is unusable: {reason}", path.display())]
    Persistence { path: PathBuf, reason: String },
    #[error("increment source '{source_name}' is unavailable: {reason}")]
    Collaborator { source_name: String, reason: String },
}

impl PipelineError {
    pub(crate) fn persistence(path: impl Into<PathBuf>, reason: impl ToString) -> Self {
        Self::Persistence {
            path: path.into(),
            reason: reason.to_string(),
        }
    }
}

pub type Result<T> = std::result::Result<T, PipelineError>;
