use std::io;

use serde::Serialize;
use thiserror::Error;

/// Load failures as surfaced through `Document::last_error`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Error, Serialize)]
pub enum DocumentError {
    #[error("file not found")]
    FileNotFound,
    #[error("invalid file format")]
    InvalidFileFormat,
    #[error("incorrect password")]
    IncorrectPassword,
    #[error("unsupported security scheme")]
    UnsupportedSecurityScheme,
    #[error("data not yet available")]
    DataNotYetAvailable,
    #[error("unknown error")]
    Unknown,
}

impl DocumentError {
    /// Transient errors only mean "try again once more bytes arrive".
    pub fn is_transient(self) -> bool {
        matches!(self, DocumentError::DataNotYetAvailable)
    }
}

#[derive(Debug, Error)]
pub enum BackendError {
    #[error(transparent)]
    Document(#[from] DocumentError),
    #[error("page {0} could not be loaded")]
    Page(usize),
    #[error("text of page {page} could not be loaded: {reason}")]
    Text { page: usize, reason: String },
    #[error("failed to read document bytes")]
    Io(#[from] io::Error),
}

impl BackendError {
    pub fn document_error(&self) -> DocumentError {
        match self {
            BackendError::Document(err) => *err,
            BackendError::Io(err) if err.kind() == io::ErrorKind::NotFound => {
                DocumentError::FileNotFound
            }
            BackendError::Io(err) if err.kind() == io::ErrorKind::UnexpectedEof => {
                DocumentError::DataNotYetAvailable
            }
            BackendError::Io(_) | BackendError::Page(_) | BackendError::Text { .. } => {
                DocumentError::Unknown
            }
        }
    }
}
