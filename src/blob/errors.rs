//! Blob store errors

use thiserror::Error;

/// Result type for blob operations
pub type BlobResult<T> = Result<T, BlobError>;

/// Errors raised by blob stores
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BlobError {
    /// Blob id unknown, or source content missing
    #[error("blob not found: {0}")]
    NotFound(String),

    /// Blob id is not of the form the store hands out
    #[error("invalid blob id: {0}")]
    InvalidId(String),

    /// Transport or disk failure
    #[error("I/O error: {0}")]
    Io(String),
}

impl BlobError {
    /// Maps an I/O error, turning `NotFound` into `BlobError::NotFound(what)`
    pub fn from_io(e: std::io::Error, what: impl Into<String>) -> Self {
        if e.kind() == std::io::ErrorKind::NotFound {
            Self::NotFound(what.into())
        } else {
            Self::Io(e.to_string())
        }
    }
}

impl From<std::io::Error> for BlobError {
    fn from(e: std::io::Error) -> Self {
        Self::Io(e.to_string())
    }
}
