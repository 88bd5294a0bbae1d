//! Resource Error Types
//!
//! Unified error taxonomy surfaced by resource operations. Subsystem
//! errors (schema, adapter, blob) convert into it.

use thiserror::Error;

use crate::adapter::AdapterError;
use crate::blob::BlobError;
use crate::schema::{FieldError, SchemaError};

/// Resource result type
pub type ResourceResult<T> = Result<T, ResourceError>;

/// Resource error type
#[derive(Debug, Error)]
pub enum ResourceError {
    /// Bad schema definition
    #[error(transparent)]
    Schema(#[from] SchemaError),

    /// Record failed schema rules; nothing was written
    #[error("validation failed: {}", describe(.errors))]
    Validation { errors: Vec<FieldError> },

    /// Index collision on write
    #[error("unique constraint violated on '{field}' by value {value}")]
    UniqueConstraint { field: String, value: String },

    /// Missing record, attachment or source content
    #[error("not found: {0}")]
    NotFound(String),

    /// Adapter or blob transport failure
    #[error("I/O error: {0}")]
    Io(String),

    /// Persisted data failed an integrity check
    #[error("storage corrupted: {0}")]
    Corruption(String),

    /// Caller supplied options are unusable
    #[error("invalid options: {0}")]
    InvalidOptions(String),

    /// Error raised by a hook callback
    #[error("{0}")]
    Hook(Box<dyn std::error::Error + Send + Sync>),
}

impl ResourceError {
    /// Create a validation error
    pub fn validation(errors: Vec<FieldError>) -> Self {
        Self::Validation { errors }
    }

    /// Create a not found error
    pub fn not_found(what: impl Into<String>) -> Self {
        Self::NotFound(what.into())
    }

    /// Create a hook error from any message or error value
    pub fn hook(err: impl Into<Box<dyn std::error::Error + Send + Sync>>) -> Self {
        Self::Hook(err.into())
    }

    /// Field errors carried by a validation failure
    pub fn field_errors(&self) -> &[FieldError] {
        match self {
            Self::Validation { errors } => errors,
            _ => &[],
        }
    }

    /// Get error code for API responses
    pub fn code(&self) -> &'static str {
        match self {
            Self::Schema(_) => "SCHEMA_ERROR",
            Self::Validation { .. } => "VALIDATION_ERROR",
            Self::UniqueConstraint { .. } => "UNIQUE_CONSTRAINT",
            Self::NotFound(_) => "NOT_FOUND",
            Self::Io(_) => "IO_ERROR",
            Self::Corruption(_) => "CORRUPTION",
            Self::InvalidOptions(_) => "INVALID_OPTIONS",
            Self::Hook(_) => "HOOK_ERROR",
        }
    }
}

fn describe(errors: &[FieldError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

impl From<AdapterError> for ResourceError {
    fn from(e: AdapterError) -> Self {
        match e {
            AdapterError::UniqueConstraint { field, value } => {
                Self::UniqueConstraint { field, value }
            }
            AdapterError::NotFound(id) => Self::NotFound(id),
            AdapterError::Corruption { offset, reason } => {
                Self::Corruption(format!("offset {}: {}", offset, reason))
            }
            AdapterError::InvalidIdentifier(name) => {
                Self::InvalidOptions(format!("invalid identifier '{}'", name))
            }
            AdapterError::Io(msg) => Self::Io(msg),
        }
    }
}

impl From<BlobError> for ResourceError {
    fn from(e: BlobError) -> Self {
        match e {
            BlobError::NotFound(what) | BlobError::InvalidId(what) => Self::NotFound(what),
            BlobError::Io(msg) => Self::Io(msg),
        }
    }
}
