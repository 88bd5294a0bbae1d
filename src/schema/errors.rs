//! Schema error types
//!
//! Two families live here:
//! - `SchemaError`: a schema definition is malformed. Raised at construction
//!   and fatal to resource setup.
//! - `FieldError`: one violated rule found while validating a record.
//!   Validation collects every `FieldError` rather than stopping at the first.

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Result type for schema construction
pub type SchemaResult<T> = Result<T, SchemaError>;

/// Errors raised while building a schema from its definition
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SchemaError {
    /// Definition is not a JSON object or a field spec has the wrong shape
    #[error("invalid schema definition for '{field}': {reason}")]
    InvalidDefinition { field: String, reason: String },

    /// Field declares a type the engine does not know
    #[error("field '{field}' declares unknown type '{type_name}'")]
    UnknownType { field: String, type_name: String },

    /// Field combines constraints that cannot hold together
    #[error("field '{field}' has conflicting constraints: {reason}")]
    ConflictingConstraints { field: String, reason: String },

    /// Computed field without a bound function, or function bound to a plain field
    #[error("computed field '{field}': {reason}")]
    ComputedBinding { field: String, reason: String },

    /// `_id` and `_attachments` are managed by the engine
    #[error("field name '{0}' is reserved")]
    ReservedField(String),
}

impl SchemaError {
    pub fn invalid(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidDefinition {
            field: field.into(),
            reason: reason.into(),
        }
    }

    pub fn conflict(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::ConflictingConstraints {
            field: field.into(),
            reason: reason.into(),
        }
    }

    pub fn computed(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::ComputedBinding {
            field: field.into(),
            reason: reason.into(),
        }
    }

    /// Stable error code
    pub fn code(&self) -> &'static str {
        match self {
            Self::InvalidDefinition { .. } => "SCHEMA_INVALID_DEFINITION",
            Self::UnknownType { .. } => "SCHEMA_UNKNOWN_TYPE",
            Self::ConflictingConstraints { .. } => "SCHEMA_CONFLICTING_CONSTRAINTS",
            Self::ComputedBinding { .. } => "SCHEMA_COMPUTED_BINDING",
            Self::ReservedField(_) => "SCHEMA_RESERVED_FIELD",
        }
    }
}

/// Kind of rule a record violated
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldErrorKind {
    Required,
    Type,
    UnknownField,
    Enum,
    Min,
    Max,
    Pattern,
    /// Raised by a validate hook rather than by a schema rule
    Custom,
}

/// A single validation failure
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldError {
    /// Field path (top-level field name)
    pub field: String,
    pub kind: FieldErrorKind,
    /// Human readable description
    pub message: String,
}

impl FieldError {
    pub fn new(field: impl Into<String>, kind: FieldErrorKind, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            kind,
            message: message.into(),
        }
    }

    pub fn required(field: impl Into<String>) -> Self {
        Self::new(field, FieldErrorKind::Required, "field is required")
    }

    pub fn type_mismatch(field: impl Into<String>, expected: &str, actual: &str) -> Self {
        Self::new(
            field,
            FieldErrorKind::Type,
            format!("expected {}, got {}", expected, actual),
        )
    }

    pub fn unknown_field(field: impl Into<String>) -> Self {
        Self::new(field, FieldErrorKind::UnknownField, "field is not declared")
    }

    pub fn custom(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(field, FieldErrorKind::Custom, message)
    }
}

impl fmt::Display for FieldError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "field '{}': {}", self.field, self.message)
    }
}
