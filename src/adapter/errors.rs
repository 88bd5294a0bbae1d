//! Storage adapter errors

use thiserror::Error;

/// Result type for adapter operations
pub type AdapterResult<T> = Result<T, AdapterError>;

/// Errors raised by storage adapters
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AdapterError {
    /// A unique-indexed value collides with another live record
    #[error("unique constraint violated on '{field}' by value {value}")]
    UniqueConstraint { field: String, value: String },

    /// Target record does not exist
    #[error("record not found: {0}")]
    NotFound(String),

    /// Persisted data failed its integrity check
    #[error("storage corrupted at offset {offset}: {reason}")]
    Corruption { offset: u64, reason: String },

    /// Collection or field name unusable by the backend
    #[error("invalid identifier: {0}")]
    InvalidIdentifier(String),

    /// Transport or disk failure
    #[error("I/O error: {0}")]
    Io(String),
}

impl AdapterError {
    pub fn unique(field: impl Into<String>, value: impl Into<String>) -> Self {
        Self::UniqueConstraint {
            field: field.into(),
            value: value.into(),
        }
    }

    pub fn corruption(offset: u64, reason: impl Into<String>) -> Self {
        Self::Corruption {
            offset,
            reason: reason.into(),
        }
    }

    pub fn io(msg: impl Into<String>) -> Self {
        Self::Io(msg.into())
    }
}

impl From<std::io::Error> for AdapterError {
    fn from(e: std::io::Error) -> Self {
        Self::Io(e.to_string())
    }
}

impl From<serde_json::Error> for AdapterError {
    fn from(e: serde_json::Error) -> Self {
        Self::Io(format!("JSON error: {}", e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unique_message_names_field() {
        let err = AdapterError::unique("username", "\"X\"");
        assert_eq!(
            err.to_string(),
            "unique constraint violated on 'username' by value \"X\""
        );
    }

    #[test]
    fn test_io_error_conversion() {
        let io = std::io::Error::new(std::io::ErrorKind::Other, "disk gone");
        assert_eq!(AdapterError::from(io), AdapterError::Io("disk gone".into()));
    }
}
