//! Error types for ShelfDB core.

use shelfdb_codec::ValueKind;
use thiserror::Error;

/// Result type for core operations.
pub type CoreResult<T> = Result<T, CoreError>;

/// Errors that can occur in ShelfDB core operations.
///
/// Reading a key that was never written is not an error: tables hand back
/// an empty [`Entry`](crate::Entry) instead.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Storage backend error.
    #[error("storage error: {0}")]
    Storage(#[from] shelfdb_storage::StorageError),

    /// CBOR codec error.
    #[error("codec error: {0}")]
    Codec(#[from] shelfdb_codec::CodecError),

    /// A value written as a record is not a mapping with text keys.
    #[error("validation error: {message}")]
    Validation {
        /// Description of the rejected value.
        message: String,
    },

    /// A table name is empty or contains the key separator.
    #[error("invalid table name: {name:?}")]
    InvalidTableName {
        /// The rejected name.
        name: String,
    },

    /// Database is closed.
    #[error("database is closed")]
    DatabaseClosed,
}

impl CoreError {
    /// Creates a validation error.
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
        }
    }

    /// Creates the validation error for a value that is not a mapping.
    pub fn not_a_mapping(kind: ValueKind) -> Self {
        Self::validation(format!("records must be mappings, got {kind}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_messages() {
        assert_eq!(
            CoreError::not_a_mapping(ValueKind::Integer).to_string(),
            "validation error: records must be mappings, got integer"
        );
        assert_eq!(
            CoreError::InvalidTableName {
                name: "a.b".to_string()
            }
            .to_string(),
            "invalid table name: \"a.b\""
        );
    }

    #[test]
    fn storage_errors_convert() {
        let err: CoreError = shelfdb_storage::StorageError::Closed.into();
        assert!(matches!(err, CoreError::Storage(_)));
    }
}
