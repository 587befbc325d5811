use thiserror::Error;

use shopfloor_shared::ChatError;

use crate::models::EntityKind;

/// Errors produced by the store layer.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// A remote document failed validation and was quarantined.
    #[error("Rejected {kind:?} document {id}: {reason}")]
    Rejected {
        kind: EntityKind,
        id: String,
        reason: String,
    },

    /// A typing document could not be decoded.
    #[error("Malformed typing document {0}: {1}")]
    MalformedTyping(String, String),

    /// A lookup expected a record that is not cached.
    #[error("Record not found: {0}")]
    NotFound(String),
}

impl From<StoreError> for ChatError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::NotFound(what) => ChatError::NotFound(what),
            other => ChatError::Validation(other.to_string()),
        }
    }
}

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, StoreError>;
