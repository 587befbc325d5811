use thiserror::Error;

/// Failure taxonomy shared by every layer of the chat engine.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ChatError {
    /// The remote call did not complete (disconnect, timeout, server error).
    #[error("Network failure: {0}")]
    Network(String),

    /// A role or role-list check failed, locally or at the remote store.
    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    /// The referenced channel, message or DM no longer exists.
    #[error("Not found: {0}")]
    NotFound(String),

    /// The request was malformed (empty name, missing category, ...).
    #[error("Validation failed: {0}")]
    Validation(String),
}

impl ChatError {
    pub fn network(msg: impl Into<String>) -> Self {
        Self::Network(msg.into())
    }

    pub fn denied(msg: impl Into<String>) -> Self {
        Self::PermissionDenied(msg.into())
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }
}

impl From<serde_json::Error> for ChatError {
    fn from(e: serde_json::Error) -> Self {
        Self::Validation(format!("malformed document: {e}"))
    }
}
