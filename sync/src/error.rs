//! Unified error handling for the sync layer.

use orderly_engine::RecordId;

/// Sync error type.
///
/// `Clone` so a single debounced outcome can be handed to every waiter.
/// Cancellation is deliberately absent: a superseded or cancelled call settles
/// as [`RequestOutcome::Cancelled`](crate::RequestOutcome::Cancelled).
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum SyncError {
    #[error("record not found: {0}")]
    NotFound(RecordId),

    #[error("remote operation failed: {0}")]
    Remote(String),

    #[error("reconciliation failed: {0}")]
    Reconciliation(String),

    #[error("invalid remote response: {0}")]
    InvalidResponse(String),

    #[error("engine error: {0}")]
    Engine(#[from] orderly_engine::Error),
}

impl SyncError {
    /// Shorthand for a remote failure.
    pub fn remote(message: impl Into<String>) -> Self {
        SyncError::Remote(message.into())
    }

    /// True for failures reported by the remote service.
    pub fn is_remote(&self) -> bool {
        matches!(self, SyncError::Remote(_))
    }

    /// True when the target record did not resolve.
    pub fn is_not_found(&self) -> bool {
        matches!(self, SyncError::NotFound(_))
    }
}

/// Result type alias for the sync layer.
pub type Result<T> = std::result::Result<T, SyncError>;
