//! Error types for the Orderly engine.

use crate::{Phase, RecordId};
use thiserror::Error;

/// All possible errors from the Orderly engine.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum Error {
    // Lookup errors
    #[error("record not found: {0}")]
    RecordNotFound(RecordId),

    #[error("invalid record: {0}")]
    InvalidRecord(String),

    // State errors
    #[error("invalid snapshot: {0}")]
    InvalidSnapshot(String),

    #[error("invalid phase transition: {from:?} -> {to:?}")]
    InvalidTransition { from: Phase, to: Phase },
}

/// Result type for engine operations.
pub type Result<T> = std::result::Result<T, Error>;
