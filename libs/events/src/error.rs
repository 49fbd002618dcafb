//! Error types for event decoding.

use thiserror::Error;

/// Errors that can occur when decoding stored or reported events.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum EventError {
    /// The event kind is unknown.
    #[error("unknown event kind: {0}")]
    UnknownKind(String),

    /// The workload status is unknown.
    #[error("unknown workload status: {0}")]
    UnknownStatus(String),

    /// The kind requires a detail string that was not present.
    #[error("event kind '{0}' requires a detail message")]
    MissingDetail(&'static str),
}
