//! Errors returned by the core services.

use fleet_id::NodeId;
use thiserror::Error;

use crate::clients::{AgentError, AgentErrorKind, DnsError};
use crate::db::DbError;

pub type CoreResult<T> = Result<T, CoreError>;

#[derive(Debug, Error)]
pub enum CoreError {
    #[error("{resource} not found: {id}")]
    NotFound { resource: &'static str, id: String },

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("no node has enough free capacity")]
    NoCapacityAvailable,

    #[error("insufficient credits: {required} required, {available} available")]
    InsufficientCredits { required: i64, available: i64 },

    #[error("no tier matches the requested resources")]
    InvalidTier,

    #[error("node {0} still has workloads")]
    NodeBusy(NodeId),

    /// The agent refused the workload for a reason the tenant can fix.
    #[error("workload rejected by agent ({kind}): {message}")]
    WorkloadRejected { kind: AgentErrorKind, message: String },

    #[error("agent error: {0}")]
    UpstreamAgent(#[source] AgentError),

    #[error("dns error: {0}")]
    Dns(#[from] DnsError),

    #[error("validation failed: {0}")]
    Validation(String),

    /// A concurrent transaction won; the operation may be retried.
    #[error("concurrent update, retry")]
    Contention,

    #[error("database error: {0}")]
    Database(#[source] DbError),
}

impl CoreError {
    pub fn not_found(resource: &'static str, id: impl ToString) -> Self {
        Self::NotFound {
            resource,
            id: id.to_string(),
        }
    }
}

impl From<DbError> for CoreError {
    fn from(err: DbError) -> Self {
        match err {
            DbError::UniqueViolation { constraint } => {
                Self::Conflict(format!("{constraint} already taken"))
            }
            DbError::SerializationFailure => Self::Contention,
            other => Self::Database(other),
        }
    }
}

impl From<AgentError> for CoreError {
    fn from(err: AgentError) -> Self {
        match err {
            AgentError::Rejected { kind, message, .. } if kind.is_request_fault() => {
                Self::WorkloadRejected { kind, message }
            }
            other => Self::UpstreamAgent(other),
        }
    }
}
