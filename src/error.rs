//! Error types for event distribution and cache reconciliation.

use crate::types::{ConnectionId, EntityKey, RegistrationId};
use thiserror::Error;

/// Main error type for sync operations.
#[derive(Debug, Error)]
pub enum SyncError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Malformed subscription at offset {offset}: {message}")]
    Parse { offset: usize, message: String },

    #[error("Filter evaluation failed: {0}")]
    FilterEvaluation(#[from] FilterEvaluationError),

    #[error("Mutation {mutation} failed: {reason}")]
    MutationFailure { mutation: String, reason: String },

    #[error("Merge invariant violated: {key:?} appears {count} times")]
    MergeInvariantViolation { key: EntityKey, count: usize },

    #[error("Connection disconnected: {0}")]
    Disconnected(ConnectionId),

    #[error("Connection not found: {0}")]
    ConnectionNotFound(ConnectionId),

    #[error("Registration not found: {0:?}")]
    RegistrationNotFound(RegistrationId),

    #[error("Mutation not declared: {0}")]
    UndeclaredMutation(String),

    #[error("Invalid entity: {0}")]
    InvalidEntity(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl SyncError {
    pub(crate) fn parse(offset: usize, message: impl Into<String>) -> Self {
        SyncError::Parse {
            offset,
            message: message.into(),
        }
    }
}

impl From<serde_json::Error> for SyncError {
    fn from(e: serde_json::Error) -> Self {
        SyncError::Serialization(e.to_string())
    }
}

/// A filter could not be evaluated against an event payload.
///
/// Dispatch treats this as "no match".
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("{filter} filter cannot evaluate a {payload} payload")]
pub struct FilterEvaluationError {
    pub filter: &'static str,
    pub payload: &'static str,
}

/// Result type for sync operations.
pub type Result<T> = std::result::Result<T, SyncError>;
