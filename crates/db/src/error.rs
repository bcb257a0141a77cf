//! Typed error type for the db crate.

use thiserror::Error;

use crate::models::RunStatus;

#[derive(Debug, Error)]
pub enum DbError {
    #[error("sqlx error: {0}")]
    Sqlx(#[from] sqlx::Error),

    #[error("row not found")]
    NotFound,

    #[error("migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    /// Runs can only be created for active workflows.
    #[error("workflow {0} is not active")]
    Inactive(uuid::Uuid),

    /// A run status transition outside the transition table.
    #[error("invalid run transition {from} -> {to}")]
    InvalidTransition { from: RunStatus, to: RunStatus },

    /// Compare-and-set on a run's status lost a race.
    #[error("run status conflict: expected {expected}, found {actual}")]
    Conflict { expected: RunStatus, actual: RunStatus },

    /// The backing store cannot serve the request.
    #[error("store unavailable: {0}")]
    Unavailable(String),
}
