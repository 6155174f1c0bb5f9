//! Staging store for legacy/target entities plus the atomic document writer.

mod document;
mod store;

use thiserror::Error;

pub use document::{DocumentWriter, StoredDocument};
pub use store::{IngestCounts, StagingStore, StoreStats, TargetKind};

pub const CRATE_NAME: &str = "handoff-storage";

#[derive(Debug, Error)]
pub enum StoreError {
    /// A write referenced a row that does not exist (foreign key violation).
    #[error("constraint violated while {operation}: {message}")]
    Constraint { operation: String, message: String },
    #[error("{kind} {id} not found in staging store")]
    NotFound { kind: &'static str, id: String },
    #[error("invalid {kind} {id}: {reason}")]
    Invalid {
        kind: &'static str,
        id: String,
        reason: String,
    },
    #[error("staging store error while {operation}: {source}")]
    Database {
        operation: String,
        #[source]
        source: sqlx::Error,
    },
}

impl StoreError {
    pub(crate) fn from_sqlx(operation: impl Into<String>, err: sqlx::Error) -> Self {
        let operation = operation.into();
        match &err {
            sqlx::Error::Database(db) if db.is_foreign_key_violation() => StoreError::Constraint {
                operation,
                message: db.message().to_string(),
            },
            _ => StoreError::Database {
                operation,
                source: err,
            },
        }
    }

    pub fn is_constraint(&self) -> bool {
        matches!(self, StoreError::Constraint { .. })
    }
}

pub type StoreResult<T> = Result<T, StoreError>;
