//! Ledger Error Types
//!
//! Two layers: [`StoreError`] is what a single primitive store operation
//! reports, [`TxError`] is what the transaction boundary surfaces.

use thiserror::Error;

/// Failure of one primitive store operation.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("Record not found: {0}")]
    NotFound(String),

    #[error("Constraint violation: {0}")]
    Constraint(String),

    /// Serialization failure or deadlock reported by the store.
    #[error("Transaction conflict: {0}")]
    Conflict(String),

    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Database error: {0}")]
    Database(String),
}

impl StoreError {
    pub fn code(&self) -> &'static str {
        match self {
            StoreError::NotFound(_) => "NOT_FOUND",
            StoreError::Constraint(_) => "CONSTRAINT_VIOLATION",
            StoreError::Conflict(_) => "CONFLICT",
            StoreError::Connection(_) => "CONNECTION_ERROR",
            StoreError::Database(_) => "DATABASE_ERROR",
        }
    }

    /// Whether re-running the whole operation may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, StoreError::Conflict(_) | StoreError::Connection(_))
    }
}

impl From<sqlx::Error> for StoreError {
    fn from(e: sqlx::Error) -> Self {
        match e {
            sqlx::Error::RowNotFound => StoreError::NotFound("no rows returned".to_string()),
            sqlx::Error::Database(db_err) => {
                let code = db_err.code().map(|c| c.into_owned()).unwrap_or_default();
                match code.as_str() {
                    // serialization_failure, deadlock_detected
                    "40001" | "40P01" => StoreError::Conflict(db_err.to_string()),
                    c if c.starts_with("23") => StoreError::Constraint(db_err.to_string()),
                    _ => StoreError::Database(db_err.to_string()),
                }
            }
            sqlx::Error::PoolTimedOut
            | sqlx::Error::PoolClosed
            | sqlx::Error::Io(_)
            | sqlx::Error::Tls(_)
            | sqlx::Error::WorkerCrashed => StoreError::Connection(e.to_string()),
            other => StoreError::Database(other.to_string()),
        }
    }
}

/// Failure surfaced by the transaction boundary.
///
/// Units of work return this type too, so `?` on a primitive operation
/// lands in [`TxError::Write`] unchanged.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TxError {
    #[error("Failed to begin transaction: {0}")]
    Begin(StoreError),

    #[error(transparent)]
    Write(#[from] StoreError),

    /// Rollback failed after the unit of work had already failed.
    /// Both causes are kept.
    #[error("tx err: {cause}, rb err: {rollback}")]
    Rollback {
        #[source]
        cause: Box<TxError>,
        rollback: StoreError,
    },

    /// Outcome of the transaction is indeterminate; treated as not applied.
    #[error("Failed to commit transaction: {0}")]
    Commit(StoreError),

    #[error("Transaction cancelled")]
    Cancelled,

    #[error("Transaction deadline exceeded")]
    DeadlineExceeded,
}

impl TxError {
    pub fn code(&self) -> &'static str {
        match self {
            TxError::Begin(_) => "TX_BEGIN_FAILED",
            TxError::Write(e) => e.code(),
            TxError::Rollback { .. } => "TX_ROLLBACK_FAILED",
            TxError::Commit(_) => "TX_COMMIT_FAILED",
            TxError::Cancelled => "TX_CANCELLED",
            TxError::DeadlineExceeded => "TX_DEADLINE_EXCEEDED",
        }
    }

    /// Whether the caller may reasonably re-invoke the whole operation.
    ///
    /// Nothing in this crate retries on its own.
    pub fn is_retryable(&self) -> bool {
        match self {
            TxError::Begin(e) | TxError::Write(e) => e.is_transient(),
            TxError::Rollback { cause, .. } => cause.is_retryable(),
            TxError::Commit(StoreError::Conflict(_)) => true,
            TxError::Commit(_) => false,
            TxError::Cancelled | TxError::DeadlineExceeded => false,
        }
    }

    /// The error that made the unit of work abort, looking through a failed rollback.
    pub fn cause(&self) -> &TxError {
        match self {
            TxError::Rollback { cause, .. } => cause.cause(),
            other => other,
        }
    }

    pub fn rollback_error(&self) -> Option<&StoreError> {
        match self {
            TxError::Rollback { rollback, .. } => Some(rollback),
            _ => None,
        }
    }

    /// Primitive write failure that aborted the unit of work, if any.
    pub fn write_error(&self) -> Option<&StoreError> {
        match self.cause() {
            TxError::Write(e) => Some(e),
            _ => None,
        }
    }
}
