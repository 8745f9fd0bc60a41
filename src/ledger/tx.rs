//! Transaction Boundary
//!
//! Runs a unit of work against one transaction-scoped handle and commits or
//! rolls back as a single decision. Exactly one transaction is opened and
//! exactly one of commit / rollback is issued per call, on every exit path:
//!
//! ```text
//! begin ──▶ unit of work ──Ok──▶ check ctx ──ok──▶ COMMIT
//!                │                   │
//!          Err / ctx done /       ctx done
//!              panic                 │
//!                └───────────────────┴──────────▶ ROLLBACK
//! ```
//!
//! Dropping the returned future mid-flight drops the handle; backends roll
//! back on drop.

use std::panic::AssertUnwindSafe;

use futures::FutureExt;
use futures::future::BoxFuture;

use super::context::ExecContext;
use super::error::TxError;
use super::querier::{TxBackend, TxHandle};

/// How the unit of work ended.
enum Outcome<T> {
    Done(T),
    Failed(TxError),
    Panicked(Box<dyn std::any::Any + Send>),
}

/// Execute `work` inside a new transaction.
///
/// The unit of work receives the transaction-scoped handle by exclusive
/// reference; it cannot outlive the call.
pub async fn execute_in_tx<B, F, T>(backend: &B, ctx: &ExecContext, work: F) -> Result<T, TxError>
where
    B: TxBackend,
    F: for<'q> FnOnce(&'q mut B::Tx) -> BoxFuture<'q, Result<T, TxError>> + Send,
    T: Send,
{
    ctx.check()?;

    let mut tx = tokio::select! {
        biased;
        reason = ctx.done() => return Err(reason),
        begun = backend.begin() => begun.map_err(|e| {
            tracing::warn!(error = %e, "Failed to begin transaction");
            TxError::Begin(e)
        })?,
    };
    tracing::debug!("Transaction started");

    let outcome = {
        let run = AssertUnwindSafe(work(&mut tx)).catch_unwind();
        tokio::select! {
            biased;
            reason = ctx.done() => Outcome::Failed(reason),
            finished = run => match finished {
                Ok(Ok(value)) => Outcome::Done(value),
                Ok(Err(e)) => Outcome::Failed(e),
                Err(payload) => Outcome::Panicked(payload),
            },
        }
    };

    match outcome {
        Outcome::Done(value) => {
            // Never commit on behalf of a caller that has already given up.
            if let Err(reason) = ctx.check() {
                return Err(rollback(tx, reason).await);
            }
            tx.commit().await.map_err(|e| {
                tracing::error!(error = %e, "Failed to commit transaction");
                TxError::Commit(e)
            })?;
            tracing::debug!("Transaction committed");
            Ok(value)
        }
        Outcome::Failed(cause) => Err(rollback(tx, cause).await),
        Outcome::Panicked(payload) => {
            if let Err(e) = tx.rollback().await {
                tracing::error!(error = %e, "Rollback after panic failed");
            }
            std::panic::resume_unwind(payload)
        }
    }
}

/// Roll back after `cause`; returns the error to surface.
async fn rollback<H: TxHandle>(tx: H, cause: TxError) -> TxError {
    tracing::warn!(error = %cause, "Rolling back transaction");
    match tx.rollback().await {
        Ok(()) => cause,
        Err(rb) => {
            tracing::error!(error = %cause, rollback_error = %rb, "Rollback failed");
            TxError::Rollback {
                cause: Box::new(cause),
                rollback: rb,
            }
        }
    }
}
