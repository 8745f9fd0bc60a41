//! Transaction boundary tests over the in-memory backend.
//!
//! Every path must issue exactly one of commit / rollback and leave no
//! partial writes behind.

use std::time::Duration;

use super::*;

fn backend_with_accounts() -> (MemoryBackend, Account, Account) {
    let backend = MemoryBackend::new();
    let a = backend.seed_account("alice", 1_000, "USD");
    let b = backend.seed_account("bob", 1_000, "USD");
    (backend, a, b)
}

fn entry(account_id: i64, amount: i64) -> CreateEntryParams {
    CreateEntryParams { account_id, amount }
}

// ========================================================================
// Commit / Rollback Paths
// ========================================================================

#[tokio::test]
async fn test_success_commits_once() {
    let (backend, a, b) = backend_with_accounts();

    let ids = execute_in_tx(&backend, &ExecContext::background(), |q| {
        Box::pin(async move {
            let first = q.create_entry(entry(a.id, -1)).await?;
            let second = q.create_entry(entry(b.id, 1)).await?;
            Ok((first.id, second.id))
        })
    })
    .await
    .unwrap();

    assert_ne!(ids.0, ids.1);
    assert_eq!(backend.entry_count(), 2);
    assert_eq!(backend.begin_count(), 1);
    assert_eq!(backend.commit_count(), 1);
    assert_eq!(backend.rollback_count(), 0);
}

#[tokio::test]
async fn test_work_error_rolls_back_and_surfaces_original() {
    let (backend, a, _) = backend_with_accounts();

    let err = execute_in_tx(&backend, &ExecContext::background(), |q| {
        Box::pin(async move {
            q.create_entry(entry(a.id, -1)).await?;
            // Unknown account: FK violation on the second write.
            q.create_entry(entry(404, 1)).await?;
            Ok(())
        })
    })
    .await
    .unwrap_err();

    assert!(matches!(err, TxError::Write(StoreError::Constraint(_))));
    assert_eq!(backend.entry_count(), 0);
    assert_eq!(backend.commit_count(), 0);
    assert_eq!(backend.rollback_count(), 1);
}

#[tokio::test]
async fn test_rollback_failure_keeps_both_causes() {
    let (backend, a, b) = backend_with_accounts();
    backend.inject(Fault::CreateEntry {
        account_id: b.id,
        error: StoreError::Connection("connection reset by peer".into()),
    });
    backend.inject(Fault::Rollback(StoreError::Connection(
        "connection already closed".into(),
    )));

    let err = execute_in_tx(&backend, &ExecContext::background(), |q| {
        Box::pin(async move {
            q.create_entry(entry(a.id, -1)).await?;
            q.create_entry(entry(b.id, 1)).await?;
            Ok(())
        })
    })
    .await
    .unwrap_err();

    match &err {
        TxError::Rollback { cause, rollback } => {
            assert_eq!(
                **cause,
                TxError::Write(StoreError::Connection("connection reset by peer".into()))
            );
            assert_eq!(
                *rollback,
                StoreError::Connection("connection already closed".into())
            );
        }
        other => panic!("expected rollback error, got {other:?}"),
    }
    assert_eq!(backend.entry_count(), 0);
    assert_eq!(backend.rollback_count(), 1);
}

#[tokio::test]
async fn test_begin_failure() {
    let (backend, a, _) = backend_with_accounts();
    backend.inject(Fault::Begin(StoreError::Connection("pool timed out".into())));

    let err = execute_in_tx(&backend, &ExecContext::background(), |q| {
        Box::pin(async move {
            q.create_entry(entry(a.id, 1)).await?;
            Ok(())
        })
    })
    .await
    .unwrap_err();

    assert!(matches!(err, TxError::Begin(StoreError::Connection(_))));
    assert!(err.is_retryable());
    assert_eq!(backend.commit_count(), 0);
    assert_eq!(backend.rollback_count(), 0);
}

#[tokio::test]
async fn test_commit_failure_applies_nothing() {
    let (backend, a, _) = backend_with_accounts();
    backend.inject(Fault::Commit(StoreError::Database("could not flush".into())));

    let err = execute_in_tx(&backend, &ExecContext::background(), |q| {
        Box::pin(async move {
            q.create_entry(entry(a.id, 1)).await?;
            Ok(())
        })
    })
    .await
    .unwrap_err();

    assert!(matches!(err, TxError::Commit(_)));
    assert_eq!(err.code(), "TX_COMMIT_FAILED");
    assert_eq!(backend.entry_count(), 0);
    assert_eq!(backend.rollback_count(), 0);
}

// ========================================================================
// Cancellation & Deadline
// ========================================================================

#[tokio::test]
async fn test_cancel_mid_flight_rolls_back() {
    let (backend, a, b) = backend_with_accounts();
    backend.inject(Fault::WriteDelay(Duration::from_millis(200)));
    let signal = CancelSignal::new();
    let ctx = ExecContext::background().with_cancel(signal.clone());

    let task = {
        let backend = backend.clone();
        tokio::spawn(async move {
            execute_in_tx(&backend, &ctx, |q| {
                Box::pin(async move {
                    q.create_entry(entry(a.id, -1)).await?;
                    q.create_entry(entry(b.id, 1)).await?;
                    Ok(())
                })
            })
            .await
        })
    };

    tokio::time::sleep(Duration::from_millis(20)).await;
    signal.cancel();

    let err = task.await.unwrap().unwrap_err();
    assert_eq!(err, TxError::Cancelled);
    assert_eq!(backend.entry_count(), 0);
    assert_eq!(backend.commit_count(), 0);
    assert_eq!(backend.rollback_count(), 1);
}

#[tokio::test]
async fn test_cancel_during_begin_opens_nothing() {
    let (backend, a, _) = backend_with_accounts();
    backend.inject(Fault::BeginDelay(Duration::from_millis(200)));
    let signal = CancelSignal::new();
    let ctx = ExecContext::background().with_cancel(signal.clone());

    let task = {
        let backend = backend.clone();
        tokio::spawn(async move {
            execute_in_tx(&backend, &ctx, |q| {
                Box::pin(async move {
                    q.create_entry(entry(a.id, 1)).await?;
                    Ok(())
                })
            })
            .await
        })
    };

    tokio::time::sleep(Duration::from_millis(20)).await;
    signal.cancel();

    let err = task.await.unwrap().unwrap_err();
    assert_eq!(err, TxError::Cancelled);
    assert_eq!(backend.begin_count(), 0);
    assert_eq!(backend.commit_count(), 0);
    assert_eq!(backend.rollback_count(), 0);
    assert_eq!(backend.entry_count(), 0);
}

#[tokio::test]
async fn test_cancel_after_work_rolls_back_instead_of_commit() {
    let (backend, a, _) = backend_with_accounts();
    let signal = CancelSignal::new();
    let ctx = ExecContext::background().with_cancel(signal.clone());

    let err = execute_in_tx(&backend, &ctx, |q| {
        Box::pin(async move {
            q.create_entry(entry(a.id, 1)).await?;
            // Caller gives up after the last write but before commit.
            signal.cancel();
            Ok(())
        })
    })
    .await
    .unwrap_err();

    assert_eq!(err, TxError::Cancelled);
    assert_eq!(backend.entry_count(), 0);
    assert_eq!(backend.commit_count(), 0);
    assert_eq!(backend.rollback_count(), 1);
}

#[tokio::test]
async fn test_deadline_rolls_back() {
    let (backend, a, _) = backend_with_accounts();
    backend.inject(Fault::WriteDelay(Duration::from_millis(200)));
    let ctx = ExecContext::background().with_timeout(Duration::from_millis(20));

    let err = execute_in_tx(&backend, &ctx, |q| {
        Box::pin(async move {
            q.create_entry(entry(a.id, 1)).await?;
            Ok(())
        })
    })
    .await
    .unwrap_err();

    assert_eq!(err, TxError::DeadlineExceeded);
    assert_eq!(backend.entry_count(), 0);
    assert_eq!(backend.rollback_count(), 1);
}

#[tokio::test]
async fn test_already_cancelled_never_begins() {
    let (backend, a, _) = backend_with_accounts();
    let signal = CancelSignal::new();
    signal.cancel();
    let ctx = ExecContext::background().with_cancel(signal);

    let err = execute_in_tx(&backend, &ctx, |q| {
        Box::pin(async move {
            q.create_entry(entry(a.id, 1)).await?;
            Ok(())
        })
    })
    .await
    .unwrap_err();

    assert_eq!(err, TxError::Cancelled);
    assert_eq!(backend.begin_count(), 0);
}

// ========================================================================
// Panic & Drop
// ========================================================================

#[tokio::test]
async fn test_panic_rolls_back_then_propagates() {
    let (backend, a, _) = backend_with_accounts();

    let task = {
        let backend = backend.clone();
        tokio::spawn(async move {
            execute_in_tx(&backend, &ExecContext::background(), |q| {
                Box::pin(async move {
                    q.create_entry(entry(a.id, 1)).await?;
                    if a.id > 0 {
                        panic!("unit of work blew up");
                    }
                    Ok(())
                })
            })
            .await
        })
    };

    let join = task.await;
    assert!(join.unwrap_err().is_panic());
    assert_eq!(backend.entry_count(), 0);
    assert_eq!(backend.rollback_count(), 1);
    assert_eq!(backend.commit_count(), 0);
}

#[tokio::test]
async fn test_dropped_call_leaves_nothing() {
    let (backend, a, _) = backend_with_accounts();
    backend.inject(Fault::WriteDelay(Duration::from_millis(200)));

    let ctx = ExecContext::background();
    let call = execute_in_tx(&backend, &ctx, |q| {
        Box::pin(async move {
            q.create_entry(entry(a.id, 1)).await?;
            q.create_entry(entry(a.id, 2)).await?;
            Ok(())
        })
    });
    let timed_out = tokio::time::timeout(Duration::from_millis(20), call).await;

    assert!(timed_out.is_err());
    assert_eq!(backend.entry_count(), 0);
    assert_eq!(backend.dropped_count(), 1);
}

// ========================================================================
// Domain-agnostic Units of Work
// ========================================================================

#[tokio::test]
async fn test_store_hosts_arbitrary_units_of_work() {
    let backend = MemoryBackend::new();
    let store = Store::new(backend.clone());

    // Open an account and record its opening deposit atomically.
    let (account, deposit) = store
        .exec_tx(&ExecContext::background(), |q| {
            Box::pin(async move {
                let account = q
                    .create_account(CreateAccountParams {
                        owner: "carol".into(),
                        balance: 0,
                        currency: "EUR".into(),
                    })
                    .await?;
                let deposit = q.create_entry(entry(account.id, 500)).await?;
                Ok((account, deposit))
            })
        })
        .await
        .unwrap();

    let mut conn = store.queries().await.unwrap();
    assert_eq!(conn.get_account(account.id).await.unwrap(), account);
    assert_eq!(conn.get_entry(deposit.id).await.unwrap().amount, 500);
}
