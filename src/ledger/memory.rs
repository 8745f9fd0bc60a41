//! In-process store backend
//!
//! Keeps committed rows in ordered maps and stages a transaction's writes
//! until commit, so a rolled-back or dropped transaction leaves no trace.
//! Faults can be injected at every blocking point to exercise the
//! transaction boundary's failure paths without a live database.
//!
//! Ids are drawn from shared counters when a row is created, like a
//! database sequence: rolled-back ids are not reused.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicI64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;

use super::error::StoreError;
use super::models::{
    Account, CreateAccountParams, CreateEntryParams, CreateTransferParams, Entry,
    ListEntriesParams, ListParams, ListTransfersParams, Transfer,
};
use super::querier::{Querier, TxBackend, TxHandle};

/// Failure injected into the next matching operation(s). Stays armed until
/// [`MemoryBackend::clear_faults`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Fault {
    Begin(StoreError),
    Commit(StoreError),
    Rollback(StoreError),
    CreateTransfer(StoreError),
    /// `create_entry` fails for this account only.
    CreateEntry { account_id: i64, error: StoreError },
    /// `begin` sleeps this long before opening the transaction.
    BeginDelay(Duration),
    /// Every write sleeps this long first.
    WriteDelay(Duration),
}

#[derive(Debug, Default)]
struct Tables {
    accounts: BTreeMap<i64, Account>,
    transfers: BTreeMap<i64, Transfer>,
    entries: BTreeMap<i64, Entry>,
}

#[derive(Debug, Clone)]
enum Row {
    Account(Account),
    Transfer(Transfer),
    Entry(Entry),
}

impl Tables {
    fn apply(&mut self, row: Row) {
        match row {
            Row::Account(a) => {
                self.accounts.insert(a.id, a);
            }
            Row::Transfer(t) => {
                self.transfers.insert(t.id, t);
            }
            Row::Entry(e) => {
                self.entries.insert(e.id, e);
            }
        }
    }
}

#[derive(Debug, Default)]
struct Shared {
    tables: Mutex<Tables>,
    faults: Mutex<Vec<Fault>>,
    next_account_id: AtomicI64,
    next_transfer_id: AtomicI64,
    next_entry_id: AtomicI64,
    begins: AtomicUsize,
    commits: AtomicUsize,
    rollbacks: AtomicUsize,
    dropped: AtomicUsize,
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

fn next_id(counter: &AtomicI64) -> i64 {
    counter.fetch_add(1, Ordering::SeqCst) + 1
}

fn page<T: Clone>(rows: Vec<T>, arg: ListParams) -> Result<Vec<T>, StoreError> {
    if arg.limit < 0 || arg.offset < 0 {
        return Err(StoreError::Database(
            "LIMIT and OFFSET must not be negative".to_string(),
        ));
    }
    Ok(rows
        .into_iter()
        .skip(arg.offset as usize)
        .take(arg.limit as usize)
        .collect())
}

impl Shared {
    fn fault(&self, pick: impl Fn(&Fault) -> Option<StoreError>) -> Option<StoreError> {
        lock(&self.faults).iter().find_map(pick)
    }

    fn begin_delay(&self) -> Option<Duration> {
        lock(&self.faults).iter().find_map(|f| match f {
            Fault::BeginDelay(d) => Some(*d),
            _ => None,
        })
    }

    fn write_delay(&self) -> Option<Duration> {
        lock(&self.faults).iter().find_map(|f| match f {
            Fault::WriteDelay(d) => Some(*d),
            _ => None,
        })
    }
}

/// Cloneable in-memory store; clones share the same tables.
#[derive(Debug, Clone, Default)]
pub struct MemoryBackend {
    shared: Arc<Shared>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert an account directly as committed state.
    pub fn seed_account(&self, owner: &str, balance: i64, currency: &str) -> Account {
        let account = Account {
            id: next_id(&self.shared.next_account_id),
            owner: owner.to_string(),
            balance,
            currency: currency.to_string(),
            created_at: Utc::now(),
        };
        lock(&self.shared.tables).apply(Row::Account(account.clone()));
        account
    }

    pub fn inject(&self, fault: Fault) {
        lock(&self.shared.faults).push(fault);
    }

    pub fn clear_faults(&self) {
        lock(&self.shared.faults).clear();
    }

    pub fn begin_count(&self) -> usize {
        self.shared.begins.load(Ordering::SeqCst)
    }

    pub fn commit_count(&self) -> usize {
        self.shared.commits.load(Ordering::SeqCst)
    }

    /// Explicit rollbacks, whether or not they reported success.
    pub fn rollback_count(&self) -> usize {
        self.shared.rollbacks.load(Ordering::SeqCst)
    }

    /// Transactions abandoned without commit or rollback.
    pub fn dropped_count(&self) -> usize {
        self.shared.dropped.load(Ordering::SeqCst)
    }

    pub fn transfer_count(&self) -> usize {
        lock(&self.shared.tables).transfers.len()
    }

    pub fn entry_count(&self) -> usize {
        lock(&self.shared.tables).entries.len()
    }

    /// Committed entries for one account, in id order.
    pub fn entries_for(&self, account_id: i64) -> Vec<Entry> {
        lock(&self.shared.tables)
            .entries
            .values()
            .filter(|e| e.account_id == account_id)
            .cloned()
            .collect()
    }

    /// Committed transfers touching one account, in id order.
    pub fn transfers_for(&self, account_id: i64) -> Vec<Transfer> {
        lock(&self.shared.tables)
            .transfers
            .values()
            .filter(|t| t.from_account_id == account_id || t.to_account_id == account_id)
            .cloned()
            .collect()
    }
}

#[async_trait]
impl TxBackend for MemoryBackend {
    type Tx = MemoryHandle;
    type Conn = MemoryHandle;

    async fn begin(&self) -> Result<MemoryHandle, StoreError> {
        if let Some(delay) = self.shared.begin_delay() {
            tokio::time::sleep(delay).await;
        }
        if let Some(err) = self.shared.fault(|f| match f {
            Fault::Begin(e) => Some(e.clone()),
            _ => None,
        }) {
            return Err(err);
        }
        self.shared.begins.fetch_add(1, Ordering::SeqCst);
        Ok(MemoryHandle {
            shared: Arc::clone(&self.shared),
            staged: Some(Vec::new()),
        })
    }

    async fn acquire(&self) -> Result<MemoryHandle, StoreError> {
        Ok(MemoryHandle {
            shared: Arc::clone(&self.shared),
            staged: None,
        })
    }
}

/// Store handle. Transaction-scoped when it carries a staging buffer,
/// autocommit otherwise.
#[derive(Debug)]
pub struct MemoryHandle {
    shared: Arc<Shared>,
    staged: Option<Vec<Row>>,
}

impl MemoryHandle {
    pub fn in_transaction(&self) -> bool {
        self.staged.is_some()
    }

    async fn before_write(&self) {
        if let Some(delay) = self.shared.write_delay() {
            tokio::time::sleep(delay).await;
        }
    }

    fn write(&mut self, row: Row) {
        match &mut self.staged {
            Some(staged) => staged.push(row),
            None => lock(&self.shared.tables).apply(row),
        }
    }

    /// Committed rows overlaid with this transaction's staged rows.
    fn snapshot(&self) -> Tables {
        let committed = lock(&self.shared.tables);
        let mut view = Tables {
            accounts: committed.accounts.clone(),
            transfers: committed.transfers.clone(),
            entries: committed.entries.clone(),
        };
        drop(committed);
        for row in self.staged.iter().flatten() {
            view.apply(row.clone());
        }
        view
    }

    fn ensure_account(&self, id: i64, constraint: &str) -> Result<(), StoreError> {
        if self.snapshot().accounts.contains_key(&id) {
            Ok(())
        } else {
            Err(StoreError::Constraint(format!(
                "{constraint}: account {id} does not exist"
            )))
        }
    }
}

impl Drop for MemoryHandle {
    fn drop(&mut self) {
        if self.staged.take().is_some() {
            self.shared.dropped.fetch_add(1, Ordering::SeqCst);
        }
    }
}

#[async_trait]
impl Querier for MemoryHandle {
    async fn create_account(&mut self, arg: CreateAccountParams) -> Result<Account, StoreError> {
        self.before_write().await;
        let account = Account {
            id: next_id(&self.shared.next_account_id),
            owner: arg.owner,
            balance: arg.balance,
            currency: arg.currency,
            created_at: Utc::now(),
        };
        self.write(Row::Account(account.clone()));
        Ok(account)
    }

    async fn get_account(&mut self, id: i64) -> Result<Account, StoreError> {
        self.snapshot()
            .accounts
            .remove(&id)
            .ok_or_else(|| StoreError::NotFound(format!("account {id}")))
    }

    async fn list_accounts(&mut self, arg: ListParams) -> Result<Vec<Account>, StoreError> {
        page(self.snapshot().accounts.into_values().collect(), arg)
    }

    async fn create_transfer(
        &mut self,
        arg: CreateTransferParams,
    ) -> Result<Transfer, StoreError> {
        self.before_write().await;
        if let Some(err) = self.shared.fault(|f| match f {
            Fault::CreateTransfer(e) => Some(e.clone()),
            _ => None,
        }) {
            return Err(err);
        }
        if arg.amount <= 0 {
            return Err(StoreError::Constraint(
                "transfers_amount_check: amount must be positive".to_string(),
            ));
        }
        self.ensure_account(arg.from_account_id, "transfers_from_account_id_fkey")?;
        self.ensure_account(arg.to_account_id, "transfers_to_account_id_fkey")?;

        let transfer = Transfer {
            id: next_id(&self.shared.next_transfer_id),
            from_account_id: arg.from_account_id,
            to_account_id: arg.to_account_id,
            amount: arg.amount,
            created_at: Utc::now(),
        };
        self.write(Row::Transfer(transfer.clone()));
        Ok(transfer)
    }

    async fn get_transfer(&mut self, id: i64) -> Result<Transfer, StoreError> {
        self.snapshot()
            .transfers
            .remove(&id)
            .ok_or_else(|| StoreError::NotFound(format!("transfer {id}")))
    }

    async fn list_transfers(
        &mut self,
        arg: ListTransfersParams,
    ) -> Result<Vec<Transfer>, StoreError> {
        let rows = self
            .snapshot()
            .transfers
            .into_values()
            .filter(|t| t.from_account_id == arg.account_id || t.to_account_id == arg.account_id)
            .collect();
        page(rows, arg.page)
    }

    async fn create_entry(&mut self, arg: CreateEntryParams) -> Result<Entry, StoreError> {
        self.before_write().await;
        if let Some(err) = self.shared.fault(|f| match f {
            Fault::CreateEntry { account_id, error } if *account_id == arg.account_id => {
                Some(error.clone())
            }
            _ => None,
        }) {
            return Err(err);
        }
        self.ensure_account(arg.account_id, "entries_account_id_fkey")?;

        let entry = Entry {
            id: next_id(&self.shared.next_entry_id),
            account_id: arg.account_id,
            amount: arg.amount,
            created_at: Utc::now(),
        };
        self.write(Row::Entry(entry.clone()));
        Ok(entry)
    }

    async fn get_entry(&mut self, id: i64) -> Result<Entry, StoreError> {
        self.snapshot()
            .entries
            .remove(&id)
            .ok_or_else(|| StoreError::NotFound(format!("entry {id}")))
    }

    async fn list_entries(&mut self, arg: ListEntriesParams) -> Result<Vec<Entry>, StoreError> {
        let rows = self
            .snapshot()
            .entries
            .into_values()
            .filter(|e| e.account_id == arg.account_id)
            .collect();
        page(rows, arg.page)
    }
}

#[async_trait]
impl TxHandle for MemoryHandle {
    async fn commit(mut self) -> Result<(), StoreError> {
        let Some(staged) = self.staged.take() else {
            return Ok(());
        };
        if let Some(err) = self.shared.fault(|f| match f {
            Fault::Commit(e) => Some(e.clone()),
            _ => None,
        }) {
            // A failed commit applies nothing.
            self.shared.dropped.fetch_add(1, Ordering::SeqCst);
            return Err(err);
        }

        let mut tables = lock(&self.shared.tables);
        for row in staged {
            tables.apply(row);
        }
        drop(tables);
        self.shared.commits.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn rollback(mut self) -> Result<(), StoreError> {
        if self.staged.take().is_none() {
            return Ok(());
        }
        self.shared.rollbacks.fetch_add(1, Ordering::SeqCst);
        // Staged rows are discarded either way; only the report fails.
        match self.shared.fault(|f| match f {
            Fault::Rollback(e) => Some(e.clone()),
            _ => None,
        }) {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(account_id: i64, amount: i64) -> CreateEntryParams {
        CreateEntryParams { account_id, amount }
    }

    #[tokio::test]
    async fn test_autocommit_writes_are_visible() {
        let backend = MemoryBackend::new();
        let account = backend.seed_account("alice", 0, "USD");

        let mut conn = backend.acquire().await.unwrap();
        assert!(!conn.in_transaction());
        let created = conn.create_entry(entry(account.id, 10)).await.unwrap();

        assert_eq!(backend.entry_count(), 1);
        assert_eq!(conn.get_entry(created.id).await.unwrap(), created);
    }

    #[tokio::test]
    async fn test_staged_writes_hidden_until_commit() {
        let backend = MemoryBackend::new();
        let account = backend.seed_account("alice", 0, "USD");

        let mut tx = backend.begin().await.unwrap();
        let created = tx.create_entry(entry(account.id, -5)).await.unwrap();

        // Visible inside the transaction, not outside.
        assert_eq!(tx.get_entry(created.id).await.unwrap(), created);
        assert_eq!(backend.entry_count(), 0);

        tx.commit().await.unwrap();
        assert_eq!(backend.entry_count(), 1);
        assert_eq!(backend.commit_count(), 1);
    }

    #[tokio::test]
    async fn test_rollback_discards() {
        let backend = MemoryBackend::new();
        let account = backend.seed_account("alice", 0, "USD");

        let mut tx = backend.begin().await.unwrap();
        tx.create_entry(entry(account.id, 1)).await.unwrap();
        tx.rollback().await.unwrap();

        assert_eq!(backend.entry_count(), 0);
        assert_eq!(backend.rollback_count(), 1);
        assert_eq!(backend.dropped_count(), 0);
    }

    #[tokio::test]
    async fn test_dropped_transaction_discards() {
        let backend = MemoryBackend::new();
        let account = backend.seed_account("alice", 0, "USD");

        {
            let mut tx = backend.begin().await.unwrap();
            tx.create_entry(entry(account.id, 1)).await.unwrap();
        }

        assert_eq!(backend.entry_count(), 0);
        assert_eq!(backend.dropped_count(), 1);
    }

    #[tokio::test]
    async fn test_foreign_key_and_amount_checks() {
        let backend = MemoryBackend::new();
        let a = backend.seed_account("alice", 0, "USD");
        let mut conn = backend.acquire().await.unwrap();

        let err = conn.create_entry(entry(999, 1)).await.unwrap_err();
        assert!(matches!(err, StoreError::Constraint(_)));

        let err = conn
            .create_transfer(CreateTransferParams {
                from_account_id: a.id,
                to_account_id: a.id,
                amount: 0,
            })
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Constraint(_)));
    }

    #[tokio::test]
    async fn test_injected_entry_fault_targets_one_account() {
        let backend = MemoryBackend::new();
        let a = backend.seed_account("alice", 0, "USD");
        let b = backend.seed_account("bob", 0, "USD");
        backend.inject(Fault::CreateEntry {
            account_id: b.id,
            error: StoreError::Connection("connection reset".into()),
        });

        let mut conn = backend.acquire().await.unwrap();
        assert!(conn.create_entry(entry(a.id, 1)).await.is_ok());
        assert!(conn.create_entry(entry(b.id, 1)).await.is_err());

        backend.clear_faults();
        assert!(conn.create_entry(entry(b.id, 1)).await.is_ok());
    }

    #[tokio::test]
    async fn test_list_paging() {
        let backend = MemoryBackend::new();
        for owner in ["a", "b", "c", "d"] {
            backend.seed_account(owner, 0, "EUR");
        }
        let mut conn = backend.acquire().await.unwrap();

        let page = conn.list_accounts(ListParams::new(2, 1)).await.unwrap();
        let owners: Vec<_> = page.iter().map(|a| a.owner.as_str()).collect();
        assert_eq!(owners, vec!["b", "c"]);

        assert!(conn.list_accounts(ListParams::new(-1, 0)).await.is_err());
    }
}
