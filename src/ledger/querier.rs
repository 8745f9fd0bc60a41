//! Store ports
//!
//! [`Querier`] is the primitive operation surface. It is implemented both by
//! the plain handle ([`TxBackend::acquire`]) and by the transaction-scoped
//! handle ([`TxBackend::begin`]), so a unit of work is written once.

use async_trait::async_trait;

use super::error::StoreError;
use super::models::{
    Account, CreateAccountParams, CreateEntryParams, CreateTransferParams, Entry,
    ListEntriesParams, ListParams, ListTransfersParams, Transfer,
};

/// Single-statement, already-atomic store operations.
#[async_trait]
pub trait Querier: Send {
    // === Accounts ===

    async fn create_account(&mut self, arg: CreateAccountParams) -> Result<Account, StoreError>;

    async fn get_account(&mut self, id: i64) -> Result<Account, StoreError>;

    async fn list_accounts(&mut self, arg: ListParams) -> Result<Vec<Account>, StoreError>;

    // === Transfers ===

    async fn create_transfer(&mut self, arg: CreateTransferParams)
    -> Result<Transfer, StoreError>;

    async fn get_transfer(&mut self, id: i64) -> Result<Transfer, StoreError>;

    async fn list_transfers(&mut self, arg: ListTransfersParams)
    -> Result<Vec<Transfer>, StoreError>;

    // === Entries ===

    async fn create_entry(&mut self, arg: CreateEntryParams) -> Result<Entry, StoreError>;

    async fn get_entry(&mut self, id: i64) -> Result<Entry, StoreError>;

    async fn list_entries(&mut self, arg: ListEntriesParams) -> Result<Vec<Entry>, StoreError>;
}

/// A [`Querier`] bound to one open transaction.
///
/// Both methods consume the handle, so at most one of them is ever issued.
#[async_trait]
pub trait TxHandle: Querier + Sized {
    async fn commit(self) -> Result<(), StoreError>;

    async fn rollback(self) -> Result<(), StoreError>;
}

/// Source of store handles.
#[async_trait]
pub trait TxBackend: Send + Sync {
    type Tx: TxHandle + 'static;
    type Conn: Querier + 'static;

    /// Open a new transaction.
    async fn begin(&self) -> Result<Self::Tx, StoreError>;

    /// Non-transactional handle; every write commits on its own.
    async fn acquire(&self) -> Result<Self::Conn, StoreError>;
}
