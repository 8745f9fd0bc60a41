//! Ledger Core
//!
//! Records money movement between two accounts as one atomic operation.
//!
//! # Layers
//!
//! ```text
//! caller ──▶ Store::transfer_tx ──▶ execute_in_tx ──▶ TxBackend (Postgres / memory)
//! ```
//!
//! - [`execute_in_tx`] is the transaction boundary. It knows nothing about
//!   transfers and can host any multi-step unit of work.
//! - [`Store::transfer_tx`] writes one transfer and two offsetting entries
//!   through it.
//!
//! # Invariants
//!
//! 1. A transfer is committed together with exactly two entries
//!    (`-amount` on the source, `+amount` on the target) or not at all.
//! 2. Entries are append-only.
//! 3. Account balances are not maintained here; they derive from entries.
//! 4. No retry: every failure reaches the caller unchanged.

pub mod context;
pub mod error;
pub mod memory;
pub mod models;
pub mod postgres;
pub mod querier;
pub mod store;
pub mod tx;

pub use context::{CancelSignal, ExecContext};
pub use error::{StoreError, TxError};
pub use memory::{Fault, MemoryBackend, MemoryHandle};
pub use models::{
    Account, CreateAccountParams, CreateEntryParams, CreateTransferParams, Entry,
    ListEntriesParams, ListParams, ListTransfersParams, Transfer, TransferTxParams,
    TransferTxResult,
};
pub use postgres::{PgBackend, PgQueries};
pub use querier::{Querier, TxBackend, TxHandle};
pub use store::Store;
pub use tx::execute_in_tx;

#[cfg(test)]
mod integration_tests;
