//! Simple Ledger - transactional core of a double-entry ledger
//!
//! # Modules
//!
//! - [`ledger`] - Transaction boundary, transfer operation, store backends
//! - [`db`] - PostgreSQL pool management and schema bootstrap
//! - [`config`] - YAML application config
//! - [`logging`] - tracing subscriber setup

pub mod config;
pub mod db;
pub mod ledger;
pub mod logging;

// Convenient re-exports at crate root
pub use ledger::{
    Account, CancelSignal, Entry, ExecContext, MemoryBackend, PgBackend, Querier, Store,
    StoreError, Transfer, TransferTxParams, TransferTxResult, TxBackend, TxError, TxHandle,
    execute_in_tx,
};
