//! Ledger Data Models
//!
//! Rows created and read through the store's primitive operations.
//! All amounts are signed integers in minor currency units.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Account row. `balance` is owned by collaborators outside this core.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
pub struct Account {
    pub id: i64,
    pub owner: String,
    pub balance: i64,
    pub currency: String,
    pub created_at: DateTime<Utc>,
}

/// One side of a transfer's effect on one account.
///
/// Negative `amount` is a debit, positive is a credit. Entries are
/// append-only: never updated or deleted once committed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
pub struct Entry {
    pub id: i64,
    pub account_id: i64,
    pub amount: i64,
    pub created_at: DateTime<Utc>,
}

/// Logical intent to move `amount` from one account to another.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
pub struct Transfer {
    pub id: i64,
    pub from_account_id: i64,
    pub to_account_id: i64,
    pub amount: i64,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateAccountParams {
    pub owner: String,
    pub balance: i64,
    pub currency: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateEntryParams {
    pub account_id: i64,
    pub amount: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateTransferParams {
    pub from_account_id: i64,
    pub to_account_id: i64,
    pub amount: i64,
}

/// Page selector shared by the list operations. Rows are ordered by id ascending.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListParams {
    pub limit: i64,
    pub offset: i64,
}

impl ListParams {
    pub const DEFAULT_LIMIT: i64 = 100;

    pub fn new(limit: i64, offset: i64) -> Self {
        Self { limit, offset }
    }
}

impl Default for ListParams {
    fn default() -> Self {
        Self {
            limit: Self::DEFAULT_LIMIT,
            offset: 0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListEntriesParams {
    pub account_id: i64,
    #[serde(flatten)]
    pub page: ListParams,
}

/// Transfers where `account_id` is on either side.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListTransfersParams {
    pub account_id: i64,
    #[serde(flatten)]
    pub page: ListParams,
}

/// Input of [`Store::transfer_tx`](super::Store::transfer_tx).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferTxParams {
    pub from_account_id: i64,
    pub to_account_id: i64,
    pub amount: i64,
}

impl TransferTxParams {
    pub fn new(from_account_id: i64, to_account_id: i64, amount: i64) -> Self {
        Self {
            from_account_id,
            to_account_id,
            amount,
        }
    }

    pub(crate) fn transfer_params(&self) -> CreateTransferParams {
        CreateTransferParams {
            from_account_id: self.from_account_id,
            to_account_id: self.to_account_id,
            amount: self.amount,
        }
    }

    /// Stores reject non-positive amounts before the debit is written;
    /// `i64::MIN` saturates instead of overflowing.
    pub(crate) fn debit_params(&self) -> CreateEntryParams {
        CreateEntryParams {
            account_id: self.from_account_id,
            amount: self.amount.saturating_neg(),
        }
    }

    pub(crate) fn credit_params(&self) -> CreateEntryParams {
        CreateEntryParams {
            account_id: self.to_account_id,
            amount: self.amount,
        }
    }
}

/// Everything one committed transfer created.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferTxResult {
    pub transfer: Transfer,
    pub from_entry: Entry,
    pub to_entry: Entry,
}

impl TransferTxResult {
    /// True when both entries offset the transfer amount exactly.
    pub fn is_balanced(&self) -> bool {
        self.from_entry.account_id == self.transfer.from_account_id
            && self.to_entry.account_id == self.transfer.to_account_id
            && self.from_entry.amount == -self.transfer.amount
            && self.to_entry.amount == self.transfer.amount
    }
}
