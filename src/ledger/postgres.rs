//! PostgreSQL store backend
//!
//! [`PgQueries`] runs the primitive operations over anything that derefs to
//! a `PgConnection`: a pooled connection (autocommit) or an open
//! `sqlx::Transaction`. Dropping an uncommitted transaction rolls it back.

use std::ops::DerefMut;

use async_trait::async_trait;
use sqlx::pool::PoolConnection;
use sqlx::{PgConnection, PgPool, Postgres, Transaction};

use super::error::StoreError;
use super::models::{
    Account, CreateAccountParams, CreateEntryParams, CreateTransferParams, Entry,
    ListEntriesParams, ListParams, ListTransfersParams, Transfer,
};
use super::querier::{Querier, TxBackend, TxHandle};

const ACCOUNT_COLUMNS: &str = "id, owner, balance, currency, created_at";
const TRANSFER_COLUMNS: &str = "id, from_account_id, to_account_id, amount, created_at";
const ENTRY_COLUMNS: &str = "id, account_id, amount, created_at";

#[derive(Debug, Clone)]
pub struct PgBackend {
    pool: PgPool,
}

impl PgBackend {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl TxBackend for PgBackend {
    type Tx = PgQueries<Transaction<'static, Postgres>>;
    type Conn = PgQueries<PoolConnection<Postgres>>;

    async fn begin(&self) -> Result<Self::Tx, StoreError> {
        let tx = self.pool.begin().await?;
        Ok(PgQueries { conn: tx })
    }

    async fn acquire(&self) -> Result<Self::Conn, StoreError> {
        let conn = self.pool.acquire().await?;
        Ok(PgQueries { conn })
    }
}

/// Primitive ledger queries bound to one connection or transaction.
pub struct PgQueries<C> {
    conn: C,
}

#[async_trait]
impl<C> Querier for PgQueries<C>
where
    C: DerefMut<Target = PgConnection> + Send,
{
    async fn create_account(&mut self, arg: CreateAccountParams) -> Result<Account, StoreError> {
        let sql = format!(
            "INSERT INTO accounts (owner, balance, currency) \
             VALUES ($1, $2, $3) RETURNING {ACCOUNT_COLUMNS}"
        );
        let account = sqlx::query_as::<_, Account>(&sql)
            .bind(&arg.owner)
            .bind(arg.balance)
            .bind(&arg.currency)
            .fetch_one(&mut *self.conn)
            .await?;
        Ok(account)
    }

    async fn get_account(&mut self, id: i64) -> Result<Account, StoreError> {
        let sql = format!("SELECT {ACCOUNT_COLUMNS} FROM accounts WHERE id = $1 LIMIT 1");
        sqlx::query_as::<_, Account>(&sql)
            .bind(id)
            .fetch_optional(&mut *self.conn)
            .await?
            .ok_or_else(|| StoreError::NotFound(format!("account {id}")))
    }

    async fn list_accounts(&mut self, arg: ListParams) -> Result<Vec<Account>, StoreError> {
        let sql =
            format!("SELECT {ACCOUNT_COLUMNS} FROM accounts ORDER BY id LIMIT $1 OFFSET $2");
        let rows = sqlx::query_as::<_, Account>(&sql)
            .bind(arg.limit)
            .bind(arg.offset)
            .fetch_all(&mut *self.conn)
            .await?;
        Ok(rows)
    }

    async fn create_transfer(
        &mut self,
        arg: CreateTransferParams,
    ) -> Result<Transfer, StoreError> {
        let sql = format!(
            "INSERT INTO transfers (from_account_id, to_account_id, amount) \
             VALUES ($1, $2, $3) RETURNING {TRANSFER_COLUMNS}"
        );
        let transfer = sqlx::query_as::<_, Transfer>(&sql)
            .bind(arg.from_account_id)
            .bind(arg.to_account_id)
            .bind(arg.amount)
            .fetch_one(&mut *self.conn)
            .await?;
        Ok(transfer)
    }

    async fn get_transfer(&mut self, id: i64) -> Result<Transfer, StoreError> {
        let sql = format!("SELECT {TRANSFER_COLUMNS} FROM transfers WHERE id = $1 LIMIT 1");
        sqlx::query_as::<_, Transfer>(&sql)
            .bind(id)
            .fetch_optional(&mut *self.conn)
            .await?
            .ok_or_else(|| StoreError::NotFound(format!("transfer {id}")))
    }

    async fn list_transfers(
        &mut self,
        arg: ListTransfersParams,
    ) -> Result<Vec<Transfer>, StoreError> {
        let sql = format!(
            "SELECT {TRANSFER_COLUMNS} FROM transfers \
             WHERE from_account_id = $1 OR to_account_id = $1 \
             ORDER BY id LIMIT $2 OFFSET $3"
        );
        let rows = sqlx::query_as::<_, Transfer>(&sql)
            .bind(arg.account_id)
            .bind(arg.page.limit)
            .bind(arg.page.offset)
            .fetch_all(&mut *self.conn)
            .await?;
        Ok(rows)
    }

    async fn create_entry(&mut self, arg: CreateEntryParams) -> Result<Entry, StoreError> {
        let sql = format!(
            "INSERT INTO entries (account_id, amount) \
             VALUES ($1, $2) RETURNING {ENTRY_COLUMNS}"
        );
        let entry = sqlx::query_as::<_, Entry>(&sql)
            .bind(arg.account_id)
            .bind(arg.amount)
            .fetch_one(&mut *self.conn)
            .await?;
        Ok(entry)
    }

    async fn get_entry(&mut self, id: i64) -> Result<Entry, StoreError> {
        let sql = format!("SELECT {ENTRY_COLUMNS} FROM entries WHERE id = $1 LIMIT 1");
        sqlx::query_as::<_, Entry>(&sql)
            .bind(id)
            .fetch_optional(&mut *self.conn)
            .await?
            .ok_or_else(|| StoreError::NotFound(format!("entry {id}")))
    }

    async fn list_entries(&mut self, arg: ListEntriesParams) -> Result<Vec<Entry>, StoreError> {
        let sql = format!(
            "SELECT {ENTRY_COLUMNS} FROM entries \
             WHERE account_id = $1 \
             ORDER BY id LIMIT $2 OFFSET $3"
        );
        let rows = sqlx::query_as::<_, Entry>(&sql)
            .bind(arg.account_id)
            .bind(arg.page.limit)
            .bind(arg.page.offset)
            .fetch_all(&mut *self.conn)
            .await?;
        Ok(rows)
    }
}

#[async_trait]
impl TxHandle for PgQueries<Transaction<'static, Postgres>> {
    async fn commit(self) -> Result<(), StoreError> {
        self.conn.commit().await?;
        Ok(())
    }

    async fn rollback(self) -> Result<(), StoreError> {
        self.conn.rollback().await?;
        Ok(())
    }
}
