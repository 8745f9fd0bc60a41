//! Ledger Store
//!
//! Domain-level entry points over a [`TxBackend`]: the generic
//! [`Store::exec_tx`] primitive and the funds-transfer operation built on it.

use futures::future::BoxFuture;

use super::context::ExecContext;
use super::error::{StoreError, TxError};
use super::models::{TransferTxParams, TransferTxResult};
use super::querier::{Querier, TxBackend};
use super::tx::execute_in_tx;

/// Provides all primitive queries plus multi-statement transactions.
pub struct Store<B> {
    backend: B,
}

impl<B: TxBackend> Store<B> {
    pub fn new(backend: B) -> Self {
        Self { backend }
    }

    /// Non-transactional handle for single-statement reads and writes.
    pub async fn queries(&self) -> Result<B::Conn, StoreError> {
        self.backend.acquire().await
    }

    /// Run `work` as one atomic unit. See [`execute_in_tx`].
    pub async fn exec_tx<F, T>(&self, ctx: &ExecContext, work: F) -> Result<T, TxError>
    where
        F: for<'q> FnOnce(&'q mut B::Tx) -> BoxFuture<'q, Result<T, TxError>> + Send,
        T: Send,
    {
        execute_in_tx(&self.backend, ctx, work).await
    }

    /// Move `amount` from one account to another.
    ///
    /// Creates one transfer record and two offsetting entries in a single
    /// transaction: either all three rows are committed or none are.
    /// Account existence and funds are the caller's concern; account
    /// balances are not touched here.
    #[tracing::instrument(
        skip(self, ctx),
        fields(from = arg.from_account_id, to = arg.to_account_id, amount = arg.amount),
        err
    )]
    pub async fn transfer_tx(
        &self,
        ctx: &ExecContext,
        arg: TransferTxParams,
    ) -> Result<TransferTxResult, TxError> {
        let result = self
            .exec_tx(ctx, move |q| {
                Box::pin(async move {
                    let transfer = q.create_transfer(arg.transfer_params()).await?;
                    let from_entry = q.create_entry(arg.debit_params()).await?;
                    let to_entry = q.create_entry(arg.credit_params()).await?;

                    Ok(TransferTxResult {
                        transfer,
                        from_entry,
                        to_entry,
                    })
                })
            })
            .await?;

        tracing::info!(transfer_id = result.transfer.id, "Transfer committed");
        Ok(result)
    }

    /// [`Store::transfer_tx`] with the parameters spelled out.
    pub async fn transfer(
        &self,
        ctx: &ExecContext,
        from_account_id: i64,
        to_account_id: i64,
        amount: i64,
    ) -> Result<TransferTxResult, TxError> {
        self.transfer_tx(
            ctx,
            TransferTxParams::new(from_account_id, to_account_id, amount),
        )
        .await
    }
}
