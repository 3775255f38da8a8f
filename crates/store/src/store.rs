//! The store traits the engine is written against.
//!
//! One message handler == one `LedgerTx`. Every mutation the handler makes,
//! including its outgoing messages, happens inside that transaction;
//! nothing becomes visible (or flushable) unless the transaction commits.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

use ledgerd_protocol::OutboxQueue;

use crate::types::{AccountRow, OutboxRow, PreparedTransferRow};

#[derive(Debug, Error)]
pub enum StoreError {
    /// The transaction lost a serialization race; the operation is safe to
    /// retry from the top.
    #[error("serialization conflict")]
    Conflict,
    #[error("store failure: {0}")]
    Backend(String),
}

impl StoreError {
    pub fn backend(err: impl std::fmt::Display) -> Self {
        StoreError::Backend(err.to_string())
    }

    pub fn is_retriable(&self) -> bool {
        matches!(self, StoreError::Conflict)
    }
}

pub type StoreResult<T> = Result<T, StoreError>;

#[async_trait]
pub trait LedgerStore: Send + Sync {
    /// Opens a serializable transaction.
    async fn begin(&self) -> StoreResult<Box<dyn LedgerTx + '_>>;

    /// Keyset-paginated account keys, ordered by primary key, strictly
    /// after `after`. Used by the account scanner; each page is then
    /// processed in its own transaction.
    async fn account_keys_page(
        &self,
        after: Option<(i64, i64)>,
        limit: i64,
    ) -> StoreResult<Vec<(i64, i64)>>;

    /// Keyset-paginated prepared-transfer keys.
    async fn prepared_transfer_keys_page(
        &self,
        after: Option<(i64, i64, i64)>,
        limit: i64,
    ) -> StoreResult<Vec<(i64, i64, i64)>>;

    /// Garbage-collects up to `limit` registered balance changes committed
    /// before `cutoff`. Returns the number of rows removed.
    async fn delete_balance_changes_before(
        &self,
        cutoff: DateTime<Utc>,
        limit: i64,
    ) -> StoreResult<u64>;

    /// Oldest undelivered rows of one outbox queue, in insertion order.
    async fn outbox_batch(&self, queue: OutboxQueue, limit: i64) -> StoreResult<Vec<OutboxRow>>;

    /// Deletes delivered outbox rows (call only after broker ack).
    async fn outbox_ack(&self, queue: OutboxQueue, ids: &[i64]) -> StoreResult<()>;
}

#[async_trait]
pub trait LedgerTx: Send {
    async fn get_account(
        &mut self,
        debtor_id: i64,
        creditor_id: i64,
    ) -> StoreResult<Option<AccountRow>>;
    async fn insert_account(&mut self, account: &AccountRow) -> StoreResult<()>;
    async fn update_account(&mut self, account: &AccountRow) -> StoreResult<()>;
    async fn delete_account(&mut self, debtor_id: i64, creditor_id: i64) -> StoreResult<()>;

    async fn get_prepared_transfer(
        &mut self,
        debtor_id: i64,
        sender_creditor_id: i64,
        transfer_id: i64,
    ) -> StoreResult<Option<PreparedTransferRow>>;
    async fn insert_prepared_transfer(&mut self, transfer: &PreparedTransferRow) -> StoreResult<()>;
    async fn update_prepared_transfer(&mut self, transfer: &PreparedTransferRow) -> StoreResult<()>;
    async fn delete_prepared_transfer(
        &mut self,
        debtor_id: i64,
        sender_creditor_id: i64,
        transfer_id: i64,
    ) -> StoreResult<()>;

    /// Records that a balance change has been applied. Returns `false` when
    /// the change was already registered (a broker redelivery); the caller
    /// must then skip the application.
    async fn register_balance_change(
        &mut self,
        debtor_id: i64,
        other_creditor_id: i64,
        change_id: i64,
        committed_at: DateTime<Utc>,
    ) -> StoreResult<bool>;

    /// Allocates a node-unique id for an outgoing balance change.
    async fn next_change_id(&mut self) -> StoreResult<i64>;

    /// Appends an outgoing message to a queue, within this transaction.
    async fn enqueue(
        &mut self,
        queue: OutboxQueue,
        exchange: &str,
        routing_key: &str,
        payload: serde_json::Value,
    ) -> StoreResult<()>;

    async fn commit(self: Box<Self>) -> StoreResult<()>;
    async fn rollback(self: Box<Self>) -> StoreResult<()>;
}
