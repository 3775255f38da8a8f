//! Postgres-backed store.
//!
//! Every transaction runs at the SERIALIZABLE isolation level; a
//! serialization failure (SQLSTATE 40001) is surfaced as
//! `StoreError::Conflict` and retried by the caller. Outbox queues are one
//! table each, with a `bigserial` id providing per-queue insertion order.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgPoolOptions;
use sqlx::{PgPool, Postgres, Row, Transaction};
use tracing::instrument;

use ledgerd_protocol::OutboxQueue;

use crate::store::{LedgerStore, LedgerTx, StoreError, StoreResult};
use crate::types::{AccountRow, OutboxRow, PreparedTransferRow};

const SERIALIZATION_FAILURE: &str = "40001";
const DEADLOCK_DETECTED: &str = "40P01";

fn map_sqlx_error(err: sqlx::Error) -> StoreError {
    if let sqlx::Error::Database(db) = &err {
        if matches!(db.code().as_deref(), Some(SERIALIZATION_FAILURE) | Some(DEADLOCK_DETECTED)) {
            return StoreError::Conflict;
        }
    }
    StoreError::backend(err)
}

fn outbox_table(queue: OutboxQueue) -> &'static str {
    match queue {
        OutboxQueue::RejectedConfig => "outbox_rejected_config",
        OutboxQueue::RejectedTransfer => "outbox_rejected_transfer",
        OutboxQueue::PreparedTransfer => "outbox_prepared_transfer",
        OutboxQueue::FinalizedTransfer => "outbox_finalized_transfer",
        OutboxQueue::AccountUpdate => "outbox_account_update",
        OutboxQueue::AccountPurge => "outbox_account_purge",
        OutboxQueue::AccountTransfer => "outbox_account_transfer",
        OutboxQueue::PendingBalanceChange => "outbox_pending_balance_change",
        OutboxQueue::Chore => "outbox_chore",
    }
}

#[derive(Debug, Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn connect(database_url: &str, max_connections: u32) -> StoreResult<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await
            .map_err(map_sqlx_error)?;
        Ok(Self { pool })
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

pub struct PgTx {
    tx: Transaction<'static, Postgres>,
}

#[async_trait]
impl LedgerStore for PgStore {
    async fn begin(&self) -> StoreResult<Box<dyn LedgerTx + '_>> {
        let mut tx = self.pool.begin().await.map_err(map_sqlx_error)?;
        sqlx::query("SET TRANSACTION ISOLATION LEVEL SERIALIZABLE")
            .execute(&mut *tx)
            .await
            .map_err(map_sqlx_error)?;
        Ok(Box::new(PgTx { tx }))
    }

    #[instrument(skip(self), err)]
    async fn account_keys_page(
        &self,
        after: Option<(i64, i64)>,
        limit: i64,
    ) -> StoreResult<Vec<(i64, i64)>> {
        let rows = match after {
            Some((debtor_id, creditor_id)) => {
                sqlx::query(
                    "SELECT debtor_id, creditor_id FROM account \
                     WHERE (debtor_id, creditor_id) > ($1, $2) \
                     ORDER BY debtor_id, creditor_id LIMIT $3",
                )
                .bind(debtor_id)
                .bind(creditor_id)
                .bind(limit)
                .fetch_all(&self.pool)
                .await
            }
            None => {
                sqlx::query(
                    "SELECT debtor_id, creditor_id FROM account \
                     ORDER BY debtor_id, creditor_id LIMIT $1",
                )
                .bind(limit)
                .fetch_all(&self.pool)
                .await
            }
        }
        .map_err(map_sqlx_error)?;

        Ok(rows
            .into_iter()
            .map(|row| (row.get("debtor_id"), row.get("creditor_id")))
            .collect())
    }

    #[instrument(skip(self), err)]
    async fn prepared_transfer_keys_page(
        &self,
        after: Option<(i64, i64, i64)>,
        limit: i64,
    ) -> StoreResult<Vec<(i64, i64, i64)>> {
        let rows = match after {
            Some((debtor_id, sender_creditor_id, transfer_id)) => {
                sqlx::query(
                    "SELECT debtor_id, sender_creditor_id, transfer_id FROM prepared_transfer \
                     WHERE (debtor_id, sender_creditor_id, transfer_id) > ($1, $2, $3) \
                     ORDER BY debtor_id, sender_creditor_id, transfer_id LIMIT $4",
                )
                .bind(debtor_id)
                .bind(sender_creditor_id)
                .bind(transfer_id)
                .bind(limit)
                .fetch_all(&self.pool)
                .await
            }
            None => {
                sqlx::query(
                    "SELECT debtor_id, sender_creditor_id, transfer_id FROM prepared_transfer \
                     ORDER BY debtor_id, sender_creditor_id, transfer_id LIMIT $1",
                )
                .bind(limit)
                .fetch_all(&self.pool)
                .await
            }
        }
        .map_err(map_sqlx_error)?;

        Ok(rows
            .into_iter()
            .map(|row| {
                (
                    row.get("debtor_id"),
                    row.get("sender_creditor_id"),
                    row.get("transfer_id"),
                )
            })
            .collect())
    }

    #[instrument(skip(self), err)]
    async fn delete_balance_changes_before(
        &self,
        cutoff: DateTime<Utc>,
        limit: i64,
    ) -> StoreResult<u64> {
        let result = sqlx::query(
            "DELETE FROM registered_balance_change WHERE ctid IN ( \
                 SELECT ctid FROM registered_balance_change \
                 WHERE committed_at < $1 LIMIT $2)",
        )
        .bind(cutoff)
        .bind(limit)
        .execute(&self.pool)
        .await
        .map_err(map_sqlx_error)?;
        Ok(result.rows_affected())
    }

    async fn outbox_batch(&self, queue: OutboxQueue, limit: i64) -> StoreResult<Vec<OutboxRow>> {
        let sql = format!(
            "SELECT id, exchange, routing_key, payload, inserted_at \
             FROM {} ORDER BY id LIMIT $1",
            outbox_table(queue)
        );
        sqlx::query_as::<_, OutboxRow>(&sql)
            .bind(limit)
            .fetch_all(&self.pool)
            .await
            .map_err(map_sqlx_error)
    }

    async fn outbox_ack(&self, queue: OutboxQueue, ids: &[i64]) -> StoreResult<()> {
        let sql = format!("DELETE FROM {} WHERE id = ANY($1)", outbox_table(queue));
        sqlx::query(&sql)
            .bind(ids)
            .execute(&self.pool)
            .await
            .map_err(map_sqlx_error)?;
        Ok(())
    }
}

const ACCOUNT_COLUMNS: &str = "debtor_id, creditor_id, creation_date, principal, interest, \
    interest_rate, previous_interest_rate, last_interest_rate_change_ts, total_locked_amount, \
    pending_transfers_count, last_transfer_id, last_transfer_number, last_transfer_committed_at, \
    last_change_ts, last_change_seqnum, last_config_ts, last_config_seqnum, \
    last_outgoing_transfer_date, last_heartbeat_ts, last_interest_capitalization_ts, \
    last_deletion_attempt_ts, negligible_amount, config_flags, config_data, status_flags, \
    debtor_info_iri, debtor_info_content_type, debtor_info_sha256";

const PREPARED_TRANSFER_COLUMNS: &str = "debtor_id, sender_creditor_id, transfer_id, \
    coordinator_type, coordinator_id, coordinator_request_id, recipient_creditor_id, \
    locked_amount, prepared_at, deadline, demurrage_rate, min_interest_rate, last_reminder_ts";

#[async_trait]
impl LedgerTx for PgTx {
    async fn get_account(
        &mut self,
        debtor_id: i64,
        creditor_id: i64,
    ) -> StoreResult<Option<AccountRow>> {
        let sql = format!(
            "SELECT {ACCOUNT_COLUMNS} FROM account WHERE debtor_id = $1 AND creditor_id = $2"
        );
        sqlx::query_as::<_, AccountRow>(&sql)
            .bind(debtor_id)
            .bind(creditor_id)
            .fetch_optional(&mut *self.tx)
            .await
            .map_err(map_sqlx_error)
    }

    async fn insert_account(&mut self, account: &AccountRow) -> StoreResult<()> {
        let sql = format!(
            "INSERT INTO account ({ACCOUNT_COLUMNS}) VALUES \
             ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17, \
              $18, $19, $20, $21, $22, $23, $24, $25, $26, $27, $28)"
        );
        bind_account(sqlx::query(&sql), account)
            .execute(&mut *self.tx)
            .await
            .map_err(map_sqlx_error)?;
        Ok(())
    }

    async fn update_account(&mut self, account: &AccountRow) -> StoreResult<()> {
        let result = sqlx::query(
            "UPDATE account SET \
                 creation_date = $3, principal = $4, interest = $5, interest_rate = $6, \
                 previous_interest_rate = $7, last_interest_rate_change_ts = $8, \
                 total_locked_amount = $9, pending_transfers_count = $10, \
                 last_transfer_id = $11, last_transfer_number = $12, \
                 last_transfer_committed_at = $13, last_change_ts = $14, \
                 last_change_seqnum = $15, last_config_ts = $16, last_config_seqnum = $17, \
                 last_outgoing_transfer_date = $18, last_heartbeat_ts = $19, \
                 last_interest_capitalization_ts = $20, last_deletion_attempt_ts = $21, \
                 negligible_amount = $22, config_flags = $23, config_data = $24, \
                 status_flags = $25, debtor_info_iri = $26, debtor_info_content_type = $27, \
                 debtor_info_sha256 = $28 \
             WHERE debtor_id = $1 AND creditor_id = $2",
        );
        let result = bind_account(result, account)
            .execute(&mut *self.tx)
            .await
            .map_err(map_sqlx_error)?;
        if result.rows_affected() == 0 {
            return Err(StoreError::backend("update of a missing account"));
        }
        Ok(())
    }

    async fn delete_account(&mut self, debtor_id: i64, creditor_id: i64) -> StoreResult<()> {
        sqlx::query("DELETE FROM account WHERE debtor_id = $1 AND creditor_id = $2")
            .bind(debtor_id)
            .bind(creditor_id)
            .execute(&mut *self.tx)
            .await
            .map_err(map_sqlx_error)?;
        Ok(())
    }

    async fn get_prepared_transfer(
        &mut self,
        debtor_id: i64,
        sender_creditor_id: i64,
        transfer_id: i64,
    ) -> StoreResult<Option<PreparedTransferRow>> {
        let sql = format!(
            "SELECT {PREPARED_TRANSFER_COLUMNS} FROM prepared_transfer \
             WHERE debtor_id = $1 AND sender_creditor_id = $2 AND transfer_id = $3"
        );
        sqlx::query_as::<_, PreparedTransferRow>(&sql)
            .bind(debtor_id)
            .bind(sender_creditor_id)
            .bind(transfer_id)
            .fetch_optional(&mut *self.tx)
            .await
            .map_err(map_sqlx_error)
    }

    async fn insert_prepared_transfer(&mut self, transfer: &PreparedTransferRow) -> StoreResult<()> {
        let sql = format!(
            "INSERT INTO prepared_transfer ({PREPARED_TRANSFER_COLUMNS}) VALUES \
             ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)"
        );
        bind_prepared_transfer(sqlx::query(&sql), transfer)
            .execute(&mut *self.tx)
            .await
            .map_err(map_sqlx_error)?;
        Ok(())
    }

    async fn update_prepared_transfer(&mut self, transfer: &PreparedTransferRow) -> StoreResult<()> {
        let result = sqlx::query(
            "UPDATE prepared_transfer SET \
                 coordinator_type = $4, coordinator_id = $5, coordinator_request_id = $6, \
                 recipient_creditor_id = $7, locked_amount = $8, prepared_at = $9, \
                 deadline = $10, demurrage_rate = $11, min_interest_rate = $12, \
                 last_reminder_ts = $13 \
             WHERE debtor_id = $1 AND sender_creditor_id = $2 AND transfer_id = $3",
        );
        let result = bind_prepared_transfer(result, transfer)
            .execute(&mut *self.tx)
            .await
            .map_err(map_sqlx_error)?;
        if result.rows_affected() == 0 {
            return Err(StoreError::backend("update of a missing prepared transfer"));
        }
        Ok(())
    }

    async fn delete_prepared_transfer(
        &mut self,
        debtor_id: i64,
        sender_creditor_id: i64,
        transfer_id: i64,
    ) -> StoreResult<()> {
        sqlx::query(
            "DELETE FROM prepared_transfer \
             WHERE debtor_id = $1 AND sender_creditor_id = $2 AND transfer_id = $3",
        )
        .bind(debtor_id)
        .bind(sender_creditor_id)
        .bind(transfer_id)
        .execute(&mut *self.tx)
        .await
        .map_err(map_sqlx_error)?;
        Ok(())
    }

    async fn register_balance_change(
        &mut self,
        debtor_id: i64,
        other_creditor_id: i64,
        change_id: i64,
        committed_at: DateTime<Utc>,
    ) -> StoreResult<bool> {
        let result = sqlx::query(
            "INSERT INTO registered_balance_change \
                 (debtor_id, other_creditor_id, change_id, committed_at) \
             VALUES ($1, $2, $3, $4) ON CONFLICT DO NOTHING",
        )
        .bind(debtor_id)
        .bind(other_creditor_id)
        .bind(change_id)
        .bind(committed_at)
        .execute(&mut *self.tx)
        .await
        .map_err(map_sqlx_error)?;
        Ok(result.rows_affected() == 1)
    }

    async fn next_change_id(&mut self) -> StoreResult<i64> {
        sqlx::query_scalar::<_, i64>("SELECT nextval('change_id_seq')")
            .fetch_one(&mut *self.tx)
            .await
            .map_err(map_sqlx_error)
    }

    async fn enqueue(
        &mut self,
        queue: OutboxQueue,
        exchange: &str,
        routing_key: &str,
        payload: serde_json::Value,
    ) -> StoreResult<()> {
        let sql = format!(
            "INSERT INTO {} (exchange, routing_key, payload) VALUES ($1, $2, $3)",
            outbox_table(queue)
        );
        sqlx::query(&sql)
            .bind(exchange)
            .bind(routing_key)
            .bind(payload)
            .execute(&mut *self.tx)
            .await
            .map_err(map_sqlx_error)?;
        Ok(())
    }

    async fn commit(self: Box<Self>) -> StoreResult<()> {
        self.tx.commit().await.map_err(map_sqlx_error)
    }

    async fn rollback(self: Box<Self>) -> StoreResult<()> {
        self.tx.rollback().await.map_err(map_sqlx_error)
    }
}

type PgQuery<'q> = sqlx::query::Query<'q, Postgres, sqlx::postgres::PgArguments>;

fn bind_account<'q>(query: PgQuery<'q>, account: &'q AccountRow) -> PgQuery<'q> {
    query
        .bind(account.debtor_id)
        .bind(account.creditor_id)
        .bind(account.creation_date)
        .bind(account.principal)
        .bind(account.interest)
        .bind(account.interest_rate)
        .bind(account.previous_interest_rate)
        .bind(account.last_interest_rate_change_ts)
        .bind(account.total_locked_amount)
        .bind(account.pending_transfers_count)
        .bind(account.last_transfer_id)
        .bind(account.last_transfer_number)
        .bind(account.last_transfer_committed_at)
        .bind(account.last_change_ts)
        .bind(account.last_change_seqnum)
        .bind(account.last_config_ts)
        .bind(account.last_config_seqnum)
        .bind(account.last_outgoing_transfer_date)
        .bind(account.last_heartbeat_ts)
        .bind(account.last_interest_capitalization_ts)
        .bind(account.last_deletion_attempt_ts)
        .bind(account.negligible_amount)
        .bind(account.config_flags)
        .bind(&account.config_data)
        .bind(account.status_flags)
        .bind(&account.debtor_info_iri)
        .bind(&account.debtor_info_content_type)
        .bind(&account.debtor_info_sha256)
}

fn bind_prepared_transfer<'q>(
    query: PgQuery<'q>,
    transfer: &'q PreparedTransferRow,
) -> PgQuery<'q> {
    query
        .bind(transfer.debtor_id)
        .bind(transfer.sender_creditor_id)
        .bind(transfer.transfer_id)
        .bind(&transfer.coordinator_type)
        .bind(transfer.coordinator_id)
        .bind(transfer.coordinator_request_id)
        .bind(transfer.recipient_creditor_id)
        .bind(transfer.locked_amount)
        .bind(transfer.prepared_at)
        .bind(transfer.deadline)
        .bind(transfer.demurrage_rate)
        .bind(transfer.min_interest_rate)
        .bind(transfer.last_reminder_ts)
}
