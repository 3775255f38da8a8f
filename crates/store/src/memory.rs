//! In-memory store for tests.
//!
//! A transaction clones the whole state, mutates the clone, and swaps it
//! back on commit. The state mutex is held for the transaction's lifetime,
//! which trivially gives serializable semantics (transactions simply never
//! run concurrently). Do not call the store-level scan methods while a
//! transaction from the same store is open in the same task.

use std::collections::BTreeMap;
use std::ops::Bound::{Excluded, Unbounded};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::{Mutex, OwnedMutexGuard};

use ledgerd_protocol::OutboxQueue;

use crate::store::{LedgerStore, LedgerTx, StoreError, StoreResult};
use crate::types::{AccountRow, OutboxRow, PreparedTransferRow};

#[derive(Debug, Clone, Default)]
struct MemState {
    accounts: BTreeMap<(i64, i64), AccountRow>,
    prepared_transfers: BTreeMap<(i64, i64, i64), PreparedTransferRow>,
    registered_changes: BTreeMap<(i64, i64, i64), DateTime<Utc>>,
    outbox: BTreeMap<OutboxQueue, Vec<OutboxRow>>,
    next_outbox_id: i64,
    next_change_id: i64,
}

#[derive(Debug, Clone, Default)]
pub struct InMemoryStore {
    state: Arc<Mutex<MemState>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live prepared transfers with the given sender. Test helper
    /// for checking the lock-accounting invariants.
    pub async fn count_prepared_for_sender(&self, debtor_id: i64, creditor_id: i64) -> usize {
        let state = self.state.lock().await;
        state
            .prepared_transfers
            .keys()
            .filter(|(d, c, _)| *d == debtor_id && *c == creditor_id)
            .count()
    }

    /// Sum of `locked_amount` over the sender's live prepared transfers.
    /// Test helper for checking the lock-accounting invariants.
    pub async fn locked_amount_for_sender(&self, debtor_id: i64, creditor_id: i64) -> i64 {
        let state = self.state.lock().await;
        state
            .prepared_transfers
            .iter()
            .filter(|((d, c, _), _)| *d == debtor_id && *c == creditor_id)
            .map(|(_, transfer)| transfer.locked_amount)
            .sum()
    }
}

pub struct InMemoryTx {
    guard: OwnedMutexGuard<MemState>,
    staged: MemState,
}

#[async_trait]
impl LedgerStore for InMemoryStore {
    async fn begin(&self) -> StoreResult<Box<dyn LedgerTx + '_>> {
        let guard = self.state.clone().lock_owned().await;
        let staged = guard.clone();
        Ok(Box::new(InMemoryTx { guard, staged }))
    }

    async fn account_keys_page(
        &self,
        after: Option<(i64, i64)>,
        limit: i64,
    ) -> StoreResult<Vec<(i64, i64)>> {
        let state = self.state.lock().await;
        let range = match after {
            Some(key) => state.accounts.range((Excluded(key), Unbounded)),
            None => state.accounts.range(..),
        };
        Ok(range.map(|(k, _)| *k).take(limit.max(0) as usize).collect())
    }

    async fn prepared_transfer_keys_page(
        &self,
        after: Option<(i64, i64, i64)>,
        limit: i64,
    ) -> StoreResult<Vec<(i64, i64, i64)>> {
        let state = self.state.lock().await;
        let range = match after {
            Some(key) => state.prepared_transfers.range((Excluded(key), Unbounded)),
            None => state.prepared_transfers.range(..),
        };
        Ok(range.map(|(k, _)| *k).take(limit.max(0) as usize).collect())
    }

    async fn delete_balance_changes_before(
        &self,
        cutoff: DateTime<Utc>,
        limit: i64,
    ) -> StoreResult<u64> {
        let mut state = self.state.lock().await;
        let doomed: Vec<(i64, i64, i64)> = state
            .registered_changes
            .iter()
            .filter(|(_, committed_at)| **committed_at < cutoff)
            .map(|(k, _)| *k)
            .take(limit.max(0) as usize)
            .collect();
        for key in &doomed {
            state.registered_changes.remove(key);
        }
        Ok(doomed.len() as u64)
    }

    async fn outbox_batch(&self, queue: OutboxQueue, limit: i64) -> StoreResult<Vec<OutboxRow>> {
        let state = self.state.lock().await;
        Ok(state
            .outbox
            .get(&queue)
            .map(|rows| rows.iter().take(limit.max(0) as usize).cloned().collect())
            .unwrap_or_default())
    }

    async fn outbox_ack(&self, queue: OutboxQueue, ids: &[i64]) -> StoreResult<()> {
        let mut state = self.state.lock().await;
        if let Some(rows) = state.outbox.get_mut(&queue) {
            rows.retain(|row| !ids.contains(&row.id));
        }
        Ok(())
    }
}

#[async_trait]
impl LedgerTx for InMemoryTx {
    async fn get_account(
        &mut self,
        debtor_id: i64,
        creditor_id: i64,
    ) -> StoreResult<Option<AccountRow>> {
        Ok(self.staged.accounts.get(&(debtor_id, creditor_id)).cloned())
    }

    async fn insert_account(&mut self, account: &AccountRow) -> StoreResult<()> {
        let key = (account.debtor_id, account.creditor_id);
        if self.staged.accounts.contains_key(&key) {
            return Err(StoreError::backend("duplicate account key"));
        }
        self.staged.accounts.insert(key, account.clone());
        Ok(())
    }

    async fn update_account(&mut self, account: &AccountRow) -> StoreResult<()> {
        let key = (account.debtor_id, account.creditor_id);
        match self.staged.accounts.get_mut(&key) {
            Some(slot) => {
                *slot = account.clone();
                Ok(())
            }
            None => Err(StoreError::backend("update of a missing account")),
        }
    }

    async fn delete_account(&mut self, debtor_id: i64, creditor_id: i64) -> StoreResult<()> {
        self.staged.accounts.remove(&(debtor_id, creditor_id));
        Ok(())
    }

    async fn get_prepared_transfer(
        &mut self,
        debtor_id: i64,
        sender_creditor_id: i64,
        transfer_id: i64,
    ) -> StoreResult<Option<PreparedTransferRow>> {
        Ok(self
            .staged
            .prepared_transfers
            .get(&(debtor_id, sender_creditor_id, transfer_id))
            .cloned())
    }

    async fn insert_prepared_transfer(&mut self, transfer: &PreparedTransferRow) -> StoreResult<()> {
        let key = (transfer.debtor_id, transfer.sender_creditor_id, transfer.transfer_id);
        if self.staged.prepared_transfers.contains_key(&key) {
            return Err(StoreError::backend("duplicate prepared transfer key"));
        }
        self.staged.prepared_transfers.insert(key, transfer.clone());
        Ok(())
    }

    async fn update_prepared_transfer(&mut self, transfer: &PreparedTransferRow) -> StoreResult<()> {
        let key = (transfer.debtor_id, transfer.sender_creditor_id, transfer.transfer_id);
        match self.staged.prepared_transfers.get_mut(&key) {
            Some(slot) => {
                *slot = transfer.clone();
                Ok(())
            }
            None => Err(StoreError::backend("update of a missing prepared transfer")),
        }
    }

    async fn delete_prepared_transfer(
        &mut self,
        debtor_id: i64,
        sender_creditor_id: i64,
        transfer_id: i64,
    ) -> StoreResult<()> {
        self.staged
            .prepared_transfers
            .remove(&(debtor_id, sender_creditor_id, transfer_id));
        Ok(())
    }

    async fn register_balance_change(
        &mut self,
        debtor_id: i64,
        other_creditor_id: i64,
        change_id: i64,
        committed_at: DateTime<Utc>,
    ) -> StoreResult<bool> {
        let key = (debtor_id, other_creditor_id, change_id);
        if self.staged.registered_changes.contains_key(&key) {
            return Ok(false);
        }
        self.staged.registered_changes.insert(key, committed_at);
        Ok(true)
    }

    async fn next_change_id(&mut self) -> StoreResult<i64> {
        self.staged.next_change_id += 1;
        Ok(self.staged.next_change_id)
    }

    async fn enqueue(
        &mut self,
        queue: OutboxQueue,
        exchange: &str,
        routing_key: &str,
        payload: serde_json::Value,
    ) -> StoreResult<()> {
        self.staged.next_outbox_id += 1;
        let row = OutboxRow {
            id: self.staged.next_outbox_id,
            exchange: exchange.to_string(),
            routing_key: routing_key.to_string(),
            payload,
            inserted_at: Utc::now(),
        };
        self.staged.outbox.entry(queue).or_default().push(row);
        Ok(())
    }

    async fn commit(self: Box<Self>) -> StoreResult<()> {
        let mut this = *self;
        *this.guard = this.staged;
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> StoreResult<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn account(debtor_id: i64, creditor_id: i64) -> AccountRow {
        let t0 = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        AccountRow {
            debtor_id,
            creditor_id,
            creation_date: t0.date_naive(),
            principal: 0,
            interest: 0.0,
            interest_rate: 0.0,
            previous_interest_rate: 0.0,
            last_interest_rate_change_ts: t0,
            total_locked_amount: 0,
            pending_transfers_count: 0,
            last_transfer_id: 0,
            last_transfer_number: 0,
            last_transfer_committed_at: t0,
            last_change_ts: t0,
            last_change_seqnum: 1,
            last_config_ts: t0,
            last_config_seqnum: 0,
            last_outgoing_transfer_date: t0.date_naive(),
            last_heartbeat_ts: t0,
            last_interest_capitalization_ts: t0,
            last_deletion_attempt_ts: t0,
            negligible_amount: 2.0,
            config_flags: 0,
            config_data: String::new(),
            status_flags: 0,
            debtor_info_iri: None,
            debtor_info_content_type: None,
            debtor_info_sha256: None,
        }
    }

    #[tokio::test]
    async fn rollback_discards_staged_writes() {
        let store = InMemoryStore::new();
        let mut tx = store.begin().await.unwrap();
        tx.insert_account(&account(1, 2)).await.unwrap();
        tx.rollback().await.unwrap();

        let mut tx = store.begin().await.unwrap();
        assert!(tx.get_account(1, 2).await.unwrap().is_none());
        tx.rollback().await.unwrap();
    }

    #[tokio::test]
    async fn commit_makes_writes_visible() {
        let store = InMemoryStore::new();
        let mut tx = store.begin().await.unwrap();
        tx.insert_account(&account(1, 2)).await.unwrap();
        tx.commit().await.unwrap();

        let keys = store.account_keys_page(None, 10).await.unwrap();
        assert_eq!(keys, vec![(1, 2)]);
    }

    #[tokio::test]
    async fn balance_change_registration_is_idempotent() {
        let store = InMemoryStore::new();
        let t0 = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let mut tx = store.begin().await.unwrap();
        assert!(tx.register_balance_change(1, 2, 7, t0).await.unwrap());
        assert!(!tx.register_balance_change(1, 2, 7, t0).await.unwrap());
        tx.commit().await.unwrap();

        let mut tx = store.begin().await.unwrap();
        assert!(!tx.register_balance_change(1, 2, 7, t0).await.unwrap());
        tx.rollback().await.unwrap();
    }

    #[tokio::test]
    async fn keyset_pagination_walks_all_accounts() {
        let store = InMemoryStore::new();
        let mut tx = store.begin().await.unwrap();
        for creditor_id in 1..=5 {
            tx.insert_account(&account(1, creditor_id)).await.unwrap();
        }
        tx.commit().await.unwrap();

        let mut seen = Vec::new();
        let mut cursor = None;
        loop {
            let page = store.account_keys_page(cursor, 2).await.unwrap();
            if page.is_empty() {
                break;
            }
            cursor = page.last().copied();
            seen.extend(page);
        }
        assert_eq!(seen, (1..=5).map(|c| (1, c)).collect::<Vec<_>>());
    }
}
