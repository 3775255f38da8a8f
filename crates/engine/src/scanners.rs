//! Periodic scanners: account sweep (heartbeats, maintenance chores,
//! purges), prepared-transfer finalization reminders, and the
//! registered-balance-change garbage collector.
//!
//! Account tables may be large, so every sweep walks the table with keyset
//! cursors and processes each page in its own serializable transaction. A
//! page losing a serialization race is skipped; the next sweep covers it.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use tokio::sync::watch;
use tracing::{info, warn};

use ledgerd_core::i64_to_u64;
use ledgerd_protocol::{
    AccountPurge, ChoreMessage, OutboundMessage, PreparedTransferSignal, RootConfigData,
};
use ledgerd_store::AccountRow;

use crate::account_logic::accrued_interest;
use crate::dispatch::Engine;
use crate::error::EngineError;
use crate::output::{emit_account_update, enqueue_chore, enqueue_message};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AccountScanStats {
    pub scanned: u64,
    pub heartbeats: u64,
    pub purged: u64,
    pub chores_enqueued: u64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PreparedScanStats {
    pub scanned: u64,
    pub reminders: u64,
}

fn stop_requested(shutdown: Option<&watch::Receiver<bool>>) -> bool {
    shutdown.is_some_and(|rx| *rx.borrow())
}

impl Engine {
    /// One full sweep of the account table.
    pub async fn scan_accounts_once(&self, now: DateTime<Utc>) -> Result<AccountScanStats, EngineError> {
        self.scan_accounts(now, None).await
    }

    async fn scan_accounts(
        &self,
        now: DateTime<Utc>,
        shutdown: Option<&watch::Receiver<bool>>,
    ) -> Result<AccountScanStats, EngineError> {
        let mut stats = AccountScanStats::default();
        let mut cursor = None;
        loop {
            if stop_requested(shutdown) {
                break;
            }
            let page = self
                .store()
                .account_keys_page(cursor, self.policy().scan_page_size)
                .await?;
            let Some(last) = page.last().copied() else { break };
            cursor = Some(last);

            // Root configurations are fetched outside the page transaction
            // (the fetch client caches per debtor).
            let mut configs: HashMap<i64, Option<RootConfigData>> = HashMap::new();
            for (debtor_id, _) in &page {
                if !configs.contains_key(debtor_id) {
                    let config = match self.fetcher().root_config(*debtor_id).await {
                        Ok(config) => config,
                        Err(err) => {
                            warn!(debtor_id, error = %err, "could not fetch the root config");
                            None
                        }
                    };
                    configs.insert(*debtor_id, config);
                }
            }

            match self.scan_account_page(&page, &configs, now, &mut stats).await {
                Ok(()) => {}
                Err(err) if err.is_retriable() => {
                    warn!("an account scan page lost a serialization race; the next sweep covers it");
                }
                Err(err) => return Err(err),
            }
        }
        info!(
            scanned = stats.scanned,
            heartbeats = stats.heartbeats,
            purged = stats.purged,
            chores = stats.chores_enqueued,
            "account sweep finished"
        );
        Ok(stats)
    }

    async fn scan_account_page(
        &self,
        page: &[(i64, i64)],
        configs: &HashMap<i64, Option<RootConfigData>>,
        now: DateTime<Utc>,
        stats: &mut AccountScanStats,
    ) -> Result<(), EngineError> {
        let policy = self.policy().clone();
        let mut tx = self.store().begin().await?;
        for &(debtor_id, creditor_id) in page {
            let Some(mut account) = tx.get_account(debtor_id, creditor_id).await? else {
                continue;
            };
            stats.scanned += 1;

            if self.purge_due(&account, now) {
                tx.delete_account(debtor_id, creditor_id).await?;
                enqueue_message(
                    tx.as_mut(),
                    &OutboundMessage::AccountPurge(AccountPurge {
                        debtor_id,
                        creditor_id,
                        creation_date: account.creation_date,
                        ts: now,
                    }),
                )
                .await?;
                stats.purged += 1;
                continue;
            }

            let mut dirty = false;
            let last_beat = account.last_change_ts.max(account.last_heartbeat_ts);
            if now - last_beat > policy.heartbeat_interval {
                emit_account_update(tx.as_mut(), &mut account, &policy, now).await?;
                stats.heartbeats += 1;
                dirty = true;
            }

            if !account.is_root() {
                if let Some(Some(config)) = configs.get(&debtor_id) {
                    let target = policy.clamp_interest_rate(config.interest_rate_target);
                    if target != account.interest_rate
                        && now - account.last_interest_rate_change_ts >= policy.message_max_delay
                    {
                        enqueue_chore(
                            tx.as_mut(),
                            &policy,
                            &ChoreMessage::ChangeInterestRate {
                                debtor_id,
                                creditor_id,
                                interest_rate: target,
                                ts: now,
                            },
                        )
                        .await?;
                        stats.chores_enqueued += 1;
                    }

                    let (iri, content_type, sha256) = match &config.info {
                        Some(info) => (
                            info.iri.clone(),
                            info.content_type.clone().unwrap_or_default(),
                            info.sha256.clone(),
                        ),
                        None => (String::new(), String::new(), None),
                    };
                    let current_iri = account.debtor_info_iri.clone().unwrap_or_default();
                    if current_iri != iri || account.debtor_info_sha256 != sha256 {
                        enqueue_chore(
                            tx.as_mut(),
                            &policy,
                            &ChoreMessage::UpdateDebtorInfo {
                                debtor_id,
                                creditor_id,
                                debtor_info_iri: iri,
                                debtor_info_content_type: content_type,
                                debtor_info_sha256: sha256,
                                ts: now,
                            },
                        )
                        .await?;
                        stats.chores_enqueued += 1;
                    }
                }

                let accrued = accrued_interest(&account, now);
                let threshold = (policy.max_interest_to_principal_ratio
                    * account.principal.unsigned_abs() as f64)
                    .max(1.0);
                if accrued.abs() >= threshold
                    && now - account.last_interest_capitalization_ts
                        >= policy.min_capitalization_interval
                {
                    enqueue_chore(
                        tx.as_mut(),
                        &policy,
                        &ChoreMessage::CapitalizeInterest { debtor_id, creditor_id },
                    )
                    .await?;
                    stats.chores_enqueued += 1;
                }

                if account.is_scheduled_for_deletion()
                    && account.pending_transfers_count == 0
                    && now - account.last_deletion_attempt_ts >= policy.deletion_attempt_interval
                {
                    enqueue_chore(
                        tx.as_mut(),
                        &policy,
                        &ChoreMessage::TryToDeleteAccount { debtor_id, creditor_id },
                    )
                    .await?;
                    stats.chores_enqueued += 1;
                }
            }

            if dirty {
                tx.update_account(&account).await?;
            }
        }
        tx.commit().await?;
        Ok(())
    }

    /// The purge preconditions. The last one folds in the "wait at least
    /// ttl after the final update" rule, so purge and notification can
    /// happen in a single transaction.
    fn purge_due(&self, account: &AccountRow, now: DateTime<Utc>) -> bool {
        let policy = self.policy();
        if account.is_root()
            || !account.is_scheduled_for_deletion()
            || account.pending_transfers_count != 0
        {
            return false;
        }
        let old_enough =
            account.creation_date <= (now - policy.minimum_account_lifetime).date_naive();
        let config_stale = now - account.last_config_ts >= policy.stale_config_horizon;
        let balance_negligible = account.principal.unsigned_abs() as f64
            + accrued_interest(account, now).abs()
            <= account.negligible_amount;
        let quiescent = now - account.last_transfer_committed_at >= policy.stale_config_horizon;
        let updates_expired =
            now - account.last_change_ts.max(account.last_heartbeat_ts) >= policy.account_ttl;
        old_enough && config_stale && balance_negligible && quiescent && updates_expired
    }

    /// One full sweep of the prepared-transfer table, re-emitting
    /// `PreparedTransfer` for stale locks whose coordinator went quiet.
    pub async fn scan_prepared_transfers_once(
        &self,
        now: DateTime<Utc>,
    ) -> Result<PreparedScanStats, EngineError> {
        self.scan_prepared_transfers(now, None).await
    }

    async fn scan_prepared_transfers(
        &self,
        now: DateTime<Utc>,
        shutdown: Option<&watch::Receiver<bool>>,
    ) -> Result<PreparedScanStats, EngineError> {
        let mut stats = PreparedScanStats::default();
        let cutoff = now - self.policy().finalization_reminder_interval;
        let mut cursor = None;
        loop {
            if stop_requested(shutdown) {
                break;
            }
            let page = self
                .store()
                .prepared_transfer_keys_page(cursor, self.policy().scan_page_size)
                .await?;
            let Some(last) = page.last().copied() else { break };
            cursor = Some(last);

            match self.scan_prepared_page(&page, cutoff, now, &mut stats).await {
                Ok(()) => {}
                Err(err) if err.is_retriable() => {
                    warn!("a prepared-transfer scan page lost a serialization race");
                }
                Err(err) => return Err(err),
            }
        }
        info!(scanned = stats.scanned, reminders = stats.reminders, "prepared-transfer sweep finished");
        Ok(stats)
    }

    async fn scan_prepared_page(
        &self,
        page: &[(i64, i64, i64)],
        cutoff: DateTime<Utc>,
        now: DateTime<Utc>,
        stats: &mut PreparedScanStats,
    ) -> Result<(), EngineError> {
        let mut tx = self.store().begin().await?;
        for &(debtor_id, sender_creditor_id, transfer_id) in page {
            let Some(mut transfer) = tx
                .get_prepared_transfer(debtor_id, sender_creditor_id, transfer_id)
                .await?
            else {
                continue;
            };
            stats.scanned += 1;

            let reminded_recently =
                transfer.last_reminder_ts.is_some_and(|reminder| reminder >= cutoff);
            if transfer.prepared_at < cutoff && !reminded_recently {
                // Identical to the original message, except for `ts`.
                enqueue_message(
                    tx.as_mut(),
                    &OutboundMessage::PreparedTransfer(PreparedTransferSignal {
                        debtor_id,
                        creditor_id: sender_creditor_id,
                        transfer_id,
                        coordinator_type: transfer.coordinator_type.clone(),
                        coordinator_id: transfer.coordinator_id,
                        coordinator_request_id: transfer.coordinator_request_id,
                        locked_amount: transfer.locked_amount,
                        recipient: i64_to_u64(transfer.recipient_creditor_id).to_string(),
                        prepared_at: transfer.prepared_at,
                        demurrage_rate: transfer.demurrage_rate,
                        deadline: transfer.deadline,
                        min_interest_rate: transfer.min_interest_rate,
                        ts: now,
                    }),
                )
                .await?;
                transfer.last_reminder_ts = Some(now);
                tx.update_prepared_transfer(&transfer).await?;
                stats.reminders += 1;
            }
        }
        tx.commit().await?;
        Ok(())
    }

    /// Deletes registered balance changes older than the retention horizon,
    /// in batches. A horizon at the epoch disables collection entirely
    /// (collecting everything immediately would defeat idempotence).
    pub async fn scan_balance_changes_once(&self, _now: DateTime<Utc>) -> Result<u64, EngineError> {
        if !self.policy().balance_change_gc_enabled() {
            return Ok(0);
        }
        let cutoff = self.policy().balance_change_retention_date;
        let mut total = 0_u64;
        loop {
            let removed = self
                .store()
                .delete_balance_changes_before(cutoff, self.policy().scan_page_size)
                .await?;
            total += removed;
            if removed == 0 {
                break;
            }
        }
        if total > 0 {
            info!(removed = total, "balance-change archive collected");
        }
        Ok(total)
    }

    pub async fn run_account_scanner(&self, mut shutdown: watch::Receiver<bool>) {
        info!("account scanner started");
        loop {
            if let Err(err) = self.scan_accounts(Utc::now(), Some(&shutdown)).await {
                warn!(error = %err, "account sweep failed");
            }
            let pause = self
                .policy()
                .accounts_scan_interval
                .to_std()
                .unwrap_or(std::time::Duration::from_secs(8 * 3600));
            tokio::select! {
                _ = tokio::time::sleep(pause) => {}
                _ = shutdown.changed() => break,
            }
            if *shutdown.borrow() {
                break;
            }
        }
        info!("account scanner stopped");
    }

    pub async fn run_prepared_transfer_scanner(&self, mut shutdown: watch::Receiver<bool>) {
        info!("prepared-transfer scanner started");
        loop {
            if let Err(err) = self.scan_prepared_transfers(Utc::now(), Some(&shutdown)).await {
                warn!(error = %err, "prepared-transfer sweep failed");
            }
            let pause = self
                .policy()
                .prepared_transfers_scan_interval
                .to_std()
                .unwrap_or(std::time::Duration::from_secs(24 * 3600));
            tokio::select! {
                _ = tokio::time::sleep(pause) => {}
                _ = shutdown.changed() => break,
            }
            if *shutdown.borrow() {
                break;
            }
        }
        info!("prepared-transfer scanner stopped");
    }

    pub async fn run_balance_change_scanner(&self, mut shutdown: watch::Receiver<bool>) {
        info!("balance-change scanner started");
        loop {
            if let Err(err) = self.scan_balance_changes_once(Utc::now()).await {
                warn!(error = %err, "balance-change sweep failed");
            }
            let pause = self
                .policy()
                .balance_changes_scan_interval
                .to_std()
                .unwrap_or(std::time::Duration::from_secs(7 * 24 * 3600));
            tokio::select! {
                _ = tokio::time::sleep(pause) => {}
                _ = shutdown.changed() => break,
            }
            if *shutdown.borrow() {
                break;
            }
        }
        info!("balance-change scanner stopped");
    }
}
