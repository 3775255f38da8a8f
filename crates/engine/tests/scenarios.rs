//! End-to-end protocol scenarios, driven through the engine against the
//! in-memory store and a stubbed fetch client.

use std::sync::Arc;

use chrono::{DateTime, Duration, TimeZone, Utc};

use ledgerd_engine::{Engine, Policy};
use ledgerd_fetch::{AccountStatus, StubFetcher};
use ledgerd_protocol::{
    status, ChoreMessage, ConfigureAccount, FinalizeTransfer, InboundMessage, OutboxQueue,
    PendingBalanceChange, PrepareTransfer, RootConfigData,
};
use ledgerd_store::{AccountRow, InMemoryStore, LedgerStore};

fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap()
}

struct Harness {
    store: Arc<InMemoryStore>,
    fetcher: Arc<StubFetcher>,
    engine: Engine,
}

impl Harness {
    fn new() -> Self {
        Self::with_policy(Policy::default())
    }

    fn with_policy(policy: Policy) -> Self {
        let store = Arc::new(InMemoryStore::new());
        let fetcher = Arc::new(StubFetcher::new());
        let engine = Engine::new(store.clone(), fetcher.clone(), Arc::new(policy));
        Self { store, fetcher, engine }
    }

    async fn process(&self, message: InboundMessage, now: DateTime<Utc>) {
        self.engine.process_message(&message, now).await.expect("message handling failed");
    }

    async fn configure(
        &self,
        debtor_id: i64,
        creditor_id: i64,
        ts: DateTime<Utc>,
        seqnum: i32,
        negligible_amount: f64,
        config_flags: i32,
        config_data: &str,
    ) {
        self.process(
            InboundMessage::ConfigureAccount(ConfigureAccount {
                debtor_id,
                creditor_id,
                ts,
                seqnum,
                negligible_amount,
                config_flags,
                config_data: config_data.to_string(),
            }),
            ts,
        )
        .await;
    }

    /// Credits `amount` to an account through the balance-change path, the
    /// way committed transfers from other shards arrive.
    async fn fund(&self, debtor_id: i64, creditor_id: i64, amount: i64, now: DateTime<Utc>) {
        self.process(
            InboundMessage::PendingBalanceChange(PendingBalanceChange {
                debtor_id,
                creditor_id,
                change_id: 1_000_000 + creditor_id,
                coordinator_type: "direct".into(),
                transfer_note_format: String::new(),
                transfer_note: String::new(),
                committed_at: now,
                principal_delta: amount,
                other_creditor_id: 999,
            }),
            now,
        )
        .await;
    }

    fn prepare_message(&self, creditor_id: i64, min: i64, max: i64, recipient: &str) -> PrepareTransfer {
        PrepareTransfer {
            debtor_id: 1,
            creditor_id,
            coordinator_type: "direct".into(),
            coordinator_id: 11,
            coordinator_request_id: 42,
            min_locked_amount: min,
            max_locked_amount: max,
            recipient: recipient.to_string(),
            min_interest_rate: -100.0,
            max_commit_delay: i32::MAX,
            min_account_balance: 0,
            ts: t0(),
        }
    }

    fn finalize_message(&self, creditor_id: i64, transfer_id: i64, committed_amount: i64) -> FinalizeTransfer {
        FinalizeTransfer {
            debtor_id: 1,
            creditor_id,
            transfer_id,
            coordinator_type: "direct".into(),
            coordinator_id: 11,
            coordinator_request_id: 42,
            committed_amount,
            transfer_note_format: String::new(),
            transfer_note: String::new(),
            finalization_flags: 0,
            ts: t0(),
        }
    }

    async fn account(&self, debtor_id: i64, creditor_id: i64) -> Option<AccountRow> {
        let mut tx = self.store.begin().await.unwrap();
        let account = tx.get_account(debtor_id, creditor_id).await.unwrap();
        tx.rollback().await.unwrap();
        account
    }

    async fn drain(&self, queue: OutboxQueue) -> Vec<serde_json::Value> {
        let rows = self.store.outbox_batch(queue, 10_000).await.unwrap();
        let ids: Vec<i64> = rows.iter().map(|row| row.id).collect();
        self.store.outbox_ack(queue, &ids).await.unwrap();
        rows.into_iter().map(|row| row.payload).collect()
    }

    /// Feeds self-posted balance changes back into the engine, the way the
    /// flusher + broker + consumer pipeline would. Returns the payloads for
    /// redelivery tests.
    async fn deliver_balance_changes(&self, now: DateTime<Utc>) -> Vec<serde_json::Value> {
        let payloads = self.drain(OutboxQueue::PendingBalanceChange).await;
        for payload in &payloads {
            let message: InboundMessage = serde_json::from_value(payload.clone()).unwrap();
            self.process(message, now).await;
        }
        payloads
    }

    /// Drains the chore queue and processes every chore.
    async fn run_chores(&self, now: DateTime<Utc>) -> usize {
        let payloads = self.drain(OutboxQueue::Chore).await;
        for payload in &payloads {
            let chore: ChoreMessage = serde_json::from_value(payload.clone()).unwrap();
            self.engine.process_chore(&chore, now).await.unwrap();
        }
        payloads.len()
    }

    async fn assert_lock_invariants(&self, debtor_id: i64, creditor_id: i64) {
        let account = self.account(debtor_id, creditor_id).await.unwrap();
        let live = self.store.count_prepared_for_sender(debtor_id, creditor_id).await;
        let locked = self.store.locked_amount_for_sender(debtor_id, creditor_id).await;
        assert_eq!(account.pending_transfers_count as usize, live);
        assert_eq!(account.total_locked_amount, locked);
        if account.pending_transfers_count == 0 {
            assert_eq!(account.total_locked_amount, 0);
        }
    }
}

/// Scenario 1: open an account, schedule it for deletion, watch it get
/// purged after the quiet period.
#[tokio::test]
async fn open_and_delete() {
    let h = Harness::new();
    h.configure(1, 2, t0(), 0, 10.0, 0, "").await;

    let updates = h.drain(OutboxQueue::AccountUpdate).await;
    assert_eq!(updates.len(), 1);
    assert_eq!(updates[0]["principal"], 0);
    assert_eq!(updates[0]["creation_date"], "2024-03-01");

    // Schedule for deletion with an enormous negligible amount.
    h.configure(1, 2, t0() + Duration::seconds(1), 1, 1e30, 1, "").await;
    assert_eq!(h.drain(OutboxQueue::AccountUpdate).await.len(), 1);

    // First sweep, before the stale-config horizon: a deletion chore runs
    // (nothing left to zero out), but the account survives.
    let t1 = t0() + Duration::days(5);
    h.engine.scan_accounts_once(t1).await.unwrap();
    h.run_chores(t1).await;
    assert!(h.account(1, 2).await.is_some());

    // Second sweep, after every horizon has passed: the account is purged.
    let t2 = t0() + Duration::days(30);
    h.engine.scan_accounts_once(t2).await.unwrap();
    assert!(h.account(1, 2).await.is_none());

    let purges = h.drain(OutboxQueue::AccountPurge).await;
    assert_eq!(purges.len(), 1);
    assert_eq!(purges[0]["debtor_id"], 1);
    assert_eq!(purges[0]["creditor_id"], 2);
    assert_eq!(purges[0]["creation_date"], "2024-03-01");
}

/// Scenario 2: prepare locks funds, dismissing releases them untouched.
#[tokio::test]
async fn prepare_and_dismiss() {
    let h = Harness::new();
    h.configure(1, 2, t0(), 0, 0.0, 0, "").await;
    h.configure(1, 3, t0(), 0, 10.0, 0, "").await;
    h.fund(1, 2, 100, t0()).await;
    h.fetcher.set_status(1, 3, AccountStatus::Reachable);

    h.process(InboundMessage::PrepareTransfer(h.prepare_message(2, 1, 40, "3")), t0()).await;

    let prepared = h.drain(OutboxQueue::PreparedTransfer).await;
    assert_eq!(prepared.len(), 1);
    assert_eq!(prepared[0]["locked_amount"], 40);
    let transfer_id = prepared[0]["transfer_id"].as_i64().unwrap();

    let account = h.account(1, 2).await.unwrap();
    assert_eq!(account.total_locked_amount, 40);
    assert_eq!(account.pending_transfers_count, 1);
    h.assert_lock_invariants(1, 2).await;

    // Dismiss.
    h.process(InboundMessage::FinalizeTransfer(h.finalize_message(2, transfer_id, 0)), t0()).await;

    let finalized = h.drain(OutboxQueue::FinalizedTransfer).await;
    assert_eq!(finalized.len(), 1);
    assert_eq!(finalized[0]["status_code"], status::OK);
    assert_eq!(finalized[0]["committed_amount"], 0);

    let account = h.account(1, 2).await.unwrap();
    assert_eq!(account.total_locked_amount, 0);
    assert_eq!(account.principal, 100);
    h.assert_lock_invariants(1, 2).await;
}

/// Scenario 3 + 4: commit moves the funds exactly once, even when the
/// finalization and the balance change are redelivered.
#[tokio::test]
async fn prepare_commit_and_redeliver() {
    let h = Harness::new();
    h.configure(1, 2, t0(), 0, 0.0, 0, "").await;
    h.configure(1, 3, t0(), 0, 10.0, 0, "").await;
    h.fund(1, 2, 100, t0()).await;
    h.fetcher.set_status(1, 3, AccountStatus::Reachable);
    h.drain(OutboxQueue::AccountTransfer).await;

    h.process(InboundMessage::PrepareTransfer(h.prepare_message(2, 1, 40, "3")), t0()).await;
    let prepared = h.drain(OutboxQueue::PreparedTransfer).await;
    let transfer_id = prepared[0]["transfer_id"].as_i64().unwrap();

    let commit_at = t0() + Duration::seconds(60);
    let finalize = h.finalize_message(2, transfer_id, 40);
    h.process(InboundMessage::FinalizeTransfer(finalize.clone()), commit_at).await;

    let finalized = h.drain(OutboxQueue::FinalizedTransfer).await;
    assert_eq!(finalized.len(), 1);
    assert_eq!(finalized[0]["status_code"], status::OK);
    assert_eq!(finalized[0]["committed_amount"], 40);

    let change_payloads = h.deliver_balance_changes(commit_at).await;
    assert_eq!(change_payloads.len(), 1);

    let transfers = h.drain(OutboxQueue::AccountTransfer).await;
    assert_eq!(transfers.len(), 2);
    let amounts: Vec<i64> =
        transfers.iter().map(|t| t["acquired_amount"].as_i64().unwrap()).collect();
    assert!(amounts.contains(&-40) && amounts.contains(&40));
    for transfer in &transfers {
        match transfer["acquired_amount"].as_i64().unwrap() {
            -40 => {
                assert_eq!(transfer["principal"], 60);
                assert_eq!(transfer["sender"], "2");
                assert_eq!(transfer["recipient"], "3");
            }
            40 => {
                assert_eq!(transfer["principal"], 40);
                assert_eq!(transfer["sender"], "2");
                assert_eq!(transfer["recipient"], "3");
            }
            other => panic!("unexpected amount {other}"),
        }
    }

    assert_eq!(h.account(1, 2).await.unwrap().principal, 60);
    assert_eq!(h.account(1, 3).await.unwrap().principal, 40);
    h.assert_lock_invariants(1, 2).await;

    // Scenario 4: redeliver both the finalization and the balance change.
    h.process(InboundMessage::FinalizeTransfer(finalize), commit_at + Duration::seconds(1)).await;
    for payload in change_payloads {
        let message: InboundMessage = serde_json::from_value(payload).unwrap();
        h.process(message, commit_at + Duration::seconds(1)).await;
    }

    assert_eq!(h.account(1, 2).await.unwrap().principal, 60);
    assert_eq!(h.account(1, 3).await.unwrap().principal, 40);
    assert_eq!(h.drain(OutboxQueue::AccountTransfer).await.len(), 0);
    // The redelivered, already-gone finalization is ignored entirely.
    assert_eq!(h.drain(OutboxQueue::FinalizedTransfer).await.len(), 0);
}

/// Scenario 5: an out-of-order configuration is ignored.
#[tokio::test]
async fn out_of_order_config_is_ignored() {
    let h = Harness::new();
    h.configure(1, 2, t0(), 5, 10.0, 0, "").await;
    h.configure(1, 2, t0(), 3, 99.0, 0, "").await;

    let account = h.account(1, 2).await.unwrap();
    assert_eq!(account.last_config_seqnum, 5);
    assert_eq!(account.negligible_amount, 10.0);
    assert_eq!(h.drain(OutboxQueue::AccountUpdate).await.len(), 1);
}

/// Processing the exact same configuration twice emits one update, not two.
#[tokio::test]
async fn redelivered_config_is_idempotent() {
    let h = Harness::new();
    h.configure(1, 2, t0(), 0, 10.0, 0, "").await;
    h.configure(1, 2, t0(), 0, 10.0, 0, "").await;

    assert_eq!(h.drain(OutboxQueue::AccountUpdate).await.len(), 1);
    let account = h.account(1, 2).await.unwrap();
    assert_eq!(account.last_change_seqnum, 1);
}

/// Scenario 6: a demurrage-squeezed commit fails all-or-nothing.
#[tokio::test]
async fn demurrage_squeeze_fails_the_commit() {
    // A long commit period, so the squeeze (not the deadline) decides.
    let policy = Policy { commit_period: Duration::days(200), ..Policy::default() };
    let h = Harness::with_policy(policy);
    h.configure(1, 2, t0(), 0, 0.0, 0, "").await;
    h.configure(1, 3, t0(), 0, 0.0, 0, "").await;
    h.fund(1, 2, 100, t0()).await;
    h.fetcher.set_status(1, 3, AccountStatus::Reachable);

    // Put the account under full demurrage.
    {
        let mut tx = h.store.begin().await.unwrap();
        let mut account = tx.get_account(1, 2).await.unwrap().unwrap();
        account.interest_rate = -50.0;
        tx.update_account(&account).await.unwrap();
        tx.commit().await.unwrap();
    }

    h.process(InboundMessage::PrepareTransfer(h.prepare_message(2, 1, 100, "3")), t0()).await;
    let prepared = h.drain(OutboxQueue::PreparedTransfer).await;
    assert_eq!(prepared[0]["locked_amount"], 100);
    assert_eq!(prepared[0]["demurrage_rate"], -50.0);
    let transfer_id = prepared[0]["transfer_id"].as_i64().unwrap();

    let commit_at = t0() + Duration::days(180);
    h.process(InboundMessage::FinalizeTransfer(h.finalize_message(2, transfer_id, 100)), commit_at)
        .await;

    let finalized = h.drain(OutboxQueue::FinalizedTransfer).await;
    assert_eq!(finalized.len(), 1);
    assert_eq!(finalized[0]["status_code"], status::INSUFFICIENT_AVAILABLE_AMOUNT);
    assert_eq!(finalized[0]["committed_amount"], 0);

    // The lock was released; nothing moved.
    let account = h.account(1, 2).await.unwrap();
    assert_eq!(account.principal, 100);
    assert_eq!(account.total_locked_amount, 0);
    h.assert_lock_invariants(1, 2).await;
}

/// Boundary: a zero-minimum prepare on an empty account locks zero.
#[tokio::test]
async fn zero_minimum_prepare_succeeds_on_an_empty_account() {
    let h = Harness::new();
    h.configure(1, 2, t0(), 0, 0.0, 0, "").await;
    h.configure(1, 3, t0(), 0, 0.0, 0, "").await;
    h.fetcher.set_status(1, 3, AccountStatus::Reachable);

    h.process(InboundMessage::PrepareTransfer(h.prepare_message(2, 0, 50, "3")), t0()).await;

    let prepared = h.drain(OutboxQueue::PreparedTransfer).await;
    assert_eq!(prepared.len(), 1);
    assert_eq!(prepared[0]["locked_amount"], 0);
    h.assert_lock_invariants(1, 2).await;
}

/// An insufficient account rejects with the current total locked amount.
#[tokio::test]
async fn insufficient_funds_reject_with_total_locked_amount() {
    let h = Harness::new();
    h.configure(1, 2, t0(), 0, 0.0, 0, "").await;
    h.fund(1, 2, 30, t0()).await;
    h.fetcher.set_status(1, 3, AccountStatus::Reachable);

    h.process(InboundMessage::PrepareTransfer(h.prepare_message(2, 50, 80, "3")), t0()).await;

    let rejections = h.drain(OutboxQueue::RejectedTransfer).await;
    assert_eq!(rejections.len(), 1);
    assert_eq!(rejections[0]["status_code"], status::INSUFFICIENT_AVAILABLE_AMOUNT);
    assert_eq!(rejections[0]["total_locked_amount"], 0);
}

/// Missing senders and unreachable recipients are rejected explicitly.
#[tokio::test]
async fn prepare_rejections() {
    let h = Harness::new();
    h.process(InboundMessage::PrepareTransfer(h.prepare_message(2, 1, 40, "3")), t0()).await;
    let rejections = h.drain(OutboxQueue::RejectedTransfer).await;
    assert_eq!(rejections[0]["status_code"], status::NO_SENDER);

    h.configure(1, 2, t0(), 0, 0.0, 0, "").await;
    h.fund(1, 2, 100, t0()).await;

    // Recipient not reachable (stub answers Nonexistent by default).
    h.process(InboundMessage::PrepareTransfer(h.prepare_message(2, 1, 40, "3")), t0()).await;
    let rejections = h.drain(OutboxQueue::RejectedTransfer).await;
    assert_eq!(rejections[0]["status_code"], status::RECIPIENT_UNREACHABLE);

    // Sending to oneself.
    h.process(InboundMessage::PrepareTransfer(h.prepare_message(2, 1, 40, "2")), t0()).await;
    let rejections = h.drain(OutboxQueue::RejectedTransfer).await;
    assert_eq!(rejections[0]["status_code"], status::RECIPIENT_SAME_AS_SENDER);

    // The fetch API being down must reject, never silently allow.
    h.fetcher.set_unavailable(true);
    h.process(InboundMessage::PrepareTransfer(h.prepare_message(2, 1, 40, "3")), t0()).await;
    let rejections = h.drain(OutboxQueue::RejectedTransfer).await;
    assert_eq!(rejections[0]["status_code"], status::RECIPIENT_UNREACHABLE);
    h.fetcher.set_unavailable(false);

    // Scheduled-for-deletion senders cannot prepare.
    h.configure(1, 2, t0() + Duration::seconds(1), 1, 0.0, 1, "").await;
    h.fetcher.set_status(1, 3, AccountStatus::Reachable);
    h.process(InboundMessage::PrepareTransfer(h.prepare_message(2, 1, 40, "3")), t0()).await;
    let rejections = h.drain(OutboxQueue::RejectedTransfer).await;
    assert_eq!(rejections[0]["status_code"], status::SENDER_SCHEDULED_FOR_DELETION);

    h.assert_lock_invariants(1, 2).await;
}

/// A commit past the deadline fails with TIMEOUT and releases the lock.
#[tokio::test]
async fn late_commit_times_out() {
    let h = Harness::new();
    h.configure(1, 2, t0(), 0, 0.0, 0, "").await;
    h.configure(1, 3, t0(), 0, 0.0, 0, "").await;
    h.fund(1, 2, 100, t0()).await;
    h.fetcher.set_status(1, 3, AccountStatus::Reachable);

    h.process(InboundMessage::PrepareTransfer(h.prepare_message(2, 1, 40, "3")), t0()).await;
    let prepared = h.drain(OutboxQueue::PreparedTransfer).await;
    let transfer_id = prepared[0]["transfer_id"].as_i64().unwrap();

    // Default commit period is 90 days.
    let too_late = t0() + Duration::days(120);
    h.process(InboundMessage::FinalizeTransfer(h.finalize_message(2, transfer_id, 40)), too_late)
        .await;

    let finalized = h.drain(OutboxQueue::FinalizedTransfer).await;
    assert_eq!(finalized[0]["status_code"], status::TIMEOUT);
    assert_eq!(finalized[0]["committed_amount"], 0);
    assert_eq!(h.account(1, 2).await.unwrap().principal, 100);
    h.assert_lock_invariants(1, 2).await;
}

/// Invalid configurations are rejected without mutating the account.
#[tokio::test]
async fn invalid_config_is_rejected() {
    let h = Harness::new();
    h.configure(1, 2, t0(), 0, 10.0, 0, "").await;
    h.drain(OutboxQueue::AccountUpdate).await;

    h.configure(1, 2, t0() + Duration::seconds(1), 1, -5.0, 0, "").await;

    let rejections = h.drain(OutboxQueue::RejectedConfig).await;
    assert_eq!(rejections.len(), 1);
    assert_eq!(rejections[0]["rejection_code"], status::INVALID_NEGLIGIBLE_AMOUNT);
    let account = h.account(1, 2).await.unwrap();
    assert_eq!(account.negligible_amount, 10.0);
    assert_eq!(account.last_config_seqnum, 0);
    assert_eq!(h.drain(OutboxQueue::AccountUpdate).await.len(), 0);

    // Root accounts additionally validate their config data.
    h.configure(1, 0, t0(), 0, 0.0, 0, r#"{"rate": 500.0}"#).await;
    let rejections = h.drain(OutboxQueue::RejectedConfig).await;
    assert_eq!(rejections[0]["rejection_code"], status::INVALID_RATE);
    assert!(h.account(1, 0).await.is_none());

    h.configure(1, 0, t0(), 1, 0.0, 0, "not json").await;
    let rejections = h.drain(OutboxQueue::RejectedConfig).await;
    assert_eq!(rejections[0]["rejection_code"], status::INVALID_CONFIG);
}

/// The debtor's configured rate reaches creditor accounts through the
/// scanner + chore pipeline, and the accrued interest is capitalized as a
/// debtor payment that conserves value against the root account.
#[tokio::test]
async fn interest_rate_sync_and_capitalization() {
    let h = Harness::new();
    let root_config = r#"{"type": "RootConfigData", "rate": 10.0}"#;
    h.configure(1, 0, t0(), 0, 0.0, 0, root_config).await;
    h.configure(1, 2, t0(), 0, 0.0, 0, "").await;
    h.fund(1, 2, 1_000_000, t0()).await;
    h.fetcher.set_root_config(
        1,
        RootConfigData { interest_rate_target: 10.0, info: None },
    );

    // Sweep: the rate differs from the target, a chore is enqueued.
    let t1 = t0() + Duration::days(8);
    h.engine.scan_accounts_once(t1).await.unwrap();
    assert!(h.run_chores(t1).await >= 1);
    let account = h.account(1, 2).await.unwrap();
    assert_eq!(account.interest_rate, 10.0);
    assert_eq!(account.previous_interest_rate, 0.0);

    // A year later the accrued interest crosses the capitalization
    // threshold.
    let t2 = t1 + Duration::days(366);
    h.engine.scan_accounts_once(t2).await.unwrap();
    h.run_chores(t2).await;

    let account = h.account(1, 2).await.unwrap();
    assert!(
        account.principal > 1_090_000 && account.principal < 1_110_000,
        "principal = {}",
        account.principal
    );
    assert!(account.interest.abs() < 1.0);

    // The opposite side lands on the root account.
    h.deliver_balance_changes(t2).await;
    let root = h.account(1, 0).await.unwrap();
    assert_eq!(root.principal, -(account.principal - 1_000_000));

    let transfers = h.drain(OutboxQueue::AccountTransfer).await;
    assert!(transfers.iter().any(|t| t["coordinator_type"] == "interest"));
}

/// Heartbeats re-announce an idle account without changing its version.
#[tokio::test]
async fn idle_accounts_heartbeat() {
    let h = Harness::new();
    h.configure(1, 2, t0(), 0, 10.0, 0, "").await;
    h.drain(OutboxQueue::AccountUpdate).await;

    let account_before = h.account(1, 2).await.unwrap();

    let t1 = t0() + Duration::days(8);
    let stats = h.engine.scan_accounts_once(t1).await.unwrap();
    assert_eq!(stats.heartbeats, 1);

    let updates = h.drain(OutboxQueue::AccountUpdate).await;
    assert_eq!(updates.len(), 1);
    assert_eq!(updates[0]["last_change_seqnum"], 1);

    let account_after = h.account(1, 2).await.unwrap();
    assert_eq!(account_after.last_change_seqnum, account_before.last_change_seqnum);
    assert_eq!(account_after.last_change_ts, account_before.last_change_ts);
    assert_eq!(account_after.last_heartbeat_ts, t1);

    // An immediate second sweep stays quiet.
    let stats = h.engine.scan_accounts_once(t1 + Duration::hours(1)).await.unwrap();
    assert_eq!(stats.heartbeats, 0);
}

/// Stale prepared transfers get their coordinator reminded, once per
/// reminder interval.
#[tokio::test]
async fn stale_prepared_transfers_are_reminded() {
    let h = Harness::new();
    h.configure(1, 2, t0(), 0, 0.0, 0, "").await;
    h.configure(1, 3, t0(), 0, 0.0, 0, "").await;
    h.fund(1, 2, 100, t0()).await;
    h.fetcher.set_status(1, 3, AccountStatus::Reachable);

    h.process(InboundMessage::PrepareTransfer(h.prepare_message(2, 1, 40, "3")), t0()).await;
    let original = h.drain(OutboxQueue::PreparedTransfer).await;

    let t1 = t0() + Duration::days(8);
    let stats = h.engine.scan_prepared_transfers_once(t1).await.unwrap();
    assert_eq!(stats.reminders, 1);

    let reminders = h.drain(OutboxQueue::PreparedTransfer).await;
    assert_eq!(reminders.len(), 1);
    // Identical except for the emission timestamp.
    let mut original_message = original[0].clone();
    let mut reminder = reminders[0].clone();
    original_message.as_object_mut().unwrap().remove("ts");
    reminder.as_object_mut().unwrap().remove("ts");
    assert_eq!(original_message, reminder);

    // No double reminders within the interval.
    let stats = h.engine.scan_prepared_transfers_once(t1 + Duration::hours(1)).await.unwrap();
    assert_eq!(stats.reminders, 0);
}

/// The registered-balance-change archive is collected only when a real
/// retention horizon is configured.
#[tokio::test]
async fn balance_change_archive_collection() {
    // Default policy: horizon at the epoch, GC disabled.
    let h = Harness::new();
    h.configure(1, 2, t0(), 0, 0.0, 0, "").await;
    h.fund(1, 2, 100, t0()).await;
    assert_eq!(h.engine.scan_balance_changes_once(t0()).await.unwrap(), 0);

    // A real horizon collects rows committed before it.
    let policy = Policy {
        balance_change_retention_date: t0() + Duration::days(1),
        ..Policy::default()
    };
    let h = Harness::with_policy(policy);
    h.configure(1, 2, t0(), 0, 0.0, 0, "").await;
    h.fund(1, 2, 100, t0()).await;
    assert_eq!(h.engine.scan_balance_changes_once(t0() + Duration::days(2)).await.unwrap(), 1);
}

/// Accounts created by an incoming transfer are unreachable until their
/// owner configures them.
#[tokio::test]
async fn implicit_creation_is_unreachable_until_configured() {
    let h = Harness::new();
    h.fund(1, 7, 50, t0()).await;

    let account = h.account(1, 7).await.unwrap();
    assert!(account.is_unreachable());
    assert_eq!(account.principal, 50);

    h.configure(1, 7, t0() + Duration::seconds(5), 0, 2.0, 0, "").await;
    let account = h.account(1, 7).await.unwrap();
    assert!(!account.is_unreachable());
}

/// Principal saturates at the i64 bounds and flags the overflow instead of
/// wrapping.
#[tokio::test]
async fn principal_saturates_with_the_overflow_flag() {
    let h = Harness::new();
    h.configure(1, 2, t0(), 0, 0.0, 0, "").await;
    h.fund(1, 2, i64::MAX - 5, t0()).await;

    h.process(
        InboundMessage::PendingBalanceChange(PendingBalanceChange {
            debtor_id: 1,
            creditor_id: 2,
            change_id: 2_000_001,
            coordinator_type: "direct".into(),
            transfer_note_format: String::new(),
            transfer_note: String::new(),
            committed_at: t0(),
            principal_delta: 1_000,
            other_creditor_id: 999,
        }),
        t0(),
    )
    .await;

    let account = h.account(1, 2).await.unwrap();
    assert_eq!(account.principal, i64::MAX);
    assert_ne!(account.status_flags & ledgerd_store::STATUS_OVERFLOWN_FLAG, 0);
}

/// Messages for accounts outside the configured shard are dropped.
#[tokio::test]
async fn foreign_shard_messages_are_dropped() {
    use ledgerd_protocol::{shard_key, ShardingRealm};

    // A realm that owns only the opposite half of the key space.
    let prefix = !shard_key(1, 2) & 0x80_0000;
    let policy = Policy { realm: ShardingRealm::new(0x80_0000, prefix), ..Policy::default() };
    let h = Harness::with_policy(policy);

    h.configure(1, 2, t0(), 0, 10.0, 0, "").await;
    assert!(h.account(1, 2).await.is_none());
    assert_eq!(h.drain(OutboxQueue::AccountUpdate).await.len(), 0);
}
