//! `PrepareTransfer` handler: locks sender funds after verifying that the
//! recipient can actually receive them.

use chrono::{DateTime, Utc};
use tracing::warn;

use ledgerd_core::{i64_to_u64, parse_account_identity};
use ledgerd_fetch::{AccountStatus, AccountStatusFetcher};
use ledgerd_protocol::{
    status, OutboundMessage, PrepareTransfer, PreparedTransferSignal, RejectedTransfer,
    COORDINATOR_TYPE_MAX_LEN,
};
use ledgerd_store::{LedgerTx, PreparedTransferRow};

use crate::account_logic::{apply_change, available_amount};
use crate::error::EngineError;
use crate::output::enqueue_message;
use crate::policy::Policy;

/// Coordinator types are lowercase identifiers, 1..=30 characters, no
/// double underscores.
fn valid_coordinator_type(s: &str) -> bool {
    !s.is_empty()
        && s.len() <= COORDINATOR_TYPE_MAX_LEN
        && s.as_bytes()[0].is_ascii_lowercase()
        && s.bytes().all(|b| b.is_ascii_lowercase() || b.is_ascii_digit() || b == b'_')
        && !s.contains("__")
}

async fn reject(
    tx: &mut dyn LedgerTx,
    message: &PrepareTransfer,
    status_code: &str,
    total_locked_amount: i64,
    now: DateTime<Utc>,
) -> Result<(), EngineError> {
    enqueue_message(
        tx,
        &OutboundMessage::RejectedTransfer(RejectedTransfer {
            debtor_id: message.debtor_id,
            creditor_id: message.creditor_id,
            coordinator_type: message.coordinator_type.clone(),
            coordinator_id: message.coordinator_id,
            coordinator_request_id: message.coordinator_request_id,
            status_code: status_code.to_string(),
            total_locked_amount,
            ts: now,
        }),
    )
    .await?;
    Ok(())
}

pub(crate) async fn handle(
    tx: &mut dyn LedgerTx,
    policy: &Policy,
    fetcher: &dyn AccountStatusFetcher,
    message: &PrepareTransfer,
    now: DateTime<Utc>,
) -> Result<(), EngineError> {
    if !valid_coordinator_type(&message.coordinator_type) {
        warn!(
            coordinator_type = %message.coordinator_type,
            "dropping a transfer request with a malformed coordinator type"
        );
        return Ok(());
    }

    let Some(mut account) = tx.get_account(message.debtor_id, message.creditor_id).await? else {
        return reject(tx, message, status::NO_SENDER, 0, now).await;
    };

    if account.is_scheduled_for_deletion() {
        let locked = account.total_locked_amount;
        return reject(tx, message, status::SENDER_SCHEDULED_FOR_DELETION, locked, now).await;
    }
    if message.min_locked_amount < 0
        || message.max_locked_amount < message.min_locked_amount
        || message.max_commit_delay < 0
        || !message.min_interest_rate.is_finite()
    {
        let locked = account.total_locked_amount;
        return reject(tx, message, status::INVALID_REQUEST, locked, now).await;
    }

    let Some(recipient_creditor_id) = parse_account_identity(&message.recipient) else {
        let locked = account.total_locked_amount;
        return reject(tx, message, status::RECIPIENT_UNREACHABLE, locked, now).await;
    };
    if recipient_creditor_id == message.creditor_id {
        let locked = account.total_locked_amount;
        return reject(tx, message, status::RECIPIENT_SAME_AS_SENDER, locked, now).await;
    }

    // The issuer's account may go arbitrarily negative; everyone else must
    // keep at least the requested minimum balance (never below zero).
    let available = if account.is_root() {
        i64::MAX
    } else {
        available_amount(&account, now).saturating_sub(message.min_account_balance.max(0))
    };
    let locked_amount = message.max_locked_amount.min(available).max(0);
    if locked_amount < message.min_locked_amount {
        let locked = account.total_locked_amount;
        return reject(tx, message, status::INSUFFICIENT_AVAILABLE_AMOUNT, locked, now).await;
    }

    // Only lock the funds when the recipient is known to be able to take
    // them; a permanently failing fetch rejects rather than locks.
    let recipient_status = fetcher
        .account_status(message.debtor_id, recipient_creditor_id)
        .await
        .unwrap_or(AccountStatus::Unreachable);
    if recipient_status != AccountStatus::Reachable {
        let locked = account.total_locked_amount;
        return reject(tx, message, status::RECIPIENT_UNREACHABLE, locked, now).await;
    }

    account.last_transfer_id += 1;
    let transfer_id = account.last_transfer_id;
    let deadline = (message.ts + chrono::Duration::seconds(message.max_commit_delay as i64))
        .min(now + policy.commit_period);
    let demurrage_rate = if account.is_root() { 0.0 } else { policy.demurrage_rate };
    let transfer = PreparedTransferRow {
        debtor_id: message.debtor_id,
        sender_creditor_id: message.creditor_id,
        transfer_id,
        coordinator_type: message.coordinator_type.clone(),
        coordinator_id: message.coordinator_id,
        coordinator_request_id: message.coordinator_request_id,
        recipient_creditor_id,
        locked_amount,
        prepared_at: now,
        deadline,
        demurrage_rate,
        min_interest_rate: message.min_interest_rate,
        last_reminder_ts: None,
    };
    tx.insert_prepared_transfer(&transfer).await?;

    account.total_locked_amount = account.total_locked_amount.saturating_add(locked_amount);
    account.pending_transfers_count += 1;
    apply_change(&mut account, 0, 0.0, now);
    tx.update_account(&account).await?;

    enqueue_message(
        tx,
        &OutboundMessage::PreparedTransfer(PreparedTransferSignal {
            debtor_id: transfer.debtor_id,
            creditor_id: transfer.sender_creditor_id,
            transfer_id: transfer.transfer_id,
            coordinator_type: transfer.coordinator_type.clone(),
            coordinator_id: transfer.coordinator_id,
            coordinator_request_id: transfer.coordinator_request_id,
            locked_amount: transfer.locked_amount,
            recipient: i64_to_u64(recipient_creditor_id).to_string(),
            prepared_at: transfer.prepared_at,
            demurrage_rate: transfer.demurrage_rate,
            deadline: transfer.deadline,
            min_interest_rate: transfer.min_interest_rate,
            ts: now,
        }),
    )
    .await?;
    Ok(())
}
