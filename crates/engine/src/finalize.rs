//! `FinalizeTransfer` handler: commits or dismisses a prepared transfer.
//!
//! The commit is all-or-nothing. The requested amount (clamped to the
//! locked amount) succeeds only while the deadline has not passed, the
//! sender's interest rate has not dropped below the agreed minimum, and the
//! demurrage-adjusted funds still cover it; otherwise the lock is released
//! and a non-OK status is reported with a zero amount.

use chrono::{DateTime, Utc};
use tracing::{debug, warn};

use ledgerd_core::{clamp_principal_f64, compound_factor};
use ledgerd_protocol::{
    status, FinalizeTransfer, FinalizedTransferSignal, OutboundMessage, PendingBalanceChange,
    TRANSFER_NOTE_MAX_BYTES,
};
use ledgerd_store::{LedgerTx, PreparedTransferRow};

use crate::account_logic::{apply_change, current_balance};
use crate::balance::emit_account_transfer;
use crate::error::EngineError;
use crate::output::{emit_account_update, enqueue_message};
use crate::policy::Policy;

fn valid_note_format(s: &str) -> bool {
    s.len() <= 8 && s.bytes().all(|b| b.is_ascii_alphanumeric() || b == b'.' || b == b'-')
}

/// The largest amount the prepared transfer can still commit at `now`:
/// whichever is greater of the demurrage-adjusted lock and what the
/// account could spend after this lock is released.
fn securely_available(
    transfer: &PreparedTransferRow,
    account_balance: f64,
    total_locked_amount: i64,
    now: DateTime<Utc>,
) -> i64 {
    let passed_seconds = (now - transfer.prepared_at).num_milliseconds() as f64 / 1000.0;
    let worst_case_factor = compound_factor(transfer.demurrage_rate, passed_seconds);
    let (demurraged_lock, _) =
        clamp_principal_f64(transfer.locked_amount as f64 * worst_case_factor);
    let (balance, _) = clamp_principal_f64(account_balance);
    let expendable = balance
        .saturating_sub(total_locked_amount)
        .saturating_add(transfer.locked_amount);
    demurraged_lock.max(expendable)
}

pub(crate) async fn handle(
    tx: &mut dyn LedgerTx,
    policy: &Policy,
    message: &FinalizeTransfer,
    now: DateTime<Utc>,
) -> Result<(), EngineError> {
    if message.transfer_note.len() > TRANSFER_NOTE_MAX_BYTES
        || !valid_note_format(&message.transfer_note_format)
        || message.finalization_flags < 0
    {
        warn!(
            debtor_id = message.debtor_id,
            creditor_id = message.creditor_id,
            transfer_id = message.transfer_id,
            "dropping a malformed finalization request"
        );
        return Ok(());
    }

    let Some(transfer) = tx
        .get_prepared_transfer(message.debtor_id, message.creditor_id, message.transfer_id)
        .await?
    else {
        // Unknown transfer: already finalized, or never prepared here.
        debug!(
            debtor_id = message.debtor_id,
            creditor_id = message.creditor_id,
            transfer_id = message.transfer_id,
            "ignoring a finalization for an unknown prepared transfer"
        );
        return Ok(());
    };
    if transfer.coordinator_type != message.coordinator_type
        || transfer.coordinator_id != message.coordinator_id
        || transfer.coordinator_request_id != message.coordinator_request_id
    {
        warn!(
            transfer_id = message.transfer_id,
            "ignoring a finalization with mismatched coordinator identity"
        );
        return Ok(());
    }
    let Some(mut account) = tx.get_account(message.debtor_id, message.creditor_id).await? else {
        warn!(
            debtor_id = message.debtor_id,
            creditor_id = message.creditor_id,
            "prepared transfer without a sender account; releasing the lock"
        );
        tx.delete_prepared_transfer(message.debtor_id, message.creditor_id, message.transfer_id)
            .await?;
        return Ok(());
    };

    let requested = message.committed_amount.max(0).min(transfer.locked_amount);
    let mut status_code = status::OK;
    let mut committed_amount = 0_i64;
    if requested > 0 {
        if now > transfer.deadline {
            status_code = status::TIMEOUT;
        } else if account.interest_rate < transfer.min_interest_rate {
            status_code = status::NEWER_INTEREST_RATE;
        } else {
            let balance = current_balance(&account, now);
            let allowed =
                securely_available(&transfer, balance, account.total_locked_amount, now);
            if requested > allowed {
                status_code = status::INSUFFICIENT_AVAILABLE_AMOUNT;
            } else {
                committed_amount = requested;
            }
        }
    }

    tx.delete_prepared_transfer(message.debtor_id, message.creditor_id, message.transfer_id)
        .await?;
    account.total_locked_amount =
        account.total_locked_amount.saturating_sub(transfer.locked_amount).max(0);
    account.pending_transfers_count = (account.pending_transfers_count - 1).max(0);

    if committed_amount > 0 {
        apply_change(&mut account, -committed_amount, 0.0, now);
        account.last_outgoing_transfer_date = now.date_naive();
        emit_account_transfer(
            tx,
            &mut account,
            &message.coordinator_type,
            -committed_amount,
            transfer.recipient_creditor_id,
            &message.transfer_note_format,
            &message.transfer_note,
            now,
            now,
        )
        .await?;

        let change_id = tx.next_change_id().await?;
        enqueue_message(
            tx,
            &OutboundMessage::PendingBalanceChange(PendingBalanceChange {
                debtor_id: message.debtor_id,
                creditor_id: transfer.recipient_creditor_id,
                change_id,
                coordinator_type: message.coordinator_type.clone(),
                transfer_note_format: message.transfer_note_format.clone(),
                transfer_note: message.transfer_note.clone(),
                committed_at: now,
                principal_delta: committed_amount,
                other_creditor_id: message.creditor_id,
            }),
        )
        .await?;
        emit_account_update(tx, &mut account, policy, now).await?;
    } else {
        apply_change(&mut account, 0, 0.0, now);
    }
    tx.update_account(&account).await?;

    enqueue_message(
        tx,
        &OutboundMessage::FinalizedTransfer(FinalizedTransferSignal {
            debtor_id: message.debtor_id,
            creditor_id: message.creditor_id,
            transfer_id: message.transfer_id,
            coordinator_type: message.coordinator_type.clone(),
            coordinator_id: message.coordinator_id,
            coordinator_request_id: message.coordinator_request_id,
            prepared_at: transfer.prepared_at,
            committed_amount,
            total_locked_amount: account.total_locked_amount,
            status_code: status_code.to_string(),
            ts: now,
        }),
    )
    .await?;
    Ok(())
}
