//! Balance-change application and `AccountTransfer` emission.
//!
//! A committed transfer reaches the counterparty as a `PendingBalanceChange`
//! message. Applying one is idempotent: the registered-balance-change table
//! remembers every `(debtor_id, other_creditor_id, change_id)` applied, so
//! a broker redelivery changes nothing.

use chrono::{DateTime, Utc};
use tracing::debug;

use ledgerd_core::{i64_to_u64, ROOT_CREDITOR_ID};
use ledgerd_protocol::{
    AccountTransfer, OutboundMessage, PendingBalanceChange, TRANSFER_FLAG_NEGLIGIBLE,
};
use ledgerd_store::{AccountRow, LedgerTx};

use crate::account_logic::{apply_change, is_negligible, new_account};
use crate::error::EngineError;
use crate::output::{emit_account_update, enqueue_message};
use crate::policy::Policy;
use crate::{CT_DELETE_ACCOUNT, CT_INTEREST};

/// Emits the account-side record of a committed transfer, allocating the
/// next transfer number. Negligible *incoming* transfers are suppressed
/// entirely; outgoing ones are emitted with the negligible flag, because
/// the coordinator needs the record to close its books.
#[allow(clippy::too_many_arguments)]
pub(crate) async fn emit_account_transfer(
    tx: &mut dyn LedgerTx,
    account: &mut AccountRow,
    coordinator_type: &str,
    acquired_amount: i64,
    other_creditor_id: i64,
    transfer_note_format: &str,
    transfer_note: &str,
    committed_at: DateTime<Utc>,
    now: DateTime<Utc>,
) -> Result<(), EngineError> {
    if acquired_amount == 0 {
        return Ok(());
    }
    let negligible = is_negligible(acquired_amount, account.negligible_amount);
    if acquired_amount > 0 && negligible {
        return Ok(());
    }

    let previous_transfer_number = account.last_transfer_number;
    account.last_transfer_number += 1;
    account.last_transfer_committed_at = committed_at;

    let this_account = i64_to_u64(account.creditor_id).to_string();
    let other_account = i64_to_u64(other_creditor_id).to_string();
    let (sender, recipient) = if acquired_amount > 0 {
        (other_account, this_account)
    } else {
        (this_account, other_account)
    };

    enqueue_message(
        tx,
        &OutboundMessage::AccountTransfer(AccountTransfer {
            debtor_id: account.debtor_id,
            creditor_id: account.creditor_id,
            creation_date: account.creation_date,
            transfer_number: account.last_transfer_number,
            coordinator_type: coordinator_type.to_string(),
            sender,
            recipient,
            acquired_amount,
            transfer_note_format: transfer_note_format.to_string(),
            transfer_note: transfer_note.to_string(),
            committed_at,
            principal: account.principal,
            previous_transfer_number,
            transfer_flags: if negligible { TRANSFER_FLAG_NEGLIGIBLE } else { 0 },
            ts: now,
        }),
    )
    .await?;
    Ok(())
}

/// `PendingBalanceChange` handler. Creates the account when it does not
/// exist: an in-flight transfer can resurrect a purged account, which then
/// stays unreachable until its owner configures it again.
pub(crate) async fn handle(
    tx: &mut dyn LedgerTx,
    policy: &Policy,
    message: &PendingBalanceChange,
    now: DateTime<Utc>,
) -> Result<(), EngineError> {
    let newly_registered = tx
        .register_balance_change(
            message.debtor_id,
            message.other_creditor_id,
            message.change_id,
            message.committed_at,
        )
        .await?;
    if !newly_registered {
        debug!(
            debtor_id = message.debtor_id,
            other_creditor_id = message.other_creditor_id,
            change_id = message.change_id,
            "balance change already applied"
        );
        return Ok(());
    }

    let (mut account, created) =
        match tx.get_account(message.debtor_id, message.creditor_id).await? {
            Some(account) => (account, false),
            None => {
                let account = new_account(message.debtor_id, message.creditor_id, now, false);
                tx.insert_account(&account).await?;
                (account, true)
            }
        };
    if created {
        debug!(
            debtor_id = message.debtor_id,
            creditor_id = message.creditor_id,
            "account created by an incoming balance change"
        );
    }

    apply_change(&mut account, message.principal_delta, 0.0, now);
    emit_account_transfer(
        tx,
        &mut account,
        &message.coordinator_type,
        message.principal_delta,
        message.other_creditor_id,
        &message.transfer_note_format,
        &message.transfer_note,
        message.committed_at,
        now,
    )
    .await?;
    emit_account_update(tx, &mut account, policy, now).await?;
    tx.update_account(&account).await?;
    Ok(())
}

/// An internal transfer between an account and its debtor's root account:
/// interest capitalization and the zero-out payment made before deletion.
/// The local side is applied directly; the root account gets the opposite
/// delta as a self-posted balance change.
pub(crate) async fn make_debtor_payment(
    tx: &mut dyn LedgerTx,
    account: &mut AccountRow,
    coordinator_type: &str,
    amount: i64,
    now: DateTime<Utc>,
) -> Result<(), EngineError> {
    debug_assert!(!account.is_root());
    if amount == 0 {
        return Ok(());
    }

    let change_id = tx.next_change_id().await?;
    enqueue_message(
        tx,
        &OutboundMessage::PendingBalanceChange(PendingBalanceChange {
            debtor_id: account.debtor_id,
            creditor_id: ROOT_CREDITOR_ID,
            change_id,
            coordinator_type: coordinator_type.to_string(),
            transfer_note_format: String::new(),
            transfer_note: String::new(),
            committed_at: now,
            principal_delta: -amount,
            other_creditor_id: account.creditor_id,
        }),
    )
    .await?;

    // Capitalization moves value between interest and principal on the
    // same account; other debtor payments only move principal.
    let interest_delta = if coordinator_type == CT_INTEREST { -(amount as f64) } else { 0.0 };
    apply_change(account, amount, interest_delta, now);
    if coordinator_type == CT_DELETE_ACCOUNT {
        account.interest = 0.0;
    }
    emit_account_transfer(
        tx,
        account,
        coordinator_type,
        amount,
        ROOT_CREDITOR_ID,
        "",
        "",
        now,
        now,
    )
    .await?;
    Ok(())
}
