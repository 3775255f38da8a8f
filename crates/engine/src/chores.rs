//! Maintenance chores: interest-rate changes, debtor-info propagation,
//! interest capitalization, deletion attempts. Chores are idempotent and
//! safe to redeliver; each re-checks its own preconditions.

use chrono::{DateTime, Utc};
use tracing::debug;

use ledgerd_core::clamp_principal_f64;
use ledgerd_store::LedgerTx;

use crate::account_logic::{accrued_interest, apply_change, current_balance};
use crate::balance::make_debtor_payment;
use crate::error::EngineError;
use crate::output::emit_account_update;
use crate::policy::Policy;
use crate::{CT_DELETE_ACCOUNT, CT_INTEREST};

pub(crate) async fn change_interest_rate(
    tx: &mut dyn LedgerTx,
    policy: &Policy,
    debtor_id: i64,
    creditor_id: i64,
    interest_rate: f64,
    ts: DateTime<Utc>,
    now: DateTime<Utc>,
) -> Result<(), EngineError> {
    let Some(mut account) = tx.get_account(debtor_id, creditor_id).await? else {
        return Ok(());
    };
    if account.is_root() {
        // The issuer's account carries no interest; its rate target lives
        // in the root config data.
        return Ok(());
    }
    if ts < now - policy.message_max_delay {
        debug!(debtor_id, creditor_id, "ignoring a stale interest rate change");
        return Ok(());
    }
    // Coordinators were told (via AccountUpdate) that `min_interest_rate`
    // stays meaningful; rate changes must be spaced wider than the worst
    // message delay.
    if now < account.last_interest_rate_change_ts + policy.message_max_delay {
        debug!(debtor_id, creditor_id, "interest rate changed too recently");
        return Ok(());
    }
    if !interest_rate.is_finite() {
        return Ok(());
    }

    let new_rate = policy.clamp_interest_rate(interest_rate);
    if new_rate == account.interest_rate {
        return Ok(());
    }

    // Snapshot interest accrued at the old rate before switching.
    apply_change(&mut account, 0, 0.0, now);
    account.previous_interest_rate = account.interest_rate;
    account.interest_rate = new_rate;
    account.last_interest_rate_change_ts = now;
    emit_account_update(tx, &mut account, policy, now).await?;
    tx.update_account(&account).await?;
    Ok(())
}

pub(crate) async fn update_debtor_info(
    tx: &mut dyn LedgerTx,
    policy: &Policy,
    debtor_id: i64,
    creditor_id: i64,
    iri: &str,
    content_type: &str,
    sha256: Option<&[u8]>,
    ts: DateTime<Utc>,
    now: DateTime<Utc>,
) -> Result<(), EngineError> {
    let Some(mut account) = tx.get_account(debtor_id, creditor_id).await? else {
        return Ok(());
    };
    if ts < now - policy.message_max_delay {
        return Ok(());
    }

    let new_iri = if iri.is_empty() { None } else { Some(iri.to_string()) };
    let new_content_type =
        if content_type.is_empty() { None } else { Some(content_type.to_string()) };
    let new_sha256 = sha256.map(|bytes| bytes.to_vec());
    if account.debtor_info_iri == new_iri
        && account.debtor_info_content_type == new_content_type
        && account.debtor_info_sha256 == new_sha256
    {
        return Ok(());
    }

    account.debtor_info_iri = new_iri;
    account.debtor_info_content_type = new_content_type;
    account.debtor_info_sha256 = new_sha256;
    apply_change(&mut account, 0, 0.0, now);
    emit_account_update(tx, &mut account, policy, now).await?;
    tx.update_account(&account).await?;
    Ok(())
}

pub(crate) async fn capitalize_interest(
    tx: &mut dyn LedgerTx,
    policy: &Policy,
    debtor_id: i64,
    creditor_id: i64,
    now: DateTime<Utc>,
) -> Result<(), EngineError> {
    let Some(mut account) = tx.get_account(debtor_id, creditor_id).await? else {
        return Ok(());
    };
    if account.is_root() {
        return Ok(());
    }
    if now < account.last_interest_capitalization_ts + policy.min_capitalization_interval {
        return Ok(());
    }

    let (amount, _) = clamp_principal_f64(accrued_interest(&account, now));
    if amount == 0 {
        return Ok(());
    }
    account.last_interest_capitalization_ts = now;
    make_debtor_payment(tx, &mut account, CT_INTEREST, amount, now).await?;
    emit_account_update(tx, &mut account, policy, now).await?;
    tx.update_account(&account).await?;
    Ok(())
}

pub(crate) async fn try_to_delete_account(
    tx: &mut dyn LedgerTx,
    policy: &Policy,
    debtor_id: i64,
    creditor_id: i64,
    now: DateTime<Utc>,
) -> Result<(), EngineError> {
    let Some(mut account) = tx.get_account(debtor_id, creditor_id).await? else {
        return Ok(());
    };
    // Deleting whole currencies is not supported.
    if account.is_root() {
        return Ok(());
    }
    if !account.is_scheduled_for_deletion() || account.pending_transfers_count != 0 {
        return Ok(());
    }
    if now < account.last_deletion_attempt_ts + policy.deletion_attempt_interval {
        return Ok(());
    }

    let (balance, _) = clamp_principal_f64(current_balance(&account, now));
    if balance.unsigned_abs() as f64 > account.negligible_amount.max(2.0) {
        return Ok(());
    }

    account.last_deletion_attempt_ts = now;
    let had_balance = account.principal != 0 || account.interest != 0.0;
    if account.principal != 0 {
        // Zero out the remainder so the purge preconditions can be met.
        let remainder = -account.principal;
        make_debtor_payment(tx, &mut account, CT_DELETE_ACCOUNT, remainder, now).await?;
    } else if account.interest != 0.0 {
        apply_change(&mut account, 0, 0.0, now);
        account.interest = 0.0;
    }
    if had_balance {
        emit_account_update(tx, &mut account, policy, now).await?;
    }
    tx.update_account(&account).await?;
    Ok(())
}
