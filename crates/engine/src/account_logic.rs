//! Pure functions over the account record: accrual, availability,
//! negligibility, version bumps. The original system modeled these as lazy
//! computed properties; here they are free functions so every caller states
//! the moment "now" explicitly.

use chrono::{DateTime, Utc};

use ledgerd_core::{
    beginning_of_time, clamp_principal, clamp_principal_f64, compound_factor, first_transfer_id,
    i64_to_u64, increment_seqnum,
};
use ledgerd_protocol::{AccountUpdate, TRANSFER_NOTE_MAX_BYTES};
use ledgerd_store::{AccountRow, STATUS_OVERFLOWN_FLAG, STATUS_UNREACHABLE_FLAG};

use crate::policy::Policy;

/// A fresh account record. `configured` tells whether creation was driven
/// by an applied `ConfigureAccount` (reachable) or implicitly by an
/// incoming transfer (unreachable until its owner configures it).
pub(crate) fn new_account(
    debtor_id: i64,
    creditor_id: i64,
    now: DateTime<Utc>,
    configured: bool,
) -> AccountRow {
    let creation_date = now.date_naive();
    let first_id = first_transfer_id(creation_date);
    AccountRow {
        debtor_id,
        creditor_id,
        creation_date,
        principal: 0,
        interest: 0.0,
        interest_rate: 0.0,
        previous_interest_rate: 0.0,
        last_interest_rate_change_ts: beginning_of_time(),
        total_locked_amount: 0,
        pending_transfers_count: 0,
        last_transfer_id: first_id,
        last_transfer_number: first_id,
        last_transfer_committed_at: beginning_of_time(),
        last_change_ts: now,
        last_change_seqnum: 1,
        last_config_ts: beginning_of_time(),
        last_config_seqnum: 0,
        last_outgoing_transfer_date: beginning_of_time().date_naive(),
        last_heartbeat_ts: now,
        last_interest_capitalization_ts: now,
        last_deletion_attempt_ts: beginning_of_time(),
        negligible_amount: 0.0,
        config_flags: 0,
        config_data: String::new(),
        status_flags: if configured { 0 } else { STATUS_UNREACHABLE_FLAG },
        debtor_info_iri: None,
        debtor_info_content_type: None,
        debtor_info_sha256: None,
    }
}

/// Principal plus interest, accrued up to `now`. Only positive balances
/// accrue, and root accounts never do (the issuer pays no interest to
/// itself).
pub(crate) fn current_balance(account: &AccountRow, now: DateTime<Utc>) -> f64 {
    let balance = account.principal as f64 + account.interest;
    if account.is_root() || balance <= 0.0 {
        return balance;
    }
    let passed_seconds = (now - account.last_change_ts).num_milliseconds() as f64 / 1000.0;
    balance * compound_factor(account.interest_rate, passed_seconds)
}

/// Interest accrued up to `now` but not capitalized yet.
pub(crate) fn accrued_interest(account: &AccountRow, now: DateTime<Utc>) -> f64 {
    current_balance(account, now) - account.principal as f64
}

/// What the account can spend right now: `floor(principal + interest)`
/// minus the amounts locked by live prepared transfers.
pub(crate) fn available_amount(account: &AccountRow, now: DateTime<Utc>) -> i64 {
    let (balance, _) = clamp_principal_f64(current_balance(account, now));
    balance.saturating_sub(account.total_locked_amount)
}

pub(crate) fn is_negligible(amount: i64, negligible_amount: f64) -> bool {
    amount.unsigned_abs() as f64 <= negligible_amount
}

/// Advances the account version: `last_change_ts` never decreases, and the
/// seqnum increment makes `(ts, seqnum)` strictly later even when clocks
/// stand still.
pub(crate) fn bump_change(account: &mut AccountRow, now: DateTime<Utc>) {
    account.last_change_ts = account.last_change_ts.max(now);
    account.last_change_seqnum = increment_seqnum(account.last_change_seqnum);
}

/// Applies a principal/interest delta as one meaningful change: snapshots
/// the interest accrued so far, clamps the new principal (setting the
/// overflow bit on saturation), and bumps the account version.
pub(crate) fn apply_change(
    account: &mut AccountRow,
    principal_delta: i64,
    interest_delta: f64,
    now: DateTime<Utc>,
) {
    let new_interest = accrued_interest(account, now) + interest_delta;
    let (new_principal, overflown) =
        clamp_principal(account.principal as i128 + principal_delta as i128);
    account.interest = new_interest;
    account.principal = new_principal;
    if overflown {
        account.status_flags |= STATUS_OVERFLOWN_FLAG;
    }
    bump_change(account, now);
}

/// The full `AccountUpdate` payload for the account's current state.
pub(crate) fn account_update_message(
    account: &AccountRow,
    policy: &Policy,
    now: DateTime<Utc>,
) -> AccountUpdate {
    AccountUpdate {
        debtor_id: account.debtor_id,
        creditor_id: account.creditor_id,
        creation_date: account.creation_date,
        last_change_ts: account.last_change_ts,
        last_change_seqnum: account.last_change_seqnum,
        principal: account.principal,
        interest: account.interest,
        interest_rate: account.interest_rate,
        last_interest_rate_change_ts: account.last_interest_rate_change_ts,
        last_transfer_number: account.last_transfer_number,
        last_transfer_committed_at: account.last_transfer_committed_at,
        last_config_ts: account.last_config_ts,
        last_config_seqnum: account.last_config_seqnum,
        negligible_amount: account.negligible_amount,
        config_data: account.config_data.clone(),
        config_flags: account.config_flags,
        account_id: i64_to_u64(account.creditor_id).to_string(),
        debtor_info_iri: account.debtor_info_iri.clone().unwrap_or_default(),
        debtor_info_content_type: account.debtor_info_content_type.clone().unwrap_or_default(),
        debtor_info_sha256: account.debtor_info_sha256.clone(),
        transfer_note_max_bytes: TRANSFER_NOTE_MAX_BYTES as i32,
        demurrage_rate: if account.is_root() { 0.0 } else { policy.demurrage_rate },
        commit_period: policy.commit_period_seconds(),
        ttl: policy.account_ttl_seconds(),
        ts: now,
    }
}
