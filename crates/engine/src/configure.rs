//! `ConfigureAccount` handler.

use chrono::{DateTime, Utc};
use tracing::debug;

use ledgerd_core::{is_later_config, ROOT_CREDITOR_ID};
use ledgerd_protocol::{
    parse_root_config_data, status, ConfigDataError, ConfigureAccount, OutboundMessage,
    RejectedConfig, CONFIG_DATA_MAX_BYTES,
};
use ledgerd_store::{LedgerTx, STATUS_UNREACHABLE_FLAG};

use crate::account_logic::{apply_change, new_account};
use crate::error::EngineError;
use crate::output::{emit_account_update, enqueue_message};
use crate::policy::Policy;

/// Validates the configuration values. Returns the rejection code for an
/// unusable configuration.
fn validation_error(message: &ConfigureAccount) -> Option<&'static str> {
    if !message.negligible_amount.is_finite() || message.negligible_amount < 0.0 {
        return Some(status::INVALID_NEGLIGIBLE_AMOUNT);
    }
    if message.config_data.len() > CONFIG_DATA_MAX_BYTES {
        return Some(status::INVALID_CONFIG);
    }
    if message.creditor_id == ROOT_CREDITOR_ID {
        // The root account's config steers the whole currency; it must
        // parse.
        match parse_root_config_data(&message.config_data) {
            Ok(_) => {}
            Err(ConfigDataError::RateOutOfBounds) => return Some(status::INVALID_RATE),
            Err(ConfigDataError::Malformed) => return Some(status::INVALID_CONFIG),
        }
    }
    None
}

async fn reject(
    tx: &mut dyn LedgerTx,
    message: &ConfigureAccount,
    rejection_code: &str,
    now: DateTime<Utc>,
) -> Result<(), EngineError> {
    enqueue_message(
        tx,
        &OutboundMessage::RejectedConfig(RejectedConfig {
            debtor_id: message.debtor_id,
            creditor_id: message.creditor_id,
            config_ts: message.ts,
            config_seqnum: message.seqnum,
            negligible_amount: message.negligible_amount,
            config_data: message.config_data.clone(),
            config_flags: message.config_flags,
            rejection_code: rejection_code.to_string(),
            ts: now,
        }),
    )
    .await?;
    Ok(())
}

pub(crate) async fn handle(
    tx: &mut dyn LedgerTx,
    policy: &Policy,
    message: &ConfigureAccount,
    now: DateTime<Utc>,
) -> Result<(), EngineError> {
    match tx.get_account(message.debtor_id, message.creditor_id).await? {
        None => {
            if message.ts < now - policy.stale_config_horizon {
                debug!(
                    debtor_id = message.debtor_id,
                    creditor_id = message.creditor_id,
                    "ignoring stale configuration for an absent account"
                );
                return Ok(());
            }
            if let Some(code) = validation_error(message) {
                return reject(tx, message, code, now).await;
            }
            let mut account =
                new_account(message.debtor_id, message.creditor_id, now, true);
            account.last_config_ts = message.ts;
            account.last_config_seqnum = message.seqnum;
            account.negligible_amount = message.negligible_amount;
            account.config_flags = message.config_flags;
            account.config_data = message.config_data.clone();
            emit_account_update(tx, &mut account, policy, now).await?;
            tx.insert_account(&account).await?;
            Ok(())
        }
        Some(mut account) => {
            if !is_later_config(
                message.ts,
                message.seqnum,
                account.last_config_ts,
                account.last_config_seqnum,
            ) {
                // A redelivery or an out-of-order duplicate.
                return Ok(());
            }
            if let Some(code) = validation_error(message) {
                return reject(tx, message, code, now).await;
            }
            account.last_config_ts = message.ts;
            account.last_config_seqnum = message.seqnum;
            account.negligible_amount = message.negligible_amount;
            account.config_flags = message.config_flags;
            account.config_data = message.config_data.clone();
            // An applied configuration proves the account has an owner.
            account.status_flags &= !STATUS_UNREACHABLE_FLAG;
            apply_change(&mut account, 0, 0.0, now);
            emit_account_update(tx, &mut account, policy, now).await?;
            tx.update_account(&account).await?;
            Ok(())
        }
    }
}
