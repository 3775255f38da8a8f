//! Outbox emission helpers shared by the handlers.

use chrono::{DateTime, Utc};

use ledgerd_protocol::codec;
use ledgerd_protocol::{ChoreMessage, OutboundMessage, OutboxQueue};
use ledgerd_store::{AccountRow, LedgerTx, StoreResult};

use crate::account_logic::account_update_message;
use crate::policy::Policy;

pub(crate) async fn enqueue_message(
    tx: &mut dyn LedgerTx,
    message: &OutboundMessage,
) -> StoreResult<()> {
    tx.enqueue(
        message.queue(),
        message.exchange(),
        &message.routing_key(),
        codec::to_payload(message),
    )
    .await
}

/// Emits an `AccountUpdate` reflecting the account's current state. Every
/// emission counts as a heartbeat.
pub(crate) async fn emit_account_update(
    tx: &mut dyn LedgerTx,
    account: &mut AccountRow,
    policy: &Policy,
    now: DateTime<Utc>,
) -> StoreResult<()> {
    account.last_heartbeat_ts = now;
    let message = account_update_message(account, policy, now);
    enqueue_message(tx, &OutboundMessage::AccountUpdate(message)).await
}

/// Routes a chore through the outbox to this node's chores queue (default
/// exchange, queue name as the routing key).
pub(crate) async fn enqueue_chore(
    tx: &mut dyn LedgerTx,
    policy: &Policy,
    chore: &ChoreMessage,
) -> StoreResult<()> {
    tx.enqueue(
        OutboxQueue::Chore,
        "",
        &policy.chores_queue,
        codec::chore_to_payload(chore),
    )
    .await
}
