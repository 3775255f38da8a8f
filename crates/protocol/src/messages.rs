//! Message types exchanged with the broker.
//!
//! Incoming messages drive the protocol state machine; outgoing messages are
//! written to the outbox and flushed to one of four exchanges. Field sets
//! and names are part of the protocol: renaming a field here is a wire
//! format change.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use ledgerd_core::ROOT_CREDITOR_ID;

use crate::hex_bytes;
use crate::routing::{calc_bin_routing_key, i64_to_hex_routing_key};

/// Maximum byte length of a transfer note.
pub const TRANSFER_NOTE_MAX_BYTES: usize = 500;
/// Maximum byte length of an account's opaque configuration string.
pub const CONFIG_DATA_MAX_BYTES: usize = 2000;
/// Maximum character length of a coordinator type tag.
pub const COORDINATOR_TYPE_MAX_LEN: usize = 30;

/// `AccountTransfer.transfer_flags` bit: the committed amount does not
/// exceed the account's negligible amount.
pub const TRANSFER_FLAG_NEGLIGIBLE: i32 = 1;

/// Status codes carried by rejections and finalizations (ASCII, <= 30 chars).
pub mod status {
    pub const OK: &str = "OK";
    pub const TIMEOUT: &str = "TIMEOUT";
    pub const INSUFFICIENT_AVAILABLE_AMOUNT: &str = "INSUFFICIENT_AVAILABLE_AMOUNT";
    pub const NEWER_INTEREST_RATE: &str = "NEWER_INTEREST_RATE";
    pub const NO_SENDER: &str = "NO_SENDER";
    pub const SENDER_SCHEDULED_FOR_DELETION: &str = "SENDER_SCHEDULED_FOR_DELETION";
    pub const RECIPIENT_UNREACHABLE: &str = "RECIPIENT_UNREACHABLE";
    pub const RECIPIENT_SAME_AS_SENDER: &str = "RECIPIENT_SAME_AS_SENDER";
    pub const INVALID_REQUEST: &str = "INVALID_REQUEST";

    pub const INVALID_CONFIG: &str = "INVALID_CONFIG";
    pub const INVALID_NEGLIGIBLE_AMOUNT: &str = "INVALID_NEGLIGIBLE_AMOUNT";
    pub const INVALID_RATE: &str = "INVALID_RATE";
}

// ---------------------------------------------------------------------------
// Incoming
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConfigureAccount {
    pub debtor_id: i64,
    pub creditor_id: i64,
    pub ts: DateTime<Utc>,
    pub seqnum: i32,
    pub negligible_amount: f64,
    pub config_flags: i32,
    pub config_data: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PrepareTransfer {
    pub debtor_id: i64,
    pub creditor_id: i64,
    pub coordinator_type: String,
    pub coordinator_id: i64,
    pub coordinator_request_id: i64,
    pub min_locked_amount: i64,
    pub max_locked_amount: i64,
    pub recipient: String,
    pub min_interest_rate: f64,
    /// Seconds the coordinator is allowed to take before finalizing.
    pub max_commit_delay: i32,
    pub min_account_balance: i64,
    pub ts: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FinalizeTransfer {
    pub debtor_id: i64,
    pub creditor_id: i64,
    pub transfer_id: i64,
    pub coordinator_type: String,
    pub coordinator_id: i64,
    pub coordinator_request_id: i64,
    /// Zero dismisses the prepared transfer.
    pub committed_amount: i64,
    pub transfer_note_format: String,
    pub transfer_note: String,
    pub finalization_flags: i32,
    pub ts: DateTime<Utc>,
}

/// The second, asynchronous phase of a committed transfer: the effect on
/// the counterparty account. Self-posted through the `accounts_in`
/// exchange; idempotent via the registered-balance-change table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PendingBalanceChange {
    pub debtor_id: i64,
    pub creditor_id: i64,
    /// Unique within `(debtor_id, other_creditor_id)`.
    pub change_id: i64,
    pub coordinator_type: String,
    pub transfer_note_format: String,
    pub transfer_note: String,
    pub committed_at: DateTime<Utc>,
    pub principal_delta: i64,
    pub other_creditor_id: i64,
}

/// Messages consumed from the protocol queue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum InboundMessage {
    ConfigureAccount(ConfigureAccount),
    PrepareTransfer(PrepareTransfer),
    FinalizeTransfer(FinalizeTransfer),
    PendingBalanceChange(PendingBalanceChange),
}

impl InboundMessage {
    /// The account the message must be sharded on.
    pub fn shard_account(&self) -> (i64, i64) {
        match self {
            InboundMessage::ConfigureAccount(m) => (m.debtor_id, m.creditor_id),
            InboundMessage::PrepareTransfer(m) => (m.debtor_id, m.creditor_id),
            InboundMessage::FinalizeTransfer(m) => (m.debtor_id, m.creditor_id),
            InboundMessage::PendingBalanceChange(m) => (m.debtor_id, m.creditor_id),
        }
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            InboundMessage::ConfigureAccount(_) => "ConfigureAccount",
            InboundMessage::PrepareTransfer(_) => "PrepareTransfer",
            InboundMessage::FinalizeTransfer(_) => "FinalizeTransfer",
            InboundMessage::PendingBalanceChange(_) => "PendingBalanceChange",
        }
    }
}

// ---------------------------------------------------------------------------
// Chores (internal maintenance queue)
// ---------------------------------------------------------------------------

/// Maintenance messages consumed from the chores queue. Produced by the
/// account scanner (and by operators), never by remote peers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ChoreMessage {
    ChangeInterestRate {
        debtor_id: i64,
        creditor_id: i64,
        interest_rate: f64,
        ts: DateTime<Utc>,
    },
    UpdateDebtorInfo {
        debtor_id: i64,
        creditor_id: i64,
        debtor_info_iri: String,
        debtor_info_content_type: String,
        #[serde(with = "hex_bytes")]
        debtor_info_sha256: Option<Vec<u8>>,
        ts: DateTime<Utc>,
    },
    CapitalizeInterest { debtor_id: i64, creditor_id: i64 },
    TryToDeleteAccount { debtor_id: i64, creditor_id: i64 },
}

impl ChoreMessage {
    pub fn account(&self) -> (i64, i64) {
        match *self {
            ChoreMessage::ChangeInterestRate { debtor_id, creditor_id, .. }
            | ChoreMessage::UpdateDebtorInfo { debtor_id, creditor_id, .. }
            | ChoreMessage::CapitalizeInterest { debtor_id, creditor_id }
            | ChoreMessage::TryToDeleteAccount { debtor_id, creditor_id } => {
                (debtor_id, creditor_id)
            }
        }
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            ChoreMessage::ChangeInterestRate { .. } => "ChangeInterestRate",
            ChoreMessage::UpdateDebtorInfo { .. } => "UpdateDebtorInfo",
            ChoreMessage::CapitalizeInterest { .. } => "CapitalizeInterest",
            ChoreMessage::TryToDeleteAccount { .. } => "TryToDeleteAccount",
        }
    }
}

// ---------------------------------------------------------------------------
// Outgoing
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RejectedConfig {
    pub debtor_id: i64,
    pub creditor_id: i64,
    pub config_ts: DateTime<Utc>,
    pub config_seqnum: i32,
    pub negligible_amount: f64,
    pub config_data: String,
    pub config_flags: i32,
    pub rejection_code: String,
    pub ts: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RejectedTransfer {
    pub debtor_id: i64,
    pub creditor_id: i64,
    pub coordinator_type: String,
    pub coordinator_id: i64,
    pub coordinator_request_id: i64,
    pub status_code: String,
    pub total_locked_amount: i64,
    pub ts: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PreparedTransferSignal {
    pub debtor_id: i64,
    pub creditor_id: i64,
    pub transfer_id: i64,
    pub coordinator_type: String,
    pub coordinator_id: i64,
    pub coordinator_request_id: i64,
    pub locked_amount: i64,
    pub recipient: String,
    pub prepared_at: DateTime<Utc>,
    pub demurrage_rate: f64,
    pub deadline: DateTime<Utc>,
    pub min_interest_rate: f64,
    pub ts: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FinalizedTransferSignal {
    pub debtor_id: i64,
    pub creditor_id: i64,
    pub transfer_id: i64,
    pub coordinator_type: String,
    pub coordinator_id: i64,
    pub coordinator_request_id: i64,
    pub prepared_at: DateTime<Utc>,
    pub committed_amount: i64,
    pub total_locked_amount: i64,
    pub status_code: String,
    pub ts: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccountUpdate {
    pub debtor_id: i64,
    pub creditor_id: i64,
    pub creation_date: NaiveDate,
    pub last_change_ts: DateTime<Utc>,
    pub last_change_seqnum: i32,
    pub principal: i64,
    pub interest: f64,
    pub interest_rate: f64,
    pub last_interest_rate_change_ts: DateTime<Utc>,
    pub last_transfer_number: i64,
    pub last_transfer_committed_at: DateTime<Utc>,
    pub last_config_ts: DateTime<Utc>,
    pub last_config_seqnum: i32,
    pub negligible_amount: f64,
    pub config_data: String,
    pub config_flags: i32,
    pub account_id: String,
    pub debtor_info_iri: String,
    pub debtor_info_content_type: String,
    #[serde(with = "hex_bytes")]
    pub debtor_info_sha256: Option<Vec<u8>>,
    pub transfer_note_max_bytes: i32,
    pub demurrage_rate: f64,
    /// Seconds a prepared transfer may wait for its finalization.
    pub commit_period: i32,
    /// Seconds after which the receiver should consider this update expired.
    pub ttl: i32,
    pub ts: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccountPurge {
    pub debtor_id: i64,
    pub creditor_id: i64,
    pub creation_date: NaiveDate,
    pub ts: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccountTransfer {
    pub debtor_id: i64,
    pub creditor_id: i64,
    /// The account epoch the transfer number belongs to.
    pub creation_date: NaiveDate,
    pub transfer_number: i64,
    pub coordinator_type: String,
    pub sender: String,
    pub recipient: String,
    pub acquired_amount: i64,
    pub transfer_note_format: String,
    pub transfer_note: String,
    pub committed_at: DateTime<Utc>,
    /// Account principal after this transfer was applied.
    pub principal: i64,
    pub previous_transfer_number: i64,
    pub transfer_flags: i32,
    pub ts: DateTime<Utc>,
}

/// Messages produced by the state machine, one outbox queue each.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum OutboundMessage {
    RejectedConfig(RejectedConfig),
    RejectedTransfer(RejectedTransfer),
    PreparedTransfer(PreparedTransferSignal),
    FinalizedTransfer(FinalizedTransferSignal),
    AccountUpdate(AccountUpdate),
    AccountPurge(AccountPurge),
    AccountTransfer(AccountTransfer),
    PendingBalanceChange(PendingBalanceChange),
}

/// Durable outbox queues, one per message type plus the internal chores
/// queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum OutboxQueue {
    RejectedConfig,
    RejectedTransfer,
    PreparedTransfer,
    FinalizedTransfer,
    AccountUpdate,
    AccountPurge,
    AccountTransfer,
    PendingBalanceChange,
    Chore,
}

impl OutboxQueue {
    pub const ALL: [OutboxQueue; 9] = [
        OutboxQueue::RejectedConfig,
        OutboxQueue::RejectedTransfer,
        OutboxQueue::PreparedTransfer,
        OutboxQueue::FinalizedTransfer,
        OutboxQueue::AccountUpdate,
        OutboxQueue::AccountPurge,
        OutboxQueue::AccountTransfer,
        OutboxQueue::PendingBalanceChange,
        OutboxQueue::Chore,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            OutboxQueue::RejectedConfig => "rejected_config",
            OutboxQueue::RejectedTransfer => "rejected_transfer",
            OutboxQueue::PreparedTransfer => "prepared_transfer",
            OutboxQueue::FinalizedTransfer => "finalized_transfer",
            OutboxQueue::AccountUpdate => "account_update",
            OutboxQueue::AccountPurge => "account_purge",
            OutboxQueue::AccountTransfer => "account_transfer",
            OutboxQueue::PendingBalanceChange => "pending_balance_change",
            OutboxQueue::Chore => "chore",
        }
    }
}

/// Exchange for account-owner-facing messages: creditors get theirs, the
/// debtor gets everything about the root account.
fn owner_exchange(creditor_id: i64) -> &'static str {
    if creditor_id == ROOT_CREDITOR_ID {
        "to_debtors"
    } else {
        "to_creditors"
    }
}

fn owner_routing_key(debtor_id: i64, creditor_id: i64) -> String {
    if creditor_id == ROOT_CREDITOR_ID {
        i64_to_hex_routing_key(debtor_id)
    } else {
        i64_to_hex_routing_key(creditor_id)
    }
}

impl OutboundMessage {
    pub fn queue(&self) -> OutboxQueue {
        match self {
            OutboundMessage::RejectedConfig(_) => OutboxQueue::RejectedConfig,
            OutboundMessage::RejectedTransfer(_) => OutboxQueue::RejectedTransfer,
            OutboundMessage::PreparedTransfer(_) => OutboxQueue::PreparedTransfer,
            OutboundMessage::FinalizedTransfer(_) => OutboxQueue::FinalizedTransfer,
            OutboundMessage::AccountUpdate(_) => OutboxQueue::AccountUpdate,
            OutboundMessage::AccountPurge(_) => OutboxQueue::AccountPurge,
            OutboundMessage::AccountTransfer(_) => OutboxQueue::AccountTransfer,
            OutboundMessage::PendingBalanceChange(_) => OutboxQueue::PendingBalanceChange,
        }
    }

    pub fn exchange(&self) -> &'static str {
        match self {
            OutboundMessage::RejectedTransfer(_)
            | OutboundMessage::PreparedTransfer(_)
            | OutboundMessage::FinalizedTransfer(_) => "to_coordinators",
            OutboundMessage::RejectedConfig(m) => owner_exchange(m.creditor_id),
            OutboundMessage::AccountUpdate(m) => owner_exchange(m.creditor_id),
            OutboundMessage::AccountPurge(m) => owner_exchange(m.creditor_id),
            OutboundMessage::AccountTransfer(m) => owner_exchange(m.creditor_id),
            OutboundMessage::PendingBalanceChange(_) => "accounts_in",
        }
    }

    pub fn routing_key(&self) -> String {
        match self {
            OutboundMessage::RejectedTransfer(m) => i64_to_hex_routing_key(m.coordinator_id),
            OutboundMessage::PreparedTransfer(m) => i64_to_hex_routing_key(m.coordinator_id),
            OutboundMessage::FinalizedTransfer(m) => i64_to_hex_routing_key(m.coordinator_id),
            OutboundMessage::RejectedConfig(m) => owner_routing_key(m.debtor_id, m.creditor_id),
            OutboundMessage::AccountUpdate(m) => owner_routing_key(m.debtor_id, m.creditor_id),
            OutboundMessage::AccountPurge(m) => owner_routing_key(m.debtor_id, m.creditor_id),
            OutboundMessage::AccountTransfer(m) => owner_routing_key(m.debtor_id, m.creditor_id),
            OutboundMessage::PendingBalanceChange(m) => {
                calc_bin_routing_key(m.debtor_id, m.creditor_id)
            }
        }
    }
}
