//! Stored row types.
//!
//! These are plain records; all business logic over them lives in the
//! engine crate as free functions (accrual, availability, negligibility).

use chrono::{DateTime, NaiveDate, Utc};

use ledgerd_core::ROOT_CREDITOR_ID;

/// `config_flags` bit: the owner has asked for this account to be deleted.
pub const CONFIG_SCHEDULED_FOR_DELETION_FLAG: i32 = 1;

/// `status_flags` bit: the account exists without an applied configuration
/// (created implicitly by an incoming transfer); it cannot receive new
/// transfers until its owner configures it.
pub const STATUS_UNREACHABLE_FLAG: i32 = 1;

/// `status_flags` bit: the principal was clamped at the i64 bounds at least
/// once; the stored balance is a saturation, not the true sum.
pub const STATUS_OVERFLOWN_FLAG: i32 = 2;

/// One row of the `account` table. Tells who owes what to whom.
#[derive(Debug, Clone, PartialEq, sqlx::FromRow)]
pub struct AccountRow {
    pub debtor_id: i64,
    pub creditor_id: i64,
    pub creation_date: NaiveDate,
    /// The owed amount, without accrued interest. Can be negative.
    pub principal: i64,
    /// Interest accrued before `last_change_ts` but not capitalized yet.
    pub interest: f64,
    /// Annual rate (percent) at which interest accumulates.
    pub interest_rate: f64,
    pub previous_interest_rate: f64,
    pub last_interest_rate_change_ts: DateTime<Utc>,
    /// Sum of `locked_amount` over this account's live prepared transfers.
    pub total_locked_amount: i64,
    pub pending_transfers_count: i32,
    /// Allocator for `PreparedTransfer.transfer_id` (epoch-prefixed).
    pub last_transfer_id: i64,
    /// Allocator for `AccountTransfer.transfer_number` (epoch-prefixed).
    pub last_transfer_number: i64,
    pub last_transfer_committed_at: DateTime<Utc>,
    pub last_change_ts: DateTime<Utc>,
    pub last_change_seqnum: i32,
    pub last_config_ts: DateTime<Utc>,
    pub last_config_seqnum: i32,
    /// Date of the most recent non-interest outgoing transfer.
    pub last_outgoing_transfer_date: NaiveDate,
    pub last_heartbeat_ts: DateTime<Utc>,
    pub last_interest_capitalization_ts: DateTime<Utc>,
    pub last_deletion_attempt_ts: DateTime<Utc>,
    pub negligible_amount: f64,
    pub config_flags: i32,
    pub config_data: String,
    pub status_flags: i32,
    pub debtor_info_iri: Option<String>,
    pub debtor_info_content_type: Option<String>,
    pub debtor_info_sha256: Option<Vec<u8>>,
}

impl AccountRow {
    pub fn is_root(&self) -> bool {
        self.creditor_id == ROOT_CREDITOR_ID
    }

    pub fn is_scheduled_for_deletion(&self) -> bool {
        self.config_flags & CONFIG_SCHEDULED_FOR_DELETION_FLAG != 0
    }

    pub fn is_unreachable(&self) -> bool {
        self.status_flags & STATUS_UNREACHABLE_FLAG != 0
    }
}

/// One row of the `prepared_transfer` table: a live lock on sender funds.
#[derive(Debug, Clone, PartialEq, sqlx::FromRow)]
pub struct PreparedTransferRow {
    pub debtor_id: i64,
    pub sender_creditor_id: i64,
    pub transfer_id: i64,
    pub coordinator_type: String,
    pub coordinator_id: i64,
    pub coordinator_request_id: i64,
    pub recipient_creditor_id: i64,
    /// The committed amount may not exceed this number.
    pub locked_amount: i64,
    pub prepared_at: DateTime<Utc>,
    pub deadline: DateTime<Utc>,
    /// Worst-case negative accrual assumed valid until the deadline.
    pub demurrage_rate: f64,
    pub min_interest_rate: f64,
    pub last_reminder_ts: Option<DateTime<Utc>>,
}

/// One undelivered outgoing message.
#[derive(Debug, Clone, PartialEq, sqlx::FromRow)]
pub struct OutboxRow {
    pub id: i64,
    pub exchange: String,
    pub routing_key: String,
    pub payload: serde_json::Value,
    pub inserted_at: DateTime<Utc>,
}
