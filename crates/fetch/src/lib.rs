//! Fetch client: asks the shard that owns an account (possibly this very
//! node) whether the account can receive transfers, and retrieves a
//! debtor's root configuration.
//!
//! Results are cached in-process with a short TTL; transport errors are
//! retried with bounded exponential backoff. A permanently failing fetch is
//! reported as `Unreachable`, never silently treated as reachable.

pub mod client;
pub mod stub;

pub use client::{FetcherConfig, HttpFetcher};
pub use stub::StubFetcher;

use async_trait::async_trait;
use thiserror::Error;

use ledgerd_protocol::RootConfigData;

/// What the owning shard says about an account.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccountStatus {
    /// Exists, configured, accepts incoming transfers.
    Reachable,
    /// Exists but cannot accept transfers (no applied configuration).
    Unreachable,
    /// Exists but its owner has asked for deletion.
    ScheduledForDeletion,
    /// No such account.
    Nonexistent,
}

impl AccountStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AccountStatus::Reachable => "reachable",
            AccountStatus::Unreachable => "unreachable",
            AccountStatus::ScheduledForDeletion => "scheduled_for_deletion",
            AccountStatus::Nonexistent => "nonexistent",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "reachable" => Some(AccountStatus::Reachable),
            "unreachable" => Some(AccountStatus::Unreachable),
            "scheduled_for_deletion" => Some(AccountStatus::ScheduledForDeletion),
            "nonexistent" => Some(AccountStatus::Nonexistent),
            _ => None,
        }
    }
}

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("fetch API unavailable: {0}")]
    Unavailable(String),
    #[error("fetch API returned a malformed response: {0}")]
    Malformed(String),
}

#[async_trait]
pub trait AccountStatusFetcher: Send + Sync {
    /// Whether `(debtor_id, creditor_id)` can receive transfers right now.
    async fn account_status(&self, debtor_id: i64, creditor_id: i64)
        -> Result<AccountStatus, FetchError>;

    /// The debtor's parsed root configuration, or `None` when the debtor
    /// has no root account (an unknown currency).
    async fn root_config(&self, debtor_id: i64) -> Result<Option<RootConfigData>, FetchError>;
}
