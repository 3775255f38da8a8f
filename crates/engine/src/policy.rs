//! Node policy: everything an operator can tune.
//!
//! Loaded once from the environment at startup and passed around
//! explicitly; there is no process-wide mutable configuration. The sanity
//! checks reject combinations that would make prepared transfers time out
//! under normal message delays, or make interest capitalization quirky.

use chrono::{DateTime, Duration, TimeZone, Utc};
use thiserror::Error;

use ledgerd_core::{INTEREST_RATE_CEIL, INTEREST_RATE_FLOOR};
use ledgerd_protocol::ShardingRealm;

use crate::retry::RetryPolicy;

#[derive(Debug, Error)]
pub enum PolicyError {
    #[error("invalid value for {key}: {message}")]
    Invalid { key: &'static str, message: String },
}

fn invalid(key: &'static str, message: impl Into<String>) -> PolicyError {
    PolicyError::Invalid { key, message: message.into() }
}

#[derive(Debug, Clone)]
pub struct Policy {
    /// Hard bounds this node puts on creditor account interest rates,
    /// inside the protocol-wide `[-50, 100]`.
    pub min_interest_rate_allowed: f64,
    pub max_interest_rate_allowed: f64,
    /// Idle time before a heartbeat `AccountUpdate`.
    pub heartbeat_interval: Duration,
    /// Idle time before a prepared transfer's `PreparedTransfer` message is
    /// re-emitted to its coordinator.
    pub finalization_reminder_interval: Duration,
    /// Minimum account age before it may be purged.
    pub minimum_account_lifetime: Duration,
    /// Configurations older than this are ignored for absent accounts;
    /// also a purge precondition.
    pub stale_config_horizon: Duration,
    /// Registered balance changes committed before this moment are
    /// garbage-collected. At or before the epoch means: never collect.
    pub balance_change_retention_date: DateTime<Utc>,
    /// `ttl` value placed in outgoing `AccountUpdate`s.
    pub account_ttl: Duration,
    /// Default allowed delay between prepare and commit.
    pub commit_period: Duration,
    /// Worst-case negative accrual advertised in prepared transfers.
    pub demurrage_rate: f64,
    /// Minimum spacing of interest capitalizations per account.
    pub min_capitalization_interval: Duration,
    /// Capitalize when `|interest|` exceeds this fraction of `|principal|`.
    pub max_interest_to_principal_ratio: f64,
    /// Minimum spacing of deletion attempts per account.
    pub deletion_attempt_interval: Duration,
    /// Worst-case delivery delay assumed for broker messages.
    pub message_max_delay: Duration,
    pub accounts_scan_interval: Duration,
    pub prepared_transfers_scan_interval: Duration,
    pub balance_changes_scan_interval: Duration,
    pub scan_page_size: i64,
    /// Queue the chore outbox rows are routed to (default exchange).
    pub chores_queue: String,
    /// Which accounts this node owns.
    pub realm: ShardingRealm,
    pub retry: RetryPolicy,
}

impl Default for Policy {
    fn default() -> Self {
        Self {
            min_interest_rate_allowed: INTEREST_RATE_FLOOR,
            max_interest_rate_allowed: INTEREST_RATE_CEIL,
            heartbeat_interval: Duration::days(7),
            finalization_reminder_interval: Duration::days(7),
            minimum_account_lifetime: Duration::days(2),
            stale_config_horizon: Duration::days(14),
            balance_change_retention_date: epoch(),
            account_ttl: Duration::days(7),
            commit_period: Duration::days(90),
            demurrage_rate: INTEREST_RATE_FLOOR,
            min_capitalization_interval: Duration::days(14),
            max_interest_to_principal_ratio: 0.0001,
            deletion_attempt_interval: Duration::days(14),
            message_max_delay: Duration::days(7),
            accounts_scan_interval: Duration::hours(8),
            prepared_transfers_scan_interval: Duration::days(1),
            balance_changes_scan_interval: Duration::days(7),
            scan_page_size: 500,
            chores_queue: "ledgerd_chores".to_string(),
            realm: ShardingRealm::whole(),
            retry: RetryPolicy::default(),
        }
    }
}

fn epoch() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(1970, 1, 1, 0, 0, 0).single().unwrap_or_default()
}

fn env_f64(key: &'static str, default: f64) -> Result<f64, PolicyError> {
    match std::env::var(key) {
        Ok(raw) => raw.parse().map_err(|e| invalid(key, format!("{e}"))),
        Err(_) => Ok(default),
    }
}

fn env_i64(key: &'static str, default: i64) -> Result<i64, PolicyError> {
    match std::env::var(key) {
        Ok(raw) => raw.parse().map_err(|e| invalid(key, format!("{e}"))),
        Err(_) => Ok(default),
    }
}

fn env_u32(key: &'static str, default: u32) -> Result<u32, PolicyError> {
    match std::env::var(key) {
        Ok(raw) => raw.parse().map_err(|e| invalid(key, format!("{e}"))),
        Err(_) => Ok(default),
    }
}

fn env_days(key: &'static str, default_days: f64) -> Result<Duration, PolicyError> {
    let days = env_f64(key, default_days)?;
    if !days.is_finite() || days < 0.0 {
        return Err(invalid(key, "must be a non-negative number of days"));
    }
    Ok(Duration::seconds((days * 86400.0) as i64))
}

fn env_date(key: &'static str, default: DateTime<Utc>) -> Result<DateTime<Utc>, PolicyError> {
    match std::env::var(key) {
        Ok(raw) => {
            let date = raw
                .parse::<chrono::NaiveDate>()
                .map_err(|e| invalid(key, format!("{e}")))?;
            Ok(Utc.from_utc_datetime(&date.and_hms_opt(0, 0, 0).unwrap_or_default()))
        }
        Err(_) => Ok(default),
    }
}

impl Policy {
    /// Reads the policy from `LEDGERD_*` environment variables, falling
    /// back to the defaults, and validates the result.
    pub fn from_env() -> Result<Self, PolicyError> {
        let defaults = Policy::default();
        let policy = Policy {
            min_interest_rate_allowed: env_f64(
                "LEDGERD_MIN_INTEREST_RATE_ALLOWED",
                defaults.min_interest_rate_allowed,
            )?,
            max_interest_rate_allowed: env_f64(
                "LEDGERD_MAX_INTEREST_RATE_ALLOWED",
                defaults.max_interest_rate_allowed,
            )?,
            heartbeat_interval: env_days("LEDGERD_HEARTBEAT_INTERVAL_DAYS", 7.0)?,
            finalization_reminder_interval: env_days("LEDGERD_FINALIZATION_REMINDER_DAYS", 7.0)?,
            minimum_account_lifetime: env_days("LEDGERD_MINIMUM_ACCOUNT_LIFETIME_DAYS", 2.0)?,
            stale_config_horizon: env_days("LEDGERD_STALE_CONFIG_HORIZON_DAYS", 14.0)?,
            balance_change_retention_date: env_date(
                "LEDGERD_BALANCE_CHANGE_RETENTION_DATE",
                defaults.balance_change_retention_date,
            )?,
            account_ttl: env_days("LEDGERD_ACCOUNT_TTL_DAYS", 7.0)?,
            commit_period: env_days("LEDGERD_COMMIT_PERIOD_DAYS", 90.0)?,
            demurrage_rate: env_f64("LEDGERD_DEMURRAGE_RATE", defaults.demurrage_rate)?,
            min_capitalization_interval: env_days("LEDGERD_MIN_CAPITALIZATION_INTERVAL_DAYS", 14.0)?,
            max_interest_to_principal_ratio: env_f64(
                "LEDGERD_MAX_INTEREST_TO_PRINCIPAL_RATIO",
                defaults.max_interest_to_principal_ratio,
            )?,
            deletion_attempt_interval: env_days("LEDGERD_DELETION_ATTEMPT_INTERVAL_DAYS", 14.0)?,
            message_max_delay: env_days("LEDGERD_MESSAGE_MAX_DELAY_DAYS", 7.0)?,
            accounts_scan_interval: Duration::seconds(
                (env_f64("LEDGERD_ACCOUNTS_SCAN_HOURS", 8.0)? * 3600.0) as i64,
            ),
            prepared_transfers_scan_interval: env_days("LEDGERD_PREPARED_TRANSFERS_SCAN_DAYS", 1.0)?,
            balance_changes_scan_interval: env_days("LEDGERD_BALANCE_CHANGES_SCAN_DAYS", 7.0)?,
            scan_page_size: env_i64("LEDGERD_SCAN_PAGE_SIZE", defaults.scan_page_size)?,
            chores_queue: std::env::var("LEDGERD_CHORES_QUEUE")
                .unwrap_or_else(|_| defaults.chores_queue.clone()),
            realm: ShardingRealm::new(
                env_u32("LEDGERD_SHARD_KEY_MASK", 0)?,
                env_u32("LEDGERD_SHARD_KEY_PREFIX", 0)?,
            ),
            retry: RetryPolicy::default(),
        };
        policy.validate()?;
        Ok(policy)
    }

    pub fn validate(&self) -> Result<(), PolicyError> {
        if self.commit_period < Duration::days(30) {
            return Err(invalid("LEDGERD_COMMIT_PERIOD_DAYS", "must be at least 30 days"));
        }
        if self.commit_period < self.message_max_delay {
            return Err(invalid(
                "LEDGERD_COMMIT_PERIOD_DAYS",
                "must not be smaller than the message max delay, or prepared \
                 transfers will time out because of ordinary message delays",
            ));
        }
        if !(0.0 < self.max_interest_to_principal_ratio
            && self.max_interest_to_principal_ratio <= 0.10)
        {
            return Err(invalid(
                "LEDGERD_MAX_INTEREST_TO_PRINCIPAL_RATIO",
                "must be in the interval (0, 0.1]",
            ));
        }
        if self.min_capitalization_interval > Duration::days(92) {
            return Err(invalid(
                "LEDGERD_MIN_CAPITALIZATION_INTERVAL_DAYS",
                "must not exceed 92 days, or interest capitalization becomes quirky",
            ));
        }
        if self.accounts_scan_interval > Duration::hours(48) {
            return Err(invalid(
                "LEDGERD_ACCOUNTS_SCAN_HOURS",
                "must not exceed 48 hours, or account status updates will lag",
            ));
        }
        if self.heartbeat_interval > Duration::days(14) {
            return Err(invalid(
                "LEDGERD_HEARTBEAT_INTERVAL_DAYS",
                "must not exceed 14 days, or clients will miss heartbeats",
            ));
        }
        if self.minimum_account_lifetime < Duration::days(1) {
            return Err(invalid(
                "LEDGERD_MINIMUM_ACCOUNT_LIFETIME_DAYS",
                "must be at least one day, so re-created accounts get a later creation date",
            ));
        }
        if self.min_interest_rate_allowed < INTEREST_RATE_FLOOR
            || self.max_interest_rate_allowed > INTEREST_RATE_CEIL
            || self.min_interest_rate_allowed > self.max_interest_rate_allowed
        {
            return Err(invalid(
                "LEDGERD_MIN_INTEREST_RATE_ALLOWED",
                "interest rate bounds must be ordered and within [-50, 100]",
            ));
        }
        if self.scan_page_size < 1 {
            return Err(invalid("LEDGERD_SCAN_PAGE_SIZE", "must be positive"));
        }
        Ok(())
    }

    /// Whether registered-balance-change GC is enabled at all.
    pub fn balance_change_gc_enabled(&self) -> bool {
        self.balance_change_retention_date > epoch()
    }

    pub fn account_ttl_seconds(&self) -> i32 {
        self.account_ttl.num_seconds().clamp(0, i32::MAX as i64) as i32
    }

    pub fn commit_period_seconds(&self) -> i32 {
        self.commit_period.num_seconds().clamp(0, i32::MAX as i64) as i32
    }

    /// Clamps a requested creditor-account interest rate into both the
    /// protocol-wide and the node-configured bounds.
    pub fn clamp_interest_rate(&self, rate: f64) -> f64 {
        rate.clamp(
            INTEREST_RATE_FLOOR.max(self.min_interest_rate_allowed),
            INTEREST_RATE_CEIL.min(self.max_interest_rate_allowed),
        )
    }
}
