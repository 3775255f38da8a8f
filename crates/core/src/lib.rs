//! Chronometer & math layer: calendar arithmetic, wrapping sequence-number
//! comparison, continuous-compounding interest, and saturating amount math.
//!
//! Everything in this crate is a pure function over plain values. No I/O,
//! no clocks. Callers pass the current time in explicitly, which keeps the
//! protocol handlers deterministic and testable.

pub mod ids;
pub mod interest;
pub mod seqnum;
pub mod time;

pub use ids::{i64_to_u64, parse_account_identity, u64_to_i64, ROOT_CREDITOR_ID};
pub use interest::{
    clamp_principal, clamp_principal_f64, compound_factor, INTEREST_RATE_CEIL, INTEREST_RATE_FLOOR,
};
pub use seqnum::{increment_seqnum, is_later_config, is_later_seqnum};
pub use time::{
    beginning_of_time, date_to_int24, first_transfer_id, SECONDS_IN_DAY, SECONDS_IN_YEAR,
};
