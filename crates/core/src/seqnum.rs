//! 32-bit wrapping sequence numbers.
//!
//! Account versions and configuration echoes are ordered by a
//! `(timestamp, seqnum)` pair where the seqnum wraps with 32-bit signed
//! arithmetic. The comparator below is total for any two seqnums whose
//! distance is less than 2^31, which the protocol guarantees.

use chrono::{DateTime, Utc};

/// Next sequence number, wrapping from `i32::MAX` to `i32::MIN`.
pub fn increment_seqnum(n: i32) -> i32 {
    n.wrapping_add(1)
}

/// `true` when `a` is strictly later than `b` under wrapping comparison:
/// `0 < (a - b) mod 2^32 < 2^31`.
pub fn is_later_seqnum(a: i32, b: i32) -> bool {
    let distance = a.wrapping_sub(b) as u32;
    0 < distance && distance < 0x8000_0000
}

/// Orders two `(ts, seqnum)` versions, timestamp first, wrapping seqnum as
/// the tiebreaker.
pub fn is_later_config(ts: DateTime<Utc>, seqnum: i32, other_ts: DateTime<Utc>, other_seqnum: i32) -> bool {
    ts > other_ts || (ts == other_ts && is_later_seqnum(seqnum, other_seqnum))
}
