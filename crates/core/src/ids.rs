//! Account identity rendering.
//!
//! On the wire, account identities are the *unsigned* decimal rendering of
//! the creditor id (two's complement reinterpretation), so negative ids stay
//! printable and sortable as strings.

/// The reserved creditor id of a debtor's root account (the currency issuer).
pub const ROOT_CREDITOR_ID: i64 = 0;

pub fn i64_to_u64(n: i64) -> u64 {
    n as u64
}

pub fn u64_to_i64(n: u64) -> i64 {
    n as i64
}

/// Parses a wire account identity back into a creditor id. Returns `None`
/// for anything that is not a canonical unsigned decimal number.
pub fn parse_account_identity(s: &str) -> Option<i64> {
    if s.is_empty() || s.len() > 20 || !s.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    // No leading zeros, except for "0" itself.
    if s.len() > 1 && s.starts_with('0') {
        return None;
    }
    s.parse::<u64>().ok().map(u64_to_i64)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn negative_ids_round_trip_through_u64() {
        assert_eq!(i64_to_u64(-1), u64::MAX);
        assert_eq!(u64_to_i64(i64_to_u64(-1)), -1);
        assert_eq!(u64_to_i64(i64_to_u64(i64::MIN)), i64::MIN);
    }

    #[test]
    fn identity_parsing_is_strict() {
        assert_eq!(parse_account_identity("2"), Some(2));
        assert_eq!(parse_account_identity("18446744073709551615"), Some(-1));
        assert_eq!(parse_account_identity(""), None);
        assert_eq!(parse_account_identity("02"), None);
        assert_eq!(parse_account_identity("-2"), None);
        assert_eq!(parse_account_identity("18446744073709551616"), None);
        assert_eq!(parse_account_identity("1e3"), None);
    }
}
