//! Calendar helpers shared by the ledger engine.

use chrono::{DateTime, NaiveDate, TimeZone, Utc};

pub const SECONDS_IN_DAY: f64 = 24.0 * 60.0 * 60.0;
pub const SECONDS_IN_YEAR: f64 = 365.25 * SECONDS_IN_DAY;

/// The earliest representable protocol timestamp. Used as the initial value
/// for "last seen" columns so that any real message compares later.
pub fn beginning_of_time() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(1900, 1, 1, 0, 0, 0).single().unwrap_or_default()
}

fn epoch_2020() -> NaiveDate {
    NaiveDate::from_ymd_opt(2020, 1, 1).unwrap_or_default()
}

/// Number of days since 2020-01-01, clamped into 24 bits. Dates before the
/// epoch map to zero.
pub fn date_to_int24(date: NaiveDate) -> i64 {
    let days = (date - epoch_2020()).num_days();
    days.clamp(0, 0x00ff_ffff)
}

/// Initial value for an account's transfer counters. The high 24 bits encode
/// the creation date, so counters allocated in different account epochs
/// never collide even after a purge and re-creation on a later day.
pub fn first_transfer_id(creation_date: NaiveDate) -> i64 {
    date_to_int24(creation_date) << 40
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn epoch_days_are_clamped() {
        assert_eq!(date_to_int24(NaiveDate::from_ymd_opt(2020, 1, 1).unwrap()), 0);
        assert_eq!(date_to_int24(NaiveDate::from_ymd_opt(2020, 1, 31).unwrap()), 30);
        assert_eq!(date_to_int24(NaiveDate::from_ymd_opt(1999, 1, 1).unwrap()), 0);
    }

    #[test]
    fn transfer_ids_from_later_epochs_are_disjoint() {
        let d0 = NaiveDate::from_ymd_opt(2024, 5, 1).unwrap();
        let d1 = d0 + chrono::Duration::days(1);
        // A day's worth of ids (2^40 of them) fits strictly below the next epoch.
        assert!(first_transfer_id(d0) + (1_i64 << 40) <= first_transfer_id(d1));
    }
}
