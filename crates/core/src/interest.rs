//! Continuous-compounding interest and saturating amount math.
//!
//! Annual rates are IEEE-754 percentages. A balance `k` held for
//! `s` seconds at rate `r` becomes `k * exp(ln(1 + r/100) * s / year)`,
//! with a year of 365.25 days. A rate of -100% (or below) collapses any
//! balance to zero; the logarithm is never taken of a non-positive number.

use crate::time::SECONDS_IN_YEAR;

pub const INTEREST_RATE_FLOOR: f64 = -50.0;
pub const INTEREST_RATE_CEIL: f64 = 100.0;

/// Growth factor for `passed_seconds` at `rate` percent per year.
///
/// Negative elapsed time is treated as zero: balances never accrue
/// backwards when clocks disagree.
pub fn compound_factor(rate: f64, passed_seconds: f64) -> f64 {
    let seconds = passed_seconds.max(0.0);
    if rate <= -100.0 {
        return 0.0;
    }
    let k = (1.0 + rate / 100.0).ln() / SECONDS_IN_YEAR;
    (k * seconds).exp()
}

/// Clamps a wide intermediate amount into the valid principal range,
/// reporting whether clamping happened (the caller sets the account's
/// overflow status bit). The range excludes `i64::MIN` so that negation
/// is always safe.
pub fn clamp_principal(value: i128) -> (i64, bool) {
    if value > i64::MAX as i128 {
        (i64::MAX, true)
    } else if value <= i64::MIN as i128 {
        (i64::MIN + 1, true)
    } else {
        (value as i64, false)
    }
}

/// Clamps a float amount to the principal range, truncating toward
/// negative infinity the way ledger math always rounds in the account
/// holder's disfavor.
pub fn clamp_principal_f64(value: f64) -> (i64, bool) {
    if !value.is_finite() {
        return if value > 0.0 { (i64::MAX, true) } else { (i64::MIN + 1, true) };
    }
    clamp_principal(value.floor() as i128)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    const DAY: f64 = 24.0 * 3600.0;

    #[test]
    fn zero_rate_is_identity() {
        assert_eq!(compound_factor(0.0, 123.0 * DAY), 1.0);
    }

    #[test]
    fn one_year_at_five_percent() {
        let f = compound_factor(5.0, SECONDS_IN_YEAR);
        assert!((f - 1.05).abs() < 1e-12);
    }

    #[test]
    fn full_demurrage_erases_the_balance() {
        assert_eq!(compound_factor(-100.0, 1.0), 0.0);
        assert_eq!(compound_factor(-150.0, 1.0), 0.0);
    }

    #[test]
    fn negative_elapsed_time_does_not_accrue() {
        assert_eq!(compound_factor(10.0, -5.0 * DAY), 1.0);
    }

    #[test]
    fn principal_saturates_at_the_bounds() {
        assert_eq!(clamp_principal(i64::MAX as i128 + 1), (i64::MAX, true));
        assert_eq!(clamp_principal(i64::MIN as i128), (i64::MIN + 1, true));
        assert_eq!(clamp_principal(-42), (-42, false));
        assert_eq!(clamp_principal_f64(f64::INFINITY), (i64::MAX, true));
        assert_eq!(clamp_principal_f64(2.9), (2, false));
        assert_eq!(clamp_principal_f64(-2.1), (-3, false));
    }

    proptest! {
        /// accrue(accrue(k, t0->t1), t1->t2) == accrue(k, t0->t2) within
        /// double-precision tolerance.
        #[test]
        fn accrual_composes(
            rate in -99.0f64..100.0,
            s1 in 0.0f64..(400.0 * DAY),
            s2 in 0.0f64..(400.0 * DAY),
        ) {
            let split = compound_factor(rate, s1) * compound_factor(rate, s2);
            let joined = compound_factor(rate, s1 + s2);
            prop_assert!((split - joined).abs() <= 1e-9 * joined.max(1.0));
        }

        /// The factor is positive and monotone in elapsed time for rates
        /// above -100%.
        #[test]
        fn factor_is_positive(rate in -99.9f64..100.0, s in 0.0f64..(4000.0 * DAY)) {
            prop_assert!(compound_factor(rate, s) > 0.0);
        }
    }
}
