//! Snapshot bucket naming.
//!
//! Every tier maps the run timestamp to a bucket name. The timestamp is
//! captured once when a run starts and passed to every naming call, so all
//! tiers agree on "now" however long the run takes.

use crate::tier::{Granularity, Tier};
use chrono::{Datelike, Local, NaiveDateTime, Timelike};
use std::fmt;

/// The moment a run started, in local wall-clock time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct RunTimestamp(NaiveDateTime);

impl RunTimestamp {
    /// Captures the current local time.
    #[must_use]
    pub fn capture() -> Self {
        Self(Local::now().naive_local())
    }

    /// Wraps an explicit timestamp.
    #[must_use]
    pub const fn at(when: NaiveDateTime) -> Self {
        Self(when)
    }

    /// Returns the wrapped timestamp.
    #[must_use]
    pub const fn as_naive(&self) -> NaiveDateTime {
        self.0
    }
}

impl fmt::Display for RunTimestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.format("%Y-%m-%d %H:%M:%S"))
    }
}

/// Week-of-month index used by the weekly tier.
///
/// This is the day of the month divided by seven, so it ranges over `0..=4`.
/// It is not an ISO week number.
#[must_use]
pub fn week_of_month(day: u32) -> u32 {
    day / 7
}

/// Returns the bucket name for `tier` at `at`.
///
/// Custom tiers use the hourly format.
#[must_use]
pub fn bucket_name(tier: &Tier, at: RunTimestamp) -> String {
    let t = at.as_naive();
    match tier.granularity().unwrap_or(Granularity::Hourly) {
        Granularity::Hourly => format!(
            "{:04}-{:02}-{:02}.{:02}",
            t.year(),
            t.month(),
            t.day(),
            t.hour()
        ),
        Granularity::Daily => format!("{:04}-{:02}-{:02}", t.year(), t.month(), t.day()),
        Granularity::Weekly => format!(
            "{:04}-{:02}-week-{:02}",
            t.year(),
            t.month(),
            week_of_month(t.day())
        ),
        Granularity::Monthly => format!("{:04}-{:02}", t.year(), t.month()),
        Granularity::Yearly => format!("{:04}", t.year()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use proptest::prelude::*;

    fn ts(y: i32, m: u32, d: u32, h: u32) -> RunTimestamp {
        RunTimestamp::at(
            NaiveDate::from_ymd_opt(y, m, d)
                .unwrap()
                .and_hms_opt(h, 17, 42)
                .unwrap(),
        )
    }

    fn name(tier: &str, at: RunTimestamp) -> String {
        bucket_name(&Tier::new(tier, 1), at)
    }

    #[test]
    fn builtin_formats() {
        let at = ts(2024, 3, 11, 14);
        assert_eq!(name("hourly", at), "2024-03-11.14");
        assert_eq!(name("daily", at), "2024-03-11");
        assert_eq!(name("weekly", at), "2024-03-week-01");
        assert_eq!(name("monthly", at), "2024-03");
        assert_eq!(name("yearly", at), "2024");
    }

    #[test]
    fn weekly_is_day_divided_by_seven() {
        assert_eq!(name("weekly", ts(2024, 1, 1, 0)), "2024-01-week-00");
        assert_eq!(name("weekly", ts(2024, 1, 6, 0)), "2024-01-week-00");
        assert_eq!(name("weekly", ts(2024, 1, 7, 0)), "2024-01-week-01");
        assert_eq!(name("weekly", ts(2024, 1, 27, 0)), "2024-01-week-03");
        assert_eq!(name("weekly", ts(2024, 1, 28, 0)), "2024-01-week-04");
        assert_eq!(name("weekly", ts(2024, 1, 31, 0)), "2024-01-week-04");
    }

    #[test]
    fn midnight_and_padding() {
        let at = ts(987, 1, 2, 0);
        assert_eq!(name("hourly", at), "0987-01-02.00");
        assert_eq!(name("yearly", at), "0987");
    }

    #[test]
    fn custom_tier_uses_hourly_format() {
        let at = ts(2024, 12, 31, 23);
        assert_eq!(name("adhoc", at), name("hourly", at));
    }

    proptest! {
        #[test]
        fn names_are_prefixes_of_finer_names(
            y in 1970i32..2200,
            m in 1u32..=12,
            d in 1u32..=28,
            h in 0u32..24,
        ) {
            let at = ts(y, m, d, h);
            let hourly = name("hourly", at);
            let daily = name("daily", at);
            let monthly = name("monthly", at);
            let yearly = name("yearly", at);
            let weekly = name("weekly", at);

            prop_assert!(hourly.starts_with(&daily));
            prop_assert!(daily.starts_with(&monthly));
            prop_assert!(weekly.starts_with(&monthly));
            prop_assert!(monthly.starts_with(&yearly));
            prop_assert!(week_of_month(d) <= 4);
        }

        #[test]
        fn naming_is_deterministic(h in 0u32..24, d in 1u32..=28) {
            let at = ts(2030, 6, d, h);
            for g in Granularity::ALL {
                prop_assert_eq!(name(g.name(), at), name(g.name(), at));
            }
        }
    }
}
