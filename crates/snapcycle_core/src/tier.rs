//! Retention tiers.
//!
//! A tier is a named bucket granularity with a retention count. The active
//! tier list is always ordered finest to coarsest, because coarser tiers
//! are cloned from the finest tier's snapshot of the same run.

use std::collections::BTreeMap;
use std::fmt;

/// Built-in tier granularities, finest first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Granularity {
    /// One bucket per hour.
    Hourly,
    /// One bucket per day.
    Daily,
    /// One bucket per seven-day slice of the month.
    Weekly,
    /// One bucket per month.
    Monthly,
    /// One bucket per year.
    Yearly,
}

impl Granularity {
    /// All built-in granularities in canonical order.
    pub const ALL: [Granularity; 5] = [
        Granularity::Hourly,
        Granularity::Daily,
        Granularity::Weekly,
        Granularity::Monthly,
        Granularity::Yearly,
    ];

    /// Looks up a granularity by its canonical tier name.
    #[must_use]
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "hourly" => Some(Self::Hourly),
            "daily" => Some(Self::Daily),
            "weekly" => Some(Self::Weekly),
            "monthly" => Some(Self::Monthly),
            "yearly" => Some(Self::Yearly),
            _ => None,
        }
    }

    /// Returns the canonical tier name.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Hourly => "hourly",
            Self::Daily => "daily",
            Self::Weekly => "weekly",
            Self::Monthly => "monthly",
            Self::Yearly => "yearly",
        }
    }
}

/// An active retention tier.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Tier {
    name: String,
    retention: u32,
    granularity: Option<Granularity>,
}

impl Tier {
    /// Creates a tier. Known names resolve to their built-in granularity.
    pub fn new(name: impl Into<String>, retention: u32) -> Self {
        let name = name.into();
        let granularity = Granularity::from_name(&name);
        Self {
            name,
            retention,
            granularity,
        }
    }

    /// Tier name, also the directory name under the destination.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Maximum number of snapshots kept in this tier.
    #[must_use]
    pub fn retention(&self) -> u32 {
        self.retention
    }

    /// Built-in granularity, or `None` for a custom tier name.
    #[must_use]
    pub fn granularity(&self) -> Option<Granularity> {
        self.granularity
    }

    // Known tiers by canonical rank, then custom tiers by name.
    fn sort_key(&self) -> (usize, &str) {
        let rank = self
            .granularity
            .map_or(Granularity::ALL.len(), |g| g as usize);
        (rank, self.name.as_str())
    }
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
    }
}

/// The retention counts used when none are configured.
#[must_use]
pub fn default_intervals() -> BTreeMap<String, u32> {
    [
        (Granularity::Hourly, 24),
        (Granularity::Daily, 7),
        (Granularity::Weekly, 5),
        (Granularity::Monthly, 12),
        (Granularity::Yearly, 9999),
    ]
    .into_iter()
    .map(|(g, count)| (g.name().to_string(), count))
    .collect()
}

/// Derives the active tiers from retention counts, finest first.
///
/// Tiers with a retention count of zero are disabled and dropped.
#[must_use]
pub fn active_tiers(intervals: &BTreeMap<String, u32>) -> Vec<Tier> {
    let mut tiers: Vec<Tier> = intervals
        .iter()
        .filter(|(_, count)| **count > 0)
        .map(|(name, &count)| Tier::new(name.clone(), count))
        .collect();
    tiers.sort_by(|a, b| a.sort_key().cmp(&b.sort_key()));
    tiers
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn names(tiers: &[Tier]) -> Vec<&str> {
        tiers.iter().map(Tier::name).collect()
    }

    #[test]
    fn defaults_are_canonical_order() {
        let tiers = active_tiers(&default_intervals());
        assert_eq!(
            names(&tiers),
            vec!["hourly", "daily", "weekly", "monthly", "yearly"]
        );
        assert_eq!(tiers[4].retention(), 9999);
    }

    #[test]
    fn disabled_tiers_are_dropped() {
        let mut intervals = default_intervals();
        intervals.insert("daily".into(), 0);
        intervals.remove("monthly");

        let tiers = active_tiers(&intervals);
        assert_eq!(names(&tiers), vec!["hourly", "weekly", "yearly"]);
    }

    #[test]
    fn custom_tiers_sort_after_known() {
        let intervals: BTreeMap<String, u32> = [
            ("quarterly".to_string(), 4),
            ("yearly".to_string(), 2),
            ("adhoc".to_string(), 1),
            ("daily".to_string(), 3),
        ]
        .into_iter()
        .collect();

        let tiers = active_tiers(&intervals);
        assert_eq!(names(&tiers), vec!["daily", "yearly", "adhoc", "quarterly"]);
        assert_eq!(tiers[2].granularity(), None);
        assert_eq!(tiers[0].granularity(), Some(Granularity::Daily));
    }

    #[test]
    fn granularity_names_round_trip() {
        for g in Granularity::ALL {
            assert_eq!(Granularity::from_name(g.name()), Some(g));
        }
        assert_eq!(Granularity::from_name("Hourly"), None);
    }

    proptest! {
        #[test]
        fn order_ignores_configuration_order(
            counts in proptest::collection::vec(0u32..5, 5),
            rotate in 0usize..5,
        ) {
            let mut pairs: Vec<(String, u32)> = Granularity::ALL
                .iter()
                .zip(counts.iter())
                .map(|(g, &c)| (g.name().to_string(), c))
                .collect();
            pairs.rotate_left(rotate);

            let tiers = active_tiers(&pairs.into_iter().collect());
            let ranks: Vec<Granularity> =
                tiers.iter().filter_map(Tier::granularity).collect();
            let mut sorted = ranks.clone();
            sorted.sort();
            prop_assert_eq!(ranks, sorted);
            prop_assert_eq!(tiers.len(), counts.iter().filter(|&&c| c > 0).count());
        }
    }
}
