//! Observation records.
//!
//! One record per (day bucket, context, pattern, chosen unit). Repeated
//! observations of the same combination are folded into the record's
//! frequency and distance stats.

use std::fmt;
use std::str::FromStr;

use msu_math::RunningStats;
use serde::{Deserialize, Serialize};

/// Interpretation chosen for an ambiguous date string.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum MostSignificantUnit {
    DayFirst,
    MonthFirst,
    YearFirst,
}

impl MostSignificantUnit {
    pub fn as_str(&self) -> &'static str {
        match self {
            MostSignificantUnit::DayFirst => "day-first",
            MostSignificantUnit::MonthFirst => "month-first",
            MostSignificantUnit::YearFirst => "year-first",
        }
    }
}

impl fmt::Display for MostSignificantUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MostSignificantUnit {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "day" | "day-first" => Ok(MostSignificantUnit::DayFirst),
            "month" | "month-first" => Ok(MostSignificantUnit::MonthFirst),
            "year" | "year-first" => Ok(MostSignificantUnit::YearFirst),
            other => Err(format!(
                "unknown unit {:?} (expected day-first, month-first or year-first)",
                other
            )),
        }
    }
}

/// Identity of an observation. Frequency and stats are not part of it.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ObservationKey {
    pub days_since_opt_in: u32,
    pub context: String,
    pub pattern: String,
    pub unit: MostSignificantUnit,
}

impl ObservationKey {
    pub fn new(
        days_since_opt_in: u32,
        context: impl Into<String>,
        pattern: impl Into<String>,
        unit: MostSignificantUnit,
    ) -> Self {
        Self {
            days_since_opt_in,
            context: context.into(),
            pattern: pattern.into(),
            unit,
        }
    }
}

/// Aggregated observations for one key.
#[derive(Debug, Clone, PartialEq)]
pub struct ObservationRecord {
    key: ObservationKey,
    frequency: u64,
    distance_stats: RunningStats,
}

impl ObservationRecord {
    /// Fresh record with frequency 0. It becomes valid on first `increment`.
    pub fn new(key: ObservationKey) -> Self {
        Self {
            key,
            frequency: 0,
            distance_stats: RunningStats::new(),
        }
    }

    /// Rebuild a record from decoded parts.
    ///
    /// Returns `None` unless `frequency >= 1` and the stats saw no more
    /// samples than there were observations.
    pub fn from_parts(
        key: ObservationKey,
        frequency: u64,
        distance_stats: RunningStats,
    ) -> Option<Self> {
        if frequency == 0 || distance_stats.count() > frequency {
            return None;
        }
        Some(Self {
            key,
            frequency,
            distance_stats,
        })
    }

    pub fn key(&self) -> &ObservationKey {
        &self.key
    }

    pub fn days_since_opt_in(&self) -> u32 {
        self.key.days_since_opt_in
    }

    pub fn context(&self) -> &str {
        &self.key.context
    }

    pub fn pattern(&self) -> &str {
        &self.key.pattern
    }

    pub fn unit(&self) -> MostSignificantUnit {
        self.key.unit
    }

    pub fn frequency(&self) -> u64 {
        self.frequency
    }

    pub fn distance_stats(&self) -> &RunningStats {
        &self.distance_stats
    }

    /// True when both records describe the same logical observation.
    pub fn matches(&self, other: &ObservationRecord) -> bool {
        self.key == other.key
    }

    /// Count one more observation.
    ///
    /// A non-finite distance (no neighbouring cue) is counted in the
    /// frequency but kept out of the distance stats. So is a finite distance
    /// that would overflow the stats, with a warning.
    pub fn increment(&mut self, distance: f64) {
        self.frequency = self.frequency.saturating_add(1);
        if distance.is_finite() && !self.distance_stats.update(distance) {
            tracing::warn!(
                context = %self.key.context,
                pattern = %self.key.pattern,
                distance,
                "distance sample out of range; kept out of stats"
            );
        }
    }

    /// Fold a matching record into this one.
    ///
    /// Returns `false` and leaves `self` unchanged when the combined
    /// frequency or stats would overflow.
    pub(crate) fn absorb(&mut self, other: &ObservationRecord) -> bool {
        debug_assert!(self.matches(other));
        let Some(frequency) = self.frequency.checked_add(other.frequency) else {
            return false;
        };
        let Some(stats) = self.distance_stats.checked_merge(&other.distance_stats) else {
            return false;
        };
        self.frequency = frequency;
        self.distance_stats = stats;
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(day: u32, unit: MostSignificantUnit) -> ObservationKey {
        ObservationKey::new(day, "example.com", "d/m", unit)
    }

    #[test]
    fn test_unit_parse_and_display() {
        assert_eq!(
            "day".parse::<MostSignificantUnit>().unwrap(),
            MostSignificantUnit::DayFirst
        );
        assert_eq!(
            "Month-First".parse::<MostSignificantUnit>().unwrap(),
            MostSignificantUnit::MonthFirst
        );
        assert_eq!(MostSignificantUnit::YearFirst.to_string(), "year-first");
        assert!("week".parse::<MostSignificantUnit>().is_err());
    }

    #[test]
    fn test_unit_serde_is_kebab_case() {
        let json = serde_json::to_string(&MostSignificantUnit::MonthFirst).unwrap();
        assert_eq!(json, "\"month-first\"");
    }

    #[test]
    fn test_matches_ignores_frequency_and_stats() {
        let mut a = ObservationRecord::new(key(0, MostSignificantUnit::DayFirst));
        let b = ObservationRecord::new(key(0, MostSignificantUnit::DayFirst));
        a.increment(3.0);
        a.increment(9.0);
        assert!(a.matches(&b));

        let c = ObservationRecord::new(key(1, MostSignificantUnit::DayFirst));
        let d = ObservationRecord::new(key(0, MostSignificantUnit::MonthFirst));
        assert!(!a.matches(&c));
        assert!(!a.matches(&d));
    }

    #[test]
    fn test_increment_skips_non_finite_distance() {
        let mut record = ObservationRecord::new(key(0, MostSignificantUnit::DayFirst));
        record.increment(4.0);
        record.increment(f64::INFINITY);
        record.increment(f64::NAN);
        assert_eq!(record.frequency(), 3);
        assert_eq!(record.distance_stats().count(), 1);
        assert_eq!(record.distance_stats().mean(), 4.0);
    }

    #[test]
    fn test_from_parts_validates() {
        let stats: RunningStats = [1.0, 2.0].into_iter().collect();
        let k = key(2, MostSignificantUnit::YearFirst);
        assert!(ObservationRecord::from_parts(k.clone(), 0, RunningStats::new()).is_none());
        assert!(ObservationRecord::from_parts(k.clone(), 1, stats).is_none());
        let record = ObservationRecord::from_parts(k, 2, stats).unwrap();
        assert_eq!(record.frequency(), 2);
    }

    #[test]
    fn test_absorb_merges_counts_and_stats() {
        let mut a = ObservationRecord::new(key(0, MostSignificantUnit::DayFirst));
        a.increment(3.0);
        let mut b = ObservationRecord::new(key(0, MostSignificantUnit::DayFirst));
        b.increment(5.0);
        b.increment(f64::INFINITY);

        assert!(a.absorb(&b));
        assert_eq!(a.frequency(), 3);
        assert_eq!(a.distance_stats().count(), 2);
        assert_eq!(a.distance_stats().mean(), 4.0);
    }

    #[test]
    fn test_increment_keeps_out_of_range_distance_out_of_stats() {
        let mut record = ObservationRecord::new(key(0, MostSignificantUnit::DayFirst));
        record.increment(-1e308);
        record.increment(1e308);
        assert_eq!(record.frequency(), 2);
        assert_eq!(record.distance_stats().count(), 1);
        assert_eq!(record.distance_stats().mean(), -1e308);
    }

    #[test]
    fn test_absorb_refuses_frequency_overflow() {
        let k = key(0, MostSignificantUnit::DayFirst);
        let mut a =
            ObservationRecord::from_parts(k.clone(), u64::MAX, RunningStats::new()).unwrap();
        let b = ObservationRecord::from_parts(k, 2, RunningStats::new()).unwrap();
        assert!(!a.absorb(&b));
        assert_eq!(a.frequency(), u64::MAX);
    }
}
