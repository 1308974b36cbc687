//! Online mean/variance accumulation (Welford).
//!
//! Samples are folded in one at a time and never retained. The accumulator
//! keeps `count`, `mean` and `m2` (sum of squared deltas from the running
//! mean), from which the population variance is derived.

use serde::{Deserialize, Serialize};

use super::rounding::round_half_up;

/// Running count/mean/variance accumulator.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct RunningStats {
    count: u64,
    mean: f64,
    m2: f64,
}

/// Rounded summary emitted in reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatsSummary {
    pub mean: i64,
    pub stddev: i64,
}

impl RunningStats {
    /// Empty accumulator.
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild an accumulator from persisted state.
    ///
    /// Returns `None` when the parts break an invariant: non-finite mean or
    /// m2, negative m2, or a non-zero mean/m2 with a zero count.
    pub fn from_parts(count: u64, mean: f64, m2: f64) -> Option<Self> {
        if !mean.is_finite() || !m2.is_finite() || m2 < 0.0 {
            return None;
        }
        if count == 0 && (mean != 0.0 || m2 != 0.0) {
            return None;
        }
        Some(RunningStats { count, mean, m2 })
    }

    /// Fold one sample into the accumulator.
    ///
    /// Returns `false` and leaves the state untouched when `x` is non-finite
    /// or when folding it in would push the mean or m2 out of finite range.
    pub fn update(&mut self, x: f64) -> bool {
        if !x.is_finite() {
            return false;
        }
        let Some(count) = self.count.checked_add(1) else {
            return false;
        };
        let delta = x - self.mean;
        let mean = self.mean + delta / count as f64;
        let delta2 = x - mean;
        let m2 = self.m2 + delta * delta2;
        if !mean.is_finite() || !m2.is_finite() {
            return false;
        }
        self.count = count;
        self.mean = mean;
        // Rounding can leave a tiny negative residue when samples are equal.
        self.m2 = m2.max(0.0);
        true
    }

    /// Combined accumulator (Chan et al.), or `None` when the count would
    /// overflow or the moments would leave finite range.
    pub fn checked_merge(&self, other: &RunningStats) -> Option<RunningStats> {
        if other.count == 0 {
            return Some(*self);
        }
        if self.count == 0 {
            return Some(*other);
        }
        let count = self.count.checked_add(other.count)?;
        let n_a = self.count as f64;
        let n_b = other.count as f64;
        let n = n_a + n_b;
        let delta = other.mean - self.mean;
        let mean = self.mean + delta * (n_b / n);
        let m2 = self.m2 + other.m2 + delta * delta * (n_a / n) * n_b;
        if !mean.is_finite() || !m2.is_finite() {
            return None;
        }
        Some(RunningStats { count, mean, m2 })
    }

    /// Combine another accumulator into this one.
    ///
    /// Returns `false` and leaves `self` unchanged when the combination
    /// would overflow; see [`RunningStats::checked_merge`].
    pub fn merge(&mut self, other: &RunningStats) -> bool {
        match self.checked_merge(other) {
            Some(merged) => {
                *self = merged;
                true
            }
            None => false,
        }
    }

    pub fn count(&self) -> u64 {
        self.count
    }

    pub fn mean(&self) -> f64 {
        self.mean
    }

    /// Sum of squared deltas (M2).
    pub fn sum_squared_delta(&self) -> f64 {
        self.m2
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    /// Population variance, defined for `count >= 1`.
    pub fn variance(&self) -> Option<f64> {
        if self.count == 0 {
            return None;
        }
        Some(self.m2 / self.count as f64)
    }

    /// Population standard deviation, defined for `count >= 1`.
    pub fn std_dev(&self) -> Option<f64> {
        self.variance().map(f64::sqrt)
    }

    /// Rounded mean/stddev, only when more than one sample was seen.
    pub fn summary(&self) -> Option<StatsSummary> {
        if self.count <= 1 {
            return None;
        }
        let stddev = self.std_dev()?;
        Some(StatsSummary {
            mean: round_half_up(self.mean),
            stddev: round_half_up(stddev),
        })
    }
}

impl Extend<f64> for RunningStats {
    fn extend<I: IntoIterator<Item = f64>>(&mut self, iter: I) {
        for x in iter {
            let _ = self.update(x);
        }
    }
}

impl FromIterator<f64> for RunningStats {
    fn from_iter<I: IntoIterator<Item = f64>>(iter: I) -> Self {
        let mut stats = RunningStats::new();
        stats.extend(iter);
        stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn approx_eq(a: f64, b: f64, tol: f64) -> bool {
        (a - b).abs() <= tol
    }

    #[test]
    fn empty_has_no_moments() {
        let stats = RunningStats::new();
        assert!(stats.is_empty());
        assert_eq!(stats.variance(), None);
        assert_eq!(stats.std_dev(), None);
        assert_eq!(stats.summary(), None);
    }

    #[test]
    fn single_sample_has_variance_but_no_summary() {
        let stats: RunningStats = [7.0].into_iter().collect();
        assert_eq!(stats.count(), 1);
        assert_eq!(stats.mean(), 7.0);
        assert_eq!(stats.variance(), Some(0.0));
        assert_eq!(stats.summary(), None);
    }

    #[test]
    fn two_samples_summary() {
        let stats: RunningStats = [10.0, 20.0].into_iter().collect();
        assert_eq!(
            stats.summary(),
            Some(StatsSummary {
                mean: 15,
                stddev: 5
            })
        );
    }

    #[test]
    fn three_samples_round_stddev() {
        let stats: RunningStats = [3.0, 5.0, 4.0].into_iter().collect();
        assert!(approx_eq(stats.mean(), 4.0, 1e-12));
        assert!(approx_eq(stats.variance().unwrap(), 2.0 / 3.0, 1e-12));
        assert_eq!(stats.summary(), Some(StatsSummary { mean: 4, stddev: 1 }));
    }

    #[test]
    fn non_finite_samples_are_ignored() {
        let mut stats = RunningStats::new();
        stats.update(f64::INFINITY);
        stats.update(f64::NAN);
        stats.update(2.0);
        assert_eq!(stats.count(), 1);
        assert_eq!(stats.mean(), 2.0);
    }

    #[test]
    fn extreme_finite_samples_cannot_break_state() {
        let mut stats = RunningStats::new();
        assert!(stats.update(1e308));
        assert!(!stats.update(-1e308));
        assert_eq!(stats.count(), 1);
        assert_eq!(stats.mean(), 1e308);

        let mut spread = RunningStats::new();
        assert!(spread.update(1e200));
        assert!(!spread.update(-1e200));
        assert!(spread.update(1e200));
        assert!(spread.mean().is_finite());
        assert!(spread.sum_squared_delta().is_finite());
        assert_eq!(spread.count(), 2);
    }

    #[test]
    fn merge_rejects_count_overflow() {
        let big = RunningStats::from_parts(u64::MAX, 1.0, 0.0).unwrap();
        let small: RunningStats = [1.0, 3.0].into_iter().collect();
        assert!(big.checked_merge(&small).is_none());

        let mut merged = small;
        assert!(!merged.merge(&big));
        assert_eq!(merged, small);
    }

    #[test]
    fn merge_rejects_non_finite_moments() {
        let high = RunningStats::from_parts(2, 1e308, 0.0).unwrap();
        let low = RunningStats::from_parts(2, -1e308, 0.0).unwrap();
        assert!(high.checked_merge(&low).is_none());
    }

    #[test]
    fn merge_matches_sequential() {
        let a: RunningStats = [1.0, 2.0, 3.0].into_iter().collect();
        let b: RunningStats = [10.0, 12.0].into_iter().collect();
        let all: RunningStats = [1.0, 2.0, 3.0, 10.0, 12.0].into_iter().collect();

        let mut merged = a;
        assert!(merged.merge(&b));
        assert_eq!(merged.count(), all.count());
        assert!(approx_eq(merged.mean(), all.mean(), 1e-12));
        assert!(approx_eq(
            merged.sum_squared_delta(),
            all.sum_squared_delta(),
            1e-9
        ));
    }

    #[test]
    fn merge_with_empty_is_identity() {
        let a: RunningStats = [4.0, 6.0].into_iter().collect();
        let mut left = RunningStats::new();
        left.merge(&a);
        assert_eq!(left, a);

        let mut right = a;
        right.merge(&RunningStats::new());
        assert_eq!(right, a);
    }

    #[test]
    fn from_parts_validates() {
        assert!(RunningStats::from_parts(3, 4.0, 2.0).is_some());
        assert!(RunningStats::from_parts(0, 0.0, 0.0).is_some());
        assert!(RunningStats::from_parts(2, 1.0, -0.5).is_none());
        assert!(RunningStats::from_parts(2, f64::NAN, 0.0).is_none());
        assert!(RunningStats::from_parts(0, 3.0, 0.0).is_none());
    }

    #[test]
    fn from_parts_restores_exact_state() {
        let stats: RunningStats = [0.1, 0.7, 1.3].into_iter().collect();
        let restored =
            RunningStats::from_parts(stats.count(), stats.mean(), stats.sum_squared_delta())
                .unwrap();
        assert_eq!(restored, stats);
    }

    #[test]
    fn summary_serializes_with_backend_field_names() {
        let summary = StatsSummary { mean: 4, stddev: 1 };
        let json = serde_json::to_string(&summary).unwrap();
        assert_eq!(json, r#"{"mean":4,"stddev":1}"#);
    }
}
