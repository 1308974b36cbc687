//! Fuzz target for merging running statistics.
//!
//! Merging two accumulators of bounded samples must succeed, count every
//! sample exactly once and never report a negative variance. Unbounded
//! samples must never leave the state non-finite.

#![no_main]

use arbitrary::Arbitrary;
use libfuzzer_sys::fuzz_target;
use msu_math::RunningStats;

#[derive(Debug, Arbitrary)]
struct Input {
    left: Vec<f64>,
    right: Vec<f64>,
}

fuzz_target!(|input: Input| {
    let finite = |xs: &[f64]| -> Vec<f64> {
        xs.iter().copied().filter(|x| x.is_finite() && x.abs() < 1e12).collect()
    };
    let left = finite(&input.left);
    let right = finite(&input.right);

    let mut merged: RunningStats = left.iter().copied().collect();
    assert!(merged.merge(&right.iter().copied().collect()));

    assert_eq!(merged.count() as usize, left.len() + right.len());
    if let Some(variance) = merged.variance() {
        assert!(variance >= -1e-6);
    }

    let raw_left: RunningStats = input.left.iter().copied().collect();
    let raw_right: RunningStats = input.right.iter().copied().collect();
    if let Some(wide) = raw_left.checked_merge(&raw_right) {
        assert!(wide.mean().is_finite());
        assert!(wide.sum_squared_delta().is_finite());
    }
});
