//! Rounding helpers for reported summaries.

/// Round to the nearest integer, ties toward positive infinity.
///
/// This is the rounding the collection backend expects for summary fields
/// (`2.5 -> 3`, `-2.5 -> -2`). Non-finite input saturates per `as` casting
/// rules (NaN maps to 0).
pub fn round_half_up(x: f64) -> i64 {
    let floor = x.floor();
    // `x - floor` is exact for finite x, unlike `x + 0.5`.
    let rounded = if x - floor >= 0.5 { floor + 1.0 } else { floor };
    rounded as i64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rounds_ties_up() {
        assert_eq!(round_half_up(2.5), 3);
        assert_eq!(round_half_up(-2.5), -2);
        assert_eq!(round_half_up(0.5), 1);
    }

    #[test]
    fn rounds_to_nearest() {
        assert_eq!(round_half_up(4.0), 4);
        assert_eq!(round_half_up(0.816), 1);
        assert_eq!(round_half_up(4.49), 4);
        assert_eq!(round_half_up(-1.6), -2);
    }

    #[test]
    fn no_precision_loss_near_half() {
        assert_eq!(round_half_up(0.49999999999999994), 0);
        assert_eq!(round_half_up(-0.5000000000000001), -1);
        let odd = 4_503_599_627_370_497.0; // 2^52 + 1
        assert_eq!(round_half_up(odd), 4_503_599_627_370_497);
        assert_eq!(round_half_up(-odd), -4_503_599_627_370_497);
    }

    #[test]
    fn nan_maps_to_zero() {
        assert_eq!(round_half_up(f64::NAN), 0);
    }
}
