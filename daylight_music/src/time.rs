// Exact musical time and placement ranges.
//
// All durations and positions are rational numbers of whole-note beats
// (a sixteenth is 1/16). Rational time keeps concatenation and splitting
// exact: a stream assembled from 10/16 + 5/16 + 17/16 pieces sums to exactly
// 2/1, never 1.9999.

use crate::error::PlacementError;
use num_rational::Ratio;
use num_traits::{One, Zero};
use serde::{Deserialize, Serialize};

/// Musical time in whole-note beats.
pub type Beats = Ratio<i64>;

/// Shorthand constructor, `beats(10, 16)` is ten sixteenths.
pub fn beats(numer: i64, denom: i64) -> Beats {
    Ratio::new(numer, denom)
}

/// Whole beats.
pub fn whole(n: i64) -> Beats {
    Ratio::from_integer(n)
}

/// Closed numeric interval `[start, end]` on the shared timeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TimeRange {
    pub start: Beats,
    pub end: Beats,
}

impl TimeRange {
    /// Build a range, rejecting `start > end`.
    pub fn new(start: Beats, end: Beats) -> Result<Self, PlacementError> {
        if start > end {
            return Err(PlacementError::UnorderedRange { start, end });
        }
        Ok(TimeRange { start, end })
    }

    /// A zero-width range at `t`.
    pub fn point(t: Beats) -> Self {
        TimeRange { start: t, end: t }
    }

    pub fn width(&self) -> Beats {
        self.end - self.start
    }

    pub fn midpoint(&self) -> Beats {
        (self.start + self.end) / whole(2)
    }

    pub fn contains(&self, t: Beats) -> bool {
        self.start <= t && t <= self.end
    }

    /// Clamp `t` into the range.
    pub fn clamp(&self, t: Beats) -> Beats {
        if t < self.start {
            self.start
        } else if t > self.end {
            self.end
        } else {
            t
        }
    }

    pub fn shifted(&self, by: Beats) -> Self {
        TimeRange {
            start: self.start + by,
            end: self.end + by,
        }
    }

    /// The point at `balance` (0 = start, 1 = end) within the range.
    pub fn lerp(&self, balance: Beats) -> Beats {
        self.start + self.width() * balance
    }
}

/// Compute `(start_range, end_range)` for material of length `needed`
/// inside a slot of length `total`.
///
/// The slack `total - needed` is split by `balance`: the start range spans
/// `[0, slack * balance]` and the end range spans the rest of the slot
/// after the material. `balance = 0` pins the start to 0 and leaves all
/// slack after the material; `balance = 1` lets the material start as late
/// as possible so the end range collapses onto `total`. Balance outside
/// `[0, 1]` is clamped.
pub fn get_ranges(
    needed: Beats,
    total: Beats,
    balance: Beats,
) -> Result<(TimeRange, TimeRange), PlacementError> {
    if needed < Beats::zero() || needed > total {
        return Err(PlacementError::InvalidRanges { needed, total });
    }
    let balance = TimeRange {
        start: Beats::zero(),
        end: Beats::one(),
    }
    .clamp(balance);
    let slack = total - needed;
    let start_slack = slack * balance;
    let start_range = TimeRange {
        start: Beats::zero(),
        end: start_slack,
    };
    let end_range = TimeRange {
        start: start_slack + needed,
        end: total,
    };
    Ok((start_range, end_range))
}

/// Convert a float balance such as `0.95` into an exact ratio (per mille).
pub fn balance(value: f64) -> Beats {
    let clamped = value.clamp(0.0, 1.0);
    beats((clamped * 1000.0).round() as i64, 1000)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ranges_share_the_slack() {
        let needed = beats(25, 16);
        let total = beats(40, 16);
        let (start, end) = get_ranges(needed, total, beats(1, 2)).unwrap();
        assert_eq!(start.width() + end.width(), total - needed);
        assert_eq!(start.start, Beats::zero());
        assert_eq!(end.end, total);
        assert_eq!(end.start - start.end, needed);
    }

    #[test]
    fn balance_zero_pushes_slack_after() {
        let (start, end) = get_ranges(whole(3), whole(10), Beats::zero()).unwrap();
        assert_eq!(start, TimeRange::point(Beats::zero()));
        assert_eq!(end.start, whole(3));
        assert_eq!(end.end, whole(10));
    }

    #[test]
    fn balance_one_pushes_slack_before() {
        let (start, end) = get_ranges(whole(3), whole(10), Beats::one()).unwrap();
        assert_eq!(start.width(), whole(7));
        assert_eq!(end, TimeRange::point(whole(10)));
    }

    #[test]
    fn balance_is_clamped() {
        let (start, _) = get_ranges(whole(1), whole(5), whole(3)).unwrap();
        assert_eq!(start.end, whole(4));
    }

    #[test]
    fn too_much_material_is_rejected() {
        assert!(matches!(
            get_ranges(whole(6), whole(5), beats(1, 2)),
            Err(PlacementError::InvalidRanges { .. })
        ));
    }

    #[test]
    fn unordered_range_is_rejected() {
        assert!(TimeRange::new(whole(2), whole(1)).is_err());
        assert!(TimeRange::new(whole(1), whole(1)).is_ok());
    }

    #[test]
    fn float_balance_conversion() {
        assert_eq!(balance(0.95), beats(19, 20));
        assert_eq!(balance(-1.0), Beats::zero());
        assert_eq!(balance(7.0), Beats::one());
    }
}
