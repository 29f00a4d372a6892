//! SimpleScore - single-level score

use std::fmt;
use std::ops::{Add, Neg, Sub};

use super::traits::Score;

/// A score with a single level.
///
/// Useful for problems without a hard/soft split, and for tests.
///
/// # Examples
///
/// ```
/// use flowscore_core::SimpleScore;
///
/// let a = SimpleScore::of(-3);
/// let b = SimpleScore::of(-1);
/// assert!(b > a);
/// assert_eq!(a + b, SimpleScore::of(-4));
/// ```
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct SimpleScore {
    value: i64,
}

impl SimpleScore {
    /// The zero score.
    pub const ZERO: SimpleScore = SimpleScore { value: 0 };

    /// A weight of one.
    pub const ONE: SimpleScore = SimpleScore { value: 1 };

    /// Creates a new SimpleScore.
    #[inline]
    pub const fn of(value: i64) -> Self {
        SimpleScore { value }
    }

    /// Returns the raw value.
    #[inline]
    pub const fn value(&self) -> i64 {
        self.value
    }
}

impl Score for SimpleScore {
    #[inline]
    fn zero() -> Self {
        SimpleScore::ZERO
    }

    #[inline]
    fn is_feasible(&self) -> bool {
        self.value >= 0
    }
}

impl Add for SimpleScore {
    type Output = Self;

    #[inline]
    fn add(self, rhs: Self) -> Self {
        SimpleScore::of(self.value + rhs.value)
    }
}

impl Sub for SimpleScore {
    type Output = Self;

    #[inline]
    fn sub(self, rhs: Self) -> Self {
        SimpleScore::of(self.value - rhs.value)
    }
}

impl Neg for SimpleScore {
    type Output = Self;

    #[inline]
    fn neg(self) -> Self {
        SimpleScore::of(-self.value)
    }
}

impl fmt::Debug for SimpleScore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SimpleScore({})", self.value)
    }
}

impl fmt::Display for SimpleScore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.value)
    }
}
