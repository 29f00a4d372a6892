//! Core Score trait definition

use std::fmt::{Debug, Display};
use std::ops::{Add, Neg, Sub};

/// Core trait for all score types in FlowScore.
///
/// Scores represent the quality of a working solution. They are used to:
/// - Compare solutions (better/worse/equal)
/// - Accumulate per-constraint match weights into a running total
///
/// All score implementations must be:
/// - Immutable (operations return new instances)
/// - Thread-safe (Send + Sync)
/// - Comparable (total ordering, higher is better)
pub trait Score:
    Copy
    + Debug
    + Display
    + Default
    + Send
    + Sync
    + PartialEq
    + Eq
    + PartialOrd
    + Ord
    + Add<Output = Self>
    + Sub<Output = Self>
    + Neg<Output = Self>
    + 'static
{
    /// Returns the zero score (identity element for addition).
    fn zero() -> Self;

    /// Returns true if this score represents a feasible solution.
    ///
    /// A solution is feasible when all hard constraint levels are >= 0.
    fn is_feasible(&self) -> bool;

    /// Returns true if no level of this score is negative.
    ///
    /// Used to validate match weights: a penalty weight must not be
    /// negative, otherwise the constraint's polarity silently flips.
    fn is_non_negative(&self) -> bool {
        *self >= Self::zero()
    }
}
