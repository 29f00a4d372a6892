// Collectors for grouping and aggregating tuples.
//
// A collector creates one accumulator per live group. `supports_retract`
// is a capability flag: when false, the group node rebuilds the
// accumulator from the live member list on every retraction instead of
// undoing a single contribution: an O(group size) fallback, not a bug.

mod count;
mod minmax;
mod sum;

#[cfg(test)]
mod tests;

pub use count::{count, CountCollector};
pub use minmax::{max, min, MaxCollector, MinCollector};
pub use sum::{sum, SumCollector};

use std::fmt;

use crate::key::KeyValue;
use crate::tuple::Tuple;

/// Failure modes of accumulator bookkeeping.
///
/// These indicate the group node drove the accumulator outside its
/// declared semantics and are surfaced as collector-misuse errors naming
/// the offending constraint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CollectorError {
    /// More retractions than accumulations.
    Underflow,
    /// The undo value did not match what accumulate produced.
    UndoMismatch,
    /// `retract` called on a collector that declared `supports_retract == false`.
    RetractUnsupported,
}

impl fmt::Display for CollectorError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CollectorError::Underflow => write!(f, "accumulator underflow"),
            CollectorError::UndoMismatch => write!(f, "undo value does not match accumulation"),
            CollectorError::RetractUnsupported => {
                write!(f, "retract called on a collector without retract support")
            }
        }
    }
}

/// Factory for per-group accumulators.
pub trait Collector: Send + Sync {
    fn create_accumulator(&self) -> Box<dyn Accumulator>;

    /// When false, the owning group node recomputes from the live member
    /// list on every retraction.
    fn supports_retract(&self) -> bool {
        true
    }
}

/// Running state of one collector within one group.
pub trait Accumulator {
    /// Folds a member tuple in, returning the undo value a later retract
    /// consumes. The value is cached by the group node because the tuple's
    /// facts may have changed by the time it is retracted.
    fn accumulate(&mut self, tuple: &Tuple) -> KeyValue;

    /// Unfolds a previous accumulation.
    fn retract(&mut self, undo: &KeyValue) -> Result<(), CollectorError>;

    /// Current aggregate value.
    fn result(&self) -> KeyValue;

    /// Clears the state for a recompute pass.
    fn reset(&mut self);
}
