//! Joiner functions for join and existence nodes.
//!
//! Joiners define matching conditions between the left and right side of a
//! join: key joiners (equality and comparison) feed the index, while
//! `filtering` joiners are arbitrary predicates evaluated only after the
//! index lookup succeeds, keeping the expensive predicate off the hot
//! path.

use std::sync::Arc;

use crate::key::KeyValue;
use crate::tuple::Tuple;

/// Matching condition of one key joiner.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinerType {
    Equal,
    LessThan,
    LessThanOrEqual,
    GreaterThan,
    GreaterThanOrEqual,
}

impl JoinerType {
    /// The same condition seen from the opposite side of the join.
    pub fn inverse(self) -> JoinerType {
        match self {
            JoinerType::Equal => JoinerType::Equal,
            JoinerType::LessThan => JoinerType::GreaterThan,
            JoinerType::LessThanOrEqual => JoinerType::GreaterThanOrEqual,
            JoinerType::GreaterThan => JoinerType::LessThan,
            JoinerType::GreaterThanOrEqual => JoinerType::LessThanOrEqual,
        }
    }
}

/// Extracts an index key from one side's tuple.
pub type KeyFn = Arc<dyn Fn(&Tuple) -> KeyValue + Send + Sync>;

/// Predicate over a (left tuple, right tuple) pair.
pub type PairPredicate = Arc<dyn Fn(&Tuple, &Tuple) -> bool + Send + Sync>;

/// One declared joiner.
pub enum Joiner {
    /// Key-based condition, servable by an index.
    Key {
        joiner_type: JoinerType,
        left: KeyFn,
        right: KeyFn,
    },
    /// Arbitrary pair predicate, evaluated after the index match.
    Filtering(PairPredicate),
}

fn key_fn<K, F>(f: F) -> KeyFn
where
    K: Into<KeyValue>,
    F: Fn(&Tuple) -> K + Send + Sync + 'static,
{
    Arc::new(move |tuple| f(tuple).into())
}

fn key_joiner<KL, KR, L, R>(joiner_type: JoinerType, left: L, right: R) -> Joiner
where
    KL: Into<KeyValue>,
    KR: Into<KeyValue>,
    L: Fn(&Tuple) -> KL + Send + Sync + 'static,
    R: Fn(&Tuple) -> KR + Send + Sync + 'static,
{
    Joiner::Key {
        joiner_type,
        left: key_fn(left),
        right: key_fn(right),
    }
}

/// Matches when both sides extract equal keys.
pub fn equal<KL, KR, L, R>(left: L, right: R) -> Joiner
where
    KL: Into<KeyValue>,
    KR: Into<KeyValue>,
    L: Fn(&Tuple) -> KL + Send + Sync + 'static,
    R: Fn(&Tuple) -> KR + Send + Sync + 'static,
{
    key_joiner(JoinerType::Equal, left, right)
}

/// Matches when the left key is strictly less than the right key.
pub fn less_than<KL, KR, L, R>(left: L, right: R) -> Joiner
where
    KL: Into<KeyValue>,
    KR: Into<KeyValue>,
    L: Fn(&Tuple) -> KL + Send + Sync + 'static,
    R: Fn(&Tuple) -> KR + Send + Sync + 'static,
{
    key_joiner(JoinerType::LessThan, left, right)
}

/// Matches when the left key is less than or equal to the right key.
pub fn less_than_or_equal<KL, KR, L, R>(left: L, right: R) -> Joiner
where
    KL: Into<KeyValue>,
    KR: Into<KeyValue>,
    L: Fn(&Tuple) -> KL + Send + Sync + 'static,
    R: Fn(&Tuple) -> KR + Send + Sync + 'static,
{
    key_joiner(JoinerType::LessThanOrEqual, left, right)
}

/// Matches when the left key is strictly greater than the right key.
pub fn greater_than<KL, KR, L, R>(left: L, right: R) -> Joiner
where
    KL: Into<KeyValue>,
    KR: Into<KeyValue>,
    L: Fn(&Tuple) -> KL + Send + Sync + 'static,
    R: Fn(&Tuple) -> KR + Send + Sync + 'static,
{
    key_joiner(JoinerType::GreaterThan, left, right)
}

/// Matches when the left key is greater than or equal to the right key.
pub fn greater_than_or_equal<KL, KR, L, R>(left: L, right: R) -> Joiner
where
    KL: Into<KeyValue>,
    KR: Into<KeyValue>,
    L: Fn(&Tuple) -> KL + Send + Sync + 'static,
    R: Fn(&Tuple) -> KR + Send + Sync + 'static,
{
    key_joiner(JoinerType::GreaterThanOrEqual, left, right)
}

/// Arbitrary pair condition, checked only after the key joiners match.
pub fn filtering<F>(predicate: F) -> Joiner
where
    F: Fn(&Tuple, &Tuple) -> bool + Send + Sync + 'static,
{
    Joiner::Filtering(Arc::new(predicate))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_inverse_roundtrip() {
        for jt in [
            JoinerType::Equal,
            JoinerType::LessThan,
            JoinerType::LessThanOrEqual,
            JoinerType::GreaterThan,
            JoinerType::GreaterThanOrEqual,
        ] {
            assert_eq!(jt.inverse().inverse(), jt);
        }
    }
}
