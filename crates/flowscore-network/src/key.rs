//! Dynamic index keys.
//!
//! Join and group keys extracted from tuples are represented by a closed
//! value enum with total ordering, so one indexer implementation serves
//! every joiner shape. Consecutive equality joiners merge their keys into
//! a single composite value (one hash lookup instead of several).

use std::rc::Rc;

use smallvec::SmallVec;

use crate::fact::FactId;

/// A key extracted from a tuple for indexing or grouping.
///
/// `None` is the key of unkeyed levels and of unassigned values; it is a
/// legal key like any other (facts with equal `None` keys join with each
/// other).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum KeyValue {
    None,
    Bool(bool),
    Int(i64),
    Text(Rc<str>),
    Id(FactId),
    Composite(Rc<[KeyValue]>),
}

impl KeyValue {
    /// Builds a composite key from per-joiner parts.
    pub fn composite(parts: impl IntoIterator<Item = KeyValue>) -> Self {
        KeyValue::Composite(parts.into_iter().collect())
    }

    /// Returns the inner integer, if this is an `Int` key.
    pub fn as_int(&self) -> Option<i64> {
        match self {
            KeyValue::Int(v) => Some(*v),
            _ => None,
        }
    }
}

impl From<i64> for KeyValue {
    fn from(v: i64) -> Self {
        KeyValue::Int(v)
    }
}

impl From<i32> for KeyValue {
    fn from(v: i32) -> Self {
        KeyValue::Int(i64::from(v))
    }
}

impl From<u32> for KeyValue {
    fn from(v: u32) -> Self {
        KeyValue::Int(i64::from(v))
    }
}

impl From<usize> for KeyValue {
    fn from(v: usize) -> Self {
        KeyValue::Int(v as i64)
    }
}

impl From<bool> for KeyValue {
    fn from(v: bool) -> Self {
        KeyValue::Bool(v)
    }
}

impl From<&str> for KeyValue {
    fn from(v: &str) -> Self {
        KeyValue::Text(Rc::from(v))
    }
}

impl From<String> for KeyValue {
    fn from(v: String) -> Self {
        KeyValue::Text(Rc::from(v.as_str()))
    }
}

impl<T: Into<KeyValue>> From<Option<T>> for KeyValue {
    fn from(v: Option<T>) -> Self {
        match v {
            Some(inner) => inner.into(),
            None => KeyValue::None,
        }
    }
}

/// One key per indexer level, in level order.
pub type IndexKeys = SmallVec<[KeyValue; 2]>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ordering_within_variant() {
        assert!(KeyValue::Int(1) < KeyValue::Int(2));
        assert!(KeyValue::from("a") < KeyValue::from("b"));
    }

    #[test]
    fn test_option_maps_to_none() {
        assert_eq!(KeyValue::from(None::<i64>), KeyValue::None);
        assert_eq!(KeyValue::from(Some(3i64)), KeyValue::Int(3));
    }

    #[test]
    fn test_composite_equality() {
        let a = KeyValue::composite([KeyValue::Int(1), KeyValue::from("x")]);
        let b = KeyValue::composite([KeyValue::Int(1), KeyValue::from("x")]);
        assert_eq!(a, b);
    }
}
