//! Fact model.
//!
//! Domain facts enter the network as `Rc<dyn Fact>` handles. Identity is
//! the caller-supplied `fact_id`, which pairs update/retract calls with the
//! original insert at a source node. Derived values produced inside the
//! graph (group keys, aggregate results) also travel as facts, so the
//! common primitives implement the trait too.

use std::any::Any;
use std::fmt::Debug;
use std::hash::{Hash, Hasher};
use std::rc::Rc;

/// Caller-assigned identity of a domain fact.
///
/// Must be unique per fact type within one session; the domain layer
/// typically uses its planning id here.
pub type FactId = i64;

/// A value that can flow through the network as a tuple slot.
pub trait Fact: Debug + 'static {
    /// Stable identity used to pair insert/update/retract at source nodes.
    fn fact_id(&self) -> FactId;

    /// Downcast support for typed access from user closures.
    fn as_any(&self) -> &dyn Any;
}

/// Shared handle to a fact. Sessions are single-threaded, so `Rc` suffices.
pub type FactHandle = Rc<dyn Fact>;

fn hash_id<T: Hash>(value: &T) -> FactId {
    let mut hasher = std::collections::hash_map::DefaultHasher::new();
    value.hash(&mut hasher);
    hasher.finish() as FactId
}

macro_rules! int_fact {
    ($($ty:ty),*) => {
        $(impl Fact for $ty {
            fn fact_id(&self) -> FactId {
                *self as FactId
            }

            fn as_any(&self) -> &dyn Any {
                self
            }
        })*
    };
}

int_fact!(i32, i64, u32, usize);

impl Fact for bool {
    fn fact_id(&self) -> FactId {
        FactId::from(*self)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

impl Fact for String {
    fn fact_id(&self) -> FactId {
        hash_id(self)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

impl Fact for crate::key::KeyValue {
    fn fact_id(&self) -> FactId {
        hash_id(self)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_primitive_fact_ids() {
        assert_eq!(7i64.fact_id(), 7);
        assert_eq!(7usize.fact_id(), 7);
        assert_eq!(true.fact_id(), 1);
    }

    #[test]
    fn test_downcast_roundtrip() {
        let handle: FactHandle = Rc::new(42i64);
        let value = handle.as_any().downcast_ref::<i64>().copied();
        assert_eq!(value, Some(42));
    }
}
