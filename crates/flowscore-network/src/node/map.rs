//! Map node: one output tuple per input tuple, possibly of another arity.
//!
//! The mapper recomputes every derived fact on update; the output tuple
//! keeps its identity.

use std::sync::Arc;

use smallvec::SmallVec;

use crate::error::{NetworkError, Result};
use crate::fact::FactHandle;
use crate::tuple::{StoreSlot, Tuple, TupleArena, TupleId, MAX_ARITY};

use super::queue::DirtyQueue;

pub type MapperFn = Arc<dyn Fn(&Tuple) -> SmallVec<[FactHandle; MAX_ARITY]> + Send + Sync>;

pub struct MapSpec {
    pub mapper: MapperFn,
    pub out_arity: usize,
    /// Store slot on the input holding the owned output tuple.
    pub in_slot: usize,
    pub out_store_size: usize,
}

pub struct MapState {
    pub queue: DirtyQueue,
}

impl MapState {
    pub fn new() -> Self {
        MapState {
            queue: DirtyQueue::new(),
        }
    }
}

impl Default for MapState {
    fn default() -> Self {
        Self::new()
    }
}

fn remap(spec: &MapSpec, input: &Tuple) -> SmallVec<[FactHandle; MAX_ARITY]> {
    let facts = (spec.mapper)(input);
    debug_assert_eq!(facts.len(), spec.out_arity);
    facts
}

pub fn insert(
    spec: &MapSpec,
    state: &mut MapState,
    node: usize,
    arena: &mut TupleArena,
    tuple: TupleId,
) -> Result<()> {
    if !matches!(arena.get(tuple)?.store(spec.in_slot), StoreSlot::Empty) {
        return Err(NetworkError::contract(
            node,
            "insert of a tuple this map already tracks".to_string(),
        ));
    }
    let facts = remap(spec, arena.get(tuple)?);
    let out = arena.create(facts, spec.out_store_size);
    arena
        .get_mut(tuple)?
        .set_store(spec.in_slot, StoreSlot::Tuple(out));
    state.queue.push_created(out);
    Ok(())
}

pub fn update(
    spec: &MapSpec,
    state: &mut MapState,
    node: usize,
    arena: &mut TupleArena,
    tuple: TupleId,
) -> Result<()> {
    match arena.get(tuple)?.store(spec.in_slot) {
        StoreSlot::Tuple(out) => {
            let out = *out;
            let facts = remap(spec, arena.get(tuple)?);
            arena.get_mut(out)?.set_facts(facts);
            state.queue.request_update(arena, out, node)
        }
        // Unseen tuple from an upstream filter.
        StoreSlot::Empty => insert(spec, state, node, arena, tuple),
        other => Err(NetworkError::contract(
            node,
            format!("map slot holds {other:?}"),
        )),
    }
}

pub fn retract(
    spec: &MapSpec,
    state: &mut MapState,
    node: usize,
    arena: &mut TupleArena,
    tuple: TupleId,
) -> Result<()> {
    match arena.get_mut(tuple)?.take_store(spec.in_slot) {
        StoreSlot::Tuple(out) => state.queue.request_retract(arena, out, node),
        StoreSlot::Empty => Ok(()),
        other => Err(NetworkError::contract(
            node,
            format!("map slot holds {other:?}"),
        )),
    }
}
