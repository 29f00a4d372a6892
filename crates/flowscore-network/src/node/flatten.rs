//! Flatten node: expands the last fact into zero-or-more output tuples.
//!
//! The owned expansion is tracked in a bucket list hanging off the input
//! tuple's store, so an update can retract the stale expansion wholesale
//! and re-expand, and a retract removes the whole owned set.

use std::sync::Arc;

use smallvec::SmallVec;

use crate::error::{NetworkError, Result};
use crate::fact::FactHandle;
use crate::tuple::{StoreSlot, Tuple, TupleArena, TupleId, MAX_ARITY};
use crate::util::ListPool;

use super::queue::DirtyQueue;

pub type ExpanderFn = Arc<dyn Fn(&Tuple) -> Vec<FactHandle> + Send + Sync>;

pub struct FlattenSpec {
    /// Produces the expansion values replacing the input's last fact.
    pub expander: ExpanderFn,
    /// Store slot on the input holding the owned-output list.
    pub in_slot: usize,
    pub out_store_size: usize,
}

pub struct FlattenState {
    pub owned: ListPool<TupleId>,
    pub queue: DirtyQueue,
}

impl FlattenState {
    pub fn new() -> Self {
        FlattenState {
            owned: ListPool::new(),
            queue: DirtyQueue::new(),
        }
    }
}

impl Default for FlattenState {
    fn default() -> Self {
        Self::new()
    }
}

fn expand_into(
    spec: &FlattenSpec,
    state: &mut FlattenState,
    arena: &mut TupleArena,
    tuple: TupleId,
    list: crate::util::ListId,
) -> Result<()> {
    let values = (spec.expander)(arena.get(tuple)?);
    let last = arena.get(tuple)?.arity() - 1;
    for value in values {
        let mut facts: SmallVec<[FactHandle; MAX_ARITY]> =
            arena.get(tuple)?.facts().iter().cloned().collect();
        facts[last] = value;
        let out = arena.create(facts, spec.out_store_size);
        state.owned.push(list, out);
        state.queue.push_created(out);
    }
    Ok(())
}

pub fn insert(
    spec: &FlattenSpec,
    state: &mut FlattenState,
    node: usize,
    arena: &mut TupleArena,
    tuple: TupleId,
) -> Result<()> {
    if !matches!(arena.get(tuple)?.store(spec.in_slot), StoreSlot::Empty) {
        return Err(NetworkError::contract(
            node,
            "insert of a tuple this flatten already tracks".to_string(),
        ));
    }
    let list = state.owned.create_list();
    arena
        .get_mut(tuple)?
        .set_store(spec.in_slot, StoreSlot::List(list));
    expand_into(spec, state, arena, tuple, list)
}

pub fn update(
    spec: &FlattenSpec,
    state: &mut FlattenState,
    node: usize,
    arena: &mut TupleArena,
    tuple: TupleId,
) -> Result<()> {
    match arena.get(tuple)?.store(spec.in_slot) {
        StoreSlot::List(list) => {
            let list = *list;
            for out in state.owned.drain(list) {
                state.queue.request_retract(arena, out, node)?;
            }
            expand_into(spec, state, arena, tuple, list)
        }
        StoreSlot::Empty => insert(spec, state, node, arena, tuple),
        other => Err(NetworkError::contract(
            node,
            format!("flatten slot holds {other:?}"),
        )),
    }
}

pub fn retract(
    spec: &FlattenSpec,
    state: &mut FlattenState,
    node: usize,
    arena: &mut TupleArena,
    tuple: TupleId,
) -> Result<()> {
    match arena.get_mut(tuple)?.take_store(spec.in_slot) {
        StoreSlot::List(list) => {
            for out in state.owned.drain(list) {
                state.queue.request_retract(arena, out, node)?;
            }
            state.owned.drop_list(list)
        }
        StoreSlot::Empty => Ok(()),
        other => Err(NetworkError::contract(
            node,
            format!("flatten slot holds {other:?}"),
        )),
    }
}
