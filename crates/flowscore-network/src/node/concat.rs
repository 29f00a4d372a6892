//! Concat node: merges two same-shaped upstream streams into one.
//!
//! Each side is tracked independently through its own store slot, so a
//! left tuple and a right tuple never collide even if their facts happen
//! to be equal. When the sides' arities differ, the narrower side's
//! padding function computes the missing trailing facts.

use std::sync::Arc;

use smallvec::SmallVec;

use crate::error::{NetworkError, Result};
use crate::fact::FactHandle;
use crate::tuple::{StoreSlot, Tuple, TupleArena, TupleId, MAX_ARITY};

use super::queue::DirtyQueue;
use super::Port;

pub type PadFn = Arc<dyn Fn(&Tuple) -> SmallVec<[FactHandle; 2]> + Send + Sync>;

pub struct ConcatSide {
    /// Store slot on this side's origin holding the owned output tuple.
    pub in_slot: usize,
    /// Computes the trailing facts this side is missing, if any.
    pub pad: Option<PadFn>,
}

pub struct ConcatSpec {
    pub left: ConcatSide,
    pub right: ConcatSide,
    pub out_arity: usize,
    pub out_store_size: usize,
}

impl ConcatSpec {
    fn side(&self, port: Port) -> &ConcatSide {
        match port {
            Port::Left => &self.left,
            Port::Right => &self.right,
            Port::Only => &self.left,
        }
    }
}

pub struct ConcatState {
    pub queue: DirtyQueue,
}

impl ConcatState {
    pub fn new() -> Self {
        ConcatState {
            queue: DirtyQueue::new(),
        }
    }
}

impl Default for ConcatState {
    fn default() -> Self {
        Self::new()
    }
}

fn out_facts(side: &ConcatSide, input: &Tuple) -> SmallVec<[FactHandle; MAX_ARITY]> {
    let mut facts: SmallVec<[FactHandle; MAX_ARITY]> = input.facts().iter().cloned().collect();
    if let Some(pad) = &side.pad {
        facts.extend(pad(input));
    }
    facts
}

pub fn insert(
    spec: &ConcatSpec,
    state: &mut ConcatState,
    node: usize,
    arena: &mut TupleArena,
    port: Port,
    tuple: TupleId,
) -> Result<()> {
    let side = spec.side(port);
    if !matches!(arena.get(tuple)?.store(side.in_slot), StoreSlot::Empty) {
        return Err(NetworkError::contract(
            node,
            "insert of a tuple this concat side already tracks".to_string(),
        ));
    }
    let facts = out_facts(side, arena.get(tuple)?);
    debug_assert_eq!(facts.len(), spec.out_arity);
    let out = arena.create(facts, spec.out_store_size);
    arena
        .get_mut(tuple)?
        .set_store(side.in_slot, StoreSlot::Tuple(out));
    state.queue.push_created(out);
    Ok(())
}

pub fn update(
    spec: &ConcatSpec,
    state: &mut ConcatState,
    node: usize,
    arena: &mut TupleArena,
    port: Port,
    tuple: TupleId,
) -> Result<()> {
    let side = spec.side(port);
    match arena.get(tuple)?.store(side.in_slot) {
        StoreSlot::Tuple(out) => {
            let out = *out;
            let facts = out_facts(side, arena.get(tuple)?);
            arena.get_mut(out)?.set_facts(facts);
            state.queue.request_update(arena, out, node)
        }
        StoreSlot::Empty => insert(spec, state, node, arena, port, tuple),
        other => Err(NetworkError::contract(
            node,
            format!("concat slot holds {other:?}"),
        )),
    }
}

pub fn retract(
    spec: &ConcatSpec,
    state: &mut ConcatState,
    node: usize,
    arena: &mut TupleArena,
    port: Port,
    tuple: TupleId,
) -> Result<()> {
    let side = spec.side(port);
    match arena.get_mut(tuple)?.take_store(side.in_slot) {
        StoreSlot::Tuple(out) => state.queue.request_retract(arena, out, node),
        StoreSlot::Empty => Ok(()),
        other => Err(NetworkError::contract(
            node,
            format!("concat slot holds {other:?}"),
        )),
    }
}
