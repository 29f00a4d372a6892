//! Precomputed source: replays a fixed, externally-supplied tuple
//! sequence.
//!
//! The supplier runs once when the session binds and again on each
//! explicit refresh, which retracts the previous replay first. Used to
//! inject derived-once side tables not tied to live domain facts.

use std::sync::Arc;

use smallvec::SmallVec;

use crate::error::Result;
use crate::fact::FactHandle;
use crate::tuple::{TupleArena, TupleId, MAX_ARITY};

use super::queue::DirtyQueue;

pub type SupplierFn = Arc<dyn Fn() -> Vec<SmallVec<[FactHandle; MAX_ARITY]>> + Send + Sync>;

pub struct PrecomputeSpec {
    pub supplier: SupplierFn,
    pub arity: usize,
    pub out_store_size: usize,
}

pub struct PrecomputeState {
    pub live: Vec<TupleId>,
    pub queue: DirtyQueue,
}

impl PrecomputeState {
    pub fn new() -> Self {
        PrecomputeState {
            live: Vec::new(),
            queue: DirtyQueue::new(),
        }
    }
}

impl Default for PrecomputeState {
    fn default() -> Self {
        Self::new()
    }
}

/// Runs the supplier and inserts its tuples verbatim.
pub fn compute(
    spec: &PrecomputeSpec,
    state: &mut PrecomputeState,
    arena: &mut TupleArena,
) -> Result<()> {
    for facts in (spec.supplier)() {
        debug_assert_eq!(facts.len(), spec.arity);
        let tuple = arena.create(facts, spec.out_store_size);
        state.live.push(tuple);
        state.queue.push_created(tuple);
    }
    Ok(())
}

/// Retracts the previous replay and recomputes.
pub fn refresh(
    spec: &PrecomputeSpec,
    state: &mut PrecomputeState,
    node: usize,
    arena: &mut TupleArena,
) -> Result<()> {
    for tuple in std::mem::take(&mut state.live) {
        state.queue.request_retract(arena, tuple, node)?;
    }
    compute(spec, state, arena)
}
