//! Source node: entry point for one declared fact type.
//!
//! Wraps each admitted fact in an arity-1 tuple and pairs later
//! update/retract calls with it by `fact_id`. An optional prefilter runs
//! before anything downstream (index population included) sees the fact;
//! the domain layer uses it to exclude unassigned facts at the source.

use std::any::TypeId;
use std::collections::HashMap;
use std::sync::Arc;

use smallvec::smallvec;

use crate::error::{NetworkError, Result};
use crate::fact::{Fact, FactHandle, FactId};
use crate::tuple::{TupleArena, TupleId};

use super::queue::DirtyQueue;

pub struct ForEachSpec {
    pub fact_type: TypeId,
    pub type_name: &'static str,
    pub source_filter: Option<Arc<dyn Fn(&dyn Fact) -> bool + Send + Sync>>,
    pub out_store_size: usize,
}

pub struct ForEachState {
    by_id: HashMap<FactId, TupleId>,
    pub queue: DirtyQueue,
}

impl ForEachState {
    pub fn new() -> Self {
        ForEachState {
            by_id: HashMap::new(),
            queue: DirtyQueue::new(),
        }
    }

    pub fn live_fact_count(&self) -> usize {
        self.by_id.len()
    }
}

impl Default for ForEachState {
    fn default() -> Self {
        Self::new()
    }
}

fn passes(spec: &ForEachSpec, fact: &FactHandle) -> bool {
    spec.source_filter.as_ref().map_or(true, |f| f(fact.as_ref()))
}

pub fn insert(
    spec: &ForEachSpec,
    state: &mut ForEachState,
    node: usize,
    arena: &mut TupleArena,
    fact: FactHandle,
) -> Result<()> {
    let id = fact.fact_id();
    if state.by_id.contains_key(&id) {
        return Err(NetworkError::contract(
            node,
            format!("fact {id} of type {} was already inserted", spec.type_name),
        ));
    }
    if !passes(spec, &fact) {
        return Ok(());
    }
    let tuple = arena.create(smallvec![fact], spec.out_store_size);
    state.by_id.insert(id, tuple);
    state.queue.push_created(tuple);
    Ok(())
}

pub fn update(
    spec: &ForEachSpec,
    state: &mut ForEachState,
    node: usize,
    arena: &mut TupleArena,
    fact: FactHandle,
) -> Result<()> {
    let id = fact.fact_id();
    match state.by_id.get(&id).copied() {
        Some(tuple) => {
            arena.get_mut(tuple)?.set_fact(0, fact.clone());
            if passes(spec, &fact) {
                state.queue.request_update(arena, tuple, node)
            } else {
                // The fact dropped out of the source filter.
                state.by_id.remove(&id);
                state.queue.request_retract(arena, tuple, node)
            }
        }
        None if spec.source_filter.is_some() => {
            // The fact was filtered out at insert time; admit it now if it
            // passes.
            if passes(spec, &fact) {
                let tuple = arena.create(smallvec![fact], spec.out_store_size);
                state.by_id.insert(id, tuple);
                state.queue.push_created(tuple);
            }
            Ok(())
        }
        None => Err(NetworkError::contract(
            node,
            format!(
                "update of fact {id} of type {} that was never inserted",
                spec.type_name
            ),
        )),
    }
}

pub fn retract(
    spec: &ForEachSpec,
    state: &mut ForEachState,
    node: usize,
    arena: &mut TupleArena,
    fact: &FactHandle,
) -> Result<()> {
    let id = fact.fact_id();
    match state.by_id.remove(&id) {
        Some(tuple) => state.queue.request_retract(arena, tuple, node),
        None if spec.source_filter.is_some() => Ok(()),
        None => Err(NetworkError::contract(
            node,
            format!(
                "retract of fact {id} of type {} that was never inserted",
                spec.type_name
            ),
        )),
    }
}
