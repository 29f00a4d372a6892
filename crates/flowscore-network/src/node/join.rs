//! Join node: combines a left stream with an arity-1 right stream.
//!
//! Both sides materialize into an index built from the declared key
//! joiners; with no key joiner the index degenerates to a single bucket
//! and the node scans the opposite side (the unindexed O(n*m) variant).
//! Every created output tuple is recorded in a bucket list on each input
//! tuple's store, so retracting either side touches only that tuple's own
//! matches. A filtering predicate, when present, runs only after the index
//! match succeeds.

use std::collections::HashMap;

use smallvec::SmallVec;

use crate::error::{NetworkError, Result};
use crate::fact::FactHandle;
use crate::index::{extract_keys, IndexLevel, Indexer};
use crate::joiner::{KeyFn, PairPredicate};
use crate::key::IndexKeys;
use crate::tuple::{StoreSlot, TupleArena, TupleId, MAX_ARITY};
use crate::util::{EntryId, ListId, ListPool};

use super::queue::DirtyQueue;

pub struct JoinSpec {
    pub left_levels: Vec<IndexLevel>,
    pub right_levels: Vec<IndexLevel>,
    pub left_keys: Vec<KeyFn>,
    pub right_keys: Vec<KeyFn>,
    pub filter: Option<PairPredicate>,
    pub left_keys_slot: usize,
    pub left_entry_slot: usize,
    pub left_outlist_slot: usize,
    pub right_keys_slot: usize,
    pub right_entry_slot: usize,
    pub right_outlist_slot: usize,
    pub out_left_entry_slot: usize,
    pub out_right_entry_slot: usize,
    pub out_arity: usize,
    pub out_store_size: usize,
}

pub struct JoinState {
    pub left_index: Indexer,
    pub right_index: Indexer,
    pub index_pool: ListPool<TupleId>,
    pub out_lists: ListPool<TupleId>,
    pub queue: DirtyQueue,
}

impl JoinState {
    pub fn new(spec: &JoinSpec) -> Self {
        let mut index_pool = ListPool::new();
        let left_index = Indexer::new(&spec.left_levels, &mut index_pool);
        let right_index = Indexer::new(&spec.right_levels, &mut index_pool);
        JoinState {
            left_index,
            right_index,
            index_pool,
            out_lists: ListPool::new(),
            queue: DirtyQueue::new(),
        }
    }
}

fn expect_list(slot: &StoreSlot, node: usize) -> Result<ListId> {
    match slot {
        StoreSlot::List(list) => Ok(*list),
        other => Err(NetworkError::contract(
            node,
            format!("expected an out-tuple list, store holds {other:?}"),
        )),
    }
}

fn expect_entry(slot: StoreSlot, node: usize) -> Result<EntryId> {
    match slot {
        StoreSlot::Entry(entry) => Ok(entry),
        other => Err(NetworkError::contract(
            node,
            format!("expected an index entry, store holds {other:?}"),
        )),
    }
}

fn passes_filter(
    spec: &JoinSpec,
    arena: &TupleArena,
    left: TupleId,
    right: TupleId,
) -> Result<bool> {
    match &spec.filter {
        None => Ok(true),
        Some(filter) => Ok(filter(arena.get(left)?, arena.get(right)?)),
    }
}

fn insert_out(
    spec: &JoinSpec,
    state: &mut JoinState,
    node: usize,
    arena: &mut TupleArena,
    left: TupleId,
    right: TupleId,
) -> Result<()> {
    let mut facts: SmallVec<[FactHandle; MAX_ARITY]> =
        arena.get(left)?.facts().iter().cloned().collect();
    facts.push(arena.get(right)?.fact_handle(0).clone());
    let out = arena.create(facts, spec.out_store_size);

    let left_list = expect_list(arena.get(left)?.store(spec.left_outlist_slot), node)?;
    let left_entry = state.out_lists.push(left_list, out);
    let right_list = expect_list(arena.get(right)?.store(spec.right_outlist_slot), node)?;
    let right_entry = state.out_lists.push(right_list, out);

    let out_tuple = arena.get_mut(out)?;
    out_tuple.set_store(spec.out_left_entry_slot, StoreSlot::Entry(left_entry));
    out_tuple.set_store(spec.out_right_entry_slot, StoreSlot::Entry(right_entry));
    state.queue.push_created(out);
    Ok(())
}

fn insert_out_filtered(
    spec: &JoinSpec,
    state: &mut JoinState,
    node: usize,
    arena: &mut TupleArena,
    left: TupleId,
    right: TupleId,
) -> Result<()> {
    if passes_filter(spec, arena, left, right)? {
        insert_out(spec, state, node, arena, left, right)?;
    }
    Ok(())
}

fn retract_out(
    spec: &JoinSpec,
    state: &mut JoinState,
    node: usize,
    arena: &mut TupleArena,
    out: TupleId,
) -> Result<()> {
    let left_entry = expect_entry(
        arena.get_mut(out)?.take_store(spec.out_left_entry_slot),
        node,
    )?;
    state.out_lists.remove(left_entry)?;
    let right_entry = expect_entry(
        arena.get_mut(out)?.take_store(spec.out_right_entry_slot),
        node,
    )?;
    state.out_lists.remove(right_entry)?;
    state.queue.request_retract(arena, out, node)
}

fn right_matches(state: &JoinState, keys: &IndexKeys) -> Vec<TupleId> {
    let mut matches = Vec::new();
    state
        .right_index
        .for_each(keys, &state.index_pool, &mut |r| matches.push(r));
    matches
}

fn left_matches(state: &JoinState, keys: &IndexKeys) -> Vec<TupleId> {
    let mut matches = Vec::new();
    state
        .left_index
        .for_each(keys, &state.index_pool, &mut |l| matches.push(l));
    matches
}

pub fn insert_left(
    spec: &JoinSpec,
    state: &mut JoinState,
    node: usize,
    arena: &mut TupleArena,
    left: TupleId,
) -> Result<()> {
    if !matches!(
        arena.get(left)?.store(spec.left_keys_slot),
        StoreSlot::Empty
    ) {
        return Err(NetworkError::contract(
            node,
            "insert of a left tuple this join already tracks".to_string(),
        ));
    }
    let keys = extract_keys(&spec.left_keys, arena.get(left)?);
    let entry = state
        .left_index
        .put(&spec.left_levels, &keys, left, &mut state.index_pool);
    let outlist = state.out_lists.create_list();
    {
        let t = arena.get_mut(left)?;
        t.set_store(spec.left_keys_slot, StoreSlot::Keys(keys.clone()));
        t.set_store(spec.left_entry_slot, StoreSlot::Entry(entry));
        t.set_store(spec.left_outlist_slot, StoreSlot::List(outlist));
    }
    for right in right_matches(state, &keys) {
        insert_out_filtered(spec, state, node, arena, left, right)?;
    }
    Ok(())
}

pub fn insert_right(
    spec: &JoinSpec,
    state: &mut JoinState,
    node: usize,
    arena: &mut TupleArena,
    right: TupleId,
) -> Result<()> {
    if !matches!(
        arena.get(right)?.store(spec.right_keys_slot),
        StoreSlot::Empty
    ) {
        return Err(NetworkError::contract(
            node,
            "insert of a right tuple this join already tracks".to_string(),
        ));
    }
    let keys = extract_keys(&spec.right_keys, arena.get(right)?);
    let entry = state
        .right_index
        .put(&spec.right_levels, &keys, right, &mut state.index_pool);
    let outlist = state.out_lists.create_list();
    {
        let t = arena.get_mut(right)?;
        t.set_store(spec.right_keys_slot, StoreSlot::Keys(keys.clone()));
        t.set_store(spec.right_entry_slot, StoreSlot::Entry(entry));
        t.set_store(spec.right_outlist_slot, StoreSlot::List(outlist));
    }
    for left in left_matches(state, &keys) {
        insert_out_filtered(spec, state, node, arena, left, right)?;
    }
    Ok(())
}

pub fn update_left(
    spec: &JoinSpec,
    state: &mut JoinState,
    node: usize,
    arena: &mut TupleArena,
    left: TupleId,
) -> Result<()> {
    let old_keys = match arena.get(left)?.store(spec.left_keys_slot) {
        StoreSlot::Keys(keys) => keys.clone(),
        // Unseen tuple from an upstream filter.
        StoreSlot::Empty => return insert_left(spec, state, node, arena, left),
        other => {
            return Err(NetworkError::contract(
                node,
                format!("join left key slot holds {other:?}"),
            ))
        }
    };
    let new_keys = extract_keys(&spec.left_keys, arena.get(left)?);
    let outlist = expect_list(arena.get(left)?.store(spec.left_outlist_slot), node)?;

    if new_keys == old_keys {
        let left_facts: Vec<FactHandle> = arena.get(left)?.facts().to_vec();
        if spec.filter.is_none() {
            // Forward the update for downstream filters and weighers.
            for out in state.out_lists.collect(outlist) {
                arena.get_mut(out)?.set_fact_prefix(&left_facts);
                state.queue.request_update(arena, out, node)?;
            }
        } else {
            // Re-pair: an output is identified by the right tuple's
            // out-list, the only backlink the output carries.
            let mut right_to_out: HashMap<ListId, TupleId> = HashMap::new();
            for out in state.out_lists.collect(outlist) {
                let right_entry = match arena.get(out)?.store(spec.out_right_entry_slot) {
                    StoreSlot::Entry(entry) => *entry,
                    other => {
                        return Err(NetworkError::contract(
                            node,
                            format!("join out entry slot holds {other:?}"),
                        ))
                    }
                };
                right_to_out.insert(state.out_lists.list_of(right_entry)?, out);
            }
            for right in right_matches(state, &new_keys) {
                let right_list = expect_list(arena.get(right)?.store(spec.right_outlist_slot), node)?;
                let existing = right_to_out.get(&right_list).copied();
                match (passes_filter(spec, arena, left, right)?, existing) {
                    (true, None) => insert_out(spec, state, node, arena, left, right)?,
                    (true, Some(out)) => {
                        arena.get_mut(out)?.set_fact_prefix(&left_facts);
                        state.queue.request_update(arena, out, node)?;
                    }
                    (false, Some(out)) => retract_out(spec, state, node, arena, out)?,
                    (false, None) => {}
                }
            }
        }
    } else {
        // Key change: retract-then-reinsert for this side only.
        let entry = expect_entry(arena.get_mut(left)?.take_store(spec.left_entry_slot), node)?;
        state
            .left_index
            .remove(&spec.left_levels, &old_keys, entry, &mut state.index_pool)?;
        for out in state.out_lists.collect(outlist) {
            retract_out(spec, state, node, arena, out)?;
        }
        let entry = state
            .left_index
            .put(&spec.left_levels, &new_keys, left, &mut state.index_pool);
        {
            let t = arena.get_mut(left)?;
            t.set_store(spec.left_keys_slot, StoreSlot::Keys(new_keys.clone()));
            t.set_store(spec.left_entry_slot, StoreSlot::Entry(entry));
        }
        for right in right_matches(state, &new_keys) {
            insert_out_filtered(spec, state, node, arena, left, right)?;
        }
    }
    Ok(())
}

pub fn update_right(
    spec: &JoinSpec,
    state: &mut JoinState,
    node: usize,
    arena: &mut TupleArena,
    right: TupleId,
) -> Result<()> {
    let old_keys = match arena.get(right)?.store(spec.right_keys_slot) {
        StoreSlot::Keys(keys) => keys.clone(),
        StoreSlot::Empty => return insert_right(spec, state, node, arena, right),
        other => {
            return Err(NetworkError::contract(
                node,
                format!("join right key slot holds {other:?}"),
            ))
        }
    };
    let new_keys = extract_keys(&spec.right_keys, arena.get(right)?);
    let outlist = expect_list(arena.get(right)?.store(spec.right_outlist_slot), node)?;
    let last = spec.out_arity - 1;

    if new_keys == old_keys {
        let right_fact = arena.get(right)?.fact_handle(0).clone();
        if spec.filter.is_none() {
            for out in state.out_lists.collect(outlist) {
                arena.get_mut(out)?.set_fact(last, right_fact.clone());
                state.queue.request_update(arena, out, node)?;
            }
        } else {
            let mut left_to_out: HashMap<ListId, TupleId> = HashMap::new();
            for out in state.out_lists.collect(outlist) {
                let left_entry = match arena.get(out)?.store(spec.out_left_entry_slot) {
                    StoreSlot::Entry(entry) => *entry,
                    other => {
                        return Err(NetworkError::contract(
                            node,
                            format!("join out entry slot holds {other:?}"),
                        ))
                    }
                };
                left_to_out.insert(state.out_lists.list_of(left_entry)?, out);
            }
            for left in left_matches(state, &new_keys) {
                let left_list = expect_list(arena.get(left)?.store(spec.left_outlist_slot), node)?;
                let existing = left_to_out.get(&left_list).copied();
                match (passes_filter(spec, arena, left, right)?, existing) {
                    (true, None) => insert_out(spec, state, node, arena, left, right)?,
                    (true, Some(out)) => {
                        arena.get_mut(out)?.set_fact(last, right_fact.clone());
                        state.queue.request_update(arena, out, node)?;
                    }
                    (false, Some(out)) => retract_out(spec, state, node, arena, out)?,
                    (false, None) => {}
                }
            }
        }
    } else {
        let entry = expect_entry(
            arena.get_mut(right)?.take_store(spec.right_entry_slot),
            node,
        )?;
        state
            .right_index
            .remove(&spec.right_levels, &old_keys, entry, &mut state.index_pool)?;
        for out in state.out_lists.collect(outlist) {
            retract_out(spec, state, node, arena, out)?;
        }
        let entry = state
            .right_index
            .put(&spec.right_levels, &new_keys, right, &mut state.index_pool);
        {
            let t = arena.get_mut(right)?;
            t.set_store(spec.right_keys_slot, StoreSlot::Keys(new_keys.clone()));
            t.set_store(spec.right_entry_slot, StoreSlot::Entry(entry));
        }
        for left in left_matches(state, &new_keys) {
            insert_out_filtered(spec, state, node, arena, left, right)?;
        }
    }
    Ok(())
}

pub fn retract_left(
    spec: &JoinSpec,
    state: &mut JoinState,
    node: usize,
    arena: &mut TupleArena,
    left: TupleId,
) -> Result<()> {
    let keys = match arena.get_mut(left)?.take_store(spec.left_keys_slot) {
        StoreSlot::Keys(keys) => keys,
        StoreSlot::Empty => return Ok(()),
        other => {
            return Err(NetworkError::contract(
                node,
                format!("join left key slot holds {other:?}"),
            ))
        }
    };
    let entry = expect_entry(arena.get_mut(left)?.take_store(spec.left_entry_slot), node)?;
    state
        .left_index
        .remove(&spec.left_levels, &keys, entry, &mut state.index_pool)?;
    let outlist = expect_list(&arena.get_mut(left)?.take_store(spec.left_outlist_slot), node)?;
    for out in state.out_lists.drain(outlist) {
        // The drain already consumed the out tuple's entry in this list.
        arena.get_mut(out)?.take_store(spec.out_left_entry_slot);
        let right_entry = expect_entry(
            arena.get_mut(out)?.take_store(spec.out_right_entry_slot),
            node,
        )?;
        state.out_lists.remove(right_entry)?;
        state.queue.request_retract(arena, out, node)?;
    }
    state.out_lists.drop_list(outlist)
}

pub fn retract_right(
    spec: &JoinSpec,
    state: &mut JoinState,
    node: usize,
    arena: &mut TupleArena,
    right: TupleId,
) -> Result<()> {
    let keys = match arena.get_mut(right)?.take_store(spec.right_keys_slot) {
        StoreSlot::Keys(keys) => keys,
        StoreSlot::Empty => return Ok(()),
        other => {
            return Err(NetworkError::contract(
                node,
                format!("join right key slot holds {other:?}"),
            ))
        }
    };
    let entry = expect_entry(
        arena.get_mut(right)?.take_store(spec.right_entry_slot),
        node,
    )?;
    state
        .right_index
        .remove(&spec.right_levels, &keys, entry, &mut state.index_pool)?;
    let outlist = expect_list(
        &arena.get_mut(right)?.take_store(spec.right_outlist_slot),
        node,
    )?;
    for out in state.out_lists.drain(outlist) {
        arena.get_mut(out)?.take_store(spec.out_right_entry_slot);
        let left_entry = expect_entry(
            arena.get_mut(out)?.take_store(spec.out_left_entry_slot),
            node,
        )?;
        state.out_lists.remove(left_entry)?;
        state.queue.request_retract(arena, out, node)?;
    }
    state.out_lists.drop_list(outlist)
}
