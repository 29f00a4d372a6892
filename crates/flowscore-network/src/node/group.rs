//! Group node: groups input tuples by a derived key and maintains one or
//! more collector accumulators per group.
//!
//! The output tuple is (key, result...), or just the results when the
//! node has no key function and aggregates everything into one singleton
//! group. Output identity is stable while the group lives; the group and
//! its output are retracted when the last member leaves. Collector results
//! are materialized lazily, once per settle pass, when the group flushes.
//!
//! Collectors without retract support are rebuilt from the live member
//! list on every removal, the documented O(group size) fallback.

use std::collections::HashMap;
use std::rc::Rc;
use std::sync::Arc;

use smallvec::SmallVec;

use crate::collector::Collector;
use crate::error::{NetworkError, Result};
use crate::fact::FactHandle;
use crate::joiner::KeyFn;
use crate::key::KeyValue;
use crate::tuple::{GroupId, StoreSlot, TupleArena, TupleId, TupleState, MAX_ARITY};
use crate::util::{ListId, ListPool};

use super::LifecycleKind;

pub struct GroupSpec {
    /// `None` aggregates every input into a single group.
    pub key_fn: Option<KeyFn>,
    pub collectors: Vec<Arc<dyn Collector>>,
    /// Diagnostic name used in collector-misuse errors.
    pub label: String,
    pub group_slot: usize,
    pub undo_slot: usize,
    pub member_entry_slot: usize,
    pub out_arity: usize,
    pub out_store_size: usize,
}

pub struct Group {
    pub key: Option<KeyValue>,
    pub parent_count: usize,
    pub accumulators: Vec<Box<dyn crate::collector::Accumulator>>,
    pub member_list: ListId,
    pub out: TupleId,
}

pub struct GroupState {
    groups: Vec<Option<Group>>,
    free: Vec<u32>,
    by_key: HashMap<KeyValue, GroupId>,
    singleton: Option<GroupId>,
    pub members: ListPool<TupleId>,
    pub dirty: Vec<GroupId>,
}

impl GroupState {
    pub fn new() -> Self {
        GroupState {
            groups: Vec::new(),
            free: Vec::new(),
            by_key: HashMap::new(),
            singleton: None,
            members: ListPool::new(),
            dirty: Vec::new(),
        }
    }

    pub fn group(&self, id: GroupId) -> Result<&Group> {
        self.groups
            .get(id.0 as usize)
            .and_then(|g| g.as_ref())
            .ok_or_else(|| NetworkError::StaleHandle(format!("group {id:?} is gone")))
    }

    pub fn group_mut(&mut self, id: GroupId) -> Result<&mut Group> {
        self.groups
            .get_mut(id.0 as usize)
            .and_then(|g| g.as_mut())
            .ok_or_else(|| NetworkError::StaleHandle(format!("group {id:?} is gone")))
    }

    fn alloc(&mut self, group: Group) -> GroupId {
        match self.free.pop() {
            Some(index) => {
                self.groups[index as usize] = Some(group);
                GroupId(index)
            }
            None => {
                self.groups.push(Some(group));
                GroupId(self.groups.len() as u32 - 1)
            }
        }
    }

    fn free_group(&mut self, id: GroupId) -> Result<Group> {
        let group = self.groups[id.0 as usize]
            .take()
            .ok_or_else(|| NetworkError::StaleHandle(format!("group {id:?} is gone")))?;
        self.free.push(id.0);
        Ok(group)
    }

    pub fn live_group_count(&self) -> usize {
        self.groups.len() - self.free.len()
    }
}

impl Default for GroupState {
    fn default() -> Self {
        Self::new()
    }
}

fn misuse(spec: &GroupSpec, error: crate::collector::CollectorError) -> NetworkError {
    NetworkError::CollectorMisuse {
        constraint: spec.label.clone(),
        message: error.to_string(),
    }
}

fn out_facts(group: &Group) -> SmallVec<[FactHandle; MAX_ARITY]> {
    let mut facts: SmallVec<[FactHandle; MAX_ARITY]> = SmallVec::new();
    if let Some(key) = &group.key {
        facts.push(Rc::new(key.clone()) as FactHandle);
    }
    for accumulator in &group.accumulators {
        facts.push(Rc::new(accumulator.result()) as FactHandle);
    }
    facts
}

fn derive_key(spec: &GroupSpec, arena: &TupleArena, tuple: TupleId) -> Result<Option<KeyValue>> {
    match &spec.key_fn {
        Some(f) => Ok(Some(f(arena.get(tuple)?))),
        None => Ok(None),
    }
}

/// Folds the tuple into the group's accumulators and records the member
/// entry plus undo values in the tuple's store.
fn accumulate_into(
    spec: &GroupSpec,
    state: &mut GroupState,
    arena: &mut TupleArena,
    id: GroupId,
    tuple: TupleId,
) -> Result<()> {
    let mut undos: SmallVec<[KeyValue; 2]> = SmallVec::new();
    {
        let group = state.group_mut(id)?;
        let input = arena.get(tuple)?;
        for accumulator in &mut group.accumulators {
            undos.push(accumulator.accumulate(input));
        }
    }
    let member_list = state.group(id)?.member_list;
    let entry = state.members.push(member_list, tuple);
    let t = arena.get_mut(tuple)?;
    t.set_store(spec.group_slot, StoreSlot::Group(id));
    t.set_store(spec.undo_slot, StoreSlot::Undo(undos));
    t.set_store(spec.member_entry_slot, StoreSlot::Entry(entry));
    Ok(())
}

/// Undoes one member's contribution; collectors without retract support
/// are rebuilt from the remaining members.
fn unaccumulate(
    spec: &GroupSpec,
    state: &mut GroupState,
    arena: &TupleArena,
    id: GroupId,
    undos: &[KeyValue],
) -> Result<()> {
    let members = state.members.collect(state.group(id)?.member_list);
    let group = state.group_mut(id)?;
    for (i, collector) in spec.collectors.iter().enumerate() {
        if collector.supports_retract() {
            group.accumulators[i]
                .retract(&undos[i])
                .map_err(|e| misuse(spec, e))?;
        } else {
            group.accumulators[i].reset();
            for member in &members {
                group.accumulators[i].accumulate(arena.get(*member)?);
            }
        }
    }
    Ok(())
}

fn get_or_create(
    spec: &GroupSpec,
    state: &mut GroupState,
    arena: &mut TupleArena,
    key: Option<KeyValue>,
) -> Result<GroupId> {
    let existing = match &key {
        Some(k) => state.by_key.get(k).copied(),
        None => state.singleton,
    };
    match existing {
        Some(id) => {
            state.group_mut(id)?.parent_count += 1;
            // A group already parked for propagation absorbs the change;
            // otherwise schedule an update.
            let out = state.group(id)?.out;
            let out_state = arena.get(out)?.state();
            match out_state {
                TupleState::Creating | TupleState::Updating => {}
                TupleState::Ok => {
                    arena.get_mut(out)?.set_state(TupleState::Updating);
                    state.dirty.push(id);
                }
                TupleState::Dying => arena.get_mut(out)?.set_state(TupleState::Updating),
                TupleState::Aborting => arena.get_mut(out)?.set_state(TupleState::Creating),
                TupleState::Dead => {
                    return Err(NetworkError::StaleHandle(format!(
                        "group {id:?} holds a dead output tuple"
                    )))
                }
            }
            Ok(id)
        }
        None => {
            let accumulators: Vec<Box<dyn crate::collector::Accumulator>> = spec
                .collectors
                .iter()
                .map(|c| c.create_accumulator())
                .collect();
            let member_list = state.members.create_list();
            // The output facts are refreshed at flush; the empty
            // accumulator results are enough to give the tuple its shape.
            let mut facts: SmallVec<[FactHandle; MAX_ARITY]> = SmallVec::new();
            if let Some(k) = &key {
                facts.push(Rc::new(k.clone()) as FactHandle);
            }
            for accumulator in &accumulators {
                facts.push(Rc::new(accumulator.result()) as FactHandle);
            }
            let out = arena.create(facts, spec.out_store_size);
            let id = state.alloc(Group {
                key: key.clone(),
                parent_count: 1,
                accumulators,
                member_list,
                out,
            });
            match key {
                Some(k) => {
                    state.by_key.insert(k, id);
                }
                None => state.singleton = Some(id),
            }
            state.dirty.push(id);
            Ok(id)
        }
    }
}

/// One parent left the group; updates or kills the group accordingly.
fn leave_group(
    state: &mut GroupState,
    arena: &mut TupleArena,
    node: usize,
    id: GroupId,
) -> Result<()> {
    let (kill, out) = {
        let group = state.group_mut(id)?;
        group.parent_count -= 1;
        (group.parent_count == 0, group.out)
    };
    if kill {
        // Unreachable for new members from now on.
        let key = state.group(id)?.key.clone();
        match key {
            Some(k) => {
                state.by_key.remove(&k);
            }
            None => state.singleton = None,
        }
    }
    let out_state = arena.get(out)?.state();
    match out_state {
        TupleState::Creating => {
            if kill {
                arena.get_mut(out)?.set_state(TupleState::Aborting);
            }
        }
        TupleState::Updating => {
            if kill {
                arena.get_mut(out)?.set_state(TupleState::Dying);
            }
        }
        TupleState::Ok => {
            if kill {
                arena.get_mut(out)?.set_state(TupleState::Dying);
            } else {
                arena.get_mut(out)?.set_state(TupleState::Updating);
            }
            state.dirty.push(id);
        }
        state_ => {
            return Err(NetworkError::contract(
                node,
                format!("group output in state {state_:?} while a member leaves"),
            ))
        }
    }
    Ok(())
}

pub fn insert(
    spec: &GroupSpec,
    state: &mut GroupState,
    node: usize,
    arena: &mut TupleArena,
    tuple: TupleId,
) -> Result<()> {
    if !matches!(arena.get(tuple)?.store(spec.group_slot), StoreSlot::Empty) {
        return Err(NetworkError::contract(
            node,
            "insert of a tuple this group node already tracks".to_string(),
        ));
    }
    let key = derive_key(spec, arena, tuple)?;
    let id = get_or_create(spec, state, arena, key)?;
    accumulate_into(spec, state, arena, id, tuple)
}

pub fn update(
    spec: &GroupSpec,
    state: &mut GroupState,
    node: usize,
    arena: &mut TupleArena,
    tuple: TupleId,
) -> Result<()> {
    let id = match arena.get(tuple)?.store(spec.group_slot) {
        StoreSlot::Group(id) => *id,
        // Unseen tuple from an upstream filter.
        StoreSlot::Empty => return insert(spec, state, node, arena, tuple),
        other => {
            return Err(NetworkError::contract(
                node,
                format!("group slot holds {other:?}"),
            ))
        }
    };
    let undos = match arena.get_mut(tuple)?.take_store(spec.undo_slot) {
        StoreSlot::Undo(undos) => undos,
        other => {
            return Err(NetworkError::contract(
                node,
                format!("group undo slot holds {other:?}"),
            ))
        }
    };
    let new_key = derive_key(spec, arena, tuple)?;
    let same_group = state.group(id)?.key == new_key;

    if same_group {
        // Refold in place: undo the old contribution, fold the new one.
        let mut fresh: SmallVec<[KeyValue; 2]> = SmallVec::new();
        {
            let members = state.members.collect(state.group(id)?.member_list);
            let group = state.group_mut(id)?;
            for (i, collector) in spec.collectors.iter().enumerate() {
                if collector.supports_retract() {
                    group.accumulators[i]
                        .retract(&undos[i])
                        .map_err(|e| misuse(spec, e))?;
                    fresh.push(group.accumulators[i].accumulate(arena.get(tuple)?));
                } else {
                    // The member's facts changed under the accumulator;
                    // rebuild it from the live members.
                    group.accumulators[i].reset();
                    for member in &members {
                        group.accumulators[i].accumulate(arena.get(*member)?);
                    }
                    fresh.push(KeyValue::None);
                }
            }
        }
        arena
            .get_mut(tuple)?
            .set_store(spec.undo_slot, StoreSlot::Undo(fresh));
        let out = state.group(id)?.out;
        match arena.get(out)?.state() {
            TupleState::Creating | TupleState::Updating => {}
            TupleState::Ok => {
                arena.get_mut(out)?.set_state(TupleState::Updating);
                state.dirty.push(id);
            }
            state_ => {
                return Err(NetworkError::contract(
                    node,
                    format!("group output in state {state_:?} during member update"),
                ))
            }
        }
        Ok(())
    } else {
        // Key change: leave the old group, join the new one.
        let entry = match arena.get_mut(tuple)?.take_store(spec.member_entry_slot) {
            StoreSlot::Entry(entry) => entry,
            other => {
                return Err(NetworkError::contract(
                    node,
                    format!("group member slot holds {other:?}"),
                ))
            }
        };
        state.members.remove(entry)?;
        unaccumulate(spec, state, arena, id, &undos)?;
        leave_group(state, arena, node, id)?;
        arena.get_mut(tuple)?.take_store(spec.group_slot);
        let id = get_or_create(spec, state, arena, new_key)?;
        accumulate_into(spec, state, arena, id, tuple)
    }
}

pub fn retract(
    spec: &GroupSpec,
    state: &mut GroupState,
    node: usize,
    arena: &mut TupleArena,
    tuple: TupleId,
) -> Result<()> {
    let id = match arena.get_mut(tuple)?.take_store(spec.group_slot) {
        StoreSlot::Group(id) => id,
        StoreSlot::Empty => return Ok(()),
        other => {
            return Err(NetworkError::contract(
                node,
                format!("group slot holds {other:?}"),
            ))
        }
    };
    let undos = match arena.get_mut(tuple)?.take_store(spec.undo_slot) {
        StoreSlot::Undo(undos) => undos,
        other => {
            return Err(NetworkError::contract(
                node,
                format!("group undo slot holds {other:?}"),
            ))
        }
    };
    let entry = match arena.get_mut(tuple)?.take_store(spec.member_entry_slot) {
        StoreSlot::Entry(entry) => entry,
        other => {
            return Err(NetworkError::contract(
                node,
                format!("group member slot holds {other:?}"),
            ))
        }
    };
    state.members.remove(entry)?;
    unaccumulate(spec, state, arena, id, &undos)?;
    leave_group(state, arena, node, id)
}

/// First flush phase: refresh the output facts and decide the
/// notification kind. Returns `None` for aborted groups.
pub fn prepare_flush(
    spec: &GroupSpec,
    state: &GroupState,
    arena: &mut TupleArena,
    id: GroupId,
) -> Result<Option<(LifecycleKind, TupleId)>> {
    let group = state.group(id)?;
    let out = group.out;
    Ok(match arena.get(out)?.state() {
        TupleState::Creating => {
            arena.get_mut(out)?.set_facts(out_facts(group));
            Some((LifecycleKind::Insert, out))
        }
        TupleState::Updating => {
            arena.get_mut(out)?.set_facts(out_facts(group));
            Some((LifecycleKind::Update, out))
        }
        TupleState::Dying => Some((LifecycleKind::Retract, out)),
        TupleState::Aborting => None,
        state_ => {
            return Err(NetworkError::StaleHandle(format!(
                "dirty group {id:?} with output in state {state_:?}"
            )))
        }
    })
}

/// Second flush phase: settle the group after dispatch.
pub fn finalize_flush(state: &mut GroupState, arena: &mut TupleArena, id: GroupId) -> Result<()> {
    let out = state.group(id)?.out;
    match arena.get(out)?.state() {
        TupleState::Creating | TupleState::Updating => {
            arena.get_mut(out)?.set_state(TupleState::Ok);
        }
        TupleState::Dying | TupleState::Aborting => {
            arena.bury(out)?;
            let group = state.free_group(id)?;
            debug_assert!(state.members.is_empty(group.member_list));
            state.members.drop_list(group.member_list)?;
        }
        state_ => {
            return Err(NetworkError::StaleHandle(format!(
                "finalizing group {id:?} with output in state {state_:?}"
            )))
        }
    }
    Ok(())
}
