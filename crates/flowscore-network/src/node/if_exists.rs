//! Existence node: forwards left tuples gated on matching right tuples.
//!
//! Each left tuple owns a counter of matching right tuples, maintained
//! through the same index machinery joins use. The left tuple is forwarded
//! downstream only while the counter satisfies the node's polarity
//! ("if exists": nonzero, "if not exists": zero); crossing the boundary
//! queues exactly one downstream insert or retract. No new tuple is
//! created; the left tuple passes through.
//!
//! With a filtering predicate the raw index match count is not enough: a
//! pair can match the key but fail the filter. Pair trackers, linked into
//! a bucket list on each side, maintain the filtered-true count and let
//! either side drop its pairings in O(matches).

use crate::error::{NetworkError, Result};
use crate::index::{extract_keys, IndexLevel, Indexer};
use crate::joiner::{KeyFn, PairPredicate};
use crate::tuple::{CounterId, StoreSlot, TrackerId, TupleArena, TupleId, TupleState};
use crate::util::{EntryId, ListId, ListPool};

use super::LifecycleKind;

pub struct IfExistsSpec {
    pub should_exist: bool,
    pub left_levels: Vec<IndexLevel>,
    pub right_levels: Vec<IndexLevel>,
    pub left_keys: Vec<KeyFn>,
    pub right_keys: Vec<KeyFn>,
    pub filter: Option<PairPredicate>,
    pub left_keys_slot: usize,
    pub left_entry_slot: usize,
    /// Only reserved when `filter` is present.
    pub left_tracker_slot: usize,
    pub right_keys_slot: usize,
    pub right_entry_slot: usize,
    pub right_tracker_slot: usize,
}

pub struct ExistsCounter {
    pub left: TupleId,
    pub count_right: usize,
    pub state: TupleState,
    /// Set when the left tuple itself retracted; the counter is freed
    /// after its last notification instead of lingering as `Dead`.
    pub left_gone: bool,
}

pub struct Tracker {
    pub counter: CounterId,
    pub left_entry: EntryId,
    pub right_entry: EntryId,
}

pub struct IfExistsState {
    pub left_index: Indexer,
    pub right_index: Indexer,
    pub counter_buckets: ListPool<CounterId>,
    pub right_buckets: ListPool<TupleId>,
    counters: Vec<Option<ExistsCounter>>,
    free_counters: Vec<u32>,
    trackers: Vec<Option<Tracker>>,
    free_trackers: Vec<u32>,
    pub tracker_lists: ListPool<TrackerId>,
    pub dirty: Vec<CounterId>,
}

impl IfExistsState {
    pub fn new(spec: &IfExistsSpec) -> Self {
        let mut counter_buckets = ListPool::new();
        let mut right_buckets = ListPool::new();
        let left_index = Indexer::new(&spec.left_levels, &mut counter_buckets);
        let right_index = Indexer::new(&spec.right_levels, &mut right_buckets);
        IfExistsState {
            left_index,
            right_index,
            counter_buckets,
            right_buckets,
            counters: Vec::new(),
            free_counters: Vec::new(),
            trackers: Vec::new(),
            free_trackers: Vec::new(),
            tracker_lists: ListPool::new(),
            dirty: Vec::new(),
        }
    }

    fn alloc_counter(&mut self, left: TupleId) -> CounterId {
        let counter = ExistsCounter {
            left,
            count_right: 0,
            state: TupleState::Dead,
            left_gone: false,
        };
        match self.free_counters.pop() {
            Some(index) => {
                self.counters[index as usize] = Some(counter);
                CounterId(index)
            }
            None => {
                self.counters.push(Some(counter));
                CounterId(self.counters.len() as u32 - 1)
            }
        }
    }

    pub fn counter(&self, id: CounterId) -> Result<&ExistsCounter> {
        self.counters
            .get(id.0 as usize)
            .and_then(|c| c.as_ref())
            .ok_or_else(|| NetworkError::StaleHandle(format!("counter {id:?} is gone")))
    }

    pub fn counter_mut(&mut self, id: CounterId) -> Result<&mut ExistsCounter> {
        self.counters
            .get_mut(id.0 as usize)
            .and_then(|c| c.as_mut())
            .ok_or_else(|| NetworkError::StaleHandle(format!("counter {id:?} is gone")))
    }

    pub fn free_counter(&mut self, id: CounterId) {
        if self.counters[id.0 as usize].take().is_some() {
            self.free_counters.push(id.0);
        }
    }

    fn alloc_tracker(&mut self, counter: CounterId, left_list: ListId, right_list: ListId) {
        let index = match self.free_trackers.pop() {
            Some(index) => index,
            None => {
                self.trackers.push(None);
                self.trackers.len() as u32 - 1
            }
        };
        let id = TrackerId(index);
        let left_entry = self.tracker_lists.push(left_list, id);
        let right_entry = self.tracker_lists.push(right_list, id);
        self.trackers[index as usize] = Some(Tracker {
            counter,
            left_entry,
            right_entry,
        });
    }

    fn take_tracker(&mut self, id: TrackerId) -> Result<Tracker> {
        let tracker = self.trackers[id.0 as usize]
            .take()
            .ok_or_else(|| NetworkError::StaleHandle(format!("tracker {id:?} is gone")))?;
        self.free_trackers.push(id.0);
        Ok(tracker)
    }

    pub fn live_counter_count(&self) -> usize {
        self.counters.len() - self.free_counters.len()
    }
}

fn satisfied(spec: &IfExistsSpec, counter: &ExistsCounter) -> bool {
    spec.should_exist == (counter.count_right > 0)
}

/// Reconciles the counter's propagation state with its satisfaction,
/// queueing at most one pending notification.
fn reconcile(spec: &IfExistsSpec, state: &mut IfExistsState, id: CounterId) -> Result<()> {
    let is_satisfied = satisfied(spec, state.counter(id)?);
    let push = {
        let counter = state.counter_mut(id)?;
        if is_satisfied {
            match counter.state {
                TupleState::Creating | TupleState::Updating => false,
                TupleState::Ok => {
                    counter.state = TupleState::Updating;
                    true
                }
                // Revive a pending retract; it is already queued.
                TupleState::Dying => {
                    counter.state = TupleState::Updating;
                    false
                }
                TupleState::Aborting => {
                    counter.state = TupleState::Creating;
                    false
                }
                TupleState::Dead => {
                    counter.state = TupleState::Creating;
                    true
                }
            }
        } else {
            match counter.state {
                TupleState::Creating => {
                    counter.state = TupleState::Aborting;
                    false
                }
                TupleState::Updating => {
                    counter.state = TupleState::Dying;
                    false
                }
                TupleState::Ok => {
                    counter.state = TupleState::Dying;
                    true
                }
                TupleState::Dying | TupleState::Aborting | TupleState::Dead => false,
            }
        }
    };
    if push {
        state.dirty.push(id);
    }
    Ok(())
}

fn increment(
    spec: &IfExistsSpec,
    state: &mut IfExistsState,
    node: usize,
    id: CounterId,
) -> Result<()> {
    let crossed = {
        let counter = state.counter_mut(id)?;
        counter.count_right += 1;
        counter.count_right == 1
    };
    if crossed {
        reconcile(spec, state, id)?;
    }
    Ok(())
}

fn decrement(
    spec: &IfExistsSpec,
    state: &mut IfExistsState,
    node: usize,
    id: CounterId,
) -> Result<()> {
    let crossed = {
        let counter = state.counter_mut(id)?;
        if counter.count_right == 0 {
            return Err(NetworkError::contract(
                node,
                "existence counter underflow".to_string(),
            ));
        }
        counter.count_right -= 1;
        counter.count_right == 0
    };
    if crossed {
        reconcile(spec, state, id)?;
    }
    Ok(())
}

fn counters_at(state: &IfExistsState, keys: &crate::key::IndexKeys) -> Vec<CounterId> {
    let mut out = Vec::new();
    state
        .left_index
        .for_each(keys, &state.counter_buckets, &mut |c| out.push(c));
    out
}

fn rights_at(state: &IfExistsState, keys: &crate::key::IndexKeys) -> Vec<TupleId> {
    let mut out = Vec::new();
    state
        .right_index
        .for_each(keys, &state.right_buckets, &mut |r| out.push(r));
    out
}

/// Rebuilds a left tuple's filtered pairings from scratch.
fn refill_filtered(
    spec: &IfExistsSpec,
    state: &mut IfExistsState,
    node: usize,
    arena: &TupleArena,
    left: TupleId,
    id: CounterId,
    keys: &crate::key::IndexKeys,
    left_list: ListId,
) -> Result<()> {
    let filter = spec
        .filter
        .as_ref()
        .expect("filtered refill requires a filter")
        .clone();
    for right in rights_at(state, keys) {
        if filter(arena.get(left)?, arena.get(right)?) {
            state.counter_mut(id)?.count_right += 1;
            let right_list = expect_list(arena.get(right)?.store(spec.right_tracker_slot), node)?;
            state.alloc_tracker(id, left_list, right_list);
        }
    }
    Ok(())
}

fn expect_list(slot: &StoreSlot, node: usize) -> Result<ListId> {
    match slot {
        StoreSlot::List(list) => Ok(*list),
        other => Err(NetworkError::contract(
            node,
            format!("expected a tracker list, store holds {other:?}"),
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

/// Drops every tracker hanging off a left tuple without touching counters.
fn clear_left_trackers(state: &mut IfExistsState, left_list: ListId) -> Result<()> {
    for id in state.tracker_lists.drain(left_list) {
        let tracker = state.take_tracker(id)?;
        state.tracker_lists.remove(tracker.right_entry)?;
    }
    Ok(())
}

/// Drops every tracker hanging off a right tuple, decrementing counters.
fn clear_right_trackers(
    spec: &IfExistsSpec,
    state: &mut IfExistsState,
    node: usize,
    right_list: ListId,
) -> Result<()> {
    for id in state.tracker_lists.drain(right_list) {
        let tracker = state.take_tracker(id)?;
        state.tracker_lists.remove(tracker.left_entry)?;
        decrement(spec, state, node, tracker.counter)?;
    }
    Ok(())
}

pub fn insert_left(
    spec: &IfExistsSpec,
    state: &mut IfExistsState,
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
            "insert of a left tuple this existence node already tracks".to_string(),
        ));
    }
    let keys = extract_keys(&spec.left_keys, arena.get(left)?);
    let id = state.alloc_counter(left);
    let entry = state
        .left_index
        .put(&spec.left_levels, &keys, id, &mut state.counter_buckets);
    {
        let t = arena.get_mut(left)?;
        t.set_store(spec.left_keys_slot, StoreSlot::Keys(keys.clone()));
        t.set_store(spec.left_entry_slot, StoreSlot::Entry(entry));
    }
    if spec.filter.is_none() {
        let count = state.right_index.count(&keys, &state.right_buckets);
        state.counter_mut(id)?.count_right = count;
    } else {
        let left_list = state.tracker_lists.create_list();
        arena
            .get_mut(left)?
            .set_store(spec.left_tracker_slot, StoreSlot::List(left_list));
        refill_filtered(spec, state, node, arena, left, id, &keys, left_list)?;
    }
    if satisfied(spec, state.counter(id)?) {
        state.counter_mut(id)?.state = TupleState::Creating;
        state.dirty.push(id);
    }
    Ok(())
}

pub fn update_left(
    spec: &IfExistsSpec,
    state: &mut IfExistsState,
    node: usize,
    arena: &mut TupleArena,
    left: TupleId,
) -> Result<()> {
    let old_keys = match arena.get(left)?.store(spec.left_keys_slot) {
        StoreSlot::Keys(keys) => keys.clone(),
        StoreSlot::Empty => return insert_left(spec, state, node, arena, left),
        other => {
            return Err(NetworkError::contract(
                node,
                format!("existence left key slot holds {other:?}"),
            ))
        }
    };
    let new_keys = extract_keys(&spec.left_keys, arena.get(left)?);
    let entry = match arena.get(left)?.store(spec.left_entry_slot) {
        StoreSlot::Entry(entry) => *entry,
        other => {
            return Err(NetworkError::contract(
                node,
                format!("existence left entry slot holds {other:?}"),
            ))
        }
    };
    let id = *state.counter_buckets.get(entry)?;

    if new_keys == old_keys {
        match &spec.filter {
            None => {
                // Key unchanged, count unchanged: just forward the left
                // update while the counter is propagated.
                if state.counter(id)?.state == TupleState::Ok {
                    state.counter_mut(id)?.state = TupleState::Updating;
                    state.dirty.push(id);
                }
                Ok(())
            }
            Some(_) => {
                // Re-evaluate the filter for every pairing.
                let left_list = expect_list(arena.get(left)?.store(spec.left_tracker_slot), node)?;
                clear_left_trackers(state, left_list)?;
                state.counter_mut(id)?.count_right = 0;
                refill_filtered(spec, state, node, arena, left, id, &new_keys, left_list)?;
                reconcile(spec, state, id)
            }
        }
    } else {
        state
            .left_index
            .remove(&spec.left_levels, &old_keys, entry, &mut state.counter_buckets)?;
        if spec.filter.is_some() {
            let left_list = expect_list(arena.get(left)?.store(spec.left_tracker_slot), node)?;
            clear_left_trackers(state, left_list)?;
        }
        state.counter_mut(id)?.count_right = 0;
        let entry = state
            .left_index
            .put(&spec.left_levels, &new_keys, id, &mut state.counter_buckets);
        {
            let t = arena.get_mut(left)?;
            t.set_store(spec.left_keys_slot, StoreSlot::Keys(new_keys.clone()));
            t.set_store(spec.left_entry_slot, StoreSlot::Entry(entry));
        }
        if spec.filter.is_none() {
            let count = state.right_index.count(&new_keys, &state.right_buckets);
            state.counter_mut(id)?.count_right = count;
        } else {
            let left_list = expect_list(arena.get(left)?.store(spec.left_tracker_slot), node)?;
            refill_filtered(spec, state, node, arena, left, id, &new_keys, left_list)?;
        }
        reconcile(spec, state, id)
    }
}

pub fn retract_left(
    spec: &IfExistsSpec,
    state: &mut IfExistsState,
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
                format!("existence left key slot holds {other:?}"),
            ))
        }
    };
    let entry = expect_entry(arena.get_mut(left)?.take_store(spec.left_entry_slot), node)?;
    let id = *state.counter_buckets.get(entry)?;
    state
        .left_index
        .remove(&spec.left_levels, &keys, entry, &mut state.counter_buckets)?;
    if spec.filter.is_some() {
        let left_list = expect_list(&arena.get_mut(left)?.take_store(spec.left_tracker_slot), node)?;
        clear_left_trackers(state, left_list)?;
        state.tracker_lists.drop_list(left_list)?;
    }
    enum Kill {
        Keep,
        Push,
        Free,
    }
    let action = {
        let counter = state.counter_mut(id)?;
        counter.left_gone = true;
        match counter.state {
            TupleState::Creating => {
                counter.state = TupleState::Aborting;
                Kill::Keep
            }
            TupleState::Updating => {
                counter.state = TupleState::Dying;
                Kill::Keep
            }
            TupleState::Ok => {
                counter.state = TupleState::Dying;
                Kill::Push
            }
            // Never propagated; nothing downstream to undo.
            TupleState::Dead => Kill::Free,
            state_ => {
                return Err(NetworkError::contract(
                    node,
                    format!("left retract found counter in state {state_:?}"),
                ))
            }
        }
    };
    match action {
        Kill::Keep => {}
        Kill::Push => state.dirty.push(id),
        Kill::Free => state.free_counter(id),
    }
    Ok(())
}

pub fn insert_right(
    spec: &IfExistsSpec,
    state: &mut IfExistsState,
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
            "insert of a right tuple this existence node already tracks".to_string(),
        ));
    }
    let keys = extract_keys(&spec.right_keys, arena.get(right)?);
    let entry = state
        .right_index
        .put(&spec.right_levels, &keys, right, &mut state.right_buckets);
    {
        let t = arena.get_mut(right)?;
        t.set_store(spec.right_keys_slot, StoreSlot::Keys(keys.clone()));
        t.set_store(spec.right_entry_slot, StoreSlot::Entry(entry));
    }
    match spec.filter.clone() {
        None => {
            for id in counters_at(state, &keys) {
                increment(spec, state, node, id)?;
            }
        }
        Some(filter) => {
            let right_list = state.tracker_lists.create_list();
            arena
                .get_mut(right)?
                .set_store(spec.right_tracker_slot, StoreSlot::List(right_list));
            for id in counters_at(state, &keys) {
                let left = state.counter(id)?.left;
                if filter(arena.get(left)?, arena.get(right)?) {
                    let left_list =
                        expect_list(arena.get(left)?.store(spec.left_tracker_slot), node)?;
                    state.alloc_tracker(id, left_list, right_list);
                    increment(spec, state, node, id)?;
                }
            }
        }
    }
    Ok(())
}

pub fn update_right(
    spec: &IfExistsSpec,
    state: &mut IfExistsState,
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
                format!("existence right key slot holds {other:?}"),
            ))
        }
    };
    let new_keys = extract_keys(&spec.right_keys, arena.get(right)?);

    if new_keys == old_keys {
        if let Some(filter) = spec.filter.clone() {
            // The right facts changed: re-run the filter for each counter
            // at these keys.
            let right_list = expect_list(arena.get(right)?.store(spec.right_tracker_slot), node)?;
            clear_right_trackers(spec, state, node, right_list)?;
            for id in counters_at(state, &new_keys) {
                let left = state.counter(id)?.left;
                if filter(arena.get(left)?, arena.get(right)?) {
                    let left_list =
                        expect_list(arena.get(left)?.store(spec.left_tracker_slot), node)?;
                    state.alloc_tracker(id, left_list, right_list);
                    increment(spec, state, node, id)?;
                }
            }
        }
        // Without a filter a right-value change cannot affect any counter.
        Ok(())
    } else {
        let entry = expect_entry(
            arena.get_mut(right)?.take_store(spec.right_entry_slot),
            node,
        )?;
        state
            .right_index
            .remove(&spec.right_levels, &old_keys, entry, &mut state.right_buckets)?;
        match spec.filter.clone() {
            None => {
                for id in counters_at(state, &old_keys) {
                    decrement(spec, state, node, id)?;
                }
            }
            Some(_) => {
                let right_list =
                    expect_list(arena.get(right)?.store(spec.right_tracker_slot), node)?;
                clear_right_trackers(spec, state, node, right_list)?;
            }
        }
        let entry = state
            .right_index
            .put(&spec.right_levels, &new_keys, right, &mut state.right_buckets);
        {
            let t = arena.get_mut(right)?;
            t.set_store(spec.right_keys_slot, StoreSlot::Keys(new_keys.clone()));
            t.set_store(spec.right_entry_slot, StoreSlot::Entry(entry));
        }
        match spec.filter.clone() {
            None => {
                for id in counters_at(state, &new_keys) {
                    increment(spec, state, node, id)?;
                }
            }
            Some(filter) => {
                let right_list =
                    expect_list(arena.get(right)?.store(spec.right_tracker_slot), node)?;
                for id in counters_at(state, &new_keys) {
                    let left = state.counter(id)?.left;
                    if filter(arena.get(left)?, arena.get(right)?) {
                        let left_list =
                            expect_list(arena.get(left)?.store(spec.left_tracker_slot), node)?;
                        state.alloc_tracker(id, left_list, right_list);
                        increment(spec, state, node, id)?;
                    }
                }
            }
        }
        Ok(())
    }
}

pub fn retract_right(
    spec: &IfExistsSpec,
    state: &mut IfExistsState,
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
                format!("existence right key slot holds {other:?}"),
            ))
        }
    };
    let entry = expect_entry(
        arena.get_mut(right)?.take_store(spec.right_entry_slot),
        node,
    )?;
    state
        .right_index
        .remove(&spec.right_levels, &keys, entry, &mut state.right_buckets)?;
    match spec.filter {
        None => {
            for id in counters_at(state, &keys) {
                decrement(spec, state, node, id)?;
            }
        }
        Some(_) => {
            let right_list = expect_list(
                &arena.get_mut(right)?.take_store(spec.right_tracker_slot),
                node,
            )?;
            clear_right_trackers(spec, state, node, right_list)?;
            state.tracker_lists.drop_list(right_list)?;
        }
    }
    Ok(())
}

/// First flush phase: what (if anything) to tell downstream for a dirty
/// counter.
pub fn prepare_flush(
    state: &IfExistsState,
    id: CounterId,
) -> Result<Option<(LifecycleKind, TupleId)>> {
    let counter = state.counter(id)?;
    Ok(match counter.state {
        TupleState::Creating => Some((LifecycleKind::Insert, counter.left)),
        TupleState::Updating => Some((LifecycleKind::Update, counter.left)),
        TupleState::Dying => Some((LifecycleKind::Retract, counter.left)),
        TupleState::Aborting => None,
        _ => {
            return Err(NetworkError::StaleHandle(format!(
                "dirty counter {id:?} in state {:?}",
                counter.state
            )))
        }
    })
}

/// Second flush phase: settle the counter's state after dispatch.
pub fn finalize_flush(state: &mut IfExistsState, id: CounterId) -> Result<()> {
    let (next, free) = {
        let counter = state.counter(id)?;
        match counter.state {
            TupleState::Creating | TupleState::Updating => (TupleState::Ok, false),
            // Counters survive deactivation in the Dead state so the right
            // count stays tracked; they are freed only with their left.
            TupleState::Dying | TupleState::Aborting => (TupleState::Dead, counter.left_gone),
            state_ => {
                return Err(NetworkError::StaleHandle(format!(
                    "finalizing counter {id:?} in state {state_:?}"
                )))
            }
        }
    };
    if free {
        state.free_counter(id);
    } else {
        state.counter_mut(id)?.state = next;
    }
    Ok(())
}
