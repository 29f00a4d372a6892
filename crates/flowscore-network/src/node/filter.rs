//! Filter node: conditional pass-through.
//!
//! The stateless variant forwards the tuple unchanged and relies on the
//! tolerant downstream contract: nodes treat an update of an untracked
//! tuple as an insert and a retract of an untracked tuple as a no-op,
//! because nobody records which tuples made it through the predicate.
//!
//! The memoized variant caches the predicate result in a store slot and
//! handles all four update transitions exactly, trading one slot per tuple
//! for never re-evaluating the predicate on unrelated retracts.

use std::sync::Arc;

use crate::error::{NetworkError, Result};
use crate::tuple::{StoreSlot, Tuple, TupleArena, TupleId};

use super::{fan_out, ChildRef, LifecycleKind, OpStack};

pub struct FilterSpec {
    pub predicate: Arc<dyn Fn(&Tuple) -> bool + Send + Sync>,
    /// Reserved store slot for the cached result; `None` for stateless.
    pub memory_slot: Option<usize>,
}

pub fn apply(
    spec: &FilterSpec,
    node: usize,
    children: &[ChildRef],
    arena: &mut TupleArena,
    kind: LifecycleKind,
    tuple: TupleId,
    stack: &mut OpStack,
) -> Result<()> {
    match spec.memory_slot {
        None => apply_stateless(spec, children, arena, kind, tuple, stack),
        Some(slot) => apply_memoized(spec, node, slot, children, arena, kind, tuple, stack),
    }
}

fn apply_stateless(
    spec: &FilterSpec,
    children: &[ChildRef],
    arena: &TupleArena,
    kind: LifecycleKind,
    tuple: TupleId,
    stack: &mut OpStack,
) -> Result<()> {
    match kind {
        LifecycleKind::Insert => {
            if (spec.predicate)(arena.get(tuple)?) {
                fan_out(children, LifecycleKind::Insert, tuple, stack);
            }
        }
        LifecycleKind::Update => {
            // Downstream upgrades an unseen update to an insert.
            if (spec.predicate)(arena.get(tuple)?) {
                fan_out(children, LifecycleKind::Update, tuple, stack);
            } else {
                fan_out(children, LifecycleKind::Retract, tuple, stack);
            }
        }
        // Downstream ignores retracts of tuples it never admitted.
        LifecycleKind::Retract => {
            fan_out(children, LifecycleKind::Retract, tuple, stack);
        }
    }
    Ok(())
}

fn apply_memoized(
    spec: &FilterSpec,
    node: usize,
    slot: usize,
    children: &[ChildRef],
    arena: &mut TupleArena,
    kind: LifecycleKind,
    tuple: TupleId,
    stack: &mut OpStack,
) -> Result<()> {
    match kind {
        LifecycleKind::Insert => {
            let passing = (spec.predicate)(arena.get(tuple)?);
            let t = arena.get_mut(tuple)?;
            if !matches!(t.store(slot), StoreSlot::Empty) {
                return Err(NetworkError::contract(
                    node,
                    "insert of a tuple this filter already tracks".to_string(),
                ));
            }
            t.set_store(slot, StoreSlot::Flag(passing));
            if passing {
                fan_out(children, LifecycleKind::Insert, tuple, stack);
            }
        }
        LifecycleKind::Update => {
            let was_passing = match arena.get(tuple)?.store(slot) {
                StoreSlot::Flag(flag) => Some(*flag),
                StoreSlot::Empty => None,
                other => {
                    return Err(NetworkError::contract(
                        node,
                        format!("filter memory slot holds {other:?}"),
                    ))
                }
            };
            let Some(was_passing) = was_passing else {
                // Unseen tuple: the upstream filter let an update through
                // first. Treat as insert.
                return apply_memoized(
                    spec,
                    node,
                    slot,
                    children,
                    arena,
                    LifecycleKind::Insert,
                    tuple,
                    stack,
                );
            };
            let now_passing = (spec.predicate)(arena.get(tuple)?);
            arena
                .get_mut(tuple)?
                .set_store(slot, StoreSlot::Flag(now_passing));
            match (was_passing, now_passing) {
                (true, true) => fan_out(children, LifecycleKind::Update, tuple, stack),
                (true, false) => fan_out(children, LifecycleKind::Retract, tuple, stack),
                (false, true) => fan_out(children, LifecycleKind::Insert, tuple, stack),
                (false, false) => {}
            }
        }
        LifecycleKind::Retract => {
            let was_passing = match arena.get_mut(tuple)?.take_store(slot) {
                StoreSlot::Flag(flag) => flag,
                StoreSlot::Empty => false,
                other => {
                    return Err(NetworkError::contract(
                        node,
                        format!("filter memory slot holds {other:?}"),
                    ))
                }
            };
            if was_passing {
                fan_out(children, LifecycleKind::Retract, tuple, stack);
            }
        }
    }
    Ok(())
}
