//! Dirty-tuple queue shared by every tuple-creating node.
//!
//! A node's mutation phase commits its own bookkeeping immediately but
//! defers downstream notification: out tuples are parked here with a state
//! transition, and the session flushes queues in topological order. An
//! insert followed by a retract within the same mutation collapses
//! (`Creating` -> `Aborting`) without downstream ever hearing about it.

use crate::error::{NetworkError, Result};
use crate::tuple::{TupleArena, TupleId, TupleState};

#[derive(Default)]
pub struct DirtyQueue {
    items: Vec<TupleId>,
}

impl DirtyQueue {
    pub fn new() -> Self {
        DirtyQueue { items: Vec::new() }
    }

    /// Parks a freshly created tuple (already in the `Creating` state).
    pub fn push_created(&mut self, tuple: TupleId) {
        self.items.push(tuple);
    }

    /// Requests an update notification for an out tuple.
    pub fn request_update(
        &mut self,
        arena: &mut TupleArena,
        tuple: TupleId,
        node: usize,
    ) -> Result<()> {
        let t = arena.get_mut(tuple)?;
        match t.state() {
            // Already parked; the pending notification covers this change.
            TupleState::Creating | TupleState::Updating => Ok(()),
            TupleState::Ok => {
                t.set_state(TupleState::Updating);
                self.items.push(tuple);
                Ok(())
            }
            state => Err(NetworkError::contract(
                node,
                format!("update requested for tuple in state {state:?}"),
            )),
        }
    }

    /// Requests a retract notification for an out tuple.
    pub fn request_retract(
        &mut self,
        arena: &mut TupleArena,
        tuple: TupleId,
        node: usize,
    ) -> Result<()> {
        let t = arena.get_mut(tuple)?;
        match t.state() {
            // Never propagated; kill it before it does.
            TupleState::Creating => {
                t.set_state(TupleState::Aborting);
                Ok(())
            }
            // Already parked for update; turn that into a retract.
            TupleState::Updating => {
                t.set_state(TupleState::Dying);
                Ok(())
            }
            TupleState::Ok => {
                t.set_state(TupleState::Dying);
                self.items.push(tuple);
                Ok(())
            }
            state => Err(NetworkError::contract(
                node,
                format!("retract requested for tuple in state {state:?}"),
            )),
        }
    }

    /// Drains the queue for a settle pass.
    pub fn take(&mut self) -> Vec<TupleId> {
        std::mem::take(&mut self.items)
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fact::FactHandle;
    use smallvec::smallvec;
    use std::rc::Rc;

    fn tuple(arena: &mut TupleArena) -> TupleId {
        arena.create(smallvec![Rc::new(1i64) as FactHandle], 0)
    }

    #[test]
    fn test_insert_then_retract_collapses_to_aborting() {
        let mut arena = TupleArena::new();
        let mut queue = DirtyQueue::new();
        let t = tuple(&mut arena);
        queue.push_created(t);
        queue.request_retract(&mut arena, t, 0).unwrap();
        assert_eq!(arena.get(t).unwrap().state(), TupleState::Aborting);
        // Still exactly one queue entry.
        assert_eq!(queue.take().len(), 1);
    }

    #[test]
    fn test_update_then_retract_keeps_single_entry() {
        let mut arena = TupleArena::new();
        let mut queue = DirtyQueue::new();
        let t = tuple(&mut arena);
        arena.get_mut(t).unwrap().set_state(TupleState::Ok);
        queue.request_update(&mut arena, t, 0).unwrap();
        queue.request_retract(&mut arena, t, 0).unwrap();
        assert_eq!(arena.get(t).unwrap().state(), TupleState::Dying);
        assert_eq!(queue.take().len(), 1);
    }

    #[test]
    fn test_double_update_not_requeued() {
        let mut arena = TupleArena::new();
        let mut queue = DirtyQueue::new();
        let t = tuple(&mut arena);
        arena.get_mut(t).unwrap().set_state(TupleState::Ok);
        queue.request_update(&mut arena, t, 0).unwrap();
        queue.request_update(&mut arena, t, 0).unwrap();
        assert_eq!(queue.take().len(), 1);
    }

    #[test]
    fn test_retract_of_dead_tuple_is_a_contract_violation() {
        let mut arena = TupleArena::new();
        let mut queue = DirtyQueue::new();
        let t = tuple(&mut arena);
        arena.get_mut(t).unwrap().set_state(TupleState::Dead);
        assert!(queue.request_retract(&mut arena, t, 0).is_err());
    }
}
