//! Tuples and the session-owned tuple arena.
//!
//! A tuple is a fixed-arity (1..=4) group of fact handles flowing through
//! the graph, plus a store: a side table of opaque slots sized at
//! graph-build time. Each node that needs per-tuple bookkeeping reserves
//! one store index on the tuple's origin stream, so no node needs an
//! external map from tuple to bookkeeping.
//!
//! Tuples live in a generation-checked arena. Dead tuples are buried
//! during a settle pass and their slots reused only after the pass ends,
//! so deferred notifications may still read them.

use smallvec::SmallVec;

use crate::error::{NetworkError, Result};
use crate::fact::FactHandle;
use crate::key::{IndexKeys, KeyValue};
use crate::util::{EntryId, ListId};

/// Maximum tuple arity supported by the network.
pub const MAX_ARITY: usize = 4;

/// Propagation state of a tuple (or of an existence counter).
///
/// `Creating`/`Updating`/`Dying`/`Aborting` mean the element sits in its
/// origin node's dirty queue; `Ok` means fully propagated; `Dead` means
/// retraction has been propagated and the element awaits reclamation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TupleState {
    Creating,
    Ok,
    Updating,
    Dying,
    Aborting,
    Dead,
}

impl TupleState {
    /// True while the element sits in a dirty queue.
    pub fn is_dirty(self) -> bool {
        matches!(
            self,
            TupleState::Creating | TupleState::Updating | TupleState::Dying | TupleState::Aborting
        )
    }
}

/// Index of an existence counter within its node's slab.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CounterId(pub(crate) u32);

/// Index of a group within its node's slab.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GroupId(pub(crate) u32);

/// Index of an existence tracker within its node's slab.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TrackerId(pub(crate) u32);

/// One opaque store slot.
///
/// Every insertion into a list or index retains its handle here, and the
/// matching retraction consumes that exact handle exactly once.
#[derive(Debug, Clone, Default)]
pub enum StoreSlot {
    #[default]
    Empty,
    Flag(bool),
    Keys(IndexKeys),
    Entry(EntryId),
    List(ListId),
    Tuple(TupleId),
    Group(GroupId),
    Undo(SmallVec<[KeyValue; 2]>),
}

/// Handle to a tuple in the session arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TupleId {
    index: u32,
    generation: u32,
}

/// A fixed-arity group of facts with its bookkeeping store.
pub struct Tuple {
    facts: SmallVec<[FactHandle; MAX_ARITY]>,
    state: TupleState,
    store: Box<[StoreSlot]>,
}

impl Tuple {
    fn new(facts: SmallVec<[FactHandle; MAX_ARITY]>, store_size: usize) -> Self {
        debug_assert!((1..=MAX_ARITY).contains(&facts.len()));
        Tuple {
            facts,
            state: TupleState::Creating,
            store: vec![StoreSlot::Empty; store_size].into_boxed_slice(),
        }
    }

    pub fn arity(&self) -> usize {
        self.facts.len()
    }

    pub fn state(&self) -> TupleState {
        self.state
    }

    pub fn set_state(&mut self, state: TupleState) {
        self.state = state;
    }

    /// Returns the fact handle in the given slot.
    pub fn fact_handle(&self, slot: usize) -> &FactHandle {
        &self.facts[slot]
    }

    /// Typed access to a fact slot.
    ///
    /// # Panics
    /// Panics when the slot holds a different type; this surfaces a broken
    /// user closure and propagates to the caller like any closure panic.
    pub fn fact<T: 'static>(&self, slot: usize) -> &T {
        self.facts[slot]
            .as_any()
            .downcast_ref::<T>()
            .unwrap_or_else(|| {
                panic!(
                    "tuple slot {slot} holds {:?}, not a {}",
                    self.facts[slot],
                    std::any::type_name::<T>()
                )
            })
    }

    pub fn facts(&self) -> &[FactHandle] {
        &self.facts
    }

    pub(crate) fn set_fact(&mut self, slot: usize, fact: FactHandle) {
        self.facts[slot] = fact;
    }

    pub(crate) fn set_facts(&mut self, facts: SmallVec<[FactHandle; MAX_ARITY]>) {
        debug_assert_eq!(facts.len(), self.facts.len());
        self.facts = facts;
    }

    /// Overwrites the leading fact slots (a join refreshing its left side).
    pub(crate) fn set_fact_prefix(&mut self, facts: &[FactHandle]) {
        for (slot, fact) in facts.iter().enumerate() {
            self.facts[slot] = fact.clone();
        }
    }

    pub(crate) fn store(&self, index: usize) -> &StoreSlot {
        &self.store[index]
    }

    pub(crate) fn set_store(&mut self, index: usize, slot: StoreSlot) {
        self.store[index] = slot;
    }

    /// Consumes a store slot, leaving `Empty` behind.
    pub(crate) fn take_store(&mut self, index: usize) -> StoreSlot {
        std::mem::take(&mut self.store[index])
    }

    /// Human-readable rendering of the contributing facts.
    pub fn justification(&self) -> String {
        let parts: Vec<String> = self.facts.iter().map(|f| format!("{f:?}")).collect();
        format!("[{}]", parts.join(", "))
    }
}

struct ArenaSlot {
    generation: u32,
    tuple: Option<Tuple>,
}

/// Session-owned arena of live tuples.
pub struct TupleArena {
    slots: Vec<ArenaSlot>,
    free: Vec<u32>,
    graveyard: Vec<u32>,
}

impl Default for TupleArena {
    fn default() -> Self {
        Self::new()
    }
}

impl TupleArena {
    pub fn new() -> Self {
        TupleArena {
            slots: Vec::new(),
            free: Vec::new(),
            graveyard: Vec::new(),
        }
    }

    /// Creates a tuple in the `Creating` state.
    pub fn create(
        &mut self,
        facts: SmallVec<[FactHandle; MAX_ARITY]>,
        store_size: usize,
    ) -> TupleId {
        let tuple = Tuple::new(facts, store_size);
        match self.free.pop() {
            Some(index) => {
                self.slots[index as usize].tuple = Some(tuple);
                TupleId {
                    index,
                    generation: self.slots[index as usize].generation,
                }
            }
            None => {
                self.slots.push(ArenaSlot {
                    generation: 0,
                    tuple: Some(tuple),
                });
                TupleId {
                    index: self.slots.len() as u32 - 1,
                    generation: 0,
                }
            }
        }
    }

    pub fn get(&self, id: TupleId) -> Result<&Tuple> {
        self.slots
            .get(id.index as usize)
            .filter(|s| s.generation == id.generation)
            .and_then(|s| s.tuple.as_ref())
            .ok_or_else(|| NetworkError::StaleHandle(format!("tuple {id:?} is gone")))
    }

    pub fn get_mut(&mut self, id: TupleId) -> Result<&mut Tuple> {
        self.slots
            .get_mut(id.index as usize)
            .filter(|s| s.generation == id.generation)
            .and_then(|s| s.tuple.as_mut())
            .ok_or_else(|| NetworkError::StaleHandle(format!("tuple {id:?} is gone")))
    }

    /// Marks the tuple dead and schedules its slot for reuse at the end of
    /// the current settle pass.
    pub fn bury(&mut self, id: TupleId) -> Result<()> {
        let tuple = self.get_mut(id)?;
        tuple.set_state(TupleState::Dead);
        self.graveyard.push(id.index);
        Ok(())
    }

    /// Reclaims buried tuples. Called once per settle pass.
    pub fn collect_garbage(&mut self) {
        for index in self.graveyard.drain(..) {
            let slot = &mut self.slots[index as usize];
            slot.tuple = None;
            slot.generation = slot.generation.wrapping_add(1);
            self.free.push(index);
        }
    }

    /// Number of live (not yet reclaimed, not buried) tuples.
    pub fn live_count(&self) -> usize {
        self.slots.len() - self.free.len() - self.graveyard.len()
    }
}
