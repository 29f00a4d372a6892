//! Session: one live instantiation of a network bound to a working
//! solution.
//!
//! All insert/update/retract calls propagate to completion before control
//! returns. A mutation runs in two phases: the mutation phase walks ops
//! depth-first, each node committing its own bookkeeping and parking
//! downstream notifications; the settle phase then flushes every node's
//! queue in topological order (children always have higher ids than their
//! parents), so an index is always fully committed before any downstream
//! node reads it. Dead tuples are reclaimed at the end of the pass.

use std::sync::Arc;

use tracing::trace;

use flowscore_core::{ConstraintRef, Score};

use crate::error::{NetworkError, Result};
use crate::fact::FactHandle;
use crate::network::Network;
use crate::node::{
    concat, fan_out, filter, flatten, for_each, group, if_exists, join, map, precompute, scorer,
    LifecycleKind, NodeSpec, NodeState, OpStack, Port,
};
use crate::tuple::{CounterId, GroupId, TupleArena, TupleId, TupleState};

/// One live constraint match, with a human-readable justification.
#[derive(Debug, Clone)]
pub struct ConstraintMatch<Sc: Score> {
    pub constraint: ConstraintRef,
    /// Signed score impact of this single match.
    pub weight: Sc,
    /// The contributing facts.
    pub justification: String,
}

/// Resource snapshot used by teardown assertions and diagnostics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionStats {
    pub live_tuples: usize,
    pub match_count: usize,
}

/// A stateful evaluation session. Single-threaded; create one per thread
/// from a shared `Arc<Network>`.
pub struct Session<Sc: Score> {
    network: Arc<Network<Sc>>,
    states: Vec<NodeState<Sc>>,
    arena: TupleArena,
}

impl<Sc: Score> Session<Sc> {
    /// Binds a fresh session, replaying precomputed sources.
    pub fn new(network: Arc<Network<Sc>>) -> Result<Self> {
        let states = network.specs.iter().map(NodeSpec::instantiate).collect();
        let mut session = Session {
            network,
            states,
            arena: TupleArena::new(),
        };
        session.run_precompute(false)?;
        Ok(session)
    }

    /// Inserts a new domain fact. The fact must not be live already.
    pub fn insert(&mut self, fact: FactHandle) -> Result<()> {
        trace!(fact_id = fact.fact_id(), "insert");
        self.route(fact, for_each::insert)?;
        self.settle()
    }

    /// Notifies the network that a live fact's values changed.
    pub fn update(&mut self, fact: FactHandle) -> Result<()> {
        trace!(fact_id = fact.fact_id(), "update");
        self.route(fact, for_each::update)?;
        self.settle()
    }

    /// Retracts a live domain fact.
    pub fn retract(&mut self, fact: FactHandle) -> Result<()> {
        trace!(fact_id = fact.fact_id(), "retract");
        self.route(fact.clone(), |spec, state, node, arena, fact| {
            for_each::retract(spec, state, node, arena, &fact)
        })?;
        self.settle()
    }

    fn route(
        &mut self,
        fact: FactHandle,
        op: impl Fn(
            &for_each::ForEachSpec,
            &mut for_each::ForEachState,
            usize,
            &mut TupleArena,
            FactHandle,
        ) -> Result<()>,
    ) -> Result<()> {
        let network = Arc::clone(&self.network);
        let type_id = fact.as_any().type_id();
        let mut routed = false;
        for &(source_type, node) in &network.sources {
            if source_type != type_id {
                continue;
            }
            routed = true;
            let NodeSpec::ForEach(spec) = &network.specs[node] else {
                return Err(NetworkError::contract(node, "source spec mismatch"));
            };
            let NodeState::ForEach(state) = &mut self.states[node] else {
                return Err(NetworkError::contract(node, "source state mismatch"));
            };
            op(spec, state, node, &mut self.arena, fact.clone())?;
        }
        if !routed {
            return Err(NetworkError::UnknownFactType {
                fact: format!("{fact:?}"),
            });
        }
        Ok(())
    }

    /// Retracts and replays every precomputed source.
    pub fn refresh_precomputed(&mut self) -> Result<()> {
        self.run_precompute(true)
    }

    fn run_precompute(&mut self, refresh: bool) -> Result<()> {
        let network = Arc::clone(&self.network);
        for &node in &network.precompute_nodes {
            let NodeSpec::Precompute(spec) = &network.specs[node] else {
                return Err(NetworkError::contract(node, "precompute spec mismatch"));
            };
            let NodeState::Precompute(state) = &mut self.states[node] else {
                return Err(NetworkError::contract(node, "precompute state mismatch"));
            };
            if refresh {
                precompute::refresh(spec, state, node, &mut self.arena)?;
            } else {
                precompute::compute(spec, state, &mut self.arena)?;
            }
        }
        self.settle()
    }

    /// The running total over all terminal nodes.
    pub fn score(&self) -> Sc {
        let mut total = Sc::zero();
        for state in &self.states {
            if let NodeState::Scorer(scorer) = state {
                total = total + scorer.total();
            }
        }
        total
    }

    /// Snapshot of every live constraint match.
    pub fn constraint_matches(&self) -> Vec<ConstraintMatch<Sc>> {
        let mut matches = Vec::new();
        for (spec, state) in self.network.specs.iter().zip(&self.states) {
            let (NodeSpec::Scorer(spec), NodeState::Scorer(state)) = (spec, state) else {
                continue;
            };
            for (tuple, weight) in state.matches() {
                let justification = self
                    .arena
                    .get(*tuple)
                    .map(|t| t.justification())
                    .unwrap_or_else(|_| "<gone>".to_string());
                matches.push(ConstraintMatch {
                    constraint: spec.constraint.clone(),
                    weight: *weight,
                    justification,
                });
            }
        }
        matches
    }

    pub fn stats(&self) -> SessionStats {
        let match_count = self
            .states
            .iter()
            .map(|state| match state {
                NodeState::Scorer(scorer) => scorer.match_count(),
                _ => 0,
            })
            .sum();
        SessionStats {
            live_tuples: self.arena.live_count(),
            match_count,
        }
    }

    // ------------------------------------------------------------------
    // Settle machinery
    // ------------------------------------------------------------------

    fn settle(&mut self) -> Result<()> {
        for node in 0..self.states.len() {
            self.flush_node(node)?;
        }
        self.arena.collect_garbage();
        Ok(())
    }

    fn flush_node(&mut self, node: usize) -> Result<()> {
        enum Dirty {
            Tuples(Vec<TupleId>),
            Groups(Vec<GroupId>),
            Counters(Vec<CounterId>),
            None,
        }
        let dirty = match &mut self.states[node] {
            NodeState::ForEach(st) => Dirty::Tuples(st.queue.take()),
            NodeState::Map(st) => Dirty::Tuples(st.queue.take()),
            NodeState::Flatten(st) => Dirty::Tuples(st.queue.take()),
            NodeState::Concat(st) => Dirty::Tuples(st.queue.take()),
            NodeState::Join(st) => Dirty::Tuples(st.queue.take()),
            NodeState::Precompute(st) => Dirty::Tuples(st.queue.take()),
            NodeState::Group(st) => Dirty::Groups(std::mem::take(&mut st.dirty)),
            NodeState::IfExists(st) => Dirty::Counters(std::mem::take(&mut st.dirty)),
            NodeState::Filter | NodeState::Scorer(_) => Dirty::None,
        };
        match dirty {
            Dirty::Tuples(tuples) => {
                for tuple in tuples {
                    self.flush_tuple(node, tuple)?;
                }
            }
            Dirty::Groups(groups) => {
                for group in groups {
                    self.flush_group(node, group)?;
                }
            }
            Dirty::Counters(counters) => {
                for counter in counters {
                    self.flush_counter(node, counter)?;
                }
            }
            Dirty::None => {}
        }
        Ok(())
    }

    fn flush_tuple(&mut self, node: usize, tuple: TupleId) -> Result<()> {
        let state = self.arena.get(tuple)?.state();
        match state {
            TupleState::Creating => {
                self.dispatch(node, LifecycleKind::Insert, tuple)?;
                self.arena.get_mut(tuple)?.set_state(TupleState::Ok);
            }
            TupleState::Updating => {
                self.dispatch(node, LifecycleKind::Update, tuple)?;
                self.arena.get_mut(tuple)?.set_state(TupleState::Ok);
            }
            TupleState::Dying => {
                self.dispatch(node, LifecycleKind::Retract, tuple)?;
                self.arena.bury(tuple)?;
            }
            TupleState::Aborting => {
                self.arena.bury(tuple)?;
            }
            state => {
                return Err(NetworkError::contract(
                    node,
                    format!("dirty tuple in state {state:?}"),
                ))
            }
        }
        Ok(())
    }

    fn flush_group(&mut self, node: usize, group: GroupId) -> Result<()> {
        let network = Arc::clone(&self.network);
        let NodeSpec::Group(spec) = &network.specs[node] else {
            return Err(NetworkError::contract(node, "group spec mismatch"));
        };
        let prepared = {
            let NodeState::Group(state) = &self.states[node] else {
                return Err(NetworkError::contract(node, "group state mismatch"));
            };
            group::prepare_flush(spec, state, &mut self.arena, group)?
        };
        if let Some((kind, out)) = prepared {
            self.dispatch(node, kind, out)?;
        }
        let NodeState::Group(state) = &mut self.states[node] else {
            return Err(NetworkError::contract(node, "group state mismatch"));
        };
        group::finalize_flush(state, &mut self.arena, group)
    }

    fn flush_counter(&mut self, node: usize, counter: CounterId) -> Result<()> {
        let prepared = {
            let NodeState::IfExists(state) = &self.states[node] else {
                return Err(NetworkError::contract(node, "exists state mismatch"));
            };
            if_exists::prepare_flush(state, counter)?
        };
        if let Some((kind, left)) = prepared {
            self.dispatch(node, kind, left)?;
        }
        let NodeState::IfExists(state) = &mut self.states[node] else {
            return Err(NetworkError::contract(node, "exists state mismatch"));
        };
        if_exists::finalize_flush(state, counter)
    }

    /// Notifies every child of `from` and runs the resulting op cascade.
    fn dispatch(&mut self, from: usize, kind: LifecycleKind, tuple: TupleId) -> Result<()> {
        let network = Arc::clone(&self.network);
        let mut stack: OpStack = Vec::new();
        fan_out(network.children_of(from), kind, tuple, &mut stack);
        let base = from + 1;
        let (_, tail) = self.states.split_at_mut(base);
        run_ops(network.as_ref(), tail, base, &mut self.arena, &mut stack)
    }
}

/// Drains the op stack depth-first. `states` starts at node index `base`;
/// ops may only target nodes at or past it (children always have higher
/// ids than their parents).
fn run_ops<Sc: Score>(
    network: &Network<Sc>,
    states: &mut [NodeState<Sc>],
    base: usize,
    arena: &mut TupleArena,
    stack: &mut OpStack,
) -> Result<()> {
    while let Some(op) = stack.pop() {
        let node = op.target;
        if node < base {
            return Err(NetworkError::contract(
                node,
                "op targets a node upstream of its producer".to_string(),
            ));
        }
        let spec = &network.specs[node];
        let state = &mut states[node - base];
        match (spec, state) {
            (NodeSpec::Filter(spec), NodeState::Filter) => filter::apply(
                spec,
                node,
                network.children_of(node),
                arena,
                op.kind,
                op.tuple,
                stack,
            )?,
            (NodeSpec::Map(spec), NodeState::Map(st)) => match op.kind {
                LifecycleKind::Insert => map::insert(spec, st, node, arena, op.tuple)?,
                LifecycleKind::Update => map::update(spec, st, node, arena, op.tuple)?,
                LifecycleKind::Retract => map::retract(spec, st, node, arena, op.tuple)?,
            },
            (NodeSpec::Flatten(spec), NodeState::Flatten(st)) => match op.kind {
                LifecycleKind::Insert => flatten::insert(spec, st, node, arena, op.tuple)?,
                LifecycleKind::Update => flatten::update(spec, st, node, arena, op.tuple)?,
                LifecycleKind::Retract => flatten::retract(spec, st, node, arena, op.tuple)?,
            },
            (NodeSpec::Concat(spec), NodeState::Concat(st)) => match op.kind {
                LifecycleKind::Insert => concat::insert(spec, st, node, arena, op.port, op.tuple)?,
                LifecycleKind::Update => concat::update(spec, st, node, arena, op.port, op.tuple)?,
                LifecycleKind::Retract => {
                    concat::retract(spec, st, node, arena, op.port, op.tuple)?
                }
            },
            (NodeSpec::Join(spec), NodeState::Join(st)) => match (op.port, op.kind) {
                (Port::Left, LifecycleKind::Insert) => {
                    join::insert_left(spec, st, node, arena, op.tuple)?
                }
                (Port::Left, LifecycleKind::Update) => {
                    join::update_left(spec, st, node, arena, op.tuple)?
                }
                (Port::Left, LifecycleKind::Retract) => {
                    join::retract_left(spec, st, node, arena, op.tuple)?
                }
                (Port::Right, LifecycleKind::Insert) => {
                    join::insert_right(spec, st, node, arena, op.tuple)?
                }
                (Port::Right, LifecycleKind::Update) => {
                    join::update_right(spec, st, node, arena, op.tuple)?
                }
                (Port::Right, LifecycleKind::Retract) => {
                    join::retract_right(spec, st, node, arena, op.tuple)?
                }
                (Port::Only, _) => {
                    return Err(NetworkError::contract(
                        node,
                        "join reached through an unported edge".to_string(),
                    ))
                }
            },
            (NodeSpec::IfExists(spec), NodeState::IfExists(st)) => match (op.port, op.kind) {
                (Port::Left, LifecycleKind::Insert) => {
                    if_exists::insert_left(spec, st, node, arena, op.tuple)?
                }
                (Port::Left, LifecycleKind::Update) => {
                    if_exists::update_left(spec, st, node, arena, op.tuple)?
                }
                (Port::Left, LifecycleKind::Retract) => {
                    if_exists::retract_left(spec, st, node, arena, op.tuple)?
                }
                (Port::Right, LifecycleKind::Insert) => {
                    if_exists::insert_right(spec, st, node, arena, op.tuple)?
                }
                (Port::Right, LifecycleKind::Update) => {
                    if_exists::update_right(spec, st, node, arena, op.tuple)?
                }
                (Port::Right, LifecycleKind::Retract) => {
                    if_exists::retract_right(spec, st, node, arena, op.tuple)?
                }
                (Port::Only, _) => {
                    return Err(NetworkError::contract(
                        node,
                        "existence node reached through an unported edge".to_string(),
                    ))
                }
            },
            (NodeSpec::Group(spec), NodeState::Group(st)) => match op.kind {
                LifecycleKind::Insert => group::insert(spec, st, node, arena, op.tuple)?,
                LifecycleKind::Update => group::update(spec, st, node, arena, op.tuple)?,
                LifecycleKind::Retract => group::retract(spec, st, node, arena, op.tuple)?,
            },
            (NodeSpec::Scorer(spec), NodeState::Scorer(st)) => match op.kind {
                LifecycleKind::Insert => scorer::insert(spec, st, node, arena, op.tuple)?,
                LifecycleKind::Update => scorer::update(spec, st, node, arena, op.tuple)?,
                LifecycleKind::Retract => scorer::retract(st, op.tuple)?,
            },
            (NodeSpec::ForEach(_), _) | (NodeSpec::Precompute(_), _) => {
                return Err(NetworkError::contract(
                    node,
                    "source nodes cannot be downstream of another node".to_string(),
                ))
            }
            _ => {
                return Err(NetworkError::contract(
                    node,
                    "node spec/state mismatch".to_string(),
                ))
            }
        }
    }
    Ok(())
}
