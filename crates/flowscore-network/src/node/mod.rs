//! Node implementations of the propagation graph.
//!
//! Every node implements the uniform insert/update/retract contract. A
//! node's handler runs during the mutation phase: it commits its own
//! bookkeeping immediately, parks downstream notifications in its dirty
//! queue, and (for pass-through nodes) forwards ops to its children on the
//! spot. The session flushes all queues in topological order afterwards,
//! so a join never observes a half-updated index.

pub mod concat;
pub mod filter;
pub mod flatten;
pub mod for_each;
pub mod group;
pub mod if_exists;
pub mod join;
pub mod map;
pub mod precompute;
pub mod queue;
pub mod scorer;

use flowscore_core::Score;

use crate::tuple::TupleId;

/// The three lifecycle notifications.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleKind {
    Insert,
    Update,
    Retract,
}

/// Which input of the target node an op addresses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Port {
    Only,
    Left,
    Right,
}

/// Registered downstream consumer of a node's output.
#[derive(Debug, Clone, Copy)]
pub struct ChildRef {
    pub node: usize,
    pub port: Port,
}

/// One pending lifecycle dispatch.
#[derive(Debug, Clone, Copy)]
pub struct Op {
    pub target: usize,
    pub port: Port,
    pub kind: LifecycleKind,
    pub tuple: TupleId,
}

/// Stack of pending dispatches, drained depth-first.
pub type OpStack = Vec<Op>;

/// Pushes one op per child for the given tuple.
pub fn fan_out(children: &[ChildRef], kind: LifecycleKind, tuple: TupleId, stack: &mut OpStack) {
    // Reverse keeps sibling dispatch in registration order off a stack.
    for child in children.iter().rev() {
        stack.push(Op {
            target: child.node,
            port: child.port,
            kind,
            tuple,
        });
    }
}

/// Immutable configuration of one node, shared across sessions.
pub enum NodeSpec<Sc: Score> {
    ForEach(for_each::ForEachSpec),
    Filter(filter::FilterSpec),
    Map(map::MapSpec),
    Flatten(flatten::FlattenSpec),
    Concat(concat::ConcatSpec),
    Join(join::JoinSpec),
    IfExists(if_exists::IfExistsSpec),
    Group(group::GroupSpec),
    Precompute(precompute::PrecomputeSpec),
    Scorer(scorer::ScorerSpec<Sc>),
}

/// Per-session mutable state of one node.
pub enum NodeState<Sc: Score> {
    ForEach(for_each::ForEachState),
    Filter,
    Map(map::MapState),
    Flatten(flatten::FlattenState),
    Concat(concat::ConcatState),
    Join(join::JoinState),
    IfExists(if_exists::IfExistsState),
    Group(group::GroupState),
    Precompute(precompute::PrecomputeState),
    Scorer(scorer::ScorerState<Sc>),
}

impl<Sc: Score> NodeSpec<Sc> {
    /// Creates this node's empty per-session state.
    pub fn instantiate(&self) -> NodeState<Sc> {
        match self {
            NodeSpec::ForEach(_) => NodeState::ForEach(for_each::ForEachState::new()),
            NodeSpec::Filter(_) => NodeState::Filter,
            NodeSpec::Map(_) => NodeState::Map(map::MapState::new()),
            NodeSpec::Flatten(_) => NodeState::Flatten(flatten::FlattenState::new()),
            NodeSpec::Concat(_) => NodeState::Concat(concat::ConcatState::new()),
            NodeSpec::Join(spec) => NodeState::Join(join::JoinState::new(spec)),
            NodeSpec::IfExists(spec) => NodeState::IfExists(if_exists::IfExistsState::new(spec)),
            NodeSpec::Group(_) => NodeState::Group(group::GroupState::new()),
            NodeSpec::Precompute(_) => NodeState::Precompute(precompute::PrecomputeState::new()),
            NodeSpec::Scorer(_) => NodeState::Scorer(scorer::ScorerState::new()),
        }
    }

    /// Short kind name for diagnostics.
    pub fn kind_name(&self) -> &'static str {
        match self {
            NodeSpec::ForEach(_) => "for_each",
            NodeSpec::Filter(_) => "filter",
            NodeSpec::Map(_) => "map",
            NodeSpec::Flatten(_) => "flat_map",
            NodeSpec::Concat(_) => "concat",
            NodeSpec::Join(_) => "join",
            NodeSpec::IfExists(_) => "if_exists",
            NodeSpec::Group(_) => "group_by",
            NodeSpec::Precompute(_) => "precompute",
            NodeSpec::Scorer(_) => "scorer",
        }
    }
}
