//! Graph construction: wiring filter/map/join/group chains into an
//! immutable network.
//!
//! A `NetworkFactory` accumulates node specs and children lists; stream
//! handles track each stream's arity and its origin (the node whose
//! tuples flow through it), which is where consumer nodes reserve their
//! store slots. `build` freezes the graph into a `Network` that sessions
//! share via `Arc`.

use std::any::TypeId;
use std::sync::Arc;

use smallvec::SmallVec;

use flowscore_core::{ConstraintRef, ImpactType, Score};

use crate::collector::Collector;
use crate::error::{NetworkError, Result};
use crate::fact::{Fact, FactHandle};
use crate::index::IndexPlan;
use crate::joiner::Joiner;
use crate::key::KeyValue;
use crate::node::{
    concat, filter, flatten, for_each, group, if_exists, join, map, precompute, scorer, ChildRef,
    NodeSpec, Port,
};
use crate::tuple::{Tuple, MAX_ARITY};

/// Handle to one stream of tuples during graph construction.
#[derive(Debug, Clone, Copy)]
pub struct StreamRef {
    /// Node downstream consumers attach to.
    pub(crate) node: usize,
    /// Node whose tuples flow through this stream (store-slot owner).
    pub(crate) origin: usize,
    pub(crate) arity: usize,
}

impl StreamRef {
    pub fn arity(&self) -> usize {
        self.arity
    }
}

/// The wired, immutable propagation graph. Shared across sessions.
pub struct Network<Sc: Score> {
    pub(crate) specs: Vec<NodeSpec<Sc>>,
    pub(crate) children: Vec<Vec<ChildRef>>,
    pub(crate) labels: Vec<String>,
    pub(crate) sources: Vec<(TypeId, usize)>,
    pub(crate) precompute_nodes: Vec<usize>,
}

impl<Sc: Score> Network<Sc> {
    pub fn node_count(&self) -> usize {
        self.specs.len()
    }

    pub fn label(&self, node: usize) -> &str {
        &self.labels[node]
    }

    pub(crate) fn children_of(&self, node: usize) -> &[ChildRef] {
        &self.children[node]
    }
}

/// Fluent entry point for declaring a constraint network.
pub struct NetworkFactory<Sc: Score> {
    specs: Vec<NodeSpec<Sc>>,
    children: Vec<Vec<ChildRef>>,
    labels: Vec<String>,
    /// Store slots reserved so far on each node's output tuples.
    store_sizes: Vec<usize>,
}

impl<Sc: Score> Default for NetworkFactory<Sc> {
    fn default() -> Self {
        Self::new()
    }
}

impl<Sc: Score> NetworkFactory<Sc> {
    pub fn new() -> Self {
        NetworkFactory {
            specs: Vec::new(),
            children: Vec::new(),
            labels: Vec::new(),
            store_sizes: Vec::new(),
        }
    }

    fn add_node(&mut self, spec: NodeSpec<Sc>) -> usize {
        let node = self.specs.len();
        self.labels.push(format!("{}#{node}", spec.kind_name()));
        self.specs.push(spec);
        self.children.push(Vec::new());
        self.store_sizes.push(0);
        node
    }

    fn attach(&mut self, parent: usize, child: usize, port: Port) {
        self.children[parent].push(ChildRef { node: child, port });
    }

    fn reserve(&mut self, origin: usize) -> usize {
        let slot = self.store_sizes[origin];
        self.store_sizes[origin] += 1;
        slot
    }

    /// Declares a source stream over one fact type.
    pub fn for_each<T: Fact>(&mut self) -> StreamRef {
        self.add_source::<T>(None)
    }

    /// Declares a source stream that admits only facts passing the
    /// prefilter. Unassigned facts are typically excluded here, before
    /// any downstream index sees them.
    pub fn for_each_filtered<T, F>(&mut self, prefilter: F) -> StreamRef
    where
        T: Fact,
        F: Fn(&T) -> bool + Send + Sync + 'static,
    {
        self.add_source::<T>(Some(Arc::new(move |fact: &dyn Fact| {
            fact.as_any()
                .downcast_ref::<T>()
                .map_or(false, &prefilter)
        })))
    }

    fn add_source<T: Fact>(
        &mut self,
        source_filter: Option<Arc<dyn Fn(&dyn Fact) -> bool + Send + Sync>>,
    ) -> StreamRef {
        let node = self.add_node(NodeSpec::ForEach(for_each::ForEachSpec {
            fact_type: TypeId::of::<T>(),
            type_name: std::any::type_name::<T>(),
            source_filter,
            out_store_size: 0,
        }));
        StreamRef {
            node,
            origin: node,
            arity: 1,
        }
    }

    /// Stateless filter; relies on tolerant downstream semantics.
    pub fn filter<F>(&mut self, stream: StreamRef, predicate: F) -> StreamRef
    where
        F: Fn(&Tuple) -> bool + Send + Sync + 'static,
    {
        let node = self.add_node(NodeSpec::Filter(filter::FilterSpec {
            predicate: Arc::new(predicate),
            memory_slot: None,
        }));
        self.attach(stream.node, node, Port::Only);
        StreamRef {
            node,
            origin: stream.origin,
            arity: stream.arity,
        }
    }

    /// Memoizing filter; caches the predicate result in a store slot and
    /// never re-evaluates it on unrelated retracts.
    pub fn filter_memoized<F>(&mut self, stream: StreamRef, predicate: F) -> StreamRef
    where
        F: Fn(&Tuple) -> bool + Send + Sync + 'static,
    {
        let slot = self.reserve(stream.origin);
        let node = self.add_node(NodeSpec::Filter(filter::FilterSpec {
            predicate: Arc::new(predicate),
            memory_slot: Some(slot),
        }));
        self.attach(stream.node, node, Port::Only);
        StreamRef {
            node,
            origin: stream.origin,
            arity: stream.arity,
        }
    }

    /// Maps each tuple to exactly one tuple of the given arity.
    pub fn map<F>(&mut self, stream: StreamRef, out_arity: usize, mapper: F) -> Result<StreamRef>
    where
        F: Fn(&Tuple) -> SmallVec<[FactHandle; MAX_ARITY]> + Send + Sync + 'static,
    {
        check_arity(out_arity)?;
        let in_slot = self.reserve(stream.origin);
        let node = self.add_node(NodeSpec::Map(map::MapSpec {
            mapper: Arc::new(mapper),
            out_arity,
            in_slot,
            out_store_size: 0,
        }));
        self.attach(stream.node, node, Port::Only);
        Ok(StreamRef {
            node,
            origin: node,
            arity: out_arity,
        })
    }

    /// Expands the last fact of each tuple into zero-or-more values.
    pub fn flat_map<F>(&mut self, stream: StreamRef, expander: F) -> StreamRef
    where
        F: Fn(&Tuple) -> Vec<FactHandle> + Send + Sync + 'static,
    {
        let in_slot = self.reserve(stream.origin);
        let node = self.add_node(NodeSpec::Flatten(flatten::FlattenSpec {
            expander: Arc::new(expander),
            in_slot,
            out_store_size: 0,
        }));
        self.attach(stream.node, node, Port::Only);
        StreamRef {
            node,
            origin: node,
            arity: stream.arity,
        }
    }

    /// Merges two streams; the narrower side's padding function computes
    /// the missing trailing facts.
    pub fn concat(
        &mut self,
        left: StreamRef,
        right: StreamRef,
        left_pad: Option<concat::PadFn>,
        right_pad: Option<concat::PadFn>,
    ) -> Result<StreamRef> {
        let out_arity = left.arity.max(right.arity);
        check_arity(out_arity)?;
        if left.arity < out_arity && left_pad.is_none() {
            return Err(NetworkError::Build(
                "concat: left side is narrower and has no padding function".to_string(),
            ));
        }
        if right.arity < out_arity && right_pad.is_none() {
            return Err(NetworkError::Build(
                "concat: right side is narrower and has no padding function".to_string(),
            ));
        }
        let left_slot = self.reserve(left.origin);
        let right_slot = self.reserve(right.origin);
        let node = self.add_node(NodeSpec::Concat(concat::ConcatSpec {
            left: concat::ConcatSide {
                in_slot: left_slot,
                pad: left_pad,
            },
            right: concat::ConcatSide {
                in_slot: right_slot,
                pad: right_pad,
            },
            out_arity,
            out_store_size: 0,
        }));
        self.attach(left.node, node, Port::Left);
        self.attach(right.node, node, Port::Right);
        Ok(StreamRef {
            node,
            origin: node,
            arity: out_arity,
        })
    }

    /// Joins a left stream with an arity-1 right stream.
    pub fn join(
        &mut self,
        left: StreamRef,
        right: StreamRef,
        joiners: Vec<Joiner>,
    ) -> Result<StreamRef> {
        if right.arity != 1 {
            return Err(NetworkError::Build(
                "join: the right stream must have arity 1".to_string(),
            ));
        }
        let out_arity = left.arity + 1;
        check_arity(out_arity)?;
        let (plan, filter) = IndexPlan::of(joiners);
        let left_keys_slot = self.reserve(left.origin);
        let left_entry_slot = self.reserve(left.origin);
        let left_outlist_slot = self.reserve(left.origin);
        let right_keys_slot = self.reserve(right.origin);
        let right_entry_slot = self.reserve(right.origin);
        let right_outlist_slot = self.reserve(right.origin);
        // The join reserves the first two slots of its own output.
        let out_left_entry_slot = 0;
        let out_right_entry_slot = 1;
        let spec = join::JoinSpec {
            right_levels: plan.inverted_levels(),
            left_levels: plan.levels,
            left_keys: plan.left,
            right_keys: plan.right,
            filter,
            left_keys_slot,
            left_entry_slot,
            left_outlist_slot,
            right_keys_slot,
            right_entry_slot,
            right_outlist_slot,
            out_left_entry_slot,
            out_right_entry_slot,
            out_arity,
            out_store_size: 0,
        };
        let node = self.add_node(NodeSpec::Join(spec));
        self.store_sizes[node] = 2;
        self.attach(left.node, node, Port::Left);
        self.attach(right.node, node, Port::Right);
        Ok(StreamRef {
            node,
            origin: node,
            arity: out_arity,
        })
    }

    /// Forwards left tuples that have at least one matching right tuple.
    pub fn if_exists(
        &mut self,
        left: StreamRef,
        right: StreamRef,
        joiners: Vec<Joiner>,
    ) -> Result<StreamRef> {
        self.add_exists(left, right, joiners, true)
    }

    /// Forwards left tuples that have no matching right tuple.
    pub fn if_not_exists(
        &mut self,
        left: StreamRef,
        right: StreamRef,
        joiners: Vec<Joiner>,
    ) -> Result<StreamRef> {
        self.add_exists(left, right, joiners, false)
    }

    fn add_exists(
        &mut self,
        left: StreamRef,
        right: StreamRef,
        joiners: Vec<Joiner>,
        should_exist: bool,
    ) -> Result<StreamRef> {
        if right.arity != 1 {
            return Err(NetworkError::Build(
                "existence: the right stream must have arity 1".to_string(),
            ));
        }
        let (plan, filter) = IndexPlan::of(joiners);
        let filtered = filter.is_some();
        let left_keys_slot = self.reserve(left.origin);
        let left_entry_slot = self.reserve(left.origin);
        let left_tracker_slot = if filtered {
            self.reserve(left.origin)
        } else {
            usize::MAX
        };
        let right_keys_slot = self.reserve(right.origin);
        let right_entry_slot = self.reserve(right.origin);
        let right_tracker_slot = if filtered {
            self.reserve(right.origin)
        } else {
            usize::MAX
        };
        let node = self.add_node(NodeSpec::IfExists(if_exists::IfExistsSpec {
            should_exist,
            right_levels: plan.inverted_levels(),
            left_levels: plan.levels,
            left_keys: plan.left,
            right_keys: plan.right,
            filter,
            left_keys_slot,
            left_entry_slot,
            left_tracker_slot,
            right_keys_slot,
            right_entry_slot,
            right_tracker_slot,
        }));
        self.attach(left.node, node, Port::Left);
        self.attach(right.node, node, Port::Right);
        // Pass-through: downstream consumers keep reserving on the left
        // origin.
        Ok(StreamRef {
            node,
            origin: left.origin,
            arity: left.arity,
        })
    }

    /// Groups by a derived key, aggregating with the given collectors.
    /// Output arity is 1 (key) + one slot per collector.
    pub fn group_by<K, F>(
        &mut self,
        stream: StreamRef,
        key_fn: F,
        collectors: Vec<Arc<dyn Collector>>,
    ) -> Result<StreamRef>
    where
        K: Into<KeyValue>,
        F: Fn(&Tuple) -> K + Send + Sync + 'static,
    {
        self.add_group(
            stream,
            Some(Arc::new(move |t: &Tuple| key_fn(t).into())),
            collectors,
        )
    }

    /// Aggregates the whole stream into one singleton group.
    pub fn group_all(
        &mut self,
        stream: StreamRef,
        collectors: Vec<Arc<dyn Collector>>,
    ) -> Result<StreamRef> {
        self.add_group(stream, None, collectors)
    }

    fn add_group(
        &mut self,
        stream: StreamRef,
        key_fn: Option<crate::joiner::KeyFn>,
        collectors: Vec<Arc<dyn Collector>>,
    ) -> Result<StreamRef> {
        let key_slots = usize::from(key_fn.is_some());
        let out_arity = key_slots + collectors.len();
        if out_arity == 0 {
            return Err(NetworkError::Build(
                "group_by: needs a key function or at least one collector".to_string(),
            ));
        }
        check_arity(out_arity)?;
        let group_slot = self.reserve(stream.origin);
        let undo_slot = self.reserve(stream.origin);
        let member_entry_slot = self.reserve(stream.origin);
        let label = format!("group_by#{}", self.specs.len());
        let node = self.add_node(NodeSpec::Group(group::GroupSpec {
            key_fn,
            collectors,
            label,
            group_slot,
            undo_slot,
            member_entry_slot,
            out_arity,
            out_store_size: 0,
        }));
        self.attach(stream.node, node, Port::Only);
        Ok(StreamRef {
            node,
            origin: node,
            arity: out_arity,
        })
    }

    /// Declares a precomputed side-table source.
    pub fn precompute<F>(&mut self, arity: usize, supplier: F) -> Result<StreamRef>
    where
        F: Fn() -> Vec<SmallVec<[FactHandle; MAX_ARITY]>> + Send + Sync + 'static,
    {
        check_arity(arity)?;
        let node = self.add_node(NodeSpec::Precompute(precompute::PrecomputeSpec {
            supplier: Arc::new(supplier),
            arity,
            out_store_size: 0,
        }));
        Ok(StreamRef {
            node,
            origin: node,
            arity,
        })
    }

    /// Terminates a stream with a penalizing constraint.
    pub fn penalize<F>(&mut self, stream: StreamRef, name: &str, weigher: F)
    where
        F: Fn(&Tuple) -> Sc + Send + Sync + 'static,
    {
        self.add_scorer(stream, name, ImpactType::Penalty, weigher);
    }

    /// Terminates a stream with a rewarding constraint.
    pub fn reward<F>(&mut self, stream: StreamRef, name: &str, weigher: F)
    where
        F: Fn(&Tuple) -> Sc + Send + Sync + 'static,
    {
        self.add_scorer(stream, name, ImpactType::Reward, weigher);
    }

    fn add_scorer<F>(&mut self, stream: StreamRef, name: &str, impact: ImpactType, weigher: F)
    where
        F: Fn(&Tuple) -> Sc + Send + Sync + 'static,
    {
        let node = self.add_node(NodeSpec::Scorer(scorer::ScorerSpec {
            constraint: ConstraintRef::new("", name),
            impact,
            weigher: Arc::new(weigher),
        }));
        self.attach(stream.node, node, Port::Only);
    }

    /// Freezes the graph.
    pub fn build(mut self) -> Network<Sc> {
        let mut sources = Vec::new();
        let mut precompute_nodes = Vec::new();
        for (node, spec) in self.specs.iter_mut().enumerate() {
            let size = self.store_sizes[node];
            match spec {
                NodeSpec::ForEach(s) => {
                    s.out_store_size = size;
                    sources.push((s.fact_type, node));
                }
                NodeSpec::Map(s) => s.out_store_size = size,
                NodeSpec::Flatten(s) => s.out_store_size = size,
                NodeSpec::Concat(s) => s.out_store_size = size,
                NodeSpec::Join(s) => s.out_store_size = size,
                NodeSpec::Group(s) => s.out_store_size = size,
                NodeSpec::Precompute(s) => {
                    s.out_store_size = size;
                    precompute_nodes.push(node);
                }
                NodeSpec::Filter(_) | NodeSpec::IfExists(_) | NodeSpec::Scorer(_) => {}
            }
        }
        tracing::debug!(
            nodes = self.specs.len(),
            sources = sources.len(),
            "constraint network built"
        );
        Network {
            specs: self.specs,
            children: self.children,
            labels: self.labels,
            sources,
            precompute_nodes,
        }
    }
}

fn check_arity(arity: usize) -> Result<()> {
    if (1..=MAX_ARITY).contains(&arity) {
        Ok(())
    } else {
        Err(NetworkError::Build(format!(
            "arity {arity} outside the supported range 1..={MAX_ARITY}"
        )))
    }
}
