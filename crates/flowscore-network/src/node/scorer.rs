//! Terminal node: converts live tuples into constraint matches.
//!
//! Each tuple reaching the terminal becomes one match with a weight from
//! the user-supplied weigher, signed by the constraint's impact type. The
//! node keeps a running total so the session's score is O(terminals) to
//! read. Weights must be non-negative; a negative weight silently flips
//! the constraint's polarity, so it fails fast naming the constraint.

use std::collections::HashMap;
use std::sync::Arc;

use flowscore_core::{ConstraintRef, ImpactType, Score};

use crate::error::{NetworkError, Result};
use crate::tuple::{Tuple, TupleArena, TupleId};

pub struct ScorerSpec<Sc: Score> {
    pub constraint: ConstraintRef,
    pub impact: ImpactType,
    pub weigher: Arc<dyn Fn(&Tuple) -> Sc + Send + Sync>,
}

pub struct ScorerState<Sc: Score> {
    matches: HashMap<TupleId, Sc>,
    total: Sc,
}

impl<Sc: Score> ScorerState<Sc> {
    pub fn new() -> Self {
        ScorerState {
            matches: HashMap::new(),
            total: Sc::zero(),
        }
    }

    pub fn total(&self) -> Sc {
        self.total
    }

    pub fn match_count(&self) -> usize {
        self.matches.len()
    }

    pub fn matches(&self) -> impl Iterator<Item = (&TupleId, &Sc)> {
        self.matches.iter()
    }
}

impl<Sc: Score> Default for ScorerState<Sc> {
    fn default() -> Self {
        Self::new()
    }
}

fn signed_weight<Sc: Score>(
    spec: &ScorerSpec<Sc>,
    tuple: &Tuple,
) -> Result<Sc> {
    let weight = (spec.weigher)(tuple);
    if !weight.is_non_negative() {
        return Err(NetworkError::WeightSignViolation {
            constraint: spec.constraint.full_name(),
            weight: weight.to_string(),
        });
    }
    Ok(match spec.impact {
        ImpactType::Penalty => -weight,
        ImpactType::Reward => weight,
    })
}

pub fn insert<Sc: Score>(
    spec: &ScorerSpec<Sc>,
    state: &mut ScorerState<Sc>,
    node: usize,
    arena: &TupleArena,
    tuple: TupleId,
) -> Result<()> {
    if state.matches.contains_key(&tuple) {
        return Err(NetworkError::contract(
            node,
            format!(
                "duplicate match insert for constraint {}",
                spec.constraint.full_name()
            ),
        ));
    }
    let weight = signed_weight(spec, arena.get(tuple)?)?;
    state.matches.insert(tuple, weight);
    state.total = state.total + weight;
    Ok(())
}

pub fn update<Sc: Score>(
    spec: &ScorerSpec<Sc>,
    state: &mut ScorerState<Sc>,
    node: usize,
    arena: &TupleArena,
    tuple: TupleId,
) -> Result<()> {
    match state.matches.get(&tuple).copied() {
        Some(old) => {
            let new = signed_weight(spec, arena.get(tuple)?)?;
            state.matches.insert(tuple, new);
            state.total = state.total + new - old;
            Ok(())
        }
        // Unseen tuple from an upstream filter.
        None => insert(spec, state, node, arena, tuple),
    }
}

pub fn retract<Sc: Score>(
    state: &mut ScorerState<Sc>,
    tuple: TupleId,
) -> Result<()> {
    if let Some(weight) = state.matches.remove(&tuple) {
        state.total = state.total - weight;
    }
    Ok(())
}
