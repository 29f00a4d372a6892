//! Keyed indexes for join and existence nodes.
//!
//! An index is a chain of levels derived from the declared joiners:
//! consecutive equality joiners merge into a single hash level over a
//! composite key, and each comparison joiner becomes one ordered level.
//! The leaves are bucket lists in the node's `ListPool`, so insertion
//! returns an `EntryId` and removal is O(1). Empty children are pruned on
//! removal, keeping the maps proportional to the live key set.

use std::collections::{BTreeMap, HashMap};
use std::ops::Bound;

use crate::error::{NetworkError, Result};
use crate::joiner::{Joiner, JoinerType, KeyFn, PairPredicate};
use crate::key::{IndexKeys, KeyValue};
use crate::tuple::Tuple;
use crate::util::{EntryId, ListPool};

/// One level of the index chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexLevel {
    /// Hash level; the key may be a composite of several equality joiners.
    Equals,
    /// Ordered level; stored keys matching `stored OP query` are visited.
    Comparison(JoinerType),
}

/// Index layout plus per-side key extractors, built from the joiner list.
pub struct IndexPlan {
    pub levels: Vec<IndexLevel>,
    pub left: Vec<KeyFn>,
    pub right: Vec<KeyFn>,
}

impl IndexPlan {
    /// Splits a joiner list into an index plan and the combined filtering
    /// predicate. Consecutive equality joiners collapse into one level.
    pub fn of(joiners: Vec<Joiner>) -> (IndexPlan, Option<PairPredicate>) {
        let mut keyed: Vec<(JoinerType, KeyFn, KeyFn)> = Vec::new();
        let mut filters: Vec<PairPredicate> = Vec::new();
        for joiner in joiners {
            match joiner {
                Joiner::Key {
                    joiner_type,
                    left,
                    right,
                } => keyed.push((joiner_type, left, right)),
                Joiner::Filtering(predicate) => filters.push(predicate),
            }
        }

        let mut plan = IndexPlan {
            levels: Vec::new(),
            left: Vec::new(),
            right: Vec::new(),
        };
        let mut i = 0;
        while i < keyed.len() {
            let (joiner_type, _, _) = keyed[i];
            if joiner_type == JoinerType::Equal {
                let mut run = i;
                while run < keyed.len() && keyed[run].0 == JoinerType::Equal {
                    run += 1;
                }
                plan.levels.push(IndexLevel::Equals);
                plan.left.push(merge_keys(&keyed[i..run], |k| k.1.clone()));
                plan.right.push(merge_keys(&keyed[i..run], |k| k.2.clone()));
                i = run;
            } else {
                plan.levels.push(IndexLevel::Comparison(joiner_type));
                plan.left.push(keyed[i].1.clone());
                plan.right.push(keyed[i].2.clone());
                i += 1;
            }
        }

        let filter = combine_filters(filters);
        (plan, filter)
    }

    /// The same layout seen from the right side: comparison ops inverted.
    pub fn inverted_levels(&self) -> Vec<IndexLevel> {
        self.levels
            .iter()
            .map(|level| match level {
                IndexLevel::Equals => IndexLevel::Equals,
                IndexLevel::Comparison(jt) => IndexLevel::Comparison(jt.inverse()),
            })
            .collect()
    }

    pub fn is_indexed(&self) -> bool {
        !self.levels.is_empty()
    }
}

fn merge_keys(
    run: &[(JoinerType, KeyFn, KeyFn)],
    pick: impl Fn(&(JoinerType, KeyFn, KeyFn)) -> KeyFn,
) -> KeyFn {
    if run.len() == 1 {
        return pick(&run[0]);
    }
    let parts: Vec<KeyFn> = run.iter().map(pick).collect();
    std::sync::Arc::new(move |tuple| KeyValue::composite(parts.iter().map(|f| f(tuple))))
}

fn combine_filters(mut filters: Vec<PairPredicate>) -> Option<PairPredicate> {
    match filters.len() {
        0 => None,
        1 => filters.pop(),
        _ => Some(std::sync::Arc::new(move |left, right| {
            filters.iter().all(|f| f(left, right))
        })),
    }
}

/// Extracts the per-level keys of one tuple.
pub fn extract_keys(extractors: &[KeyFn], tuple: &Tuple) -> IndexKeys {
    extractors.iter().map(|f| f(tuple)).collect()
}

/// One side's index: a chain of levels ending in bucket-list leaves.
///
/// An empty layout degenerates to a single bucket, the unindexed case.
pub enum Indexer {
    Leaf(crate::util::ListId),
    Equals(HashMap<KeyValue, Indexer>),
    Comparison(JoinerType, BTreeMap<KeyValue, Indexer>),
}

impl Indexer {
    pub fn new<T>(levels: &[IndexLevel], pool: &mut ListPool<T>) -> Indexer {
        match levels.first() {
            None => Indexer::Leaf(pool.create_list()),
            Some(IndexLevel::Equals) => Indexer::Equals(HashMap::new()),
            Some(IndexLevel::Comparison(jt)) => Indexer::Comparison(*jt, BTreeMap::new()),
        }
    }

    /// Inserts a value under its keys, returning the removal handle.
    pub fn put<T>(
        &mut self,
        levels: &[IndexLevel],
        keys: &[KeyValue],
        value: T,
        pool: &mut ListPool<T>,
    ) -> EntryId {
        match self {
            Indexer::Leaf(list) => pool.push(*list, value),
            Indexer::Equals(map) => map
                .entry(keys[0].clone())
                .or_insert_with(|| Indexer::new(&levels[1..], &mut *pool))
                .put(&levels[1..], &keys[1..], value, pool),
            Indexer::Comparison(_, map) => map
                .entry(keys[0].clone())
                .or_insert_with(|| Indexer::new(&levels[1..], &mut *pool))
                .put(&levels[1..], &keys[1..], value, pool),
        }
    }

    /// Removes an entry under the keys it was inserted with, pruning and
    /// releasing children that became empty. Returns true when this
    /// indexer is now empty itself. A root indexer is never released, so
    /// an empty root stays reusable.
    pub fn remove<T>(
        &mut self,
        levels: &[IndexLevel],
        keys: &[KeyValue],
        entry: EntryId,
        pool: &mut ListPool<T>,
    ) -> Result<bool> {
        match self {
            Indexer::Leaf(list) => {
                pool.remove(entry)?;
                Ok(pool.is_empty(*list))
            }
            Indexer::Equals(map) => {
                let child = map.get_mut(&keys[0]).ok_or_else(|| {
                    NetworkError::StaleHandle(format!("no index bucket for key {:?}", keys[0]))
                })?;
                if child.remove(&levels[1..], &keys[1..], entry, pool)? {
                    if let Some(child) = map.remove(&keys[0]) {
                        child.release(pool)?;
                    }
                }
                Ok(map.is_empty())
            }
            Indexer::Comparison(_, map) => {
                let child = map.get_mut(&keys[0]).ok_or_else(|| {
                    NetworkError::StaleHandle(format!("no index bucket for key {:?}", keys[0]))
                })?;
                if child.remove(&levels[1..], &keys[1..], entry, pool)? {
                    if let Some(child) = map.remove(&keys[0]) {
                        child.release(pool)?;
                    }
                }
                Ok(map.is_empty())
            }
        }
    }

    /// Returns this (empty) indexer's bucket lists to the pool.
    fn release<T>(self, pool: &mut ListPool<T>) -> Result<()> {
        match self {
            Indexer::Leaf(list) => pool.drop_list(list),
            Indexer::Equals(map) => {
                for (_, child) in map {
                    child.release(pool)?;
                }
                Ok(())
            }
            Indexer::Comparison(_, map) => {
                for (_, child) in map {
                    child.release(pool)?;
                }
                Ok(())
            }
        }
    }

    /// Visits every stored value matching the query keys.
    pub fn for_each<T: Copy, F: FnMut(T)>(
        &self,
        query: &[KeyValue],
        pool: &ListPool<T>,
        f: &mut F,
    ) {
        match self {
            Indexer::Leaf(list) => pool.for_each(*list, |v| f(*v)),
            Indexer::Equals(map) => {
                if let Some(child) = map.get(&query[0]) {
                    child.for_each(&query[1..], pool, f);
                }
            }
            Indexer::Comparison(jt, map) => {
                for child in comparison_range(*jt, map, &query[0]) {
                    child.for_each(&query[1..], pool, f);
                }
            }
        }
    }

    /// Number of stored values matching the query keys.
    pub fn count<T>(&self, query: &[KeyValue], pool: &ListPool<T>) -> usize {
        match self {
            Indexer::Leaf(list) => pool.len(*list),
            Indexer::Equals(map) => map
                .get(&query[0])
                .map_or(0, |child| child.count(&query[1..], pool)),
            Indexer::Comparison(jt, map) => comparison_range(*jt, map, &query[0])
                .map(|child| child.count(&query[1..], pool))
                .sum(),
        }
    }
}

fn comparison_range<'a>(
    jt: JoinerType,
    map: &'a BTreeMap<KeyValue, Indexer>,
    query: &KeyValue,
) -> impl Iterator<Item = &'a Indexer> {
    let bounds: (Bound<&KeyValue>, Bound<&KeyValue>) = match jt {
        JoinerType::LessThan => (Bound::Unbounded, Bound::Excluded(query)),
        JoinerType::LessThanOrEqual => (Bound::Unbounded, Bound::Included(query)),
        JoinerType::GreaterThan => (Bound::Excluded(query), Bound::Unbounded),
        JoinerType::GreaterThanOrEqual => (Bound::Included(query), Bound::Unbounded),
        // Equality never reaches a comparison level.
        JoinerType::Equal => (Bound::Included(query), Bound::Included(query)),
    };
    map.range::<KeyValue, _>(bounds).map(|(_, child)| child)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::joiner::equal;
    use smallvec::smallvec;

    fn keys(values: &[i64]) -> IndexKeys {
        values.iter().map(|v| KeyValue::Int(*v)).collect()
    }

    fn collect(indexer: &Indexer, query: &IndexKeys, pool: &ListPool<u32>) -> Vec<u32> {
        let mut out = Vec::new();
        indexer.for_each(query, pool, &mut |v| out.push(v));
        out.sort_unstable();
        out
    }

    #[test]
    fn test_unindexed_single_bucket() {
        let mut pool = ListPool::new();
        let levels: Vec<IndexLevel> = Vec::new();
        let mut indexer = Indexer::new(&levels, &mut pool);
        let empty: IndexKeys = smallvec![];
        indexer.put(&levels, &empty, 1u32, &mut pool);
        indexer.put(&levels, &empty, 2u32, &mut pool);
        assert_eq!(collect(&indexer, &empty, &pool), vec![1, 2]);
        assert_eq!(indexer.count(&empty, &pool), 2);
    }

    #[test]
    fn test_unindexed_bucket_survives_emptying() {
        let mut pool = ListPool::new();
        let levels: Vec<IndexLevel> = Vec::new();
        let mut indexer = Indexer::new(&levels, &mut pool);
        let empty: IndexKeys = smallvec![];
        let entry = indexer.put(&levels, &empty, 1u32, &mut pool);
        assert!(indexer.remove(&levels, &empty, entry, &mut pool).unwrap());
        // The root bucket stays usable after its last entry leaves.
        indexer.put(&levels, &empty, 2u32, &mut pool);
        assert_eq!(collect(&indexer, &empty, &pool), vec![2]);
    }

    #[test]
    fn test_equals_level_put_remove_prune() {
        let mut pool = ListPool::new();
        let levels = vec![IndexLevel::Equals];
        let mut indexer = Indexer::new(&levels, &mut pool);
        let e1 = indexer.put(&levels, &keys(&[1]), 10u32, &mut pool);
        indexer.put(&levels, &keys(&[1]), 11u32, &mut pool);
        let e2 = indexer.put(&levels, &keys(&[2]), 20u32, &mut pool);
        assert_eq!(collect(&indexer, &keys(&[1]), &pool), vec![10, 11]);
        assert_eq!(indexer.count(&keys(&[2]), &pool), 1);

        assert!(!indexer.remove(&levels, &keys(&[1]), e1, &mut pool).unwrap());
        assert_eq!(collect(&indexer, &keys(&[1]), &pool), vec![11]);
        // Removing the last key-2 value prunes its bucket.
        assert!(!indexer.remove(&levels, &keys(&[2]), e2, &mut pool).unwrap());
        assert_eq!(indexer.count(&keys(&[2]), &pool), 0);
        match &indexer {
            Indexer::Equals(map) => assert!(!map.contains_key(&KeyValue::Int(2))),
            _ => unreachable!(),
        }
    }

    #[test]
    fn test_comparison_level_range_visits() {
        let mut pool = ListPool::new();
        let levels = vec![IndexLevel::Comparison(JoinerType::LessThan)];
        let mut indexer = Indexer::new(&levels, &mut pool);
        indexer.put(&levels, &keys(&[1]), 1u32, &mut pool);
        indexer.put(&levels, &keys(&[5]), 5u32, &mut pool);
        indexer.put(&levels, &keys(&[9]), 9u32, &mut pool);
        // stored < query
        assert_eq!(collect(&indexer, &keys(&[6]), &pool), vec![1, 5]);
        assert_eq!(collect(&indexer, &keys(&[1]), &pool), Vec::<u32>::new());
        assert_eq!(indexer.count(&keys(&[100]), &pool), 3);
    }

    #[test]
    fn test_chained_equals_then_comparison() {
        let mut pool = ListPool::new();
        let levels = vec![
            IndexLevel::Equals,
            IndexLevel::Comparison(JoinerType::GreaterThanOrEqual),
        ];
        let mut indexer = Indexer::new(&levels, &mut pool);
        indexer.put(&levels, &keys(&[1, 10]), 110u32, &mut pool);
        indexer.put(&levels, &keys(&[1, 20]), 120u32, &mut pool);
        indexer.put(&levels, &keys(&[2, 30]), 230u32, &mut pool);
        // Same hash bucket, stored >= query.
        assert_eq!(collect(&indexer, &keys(&[1, 15]), &pool), vec![120]);
        assert_eq!(collect(&indexer, &keys(&[2, 15]), &pool), vec![230]);
        assert_eq!(collect(&indexer, &keys(&[3, 0]), &pool), Vec::<u32>::new());
    }

    #[test]
    fn test_plan_merges_consecutive_equals() {
        let joiners = vec![
            equal(|t: &Tuple| *t.fact::<i64>(0), |t: &Tuple| *t.fact::<i64>(0)),
            equal(|t: &Tuple| *t.fact::<i64>(0), |t: &Tuple| *t.fact::<i64>(0)),
            crate::joiner::less_than(|t: &Tuple| *t.fact::<i64>(0), |t: &Tuple| *t.fact::<i64>(0)),
        ];
        let (plan, filter) = IndexPlan::of(joiners);
        assert!(filter.is_none());
        assert_eq!(
            plan.levels,
            vec![
                IndexLevel::Equals,
                IndexLevel::Comparison(JoinerType::LessThan)
            ]
        );
        assert_eq!(plan.left.len(), 2);
        assert_eq!(
            plan.inverted_levels(),
            vec![
                IndexLevel::Equals,
                IndexLevel::Comparison(JoinerType::GreaterThan)
            ]
        );
    }
}
