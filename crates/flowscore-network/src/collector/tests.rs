use std::rc::Rc;

use smallvec::smallvec;

use crate::fact::FactHandle;
use crate::key::KeyValue;
use crate::tuple::TupleArena;

use super::*;

fn arena_with(values: &[i64]) -> (TupleArena, Vec<crate::tuple::TupleId>) {
    let mut arena = TupleArena::new();
    let ids = values
        .iter()
        .map(|v| arena.create(smallvec![Rc::new(*v) as FactHandle], 0))
        .collect();
    (arena, ids)
}

#[test]
fn test_count_accumulate_retract() {
    let collector = count();
    let mut acc = collector.create_accumulator();
    let (arena, ids) = arena_with(&[1, 2, 3]);
    let undos: Vec<KeyValue> = ids
        .iter()
        .map(|id| acc.accumulate(arena.get(*id).unwrap()))
        .collect();
    assert_eq!(acc.result(), KeyValue::Int(3));
    acc.retract(&undos[1]).unwrap();
    assert_eq!(acc.result(), KeyValue::Int(2));
}

#[test]
fn test_count_underflow_is_reported() {
    let collector = count();
    let mut acc = collector.create_accumulator();
    assert_eq!(acc.retract(&KeyValue::None), Err(CollectorError::Underflow));
}

#[test]
fn test_sum_undoes_the_original_value() {
    let collector = sum(|t| *t.fact::<i64>(0));
    let mut acc = collector.create_accumulator();
    let (arena, ids) = arena_with(&[5, 7]);
    let undo = acc.accumulate(arena.get(ids[0]).unwrap());
    acc.accumulate(arena.get(ids[1]).unwrap());
    assert_eq!(acc.result(), KeyValue::Int(12));
    // The cached undo keeps the sum correct even if the fact changed.
    acc.retract(&undo).unwrap();
    assert_eq!(acc.result(), KeyValue::Int(7));
}

#[test]
fn test_min_max_without_retract_support() {
    let min_collector = min(|t: &crate::tuple::Tuple| *t.fact::<i64>(0));
    let max_collector = max(|t: &crate::tuple::Tuple| *t.fact::<i64>(0));
    assert!(!min_collector.supports_retract());
    assert!(!max_collector.supports_retract());

    let (arena, ids) = arena_with(&[4, 1, 9]);
    let mut lo = min_collector.create_accumulator();
    let mut hi = max_collector.create_accumulator();
    for id in &ids {
        lo.accumulate(arena.get(*id).unwrap());
        hi.accumulate(arena.get(*id).unwrap());
    }
    assert_eq!(lo.result(), KeyValue::Int(1));
    assert_eq!(hi.result(), KeyValue::Int(9));
    assert_eq!(
        lo.retract(&KeyValue::Int(1)),
        Err(CollectorError::RetractUnsupported)
    );

    // Recompute path: reset then refold the remaining members.
    lo.reset();
    lo.accumulate(arena.get(ids[0]).unwrap());
    lo.accumulate(arena.get(ids[2]).unwrap());
    assert_eq!(lo.result(), KeyValue::Int(4));
}

#[test]
fn test_empty_extremum_is_none() {
    let collector = min(|t: &crate::tuple::Tuple| *t.fact::<i64>(0));
    let acc = collector.create_accumulator();
    assert_eq!(acc.result(), KeyValue::None);
}
