//! Filter, map, flatten, concat and precompute behavior.

use std::rc::Rc;
use std::sync::Arc;

use smallvec::smallvec;

use flowscore_core::SimpleScore;
use flowscore_network::{FactHandle, KeyValue, NetworkFactory, Session, Tuple};
use flowscore_test::{Employee, Shift};

#[test]
fn test_filter_handles_all_four_update_transitions() {
    let mut factory = NetworkFactory::<SimpleScore>::new();
    let shifts = factory.for_each::<Shift>();
    let long = factory.filter(shifts, |t: &Tuple| t.fact::<Shift>(0).duration() >= 8);
    factory.penalize(long, "Long shift", |_| SimpleScore::ONE);
    let mut session = Session::new(Arc::new(factory.build())).unwrap();

    session
        .insert(Shift::unassigned(1, 0, 10, "nurse").handle())
        .unwrap();
    assert_eq!(session.score(), SimpleScore::of(-1));

    // passing -> passing
    session
        .update(Shift::unassigned(1, 0, 12, "nurse").handle())
        .unwrap();
    assert_eq!(session.score(), SimpleScore::of(-1));
    // passing -> failing
    session
        .update(Shift::unassigned(1, 0, 4, "nurse").handle())
        .unwrap();
    assert_eq!(session.score(), SimpleScore::ZERO);
    // failing -> failing
    session
        .update(Shift::unassigned(1, 0, 2, "nurse").handle())
        .unwrap();
    assert_eq!(session.score(), SimpleScore::ZERO);
    // failing -> passing
    session
        .update(Shift::unassigned(1, 0, 9, "nurse").handle())
        .unwrap();
    assert_eq!(session.score(), SimpleScore::of(-1));

    session
        .retract(Shift::unassigned(1, 0, 9, "nurse").handle())
        .unwrap();
    assert_eq!(session.score(), SimpleScore::ZERO);
    assert_eq!(session.stats().live_tuples, 0);
}

#[test]
fn test_memoized_filter_matches_stateless_behavior() {
    let mut factory = NetworkFactory::<SimpleScore>::new();
    let shifts = factory.for_each::<Shift>();
    let long = factory.filter_memoized(shifts, |t: &Tuple| t.fact::<Shift>(0).duration() >= 8);
    factory.penalize(long, "Long shift", |_| SimpleScore::ONE);
    let mut session = Session::new(Arc::new(factory.build())).unwrap();

    session
        .insert(Shift::unassigned(1, 0, 10, "nurse").handle())
        .unwrap();
    session
        .insert(Shift::unassigned(2, 0, 4, "nurse").handle())
        .unwrap();
    assert_eq!(session.score(), SimpleScore::of(-1));

    session
        .update(Shift::unassigned(2, 0, 8, "nurse").handle())
        .unwrap();
    session
        .update(Shift::unassigned(1, 0, 4, "nurse").handle())
        .unwrap();
    assert_eq!(session.score(), SimpleScore::of(-1));

    session
        .retract(Shift::unassigned(1, 0, 4, "nurse").handle())
        .unwrap();
    session
        .retract(Shift::unassigned(2, 0, 8, "nurse").handle())
        .unwrap();
    assert_eq!(session.score(), SimpleScore::ZERO);
    assert_eq!(session.stats().live_tuples, 0);
}

#[test]
fn test_map_recomputes_derived_facts_on_update() {
    let mut factory = NetworkFactory::<SimpleScore>::new();
    let shifts = factory.for_each::<Shift>();
    // Project each shift to (id, duration).
    let durations = factory
        .map(shifts, 2, |t: &Tuple| {
            let shift = t.fact::<Shift>(0);
            smallvec![
                Rc::new(shift.id) as FactHandle,
                Rc::new(shift.duration()) as FactHandle,
            ]
        })
        .unwrap();
    factory.penalize(durations, "Minutes", |t: &Tuple| {
        SimpleScore::of(*t.fact::<i64>(1))
    });
    let mut session = Session::new(Arc::new(factory.build())).unwrap();

    session
        .insert(Shift::unassigned(1, 0, 10, "nurse").handle())
        .unwrap();
    assert_eq!(session.score(), SimpleScore::of(-10));
    assert_eq!(session.stats().match_count, 1);

    session
        .update(Shift::unassigned(1, 0, 6, "nurse").handle())
        .unwrap();
    // Same output tuple, new derived value.
    assert_eq!(session.score(), SimpleScore::of(-6));
    assert_eq!(session.stats().match_count, 1);

    session
        .retract(Shift::unassigned(1, 0, 6, "nurse").handle())
        .unwrap();
    assert_eq!(session.stats().live_tuples, 0);
}

#[test]
fn test_flatten_retracts_stale_expansions_on_update() {
    // Expand each shift into one value per hour it covers.
    let mut factory = NetworkFactory::<SimpleScore>::new();
    let shifts = factory.for_each::<Shift>();
    let hours = factory.flat_map(shifts, |t: &Tuple| {
        let shift = t.fact::<Shift>(0);
        (shift.start..shift.end)
            .map(|h| Rc::new(h) as FactHandle)
            .collect()
    });
    factory.penalize(hours, "Hour covered", |_| SimpleScore::ONE);
    let mut session = Session::new(Arc::new(factory.build())).unwrap();

    session
        .insert(Shift::unassigned(1, 0, 3, "nurse").handle())
        .unwrap();
    assert_eq!(session.score(), SimpleScore::of(-3));
    assert_eq!(session.stats().match_count, 3);

    session
        .update(Shift::unassigned(1, 0, 5, "nurse").handle())
        .unwrap();
    assert_eq!(session.score(), SimpleScore::of(-5));

    session
        .update(Shift::unassigned(1, 2, 3, "nurse").handle())
        .unwrap();
    assert_eq!(session.score(), SimpleScore::of(-1));

    session
        .retract(Shift::unassigned(1, 2, 3, "nurse").handle())
        .unwrap();
    assert_eq!(session.score(), SimpleScore::ZERO);
    assert_eq!(session.stats().live_tuples, 0);
}

#[test]
fn test_concat_tracks_both_sides_independently() {
    // Employees concatenated with shifts-as-(employee) padding collapse
    // into one arity-1 stream of "staffing signals".
    let mut factory = NetworkFactory::<SimpleScore>::new();
    let employees = factory.for_each::<Employee>();
    let shifts = factory.for_each::<Shift>();
    let merged = factory.concat(employees, shifts, None, None).unwrap();
    factory.penalize(merged, "Anything live", |_| SimpleScore::ONE);
    let mut session = Session::new(Arc::new(factory.build())).unwrap();

    session.insert(Employee::new(1, "nurse").handle()).unwrap();
    session
        .insert(Shift::unassigned(1, 0, 8, "nurse").handle())
        .unwrap();
    // Same fact id on both sides; the sides must not collide.
    assert_eq!(session.score(), SimpleScore::of(-2));

    session.retract(Employee::new(1, "nurse").handle()).unwrap();
    assert_eq!(session.score(), SimpleScore::of(-1));
    session
        .retract(Shift::unassigned(1, 0, 8, "nurse").handle())
        .unwrap();
    assert_eq!(session.score(), SimpleScore::ZERO);
    assert_eq!(session.stats().live_tuples, 0);
}

#[test]
fn test_concat_pads_the_narrower_side() {
    let mut factory = NetworkFactory::<SimpleScore>::new();
    let employees = factory.for_each::<Employee>();
    let shifts = factory.for_each::<Shift>();
    // Shift side becomes (shift, weight); employees are padded with a
    // constant weight.
    let weighted_shifts = factory
        .map(shifts, 2, |t: &Tuple| {
            let shift = t.fact::<Shift>(0);
            smallvec![
                t.fact_handle(0).clone(),
                Rc::new(shift.duration()) as FactHandle,
            ]
        })
        .unwrap();
    let merged = factory
        .concat(
            employees,
            weighted_shifts,
            Some(Arc::new(|_t: &Tuple| smallvec![Rc::new(1i64) as FactHandle])),
            None,
        )
        .unwrap();
    factory.penalize(merged, "Weight", |t: &Tuple| {
        SimpleScore::of(*t.fact::<i64>(1))
    });
    let mut session = Session::new(Arc::new(factory.build())).unwrap();

    session.insert(Employee::new(1, "nurse").handle()).unwrap();
    session
        .insert(Shift::unassigned(2, 0, 8, "nurse").handle())
        .unwrap();
    // Padded employee weight 1 plus shift duration 8.
    assert_eq!(session.score(), SimpleScore::of(-9));
}

#[test]
fn test_precompute_replays_and_refreshes() {
    use std::sync::atomic::{AtomicI64, Ordering};

    let generation = Arc::new(AtomicI64::new(1));
    let supplier_generation = Arc::clone(&generation);

    let mut factory = NetworkFactory::<SimpleScore>::new();
    let table = factory
        .precompute(1, move || {
            // Re-read on every replay.
            let g = supplier_generation.load(Ordering::SeqCst);
            vec![
                smallvec![Rc::new(g) as FactHandle],
                smallvec![Rc::new(g * 10) as FactHandle],
            ]
        })
        .unwrap();
    factory.penalize(table, "Side table", |t: &Tuple| {
        SimpleScore::of(*t.fact::<i64>(0))
    });
    let mut session = Session::new(Arc::new(factory.build())).unwrap();

    // Replayed at session creation: 1 + 10.
    assert_eq!(session.score(), SimpleScore::of(-11));
    assert_eq!(session.stats().match_count, 2);

    generation.store(2, Ordering::SeqCst);
    session.refresh_precomputed().unwrap();
    // Old replay fully retracted: 2 + 20.
    assert_eq!(session.score(), SimpleScore::of(-22));
    assert_eq!(session.stats().match_count, 2);
}

#[test]
fn test_group_key_flows_as_a_fact_downstream() {
    use flowscore_network::collector::count;
    use flowscore_network::joiner::equal;

    // Group shifts per employee, then join the groups back to employees.
    let mut factory = NetworkFactory::<SimpleScore>::new();
    let shifts = factory.for_each_filtered::<Shift, _>(|s| s.employee_id.is_some());
    let employees = factory.for_each::<Employee>();
    let per_employee = factory
        .group_by(
            shifts,
            |t: &Tuple| t.fact::<Shift>(0).employee_id,
            vec![Arc::new(count())],
        )
        .unwrap();
    let with_employee = factory
        .join(
            per_employee,
            employees,
            vec![equal(
                |t: &Tuple| t.fact::<KeyValue>(0).clone(),
                |t: &Tuple| t.fact::<Employee>(0).id,
            )],
        )
        .unwrap();
    factory.penalize(with_employee, "Busy employee", |t: &Tuple| {
        SimpleScore::of(t.fact::<KeyValue>(1).as_int().unwrap_or(0))
    });
    let mut session = Session::new(Arc::new(factory.build())).unwrap();

    session.insert(Employee::new(7, "nurse").handle()).unwrap();
    session
        .insert(Shift::assigned(1, 7, 0, 8, "nurse").handle())
        .unwrap();
    session
        .insert(Shift::assigned(2, 7, 8, 16, "nurse").handle())
        .unwrap();
    assert_eq!(session.score(), SimpleScore::of(-2));

    session
        .retract(Shift::assigned(2, 7, 8, 16, "nurse").handle())
        .unwrap();
    assert_eq!(session.score(), SimpleScore::of(-1));
}
