//! Existence-node behavior: boundary transitions, polarity, filtering
//! predicates.

use std::sync::Arc;

use flowscore_core::SimpleScore;
use flowscore_network::joiner::{equal, filtering};
use flowscore_network::{NetworkFactory, Session, Tuple};
use flowscore_test::{Employee, Shift};

fn exists_session(should_exist: bool) -> Session<SimpleScore> {
    let mut factory = NetworkFactory::<SimpleScore>::new();
    let employees = factory.for_each::<Employee>();
    let shifts = factory.for_each_filtered::<Shift, _>(|s| s.employee_id.is_some());
    let joiners = vec![equal(
        |t: &Tuple| t.fact::<Employee>(0).id,
        |t: &Tuple| t.fact::<Shift>(0).employee_id,
    )];
    let gated = if should_exist {
        factory.if_exists(employees, shifts, joiners).unwrap()
    } else {
        factory.if_not_exists(employees, shifts, joiners).unwrap()
    };
    let name = if should_exist { "Busy" } else { "Idle" };
    factory.penalize(gated, name, |_| SimpleScore::ONE);
    Session::new(Arc::new(factory.build())).unwrap()
}

#[test]
fn test_first_match_forwards_exactly_once() {
    let mut session = exists_session(true);
    session.insert(Employee::new(1, "nurse").handle()).unwrap();
    assert_eq!(session.score(), SimpleScore::ZERO);

    session
        .insert(Shift::assigned(10, 1, 0, 8, "nurse").handle())
        .unwrap();
    assert_eq!(session.score(), SimpleScore::of(-1));
    assert_eq!(session.stats().match_count, 1);

    // Further matches only bump the counter.
    session
        .insert(Shift::assigned(11, 1, 8, 16, "nurse").handle())
        .unwrap();
    assert_eq!(session.score(), SimpleScore::of(-1));
    assert_eq!(session.stats().match_count, 1);
}

#[test]
fn test_retracting_to_zero_forwards_exactly_one_retract() {
    let mut session = exists_session(true);
    session.insert(Employee::new(1, "nurse").handle()).unwrap();
    let s1 = Shift::assigned(10, 1, 0, 8, "nurse");
    let s2 = Shift::assigned(11, 1, 8, 16, "nurse");
    session.insert(s1.clone().handle()).unwrap();
    session.insert(s2.clone().handle()).unwrap();
    assert_eq!(session.score(), SimpleScore::of(-1));

    session.retract(s1.handle()).unwrap();
    // Still one match left.
    assert_eq!(session.score(), SimpleScore::of(-1));
    session.retract(s2.handle()).unwrap();
    assert_eq!(session.score(), SimpleScore::ZERO);
    assert_eq!(session.stats().match_count, 0);
}

#[test]
fn test_if_not_exists_inverts_the_boundary() {
    let mut session = exists_session(false);
    session.insert(Employee::new(1, "nurse").handle()).unwrap();
    session.insert(Employee::new(2, "nurse").handle()).unwrap();
    // Both employees are idle.
    assert_eq!(session.score(), SimpleScore::of(-2));

    session
        .insert(Shift::assigned(10, 1, 0, 8, "nurse").handle())
        .unwrap();
    assert_eq!(session.score(), SimpleScore::of(-1));

    session
        .retract(Shift::assigned(10, 1, 0, 8, "nurse").handle())
        .unwrap();
    assert_eq!(session.score(), SimpleScore::of(-2));
}

#[test]
fn test_unassignment_via_source_filter_updates_the_counter() {
    let mut session = exists_session(true);
    session.insert(Employee::new(1, "nurse").handle()).unwrap();
    session
        .insert(Shift::assigned(10, 1, 0, 8, "nurse").handle())
        .unwrap();
    assert_eq!(session.score(), SimpleScore::of(-1));

    // Unassigning drops the shift at the source, not just at the node.
    session
        .update(Shift::unassigned(10, 0, 8, "nurse").handle())
        .unwrap();
    assert_eq!(session.score(), SimpleScore::ZERO);

    session
        .update(Shift::assigned(10, 1, 0, 8, "nurse").handle())
        .unwrap();
    assert_eq!(session.score(), SimpleScore::of(-1));
}

#[test]
fn test_filtered_existence_counts_only_passing_pairs() {
    // An employee is "covered" only by a shift requiring their own skill.
    let mut factory = NetworkFactory::<SimpleScore>::new();
    let employees = factory.for_each::<Employee>();
    let shifts = factory.for_each_filtered::<Shift, _>(|s| s.employee_id.is_some());
    let covered = factory
        .if_exists(
            employees,
            shifts,
            vec![
                equal(
                    |t: &Tuple| t.fact::<Employee>(0).id,
                    |t: &Tuple| t.fact::<Shift>(0).employee_id,
                ),
                filtering(|l: &Tuple, r: &Tuple| {
                    l.fact::<Employee>(0).skill == r.fact::<Shift>(0).required_skill
                }),
            ],
        )
        .unwrap();
    factory.reward(covered, "Right skill", |_| SimpleScore::ONE);
    let mut session = Session::new(Arc::new(factory.build())).unwrap();

    session.insert(Employee::new(1, "nurse").handle()).unwrap();
    // Key matches but the filter fails: no transition.
    session
        .insert(Shift::assigned(10, 1, 0, 8, "chef").handle())
        .unwrap();
    assert_eq!(session.score(), SimpleScore::ZERO);

    session
        .insert(Shift::assigned(11, 1, 8, 16, "nurse").handle())
        .unwrap();
    assert_eq!(session.score(), SimpleScore::of(1));

    // Changing the required skill flips the pair's filter result.
    session
        .update(Shift::assigned(11, 1, 8, 16, "chef").handle())
        .unwrap();
    assert_eq!(session.score(), SimpleScore::ZERO);

    session
        .update(Shift::assigned(10, 1, 0, 8, "nurse").handle())
        .unwrap();
    assert_eq!(session.score(), SimpleScore::of(1));
}
