//! Group-node behavior: accumulation, undo, key moves, group collapse and
//! the recompute fallback for collectors without retract support.

use std::sync::Arc;

use flowscore_core::SimpleScore;
use flowscore_network::collector::{count, max, min, sum};
use flowscore_network::{KeyValue, NetworkFactory, Session, Tuple};
use flowscore_test::Shift;

fn count_per_employee() -> Session<SimpleScore> {
    let mut factory = NetworkFactory::<SimpleScore>::new();
    let shifts = factory.for_each_filtered::<Shift, _>(|s| s.employee_id.is_some());
    let per_employee = factory
        .group_by(
            shifts,
            |t: &Tuple| t.fact::<Shift>(0).employee_id,
            vec![Arc::new(count())],
        )
        .unwrap();
    factory.penalize(per_employee, "Workload", |t: &Tuple| {
        let count = t.fact::<KeyValue>(1).as_int().unwrap_or(0);
        SimpleScore::of(count * count)
    });
    Session::new(Arc::new(factory.build())).unwrap()
}

#[test]
fn test_count_collector_tracks_members() {
    let mut session = count_per_employee();
    for id in 1..=3 {
        session
            .insert(Shift::assigned(id, 7, id * 8, id * 8 + 8, "nurse").handle())
            .unwrap();
    }
    // One group of three members, penalty 9.
    assert_eq!(session.score(), SimpleScore::of(-9));
    assert_eq!(session.stats().match_count, 1);

    session
        .retract(Shift::assigned(2, 7, 16, 24, "nurse").handle())
        .unwrap();
    // Same group, now (7, 2).
    assert_eq!(session.score(), SimpleScore::of(-4));
    assert_eq!(session.stats().match_count, 1);
}

#[test]
fn test_group_collapse_leaves_nothing_behind() {
    let mut session = count_per_employee();
    let shifts: Vec<Shift> = (1..=3)
        .map(|id| Shift::assigned(id, 7, 0, 8, "nurse"))
        .collect();
    for shift in &shifts {
        session.insert(shift.clone().handle()).unwrap();
    }
    assert_eq!(session.score(), SimpleScore::of(-9));

    for shift in &shifts {
        session.retract(shift.clone().handle()).unwrap();
    }
    assert_eq!(session.score(), SimpleScore::ZERO);
    let stats = session.stats();
    assert_eq!(stats.match_count, 0);
    assert_eq!(stats.live_tuples, 0);
}

#[test]
fn test_key_change_moves_the_member_between_groups() {
    let mut session = count_per_employee();
    session
        .insert(Shift::assigned(1, 7, 0, 8, "nurse").handle())
        .unwrap();
    session
        .insert(Shift::assigned(2, 7, 8, 16, "nurse").handle())
        .unwrap();
    // One group of two: -4.
    assert_eq!(session.score(), SimpleScore::of(-4));

    session
        .update(Shift::assigned(2, 8, 8, 16, "nurse").handle())
        .unwrap();
    // Two singleton groups: -2.
    assert_eq!(session.score(), SimpleScore::of(-2));
    assert_eq!(session.stats().match_count, 2);

    session
        .update(Shift::assigned(1, 8, 0, 8, "nurse").handle())
        .unwrap();
    // Back to one group of two, keyed 8.
    assert_eq!(session.score(), SimpleScore::of(-4));
    assert_eq!(session.stats().match_count, 1);
}

#[test]
fn test_sum_collector_follows_value_updates() {
    let mut factory = NetworkFactory::<SimpleScore>::new();
    let shifts = factory.for_each_filtered::<Shift, _>(|s| s.employee_id.is_some());
    let minutes = factory
        .group_by(
            shifts,
            |t: &Tuple| t.fact::<Shift>(0).employee_id,
            vec![Arc::new(sum(|t: &Tuple| t.fact::<Shift>(0).duration()))],
        )
        .unwrap();
    factory.penalize(minutes, "Total hours", |t: &Tuple| {
        SimpleScore::of(t.fact::<KeyValue>(1).as_int().unwrap_or(0))
    });
    let mut session = Session::new(Arc::new(factory.build())).unwrap();

    session
        .insert(Shift::assigned(1, 7, 0, 8, "nurse").handle())
        .unwrap();
    session
        .insert(Shift::assigned(2, 7, 8, 20, "nurse").handle())
        .unwrap();
    assert_eq!(session.score(), SimpleScore::of(-20));

    // The undo value is the extracted duration at insert time, so this
    // update must swap 12 for 4.
    session
        .update(Shift::assigned(2, 7, 8, 12, "nurse").handle())
        .unwrap();
    assert_eq!(session.score(), SimpleScore::of(-12));
}

#[test]
fn test_min_max_recompute_from_members_on_retract() {
    let mut factory = NetworkFactory::<SimpleScore>::new();
    let shifts = factory.for_each::<Shift>();
    let window = factory
        .group_all(
            shifts,
            vec![
                Arc::new(min(|t: &Tuple| t.fact::<Shift>(0).start)),
                Arc::new(max(|t: &Tuple| t.fact::<Shift>(0).end)),
            ],
        )
        .unwrap();
    factory.penalize(window, "Makespan", |t: &Tuple| {
        let earliest = t.fact::<KeyValue>(0).as_int().unwrap_or(0);
        let latest = t.fact::<KeyValue>(1).as_int().unwrap_or(0);
        SimpleScore::of(latest - earliest)
    });
    let mut session = Session::new(Arc::new(factory.build())).unwrap();

    session
        .insert(Shift::unassigned(1, 0, 8, "nurse").handle())
        .unwrap();
    session
        .insert(Shift::unassigned(2, 6, 30, "nurse").handle())
        .unwrap();
    session
        .insert(Shift::unassigned(3, 10, 18, "nurse").handle())
        .unwrap();
    assert_eq!(session.score(), SimpleScore::of(-30));

    // Removing the extremum forces the O(group size) rebuild.
    session
        .retract(Shift::unassigned(2, 6, 30, "nurse").handle())
        .unwrap();
    assert_eq!(session.score(), SimpleScore::of(-18));

    session
        .retract(Shift::unassigned(1, 0, 8, "nurse").handle())
        .unwrap();
    assert_eq!(session.score(), SimpleScore::of(-8));

    session
        .retract(Shift::unassigned(3, 10, 18, "nurse").handle())
        .unwrap();
    assert_eq!(session.score(), SimpleScore::ZERO);
    assert_eq!(session.stats().live_tuples, 0);
}

#[test]
fn test_multiple_collectors_share_one_group() {
    let mut factory = NetworkFactory::<SimpleScore>::new();
    let shifts = factory.for_each_filtered::<Shift, _>(|s| s.employee_id.is_some());
    let per_employee = factory
        .group_by(
            shifts,
            |t: &Tuple| t.fact::<Shift>(0).employee_id,
            vec![
                Arc::new(count()),
                Arc::new(sum(|t: &Tuple| t.fact::<Shift>(0).duration())),
            ],
        )
        .unwrap();
    // (key, count, total duration)
    factory.penalize(per_employee, "Load", |t: &Tuple| {
        let count = t.fact::<KeyValue>(1).as_int().unwrap_or(0);
        let total = t.fact::<KeyValue>(2).as_int().unwrap_or(0);
        SimpleScore::of(count + total)
    });
    let mut session = Session::new(Arc::new(factory.build())).unwrap();

    session
        .insert(Shift::assigned(1, 7, 0, 8, "nurse").handle())
        .unwrap();
    session
        .insert(Shift::assigned(2, 7, 8, 16, "nurse").handle())
        .unwrap();
    // count 2 + duration 16.
    assert_eq!(session.score(), SimpleScore::of(-18));
}
