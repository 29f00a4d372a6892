//! Fail-fast contract violations and validation errors.

use std::sync::Arc;

use flowscore_core::SimpleScore;
use flowscore_network::{NetworkError, NetworkFactory, Session, Tuple};
use flowscore_test::{Employee, Shift};

fn plain_session() -> Session<SimpleScore> {
    let mut factory = NetworkFactory::<SimpleScore>::new();
    let shifts = factory.for_each::<Shift>();
    factory.penalize(shifts, "Any shift", |_| SimpleScore::ONE);
    Session::new(Arc::new(factory.build())).unwrap()
}

#[test]
fn test_double_insert_fails_fast() {
    let mut session = plain_session();
    let shift = Shift::unassigned(1, 0, 8, "nurse");
    session.insert(shift.clone().handle()).unwrap();
    let err = session.insert(shift.handle()).unwrap_err();
    assert!(matches!(err, NetworkError::ContractViolation { .. }));
    assert!(err.to_string().contains("already inserted"));
}

#[test]
fn test_retract_of_unknown_fact_fails_fast() {
    let mut session = plain_session();
    let err = session
        .retract(Shift::unassigned(1, 0, 8, "nurse").handle())
        .unwrap_err();
    assert!(matches!(err, NetworkError::ContractViolation { .. }));
    assert!(err.to_string().contains("never inserted"));
}

#[test]
fn test_update_of_unknown_fact_fails_fast() {
    let mut session = plain_session();
    let err = session
        .update(Shift::unassigned(1, 0, 8, "nurse").handle())
        .unwrap_err();
    assert!(matches!(err, NetworkError::ContractViolation { .. }));
}

#[test]
fn test_unknown_fact_type_is_rejected() {
    let mut session = plain_session();
    let err = session.insert(Employee::new(1, "nurse").handle()).unwrap_err();
    assert!(matches!(err, NetworkError::UnknownFactType { .. }));
}

#[test]
fn test_negative_weight_names_the_constraint() {
    let mut factory = NetworkFactory::<SimpleScore>::new();
    let shifts = factory.for_each::<Shift>();
    factory.penalize(shifts, "Broken weigher", |t: &Tuple| {
        SimpleScore::of(-t.fact::<Shift>(0).duration())
    });
    let mut session = Session::new(Arc::new(factory.build())).unwrap();

    let err = session
        .insert(Shift::unassigned(1, 0, 8, "nurse").handle())
        .unwrap_err();
    match err {
        NetworkError::WeightSignViolation { constraint, .. } => {
            assert_eq!(constraint, "Broken weigher");
        }
        other => panic!("expected a weight sign violation, got {other}"),
    }
}

#[test]
fn test_filtered_source_tolerates_unknown_retract() {
    // A filtered source cannot distinguish "never inserted" from
    // "filtered out at insert time", so it stays silent.
    let mut factory = NetworkFactory::<SimpleScore>::new();
    let shifts = factory.for_each_filtered::<Shift, _>(|s| s.employee_id.is_some());
    factory.penalize(shifts, "Assigned", |_| SimpleScore::ONE);
    let mut session = Session::new(Arc::new(factory.build())).unwrap();

    let unassigned = Shift::unassigned(1, 0, 8, "nurse");
    session.insert(unassigned.clone().handle()).unwrap();
    assert_eq!(session.score(), SimpleScore::ZERO);
    session.retract(unassigned.handle()).unwrap();
    assert_eq!(session.score(), SimpleScore::ZERO);
}

#[test]
fn test_build_rejects_wide_joins() {
    let mut factory = NetworkFactory::<SimpleScore>::new();
    let a = factory.for_each::<Shift>();
    let b = factory.for_each::<Shift>();
    let c = factory.for_each::<Shift>();
    let d = factory.for_each::<Shift>();
    let e = factory.for_each::<Shift>();
    let ab = factory.join(a, b, vec![]).unwrap();
    let abc = factory.join(ab, c, vec![]).unwrap();
    let abcd = factory.join(abc, d, vec![]).unwrap();
    // Arity 5 exceeds the supported maximum of 4.
    assert!(matches!(
        factory.join(abcd, e, vec![]),
        Err(NetworkError::Build(_))
    ));
}

#[test]
fn test_build_rejects_wide_right_streams() {
    let mut factory = NetworkFactory::<SimpleScore>::new();
    let a = factory.for_each::<Shift>();
    let b = factory.for_each::<Shift>();
    let c = factory.for_each::<Shift>();
    let ab = factory.join(a, b, vec![]).unwrap();
    assert!(matches!(
        factory.join(c, ab, vec![]),
        Err(NetworkError::Build(_))
    ));
}
