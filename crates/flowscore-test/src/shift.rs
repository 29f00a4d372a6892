//! Rostering fixtures.
//!
//! A shift is assigned to at most one employee; unassigned shifts carry
//! `employee_id == None` and are excluded at the source by the fixtures'
//! constraints (via `for_each_filtered`), so join predicates never see
//! them.

use std::any::Any;
use std::rc::Rc;

use flowscore_network::{Fact, FactHandle, FactId};

/// An employee available for shifts.
#[derive(Debug, Clone, PartialEq)]
pub struct Employee {
    pub id: i64,
    pub skill: String,
}

impl Employee {
    pub fn new(id: i64, skill: impl Into<String>) -> Self {
        Employee {
            id,
            skill: skill.into(),
        }
    }

    pub fn handle(self) -> FactHandle {
        Rc::new(self)
    }
}

impl Fact for Employee {
    fn fact_id(&self) -> FactId {
        self.id
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// A shift with a time window, a required skill, and an optional assignee.
#[derive(Debug, Clone, PartialEq)]
pub struct Shift {
    pub id: i64,
    pub employee_id: Option<i64>,
    pub start: i64,
    pub end: i64,
    pub required_skill: String,
}

impl Shift {
    pub fn assigned(
        id: i64,
        employee_id: i64,
        start: i64,
        end: i64,
        required_skill: impl Into<String>,
    ) -> Self {
        Shift {
            id,
            employee_id: Some(employee_id),
            start,
            end,
            required_skill: required_skill.into(),
        }
    }

    pub fn unassigned(id: i64, start: i64, end: i64, required_skill: impl Into<String>) -> Self {
        Shift {
            id,
            employee_id: None,
            start,
            end,
            required_skill: required_skill.into(),
        }
    }

    /// Length of the shift's time window.
    pub fn duration(&self) -> i64 {
        self.end - self.start
    }

    /// True when the two time windows intersect.
    pub fn overlaps(&self, other: &Shift) -> bool {
        self.start < other.end && other.start < self.end
    }

    pub fn handle(self) -> FactHandle {
        Rc::new(self)
    }
}

impl Fact for Shift {
    fn fact_id(&self) -> FactId {
        self.id
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_overlap_is_symmetric_and_exclusive_of_touching() {
        let a = Shift::assigned(1, 1, 0, 8, "nurse");
        let b = Shift::assigned(2, 1, 4, 12, "nurse");
        let c = Shift::assigned(3, 1, 8, 16, "nurse");
        assert!(a.overlaps(&b));
        assert!(b.overlaps(&a));
        // Back-to-back shifts do not overlap.
        assert!(!a.overlaps(&c));
    }

    #[test]
    fn test_fact_identity_is_the_domain_id() {
        assert_eq!(Shift::unassigned(9, 0, 8, "chef").fact_id(), 9);
        assert_eq!(Employee::new(4, "chef").fact_id(), 4);
    }
}
