//! Constraint identity types.
//!
//! A constraint is identified by a `ConstraintRef` and impacts the score
//! with a polarity given by `ImpactType`.

/// Reference to a constraint for identification.
///
/// # Example
///
/// ```
/// use flowscore_core::ConstraintRef;
///
/// let cr = ConstraintRef::new("rostering", "No overlapping shifts");
/// assert_eq!(cr.full_name(), "rostering/No overlapping shifts");
///
/// let simple = ConstraintRef::new("", "Unassigned");
/// assert_eq!(simple.full_name(), "Unassigned");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ConstraintRef {
    /// Package/module containing the constraint.
    pub package: String,
    /// Name of the constraint.
    pub name: String,
}

impl ConstraintRef {
    /// Creates a new constraint reference.
    pub fn new(package: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            package: package.into(),
            name: name.into(),
        }
    }

    /// Returns the fully qualified name.
    pub fn full_name(&self) -> String {
        if self.package.is_empty() {
            self.name.clone()
        } else {
            format!("{}/{}", self.package, self.name)
        }
    }
}

impl std::fmt::Display for ConstraintRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.full_name())
    }
}

/// Type of impact a constraint has on the score.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ImpactType {
    /// Penalize (subtract from score).
    Penalty,
    /// Reward (add to score).
    Reward,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_constraint_ref_full_name() {
        let cr = ConstraintRef::new("rostering", "Skill mismatch");
        assert_eq!(cr.full_name(), "rostering/Skill mismatch");
    }

    #[test]
    fn test_constraint_ref_empty_package() {
        let cr = ConstraintRef::new("", "Unassigned");
        assert_eq!(cr.full_name(), "Unassigned");
        assert_eq!(cr.to_string(), "Unassigned");
    }
}
