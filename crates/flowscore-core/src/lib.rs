//! FlowScore Core - score types and constraint identity
//!
//! This crate provides the value types shared by the incremental
//! evaluation network and its callers:
//! - Score types for representing solution quality
//! - Constraint identity (`ConstraintRef`) and polarity (`ImpactType`)

pub mod constraint;
pub mod error;
pub mod score;

pub use constraint::{ConstraintRef, ImpactType};
pub use error::CoreError;
pub use score::{HardSoftScore, Score, SimpleScore};
