//! Error types for FlowScore core

use thiserror::Error;

/// Main error type for score and constraint-identity operations
#[derive(Debug, Error)]
pub enum CoreError {
    /// Error in constraint definition
    #[error("Constraint definition error: {0}")]
    ConstraintDefinition(String),

    /// Error parsing or combining score values
    #[error("Score error: {0}")]
    Score(String),
}

/// Result type alias for FlowScore core operations
pub type Result<T> = std::result::Result<T, CoreError>;
