//! Error types for the evaluation network.

use thiserror::Error;

/// Main error type for network operations.
///
/// Contract violations indicate a bug in the caller (unpaired lifecycle
/// calls) or in the wiring; they are surfaced eagerly instead of letting
/// the graph silently corrupt its bookkeeping.
#[derive(Debug, Error)]
pub enum NetworkError {
    /// A lifecycle call broke the insert/update/retract pairing contract.
    #[error("contract violation at node {node}: {message}")]
    ContractViolation { node: usize, message: String },

    /// A generation-checked handle no longer points at a live element.
    #[error("stale handle: {0}")]
    StaleHandle(String),

    /// A collector was driven outside its declared semantics.
    #[error("collector misuse in {constraint}: {message}")]
    CollectorMisuse { constraint: String, message: String },

    /// A match weight had the wrong sign for its constraint's impact type.
    #[error("constraint {constraint} produced a negative match weight ({weight}); \
             weights must be non-negative, flip the impact type instead")]
    WeightSignViolation { constraint: String, weight: String },

    /// A fact type with no source node in the network.
    #[error("no source node accepts the fact {fact}")]
    UnknownFactType { fact: String },

    /// Invalid graph construction.
    #[error("network build error: {0}")]
    Build(String),
}

impl NetworkError {
    pub(crate) fn contract(node: usize, message: impl Into<String>) -> Self {
        NetworkError::ContractViolation {
            node,
            message: message.into(),
        }
    }
}

/// Result type alias for network operations.
pub type Result<T> = std::result::Result<T, NetworkError>;
