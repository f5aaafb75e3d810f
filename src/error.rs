//! Error types for a3s-quarantine

use crate::types::LockStatus;
use thiserror::Error;

/// Errors that can occur in the quarantine coordinator
#[derive(Debug, Error)]
pub enum QuarantineError {
    /// A call into the host platform (contexts, surfaces, settings) failed
    #[error("Host platform error: {0}")]
    Host(String),

    /// The context is not managed by this coordinator
    #[error("Context not managed: {0}")]
    NotManaged(String),

    /// Requested lock status transition is not reachable
    #[error("Invalid transition for context '{context_id}': {from} -> {to}")]
    InvalidTransition {
        context_id: String,
        from: LockStatus,
        to: LockStatus,
    },

    /// The guarded setting is locked or owned by another actor
    #[error("Global guard unavailable: {0}")]
    GuardUnavailable(String),

    /// The user-facing surface is not attached or stopped listening
    #[error("Surface peer unavailable")]
    PeerUnavailable,

    /// Serialization/deserialization failure
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Durable flag could not be read or written
    #[error("Persistence error: {0}")]
    Persistence(String),

    /// Internal state lock was poisoned by a panicking holder
    #[error("Coordinator state lock poisoned")]
    StatePoisoned,

    /// Internal bookkeeping disagrees with the host platform
    #[error("Internal inconsistency: {0}")]
    Inconsistency(String),
}

/// Result type alias for quarantine operations
pub type Result<T> = std::result::Result<T, QuarantineError>;
