use thiserror::Error;
use uuid::Uuid;

/// Lifecycle core errors.
///
/// Retry guidance: [`LifecycleError::ConcurrentModification`] is transient and
/// safe to retry from a fresh read, since validation is side-effect-free until
/// commit. Every other variant is a hard rejection; the call left the
/// candidate and its audit trail untouched.
#[derive(Debug, Error)]
pub enum LifecycleError {
    #[error("Candidate {0} not found")]
    NotFound(Uuid),

    /// Business-rule rejection from the transition validator, with the
    /// human-readable denial reason.
    #[error("Invalid transition: {0}")]
    InvalidTransition(String),

    /// A non-elevated actor attempted to change protected fields. The whole
    /// update is rejected; no field was applied.
    #[error("Protected field modification denied: {}", fields.join(", "))]
    ProtectedFieldViolation { fields: Vec<String> },

    /// The commit-time invariant layer fired. This means a bug or a bypass
    /// attempt upstream of the store, never normal flow.
    #[error("Commit-time constraint violation: {0}")]
    ConstraintViolation(String),

    #[error("Candidate {0} was modified concurrently; retry from a fresh read")]
    ConcurrentModification(Uuid),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}
