//! Candidate lifecycle core.
//!
//! This crate governs the lifecycle of candidate records through a closed set
//! of business states with dual-layer invariant enforcement: a pure transition
//! validator gates every call at the orchestration layer, and the storage
//! layer independently re-validates the same rules at commit time so no write
//! path can route around them. Every accepted transition lands exactly one
//! immutable record on an append-only audit trail, in the same atomic unit as
//! the row update.

#![deny(unsafe_code)]

pub mod error;
pub mod fsm;
pub mod guard;
pub mod invariants;
pub mod service;
pub mod storage;
pub mod trail;
pub mod types;

pub use error::LifecycleError;
pub use fsm::{has_reached, validate_transition, TransitionDenial};
pub use guard::{authorize_update, PROTECTED_FIELDS};
pub use service::{LifecycleService, DEFAULT_HISTORY_LIMIT};
pub use storage::{bootstrap, CandidateStore, MemoryCandidateStore, StoreConfig, StoredCandidate};
pub use trail::{TransitionRecord, TransitionTrail};
pub use types::{ActorContext, ActorKind, Candidate, CandidateChanges, CandidateStatus};

#[cfg(feature = "postgres")]
pub use storage::PostgresCandidateStore;
