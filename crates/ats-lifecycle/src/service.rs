//! Lifecycle orchestration.
//!
//! The service is the only sanctioned way to change a candidate's status and
//! the only sanctioned way to change protected fields. It composes the pure
//! validator, the protected-field guard, the entity mutation with its
//! mandated side effect, and the audit append into one atomic store commit.
//! The storage layer re-validates everything at commit time; the service
//! never relies on being the only writer.

use crate::error::LifecycleError;
use crate::fsm;
use crate::guard;
use crate::storage::{self, CandidateStore, StoreConfig};
use crate::trail::TransitionRecord;
use crate::types::{ActorContext, Candidate, CandidateChanges, CandidateStatus};
use chrono::Utc;
use std::sync::Arc;
use tracing::{error, info, warn};
use uuid::Uuid;

/// Default page size for history queries, matching the compliance export
/// surface.
pub const DEFAULT_HISTORY_LIMIT: usize = 100;

/// Candidate lifecycle service.
///
/// Cloning is cheap; clones share the underlying store. The actor context is
/// borrowed per call and never retained, so nothing leaks between calls that
/// happen to share a service instance or a pooled connection.
#[derive(Clone)]
pub struct LifecycleService {
    store: Arc<dyn CandidateStore>,
}

impl LifecycleService {
    pub fn new(store: Arc<dyn CandidateStore>) -> Self {
        Self { store }
    }

    /// Build a service over a freshly bootstrapped store.
    pub async fn bootstrap(config: StoreConfig) -> Result<Self, LifecycleError> {
        let label = config.label();
        let store = storage::bootstrap(config).await?;
        info!(backend = label, "lifecycle service ready");
        Ok(Self::new(store))
    }

    /// Seam for the ingestion pipeline: register an already-built candidate.
    pub async fn register(&self, candidate: Candidate) -> Result<Candidate, LifecycleError> {
        let stored = self.store.insert(candidate).await?;
        info!(
            candidate_id = %stored.candidate.id,
            tenant_id = %stored.candidate.tenant_id,
            "candidate registered"
        );
        Ok(stored.candidate)
    }

    pub async fn get(&self, candidate_id: Uuid) -> Result<Candidate, LifecycleError> {
        let stored = self
            .store
            .load(candidate_id)
            .await?
            .ok_or(LifecycleError::NotFound(candidate_id))?;
        Ok(stored.candidate)
    }

    /// Transition a candidate to `target` as one atomic unit of work.
    ///
    /// Same-status calls are idempotent no-ops and return the unchanged
    /// candidate. Validator denials surface as
    /// [`LifecycleError::InvalidTransition`] with the human-readable reason;
    /// losing a concurrent race surfaces as
    /// [`LifecycleError::ConcurrentModification`], which the caller may retry
    /// from a fresh read.
    pub async fn transition(
        &self,
        candidate_id: Uuid,
        target: CandidateStatus,
        ctx: &ActorContext,
    ) -> Result<Candidate, LifecycleError> {
        if !ctx.has_reason() {
            return Err(LifecycleError::InvalidTransition(
                "a non-empty reason is required for every transition".to_string(),
            ));
        }

        let stored = self
            .store
            .load(candidate_id)
            .await?
            .ok_or(LifecycleError::NotFound(candidate_id))?;
        let current = stored.candidate.status;

        if current == target {
            info!(
                candidate_id = %candidate_id,
                status = target.as_str(),
                "candidate already in target status"
            );
            return Ok(stored.candidate);
        }

        let history = self.store.history(candidate_id, usize::MAX).await?;
        if let Err(denial) = fsm::validate_transition(&history, current, target) {
            warn!(
                candidate_id = %candidate_id,
                old_status = current.as_str(),
                new_status = target.as_str(),
                reason = %denial,
                "candidate status transition denied"
            );
            return Err(LifecycleError::InvalidTransition(denial.to_string()));
        }

        // Entity mutation plus mandated side effect, in the same unit: the
        // terminal status never commits without the blacklist flag.
        let mut updated = stored.candidate.clone();
        updated.status = target;
        if target == CandidateStatus::LeftCompany {
            updated.blacklisted = true;
        }
        updated.updated_at = Utc::now();

        let record = TransitionRecord::new(&updated, current, target, ctx);
        let committed = self
            .store
            .commit_update(stored.version, updated, Some(record))
            .await
            .map_err(|e| self.log_commit_failure(candidate_id, current, target, e))?;

        info!(
            candidate_id = %candidate_id,
            tenant_id = %committed.candidate.tenant_id,
            old_status = current.as_str(),
            new_status = target.as_str(),
            actor_kind = ctx.actor_kind.as_str(),
            reason = %ctx.reason,
            "candidate status transition committed"
        );
        Ok(committed.candidate)
    }

    /// Advisory dry-run: would `transition` accept this move right now?
    ///
    /// Read-only and non-blocking. Mirrors the validator exactly, including
    /// treating a missing candidate as a denial rather than an error, so
    /// callers can branch on the answer without handling a separate error
    /// path.
    pub async fn can_transition_to(
        &self,
        candidate_id: Uuid,
        target: CandidateStatus,
    ) -> Result<(bool, String), LifecycleError> {
        let stored = match self.store.load(candidate_id).await? {
            Some(stored) => stored,
            None => return Ok((false, format!("candidate {candidate_id} not found"))),
        };

        let history = self.store.history(candidate_id, usize::MAX).await?;
        match fsm::validate_transition(&history, stored.candidate.status, target) {
            Ok(()) => Ok((true, "transition is allowed".to_string())),
            Err(denial) => Ok((false, denial.to_string())),
        }
    }

    /// Apply a sparse field update behind the protected-field guard.
    ///
    /// All-or-nothing: if any changed field is protected and the context is
    /// not elevated, zero fields are applied. Status is not updatable here
    /// by construction.
    pub async fn update_with_protection(
        &self,
        candidate_id: Uuid,
        changes: CandidateChanges,
        ctx: &ActorContext,
    ) -> Result<Candidate, LifecycleError> {
        let stored = self
            .store
            .load(candidate_id)
            .await?
            .ok_or(LifecycleError::NotFound(candidate_id))?;

        if changes.is_empty() {
            return Ok(stored.candidate);
        }

        let updated = guard::authorize_update(&stored.candidate, &changes, ctx)?;
        let committed = self
            .store
            .commit_update(stored.version, updated, None)
            .await?;

        info!(
            candidate_id = %candidate_id,
            tenant_id = %committed.candidate.tenant_id,
            actor_kind = ctx.actor_kind.as_str(),
            elevated = ctx.elevated,
            "candidate updated with protection"
        );
        Ok(committed.candidate)
    }

    /// Transition history for a candidate, newest first.
    pub async fn history(
        &self,
        candidate_id: Uuid,
    ) -> Result<Vec<TransitionRecord>, LifecycleError> {
        self.store
            .history(candidate_id, DEFAULT_HISTORY_LIMIT)
            .await
    }

    /// Tenant-scoped trail for compliance export, newest first.
    pub async fn tenant_history(
        &self,
        tenant_id: Uuid,
    ) -> Result<Vec<TransitionRecord>, LifecycleError> {
        self.store
            .tenant_history(tenant_id, DEFAULT_HISTORY_LIMIT)
            .await
    }

    fn log_commit_failure(
        &self,
        candidate_id: Uuid,
        current: CandidateStatus,
        target: CandidateStatus,
        e: LifecycleError,
    ) -> LifecycleError {
        match &e {
            LifecycleError::ConstraintViolation(rule) => {
                // The second enforcement layer disagreed with the first:
                // either a bug upstream or a bypass attempt.
                error!(
                    candidate_id = %candidate_id,
                    old_status = current.as_str(),
                    new_status = target.as_str(),
                    rule = %rule,
                    "transition rejected by commit-time invariant layer"
                );
            }
            LifecycleError::ConcurrentModification(_) => {
                warn!(
                    candidate_id = %candidate_id,
                    old_status = current.as_str(),
                    new_status = target.as_str(),
                    "transition lost a concurrent write race"
                );
            }
            _ => {
                error!(
                    candidate_id = %candidate_id,
                    error = %e,
                    "candidate status transition failed"
                );
            }
        }
        e
    }
}
