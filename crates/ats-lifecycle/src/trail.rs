use crate::types::{ActorContext, ActorKind, Candidate, CandidateStatus};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// One accepted status transition, immutable once written.
///
/// Records are created exactly once per committed status change, inside the
/// same atomic unit as the row update, and are never updated or deleted
/// (retention requirement).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransitionRecord {
    pub id: Uuid,
    pub candidate_id: Uuid,
    pub old_status: CandidateStatus,
    pub new_status: CandidateStatus,
    /// Absent for system-initiated transitions.
    pub actor_id: Option<Uuid>,
    pub actor_kind: ActorKind,
    pub reason: String,
    /// True iff `new_status` is terminal.
    pub terminal: bool,
    pub tenant_id: Uuid,
    pub created_at: DateTime<Utc>,
}

impl TransitionRecord {
    pub fn new(
        candidate: &Candidate,
        old_status: CandidateStatus,
        new_status: CandidateStatus,
        ctx: &ActorContext,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            candidate_id: candidate.id,
            old_status,
            new_status,
            actor_id: ctx.actor_id,
            actor_kind: ctx.actor_kind,
            reason: ctx.reason.clone(),
            terminal: new_status.is_terminal(),
            tenant_id: candidate.tenant_id,
            created_at: Utc::now(),
        }
    }

    /// Human-readable `OLD -> NEW` label for logs and exports.
    pub fn describe(&self) -> String {
        format!("{} -> {}", self.old_status, self.new_status)
    }
}

/// Append-only transition trail backing the memory store.
///
/// No update or delete API exists. Queries answer both the compliance surface
/// (ordered history, tenant export) and the path predicate the validator and
/// the commit-time invariant layer share.
#[derive(Debug, Default, Clone)]
pub struct TransitionTrail {
    records: Vec<TransitionRecord>,
}

impl TransitionTrail {
    pub fn new() -> Self {
        Self {
            records: Vec::new(),
        }
    }

    pub fn records(&self) -> &[TransitionRecord] {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Append one record. Only the store's commit path calls this; nothing
    /// outside the crate can write the trail directly.
    pub(crate) fn append(&mut self, record: TransitionRecord) {
        self.records.push(record);
    }

    /// Transitions for one candidate, newest first.
    pub fn history(&self, candidate_id: Uuid, limit: usize) -> Vec<TransitionRecord> {
        self.records
            .iter()
            .rev()
            .filter(|record| record.candidate_id == candidate_id)
            .take(limit)
            .cloned()
            .collect()
    }

    /// Tenant-scoped trail, newest first, for compliance export.
    pub fn tenant_history(&self, tenant_id: Uuid, limit: usize) -> Vec<TransitionRecord> {
        self.records
            .iter()
            .rev()
            .filter(|record| record.tenant_id == tenant_id)
            .take(limit)
            .cloned()
            .collect()
    }

    /// Has this candidate ever transitioned *into* `status`?
    pub fn has_reached(&self, candidate_id: Uuid, status: CandidateStatus) -> bool {
        self.records
            .iter()
            .any(|record| record.candidate_id == candidate_id && record.new_status == status)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn seeded_trail() -> (TransitionTrail, Candidate, Candidate) {
        let tenant_a = Uuid::new_v4();
        let tenant_b = Uuid::new_v4();
        let first = Candidate::new(tenant_a, "Asha Verma");
        let second = Candidate::new(tenant_b, "Rohan Mehta");
        let ctx = ActorContext::system("seed");

        let mut trail = TransitionTrail::new();
        trail.append(TransitionRecord::new(
            &first,
            CandidateStatus::Active,
            CandidateStatus::Joined,
            &ctx,
        ));
        trail.append(TransitionRecord::new(
            &second,
            CandidateStatus::Active,
            CandidateStatus::Inactive,
            &ctx,
        ));
        trail.append(TransitionRecord::new(
            &first,
            CandidateStatus::Joined,
            CandidateStatus::LeftCompany,
            &ctx,
        ));
        (trail, first, second)
    }

    #[test]
    fn history_is_newest_first_and_scoped() {
        let (trail, first, _) = seeded_trail();
        let history = trail.history(first.id, 100);
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].new_status, CandidateStatus::LeftCompany);
        assert_eq!(history[1].new_status, CandidateStatus::Joined);
    }

    #[test]
    fn history_respects_limit() {
        let (trail, first, _) = seeded_trail();
        let history = trail.history(first.id, 1);
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].new_status, CandidateStatus::LeftCompany);
    }

    #[test]
    fn tenant_history_is_isolated() {
        let (trail, first, second) = seeded_trail();
        assert_eq!(trail.tenant_history(first.tenant_id, 100).len(), 2);
        assert_eq!(trail.tenant_history(second.tenant_id, 100).len(), 1);
    }

    #[test]
    fn has_reached_tracks_entered_states() {
        let (trail, first, second) = seeded_trail();
        assert!(trail.has_reached(first.id, CandidateStatus::Joined));
        assert!(trail.has_reached(first.id, CandidateStatus::LeftCompany));
        assert!(!trail.has_reached(second.id, CandidateStatus::Joined));
    }

    #[test]
    fn terminal_flag_follows_new_status() {
        let (trail, first, _) = seeded_trail();
        let history = trail.history(first.id, 100);
        assert!(history[0].terminal);
        assert!(!history[1].terminal);
    }
}
