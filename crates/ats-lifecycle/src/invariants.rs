//! Commit-time invariant layer.
//!
//! Every store backend runs [`verify_commit`] inside its atomic commit
//! section, on every row write, regardless of which caller produced the
//! write. The rules duplicate the transition validator on purpose: a bug or
//! a bypass in the orchestration layer must still be caught here. For the
//! Postgres backend the same rules additionally ship as constraints and
//! triggers (see [`POSTGRES_INVARIANT_DDL`]) so writers outside this
//! codebase are caught by the database itself.

use crate::error::LifecycleError;
use crate::trail::TransitionRecord;
use crate::types::{Candidate, CandidateStatus};
use tracing::error;

/// Re-validate a proposed row write at commit time.
///
/// `old` is the currently committed row, `new` the proposed replacement,
/// `audit` the transition record the caller intends to append in the same
/// unit, and `reached_joined` the trail predicate "has this candidate ever
/// entered JOINED", evaluated inside the same atomic section.
pub fn verify_commit(
    old: &Candidate,
    new: &Candidate,
    audit: Option<&TransitionRecord>,
    reached_joined: bool,
) -> Result<(), LifecycleError> {
    if new.id != old.id {
        return violation(old, "candidate id is immutable");
    }
    if new.tenant_id != old.tenant_id {
        return violation(old, "candidate tenant is immutable");
    }

    // Structural coupling: the terminal status and the blacklist flag commit
    // together or not at all. A violating write is rejected, never fixed up.
    if new.status == CandidateStatus::LeftCompany && !new.blacklisted {
        return violation(old, "LEFT_COMPANY requires blacklisted = true");
    }

    // Terminal immutability, checked against the row pair itself.
    if old.status.is_terminal() && new.status != old.status {
        return violation(
            old,
            "LEFT_COMPANY is a terminal state, no further transitions allowed",
        );
    }

    // Path invariant, re-checked against the authoritative trail.
    if old.status == CandidateStatus::Active
        && new.status == CandidateStatus::LeftCompany
        && !reached_joined
    {
        return violation(
            old,
            "transition to LEFT_COMPANY requires a prior JOINED transition",
        );
    }

    verify_audit_exactness(old, new, audit)
}

/// Exactly-once audit logging: a status change commits with precisely one
/// matching record; any other write commits with none.
fn verify_audit_exactness(
    old: &Candidate,
    new: &Candidate,
    audit: Option<&TransitionRecord>,
) -> Result<(), LifecycleError> {
    if old.status == new.status {
        if audit.is_some() {
            return violation(old, "audit record supplied without a status change");
        }
        return Ok(());
    }

    let record = match audit {
        Some(record) => record,
        None => return violation(old, "status change without its audit record"),
    };

    if record.candidate_id != new.id {
        return violation(old, "audit record references a different candidate");
    }
    if record.tenant_id != new.tenant_id {
        return violation(old, "audit record references a different tenant");
    }
    if record.old_status != old.status || record.new_status != new.status {
        return violation(old, "audit record does not match the observed status change");
    }
    if record.terminal != new.status.is_terminal() {
        return violation(old, "audit terminal flag does not match the new status");
    }
    if record.reason.trim().is_empty() {
        return violation(old, "audit record requires a non-empty reason");
    }

    Ok(())
}

fn violation(row: &Candidate, rule: &str) -> Result<(), LifecycleError> {
    error!(
        candidate_id = %row.id,
        tenant_id = %row.tenant_id,
        rule,
        "commit-time invariant violation"
    );
    Err(LifecycleError::ConstraintViolation(rule.to_string()))
}

/// Database-level mirror of the rules above, installed by the Postgres
/// store's `ensure_schema`. These fire for *any* writer, including ad-hoc
/// SQL outside this codebase.
///
/// Layout:
/// - CHECK constraint coupling LEFT_COMPANY to the blacklist flag;
/// - BEFORE UPDATE trigger enforcing terminal immutability and the
///   JOINED-path scan over the transition log;
/// - deferred constraint trigger verifying each status change committed a
///   matching audit row in the same transaction;
/// - append-only guard rejecting UPDATE/DELETE on the transition log.
///
/// All exceptions raise SQLSTATE 23514 (check_violation) so the store maps
/// them to [`LifecycleError::ConstraintViolation`].
pub const POSTGRES_INVARIANT_DDL: &[&str] = &[
    r#"
    ALTER TABLE candidates
        DROP CONSTRAINT IF EXISTS check_left_company_blacklisted
    "#,
    r#"
    ALTER TABLE candidates
        ADD CONSTRAINT check_left_company_blacklisted
        CHECK (status != 'LEFT_COMPANY' OR blacklisted = TRUE)
    "#,
    r#"
    CREATE OR REPLACE FUNCTION validate_candidate_status_transition()
    RETURNS TRIGGER AS $$
    BEGIN
        IF OLD.status = 'LEFT_COMPANY' AND NEW.status != 'LEFT_COMPANY' THEN
            RAISE EXCEPTION 'LEFT_COMPANY is a terminal state, no further transitions allowed'
                USING ERRCODE = '23514';
        END IF;

        IF OLD.status = 'ACTIVE' AND NEW.status = 'LEFT_COMPANY' THEN
            IF NOT EXISTS (
                SELECT 1 FROM candidate_transitions
                WHERE candidate_id = NEW.id
                  AND new_status = 'JOINED'
            ) THEN
                RAISE EXCEPTION 'transition to LEFT_COMPANY requires a prior JOINED transition'
                    USING ERRCODE = '23514';
            END IF;
        END IF;

        RETURN NEW;
    END;
    $$ LANGUAGE plpgsql
    "#,
    r#"
    DROP TRIGGER IF EXISTS candidate_status_transition_trigger ON candidates
    "#,
    r#"
    CREATE TRIGGER candidate_status_transition_trigger
        BEFORE UPDATE ON candidates
        FOR EACH ROW
        WHEN (OLD.status IS DISTINCT FROM NEW.status)
        EXECUTE FUNCTION validate_candidate_status_transition()
    "#,
    r#"
    CREATE OR REPLACE FUNCTION require_transition_audit_record()
    RETURNS TRIGGER AS $$
    BEGIN
        IF NOT EXISTS (
            SELECT 1 FROM candidate_transitions
            WHERE candidate_id = NEW.id
              AND old_status = OLD.status
              AND new_status = NEW.status
              AND created_at >= transaction_timestamp()
        ) THEN
            RAISE EXCEPTION 'status change without its audit record'
                USING ERRCODE = '23514';
        END IF;

        RETURN NEW;
    END;
    $$ LANGUAGE plpgsql
    "#,
    r#"
    DROP TRIGGER IF EXISTS require_transition_audit_trigger ON candidates
    "#,
    r#"
    CREATE CONSTRAINT TRIGGER require_transition_audit_trigger
        AFTER UPDATE ON candidates
        DEFERRABLE INITIALLY DEFERRED
        FOR EACH ROW
        WHEN (OLD.status IS DISTINCT FROM NEW.status)
        EXECUTE FUNCTION require_transition_audit_record()
    "#,
    r#"
    CREATE OR REPLACE FUNCTION reject_transition_log_mutation()
    RETURNS TRIGGER AS $$
    BEGIN
        RAISE EXCEPTION 'candidate_transitions is append-only'
            USING ERRCODE = '23514';
    END;
    $$ LANGUAGE plpgsql
    "#,
    r#"
    DROP TRIGGER IF EXISTS candidate_transitions_append_only ON candidate_transitions
    "#,
    r#"
    CREATE TRIGGER candidate_transitions_append_only
        BEFORE UPDATE OR DELETE ON candidate_transitions
        FOR EACH ROW
        EXECUTE FUNCTION reject_transition_log_mutation()
    "#,
];
