//! Protected-field authorization for the generic update path.
//!
//! Orthogonal to the state machine but sharing its enforcement philosophy:
//! the decision is all-or-nothing, so a request touching one protected and
//! nine unprotected fields is rejected wholesale and callers cannot probe
//! for the offending field by binary search.

use crate::error::LifecycleError;
use crate::types::{ActorContext, Candidate, CandidateChanges};
use chrono::Utc;
use tracing::warn;

/// Fields a non-elevated actor may never change: candidate identity and the
/// blacklist flag.
pub const PROTECTED_FIELDS: [&str; 5] = ["name", "email", "phone", "skills", "blacklisted"];

/// Authorize and apply a sparse update against the current row.
///
/// A protected field only counts as touched when the proposed value differs
/// from the committed one; re-sending the current value is not a violation.
/// On success returns the fully applied candidate; the caller commits it as
/// one atomic write.
pub fn authorize_update(
    old: &Candidate,
    changes: &CandidateChanges,
    ctx: &ActorContext,
) -> Result<Candidate, LifecycleError> {
    let touched = touched_protected_fields(old, changes);
    if !touched.is_empty() && !ctx.elevated {
        warn!(
            candidate_id = %old.id,
            tenant_id = %old.tenant_id,
            actor_kind = ctx.actor_kind.as_str(),
            fields = ?touched,
            "protected field modification denied"
        );
        return Err(LifecycleError::ProtectedFieldViolation { fields: touched });
    }

    let mut updated = old.clone();
    if let Some(name) = &changes.name {
        updated.name = name.clone();
    }
    if let Some(email) = &changes.email {
        updated.email = Some(email.clone());
    }
    if let Some(phone) = &changes.phone {
        updated.phone = Some(phone.clone());
    }
    if let Some(skills) = &changes.skills {
        updated.skills = Some(skills.clone());
    }
    if let Some(experience) = &changes.experience {
        updated.experience = Some(experience.clone());
    }
    if let Some(minor) = changes.ctc_current_minor {
        updated.ctc_current_minor = Some(minor);
    }
    if let Some(minor) = changes.ctc_expected_minor {
        updated.ctc_expected_minor = Some(minor);
    }
    if let Some(blacklisted) = changes.blacklisted {
        updated.blacklisted = blacklisted;
    }
    updated.updated_at = Utc::now();

    Ok(updated)
}

fn touched_protected_fields(old: &Candidate, changes: &CandidateChanges) -> Vec<String> {
    let mut touched = Vec::new();

    if changes
        .name
        .as_ref()
        .map(|name| *name != old.name)
        .unwrap_or(false)
    {
        touched.push("name".to_string());
    }
    if changes
        .email
        .as_ref()
        .map(|email| Some(email) != old.email.as_ref())
        .unwrap_or(false)
    {
        touched.push("email".to_string());
    }
    if changes
        .phone
        .as_ref()
        .map(|phone| Some(phone) != old.phone.as_ref())
        .unwrap_or(false)
    {
        touched.push("phone".to_string());
    }
    if changes
        .skills
        .as_ref()
        .map(|skills| Some(skills) != old.skills.as_ref())
        .unwrap_or(false)
    {
        touched.push("skills".to_string());
    }
    if changes
        .blacklisted
        .map(|blacklisted| blacklisted != old.blacklisted)
        .unwrap_or(false)
    {
        touched.push("blacklisted".to_string());
    }

    touched
}
