//! Pure transition rule set for the candidate lifecycle.
//!
//! The rules are deterministic and free of side effects, so the same function
//! backs both the advisory dry-run check and the pre-commit gate inside the
//! lifecycle service. The storage layer re-asserts the same rules at commit
//! time (see [`crate::invariants`]); that duplication is deliberate.

use crate::trail::TransitionRecord;
use crate::types::CandidateStatus;
use std::fmt;

/// Why a transition was denied.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransitionDenial {
    /// Target equals the current status. Callers of the lifecycle service see
    /// this as an idempotent no-op, but it is never an *allowed* transition.
    AlreadyInState(CandidateStatus),
    /// The current status is terminal. No exceptions, elevated or not.
    TerminalState(CandidateStatus),
    /// `ACTIVE -> LEFT_COMPANY` requires the candidate to have reached
    /// `JOINED` at some earlier point.
    JoinedRequired,
}

impl fmt::Display for TransitionDenial {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::AlreadyInState(status) => {
                write!(f, "candidate is already in {status} status")
            }
            Self::TerminalState(status) => {
                write!(f, "cannot transition from terminal state {status}")
            }
            Self::JoinedRequired => write!(
                f,
                "cannot transition from ACTIVE to LEFT_COMPANY without first \
                 transitioning to JOINED"
            ),
        }
    }
}

/// True if the trail contains any transition *into* `status`.
///
/// This is a path predicate over the audit log, not the current row value:
/// the log stays authoritative even if a cached flag were ever added.
pub fn has_reached(history: &[TransitionRecord], status: CandidateStatus) -> bool {
    history.iter().any(|record| record.new_status == status)
}

/// Decide whether `current -> target` is allowed given the candidate's
/// transition history.
///
/// Rule order matters: same-status short-circuits before the terminal check
/// so a no-op against a terminal row reads as "already in state".
pub fn validate_transition(
    history: &[TransitionRecord],
    current: CandidateStatus,
    target: CandidateStatus,
) -> Result<(), TransitionDenial> {
    if target == current {
        return Err(TransitionDenial::AlreadyInState(current));
    }

    if current.is_terminal() {
        return Err(TransitionDenial::TerminalState(current));
    }

    if current == CandidateStatus::Active
        && target == CandidateStatus::LeftCompany
        && !has_reached(history, CandidateStatus::Joined)
    {
        return Err(TransitionDenial::JoinedRequired);
    }

    Ok(())
}
