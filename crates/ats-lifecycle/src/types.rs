use crate::error::LifecycleError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Closed lifecycle status domain for candidate records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CandidateStatus {
    Active,
    Inactive,
    Joined,
    LeftCompany,
}

impl CandidateStatus {
    pub const ALL: [CandidateStatus; 4] = [
        Self::Active,
        Self::Inactive,
        Self::Joined,
        Self::LeftCompany,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Active => "ACTIVE",
            Self::Inactive => "INACTIVE",
            Self::Joined => "JOINED",
            Self::LeftCompany => "LEFT_COMPANY",
        }
    }

    /// A terminal status has no outgoing transitions, for anyone.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::LeftCompany)
    }

    /// Parse a wire-format status. Unknown values are rejected here so the
    /// rest of the core only ever sees the closed enumeration.
    pub fn parse(value: &str) -> Result<Self, LifecycleError> {
        match value {
            "ACTIVE" => Ok(Self::Active),
            "INACTIVE" => Ok(Self::Inactive),
            "JOINED" => Ok(Self::Joined),
            "LEFT_COMPANY" => Ok(Self::LeftCompany),
            other => Err(LifecycleError::InvalidTransition(format!(
                "invalid status '{other}', must be one of ACTIVE, INACTIVE, JOINED, LEFT_COMPANY"
            ))),
        }
    }
}

impl fmt::Display for CandidateStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CandidateStatus {
    type Err = LifecycleError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

/// Kind of principal behind a mutation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ActorKind {
    User,
    System,
}

impl ActorKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::User => "USER",
            Self::System => "SYSTEM",
        }
    }
}

/// Per-call actor context threaded explicitly through every mutation.
///
/// This is deliberately not ambient state: it is never stored on the service,
/// never cached on a connection, and elevation is granted per call via
/// [`ActorContext::with_elevation`], so it cannot leak into unrelated
/// operations.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActorContext {
    /// Absent for system-initiated mutations.
    pub actor_id: Option<Uuid>,
    pub actor_kind: ActorKind,
    /// Caller-supplied justification; the core never substitutes a default.
    pub reason: String,
    /// Narrowly-scoped grant permitting protected-field mutation.
    pub elevated: bool,
}

impl ActorContext {
    pub fn user(actor_id: Uuid, reason: impl Into<String>) -> Self {
        Self {
            actor_id: Some(actor_id),
            actor_kind: ActorKind::User,
            reason: reason.into(),
            elevated: false,
        }
    }

    pub fn system(reason: impl Into<String>) -> Self {
        Self {
            actor_id: None,
            actor_kind: ActorKind::System,
            reason: reason.into(),
            elevated: false,
        }
    }

    /// Grant protected-field elevation for this call only.
    pub fn with_elevation(mut self) -> Self {
        self.elevated = true;
        self
    }

    pub fn has_reason(&self) -> bool {
        !self.reason.trim().is_empty()
    }
}

/// The tracked candidate record.
///
/// `status` moves only through the lifecycle service; `blacklisted` is coupled
/// to the terminal status by a commit-time constraint and counts as a
/// protected field on the generic update path.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Candidate {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub name: String,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub skills: Option<Value>,
    pub experience: Option<Value>,
    pub ctc_current_minor: Option<u64>,
    pub ctc_expected_minor: Option<u64>,
    pub status: CandidateStatus,
    pub blacklisted: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Candidate {
    /// New candidate in the initial `ACTIVE` status.
    pub fn new(tenant_id: Uuid, name: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            tenant_id,
            name: name.into(),
            email: None,
            phone: None,
            skills: None,
            experience: None,
            ctc_current_minor: None,
            ctc_expected_minor: None,
            status: CandidateStatus::Active,
            blacklisted: false,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn with_contact(
        mut self,
        email: impl Into<String>,
        phone: impl Into<String>,
    ) -> Self {
        self.email = Some(email.into());
        self.phone = Some(phone.into());
        self
    }

    pub fn with_skills(mut self, skills: Value) -> Self {
        self.skills = Some(skills);
        self
    }

    pub fn with_compensation(
        mut self,
        current_minor: Option<u64>,
        expected_minor: Option<u64>,
    ) -> Self {
        self.ctc_current_minor = current_minor;
        self.ctc_expected_minor = expected_minor;
        self
    }
}

/// Sparse field update for the guarded generic update path.
///
/// `status` is deliberately absent: lifecycle state moves only through
/// [`crate::service::LifecycleService::transition`].
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CandidateChanges {
    pub name: Option<String>,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub skills: Option<Value>,
    pub experience: Option<Value>,
    pub ctc_current_minor: Option<u64>,
    pub ctc_expected_minor: Option<u64>,
    pub blacklisted: Option<bool>,
}

impl CandidateChanges {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn set_email(mut self, email: impl Into<String>) -> Self {
        self.email = Some(email.into());
        self
    }

    pub fn set_phone(mut self, phone: impl Into<String>) -> Self {
        self.phone = Some(phone.into());
        self
    }

    pub fn set_skills(mut self, skills: Value) -> Self {
        self.skills = Some(skills);
        self
    }

    pub fn set_experience(mut self, experience: Value) -> Self {
        self.experience = Some(experience);
        self
    }

    pub fn set_ctc_current_minor(mut self, minor: u64) -> Self {
        self.ctc_current_minor = Some(minor);
        self
    }

    pub fn set_ctc_expected_minor(mut self, minor: u64) -> Self {
        self.ctc_expected_minor = Some(minor);
        self
    }

    pub fn set_blacklisted(mut self, blacklisted: bool) -> Self {
        self.blacklisted = Some(blacklisted);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.name.is_none()
            && self.email.is_none()
            && self.phone.is_none()
            && self.skills.is_none()
            && self.experience.is_none()
            && self.ctc_current_minor.is_none()
            && self.ctc_expected_minor.is_none()
            && self.blacklisted.is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_wire_roundtrip() {
        for status in CandidateStatus::ALL {
            assert_eq!(CandidateStatus::parse(status.as_str()).unwrap(), status);
        }
    }

    #[test]
    fn rejects_unknown_status() {
        let err = CandidateStatus::parse("RESIGNED").unwrap_err();
        assert!(err.to_string().contains("invalid status 'RESIGNED'"));
    }

    #[test]
    fn only_left_company_is_terminal() {
        assert!(CandidateStatus::LeftCompany.is_terminal());
        assert!(!CandidateStatus::Active.is_terminal());
        assert!(!CandidateStatus::Inactive.is_terminal());
        assert!(!CandidateStatus::Joined.is_terminal());
    }

    #[test]
    fn elevation_is_per_call() {
        let base = ActorContext::system("ops correction");
        assert!(!base.elevated);
        let elevated = base.clone().with_elevation();
        assert!(elevated.elevated);
        // The original context is untouched; the grant does not stick around.
        assert!(!base.elevated);
    }

    #[test]
    fn candidate_starts_active_and_clean() {
        let candidate = Candidate::new(Uuid::new_v4(), "Asha Verma");
        assert_eq!(candidate.status, CandidateStatus::Active);
        assert!(!candidate.blacklisted);
    }

    #[test]
    fn empty_changes_detected() {
        assert!(CandidateChanges::new().is_empty());
        assert!(!CandidateChanges::new().set_name("Asha").is_empty());
    }
}
