//! End-to-end lifecycle scenarios against the memory backend.

use ats_lifecycle::{
    ActorContext, Candidate, CandidateChanges, CandidateStatus, CandidateStore, LifecycleError,
    LifecycleService, StoreConfig, TransitionRecord,
};
use serde_json::json;
use std::sync::Arc;
use uuid::Uuid;

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("ats_lifecycle=debug")
        .with_test_writer()
        .try_init();
}

async fn service_with_candidate() -> (LifecycleService, Candidate) {
    init_tracing();
    let service = LifecycleService::bootstrap(StoreConfig::memory())
        .await
        .unwrap();
    let candidate = service
        .register(
            Candidate::new(Uuid::new_v4(), "Asha Verma")
                .with_contact("asha@example.com", "+91 98100 00000")
                .with_skills(json!(["rust", "postgres"])),
        )
        .await
        .unwrap();
    (service, candidate)
}

#[tokio::test]
async fn full_lifecycle_walk() {
    let (service, candidate) = service_with_candidate().await;
    let id = candidate.id;

    // ACTIVE -> LEFT_COMPANY directly: denied, path invariant.
    let err = service
        .transition(id, CandidateStatus::LeftCompany, &ActorContext::system("resigned"))
        .await
        .unwrap_err();
    assert!(matches!(err, LifecycleError::InvalidTransition(_)));
    assert!(err.to_string().contains("JOINED"));
    assert!(service.history(id).await.unwrap().is_empty());

    // ACTIVE -> JOINED: allowed.
    let joined = service
        .transition(id, CandidateStatus::Joined, &ActorContext::system("onboarded"))
        .await
        .unwrap();
    assert_eq!(joined.status, CandidateStatus::Joined);
    assert_eq!(service.history(id).await.unwrap().len(), 1);

    // JOINED -> LEFT_COMPANY: allowed, and the blacklist flag commits with it.
    let left = service
        .transition(id, CandidateStatus::LeftCompany, &ActorContext::system("resigned"))
        .await
        .unwrap();
    assert_eq!(left.status, CandidateStatus::LeftCompany);
    assert!(left.blacklisted);
    let history = service.history(id).await.unwrap();
    assert_eq!(history.len(), 2);
    assert!(history[0].terminal);

    // LEFT_COMPANY -> ACTIVE: terminal, denied for anyone, history unchanged.
    let err = service
        .transition(id, CandidateStatus::Active, &ActorContext::system("rehire"))
        .await
        .unwrap_err();
    assert!(matches!(err, LifecycleError::InvalidTransition(_)));
    assert!(err.to_string().contains("terminal"));
    assert_eq!(service.history(id).await.unwrap().len(), 2);
    assert_eq!(
        service.get(id).await.unwrap().status,
        CandidateStatus::LeftCompany
    );
}

#[tokio::test]
async fn terminal_state_resists_elevated_actors() {
    let (service, candidate) = service_with_candidate().await;
    let ctx = ActorContext::system("offboarding");
    service
        .transition(candidate.id, CandidateStatus::Joined, &ctx)
        .await
        .unwrap();
    service
        .transition(candidate.id, CandidateStatus::LeftCompany, &ctx)
        .await
        .unwrap();

    // Elevation grants protected-field access, never an exit from the
    // terminal state.
    let elevated = ActorContext::user(Uuid::new_v4(), "attempted rehire").with_elevation();
    for target in [
        CandidateStatus::Active,
        CandidateStatus::Inactive,
        CandidateStatus::Joined,
    ] {
        let err = service
            .transition(candidate.id, target, &elevated)
            .await
            .unwrap_err();
        assert!(matches!(err, LifecycleError::InvalidTransition(_)));
    }
    assert_eq!(
        service.get(candidate.id).await.unwrap().status,
        CandidateStatus::LeftCompany
    );
}

#[tokio::test]
async fn path_invariant_survives_leaving_joined_again() {
    let (service, candidate) = service_with_candidate().await;
    let ctx = ActorContext::system("lifecycle walk");

    // ACTIVE -> JOINED -> ACTIVE: the candidate is back in ACTIVE but the
    // trail remembers JOINED, so LEFT_COMPANY is now reachable.
    service
        .transition(candidate.id, CandidateStatus::Joined, &ctx)
        .await
        .unwrap();
    service
        .transition(candidate.id, CandidateStatus::Active, &ctx)
        .await
        .unwrap();

    let left = service
        .transition(
            candidate.id,
            CandidateStatus::LeftCompany,
            &ActorContext::system("resigned"),
        )
        .await
        .unwrap();
    assert_eq!(left.status, CandidateStatus::LeftCompany);
    assert!(left.blacklisted);
}

#[tokio::test]
async fn audit_trail_matches_committed_changes_in_order() {
    let (service, candidate) = service_with_candidate().await;
    let ctx = ActorContext::system("audit accounting");

    let walk = [
        CandidateStatus::Inactive,
        CandidateStatus::Active,
        CandidateStatus::Joined,
        CandidateStatus::LeftCompany,
    ];
    for target in walk {
        service.transition(candidate.id, target, &ctx).await.unwrap();
    }

    // One record per committed change, newest first, each (old, new) pair
    // chaining onto the previous record.
    let history = service.history(candidate.id).await.unwrap();
    assert_eq!(history.len(), walk.len());
    let oldest_first: Vec<&TransitionRecord> = history.iter().rev().collect();
    let mut previous = CandidateStatus::Active;
    for (record, expected_target) in oldest_first.iter().zip(walk) {
        assert_eq!(record.old_status, previous);
        assert_eq!(record.new_status, expected_target);
        previous = expected_target;
    }

    // Tenant-scoped export sees the same records.
    assert_eq!(
        service.tenant_history(candidate.tenant_id).await.unwrap().len(),
        walk.len()
    );
}

#[tokio::test]
async fn stale_readers_race_toward_incompatible_states() {
    init_tracing();
    let store: Arc<dyn CandidateStore> = ats_lifecycle::bootstrap(StoreConfig::memory())
        .await
        .unwrap();
    let stored = store
        .insert(Candidate::new(Uuid::new_v4(), "Rohan Mehta"))
        .await
        .unwrap();

    // Both writers read version 1 while the row is ACTIVE, then race toward
    // JOINED and INACTIVE respectively.
    let ctx = ActorContext::system("race");
    let mut toward_joined = stored.candidate.clone();
    toward_joined.status = CandidateStatus::Joined;
    let joined_record = TransitionRecord::new(
        &toward_joined,
        CandidateStatus::Active,
        CandidateStatus::Joined,
        &ctx,
    );
    let mut toward_inactive = stored.candidate.clone();
    toward_inactive.status = CandidateStatus::Inactive;
    let inactive_record = TransitionRecord::new(
        &toward_inactive,
        CandidateStatus::Active,
        CandidateStatus::Inactive,
        &ctx,
    );

    let first = store
        .commit_update(stored.version, toward_joined, Some(joined_record))
        .await;
    let second = store
        .commit_update(stored.version, toward_inactive, Some(inactive_record))
        .await;

    assert!(first.is_ok());
    assert!(matches!(
        second,
        Err(LifecycleError::ConcurrentModification(_))
    ));
    // Exactly one transition committed, never two.
    let history = store.history(stored.candidate.id, 100).await.unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].new_status, CandidateStatus::Joined);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn parallel_transitions_commit_exactly_once() {
    let (service, candidate) = service_with_candidate().await;

    // Eight callers all push toward JOINED in parallel. Each either wins the
    // commit, observes the idempotent no-op, or loses the version race;
    // whichever way it lands, exactly one audit record exists afterwards.
    let mut handles = Vec::new();
    for worker in 0..8 {
        let service = service.clone();
        let id = candidate.id;
        handles.push(tokio::spawn(async move {
            let ctx = ActorContext::system(format!("onboarding worker {worker}"));
            service.transition(id, CandidateStatus::Joined, &ctx).await
        }));
    }

    let mut successes = 0;
    for handle in handles {
        match handle.await.unwrap() {
            Ok(candidate) => {
                assert_eq!(candidate.status, CandidateStatus::Joined);
                successes += 1;
            }
            Err(LifecycleError::ConcurrentModification(_)) => {}
            Err(other) => panic!("unexpected error: {other}"),
        }
    }

    assert!(successes >= 1);
    let history = service.history(candidate.id).await.unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(
        service.get(candidate.id).await.unwrap().status,
        CandidateStatus::Joined
    );
}

#[tokio::test]
async fn protected_update_is_all_or_nothing() {
    let (service, candidate) = service_with_candidate().await;

    // One protected change buried in a pile of unprotected ones.
    let changes = CandidateChanges::new()
        .set_name("A. Verma")
        .set_experience(json!([{"company": "Acme", "years": 3}]))
        .set_ctc_current_minor(1_800_000_00)
        .set_ctc_expected_minor(2_400_000_00);

    let err = service
        .update_with_protection(
            candidate.id,
            changes.clone(),
            &ActorContext::user(Uuid::new_v4(), "profile edit"),
        )
        .await
        .unwrap_err();
    match &err {
        LifecycleError::ProtectedFieldViolation { fields } => {
            assert_eq!(fields, &vec!["name".to_string()]);
        }
        other => panic!("expected protected field violation, got {other:?}"),
    }

    // Zero fields changed, not three of four.
    let reloaded = service.get(candidate.id).await.unwrap();
    assert_eq!(reloaded.name, candidate.name);
    assert_eq!(reloaded.experience, None);
    assert_eq!(reloaded.ctc_current_minor, None);
    assert_eq!(reloaded.ctc_expected_minor, None);

    // The same request with per-call elevation applies everything.
    let updated = service
        .update_with_protection(
            candidate.id,
            changes,
            &ActorContext::user(Uuid::new_v4(), "profile edit").with_elevation(),
        )
        .await
        .unwrap();
    assert_eq!(updated.name, "A. Verma");
    assert_eq!(updated.ctc_expected_minor, Some(2_400_000_00));
}

#[tokio::test]
async fn guarded_updates_leave_no_audit_rows() {
    let (service, candidate) = service_with_candidate().await;
    service
        .update_with_protection(
            candidate.id,
            CandidateChanges::new().set_experience(json!([])),
            &ActorContext::user(Uuid::new_v4(), "profile edit"),
        )
        .await
        .unwrap();

    // Audit rows track status changes only.
    assert!(service.history(candidate.id).await.unwrap().is_empty());
}
