//! End-to-end flows across the healing control plane: tier selection,
//! verification and rollback, the kill-switch, the confidence gate, rate
//! limiting, worker resume, and deployment tracking.

use mend_orchestrator::{EnqueueOutcome, IncidentStore};
use mend_proto::{
    DeploymentStatus, DeploymentUpdate, FileEdit, FixOutcome, HealingEvent, IncidentStatus,
    ProposedFix, RepairStrategy, SessionPhase, SessionStatus, WorkerFixReport,
};
use mend_safety::AdmissionDenied;
use mendops_tests::{
    build_harness, build_harness_with_identity, runtime_incident, seed_fix_history, seed_kb,
    test_config,
};

fn guard_fix(path: &str) -> ProposedFix {
    ProposedFix {
        summary: "guard against undefined user before property access".to_string(),
        edits: vec![FileEdit {
            path: path.to_string(),
            content: "export const userId = (user) => user?.id ?? null;\n".to_string(),
        }],
    }
}

// ─── Scenario 1: KB cache hit, high confidence ───────────────────────────────

#[tokio::test]
async fn test_kb_hit_high_confidence_auto_commits() {
    let incident = runtime_incident("inc-kb-hit");
    let fix = guard_fix("src/x.ts");

    let harness = build_harness(test_config());
    // 9/10 prior fixes at stored confidence 95 → blended 92, over the 90 gate.
    seed_kb(harness.state_dir.path(), &incident, &fix, 9, 1, 95);
    seed_fix_history(harness.state_dir.path(), 10);
    // Reopen the stores so the orchestrator sees the seeds.
    let harness = mendops_tests::rebuild_harness(harness.state_dir, test_config());
    harness.workspace.seed("src/x.test.ts", "test('x', () => {});\n");
    harness.incidents.ingest(&incident).expect("ingest");

    let mut events = harness.orchestrator.bus().subscribe();
    let outcome = harness
        .orchestrator
        .enqueue_incident("inc-kb-hit")
        .await
        .expect("enqueue");

    assert!(matches!(outcome, EnqueueOutcome::Resolved), "got {outcome:?}");
    assert!(harness.worker.jobs.lock().is_empty(), "no worker submission");

    let commits = harness.gateway.commits.lock();
    assert_eq!(commits.len(), 1);
    assert!(commits[0].1.starts_with("[AUTO-HEAL] Fix runtime_error:"));
    drop(commits);

    harness.orchestrator.with_audit(|audit| {
        let sessions = audit.sessions();
        assert_eq!(sessions.len(), 1);
        let session = sessions[0];
        assert_eq!(session.strategy, RepairStrategy::KnowledgeBase);
        assert_eq!(session.status, SessionStatus::Success);
        assert_eq!(session.kb_match_confidence, Some(92));
        assert_eq!(session.verification_passed, Some(true));
        assert!(session.commit_hash.is_some());
    });

    let incident = harness.incidents.fetch("inc-kb-hit").expect("incident");
    assert_eq!(incident.status, IncidentStatus::Resolved);
    assert_eq!(incident.root_cause.as_deref(), Some("platform_failure"));
    assert_eq!(harness.orchestrator.safety().consecutive_failures(), 0);

    // Events arrive per-session in emission order.
    let first = events.try_recv().expect("healing-started");
    assert!(matches!(first, HealingEvent::HealingStarted { used_knowledge_base: true, .. }));
    let second = events.try_recv().expect("healing-complete");
    assert!(matches!(
        second,
        HealingEvent::HealingComplete {
            result: mend_proto::HealingResult::Success,
            ..
        }
    ));
}

// ─── Scenario 2: no KB match, worker delegation ───────────────────────────────

#[tokio::test]
async fn test_no_kb_match_dispatches_worker() {
    let harness = build_harness(test_config());
    let mut incident = runtime_incident("inc-worker");
    incident.kind = mend_proto::IncidentKind::BuildFailure;
    harness.incidents.ingest(&incident).expect("ingest");

    let outcome = harness
        .orchestrator
        .enqueue_incident("inc-worker")
        .await
        .expect("enqueue");

    let EnqueueOutcome::WorkerDispatched { job_id } = outcome else {
        panic!("expected worker dispatch, got {outcome:?}");
    };
    assert_eq!(job_id, "job-1");
    assert_eq!(harness.worker.jobs.lock().len(), 1);

    harness.orchestrator.with_audit(|audit| {
        let session = audit.session_by_worker_job("job-1").expect("session");
        assert_eq!(session.phase, SessionPhase::Repair);
        assert_eq!(session.status, SessionStatus::Active);
        assert_eq!(session.strategy, RepairStrategy::WorkerAgent);
    });

    // The orchestrator returned without a terminal transition and released
    // the lock.
    assert!(!harness.orchestrator.safety().lock_held());
    let incident = harness.incidents.fetch("inc-worker").expect("incident");
    assert_eq!(incident.status, IncidentStatus::Healing);
}

// ─── Classification feeds diagnosis, never overrides the router ──────────────

#[tokio::test]
async fn test_classification_feeds_diagnosis_and_root_cause() {
    let harness = build_harness(test_config());
    let mut incident = runtime_incident("inc-classify");
    incident.logs = Some("Worker job j-9 aborted after tool call timeout".to_string());
    harness.incidents.ingest(&incident).expect("ingest");

    let classification = mend_classify::classify(&incident);
    assert!(classification.is_agent_failure);
    // The classifier suggests the knowledge-base tier for runtime errors,
    // but with no KB entry the router still delegates to a worker.
    assert_eq!(
        classification.suggested_strategy,
        RepairStrategy::KnowledgeBase
    );

    let outcome = harness
        .orchestrator
        .enqueue_incident("inc-classify")
        .await
        .expect("enqueue");
    assert!(matches!(outcome, EnqueueOutcome::WorkerDispatched { .. }));

    harness.orchestrator.with_audit(|audit| {
        let session = audit.sessions()[0];
        assert_eq!(session.strategy, RepairStrategy::WorkerAgent);
        assert_eq!(
            session.diagnosis_notes.as_deref(),
            Some(classification.evidence.join("; ").as_str())
        );
    });

    let stored = harness.incidents.fetch("inc-classify").expect("incident");
    assert_eq!(stored.root_cause.as_deref(), Some("agent_failure"));
}

// ─── Scenario 3: verification fails, rollback occurs ─────────────────────────

#[tokio::test]
async fn test_verification_failure_rolls_back() {
    let incident = runtime_incident("inc-rollback");
    let fix = ProposedFix {
        summary: "patch two handlers".to_string(),
        edits: vec![
            FileEdit {
                path: "src/a.ts".to_string(),
                content: "patched a\n".to_string(),
            },
            FileEdit {
                path: "src/b.ts".to_string(),
                content: "patched b\n".to_string(),
            },
        ],
    };

    let harness = build_harness(test_config());
    seed_kb(harness.state_dir.path(), &incident, &fix, 10, 0, 100);
    let harness = mendops_tests::rebuild_harness(harness.state_dir, test_config());

    harness.workspace.seed("src/a.ts", "original a\n");
    harness.workspace.seed("src/b.ts", "original b\n");
    harness.workspace.set_check(false, "error TS2339: boom");
    harness.incidents.ingest(&incident).expect("ingest");

    let outcome = harness
        .orchestrator
        .enqueue_incident("inc-rollback")
        .await
        .expect("enqueue");
    assert!(matches!(outcome, EnqueueOutcome::SessionFailed { .. }));

    // Both files are back to their pre-session content.
    assert_eq!(harness.workspace.contents("src/a.ts").as_deref(), Some("original a\n"));
    assert_eq!(harness.workspace.contents("src/b.ts").as_deref(), Some("original b\n"));

    harness.orchestrator.with_audit(|audit| {
        let session = audit.sessions()[0];
        assert_eq!(session.status, SessionStatus::Failed);
        assert_eq!(session.verification_passed, Some(false));

        let fixes = audit.recent_fix_attempts(10);
        assert_eq!(fixes.len(), 1);
        assert_eq!(fixes[0].outcome, FixOutcome::RolledBack);
        assert!(audit.verify_chain());
    });

    let incident = harness.incidents.fetch("inc-rollback").expect("incident");
    assert_eq!(incident.attempt_count, 1);
    assert_eq!(incident.status, IncidentStatus::Open, "retryable under the cap");
    assert_eq!(harness.orchestrator.safety().consecutive_failures(), 1);

    // The failed application weakened the entry: encountered moved, fixed
    // did not.
    harness.orchestrator.with_kb(|kb| {
        let entry = kb
            .lookup(&mend_kb::incident_signature(&incident))
            .expect("entry");
        assert_eq!(entry.times_encountered, 11);
        assert_eq!(entry.times_fixed, 10);
    });
}

// ─── Scenario 4: three consecutive failures trip the kill-switch ─────────────

#[tokio::test]
async fn test_three_failures_activate_kill_switch() {
    let template = runtime_incident("inc-ks-template");
    let fix = guard_fix("src/x.ts");

    let harness = build_harness(test_config());
    // 10/10 at confidence 100: the entry stays over the tier-1 gate even as
    // failures accumulate during the test.
    seed_kb(harness.state_dir.path(), &template, &fix, 10, 0, 100);
    let harness = mendops_tests::rebuild_harness(harness.state_dir, test_config());
    harness.workspace.set_check(false, "error: still broken");

    let mut events = harness.orchestrator.bus().subscribe();

    for n in 1..=3 {
        let mut incident = runtime_incident(&format!("inc-ks-{n}"));
        incident.stack_trace = template.stack_trace.clone();
        harness.incidents.ingest(&incident).expect("ingest");
        let outcome = harness
            .orchestrator
            .enqueue_incident(&incident.id)
            .await
            .expect("enqueue");
        assert!(
            matches!(outcome, EnqueueOutcome::SessionFailed { .. }),
            "run {n}: got {outcome:?}"
        );
    }

    assert_eq!(harness.orchestrator.safety().consecutive_failures(), 3);
    assert!(harness.orchestrator.safety().kill_switch_active(chrono::Utc::now()));

    // Exactly one activation announcement.
    let mut activations = 0;
    while let Ok(event) = events.try_recv() {
        if matches!(event, HealingEvent::KillSwitchActivated { .. }) {
            activations += 1;
        }
    }
    assert_eq!(activations, 1);

    // The next enqueue is rejected by the switch.
    let incident = runtime_incident("inc-ks-after");
    harness.incidents.ingest(&incident).expect("ingest");
    let outcome = harness
        .orchestrator
        .enqueue_incident("inc-ks-after")
        .await
        .expect("enqueue");
    assert!(matches!(
        outcome,
        EnqueueOutcome::Denied(AdmissionDenied::KillSwitchActive { .. })
    ));
}

// ─── Scenario 5: low confidence opens a PR ───────────────────────────────────

#[tokio::test]
async fn test_low_confidence_creates_pr() {
    let incident = runtime_incident("abcd1234efgh5678");
    let fix = guard_fix("src/x.ts");

    let harness = build_harness(test_config());
    // Blended 92 selects tier 1, but with no test siblings and no history
    // the final score lands well under the 95 auto-commit gate.
    seed_kb(harness.state_dir.path(), &incident, &fix, 9, 1, 95);
    let harness = mendops_tests::rebuild_harness(harness.state_dir, test_config());
    harness.incidents.ingest(&incident).expect("ingest");

    let outcome = harness
        .orchestrator
        .enqueue_incident(&incident.id)
        .await
        .expect("enqueue");

    let EnqueueOutcome::PrOpened { pr_number, pr_url } = outcome else {
        panic!("expected PR, got {outcome:?}");
    };
    assert_eq!(pr_number, 1);
    assert!(pr_url.contains("/pr/1"));

    {
        let branches = harness.gateway.branches.lock();
        assert_eq!(branches.len(), 1);
        assert_eq!(branches[0], "auto-heal-abcd1234");
    }
    assert_eq!(harness.gateway.pushes.lock().len(), 1);
    {
        let prs = harness.gateway.prs.lock();
        assert_eq!(prs.len(), 1);
        assert!(prs[0].2.contains("## Proposed fix"));
        assert!(prs[0].2.contains("## Confidence"));
    }

    harness.orchestrator.with_audit(|audit| {
        let session = audit.sessions()[0];
        assert_eq!(session.pr_number, Some(1));
        assert!(session.pr_url.is_some());
        assert_eq!(session.status, SessionStatus::Success);

        let fixes = audit.recent_fix_attempts(10);
        assert_eq!(fixes[0].outcome, FixOutcome::Success);
        assert_eq!(fixes[0].pr_number, Some(1));
        assert!(fixes[0].pr_url.is_some());
    });

    let incident = harness.incidents.fetch(&incident.id).expect("incident");
    assert_eq!(incident.status, IncidentStatus::Resolved);
    assert!(
        incident
            .fix_description
            .as_deref()
            .unwrap()
            .contains("PR created:")
    );
}

// ─── Scenario 6: rate limit enforcement ──────────────────────────────────────

#[tokio::test]
async fn test_rate_limit_rejects_fourth_admission() {
    let harness = build_harness(test_config());
    for n in 1..=3 {
        let mut incident = runtime_incident(&format!("inc-rate-{n}"));
        incident.description = format!("distinct failure {n}");
        harness.incidents.ingest(&incident).expect("ingest");
        let outcome = harness
            .orchestrator
            .enqueue_incident(&incident.id)
            .await
            .expect("enqueue");
        assert!(matches!(outcome, EnqueueOutcome::WorkerDispatched { .. }));
    }

    let incident = runtime_incident("inc-rate-4");
    harness.incidents.ingest(&incident).expect("ingest");
    let outcome = harness
        .orchestrator
        .enqueue_incident("inc-rate-4")
        .await
        .expect("enqueue");
    assert!(matches!(
        outcome,
        EnqueueOutcome::Denied(AdmissionDenied::RateLimited { window_count: 3 })
    ));

    // No fourth session row, and the rejected incident is untouched.
    harness.orchestrator.with_audit(|audit| {
        assert_eq!(audit.sessions().len(), 3);
    });
    let rejected = harness.incidents.fetch("inc-rate-4").expect("incident");
    assert_eq!(rejected.status, IncidentStatus::Open);
    assert_eq!(rejected.attempt_count, 0);
}

// ─── Worker completion re-enters the pipeline ────────────────────────────────

#[tokio::test]
async fn test_worker_completion_resumes_and_opens_pr() {
    let harness = build_harness(test_config());
    let mut incident = runtime_incident("inc-resume");
    incident.kind = mend_proto::IncidentKind::HighCpu;
    harness.incidents.ingest(&incident).expect("ingest");

    let outcome = harness
        .orchestrator
        .enqueue_incident("inc-resume")
        .await
        .expect("enqueue");
    let EnqueueOutcome::WorkerDispatched { job_id } = outcome else {
        panic!("expected dispatch, got {outcome:?}");
    };

    // The worker edits the workspace out-of-band and reports back.
    harness
        .workspace
        .seed("src/worker-fix.ts", "export const throttled = true;\n");
    let outcome = harness
        .orchestrator
        .worker_completed(WorkerFixReport {
            job_id: job_id.clone(),
            summary: "throttle the hot loop".to_string(),
            files_changed: vec!["src/worker-fix.ts".to_string()],
        })
        .await
        .expect("resume");

    // No KB entry for the signature: the score stays under the auto-commit
    // gate and the fix goes to review.
    assert!(matches!(outcome, EnqueueOutcome::PrOpened { .. }), "got {outcome:?}");

    harness.orchestrator.with_audit(|audit| {
        let session = audit.session_by_worker_job(&job_id).expect("session");
        assert_eq!(session.status, SessionStatus::Success);
        assert_eq!(session.strategy, RepairStrategy::WorkerAgent);
        assert_eq!(session.files_changed, vec!["src/worker-fix.ts"]);
    });

    // The review outcome is unknown, so the knowledge base learns nothing.
    harness.orchestrator.with_kb(|kb| assert!(kb.is_empty()));

    // A duplicate completion report is a no-op.
    let outcome = harness
        .orchestrator
        .worker_completed(WorkerFixReport {
            job_id,
            summary: "duplicate".to_string(),
            files_changed: vec![],
        })
        .await
        .expect("duplicate resume");
    assert!(matches!(outcome, EnqueueOutcome::AlreadyHandled));
}

// ─── Deployment tracking ──────────────────────────────────────────────────────

async fn deploy_harness() -> (mendops_tests::Harness, String) {
    let incident = runtime_incident("inc-deploy");
    let fix = guard_fix("src/x.ts");

    let config = mend_orchestrator::HealingConfig {
        require_deployment: true,
        ..test_config()
    };
    let harness = build_harness(config.clone());
    seed_kb(harness.state_dir.path(), &incident, &fix, 10, 0, 100);
    seed_fix_history(harness.state_dir.path(), 10);
    let harness = mendops_tests::rebuild_harness(harness.state_dir, config);
    harness.workspace.seed("src/x.test.ts", "test('x', () => {});\n");
    harness.incidents.ingest(&incident).expect("ingest");

    let outcome = harness
        .orchestrator
        .enqueue_incident("inc-deploy")
        .await
        .expect("enqueue");
    assert!(matches!(outcome, EnqueueOutcome::AwaitingDeployment), "got {outcome:?}");

    let session_id = harness
        .orchestrator
        .with_audit(|audit| audit.sessions()[0].id.clone());
    (harness, session_id)
}

#[tokio::test]
async fn test_deployment_success_completes_session() {
    let (harness, session_id) = deploy_harness().await;

    harness.orchestrator.with_audit(|audit| {
        let session = audit.session(&session_id).expect("session");
        assert_eq!(session.phase, SessionPhase::Deploy);
        assert_eq!(session.status, SessionStatus::Active);
        assert!(session.deployment_started_at.is_some());
    });

    let outcome = harness
        .orchestrator
        .deployment_update(DeploymentUpdate {
            incident_id: "inc-deploy".to_string(),
            session_id: session_id.clone(),
            deployment_status: DeploymentStatus::Succeeded,
            url: None,
        })
        .await
        .expect("webhook");
    assert!(matches!(outcome, EnqueueOutcome::Resolved));

    harness.orchestrator.with_audit(|audit| {
        let session = audit.session(&session_id).expect("session");
        assert_eq!(session.status, SessionStatus::Success);
        assert_eq!(session.deployment_status, Some(DeploymentStatus::Succeeded));
    });
    let incident = harness.incidents.fetch("inc-deploy").expect("incident");
    assert_eq!(incident.status, IncidentStatus::Resolved);
}

#[tokio::test]
async fn test_deployment_failure_rolls_back_and_fails() {
    let (harness, session_id) = deploy_harness().await;

    let outcome = harness
        .orchestrator
        .deployment_update(DeploymentUpdate {
            incident_id: "inc-deploy".to_string(),
            session_id: session_id.clone(),
            deployment_status: DeploymentStatus::Failed,
            url: None,
        })
        .await
        .expect("webhook");
    assert!(matches!(outcome, EnqueueOutcome::SessionFailed { .. }));

    harness.orchestrator.with_audit(|audit| {
        let session = audit.session(&session_id).expect("session");
        assert_eq!(session.status, SessionStatus::Failed);
        let fixes = audit.recent_fix_attempts(10);
        assert!(fixes.iter().any(|f| f.outcome == FixOutcome::RolledBack));
    });
    assert_eq!(harness.orchestrator.safety().consecutive_failures(), 1);
}

// ─── Idempotence and the attempt cap ─────────────────────────────────────────

#[tokio::test]
async fn test_enqueue_is_idempotent_while_healing() {
    let harness = build_harness(test_config());
    let incident = runtime_incident("inc-idem");
    harness.incidents.ingest(&incident).expect("ingest");

    let first = harness
        .orchestrator
        .enqueue_incident("inc-idem")
        .await
        .expect("enqueue");
    assert!(matches!(first, EnqueueOutcome::WorkerDispatched { .. }));

    let second = harness
        .orchestrator
        .enqueue_incident("inc-idem")
        .await
        .expect("re-enqueue");
    assert!(matches!(second, EnqueueOutcome::AlreadyHandled));
    harness.orchestrator.with_audit(|audit| {
        assert_eq!(audit.sessions().len(), 1, "no second session row");
    });
}

#[tokio::test]
async fn test_attempt_cap_terminally_fails_incident() {
    let harness = build_harness(test_config());
    let mut incident = runtime_incident("inc-capped");
    incident.attempt_count = 3;
    incident.mark_failed();
    harness.incidents.ingest(&incident).expect("ingest");

    let outcome = harness
        .orchestrator
        .enqueue_incident("inc-capped")
        .await
        .expect("enqueue");
    assert!(matches!(outcome, EnqueueOutcome::AttemptsExhausted));

    let incident = harness.incidents.fetch("inc-capped").expect("incident");
    assert_eq!(incident.status, IncidentStatus::Failed);
    assert_eq!(incident.attempt_count, 3, "cap is never exceeded");
}

// ─── Boundary: blended confidence of exactly 90 selects tier 1 ───────────────

#[tokio::test]
async fn test_kb_gate_is_inclusive_at_90() {
    let incident = runtime_incident("inc-boundary");
    let fix = guard_fix("src/x.ts");

    let harness = build_harness(test_config());
    // 9/10 at stored confidence 90: round(54 + 36) = 90, exactly the gate.
    seed_kb(harness.state_dir.path(), &incident, &fix, 9, 1, 90);
    let harness = mendops_tests::rebuild_harness(harness.state_dir, test_config());
    harness.incidents.ingest(&incident).expect("ingest");

    harness
        .orchestrator
        .enqueue_incident("inc-boundary")
        .await
        .expect("enqueue");

    assert!(harness.worker.jobs.lock().is_empty(), "tier 1 at the boundary");
    harness.orchestrator.with_audit(|audit| {
        let session = audit.sessions()[0];
        assert_eq!(session.strategy, RepairStrategy::KnowledgeBase);
        assert_eq!(session.kb_match_confidence, Some(90));
    });
}

// ─── Tier-2 submission failure never escalates ───────────────────────────────

#[tokio::test]
async fn test_worker_rejection_fails_without_escalation() {
    let harness = build_harness(test_config());
    harness.worker.fail_submissions(true);
    let incident = runtime_incident("inc-rejected");
    harness.incidents.ingest(&incident).expect("ingest");

    let outcome = harness
        .orchestrator
        .enqueue_incident("inc-rejected")
        .await
        .expect("enqueue");
    let EnqueueOutcome::SessionFailed { reason } = outcome else {
        panic!("expected failure, got {outcome:?}");
    };
    assert_eq!(reason, "escalation requires explicit user request");

    harness.orchestrator.with_audit(|audit| {
        let session = audit.sessions()[0];
        assert_eq!(session.status, SessionStatus::Failed);
        // The tier that failed is recorded; no escalation is consumed.
        assert_eq!(session.strategy, RepairStrategy::WorkerAgent);
    });
    let incident = harness.incidents.fetch("inc-rejected").expect("incident");
    assert_eq!(incident.status, IncidentStatus::Failed);
}

#[tokio::test]
async fn test_missing_identity_fails_tier_two_cleanly() {
    let harness = build_harness_with_identity(
        test_config(),
        mend_orchestrator::StaticIdentity::default(),
    );
    let incident = runtime_incident("inc-no-identity");
    harness.incidents.ingest(&incident).expect("ingest");

    let outcome = harness
        .orchestrator
        .enqueue_incident("inc-no-identity")
        .await
        .expect("enqueue");
    assert!(matches!(outcome, EnqueueOutcome::SessionFailed { .. }));
    assert!(harness.worker.jobs.lock().is_empty(), "no submission attempted");
}

// ─── Commit failure is treated like a verification failure ───────────────────

#[tokio::test]
async fn test_commit_failure_rolls_back() {
    let incident = runtime_incident("inc-commit-fail");
    let fix = guard_fix("src/x.ts");

    let harness = build_harness(test_config());
    seed_kb(harness.state_dir.path(), &incident, &fix, 10, 0, 100);
    seed_fix_history(harness.state_dir.path(), 10);
    let harness = mendops_tests::rebuild_harness(harness.state_dir, test_config());
    harness.workspace.seed("src/x.ts", "original\n");
    harness.workspace.seed("src/x.test.ts", "test('x', () => {});\n");
    harness.gateway.fail_commits(true);
    harness.incidents.ingest(&incident).expect("ingest");

    let outcome = harness
        .orchestrator
        .enqueue_incident("inc-commit-fail")
        .await
        .expect("enqueue");
    assert!(matches!(outcome, EnqueueOutcome::SessionFailed { .. }));

    assert_eq!(
        harness.workspace.contents("src/x.ts").as_deref(),
        Some("original\n"),
        "commit failure reverts the working tree"
    );
    harness.orchestrator.with_audit(|audit| {
        let fixes = audit.recent_fix_attempts(10);
        assert_eq!(fixes.last().unwrap().outcome, FixOutcome::RolledBack);
    });
}
