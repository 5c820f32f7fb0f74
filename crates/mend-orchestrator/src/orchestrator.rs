//! The incident lifecycle state machine and three-tier repair router.
//!
//! Per admitted incident: pick a tier (knowledge base when the blended
//! confidence clears the gate, otherwise a worker job), apply or await the
//! proposed fix, verify, then land it. A score at or above the confidence
//! threshold commits directly; anything below opens a review pull request.
//! Every failure path rolls the workspace back before the session is marked
//! failed.

use chrono::{DateTime, Utc};
use mend_classify::{classify, FailureCategory};
use mend_confidence::{ConfidenceReport, ConfidenceScorer, ModifiedFile, Recommendation};
use mend_gateway::{CommitGateway, FilePayload};
use mend_kb::{incident_signature, KnowledgeBase};
use mend_proto::{
    ActionRecord, DeploymentStatus, DeploymentUpdate, FileEdit, FixOutcome, HealAttempt,
    HealingEvent, HealingResult, HealingSession, Incident, IncidentStatus, KbEntry, ProposedFix,
    RepairStrategy, SessionPhase, WorkerFixReport,
};
use mend_safety::{AdmissionDenied, SafetyEnvelope};
use mend_workspace::Workspace;
use parking_lot::Mutex;
use std::sync::Arc;
use tracing::{info, warn};

use crate::bus::EventBus;
use crate::collaborators::{IdentityResolver, IncidentStore, WorkerAgent};
use crate::config::HealingConfig;
use crate::error::{OrchestratorError, OrchestratorResult};
use crate::metrics::HealingMetrics;

// ─── Outcomes ─────────────────────────────────────────────────────────────────

/// What happened to an enqueued incident or a resumed session.
#[derive(Debug)]
pub enum EnqueueOutcome {
    /// Rejected by the safety envelope; nothing changed.
    Denied(AdmissionDenied),
    /// Idempotent no-op: already healing or already terminal.
    AlreadyHandled,
    /// Attempt cap reached; the incident was terminally failed.
    AttemptsExhausted,
    /// Fix landed and the incident is resolved.
    Resolved,
    /// Fix pushed for human review.
    PrOpened { pr_number: u64, pr_url: String },
    /// Tier-2 job submitted; the session resumes on the worker callback.
    WorkerDispatched { job_id: String },
    /// Commit landed; the session awaits the deployment webhook.
    AwaitingDeployment,
    /// The session failed (rollback performed where required).
    SessionFailed { reason: String },
    /// Informational update absorbed (e.g. a `deploying` webhook).
    Acknowledged,
}

/// Constructor dependencies for [`Orchestrator`].
pub struct OrchestratorParts {
    pub config: HealingConfig,
    pub kb: KnowledgeBase,
    pub audit: mend_audit::AuditStore,
    pub incidents: Arc<dyn IncidentStore>,
    pub workspace: Arc<dyn Workspace>,
    pub gateway: Arc<dyn CommitGateway>,
    pub worker: Arc<dyn WorkerAgent>,
    pub identity: Arc<dyn IdentityResolver>,
}

// ─── Orchestrator ─────────────────────────────────────────────────────────────

pub struct Orchestrator {
    config: HealingConfig,
    safety: Arc<SafetyEnvelope>,
    scorer: ConfidenceScorer,
    kb: Mutex<KnowledgeBase>,
    audit: Mutex<mend_audit::AuditStore>,
    incidents: Arc<dyn IncidentStore>,
    workspace: Arc<dyn Workspace>,
    gateway: Arc<dyn CommitGateway>,
    worker: Arc<dyn WorkerAgent>,
    identity: Arc<dyn IdentityResolver>,
    bus: EventBus,
    metrics: Arc<HealingMetrics>,
}

impl Orchestrator {
    pub fn new(parts: OrchestratorParts) -> Self {
        let safety = SafetyEnvelope::new(parts.config.safety_limits());
        let scorer = ConfidenceScorer::with_threshold(parts.config.auto_commit_threshold);
        Self {
            config: parts.config,
            safety,
            scorer,
            kb: Mutex::new(parts.kb),
            audit: Mutex::new(parts.audit),
            incidents: parts.incidents,
            workspace: parts.workspace,
            gateway: parts.gateway,
            worker: parts.worker,
            identity: parts.identity,
            bus: EventBus::default(),
            metrics: Arc::new(HealingMetrics::new()),
        }
    }

    pub fn bus(&self) -> &EventBus {
        &self.bus
    }

    pub fn metrics(&self) -> &Arc<HealingMetrics> {
        &self.metrics
    }

    pub fn safety(&self) -> &Arc<SafetyEnvelope> {
        &self.safety
    }

    pub fn config(&self) -> &HealingConfig {
        &self.config
    }

    /// Read-only access to the audit rows (status surfaces, tests).
    pub fn with_audit<R>(&self, f: impl FnOnce(&mend_audit::AuditStore) -> R) -> R {
        f(&self.audit.lock())
    }

    /// Read-only access to the knowledge base.
    pub fn with_kb<R>(&self, f: impl FnOnce(&KnowledgeBase) -> R) -> R {
        f(&self.kb.lock())
    }

    // ─── Intake ──────────────────────────────────────────────────────────────

    /// Admit and process one incident. Idempotent: an incident that is
    /// already healing or already resolved is a no-op.
    pub async fn enqueue_incident(&self, incident_id: &str) -> OrchestratorResult<EnqueueOutcome> {
        let now = Utc::now();
        let mut incident = self
            .incidents
            .fetch(incident_id)
            .ok_or_else(|| OrchestratorError::UnknownIncident(incident_id.to_string()))?;

        if matches!(
            incident.status,
            IncidentStatus::Healing | IncidentStatus::Resolved
        ) {
            info!(incident = %incident.id, status = ?incident.status, "enqueue is a no-op");
            return Ok(EnqueueOutcome::AlreadyHandled);
        }

        // Admission rules 1-3 (kill-switch, rate limit, concurrency).
        if let Err(denied) = self.safety.preflight(now) {
            info!(incident = %incident.id, reason = %denied, "admission denied");
            return Ok(EnqueueOutcome::Denied(denied));
        }

        // Admission rule 4: attempt cap.
        if incident.attempt_count >= self.config.max_attempts_per_incident {
            incident.mark_failed();
            self.incidents.update(&incident)?;
            warn!(incident = %incident.id, "attempt cap reached — incident terminally failed");
            return Ok(EnqueueOutcome::AttemptsExhausted);
        }

        let _permit = match self.safety.try_admit(now) {
            Ok(permit) => permit,
            Err(denied) => return Ok(EnqueueOutcome::Denied(denied)),
        };

        incident.begin_attempt(self.config.max_attempts_per_incident, now)?;

        let classification = classify(&incident);
        incident.root_cause = Some(
            match classification.category {
                FailureCategory::PlatformFailure => "platform_failure",
                FailureCategory::AgentFailure => "agent_failure",
            }
            .to_string(),
        );
        self.incidents.update(&incident)?;

        let notes = classification.evidence.join("; ");
        let signature = incident_signature(&incident);

        let kb_hit = { self.kb.lock().lookup_scored(&signature) };
        match kb_hit {
            Some((entry, confidence)) if confidence >= self.config.kb_auto_apply_threshold => {
                info!(incident = %incident.id, confidence, "tier 1 selected: knowledge base fix");
                self.run_kb_session(incident, signature, entry, confidence, notes, now)
                    .await
            }
            _ => {
                info!(incident = %incident.id, "tier 2 selected: worker delegation");
                self.dispatch_worker(incident, notes, now).await
            }
        }
    }

    // ─── Tier 1: knowledge-base session ──────────────────────────────────────

    async fn run_kb_session(
        &self,
        incident: Incident,
        signature: String,
        entry: KbEntry,
        confidence: u8,
        notes: String,
        now: DateTime<Utc>,
    ) -> OrchestratorResult<EnqueueOutcome> {
        self.metrics.sessions_started.inc();
        self.metrics.kb_hits.inc();

        let mut session = HealingSession::new(incident.id.clone(), RepairStrategy::KnowledgeBase);
        session.kb_match_id = Some(signature.clone());
        session.kb_match_confidence = Some(confidence);
        session.diagnosis_notes = Some(notes);

        let Some(fix) = ProposedFix::from_json(&entry.successful_fix) else {
            self.audit.lock().upsert_session(&session)?;
            self.kb_failure(&signature, now);
            return self.fail_session(
                incident,
                session,
                None,
                "knowledge base fix is not applicable",
                None,
                false,
                now,
            );
        };
        session.proposed_fix = Some(fix.summary.clone());
        session.files_changed = fix.paths();

        let attempt_id = {
            let mut audit = self.audit.lock();
            audit.upsert_session(&session)?;
            let attempt = HealAttempt::new(
                incident.id.clone(),
                session.id.clone(),
                incident.attempt_count,
                RepairStrategy::KnowledgeBase,
            );
            let id = attempt.id.clone();
            audit.insert_attempt(attempt)?;
            id
        };

        self.bus.publish(HealingEvent::HealingStarted {
            incident_id: incident.id.clone(),
            session_id: session.id.clone(),
            incident: Box::new(incident.clone()),
            strategy: RepairStrategy::KnowledgeBase,
            used_knowledge_base: true,
        });

        // Repair phase: apply the cached edits.
        self.workspace.clear_baselines();
        for edit in &fix.edits {
            if let Err(e) = self.workspace.write_file(&edit.path, edit.content.as_bytes()) {
                warn!(path = %edit.path, error = %e, "fix application failed");
                self.rollback(&session.files_changed);
                self.kb_failure(&signature, now);
                return self.fail_session(
                    incident,
                    session,
                    Some(&attempt_id),
                    &format!("fix application failed: {e}"),
                    None,
                    false,
                    now,
                );
            }
        }
        session.enter_phase(SessionPhase::Repair);
        {
            let mut audit = self.audit.lock();
            audit.upsert_session(&session)?;
            audit.append_action(&attempt_id, ActionRecord::now("kb_fix_applied"))?;
        }

        self.verify_and_land(incident, session, attempt_id, signature, Some(entry), now)
            .await
    }

    // ─── Tier 2: worker delegation ───────────────────────────────────────────

    async fn dispatch_worker(
        &self,
        incident: Incident,
        notes: String,
        now: DateTime<Utc>,
    ) -> OrchestratorResult<EnqueueOutcome> {
        self.metrics.sessions_started.inc();

        let mut session = HealingSession::new(incident.id.clone(), RepairStrategy::WorkerAgent);
        session.diagnosis_notes = Some(notes);

        let attempt_id = {
            let mut audit = self.audit.lock();
            audit.upsert_session(&session)?;
            let attempt = HealAttempt::new(
                incident.id.clone(),
                session.id.clone(),
                incident.attempt_count,
                RepairStrategy::WorkerAgent,
            );
            let id = attempt.id.clone();
            audit.insert_attempt(attempt)?;
            id
        };

        // Tier 3 is a placeholder: a failed submission never auto-escalates.
        let Some(system_user) = self.identity.system_user_id() else {
            warn!(incident = %incident.id, "no system user — tier 2 cannot submit");
            return self.fail_session(
                incident,
                session,
                Some(&attempt_id),
                "escalation requires explicit user request",
                None,
                true,
                now,
            );
        };

        let diagnostic = mend_classify::diagnostic_message(&incident);
        match self.worker.submit_job(&system_user, &diagnostic).await {
            Ok(job_id) => {
                session.worker_job_id = Some(job_id.clone());
                session.enter_phase(SessionPhase::Repair);
                {
                    let mut audit = self.audit.lock();
                    audit.upsert_session(&session)?;
                    audit.append_action(
                        &attempt_id,
                        ActionRecord::with_detail(
                            "worker_job_submitted",
                            serde_json::json!({ "job_id": job_id }),
                        ),
                    )?;
                }
                self.metrics.worker_dispatches.inc();
                self.bus.publish(HealingEvent::HealingStarted {
                    incident_id: incident.id.clone(),
                    session_id: session.id.clone(),
                    incident: Box::new(incident.clone()),
                    strategy: RepairStrategy::WorkerAgent,
                    used_knowledge_base: false,
                });
                info!(incident = %incident.id, job = %job_id, "worker job dispatched");
                Ok(EnqueueOutcome::WorkerDispatched { job_id })
            }
            Err(e) => {
                warn!(incident = %incident.id, error = %e, "worker submission failed");
                self.fail_session(
                    incident,
                    session,
                    Some(&attempt_id),
                    "escalation requires explicit user request",
                    None,
                    true,
                    now,
                )
            }
        }
    }

    /// Resume a session when its worker job completes. The worker's edits
    /// re-enter the full verification, confidence, and commit pipeline.
    pub async fn worker_completed(
        &self,
        report: WorkerFixReport,
    ) -> OrchestratorResult<EnqueueOutcome> {
        let now = Utc::now();
        let session = {
            self.audit
                .lock()
                .session_by_worker_job(&report.job_id)
                .cloned()
        }
        .ok_or_else(|| OrchestratorError::UnknownWorkerJob(report.job_id.clone()))?;

        if session.is_terminal() {
            return Ok(EnqueueOutcome::AlreadyHandled);
        }
        let _permit = match self.safety.try_resume(now) {
            Ok(permit) => permit,
            Err(denied) => return Ok(EnqueueOutcome::Denied(denied)),
        };

        let incident = self
            .incidents
            .fetch(&session.incident_id)
            .ok_or_else(|| OrchestratorError::UnknownIncident(session.incident_id.clone()))?;

        let mut session = session;
        session.files_changed = report.files_changed.clone();
        session.proposed_fix = Some(report.summary.clone());
        self.audit.lock().upsert_session(&session)?;

        let attempt_id = self.open_attempt_id(&incident, &session)?;
        self.audit.lock().append_action(
            &attempt_id,
            ActionRecord::with_detail(
                "worker_job_completed",
                serde_json::json!({ "job_id": report.job_id }),
            ),
        )?;

        let signature = incident_signature(&incident);
        let kb_entry = { self.kb.lock().lookup(&signature).cloned() };
        self.verify_and_land(incident, session, attempt_id, signature, kb_entry, now)
            .await
    }

    // ─── Verification and landing ────────────────────────────────────────────

    async fn verify_and_land(
        &self,
        incident: Incident,
        mut session: HealingSession,
        attempt_id: String,
        signature: String,
        kb_entry: Option<KbEntry>,
        now: DateTime<Utc>,
    ) -> OrchestratorResult<EnqueueOutcome> {
        session.enter_phase(SessionPhase::Verify);
        {
            let mut audit = self.audit.lock();
            audit.upsert_session(&session)?;
            audit.append_action(&attempt_id, ActionRecord::now("verification_started"))?;
        }

        let report = mend_verify::verify(self.workspace.as_ref(), &session.files_changed).await;
        session.verification_results = Some(report.clone());
        session.verification_passed = Some(report.passed);
        self.audit.lock().upsert_session(&session)?;

        let proposed = session.proposed_fix.clone().unwrap_or_default();

        if !report.passed {
            self.rollback(&session.files_changed);
            {
                let mut audit = self.audit.lock();
                let fix = mend_proto::FixAttempt::pending(
                    signature.clone(),
                    session.id.clone(),
                    proposed.clone(),
                    0,
                );
                let fix_id = fix.id.clone();
                audit.insert_fix(fix)?;
                audit.complete_fix(
                    &fix_id,
                    FixOutcome::RolledBack,
                    Some(report.clone()),
                    None,
                    None,
                    now,
                )?;
            }
            self.kb_failure(&signature, now);
            return self.fail_session(
                incident,
                session,
                Some(&attempt_id),
                "verification failed",
                Some(false),
                false,
                now,
            );
        }

        let files: Vec<ModifiedFile> = session
            .files_changed
            .iter()
            .map(|path| ModifiedFile {
                path: path.clone(),
                source: self
                    .workspace
                    .read_file(path)
                    .ok()
                    .map(|bytes| String::from_utf8_lossy(&bytes).into_owned()),
            })
            .collect();
        let history = { self.audit.lock().recent_fix_attempts(10) };
        let ws = Arc::clone(&self.workspace);
        let probe = move |p: &str| ws.file_exists(p);
        let score = self
            .scorer
            .score(kb_entry.as_ref(), &files, &probe, &history, Some(true));
        info!(
            incident = %incident.id,
            score = score.score,
            recommendation = ?score.recommendation,
            "fix scored"
        );

        let fix_row = mend_proto::FixAttempt::pending(
            signature.clone(),
            session.id.clone(),
            proposed.clone(),
            score.score,
        );
        let fix_id = fix_row.id.clone();
        self.audit.lock().insert_fix(fix_row)?;

        match score.recommendation {
            Recommendation::AutoCommit => {
                self.auto_commit(incident, session, attempt_id, signature, fix_id, now)
                    .await
            }
            Recommendation::CreatePr => {
                self.open_pr(incident, session, attempt_id, fix_id, score, now)
                    .await
            }
        }
    }

    async fn auto_commit(
        &self,
        incident: Incident,
        mut session: HealingSession,
        attempt_id: String,
        signature: String,
        fix_id: String,
        now: DateTime<Utc>,
    ) -> OrchestratorResult<EnqueueOutcome> {
        self.audit
            .lock()
            .append_action(&attempt_id, ActionRecord::now("auto_commit_started"))?;

        let payloads = self.read_payloads(&session.files_changed);
        let message = format!("[AUTO-HEAL] Fix {}: {}", incident.kind, incident.title);

        match self.gateway.commit_to_main(&payloads, &message).await {
            Ok(receipt) => {
                session.commit_hash = receipt.commit_hash.clone();
                if self.config.require_deployment {
                    session.enter_phase(SessionPhase::Deploy);
                    session.deployment_status = Some(DeploymentStatus::Deploying);
                    session.deployment_started_at = Some(now);
                    self.audit.lock().upsert_session(&session)?;
                    info!(incident = %incident.id, "commit landed — awaiting deployment");
                    return Ok(EnqueueOutcome::AwaitingDeployment);
                }
                self.land_success(incident, session, &attempt_id, &fix_id, now)
            }
            Err(e) => {
                warn!(incident = %incident.id, error = %e, "commit failed — rolling back");
                self.rollback(&session.files_changed);
                self.audit.lock().complete_fix(
                    &fix_id,
                    FixOutcome::RolledBack,
                    session.verification_results.clone(),
                    None,
                    None,
                    now,
                )?;
                self.kb_failure(&signature, now);
                self.fail_session(
                    incident,
                    session,
                    Some(&attempt_id),
                    &format!("commit failed: {e}"),
                    Some(true),
                    false,
                    now,
                )
            }
        }
    }

    async fn open_pr(
        &self,
        mut incident: Incident,
        mut session: HealingSession,
        attempt_id: String,
        fix_id: String,
        score: ConfidenceReport,
        now: DateTime<Utc>,
    ) -> OrchestratorResult<EnqueueOutcome> {
        self.audit
            .lock()
            .append_action(&attempt_id, ActionRecord::now("pr_started"))?;

        let branch = format!(
            "auto-heal-{}",
            incident.id.chars().take(8).collect::<String>()
        );
        if let Err(e) = self.gateway.create_branch_from_default(&branch).await {
            return self
                .pr_failure(incident, session, &attempt_id, &fix_id, &format!("branch creation failed: {e}"), now);
        }

        let payloads = self.read_payloads(&session.files_changed);
        if payloads.is_empty() {
            return self.pr_failure(
                incident,
                session,
                &attempt_id,
                &fix_id,
                "no readable files for the review branch",
                now,
            );
        }

        let push_message = format!("Auto-heal: {}", incident.title);
        if let Err(e) = self.gateway.push_branch(&branch, &payloads, &push_message).await {
            return self
                .pr_failure(incident, session, &attempt_id, &fix_id, &format!("branch push failed: {e}"), now);
        }

        let title = format!("Auto-heal: {}", incident.title);
        let body = pr_body(&session, &score);
        match self.gateway.open_or_update_pr(&branch, &title, &body).await {
            Ok(receipt) => {
                session.pr_number = Some(receipt.pr_number);
                session.pr_url = Some(receipt.pr_url.clone());
                session.complete_success(now);
                {
                    let mut audit = self.audit.lock();
                    audit.upsert_session(&session)?;
                    audit.complete_fix(
                        &fix_id,
                        FixOutcome::Success,
                        session.verification_results.clone(),
                        Some(receipt.pr_number),
                        Some(receipt.pr_url.clone()),
                        now,
                    )?;
                    audit.finalize_attempt(&attempt_id, true, Some(true), None, now)?;
                }
                incident.mark_resolved(format!("PR created: {}", receipt.pr_url), None, now);
                self.incidents.update(&incident)?;
                self.safety.record_success();
                self.metrics.sessions_succeeded.inc();
                self.metrics.prs_opened.inc();
                self.workspace.clear_baselines();
                self.bus.publish(HealingEvent::HealingComplete {
                    incident_id: incident.id.clone(),
                    session_id: session.id.clone(),
                    result: HealingResult::PrCreated,
                    message: format!("fix awaiting review: {}", receipt.pr_url),
                    pr_number: Some(receipt.pr_number),
                    pr_url: Some(receipt.pr_url.clone()),
                });
                info!(incident = %incident.id, pr = receipt.pr_number, "pull request opened");
                Ok(EnqueueOutcome::PrOpened {
                    pr_number: receipt.pr_number,
                    pr_url: receipt.pr_url,
                })
            }
            Err(e) => self.pr_failure(
                incident,
                session,
                &attempt_id,
                &fix_id,
                &format!("pull request failed: {e}"),
                now,
            ),
        }
    }

    // ─── Deployment webhook ──────────────────────────────────────────────────

    /// Handle an inbound deployment status for a session in the deploy
    /// phase.
    pub async fn deployment_update(
        &self,
        update: DeploymentUpdate,
    ) -> OrchestratorResult<EnqueueOutcome> {
        let now = Utc::now();
        self.bus.publish(HealingEvent::DeploymentStatus {
            session_id: update.session_id.clone(),
            incident_id: update.incident_id.clone(),
            deployment_status: update.deployment_status,
            timestamp: now,
        });

        let session = { self.audit.lock().session(&update.session_id).cloned() }
            .ok_or_else(|| OrchestratorError::UnknownSession(update.session_id.clone()))?;
        if session.is_terminal() {
            return Ok(EnqueueOutcome::AlreadyHandled);
        }

        match update.deployment_status {
            DeploymentStatus::Deploying => {
                let mut session = session;
                session.deployment_status = Some(DeploymentStatus::Deploying);
                self.audit.lock().upsert_session(&session)?;
                Ok(EnqueueOutcome::Acknowledged)
            }
            DeploymentStatus::Succeeded => {
                let _permit = match self.safety.try_resume(now) {
                    Ok(permit) => permit,
                    Err(denied) => return Ok(EnqueueOutcome::Denied(denied)),
                };
                let incident = self
                    .incidents
                    .fetch(&session.incident_id)
                    .ok_or_else(|| OrchestratorError::UnknownIncident(session.incident_id.clone()))?;
                let mut session = session;
                session.deployment_status = Some(DeploymentStatus::Succeeded);

                let attempt_id = self.open_attempt_id(&incident, &session)?;
                let fix_id = {
                    self.audit
                        .lock()
                        .pending_fix_for_session(&session.id)
                        .map(|f| f.id.clone())
                };
                let Some(fix_id) = fix_id else {
                    return self.fail_session(
                        incident,
                        session,
                        Some(&attempt_id),
                        "no pending fix for deployed session",
                        None,
                        false,
                        now,
                    );
                };
                self.land_success(incident, session, &attempt_id, &fix_id, now)
            }
            DeploymentStatus::Failed => {
                let _permit = match self.safety.try_resume(now) {
                    Ok(permit) => permit,
                    Err(denied) => return Ok(EnqueueOutcome::Denied(denied)),
                };
                let incident = self
                    .incidents
                    .fetch(&session.incident_id)
                    .ok_or_else(|| OrchestratorError::UnknownIncident(session.incident_id.clone()))?;
                let signature = incident_signature(&incident);
                self.rollback(&session.files_changed);
                let attempt_id = self.open_attempt_id(&incident, &session)?;
                if let Some(fix_id) = {
                    self.audit
                        .lock()
                        .pending_fix_for_session(&session.id)
                        .map(|f| f.id.clone())
                } {
                    self.audit.lock().complete_fix(
                        &fix_id,
                        FixOutcome::RolledBack,
                        session.verification_results.clone(),
                        None,
                        None,
                        now,
                    )?;
                }
                self.kb_failure(&signature, now);
                self.fail_session(
                    incident,
                    session,
                    Some(&attempt_id),
                    "deployment failed",
                    Some(true),
                    false,
                    now,
                )
            }
        }
    }

    // ─── Shared landing and failure paths ────────────────────────────────────

    fn land_success(
        &self,
        mut incident: Incident,
        mut session: HealingSession,
        attempt_id: &str,
        fix_id: &str,
        now: DateTime<Utc>,
    ) -> OrchestratorResult<EnqueueOutcome> {
        let signature = incident_signature(&incident);
        let confidence = {
            self.audit
                .lock()
                .fix(fix_id)
                .map(|f| f.confidence_score)
                .unwrap_or_default()
        };
        {
            let mut audit = self.audit.lock();
            audit.complete_fix(
                fix_id,
                FixOutcome::Success,
                session.verification_results.clone(),
                None,
                None,
                now,
            )?;
            audit.finalize_attempt(attempt_id, true, session.verification_passed, None, now)?;
        }

        // Worker-produced fixes become applicable knowledge-base entries;
        // a re-applied KB fix just reinforces its existing entry.
        let kb_fix = if session.strategy == RepairStrategy::WorkerAgent {
            let edits: Vec<FileEdit> = self
                .read_payloads(&session.files_changed)
                .into_iter()
                .map(|p| FileEdit {
                    path: p.path,
                    content: p.content,
                })
                .collect();
            Some(
                ProposedFix {
                    summary: session.proposed_fix.clone().unwrap_or_default(),
                    edits,
                }
                .to_json(),
            )
        } else {
            None
        };
        if let Err(e) = self.kb.lock().record_success(
            &signature,
            incident.kind,
            &incident.description,
            kb_fix.as_deref(),
            confidence,
            now,
        ) {
            warn!(error = %e, "knowledge base update failed");
        }

        session.complete_success(now);
        self.audit.lock().upsert_session(&session)?;

        let summary = session
            .proposed_fix
            .clone()
            .unwrap_or_else(|| "fix applied".to_string());
        incident.mark_resolved(summary, session.commit_hash.clone(), now);
        self.incidents.update(&incident)?;

        self.safety.record_success();
        self.metrics.sessions_succeeded.inc();
        self.workspace.clear_baselines();

        self.bus.publish(HealingEvent::HealingComplete {
            incident_id: incident.id.clone(),
            session_id: session.id.clone(),
            result: HealingResult::Success,
            message: match &session.commit_hash {
                Some(hash) => format!("fix committed: {hash}"),
                None => "fix landed with nothing to commit".to_string(),
            },
            pr_number: None,
            pr_url: None,
        });
        info!(incident = %incident.id, "incident resolved");
        Ok(EnqueueOutcome::Resolved)
    }

    /// Failure cleanup on the PR path: rollback, fix row marked failed, then
    /// the common session-failure machinery.
    fn pr_failure(
        &self,
        incident: Incident,
        session: HealingSession,
        attempt_id: &str,
        fix_id: &str,
        reason: &str,
        now: DateTime<Utc>,
    ) -> OrchestratorResult<EnqueueOutcome> {
        warn!(incident = %incident.id, reason, "pull request path failed");
        self.rollback(&session.files_changed);
        self.audit.lock().complete_fix(
            fix_id,
            FixOutcome::Failure,
            session.verification_results.clone(),
            None,
            None,
            now,
        )?;
        self.fail_session(incident, session, Some(attempt_id), reason, Some(true), false, now)
    }

    /// Mark a session failed, advance the incident, and run the
    /// consecutive-failure accounting (kill-switch included) before
    /// returning.
    fn fail_session(
        &self,
        mut incident: Incident,
        mut session: HealingSession,
        attempt_id: Option<&str>,
        reason: &str,
        verification_passed: Option<bool>,
        force_incident_failed: bool,
        now: DateTime<Utc>,
    ) -> OrchestratorResult<EnqueueOutcome> {
        session.fail(reason, now);
        {
            let mut audit = self.audit.lock();
            audit.upsert_session(&session)?;
            if let Some(attempt_id) = attempt_id {
                audit.finalize_attempt(
                    attempt_id,
                    false,
                    verification_passed,
                    Some(reason.to_string()),
                    now,
                )?;
            }
        }

        if force_incident_failed
            || incident.attempt_count >= self.config.max_attempts_per_incident
        {
            incident.mark_failed();
        } else {
            incident.reopen();
        }
        self.incidents.update(&incident)?;
        self.metrics.sessions_failed.inc();

        if let Some(until) = self.safety.record_failure(now) {
            self.metrics.kill_switch_activations.inc();
            self.bus.publish(HealingEvent::KillSwitchActivated {
                consecutive_failures: self.safety.consecutive_failures(),
                disabled_until: until,
                message: "auto-healing disabled after consecutive failures".to_string(),
            });
        }

        self.bus.publish(HealingEvent::HealingComplete {
            incident_id: incident.id.clone(),
            session_id: session.id.clone(),
            result: HealingResult::Failed,
            message: reason.to_string(),
            pr_number: None,
            pr_url: None,
        });
        warn!(incident = %incident.id, reason, "healing session failed");
        Ok(EnqueueOutcome::SessionFailed {
            reason: reason.to_string(),
        })
    }

    // ─── Helpers ─────────────────────────────────────────────────────────────

    /// The open attempt row of a session, creating one if the trail is
    /// missing it (resume after a partial restart).
    fn open_attempt_id(
        &self,
        incident: &Incident,
        session: &HealingSession,
    ) -> OrchestratorResult<String> {
        let existing = {
            self.audit
                .lock()
                .open_attempt_for_session(&session.id)
                .map(|a| a.id.clone())
        };
        if let Some(id) = existing {
            return Ok(id);
        }
        let attempt = HealAttempt::new(
            incident.id.clone(),
            session.id.clone(),
            incident.attempt_count,
            session.strategy,
        );
        let id = attempt.id.clone();
        self.audit.lock().insert_attempt(attempt)?;
        Ok(id)
    }

    fn read_payloads(&self, files: &[String]) -> Vec<FilePayload> {
        files
            .iter()
            .filter_map(|path| match self.workspace.read_file(path) {
                Ok(bytes) => Some(FilePayload {
                    path: path.clone(),
                    content: String::from_utf8_lossy(&bytes).into_owned(),
                }),
                Err(e) => {
                    warn!(path = %path, error = %e, "skipping unreadable file");
                    None
                }
            })
            .collect()
    }

    /// Revert every modified file to its pre-session content. Failures are
    /// logged, never raised.
    fn rollback(&self, files: &[String]) {
        for path in files {
            if let Err(e) = self.workspace.revert_file(path) {
                warn!(path = %path, error = %e, "rollback failed for file");
            }
        }
        self.workspace.clear_baselines();
        self.metrics.rollbacks.inc();
    }

    fn kb_failure(&self, signature: &str, now: DateTime<Utc>) {
        if let Err(e) = self.kb.lock().record_failure(signature, now) {
            warn!(error = %e, "knowledge base update failed");
        }
    }
}

/// Pull-request body: the proposed fix, the confidence breakdown, the
/// verification summary, and the machine-generation disclaimer.
fn pr_body(session: &HealingSession, score: &ConfidenceReport) -> String {
    let mut body = String::new();
    body.push_str("## Proposed fix\n\n");
    body.push_str(session.proposed_fix.as_deref().unwrap_or("(no summary)"));
    body.push_str("\n\n## Confidence\n\n");
    body.push_str(&score.breakdown());
    body.push('\n');
    for line in &score.reasoning {
        body.push_str(&format!("- {line}\n"));
    }
    body.push_str("\n## Verification\n\n");
    body.push_str(
        &session
            .verification_results
            .as_ref()
            .map(|r| r.summary())
            .unwrap_or_else(|| "not run".to_string()),
    );
    body.push_str(
        "\n\n---\nThis pull request was generated automatically by the healing control plane. \
         Review the change before merging.\n",
    );
    body
}

#[cfg(test)]
mod tests {
    use super::*;
    use mend_proto::{IncidentKind, Severity, VerificationCheck, VerificationReport};

    #[test]
    fn test_pr_body_sections() {
        let mut session = HealingSession::new("inc-1", RepairStrategy::KnowledgeBase);
        session.proposed_fix = Some("guard against missing user".to_string());
        session.verification_results = Some(VerificationReport {
            passed: true,
            checks: vec![VerificationCheck {
                name: "type_check".to_string(),
                passed: true,
                detail: None,
            }],
            error_details: None,
        });
        let scorer = ConfidenceScorer::default();
        let score = scorer.score(None, &[], &|_| false, &[], Some(true));

        let body = pr_body(&session, &score);
        assert!(body.contains("## Proposed fix"));
        assert!(body.contains("guard against missing user"));
        assert!(body.contains("## Confidence"));
        assert!(body.contains("## Verification"));
        assert!(body.contains("generated automatically"));
    }

    #[test]
    fn test_branch_name_uses_first_eight_chars() {
        let incident = Incident::new(
            "abcdef1234567890",
            IncidentKind::RuntimeError,
            Severity::High,
            "t",
            "d",
            "s",
        );
        let branch = format!(
            "auto-heal-{}",
            incident.id.chars().take(8).collect::<String>()
        );
        assert_eq!(branch, "auto-heal-abcdef12");
    }
}
