//! Domain types for the MendOps healing control plane.
//!
//! Defines the incident, session, attempt, and knowledge-base records shared
//! across the control plane, plus the typed messages published on the event
//! bus and consumed from the intake channels.

#![forbid(unsafe_code)]

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

// ─── Incident kinds & severity ────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IncidentKind {
    HighCpu,
    HighMemory,
    SafetyIssue,
    BuildFailure,
    RuntimeError,
    AgentFailure,
    Other,
}

impl std::fmt::Display for IncidentKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::HighCpu => "high_cpu",
            Self::HighMemory => "high_memory",
            Self::SafetyIssue => "safety_issue",
            Self::BuildFailure => "build_failure",
            Self::RuntimeError => "runtime_error",
            Self::AgentFailure => "agent_failure",
            Self::Other => "other",
        };
        write!(f, "{s}")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Low => write!(f, "low"),
            Self::Medium => write!(f, "medium"),
            Self::High => write!(f, "high"),
            Self::Critical => write!(f, "critical"),
        }
    }
}

// ─── Incident ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum IncidentStatus {
    #[default]
    Open,
    Healing,
    Resolved,
    Failed,
}

/// Key metrics captured by the detector at incident creation time.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IncidentMetrics {
    pub cpu_pct: Option<f32>,
    pub mem_pct: Option<f32>,
    pub details: Option<serde_json::Value>,
}

/// A detected platform anomaly awaiting repair.
///
/// Created by the external detector; mutated only by the orchestrator through
/// the transition methods below. Terminal in `Resolved` or `Failed`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Incident {
    pub id: String,
    pub kind: IncidentKind,
    pub severity: Severity,
    pub title: String,
    pub description: String,
    pub stack_trace: Option<String>,
    pub logs: Option<String>,
    pub source: String,
    pub metrics: Option<IncidentMetrics>,

    pub status: IncidentStatus,
    /// Healing attempts consumed so far. Monotonic, capped by configuration.
    pub attempt_count: u32,
    pub last_attempt_at: Option<DateTime<Utc>>,
    pub root_cause: Option<String>,
    pub fix_description: Option<String>,
    pub commit_hash: Option<String>,
    pub resolved_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Error)]
pub enum StateError {
    #[error("incident {id} cannot enter healing from {status:?}")]
    NotHealable { id: String, status: IncidentStatus },

    #[error("incident {id} exhausted its {cap} healing attempts")]
    AttemptsExhausted { id: String, cap: u32 },
}

impl Incident {
    pub fn new(
        id: impl Into<String>,
        kind: IncidentKind,
        severity: Severity,
        title: impl Into<String>,
        description: impl Into<String>,
        source: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            kind,
            severity,
            title: title.into(),
            description: description.into(),
            stack_trace: None,
            logs: None,
            source: source.into(),
            metrics: None,
            status: IncidentStatus::Open,
            attempt_count: 0,
            last_attempt_at: None,
            root_cause: None,
            fix_description: None,
            commit_hash: None,
            resolved_at: None,
            created_at: Utc::now(),
        }
    }

    /// True when a new healing attempt may start: `open` or `failed`, and
    /// attempts remain under the cap.
    pub fn can_begin_healing(&self, max_attempts: u32) -> bool {
        matches!(self.status, IncidentStatus::Open | IncidentStatus::Failed)
            && self.attempt_count < max_attempts
    }

    /// Consume one healing attempt and enter `healing`.
    pub fn begin_attempt(&mut self, max_attempts: u32, now: DateTime<Utc>) -> Result<(), StateError> {
        if !matches!(self.status, IncidentStatus::Open | IncidentStatus::Failed) {
            return Err(StateError::NotHealable {
                id: self.id.clone(),
                status: self.status,
            });
        }
        if self.attempt_count >= max_attempts {
            return Err(StateError::AttemptsExhausted {
                id: self.id.clone(),
                cap: max_attempts,
            });
        }
        self.status = IncidentStatus::Healing;
        self.attempt_count += 1;
        self.last_attempt_at = Some(now);
        Ok(())
    }

    pub fn mark_resolved(
        &mut self,
        fix_description: impl Into<String>,
        commit_hash: Option<String>,
        now: DateTime<Utc>,
    ) {
        self.status = IncidentStatus::Resolved;
        self.fix_description = Some(fix_description.into());
        self.commit_hash = commit_hash;
        self.resolved_at = Some(now);
    }

    pub fn mark_failed(&mut self) {
        self.status = IncidentStatus::Failed;
    }

    /// Return a failed-session incident to `open` for a later retry.
    pub fn reopen(&mut self) {
        self.status = IncidentStatus::Open;
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self.status, IncidentStatus::Resolved)
    }
}

// ─── Healing session ──────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionPhase {
    Diagnosis,
    Repair,
    Verify,
    Deploy,
    Complete,
    Failed,
}

impl std::fmt::Display for SessionPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Diagnosis => "diagnosis",
            Self::Repair => "repair",
            Self::Verify => "verify",
            Self::Deploy => "deploy",
            Self::Complete => "complete",
            Self::Failed => "failed",
        };
        write!(f, "{s}")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Active,
    Success,
    Failed,
}

/// The repair tier driving a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RepairStrategy {
    KnowledgeBase,
    WorkerAgent,
    Escalated,
}

impl std::fmt::Display for RepairStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::KnowledgeBase => "knowledge_base",
            Self::WorkerAgent => "worker_agent",
            Self::Escalated => "escalated",
        };
        write!(f, "{s}")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeploymentStatus {
    Deploying,
    Succeeded,
    Failed,
}

/// One end-to-end attempt to repair an incident.
///
/// Exactly one session per incident is `active` at a time; a session is
/// terminal once `status` leaves `Active`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealingSession {
    pub id: String,
    pub incident_id: String,
    pub phase: SessionPhase,
    pub status: SessionStatus,
    pub strategy: RepairStrategy,
    pub model_tag: Option<String>,
    pub worker_job_id: Option<String>,
    pub kb_match_id: Option<String>,
    pub kb_match_confidence: Option<u8>,
    pub diagnosis_notes: Option<String>,
    pub proposed_fix: Option<String>,
    pub files_changed: Vec<String>,
    pub verification_results: Option<VerificationReport>,
    pub verification_passed: Option<bool>,
    pub commit_hash: Option<String>,
    pub deployment_status: Option<DeploymentStatus>,
    pub deployment_started_at: Option<DateTime<Utc>>,
    pub pr_number: Option<u64>,
    pub pr_url: Option<String>,
    pub error: Option<String>,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl HealingSession {
    pub fn new(incident_id: impl Into<String>, strategy: RepairStrategy) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            incident_id: incident_id.into(),
            phase: SessionPhase::Diagnosis,
            status: SessionStatus::Active,
            strategy,
            model_tag: None,
            worker_job_id: None,
            kb_match_id: None,
            kb_match_confidence: None,
            diagnosis_notes: None,
            proposed_fix: None,
            files_changed: Vec::new(),
            verification_results: None,
            verification_passed: None,
            commit_hash: None,
            deployment_status: None,
            deployment_started_at: None,
            pr_number: None,
            pr_url: None,
            error: None,
            started_at: Utc::now(),
            completed_at: None,
        }
    }

    pub fn enter_phase(&mut self, phase: SessionPhase) {
        self.phase = phase;
    }

    pub fn complete_success(&mut self, now: DateTime<Utc>) {
        self.phase = SessionPhase::Complete;
        self.status = SessionStatus::Success;
        self.completed_at = Some(now);
    }

    pub fn fail(&mut self, error: impl Into<String>, now: DateTime<Utc>) {
        self.phase = SessionPhase::Failed;
        self.status = SessionStatus::Failed;
        self.error = Some(error.into());
        self.completed_at = Some(now);
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self.status, SessionStatus::Active)
    }
}

// ─── Verification report ──────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VerificationCheck {
    pub name: String,
    pub passed: bool,
    pub detail: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VerificationReport {
    pub passed: bool,
    pub checks: Vec<VerificationCheck>,
    /// Combined stdout/stderr of the failing check, truncated.
    pub error_details: Option<String>,
}

impl VerificationReport {
    /// One-line summary for PR bodies and completion events.
    pub fn summary(&self) -> String {
        let passed = self.checks.iter().filter(|c| c.passed).count();
        format!(
            "{}: {}/{} checks passed",
            if self.passed { "passed" } else { "failed" },
            passed,
            self.checks.len()
        )
    }
}

// ─── Proposed fix ─────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileEdit {
    pub path: String,
    pub content: String,
}

/// A concrete, applicable fix: a summary plus ordered file edits.
///
/// Knowledge-base entries store this serialized in `successful_fix` so the
/// KB tier can re-apply a prior fix without a model call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProposedFix {
    pub summary: String,
    pub edits: Vec<FileEdit>,
}

impl ProposedFix {
    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| "{}".to_string())
    }

    pub fn from_json(raw: &str) -> Option<Self> {
        serde_json::from_str(raw).ok()
    }

    pub fn paths(&self) -> Vec<String> {
        self.edits.iter().map(|e| e.path.clone()).collect()
    }
}

// ─── Heal attempt (audit row) ─────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionRecord {
    pub action: String,
    pub timestamp: DateTime<Utc>,
    pub detail: Option<serde_json::Value>,
}

impl ActionRecord {
    pub fn now(action: impl Into<String>) -> Self {
        Self {
            action: action.into(),
            timestamp: Utc::now(),
            detail: None,
        }
    }

    pub fn with_detail(action: impl Into<String>, detail: serde_json::Value) -> Self {
        Self {
            action: action.into(),
            timestamp: Utc::now(),
            detail: Some(detail),
        }
    }
}

/// Append-only audit row, one per tier invocation inside a session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealAttempt {
    pub id: String,
    pub incident_id: String,
    pub session_id: String,
    pub attempt_number: u32,
    pub strategy: RepairStrategy,
    /// Ordered action log; starts with `diagnosis_started`.
    pub actions_taken: Vec<ActionRecord>,
    pub success: bool,
    pub verification_passed: Option<bool>,
    pub error: Option<String>,
    pub completed_at: Option<DateTime<Utc>>,
    /// SHA-256 hex of the previous finalized attempt (empty for the first).
    pub previous_hash: String,
    /// SHA-256 hex of this row's canonical JSON; set on finalization.
    pub record_hash: String,
}

impl HealAttempt {
    pub fn new(
        incident_id: impl Into<String>,
        session_id: impl Into<String>,
        attempt_number: u32,
        strategy: RepairStrategy,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            incident_id: incident_id.into(),
            session_id: session_id.into(),
            attempt_number,
            strategy,
            actions_taken: vec![ActionRecord::now("diagnosis_started")],
            success: false,
            verification_passed: None,
            error: None,
            completed_at: None,
            previous_hash: String::new(),
            record_hash: String::new(),
        }
    }
}

// ─── Fix attempt ──────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FixOutcome {
    Success,
    Failure,
    RolledBack,
    Pending,
}

/// One row per *proposed* fix; feeds the historical-success factor.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FixAttempt {
    pub id: String,
    pub error_signature: String,
    pub session_id: String,
    pub proposed_fix: String,
    pub confidence_score: u8,
    pub outcome: FixOutcome,
    pub verification_results: Option<VerificationReport>,
    pub pr_number: Option<u64>,
    pub pr_url: Option<String>,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl FixAttempt {
    pub fn pending(
        error_signature: impl Into<String>,
        session_id: impl Into<String>,
        proposed_fix: impl Into<String>,
        confidence_score: u8,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            error_signature: error_signature.into(),
            session_id: session_id.into(),
            proposed_fix: proposed_fix.into(),
            confidence_score,
            outcome: FixOutcome::Pending,
            verification_results: None,
            pr_number: None,
            pr_url: None,
            created_at: Utc::now(),
            completed_at: None,
        }
    }
}

// ─── Knowledge-base entry ─────────────────────────────────────────────────────

/// One entry per error signature: a previously successful fix and its
/// empirical track record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KbEntry {
    pub error_signature: String,
    pub error_kind: IncidentKind,
    pub context: String,
    pub successful_fix: String,
    pub times_encountered: u32,
    pub times_fixed: u32,
    pub last_encountered: DateTime<Utc>,
    /// Smoothed running average, 0-100.
    pub confidence: u8,
}

impl KbEntry {
    /// Empirical success rate in `[0, 1]`. `times_encountered` is ≥ 1 by
    /// construction.
    pub fn success_rate(&self) -> f64 {
        if self.times_encountered == 0 {
            return 0.0;
        }
        f64::from(self.times_fixed) / f64::from(self.times_encountered)
    }
}

// ─── Event bus messages ───────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HealingResult {
    Success,
    PrCreated,
    Failed,
}

/// Typed messages published on the control-plane event bus.
///
/// The bus is fire-and-forget: publishing never blocks the state machine and
/// messages are dropped when nobody listens.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "kebab-case")]
pub enum HealingEvent {
    HealingStarted {
        incident_id: String,
        session_id: String,
        incident: Box<Incident>,
        strategy: RepairStrategy,
        used_knowledge_base: bool,
    },
    HealingComplete {
        incident_id: String,
        session_id: String,
        result: HealingResult,
        message: String,
        pr_number: Option<u64>,
        pr_url: Option<String>,
    },
    DeploymentStatus {
        session_id: String,
        incident_id: String,
        deployment_status: DeploymentStatus,
        timestamp: DateTime<Utc>,
    },
    KillSwitchActivated {
        consecutive_failures: u32,
        disabled_until: DateTime<Utc>,
        message: String,
    },
}

// ─── Intake messages ──────────────────────────────────────────────────────────

/// Normalized detection event from the external health source.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IncidentDetected {
    pub incident_id: String,
    pub incident: Incident,
}

/// Asynchronous completion report from a worker repair job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerFixReport {
    pub job_id: String,
    pub summary: String,
    pub files_changed: Vec<String>,
}

/// Inbound deployment status delivered by the deployment dispatcher.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeploymentUpdate {
    pub incident_id: String,
    pub session_id: String,
    pub deployment_status: DeploymentStatus,
    pub url: Option<String>,
}

// ─── Validation ───────────────────────────────────────────────────────────────

/// Validate an incident ID format.
pub fn validate_incident_id(id: &str) -> bool {
    !id.is_empty()
        && id.len() <= 128
        && id
            .chars()
            .all(|c| c.is_alphanumeric() || c == '-' || c == '_')
}

#[cfg(test)]
mod tests {
    use super::*;

    fn incident(id: &str) -> Incident {
        Incident::new(
            id,
            IncidentKind::RuntimeError,
            Severity::High,
            "Unhandled exception in request handler",
            "Cannot read properties of undefined (reading 'id')",
            "runtime-monitor",
        )
    }

    #[test]
    fn test_validate_incident_id() {
        assert!(validate_incident_id("inc-abc123"));
        assert!(validate_incident_id("inc_0001"));
        assert!(!validate_incident_id(""));
        assert!(!validate_incident_id("bad id with spaces"));
    }

    #[test]
    fn test_begin_attempt_from_open() {
        let mut inc = incident("inc-1");
        inc.begin_attempt(3, Utc::now()).expect("open is healable");
        assert_eq!(inc.status, IncidentStatus::Healing);
        assert_eq!(inc.attempt_count, 1);
        assert!(inc.last_attempt_at.is_some());
    }

    #[test]
    fn test_begin_attempt_rejected_while_healing() {
        let mut inc = incident("inc-2");
        inc.begin_attempt(3, Utc::now()).expect("first attempt");
        let err = inc.begin_attempt(3, Utc::now());
        assert!(matches!(err, Err(StateError::NotHealable { .. })));
        assert_eq!(inc.attempt_count, 1, "rejected attempt must not count");
    }

    #[test]
    fn test_begin_attempt_cap_enforced() {
        let mut inc = incident("inc-3");
        for _ in 0..3 {
            inc.begin_attempt(3, Utc::now()).expect("under cap");
            inc.mark_failed();
        }
        let err = inc.begin_attempt(3, Utc::now());
        assert!(matches!(err, Err(StateError::AttemptsExhausted { .. })));
        assert_eq!(inc.attempt_count, 3);
    }

    #[test]
    fn test_retry_after_failure_allowed_under_cap() {
        let mut inc = incident("inc-4");
        inc.begin_attempt(3, Utc::now()).expect("attempt 1");
        inc.mark_failed();
        assert!(inc.can_begin_healing(3));
        inc.begin_attempt(3, Utc::now()).expect("attempt 2");
        assert_eq!(inc.attempt_count, 2);
    }

    #[test]
    fn test_mark_resolved_sets_fields() {
        let mut inc = incident("inc-5");
        inc.begin_attempt(3, Utc::now()).expect("attempt");
        inc.mark_resolved("applied cached fix", Some("abc123".to_string()), Utc::now());
        assert_eq!(inc.status, IncidentStatus::Resolved);
        assert_eq!(inc.commit_hash.as_deref(), Some("abc123"));
        assert!(inc.resolved_at.is_some());
        assert!(inc.is_terminal());
        assert!(!inc.can_begin_healing(3));
    }

    #[test]
    fn test_session_lifecycle() {
        let mut s = HealingSession::new("inc-1", RepairStrategy::KnowledgeBase);
        assert_eq!(s.phase, SessionPhase::Diagnosis);
        assert_eq!(s.status, SessionStatus::Active);
        assert!(!s.is_terminal());

        s.enter_phase(SessionPhase::Repair);
        s.enter_phase(SessionPhase::Verify);
        s.complete_success(Utc::now());
        assert_eq!(s.phase, SessionPhase::Complete);
        assert!(s.is_terminal());
    }

    #[test]
    fn test_session_fail_records_error() {
        let mut s = HealingSession::new("inc-1", RepairStrategy::WorkerAgent);
        s.fail("type check failed", Utc::now());
        assert_eq!(s.status, SessionStatus::Failed);
        assert_eq!(s.phase, SessionPhase::Failed);
        assert_eq!(s.error.as_deref(), Some("type check failed"));
        assert!(s.completed_at.is_some());
    }

    #[test]
    fn test_heal_attempt_starts_with_diagnosis_action() {
        let a = HealAttempt::new("inc-1", "sess-1", 1, RepairStrategy::KnowledgeBase);
        assert_eq!(a.actions_taken.len(), 1);
        assert_eq!(a.actions_taken[0].action, "diagnosis_started");
        assert!(a.record_hash.is_empty(), "hash set only on finalization");
    }

    #[test]
    fn test_proposed_fix_roundtrip() {
        let fix = ProposedFix {
            summary: "guard against undefined user".to_string(),
            edits: vec![FileEdit {
                path: "src/routes/user.ts".to_string(),
                content: "export const x = 1;\n".to_string(),
            }],
        };
        let back = ProposedFix::from_json(&fix.to_json()).expect("roundtrip");
        assert_eq!(back, fix);
        assert_eq!(back.paths(), vec!["src/routes/user.ts"]);
    }

    #[test]
    fn test_kb_entry_success_rate() {
        let e = KbEntry {
            error_signature: "sig".to_string(),
            error_kind: IncidentKind::RuntimeError,
            context: "handler".to_string(),
            successful_fix: "{}".to_string(),
            times_encountered: 10,
            times_fixed: 9,
            last_encountered: Utc::now(),
            confidence: 95,
        };
        assert!((e.success_rate() - 0.9).abs() < f64::EPSILON);
    }

    #[test]
    fn test_event_serialization_uses_kebab_tags() {
        let ev = HealingEvent::KillSwitchActivated {
            consecutive_failures: 3,
            disabled_until: Utc::now(),
            message: "auto-healing disabled".to_string(),
        };
        let json = serde_json::to_string(&ev).expect("serialize");
        assert!(json.contains("\"event\":\"kill-switch-activated\""));

        let ev = HealingEvent::HealingComplete {
            incident_id: "inc-1".to_string(),
            session_id: "sess-1".to_string(),
            result: HealingResult::PrCreated,
            message: "PR created".to_string(),
            pr_number: Some(42),
            pr_url: Some("https://git.example/pr/42".to_string()),
        };
        let json = serde_json::to_string(&ev).expect("serialize");
        assert!(json.contains("\"event\":\"healing-complete\""));
        assert!(json.contains("\"result\":\"pr_created\""));
    }

    #[test]
    fn test_incident_serialization_roundtrip() {
        let mut inc = incident("inc-json");
        inc.stack_trace = Some("at handler (/app/src/user.ts:10:5)".to_string());
        let json = serde_json::to_string(&inc).expect("serialize");
        let back: Incident = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(back.id, "inc-json");
        assert_eq!(back.kind, IncidentKind::RuntimeError);
        assert_eq!(back.status, IncidentStatus::Open);
    }

    #[test]
    fn test_verification_summary() {
        let report = VerificationReport {
            passed: false,
            checks: vec![
                VerificationCheck {
                    name: "file_existence".to_string(),
                    passed: true,
                    detail: None,
                },
                VerificationCheck {
                    name: "type_check".to_string(),
                    passed: false,
                    detail: Some("TS2339".to_string()),
                },
            ],
            error_details: Some("error TS2339: property does not exist".to_string()),
        };
        assert_eq!(report.summary(), "failed: 1/2 checks passed");
    }
}
