//! Shared test harness for MendOps integration tests: in-memory
//! collaborator doubles and seeding helpers.

#![forbid(unsafe_code)]

use async_trait::async_trait;
use chrono::Utc;
use mend_gateway::{CommitGateway, CommitReceipt, FilePayload, GatewayError, GatewayResult, PrReceipt};
use mend_kb::{incident_signature, KnowledgeBase};
use mend_orchestrator::{
    HealingConfig, JsonIncidentStore, Orchestrator, OrchestratorParts, StaticIdentity, WorkerAgent,
    WorkerError,
};
use mend_proto::{FixAttempt, FixOutcome, Incident, IncidentKind, ProposedFix, Severity};
use mend_workspace::{TypeCheckOutcome, Workspace, WsResult};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

// ─── In-memory workspace ──────────────────────────────────────────────────────

/// Workspace double: an in-memory file tree with programmable type-check
/// results and the same baseline/revert semantics as the local filesystem
/// implementation.
#[derive(Default)]
pub struct MemoryWorkspace {
    files: Mutex<HashMap<String, Vec<u8>>>,
    baselines: Mutex<HashMap<String, Option<Vec<u8>>>>,
    check_ok: Mutex<bool>,
    check_output: Mutex<String>,
}

impl MemoryWorkspace {
    pub fn new() -> Self {
        Self {
            check_ok: Mutex::new(true),
            ..Self::default()
        }
    }

    pub fn seed(&self, path: &str, content: &str) {
        self.files
            .lock()
            .insert(path.to_string(), content.as_bytes().to_vec());
    }

    pub fn set_check(&self, ok: bool, output: &str) {
        *self.check_ok.lock() = ok;
        *self.check_output.lock() = output.to_string();
    }

    pub fn contents(&self, path: &str) -> Option<String> {
        self.files
            .lock()
            .get(path)
            .map(|b| String::from_utf8_lossy(b).into_owned())
    }
}

#[async_trait]
impl Workspace for MemoryWorkspace {
    fn read_file(&self, path: &str) -> WsResult<Vec<u8>> {
        self.files.lock().get(path).cloned().ok_or_else(|| {
            mend_workspace::WorkspaceError::Io {
                path: path.to_string(),
                source: std::io::Error::new(std::io::ErrorKind::NotFound, "no such file"),
            }
        })
    }

    fn write_file(&self, path: &str, bytes: &[u8]) -> WsResult<()> {
        let mut baselines = self.baselines.lock();
        let mut files = self.files.lock();
        if !baselines.contains_key(path) {
            baselines.insert(path.to_string(), files.get(path).cloned());
        }
        files.insert(path.to_string(), bytes.to_vec());
        Ok(())
    }

    fn revert_file(&self, path: &str) -> WsResult<()> {
        let baseline = self.baselines.lock().get(path).cloned();
        match baseline {
            Some(Some(bytes)) => {
                self.files.lock().insert(path.to_string(), bytes);
            }
            Some(None) => {
                self.files.lock().remove(path);
            }
            None => {}
        }
        Ok(())
    }

    async fn type_check(&self) -> WsResult<TypeCheckOutcome> {
        Ok(TypeCheckOutcome {
            ok: *self.check_ok.lock(),
            output: self.check_output.lock().clone(),
        })
    }

    fn list_files(&self, dir: &str) -> WsResult<Vec<String>> {
        let prefix = format!("{dir}/");
        let mut out: Vec<String> = self
            .files
            .lock()
            .keys()
            .filter(|k| k.starts_with(&prefix) && !k[prefix.len()..].contains('/'))
            .cloned()
            .collect();
        out.sort();
        Ok(out)
    }

    fn file_exists(&self, path: &str) -> bool {
        self.files.lock().contains_key(path)
    }

    fn clear_baselines(&self) {
        self.baselines.lock().clear();
    }
}

// ─── Recording gateway ────────────────────────────────────────────────────────

/// Gateway double that records every call and can be told to fail commits.
#[derive(Default)]
pub struct RecordingGateway {
    pub commits: Mutex<Vec<(usize, String)>>,
    pub branches: Mutex<Vec<String>>,
    pub pushes: Mutex<Vec<(String, usize)>>,
    pub prs: Mutex<Vec<(String, String, String)>>,
    fail_commit: Mutex<bool>,
    next_pr: AtomicU64,
    next_commit: AtomicU64,
}

impl RecordingGateway {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_commits(&self, fail: bool) {
        *self.fail_commit.lock() = fail;
    }
}

#[async_trait]
impl CommitGateway for RecordingGateway {
    async fn commit_to_main(
        &self,
        files: &[FilePayload],
        message: &str,
    ) -> GatewayResult<CommitReceipt> {
        if *self.fail_commit.lock() {
            return Err(GatewayError::Git {
                action: "commit",
                output: "simulated commit failure".to_string(),
            });
        }
        self.commits.lock().push((files.len(), message.to_string()));
        let n = self.next_commit.fetch_add(1, Ordering::Relaxed);
        Ok(CommitReceipt {
            commit_hash: Some(format!("deadbeef{n:04}")),
            url: None,
        })
    }

    async fn create_branch_from_default(&self, branch: &str) -> GatewayResult<()> {
        self.branches.lock().push(branch.to_string());
        Ok(())
    }

    async fn push_branch(
        &self,
        branch: &str,
        files: &[FilePayload],
        _message: &str,
    ) -> GatewayResult<()> {
        self.pushes.lock().push((branch.to_string(), files.len()));
        Ok(())
    }

    async fn open_or_update_pr(
        &self,
        branch: &str,
        title: &str,
        body: &str,
    ) -> GatewayResult<PrReceipt> {
        self.prs
            .lock()
            .push((branch.to_string(), title.to_string(), body.to_string()));
        let pr_number = self.next_pr.fetch_add(1, Ordering::Relaxed) + 1;
        Ok(PrReceipt {
            pr_number,
            pr_url: format!("https://git.example/pr/{pr_number}"),
        })
    }
}

// ─── Scripted worker ──────────────────────────────────────────────────────────

#[derive(Default)]
pub struct ScriptedWorker {
    pub jobs: Mutex<Vec<(String, String)>>,
    fail: Mutex<bool>,
    next_job: AtomicU64,
}

impl ScriptedWorker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_submissions(&self, fail: bool) {
        *self.fail.lock() = fail;
    }
}

#[async_trait]
impl WorkerAgent for ScriptedWorker {
    async fn submit_job(
        &self,
        system_user_id: &str,
        diagnostic_message: &str,
    ) -> Result<String, WorkerError> {
        if *self.fail.lock() {
            return Err(WorkerError::Rejected("simulated rejection".to_string()));
        }
        self.jobs
            .lock()
            .push((system_user_id.to_string(), diagnostic_message.to_string()));
        let n = self.next_job.fetch_add(1, Ordering::Relaxed) + 1;
        Ok(format!("job-{n}"))
    }
}

// ─── Harness ──────────────────────────────────────────────────────────────────

pub struct Harness {
    pub orchestrator: Arc<Orchestrator>,
    pub workspace: Arc<MemoryWorkspace>,
    pub gateway: Arc<RecordingGateway>,
    pub worker: Arc<ScriptedWorker>,
    pub incidents: Arc<JsonIncidentStore>,
    pub state_dir: tempfile::TempDir,
}

/// Test config: production defaults minus the lock cooldown, which would
/// otherwise stall back-to-back sessions on the real clock.
pub fn test_config() -> HealingConfig {
    HealingConfig {
        cooldown_secs: 0,
        ..HealingConfig::default()
    }
}

pub fn build_harness(config: HealingConfig) -> Harness {
    build_harness_with_identity(
        config,
        StaticIdentity {
            configured_owner: Some("system-owner".to_string()),
            persisted_owner: None,
            admin_ids: Vec::new(),
        },
    )
}

pub fn build_harness_with_identity(config: HealingConfig, identity: StaticIdentity) -> Harness {
    let state_dir = tempfile::tempdir().expect("tempdir");
    rebuild_harness_with_identity(state_dir, config, identity)
}

/// Rebuild the orchestrator over an existing state dir, picking up whatever
/// was seeded into the knowledge base, audit store, or incident table.
pub fn rebuild_harness(state_dir: tempfile::TempDir, config: HealingConfig) -> Harness {
    rebuild_harness_with_identity(
        state_dir,
        config,
        StaticIdentity {
            configured_owner: Some("system-owner".to_string()),
            persisted_owner: None,
            admin_ids: Vec::new(),
        },
    )
}

pub fn rebuild_harness_with_identity(
    state_dir: tempfile::TempDir,
    config: HealingConfig,
    identity: StaticIdentity,
) -> Harness {
    let workspace = Arc::new(MemoryWorkspace::new());
    let gateway = Arc::new(RecordingGateway::new());
    let worker = Arc::new(ScriptedWorker::new());
    let incidents = Arc::new(JsonIncidentStore::open(state_dir.path()));

    let orchestrator = Arc::new(Orchestrator::new(OrchestratorParts {
        config,
        kb: KnowledgeBase::open(state_dir.path()),
        audit: mend_audit::AuditStore::open(state_dir.path()),
        incidents: incidents.clone(),
        workspace: workspace.clone(),
        gateway: gateway.clone(),
        worker: worker.clone(),
        identity: Arc::new(identity),
    }));

    Harness {
        orchestrator,
        workspace,
        gateway,
        worker,
        incidents,
        state_dir,
    }
}

// ─── Seeding helpers ──────────────────────────────────────────────────────────

/// The canonical runtime-error incident used across scenarios.
pub fn runtime_incident(id: &str) -> Incident {
    let mut incident = Incident::new(
        id,
        IncidentKind::RuntimeError,
        Severity::High,
        "Unhandled exception in request handler",
        "Cannot read properties of undefined (reading 'id')",
        "runtime-monitor",
    );
    incident.stack_trace = Some("at foo (/x.ts:10:5)\nat bar (/y.ts:2:1)".to_string());
    incident
}

/// Seed a knowledge-base entry for `incident` before the harness opens the
/// store: `successes` wins then `failures` losses, at the given stored
/// confidence. Returns the signature.
pub fn seed_kb(
    state_dir: &Path,
    incident: &Incident,
    fix: &ProposedFix,
    successes: u32,
    failures: u32,
    confidence: u8,
) -> String {
    let sig = incident_signature(incident);
    let mut kb = KnowledgeBase::open(state_dir);
    for _ in 0..successes {
        kb.record_success(
            &sig,
            incident.kind,
            &incident.description,
            Some(&fix.to_json()),
            confidence,
            Utc::now(),
        )
        .expect("seed kb success");
    }
    for _ in 0..failures {
        kb.record_failure(&sig, Utc::now()).expect("seed kb failure");
    }
    sig
}

/// Seed `n` successful fix attempts into the audit history so the
/// historical-success factor is at its ceiling.
pub fn seed_fix_history(state_dir: &Path, n: usize) {
    let mut audit = mend_audit::AuditStore::open(state_dir);
    for i in 0..n {
        let mut fix = FixAttempt::pending(format!("sig-{i}"), "seed-session", "seed fix", 90);
        fix.outcome = FixOutcome::Success;
        audit.insert_fix(fix).expect("seed fix history");
    }
}
