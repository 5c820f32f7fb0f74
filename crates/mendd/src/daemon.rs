//! Daemon run loop: wires the orchestrator to spool-directory intake.

use async_trait::async_trait;
use mend_audit::AuditStore;
use mend_gateway::{CommitGateway, LocalGitGateway, RemoteGateway};
use mend_kb::KnowledgeBase;
use mend_orchestrator::{
    JsonIncidentStore, Orchestrator, OrchestratorParts, StaticIdentity, Supervisor,
    SupervisorChannels, WorkerAgent, WorkerError,
};
use mend_proto::{DeploymentUpdate, Incident, IncidentDetected, WorkerFixReport};
use mend_workspace::LocalWorkspace;
use serde::de::DeserializeOwned;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{info, warn};

use crate::config::{DaemonConfig, GatewayConfig};

/// How often the spool directories are polled.
const SPOOL_POLL: std::time::Duration = std::time::Duration::from_secs(2);

// ─── Spool-backed worker agent ────────────────────────────────────────────────

/// Tier-2 submission backend: jobs are written to `spool/worker-jobs/`; an
/// external worker picks them up and drops a `WorkerFixReport` into
/// `spool/worker-reports/` when done.
struct SpoolWorkerAgent {
    jobs_dir: PathBuf,
}

#[async_trait]
impl WorkerAgent for SpoolWorkerAgent {
    async fn submit_job(
        &self,
        system_user_id: &str,
        diagnostic_message: &str,
    ) -> Result<String, WorkerError> {
        let job_id = uuid::Uuid::new_v4().to_string();
        let job = serde_json::json!({
            "job_id": job_id,
            "system_user_id": system_user_id,
            "diagnostic": diagnostic_message,
            "submitted_at": chrono::Utc::now(),
        });
        std::fs::create_dir_all(&self.jobs_dir)
            .map_err(|e| WorkerError::Unavailable(e.to_string()))?;
        let path = self.jobs_dir.join(format!("{job_id}.json"));
        std::fs::write(&path, job.to_string())
            .map_err(|e| WorkerError::Unavailable(e.to_string()))?;
        info!(job = %job_id, "worker job spooled");
        Ok(job_id)
    }
}

// ─── Run ─────────────────────────────────────────────────────────────────────

pub async fn run(config: DaemonConfig) -> anyhow::Result<()> {
    info!(state = %config.state_dir.display(), workspace = %config.workspace_root.display(), "starting mendd");

    let mut workspace = LocalWorkspace::new(config.workspace_root.clone());
    if let Some(check) = &config.check_command {
        workspace = workspace.with_check_command(check.clone(), config.healing.verify_timeout());
    }

    let gateway: Arc<dyn CommitGateway> = match &config.gateway {
        GatewayConfig::Local { repo_root } => Arc::new(LocalGitGateway::new(repo_root.clone())),
        GatewayConfig::Remote {
            base_url,
            repo,
            token,
        } => Arc::new(RemoteGateway::new(
            base_url.clone(),
            repo.clone(),
            token.clone(),
        )),
    };

    let incident_table = Arc::new(JsonIncidentStore::open(&config.state_dir));
    let identity = StaticIdentity {
        configured_owner: config.identity.configured_owner.clone(),
        persisted_owner: config.identity.persisted_owner.clone(),
        admin_ids: config.identity.admin_ids.clone(),
    };

    let orchestrator = Arc::new(Orchestrator::new(OrchestratorParts {
        config: config.healing.clone(),
        kb: KnowledgeBase::open(&config.state_dir),
        audit: AuditStore::open(&config.state_dir),
        incidents: incident_table.clone(),
        workspace: Arc::new(workspace),
        gateway,
        worker: Arc::new(SpoolWorkerAgent {
            jobs_dir: config.spool_dir("worker-jobs"),
        }),
        identity: Arc::new(identity),
    }));

    let (incident_tx, incident_rx) = mpsc::channel::<IncidentDetected>(64);
    let (report_tx, report_rx) = mpsc::channel::<WorkerFixReport>(64);
    let (deploy_tx, deploy_rx) = mpsc::channel::<DeploymentUpdate>(64);

    tokio::spawn(pump_spool(config.spool_dir("incidents"), incident_tx));
    tokio::spawn(pump_spool(config.spool_dir("worker-reports"), report_tx));
    tokio::spawn(pump_spool(config.spool_dir("deployments"), deploy_tx));

    let supervisor = Supervisor::new(orchestrator, incident_table);
    supervisor
        .run(SupervisorChannels {
            incidents: incident_rx,
            worker_reports: report_rx,
            deployments: deploy_rx,
        })
        .await;

    Ok(())
}

/// Poll a spool directory for JSON files, forward each parsed value, and
/// move handled files into `processed/`.
async fn pump_spool<T: DeserializeOwned + Send + 'static>(dir: PathBuf, tx: mpsc::Sender<T>) {
    let processed = dir.join("processed");
    let mut tick = tokio::time::interval(SPOOL_POLL);
    loop {
        tick.tick().await;
        if std::fs::create_dir_all(&processed).is_err() {
            continue;
        }
        let Ok(entries) = std::fs::read_dir(&dir) else {
            continue;
        };
        let mut files: Vec<PathBuf> = entries
            .flatten()
            .map(|e| e.path())
            .filter(|p| p.extension().is_some_and(|e| e == "json"))
            .collect();
        files.sort();

        for path in files {
            let Ok(raw) = std::fs::read_to_string(&path) else {
                continue;
            };
            match serde_json::from_str::<T>(&raw) {
                Ok(value) => {
                    if tx.send(value).await.is_err() {
                        return; // supervisor gone
                    }
                }
                Err(e) => {
                    warn!(file = %path.display(), error = %e, "unparseable spool file");
                }
            }
            if let Some(name) = path.file_name() {
                if let Err(e) = std::fs::rename(&path, processed.join(name)) {
                    warn!(file = %path.display(), error = %e, "could not archive spool file");
                }
            }
        }
    }
}

// ─── CLI helpers ──────────────────────────────────────────────────────────────

/// Validate an incident file and drop it into the incident spool.
pub fn enqueue(config: &DaemonConfig, file: &Path) -> anyhow::Result<()> {
    let raw = std::fs::read_to_string(file)?;
    let incident: Incident = serde_json::from_str(&raw)
        .map_err(|e| anyhow::anyhow!("invalid incident JSON: {e}"))?;
    if !mend_proto::validate_incident_id(&incident.id) {
        anyhow::bail!("invalid incident id: {}", incident.id);
    }
    let event = IncidentDetected {
        incident_id: incident.id.clone(),
        incident,
    };

    let spool = config.spool_dir("incidents");
    std::fs::create_dir_all(&spool)?;
    let path = spool.join(format!("{}.json", event.incident_id));
    std::fs::write(&path, serde_json::to_string_pretty(&event)?)?;
    println!("spooled incident {} at {}", event.incident_id, path.display());
    Ok(())
}

/// Print recent healing sessions.
pub fn print_sessions(config: &DaemonConfig, limit: usize) {
    let audit = AuditStore::open(&config.state_dir);
    for session in audit.sessions().into_iter().take(limit) {
        println!(
            "{}  incident={}  {}  phase={}  strategy={}  started={}",
            session.id,
            session.incident_id,
            match session.status {
                mend_proto::SessionStatus::Active => "active",
                mend_proto::SessionStatus::Success => "success",
                mend_proto::SessionStatus::Failed => "failed",
            },
            session.phase,
            session.strategy,
            session.started_at.format("%Y-%m-%d %H:%M:%S"),
        );
    }
}

/// Print knowledge-base entries with their blended confidence.
pub fn print_kb(config: &DaemonConfig) {
    let kb = KnowledgeBase::open(&config.state_dir);
    for entry in kb.entries() {
        println!(
            "{}  kind={}  fixed={}/{}  confidence={}  blended={}",
            entry.error_signature,
            entry.error_kind,
            entry.times_fixed,
            entry.times_encountered,
            entry.confidence,
            mend_kb::blended_confidence(entry),
        );
    }
}
