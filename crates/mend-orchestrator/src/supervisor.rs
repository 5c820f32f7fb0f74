//! Long-lived supervisor task.
//!
//! Serializes intake from three channels (incident detections, worker-job
//! completions, deployment updates) into the orchestrator, and runs the
//! defensive rate-window sweep every five minutes. Closing all channels
//! shuts the loop down.

use mend_proto::{DeploymentUpdate, IncidentDetected, WorkerFixReport};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{error, info};

use crate::collaborators::JsonIncidentStore;
use crate::orchestrator::Orchestrator;

/// How often the defensive window sweep runs.
const SWEEP_INTERVAL: std::time::Duration = std::time::Duration::from_secs(300);

pub struct SupervisorChannels {
    pub incidents: mpsc::Receiver<IncidentDetected>,
    pub worker_reports: mpsc::Receiver<WorkerFixReport>,
    pub deployments: mpsc::Receiver<DeploymentUpdate>,
}

pub struct Supervisor {
    orchestrator: Arc<Orchestrator>,
    /// Intake table the detector events land in before admission.
    incident_table: Arc<JsonIncidentStore>,
}

impl Supervisor {
    pub fn new(orchestrator: Arc<Orchestrator>, incident_table: Arc<JsonIncidentStore>) -> Self {
        Self {
            orchestrator,
            incident_table,
        }
    }

    /// Run until every intake channel has closed.
    pub async fn run(self, mut channels: SupervisorChannels) {
        let mut sweep = tokio::time::interval(SWEEP_INTERVAL);
        sweep.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        info!("healing supervisor started");

        let mut incidents_open = true;
        let mut workers_open = true;
        let mut deployments_open = true;

        while incidents_open || workers_open || deployments_open {
            tokio::select! {
                detected = channels.incidents.recv(), if incidents_open => {
                    match detected {
                        Some(event) => self.on_incident(event).await,
                        None => incidents_open = false,
                    }
                }
                report = channels.worker_reports.recv(), if workers_open => {
                    match report {
                        Some(report) => self.on_worker_report(report).await,
                        None => workers_open = false,
                    }
                }
                update = channels.deployments.recv(), if deployments_open => {
                    match update {
                        Some(update) => self.on_deployment(update).await,
                        None => deployments_open = false,
                    }
                }
                _ = sweep.tick() => {
                    self.orchestrator.safety().sweep(chrono::Utc::now());
                }
            }
        }
        info!("healing supervisor stopped");
    }

    async fn on_incident(&self, event: IncidentDetected) {
        if let Err(e) = self.incident_table.ingest(&event.incident) {
            error!(incident = %event.incident_id, error = %e, "could not ingest incident");
            return;
        }
        match self.orchestrator.enqueue_incident(&event.incident_id).await {
            Ok(outcome) => info!(incident = %event.incident_id, ?outcome, "incident processed"),
            Err(e) => error!(incident = %event.incident_id, error = %e, "incident processing failed"),
        }
    }

    async fn on_worker_report(&self, report: WorkerFixReport) {
        let job_id = report.job_id.clone();
        match self.orchestrator.worker_completed(report).await {
            Ok(outcome) => info!(job = %job_id, ?outcome, "worker report processed"),
            Err(e) => error!(job = %job_id, error = %e, "worker report processing failed"),
        }
    }

    async fn on_deployment(&self, update: DeploymentUpdate) {
        let session_id = update.session_id.clone();
        match self.orchestrator.deployment_update(update).await {
            Ok(outcome) => info!(session = %session_id, ?outcome, "deployment update processed"),
            Err(e) => error!(session = %session_id, error = %e, "deployment update failed"),
        }
    }
}
