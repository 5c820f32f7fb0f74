//! External collaborator interfaces: the worker agent, system identity, and
//! the detector's incident table.

use async_trait::async_trait;
use mend_persist::{PersistResult, SnapshotStore};
use mend_proto::Incident;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::path::Path;
use thiserror::Error;
use tracing::debug;

// ─── Worker agent ─────────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum WorkerError {
    #[error("worker unavailable: {0}")]
    Unavailable(String),

    #[error("worker rejected the job: {0}")]
    Rejected(String),
}

/// The Tier-2 repair agent: a long-running external agent with tool access.
/// Submission is synchronous; completion arrives later as a
/// [`mend_proto::WorkerFixReport`].
#[async_trait]
pub trait WorkerAgent: Send + Sync {
    async fn submit_job(
        &self,
        system_user_id: &str,
        diagnostic_message: &str,
    ) -> Result<String, WorkerError>;
}

// ─── Identity ─────────────────────────────────────────────────────────────────

/// Resolves the system user on whose behalf worker jobs run.
pub trait IdentityResolver: Send + Sync {
    /// Resolution order: configured owner → persisted owner → any admin →
    /// none (Tier 2 then fails cleanly).
    fn system_user_id(&self) -> Option<String>;
}

#[derive(Debug, Clone, Default)]
pub struct StaticIdentity {
    pub configured_owner: Option<String>,
    pub persisted_owner: Option<String>,
    pub admin_ids: Vec<String>,
}

impl IdentityResolver for StaticIdentity {
    fn system_user_id(&self) -> Option<String> {
        self.configured_owner
            .clone()
            .or_else(|| self.persisted_owner.clone())
            .or_else(|| self.admin_ids.first().cloned())
    }
}

// ─── Incident store ───────────────────────────────────────────────────────────

/// The detector's incident table. The orchestrator fetches incidents by id
/// and writes back status transitions; it never creates them.
pub trait IncidentStore: Send + Sync {
    fn fetch(&self, id: &str) -> Option<Incident>;
    fn update(&self, incident: &Incident) -> PersistResult<()>;
}

/// Snapshot-backed incident table used by the daemon and tests.
pub struct JsonIncidentStore {
    incidents: Mutex<HashMap<String, Incident>>,
    store: SnapshotStore,
}

impl JsonIncidentStore {
    pub fn open(state_path: &Path) -> Self {
        let store = SnapshotStore::new(state_path, "incidents");
        let incidents: HashMap<String, Incident> = store.load();
        debug!(incidents = incidents.len(), "incident table loaded");
        Self {
            incidents: Mutex::new(incidents),
            store,
        }
    }

    /// Intake path for the detector: insert or replace an incident row.
    pub fn ingest(&self, incident: &Incident) -> PersistResult<()> {
        let mut incidents = self.incidents.lock();
        incidents.insert(incident.id.clone(), incident.clone());
        self.store.save(&incidents)
    }

    pub fn all(&self) -> Vec<Incident> {
        self.incidents.lock().values().cloned().collect()
    }
}

impl IncidentStore for JsonIncidentStore {
    fn fetch(&self, id: &str) -> Option<Incident> {
        self.incidents.lock().get(id).cloned()
    }

    fn update(&self, incident: &Incident) -> PersistResult<()> {
        self.ingest(incident)
    }
}
