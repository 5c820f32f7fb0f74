//! Control-plane error types.
//!
//! These cover the non-recoverable surface of the orchestrator: unknown
//! identifiers and transient store failures. Admission denials, failed
//! repairs, and failed verifications are ordinary outcomes, reported through
//! [`crate::orchestrator::EnqueueOutcome`] and the session rows instead.

use mend_audit::AuditError;
use mend_persist::PersistError;
use mend_proto::StateError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum OrchestratorError {
    #[error("incident {0} not found")]
    UnknownIncident(String),

    #[error("session {0} not found")]
    UnknownSession(String),

    #[error("no session for worker job {0}")]
    UnknownWorkerJob(String),

    #[error("state error: {0}")]
    State(#[from] StateError),

    #[error("audit error: {0}")]
    Audit(#[from] AuditError),

    #[error("persist error: {0}")]
    Persist(#[from] PersistError),
}

pub type OrchestratorResult<T> = Result<T, OrchestratorError>;
