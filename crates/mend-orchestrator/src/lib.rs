//! The MendOps healing control plane.
//!
//! Consumes normalized incident events, drives each admitted incident
//! through the diagnose → repair → verify → commit-or-review pipeline, and
//! enforces the safety envelope around every session.

#![forbid(unsafe_code)]

pub mod bus;
pub mod collaborators;
pub mod config;
pub mod error;
pub mod metrics;
pub mod orchestrator;
pub mod supervisor;

pub use bus::EventBus;
pub use collaborators::{
    IdentityResolver, IncidentStore, JsonIncidentStore, StaticIdentity, WorkerAgent, WorkerError,
};
pub use config::HealingConfig;
pub use error::OrchestratorError;
pub use metrics::HealingMetrics;
pub use orchestrator::{EnqueueOutcome, Orchestrator, OrchestratorParts};
pub use supervisor::{Supervisor, SupervisorChannels};
