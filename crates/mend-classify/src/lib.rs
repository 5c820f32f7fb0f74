//! Failure classification and diagnostic prompt generation.
//!
//! Classification separates platform failures from agent failures and
//! suggests a repair tier. It is informational: the router's knowledge-base
//! and threshold rules always decide the actual tier.

#![forbid(unsafe_code)]

use mend_proto::{Incident, IncidentKind, RepairStrategy};
use serde::{Deserialize, Serialize};
use tracing::debug;

// ─── Classification ───────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureCategory {
    PlatformFailure,
    AgentFailure,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Classification {
    pub category: FailureCategory,
    pub is_agent_failure: bool,
    pub evidence: Vec<String>,
    pub suggested_strategy: RepairStrategy,
}

/// Markers in logs or stack traces that point at a misbehaving agent rather
/// than the platform itself.
const AGENT_MARKERS: [&str; 4] = ["agent", "worker job", "tool call", "model output"];

/// Classify an incident as platform vs agent failure and suggest a tier.
pub fn classify(incident: &Incident) -> Classification {
    let mut evidence = Vec::new();

    let mut agent_failure = incident.kind == IncidentKind::AgentFailure;
    if agent_failure {
        evidence.push("incident kind is agent_failure".to_string());
    }

    for haystack in [incident.logs.as_deref(), incident.stack_trace.as_deref()]
        .into_iter()
        .flatten()
    {
        for marker in AGENT_MARKERS {
            if haystack.to_lowercase().contains(marker) {
                agent_failure = true;
                evidence.push(format!("log evidence mentions '{marker}'"));
            }
        }
    }

    if evidence.is_empty() {
        evidence.push(format!("no agent markers; kind {} points at the platform", incident.kind));
    }

    // Deterministic-signature kinds are good knowledge-base candidates;
    // everything else needs a worker with tool access.
    let suggested_strategy = match incident.kind {
        IncidentKind::RuntimeError | IncidentKind::BuildFailure => RepairStrategy::KnowledgeBase,
        _ => RepairStrategy::WorkerAgent,
    };

    let category = if agent_failure {
        FailureCategory::AgentFailure
    } else {
        FailureCategory::PlatformFailure
    };

    debug!(incident = %incident.id, ?category, ?suggested_strategy, "incident classified");

    Classification {
        category,
        is_agent_failure: agent_failure,
        evidence,
        suggested_strategy,
    }
}

// ─── Diagnostic prompts ───────────────────────────────────────────────────────

/// Build the diagnostic message handed to a worker agent.
///
/// A fixed per-kind template carrying severity, key metrics, and the
/// description; unknown kinds fall back to a generic instruction.
pub fn diagnostic_message(incident: &Incident) -> String {
    let cpu = incident
        .metrics
        .as_ref()
        .and_then(|m| m.cpu_pct)
        .map(|v| format!("{v:.0}%"))
        .unwrap_or_else(|| "unknown".to_string());
    let mem = incident
        .metrics
        .as_ref()
        .and_then(|m| m.mem_pct)
        .map(|v| format!("{v:.0}%"))
        .unwrap_or_else(|| "unknown".to_string());

    match incident.kind {
        IncidentKind::HighCpu => format!(
            "Investigate sustained high CPU ({severity}): usage at {cpu}. {desc}",
            severity = incident.severity,
            desc = incident.description,
        ),
        IncidentKind::HighMemory => format!(
            "Investigate memory pressure ({severity}): usage at {mem}. {desc}",
            severity = incident.severity,
            desc = incident.description,
        ),
        IncidentKind::SafetyIssue => format!(
            "Address a safety issue ({severity}) reported by {source}: {desc}",
            severity = incident.severity,
            source = incident.source,
            desc = incident.description,
        ),
        IncidentKind::BuildFailure => format!(
            "Fix the failing build ({severity}): {desc}",
            severity = incident.severity,
            desc = incident.description,
        ),
        IncidentKind::RuntimeError => format!(
            "Fix the runtime error ({severity}): {desc}",
            severity = incident.severity,
            desc = incident.description,
        ),
        IncidentKind::AgentFailure => format!(
            "Recover from an agent failure ({severity}): {desc}",
            severity = incident.severity,
            desc = incident.description,
        ),
        IncidentKind::Other => format!("diagnose and fix: {}", incident.description),
    }
}
