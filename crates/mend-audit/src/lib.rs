//! Audit store for the healing control plane.
//!
//! Three snapshot-backed domains mirror the persisted-state layout:
//! `healing_sessions` (upserted, write-then-transition), `heal_attempts`
//! (append-only, SHA-256 chain-hashed on finalization), and `fix_attempts`
//! (one row per proposed fix, feeding the historical confidence factor).

#![forbid(unsafe_code)]

use chrono::{DateTime, Utc};
use mend_persist::{PersistError, SnapshotStore};
use mend_proto::{
    ActionRecord, FixAttempt, FixOutcome, HealAttempt, HealingSession, SessionStatus,
    VerificationReport,
};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::path::Path;
use thiserror::Error;
use tracing::{info, warn};

#[derive(Debug, Error)]
pub enum AuditError {
    #[error("persist error: {0}")]
    Persist(#[from] PersistError),

    #[error("{kind} {id} not found")]
    NotFound { kind: &'static str, id: String },
}

pub type AuditResult<T> = Result<T, AuditError>;

// ─── Store ────────────────────────────────────────────────────────────────────

pub struct AuditStore {
    sessions: HashMap<String, HealingSession>,
    attempts: HashMap<String, HealAttempt>,
    fixes: HashMap<String, FixAttempt>,
    session_store: SnapshotStore,
    attempt_store: SnapshotStore,
    fix_store: SnapshotStore,
    /// Hash of the most recently finalized attempt; chains the next one.
    last_attempt_hash: String,
}

impl AuditStore {
    pub fn open(state_path: &Path) -> Self {
        let session_store = SnapshotStore::new(state_path, "healing_sessions");
        let attempt_store = SnapshotStore::new(state_path, "heal_attempts");
        let fix_store = SnapshotStore::new(state_path, "fix_attempts");

        let sessions: HashMap<String, HealingSession> = session_store.load();
        let attempts: HashMap<String, HealAttempt> = attempt_store.load();
        let fixes: HashMap<String, FixAttempt> = fix_store.load();

        let last_attempt_hash = attempts
            .values()
            .filter(|a| !a.record_hash.is_empty())
            .max_by_key(|a| a.completed_at)
            .map(|a| a.record_hash.clone())
            .unwrap_or_default();

        info!(
            sessions = sessions.len(),
            attempts = attempts.len(),
            fixes = fixes.len(),
            "audit store loaded"
        );

        Self {
            sessions,
            attempts,
            fixes,
            session_store,
            attempt_store,
            fix_store,
            last_attempt_hash,
        }
    }

    // ─── Sessions ────────────────────────────────────────────────────────────

    /// Persist a session row. Durable before the caller's next transition.
    pub fn upsert_session(&mut self, session: &HealingSession) -> AuditResult<()> {
        self.sessions.insert(session.id.clone(), session.clone());
        self.session_store.save(&self.sessions)?;
        Ok(())
    }

    pub fn session(&self, id: &str) -> Option<&HealingSession> {
        self.sessions.get(id)
    }

    pub fn active_session_for(&self, incident_id: &str) -> Option<&HealingSession> {
        self.sessions
            .values()
            .find(|s| s.incident_id == incident_id && s.status == SessionStatus::Active)
    }

    pub fn session_by_worker_job(&self, job_id: &str) -> Option<&HealingSession> {
        self.sessions
            .values()
            .find(|s| s.worker_job_id.as_deref() == Some(job_id))
    }

    /// All sessions, most recent first.
    pub fn sessions(&self) -> Vec<&HealingSession> {
        let mut out: Vec<&HealingSession> = self.sessions.values().collect();
        out.sort_by_key(|s| std::cmp::Reverse(s.started_at));
        out
    }

    // ─── Heal attempts ───────────────────────────────────────────────────────

    pub fn insert_attempt(&mut self, attempt: HealAttempt) -> AuditResult<()> {
        self.attempts.insert(attempt.id.clone(), attempt);
        self.attempt_store.save(&self.attempts)?;
        Ok(())
    }

    pub fn append_action(&mut self, attempt_id: &str, action: ActionRecord) -> AuditResult<()> {
        let attempt = self
            .attempts
            .get_mut(attempt_id)
            .ok_or_else(|| AuditError::NotFound {
                kind: "heal attempt",
                id: attempt_id.to_string(),
            })?;
        attempt.actions_taken.push(action);
        self.attempt_store.save(&self.attempts)?;
        Ok(())
    }

    /// Finalize an attempt: record the outcome and chain-hash the row.
    pub fn finalize_attempt(
        &mut self,
        attempt_id: &str,
        success: bool,
        verification_passed: Option<bool>,
        error: Option<String>,
        now: DateTime<Utc>,
    ) -> AuditResult<()> {
        let previous_hash = self.last_attempt_hash.clone();
        let attempt = self
            .attempts
            .get_mut(attempt_id)
            .ok_or_else(|| AuditError::NotFound {
                kind: "heal attempt",
                id: attempt_id.to_string(),
            })?;

        attempt.success = success;
        attempt.verification_passed = verification_passed;
        attempt.error = error;
        attempt.completed_at = Some(now);
        attempt.previous_hash = previous_hash;
        attempt.record_hash = attempt_hash(attempt);

        self.last_attempt_hash = attempt.record_hash.clone();
        self.attempt_store.save(&self.attempts)?;
        Ok(())
    }

    pub fn attempts_for_session(&self, session_id: &str) -> Vec<&HealAttempt> {
        let mut out: Vec<&HealAttempt> = self
            .attempts
            .values()
            .filter(|a| a.session_id == session_id)
            .collect();
        out.sort_by_key(|a| a.attempt_number);
        out
    }

    /// The open (unfinalized) attempt of a session, if any.
    pub fn open_attempt_for_session(&self, session_id: &str) -> Option<&HealAttempt> {
        self.attempts
            .values()
            .find(|a| a.session_id == session_id && a.completed_at.is_none())
    }

    /// Walk the finalized attempts in completion order and verify the hash
    /// chain is intact.
    pub fn verify_chain(&self) -> bool {
        let mut finalized: Vec<&HealAttempt> = self
            .attempts
            .values()
            .filter(|a| !a.record_hash.is_empty())
            .collect();
        finalized.sort_by_key(|a| a.completed_at);

        let mut prev = String::new();
        for attempt in finalized {
            if attempt.previous_hash != prev {
                warn!(
                    attempt = %attempt.id,
                    expected = %prev,
                    got = %attempt.previous_hash,
                    "audit chain integrity violation"
                );
                return false;
            }
            if attempt_hash(attempt) != attempt.record_hash {
                warn!(attempt = %attempt.id, "audit record hash mismatch");
                return false;
            }
            prev = attempt.record_hash.clone();
        }
        true
    }

    // ─── Fix attempts ────────────────────────────────────────────────────────

    pub fn insert_fix(&mut self, fix: FixAttempt) -> AuditResult<()> {
        self.fixes.insert(fix.id.clone(), fix);
        self.fix_store.save(&self.fixes)?;
        Ok(())
    }

    pub fn complete_fix(
        &mut self,
        fix_id: &str,
        outcome: FixOutcome,
        verification: Option<VerificationReport>,
        pr_number: Option<u64>,
        pr_url: Option<String>,
        now: DateTime<Utc>,
    ) -> AuditResult<()> {
        let fix = self.fixes.get_mut(fix_id).ok_or_else(|| AuditError::NotFound {
            kind: "fix attempt",
            id: fix_id.to_string(),
        })?;
        fix.outcome = outcome;
        fix.verification_results = verification;
        fix.pr_number = pr_number;
        fix.pr_url = pr_url;
        fix.completed_at = Some(now);
        self.fix_store.save(&self.fixes)?;
        Ok(())
    }

    pub fn fix(&self, id: &str) -> Option<&FixAttempt> {
        self.fixes.get(id)
    }

    /// The still-pending fix row of a session awaiting deployment.
    pub fn pending_fix_for_session(&self, session_id: &str) -> Option<&FixAttempt> {
        self.fixes
            .values()
            .find(|f| f.session_id == session_id && f.outcome == FixOutcome::Pending)
    }

    /// The most recent fix attempts in chronological order (oldest first),
    /// as the confidence scorer expects.
    pub fn recent_fix_attempts(&self, limit: usize) -> Vec<FixAttempt> {
        let mut all: Vec<&FixAttempt> = self.fixes.values().collect();
        all.sort_by_key(|f| f.created_at);
        all.iter()
            .rev()
            .take(limit)
            .rev()
            .map(|f| (*f).clone())
            .collect()
    }
}

fn attempt_hash(attempt: &HealAttempt) -> String {
    let canonical = serde_json::json!({
        "id": attempt.id,
        "incident_id": attempt.incident_id,
        "session_id": attempt.session_id,
        "attempt_number": attempt.attempt_number,
        "strategy": attempt.strategy,
        "success": attempt.success,
        "verification_passed": attempt.verification_passed,
        "error": attempt.error,
        "completed_at": attempt.completed_at,
        "previous_hash": attempt.previous_hash,
    });
    let mut hasher = Sha256::new();
    hasher.update(canonical.to_string().as_bytes());
    hex::encode(hasher.finalize())
}
