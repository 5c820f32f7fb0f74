//! Error signatures and the fix knowledge base.
//!
//! A signature is a stable opaque token over `(kind, message, first stack
//! frame)`: no lowercasing, no whitespace stripping. The knowledge base maps
//! signatures to previously successful fixes and their empirical track
//! record, and answers Tier-1 lookups with a blended confidence.

#![forbid(unsafe_code)]

use chrono::{DateTime, Utc};
use mend_persist::{PersistResult, SnapshotStore};
use mend_proto::{Incident, IncidentKind, KbEntry};
use std::collections::HashMap;
use std::path::Path;
use tracing::{debug, info};

// ─── Error signature ──────────────────────────────────────────────────────────

/// MD5 hex digest of `kind + ':' + message + ':' + first_frame`, verbatim.
pub fn error_signature(kind: IncidentKind, message: &str, first_frame: &str) -> String {
    let digest = md5::compute(format!("{kind}:{message}:{first_frame}"));
    format!("{digest:x}")
}

/// First line of a stack trace, or the empty string when absent.
pub fn first_stack_frame(stack_trace: Option<&str>) -> &str {
    stack_trace.and_then(|s| s.lines().next()).unwrap_or("")
}

/// Signature of an incident: kind, description, and top stack frame.
pub fn incident_signature(incident: &Incident) -> String {
    error_signature(
        incident.kind,
        &incident.description,
        first_stack_frame(incident.stack_trace.as_deref()),
    )
}

// ─── Knowledge base ───────────────────────────────────────────────────────────

/// Blend of empirical success rate and stored confidence used by the Tier-1
/// gate: `round(60 · rate + 0.4 · confidence)`.
pub fn blended_confidence(entry: &KbEntry) -> u8 {
    let raw = 60.0 * entry.success_rate() + 0.4 * f64::from(entry.confidence);
    raw.round().clamp(0.0, 100.0) as u8
}

/// Append-only store of prior fixes keyed by error signature.
pub struct KnowledgeBase {
    entries: HashMap<String, KbEntry>,
    store: SnapshotStore,
}

impl KnowledgeBase {
    /// Open (or create) the knowledge base under `state_path`.
    pub fn open(state_path: &Path) -> Self {
        let store = SnapshotStore::new(state_path, "knowledge_base");
        let entries = store.load();
        debug!(entries = entries.len(), "knowledge base loaded");
        Self { entries, store }
    }

    pub fn lookup(&self, signature: &str) -> Option<&KbEntry> {
        self.entries.get(signature)
    }

    /// Tier-1 lookup: the entry plus its blended confidence.
    pub fn lookup_scored(&self, signature: &str) -> Option<(KbEntry, u8)> {
        self.entries
            .get(signature)
            .map(|e| (e.clone(), blended_confidence(e)))
    }

    /// Record a successful fix for `signature`.
    ///
    /// Updates the existing entry (counters advance, confidence becomes the
    /// average of old and new, the prior fix is preserved when no new one is
    /// supplied) or creates a new one. Entries are only ever created on
    /// success.
    pub fn record_success(
        &mut self,
        signature: &str,
        kind: IncidentKind,
        context: &str,
        fix: Option<&str>,
        confidence: u8,
        now: DateTime<Utc>,
    ) -> PersistResult<()> {
        match self.entries.get_mut(signature) {
            Some(entry) => {
                entry.times_encountered += 1;
                entry.times_fixed += 1;
                entry.confidence =
                    ((u16::from(entry.confidence) + u16::from(confidence)) / 2) as u8;
                if let Some(fix) = fix {
                    entry.successful_fix = fix.to_string();
                }
                entry.last_encountered = now;
                info!(
                    signature,
                    fixed = entry.times_fixed,
                    encountered = entry.times_encountered,
                    "knowledge base entry reinforced"
                );
            }
            None => {
                self.entries.insert(
                    signature.to_string(),
                    KbEntry {
                        error_signature: signature.to_string(),
                        error_kind: kind,
                        context: context.to_string(),
                        successful_fix: fix.unwrap_or_default().to_string(),
                        times_encountered: 1,
                        times_fixed: 1,
                        last_encountered: now,
                        confidence,
                    },
                );
                info!(signature, "knowledge base entry created");
            }
        }
        self.snapshot()
    }

    /// Record a failed application of a known fix. Counters advance but
    /// `times_fixed` does not; a missing entry is left missing.
    pub fn record_failure(&mut self, signature: &str, now: DateTime<Utc>) -> PersistResult<()> {
        if let Some(entry) = self.entries.get_mut(signature) {
            entry.times_encountered += 1;
            entry.last_encountered = now;
            info!(
                signature,
                fixed = entry.times_fixed,
                encountered = entry.times_encountered,
                "knowledge base entry weakened"
            );
            self.snapshot()?;
        }
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries(&self) -> impl Iterator<Item = &KbEntry> {
        self.entries.values()
    }

    fn snapshot(&self) -> PersistResult<()> {
        self.store.save(&self.entries)
    }
}
