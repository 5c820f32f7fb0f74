//! Adversarial tests for the safety envelope: the hard constraints must
//! hold even when callers try to go around them.
//!
//! 1. At most one session holds the healing lock, with a cooldown between
//!    holders.
//! 2. At most 3 admissions per rolling hour.
//! 3. Three consecutive failures disable healing for an hour.
//! 4. An incident never heals past its attempt cap.
//! 5. No write ever lands outside the workspace root.

use chrono::{Duration, Utc};
use mend_proto::{Incident, IncidentKind, Severity};
use mend_safety::{AdmissionDenied, SafetyEnvelope, SafetyLimits};
use mend_workspace::{LocalWorkspace, Workspace, WorkspaceError};

fn no_cooldown() -> SafetyLimits {
    SafetyLimits {
        cooldown: Duration::zero(),
        ..SafetyLimits::default()
    }
}

// ─── Single-writer lock ───────────────────────────────────────────────────────

#[test]
fn test_lock_cannot_be_double_acquired() {
    let env = SafetyEnvelope::new(SafetyLimits::default());
    let now = Utc::now();
    let _held = env.try_admit(now).expect("first holder");

    // Neither a fresh admission nor a resume can steal the lock.
    assert_eq!(env.try_admit(now).unwrap_err(), AdmissionDenied::LockHeld);
    assert_eq!(env.try_resume(now).unwrap_err(), AdmissionDenied::LockHeld);
}

#[test]
fn test_cooldown_gap_is_mandatory() {
    let env = SafetyEnvelope::new(SafetyLimits::default());
    drop(env.try_admit(Utc::now()).expect("admit"));
    // Immediately after release the cooldown still holds the door shut.
    let err = env.try_admit(Utc::now()).unwrap_err();
    assert!(matches!(err, AdmissionDenied::CoolingDown { .. }));
    let err = env.try_resume(Utc::now()).unwrap_err();
    assert!(matches!(err, AdmissionDenied::CoolingDown { .. }));
}

#[test]
fn test_lock_released_even_when_holder_panics() {
    let env = SafetyEnvelope::new(no_cooldown());
    let env_clone = env.clone();
    let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(move || {
        let _permit = env_clone.try_admit(Utc::now()).expect("admit");
        panic!("session blew up");
    }));
    assert!(result.is_err());
    // The RAII guard released the lock on unwind.
    assert!(!env.lock_held());
}

// ─── Rate limit ───────────────────────────────────────────────────────────────

#[test]
fn test_rate_limit_cannot_be_exceeded_by_retry_storm() {
    let env = SafetyEnvelope::new(no_cooldown());
    let base = Utc::now();
    let mut admitted = 0;
    for i in 0..50 {
        let now = base + Duration::seconds(i);
        if let Ok(permit) = env.try_admit(now) {
            admitted += 1;
            drop(permit);
        }
        assert!(env.window_len() <= 3);
    }
    assert_eq!(admitted, 3, "a retry storm gains nothing past the window cap");
}

#[test]
fn test_sweep_does_not_reset_the_window() {
    let env = SafetyEnvelope::new(no_cooldown());
    let base = Utc::now();
    for i in 0..3 {
        drop(env.try_admit(base + Duration::seconds(i)).expect("admit"));
    }
    // A defensive sweep inside the window must not free capacity early.
    env.sweep(base + Duration::minutes(5));
    assert_eq!(env.window_len(), 3);
    assert!(env.try_admit(base + Duration::minutes(6)).is_err());
}

// ─── Kill-switch ──────────────────────────────────────────────────────────────

#[test]
fn test_kill_switch_cannot_be_raced_by_success_after_activation() {
    let env = SafetyEnvelope::new(SafetyLimits::default());
    let now = Utc::now();
    for _ in 0..3 {
        env.record_failure(now);
    }
    assert!(env.kill_switch_active(now));

    // A success reported after activation clears the streak but not the
    // switch itself; only expiry (or an operator reset) re-arms healing.
    env.record_success();
    assert!(env.kill_switch_active(now));
    assert!(matches!(
        env.try_admit(now + Duration::minutes(30)).unwrap_err(),
        AdmissionDenied::KillSwitchActive { .. }
    ));
}

#[test]
fn test_kill_switch_duration_is_a_full_hour() {
    let env = SafetyEnvelope::new(SafetyLimits::default());
    let now = Utc::now();
    for _ in 0..3 {
        env.record_failure(now);
    }
    assert!(matches!(
        env.try_admit(now + Duration::minutes(59)).unwrap_err(),
        AdmissionDenied::KillSwitchActive { .. }
    ));
    env.try_admit(now + Duration::minutes(61)).expect("expired");
}

// ─── Attempt cap ──────────────────────────────────────────────────────────────

#[test]
fn test_attempt_cap_holds_under_repeated_retries() {
    let mut incident = Incident::new(
        "inc-cap",
        IncidentKind::RuntimeError,
        Severity::High,
        "crash loop",
        "stack overflow in scheduler",
        "runtime-monitor",
    );
    for _ in 0..10 {
        if incident.begin_attempt(3, Utc::now()).is_ok() {
            incident.mark_failed();
        }
    }
    assert_eq!(incident.attempt_count, 3);
    assert!(!incident.can_begin_healing(3));
}

// ─── Workspace confinement ────────────────────────────────────────────────────

#[test]
fn test_workspace_rejects_escape_attempts_before_any_write() {
    let dir = tempfile::tempdir().expect("tempdir");
    let sentinel = dir.path().parent().map(|p| p.join("escape-sentinel.txt"));
    let ws = LocalWorkspace::new(dir.path());

    for path in [
        "/etc/passwd",
        "/tmp/escape-sentinel.txt",
        "../escape-sentinel.txt",
        "src/../../escape-sentinel.txt",
        "src/ok/../../../escape-sentinel.txt",
    ] {
        let err = ws.write_file(path, b"escaped").unwrap_err();
        assert!(
            matches!(
                err,
                WorkspaceError::AbsolutePath(_) | WorkspaceError::Traversal(_)
            ),
            "{path} must be rejected, got {err:?}"
        );
    }

    if let Some(sentinel) = sentinel {
        assert!(!sentinel.exists(), "nothing may land outside the root");
    }
}

#[test]
fn test_workspace_reads_are_confined_too() {
    let dir = tempfile::tempdir().expect("tempdir");
    let ws = LocalWorkspace::new(dir.path());
    assert!(ws.read_file("../../etc/hostname").is_err());
    assert!(!ws.file_exists("../../etc/hostname"));
}
