//! Safety envelope for auto-healing.
//!
//! Process-local state guarding the orchestrator: a time-bounded kill-switch
//! tripped by consecutive failures, a rolling-hour admission window, and a
//! single-writer healing lock with a mandatory cooldown between sessions.
//! None of this state is persisted; a restart re-arms a clean envelope.

#![forbid(unsafe_code)]

use chrono::{DateTime, Duration, Utc};
use parking_lot::Mutex;
use std::sync::Arc;
use thiserror::Error;
use tracing::{info, warn};

// ─── Limits ───────────────────────────────────────────────────────────────────

/// Tunable safety limits. The defaults are the hard numbers of the envelope:
/// 3 sessions per rolling hour, kill-switch after 3 consecutive failures for
/// one hour, 5 s cooldown between sessions.
#[derive(Debug, Clone)]
pub struct SafetyLimits {
    pub max_sessions_per_window: usize,
    pub window: Duration,
    pub kill_switch_threshold: u32,
    pub kill_switch_duration: Duration,
    pub cooldown: Duration,
}

impl Default for SafetyLimits {
    fn default() -> Self {
        Self {
            max_sessions_per_window: 3,
            window: Duration::hours(1),
            kill_switch_threshold: 3,
            kill_switch_duration: Duration::hours(1),
            cooldown: Duration::seconds(5),
        }
    }
}

// ─── Admission verdicts ───────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AdmissionDenied {
    #[error("kill switch active until {until}")]
    KillSwitchActive { until: DateTime<Utc> },

    #[error("rate limited: {window_count} sessions in the current window")]
    RateLimited { window_count: usize },

    #[error("healing lock held by an active session")]
    LockHeld,

    #[error("cooling down until {until}")]
    CoolingDown { until: DateTime<Utc> },
}

// ─── Envelope ─────────────────────────────────────────────────────────────────

#[derive(Debug, Default)]
struct EnvelopeState {
    kill_switch_until: Option<DateTime<Utc>>,
    consecutive_failures: u32,
    session_timestamps: Vec<DateTime<Utc>>,
    lock_held: bool,
    cooldown_until: Option<DateTime<Utc>>,
}

/// The process-wide safety state. All methods take an explicit `now` so the
/// window and kill-switch arithmetic is testable.
#[derive(Debug)]
pub struct SafetyEnvelope {
    limits: SafetyLimits,
    state: Mutex<EnvelopeState>,
}

impl SafetyEnvelope {
    pub fn new(limits: SafetyLimits) -> Arc<Self> {
        Arc::new(Self {
            limits,
            state: Mutex::new(EnvelopeState::default()),
        })
    }

    pub fn limits(&self) -> &SafetyLimits {
        &self.limits
    }

    /// Evaluate admission rules 1-3 without consuming anything: kill-switch
    /// (cleared and streak reset when expired), rate-limit window, lock and
    /// cooldown. Callers run their remaining checks, then commit with
    /// [`Self::try_admit`].
    pub fn preflight(&self, now: DateTime<Utc>) -> Result<(), AdmissionDenied> {
        let mut s = self.state.lock();

        if let Some(until) = s.kill_switch_until {
            if now < until {
                return Err(AdmissionDenied::KillSwitchActive { until });
            }
            s.kill_switch_until = None;
            s.consecutive_failures = 0;
            info!("kill switch expired — auto-healing re-armed");
        }

        let cutoff = now - self.limits.window;
        s.session_timestamps.retain(|t| *t > cutoff);
        if s.session_timestamps.len() >= self.limits.max_sessions_per_window {
            return Err(AdmissionDenied::RateLimited {
                window_count: s.session_timestamps.len(),
            });
        }

        if s.lock_held {
            return Err(AdmissionDenied::LockHeld);
        }
        if let Some(until) = s.cooldown_until {
            if now < until {
                return Err(AdmissionDenied::CoolingDown { until });
            }
        }
        Ok(())
    }

    /// Evaluate the admission rules in order and, if all pass, consume a
    /// window slot and acquire the healing lock.
    ///
    /// An expired kill-switch is cleared here (and the failure counter
    /// reset); the first admission attempt after expiry re-arms healing.
    pub fn try_admit(self: &Arc<Self>, now: DateTime<Utc>) -> Result<HealingPermit, AdmissionDenied> {
        let mut s = self.state.lock();

        if let Some(until) = s.kill_switch_until {
            if now < until {
                return Err(AdmissionDenied::KillSwitchActive { until });
            }
            s.kill_switch_until = None;
            s.consecutive_failures = 0;
            info!("kill switch expired — auto-healing re-armed");
        }

        let cutoff = now - self.limits.window;
        s.session_timestamps.retain(|t| *t > cutoff);
        if s.session_timestamps.len() >= self.limits.max_sessions_per_window {
            return Err(AdmissionDenied::RateLimited {
                window_count: s.session_timestamps.len(),
            });
        }

        if s.lock_held {
            return Err(AdmissionDenied::LockHeld);
        }
        if let Some(until) = s.cooldown_until {
            if now < until {
                return Err(AdmissionDenied::CoolingDown { until });
            }
            s.cooldown_until = None;
        }

        s.session_timestamps.push(now);
        s.lock_held = true;
        Ok(HealingPermit {
            envelope: Arc::clone(self),
        })
    }

    /// Re-acquire the lock to resume an already-admitted session (worker
    /// completion, deployment webhook). Does not consume a window slot.
    pub fn try_resume(self: &Arc<Self>, now: DateTime<Utc>) -> Result<HealingPermit, AdmissionDenied> {
        let mut s = self.state.lock();
        if s.lock_held {
            return Err(AdmissionDenied::LockHeld);
        }
        if let Some(until) = s.cooldown_until {
            if now < until {
                return Err(AdmissionDenied::CoolingDown { until });
            }
            s.cooldown_until = None;
        }
        s.lock_held = true;
        Ok(HealingPermit {
            envelope: Arc::clone(self),
        })
    }

    fn release(&self, now: DateTime<Utc>) {
        let mut s = self.state.lock();
        s.lock_held = false;
        s.cooldown_until = Some(now + self.limits.cooldown);
    }

    /// Record a terminal session failure. Returns the disabled-until instant
    /// when this failure trips the kill-switch (exactly once per activation).
    pub fn record_failure(&self, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        let mut s = self.state.lock();
        s.consecutive_failures += 1;
        if s.consecutive_failures >= self.limits.kill_switch_threshold
            && s.kill_switch_until.is_none()
        {
            let until = now + self.limits.kill_switch_duration;
            s.kill_switch_until = Some(until);
            warn!(
                consecutive_failures = s.consecutive_failures,
                disabled_until = %until,
                "kill switch activated"
            );
            return Some(until);
        }
        None
    }

    /// Record a terminal session success, resetting the failure streak.
    pub fn record_success(&self) {
        self.state.lock().consecutive_failures = 0;
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.state.lock().consecutive_failures
    }

    pub fn kill_switch_active(&self, now: DateTime<Utc>) -> bool {
        self.state
            .lock()
            .kill_switch_until
            .is_some_and(|until| now < until)
    }

    pub fn lock_held(&self) -> bool {
        self.state.lock().lock_held
    }

    /// Defensive prune of the admission window; run by the background sweep.
    pub fn sweep(&self, now: DateTime<Utc>) {
        let cutoff = now - self.limits.window;
        self.state.lock().session_timestamps.retain(|t| *t > cutoff);
    }

    pub fn window_len(&self) -> usize {
        self.state.lock().session_timestamps.len()
    }

    /// Operator action: clear the kill-switch, streak, and cooldown.
    pub fn reset(&self) {
        let mut s = self.state.lock();
        s.kill_switch_until = None;
        s.consecutive_failures = 0;
        s.cooldown_until = None;
        info!("safety envelope reset by operator");
    }
}

/// RAII healing lock. Dropping the permit releases the lock on every exit
/// path and starts the cooldown.
#[derive(Debug)]
pub struct HealingPermit {
    envelope: Arc<SafetyEnvelope>,
}

impl Drop for HealingPermit {
    fn drop(&mut self) {
        self.envelope.release(Utc::now());
    }
}
