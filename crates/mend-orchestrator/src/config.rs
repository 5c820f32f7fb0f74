//! Control-plane configuration.

use chrono::Duration;
use mend_safety::SafetyLimits;
use serde::{Deserialize, Serialize};

/// Tunables for the healing control plane. The defaults are the envelope's
/// hard numbers: 3 attempts per incident, 3 sessions per rolling hour,
/// kill-switch after 3 consecutive failures for an hour, a 95-inclusive
/// auto-commit gate, a 90-inclusive knowledge-base gate, a 30 s verify
/// timeout, and a 5 s lock cooldown.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HealingConfig {
    pub max_attempts_per_incident: u32,
    pub max_sessions_per_window: usize,
    pub window_secs: u64,
    pub kill_switch_threshold: u32,
    pub kill_switch_secs: u64,
    pub auto_commit_threshold: u8,
    pub kb_auto_apply_threshold: u8,
    pub verify_timeout_secs: u64,
    pub cooldown_secs: u64,
    /// Whether an auto-commit must also deploy before the session completes.
    pub require_deployment: bool,
}

impl Default for HealingConfig {
    fn default() -> Self {
        Self {
            max_attempts_per_incident: 3,
            max_sessions_per_window: 3,
            window_secs: 3600,
            kill_switch_threshold: 3,
            kill_switch_secs: 3600,
            auto_commit_threshold: 95,
            kb_auto_apply_threshold: 90,
            verify_timeout_secs: 30,
            cooldown_secs: 5,
            require_deployment: false,
        }
    }
}

impl HealingConfig {
    pub fn safety_limits(&self) -> SafetyLimits {
        SafetyLimits {
            max_sessions_per_window: self.max_sessions_per_window,
            window: Duration::seconds(self.window_secs as i64),
            kill_switch_threshold: self.kill_switch_threshold,
            kill_switch_duration: Duration::seconds(self.kill_switch_secs as i64),
            cooldown: Duration::seconds(self.cooldown_secs as i64),
        }
    }

    pub fn verify_timeout(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.verify_timeout_secs)
    }
}
