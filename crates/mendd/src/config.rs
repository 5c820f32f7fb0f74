//! Daemon configuration.

use mend_orchestrator::HealingConfig;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "backend", rename_all = "snake_case")]
pub enum GatewayConfig {
    /// Development: git CLI in a local working tree.
    Local { repo_root: PathBuf },
    /// Production: hosting API over HTTPS.
    Remote {
        base_url: String,
        repo: String,
        token: String,
    },
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IdentityConfig {
    pub configured_owner: Option<String>,
    pub persisted_owner: Option<String>,
    #[serde(default)]
    pub admin_ids: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DaemonConfig {
    /// Where snapshots, spools, and audit state live.
    pub state_dir: PathBuf,
    /// Root of the platform workspace being healed.
    pub workspace_root: PathBuf,
    /// Static check command run during verification (e.g. `["npx", "tsc", "--noEmit"]`).
    pub check_command: Option<Vec<String>>,
    pub gateway: GatewayConfig,
    #[serde(default)]
    pub identity: IdentityConfig,
    #[serde(default)]
    pub healing: HealingConfig,
}

impl DaemonConfig {
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let raw = std::fs::read_to_string(path)
            .map_err(|e| anyhow::anyhow!("cannot read config {}: {e}", path.display()))?;
        let config: Self = serde_json::from_str(&raw)
            .map_err(|e| anyhow::anyhow!("invalid config {}: {e}", path.display()))?;
        Ok(config)
    }

    pub fn write_sample(path: &Path) -> anyhow::Result<()> {
        let sample = Self {
            state_dir: PathBuf::from("/var/lib/mendd"),
            workspace_root: PathBuf::from("/srv/platform"),
            check_command: Some(vec![
                "npx".to_string(),
                "tsc".to_string(),
                "--noEmit".to_string(),
            ]),
            gateway: GatewayConfig::Local {
                repo_root: PathBuf::from("/srv/platform"),
            },
            identity: IdentityConfig {
                configured_owner: Some("owner-user-id".to_string()),
                persisted_owner: None,
                admin_ids: Vec::new(),
            },
            healing: HealingConfig::default(),
        };
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, serde_json::to_string_pretty(&sample)?)?;
        Ok(())
    }

    pub fn spool_dir(&self, domain: &str) -> PathBuf {
        self.state_dir.join("spool").join(domain)
    }
}
