//! Workspace interface: root-confined file access with per-session revert
//! and a timeout-aware type-check.
//!
//! Every path is resolved against the workspace root before any I/O;
//! absolute paths and traversal are rejected up front so a malformed fix can
//! never write outside the tree. The first write to a path snapshots its
//! prior content, which is what `revert_file` restores on rollback.

#![forbid(unsafe_code)]

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::path::{Component, Path, PathBuf};
use std::process::Stdio;
use thiserror::Error;
use tracing::{debug, info, warn};

// ─── Errors ───────────────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum WorkspaceError {
    #[error("absolute paths are rejected: {0}")]
    AbsolutePath(String),

    #[error("path escapes the workspace root: {0}")]
    Traversal(String),

    #[error("io error on {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to run type check: {0}")]
    CheckSpawn(std::io::Error),
}

pub type WsResult<T> = Result<T, WorkspaceError>;

// ─── Interface ────────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct TypeCheckOutcome {
    pub ok: bool,
    /// Combined stdout/stderr.
    pub output: String,
}

/// The file surface the healing control plane is allowed to touch.
#[async_trait]
pub trait Workspace: Send + Sync {
    fn read_file(&self, path: &str) -> WsResult<Vec<u8>>;
    fn write_file(&self, path: &str, bytes: &[u8]) -> WsResult<()>;
    /// Restore a path to its pre-session content. Unknown paths are a no-op.
    fn revert_file(&self, path: &str) -> WsResult<()>;
    /// Run the configured static check, bounded by the check timeout.
    async fn type_check(&self) -> WsResult<TypeCheckOutcome>;
    fn list_files(&self, dir: &str) -> WsResult<Vec<String>>;
    fn file_exists(&self, path: &str) -> bool;
    /// Forget revert baselines at a session boundary.
    fn clear_baselines(&self);
}

// ─── Local filesystem implementation ──────────────────────────────────────────

pub struct LocalWorkspace {
    root: PathBuf,
    check_command: Option<Vec<String>>,
    check_timeout: std::time::Duration,
    /// Pre-change content per path; `None` means the file did not exist.
    baselines: Mutex<HashMap<String, Option<Vec<u8>>>>,
}

impl LocalWorkspace {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            check_command: None,
            check_timeout: std::time::Duration::from_secs(30),
            baselines: Mutex::new(HashMap::new()),
        }
    }

    pub fn with_check_command(
        mut self,
        command: Vec<String>,
        timeout: std::time::Duration,
    ) -> Self {
        self.check_command = Some(command);
        self.check_timeout = timeout;
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Resolve a workspace-relative path, rejecting absolute paths and any
    /// `..` traversal before touching the filesystem.
    fn resolve(&self, path: &str) -> WsResult<PathBuf> {
        let rel = Path::new(path);
        if rel.is_absolute() {
            return Err(WorkspaceError::AbsolutePath(path.to_string()));
        }
        for component in rel.components() {
            if matches!(component, Component::ParentDir) {
                return Err(WorkspaceError::Traversal(path.to_string()));
            }
        }
        Ok(self.root.join(rel))
    }

    fn io(path: &str, source: std::io::Error) -> WorkspaceError {
        WorkspaceError::Io {
            path: path.to_string(),
            source,
        }
    }
}

#[async_trait]
impl Workspace for LocalWorkspace {
    fn read_file(&self, path: &str) -> WsResult<Vec<u8>> {
        let full = self.resolve(path)?;
        std::fs::read(&full).map_err(|e| Self::io(path, e))
    }

    fn write_file(&self, path: &str, bytes: &[u8]) -> WsResult<()> {
        let full = self.resolve(path)?;
        {
            let mut baselines = self.baselines.lock();
            if !baselines.contains_key(path) {
                baselines.insert(path.to_string(), std::fs::read(&full).ok());
            }
        }
        if let Some(parent) = full.parent() {
            std::fs::create_dir_all(parent).map_err(|e| Self::io(path, e))?;
        }
        std::fs::write(&full, bytes).map_err(|e| Self::io(path, e))?;
        debug!(path, bytes = bytes.len(), "workspace file written");
        Ok(())
    }

    fn revert_file(&self, path: &str) -> WsResult<()> {
        let full = self.resolve(path)?;
        let baseline = self.baselines.lock().get(path).cloned();
        match baseline {
            Some(Some(bytes)) => {
                std::fs::write(&full, bytes).map_err(|e| Self::io(path, e))?;
                info!(path, "workspace file reverted");
            }
            Some(None) => {
                if full.exists() {
                    std::fs::remove_file(&full).map_err(|e| Self::io(path, e))?;
                }
                info!(path, "workspace file removed on revert");
            }
            None => {
                warn!(path, "no baseline for path — revert is a no-op");
            }
        }
        Ok(())
    }

    async fn type_check(&self) -> WsResult<TypeCheckOutcome> {
        let Some(command) = &self.check_command else {
            return Ok(TypeCheckOutcome {
                ok: true,
                output: "no type check configured".to_string(),
            });
        };
        let (program, args) = command
            .split_first()
            .ok_or_else(|| Self::io("type-check", std::io::Error::other("empty check command")))?;

        let mut cmd = tokio::process::Command::new(program);
        cmd.args(args)
            .current_dir(&self.root)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        match tokio::time::timeout(self.check_timeout, cmd.output()).await {
            Ok(Ok(out)) => {
                let mut output = String::from_utf8_lossy(&out.stdout).into_owned();
                output.push_str(&String::from_utf8_lossy(&out.stderr));
                Ok(TypeCheckOutcome {
                    ok: out.status.success(),
                    output,
                })
            }
            Ok(Err(e)) => Err(WorkspaceError::CheckSpawn(e)),
            Err(_) => Ok(TypeCheckOutcome {
                ok: false,
                output: format!(
                    "type check timed out after {}s",
                    self.check_timeout.as_secs()
                ),
            }),
        }
    }

    fn list_files(&self, dir: &str) -> WsResult<Vec<String>> {
        let full = self.resolve(dir)?;
        let mut out = Vec::new();
        for entry in std::fs::read_dir(&full).map_err(|e| Self::io(dir, e))? {
            let entry = entry.map_err(|e| Self::io(dir, e))?;
            if entry.path().is_file() {
                let name = entry.file_name().to_string_lossy().into_owned();
                out.push(if dir.is_empty() {
                    name
                } else {
                    format!("{dir}/{name}")
                });
            }
        }
        out.sort();
        Ok(out)
    }

    fn file_exists(&self, path: &str) -> bool {
        self.resolve(path).map(|p| p.is_file()).unwrap_or(false)
    }

    fn clear_baselines(&self) {
        self.baselines.lock().clear();
    }
}
