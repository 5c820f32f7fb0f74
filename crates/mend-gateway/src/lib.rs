//! Commit gateway: applies file edits as a direct commit to the default
//! branch or as a branch-plus-pull-request.
//!
//! Two backends ship behind one trait. [`LocalGitGateway`] drives the git
//! CLI in a working tree and records pull requests as local JSON records
//! (development). [`RemoteGateway`] talks to a hosting API over HTTPS
//! (production). The control plane does not distinguish between them.

#![forbid(unsafe_code)]

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use thiserror::Error;
use tracing::{debug, info, warn};

// ─── Types ────────────────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("git {action} failed: {output}")]
    Git { action: &'static str, output: String },

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("remote rejected {action}: status {status}")]
    RemoteStatus { action: &'static str, status: u16 },
}

pub type GatewayResult<T> = Result<T, GatewayError>;

/// A file staged through the gateway: workspace-relative path plus content.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FilePayload {
    pub path: String,
    pub content: String,
}

/// Result of a direct commit. A missing hash means there was nothing to
/// commit, which is a valid success.
#[derive(Debug, Clone)]
pub struct CommitReceipt {
    pub commit_hash: Option<String>,
    pub url: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PrReceipt {
    pub pr_number: u64,
    pub pr_url: String,
}

#[async_trait]
pub trait CommitGateway: Send + Sync {
    async fn commit_to_main(
        &self,
        files: &[FilePayload],
        message: &str,
    ) -> GatewayResult<CommitReceipt>;

    async fn create_branch_from_default(&self, branch: &str) -> GatewayResult<()>;

    async fn push_branch(
        &self,
        branch: &str,
        files: &[FilePayload],
        message: &str,
    ) -> GatewayResult<()>;

    async fn open_or_update_pr(
        &self,
        branch: &str,
        title: &str,
        body: &str,
    ) -> GatewayResult<PrReceipt>;
}

// ─── Local git backend ────────────────────────────────────────────────────────

/// Development backend: drives the git CLI in `repo_root` and records PRs as
/// JSON files under `.mendops/prs/`.
pub struct LocalGitGateway {
    repo_root: PathBuf,
    pr_lock: Mutex<()>,
}

impl LocalGitGateway {
    pub fn new(repo_root: impl Into<PathBuf>) -> Self {
        Self {
            repo_root: repo_root.into(),
            pr_lock: Mutex::new(()),
        }
    }

    async fn git(&self, action: &'static str, args: &[&str]) -> GatewayResult<String> {
        let out = tokio::process::Command::new("git")
            .args(args)
            .current_dir(&self.repo_root)
            .output()
            .await?;
        let mut combined = String::from_utf8_lossy(&out.stdout).into_owned();
        combined.push_str(&String::from_utf8_lossy(&out.stderr));
        if out.status.success() {
            Ok(combined)
        } else {
            Err(GatewayError::Git {
                action,
                output: combined.trim().to_string(),
            })
        }
    }

    fn stage_files(&self, files: &[FilePayload]) -> GatewayResult<()> {
        for file in files {
            let full = self.repo_root.join(&file.path);
            if let Some(parent) = full.parent() {
                std::fs::create_dir_all(parent)?;
            }
            std::fs::write(&full, &file.content)?;
        }
        Ok(())
    }

    fn pr_record_path(&self, branch: &str) -> PathBuf {
        self.repo_root
            .join(".mendops")
            .join("prs")
            .join(format!("{branch}.json"))
    }

    /// Commit staged files; "nothing to commit" resolves to `Ok(None)`.
    async fn commit(&self, message: &str) -> GatewayResult<Option<String>> {
        self.git("add", &["add", "-A"]).await?;
        match self.git("commit", &["commit", "-m", message]).await {
            Ok(_) => {
                let hash = self.git("rev-parse", &["rev-parse", "HEAD"]).await?;
                Ok(Some(hash.trim().to_string()))
            }
            Err(GatewayError::Git { output, .. })
                if output.contains("nothing to commit")
                    || output.contains("nothing added to commit") =>
            {
                debug!("nothing to commit — treated as success");
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }
}

#[async_trait]
impl CommitGateway for LocalGitGateway {
    async fn commit_to_main(
        &self,
        files: &[FilePayload],
        message: &str,
    ) -> GatewayResult<CommitReceipt> {
        self.stage_files(files)?;
        let hash = self.commit(message).await?;
        if let Some(hash) = &hash {
            info!(commit = %hash, "committed to default branch");
        }
        Ok(CommitReceipt {
            commit_hash: hash,
            url: None,
        })
    }

    async fn create_branch_from_default(&self, branch: &str) -> GatewayResult<()> {
        self.git("branch", &["checkout", "-B", branch]).await?;
        info!(branch, "branch created from default");
        Ok(())
    }

    async fn push_branch(
        &self,
        branch: &str,
        files: &[FilePayload],
        message: &str,
    ) -> GatewayResult<()> {
        self.git("checkout", &["checkout", branch]).await?;
        self.stage_files(files)?;
        self.commit(message).await?;
        // Return the working tree to the branch we came from.
        if let Err(e) = self.git("checkout", &["checkout", "-"]).await {
            warn!(error = %e, "could not switch back after branch push");
        }
        info!(branch, files = files.len(), "branch pushed");
        Ok(())
    }

    async fn open_or_update_pr(
        &self,
        branch: &str,
        title: &str,
        body: &str,
    ) -> GatewayResult<PrReceipt> {
        let _guard = self.pr_lock.lock();
        let pr_dir = self.repo_root.join(".mendops").join("prs");
        std::fs::create_dir_all(&pr_dir)?;
        let record_path = self.pr_record_path(branch);

        // Reuse the number for an existing record (update), otherwise
        // allocate the next one.
        let pr_number = match std::fs::read_to_string(&record_path) {
            Ok(raw) => {
                let existing: PrRecord = serde_json::from_str(&raw)?;
                existing.pr_number
            }
            Err(_) => std::fs::read_dir(&pr_dir)?.count() as u64 + 1,
        };

        let pr_url = format!("file://{}", record_path.display());
        let record = PrRecord {
            pr_number,
            branch: branch.to_string(),
            title: title.to_string(),
            body: body.to_string(),
        };
        std::fs::write(&record_path, serde_json::to_string_pretty(&record)?)?;
        info!(branch, pr_number, "pull request recorded");

        Ok(PrReceipt { pr_number, pr_url })
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct PrRecord {
    pr_number: u64,
    branch: String,
    title: String,
    body: String,
}

// ─── Remote API backend ───────────────────────────────────────────────────────

/// Production backend: a hosting API speaking JSON over HTTPS.
pub struct RemoteGateway {
    base_url: String,
    repo: String,
    token: String,
    client: reqwest::Client,
}

#[derive(Debug, Serialize)]
struct RemoteCommitRequest<'a> {
    files: &'a [FilePayload],
    message: &'a str,
}

#[derive(Debug, Deserialize)]
struct RemoteCommitResponse {
    hash: String,
    url: Option<String>,
}

#[derive(Debug, Serialize)]
struct RemoteBranchRequest<'a> {
    name: &'a str,
}

#[derive(Debug, Serialize)]
struct RemotePrRequest<'a> {
    branch: &'a str,
    title: &'a str,
    body: &'a str,
}

#[derive(Debug, Deserialize)]
struct RemotePrResponse {
    number: u64,
    url: String,
}

impl RemoteGateway {
    pub fn new(
        base_url: impl Into<String>,
        repo: impl Into<String>,
        token: impl Into<String>,
    ) -> Self {
        Self {
            base_url: base_url.into(),
            repo: repo.into(),
            token: token.into(),
            client: reqwest::Client::new(),
        }
    }

    fn endpoint(&self, tail: &str) -> String {
        format!(
            "{}/repos/{}/{tail}",
            self.base_url.trim_end_matches('/'),
            self.repo
        )
    }

    fn check(action: &'static str, status: reqwest::StatusCode) -> GatewayResult<()> {
        if status.is_success() {
            Ok(())
        } else {
            Err(GatewayError::RemoteStatus {
                action,
                status: status.as_u16(),
            })
        }
    }
}

#[async_trait]
impl CommitGateway for RemoteGateway {
    async fn commit_to_main(
        &self,
        files: &[FilePayload],
        message: &str,
    ) -> GatewayResult<CommitReceipt> {
        let resp = self
            .client
            .post(self.endpoint("commits"))
            .bearer_auth(&self.token)
            .json(&RemoteCommitRequest { files, message })
            .send()
            .await?;
        // 204 from the remote means the tree was already up to date.
        if resp.status() == reqwest::StatusCode::NO_CONTENT {
            return Ok(CommitReceipt {
                commit_hash: None,
                url: None,
            });
        }
        Self::check("commit", resp.status())?;
        let body: RemoteCommitResponse = resp.json().await?;
        Ok(CommitReceipt {
            commit_hash: Some(body.hash),
            url: body.url,
        })
    }

    async fn create_branch_from_default(&self, branch: &str) -> GatewayResult<()> {
        let resp = self
            .client
            .post(self.endpoint("branches"))
            .bearer_auth(&self.token)
            .json(&RemoteBranchRequest { name: branch })
            .send()
            .await?;
        Self::check("branch", resp.status())
    }

    async fn push_branch(
        &self,
        branch: &str,
        files: &[FilePayload],
        message: &str,
    ) -> GatewayResult<()> {
        let resp = self
            .client
            .post(self.endpoint(&format!("branches/{branch}/files")))
            .bearer_auth(&self.token)
            .json(&RemoteCommitRequest { files, message })
            .send()
            .await?;
        Self::check("push", resp.status())
    }

    async fn open_or_update_pr(
        &self,
        branch: &str,
        title: &str,
        body: &str,
    ) -> GatewayResult<PrReceipt> {
        let resp = self
            .client
            .post(self.endpoint("pulls"))
            .bearer_auth(&self.token)
            .json(&RemotePrRequest {
                branch,
                title,
                body,
            })
            .send()
            .await?;
        Self::check("pull request", resp.status())?;
        let body: RemotePrResponse = resp.json().await?;
        Ok(PrReceipt {
            pr_number: body.number,
            pr_url: body.url,
        })
    }
}
