//! Pre-commit verification.
//!
//! Two checks run in order: every modified path must resolve to a regular
//! file, then the workspace's configured static check must pass within its
//! timeout. Any failure makes the whole report fail, which obliges the
//! caller to roll back before leaving the verify phase.

#![forbid(unsafe_code)]

use mend_proto::{VerificationCheck, VerificationReport};
use mend_workspace::Workspace;
use tracing::{info, warn};

/// Cap on captured check output carried in the report.
pub const ERROR_DETAILS_CAP: usize = 4096;

/// Verify a set of modified workspace paths.
pub async fn verify(workspace: &dyn Workspace, files: &[String]) -> VerificationReport {
    let mut checks = Vec::new();

    let missing: Vec<&String> = files.iter().filter(|f| !workspace.file_exists(f)).collect();
    let existence_ok = missing.is_empty();
    checks.push(VerificationCheck {
        name: "file_existence".to_string(),
        passed: existence_ok,
        detail: if existence_ok {
            Some(format!("{} files present", files.len()))
        } else {
            Some(format!(
                "missing: {}",
                missing
                    .iter()
                    .map(|s| s.as_str())
                    .collect::<Vec<_>>()
                    .join(", ")
            ))
        },
    });

    if !existence_ok {
        warn!(missing = missing.len(), "verification failed at existence check");
        return VerificationReport {
            passed: false,
            checks,
            error_details: Some(truncate(&format!(
                "modified paths missing from workspace: {}",
                missing
                    .iter()
                    .map(|s| s.as_str())
                    .collect::<Vec<_>>()
                    .join(", ")
            ))),
        };
    }

    match workspace.type_check().await {
        Ok(outcome) => {
            checks.push(VerificationCheck {
                name: "type_check".to_string(),
                passed: outcome.ok,
                detail: None,
            });
            if outcome.ok {
                info!(files = files.len(), "verification passed");
                VerificationReport {
                    passed: true,
                    checks,
                    error_details: None,
                }
            } else {
                warn!("verification failed at type check");
                VerificationReport {
                    passed: false,
                    checks,
                    error_details: Some(truncate(&outcome.output)),
                }
            }
        }
        Err(e) => {
            warn!(error = %e, "type check could not run");
            checks.push(VerificationCheck {
                name: "type_check".to_string(),
                passed: false,
                detail: Some("check did not run".to_string()),
            });
            VerificationReport {
                passed: false,
                checks,
                error_details: Some(truncate(&e.to_string())),
            }
        }
    }
}

fn truncate(s: &str) -> String {
    if s.len() <= ERROR_DETAILS_CAP {
        return s.to_string();
    }
    let mut end = ERROR_DETAILS_CAP;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}… [truncated]", &s[..end])
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use mend_workspace::{TypeCheckOutcome, WsResult};
    use parking_lot::Mutex;
    use std::collections::HashSet;

    /// Programmable workspace stand-in for verification tests.
    struct StubWorkspace {
        files: HashSet<String>,
        check_ok: bool,
        check_output: String,
        checks_run: Mutex<u32>,
    }

    impl StubWorkspace {
        fn new(files: &[&str], check_ok: bool, check_output: &str) -> Self {
            Self {
                files: files.iter().map(|s| s.to_string()).collect(),
                check_ok,
                check_output: check_output.to_string(),
                checks_run: Mutex::new(0),
            }
        }
    }

    #[async_trait]
    impl Workspace for StubWorkspace {
        fn read_file(&self, _path: &str) -> WsResult<Vec<u8>> {
            Ok(Vec::new())
        }
        fn write_file(&self, _path: &str, _bytes: &[u8]) -> WsResult<()> {
            Ok(())
        }
        fn revert_file(&self, _path: &str) -> WsResult<()> {
            Ok(())
        }
        async fn type_check(&self) -> WsResult<TypeCheckOutcome> {
            *self.checks_run.lock() += 1;
            Ok(TypeCheckOutcome {
                ok: self.check_ok,
                output: self.check_output.clone(),
            })
        }
        fn list_files(&self, _dir: &str) -> WsResult<Vec<String>> {
            Ok(Vec::new())
        }
        fn file_exists(&self, path: &str) -> bool {
            self.files.contains(path)
        }
        fn clear_baselines(&self) {}
    }

    #[tokio::test]
    async fn test_verify_passes() {
        let ws = StubWorkspace::new(&["src/a.ts", "src/b.ts"], true, "");
        let report = verify(&ws, &["src/a.ts".to_string(), "src/b.ts".to_string()]).await;
        assert!(report.passed);
        assert_eq!(report.checks.len(), 2);
        assert!(report.error_details.is_none());
    }

    #[tokio::test]
    async fn test_missing_file_fails_before_type_check() {
        let ws = StubWorkspace::new(&["src/a.ts"], true, "");
        let report = verify(&ws, &["src/a.ts".to_string(), "src/gone.ts".to_string()]).await;
        assert!(!report.passed);
        assert_eq!(*ws.checks_run.lock(), 0, "type check must not run");
        assert!(
            report
                .error_details
                .as_deref()
                .unwrap()
                .contains("src/gone.ts")
        );
    }

    #[tokio::test]
    async fn test_type_check_failure_captures_output() {
        let ws = StubWorkspace::new(&["src/a.ts"], false, "error TS2339: nope");
        let report = verify(&ws, &["src/a.ts".to_string()]).await;
        assert!(!report.passed);
        assert_eq!(
            report.error_details.as_deref(),
            Some("error TS2339: nope")
        );
        let tc = report.checks.iter().find(|c| c.name == "type_check").unwrap();
        assert!(!tc.passed);
    }

    #[tokio::test]
    async fn test_error_details_truncated() {
        let big = "x".repeat(ERROR_DETAILS_CAP * 2);
        let ws = StubWorkspace::new(&["src/a.ts"], false, &big);
        let report = verify(&ws, &["src/a.ts".to_string()]).await;
        let details = report.error_details.unwrap();
        assert!(details.len() < big.len());
        assert!(details.ends_with("[truncated]"));
    }

    #[tokio::test]
    async fn test_empty_file_set_passes_existence() {
        let ws = StubWorkspace::new(&[], true, "");
        let report = verify(&ws, &[]).await;
        assert!(report.passed);
    }
}
