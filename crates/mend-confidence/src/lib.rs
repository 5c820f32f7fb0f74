//! Confidence scoring for the auto-commit / pull-request gate.
//!
//! Four factors sum to 100, with a +5 verification bonus capped at 100:
//! knowledge-base match (0-40), test coverage (0-20), code complexity
//! (0-20), and historical success (0-20). A score at or above the
//! auto-commit threshold routes to a direct commit; everything else opens a
//! pull request for human review.

#![forbid(unsafe_code)]

use mend_proto::{FixAttempt, FixOutcome, KbEntry};
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Score at or above which a fix is committed without review.
pub const DEFAULT_AUTO_COMMIT_THRESHOLD: u8 = 95;

/// How many recent fix attempts feed the historical factor.
const HISTORY_WINDOW: usize = 10;

// ─── Report types ─────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Recommendation {
    AutoCommit,
    CreatePr,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ScoreFactors {
    /// 0-40.
    pub kb_match: u8,
    /// 0-20.
    pub test_coverage: u8,
    /// 0-20.
    pub complexity: u8,
    /// 0-20.
    pub historical: u8,
    /// 0 or 5.
    pub verification_bonus: u8,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfidenceReport {
    pub score: u8,
    pub factors: ScoreFactors,
    pub recommendation: Recommendation,
    pub reasoning: Vec<String>,
}

impl ConfidenceReport {
    /// Factor breakdown for PR bodies and audit notes.
    pub fn breakdown(&self) -> String {
        format!(
            "score {}/100 — kb match {}/40, test coverage {}/20, complexity {}/20, history {}/20, verification bonus {}",
            self.score,
            self.factors.kb_match,
            self.factors.test_coverage,
            self.factors.complexity,
            self.factors.historical,
            self.factors.verification_bonus,
        )
    }
}

/// A modified file presented to the scorer: its workspace path and source
/// text when readable.
#[derive(Debug, Clone)]
pub struct ModifiedFile {
    pub path: String,
    pub source: Option<String>,
}

// ─── Scorer ───────────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct ConfidenceScorer {
    pub auto_commit_threshold: u8,
}

impl Default for ConfidenceScorer {
    fn default() -> Self {
        Self {
            auto_commit_threshold: DEFAULT_AUTO_COMMIT_THRESHOLD,
        }
    }
}

impl ConfidenceScorer {
    pub fn with_threshold(auto_commit_threshold: u8) -> Self {
        Self {
            auto_commit_threshold,
        }
    }

    /// Score a proposed fix.
    ///
    /// `test_exists` probes for test siblings in the workspace; `history` is
    /// the chronological fix-attempt log (the most recent ten are
    /// considered).
    pub fn score(
        &self,
        kb_entry: Option<&KbEntry>,
        files: &[ModifiedFile],
        test_exists: &dyn Fn(&str) -> bool,
        history: &[FixAttempt],
        verification_passed: Option<bool>,
    ) -> ConfidenceReport {
        let mut reasoning = Vec::new();

        let kb_match = kb_factor(kb_entry, &mut reasoning);
        let test_coverage = coverage_factor(files, test_exists, &mut reasoning);
        let complexity = complexity_factor(files, &mut reasoning);
        let historical = history_factor(history, &mut reasoning);

        let verification_bonus = if verification_passed == Some(true) {
            reasoning.push("verification passed — bonus applied".to_string());
            5
        } else {
            0
        };

        let total = u32::from(kb_match)
            + u32::from(test_coverage)
            + u32::from(complexity)
            + u32::from(historical)
            + u32::from(verification_bonus);
        let score = total.min(100) as u8;

        let recommendation = if score >= self.auto_commit_threshold {
            Recommendation::AutoCommit
        } else {
            Recommendation::CreatePr
        };

        debug!(score, ?recommendation, "confidence scored");

        ConfidenceReport {
            score,
            factors: ScoreFactors {
                kb_match,
                test_coverage,
                complexity,
                historical,
                verification_bonus,
            },
            recommendation,
            reasoning,
        }
    }
}

// ─── Factors ──────────────────────────────────────────────────────────────────

fn kb_factor(entry: Option<&KbEntry>, reasoning: &mut Vec<String>) -> u8 {
    match entry {
        Some(e) => {
            let score = (40.0 * e.success_rate()).round() as u8;
            reasoning.push(format!(
                "knowledge base match: {}/{} prior fixes succeeded",
                e.times_fixed, e.times_encountered
            ));
            score
        }
        None => {
            reasoning.push("no knowledge base match — baseline applied".to_string());
            10
        }
    }
}

fn coverage_factor(
    files: &[ModifiedFile],
    test_exists: &dyn Fn(&str) -> bool,
    reasoning: &mut Vec<String>,
) -> u8 {
    if files.is_empty() {
        reasoning.push("no modified files — no test coverage evidence".to_string());
        return 0;
    }
    let covered = files
        .iter()
        .filter(|f| test_sibling_paths(&f.path).iter().any(|p| test_exists(p)))
        .count();
    reasoning.push(format!(
        "{covered}/{} modified files have test siblings",
        files.len()
    ));
    ((covered as f64 / files.len() as f64) * 20.0).round() as u8
}

/// Conventional test sibling locations for a source path, probing the
/// file's own extension: `{base}.test.*`, `{base}.spec.*`, and
/// `__tests__/{base}.test.*`.
pub fn test_sibling_paths(path: &str) -> Vec<String> {
    let (dir, file) = match path.rfind('/') {
        Some(i) => (&path[..i], &path[i + 1..]),
        None => ("", path),
    };
    let (stem, ext) = match file.rfind('.') {
        Some(i) => (&file[..i], &file[i + 1..]),
        None => (file, ""),
    };
    let join = |name: String| {
        if dir.is_empty() {
            name
        } else {
            format!("{dir}/{name}")
        }
    };
    let with_ext = |tag: &str| {
        if ext.is_empty() {
            format!("{stem}.{tag}")
        } else {
            format!("{stem}.{tag}.{ext}")
        }
    };
    vec![
        join(with_ext("test")),
        join(with_ext("spec")),
        join(format!("__tests__/{}", with_ext("test"))),
    ]
}

fn complexity_factor(files: &[ModifiedFile], reasoning: &mut Vec<String>) -> u8 {
    let sources: Vec<&str> = files
        .iter()
        .filter_map(|f| f.source.as_deref())
        .collect();
    if sources.is_empty() {
        reasoning.push("no readable sources — change treated as simple".to_string());
        return 20;
    }
    let avg = sources.iter().map(|s| file_complexity(s)).sum::<f64>() / sources.len() as f64;
    reasoning.push(format!("average complexity {avg:.1} across modified files"));
    complexity_to_score(avg)
}

/// Per-file heuristic: `lines/100 + functions + 2·classes + conditionals +
/// loops`, counted over language-neutral keywords.
pub fn file_complexity(source: &str) -> f64 {
    let lines = source.lines().count() as f64;
    let mut functions = 0u32;
    let mut classes = 0u32;
    let mut conditionals = 0u32;
    let mut loops = 0u32;

    for token in source.split(|c: char| !c.is_alphanumeric() && c != '_') {
        match token {
            "function" | "fn" | "def" => functions += 1,
            "class" | "struct" | "interface" => classes += 1,
            "if" | "switch" | "match" => conditionals += 1,
            "for" | "while" | "loop" => loops += 1,
            _ => {}
        }
    }

    lines / 100.0
        + f64::from(functions)
        + 2.0 * f64::from(classes)
        + f64::from(conditionals)
        + f64::from(loops)
}

/// Piecewise-linear mapping: `<10 → 20`, `10..30 → 20..10`, `>30 → 10..0`
/// with a floor of 0 (the tail decays at 0.25/unit, reaching 0 at 70).
fn complexity_to_score(avg: f64) -> u8 {
    if avg < 10.0 {
        20
    } else if avg <= 30.0 {
        (20.0 - (avg - 10.0) * 0.5).round() as u8
    } else {
        (10.0 - (avg - 30.0) * 0.25).max(0.0).round() as u8
    }
}

fn history_factor(history: &[FixAttempt], reasoning: &mut Vec<String>) -> u8 {
    let window: Vec<&FixAttempt> = history.iter().rev().take(HISTORY_WINDOW).collect();
    if window.is_empty() {
        reasoning.push("no fix history — baseline applied".to_string());
        return 10;
    }
    let successes = window
        .iter()
        .filter(|a| a.outcome == FixOutcome::Success)
        .count();
    reasoning.push(format!(
        "historical success {successes}/{} recent fix attempts",
        window.len()
    ));
    ((successes as f64 / window.len() as f64) * 20.0).round() as u8
}
