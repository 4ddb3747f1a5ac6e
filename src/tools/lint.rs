use crate::report::{LintMessage, LintReport};
use crate::util::{run_command_with_timeout, truncate};
use serde::Deserialize;
use std::path::Path;
use std::process::Command;
use std::time::Duration;
use tracing::{debug, warn};

use super::DEFAULT_TOOL_TIMEOUT;

/// Static analysis of a single source file.
pub trait Linter: Send + Sync {
    /// Never fails; tooling problems come back as [`LintReport::unavailable`].
    fn lint(&self, file: &Path) -> LintReport;
}

/// `pylint <file> --output-format=json2`
#[derive(Debug, Clone)]
pub struct Pylint {
    program: String,
    args: Vec<String>,
    timeout: Duration,
}

impl Default for Pylint {
    fn default() -> Self {
        Self {
            program: "pylint".to_string(),
            args: vec!["--output-format=json2".to_string()],
            timeout: DEFAULT_TOOL_TIMEOUT,
        }
    }
}

impl Pylint {
    pub fn new(program: impl Into<String>, args: Vec<String>, timeout: Duration) -> Self {
        Self {
            program: program.into(),
            args,
            timeout,
        }
    }
}

impl Linter for Pylint {
    fn lint(&self, file: &Path) -> LintReport {
        let mut command = Command::new(&self.program);
        command.arg(file).args(&self.args);
        if let Some(parent) = file.parent() {
            command.current_dir(parent);
        }

        let output = match run_command_with_timeout(&mut command, self.timeout) {
            Ok(output) => output,
            Err(e) => {
                warn!(program = %self.program, "linter unavailable: {}", e);
                return LintReport::unavailable();
            }
        };
        if output.timed_out {
            warn!(
                file = %file.display(),
                "linter timed out after {}s",
                self.timeout.as_secs()
            );
            return LintReport::unavailable();
        }

        let line_count = std::fs::read_to_string(file)
            .map(|content| content.lines().filter(|l| !l.trim().is_empty()).count())
            .unwrap_or(0);

        match parse_lint_output(&output.stdout, line_count) {
            Some(report) => {
                debug!(
                    file = %file.display(),
                    score = report.score,
                    messages = report.issues.len(),
                    "lint complete"
                );
                report
            }
            None => {
                warn!(
                    file = %file.display(),
                    "unreadable linter output: {}",
                    truncate(&output.combined_output(), 200)
                );
                LintReport::unavailable()
            }
        }
    }
}

#[derive(Deserialize)]
struct Json2Output {
    #[serde(default)]
    messages: Vec<RawMessage>,
    #[serde(default)]
    statistics: Option<Json2Statistics>,
}

#[derive(Deserialize)]
struct Json2Statistics {
    score: Option<f64>,
}

/// Message shape shared by `json2` (camelCase id) and legacy `json` (kebab-case id)
#[derive(Deserialize)]
struct RawMessage {
    #[serde(rename = "type", default)]
    kind: String,
    #[serde(default)]
    symbol: String,
    #[serde(default)]
    message: String,
    #[serde(rename = "messageId", alias = "message-id", default)]
    message_id: String,
    line: Option<u32>,
    column: Option<u32>,
}

impl From<RawMessage> for LintMessage {
    fn from(raw: RawMessage) -> Self {
        Self {
            line: raw.line,
            column: raw.column,
            kind: raw.kind,
            symbol: raw.symbol,
            message_id: raw.message_id,
            message: raw.message,
        }
    }
}

/// Parse pylint JSON output. `None` when it is neither format.
pub fn parse_lint_output(stdout: &str, line_count: usize) -> Option<LintReport> {
    let trimmed = stdout.trim();
    if trimmed.is_empty() {
        return None;
    }

    if trimmed.starts_with('{') {
        let parsed: Json2Output = serde_json::from_str(trimmed).ok()?;
        let issues: Vec<LintMessage> = parsed.messages.into_iter().map(Into::into).collect();
        let score = parsed
            .statistics
            .and_then(|s| s.score)
            .unwrap_or_else(|| estimate_score(&issues, line_count));
        return Some(LintReport {
            score: score.clamp(0.0, 10.0),
            issues,
            available: true,
        });
    }

    let raw: Vec<RawMessage> = serde_json::from_str(trimmed).ok()?;
    let issues: Vec<LintMessage> = raw.into_iter().map(Into::into).collect();
    Some(LintReport {
        score: estimate_score(&issues, line_count),
        issues,
        available: true,
    })
}

/// Pylint's default evaluation, with non-blank lines standing in for statements.
fn estimate_score(issues: &[LintMessage], line_count: usize) -> f64 {
    if issues.iter().any(|m| m.kind == "fatal") {
        return 0.0;
    }
    let weighted: f64 = issues
        .iter()
        .map(|m| match m.kind.as_str() {
            "error" => 5.0,
            "warning" | "refactor" | "convention" => 1.0,
            _ => 0.0,
        })
        .sum();
    let statements = line_count.max(1) as f64;
    (10.0 - (weighted / statements) * 10.0).clamp(0.0, 10.0)
}
