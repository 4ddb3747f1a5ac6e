//! Records passed between the pipeline stages
//!
//! Each stage produces one typed value; nothing here outlives a run except
//! what the experiment log serializes.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;

/// Issue severity as reported by the auditor
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Low,
    Medium,
    High,
}

impl Severity {
    /// Unknown labels fall back to `Medium`.
    pub fn from_label(label: &str) -> Self {
        match label.trim().to_ascii_lowercase().as_str() {
            "high" | "critical" | "error" => Severity::High,
            "low" | "info" | "minor" => Severity::Low,
            _ => Severity::Medium,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Low => "low",
            Severity::Medium => "medium",
            Severity::High => "high",
        }
    }
}

/// Issue categories the auditor is asked to use
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IssueType {
    Bug,
    SyntaxError,
    LogicError,
    MissingDocstring,
    Pep8Violation,
    SecurityIssue,
    Performance,
    ImportError,
    UnusedVariable,
    NamingConvention,
    /// Sentinel for a model response that could not be decoded
    ParseError,
    #[serde(other)]
    Other,
}

impl IssueType {
    pub fn from_label(label: &str) -> Self {
        match label.trim().to_ascii_lowercase().as_str() {
            "bug" => IssueType::Bug,
            "syntax_error" => IssueType::SyntaxError,
            "logic_error" => IssueType::LogicError,
            "missing_docstring" => IssueType::MissingDocstring,
            "pep8_violation" => IssueType::Pep8Violation,
            "security_issue" => IssueType::SecurityIssue,
            "performance" => IssueType::Performance,
            "import_error" => IssueType::ImportError,
            "unused_variable" => IssueType::UnusedVariable,
            "naming_convention" => IssueType::NamingConvention,
            "parse_error" => IssueType::ParseError,
            _ => IssueType::Other,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            IssueType::Bug => "bug",
            IssueType::SyntaxError => "syntax_error",
            IssueType::LogicError => "logic_error",
            IssueType::MissingDocstring => "missing_docstring",
            IssueType::Pep8Violation => "pep8_violation",
            IssueType::SecurityIssue => "security_issue",
            IssueType::Performance => "performance",
            IssueType::ImportError => "import_error",
            IssueType::UnusedVariable => "unused_variable",
            IssueType::NamingConvention => "naming_convention",
            IssueType::ParseError => "parse_error",
            IssueType::Other => "other",
        }
    }
}

/// A single problem found in one file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Issue {
    /// File name relative to the target directory
    pub file: String,
    pub line: Option<u32>,
    pub severity: Severity,
    #[serde(rename = "type")]
    pub issue_type: IssueType,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recommendation: Option<String>,
}

impl Issue {
    /// Placeholder issue recorded when the model's audit could not be decoded.
    pub fn parse_error(file: &str) -> Self {
        Self {
            file: file.to_string(),
            line: Some(0),
            severity: Severity::Medium,
            issue_type: IssueType::ParseError,
            message: "LLM analysis could not be parsed".to_string(),
            recommendation: None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AuditReport {
    pub files_analyzed: Vec<String>,
    pub total_issues: usize,
    pub issues: Vec<Issue>,
    pub recommendations: Vec<String>,
}

impl AuditReport {
    pub fn new(files_analyzed: Vec<String>, issues: Vec<Issue>, recommendations: Vec<String>) -> Self {
        Self {
            files_analyzed,
            total_issues: issues.len(),
            issues,
            recommendations,
        }
    }

    pub fn is_clean(&self) -> bool {
        self.total_issues == 0
    }

    /// Issues grouped by file; every issue of a file lands in the same group.
    pub fn issues_by_file(&self) -> BTreeMap<&str, Vec<&Issue>> {
        let mut grouped: BTreeMap<&str, Vec<&Issue>> = BTreeMap::new();
        for issue in &self.issues {
            grouped.entry(issue.file.as_str()).or_default().push(issue);
        }
        grouped
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FixStatus {
    NoIssues,
    Completed,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FixResult {
    pub files_fixed: Vec<String>,
    pub total_fixes: usize,
    pub status: FixStatus,
}

impl FixResult {
    pub fn no_issues() -> Self {
        Self {
            files_fixed: Vec::new(),
            total_fixes: 0,
            status: FixStatus::NoIssues,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TestResult {
    pub success: bool,
    pub passed: usize,
    pub failed: usize,
    pub errors: Vec<String>,
    pub recommendations: Vec<String>,
    #[serde(default)]
    pub root_causes: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub severity: Option<String>,
    /// Failure messages keyed by the file they implicate
    #[serde(default)]
    pub failures_by_file: BTreeMap<String, Vec<String>>,
}

/// One linter message
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LintMessage {
    pub line: Option<u32>,
    pub column: Option<u32>,
    /// convention, refactor, warning, error or fatal
    pub kind: String,
    pub symbol: String,
    pub message_id: String,
    pub message: String,
}

impl std::fmt::Display for LintMessage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.line {
            Some(line) => write!(f, "line {}: ", line)?,
            None => write!(f, "line ?: ")?,
        }
        write!(f, "[{}] {} ({})", self.message_id, self.message, self.symbol)
    }
}

/// Linter result for a single file; score on a 0..=10 scale
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LintReport {
    pub score: f64,
    pub issues: Vec<LintMessage>,
    /// False when the linter could not be run or its output was unreadable
    pub available: bool,
}

impl LintReport {
    pub fn unavailable() -> Self {
        Self {
            score: 0.0,
            issues: Vec::new(),
            available: false,
        }
    }
}

/// Per-iteration counters kept for the final report
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct IterationRecord {
    pub iteration: usize,
    pub issues_detected: usize,
    pub fixes_applied: usize,
    pub tests_passed: usize,
    pub tests_failed: usize,
}

/// Average lint score against a threshold; informational only
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QualityVerdict {
    pub average_score: f64,
    pub threshold: f64,
    pub passed: bool,
    pub scores: BTreeMap<String, f64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "reason", content = "detail", rename_all = "snake_case")]
pub enum StopReason {
    Success,
    IterationLimit,
    /// The target held no source files, so there was nothing to iterate on
    EmptyTarget,
    Error(String),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SwarmOutcome {
    pub success: bool,
    pub total_iterations: usize,
    pub max_iterations_reached: bool,
    pub stop_reason: StopReason,
    pub history: Vec<IterationRecord>,
    pub target_dir: PathBuf,
    pub model_used: String,
    pub tests_generated: Vec<String>,
    pub docs_generated: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub quality: Option<QualityVerdict>,
}
