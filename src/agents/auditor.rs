use super::{run_blocking, AUDITOR_NAME};
use crate::experiment::{ActionType, ExperimentLog, ExperimentRecord, Status};
use crate::files;
use crate::llm::models::AUDITOR_TEMPERATURE;
use crate::llm::{parse_json_response, LlmClient, LlmRequest};
use crate::report::{AuditReport, Issue, IssueType, LintReport, Severity};
use crate::sandbox::SandboxGuard;
use crate::tools::Linter;
use anyhow::{Context, Result};
use serde::Deserialize;
use serde_json::Value;
use std::collections::BTreeSet;
use std::path::Path;
use std::sync::Arc;
use tracing::{error, info, warn};

/// Lint messages embedded in each analysis prompt
const LINT_SAMPLE: usize = 10;

const NO_FILES: &str = "no files to analyze";
const ALREADY_CLEAN: &str = "code already follows the audited conventions";
const GENERAL_QUALITY: &str = "Improve overall code quality";

/// Ordered issue type -> action table for audit recommendations
const RECOMMENDATIONS: &[(IssueType, &str)] = &[
    (IssueType::MissingDocstring, "Add docstrings to functions and classes"),
    (IssueType::SyntaxError, "Fix syntax errors"),
    (IssueType::NamingConvention, "Follow PEP 8 naming conventions"),
    (IssueType::ImportError, "Check the imports"),
    (IssueType::UnusedVariable, "Remove unused variables"),
];

/// Finds issues in every source file of the sandbox.
pub struct Auditor {
    llm: Arc<dyn LlmClient>,
    linter: Arc<dyn Linter>,
    log: ExperimentLog,
    system_prompt: String,
}

impl Auditor {
    pub fn new(
        llm: Arc<dyn LlmClient>,
        linter: Arc<dyn Linter>,
        log: ExperimentLog,
        system_prompt: impl Into<String>,
    ) -> Self {
        Self {
            llm,
            linter,
            log,
            system_prompt: system_prompt.into(),
        }
    }

    /// Audit the sandbox root. Any failure is logged and returned; a model
    /// response that cannot be decoded becomes a `parse_error` issue instead.
    pub async fn analyze(&self, sandbox: &SandboxGuard) -> Result<AuditReport> {
        info!(dir = %sandbox.root().display(), "auditing");
        match self.analyze_inner(sandbox).await {
            Ok(report) => {
                info!(
                    files = report.files_analyzed.len(),
                    issues = report.total_issues,
                    "audit complete"
                );
                Ok(report)
            }
            Err(e) => {
                error!("audit failed: {:#}", e);
                self.log.log(
                    ExperimentRecord::new(
                        AUDITOR_NAME,
                        self.llm.model(),
                        ActionType::Debug,
                        Status::Failure,
                    )
                    .detail(
                        "input_prompt",
                        format!("Audit of {}", sandbox.root().display()),
                    )
                    .detail("output_response", format!("Error: {:#}", e)),
                );
                Err(e)
            }
        }
    }

    async fn analyze_inner(&self, sandbox: &SandboxGuard) -> Result<AuditReport> {
        let sources = files::list_source_files(sandbox.root())?;
        if sources.is_empty() {
            warn!("no source files found");
            return Ok(AuditReport::new(Vec::new(), Vec::new(), vec![NO_FILES.to_string()]));
        }

        let mut issues = Vec::new();
        let mut analyzed = Vec::with_capacity(sources.len());
        for filename in &sources {
            let file_issues = self.analyze_file(sandbox, filename).await?;
            info!(file = %filename, issues = file_issues.len(), "file analyzed");
            issues.extend(file_issues);
            analyzed.push(filename.clone());
        }

        let recommendations = recommendations_for(&issues);
        Ok(AuditReport::new(analyzed, issues, recommendations))
    }

    async fn analyze_file(&self, sandbox: &SandboxGuard, filename: &str) -> Result<Vec<Issue>> {
        let content = files::read_file(sandbox, Path::new(filename))?;
        let path = sandbox.resolve(Path::new(filename))?;

        let linter = Arc::clone(&self.linter);
        let lint = run_blocking(move || linter.lint(&path)).await?;

        let prompt = build_analysis_prompt(filename, &content, &lint);
        let request = LlmRequest::new(&self.system_prompt, &prompt)
            .with_temperature(AUDITOR_TEMPERATURE)
            .json();
        let response = self
            .llm
            .complete(&request)
            .await
            .with_context(|| format!("LLM analysis of {} failed", filename))?;

        self.log.log(
            ExperimentRecord::new(
                AUDITOR_NAME,
                self.llm.model(),
                ActionType::Analysis,
                Status::Success,
            )
            .detail("file_analyzed", filename)
            .detail("pylint_score", lint.score)
            .detail("input_prompt", &prompt)
            .detail("output_response", &response.content)
            .response(&response),
        );

        Ok(parse_issues(&response.content, filename))
    }
}

fn build_analysis_prompt(filename: &str, content: &str, lint: &LintReport) -> String {
    let sample = if lint.issues.is_empty() {
        "(none)".to_string()
    } else {
        lint.issues
            .iter()
            .take(LINT_SAMPLE)
            .map(|m| format!("- {}", m))
            .collect::<Vec<_>>()
            .join("\n")
    };
    let score = if lint.available {
        format!("{:.2}/10", lint.score)
    } else {
        "unavailable".to_string()
    };

    format!(
        r#"Analyze this Python file and its pylint report.

FILE: {filename}
PYLINT SCORE: {score}

CODE:
```python
{content}
```

PYLINT MESSAGES (sample):
{sample}

Produce the JSON report of the most important problems."#
    )
}

#[derive(Deserialize)]
struct RawAudit {
    #[serde(default)]
    issues: Vec<RawIssue>,
}

#[derive(Deserialize)]
struct RawIssue {
    #[serde(default)]
    file: Option<String>,
    #[serde(default)]
    line: Option<Value>,
    #[serde(default)]
    severity: Option<String>,
    #[serde(rename = "type", default)]
    issue_type: Option<String>,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    recommendation: Option<String>,
}

impl RawIssue {
    fn into_issue(self, filename: &str) -> Issue {
        let file = match self.file {
            Some(file) if file == filename => file,
            Some(other) => {
                if !other.trim().is_empty() {
                    warn!(reported = %other, file = %filename, "issue names another file; reassigned");
                }
                filename.to_string()
            }
            None => filename.to_string(),
        };
        Issue {
            file,
            line: self.line.as_ref().and_then(line_number),
            severity: Severity::from_label(self.severity.as_deref().unwrap_or_default()),
            issue_type: IssueType::from_label(self.issue_type.as_deref().unwrap_or_default()),
            message: self.message.unwrap_or_default(),
            recommendation: self.recommendation.filter(|r| !r.trim().is_empty()),
        }
    }
}

/// Models send line numbers as numbers, numeric strings or null.
fn line_number(value: &Value) -> Option<u32> {
    match value {
        Value::Number(n) => n.as_u64().and_then(|n| u32::try_from(n).ok()),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// Issues from the model's audit of `filename`, or one `parse_error` issue.
fn parse_issues(response: &str, filename: &str) -> Vec<Issue> {
    match parse_json_response::<RawAudit>(response) {
        Ok(raw) => raw
            .issues
            .into_iter()
            .map(|issue| issue.into_issue(filename))
            .collect(),
        Err(e) => {
            warn!(file = %filename, "could not parse audit response: {}", e);
            vec![Issue::parse_error(filename)]
        }
    }
}

/// Fixed recommendations derived from the set of issue types.
pub fn recommendations_for(issues: &[Issue]) -> Vec<String> {
    if issues.is_empty() {
        return vec![ALREADY_CLEAN.to_string()];
    }
    let seen: BTreeSet<IssueType> = issues.iter().map(|i| i.issue_type).collect();
    let recommendations: Vec<String> = RECOMMENDATIONS
        .iter()
        .filter(|(issue_type, _)| seen.contains(issue_type))
        .map(|(_, action)| action.to_string())
        .collect();
    if recommendations.is_empty() {
        vec![GENERAL_QUALITY.to_string()]
    } else {
        recommendations
    }
}
