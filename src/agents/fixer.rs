use super::{FIXER_NAME, LOGGED_RESPONSE_CHARS};
use crate::experiment::{ActionType, ExperimentLog, ExperimentRecord, Status};
use crate::files::{self, doc_companion, test_companion};
use crate::llm::models::FIXER_TEMPERATURE;
use crate::llm::prompts::{generate_docs_prompt, generate_tests_prompt};
use crate::llm::{strip_code_fences, LlmClient, LlmRequest, LlmResponse};
use crate::report::{AuditReport, FixResult, FixStatus, Issue};
use crate::sandbox::{SandboxError, SandboxGuard};
use crate::util::truncate;
use anyhow::{Context, Result};
use std::path::Path;
use std::sync::Arc;
use tracing::{info, warn};

/// Characters of the failing test output kept in retry records
const LOGGED_ERROR_CHARS: usize = 200;

/// Rewrites files from audit issues and generates companion tests and docs.
pub struct Fixer {
    llm: Arc<dyn LlmClient>,
    log: ExperimentLog,
    system_prompt: String,
}

/// A generated companion file and the exchange that produced it
struct Generated {
    prompt: String,
    content: String,
    response: LlmResponse,
}

/// A sandbox violation ends the pass; anything else only skips the file.
fn is_sandbox_violation(err: &anyhow::Error) -> bool {
    err.downcast_ref::<SandboxError>()
        .map(SandboxError::is_permission_denied)
        .unwrap_or(false)
}

/// Source as it should land on disk: fences removed, one trailing newline.
fn clean_source(response: &str) -> Option<String> {
    let code = strip_code_fences(response);
    if code.trim().is_empty() {
        return None;
    }
    Some(format!("{}\n", code.trim_end()))
}

/// Drop a fence wrapping the whole document; inner code blocks stay.
fn unwrap_document(response: &str) -> String {
    let trimmed = response.trim();
    if let Some(rest) = trimmed.strip_prefix("```") {
        if let (Some((_, body)), true) = (rest.split_once('\n'), trimmed.ends_with("```")) {
            let body = body.strip_suffix("```").unwrap_or(body);
            return format!("{}\n", body.trim_end());
        }
    }
    format!("{}\n", trimmed)
}

impl Fixer {
    pub fn new(llm: Arc<dyn LlmClient>, log: ExperimentLog, system_prompt: impl Into<String>) -> Self {
        Self {
            llm,
            log,
            system_prompt: system_prompt.into(),
        }
    }

    async fn ask(&self, prompt: &str) -> Result<LlmResponse> {
        let request = LlmRequest::new(&self.system_prompt, prompt).with_temperature(FIXER_TEMPERATURE);
        self.llm.complete(&request).await
    }

    fn record(&self, action: ActionType, status: Status) -> ExperimentRecord {
        ExperimentRecord::new(FIXER_NAME, self.llm.model(), action, status)
    }

    /// Apply the audit report, one prompt per file.
    ///
    /// Issues of a file are sent together. A file that cannot be read or
    /// written, or whose correction comes back empty, is skipped.
    pub async fn fix(&self, report: &AuditReport, sandbox: &SandboxGuard) -> Result<FixResult> {
        if report.issues.is_empty() {
            info!("no issues to fix");
            return Ok(FixResult::no_issues());
        }

        info!(issues = report.issues.len(), "fixing");
        let mut files_fixed = Vec::new();
        let mut total_fixes = 0;

        for (filename, issues) in report.issues_by_file() {
            match self.fix_file(filename, &issues, sandbox).await {
                Ok(true) => {
                    files_fixed.push(filename.to_string());
                    total_fixes += issues.len();
                }
                Ok(false) => {}
                Err(e) => {
                    self.log.log(
                        self.record(ActionType::Debug, Status::Failure)
                            .detail("file_analyzed", filename)
                            .detail("output_response", format!("Error: {:#}", e)),
                    );
                    return Err(e);
                }
            }
        }

        info!(files = files_fixed.len(), fixes = total_fixes, "fix pass complete");
        Ok(FixResult {
            files_fixed,
            total_fixes,
            status: FixStatus::Completed,
        })
    }

    /// `Ok(true)` when the file was rewritten.
    async fn fix_file(&self, filename: &str, issues: &[&Issue], sandbox: &SandboxGuard) -> Result<bool> {
        let path = Path::new(filename);
        let original = match files::read_file(sandbox, path) {
            Ok(content) => content,
            Err(e) if is_sandbox_violation(&e) => return Err(e),
            Err(e) => {
                warn!(file = %filename, "skipping unreadable file: {:#}", e);
                return Ok(false);
            }
        };

        let prompt = build_fix_prompt(filename, &original, issues);
        let response = self
            .ask(&prompt)
            .await
            .with_context(|| format!("LLM correction of {} failed", filename))?;

        let Some(fixed) = clean_source(&response.content) else {
            warn!(file = %filename, "model returned no code; file left unchanged");
            return Ok(false);
        };
        if fixed == original {
            info!(file = %filename, "correction identical to current content");
            return Ok(false);
        }

        match files::write_file(sandbox, path, &fixed) {
            Ok(()) => {}
            Err(e) if is_sandbox_violation(&e) => return Err(e),
            Err(e) => {
                warn!(file = %filename, "skipping unwritable file: {:#}", e);
                return Ok(false);
            }
        }

        info!(file = %filename, issues = issues.len(), "file corrected");
        self.log.log(
            self.record(ActionType::Fix, Status::Success)
                .detail("file_analyzed", filename)
                .detail("input_prompt", &prompt)
                .detail("output_response", truncate(&fixed, LOGGED_RESPONSE_CHARS))
                .response(&response)
                .detail("issues_found", issues.len())
                .detail(
                    "issues_types",
                    issues.iter().map(|i| i.issue_type.as_str()).collect::<Vec<_>>(),
                ),
        );
        Ok(true)
    }

    /// Write `test_<filename>` generated from the source. Returns the test code.
    pub async fn generate_tests(&self, filename: &str, sandbox: &SandboxGuard) -> Result<String> {
        let target = test_companion(filename);
        let result = async {
            let code = files::read_file(sandbox, Path::new(filename))?;
            let prompt = generate_tests_prompt(filename, &code);
            let response = self.ask(&prompt).await?;
            let tests = clean_source(&response.content)
                .with_context(|| format!("model returned no tests for {}", filename))?;
            files::write_file(sandbox, Path::new(&target), &tests)?;
            Ok::<_, anyhow::Error>(Generated {
                prompt,
                content: tests,
                response,
            })
        }
        .await;

        self.log_generation(filename, &target, "unit_tests", result)
    }

    /// Write `README_<stem>.md` for the source. Returns the Markdown.
    pub async fn generate_documentation(&self, filename: &str, sandbox: &SandboxGuard) -> Result<String> {
        let target = doc_companion(filename);
        let result = async {
            let code = files::read_file(sandbox, Path::new(filename))?;
            let prompt = generate_docs_prompt(filename, &code);
            let response = self.ask(&prompt).await?;
            if response.content.trim().is_empty() {
                anyhow::bail!("model returned no documentation for {}", filename);
            }
            let doc = unwrap_document(&response.content);
            files::write_file(sandbox, Path::new(&target), &doc)?;
            Ok::<_, anyhow::Error>(Generated {
                prompt,
                content: doc,
                response,
            })
        }
        .await;

        self.log_generation(filename, &target, "documentation", result)
    }

    fn log_generation(
        &self,
        source: &str,
        target: &str,
        content_type: &str,
        result: Result<Generated>,
    ) -> Result<String> {
        match result {
            Ok(Generated {
                prompt,
                content,
                response,
            }) => {
                info!(file = %target, "generated {}", content_type);
                self.log.log(
                    self.record(ActionType::Generation, Status::Success)
                        .detail("file_analyzed", target)
                        .detail("input_prompt", &prompt)
                        .detail("output_response", truncate(&content, LOGGED_RESPONSE_CHARS))
                        .response(&response)
                        .detail("source_file", source)
                        .detail("content_type", content_type),
                );
                Ok(content)
            }
            Err(e) => {
                warn!(file = %target, "{} generation failed: {:#}", content_type, e);
                self.log.log(
                    self.record(ActionType::Generation, Status::Failure)
                        .detail("file_analyzed", target)
                        .detail("input_prompt", format!("Generate {} for {}", content_type, source))
                        .detail("output_response", format!("Error: {:#}", e))
                        .detail("source_file", source)
                        .detail("content_type", content_type),
                );
                Err(e)
            }
        }
    }

    /// Re-correct one file with the failing test output in the prompt.
    /// Returns the content now on disk.
    pub async fn retry_fix(
        &self,
        filename: &str,
        sandbox: &SandboxGuard,
        error_message: &str,
    ) -> Result<String> {
        let path = Path::new(filename);
        let original = files::read_file(sandbox, path)?;
        let prompt = build_retry_prompt(filename, &original, error_message);
        let response = self
            .ask(&prompt)
            .await
            .with_context(|| format!("LLM retry of {} failed", filename))?;

        let Some(fixed) = clean_source(&response.content) else {
            anyhow::bail!("model returned no code for {}", filename);
        };
        if fixed != original {
            files::write_file(sandbox, path, &fixed)?;
        }

        info!(file = %filename, changed = fixed != original, "retry fix applied");
        self.log.log(
            self.record(ActionType::Fix, Status::Success)
                .detail("file_analyzed", filename)
                .detail("input_prompt", &prompt)
                .detail("output_response", truncate(&fixed, LOGGED_RESPONSE_CHARS))
                .response(&response)
                .detail("issues_found", 1)
                .detail("retry", true)
                .detail("error_message", truncate(error_message, LOGGED_ERROR_CHARS)),
        );
        Ok(fixed)
    }
}

fn build_fix_prompt(filename: &str, content: &str, issues: &[&Issue]) -> String {
    let listed = issues
        .iter()
        .map(|issue| {
            let line = issue
                .line
                .map(|l| l.to_string())
                .unwrap_or_else(|| "?".to_string());
            let mut entry = format!(
                "- line {} [{} / {}]: {}",
                line,
                issue.issue_type.as_str(),
                issue.severity.as_str(),
                issue.message
            );
            if let Some(rec) = &issue.recommendation {
                entry.push_str(&format!("\n  recommendation: {}", rec));
            }
            entry
        })
        .collect::<Vec<_>>()
        .join("\n");

    format!(
        r#"Fix the following issues in this Python file.

FILE: {filename}

ISSUES ({count}):
{listed}

CURRENT CODE:
```python
{content}
```

Return the complete corrected file."#,
        count = issues.len()
    )
}

fn build_retry_prompt(filename: &str, content: &str, error_message: &str) -> String {
    format!(
        r#"The previous version of this file failed its tests.

FILE: {filename}

TEST FAILURES:
{error_message}

CURRENT CODE:
```python
{content}
```

Find the cause of the failures and return the complete corrected file."#
    )
}
