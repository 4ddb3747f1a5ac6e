//! Swarm controller
//!
//! Drives audit -> fix -> test for at most `max_iterations` rounds. A round
//! ends the run when the tests pass, when the target holds no source files,
//! or when any stage returns an error.

use crate::agents::{Auditor, Fixer, Judge};
use crate::experiment::{ActionType, ExperimentLog, ExperimentRecord, Status};
use crate::files::{self, doc_companion, test_companion};
use crate::llm::{LlmClient, Prompts};
use crate::report::{FixResult, IterationRecord, StopReason, SwarmOutcome, TestResult};
use crate::sandbox::SandboxGuard;
use crate::tools::{Linter, TestHarness};
use anyhow::Result;
use regex::Regex;
use std::collections::BTreeSet;
use std::path::Path;
use std::sync::Arc;
use tracing::{error, info, warn};


pub const CONTROLLER_NAME: &str = "Swarm_Controller";

/// Error lines passed to each targeted retry
const RETRY_ERRORS_PER_FILE: usize = 3;

#[derive(Debug, Clone, PartialEq)]
pub struct SwarmOptions {
    pub max_iterations: usize,
    /// Generate missing `test_<name>.py` files during the first iteration
    pub generate_tests: bool,
    /// Generate missing `README_<name>.md` files after a successful run
    pub generate_docs: bool,
    pub quality_threshold: Option<f64>,
}

impl Default for SwarmOptions {
    fn default() -> Self {
        Self {
            max_iterations: crate::config::DEFAULT_MAX_ITERATIONS,
            generate_tests: false,
            generate_docs: false,
            quality_threshold: None,
        }
    }
}

pub struct Swarm {
    auditor: Auditor,
    fixer: Fixer,
    judge: Judge,
    log: ExperimentLog,
    model: String,
    options: SwarmOptions,
}

/// What one completed iteration decided
struct IterationOutcome {
    record: IterationRecord,
    stop: Option<StopReason>,
}

impl Swarm {
    pub fn new(
        llm: Arc<dyn LlmClient>,
        linter: Arc<dyn Linter>,
        harness: Arc<dyn TestHarness>,
        prompts: &Prompts,
        log: ExperimentLog,
        options: SwarmOptions,
    ) -> Self {
        let model = llm.model().to_string();
        Self {
            auditor: Auditor::new(
                Arc::clone(&llm),
                Arc::clone(&linter),
                log.clone(),
                prompts.auditor.clone(),
            ),
            fixer: Fixer::new(Arc::clone(&llm), log.clone(), prompts.fixer.clone()),
            judge: Judge::new(llm, harness, linter, log.clone(), prompts.judge.clone()),
            log,
            model,
            options,
        }
    }

    /// Run the loop on `target_dir`. Only setup problems (a missing
    /// directory) are returned as errors; iteration failures end the loop
    /// and are reported through [`StopReason::Error`].
    pub async fn run(&self, target_dir: &Path) -> Result<SwarmOutcome> {
        let sandbox = SandboxGuard::new(target_dir)?;
        let max_iterations = self.options.max_iterations.max(1);
        info!(
            dir = %sandbox.root().display(),
            model = %self.model,
            max_iterations,
            "starting swarm"
        );

        let mut history = Vec::new();
        let mut tests_generated = Vec::new();
        let mut iteration = 0;
        let mut stop_reason = StopReason::IterationLimit;

        while iteration < max_iterations {
            iteration += 1;
            info!("iteration {}/{}", iteration, max_iterations);

            match self
                .run_iteration(iteration, max_iterations, &sandbox, &mut tests_generated)
                .await
            {
                Ok(outcome) => {
                    history.push(outcome.record);
                    if let Some(stop) = outcome.stop {
                        stop_reason = stop;
                        break;
                    }
                }
                Err(e) => {
                    error!("iteration {} failed: {:#}", iteration, e);
                    self.log.log(
                        ExperimentRecord::new(
                            CONTROLLER_NAME,
                            &self.model,
                            ActionType::Debug,
                            Status::Failure,
                        )
                        .detail("file_analyzed", format!("iteration_{}", iteration))
                        .detail(
                            "input_prompt",
                            format!(
                                "Iteration {} on {}",
                                iteration,
                                sandbox.root().display()
                            ),
                        )
                        .detail("output_response", format!("Error: {:#}", e))
                        .detail("iteration", iteration),
                    );
                    stop_reason = StopReason::Error(format!("{:#}", e));
                    break;
                }
            }
        }

        let success = stop_reason == StopReason::Success;
        let mut docs_generated = Vec::new();
        if success && self.options.generate_docs {
            docs_generated = self.generate_missing_docs(&sandbox).await;
        }

        let quality = match self.options.quality_threshold {
            Some(threshold) => Some(self.judge.validate_code_quality(&sandbox, threshold).await),
            None => None,
        };

        if success {
            info!(iterations = iteration, "all tests pass");
        } else {
            warn!(iterations = iteration, reason = ?stop_reason, "swarm stopped without passing tests");
        }

        Ok(SwarmOutcome {
            success,
            total_iterations: iteration,
            max_iterations_reached: stop_reason == StopReason::IterationLimit,
            stop_reason,
            history,
            target_dir: sandbox.root().to_path_buf(),
            model_used: self.model.clone(),
            tests_generated,
            docs_generated,
            quality,
        })
    }

    async fn run_iteration(
        &self,
        iteration: usize,
        max_iterations: usize,
        sandbox: &SandboxGuard,
        tests_generated: &mut Vec<String>,
    ) -> Result<IterationOutcome> {
        let audit = self.auditor.analyze(sandbox).await?;
        for recommendation in audit.recommendations.iter().take(3) {
            info!("audit: {}", recommendation);
        }

        let fix = if audit.is_clean() {
            info!("no issues; going straight to tests");
            FixResult::no_issues()
        } else {
            self.fixer.fix(&audit, sandbox).await?
        };

        if self.options.generate_tests && iteration == 1 {
            tests_generated.extend(self.generate_missing_tests(sandbox).await?);
        }

        let test = self.judge.test(sandbox).await;
        let record = IterationRecord {
            iteration,
            issues_detected: audit.total_issues,
            fixes_applied: fix.total_fixes,
            tests_passed: test.passed,
            tests_failed: test.failed,
        };

        if test.success {
            return Ok(IterationOutcome {
                record,
                stop: Some(StopReason::Success),
            });
        }
        for recommendation in test.recommendations.iter().take(5) {
            info!("judge: {}", recommendation);
        }
        if audit.files_analyzed.is_empty() {
            warn!("target holds no source files; stopping");
            return Ok(IterationOutcome {
                record,
                stop: Some(StopReason::EmptyTarget),
            });
        }

        if iteration < max_iterations {
            self.retry_failing_files(sandbox, &test).await?;
        }
        Ok(IterationOutcome { record, stop: None })
    }

    async fn generate_missing_tests(&self, sandbox: &SandboxGuard) -> Result<Vec<String>> {
        let mut generated = Vec::new();
        for source in files::generation_candidates(sandbox.root())? {
            let test_file = test_companion(&source);
            if sandbox.root().join(&test_file).exists() {
                continue;
            }
            match self.fixer.generate_tests(&source, sandbox).await {
                Ok(_) => generated.push(test_file),
                Err(e) => warn!(file = %source, "test generation skipped: {:#}", e),
            }
        }
        if !generated.is_empty() {
            info!(count = generated.len(), "generated test files");
        }
        Ok(generated)
    }

    async fn generate_missing_docs(&self, sandbox: &SandboxGuard) -> Vec<String> {
        let candidates = match files::generation_candidates(sandbox.root()) {
            Ok(candidates) => candidates,
            Err(e) => {
                warn!("cannot list sources for documentation: {:#}", e);
                return Vec::new();
            }
        };

        let mut generated = Vec::new();
        for source in candidates {
            let doc_file = doc_companion(&source);
            if sandbox.root().join(&doc_file).exists() {
                continue;
            }
            match self.fixer.generate_documentation(&source, sandbox).await {
                Ok(_) => generated.push(doc_file),
                Err(e) => warn!(file = %source, "documentation skipped: {:#}", e),
            }
        }
        generated
    }

    /// Re-correct each source file the failures point at. A failed retry is
    /// skipped, except for a sandbox violation.
    async fn retry_failing_files(&self, sandbox: &SandboxGuard, test: &TestResult) -> Result<()> {
        let sources: Vec<String> = files::list_source_files(sandbox.root())?
            .into_iter()
            .filter(|name| !files::is_test_file(name))
            .collect();
        let targets = implicated_files(test, &sources);
        if targets.is_empty() {
            info!("no source file named in the failures; nothing to retry");
            return Ok(());
        }

        for filename in &targets {
            let errors = errors_for_file(test, filename);
            let message = errors.join("\n");
            info!(file = %filename, "retrying with test feedback");
            if let Err(e) = self.fixer.retry_fix(filename, sandbox, &message).await {
                if e.downcast_ref::<crate::sandbox::SandboxError>()
                    .map(|s| s.is_permission_denied())
                    .unwrap_or(false)
                {
                    return Err(e);
                }
                warn!(file = %filename, "retry skipped: {:#}", e);
            }
        }
        Ok(())
    }
}

/// Matches `name` only where it is not part of a longer file name.
fn file_mention(name: &str) -> Option<Regex> {
    Regex::new(&format!(r"(?:^|[^\w.]){}(?:$|[^\w])", regex::escape(name))).ok()
}

/// Source files implicated by a failed run: those the test runner attributed
/// failures to, plus those named in the error text.
pub fn implicated_files(test: &TestResult, sources: &[String]) -> BTreeSet<String> {
    let mut implicated = BTreeSet::new();
    for source in sources {
        if test.failures_by_file.contains_key(source) {
            implicated.insert(source.clone());
            continue;
        }
        if let Some(pattern) = file_mention(source) {
            if test.errors.iter().any(|e| pattern.is_match(e)) {
                implicated.insert(source.clone());
            }
        }
    }
    implicated
}

/// Up to three distinct error lines for `filename`, attributed ones first.
pub fn errors_for_file(test: &TestResult, filename: &str) -> Vec<String> {
    let mut errors: Vec<String> = Vec::new();
    let attributed = test
        .failures_by_file
        .get(filename)
        .into_iter()
        .flatten();
    let pattern = file_mention(filename);
    let mentioned = test
        .errors
        .iter()
        .filter(|e| pattern.as_ref().map(|p| p.is_match(e)).unwrap_or(false));

    for error in attributed.chain(mentioned) {
        if errors.len() == RETRY_ERRORS_PER_FILE {
            break;
        }
        if !errors.contains(error) {
            errors.push(error.clone());
        }
    }
    errors
}
