use super::{run_blocking, JUDGE_NAME};
use crate::experiment::{ActionType, ExperimentLog, ExperimentRecord, Status};
use crate::files::{self, is_test_file};
use crate::llm::client::truncate_str;
use crate::llm::models::JUDGE_TEMPERATURE;
use crate::llm::{parse_json_response, LlmClient, LlmRequest, LlmResponse};
use crate::report::{QualityVerdict, TestResult};
use crate::sandbox::SandboxGuard;
use crate::tools::{Linter, TestHarness, TestRunReport};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{info, warn};

/// Failure messages sent to the model for analysis
const ANALYZED_ERRORS: usize = 5;
/// Failure messages kept in the experiment record
const LOGGED_ERRORS: usize = 3;
const FALLBACK_PREVIEW_CHARS: usize = 200;

const GENERIC_RECOMMENDATION: &str = "Fix the failing tests";
const UNSTRUCTURED: &str = "unstructured analysis";
const ANALYSIS_UNAVAILABLE: &str = "analysis unavailable";

/// Runs the test suite and explains failures.
pub struct Judge {
    llm: Arc<dyn LlmClient>,
    harness: Arc<dyn TestHarness>,
    linter: Arc<dyn Linter>,
    log: ExperimentLog,
    system_prompt: String,
}

#[derive(Debug, Clone, PartialEq)]
struct Analysis {
    recommendations: Vec<String>,
    root_causes: Vec<String>,
    severity: String,
}

/// Models use either list or single-string fields.
#[derive(Deserialize)]
struct RawAnalysis {
    #[serde(default)]
    recommendations: Option<Vec<String>>,
    #[serde(default)]
    recommendation: Option<String>,
    #[serde(default)]
    root_causes: Option<Vec<String>>,
    #[serde(default)]
    root_cause: Option<String>,
    #[serde(default)]
    severity: Option<String>,
}

impl Judge {
    pub fn new(
        llm: Arc<dyn LlmClient>,
        harness: Arc<dyn TestHarness>,
        linter: Arc<dyn Linter>,
        log: ExperimentLog,
        system_prompt: impl Into<String>,
    ) -> Self {
        Self {
            llm,
            harness,
            linter,
            log,
            system_prompt: system_prompt.into(),
        }
    }

    fn record(&self, action: ActionType, status: Status) -> ExperimentRecord {
        ExperimentRecord::new(JUDGE_NAME, self.llm.model(), action, status)
    }

    /// Run the tests. On failure the model is asked for root causes and
    /// recommendations; its problems never turn into an error here.
    pub async fn test(&self, sandbox: &SandboxGuard) -> TestResult {
        let dir = sandbox.root().to_path_buf();
        info!(dir = %dir.display(), "running tests");

        let harness = Arc::clone(&self.harness);
        let run_dir = dir.clone();
        let run = match run_blocking(move || harness.run(&run_dir)).await {
            Ok(run) => run,
            Err(e) => TestRunReport {
                errors: vec![e.to_string()],
                ..Default::default()
            },
        };
        let total = run.passed + run.failed;

        if run.success {
            info!(passed = run.passed, total, "all tests pass");
            self.log.log(
                self.record(ActionType::Analysis, Status::Success)
                    .detail("test_directory", dir.display().to_string())
                    .detail("output_response", format!("{} of {} tests passed", run.passed, total))
                    .detail("passed", run.passed)
                    .detail("failed", 0)
                    .detail("total", total),
            );
            return TestResult {
                success: true,
                passed: run.passed,
                failed: 0,
                failures_by_file: run.failures_by_file,
                ..Default::default()
            };
        }

        warn!(passed = run.passed, failed = run.failed, "tests failed");
        let prompt = build_analysis_prompt(&run.errors);
        let (analysis, reply) = self.analyze_failures(&prompt).await;

        let mut record = self
            .record(ActionType::Debug, Status::Failure)
            .detail("test_directory", dir.display().to_string())
            .detail("input_prompt", &prompt)
            .detail("passed", run.passed)
            .detail("failed", run.failed)
            .detail(
                "errors_sample",
                run.errors.iter().take(LOGGED_ERRORS).collect::<Vec<_>>(),
            );
        record = match &reply {
            Ok(response) => record
                .detail("output_response", &response.content)
                .response(response),
            Err(message) => record.detail("output_response", message),
        };
        self.log.log(record);

        TestResult {
            success: false,
            passed: run.passed,
            failed: run.failed,
            errors: run.errors,
            recommendations: analysis.recommendations,
            root_causes: analysis.root_causes,
            severity: Some(analysis.severity),
            failures_by_file: run.failures_by_file,
        }
    }

    /// The analysis plus the model reply, or the error text when the call failed.
    async fn analyze_failures(&self, prompt: &str) -> (Analysis, Result<LlmResponse, String>) {
        let request = LlmRequest::new(&self.system_prompt, prompt)
            .with_temperature(JUDGE_TEMPERATURE)
            .json();
        match self.llm.complete(&request).await {
            Ok(response) => {
                let analysis = parse_analysis(&response.content);
                (analysis, Ok(response))
            }
            Err(e) => {
                warn!("failure analysis unavailable: {:#}", e);
                (
                    Analysis {
                        recommendations: vec![GENERIC_RECOMMENDATION.to_string()],
                        root_causes: vec![ANALYSIS_UNAVAILABLE.to_string()],
                        severity: "unknown".to_string(),
                    },
                    Err(format!("Error: {:#}", e)),
                )
            }
        }
    }

    /// Average lint score of the non-test sources against `threshold`.
    /// Files the linter could not score are left out of the average.
    pub async fn validate_code_quality(&self, sandbox: &SandboxGuard, threshold: f64) -> QualityVerdict {
        let sources: Vec<String> = match files::list_source_files(sandbox.root()) {
            Ok(names) => names.into_iter().filter(|n| !is_test_file(n)).collect(),
            Err(e) => {
                warn!("cannot list sources for quality check: {:#}", e);
                Vec::new()
            }
        };

        let mut scores = BTreeMap::new();
        for name in sources {
            let path = sandbox.root().join(&name);
            let linter = Arc::clone(&self.linter);
            match run_blocking(move || linter.lint(&path)).await {
                Ok(report) if report.available => {
                    scores.insert(name, report.score);
                }
                Ok(_) => warn!(file = %name, "no lint score"),
                Err(e) => warn!(file = %name, "lint failed: {:#}", e),
            }
        }

        let average_score = if scores.is_empty() {
            0.0
        } else {
            scores.values().sum::<f64>() / scores.len() as f64
        };
        let verdict = QualityVerdict {
            average_score,
            threshold,
            passed: !scores.is_empty() && average_score >= threshold,
            scores,
        };

        info!(
            average = verdict.average_score,
            threshold,
            passed = verdict.passed,
            "quality check"
        );
        self.log.log(
            self.record(
                ActionType::Analysis,
                if verdict.passed { Status::Success } else { Status::Failure },
            )
            .detail("input_prompt", format!("Quality check of {}", sandbox.root().display()))
            .detail("average_score", verdict.average_score)
            .detail("threshold", threshold)
            .detail("scores", &verdict.scores),
        );
        verdict
    }
}

fn build_analysis_prompt(errors: &[String]) -> String {
    let listed = errors
        .iter()
        .take(ANALYZED_ERRORS)
        .enumerate()
        .map(|(i, e)| format!("ERROR {}:\n{}", i + 1, e))
        .collect::<Vec<_>>()
        .join("\n\n");

    format!(
        r#"Analyze these pytest failures.

NUMBER OF ERRORS: {count}

ERROR MESSAGES:
{listed}

Produce the JSON report with recommendations and root_causes."#,
        count = errors.len()
    )
}

fn parse_analysis(response: &str) -> Analysis {
    match parse_json_response::<RawAnalysis>(response) {
        Ok(raw) => {
            let recommendations = raw
                .recommendations
                .filter(|r| !r.is_empty())
                .or_else(|| raw.recommendation.map(|r| vec![r]))
                .unwrap_or_else(|| vec![GENERIC_RECOMMENDATION.to_string()]);
            let root_causes = raw
                .root_causes
                .filter(|r| !r.is_empty())
                .or_else(|| raw.root_cause.map(|r| vec![r]))
                .unwrap_or_else(|| vec!["unknown cause".to_string()]);
            Analysis {
                recommendations,
                root_causes,
                severity: raw.severity.unwrap_or_else(|| "medium".to_string()),
            }
        }
        Err(e) => {
            warn!("could not parse failure analysis: {}", e);
            let preview = truncate_str(response.trim(), FALLBACK_PREVIEW_CHARS);
            let recommendation = if preview.is_empty() {
                GENERIC_RECOMMENDATION.to_string()
            } else {
                preview.to_string()
            };
            Analysis {
                recommendations: vec![recommendation],
                root_causes: vec![UNSTRUCTURED.to_string()],
                severity: "unknown".to_string(),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::mock::ScriptedLlm;
    use crate::tools::fakes::{failing, passing, FixedLinter, ScriptedHarness};
    use std::fs;
    use tempfile::{tempdir, TempDir};

    fn sandbox(files: &[&str]) -> (TempDir, SandboxGuard) {
        let tmp = tempdir().unwrap();
        for name in files {
            fs::write(tmp.path().join(name), "x = 1\n").unwrap();
        }
        let guard = SandboxGuard::new(tmp.path()).unwrap();
        (tmp, guard)
    }

    fn judge(llm: Arc<ScriptedLlm>, harness: ScriptedHarness, log: ExperimentLog) -> Judge {
        Judge::new(
            llm,
            Arc::new(harness),
            Arc::new(FixedLinter::clean()),
            log,
            "judge",
        )
    }

    #[tokio::test]
    async fn test_passing_run_skips_the_model() {
        let (tmp, guard) = sandbox(&[]);
        let log = ExperimentLog::new(tmp.path().join("logs/log.json"));
        let llm = Arc::new(ScriptedLlm::new(Vec::<String>::new()));
        let result = judge(llm.clone(), ScriptedHarness::new(vec![passing(4)]), log.clone())
            .test(&guard)
            .await;

        assert!(result.success);
        assert_eq!(result.passed, 4);
        assert!(result.errors.is_empty());
        assert!(result.recommendations.is_empty());
        assert_eq!(llm.call_count(), 0);
        assert_eq!(log.read_all().unwrap()[0].action_type, ActionType::Analysis);
    }

    #[tokio::test]
    async fn test_failures_are_analyzed_with_at_most_five_errors() {
        let (tmp, guard) = sandbox(&[]);
        let log = ExperimentLog::new(tmp.path().join("logs/log.json"));
        let errors: Vec<String> = (1..=7).map(|n| format!("failure number {}", n)).collect();
        let pairs: Vec<(&str, &str)> = errors.iter().map(|e| ("calc.py", e.as_str())).collect();
        let llm = Arc::new(ScriptedLlm::new([
            r#"{"recommendations": ["Return an int"], "root_cause": "add returns str", "severity": "high"}"#,
        ]));

        let result = judge(llm.clone(), ScriptedHarness::new(vec![failing(&pairs)]), log.clone())
            .test(&guard)
            .await;

        assert!(!result.success);
        assert_eq!(result.failed, 7);
        assert_eq!(result.errors.len(), 7);
        assert_eq!(result.recommendations, vec!["Return an int"]);
        assert_eq!(result.root_causes, vec!["add returns str"]);
        assert_eq!(result.severity.as_deref(), Some("high"));
        assert_eq!(result.failures_by_file["calc.py"].len(), 7);

        let prompt = &llm.calls()[0].user;
        assert!(prompt.contains("NUMBER OF ERRORS: 7"));
        assert!(prompt.contains("failure number 5"));
        assert!(!prompt.contains("failure number 6"));

        let record = &log.read_all().unwrap()[0];
        assert_eq!(record.status, Status::Failure);
        assert_eq!(record.details["errors_sample"].as_array().unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_unparseable_analysis_falls_back_to_preview() {
        let (tmp, guard) = sandbox(&[]);
        let log = ExperimentLog::new(tmp.path().join("log.json"));
        let long_reply = "x".repeat(300);
        let llm = Arc::new(ScriptedLlm::new([long_reply]));
        let result = judge(llm, ScriptedHarness::new(vec![failing(&[("", "boom")])]), log)
            .test(&guard)
            .await;

        assert_eq!(result.recommendations, vec!["x".repeat(200)]);
        assert_eq!(result.root_causes, vec![UNSTRUCTURED]);
        assert_eq!(result.severity.as_deref(), Some("unknown"));
    }

    #[tokio::test]
    async fn test_model_failure_gives_generic_recommendations() {
        let (tmp, guard) = sandbox(&[]);
        let log = ExperimentLog::new(tmp.path().join("log.json"));
        let llm = Arc::new(ScriptedLlm::new(Vec::<String>::new()));
        llm.push_error("503");
        let result = judge(llm, ScriptedHarness::new(vec![failing(&[("", "boom")])]), log)
            .test(&guard)
            .await;

        assert!(!result.success);
        assert_eq!(result.errors, vec!["boom"]);
        assert_eq!(result.recommendations, vec![GENERIC_RECOMMENDATION]);
        assert_eq!(result.root_causes, vec![ANALYSIS_UNAVAILABLE]);
    }

    #[tokio::test]
    async fn test_quality_check_averages_non_test_sources() {
        let (tmp, guard) = sandbox(&["a.py", "b.py", "test_a.py"]);
        let log = ExperimentLog::new(tmp.path().join("logs/log.json"));
        let linter = Arc::new(FixedLinter::with_messages(8.0, 1));
        let judge = Judge::new(
            Arc::new(ScriptedLlm::new(Vec::<String>::new())),
            Arc::new(ScriptedHarness::new(Vec::new())),
            linter.clone(),
            log,
            "judge",
        );

        let verdict = judge.validate_code_quality(&guard, 7.0).await;
        assert_eq!(verdict.scores.len(), 2);
        assert_eq!(verdict.average_score, 8.0);
        assert!(verdict.passed);
        assert_eq!(linter.linted().len(), 2);

        let strict = judge.validate_code_quality(&guard, 9.0).await;
        assert!(!strict.passed);
    }
}
