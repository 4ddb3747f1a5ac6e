use crate::files::{self, is_source_file, is_test_file, source_for_test};
use crate::util::{run_command_with_timeout, tail};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::Path;
use std::process::Command;
use std::time::Duration;
use tracing::{debug, info, warn};

use super::DEFAULT_TOOL_TIMEOUT;

/// Report file written by pytest-json-report inside the target directory
pub const REPORT_FILE: &str = ".report.json";

const OUTPUT_TAIL_CHARS: usize = 1500;

/// Outcome of one test-suite run
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TestRunReport {
    pub success: bool,
    pub passed: usize,
    pub failed: usize,
    pub errors: Vec<String>,
    /// Failure messages keyed by test file and by the source file it covers
    pub failures_by_file: BTreeMap<String, Vec<String>>,
}

impl TestRunReport {
    fn failure(message: impl Into<String>) -> Self {
        Self {
            success: false,
            errors: vec![message.into()],
            ..Default::default()
        }
    }

    fn attribute(&mut self, file: &str, message: &str) {
        let messages = self.failures_by_file.entry(file.to_string()).or_default();
        if !messages.iter().any(|m| m == message) {
            messages.push(message.to_string());
        }
    }

    /// Attribute to a test file and, when it follows the `test_<name>` convention, its source.
    fn attribute_test_file(&mut self, test_file: &str, message: &str) {
        self.attribute(test_file, message);
        if let Some(source) = source_for_test(test_file) {
            self.attribute(&source, message);
        }
    }
}

/// Runs the test suite of a directory.
pub trait TestHarness: Send + Sync {
    /// Never fails; a broken toolchain is reported as an unsuccessful run.
    fn run(&self, dir: &Path) -> TestRunReport;
}

/// pytest with the json-report plugin, falling back to running each test file directly.
#[derive(Debug, Clone)]
pub struct Pytest {
    program: String,
    args: Vec<String>,
    interpreter: String,
    timeout: Duration,
}

impl Default for Pytest {
    fn default() -> Self {
        Self {
            program: "pytest".to_string(),
            args: vec!["--tb=short".to_string(), "-q".to_string()],
            interpreter: "python3".to_string(),
            timeout: DEFAULT_TOOL_TIMEOUT,
        }
    }
}

impl Pytest {
    pub fn new(
        program: impl Into<String>,
        args: Vec<String>,
        interpreter: impl Into<String>,
        timeout: Duration,
    ) -> Self {
        Self {
            program: program.into(),
            args,
            interpreter: interpreter.into(),
            timeout,
        }
    }

    fn run_pytest(&self, dir: &Path) -> Option<TestRunReport> {
        let report_path = dir.join(REPORT_FILE);
        let _ = std::fs::remove_file(&report_path);

        let mut command = Command::new(&self.program);
        command
            .arg(dir)
            .arg("--json-report")
            .arg(format!("--json-report-file={}", report_path.display()))
            .args(&self.args)
            .current_dir(dir);

        match run_command_with_timeout(&mut command, self.timeout) {
            Ok(output) if output.timed_out => {
                warn!("{} timed out after {}s", self.program, self.timeout.as_secs());
            }
            Ok(output) => {
                debug!(status = ?output.status, "{} finished", self.program);
            }
            Err(e) => {
                warn!(program = %self.program, "test runner unavailable: {}", e);
            }
        }

        let raw = std::fs::read_to_string(&report_path).ok()?;
        let _ = std::fs::remove_file(&report_path);
        match parse_report(&raw) {
            Some(report) => Some(report),
            None => {
                warn!("malformed {}; falling back to direct execution", REPORT_FILE);
                None
            }
        }
    }

    fn run_directly(&self, dir: &Path) -> TestRunReport {
        let test_files: Vec<String> = match files::list_source_files(dir) {
            Ok(names) => names.into_iter().filter(|n| is_test_file(n)).collect(),
            Err(e) => return TestRunReport::failure(format!("cannot list tests: {}", e)),
        };
        if test_files.is_empty() {
            return TestRunReport::failure("no test files found");
        }

        info!(files = test_files.len(), interpreter = %self.interpreter, "running test files directly");
        let mut report = TestRunReport::default();
        for test_file in &test_files {
            let mut command = Command::new(&self.interpreter);
            command.arg(test_file).current_dir(dir);

            let outcome = run_command_with_timeout(&mut command, self.timeout);
            let failure = match outcome {
                Ok(output) if output.success() => None,
                Ok(output) if output.timed_out => {
                    Some(format!("{}: timed out after {}s", test_file, self.timeout.as_secs()))
                }
                Ok(output) => Some(format!(
                    "{}: exited with {}\n{}",
                    test_file,
                    output
                        .status
                        .and_then(|s| s.code())
                        .map(|c| c.to_string())
                        .unwrap_or_else(|| "signal".to_string()),
                    tail(&output.combined_output(), OUTPUT_TAIL_CHARS)
                )),
                Err(e) => Some(format!("{}: {}", test_file, e)),
            };

            match failure {
                None => report.passed += 1,
                Some(message) => {
                    report.failed += 1;
                    report.attribute_test_file(test_file, &message);
                    report.errors.push(message);
                }
            }
        }
        report.success = report.failed == 0;
        report
    }
}

impl TestHarness for Pytest {
    fn run(&self, dir: &Path) -> TestRunReport {
        match self.run_pytest(dir) {
            Some(report) => report,
            None => self.run_directly(dir),
        }
    }
}

#[derive(Deserialize)]
struct JsonReport {
    #[serde(default)]
    summary: Summary,
    #[serde(default)]
    tests: Vec<TestEntry>,
    #[serde(default)]
    collectors: Vec<CollectorEntry>,
}

#[derive(Deserialize, Default)]
struct Summary {
    #[serde(default)]
    passed: usize,
    #[serde(default)]
    failed: usize,
    #[serde(default)]
    error: usize,
    #[serde(default)]
    total: usize,
}

#[derive(Deserialize)]
struct TestEntry {
    nodeid: String,
    outcome: String,
    #[serde(default)]
    setup: Option<Stage>,
    #[serde(default)]
    call: Option<Stage>,
}

#[derive(Deserialize)]
struct Stage {
    #[serde(default)]
    crash: Option<Crash>,
    #[serde(default)]
    longrepr: Option<String>,
}

#[derive(Deserialize)]
struct Crash {
    #[serde(default)]
    path: Option<String>,
    #[serde(default)]
    message: Option<String>,
}

#[derive(Deserialize)]
struct CollectorEntry {
    #[serde(default)]
    nodeid: String,
    outcome: String,
    #[serde(default)]
    longrepr: Option<String>,
}

/// Parse a pytest-json-report document. `None` when it is not one.
pub fn parse_report(raw: &str) -> Option<TestRunReport> {
    let parsed: JsonReport = serde_json::from_str(raw).ok()?;
    let mut report = TestRunReport {
        passed: parsed.summary.passed,
        failed: parsed.summary.failed + parsed.summary.error,
        ..Default::default()
    };

    for collector in parsed.collectors.iter().filter(|c| c.outcome == "failed") {
        let detail = collector
            .longrepr
            .as_deref()
            .map(|l| tail(l, OUTPUT_TAIL_CHARS))
            .unwrap_or_else(|| "collection failed".to_string());
        let message = format!("{}: {}", collector.nodeid, detail);
        if let Some(file) = node_file(&collector.nodeid) {
            report.attribute_test_file(file, &message);
        }
        report.errors.push(message);
    }

    for test in parsed
        .tests
        .iter()
        .filter(|t| t.outcome == "failed" || t.outcome == "error")
    {
        let stage = test.call.as_ref().or(test.setup.as_ref());
        let crash = stage.and_then(|s| s.crash.as_ref());
        let detail = crash
            .and_then(|c| c.message.clone())
            .or_else(|| stage.and_then(|s| s.longrepr.as_deref()).map(|l| tail(l, OUTPUT_TAIL_CHARS)))
            .unwrap_or_else(|| test.outcome.clone());
        let message = format!("{}: {}", test.nodeid, detail);

        if let Some(file) = node_file(&test.nodeid) {
            report.attribute_test_file(file, &message);
        }
        if let Some(crash_file) = crash
            .and_then(|c| c.path.as_deref())
            .and_then(|p| Path::new(p).file_name())
            .and_then(|n| n.to_str())
            .filter(|n| is_source_file(n) && !is_test_file(n))
        {
            report.attribute(crash_file, &message);
        }
        report.errors.push(message);
    }

    let collected = parsed.summary.total.max(parsed.tests.len());
    if collected == 0 && report.errors.is_empty() {
        return Some(TestRunReport::failure("no tests collected"));
    }
    report.failed = report.failed.max(
        parsed
            .tests
            .iter()
            .filter(|t| t.outcome == "failed" || t.outcome == "error")
            .count(),
    );
    report.success = report.failed == 0 && report.errors.is_empty() && collected > 0;
    Some(report)
}

/// `sub/test_calc.py::TestX::test_add` -> `test_calc.py`
fn node_file(nodeid: &str) -> Option<&str> {
    let path = nodeid.split("::").next()?;
    Path::new(path)
        .file_name()
        .and_then(|n| n.to_str())
        .filter(|n| !n.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    const FAILING_REPORT: &str = r#"{
        "exitcode": 1,
        "summary": {"passed": 1, "failed": 1, "total": 2, "collected": 2},
        "collectors": [{"nodeid": "", "outcome": "passed"}],
        "tests": [
            {"nodeid": "test_calc.py::test_add", "outcome": "passed", "call": {"outcome": "passed"}},
            {"nodeid": "test_calc.py::test_div", "outcome": "failed",
             "call": {"outcome": "failed",
                      "crash": {"path": "/work/sandbox/calc.py", "lineno": 4, "message": "ZeroDivisionError: division by zero"},
                      "longrepr": "long traceback"}}
        ]
    }"#;

    #[test]
    fn test_parse_report_counts_and_attributes_failures() {
        let report = parse_report(FAILING_REPORT).unwrap();
        assert!(!report.success);
        assert_eq!(report.passed, 1);
        assert_eq!(report.failed, 1);
        assert_eq!(
            report.errors,
            vec!["test_calc.py::test_div: ZeroDivisionError: division by zero"]
        );
        assert_eq!(
            report.failures_by_file.keys().collect::<Vec<_>>(),
            vec!["calc.py", "test_calc.py"]
        );
        assert_eq!(report.failures_by_file["calc.py"].len(), 1);
    }

    #[test]
    fn test_parse_report_all_passed() {
        let raw = r#"{"summary": {"passed": 3, "total": 3}, "tests": [
            {"nodeid": "test_a.py::test_1", "outcome": "passed"},
            {"nodeid": "test_a.py::test_2", "outcome": "passed"},
            {"nodeid": "test_b.py::test_3", "outcome": "passed"}]}"#;
        let report = parse_report(raw).unwrap();
        assert!(report.success);
        assert_eq!(report.passed, 3);
        assert!(report.failures_by_file.is_empty());
    }

    #[test]
    fn test_parse_report_zero_tests_is_failure() {
        let report = parse_report(r#"{"summary": {"total": 0}, "tests": []}"#).unwrap();
        assert!(!report.success);
        assert_eq!(report.errors, vec!["no tests collected"]);
    }

    #[test]
    fn test_parse_report_collection_error() {
        let raw = r#"{"summary": {"error": 1, "total": 0}, "tests": [],
            "collectors": [{"nodeid": "test_calc.py", "outcome": "failed",
                            "longrepr": "E   SyntaxError: invalid syntax (calc.py, line 1)"}]}"#;
        let report = parse_report(raw).unwrap();
        assert!(!report.success);
        assert_eq!(report.failed, 1);
        assert!(report.errors[0].contains("SyntaxError"));
        assert!(report.failures_by_file.contains_key("calc.py"));
    }

    #[test]
    fn test_parse_report_rejects_non_report() {
        assert!(parse_report("not json").is_none());
        assert!(parse_report("[1, 2]").is_none());
    }

    #[test]
    fn test_node_file() {
        assert_eq!(node_file("pkg/test_x.py::TestY::test_z"), Some("test_x.py"));
        assert_eq!(node_file("test_x.py"), Some("test_x.py"));
        assert_eq!(node_file(""), None);
    }

    fn fallback_harness(interpreter: &str) -> Pytest {
        Pytest::new(
            "definitely-not-a-real-pytest-binary",
            Vec::new(),
            interpreter,
            Duration::from_secs(10),
        )
    }

    #[test]
    fn test_fallback_without_test_files_fails() {
        let tmp = tempdir().unwrap();
        fs::write(tmp.path().join("calc.py"), "x = 1\n").unwrap();
        let report = fallback_harness("sh").run(tmp.path());
        assert!(!report.success);
        assert_eq!(report.errors, vec!["no test files found"]);
    }

    #[cfg(unix)]
    #[test]
    fn test_fallback_runs_each_test_file() {
        let tmp = tempdir().unwrap();
        fs::write(tmp.path().join("test_good.py"), "exit 0\n").unwrap();
        fs::write(tmp.path().join("test_bad.py"), "echo broken >&2\nexit 3\n").unwrap();

        let report = fallback_harness("sh").run(tmp.path());
        assert!(!report.success);
        assert_eq!(report.passed, 1);
        assert_eq!(report.failed, 1);
        assert!(report.errors[0].starts_with("test_bad.py: exited with 3"));
        assert!(report.errors[0].contains("broken"));
        assert!(report.failures_by_file.contains_key("bad.py"));
        assert!(report.failures_by_file.contains_key("test_bad.py"));
    }

    #[cfg(unix)]
    #[test]
    fn test_fallback_all_pass() {
        let tmp = tempdir().unwrap();
        fs::write(tmp.path().join("test_ok.py"), "exit 0\n").unwrap();
        let report = fallback_harness("sh").run(tmp.path());
        assert!(report.success);
        assert_eq!(report.passed, 1);
    }
}
