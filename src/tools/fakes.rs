//! In-memory tool doubles for agent and swarm tests

use super::{Linter, TestHarness, TestRunReport};
use crate::report::{LintMessage, LintReport};
use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

/// Returns the same report for every file and remembers what it linted.
pub struct FixedLinter {
    report: LintReport,
    linted: Mutex<Vec<PathBuf>>,
}

impl FixedLinter {
    pub fn new(report: LintReport) -> Self {
        Self {
            report,
            linted: Mutex::new(Vec::new()),
        }
    }

    pub fn clean() -> Self {
        Self::new(LintReport {
            score: 10.0,
            issues: Vec::new(),
            available: true,
        })
    }

    pub fn with_messages(score: f64, count: usize) -> Self {
        let issues = (1..=count)
            .map(|n| LintMessage {
                line: Some(n as u32),
                column: Some(0),
                kind: "convention".to_string(),
                symbol: "missing-function-docstring".to_string(),
                message_id: "C0116".to_string(),
                message: format!("Missing function docstring #{}", n),
            })
            .collect();
        Self::new(LintReport {
            score,
            issues,
            available: true,
        })
    }

    pub fn linted(&self) -> Vec<PathBuf> {
        self.linted.lock().unwrap().clone()
    }
}

impl Linter for FixedLinter {
    fn lint(&self, file: &Path) -> LintReport {
        self.linted.lock().unwrap().push(file.to_path_buf());
        self.report.clone()
    }
}

/// Hands out queued reports; the last one repeats once the queue runs dry.
pub struct ScriptedHarness {
    reports: Mutex<VecDeque<TestRunReport>>,
    last: Mutex<TestRunReport>,
    runs: Mutex<usize>,
}

impl ScriptedHarness {
    pub fn new(reports: Vec<TestRunReport>) -> Self {
        let last = reports.last().cloned().unwrap_or_default();
        Self {
            reports: Mutex::new(reports.into()),
            last: Mutex::new(last),
            runs: Mutex::new(0),
        }
    }

    pub fn runs(&self) -> usize {
        *self.runs.lock().unwrap()
    }
}

impl TestHarness for ScriptedHarness {
    fn run(&self, _dir: &Path) -> TestRunReport {
        *self.runs.lock().unwrap() += 1;
        match self.reports.lock().unwrap().pop_front() {
            Some(report) => {
                *self.last.lock().unwrap() = report.clone();
                report
            }
            None => self.last.lock().unwrap().clone(),
        }
    }
}

pub fn passing(passed: usize) -> TestRunReport {
    TestRunReport {
        success: true,
        passed,
        ..Default::default()
    }
}

/// A failing run whose messages are attributed to the given files; an empty
/// file name leaves the message unattributed.
pub fn failing(errors: &[(&str, &str)]) -> TestRunReport {
    let mut report = TestRunReport {
        success: false,
        failed: errors.len(),
        ..Default::default()
    };
    for (file, message) in errors {
        report.errors.push(message.to_string());
        if file.is_empty() {
            continue;
        }
        report
            .failures_by_file
            .entry(file.to_string())
            .or_default()
            .push(message.to_string());
    }
    report
}
