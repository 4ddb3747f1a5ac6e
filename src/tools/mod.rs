//! Wrappers around the external linter and test runner
//!
//! Both run as timed subprocesses and never fail outright: unreadable output
//! degrades to an "unavailable" lint report or to direct test execution.

pub mod lint;
pub mod test_runner;

#[cfg(test)]
pub(crate) mod fakes;

use std::time::Duration;

pub use lint::{Linter, Pylint};
pub use test_runner::{Pytest, TestHarness, TestRunReport};

pub const DEFAULT_TOOL_TIMEOUT: Duration = Duration::from_secs(300);
