//! refactor-swarm library crate
//!
//! An auditor, a fixer and a judge take turns on a Python codebase until its
//! tests pass or the iteration budget runs out. Every file access goes
//! through the [`sandbox::SandboxGuard`] of the target directory.

pub mod agents;
pub mod config;
pub mod experiment;
pub mod files;
pub mod llm;
pub mod report;
pub mod sandbox;
pub mod swarm;
pub mod tools;
pub mod util;
