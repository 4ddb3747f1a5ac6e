//! The three LLM-backed roles of the pipeline
//!
//! Each agent owns its system prompt, a shared `LlmClient` and a handle to
//! the experiment log. Subprocess tools are synchronous and run on the
//! blocking pool.

mod auditor;
mod fixer;
mod judge;

pub use auditor::{recommendations_for, Auditor};
pub use fixer::Fixer;
pub use judge::Judge;

pub const AUDITOR_NAME: &str = "Auditor_Agent";
pub const FIXER_NAME: &str = "Fixer_Agent";
pub const JUDGE_NAME: &str = "Judge_Agent";

/// Characters of model output kept in experiment records
pub(crate) const LOGGED_RESPONSE_CHARS: usize = 500;

pub(crate) async fn run_blocking<T, F>(task: F) -> anyhow::Result<T>
where
    T: Send + 'static,
    F: FnOnce() -> T + Send + 'static,
{
    tokio::task::spawn_blocking(task)
        .await
        .map_err(|e| anyhow::anyhow!("tool task failed: {}", e))
}
