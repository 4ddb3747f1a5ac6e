//! Experiment log
//!
//! An append-only JSON array of agent actions kept for offline inspection.
//! Each append re-reads the array under an exclusive lock and replaces the
//! file atomically, so concurrent runs sharing a log never interleave.

use crate::llm::LlmResponse;
use anyhow::Context;
use chrono::{DateTime, Utc};
use fs2::FileExt;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fs::{self, OpenOptions};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tracing::warn;
use uuid::Uuid;

pub const DEFAULT_LOG_FILE: &str = "logs/experiment_data.json";

const LOCK_TIMEOUT_SECS: u64 = 10;
const LOCK_RETRY_MS: u64 = 50;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ActionType {
    Analysis,
    Fix,
    Generation,
    Debug,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Status {
    Success,
    Failure,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExperimentRecord {
    pub id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub agent_name: String,
    pub model_used: String,
    pub action_type: ActionType,
    pub details: Map<String, Value>,
    pub status: Status,
}

impl ExperimentRecord {
    pub fn new(
        agent_name: impl Into<String>,
        model_used: impl Into<String>,
        action_type: ActionType,
        status: Status,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            timestamp: Utc::now(),
            agent_name: agent_name.into(),
            model_used: model_used.into(),
            action_type,
            details: Map::new(),
            status,
        }
    }

    /// Add one `details` entry. Values that fail to serialize are stored as null.
    pub fn detail(mut self, key: &str, value: impl Serialize) -> Self {
        let value = serde_json::to_value(value).unwrap_or(Value::Null);
        self.details.insert(key.to_string(), value);
        self
    }

    /// Record which model answered and, when the provider reported them,
    /// the token counts and cost of the call.
    pub fn response(self, response: &LlmResponse) -> Self {
        let record = self.detail("response_model", &response.model);
        match &response.usage {
            Some(usage) => record
                .detail("prompt_tokens", usage.prompt_tokens)
                .detail("completion_tokens", usage.completion_tokens)
                .detail("total_tokens", usage.total_tokens)
                .detail("cost_usd", usage.cost()),
            None => record,
        }
    }
}

/// Handle to the log file; cheap to clone and share between agents.
#[derive(Debug, Clone)]
pub struct ExperimentLog {
    path: PathBuf,
}

impl ExperimentLog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append a record. Failures are logged and swallowed.
    pub fn log(&self, record: ExperimentRecord) {
        if let Err(e) = self.append(&record) {
            warn!(path = %self.path.display(), "failed to write experiment log: {:#}", e);
        }
    }

    pub fn append(&self, record: &ExperimentRecord) -> anyhow::Result<()> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }

        let _lock = self.lock()?;
        let mut records = self.read_existing()?;
        records.push(serde_json::to_value(record)?);
        let content = serde_json::to_string_pretty(&records)?;
        write_atomic(&self.path, &content)
    }

    /// All records currently in the log.
    pub fn read_all(&self) -> anyhow::Result<Vec<ExperimentRecord>> {
        match fs::read_to_string(&self.path) {
            Ok(content) => Ok(serde_json::from_str(&content)?),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(Vec::new()),
            Err(e) => Err(e.into()),
        }
    }

    fn read_existing(&self) -> anyhow::Result<Vec<Value>> {
        let content = match fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };
        if content.trim().is_empty() {
            return Ok(Vec::new());
        }
        match serde_json::from_str::<Vec<Value>>(&content) {
            Ok(records) => Ok(records),
            Err(e) => {
                warn!(
                    path = %self.path.display(),
                    "experiment log is corrupt ({}); starting a new one",
                    e
                );
                preserve_corrupt_log(&self.path, &content);
                Ok(Vec::new())
            }
        }
    }

    fn lock(&self) -> anyhow::Result<fs::File> {
        let lock_path = self.path.with_extension("lock");
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false) // Lock file content doesn't matter, just the lock
            .open(&lock_path)?;

        let start = Instant::now();
        loop {
            match FileExt::try_lock_exclusive(&file) {
                Ok(()) => return Ok(file),
                Err(err) => {
                    if err.kind() != ErrorKind::WouldBlock {
                        return Err(err.into());
                    }
                    if start.elapsed() >= Duration::from_secs(LOCK_TIMEOUT_SECS) {
                        anyhow::bail!(
                            "Timed out waiting for experiment log lock ({}s)",
                            LOCK_TIMEOUT_SECS
                        );
                    }
                    std::thread::sleep(Duration::from_millis(LOCK_RETRY_MS));
                }
            }
        }
    }
}

fn preserve_corrupt_log(path: &Path, content: &str) {
    let corrupt_path = path.with_extension("json.corrupt");
    if fs::rename(path, &corrupt_path).is_err() {
        let _ = fs::write(&corrupt_path, content);
    }
}

/// Write to a temp file first, then rename over the destination.
fn write_atomic(path: &Path, content: &str) -> anyhow::Result<()> {
    let tmp_path = path.with_extension("tmp");
    fs::write(&tmp_path, content)?;

    #[cfg(windows)]
    {
        if path.exists() {
            let _ = fs::remove_file(path);
        }
    }

    if let Err(err) = fs::rename(&tmp_path, path) {
        let _ = fs::remove_file(&tmp_path);
        return Err(err.into());
    }
    Ok(())
}
