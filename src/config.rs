//! Configuration for refactor-swarm
//!
//! Read from `--config <path>` or ~/.config/refactor-swarm/config.toml.
//! Every field has a default, so a partial file (or none at all) is fine.

use crate::experiment::DEFAULT_LOG_FILE;
use crate::llm::models::DEFAULT_MAX_TOKENS;
use crate::llm::{PromptOverrides, Prompts, DEFAULT_BASE_URL, DEFAULT_MODEL};
use crate::tools::{Pylint, Pytest, DEFAULT_TOOL_TIMEOUT};
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, warn};

pub const DEFAULT_MAX_ITERATIONS: usize = 10;
pub const DEFAULT_API_KEY_ENV: &str = "OPENROUTER_API_KEY";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub model: String,
    pub max_iterations: usize,
    /// Completion token limit per model call
    pub max_tokens: u32,
    pub api_base_url: String,
    /// Name of the environment variable holding the API key
    pub api_key_env: String,
    pub log_file: PathBuf,
    /// Average lint score checked after the loop; informational only
    pub quality_threshold: Option<f64>,
    pub generate_tests: bool,
    pub generate_docs: bool,
    pub tools: ToolsConfig,
    pub prompts: PromptOverrides,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            model: DEFAULT_MODEL.to_string(),
            max_iterations: DEFAULT_MAX_ITERATIONS,
            max_tokens: DEFAULT_MAX_TOKENS,
            api_base_url: DEFAULT_BASE_URL.to_string(),
            api_key_env: DEFAULT_API_KEY_ENV.to_string(),
            log_file: PathBuf::from(DEFAULT_LOG_FILE),
            quality_threshold: None,
            generate_tests: false,
            generate_docs: false,
            tools: ToolsConfig::default(),
            prompts: PromptOverrides::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ToolsConfig {
    pub lint_program: String,
    pub lint_args: Vec<String>,
    pub test_program: String,
    pub test_args: Vec<String>,
    /// Runs test files directly when no pytest report is produced
    pub interpreter: String,
    pub timeout_secs: u64,
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self {
            lint_program: "pylint".to_string(),
            lint_args: vec!["--output-format=json2".to_string()],
            test_program: "pytest".to_string(),
            test_args: vec!["--tb=short".to_string(), "-q".to_string()],
            interpreter: "python3".to_string(),
            timeout_secs: DEFAULT_TOOL_TIMEOUT.as_secs(),
        }
    }
}

impl ToolsConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs.max(1))
    }

    pub fn linter(&self) -> Pylint {
        Pylint::new(&self.lint_program, self.lint_args.clone(), self.timeout())
    }

    pub fn test_harness(&self) -> Pytest {
        Pytest::new(
            &self.test_program,
            self.test_args.clone(),
            &self.interpreter,
            self.timeout(),
        )
    }
}

impl Config {
    /// Get the config file path
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|p| p.join("refactor-swarm").join("config.toml"))
    }

    /// Load from `explicit` when given (it must exist), else from the default
    /// location when present, else defaults.
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        let path = match explicit {
            Some(path) => {
                if !path.is_file() {
                    anyhow::bail!("Config file not found: {}", path.display());
                }
                path.to_path_buf()
            }
            None => match Self::default_path().filter(|p| p.is_file()) {
                Some(path) => path,
                None => return Ok(Self::default()),
            },
        };

        let content = fs::read_to_string(&path)
            .with_context(|| format!("Failed to read config {}", path.display()))?;
        match Self::from_toml_str(&content) {
            Ok(config) => {
                debug!(path = %path.display(), "loaded config");
                Ok(config)
            }
            Err(err) => {
                warn!(
                    path = %path.display(),
                    "config file is invalid ({}); using defaults",
                    err
                );
                Ok(Self::default())
            }
        }
    }

    pub fn from_toml_str(content: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(content)
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_iterations == 0 {
            anyhow::bail!("max_iterations must be at least 1");
        }
        if self.max_tokens == 0 {
            anyhow::bail!("max_tokens must be at least 1");
        }
        if self.model.trim().is_empty() {
            anyhow::bail!("model must not be empty");
        }
        if let Some(threshold) = self.quality_threshold {
            if !(0.0..=10.0).contains(&threshold) {
                anyhow::bail!("quality_threshold must be between 0 and 10, got {}", threshold);
            }
        }
        Ok(())
    }

    /// Read the API key from the configured environment variable.
    pub fn api_key(&self) -> Result<String> {
        Self::api_key_from(&self.api_key_env, std::env::var(&self.api_key_env).ok())
    }

    fn api_key_from(var: &str, value: Option<String>) -> Result<String> {
        match value.map(|v| v.trim().to_string()) {
            Some(key) if !key.is_empty() => Ok(key),
            _ => anyhow::bail!("API key not configured: set the {} environment variable", var),
        }
    }

    pub fn prompts(&self) -> Prompts {
        Prompts::with_overrides(&self.prompts)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_default() {
        let config = Config::default();
        assert_eq!(config.max_iterations, 10);
        assert_eq!(config.api_key_env, "OPENROUTER_API_KEY");
        assert_eq!(config.log_file, PathBuf::from("logs/experiment_data.json"));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config = Config::from_toml_str(
            r#"
            model = "openai/gpt-4o-mini"
            quality_threshold = 7.5

            [tools]
            interpreter = "python3.12"
            timeout_secs = 60

            [prompts]
            judge = "Be brief."
            "#,
        )
        .unwrap();
        assert_eq!(config.model, "openai/gpt-4o-mini");
        assert_eq!(config.max_iterations, DEFAULT_MAX_ITERATIONS);
        assert_eq!(config.tools.interpreter, "python3.12");
        assert_eq!(config.tools.lint_program, "pylint");
        assert_eq!(config.tools.timeout(), Duration::from_secs(60));
        assert_eq!(config.prompts().judge, "Be brief.");
        assert_eq!(config.prompts().auditor, crate::llm::prompts::AUDITOR_SYSTEM);
    }

    #[test]
    fn test_invalid_toml_falls_back_to_defaults() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("config.toml");
        fs::write(&path, "max_iterations = \"many\"").unwrap();
        assert_eq!(Config::load(Some(&path)).unwrap(), Config::default());
    }

    #[test]
    fn test_missing_explicit_config_is_an_error() {
        let tmp = tempfile::tempdir().unwrap();
        assert!(Config::load(Some(&tmp.path().join("nope.toml"))).is_err());
    }

    #[test]
    fn test_validate_rejects_zero_iterations() {
        let config = Config {
            max_iterations: 0,
            ..Config::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_max_tokens_from_toml_and_validated() {
        let config = Config::from_toml_str("max_tokens = 4096").unwrap();
        assert_eq!(config.max_tokens, 4096);
        assert_eq!(Config::default().max_tokens, DEFAULT_MAX_TOKENS);

        let config = Config {
            max_tokens: 0,
            ..Config::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_api_key_required() {
        assert!(Config::api_key_from("KEY", None).is_err());
        assert!(Config::api_key_from("KEY", Some("  ".into())).is_err());
        assert_eq!(Config::api_key_from("KEY", Some("sk-1".into())).unwrap(), "sk-1");
    }
}
