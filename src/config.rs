//! Configuration management for the verification loop.
//!
//! Configuration can be set via environment variables:
//! - `OPENROUTER_API_KEY` - Optional. Without it the judge falls back to the basic check
//!   and the advisor to its fixed routing table.
//! - `JUDGE_MODEL` - Optional. Model used for judging and reassignment. Defaults to `openai/gpt-4o-mini`.
//! - `VERIFY_MAX_ATTEMPTS` - Optional. Attempt budget per call. Defaults to `3`.
//! - `JUDGE_CHAR_BUDGET` - Optional. Characters of result text shown to the judge. Defaults to `8000`.
//! - `CONTEXT_CHAR_BUDGET` - Optional. Cap on each piece of gathered context. Defaults to `2000`.
//! - `VERIFY_BACKOFF_MS` - Optional. Delay between attempts in milliseconds. Defaults to `0`.
//! - `VERIFY_DB_PATH` - Optional. SQLite file for verification records.
//! - `CONTEXT7_API_KEY` - Optional. Credential for the documentation lookup service.
//! - `DOCS_API_URL` - Optional. Base URL of the documentation lookup service.

use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Default attempt budget when the caller supplies a non-positive value.
pub const DEFAULT_MAX_ATTEMPTS: usize = 3;

/// Default number of result characters offered to the judge.
pub const DEFAULT_JUDGE_CHAR_BUDGET: usize = 8000;

/// Default cap on each piece of gathered corrective context.
pub const DEFAULT_CONTEXT_CHAR_BUDGET: usize = 2000;

const DEFAULT_JUDGE_MODEL: &str = "openai/gpt-4o-mini";
const DEFAULT_DOCS_API_URL: &str = "https://context7.com/api/v1";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid value for {0}: {1}")]
    InvalidValue(String, String),
}

/// Knobs for the retry orchestrator and its components.
#[derive(Debug, Clone)]
pub struct VerifierSettings {
    /// Attempt budget per orchestration call
    pub max_attempts: usize,

    /// Characters of worker output shown to the judge
    pub judge_char_budget: usize,

    /// Cap on each gathered context block
    pub context_char_budget: usize,

    /// Delay between consecutive attempts (zero disables it)
    pub backoff: Duration,
}

impl Default for VerifierSettings {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            judge_char_budget: DEFAULT_JUDGE_CHAR_BUDGET,
            context_char_budget: DEFAULT_CONTEXT_CHAR_BUDGET,
            backoff: Duration::ZERO,
        }
    }
}

/// Documentation lookup configuration.
#[derive(Debug, Clone)]
pub struct DocsConfig {
    /// API credential; lookup is disabled without it
    pub api_key: Option<String>,

    /// Service base URL
    pub base_url: String,
}

impl Default for DocsConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            base_url: DEFAULT_DOCS_API_URL.to_string(),
        }
    }
}

impl DocsConfig {
    /// Check if documentation lookup is enabled (credential configured)
    pub fn is_enabled(&self) -> bool {
        self.api_key.is_some()
    }
}

/// Verifier configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// OpenRouter API key
    pub api_key: Option<String>,

    /// Model identifier used by the judge and the advisor (OpenRouter format)
    pub judge_model: String,

    /// Orchestrator settings
    pub verifier: VerifierSettings,

    /// SQLite path for verification records
    pub db_path: Option<PathBuf>,

    /// Documentation lookup configuration
    pub docs: DocsConfig,
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::InvalidValue` if a numeric variable does not parse.
    pub fn from_env() -> Result<Self, ConfigError> {
        let api_key = std::env::var("OPENROUTER_API_KEY")
            .ok()
            .filter(|k| !k.trim().is_empty());

        let judge_model =
            std::env::var("JUDGE_MODEL").unwrap_or_else(|_| DEFAULT_JUDGE_MODEL.to_string());

        let verifier = VerifierSettings {
            max_attempts: parse_env("VERIFY_MAX_ATTEMPTS", DEFAULT_MAX_ATTEMPTS)?,
            judge_char_budget: parse_env("JUDGE_CHAR_BUDGET", DEFAULT_JUDGE_CHAR_BUDGET)?,
            context_char_budget: parse_env("CONTEXT_CHAR_BUDGET", DEFAULT_CONTEXT_CHAR_BUDGET)?,
            backoff: Duration::from_millis(parse_env("VERIFY_BACKOFF_MS", 0u64)?),
        };

        let db_path = std::env::var("VERIFY_DB_PATH").ok().map(PathBuf::from);

        let docs = DocsConfig {
            api_key: std::env::var("CONTEXT7_API_KEY")
                .ok()
                .filter(|k| !k.trim().is_empty()),
            base_url: std::env::var("DOCS_API_URL")
                .unwrap_or_else(|_| DEFAULT_DOCS_API_URL.to_string()),
        };

        Ok(Self {
            api_key,
            judge_model,
            verifier,
            db_path,
            docs,
        })
    }

    /// Create a config with custom values (useful for testing).
    pub fn new(api_key: Option<String>, judge_model: impl Into<String>) -> Self {
        Self {
            api_key,
            judge_model: judge_model.into(),
            verifier: VerifierSettings::default(),
            db_path: None,
            docs: DocsConfig::default(),
        }
    }
}

fn parse_env<T>(name: &str, default: T) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match std::env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map_err(|e| ConfigError::InvalidValue(name.to_string(), format!("{}", e))),
        Err(_) => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_config_uses_defaults() {
        let config = Config::new(None, "openai/gpt-4o-mini");
        assert_eq!(config.verifier.max_attempts, DEFAULT_MAX_ATTEMPTS);
        assert_eq!(config.verifier.judge_char_budget, 8000);
        assert_eq!(config.verifier.context_char_budget, 2000);
        assert_eq!(config.verifier.backoff, Duration::ZERO);
        assert!(!config.docs.is_enabled());
    }

    #[test]
    fn parse_env_rejects_garbage() {
        std::env::set_var("SHARD_VERIFY_TEST_PARSE", "three");
        let err = parse_env::<usize>("SHARD_VERIFY_TEST_PARSE", 3).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue(name, _) if name == "SHARD_VERIFY_TEST_PARSE"));
        std::env::remove_var("SHARD_VERIFY_TEST_PARSE");

        assert_eq!(parse_env::<usize>("SHARD_VERIFY_TEST_UNSET", 7).unwrap(), 7);
    }
}
