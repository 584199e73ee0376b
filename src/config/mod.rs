//! Typed configuration.
//!
//! Process settings come from environment variables, loaded once at
//! startup. Engine tunables come from an optional TOML file. Secrets are
//! wrapped in `secrecy::SecretString` so they never reach the logs.

use std::path::Path;
use std::time::Duration;

use secrecy::SecretString;
use serde::Deserialize;

use crate::engine::EngineConfig;
use crate::llm::transcript::DEFAULT_TURNS;
use crate::error::{Error, Result};

pub const DEFAULT_MODEL: &str = "claude-sonnet-4-20250514";

#[derive(Debug)]
pub struct Config {
    pub anthropic_api_key: Option<SecretString>,
    pub assistant_model: String,
    pub assistant_preamble: Option<String>,
    /// Exchanges remembered per conversation; 0 disables history.
    pub assistant_history_turns: usize,
    pub otel_endpoint: Option<String>,
    pub log_level: String,
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// In local dev, call `dotenvy::dotenv().ok()` before this.
    pub fn from_env() -> Result<Self> {
        let log_level = optional_var("LOG_LEVEL").unwrap_or_else(|| "info".to_string());
        if log_level.trim().is_empty() {
            return Err(Error::Config("LOG_LEVEL is set but empty".to_string()));
        }
        let assistant_history_turns = match optional_var("ASSISTANT_HISTORY_TURNS") {
            Some(raw) => raw.trim().parse().map_err(|_| {
                Error::Config(format!(
                    "ASSISTANT_HISTORY_TURNS must be a non-negative integer, got {raw:?}"
                ))
            })?,
            None => DEFAULT_TURNS,
        };

        Ok(Self {
            anthropic_api_key: optional_var("ANTHROPIC_API_KEY").map(SecretString::from),
            assistant_model: optional_var("ASSISTANT_MODEL")
                .unwrap_or_else(|| DEFAULT_MODEL.to_string()),
            assistant_preamble: optional_var("ASSISTANT_PREAMBLE"),
            assistant_history_turns,
            otel_endpoint: optional_var("OTEL_ENDPOINT"),
            log_level,
        })
    }

    /// The API key, or a config error if it was not provided.
    pub fn require_api_key(&self) -> Result<&SecretString> {
        self.anthropic_api_key.as_ref().ok_or_else(|| {
            Error::Config("required environment variable ANTHROPIC_API_KEY is not set".to_string())
        })
    }
}

fn optional_var(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.is_empty())
}

/// Engine tunables as written in a TOML file. Every field is optional.
///
/// ```toml
/// max_attempts = 2
/// retry_backoff_ms = 250
/// item_timeout_secs = 60
/// failure_notice = "Sorry, something went wrong. Please try again."
/// ```
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct EngineSettings {
    pub max_attempts: u32,
    pub retry_backoff_ms: u64,
    pub max_backoff_ms: u64,
    /// 0 disables the per-item timeout.
    pub item_timeout_secs: u64,
    pub dedup_retention_secs: u64,
    pub max_concurrent: Option<usize>,
    /// Message sent to a user whose item was dropped.
    pub failure_notice: Option<String>,
}

impl Default for EngineSettings {
    fn default() -> Self {
        let engine = EngineConfig::default();
        Self {
            max_attempts: engine.max_attempts,
            retry_backoff_ms: engine.retry_backoff.as_millis() as u64,
            max_backoff_ms: engine.max_backoff.as_millis() as u64,
            item_timeout_secs: engine.item_timeout.map_or(0, |t| t.as_secs()),
            dedup_retention_secs: engine.dedup_retention.as_secs(),
            max_concurrent: engine.max_concurrent,
            failure_notice: None,
        }
    }
}

impl EngineSettings {
    pub fn from_toml_str(s: &str) -> Result<Self> {
        let settings: Self =
            toml::from_str(s).map_err(|e| Error::Config(format!("bad engine settings: {e}")))?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            Error::Config(format!("cannot read engine settings {}: {e}", path.display()))
        })?;
        Self::from_toml_str(&content)
    }

    fn validate(&self) -> Result<()> {
        if self.max_attempts == 0 {
            return Err(Error::Config("max_attempts must be at least 1".to_string()));
        }
        if self.max_concurrent == Some(0) {
            return Err(Error::Config("max_concurrent must be at least 1".to_string()));
        }
        Ok(())
    }

    pub fn engine_config(&self) -> EngineConfig {
        EngineConfig {
            max_attempts: self.max_attempts,
            retry_backoff: Duration::from_millis(self.retry_backoff_ms),
            max_backoff: Duration::from_millis(self.max_backoff_ms),
            item_timeout: (self.item_timeout_secs > 0)
                .then(|| Duration::from_secs(self.item_timeout_secs)),
            dedup_retention: Duration::from_secs(self.dedup_retention_secs),
            max_concurrent: self.max_concurrent,
            ..EngineConfig::default()
        }
    }
}
