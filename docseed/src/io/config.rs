//! Configuration stored in `docseed.toml` plus the API key from the environment.

use std::fmt;
use std::fs;
use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};

use crate::core::tracker::{RetryPolicy, RetryScope};

/// File name looked up in the working directory.
pub const CONFIG_FILE: &str = "docseed.toml";

/// Pipeline configuration (TOML).
///
/// Missing fields default to values that work against the OpenAI API, `node`
/// and the Redocly CLI.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct DocseedConfig {
    /// Project directory used when `-d` is not given.
    pub default_directory: String,
    pub retry: RetryConfig,
    pub api: ApiConfig,
    pub script: ScriptConfig,
    pub preview: PreviewConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct RetryConfig {
    /// Failed attempts tolerated for a step before the run stops.
    pub max_attempts: u32,
    pub scope: RetryScope,
    /// Full pipeline restarts allowed after preview failures.
    pub max_restarts: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ApiConfig {
    /// Base URL of an OpenAI-compatible API (without `/chat/completions`).
    pub base_url: String,
    pub model: String,
    /// Name of the environment variable holding the API key.
    pub api_key_env: String,
    pub timeout_secs: u64,
    pub max_tokens: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ScriptConfig {
    /// Script file, relative to the working directory.
    pub path: String,
    /// Interpreter command; the script path is appended as the last argument.
    pub interpreter: Vec<String>,
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct PreviewConfig {
    /// Preview command; `directory_flag <dir>` is appended.
    pub command: Vec<String>,
    pub directory_flag: String,
    pub success_marker: String,
    pub failure_marker: String,
    /// Deadline for the streaming probe; `0` waits indefinitely.
    pub probe_timeout_secs: u64,
    /// Re-launch with inherited I/O after a healthy probe.
    pub handoff: bool,
}

impl Default for DocseedConfig {
    fn default() -> Self {
        Self {
            default_directory: "docs".to_string(),
            retry: RetryConfig::default(),
            api: ApiConfig::default(),
            script: ScriptConfig::default(),
            preview: PreviewConfig::default(),
        }
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            scope: RetryScope::Consecutive,
            max_restarts: 3,
        }
    }
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.openai.com/v1".to_string(),
            model: "gpt-4o".to_string(),
            api_key_env: "OPENAI_API_KEY".to_string(),
            timeout_secs: 120,
            max_tokens: 4096,
        }
    }
}

impl Default for ScriptConfig {
    fn default() -> Self {
        Self {
            path: "create_docs.js".to_string(),
            interpreter: vec!["node".to_string()],
            timeout_secs: 5 * 60,
        }
    }
}

impl Default for PreviewConfig {
    fn default() -> Self {
        Self {
            command: vec![
                "npx".to_string(),
                "@redocly/cli".to_string(),
                "preview".to_string(),
            ],
            directory_flag: "-d".to_string(),
            success_marker: "no errors found".to_string(),
            failure_marker: "Error:".to_string(),
            probe_timeout_secs: 5 * 60,
            handoff: true,
        }
    }
}

impl DocseedConfig {
    pub fn validate(&self) -> Result<()> {
        if self.default_directory.trim().is_empty() {
            return Err(anyhow!("default_directory must not be empty"));
        }
        if self.retry.max_attempts == 0 {
            return Err(anyhow!("retry.max_attempts must be > 0"));
        }
        if self.api.base_url.trim().is_empty() {
            return Err(anyhow!("api.base_url must not be empty"));
        }
        if self.api.model.trim().is_empty() {
            return Err(anyhow!("api.model must not be empty"));
        }
        if self.api.api_key_env.trim().is_empty() {
            return Err(anyhow!("api.api_key_env must not be empty"));
        }
        if self.api.timeout_secs == 0 {
            return Err(anyhow!("api.timeout_secs must be > 0"));
        }
        if self.script.path.trim().is_empty() {
            return Err(anyhow!("script.path must not be empty"));
        }
        if self.script.interpreter.is_empty() || self.script.interpreter[0].trim().is_empty() {
            return Err(anyhow!("script.interpreter must be a non-empty array"));
        }
        if self.script.timeout_secs == 0 {
            return Err(anyhow!("script.timeout_secs must be > 0"));
        }
        if self.preview.command.is_empty() || self.preview.command[0].trim().is_empty() {
            return Err(anyhow!("preview.command must be a non-empty array"));
        }
        if self.preview.success_marker.is_empty() || self.preview.failure_marker.is_empty() {
            return Err(anyhow!("preview markers must not be empty"));
        }
        Ok(())
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.retry.max_attempts,
            scope: self.retry.scope,
        }
    }
}

impl ApiConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl ScriptConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl PreviewConfig {
    pub fn probe_timeout(&self) -> Option<Duration> {
        (self.probe_timeout_secs > 0).then(|| Duration::from_secs(self.probe_timeout_secs))
    }
}

/// Load config from a TOML file.
///
/// If the file is missing, returns `DocseedConfig::default()`.
pub fn load_config(path: &Path) -> Result<DocseedConfig> {
    if !path.exists() {
        let cfg = DocseedConfig::default();
        cfg.validate()?;
        return Ok(cfg);
    }
    let contents = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let cfg: DocseedConfig =
        toml::from_str(&contents).with_context(|| format!("parse {}", path.display()))?;
    cfg.validate()?;
    Ok(cfg)
}

/// The API key environment variable is unset or empty.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MissingApiKeyError {
    pub var: String,
}

impl fmt::Display for MissingApiKeyError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} is not set; export it before running docseed", self.var)
    }
}

impl std::error::Error for MissingApiKeyError {}

/// Read the API key named by `api.api_key_env`.
pub fn api_key_from_env(api: &ApiConfig) -> Result<String> {
    match std::env::var(&api.api_key_env) {
        Ok(key) if !key.trim().is_empty() => Ok(key),
        _ => Err(MissingApiKeyError {
            var: api.api_key_env.clone(),
        }
        .into()),
    }
}
