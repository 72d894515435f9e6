//! Configuration stored in `forage.toml`.

use std::fs;
use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};

use crate::core::policy::{CommandPattern, ExecutionPolicy};

/// Top-level configuration (TOML).
///
/// This file is intended to be edited by humans and must remain stable and
/// automatable. Missing fields default to sensible values; a missing file is
/// equivalent to an empty one.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ForageConfig {
    /// Model identifier sent to the backend.
    pub model: String,

    /// Base URL of the OpenAI-compatible API.
    pub base_url: String,

    /// Environment variable holding the API key.
    pub api_key_env: String,

    /// Sampling temperature, when set.
    pub temperature: Option<f64>,

    /// Response token cap, when set.
    pub max_tokens: Option<u64>,

    /// Timeout for a single backend call in seconds.
    pub backend_timeout_secs: u64,

    /// System prompt override. When unset, a default prompt is rendered.
    pub system: Option<String>,

    pub policy: PolicyConfig,
}

/// Command-execution limits and filtering.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct PolicyConfig {
    /// Wildcard patterns of permitted commands. Empty means the built-in
    /// safe defaults apply.
    pub allow: Vec<String>,

    /// Wildcard patterns of forbidden commands; these win over everything.
    pub deny: Vec<String>,

    /// Wall-clock limit for a single command in seconds.
    pub command_timeout_secs: u64,

    /// Byte cap for each captured output stream.
    pub max_output_bytes: usize,

    /// Maximum number of command rounds per run.
    pub max_rounds: u32,
}

impl Default for ForageConfig {
    fn default() -> Self {
        Self {
            model: "gpt-4o-mini".to_string(),
            base_url: "https://api.openai.com/v1".to_string(),
            api_key_env: "OPENAI_API_KEY".to_string(),
            temperature: None,
            max_tokens: None,
            backend_timeout_secs: 120,
            system: None,
            policy: PolicyConfig::default(),
        }
    }
}

impl Default for PolicyConfig {
    fn default() -> Self {
        Self {
            allow: Vec::new(),
            deny: Vec::new(),
            command_timeout_secs: 30,
            max_output_bytes: 100_000,
            max_rounds: 10,
        }
    }
}

impl ForageConfig {
    pub fn validate(&self) -> Result<()> {
        if self.model.trim().is_empty() {
            return Err(anyhow!("model must not be empty"));
        }
        if self.base_url.trim().is_empty() {
            return Err(anyhow!("base_url must not be empty"));
        }
        if self.backend_timeout_secs == 0 {
            return Err(anyhow!("backend_timeout_secs must be > 0"));
        }
        self.policy.validate()
    }
}

impl PolicyConfig {
    pub fn validate(&self) -> Result<()> {
        if self.command_timeout_secs == 0 {
            return Err(anyhow!("policy.command_timeout_secs must be > 0"));
        }
        if self.max_output_bytes == 0 {
            return Err(anyhow!("policy.max_output_bytes must be > 0"));
        }
        if self.max_rounds == 0 {
            return Err(anyhow!("policy.max_rounds must be > 0"));
        }
        for pattern in self.allow.iter().chain(self.deny.iter()) {
            CommandPattern::compile(pattern)?;
        }
        Ok(())
    }

    /// Freeze this section into the immutable per-run policy.
    pub fn to_policy(&self) -> Result<ExecutionPolicy> {
        ExecutionPolicy::new(
            &self.allow,
            &self.deny,
            Duration::from_secs(self.command_timeout_secs),
            self.max_output_bytes,
            self.max_rounds,
        )
    }
}

/// Load config from a TOML file.
///
/// If the file is missing, returns `ForageConfig::default()`.
pub fn load_config(path: &Path) -> Result<ForageConfig> {
    if !path.exists() {
        let cfg = ForageConfig::default();
        cfg.validate()?;
        return Ok(cfg);
    }
    let contents = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let cfg: ForageConfig =
        toml::from_str(&contents).with_context(|| format!("parse {}", path.display()))?;
    cfg.validate()?;
    Ok(cfg)
}
