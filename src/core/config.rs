//! Agent configuration loaded from `sqlscout.toml`.
//!
//! Every key is optional. A missing file means defaults; a present but
//! malformed file is an error so typos do not silently fall back.

use crate::core::error::ScoutError;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const CONFIG_FILE_NAME: &str = "sqlscout.toml";

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct AgentConfig {
    /// Maximum loop iterations per question.
    pub step_limit: usize,
    /// Observation text cap before the truncation marker is appended.
    pub observation_max_chars: usize,
    /// LIMIT injected into accepted queries that carry none.
    pub default_row_cap: usize,
    pub busy_timeout_secs: u64,
    /// Trace blocks echoed back when the step budget runs out.
    pub summary_blocks: usize,
    /// Optional JSONL sink for per-step trace events.
    pub trace_path: Option<PathBuf>,
    /// External model program (prompt on stdin, completion on stdout).
    pub model_command: Option<String>,
    pub retry: RetryPolicy,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            step_limit: 10,
            observation_max_chars: 2000,
            default_row_cap: 100,
            busy_timeout_secs: 5,
            summary_blocks: 3,
            trace_path: None,
            model_command: None,
            retry: RetryPolicy::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub initial_delay_ms: u64,
    pub factor: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 4,
            initial_delay_ms: 1000,
            factor: 4,
        }
    }
}

impl RetryPolicy {
    /// Delay before retry number `attempt` (1-based).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let mult = u64::from(self.factor).saturating_pow(attempt.saturating_sub(1));
        Duration::from_millis(self.initial_delay_ms.saturating_mul(mult))
    }
}

impl AgentConfig {
    pub fn validate(&self) -> Result<(), ScoutError> {
        if self.step_limit == 0 {
            return Err(ScoutError::ConfigError(
                "step_limit must be at least 1".to_string(),
            ));
        }
        if self.observation_max_chars == 0 {
            return Err(ScoutError::ConfigError(
                "observation_max_chars must be at least 1".to_string(),
            ));
        }
        if self.default_row_cap == 0 {
            return Err(ScoutError::ConfigError(
                "default_row_cap must be at least 1".to_string(),
            ));
        }
        if self.retry.max_attempts == 0 || self.retry.factor == 0 {
            return Err(ScoutError::ConfigError(
                "retry.max_attempts and retry.factor must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    pub fn from_toml_str(content: &str) -> Result<Self, ScoutError> {
        let config: AgentConfig =
            toml::from_str(content).map_err(|e| ScoutError::ConfigError(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn load_file(path: &Path) -> Result<Self, ScoutError> {
        let content = fs::read_to_string(path).map_err(ScoutError::IoError)?;
        Self::from_toml_str(&content)
    }
}

/// Resolve configuration for a database.
///
/// An explicit path must exist. Otherwise `sqlscout.toml` is looked up next
/// to the database file, then in `cwd`.
pub fn load_config(
    explicit: Option<&Path>,
    db_path: &Path,
    cwd: &Path,
) -> Result<AgentConfig, ScoutError> {
    if let Some(path) = explicit {
        if !path.exists() {
            return Err(ScoutError::NotFound(format!(
                "config file {}",
                path.display()
            )));
        }
        return AgentConfig::load_file(path);
    }

    let beside_db = db_path
        .parent()
        .map(|p| p.join(CONFIG_FILE_NAME))
        .filter(|p| p.exists());
    if let Some(path) = beside_db {
        return AgentConfig::load_file(&path);
    }

    let in_cwd = cwd.join(CONFIG_FILE_NAME);
    if in_cwd.exists() {
        return AgentConfig::load_file(&in_cwd);
    }

    Ok(AgentConfig::default())
}
