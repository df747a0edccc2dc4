//! Agent configuration (TOML file + environment overrides).

use std::fs;
use std::path::Path;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};

/// Pipeline configuration. Missing fields default to sensible values; the
/// file itself is optional.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct AgentConfig {
    /// Default iteration budget for new runs.
    pub max_iterations: u32,

    /// Per-call timeouts in seconds.
    pub clone_timeout_secs: u64,
    pub install_timeout_secs: u64,
    pub lint_timeout_secs: u64,
    pub test_timeout_secs: u64,
    pub push_timeout_secs: u64,
    pub probe_timeout_secs: u64,

    pub sandbox: SandboxConfig,
}

/// Containerized execution knobs for the command runner.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct SandboxConfig {
    pub enabled: bool,
    pub image: String,
    pub memory_limit: String,
    pub cpu_limit: String,
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            image: "python:3.11-slim".to_string(),
            memory_limit: "512m".to_string(),
            cpu_limit: "1".to_string(),
        }
    }
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            max_iterations: 5,
            clone_timeout_secs: 60,
            install_timeout_secs: 180,
            lint_timeout_secs: 60,
            test_timeout_secs: 120,
            push_timeout_secs: 60,
            probe_timeout_secs: 15,
            sandbox: SandboxConfig::default(),
        }
    }
}

impl AgentConfig {
    pub fn validate(&self) -> Result<()> {
        if self.max_iterations == 0 {
            return Err(anyhow!("max_iterations must be > 0"));
        }
        for (name, value) in [
            ("clone_timeout_secs", self.clone_timeout_secs),
            ("install_timeout_secs", self.install_timeout_secs),
            ("lint_timeout_secs", self.lint_timeout_secs),
            ("test_timeout_secs", self.test_timeout_secs),
            ("push_timeout_secs", self.push_timeout_secs),
            ("probe_timeout_secs", self.probe_timeout_secs),
        ] {
            if value == 0 {
                return Err(anyhow!("{name} must be > 0"));
            }
        }
        if self.sandbox.enabled && self.sandbox.image.trim().is_empty() {
            return Err(anyhow!("sandbox.image must be set when sandbox is enabled"));
        }
        Ok(())
    }

    pub fn clone_timeout(&self) -> Duration {
        Duration::from_secs(self.clone_timeout_secs)
    }
    pub fn install_timeout(&self) -> Duration {
        Duration::from_secs(self.install_timeout_secs)
    }
    pub fn lint_timeout(&self) -> Duration {
        Duration::from_secs(self.lint_timeout_secs)
    }
    pub fn test_timeout(&self) -> Duration {
        Duration::from_secs(self.test_timeout_secs)
    }
    pub fn push_timeout(&self) -> Duration {
        Duration::from_secs(self.push_timeout_secs)
    }
    pub fn probe_timeout(&self) -> Duration {
        Duration::from_secs(self.probe_timeout_secs)
    }
}

/// Load config from a TOML file. Missing file returns defaults.
pub fn load_config(path: &Path) -> Result<AgentConfig> {
    if !path.exists() {
        let cfg = AgentConfig::default();
        cfg.validate()?;
        return Ok(cfg);
    }
    let contents = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let cfg: AgentConfig =
        toml::from_str(&contents).with_context(|| format!("parse {}", path.display()))?;
    cfg.validate()?;
    Ok(cfg)
}

/// Resolve the GitHub token: explicit caller value first, then the
/// environment. Empty strings count as absent. The token is never persisted.
pub fn resolve_github_token(request_token: Option<&str>) -> Option<String> {
    let explicit = request_token.map(str::trim).filter(|t| !t.is_empty());
    if let Some(token) = explicit {
        return Some(token.to_string());
    }
    std::env::var("GITHUB_TOKEN")
        .ok()
        .map(|t| t.trim().to_string())
        .filter(|t| !t.is_empty())
}
