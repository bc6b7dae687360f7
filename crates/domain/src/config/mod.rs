mod auth;
mod heartbeat;
mod providers;
mod pruning;
mod server;
mod sessions;
mod tools;

pub use auth::*;
pub use heartbeat::*;
pub use providers::*;
pub use pruning::*;
pub use server::*;
pub use sessions::*;
pub use tools::*;

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;

use crate::error::{Error, Result};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Top-level config
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub auth: AuthConfig,
    #[serde(default)]
    pub sessions: SessionsConfig,
    #[serde(default)]
    pub pruning: PruningConfig,
    #[serde(default)]
    pub tools: ToolsConfig,
    #[serde(default)]
    pub skills: SkillsConfig,
    #[serde(default)]
    pub heartbeat: HeartbeatConfig,
    #[serde(default)]
    pub dedupe: DedupeConfig,
    #[serde(default)]
    pub providers: ProvidersConfig,
}

impl Config {
    /// Load and parse a TOML config file.
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path).map_err(Error::Io)?;
        toml::from_str(&raw).map_err(|e| Error::Config(format!("{}: {e}", path.display())))
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Config validation
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Severity level for a configuration issue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigSeverity {
    Error,
    Warning,
}

/// A single configuration validation issue.
#[derive(Debug, Clone)]
pub struct ConfigError {
    pub severity: ConfigSeverity,
    pub field: String,
    pub message: String,
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let tag = match self.severity {
            ConfigSeverity::Error => "ERROR",
            ConfigSeverity::Warning => "WARN",
        };
        write!(f, "[{tag}] {}: {}", self.field, self.message)
    }
}

impl Config {
    /// Validate the configuration and return a list of issues.
    ///
    /// Returns an empty vec when everything looks good.
    pub fn validate(&self) -> Vec<ConfigError> {
        let mut errors = Vec::new();

        if self.server.port == 0 {
            errors.push(ConfigError {
                severity: ConfigSeverity::Error,
                field: "server.port".into(),
                message: "port must be greater than 0".into(),
            });
        }

        if self.server.host.is_empty() {
            errors.push(ConfigError {
                severity: ConfigSeverity::Error,
                field: "server.host".into(),
                message: "host must not be empty".into(),
            });
        }

        if self.sessions.default_agent.trim().is_empty() {
            errors.push(ConfigError {
                severity: ConfigSeverity::Error,
                field: "sessions.default_agent".into(),
                message: "default agent must not be empty".into(),
            });
        }

        // Bindings must name a channel and a non-empty agent.
        for (i, binding) in self.sessions.bindings.iter().enumerate() {
            if binding.match_.channel.trim().is_empty() {
                errors.push(ConfigError {
                    severity: ConfigSeverity::Error,
                    field: format!("sessions.bindings[{i}].match.channel"),
                    message: "binding channel must not be empty".into(),
                });
            }
            if binding.agent_id.trim().is_empty() {
                errors.push(ConfigError {
                    severity: ConfigSeverity::Error,
                    field: format!("sessions.bindings[{i}].agent_id"),
                    message: "binding agent_id must not be empty".into(),
                });
            }
            if !self.sessions.agents.is_empty()
                && !self
                    .sessions
                    .agents
                    .iter()
                    .any(|a| a.eq_ignore_ascii_case(&binding.agent_id))
            {
                errors.push(ConfigError {
                    severity: ConfigSeverity::Warning,
                    field: format!("sessions.bindings[{i}].agent_id"),
                    message: format!(
                        "agent \"{}\" is not in sessions.agents — the default agent will be used",
                        binding.agent_id
                    ),
                });
            }
        }

        // Identity link aliases must be channel-prefixed.
        for (i, link) in self.sessions.identity_links.iter().enumerate() {
            for alias in &link.aliases {
                if !alias.contains(':') {
                    errors.push(ConfigError {
                        severity: ConfigSeverity::Warning,
                        field: format!("sessions.identity_links[{i}]"),
                        message: format!(
                            "alias \"{alias}\" is not of the form \"channel:peerId\""
                        ),
                    });
                }
            }
        }

        // Approval patterns must be valid regexes.
        for (i, pattern) in self.tools.approval_patterns.iter().enumerate() {
            if let Err(e) = regex::Regex::new(pattern) {
                errors.push(ConfigError {
                    severity: ConfigSeverity::Error,
                    field: format!("tools.approval_patterns[{i}]"),
                    message: format!("invalid regex \"{pattern}\": {e}"),
                });
            }
        }

        // Pruning sanity.
        if !(0.0..=1.0).contains(&self.pruning.soft_trim_ratio) {
            errors.push(ConfigError {
                severity: ConfigSeverity::Error,
                field: "pruning.soft_trim_ratio".into(),
                message: format!(
                    "soft_trim_ratio must be within [0, 1] (got {})",
                    self.pruning.soft_trim_ratio
                ),
            });
        }
        if self.pruning.mode == PruningMode::CacheTtl && self.pruning.ttl_ms == 0 {
            errors.push(ConfigError {
                severity: ConfigSeverity::Warning,
                field: "pruning.ttl_ms".into(),
                message: "ttl of 0 prunes every eligible tool result immediately".into(),
            });
        }

        if self.heartbeat.timeout_seconds == 0 {
            errors.push(ConfigError {
                severity: ConfigSeverity::Error,
                field: "heartbeat.timeout_seconds".into(),
                message: "timeout must be greater than 0".into(),
            });
        }

        if self.server.replay_depth == 0 {
            errors.push(ConfigError {
                severity: ConfigSeverity::Warning,
                field: "server.replay_depth".into(),
                message: "replay depth of 0 disables reconnect catch-up".into(),
            });
        }

        errors
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
