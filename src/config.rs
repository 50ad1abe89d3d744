//! Configuration management for taskpilot.
//!
//! Configuration can be set via environment variables:
//! - `AGENT_CLI_PATH` - Optional. Program spawned for each execution. Defaults to `agent`.
//! - `AGENT_CLI_ARGS` - Optional. Whitespace-separated extra arguments for the agent.
//! - `TASKPILOT_WORKING_DIR` - Optional. Working directory for agent sessions. Defaults to the current directory.
//! - `TASKPILOT_TURN_TIMEOUT_MS` - Optional. Completion-wait budget per execution. Defaults to `30000`.
//! - `TASKPILOT_RULES_FILE` - Optional. JSON file with automation rules loaded at startup.

use std::path::PathBuf;

use thiserror::Error;

use crate::agent::AgentClientConfig;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid value for {0}: {1}")]
    InvalidValue(String, String),
}

/// Runner configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Program spawned for each agent execution
    pub agent_path: String,

    /// Extra arguments passed to the agent program
    pub agent_args: Vec<String>,

    /// Working directory for agent sessions
    pub working_dir: PathBuf,

    /// Completion-wait budget per execution
    pub turn_timeout_ms: u64,

    /// Automation rules file loaded at startup
    pub rules_file: Option<PathBuf>,
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        let agent_path =
            std::env::var("AGENT_CLI_PATH").unwrap_or_else(|_| "agent".to_string());

        let agent_args = std::env::var("AGENT_CLI_ARGS")
            .map(|raw| raw.split_whitespace().map(|s| s.to_string()).collect())
            .unwrap_or_default();

        let working_dir = std::env::var("TASKPILOT_WORKING_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")));

        let turn_timeout_ms = std::env::var("TASKPILOT_TURN_TIMEOUT_MS")
            .unwrap_or_else(|_| "30000".to_string())
            .parse()
            .map_err(|e| {
                ConfigError::InvalidValue("TASKPILOT_TURN_TIMEOUT_MS".to_string(), format!("{}", e))
            })?;

        let rules_file = std::env::var("TASKPILOT_RULES_FILE").ok().map(PathBuf::from);

        Ok(Self {
            agent_path,
            agent_args,
            working_dir,
            turn_timeout_ms,
            rules_file,
        })
    }

    /// Create a config with custom values (useful for testing).
    pub fn new(agent_path: String, working_dir: PathBuf) -> Self {
        Self {
            agent_path,
            agent_args: Vec::new(),
            working_dir,
            turn_timeout_ms: 30_000,
            rules_file: None,
        }
    }

    /// Derive the protocol client configuration.
    pub fn agent_client_config(&self) -> AgentClientConfig {
        AgentClientConfig {
            program: self.agent_path.clone(),
            args: self.agent_args.clone(),
            turn_timeout_ms: self.turn_timeout_ms,
            ..AgentClientConfig::default()
        }
    }
}
