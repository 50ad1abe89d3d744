//! Agent-backed task executor.
//!
//! Bridges the scheduler's `TaskExecutor` seam to the protocol client: one
//! spawned agent process per execution, prompt rendered from the task and
//! the current workflow phase.

use std::path::PathBuf;

use async_trait::async_trait;
use serde_json::Value;
use tracing::warn;

use super::client::{AgentClientConfig, AgentConnection};
use crate::scheduler::{ExecutionOutcome, ExecutionRequest, TaskExecutor};
use crate::task::Task;
use crate::workflow::WorkflowState;

/// Render the instruction prompt for a dispatched task.
pub fn render_prompt(task: &Task, state: &WorkflowState) -> String {
    let mut prompt = format!("You are working on the task \"{}\".\n", task.title);
    if !task.description.is_empty() {
        prompt.push_str(&format!("\n{}\n", task.description));
    }
    prompt.push_str(&format!("\nWorkflow phase: {}.\n", state.name));
    if !task.dependencies.is_empty() {
        prompt.push_str(&format!(
            "Completed prerequisite tasks: {}.\n",
            task.dependencies.join(", ")
        ));
    }
    prompt.push_str(
        "\nCarry out the work described above, then summarize what you did and whether it succeeded.\n",
    );
    prompt
}

/// Heuristic for provider throttling in agent error output, used only to
/// enrich the log stream.
pub(crate) fn is_rate_limited_error(message: &str) -> bool {
    let lower = message.to_lowercase();
    lower.contains("rate limit")
        || lower.contains("rate-limited")
        || lower.contains("429")
        || lower.contains("overloaded")
}

pub struct AgentExecutor {
    config: AgentClientConfig,
    working_dir: PathBuf,
    mcp_servers: Vec<Value>,
    actor_name: String,
}

impl AgentExecutor {
    pub fn new(config: AgentClientConfig, working_dir: PathBuf) -> Self {
        Self {
            config,
            working_dir,
            mcp_servers: Vec::new(),
            actor_name: "agent".to_string(),
        }
    }

    /// Auxiliary MCP server configs passed along at session creation.
    pub fn with_mcp_servers(mut self, servers: Vec<Value>) -> Self {
        self.mcp_servers = servers;
        self
    }

    pub fn with_actor_name(mut self, name: impl Into<String>) -> Self {
        self.actor_name = name.into();
        self
    }
}

#[async_trait]
impl TaskExecutor for AgentExecutor {
    async fn execute(&self, request: &ExecutionRequest) -> anyhow::Result<ExecutionOutcome> {
        let prompt = render_prompt(&request.task, &request.workflow_state);

        // Connection setup and handshake failures propagate; the scheduler's
        // per-iteration boundary owns the retry policy.
        let connection = AgentConnection::connect(&self.config, &self.working_dir).await?;
        let result = async {
            connection.initialize().await?;
            connection
                .new_session(&self.working_dir, &self.mcp_servers)
                .await?;
            connection.prompt(&prompt).await?;
            Ok::<_, anyhow::Error>(connection.wait_for_completion(self.config.turn_timeout_ms).await)
        }
        .await;

        // Cleanup runs regardless of how the turn went.
        connection.close().await;

        let result = result?;
        let success = result.error.is_empty();
        if !success && is_rate_limited_error(&result.error) {
            warn!("agent appears rate-limited: {}", result.error);
        }

        Ok(ExecutionOutcome {
            success,
            output: result.output,
            error: if result.error.is_empty() {
                None
            } else {
                Some(result.error)
            },
            actor_name: self.actor_name.clone(),
            prompt: Some(prompt),
            summary: None,
        })
    }
}
