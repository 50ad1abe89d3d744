//! Scheduler: the workflow-gated orchestration loop and its seams.
//!
//! The scheduler consumes three collaborators through traits so its control
//! logic is testable with stubs:
//! - `TaskExecutor` runs one task (the default implementation delegates to
//!   the agent execution protocol client)
//! - `SeedProvider` proposes a brand-new task when no work remains
//! - the task store and workflow table come from `store` and `workflow`

mod runner;

pub use runner::{IterationOutcome, Scheduler, SchedulerConfig};

use async_trait::async_trait;

use crate::task::{Task, TaskSeed};
use crate::workflow::WorkflowState;

/// What the executor is asked to run.
#[derive(Debug, Clone)]
pub struct ExecutionRequest {
    pub task: Task,
    pub workflow_state: WorkflowState,
}

/// What the executor reports back.
#[derive(Debug, Clone)]
pub struct ExecutionOutcome {
    pub success: bool,
    pub output: String,
    pub error: Option<String>,
    /// Which actor/profile performed the execution (for the action log).
    pub actor_name: String,
    pub prompt: Option<String>,
    pub summary: Option<String>,
}

/// Executes one task. Transport-level failures should be returned as `Err`
/// and abort the dispatch attempt; ordinary execution failures are an `Ok`
/// outcome with `success == false`.
#[async_trait]
pub trait TaskExecutor: Send + Sync {
    async fn execute(&self, request: &ExecutionRequest) -> anyhow::Result<ExecutionOutcome>;
}

/// Proposes a brand-new task when no active or ready task exists.
#[async_trait]
pub trait SeedProvider: Send + Sync {
    async fn seed(&self, state: &WorkflowState, snapshot: &[Task]) -> Option<TaskSeed>;
}
