//! The orchestration loop.
//!
//! One iteration: load the task snapshot, decide the workflow transition,
//! partition the dependency graph, pick one task (workflow-gated), dispatch
//! it through the executor, apply the success/failure transition, append an
//! action-log entry. When no candidate exists the loop falls back, in
//! order, to stale-task recovery, the seed provider, and an idle sleep.
//!
//! Dispatch is strictly sequential: one task in flight per scheduler
//! instance. The loop is designed to run indefinitely and never terminates
//! on a single task's failure.

use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{anyhow, Result};
use serde_json::json;
use tracing::{debug, error, info, warn};

use super::{ExecutionOutcome, ExecutionRequest, SeedProvider, TaskExecutor};
use crate::graph;
use crate::store::TaskStore;
use crate::task::{now_string, ActionLogEntry, Task, TaskStatus};
use crate::workflow::{
    self, WorkflowEngine, WorkflowState, TRANSITION_TESTS_FAILED, TRANSITION_TESTS_PASSING,
};

/// Timing knobs for the loop. Defaults mirror production behavior; tests
/// shrink them.
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Pause after a dispatch before the next iteration.
    pub dispatch_pause: Duration,
    /// Sleep when no work exists.
    pub idle_sleep: Duration,
    /// Backoff after an iteration-level error.
    pub error_backoff: Duration,
    /// Stale window while idle shortly after startup (fast crash recovery).
    pub fast_recovery_window_secs: i64,
    /// Conservative stale window once the scheduler has been running.
    pub stale_window_secs: i64,
    /// How long after startup the fast window applies.
    pub startup_grace: Duration,
    /// Actor recorded as `created_by` for seeded tasks.
    pub seed_actor: String,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            dispatch_pause: Duration::from_secs(3),
            idle_sleep: Duration::from_secs(10),
            error_backoff: Duration::from_secs(10),
            fast_recovery_window_secs: 60,
            stale_window_secs: 600,
            startup_grace: Duration::from_secs(300),
            seed_actor: "seed-provider".to_string(),
        }
    }
}

/// What one loop iteration did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IterationOutcome {
    /// A task was dispatched and resolved.
    Dispatched { task_id: String, success: bool },
    /// Stale in-progress tasks were reset to `todo`.
    Recovered { count: usize },
    /// The seed provider created a brand-new task.
    Seeded { task_id: String },
    /// Nothing to do.
    Idle,
}

/// One scheduler instance. Owns the workflow token and the active-task
/// marker as plain fields; never shared across instances.
pub struct Scheduler {
    store: Arc<dyn TaskStore>,
    workflow: WorkflowEngine,
    executor: Arc<dyn TaskExecutor>,
    seeder: Option<Arc<dyn SeedProvider>>,
    config: SchedulerConfig,
    /// Id of the task currently being executed by this instance, if any.
    active_task: Option<String>,
    started_at: Instant,
}

impl Scheduler {
    pub fn new(
        store: Arc<dyn TaskStore>,
        workflow: WorkflowEngine,
        executor: Arc<dyn TaskExecutor>,
    ) -> Self {
        Self {
            store,
            workflow,
            executor,
            seeder: None,
            config: SchedulerConfig::default(),
            active_task: None,
            started_at: Instant::now(),
        }
    }

    pub fn with_seeder(mut self, seeder: Arc<dyn SeedProvider>) -> Self {
        self.seeder = Some(seeder);
        self
    }

    pub fn with_config(mut self, config: SchedulerConfig) -> Self {
        self.config = config;
        self
    }

    /// Id of the task currently in flight, if any.
    pub fn active_task(&self) -> Option<&str> {
        self.active_task.as_deref()
    }

    /// Current workflow state name.
    pub fn workflow_state(&self) -> &str {
        &self.workflow.token().state
    }

    /// Run the loop until the surrounding future is dropped. Every
    /// iteration-level error is logged and followed by a backoff; the loop
    /// itself never returns.
    pub async fn run(&mut self) {
        info!(
            "scheduler loop starting in workflow state '{}'",
            self.workflow.token().state
        );
        loop {
            match self.run_iteration().await {
                Ok(IterationOutcome::Dispatched { task_id, success }) => {
                    info!("dispatched task {} (success: {})", task_id, success);
                    tokio::time::sleep(self.config.dispatch_pause).await;
                }
                Ok(IterationOutcome::Recovered { count }) => {
                    info!("recovered {} stale task(s)", count);
                }
                Ok(IterationOutcome::Seeded { task_id }) => {
                    info!("seeded new task {}", task_id);
                }
                Ok(IterationOutcome::Idle) => {
                    debug!("no ready work; sleeping");
                    tokio::time::sleep(self.config.idle_sleep).await;
                }
                Err(e) => {
                    error!("scheduler iteration failed: {:#}", e);
                    tokio::time::sleep(self.config.error_backoff).await;
                }
            }
        }
    }

    /// One full iteration: select, dispatch, resolve.
    pub async fn run_iteration(&mut self) -> Result<IterationOutcome> {
        let tasks = self.store.get_all().await?;
        let state = self
            .workflow
            .current_state()
            .map_err(|e| anyhow!("workflow table lookup failed: {}", e))?;
        let transition = self.workflow.decide(&tasks);

        let validation = graph::validate(&tasks);
        if !validation.valid {
            warn!(
                "task graph has problems: {} cycle(s), {} dangling ref(s), {} self-dependencies",
                validation.cycles.len(),
                validation.dangling.len(),
                validation.self_dependencies.len()
            );
        }
        let split = graph::partition(&tasks);

        // QA phases (and "additional work" transitions) revisit in-progress
        // tasks; everything else draws from the ready set.
        let qa_mode = workflow::is_qa_phase(&state.name)
            || transition
                .as_deref()
                .map(workflow::indicates_additional_work)
                .unwrap_or(false);

        let mut candidates: Vec<Task> = if qa_mode {
            tasks
                .iter()
                .filter(|t| t.status == TaskStatus::InProgress)
                .cloned()
                .collect()
        } else {
            split.ready.clone()
        };

        if candidates.is_empty() && qa_mode && !split.ready.is_empty() {
            debug!("no in-progress work in QA phase; falling back to ready tasks");
            candidates = split.ready.clone();
        }

        if candidates.is_empty() {
            let recovered = self.recover_stale(&tasks).await?;
            if recovered > 0 {
                return Ok(IterationOutcome::Recovered { count: recovered });
            }
            if self.active_task.is_none() {
                if let Some(seeder) = &self.seeder {
                    if let Some(seed) = seeder.seed(&state, &tasks).await {
                        let task = seed.into_task(&self.config.seed_actor);
                        let task_id = task.id.clone();
                        info!("seeding new task '{}' ({})", task.title, task_id);
                        self.store.put(task).await?;
                        return Ok(IterationOutcome::Seeded { task_id });
                    }
                }
            }
            return Ok(IterationOutcome::Idle);
        }

        let task = select_candidate(&candidates, &state).clone();
        self.dispatch(task, &state, transition).await
    }

    async fn dispatch(
        &mut self,
        mut task: Task,
        state: &WorkflowState,
        decided_transition: Option<String>,
    ) -> Result<IterationOutcome> {
        debug!(
            "dispatching task '{}' ({}) in state '{}'",
            task.title, task.id, state.name
        );
        task.status = TaskStatus::InProgress;
        task.touch();
        self.store.put(task.clone()).await?;
        self.active_task = Some(task.id.clone());

        let request = ExecutionRequest {
            task: task.clone(),
            workflow_state: state.clone(),
        };
        let started = Instant::now();
        let result = self.executor.execute(&request).await;
        let duration_ms = started.elapsed().as_millis() as u64;

        let outcome = self.resolve(task, result, duration_ms, state, decided_transition).await;
        // The active marker is cleared no matter how resolution went.
        self.active_task = None;
        outcome
    }

    async fn resolve(
        &mut self,
        mut task: Task,
        result: Result<ExecutionOutcome>,
        duration_ms: u64,
        state: &WorkflowState,
        decided_transition: Option<String>,
    ) -> Result<IterationOutcome> {
        let in_qa = workflow::is_qa_phase(&state.name);

        let outcome = match result {
            Ok(outcome) => outcome,
            Err(e) => {
                // Protocol/transport failure: abort this dispatch attempt
                // and surface it to the iteration error boundary. The task
                // stays in-progress and is picked up by stale recovery.
                return Err(e.context(format!("executing task {}", task.id)));
            }
        };

        let task_id = task.id.clone();
        let success = outcome.success;
        let transition = if success {
            if in_qa {
                task.status = TaskStatus::Done;
                Some(TRANSITION_TESTS_PASSING.to_string())
            } else {
                // Leave in-progress pending QA.
                decided_transition
            }
        } else if in_qa {
            // Rework signal; the task stays in-progress.
            Some(TRANSITION_TESTS_FAILED.to_string())
        } else {
            task.status = TaskStatus::Todo;
            None
        };

        if let Some(name) = &transition {
            let context = json!({ "task_id": task_id, "success": success });
            if let Err(e) = self.workflow.advance(name, Some(&context)) {
                warn!("workflow advance '{}' failed: {}", name, e);
            }
        }

        let summary = outcome.summary.clone().unwrap_or_else(|| {
            if success {
                format!("execution succeeded: {}", truncate(&outcome.output, 200))
            } else {
                format!(
                    "execution failed: {}",
                    outcome
                        .error
                        .as_deref()
                        .map(|e| truncate(e, 200))
                        .unwrap_or_else(|| "unknown error".to_string())
                )
            }
        });
        task.log_action(ActionLogEntry {
            summary,
            profile: outcome.actor_name,
            duration_ms,
            success,
            transition,
            created_at: now_string(),
        });
        self.store.put(task).await?;

        Ok(IterationOutcome::Dispatched { task_id, success })
    }

    /// Reset stale in-progress tasks to `todo`.
    ///
    /// A task is stale when it is not tracked as active by this instance
    /// and its `updated_at` age exceeds the adaptive threshold. An
    /// unparseable `updated_at` counts as immediately stale.
    async fn recover_stale(&mut self, tasks: &[Task]) -> Result<usize> {
        let threshold = self.stale_threshold_secs();
        let mut recovered = 0;

        for task in tasks {
            if task.status != TaskStatus::InProgress {
                continue;
            }
            if self.active_task.as_deref() == Some(task.id.as_str()) {
                continue;
            }
            let stale = match task.seconds_since_update() {
                Some(age) => age >= threshold,
                None => {
                    warn!(
                        "task {} has unparseable updated_at '{}'; treating as stale",
                        task.id, task.updated_at
                    );
                    true
                }
            };
            if stale {
                warn!(
                    "recovering stale in-progress task '{}' ({})",
                    task.title, task.id
                );
                let mut reset = task.clone();
                reset.status = TaskStatus::Todo;
                reset.touch();
                self.store.put(reset).await?;
                recovered += 1;
            }
        }
        Ok(recovered)
    }

    // Fast window only while nothing is in flight and we are freshly
    // started (crash/restart recovery); otherwise be conservative so a
    // legitimately slow executor is not fought.
    fn stale_threshold_secs(&self) -> i64 {
        if self.active_task.is_none() && self.started_at.elapsed() < self.config.startup_grace {
            self.config.fast_recovery_window_secs
        } else {
            self.config.stale_window_secs
        }
    }
}

/// Prefer a task whose type matches the workflow state's target type. A
/// generic task whose title or description mentions the target keyword also
/// matches. Otherwise the first candidate wins.
fn select_candidate<'a>(candidates: &'a [Task], state: &WorkflowState) -> &'a Task {
    if let Some(target) = state.target_type.as_deref() {
        if let Some(matched) = candidates.iter().find(|t| matches_target(t, target)) {
            return matched;
        }
    }
    &candidates[0]
}

fn matches_target(task: &Task, target: &str) -> bool {
    if task.task_type.eq_ignore_ascii_case(target) {
        return true;
    }
    if task.task_type.is_empty() || task.task_type.eq_ignore_ascii_case("task") {
        let needle = target.to_lowercase();
        return task.title.to_lowercase().contains(&needle)
            || task.description.to_lowercase().contains(&needle);
    }
    false
}

fn truncate(text: &str, max: usize) -> String {
    if text.chars().count() <= max {
        text.to_string()
    } else {
        let cut: String = text.chars().take(max).collect();
        format!("{}...", cut)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::InMemoryTaskStore;
    use crate::task::TaskSeed;
    use crate::workflow::{StaticWorkflowTable, WorkflowEngine};
    use async_trait::async_trait;
    use chrono::Utc;
    use std::collections::VecDeque;
    use tokio::sync::Mutex;

    /// Executor stub with a scripted queue of results. An empty queue means
    /// success.
    struct StubExecutor {
        script: Mutex<VecDeque<Result<ExecutionOutcome>>>,
        executed: Mutex<Vec<String>>,
    }

    impl StubExecutor {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                script: Mutex::new(VecDeque::new()),
                executed: Mutex::new(Vec::new()),
            })
        }

        async fn push_failure(&self, error: &str) {
            self.script.lock().await.push_back(Ok(outcome(false, error)));
        }

        async fn push_transport_error(&self, error: &str) {
            self.script.lock().await.push_back(Err(anyhow!(error.to_string())));
        }

        async fn executed_ids(&self) -> Vec<String> {
            self.executed.lock().await.clone()
        }
    }

    fn outcome(success: bool, error: &str) -> ExecutionOutcome {
        ExecutionOutcome {
            success,
            output: if success { "done".to_string() } else { String::new() },
            error: if error.is_empty() {
                None
            } else {
                Some(error.to_string())
            },
            actor_name: "stub".to_string(),
            prompt: None,
            summary: None,
        }
    }

    #[async_trait]
    impl TaskExecutor for StubExecutor {
        async fn execute(&self, request: &ExecutionRequest) -> Result<ExecutionOutcome> {
            self.executed.lock().await.push(request.task.id.clone());
            match self.script.lock().await.pop_front() {
                Some(result) => result,
                None => Ok(outcome(true, "")),
            }
        }
    }

    struct StubSeeder;

    #[async_trait]
    impl SeedProvider for StubSeeder {
        async fn seed(&self, _state: &WorkflowState, snapshot: &[Task]) -> Option<TaskSeed> {
            if snapshot.is_empty() {
                Some(TaskSeed {
                    title: "bootstrap the backlog".to_string(),
                    ..TaskSeed::default()
                })
            } else {
                None
            }
        }
    }

    fn test_table() -> StaticWorkflowTable {
        StaticWorkflowTable::new()
            .with_state(WorkflowState {
                name: "implementation".to_string(),
                transitions: vec!["implementation-complete".to_string()],
                default_transition: Some("implementation-complete".to_string()),
                target_type: None,
            })
            .with_state(WorkflowState {
                name: "tests-completed".to_string(),
                transitions: vec![
                    TRANSITION_TESTS_PASSING.to_string(),
                    TRANSITION_TESTS_FAILED.to_string(),
                ],
                default_transition: Some(TRANSITION_TESTS_PASSING.to_string()),
                target_type: None,
            })
            .with_edge("implementation", "implementation-complete", "tests-completed")
            .with_edge("tests-completed", TRANSITION_TESTS_PASSING, "implementation")
            .with_edge("tests-completed", TRANSITION_TESTS_FAILED, "implementation")
    }

    fn scheduler_with(
        store: Arc<InMemoryTaskStore>,
        executor: Arc<StubExecutor>,
        initial_state: &str,
    ) -> Scheduler {
        let engine = WorkflowEngine::new(Arc::new(test_table()), initial_state).unwrap();
        Scheduler::new(store, engine, executor)
    }

    fn aged_timestamp(seconds_ago: i64) -> String {
        (Utc::now() - chrono::Duration::seconds(seconds_ago)).to_rfc3339()
    }

    #[tokio::test]
    async fn success_outside_qa_advances_workflow_and_keeps_in_progress() {
        let store = Arc::new(InMemoryTaskStore::new());
        let task = Task::new("implement feature", "tester");
        let id = task.id.clone();
        store.put(task).await.unwrap();

        let executor = StubExecutor::new();
        let mut scheduler = scheduler_with(Arc::clone(&store), executor, "implementation");

        let result = scheduler.run_iteration().await.unwrap();
        assert_eq!(
            result,
            IterationOutcome::Dispatched {
                task_id: id.clone(),
                success: true
            }
        );
        assert_eq!(scheduler.workflow_state(), "tests-completed");

        let task = store.get(&id).await.unwrap().unwrap();
        assert_eq!(task.status, TaskStatus::InProgress);
        assert_eq!(task.action_log.len(), 1);
        assert_eq!(
            task.action_log[0].transition.as_deref(),
            Some("implementation-complete")
        );
        assert!(task.action_log[0].success);
        assert!(scheduler.active_task().is_none());
    }

    #[tokio::test]
    async fn success_in_qa_marks_done_with_tests_passing() {
        let store = Arc::new(InMemoryTaskStore::new());
        let mut task = Task::new("under QA", "tester");
        task.status = TaskStatus::InProgress;
        let id = task.id.clone();
        store.put(task).await.unwrap();

        let executor = StubExecutor::new();
        let mut scheduler = scheduler_with(Arc::clone(&store), executor, "tests-completed");

        let result = scheduler.run_iteration().await.unwrap();
        assert_eq!(
            result,
            IterationOutcome::Dispatched {
                task_id: id.clone(),
                success: true
            }
        );
        assert_eq!(scheduler.workflow_state(), "implementation");

        let task = store.get(&id).await.unwrap().unwrap();
        assert_eq!(task.status, TaskStatus::Done);
        assert_eq!(
            task.action_log[0].transition.as_deref(),
            Some(TRANSITION_TESTS_PASSING)
        );
    }

    #[tokio::test]
    async fn failure_outside_qa_reverts_to_todo_and_is_reselected() {
        let store = Arc::new(InMemoryTaskStore::new());
        let task = Task::new("flaky work", "tester");
        let id = task.id.clone();
        store.put(task).await.unwrap();

        let executor = StubExecutor::new();
        executor.push_failure("compile error").await;
        let mut scheduler =
            scheduler_with(Arc::clone(&store), Arc::clone(&executor), "implementation");

        let result = scheduler.run_iteration().await.unwrap();
        assert_eq!(
            result,
            IterationOutcome::Dispatched {
                task_id: id.clone(),
                success: false
            }
        );
        // No workflow movement on failure outside QA.
        assert_eq!(scheduler.workflow_state(), "implementation");

        let task = store.get(&id).await.unwrap().unwrap();
        assert_eq!(task.status, TaskStatus::Todo);
        assert!(!task.action_log[0].success);
        assert!(task.action_log[0].transition.is_none());

        // Eligible again on the very next iteration.
        let result = scheduler.run_iteration().await.unwrap();
        assert_eq!(
            result,
            IterationOutcome::Dispatched {
                task_id: id.clone(),
                success: true
            }
        );
        assert_eq!(executor.executed_ids().await, vec![id.clone(), id]);
    }

    #[tokio::test]
    async fn failure_in_qa_leaves_in_progress_with_tests_failed() {
        let store = Arc::new(InMemoryTaskStore::new());
        let mut task = Task::new("under QA", "tester");
        task.status = TaskStatus::InProgress;
        let id = task.id.clone();
        store.put(task).await.unwrap();

        let executor = StubExecutor::new();
        executor.push_failure("tests red").await;
        let mut scheduler = scheduler_with(Arc::clone(&store), executor, "tests-completed");

        scheduler.run_iteration().await.unwrap();
        let task = store.get(&id).await.unwrap().unwrap();
        assert_eq!(task.status, TaskStatus::InProgress);
        assert_eq!(
            task.action_log[0].transition.as_deref(),
            Some(TRANSITION_TESTS_FAILED)
        );
        assert_eq!(scheduler.workflow_state(), "implementation");
    }

    #[tokio::test]
    async fn transport_error_propagates_but_clears_active_marker() {
        let store = Arc::new(InMemoryTaskStore::new());
        let task = Task::new("doomed dispatch", "tester");
        let id = task.id.clone();
        store.put(task).await.unwrap();

        let executor = StubExecutor::new();
        executor.push_transport_error("handshake failed").await;
        let mut scheduler = scheduler_with(Arc::clone(&store), executor, "implementation");

        let err = scheduler.run_iteration().await.unwrap_err();
        assert!(format!("{:#}", err).contains("handshake failed"));
        assert!(scheduler.active_task().is_none());
        // The task is left in-progress for stale recovery to pick up.
        let task = store.get(&id).await.unwrap().unwrap();
        assert_eq!(task.status, TaskStatus::InProgress);
    }

    #[tokio::test]
    async fn stale_untracked_task_is_recovered_inside_fast_window() {
        let store = Arc::new(InMemoryTaskStore::new());
        let mut stale = Task::new("orphaned by a crash", "tester");
        stale.status = TaskStatus::InProgress;
        stale.updated_at = aged_timestamp(120);
        let stale_id = stale.id.clone();
        store.put(stale).await.unwrap();

        let mut fresh = Task::new("recently touched", "tester");
        fresh.status = TaskStatus::InProgress;
        fresh.updated_at = aged_timestamp(10);
        let fresh_id = fresh.id.clone();
        store.put(fresh).await.unwrap();

        let executor = StubExecutor::new();
        // Non-QA state with nothing ready: recovery path runs.
        let mut scheduler = scheduler_with(Arc::clone(&store), executor, "implementation");

        let result = scheduler.run_iteration().await.unwrap();
        assert_eq!(result, IterationOutcome::Recovered { count: 1 });
        assert_eq!(
            store.get(&stale_id).await.unwrap().unwrap().status,
            TaskStatus::Todo
        );
        assert_eq!(
            store.get(&fresh_id).await.unwrap().unwrap().status,
            TaskStatus::InProgress
        );
    }

    #[tokio::test]
    async fn garbage_timestamp_counts_as_immediately_stale() {
        let store = Arc::new(InMemoryTaskStore::new());
        let mut task = Task::new("bad clock", "tester");
        task.status = TaskStatus::InProgress;
        task.updated_at = "???".to_string();
        let id = task.id.clone();
        store.put(task).await.unwrap();

        let executor = StubExecutor::new();
        let mut scheduler = scheduler_with(Arc::clone(&store), executor, "implementation");

        let result = scheduler.run_iteration().await.unwrap();
        assert_eq!(result, IterationOutcome::Recovered { count: 1 });
        assert_eq!(store.get(&id).await.unwrap().unwrap().status, TaskStatus::Todo);
    }

    #[tokio::test]
    async fn conservative_window_applies_after_startup_grace() {
        let store = Arc::new(InMemoryTaskStore::new());
        let mut task = Task::new("slow but legitimate", "tester");
        task.status = TaskStatus::InProgress;
        task.updated_at = aged_timestamp(120);
        let id = task.id.clone();
        store.put(task).await.unwrap();

        let executor = StubExecutor::new();
        let config = SchedulerConfig {
            startup_grace: Duration::from_secs(0),
            ..SchedulerConfig::default()
        };
        let mut scheduler = scheduler_with(Arc::clone(&store), executor, "implementation")
            .with_config(config);

        // 120s old is inside the 10-minute conservative window.
        let result = scheduler.run_iteration().await.unwrap();
        assert_eq!(result, IterationOutcome::Idle);
        assert_eq!(
            store.get(&id).await.unwrap().unwrap().status,
            TaskStatus::InProgress
        );
    }

    #[tokio::test]
    async fn seeder_runs_only_when_no_work_remains() {
        let store = Arc::new(InMemoryTaskStore::new());
        let executor = StubExecutor::new();
        let mut scheduler = scheduler_with(Arc::clone(&store), executor, "implementation")
            .with_seeder(Arc::new(StubSeeder));

        let result = scheduler.run_iteration().await.unwrap();
        match result {
            IterationOutcome::Seeded { task_id } => {
                let task = store.get(&task_id).await.unwrap().unwrap();
                assert_eq!(task.created_by, "seed-provider");
                assert_eq!(task.status, TaskStatus::Todo);
            }
            other => panic!("expected Seeded, got {:?}", other),
        }

        // The seeded task is picked up on the next pass, not re-seeded.
        let result = scheduler.run_iteration().await.unwrap();
        assert!(matches!(result, IterationOutcome::Dispatched { .. }));
    }

    #[tokio::test]
    async fn qa_phase_without_in_progress_falls_back_to_ready() {
        let store = Arc::new(InMemoryTaskStore::new());
        let task = Task::new("ready work", "tester");
        let id = task.id.clone();
        store.put(task).await.unwrap();

        let executor = StubExecutor::new();
        let mut scheduler = scheduler_with(Arc::clone(&store), executor, "tests-completed");

        let result = scheduler.run_iteration().await.unwrap();
        assert!(matches!(
            result,
            IterationOutcome::Dispatched { task_id, .. } if task_id == id
        ));
    }

    #[tokio::test]
    async fn blocked_tasks_are_not_dispatched() {
        let store = Arc::new(InMemoryTaskStore::new());
        let mut blocked = Task::new("needs dep", "tester");
        blocked.dependencies = vec!["unfinished".to_string()];
        let mut dep = Task::new("unfinished dep", "tester");
        dep.id = "unfinished".to_string();
        store.put(dep).await.unwrap();
        store.put(blocked).await.unwrap();

        let executor = StubExecutor::new();
        let mut scheduler =
            scheduler_with(Arc::clone(&store), Arc::clone(&executor), "implementation");

        // The dependency itself is ready; the dependent is not.
        let result = scheduler.run_iteration().await.unwrap();
        match result {
            IterationOutcome::Dispatched { task_id, .. } => assert_eq!(task_id, "unfinished"),
            other => panic!("expected Dispatched, got {:?}", other),
        }
    }

    #[test]
    fn target_type_selection_prefers_exact_then_keyword_match() {
        let state = WorkflowState {
            name: "docs-phase".to_string(),
            transitions: vec![],
            default_transition: None,
            target_type: Some("docs".to_string()),
        };

        let mut feature = Task::new("build parser", "tester");
        feature.task_type = "feature".to_string();
        let mut docs = Task::new("write manual", "tester");
        docs.task_type = "docs".to_string();
        let candidates = vec![feature.clone(), docs.clone()];
        assert_eq!(select_candidate(&candidates, &state).id, docs.id);

        // Generic task mentioning the keyword also matches.
        let mut generic = Task::new("update docs for CLI", "tester");
        generic.task_type = "task".to_string();
        let candidates = vec![feature.clone(), generic.clone()];
        assert_eq!(select_candidate(&candidates, &state).id, generic.id);

        // No match at all: first candidate wins.
        let candidates = vec![feature.clone()];
        assert_eq!(select_candidate(&candidates, &state).id, feature.id);
    }
}
