//! Workflow state machine interface.
//!
//! The transition table itself is an external collaborator; this module
//! consumes it through a narrow surface (`lookup`, `decide`, `advance`) so
//! the scheduler's control logic stays testable against a stub table. The
//! scheduler owns the *current* token as process-local state and threads it
//! through every loop iteration.

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::Value;
use thiserror::Error;

use crate::task::Task;

/// Transition taken when the QA phase reports success.
pub const TRANSITION_TESTS_PASSING: &str = "tests-passing";
/// Transition taken when the QA phase reports rework is needed.
pub const TRANSITION_TESTS_FAILED: &str = "tests-failed";

const QA_STATE_MARKERS: &[&str] = &["tests-completed", "qa"];
const ADDITIONAL_WORK_MARKER: &str = "additional";

/// A named workflow state as declared by the external transition table.
#[derive(Debug, Clone)]
pub struct WorkflowState {
    pub name: String,
    /// Transition names declared for this state, in declaration order.
    pub transitions: Vec<String>,
    pub default_transition: Option<String>,
    /// Task type this state wants to work on, if any.
    pub target_type: Option<String>,
}

/// Opaque carrier of the current workflow state plus auxiliary payload.
#[derive(Debug, Clone)]
pub struct WorkflowToken {
    pub state: String,
    pub payload: Value,
}

impl WorkflowToken {
    pub fn new(state: impl Into<String>) -> Self {
        Self {
            state: state.into(),
            payload: Value::Null,
        }
    }
}

/// Pluggable decider consuming the task snapshot.
pub type DeciderFn = Arc<dyn Fn(&[Task]) -> Option<String> + Send + Sync>;

#[derive(Debug, Error)]
pub enum WorkflowError {
    #[error("unknown workflow state: {0}")]
    UnknownState(String),

    #[error("state '{state}' has no transition '{transition}'")]
    UnknownTransition { state: String, transition: String },
}

/// The external transition table, consumed as an opaque lookup.
pub trait WorkflowTable: Send + Sync {
    fn lookup(&self, state: &str) -> Option<WorkflowState>;

    /// The pluggable decider for a state, if one is registered.
    fn decider(&self, state: &str) -> Option<DeciderFn>;

    /// Target state for a (state, transition) edge.
    fn next_state(&self, state: &str, transition: &str) -> Option<String>;
}

/// Advance a token through the table. Pure: same inputs, same output.
///
/// `context`, when given, replaces the token payload so downstream states
/// can see why the transition was taken.
pub fn advance(
    token: &WorkflowToken,
    transition: &str,
    table: &dyn WorkflowTable,
    context: Option<&Value>,
) -> Result<WorkflowToken, WorkflowError> {
    if table.lookup(&token.state).is_none() {
        return Err(WorkflowError::UnknownState(token.state.clone()));
    }
    let next = table.next_state(&token.state, transition).ok_or_else(|| {
        WorkflowError::UnknownTransition {
            state: token.state.clone(),
            transition: transition.to_string(),
        }
    })?;
    Ok(WorkflowToken {
        state: next,
        payload: context.cloned().unwrap_or_else(|| token.payload.clone()),
    })
}

/// Whether a state name indicates the QA/tests-completed phase.
pub fn is_qa_phase(state_name: &str) -> bool {
    let lower = state_name.to_lowercase();
    QA_STATE_MARKERS.iter().any(|m| lower.contains(m))
}

/// Whether a transition name signals additional implementation work on an
/// already in-progress task.
pub fn indicates_additional_work(transition: &str) -> bool {
    transition.to_lowercase().contains(ADDITIONAL_WORK_MARKER)
}

/// Scheduler-facing wrapper owning the current token.
///
/// One engine per scheduler instance; never shared across instances.
pub struct WorkflowEngine {
    table: Arc<dyn WorkflowTable>,
    token: WorkflowToken,
}

impl WorkflowEngine {
    pub fn new(table: Arc<dyn WorkflowTable>, initial_state: &str) -> Result<Self, WorkflowError> {
        if table.lookup(initial_state).is_none() {
            return Err(WorkflowError::UnknownState(initial_state.to_string()));
        }
        Ok(Self {
            table,
            token: WorkflowToken::new(initial_state),
        })
    }

    pub fn token(&self) -> &WorkflowToken {
        &self.token
    }

    pub fn current_state(&self) -> Result<WorkflowState, WorkflowError> {
        self.table
            .lookup(&self.token.state)
            .ok_or_else(|| WorkflowError::UnknownState(self.token.state.clone()))
    }

    /// Pick the transition for this iteration: registered decider first,
    /// then the state's configured default, then the first declared
    /// transition.
    pub fn decide(&self, snapshot: &[Task]) -> Option<String> {
        let state = self.table.lookup(&self.token.state)?;
        if let Some(decider) = self.table.decider(&state.name) {
            if let Some(transition) = decider(snapshot) {
                return Some(transition);
            }
        }
        state
            .default_transition
            .clone()
            .or_else(|| state.transitions.first().cloned())
    }

    pub fn advance(
        &mut self,
        transition: &str,
        context: Option<&Value>,
    ) -> Result<(), WorkflowError> {
        self.token = advance(&self.token, transition, self.table.as_ref(), context)?;
        Ok(())
    }
}

/// Simple in-memory transition table.
///
/// Production deployments load the real table from the workflow service;
/// this implementation backs the runner's built-in workflow and the tests.
#[derive(Default)]
pub struct StaticWorkflowTable {
    states: HashMap<String, WorkflowState>,
    edges: HashMap<(String, String), String>,
    deciders: HashMap<String, DeciderFn>,
}

impl StaticWorkflowTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_state(mut self, state: WorkflowState) -> Self {
        self.states.insert(state.name.clone(), state);
        self
    }

    pub fn with_edge(
        mut self,
        from: impl Into<String>,
        transition: impl Into<String>,
        to: impl Into<String>,
    ) -> Self {
        self.edges.insert((from.into(), transition.into()), to.into());
        self
    }

    pub fn with_decider(mut self, state: impl Into<String>, decider: DeciderFn) -> Self {
        self.deciders.insert(state.into(), decider);
        self
    }
}

impl WorkflowTable for StaticWorkflowTable {
    fn lookup(&self, state: &str) -> Option<WorkflowState> {
        self.states.get(state).cloned()
    }

    fn decider(&self, state: &str) -> Option<DeciderFn> {
        self.deciders.get(state).cloned()
    }

    fn next_state(&self, state: &str, transition: &str) -> Option<String> {
        self.edges
            .get(&(state.to_string(), transition.to_string()))
            .cloned()
    }
}

/// Built-in two-phase workflow used by the runner binary: implementation
/// work alternating with a tests-completed QA phase.
pub fn default_table() -> (StaticWorkflowTable, String) {
    let initial = "implementation".to_string();
    let table = StaticWorkflowTable::new()
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
        .with_edge("tests-completed", TRANSITION_TESTS_FAILED, "implementation");
    (table, initial)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn two_state_table() -> StaticWorkflowTable {
        StaticWorkflowTable::new()
            .with_state(WorkflowState {
                name: "build".to_string(),
                transitions: vec!["go".to_string(), "skip".to_string()],
                default_transition: None,
                target_type: Some("feature".to_string()),
            })
            .with_state(WorkflowState {
                name: "tests-completed".to_string(),
                transitions: vec![TRANSITION_TESTS_PASSING.to_string()],
                default_transition: None,
                target_type: None,
            })
            .with_edge("build", "go", "tests-completed")
    }

    #[test]
    fn decide_falls_back_to_first_declared_transition() {
        let engine = WorkflowEngine::new(Arc::new(two_state_table()), "build").unwrap();
        assert_eq!(engine.decide(&[]).as_deref(), Some("go"));
    }

    #[test]
    fn decide_prefers_registered_decider() {
        let table = two_state_table()
            .with_decider("build", Arc::new(|_tasks: &[Task]| Some("skip".to_string())));
        let engine = WorkflowEngine::new(Arc::new(table), "build").unwrap();
        assert_eq!(engine.decide(&[]).as_deref(), Some("skip"));
    }

    #[test]
    fn decide_prefers_default_over_first_declared() {
        let table = StaticWorkflowTable::new().with_state(WorkflowState {
            name: "s".to_string(),
            transitions: vec!["first".to_string(), "second".to_string()],
            default_transition: Some("second".to_string()),
            target_type: None,
        });
        let engine = WorkflowEngine::new(Arc::new(table), "s").unwrap();
        assert_eq!(engine.decide(&[]).as_deref(), Some("second"));
    }

    #[test]
    fn advance_moves_token_along_edge() {
        let mut engine = WorkflowEngine::new(Arc::new(two_state_table()), "build").unwrap();
        engine.advance("go", None).unwrap();
        assert_eq!(engine.token().state, "tests-completed");
    }

    #[test]
    fn advance_rejects_unknown_transition() {
        let mut engine = WorkflowEngine::new(Arc::new(two_state_table()), "build").unwrap();
        let err = engine.advance("teleport", None).unwrap_err();
        assert!(matches!(err, WorkflowError::UnknownTransition { .. }));
        assert_eq!(engine.token().state, "build");
    }

    #[test]
    fn advance_is_pure_over_the_token() {
        let table = two_state_table();
        let token = WorkflowToken::new("build");
        let once = advance(&token, "go", &table, None).unwrap();
        let twice = advance(&token, "go", &table, None).unwrap();
        assert_eq!(once.state, twice.state);
        assert_eq!(token.state, "build");
    }

    #[test]
    fn qa_phase_detection_is_name_based() {
        assert!(is_qa_phase("tests-completed"));
        assert!(is_qa_phase("feature-qa-review"));
        assert!(!is_qa_phase("implementation"));
    }

    #[test]
    fn additional_work_marker_detected_in_transition() {
        assert!(indicates_additional_work("additional-implementation-needed"));
        assert!(!indicates_additional_work("tests-passing"));
    }

    #[test]
    fn default_table_round_trips_through_qa() {
        let (table, initial) = default_table();
        let mut engine = WorkflowEngine::new(Arc::new(table), &initial).unwrap();
        let transition = engine.decide(&[]).unwrap();
        engine.advance(&transition, None).unwrap();
        assert!(is_qa_phase(&engine.token().state));
        engine.advance(TRANSITION_TESTS_PASSING, None).unwrap();
        assert_eq!(engine.token().state, "implementation");
    }
}
