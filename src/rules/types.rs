//! Rule, condition, action, and effect types.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::task::{TaskPriority, TaskSeed, TaskStatus};

/// An automation rule. Immutable once loaded for a given evaluation;
/// mutated only through explicit add/remove/load operations on the engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AutomationRule {
    pub id: String,
    pub name: String,
    pub trigger: RuleTrigger,
    #[serde(default)]
    pub conditions: Vec<RuleCondition>,
    #[serde(default)]
    pub actions: Vec<RuleAction>,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    pub created_at: String,
}

fn default_enabled() -> bool {
    true
}

/// What a rule listens for.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuleTrigger {
    pub event_type: String,
}

/// A single predicate over a dotted field path into the execution context.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuleCondition {
    /// Dotted path, e.g. `task.priority` or `new_status`.
    pub field: String,
    pub operator: ConditionOperator,
    pub value: Value,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConditionOperator {
    Equals,
    NotEquals,
    Contains,
    GreaterThan,
    LessThan,
}

/// A typed rule action. String parameters support template variables
/// (`{task.id}`, `{task.title}`, `{task.status}`, `{task.priority}`).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RuleAction {
    CreateTask {
        title: String,
        #[serde(default)]
        description: String,
        #[serde(default)]
        priority: Option<TaskPriority>,
        #[serde(rename = "task_type", default)]
        task_type: Option<String>,
        #[serde(default)]
        assigned_to: Option<String>,
    },
    UpdateTask {
        #[serde(default)]
        status: Option<TaskStatus>,
        #[serde(default)]
        title: Option<String>,
        #[serde(default)]
        description: Option<String>,
    },
    SetPriority {
        priority: TaskPriority,
    },
    AssignUser {
        assigned_to: String,
    },
    SendNotification {
        message: String,
        #[serde(default)]
        recipients: Vec<String>,
    },
}

/// Outcome of evaluating one rule for one event. Never mutates shared state.
#[derive(Debug, Clone, Serialize)]
pub struct RuleExecutionResult {
    pub rule_id: String,
    pub rule_name: String,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl RuleExecutionResult {
    pub fn ok(rule: &AutomationRule, result: Value) -> Self {
        Self {
            rule_id: rule.id.clone(),
            rule_name: rule.name.clone(),
            success: true,
            result: Some(result),
            error: None,
        }
    }

    pub fn failed(rule: &AutomationRule, error: impl Into<String>) -> Self {
        Self {
            rule_id: rule.id.clone(),
            rule_name: rule.name.clone(),
            success: false,
            result: None,
            error: Some(error.into()),
        }
    }
}

/// Typed side-effect emitted by action execution.
///
/// The engine publishes these through listener channels instead of touching
/// the store; whoever drives the engine applies them and re-emits real
/// lifecycle events as needed.
#[derive(Debug, Clone)]
pub enum RuleEffect {
    TaskCreate {
        seed: TaskSeed,
    },
    TaskUpdate {
        task_id: String,
        status: Option<TaskStatus>,
        title: Option<String>,
        description: Option<String>,
    },
    PrioritySet {
        task_id: String,
        priority: TaskPriority,
    },
    UserAssign {
        task_id: String,
        assigned_to: String,
    },
    Notify {
        task_id: String,
        message: String,
        recipients: Vec<String>,
    },
}
