//! Core task types shared by the scheduler, graph analyzer, and rule engine.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Get current timestamp as RFC3339 string.
pub fn now_string() -> String {
    Utc::now().to_rfc3339()
}

/// Status of a task in its lifecycle.
///
/// Transitions happen only through the scheduler or explicit store calls,
/// never implicitly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TaskStatus {
    #[serde(rename = "todo")]
    Todo,
    #[serde(rename = "in-progress")]
    InProgress,
    #[serde(rename = "done")]
    Done,
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TaskStatus::Todo => write!(f, "todo"),
            TaskStatus::InProgress => write!(f, "in-progress"),
            TaskStatus::Done => write!(f, "done"),
        }
    }
}

/// Task priority. Ordering is by urgency: `High > Medium > Low`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TaskPriority {
    #[serde(rename = "low")]
    Low,
    #[serde(rename = "medium")]
    Medium,
    #[serde(rename = "high")]
    High,
}

impl TaskPriority {
    /// Numeric rank used for scheduling order (higher runs first).
    pub fn rank(&self) -> u8 {
        match self {
            TaskPriority::Low => 0,
            TaskPriority::Medium => 1,
            TaskPriority::High => 2,
        }
    }
}

impl Default for TaskPriority {
    fn default() -> Self {
        TaskPriority::Medium
    }
}

impl std::fmt::Display for TaskPriority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TaskPriority::Low => write!(f, "low"),
            TaskPriority::Medium => write!(f, "medium"),
            TaskPriority::High => write!(f, "high"),
        }
    }
}

/// One entry in a task's append-only action log.
///
/// Written by the scheduler after every execution attempt; never mutated.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionLogEntry {
    /// Human-readable outcome summary.
    pub summary: String,
    /// Which actor/profile performed the execution.
    pub profile: String,
    /// Wall-clock duration of the execution attempt.
    pub duration_ms: u64,
    pub success: bool,
    /// Workflow transition taken while resolving this attempt, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub transition: Option<String>,
    pub created_at: String,
}

/// A unit of work.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub description: String,
    pub status: TaskStatus,
    #[serde(default)]
    pub priority: TaskPriority,
    /// Free-form classification used for workflow target matching
    /// (e.g. "feature", "bugfix", "docs").
    #[serde(rename = "type", default = "default_task_type")]
    pub task_type: String,
    /// Ids of tasks that must reach `done` before this one is eligible.
    #[serde(default)]
    pub dependencies: Vec<String>,
    pub created_by: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub assigned_to: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub collaborators: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub watchers: Vec<String>,
    #[serde(default)]
    pub action_log: Vec<ActionLogEntry>,
    pub created_at: String,
    pub updated_at: String,
}

fn default_task_type() -> String {
    "task".to_string()
}

impl Task {
    /// Create a fresh `todo` task with a generated id.
    pub fn new(title: impl Into<String>, created_by: impl Into<String>) -> Self {
        let now = now_string();
        Self {
            id: Uuid::new_v4().to_string(),
            title: title.into(),
            description: String::new(),
            status: TaskStatus::Todo,
            priority: TaskPriority::default(),
            task_type: default_task_type(),
            dependencies: Vec::new(),
            created_by: created_by.into(),
            assigned_to: None,
            collaborators: Vec::new(),
            watchers: Vec::new(),
            action_log: Vec::new(),
            created_at: now.clone(),
            updated_at: now,
        }
    }

    /// Refresh `updated_at` to the current time.
    pub fn touch(&mut self) {
        self.updated_at = now_string();
    }

    /// Seconds elapsed since `updated_at`.
    ///
    /// Returns `None` when the timestamp does not parse; callers treat an
    /// unparseable timestamp as immediately stale.
    pub fn seconds_since_update(&self) -> Option<i64> {
        let parsed = chrono::DateTime::parse_from_rfc3339(&self.updated_at).ok()?;
        Some((Utc::now() - parsed.with_timezone(&Utc)).num_seconds())
    }

    /// Append an action-log entry, refreshing `updated_at`.
    pub fn log_action(&mut self, entry: ActionLogEntry) {
        self.action_log.push(entry);
        self.touch();
    }
}

/// Specification for a task to be created (by the seed provider or by an
/// automation rule action).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TaskSeed {
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub priority: TaskPriority,
    #[serde(rename = "type", default = "default_task_type")]
    pub task_type: String,
    #[serde(default)]
    pub dependencies: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub assigned_to: Option<String>,
}

impl TaskSeed {
    /// Materialize the seed into a concrete `todo` task.
    pub fn into_task(self, created_by: &str) -> Task {
        let mut task = Task::new(self.title, created_by);
        task.description = self.description;
        task.priority = self.priority;
        task.task_type = self.task_type;
        task.dependencies = self.dependencies;
        task.assigned_to = self.assigned_to;
        task
    }
}
