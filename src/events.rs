//! Task lifecycle event bus.
//!
//! The store publishes an event for every observable mutation; the automation
//! rule engine (and any dashboard push channel) subscribes. Delivery is
//! best-effort broadcast: publishing with no subscribers is not an error.

use serde_json::{json, Value};
use tokio::sync::broadcast;
use tracing::debug;

use crate::task::{Task, TaskPriority, TaskStatus};

/// A task lifecycle event.
#[derive(Debug, Clone)]
pub enum TaskEvent {
    Created {
        task: Task,
    },
    Updated {
        task: Task,
    },
    Deleted {
        task_id: String,
    },
    StatusChanged {
        task: Task,
        previous: TaskStatus,
        new: TaskStatus,
    },
    PriorityChanged {
        task: Task,
        previous: TaskPriority,
        new: TaskPriority,
    },
    Assigned {
        task: Task,
        assigned_to: Option<String>,
    },
}

impl TaskEvent {
    /// Stable event-type name, used for rule trigger matching.
    pub fn kind(&self) -> &'static str {
        match self {
            TaskEvent::Created { .. } => "task_created",
            TaskEvent::Updated { .. } => "task_updated",
            TaskEvent::Deleted { .. } => "task_deleted",
            TaskEvent::StatusChanged { .. } => "task_status_changed",
            TaskEvent::PriorityChanged { .. } => "task_priority_changed",
            TaskEvent::Assigned { .. } => "task_assigned",
        }
    }

    /// Event payload as loose JSON, the shape the rule engine's context
    /// builder consumes.
    pub fn payload(&self) -> Value {
        match self {
            TaskEvent::Created { task } | TaskEvent::Updated { task } => {
                json!({ "task": task })
            }
            TaskEvent::Deleted { task_id } => json!({ "task_id": task_id }),
            TaskEvent::StatusChanged {
                task,
                previous,
                new,
            } => json!({
                "task": task,
                "previous_status": previous.to_string(),
                "new_status": new.to_string(),
            }),
            TaskEvent::PriorityChanged {
                task,
                previous,
                new,
            } => json!({
                "task": task,
                "previous_priority": previous.to_string(),
                "new_priority": new.to_string(),
            }),
            TaskEvent::Assigned { task, assigned_to } => json!({
                "task": task,
                "assigned_to": assigned_to,
            }),
        }
    }
}

/// Broadcast channel for task lifecycle events.
#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<TaskEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _rx) = broadcast::channel(capacity);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<TaskEvent> {
        self.tx.subscribe()
    }

    /// Publish an event. Lagging or absent subscribers are not an error.
    pub fn publish(&self, event: TaskEvent) {
        let kind = event.kind();
        match self.tx.send(event) {
            Ok(n) => debug!("published {} to {} subscriber(s)", kind, n),
            Err(_) => debug!("published {} with no subscribers", kind),
        }
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(256)
    }
}
