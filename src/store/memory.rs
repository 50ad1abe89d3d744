//! In-memory task store (non-persistent).

use async_trait::async_trait;
use tokio::sync::RwLock;
use tracing::debug;

use super::{StoreError, TaskStore};
use crate::events::{EventBus, TaskEvent};
use crate::task::Task;

/// In-memory store backed by a `Vec` to preserve insertion order, which the
/// scheduler relies on for tie-breaking.
pub struct InMemoryTaskStore {
    tasks: RwLock<Vec<Task>>,
    bus: Option<EventBus>,
}

impl InMemoryTaskStore {
    pub fn new() -> Self {
        Self {
            tasks: RwLock::new(Vec::new()),
            bus: None,
        }
    }

    /// Create a store that publishes lifecycle events to `bus` on mutation.
    pub fn with_bus(bus: EventBus) -> Self {
        Self {
            tasks: RwLock::new(Vec::new()),
            bus: Some(bus),
        }
    }

    fn publish(&self, event: TaskEvent) {
        if let Some(bus) = &self.bus {
            bus.publish(event);
        }
    }

    /// Events derived from replacing `previous` with `updated`.
    fn change_events(previous: &Task, updated: &Task) -> Vec<TaskEvent> {
        let mut events = vec![TaskEvent::Updated {
            task: updated.clone(),
        }];
        if previous.status != updated.status {
            events.push(TaskEvent::StatusChanged {
                task: updated.clone(),
                previous: previous.status,
                new: updated.status,
            });
        }
        if previous.priority != updated.priority {
            events.push(TaskEvent::PriorityChanged {
                task: updated.clone(),
                previous: previous.priority,
                new: updated.priority,
            });
        }
        if previous.assigned_to != updated.assigned_to {
            events.push(TaskEvent::Assigned {
                task: updated.clone(),
                assigned_to: updated.assigned_to.clone(),
            });
        }
        events
    }
}

impl Default for InMemoryTaskStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl TaskStore for InMemoryTaskStore {
    async fn get_all(&self) -> Result<Vec<Task>, StoreError> {
        Ok(self.tasks.read().await.clone())
    }

    async fn get(&self, id: &str) -> Result<Option<Task>, StoreError> {
        Ok(self.tasks.read().await.iter().find(|t| t.id == id).cloned())
    }

    async fn put(&self, task: Task) -> Result<(), StoreError> {
        let mut tasks = self.tasks.write().await;
        match tasks.iter_mut().find(|t| t.id == task.id) {
            Some(existing) => {
                let previous = existing.clone();
                *existing = task.clone();
                drop(tasks);
                debug!("updated task {}", task.id);
                for event in Self::change_events(&previous, &task) {
                    self.publish(event);
                }
            }
            None => {
                tasks.push(task.clone());
                drop(tasks);
                debug!("created task {}", task.id);
                self.publish(TaskEvent::Created { task });
            }
        }
        Ok(())
    }

    async fn delete(&self, id: &str) -> Result<bool, StoreError> {
        let mut tasks = self.tasks.write().await;
        let before = tasks.len();
        tasks.retain(|t| t.id != id);
        let removed = tasks.len() < before;
        drop(tasks);
        if removed {
            self.publish(TaskEvent::Deleted {
                task_id: id.to_string(),
            });
        }
        Ok(removed)
    }
}
