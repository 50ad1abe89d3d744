//! Task storage with pluggable backends.
//!
//! The scheduler only depends on the `TaskStore` trait; persistence is an
//! external collaborator. The crate ships an in-memory backend that doubles
//! as the test store and as the store for non-persistent deployments.

mod memory;

pub use memory::InMemoryTaskStore;

use async_trait::async_trait;
use thiserror::Error;

use crate::task::Task;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("task not found: {0}")]
    NotFound(String),

    #[error("storage backend error: {0}")]
    Backend(String),
}

/// Task store trait - implemented by all storage backends.
///
/// All operations are idempotent and immediately consistent for this process.
#[async_trait]
pub trait TaskStore: Send + Sync {
    /// All tasks, in insertion order.
    async fn get_all(&self) -> Result<Vec<Task>, StoreError>;

    /// A single task by id.
    async fn get(&self, id: &str) -> Result<Option<Task>, StoreError>;

    /// Insert or replace a task. Publishes the matching lifecycle events.
    async fn put(&self, task: Task) -> Result<(), StoreError>;

    /// Delete a task by id. Returns `false` when the id was unknown.
    async fn delete(&self, id: &str) -> Result<bool, StoreError>;
}
