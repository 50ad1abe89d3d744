//! Task module - the unit of work the scheduler dispatches.
//!
//! - Status and priority are closed enums with explicit wire names
//! - The action log is append-only; entries are never rewritten
//! - Timestamps are RFC3339 strings (see `now_string`)

mod types;

pub use types::{now_string, ActionLogEntry, Task, TaskPriority, TaskSeed, TaskStatus};
