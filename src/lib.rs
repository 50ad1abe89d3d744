//! # taskpilot
//!
//! Self-hosted dependency-aware task orchestrator for AI coding agents.
//!
//! This library provides:
//! - A dependency graph analyzer (cycles, dangling refs, ready/blocked partitions)
//! - A workflow-gated scheduling loop with retry and stale-task recovery
//! - An automation rule engine reacting to task lifecycle events
//! - A line-delimited JSON-RPC client for external agent worker processes
//!
//! ## Architecture
//!
//! ```text
//!   ┌───────────┐   snapshot   ┌──────────────────┐
//!   │ TaskStore ├─────────────►│    Scheduler     │
//!   └─────┬─────┘              │ (workflow-gated) │
//!         │ events             └────────┬─────────┘
//!         ▼                             │ dispatch
//!   ┌───────────┐              ┌────────▼─────────┐
//!   │ RuleEngine│              │  AgentExecutor   │
//!   │ (effects) │              │ (JSON-RPC stdio) │
//!   └───────────┘              └──────────────────┘
//! ```
//!
//! ## Task Flow
//! 1. The scheduler loads the task snapshot and asks the workflow table for
//!    the current phase and transition
//! 2. The graph analyzer partitions tasks into ready/blocked
//! 3. One task is dispatched to a spawned agent process per iteration
//! 4. Success/failure drives the workflow transition, the action log, and
//!    lifecycle events the rule engine reacts to
//!
//! ## Modules
//! - `scheduler`: the orchestration loop and its executor/seed seams
//! - `graph`: pure dependency analysis over a task snapshot
//! - `rules`: trigger/condition/action automation with effect channels
//! - `agent`: the agent execution protocol client

pub mod agent;
pub mod config;
pub mod events;
pub mod graph;
pub mod rules;
pub mod scheduler;
pub mod store;
pub mod task;
pub mod workflow;

pub use config::Config;
pub use events::{EventBus, TaskEvent};
pub use scheduler::{Scheduler, SchedulerConfig};
pub use store::{InMemoryTaskStore, TaskStore};
pub use task::{Task, TaskPriority, TaskStatus};
