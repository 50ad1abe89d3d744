//! Applies rule effects to the task store.
//!
//! The engine only emits typed `RuleEffect` messages; this driver owns the
//! listener end, applies each mutation through the store, and relies on the
//! store to re-publish the resulting lifecycle events (which may in turn
//! trigger further rules).

use std::sync::Arc;

use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::engine::RuleEngine;
use super::types::RuleEffect;
use crate::events::EventBus;
use crate::store::{StoreError, TaskStore};

/// Actor recorded as `created_by` for rule-created tasks.
const AUTOMATION_ACTOR: &str = "automation";

/// Apply a single effect to the store.
pub async fn apply_effect(store: &dyn TaskStore, effect: RuleEffect) -> Result<(), StoreError> {
    match effect {
        RuleEffect::TaskCreate { seed } => {
            let task = seed.into_task(AUTOMATION_ACTOR);
            info!("automation creating task '{}' ({})", task.title, task.id);
            store.put(task).await
        }
        RuleEffect::TaskUpdate {
            task_id,
            status,
            title,
            description,
        } => {
            let mut task = store
                .get(&task_id)
                .await?
                .ok_or_else(|| StoreError::NotFound(task_id.clone()))?;
            if let Some(status) = status {
                task.status = status;
            }
            if let Some(title) = title {
                task.title = title;
            }
            if let Some(description) = description {
                task.description = description;
            }
            task.touch();
            store.put(task).await
        }
        RuleEffect::PrioritySet { task_id, priority } => {
            let mut task = store
                .get(&task_id)
                .await?
                .ok_or_else(|| StoreError::NotFound(task_id.clone()))?;
            task.priority = priority;
            task.touch();
            store.put(task).await
        }
        RuleEffect::UserAssign {
            task_id,
            assigned_to,
        } => {
            let mut task = store
                .get(&task_id)
                .await?
                .ok_or_else(|| StoreError::NotFound(task_id.clone()))?;
            task.assigned_to = Some(assigned_to);
            task.touch();
            store.put(task).await
        }
        RuleEffect::Notify {
            task_id,
            message,
            recipients,
        } => {
            // Notification delivery is an external concern; surface it in
            // the log stream for now.
            info!(
                "notification for task {}: {} (recipients: {:?})",
                task_id, message, recipients
            );
            Ok(())
        }
    }
}

/// Handles for the two background loops of a running rule driver.
pub struct RuleDriverHandle {
    pub event_loop: JoinHandle<()>,
    pub effect_loop: JoinHandle<()>,
}

impl RuleDriverHandle {
    pub fn abort(&self) {
        self.event_loop.abort();
        self.effect_loop.abort();
    }
}

/// Wire the rule engine into the event bus and the store.
///
/// Spawns two tasks: one evaluating rules for every lifecycle event, one
/// draining the effect channel into store mutations.
pub async fn spawn_rule_driver(
    engine: Arc<Mutex<RuleEngine>>,
    store: Arc<dyn TaskStore>,
    bus: &EventBus,
) -> RuleDriverHandle {
    let mut events = bus.subscribe();
    let effect_rx = engine.lock().await.register_listener();

    let event_engine = Arc::clone(&engine);
    let event_store = Arc::clone(&store);
    let event_loop = tokio::spawn(async move {
        loop {
            let event = match events.recv().await {
                Ok(event) => event,
                Err(tokio::sync::broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!("rule driver lagged, skipped {} event(s)", skipped);
                    continue;
                }
                Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
            };

            let snapshot = match event_store.get_all().await {
                Ok(snapshot) => snapshot,
                Err(e) => {
                    warn!("rule driver could not load snapshot: {}", e);
                    continue;
                }
            };

            let results = event_engine
                .lock()
                .await
                .process(event.kind(), &event.payload(), &snapshot);
            for result in results.iter().filter(|r| !r.success) {
                debug!(
                    "rule '{}' did not run: {}",
                    result.rule_name,
                    result.error.as_deref().unwrap_or("unknown")
                );
            }
        }
    });

    let effect_loop = tokio::spawn(effect_apply_loop(effect_rx, store));

    RuleDriverHandle {
        event_loop,
        effect_loop,
    }
}

async fn effect_apply_loop(
    mut effects: mpsc::UnboundedReceiver<RuleEffect>,
    store: Arc<dyn TaskStore>,
) {
    while let Some(effect) = effects.recv().await {
        if let Err(e) = apply_effect(store.as_ref(), effect).await {
            warn!("failed to apply rule effect: {}", e);
        }
    }
}
