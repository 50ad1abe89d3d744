//! taskpilot - Scheduler Entry Point
//!
//! Wires the store, rule engine, workflow table, and agent executor
//! together and runs the orchestration loop until interrupted.

use std::sync::Arc;

use taskpilot::agent::AgentExecutor;
use taskpilot::config::Config;
use taskpilot::events::EventBus;
use taskpilot::rules::{spawn_rule_driver, AutomationRule, RuleEngine};
use taskpilot::scheduler::Scheduler;
use taskpilot::store::{InMemoryTaskStore, TaskStore};
use taskpilot::workflow::{default_table, WorkflowEngine};
use tokio::sync::Mutex;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "taskpilot=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    let config = Config::from_env()?;
    info!(
        "Loaded configuration: agent={}, working_dir={}",
        config.agent_path,
        config.working_dir.display()
    );

    let bus = EventBus::default();
    let store: Arc<dyn TaskStore> = Arc::new(InMemoryTaskStore::with_bus(bus.clone()));

    // Automation rules
    let mut engine = RuleEngine::new();
    if let Some(path) = &config.rules_file {
        match load_rules(path) {
            Ok(rules) => {
                info!("Loaded {} automation rule(s) from {}", rules.len(), path.display());
                engine.load_rules(rules);
            }
            Err(e) => warn!(
                "Could not load rules from {}: {}. Continuing without automation.",
                path.display(),
                e
            ),
        }
    }
    let engine = Arc::new(Mutex::new(engine));
    let _rule_driver = spawn_rule_driver(Arc::clone(&engine), Arc::clone(&store), &bus).await;

    // Workflow and executor
    let (table, initial_state) = default_table();
    let workflow = WorkflowEngine::new(Arc::new(table), &initial_state)?;
    let executor = Arc::new(AgentExecutor::new(
        config.agent_client_config(),
        config.working_dir.clone(),
    ));

    let mut scheduler = Scheduler::new(store, workflow, executor);

    info!("Starting scheduler loop (ctrl-c to stop)");
    tokio::select! {
        _ = scheduler.run() => {}
        _ = tokio::signal::ctrl_c() => {
            info!("Interrupt received, shutting down");
        }
    }

    Ok(())
}

fn load_rules(path: &std::path::Path) -> anyhow::Result<Vec<AutomationRule>> {
    let raw = std::fs::read_to_string(path)?;
    Ok(serde_json::from_str(&raw)?)
}
