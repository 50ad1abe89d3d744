//! Rule evaluation: context building, condition matching, action execution.

use serde_json::{json, Value};
use tokio::sync::mpsc;
use tracing::{debug, warn};

use super::types::{
    AutomationRule, ConditionOperator, RuleAction, RuleCondition, RuleEffect,
    RuleExecutionResult,
};
use crate::task::{Task, TaskSeed};

/// Ephemeral context built per event, resolved against by rule conditions.
#[derive(Debug, Clone)]
pub struct RuleExecutionContext {
    /// Context document for dotted-path resolution:
    /// `{trigger, task, related_tasks, previous_*/new_* when applicable}`.
    document: Value,
    task_id: String,
}

impl RuleExecutionContext {
    /// Build a context from a raw event payload.
    ///
    /// Extraction is event-type specific: change events carry before/after
    /// values, and `task_deleted` carries only an id, for which a minimal
    /// placeholder task is synthesized when the task is no longer in the
    /// snapshot. Malformed payloads are an error, not a panic.
    pub fn build(event_type: &str, payload: &Value, snapshot: &[Task]) -> Result<Self, String> {
        let mut doc = serde_json::Map::new();
        doc.insert("trigger".to_string(), json!(event_type));
        doc.insert("related_tasks".to_string(), json!(snapshot));

        let task = match event_type {
            "task_created" | "task_updated" | "task_status_changed" | "task_priority_changed"
            | "task_assigned" => {
                let task = payload.get("task").cloned().unwrap_or(Value::Null);
                if !task.is_object() {
                    return Err(format!("{} payload is missing a task object", event_type));
                }
                task
            }
            "task_deleted" => {
                let task_id = payload
                    .get("task_id")
                    .and_then(|v| v.as_str())
                    .ok_or_else(|| "task_deleted payload is missing task_id".to_string())?;
                match snapshot.iter().find(|t| t.id == task_id) {
                    Some(task) => serde_json::to_value(task)
                        .map_err(|e| format!("failed to serialize task: {}", e))?,
                    // The task is already gone; synthesize a placeholder so
                    // conditions on task.id still resolve.
                    None => json!({
                        "id": task_id,
                        "title": "(deleted task)",
                        "status": "todo",
                        "priority": "medium",
                    }),
                }
            }
            other => return Err(format!("unsupported event type: {}", other)),
        };

        let task_id = task
            .get("id")
            .and_then(|v| v.as_str())
            .ok_or_else(|| format!("{} payload task has no id", event_type))?
            .to_string();

        doc.insert("task".to_string(), task);
        for key in [
            "previous_status",
            "new_status",
            "previous_priority",
            "new_priority",
            "assigned_to",
        ] {
            if let Some(value) = payload.get(key) {
                doc.insert(key.to_string(), value.clone());
            }
        }

        Ok(Self {
            document: Value::Object(doc),
            task_id,
        })
    }

    /// Id of the subject task, the target for mutation effects.
    pub fn task_id(&self) -> &str {
        &self.task_id
    }

    /// The subject task as JSON (used by template substitution).
    pub fn task(&self) -> &Value {
        self.document.get("task").unwrap_or(&Value::Null)
    }

    /// Resolve a dotted field path; any missing segment yields `Null`.
    pub fn resolve_path(&self, path: &str) -> Value {
        let mut current = &self.document;
        for segment in path.split('.') {
            current = match current.get(segment) {
                Some(value) => value,
                None => return Value::Null,
            };
        }
        current.clone()
    }
}

/// Substitute `{task.*}` template variables in a string parameter.
pub fn substitute_templates(input: &str, task: &Value) -> String {
    let mut out = input.to_string();
    for (var, path) in [
        ("{task.id}", "id"),
        ("{task.title}", "title"),
        ("{task.status}", "status"),
        ("{task.priority}", "priority"),
    ] {
        if out.contains(var) {
            let replacement = match task.get(path) {
                Some(Value::String(s)) => s.clone(),
                Some(other) => other.to_string(),
                None => String::new(),
            };
            out = out.replace(var, &replacement);
        }
    }
    out
}

fn evaluate_condition(condition: &RuleCondition, context: &RuleExecutionContext) -> bool {
    let actual = context.resolve_path(&condition.field);
    let expected = &condition.value;

    match condition.operator {
        ConditionOperator::Equals => &actual == expected,
        ConditionOperator::NotEquals => &actual != expected,
        ConditionOperator::Contains => match (&actual, expected) {
            (Value::String(haystack), Value::String(needle)) => haystack.contains(needle.as_str()),
            (Value::Array(items), needle) => items.contains(needle),
            // Type-mismatched comparison: false, never an error.
            _ => false,
        },
        ConditionOperator::GreaterThan => match (actual.as_f64(), expected.as_f64()) {
            (Some(a), Some(b)) => a > b,
            _ => false,
        },
        ConditionOperator::LessThan => match (actual.as_f64(), expected.as_f64()) {
            (Some(a), Some(b)) => a < b,
            _ => false,
        },
    }
}

/// The rule engine: a loaded rule list plus registered effect listeners.
///
/// Stateless across `process` calls; the rule list and listener set are
/// mutated only through explicit management operations (single writer).
pub struct RuleEngine {
    rules: Vec<AutomationRule>,
    effect_senders: Vec<mpsc::UnboundedSender<RuleEffect>>,
}

impl RuleEngine {
    pub fn new() -> Self {
        Self {
            rules: Vec::new(),
            effect_senders: Vec::new(),
        }
    }

    /// Replace the whole rule list (startup load from external storage).
    pub fn load_rules(&mut self, rules: Vec<AutomationRule>) {
        debug!("loaded {} automation rule(s)", rules.len());
        self.rules = rules;
    }

    pub fn add_rule(&mut self, rule: AutomationRule) {
        self.rules.push(rule);
    }

    /// Remove a rule by id. Returns `false` when the id was unknown.
    pub fn remove_rule(&mut self, rule_id: &str) -> bool {
        let before = self.rules.len();
        self.rules.retain(|r| r.id != rule_id);
        self.rules.len() < before
    }

    pub fn rules(&self) -> &[AutomationRule] {
        &self.rules
    }

    /// Register an effect listener; returns the receiving end.
    pub fn register_listener(&mut self) -> mpsc::UnboundedReceiver<RuleEffect> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.effect_senders.push(tx);
        rx
    }

    fn emit(&self, effect: &RuleEffect) {
        for sender in &self.effect_senders {
            if sender.send(effect.clone()).is_err() {
                debug!("rule effect listener dropped");
            }
        }
    }

    /// Evaluate all enabled rules matching `event_type`, in registration
    /// order. A rule failing (context error, unmet conditions, or action
    /// error) never prevents evaluation of subsequent rules.
    pub fn process(
        &self,
        event_type: &str,
        payload: &Value,
        snapshot: &[Task],
    ) -> Vec<RuleExecutionResult> {
        let matching: Vec<&AutomationRule> = self
            .rules
            .iter()
            .filter(|r| r.enabled && r.trigger.event_type == event_type)
            .collect();
        if matching.is_empty() {
            return Vec::new();
        }

        let context = RuleExecutionContext::build(event_type, payload, snapshot);

        matching
            .into_iter()
            .map(|rule| match &context {
                Err(e) => {
                    warn!("rule '{}' context build failed: {}", rule.name, e);
                    RuleExecutionResult::failed(rule, e.clone())
                }
                Ok(ctx) => self.evaluate_rule(rule, ctx),
            })
            .collect()
    }

    fn evaluate_rule(
        &self,
        rule: &AutomationRule,
        context: &RuleExecutionContext,
    ) -> RuleExecutionResult {
        // Conditions are AND-combined; an empty list always passes.
        if !rule
            .conditions
            .iter()
            .all(|c| evaluate_condition(c, context))
        {
            return RuleExecutionResult::failed(rule, "Conditions not met");
        }

        for (index, action) in rule.actions.iter().enumerate() {
            if let Err(e) = self.execute_action(action, context) {
                warn!("rule '{}' action {} failed: {}", rule.name, index, e);
                return RuleExecutionResult::failed(rule, e);
            }
        }

        debug!(
            "rule '{}' executed {} action(s)",
            rule.name,
            rule.actions.len()
        );
        RuleExecutionResult::ok(rule, json!({ "actions_executed": rule.actions.len() }))
    }

    fn execute_action(
        &self,
        action: &RuleAction,
        context: &RuleExecutionContext,
    ) -> Result<(), String> {
        let task = context.task();
        match action {
            RuleAction::CreateTask {
                title,
                description,
                priority,
                task_type,
                assigned_to,
            } => {
                let title = substitute_templates(title, task);
                if title.trim().is_empty() {
                    return Err("create_task requires a non-empty title".to_string());
                }
                self.emit(&RuleEffect::TaskCreate {
                    seed: TaskSeed {
                        title,
                        description: substitute_templates(description, task),
                        priority: priority.unwrap_or_default(),
                        task_type: task_type.clone().unwrap_or_else(|| "task".to_string()),
                        dependencies: Vec::new(),
                        assigned_to: assigned_to.clone(),
                    },
                });
            }
            RuleAction::UpdateTask {
                status,
                title,
                description,
            } => {
                if status.is_none() && title.is_none() && description.is_none() {
                    return Err("update_task requires at least one field to update".to_string());
                }
                self.emit(&RuleEffect::TaskUpdate {
                    task_id: context.task_id().to_string(),
                    status: *status,
                    title: title.as_deref().map(|t| substitute_templates(t, task)),
                    description: description.as_deref().map(|d| substitute_templates(d, task)),
                });
            }
            RuleAction::SetPriority { priority } => {
                self.emit(&RuleEffect::PrioritySet {
                    task_id: context.task_id().to_string(),
                    priority: *priority,
                });
            }
            RuleAction::AssignUser { assigned_to } => {
                self.emit(&RuleEffect::UserAssign {
                    task_id: context.task_id().to_string(),
                    assigned_to: substitute_templates(assigned_to, task),
                });
            }
            RuleAction::SendNotification {
                message,
                recipients,
            } => {
                self.emit(&RuleEffect::Notify {
                    task_id: context.task_id().to_string(),
                    message: substitute_templates(message, task),
                    recipients: recipients.clone(),
                });
            }
        }
        Ok(())
    }
}

impl Default for RuleEngine {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rules::types::RuleTrigger;
    use crate::task::{now_string, TaskPriority};

    fn rule(name: &str, trigger: &str) -> AutomationRule {
        AutomationRule {
            id: format!("rule-{}", name),
            name: name.to_string(),
            trigger: RuleTrigger {
                event_type: trigger.to_string(),
            },
            conditions: Vec::new(),
            actions: Vec::new(),
            enabled: true,
            created_at: now_string(),
        }
    }

    fn created_payload(task: &Task) -> Value {
        json!({ "task": task })
    }

    #[test]
    fn rule_with_zero_conditions_always_passes() {
        let mut engine = RuleEngine::new();
        let mut r = rule("no-conditions", "task_created");
        r.actions.push(RuleAction::SendNotification {
            message: "created {task.title}".to_string(),
            recipients: vec![],
        });
        engine.add_rule(r);

        let task = Task::new("anything", "tester");
        let results = engine.process("task_created", &created_payload(&task), &[task.clone()]);
        assert_eq!(results.len(), 1);
        assert!(results[0].success);
    }

    #[test]
    fn unmet_condition_reports_conditions_not_met() {
        // Trigger task_created, condition task.priority equals "high",
        // fired on a low-priority task.
        let mut engine = RuleEngine::new();
        let mut r = rule("high-only", "task_created");
        r.conditions.push(RuleCondition {
            field: "task.priority".to_string(),
            operator: ConditionOperator::Equals,
            value: json!("high"),
        });
        r.actions.push(RuleAction::AssignUser {
            assigned_to: "lead".to_string(),
        });
        engine.add_rule(r);

        let mut task = Task::new("low prio", "tester");
        task.priority = TaskPriority::Low;
        let results = engine.process("task_created", &created_payload(&task), &[task.clone()]);
        assert_eq!(results.len(), 1);
        assert!(!results[0].success);
        assert_eq!(results[0].error.as_deref(), Some("Conditions not met"));
    }

    #[test]
    fn failing_rule_does_not_stop_subsequent_rules() {
        let mut engine = RuleEngine::new();
        let mut exploding = rule("exploding", "task_created");
        // Substitutes to an empty title, which action execution rejects.
        exploding.actions.push(RuleAction::CreateTask {
            title: "".to_string(),
            description: String::new(),
            priority: None,
            task_type: None,
            assigned_to: None,
        });
        let mut healthy = rule("healthy", "task_created");
        healthy.actions.push(RuleAction::SetPriority {
            priority: TaskPriority::High,
        });
        engine.add_rule(exploding);
        engine.add_rule(healthy);

        let task = Task::new("subject", "tester");
        let results = engine.process("task_created", &created_payload(&task), &[task.clone()]);
        assert_eq!(results.len(), 2);
        assert!(!results[0].success);
        assert!(results[0].error.as_deref().unwrap().contains("title"));
        assert!(results[1].success);
    }

    #[test]
    fn rules_evaluate_in_registration_order() {
        let mut engine = RuleEngine::new();
        engine.add_rule(rule("first", "task_created"));
        engine.add_rule(rule("second", "task_created"));
        let task = Task::new("subject", "tester");
        let results = engine.process("task_created", &created_payload(&task), &[task.clone()]);
        assert_eq!(results[0].rule_name, "first");
        assert_eq!(results[1].rule_name, "second");
    }

    #[test]
    fn disabled_rule_is_skipped() {
        let mut engine = RuleEngine::new();
        let mut r = rule("off", "task_created");
        r.enabled = false;
        engine.add_rule(r);
        let task = Task::new("subject", "tester");
        let results = engine.process("task_created", &created_payload(&task), &[task.clone()]);
        assert!(results.is_empty());
    }

    #[test]
    fn contains_on_non_string_is_false_not_an_error() {
        let mut engine = RuleEngine::new();
        let mut r = rule("contains-mismatch", "task_created");
        r.conditions.push(RuleCondition {
            // contains over an array that holds no matching value
            field: "task.action_log".to_string(),
            operator: ConditionOperator::Contains,
            value: json!("anything"),
        });
        engine.add_rule(r);
        let task = Task::new("subject", "tester");
        let results = engine.process("task_created", &created_payload(&task), &[task.clone()]);
        assert!(!results[0].success);
        assert_eq!(results[0].error.as_deref(), Some("Conditions not met"));
    }

    #[test]
    fn missing_path_segment_resolves_to_null() {
        let task = Task::new("subject", "tester");
        let ctx = RuleExecutionContext::build(
            "task_created",
            &created_payload(&task),
            &[task.clone()],
        )
        .unwrap();
        assert_eq!(ctx.resolve_path("task.no.such.field"), Value::Null);
        assert_eq!(ctx.resolve_path("trigger"), json!("task_created"));
    }

    #[test]
    fn numeric_comparisons_require_numbers() {
        let mut task = Task::new("subject", "tester");
        task.dependencies = vec!["a".into(), "b".into()];
        let ctx = RuleExecutionContext::build(
            "task_created",
            &created_payload(&task),
            &[task.clone()],
        )
        .unwrap();
        let gt_string = RuleCondition {
            field: "task.title".to_string(),
            operator: ConditionOperator::GreaterThan,
            value: json!(1),
        };
        assert!(!evaluate_condition(&gt_string, &ctx));
    }

    #[test]
    fn template_substitution_covers_all_variables() {
        let mut task = Task::new("My Title", "tester");
        task.priority = TaskPriority::High;
        let task_json = serde_json::to_value(&task).unwrap();
        let rendered = substitute_templates(
            "follow-up for {task.title} ({task.id}) [{task.status}/{task.priority}]",
            &task_json,
        );
        assert!(rendered.contains("My Title"));
        assert!(rendered.contains(&task.id));
        assert!(rendered.contains("todo"));
        assert!(rendered.contains("high"));
    }

    #[test]
    fn create_task_effect_reaches_listener_with_substituted_title() {
        let mut engine = RuleEngine::new();
        let mut rx = engine.register_listener();
        let mut r = rule("follow-up", "task_status_changed");
        r.conditions.push(RuleCondition {
            field: "new_status".to_string(),
            operator: ConditionOperator::Equals,
            value: json!("done"),
        });
        r.actions.push(RuleAction::CreateTask {
            title: "Verify {task.title}".to_string(),
            description: String::new(),
            priority: Some(TaskPriority::High),
            task_type: None,
            assigned_to: None,
        });
        engine.add_rule(r);

        let task = Task::new("deploy", "tester");
        let payload = json!({
            "task": task,
            "previous_status": "in-progress",
            "new_status": "done",
        });
        let results = engine.process("task_status_changed", &payload, &[task]);
        assert!(results[0].success);

        match rx.try_recv().unwrap() {
            RuleEffect::TaskCreate { seed } => {
                assert_eq!(seed.title, "Verify deploy");
                assert_eq!(seed.priority, TaskPriority::High);
            }
            other => panic!("expected TaskCreate effect, got {:?}", other),
        }
    }

    #[test]
    fn deleted_task_gets_synthesized_placeholder() {
        let payload = json!({ "task_id": "ghost-42" });
        let ctx = RuleExecutionContext::build("task_deleted", &payload, &[]).unwrap();
        assert_eq!(ctx.task_id(), "ghost-42");
        assert_eq!(ctx.resolve_path("task.title"), json!("(deleted task)"));
    }

    #[test]
    fn malformed_payload_fails_per_rule_without_panicking() {
        let mut engine = RuleEngine::new();
        engine.add_rule(rule("r1", "task_created"));
        engine.add_rule(rule("r2", "task_created"));
        let results = engine.process("task_created", &json!({}), &[]);
        assert_eq!(results.len(), 2);
        assert!(results.iter().all(|r| !r.success));
        assert!(results[0]
            .error
            .as_deref()
            .unwrap()
            .contains("missing a task object"));
    }

    #[test]
    fn remove_rule_by_id() {
        let mut engine = RuleEngine::new();
        engine.add_rule(rule("gone", "task_created"));
        assert!(engine.remove_rule("rule-gone"));
        assert!(!engine.remove_rule("rule-gone"));
        assert!(engine.rules().is_empty());
    }
}
