//! Automation rule engine.
//!
//! Rules react to task lifecycle events: a trigger names the event type,
//! AND-combined conditions gate on the execution context, and actions emit
//! typed side-effect messages. The engine never mutates the task store
//! directly; effects flow through registered listener channels and are
//! applied by the driver in `apply`.

mod apply;
mod engine;
mod types;

pub use apply::{apply_effect, spawn_rule_driver, RuleDriverHandle};
pub use engine::{substitute_templates, RuleEngine, RuleExecutionContext};
pub use types::{
    AutomationRule, ConditionOperator, RuleAction, RuleCondition, RuleEffect,
    RuleExecutionResult, RuleTrigger,
};
