//! Operator-defined guardrails evaluated before an action executes.
//!
//! Rules are iterated in priority order; the first failing rule
//! short-circuits evaluation with its reason. Confirmation and sandbox
//! rules never fail an invocation on their own, they raise flags the
//! dispatcher acts on. Rule configuration is opaque per type and is
//! never echoed back to callers, only the human-readable reason.

use std::sync::RwLock;
use std::time::Duration as StdDuration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::actions::ActionDefinition;
use crate::ratelimit::FixedWindowLimiter;
use crate::reputation::ReputationRecord;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GuardrailKind {
    Limit,
    RateLimit,
    Confirmation,
    Reputation,
    Sandbox,
    Blacklist,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GuardrailRule {
    pub id: Uuid,
    pub name: String,
    pub kind: GuardrailKind,
    /// Type-specific configuration. Opaque to everything but the matching
    /// check; never leaked to callers.
    pub config: Value,
    pub enabled: bool,
    /// Lower priority evaluates first.
    pub priority: i32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl GuardrailRule {
    pub fn new(name: &str, kind: GuardrailKind, config: Value, priority: i32) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::now_v7(),
            name: name.to_string(),
            kind,
            config,
            enabled: true,
            priority,
            created_at: now,
            updated_at: now,
        }
    }
}

/// What the engine needs to know about one invocation.
pub struct GuardrailContext<'a> {
    pub agent_id: Uuid,
    pub reputation: &'a ReputationRecord,
    pub arguments: &'a Value,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GuardrailDecision {
    pub allow: bool,
    pub reason: Option<String>,
    pub requires_confirmation: bool,
    /// Advisory: a sandbox rule suggested simulating first.
    pub recommend_simulation: bool,
}

impl GuardrailDecision {
    fn allow() -> Self {
        Self {
            allow: true,
            reason: None,
            requires_confirmation: false,
            recommend_simulation: false,
        }
    }

    fn deny(reason: String) -> Self {
        Self {
            allow: false,
            reason: Some(reason),
            requires_confirmation: false,
            recommend_simulation: false,
        }
    }
}

/// Evaluates the enabled rule set against each invocation.
///
/// Holds its own window table for action-scoped quotas; constructed with
/// its rules and injected into the dispatcher (no global state).
pub struct GuardrailEngine {
    rules: RwLock<Vec<GuardrailRule>>,
    action_windows: FixedWindowLimiter,
}

impl GuardrailEngine {
    pub fn new(mut rules: Vec<GuardrailRule>) -> Self {
        rules.sort_by_key(|rule| rule.priority);
        Self {
            rules: RwLock::new(rules),
            action_windows: FixedWindowLimiter::with_defaults(),
        }
    }

    /// Soft-delete: rules are disabled, never removed in the hot path.
    pub fn set_enabled(&self, rule_id: Uuid, enabled: bool) -> bool {
        let mut rules = self.rules.write().unwrap_or_else(|e| e.into_inner());
        match rules.iter_mut().find(|rule| rule.id == rule_id) {
            Some(rule) => {
                rule.enabled = enabled;
                rule.updated_at = Utc::now();
                true
            }
            None => false,
        }
    }

    /// Evaluate all enabled rules in priority order. First failure wins.
    pub fn evaluate(
        &self,
        action: &ActionDefinition,
        ctx: &GuardrailContext<'_>,
    ) -> GuardrailDecision {
        let rules = self.rules.read().unwrap_or_else(|e| e.into_inner());
        let mut decision = GuardrailDecision::allow();

        for rule in rules.iter().filter(|rule| rule.enabled) {
            let outcome = match rule.kind {
                GuardrailKind::Limit => self.check_limit(rule, ctx),
                GuardrailKind::RateLimit => self.check_rate_limit(rule, action, ctx),
                GuardrailKind::Confirmation => {
                    if Self::confirmation_applies(rule, action) {
                        decision.requires_confirmation = true;
                    }
                    None
                }
                GuardrailKind::Reputation => Self::check_reputation(rule, ctx),
                GuardrailKind::Sandbox => {
                    if Self::sandbox_applies(rule, action) {
                        decision.recommend_simulation = true;
                    }
                    None
                }
                GuardrailKind::Blacklist => Self::check_blacklist(rule, ctx),
            };

            if let Some(reason) = outcome {
                tracing::info!(
                    rule = %rule.name,
                    agent_id = %ctx.agent_id,
                    action = %action.name,
                    decision = "deny",
                    "guardrail decision"
                );
                let mut denied = GuardrailDecision::deny(reason);
                denied.requires_confirmation = decision.requires_confirmation;
                denied.recommend_simulation = decision.recommend_simulation;
                return denied;
            }
        }

        tracing::debug!(
            agent_id = %ctx.agent_id,
            action = %action.name,
            decision = "allow",
            "guardrail decision"
        );
        decision
    }

    /// Numeric ceiling on an argument field: `{field, max}`.
    fn check_limit(&self, rule: &GuardrailRule, ctx: &GuardrailContext<'_>) -> Option<String> {
        let field = rule.config.get("field").and_then(Value::as_str)?;
        let max = rule.config.get("max").and_then(Value::as_f64)?;
        let value = ctx.arguments.get(field).and_then(Value::as_f64)?;
        if value > max {
            return Some(format!(
                "'{field}' exceeds the configured ceiling for rule '{}'",
                rule.name
            ));
        }
        None
    }

    /// Action-scoped quota layered on top of the transport limiter:
    /// `{limit, window_secs}`.
    fn check_rate_limit(
        &self,
        rule: &GuardrailRule,
        action: &ActionDefinition,
        ctx: &GuardrailContext<'_>,
    ) -> Option<String> {
        let limit = rule.config.get("limit").and_then(Value::as_u64)? as u32;
        let window_secs = rule
            .config
            .get("window_secs")
            .and_then(Value::as_u64)
            .unwrap_or(60);
        let key = format!("{}:{}", ctx.agent_id, action.name);
        let decision =
            self.action_windows
                .check_with(&key, limit, StdDuration::from_secs(window_secs));
        if !decision.allowed {
            return Some(format!(
                "action quota exhausted for '{}'; window resets at {}",
                action.name,
                decision.window_reset_at.to_rfc3339()
            ));
        }
        None
    }

    /// `{actions: [...]}`; empty list applies to every action that already
    /// declares `confirmation_required`.
    fn confirmation_applies(rule: &GuardrailRule, action: &ActionDefinition) -> bool {
        match rule.config.get("actions").and_then(Value::as_array) {
            Some(names) => names
                .iter()
                .filter_map(Value::as_str)
                .any(|name| name == action.name),
            None => action.confirmation_required,
        }
    }

    /// `{min_score}`: reject callers below the floor.
    fn check_reputation(rule: &GuardrailRule, ctx: &GuardrailContext<'_>) -> Option<String> {
        let min_score = rule.config.get("min_score").and_then(Value::as_u64)? as u32;
        if ctx.reputation.score < min_score {
            return Some(format!(
                "reputation tier '{}' is below the floor for rule '{}'",
                ctx.reputation.level().as_str(),
                rule.name
            ));
        }
        None
    }

    /// `{categories: [...]}`; empty applies to execute-tier actions.
    fn sandbox_applies(rule: &GuardrailRule, action: &ActionDefinition) -> bool {
        match rule.config.get("categories").and_then(Value::as_array) {
            Some(categories) => categories
                .iter()
                .filter_map(Value::as_str)
                .any(|c| c == action.category.as_str()),
            None => action.confirmation_required,
        }
    }

    /// `{max_violations}`: auto-block agents with accumulated violations.
    fn check_blacklist(rule: &GuardrailRule, ctx: &GuardrailContext<'_>) -> Option<String> {
        let max_violations = rule
            .config
            .get("max_violations")
            .and_then(Value::as_u64)
            .unwrap_or(5) as u32;
        if ctx.reputation.violations >= max_violations {
            return Some("agent is blocked after repeated guardrail violations".to_string());
        }
        None
    }
}

/// Rule set used when the operator has not supplied one.
pub fn default_rules() -> Vec<GuardrailRule> {
    vec![
        GuardrailRule::new(
            "order-amount-ceiling",
            GuardrailKind::Limit,
            serde_json::json!({"field": "amount", "max": 500.0}),
            10,
        ),
        GuardrailRule::new(
            "order-burst-quota",
            GuardrailKind::RateLimit,
            serde_json::json!({"limit": 10, "window_secs": 60}),
            20,
        ),
        GuardrailRule::new(
            "low-reputation-floor",
            GuardrailKind::Reputation,
            serde_json::json!({"min_score": 50}),
            30,
        ),
        GuardrailRule::new(
            "violation-autoblock",
            GuardrailKind::Blacklist,
            serde_json::json!({"max_violations": 5}),
            40,
        ),
        GuardrailRule::new(
            "simulate-before-commit",
            GuardrailKind::Sandbox,
            serde_json::json!({"categories": ["order"]}),
            50,
        ),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::actions::default_catalog;
    use crate::reputation::ReputationRecord;
    use serde_json::json;

    fn reputation(score: u32, violations: u32) -> ReputationRecord {
        ReputationRecord {
            agent_id: Uuid::now_v7(),
            score,
            violations,
        }
    }

    fn ctx<'a>(reputation: &'a ReputationRecord, arguments: &'a Value) -> GuardrailContext<'a> {
        GuardrailContext {
            agent_id: reputation.agent_id,
            reputation,
            arguments,
        }
    }

    fn limit_rule(priority: i32) -> GuardrailRule {
        GuardrailRule::new(
            "amount-ceiling",
            GuardrailKind::Limit,
            json!({"field": "amount", "max": 100.0}),
            priority,
        )
    }

    fn reputation_rule(priority: i32) -> GuardrailRule {
        GuardrailRule::new(
            "reputation-floor",
            GuardrailKind::Reputation,
            json!({"min_score": 500}),
            priority,
        )
    }

    #[test]
    fn limit_rule_rejects_amounts_over_ceiling() {
        let engine = GuardrailEngine::new(vec![limit_rule(1)]);
        let catalog = default_catalog();
        let action = catalog.find("create_order").unwrap();
        let rep = reputation(800, 0);

        let args = json!({"amount": 250.0});
        let decision = engine.evaluate(action, &ctx(&rep, &args));
        assert!(!decision.allow);
        assert!(decision.reason.as_deref().unwrap().contains("amount"));

        let args = json!({"amount": 99.0});
        assert!(engine.evaluate(action, &ctx(&rep, &args)).allow);
    }

    #[test]
    fn first_failing_rule_wins_in_both_orderings() {
        let catalog = default_catalog();
        let action = catalog.find("create_order").unwrap();
        let rep = reputation(100, 0);
        let args = json!({"amount": 9999.0});

        // Both the limit and the reputation rule fail for this input.
        let limit_first = GuardrailEngine::new(vec![limit_rule(1), reputation_rule(2)]);
        let decision = limit_first.evaluate(action, &ctx(&rep, &args));
        assert!(!decision.allow);
        assert!(decision.reason.as_deref().unwrap().contains("amount"));

        let reputation_first = GuardrailEngine::new(vec![reputation_rule(1), limit_rule(2)]);
        let decision = reputation_first.evaluate(action, &ctx(&rep, &args));
        assert!(!decision.allow);
        assert!(decision.reason.as_deref().unwrap().contains("reputation"));
    }

    #[test]
    fn disabled_rules_are_skipped() {
        let rule = limit_rule(1);
        let rule_id = rule.id;
        let engine = GuardrailEngine::new(vec![rule]);
        assert!(engine.set_enabled(rule_id, false));

        let catalog = default_catalog();
        let action = catalog.find("create_order").unwrap();
        let rep = reputation(800, 0);
        let args = json!({"amount": 9999.0});
        assert!(engine.evaluate(action, &ctx(&rep, &args)).allow);
    }

    #[test]
    fn action_quota_exhausts_independently_of_transport_limit() {
        let engine = GuardrailEngine::new(vec![GuardrailRule::new(
            "two-per-minute",
            GuardrailKind::RateLimit,
            json!({"limit": 2, "window_secs": 60}),
            1,
        )]);
        let catalog = default_catalog();
        let action = catalog.find("create_order").unwrap();
        let rep = reputation(800, 0);
        let args = json!({});

        assert!(engine.evaluate(action, &ctx(&rep, &args)).allow);
        assert!(engine.evaluate(action, &ctx(&rep, &args)).allow);
        let third = engine.evaluate(action, &ctx(&rep, &args));
        assert!(!third.allow);
        assert!(third.reason.as_deref().unwrap().contains("quota"));
    }

    #[test]
    fn confirmation_rule_raises_flag_without_denying() {
        let engine = GuardrailEngine::new(vec![GuardrailRule::new(
            "confirm-orders",
            GuardrailKind::Confirmation,
            json!({"actions": ["create_order"]}),
            1,
        )]);
        let catalog = default_catalog();
        let rep = reputation(800, 0);
        let args = json!({});

        let decision = engine.evaluate(catalog.find("create_order").unwrap(), &ctx(&rep, &args));
        assert!(decision.allow);
        assert!(decision.requires_confirmation);

        let decision = engine.evaluate(catalog.find("search_products").unwrap(), &ctx(&rep, &args));
        assert!(!decision.requires_confirmation);
    }

    #[test]
    fn sandbox_rule_is_advisory_only() {
        let engine = GuardrailEngine::new(vec![GuardrailRule::new(
            "simulate-orders",
            GuardrailKind::Sandbox,
            json!({"categories": ["order"]}),
            1,
        )]);
        let catalog = default_catalog();
        let rep = reputation(800, 0);
        let args = json!({});

        let decision = engine.evaluate(catalog.find("create_order").unwrap(), &ctx(&rep, &args));
        assert!(decision.allow);
        assert!(decision.recommend_simulation);
    }

    #[test]
    fn blacklist_trips_at_violation_threshold() {
        let engine = GuardrailEngine::new(vec![GuardrailRule::new(
            "autoblock",
            GuardrailKind::Blacklist,
            json!({"max_violations": 3}),
            1,
        )]);
        let catalog = default_catalog();
        let action = catalog.find("search_products").unwrap();
        let args = json!({});

        let clean = reputation(800, 2);
        assert!(engine.evaluate(action, &ctx(&clean, &args)).allow);

        let blocked = reputation(800, 3);
        let decision = engine.evaluate(action, &ctx(&blocked, &args));
        assert!(!decision.allow);
        assert!(decision.reason.as_deref().unwrap().contains("blocked"));
    }
}
