//! Policy data model

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

use crate::error::{MaestroError, Result};

/// A dynamically-loaded policy rule.
///
/// Policies with an empty `tenant_id` are global; all others apply only to
/// requests from the matching tenant. Higher `priority` evaluates first.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DynamicPolicy {
    pub id: String,
    pub name: String,

    /// Empty string means global
    #[serde(default)]
    pub tenant_id: String,

    /// Higher evaluates first
    #[serde(default)]
    pub priority: i32,

    #[serde(default = "default_enabled")]
    pub enabled: bool,

    /// All conditions must hold for the policy to match
    #[serde(default)]
    pub conditions: Vec<PolicyCondition>,

    /// Applied in order on match
    #[serde(default)]
    pub actions: Vec<PolicyAction>,
}

fn default_enabled() -> bool {
    true
}

impl DynamicPolicy {
    /// Create an enabled global policy.
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            tenant_id: String::new(),
            priority: 0,
            enabled: true,
            conditions: Vec::new(),
            actions: Vec::new(),
        }
    }

    /// Scope the policy to a tenant.
    pub fn for_tenant(mut self, tenant_id: impl Into<String>) -> Self {
        self.tenant_id = tenant_id.into();
        self
    }

    /// Set the priority.
    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    /// Add a condition.
    pub fn when(mut self, condition: PolicyCondition) -> Self {
        self.conditions.push(condition);
        self
    }

    /// Add an action.
    pub fn then(mut self, action: PolicyAction) -> Self {
        self.actions.push(action);
        self
    }

    /// Whether this policy applies to the given tenant.
    pub fn applies_to(&self, tenant_id: &str) -> bool {
        self.tenant_id.is_empty() || self.tenant_id == tenant_id
    }
}

/// A single condition over a request field
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PolicyCondition {
    /// Dotted path into the request (`user.role`, `query`, `risk_score`,
    /// `context.<key>`, ...)
    pub field: String,

    pub operator: ConditionOperator,

    /// Right-hand side of the comparison
    pub value: serde_json::Value,
}

impl PolicyCondition {
    pub fn new(
        field: impl Into<String>,
        operator: ConditionOperator,
        value: serde_json::Value,
    ) -> Self {
        Self {
            field: field.into(),
            operator,
            value,
        }
    }
}

/// Comparison operator for policy conditions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConditionOperator {
    Equals,
    NotEquals,
    GreaterThan,
    LessThan,
    GreaterOrEqual,
    LessOrEqual,
    Contains,
    Regex,
    In,
}

/// Effect applied when a policy matches
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PolicyAction {
    #[serde(rename = "type")]
    pub action: ActionType,

    /// Action-specific settings (e.g. `modifier` for `modify_risk`)
    #[serde(default)]
    pub config: serde_json::Map<String, serde_json::Value>,
}

impl PolicyAction {
    pub fn new(action: ActionType) -> Self {
        Self {
            action,
            config: serde_json::Map::new(),
        }
    }

    pub fn with_config(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.config.insert(key.into(), value);
        self
    }
}

/// Kinds of policy actions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionType {
    Block,
    Redact,
    ModifyRisk,
    RequireApproval,
    Log,
    Warn,
}

/// Write scope of a policy, used by tier enforcement
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PolicyScope {
    /// Reserved built-in tier; never writable
    System,
    /// Organization-wide; requires the enterprise tier
    Organization,
    /// Single tenant
    Tenant,
}

/// Aggregated verdict of one evaluation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PolicyEvaluationResult {
    pub allowed: bool,

    /// Saturating danger score in [0, 1]
    pub risk_score: f64,

    /// Names of matched policies, in evaluation order
    pub applied_policies: Vec<String>,

    /// Follow-up obligations (`require_approval`, `redact`, ...)
    pub required_actions: BTreeSet<String>,

    /// Whether this evaluation consulted a store-loaded snapshot
    pub database_accessed: bool,

    pub processing_time_ms: u64,

    /// Set when the verdict came from a stale or built-in snapshot
    #[serde(default)]
    pub degraded: bool,
}

impl PolicyEvaluationResult {
    /// Permissive default verdict.
    pub fn permissive() -> Self {
        Self {
            allowed: true,
            risk_score: 0.0,
            applied_policies: Vec::new(),
            required_actions: BTreeSet::new(),
            database_accessed: false,
            processing_time_ms: 0,
            degraded: false,
        }
    }

    /// Whether HITL approval is demanded.
    pub fn requires_approval(&self) -> bool {
        self.required_actions.contains("require_approval")
    }
}

/// Storage row shape for a policy
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PolicyRow {
    pub id: String,
    pub name: String,
    pub tenant_id: String,
    pub priority: i32,
    pub enabled: bool,
    pub conditions_json: String,
    pub actions_json: String,
}

impl PolicyRow {
    /// Parse the row into a [`DynamicPolicy`].
    ///
    /// # Errors
    ///
    /// Returns an error when either JSON column is corrupt; callers skip
    /// such rows rather than failing the refresh.
    pub fn parse(&self) -> Result<DynamicPolicy> {
        let conditions: Vec<PolicyCondition> =
            serde_json::from_str(&self.conditions_json).map_err(|e| {
                MaestroError::Storage(format!("policy '{}': bad conditions: {}", self.name, e))
            })?;
        let actions: Vec<PolicyAction> = serde_json::from_str(&self.actions_json).map_err(|e| {
            MaestroError::Storage(format!("policy '{}': bad actions: {}", self.name, e))
        })?;

        Ok(DynamicPolicy {
            id: self.id.clone(),
            name: self.name.clone(),
            tenant_id: self.tenant_id.clone(),
            priority: self.priority,
            enabled: self.enabled,
            conditions,
            actions,
        })
    }

    /// Serialize a policy into its row shape.
    pub fn from_policy(policy: &DynamicPolicy) -> Result<Self> {
        Ok(Self {
            id: policy.id.clone(),
            name: policy.name.clone(),
            tenant_id: policy.tenant_id.clone(),
            priority: policy.priority,
            enabled: policy.enabled,
            conditions_json: serde_json::to_string(&policy.conditions)?,
            actions_json: serde_json::to_string(&policy.actions)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_policy_builder() {
        let policy = DynamicPolicy::new("p1", "block-sql")
            .for_tenant("acme")
            .with_priority(50)
            .when(PolicyCondition::new(
                "risk_score",
                ConditionOperator::GreaterThan,
                serde_json::json!(0.8),
            ))
            .then(PolicyAction::new(ActionType::Block));

        assert!(policy.applies_to("acme"));
        assert!(!policy.applies_to("other"));
        assert_eq!(policy.conditions.len(), 1);
        assert_eq!(policy.actions[0].action, ActionType::Block);
    }

    #[test]
    fn test_global_policy_applies_everywhere() {
        let policy = DynamicPolicy::new("p1", "global");
        assert!(policy.applies_to("acme"));
        assert!(policy.applies_to(""));
    }

    #[test]
    fn test_row_round_trip() {
        let policy = DynamicPolicy::new("p1", "test")
            .when(PolicyCondition::new(
                "user.role",
                ConditionOperator::Equals,
                serde_json::json!("admin"),
            ))
            .then(PolicyAction::new(ActionType::ModifyRisk).with_config("modifier", serde_json::json!(1.5)));

        let row = PolicyRow::from_policy(&policy).unwrap();
        let parsed = row.parse().unwrap();

        assert_eq!(parsed.name, "test");
        assert_eq!(parsed.conditions.len(), 1);
        assert_eq!(parsed.actions[0].config["modifier"], 1.5);
    }

    #[test]
    fn test_corrupt_row_fails_parse() {
        let row = PolicyRow {
            id: "p1".to_string(),
            name: "bad".to_string(),
            tenant_id: String::new(),
            priority: 0,
            enabled: true,
            conditions_json: "{not json".to_string(),
            actions_json: "[]".to_string(),
        };

        assert!(row.parse().is_err());
    }

    #[test]
    fn test_action_serde_uses_type_tag() {
        let action = PolicyAction::new(ActionType::RequireApproval);
        let json = serde_json::to_value(&action).unwrap();
        assert_eq!(json["type"], "require_approval");
    }
}
