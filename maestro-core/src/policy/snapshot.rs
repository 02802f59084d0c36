//! Immutable policy snapshots
//!
//! The engine evaluates against an `Arc<PolicySnapshot>` published by the
//! refresh task. Regexes are compiled once per snapshot; a pattern that
//! fails to compile disables its condition rather than panicking.

use regex::Regex;
use std::time::Duration;
use tracing::warn;

use super::model::{ConditionOperator, DynamicPolicy, PolicyCondition};

/// A condition with its pre-compiled regex, when applicable
pub(crate) struct CompiledCondition {
    pub condition: PolicyCondition,
    /// Present only for valid `regex` operators
    pub regex: Option<Regex>,
}

impl CompiledCondition {
    fn compile(condition: PolicyCondition, policy_name: &str) -> Self {
        let regex = if condition.operator == ConditionOperator::Regex {
            match condition.value.as_str().map(Regex::new) {
                Some(Ok(regex)) => Some(regex),
                Some(Err(e)) => {
                    warn!(
                        policy = policy_name,
                        field = %condition.field,
                        error = %e,
                        "invalid regex pattern; condition will never match"
                    );
                    None
                }
                None => {
                    warn!(
                        policy = policy_name,
                        field = %condition.field,
                        "regex condition value is not a string; condition will never match"
                    );
                    None
                }
            }
        } else {
            None
        };

        Self { condition, regex }
    }
}

/// A policy with compiled conditions
pub(crate) struct CompiledPolicy {
    pub policy: DynamicPolicy,
    pub conditions: Vec<CompiledCondition>,
}

/// Immutable view of the active policy set
pub(crate) struct PolicySnapshot {
    /// Sorted by priority, descending
    policies: Vec<CompiledPolicy>,
    loaded_at: tokio::time::Instant,
    /// Whether the snapshot came from the policy store (vs. built-in)
    pub from_store: bool,
}

impl PolicySnapshot {
    /// Compile and sort a policy set into a snapshot.
    pub(crate) fn build(mut policies: Vec<DynamicPolicy>, from_store: bool) -> Self {
        policies.retain(|p| p.enabled);
        policies.sort_by(|a, b| b.priority.cmp(&a.priority));

        let compiled = policies
            .into_iter()
            .map(|policy| {
                let conditions = policy
                    .conditions
                    .iter()
                    .cloned()
                    .map(|c| CompiledCondition::compile(c, &policy.name))
                    .collect();
                CompiledPolicy { policy, conditions }
            })
            .collect();

        Self {
            policies: compiled,
            loaded_at: tokio::time::Instant::now(),
            from_store,
        }
    }

    /// Age of the snapshot.
    pub(crate) fn age(&self) -> Duration {
        self.loaded_at.elapsed()
    }

    /// Policies applicable to a tenant, in priority order.
    pub(crate) fn applicable<'a>(
        &'a self,
        tenant_id: &'a str,
    ) -> impl Iterator<Item = &'a CompiledPolicy> {
        self.policies
            .iter()
            .filter(move |p| p.policy.applies_to(tenant_id))
    }

    /// Every active policy.
    pub(crate) fn all(&self) -> impl Iterator<Item = &DynamicPolicy> {
        self.policies.iter().map(|p| &p.policy)
    }

    /// Find a policy by name.
    pub(crate) fn get(&self, name: &str) -> Option<&DynamicPolicy> {
        self.policies
            .iter()
            .map(|p| &p.policy)
            .find(|p| p.name == name)
    }

    pub(crate) fn len(&self) -> usize {
        self.policies.len()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.policies.is_empty()
    }
}
